//! Split codecs selected by the `split` field of `$META`.

use bytes::Bytes;
use sv_core::{SvError, SvResult};

use crate::shamir;

/// Output of [`Splitter::split`]: one group per backend, `copies_per_cloud`
/// shares in each.
pub type ShareGroups = Vec<Vec<Bytes>>;

/// Input of [`Splitter::merge`]: same shape, with missing shares as `None`.
pub type SparseGroups = Vec<Vec<Option<Bytes>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SplitKind {
    /// Every backend holds the full blob
    None,
    /// Shamir K-of-M, K = M - 1
    Shamir,
}

impl SplitKind {
    pub fn name(self) -> &'static str {
        match self {
            SplitKind::None => "none",
            SplitKind::Shamir => "shamir",
        }
    }

    pub fn from_name(name: &str) -> SvResult<Self> {
        match name {
            "none" => Ok(SplitKind::None),
            "shamir" => Ok(SplitKind::Shamir),
            other => Err(SvError::Config(format!("unknown split codec {other:?}"))),
        }
    }
}

impl std::fmt::Display for SplitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A split codec instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Splitter {
    kind: SplitKind,
}

impl Splitter {
    pub fn new(kind: SplitKind) -> Self {
        Self { kind }
    }

    pub fn from_name(name: &str) -> SvResult<Self> {
        SplitKind::from_name(name).map(Self::new)
    }

    pub fn kind(&self) -> SplitKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    /// Shares each backend stores per file.
    pub fn copies_per_cloud(&self) -> usize {
        1
    }

    /// Backend groups needed by [`merge`](Self::merge) when splitting `m` ways.
    pub fn threshold(&self, m: usize) -> usize {
        match self.kind {
            SplitKind::None => 1,
            SplitKind::Shamir => shamir::threshold(m),
        }
    }

    /// Split `data` into `m` backend groups.
    pub fn split(&self, data: &[u8], m: usize) -> SvResult<ShareGroups> {
        if m == 0 {
            return Err(SvError::Config("cannot split across zero backends".into()));
        }
        let groups = match self.kind {
            SplitKind::None => {
                let blob = Bytes::copy_from_slice(data);
                (0..m).map(|_| vec![blob.clone()]).collect()
            }
            SplitKind::Shamir => shamir::deal(data, self.threshold(m), m)?
                .into_iter()
                .map(|share| vec![Bytes::from(share)])
                .collect(),
        };
        tracing::trace!(codec = self.name(), m, bytes = data.len(), "split");
        Ok(groups)
    }

    /// Rebuild the blob from whatever shares were fetched.
    ///
    /// Fails with `NotEnoughShares` when fewer than the threshold of groups
    /// carry data.
    pub fn merge(&self, parts: &[Vec<Option<Bytes>>], m: usize) -> SvResult<Vec<u8>> {
        let need = self.threshold(m);
        let present: Vec<&Bytes> = parts
            .iter()
            .filter_map(|group| group.iter().flatten().next())
            .collect();
        if present.len() < need {
            return Err(SvError::NotEnoughShares {
                have: present.len(),
                need,
            });
        }
        match self.kind {
            SplitKind::None => Ok(present[0].to_vec()),
            SplitKind::Shamir => shamir::recover(present.iter().map(|b| b.as_ref()), need),
        }
    }
}
