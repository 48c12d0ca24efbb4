//! K-of-M Shamir secret sharing over GF(256).
//!
//! Each byte of the input is the constant term of its own random polynomial
//! of degree K-1. Share `x` (1-based) carries the evaluations at `x`, encoded
//! on the wire as `[x, y_0, y_1, ...]`. Any K distinct shares interpolate the
//! input; fewer reveal nothing about it.

use sharks::{Share, Sharks};
use sv_core::{SvError, SvResult};

/// GF(256) has 255 non-zero evaluation points.
pub const MAX_SHARES: usize = 255;

/// Shares needed to reconstruct when dealing `m` shares.
///
/// One backend may be lost; with a single backend there is nothing to lose.
pub fn threshold(m: usize) -> usize {
    if m >= 2 {
        m - 1
    } else {
        1
    }
}

/// Deal `m` shares of `data` with the given threshold.
pub fn deal(data: &[u8], k: usize, m: usize) -> SvResult<Vec<Vec<u8>>> {
    check_params(k, m)?;
    if data.is_empty() {
        // sharks cannot parse a share with no payload bytes
        return Ok((1..=m).map(|x| vec![x as u8]).collect());
    }
    let sharks = Sharks(k as u8);
    Ok(sharks
        .dealer(data)
        .take(m)
        .map(|share| Vec::from(&share))
        .collect())
}

/// Reconstruct from encoded shares. Duplicate `x` coordinates are ignored.
pub fn recover<'a, I>(shares: I, k: usize) -> SvResult<Vec<u8>>
where
    I: IntoIterator<Item = &'a [u8]>,
{
    let mut seen = [false; 256];
    let mut picked: Vec<&[u8]> = Vec::with_capacity(k);
    for raw in shares {
        let Some(&x) = raw.first() else {
            continue;
        };
        if x == 0 || seen[x as usize] {
            continue;
        }
        seen[x as usize] = true;
        picked.push(raw);
        if picked.len() == k {
            break;
        }
    }
    if picked.len() < k {
        return Err(SvError::NotEnoughShares {
            have: picked.len(),
            need: k,
        });
    }

    let payload_len = picked[0].len();
    if picked.iter().any(|s| s.len() != payload_len) {
        return Err(SvError::Corruption("shares differ in length".into()));
    }
    if payload_len == 1 {
        return Ok(Vec::new());
    }

    let parsed = picked
        .iter()
        .map(|raw| {
            Share::try_from(*raw)
                .map_err(|e| SvError::Corruption(format!("unreadable share: {e}")))
        })
        .collect::<SvResult<Vec<Share>>>()?;
    Sharks(k as u8)
        .recover(parsed.iter())
        .map_err(|e| SvError::Corruption(format!("share interpolation failed: {e}")))
}

fn check_params(k: usize, m: usize) -> SvResult<()> {
    if m == 0 || m > MAX_SHARES {
        return Err(SvError::Config(format!(
            "shamir needs 1..={MAX_SHARES} shares, got {m}"
        )));
    }
    if k == 0 || k > m {
        return Err(SvError::Config(format!("invalid shamir threshold {k} of {m}")));
    }
    Ok(())
}
