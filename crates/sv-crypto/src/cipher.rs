//! Authenticated symmetric ciphers for file contents and key material.
//!
//! Ciphertext layouts:
//! ```text
//! aes        [16-byte nonce][16-byte tag][ciphertext]     AES-256-GCM
//! xchacha20  [24-byte nonce][ciphertext][16-byte tag]     XChaCha20-Poly1305
//! null       [plaintext]
//! ```
//!
//! The cipher name is written to `$META`; a receiver configured with a
//! different name refuses to load the session.

use aes_gcm::{
    aead::{consts::U16, AeadInPlace, KeyInit},
    aes::Aes256,
    AesGcm, Nonce, Tag,
};
use chacha20poly1305::{aead::Aead, XChaCha20Poly1305, XNonce};
use hkdf::Hkdf;
use rand::RngCore;
use sha2::Sha256;
use sv_core::{SvError, SvResult};
use zeroize::Zeroize;

use crate::{AES_NONCE_SIZE, KEY_SIZE, TAG_SIZE, XNONCE_SIZE};

/// AES-256-GCM with a 128-bit nonce.
type Aes256Gcm16 = AesGcm<Aes256, U16>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CipherKind {
    Aes,
    XChaCha20,
    /// No encryption. Only for tests and debugging.
    Null,
}

impl CipherKind {
    pub fn name(&self) -> &'static str {
        match self {
            CipherKind::Aes => "aes",
            CipherKind::XChaCha20 => "xchacha20",
            CipherKind::Null => "null",
        }
    }

    pub fn from_name(name: &str) -> SvResult<Self> {
        match name {
            "aes" => Ok(CipherKind::Aes),
            "xchacha20" => Ok(CipherKind::XChaCha20),
            "null" => Ok(CipherKind::Null),
            other => Err(SvError::Config(format!("unknown cipher {other:?}"))),
        }
    }
}

/// A 256-bit symmetric key. Zeroized on drop.
#[derive(Clone, PartialEq, Eq)]
pub struct SessionKey {
    bytes: [u8; KEY_SIZE],
}

impl SessionKey {
    pub fn from_bytes(bytes: [u8; KEY_SIZE]) -> Self {
        Self { bytes }
    }

    pub fn from_slice(bytes: &[u8]) -> SvResult<Self> {
        let bytes: [u8; KEY_SIZE] = bytes.try_into().map_err(|_| {
            SvError::Corruption(format!(
                "key has wrong size: {} bytes (expected {KEY_SIZE})",
                bytes.len()
            ))
        })?;
        Ok(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.bytes
    }
}

impl Drop for SessionKey {
    fn drop(&mut self) {
        self.bytes.zeroize();
    }
}

impl std::fmt::Debug for SessionKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionKey")
            .field("bytes", &"[REDACTED]")
            .finish()
    }
}

/// A cipher of a given kind, optionally holding its key.
#[derive(Debug, Clone)]
pub struct Cipher {
    kind: CipherKind,
    key: Option<SessionKey>,
}

impl Cipher {
    pub fn new(kind: CipherKind) -> Self {
        Self { kind, key: None }
    }

    pub fn from_name(name: &str) -> SvResult<Self> {
        Ok(Self::new(CipherKind::from_name(name)?))
    }

    pub fn with_key(kind: CipherKind, key: SessionKey) -> Self {
        Self {
            kind,
            key: Some(key),
        }
    }

    pub fn kind(&self) -> CipherKind {
        self.kind
    }

    pub fn name(&self) -> &'static str {
        self.kind.name()
    }

    pub fn key(&self) -> Option<&SessionKey> {
        self.key.as_ref()
    }

    pub fn set_key(&mut self, key: SessionKey) {
        self.key = Some(key);
    }

    /// An independent cipher of the same kind and key.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// Same key, different algorithm. Used when `$META` names another cipher.
    pub fn rebuild(&self, kind: CipherKind) -> Self {
        Self {
            kind,
            key: self.key.clone(),
        }
    }

    /// Generate a fresh random key of this cipher's length.
    pub fn generate_key(&self) -> SessionKey {
        let mut bytes = [0u8; KEY_SIZE];
        rand::thread_rng().fill_bytes(&mut bytes);
        SessionKey::from_bytes(bytes)
    }

    /// Normalize arbitrary key material (e.g. a KDF output) to this cipher's
    /// key length via HKDF-SHA256.
    pub fn generate_key_from_key(&self, material: &[u8]) -> SvResult<SessionKey> {
        let hkdf = Hkdf::<Sha256>::new(None, material);
        let mut okm = [0u8; KEY_SIZE];
        hkdf.expand(b"splitvault-cipher-key", &mut okm)
            .map_err(|e| anyhow::anyhow!("HKDF expand failed: {e}"))?;
        Ok(SessionKey::from_bytes(okm))
    }

    fn require_key(&self) -> SvResult<&SessionKey> {
        self.key
            .as_ref()
            .ok_or_else(|| SvError::Config(format!("{} cipher has no key set", self.name())))
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> SvResult<Vec<u8>> {
        match self.kind {
            CipherKind::Null => Ok(plaintext.to_vec()),
            CipherKind::Aes => {
                let cipher = Aes256Gcm16::new_from_slice(self.require_key()?.as_bytes())
                    .map_err(|e| anyhow::anyhow!("AES key setup failed: {e}"))?;

                let mut nonce_bytes = [0u8; AES_NONCE_SIZE];
                rand::thread_rng().fill_bytes(&mut nonce_bytes);
                let nonce = Nonce::<U16>::from_slice(&nonce_bytes);

                let mut buffer = plaintext.to_vec();
                let tag = cipher
                    .encrypt_in_place_detached(nonce, b"", &mut buffer)
                    .map_err(|e| anyhow::anyhow!("AES-GCM encryption failed: {e}"))?;

                let mut result = Vec::with_capacity(AES_NONCE_SIZE + TAG_SIZE + buffer.len());
                result.extend_from_slice(&nonce_bytes);
                result.extend_from_slice(&tag);
                result.extend_from_slice(&buffer);
                Ok(result)
            }
            CipherKind::XChaCha20 => {
                let cipher = XChaCha20Poly1305::new(self.require_key()?.as_bytes().into());

                let mut nonce_bytes = [0u8; XNONCE_SIZE];
                rand::thread_rng().fill_bytes(&mut nonce_bytes);
                let nonce = XNonce::from_slice(&nonce_bytes);

                let ciphertext = cipher
                    .encrypt(nonce, plaintext)
                    .map_err(|e| anyhow::anyhow!("XChaCha20 encryption failed: {e}"))?;

                let mut result = Vec::with_capacity(XNONCE_SIZE + ciphertext.len());
                result.extend_from_slice(&nonce_bytes);
                result.extend_from_slice(&ciphertext);
                Ok(result)
            }
        }
    }

    pub fn decrypt(&self, data: &[u8]) -> SvResult<Vec<u8>> {
        match self.kind {
            CipherKind::Null => Ok(data.to_vec()),
            CipherKind::Aes => {
                if data.len() < AES_NONCE_SIZE + TAG_SIZE {
                    return Err(SvError::Corruption(format!(
                        "ciphertext too short: {} bytes (minimum {})",
                        data.len(),
                        AES_NONCE_SIZE + TAG_SIZE
                    )));
                }
                let cipher = Aes256Gcm16::new_from_slice(self.require_key()?.as_bytes())
                    .map_err(|e| anyhow::anyhow!("AES key setup failed: {e}"))?;

                let (nonce_bytes, rest) = data.split_at(AES_NONCE_SIZE);
                let (tag, ciphertext) = rest.split_at(TAG_SIZE);
                let mut buffer = ciphertext.to_vec();
                cipher
                    .decrypt_in_place_detached(
                        Nonce::<U16>::from_slice(nonce_bytes),
                        b"",
                        &mut buffer,
                        Tag::<U16>::from_slice(tag),
                    )
                    .map_err(|_| {
                        SvError::Corruption("decryption failed: wrong key or corrupted data".into())
                    })?;
                Ok(buffer)
            }
            CipherKind::XChaCha20 => {
                if data.len() < XNONCE_SIZE + TAG_SIZE {
                    return Err(SvError::Corruption(format!(
                        "ciphertext too short: {} bytes (minimum {})",
                        data.len(),
                        XNONCE_SIZE + TAG_SIZE
                    )));
                }
                let (nonce_bytes, ciphertext) = data.split_at(XNONCE_SIZE);
                let cipher = XChaCha20Poly1305::new(self.require_key()?.as_bytes().into());
                cipher
                    .decrypt(XNonce::from_slice(nonce_bytes), ciphertext)
                    .map_err(|_| {
                        SvError::Corruption("decryption failed: wrong key or corrupted data".into())
                    })
            }
        }
    }
}
