//! RSA-OAEP key material for the shared-session key exchange.
//!
//! A joining member posts its public key as PEM (`$PUBLIC_{email}`) and keeps
//! the PKCS#8 private key sealed under its own master key (`$TFEK_{email}`).
//! A member holding the session key wraps it for the joiner with
//! OAEP(SHA-256, MGF1-SHA-256, empty label) as `$SHARED_{email}`.

use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::{Oaep, RsaPrivateKey, RsaPublicKey};
use sha2::Sha256;
use sv_core::{SvError, SvResult};
use zeroize::Zeroizing;

use crate::cipher::SessionKey;

/// Default modulus size (public exponent is always 65537).
pub const RSA_BITS: usize = 2048;

/// An ephemeral handshake key pair.
pub struct HandshakeKeys {
    private: RsaPrivateKey,
}

impl HandshakeKeys {
    pub fn generate(bits: usize) -> SvResult<Self> {
        let private = RsaPrivateKey::new(&mut rand::thread_rng(), bits)
            .map_err(|e| anyhow::anyhow!("RSA key generation failed: {e}"))?;
        Ok(Self { private })
    }

    pub fn public_pem(&self) -> SvResult<String> {
        RsaPublicKey::from(&self.private)
            .to_public_key_pem(LineEnding::LF)
            .map_err(|e| anyhow::anyhow!("encoding public key: {e}").into())
    }

    /// PKCS#8 DER of the private key, for sealing into `$TFEK_{email}`.
    pub fn private_der(&self) -> SvResult<Zeroizing<Vec<u8>>> {
        let doc = self
            .private
            .to_pkcs8_der()
            .map_err(|e| anyhow::anyhow!("encoding private key: {e}"))?;
        Ok(Zeroizing::new(doc.as_bytes().to_vec()))
    }

    pub fn from_private_der(der: &[u8]) -> SvResult<Self> {
        let private = RsaPrivateKey::from_pkcs8_der(der)
            .map_err(|e| SvError::Corruption(format!("unreadable handshake private key: {e}")))?;
        Ok(Self { private })
    }

    /// Recover a session key wrapped for this key pair.
    pub fn unwrap_session_key(&self, wrapped: &[u8]) -> SvResult<SessionKey> {
        let plain = Zeroizing::new(
            self.private
                .decrypt(Oaep::new::<Sha256>(), wrapped)
                .map_err(|_| SvError::Corruption("wrapped session key rejected".into()))?,
        );
        SessionKey::from_slice(&plain)
    }
}

impl std::fmt::Debug for HandshakeKeys {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandshakeKeys")
            .field("private", &"[REDACTED]")
            .finish()
    }
}

/// Wrap `key` for the holder of the PEM public key `public_pem`.
pub fn wrap_session_key(public_pem: &str, key: &SessionKey) -> SvResult<Vec<u8>> {
    let public = RsaPublicKey::from_public_key_pem(public_pem.trim())
        .map_err(|e| SvError::Corruption(format!("unreadable public key: {e}")))?;
    public
        .encrypt(&mut rand::thread_rng(), Oaep::new::<Sha256>(), key.as_bytes())
        .map_err(|e| anyhow::anyhow!("RSA-OAEP wrap failed: {e}").into())
}
