//! sv-crypto: client-side encryption for splitvault
//!
//! Key hierarchy:
//! ```text
//! Password + salt ──Argon2id──> k ──HKDF──> Master key K        ($LOGIN_META verifies K)
//!   ├── Main session: files sealed directly under K
//!   └── Shared session key SK (random, 256-bit)
//!         ├── $FEK            = E_K(SK)               (creator)
//!         ├── $FEK_{email}    = E_K'(SK)              (each joined member)
//!         ├── $TFEK_{email}   = E_K'(RSA private key) (joiner, while pending)
//!         └── $SHARED_{email} = RSA-OAEP(SK)          (wrapped for a joiner)
//! ```

pub mod cipher;
pub mod handshake;
pub mod kdf;
pub mod login;

pub use cipher::{Cipher, CipherKind, SessionKey};
pub use handshake::{wrap_session_key, HandshakeKeys};
pub use kdf::{derive_master_key, KdfParams, MasterKey};
pub use login::LoginRecord;

/// Size of every symmetric key in bytes (256-bit)
pub const KEY_SIZE: usize = 32;

/// AES-GCM nonce size used by the `aes` cipher
pub const AES_NONCE_SIZE: usize = 16;

/// XChaCha20-Poly1305 nonce size (192-bit)
pub const XNONCE_SIZE: usize = 24;

/// AEAD authentication tag size
pub const TAG_SIZE: usize = 16;

/// Salt size for the password KDF
pub const SALT_SIZE: usize = 16;
