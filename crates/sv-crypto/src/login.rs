//! `$LOGIN_META`: the password verification record of an account.
//!
//! ```text
//! salt           = 16 random bytes
//! k              = Argon2id(password, salt)
//! K              = cipher.generate_key_from_key(k)
//! auth_encrypted = E_K(auth_plain)          auth_plain = 16 random bytes
//! auth_hash      = SHA-256(auth_plain)
//! ```
//!
//! All binary fields are lowercase hex. The master key `K` is never stored.

use rand::RngCore;
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sv_core::{SvError, SvResult};

use crate::cipher::{Cipher, SessionKey};
use crate::kdf::{derive_master_key, KdfParams};
use crate::SALT_SIZE;

const AUTH_PLAIN_SIZE: usize = 16;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LoginRecord {
    /// Default cipher for the account's sessions
    pub encrypt: String,
    /// Default split codec for the account's sessions
    pub split: String,
    pub salt: String,
    pub auth_encrypted: String,
    pub auth_hash: String,
}

impl LoginRecord {
    /// Build a fresh record for `password`, returning it with the master key.
    pub fn create(
        password: &SecretString,
        encrypt: &str,
        split: &str,
        params: &KdfParams,
    ) -> SvResult<(Self, SessionKey)> {
        let mut rng = rand::thread_rng();

        let mut salt = [0u8; SALT_SIZE];
        rng.fill_bytes(&mut salt);

        let mut cipher = Cipher::from_name(encrypt)?;
        let kdf_out = derive_master_key(password, &salt, params)?;
        let master = cipher.generate_key_from_key(kdf_out.as_bytes())?;
        cipher.set_key(master.clone());

        let mut auth_plain = [0u8; AUTH_PLAIN_SIZE];
        rng.fill_bytes(&mut auth_plain);
        let auth_encrypted = cipher.encrypt(&auth_plain)?;
        let auth_hash = Sha256::digest(auth_plain);

        let record = LoginRecord {
            encrypt: encrypt.to_string(),
            split: split.to_string(),
            salt: hex::encode(salt),
            auth_encrypted: hex::encode(auth_encrypted),
            auth_hash: hex::encode(auth_hash),
        };
        Ok((record, master))
    }

    /// Check `password` against this record and return the master key.
    ///
    /// Any authenticator failure or hash mismatch is `BadPassword`.
    pub fn verify(&self, password: &SecretString, params: &KdfParams) -> SvResult<SessionKey> {
        let salt: [u8; SALT_SIZE] = decode_hex("salt", &self.salt)?
            .try_into()
            .map_err(|_| SvError::Corruption("$LOGIN_META salt has wrong length".into()))?;
        let auth_encrypted = decode_hex("auth_encrypted", &self.auth_encrypted)?;
        let auth_hash = decode_hex("auth_hash", &self.auth_hash)?;

        let mut cipher = Cipher::from_name(&self.encrypt)?;
        let kdf_out = derive_master_key(password, &salt, params)?;
        let master = cipher.generate_key_from_key(kdf_out.as_bytes())?;
        cipher.set_key(master.clone());

        let decrypted = match cipher.decrypt(&auth_encrypted) {
            Ok(plain) => plain,
            Err(SvError::Corruption(_)) => return Err(SvError::BadPassword),
            Err(e) => return Err(e),
        };
        if Sha256::digest(&decrypted).as_slice() != auth_hash.as_slice() {
            return Err(SvError::BadPassword);
        }
        Ok(master)
    }

    pub fn to_bytes(&self) -> SvResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    pub fn from_bytes(data: &[u8]) -> SvResult<Self> {
        serde_json::from_slice(data)
            .map_err(|e| SvError::Corruption(format!("unreadable $LOGIN_META: {e}")))
    }
}

fn decode_hex(field: &str, value: &str) -> SvResult<Vec<u8>> {
    hex::decode(value)
        .map_err(|e| SvError::Corruption(format!("$LOGIN_META {field} is not hex: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::KEY_SIZE;

    fn fast_params() -> KdfParams {
        KdfParams {
            mem_cost_kib: 1024,
            time_cost: 1,
            parallelism: 1,
        }
    }

    #[test]
    fn test_login_roundtrip() {
        let password = SecretString::from("hunter2");
        let (record, master) = LoginRecord::create(&password, "aes", "shamir", &fast_params()).unwrap();

        let verified = record.verify(&password, &fast_params()).unwrap();
        assert_eq!(verified, master);
        assert_eq!(verified.as_bytes().len(), KEY_SIZE);
    }

    #[test]
    fn test_wrong_password_rejected() {
        let (record, _) =
            LoginRecord::create(&SecretString::from("hunter2"), "aes", "shamir", &fast_params())
                .unwrap();
        let result = record.verify(&SecretString::from("hunter3"), &fast_params());
        assert!(matches!(result, Err(SvError::BadPassword)));
    }

    #[test]
    fn test_record_fields_are_lowercase_hex() {
        let (record, _) =
            LoginRecord::create(&SecretString::from("pw"), "xchacha20", "none", &fast_params())
                .unwrap();
        for field in [&record.salt, &record.auth_encrypted, &record.auth_hash] {
            assert!(field.chars().all(|c| c.is_ascii_digit() || ('a'..='f').contains(&c)));
        }
        assert_eq!(record.salt.len(), SALT_SIZE * 2);
        assert_eq!(record.auth_hash.len(), 64);
    }

    #[test]
    fn test_json_roundtrip_and_shape() {
        let (record, _) =
            LoginRecord::create(&SecretString::from("pw"), "aes", "shamir", &fast_params()).unwrap();
        let bytes = record.to_bytes().unwrap();
        let json: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        for key in ["encrypt", "split", "salt", "auth_encrypted", "auth_hash"] {
            assert!(json[key].is_string(), "{key} must be a string");
        }
        assert_eq!(LoginRecord::from_bytes(&bytes).unwrap(), record);
    }

    #[test]
    fn test_tampered_hash_rejected() {
        let password = SecretString::from("pw");
        let (mut record, _) = LoginRecord::create(&password, "aes", "shamir", &fast_params()).unwrap();
        record.auth_hash = "00".repeat(32);
        assert!(matches!(
            record.verify(&password, &fast_params()),
            Err(SvError::BadPassword)
        ));
    }
}
