//! Account creation and password login against `$LOGIN_META`.

use bytes::Bytes;
use secrecy::{ExposeSecret, SecretString};
use sv_core::names::LOGIN_META;
use sv_core::{SvError, SvResult};
use sv_crypto::{Cipher, CipherKind, KdfParams, LoginRecord, SessionKey};
use sv_split::Splitter;
use tracing::info;

use crate::session::Session;

impl Session {
    /// Whether any backend holds `$LOGIN_META`.
    pub async fn account_exists(&self) -> SvResult<bool> {
        Ok(self.download_replicated(LOGIN_META).await?.is_some())
    }

    /// Write a fresh `$LOGIN_META` to every backend and key this session
    /// with the derived master key.
    pub async fn create_login_metadata(
        &self,
        password: &SecretString,
        encrypt: &str,
        split: &str,
        params: &KdfParams,
    ) -> SvResult<SessionKey> {
        let splitter = Splitter::from_name(split)?;
        let (record, master) = {
            let password = SecretString::from(password.expose_secret().to_string());
            let (encrypt, split, params) = (encrypt.to_string(), split.to_string(), params.clone());
            tokio::task::spawn_blocking(move || LoginRecord::create(&password, &encrypt, &split, &params))
                .await
                .map_err(|e| anyhow::anyhow!("account creation task failed: {e}"))??
        };
        let gathered = self
            .upload_replicated(LOGIN_META, Bytes::from(record.to_bytes()?))
            .await?;
        if !gathered.all_ok {
            return Err(gathered
                .into_all()
                .err()
                .unwrap_or_else(|| SvError::Config("$LOGIN_META was not written".into())));
        }
        self.configure(
            Cipher::with_key(CipherKind::from_name(encrypt)?, master.clone()),
            splitter,
        );
        info!(session = %self.name(), encrypt, split, "account created");
        Ok(master)
    }

    /// Verify `password` and key this session with the master key.
    ///
    /// Returns the stored record so callers can see the account defaults.
    pub async fn login(&self, password: &SecretString, params: &KdfParams) -> SvResult<(LoginRecord, SessionKey)> {
        let bytes = self
            .download_replicated(LOGIN_META)
            .await?
            .ok_or_else(|| SvError::NotFound("no account: $LOGIN_META is missing".into()))?;
        let record = LoginRecord::from_bytes(&bytes)?;
        let params = params.clone();
        let password = SecretString::from(password.expose_secret().to_string());
        let (record, master) = tokio::task::spawn_blocking(move || {
            let master = record.verify(&password, &params)?;
            Ok::<_, SvError>((record, master))
        })
        .await
        .map_err(|e| anyhow::anyhow!("login task failed: {e}"))??;

        let splitter = Splitter::from_name(&record.split)?;
        self.configure(
            Cipher::with_key(CipherKind::from_name(&record.encrypt)?, master.clone()),
            splitter,
        );
        info!(session = %self.name(), "logged in");
        Ok((record, master))
    }
}
