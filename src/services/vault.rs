use async_trait::async_trait;
use sqlx::PgPool;
use std::sync::Arc;
use uuid::Uuid;

use crate::db::accounts;
use crate::models::account::SessionPayload;
use crate::models::listing::Platform;
use crate::services::encryption::EncryptionService;

/// Source of decrypted marketplace sessions.
///
/// No retries: a decryption failure means a corrupted row or a key that is no
/// longer configured, neither of which heals on its own.
#[async_trait]
pub trait CredentialVault: Send + Sync {
    async fn get_decrypted_session(
        &self,
        user_id: Uuid,
        platform: Platform,
    ) -> Result<SessionPayload, VaultError>;
}

pub struct PgCredentialVault {
    db: PgPool,
    encryption: Arc<EncryptionService>,
}

impl PgCredentialVault {
    pub fn new(db: PgPool, encryption: Arc<EncryptionService>) -> Self {
        Self { db, encryption }
    }
}

#[async_trait]
impl CredentialVault for PgCredentialVault {
    async fn get_decrypted_session(
        &self,
        user_id: Uuid,
        platform: Platform,
    ) -> Result<SessionPayload, VaultError> {
        let sealed = accounts::get_connected_session(&self.db, user_id, platform.as_ref())
            .await?
            .ok_or(VaultError::AccountNotConnected(platform))?;

        self.encryption
            .decrypt_json::<SessionPayload>(&sealed)
            .map_err(|e| VaultError::Decryption(platform, e.to_string()))
    }
}

#[derive(Debug, thiserror::Error)]
pub enum VaultError {
    #[error("AccountNotConnected: no connected {0} account")]
    AccountNotConnected(Platform),

    #[error("DecryptionError: {0} session could not be decrypted ({1})")]
    Decryption(Platform, String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
