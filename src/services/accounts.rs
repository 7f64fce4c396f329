use async_trait::async_trait;
use sqlx::PgPool;
use uuid::Uuid;

use crate::db::accounts;
use crate::models::account::AccountStatus;
use crate::models::listing::Platform;

/// Write side of the platform account table used for status signals.
#[async_trait]
pub trait AccountStore: Send + Sync {
    async fn set_status(
        &self,
        user_id: Uuid,
        platform: Platform,
        status: AccountStatus,
    ) -> Result<(), sqlx::Error>;
}

pub struct PgAccountStore {
    db: PgPool,
}

impl PgAccountStore {
    pub fn new(db: PgPool) -> Self {
        Self { db }
    }
}

#[async_trait]
impl AccountStore for PgAccountStore {
    async fn set_status(
        &self,
        user_id: Uuid,
        platform: Platform,
        status: AccountStatus,
    ) -> Result<(), sqlx::Error> {
        accounts::set_status(&self.db, user_id, platform.as_ref(), status).await
    }
}

/// Whether a recorded failure looks like the site no longer accepts the session.
pub fn is_auth_failure(error: &str) -> bool {
    let lowered = error.to_lowercase();
    lowered.contains("auth") || lowered.contains("login")
}
