use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::account::AccountStatus;

/// Encrypted session payload for a connected account, if one exists.
pub async fn get_connected_session(
    pool: &PgPool,
    user_id: Uuid,
    platform: &str,
) -> Result<Option<Vec<u8>>, sqlx::Error> {
    let row = sqlx::query(
        r#"
        SELECT session_payload_encrypted
        FROM platform_accounts
        WHERE user_id = $1 AND platform = $2 AND status = 'connected'
        "#,
    )
    .bind(user_id)
    .bind(platform)
    .fetch_optional(pool)
    .await?;

    match row {
        Some(r) => Ok(r.try_get::<Option<Vec<u8>>, _>("session_payload_encrypted")?),
        None => Ok(None),
    }
}

/// Create or replace an account after a login capture
pub async fn upsert_account(
    pool: &PgPool,
    user_id: Uuid,
    platform: &str,
    session_payload_encrypted: &[u8],
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO platform_accounts (user_id, platform, status, session_payload_encrypted)
        VALUES ($1, $2, 'connected', $3)
        ON CONFLICT (user_id, platform) DO UPDATE
        SET status = 'connected',
            session_payload_encrypted = EXCLUDED.session_payload_encrypted,
            updated_at = NOW()
        "#,
    )
    .bind(user_id)
    .bind(platform)
    .bind(session_payload_encrypted)
    .execute(pool)
    .await?;

    Ok(())
}

/// Update account status
pub async fn set_status(
    pool: &PgPool,
    user_id: Uuid,
    platform: &str,
    status: AccountStatus,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE platform_accounts
        SET status = $3, updated_at = NOW()
        WHERE user_id = $1 AND platform = $2
        "#,
    )
    .bind(user_id)
    .bind(platform)
    .bind(status.to_string())
    .execute(pool)
    .await?;

    Ok(())
}

/// Current status of an account
pub async fn get_status(
    pool: &PgPool,
    user_id: Uuid,
    platform: &str,
) -> Result<Option<AccountStatus>, sqlx::Error> {
    let row = sqlx::query("SELECT status FROM platform_accounts WHERE user_id = $1 AND platform = $2")
        .bind(user_id)
        .bind(platform)
        .fetch_optional(pool)
        .await?;

    row.map(|r| {
        let status: String = r.try_get("status")?;
        status
            .parse::<AccountStatus>()
            .map_err(|e| sqlx::Error::Decode(Box::new(e)))
    })
    .transpose()
}
