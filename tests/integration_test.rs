use relist_worker::{
    config::WorkerConfig,
    db::{self, accounts, events, jobs},
    models::{
        account::AccountStatus,
        event::{EventLevel, JobEvent},
        job::{JobProgress, JobResult, JobStatus, PlatformResult},
        listing::Platform,
    },
    services::{
        encryption::EncryptionService,
        queue::{JobQueue, PgJobQueue, QueueError},
        vault::{CredentialVault, PgCredentialVault, VaultError},
    },
};
use serde_json::json;
use sqlx::PgPool;
use std::collections::HashSet;
use std::sync::Arc;
use uuid::Uuid;

/// Connect using DATABASE_URL and ENCRYPTION_KEY from the environment.
///
/// Note: These tests require a running PostgreSQL instance.
async fn setup() -> (WorkerConfig, PgPool) {
    let config = WorkerConfig::from_env().expect("Failed to load config");
    let pool = db::init_pool(&config.database_url)
        .await
        .expect("Failed to connect to database");
    db::run_migrations(&pool)
        .await
        .expect("Failed to run migrations");
    (config, pool)
}

fn payload() -> serde_json::Value {
    json!({
        "title": "Integration test listing",
        "description": "Inserted by integration_test",
        "price": 12.0,
        "condition": "good",
        "images": []
    })
}

/// Concurrent claims never hand the same job to two callers.
#[tokio::test]
#[ignore] // Run with: cargo test --test integration_test -- --ignored
async fn test_concurrent_claims_are_exclusive() {
    let (_config, pool) = setup().await;

    let job = jobs::enqueue_job(&pool, Uuid::new_v4(), &["mercari".to_string()], &payload())
        .await
        .expect("Failed to enqueue job");
    assert_eq!(job.status, JobStatus::Queued);

    let claims: Vec<_> = (0..8)
        .map(|_| {
            let pool = pool.clone();
            tokio::spawn(async move { jobs::claim_next_job(&pool).await })
        })
        .collect();

    let mut claimed = Vec::new();
    for claim in claims {
        if let Some(job) = claim.await.unwrap().expect("Claim failed") {
            claimed.push(job.id);
        }
    }

    let unique: HashSet<_> = claimed.iter().copied().collect();
    assert_eq!(unique.len(), claimed.len(), "a job was claimed twice");
    assert!(claimed.contains(&job.id));

    let stored = jobs::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Running);
    assert!(stored.started_at.is_some());
}

/// Progress, result merge and terminal transitions through the queue client.
#[tokio::test]
#[ignore]
async fn test_job_lifecycle_through_queue() {
    let (_config, pool) = setup().await;
    let queue = PgJobQueue::new(pool.clone());

    let job = jobs::enqueue_job(
        &pool,
        Uuid::new_v4(),
        &["mercari".to_string(), "facebook".to_string()],
        &payload(),
    )
    .await
    .unwrap();

    // Other tests share the table, so move this row to running directly
    // instead of racing them through claim().
    sqlx::query("UPDATE listing_jobs SET status = 'running', started_at = NOW() WHERE id = $1")
        .bind(job.id)
        .execute(&pool)
        .await
        .unwrap();
    let claimed = jobs::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(claimed.status, JobStatus::Running);

    queue
        .update_progress(claimed.id, &JobProgress::new(50, "Processing facebook..."))
        .await
        .unwrap();
    queue
        .update_progress(claimed.id, &JobProgress::new(10, "stale"))
        .await
        .unwrap();
    let stored = jobs::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.progress.percent, 50);

    let mut first = JobResult::new();
    first.insert(
        "mercari".to_string(),
        PlatformResult::listed("https://www.mercari.com/us/item/m123/"),
    );
    queue.update_result(job.id, &first).await.unwrap();

    let mut second = JobResult::new();
    second.insert(
        "facebook".to_string(),
        PlatformResult::failed("FormValidationError: price"),
    );
    queue.update_result(job.id, &second).await.unwrap();

    queue.mark_failed(job.id, "Some platforms failed").await.unwrap();

    let stored = jobs::get_job(&pool, job.id).await.unwrap().unwrap();
    assert_eq!(stored.status, JobStatus::Failed);
    assert_eq!(stored.error.as_deref(), Some("Some platforms failed"));
    assert_eq!(stored.progress.percent, 100);
    let result = stored.result.unwrap();
    assert!(result["mercari"].success);
    assert!(!result["facebook"].success);

    // Terminal rows are never rewritten.
    assert!(matches!(
        queue.mark_completed(job.id).await,
        Err(QueueError::NotRunning(id)) if id == job.id
    ));
}

/// Sessions sealed with a rotated-out key still open after rotation.
#[tokio::test]
#[ignore]
async fn test_vault_round_trip_and_status() {
    let (config, pool) = setup().await;
    let user_id = Uuid::new_v4();

    let old_key = EncryptionService::generate_key();
    let sealed_with_old = EncryptionService::new(&old_key)
        .unwrap()
        .encrypt_json(&json!({
            "cookies": [{"name": "sid", "value": "abc", "domain": ".mercari.com"}],
            "user_agent": "Mozilla/5.0"
        }))
        .unwrap();
    accounts::upsert_account(&pool, user_id, Platform::Mercari.as_ref(), &sealed_with_old)
        .await
        .unwrap();

    let encryption =
        EncryptionService::with_previous_keys(&config.encryption_key, &[old_key]).unwrap();
    let vault = PgCredentialVault::new(pool.clone(), Arc::new(encryption));

    let session = vault
        .get_decrypted_session(user_id, Platform::Mercari)
        .await
        .expect("session should decrypt with the previous key");
    assert_eq!(session.cookies.len(), 1);
    assert_eq!(session.cookies[0].path, "/");
    assert_eq!(session.user_agent.as_deref(), Some("Mozilla/5.0"));

    assert!(matches!(
        vault.get_decrypted_session(user_id, Platform::Facebook).await,
        Err(VaultError::AccountNotConnected(Platform::Facebook))
    ));

    accounts::set_status(&pool, user_id, Platform::Mercari.as_ref(), AccountStatus::NeedsReauth)
        .await
        .unwrap();
    assert_eq!(
        accounts::get_status(&pool, user_id, Platform::Mercari.as_ref())
            .await
            .unwrap(),
        Some(AccountStatus::NeedsReauth)
    );
    assert!(matches!(
        vault.get_decrypted_session(user_id, Platform::Mercari).await,
        Err(VaultError::AccountNotConnected(Platform::Mercari))
    ));
}

#[tokio::test]
#[ignore]
async fn test_events_listed_in_order() {
    let (_config, pool) = setup().await;
    let job = jobs::enqueue_job(&pool, Uuid::new_v4(), &["mercari".to_string()], &payload())
        .await
        .unwrap();

    for (level, message) in [
        (EventLevel::Info, "Starting mercari listing"),
        (EventLevel::Error, "mercari listing failed"),
    ] {
        events::insert_event(&pool, &JobEvent::new(job.id, level, message, json!({})))
            .await
            .unwrap();
    }

    let listed = events::list_events(&pool, job.id).await.unwrap();
    let messages: Vec<_> = listed.iter().map(|e| e.message.as_str()).collect();
    assert_eq!(messages, vec!["Starting mercari listing", "mercari listing failed"]);
    assert_eq!(listed[1].level, EventLevel::Error);
}
