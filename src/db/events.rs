use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::event::{EventLevel, JobEvent};

/// Append a job event
pub async fn insert_event(pool: &PgPool, event: &JobEvent) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        INSERT INTO job_events (job_id, level, message, metadata, created_at)
        VALUES ($1, $2, $3, $4, $5)
        "#,
    )
    .bind(event.job_id)
    .bind(event.level.to_string())
    .bind(&event.message)
    .bind(&event.metadata)
    .bind(event.timestamp)
    .execute(pool)
    .await?;

    Ok(())
}

/// Events for a job, oldest first
pub async fn list_events(pool: &PgPool, job_id: Uuid) -> Result<Vec<JobEvent>, sqlx::Error> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, level, message, metadata, created_at
        FROM job_events
        WHERE job_id = $1
        ORDER BY created_at ASC, id ASC
        "#,
    )
    .bind(job_id)
    .fetch_all(pool)
    .await?;

    rows.into_iter()
        .map(|r| {
            let level: String = r.try_get("level")?;
            Ok(JobEvent {
                job_id: r.try_get("job_id")?,
                level: level
                    .parse::<EventLevel>()
                    .map_err(|e| sqlx::Error::Decode(Box::new(e)))?,
                message: r.try_get("message")?,
                metadata: r.try_get("metadata")?,
                timestamp: r.try_get("created_at")?,
            })
        })
        .collect()
}
