use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

use crate::models::job::{Job, JobProgress, JobResult, JobStatus};

const JOB_COLUMNS: &str = "id, user_id, platforms, payload, status, progress_percent, \
                           progress_message, result, error, created_at, started_at";

fn job_from_row(row: &PgRow) -> Result<Job, sqlx::Error> {
    let status_str: String = row.try_get("status")?;
    let status = status_str
        .parse::<JobStatus>()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let result: Option<serde_json::Value> = row.try_get("result")?;
    let result = result
        .map(serde_json::from_value::<JobResult>)
        .transpose()
        .map_err(|e| sqlx::Error::Decode(Box::new(e)))?;

    let percent: i32 = row.try_get("progress_percent")?;

    Ok(Job {
        id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        platforms: row.try_get("platforms")?,
        payload: row.try_get("payload")?,
        status,
        progress: JobProgress::new(percent.clamp(0, 100) as u8, row.try_get::<String, _>("progress_message")?),
        result,
        error: row.try_get("error")?,
        created_at: row.try_get("created_at")?,
        started_at: row.try_get("started_at")?,
    })
}

/// Insert a queued listing job
pub async fn enqueue_job(
    pool: &PgPool,
    user_id: Uuid,
    platforms: &[String],
    payload: &serde_json::Value,
) -> Result<Job, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        INSERT INTO listing_jobs (user_id, platforms, payload, status, progress_message)
        VALUES ($1, $2, $3, 'queued', 'Queued')
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .bind(user_id)
    .bind(platforms)
    .bind(payload)
    .fetch_one(pool)
    .await?;

    job_from_row(&row)
}

/// Atomically move the oldest queued job to running.
///
/// The row lock taken with `FOR UPDATE SKIP LOCKED` plus the `status = 'queued'`
/// guard on the update means concurrent callers, in this process or another,
/// can never both receive the same job.
pub async fn claim_next_job(pool: &PgPool) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        r#"
        UPDATE listing_jobs
        SET status = 'running',
            progress_percent = 0,
            progress_message = 'Starting',
            started_at = NOW(),
            updated_at = NOW()
        WHERE id = (
            SELECT id
            FROM listing_jobs
            WHERE status = 'queued'
            ORDER BY created_at ASC
            LIMIT 1
            FOR UPDATE SKIP LOCKED
        )
          AND status = 'queued'
        RETURNING {JOB_COLUMNS}
        "#
    ))
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Get a job by ID
pub async fn get_job(pool: &PgPool, job_id: Uuid) -> Result<Option<Job>, sqlx::Error> {
    let row = sqlx::query(&format!(
        "SELECT {JOB_COLUMNS} FROM listing_jobs WHERE id = $1"
    ))
    .bind(job_id)
    .fetch_optional(pool)
    .await?;

    row.as_ref().map(job_from_row).transpose()
}

/// Record progress for a running job; the stored percent never decreases.
pub async fn update_progress(
    pool: &PgPool,
    job_id: Uuid,
    progress: &JobProgress,
) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        UPDATE listing_jobs
        SET progress_percent = GREATEST(progress_percent, $2),
            progress_message = $3,
            updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(i32::from(progress.percent))
    .bind(&progress.message)
    .execute(pool)
    .await?;

    Ok(())
}

/// Merge per-platform results into the stored mapping.
pub async fn merge_result(
    pool: &PgPool,
    job_id: Uuid,
    result: &JobResult,
) -> Result<(), sqlx::Error> {
    let result_json =
        serde_json::to_value(result).map_err(|e| sqlx::Error::Encode(Box::new(e)))?;

    sqlx::query(
        r#"
        UPDATE listing_jobs
        SET result = COALESCE(result, '{}'::jsonb) || $2,
            updated_at = NOW()
        WHERE id = $1
        "#,
    )
    .bind(job_id)
    .bind(result_json)
    .execute(pool)
    .await?;

    Ok(())
}

/// Move a running job to a terminal status.
///
/// Returns false when the job was not running, so only one terminal
/// transition can ever win.
pub async fn finish_job(
    pool: &PgPool,
    job_id: Uuid,
    status: JobStatus,
    error: Option<&str>,
) -> Result<bool, sqlx::Error> {
    let outcome = sqlx::query(
        r#"
        UPDATE listing_jobs
        SET status = $2,
            error = $3,
            progress_percent = 100,
            progress_message = CASE WHEN $2 = 'completed' THEN 'Completed' ELSE 'Failed' END,
            completed_at = NOW(),
            updated_at = NOW()
        WHERE id = $1 AND status = 'running'
        "#,
    )
    .bind(job_id)
    .bind(status.to_string())
    .bind(error)
    .execute(pool)
    .await?;

    Ok(outcome.rows_affected() == 1)
}
