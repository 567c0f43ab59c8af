//! Database operations for `pollruns`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

/// A row from the `pollruns` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollRunRow {
    pub id: i64,
    pub poll_id: i64,
    pub region_id: Option<i64>,
    pub pollrun_type: String,
    pub conducted_on: DateTime<Utc>,
    pub created_by: Option<String>,
}

const POLLRUN_COLUMNS: &str = "id, poll_id, region_id, pollrun_type, conducted_on, created_by";

/// Inserts a pollrun. Region/type consistency is enforced both by the
/// engine (org-match validation) and the table's check constraint.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_pollrun(
    pool: &PgPool,
    poll_id: i64,
    region_id: Option<i64>,
    pollrun_type: &str,
    conducted_on: DateTime<Utc>,
    created_by: Option<&str>,
) -> Result<PollRunRow, DbError> {
    let row = sqlx::query_as::<_, PollRunRow>(&format!(
        "INSERT INTO pollruns (poll_id, region_id, pollrun_type, conducted_on, created_by) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING {POLLRUN_COLUMNS}"
    ))
    .bind(poll_id)
    .bind(region_id)
    .bind(pollrun_type)
    .bind(conducted_on)
    .bind(created_by)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a pollrun by id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_pollrun(pool: &PgPool, id: i64) -> Result<PollRunRow, DbError> {
    sqlx::query_as::<_, PollRunRow>(&format!(
        "SELECT {POLLRUN_COLUMNS} FROM pollruns WHERE id = $1"
    ))
    .bind(id)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Finds a region-less pollrun for the poll conducted within the UTC
/// half-open window `[day_start, day_end)`, the org-local calendar day
/// computed by the caller. Used for universal pollrun dedup.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_universal_on_day(
    pool: &PgPool,
    poll_id: i64,
    day_start: DateTime<Utc>,
    day_end: DateTime<Utc>,
) -> Result<Option<PollRunRow>, DbError> {
    let row = sqlx::query_as::<_, PollRunRow>(&format!(
        "SELECT {POLLRUN_COLUMNS} FROM pollruns \
         WHERE poll_id = $1 AND region_id IS NULL \
           AND conducted_on >= $2 AND conducted_on < $3 \
         ORDER BY id \
         LIMIT 1"
    ))
    .bind(poll_id)
    .bind(day_start)
    .bind(day_end)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Returns pollruns of the same poll conducted strictly after `after`.
/// The "last pollrun for region" check filters these by region coverage
/// in memory.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_newer_for_poll(
    pool: &PgPool,
    poll_id: i64,
    after: DateTime<Utc>,
) -> Result<Vec<PollRunRow>, DbError> {
    let rows = sqlx::query_as::<_, PollRunRow>(&format!(
        "SELECT {POLLRUN_COLUMNS} FROM pollruns \
         WHERE poll_id = $1 AND conducted_on > $2"
    ))
    .bind(poll_id)
    .bind(after)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns an org's pollruns for active polls within an optional
/// conducted-on range (`start` inclusive, `end` exclusive).
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_by_dates(
    pool: &PgPool,
    org_id: i64,
    start: Option<DateTime<Utc>>,
    end: Option<DateTime<Utc>>,
) -> Result<Vec<PollRunRow>, DbError> {
    let rows = sqlx::query_as::<_, PollRunRow>(
        "SELECT p.id, p.poll_id, p.region_id, p.pollrun_type, p.conducted_on, p.created_by \
         FROM pollruns p \
         JOIN polls ON polls.id = p.poll_id \
         WHERE polls.org_id = $1 AND polls.is_active = TRUE \
           AND ($2::timestamptz IS NULL OR p.conducted_on >= $2) \
           AND ($3::timestamptz IS NULL OR p.conducted_on < $3) \
         ORDER BY p.conducted_on DESC, p.id DESC",
    )
    .bind(org_id)
    .bind(start)
    .bind(end)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
