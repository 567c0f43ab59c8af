//! Database operations for `responses` and `answers`.

use chrono::{DateTime, Utc};
use sqlx::PgPool;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `responses` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct ResponseRow {
    pub id: i64,
    pub flow_run_id: Option<i64>,
    pub pollrun_id: i64,
    pub contact_id: i64,
    pub created_on: DateTime<Utc>,
    pub updated_on: DateTime<Utc>,
    pub status: String,
    pub is_active: bool,
}

/// A row from the `answers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AnswerRow {
    pub id: i64,
    pub response_id: i64,
    pub question_id: i64,
    pub value: Option<String>,
    pub category: Option<String>,
    pub submitted_on: DateTime<Utc>,
}

const RESPONSE_COLUMNS: &str =
    "id, flow_run_id, pollrun_id, contact_id, created_on, updated_on, status, is_active";

// ---------------------------------------------------------------------------
// responses operations
// ---------------------------------------------------------------------------

/// Finds the response for an external flow run within an org, across all of
/// the org's pollruns. Ingestion's idempotency check starts here.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_response_by_run(
    pool: &PgPool,
    org_id: i64,
    flow_run_id: i64,
) -> Result<Option<ResponseRow>, DbError> {
    let row = sqlx::query_as::<_, ResponseRow>(
        "SELECT r.id, r.flow_run_id, r.pollrun_id, r.contact_id, \
                r.created_on, r.updated_on, r.status, r.is_active \
         FROM responses r \
         JOIN pollruns ON pollruns.id = r.pollrun_id \
         JOIN polls ON polls.id = pollruns.poll_id \
         WHERE polls.org_id = $1 AND r.flow_run_id = $2",
    )
    .bind(org_id)
    .bind(flow_run_id)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts a response.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_response(
    pool: &PgPool,
    flow_run_id: Option<i64>,
    pollrun_id: i64,
    contact_id: i64,
    created_on: DateTime<Utc>,
    updated_on: DateTime<Utc>,
    status: &str,
) -> Result<ResponseRow, DbError> {
    let row = sqlx::query_as::<_, ResponseRow>(&format!(
        "INSERT INTO responses \
             (flow_run_id, pollrun_id, contact_id, created_on, updated_on, status) \
         VALUES ($1, $2, $3, $4, $5, $6) \
         RETURNING {RESPONSE_COLUMNS}"
    ))
    .bind(flow_run_id)
    .bind(pollrun_id)
    .bind(contact_id)
    .bind(created_on)
    .bind(updated_on)
    .bind(status)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Updates a stale response in place after its answers were cleared.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn update_response(
    pool: &PgPool,
    id: i64,
    updated_on: DateTime<Utc>,
    status: &str,
) -> Result<(), DbError> {
    sqlx::query("UPDATE responses SET updated_on = $1, status = $2 WHERE id = $3")
        .bind(updated_on)
        .bind(status)
        .bind(id)
        .execute(pool)
        .await?;

    Ok(())
}

/// Deactivates all of a contact's responses for a pollrun. Called before a
/// restarted contact gets a fresh response, so at most one stays active.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn deactivate_contact_responses(
    pool: &PgPool,
    pollrun_id: i64,
    contact_id: i64,
) -> Result<u64, DbError> {
    let result =
        sqlx::query("UPDATE responses SET is_active = FALSE WHERE pollrun_id = $1 AND contact_id = $2")
            .bind(pollrun_id)
            .bind(contact_id)
            .execute(pool)
            .await?;

    Ok(result.rows_affected())
}

/// Returns active responses of active contacts for a pollrun, optionally
/// restricted to contacts whose region is in `region_scope`, optionally
/// excluding empty responses. Contacts in deactivated regions are always
/// excluded.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_responses_for_pollrun(
    pool: &PgPool,
    pollrun_id: i64,
    region_scope: Option<&[i64]>,
    include_empty: bool,
) -> Result<Vec<ResponseRow>, DbError> {
    let rows = sqlx::query_as::<_, ResponseRow>(
        "SELECT r.id, r.flow_run_id, r.pollrun_id, r.contact_id, \
                r.created_on, r.updated_on, r.status, r.is_active \
         FROM responses r \
         JOIN contacts c ON c.id = r.contact_id \
         JOIN regions ON regions.id = c.region_id \
         WHERE r.pollrun_id = $1 \
           AND r.is_active = TRUE \
           AND c.is_active = TRUE \
           AND regions.is_active = TRUE \
           AND ($2::bigint[] IS NULL OR c.region_id = ANY($2)) \
           AND ($3 OR r.status <> 'empty') \
         ORDER BY r.id",
    )
    .bind(pollrun_id)
    .bind(region_scope)
    .bind(include_empty)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Counts the pollrun's responses (same filters as
/// [`list_responses_for_pollrun`], empties included) grouped by status.
/// Absent statuses are simply missing from the result; the resolver
/// defaults them to zero.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn response_status_counts(
    pool: &PgPool,
    pollrun_id: i64,
    region_scope: Option<&[i64]>,
) -> Result<Vec<(String, i64)>, DbError> {
    let rows = sqlx::query_as::<_, (String, i64)>(
        "SELECT r.status, COUNT(*) \
         FROM responses r \
         JOIN contacts c ON c.id = r.contact_id \
         JOIN regions ON regions.id = c.region_id \
         WHERE r.pollrun_id = $1 \
           AND r.is_active = TRUE \
           AND c.is_active = TRUE \
           AND regions.is_active = TRUE \
           AND ($2::bigint[] IS NULL OR c.region_id = ANY($2)) \
         GROUP BY r.status",
    )
    .bind(pollrun_id)
    .bind(region_scope)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Latest `updated_on` across a poll's responses, the ingestion job's
/// incremental-fetch watermark. `None` for a poll with no responses yet.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn latest_updated_on_for_poll(
    pool: &PgPool,
    poll_id: i64,
) -> Result<Option<DateTime<Utc>>, DbError> {
    let row = sqlx::query_scalar::<_, Option<DateTime<Utc>>>(
        "SELECT MAX(r.updated_on) \
         FROM responses r \
         JOIN pollruns ON pollruns.id = r.pollrun_id \
         WHERE pollruns.poll_id = $1",
    )
    .bind(poll_id)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

// ---------------------------------------------------------------------------
// answers operations
// ---------------------------------------------------------------------------

/// Inserts one categorized answer.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn create_answer(
    pool: &PgPool,
    response_id: i64,
    question_id: i64,
    value: Option<&str>,
    category: Option<&str>,
    submitted_on: DateTime<Utc>,
) -> Result<AnswerRow, DbError> {
    let row = sqlx::query_as::<_, AnswerRow>(
        "INSERT INTO answers (response_id, question_id, value, category, submitted_on) \
         VALUES ($1, $2, $3, $4, $5) \
         RETURNING id, response_id, question_id, value, category, submitted_on",
    )
    .bind(response_id)
    .bind(question_id)
    .bind(value)
    .bind(category)
    .bind(submitted_on)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Deletes all answers of a response. Answers are fully replaced whenever a
/// stale response is re-ingested.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_answers_for_response(pool: &PgPool, response_id: i64) -> Result<u64, DbError> {
    let result = sqlx::query("DELETE FROM answers WHERE response_id = $1")
        .bind(response_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

/// Per-category answer counts for a question within a pollrun, restricted
/// to active responses and an optional contact-region scope. NULL
/// categories (uncategorized answers) are grouped together.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn category_counts(
    pool: &PgPool,
    pollrun_id: i64,
    question_id: i64,
    region_scope: Option<&[i64]>,
) -> Result<Vec<(Option<String>, i64)>, DbError> {
    let rows = sqlx::query_as::<_, (Option<String>, i64)>(
        "SELECT a.category, COUNT(*) \
         FROM answers a \
         JOIN responses r ON r.id = a.response_id \
         JOIN contacts c ON c.id = r.contact_id \
         WHERE r.pollrun_id = $1 \
           AND a.question_id = $2 \
           AND r.is_active = TRUE \
           AND c.is_active = TRUE \
           AND ($3::bigint[] IS NULL OR c.region_id = ANY($3)) \
         GROUP BY a.category \
         ORDER BY COUNT(*) DESC, a.category",
    )
    .bind(pollrun_id)
    .bind(question_id)
    .bind(region_scope)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Raw answer values for a question within a pollrun, for word-frequency
/// reporting over open-ended answers.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_answer_values(
    pool: &PgPool,
    pollrun_id: i64,
    question_id: i64,
    region_scope: Option<&[i64]>,
) -> Result<Vec<String>, DbError> {
    let rows = sqlx::query_scalar::<_, String>(
        "SELECT a.value \
         FROM answers a \
         JOIN responses r ON r.id = a.response_id \
         JOIN contacts c ON c.id = r.contact_id \
         WHERE r.pollrun_id = $1 \
           AND a.question_id = $2 \
           AND a.value IS NOT NULL \
           AND r.is_active = TRUE \
           AND c.is_active = TRUE \
           AND ($3::bigint[] IS NULL OR c.region_id = ANY($3))",
    )
    .bind(pollrun_id)
    .bind(question_id)
    .bind(region_scope)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
