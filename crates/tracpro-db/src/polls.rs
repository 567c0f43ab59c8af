//! Database operations for `polls` and `questions`.

use sqlx::PgPool;
use uuid::Uuid;

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `polls` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct PollRow {
    pub id: i64,
    pub org_id: i64,
    pub flow_uuid: Uuid,
    pub rapidpro_name: String,
    pub name: String,
    pub is_active: bool,
}

/// A row from the `questions` table. `rules` holds the ordered rule list as
/// the JSON produced by `tracpro_core::rules`.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct QuestionRow {
    pub id: i64,
    pub poll_id: i64,
    pub ruleset_uuid: Uuid,
    pub rapidpro_name: String,
    pub name: String,
    pub question_type: String,
    pub question_order: i32,
    pub is_active: bool,
    pub rules: serde_json::Value,
}

const POLL_COLUMNS: &str = "id, org_id, flow_uuid, rapidpro_name, name, is_active";
const QUESTION_COLUMNS: &str = "id, poll_id, ruleset_uuid, rapidpro_name, name, question_type, \
                                question_order, is_active, rules";

// ---------------------------------------------------------------------------
// polls operations
// ---------------------------------------------------------------------------

/// Inserts or updates a poll from synced flow data.
///
/// Conflicts on `(org_id, flow_uuid)` update both name columns and
/// re-activate nothing; `is_active` is only ever flipped through
/// [`set_active_for_org`] or [`deactivate_polls_not_in`]. The caller is
/// responsible for applying name tracking before passing `name`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
pub async fn upsert_poll(
    pool: &PgPool,
    org_id: i64,
    flow_uuid: Uuid,
    name: &str,
    rapidpro_name: &str,
) -> Result<PollRow, DbError> {
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "INSERT INTO polls (org_id, flow_uuid, name, rapidpro_name) \
         VALUES ($1, $2, $3, $4) \
         ON CONFLICT (org_id, flow_uuid) DO UPDATE SET \
             name          = EXCLUDED.name, \
             rapidpro_name = EXCLUDED.rapidpro_name \
         RETURNING {POLL_COLUMNS}"
    ))
    .bind(org_id)
    .bind(flow_uuid)
    .bind(name)
    .bind(rapidpro_name)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Fetches a poll by internal id.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] if no row exists, or [`DbError::Sqlx`] if
/// the query fails.
pub async fn get_poll(pool: &PgPool, id: i64) -> Result<PollRow, DbError> {
    sqlx::query_as::<_, PollRow>(&format!("SELECT {POLL_COLUMNS} FROM polls WHERE id = $1"))
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or(DbError::NotFound)
}

/// Fetches a poll by flow UUID within an org, active or not.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_poll_by_flow(
    pool: &PgPool,
    org_id: i64,
    flow_uuid: Uuid,
) -> Result<Option<PollRow>, DbError> {
    let row = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls WHERE org_id = $1 AND flow_uuid = $2"
    ))
    .bind(org_id)
    .bind(flow_uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Fetches the active poll for a flow UUID within an org.
///
/// # Errors
///
/// Returns [`DbError::NotFound`] when no active poll matches; ingestion
/// surfaces this as "run for an untracked flow".
pub async fn get_active_poll_by_flow(
    pool: &PgPool,
    org_id: i64,
    flow_uuid: Uuid,
) -> Result<PollRow, DbError> {
    sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls \
         WHERE org_id = $1 AND flow_uuid = $2 AND is_active = TRUE"
    ))
    .bind(org_id)
    .bind(flow_uuid)
    .fetch_optional(pool)
    .await?
    .ok_or(DbError::NotFound)
}

/// Returns all active polls for an org.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_polls(pool: &PgPool, org_id: i64) -> Result<Vec<PollRow>, DbError> {
    let rows = sqlx::query_as::<_, PollRow>(&format!(
        "SELECT {POLL_COLUMNS} FROM polls \
         WHERE org_id = $1 AND is_active = TRUE \
         ORDER BY name"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Deactivates polls for an org whose flow UUID is not in `flow_uuids`.
///
/// Polls disappearing upstream are never deleted, so re-selecting the flow
/// later re-attaches its historical data.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn deactivate_polls_not_in(
    pool: &PgPool,
    org_id: i64,
    flow_uuids: &[Uuid],
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "UPDATE polls SET is_active = FALSE \
         WHERE org_id = $1 AND is_active = TRUE AND flow_uuid <> ALL($2)",
    )
    .bind(org_id)
    .bind(flow_uuids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Atomically marks exactly the given flow UUIDs' polls active and all
/// other polls of the org inactive.
///
/// # Errors
///
/// Returns [`DbError::UnknownFlowUuids`] with the unmatched UUIDs if any of
/// them has no poll in this org; the transaction is rolled back and no
/// partial flip is committed.
pub async fn set_active_for_org(
    pool: &PgPool,
    org_id: i64,
    flow_uuids: &[Uuid],
) -> Result<(), DbError> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        "UPDATE polls SET is_active = TRUE \
         WHERE org_id = $1 AND flow_uuid = ANY($2)",
    )
    .bind(org_id)
    .bind(flow_uuids)
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() != flow_uuids.len() as u64 {
        let known: Vec<Uuid> =
            sqlx::query_scalar::<_, Uuid>("SELECT flow_uuid FROM polls WHERE org_id = $1")
                .bind(org_id)
                .fetch_all(&mut *tx)
                .await?;
        let invalid: Vec<Uuid> = flow_uuids
            .iter()
            .filter(|u| !known.contains(u))
            .copied()
            .collect();
        tx.rollback().await?;
        return Err(DbError::UnknownFlowUuids(invalid));
    }

    sqlx::query(
        "UPDATE polls SET is_active = FALSE \
         WHERE org_id = $1 AND flow_uuid <> ALL($2)",
    )
    .bind(org_id)
    .bind(flow_uuids)
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(())
}

// ---------------------------------------------------------------------------
// questions operations
// ---------------------------------------------------------------------------

/// Fetches one question by ruleset UUID within a poll.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn get_question(
    pool: &PgPool,
    poll_id: i64,
    ruleset_uuid: Uuid,
) -> Result<Option<QuestionRow>, DbError> {
    let row = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions \
         WHERE poll_id = $1 AND ruleset_uuid = $2"
    ))
    .bind(poll_id)
    .bind(ruleset_uuid)
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Inserts or updates a question from synced ruleset data.
///
/// Conflicts on `(ruleset_uuid, poll_id)` update names, order, and rules,
/// but deliberately leave `question_type` untouched: the type is inferred
/// once at creation and user corrections must survive re-syncs.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the upsert fails.
#[allow(clippy::too_many_arguments)]
pub async fn upsert_question(
    pool: &PgPool,
    poll_id: i64,
    ruleset_uuid: Uuid,
    name: &str,
    rapidpro_name: &str,
    question_type: &str,
    question_order: i32,
    rules: &serde_json::Value,
) -> Result<QuestionRow, DbError> {
    let row = sqlx::query_as::<_, QuestionRow>(&format!(
        "INSERT INTO questions \
             (poll_id, ruleset_uuid, name, rapidpro_name, question_type, question_order, rules) \
         VALUES ($1, $2, $3, $4, $5, $6, $7) \
         ON CONFLICT (ruleset_uuid, poll_id) DO UPDATE SET \
             name           = EXCLUDED.name, \
             rapidpro_name  = EXCLUDED.rapidpro_name, \
             question_order = EXCLUDED.question_order, \
             rules          = EXCLUDED.rules \
         RETURNING {QUESTION_COLUMNS}"
    ))
    .bind(poll_id)
    .bind(ruleset_uuid)
    .bind(name)
    .bind(rapidpro_name)
    .bind(question_type)
    .bind(question_order)
    .bind(rules)
    .fetch_one(pool)
    .await?;

    Ok(row)
}

/// Deletes questions of a poll whose ruleset UUID no longer exists upstream.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the delete fails.
pub async fn delete_questions_not_in(
    pool: &PgPool,
    poll_id: i64,
    ruleset_uuids: &[Uuid],
) -> Result<u64, DbError> {
    let result = sqlx::query(
        "DELETE FROM questions \
         WHERE poll_id = $1 AND ruleset_uuid <> ALL($2)",
    )
    .bind(poll_id)
    .bind(ruleset_uuids)
    .execute(pool)
    .await?;

    Ok(result.rows_affected())
}

/// Returns the active questions of a poll in display order.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_active_questions(
    pool: &PgPool,
    poll_id: i64,
) -> Result<Vec<QuestionRow>, DbError> {
    let rows = sqlx::query_as::<_, QuestionRow>(&format!(
        "SELECT {QUESTION_COLUMNS} FROM questions \
         WHERE poll_id = $1 AND is_active = TRUE \
         ORDER BY question_order"
    ))
    .bind(poll_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}
