//! Postgres persistence for TracPro.
//!
//! One repository module per entity family, all using runtime-checked
//! `sqlx` queries against the schema in `<workspace-root>/migrations/`.

use std::time::Duration;

use sqlx::{postgres::PgPoolOptions, PgPool};
use thiserror::Error;
use uuid::Uuid;

const DEFAULT_MAX_CONNECTIONS: u32 = 10;
const DEFAULT_MIN_CONNECTIONS: u32 = 1;
const DEFAULT_ACQUIRE_TIMEOUT_SECS: u64 = 10;

// Path relative to crates/tracpro-db/Cargo.toml; resolves to <workspace-root>/migrations/
static MIGRATOR: sqlx::migrate::Migrator = sqlx::migrate!("../../migrations");

#[derive(Debug, Clone, Copy)]
pub struct PoolConfig {
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout_secs: u64,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            max_connections: DEFAULT_MAX_CONNECTIONS,
            min_connections: DEFAULT_MIN_CONNECTIONS,
            acquire_timeout_secs: DEFAULT_ACQUIRE_TIMEOUT_SECS,
        }
    }
}

impl PoolConfig {
    #[must_use]
    pub fn from_app_config(config: &tracpro_core::AppConfig) -> Self {
        Self {
            max_connections: config.db_max_connections,
            min_connections: config.db_min_connections,
            acquire_timeout_secs: config.db_acquire_timeout_secs,
        }
    }
}

#[derive(Debug, Error)]
pub enum DbError {
    #[error("record not found")]
    NotFound,
    #[error("no poll matching flow UUIDs: {0:?}")]
    UnknownFlowUuids(Vec<Uuid>),
    #[error("stored value for {column} is not a recognized {kind} code: {value}")]
    InvalidCode {
        column: &'static str,
        kind: &'static str,
        value: String,
    },
    #[error(transparent)]
    Sqlx(#[from] sqlx::Error),
    #[error(transparent)]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Connect to a Postgres pool using explicit URL and config.
///
/// # Errors
///
/// Returns [`sqlx::Error`] if the connection cannot be established.
pub async fn connect_pool(database_url: &str, config: PoolConfig) -> Result<PgPool, sqlx::Error> {
    PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(Duration::from_secs(config.acquire_timeout_secs))
        .connect(database_url)
        .await
}

/// Run all pending migrations against the pool.
///
/// # Errors
///
/// Returns [`sqlx::migrate::MigrateError`] if any migration fails.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    MIGRATOR.run(pool).await
}

pub mod contacts;
pub mod polls;
pub mod pollruns;
pub mod responses;
pub mod trackers;

pub use contacts::{
    add_contact_to_group, contact_fields_for, contact_group_uuids, contacts_in_group,
    create_contact, get_contact, get_contact_by_uuid, get_data_field, get_group_by_uuid, get_org,
    get_region, get_region_by_uuid, list_orgs, region_edges, remove_contact_from_group,
    reset_contact_fields,
    ContactFieldRow, ContactRow, GroupRow, OrgRow, RegionRow,
};
pub use polls::{
    deactivate_polls_not_in, delete_questions_not_in, get_active_poll_by_flow, get_poll,
    get_poll_by_flow, get_question, list_active_polls, list_active_questions, set_active_for_org,
    upsert_poll, upsert_question, PollRow, QuestionRow,
};
pub use pollruns::{
    create_pollrun, find_universal_on_day, get_pollrun, list_by_dates, list_newer_for_poll,
    PollRunRow,
};
pub use responses::{
    category_counts, create_answer, create_response, deactivate_contact_responses,
    delete_answers_for_response, find_response_by_run, latest_updated_on_for_poll,
    list_answer_values, list_responses_for_pollrun, response_status_counts, update_response,
    AnswerRow, ResponseRow,
};
pub use trackers::{
    find_alert_rules_matching, insert_occurrence, insert_snapshot, link_occurrence_alert_rule,
    list_alert_rules_for_org, list_group_rules, list_trackers_for_org, list_trackers_for_period,
    occurrence_count_for_rule, set_alert_rule_last_executed, snapshot_values_for_tracker,
    AlertRuleRow, GroupRuleRow, TrackerRow,
};

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pool_config_has_sane_defaults() {
        let config = PoolConfig::default();

        assert_eq!(config.max_connections, DEFAULT_MAX_CONNECTIONS);
        assert_eq!(config.min_connections, DEFAULT_MIN_CONNECTIONS);
        assert_eq!(config.acquire_timeout_secs, DEFAULT_ACQUIRE_TIMEOUT_SECS);
    }
}
