//! Database operations for `trackers`, `group_rules`, `snapshots`,
//! `alerts`, `alert_rules`, and tracker occurrences.

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracpro_core::trackers::{ReportingPeriod, Thresholds};

use crate::DbError;

// ---------------------------------------------------------------------------
// Row types
// ---------------------------------------------------------------------------

/// A row from the `trackers` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct TrackerRow {
    pub id: i64,
    pub org_id: i64,
    pub region_id: i64,
    pub field_id: i64,
    pub reporting_period: String,
    pub minimum_group_threshold: Option<i64>,
    pub target_group_threshold: i64,
    pub maximum_group_threshold: Option<i64>,
    pub group_threshold_emails: String,
    pub minimum_contact_threshold: Option<i64>,
    pub target_contact_threshold: i64,
    pub maximum_contact_threshold: Option<i64>,
    pub contact_threshold_emails: String,
    pub emails: String,
}

impl TrackerRow {
    /// The tracker's threshold configuration as the core value type.
    #[must_use]
    pub fn thresholds(&self) -> Thresholds {
        Thresholds {
            minimum_group: self.minimum_group_threshold,
            target_group: self.target_group_threshold,
            maximum_group: self.maximum_group_threshold,
            minimum_contact: self.minimum_contact_threshold,
            target_contact: self.target_contact_threshold,
            maximum_contact: self.maximum_contact_threshold,
        }
    }

    /// Decodes the stored reporting period.
    ///
    /// # Errors
    ///
    /// Returns [`DbError::InvalidCode`] when the stored value is not a
    /// recognized period code.
    pub fn period(&self) -> Result<ReportingPeriod, DbError> {
        ReportingPeriod::from_code(&self.reporting_period).ok_or_else(|| DbError::InvalidCode {
            column: "trackers.reporting_period",
            kind: "reporting period",
            value: self.reporting_period.clone(),
        })
    }
}

/// A row from the `group_rules` table.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct GroupRuleRow {
    pub id: i64,
    pub tracker_id: i64,
    pub region_id: i64,
    pub action: String,
    pub condition: String,
    pub threshold: String,
}

/// A row from the `alert_rules` table, joined with its alert's org.
#[derive(Debug, Clone, sqlx::FromRow)]
pub struct AlertRuleRow {
    pub id: i64,
    pub alert_id: i64,
    pub poll_id: i64,
    pub region_id: i64,
    pub group_id: i64,
    pub action: String,
    pub last_executed: Option<DateTime<Utc>>,
}

const TRACKER_COLUMNS: &str = "id, org_id, region_id, field_id, reporting_period, \
     minimum_group_threshold, target_group_threshold, maximum_group_threshold, \
     group_threshold_emails, minimum_contact_threshold, target_contact_threshold, \
     maximum_contact_threshold, contact_threshold_emails, emails";

const ALERT_RULE_COLUMNS: &str =
    "ar.id, ar.alert_id, ar.poll_id, ar.region_id, ar.group_id, ar.action, ar.last_executed";

// ---------------------------------------------------------------------------
// trackers / group rules
// ---------------------------------------------------------------------------

/// Returns all trackers configured for an org.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_trackers_for_org(pool: &PgPool, org_id: i64) -> Result<Vec<TrackerRow>, DbError> {
    let rows = sqlx::query_as::<_, TrackerRow>(&format!(
        "SELECT {TRACKER_COLUMNS} FROM trackers WHERE org_id = $1 ORDER BY id"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns an org's trackers with the given reporting period, the
/// periodic report job's selection.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_trackers_for_period(
    pool: &PgPool,
    org_id: i64,
    period: ReportingPeriod,
) -> Result<Vec<TrackerRow>, DbError> {
    let rows = sqlx::query_as::<_, TrackerRow>(&format!(
        "SELECT {TRACKER_COLUMNS} FROM trackers \
         WHERE org_id = $1 AND reporting_period = $2 \
         ORDER BY id"
    ))
    .bind(org_id)
    .bind(period.code())
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns the group rules configured on a tracker.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_group_rules(pool: &PgPool, tracker_id: i64) -> Result<Vec<GroupRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, GroupRuleRow>(
        "SELECT id, tracker_id, region_id, action, condition, threshold \
         FROM group_rules \
         WHERE tracker_id = $1 \
         ORDER BY id",
    )
    .bind(tracker_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

// ---------------------------------------------------------------------------
// snapshots
// ---------------------------------------------------------------------------

/// Appends a snapshot of one contact-field value. Snapshots are append-only
/// and never deduplicated.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_snapshot(
    pool: &PgPool,
    contact_field_id: i64,
    value: i64,
) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO snapshots (contact_field_id, value) VALUES ($1, $2) RETURNING id",
    )
    .bind(contact_field_id)
    .bind(value)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Returns the snapshot values in a tracker's scope (its field, active
/// contacts of the given regions) as the core evaluation type.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn snapshot_values_for_tracker(
    pool: &PgPool,
    field_id: i64,
    region_ids: &[i64],
) -> Result<Vec<tracpro_core::trackers::SnapshotValue>, DbError> {
    let rows = sqlx::query_as::<_, (i64, i64, i64)>(
        "SELECT s.id, cf.contact_id, s.value \
         FROM snapshots s \
         JOIN contact_fields cf ON cf.id = s.contact_field_id \
         JOIN contacts c ON c.id = cf.contact_id \
         WHERE cf.field_id = $1 \
           AND c.is_active = TRUE \
           AND c.region_id = ANY($2) \
         ORDER BY s.id",
    )
    .bind(field_id)
    .bind(region_ids)
    .fetch_all(pool)
    .await?;

    Ok(rows
        .into_iter()
        .map(
            |(snapshot_id, contact_id, value)| tracpro_core::trackers::SnapshotValue {
                snapshot_id,
                contact_id,
                value,
            },
        )
        .collect())
}

// ---------------------------------------------------------------------------
// alerts / occurrences
// ---------------------------------------------------------------------------

/// Returns the alert rules in an org matching a (action, group) pair,
/// used for occurrence correlation during group-rule application.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn find_alert_rules_matching(
    pool: &PgPool,
    org_id: i64,
    action: &str,
    group_id: i64,
) -> Result<Vec<AlertRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, AlertRuleRow>(&format!(
        "SELECT {ALERT_RULE_COLUMNS} \
         FROM alert_rules ar \
         JOIN alerts ON alerts.id = ar.alert_id \
         WHERE alerts.org_id = $1 AND ar.action = $2 AND ar.group_id = $3 \
         ORDER BY ar.id"
    ))
    .bind(org_id)
    .bind(action)
    .bind(group_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Returns all alert rules belonging to an org.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn list_alert_rules_for_org(
    pool: &PgPool,
    org_id: i64,
) -> Result<Vec<AlertRuleRow>, DbError> {
    let rows = sqlx::query_as::<_, AlertRuleRow>(&format!(
        "SELECT {ALERT_RULE_COLUMNS} \
         FROM alert_rules ar \
         JOIN alerts ON alerts.id = ar.alert_id \
         WHERE alerts.org_id = $1 \
         ORDER BY ar.id"
    ))
    .bind(org_id)
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Records that a group rule fired for a contact.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn insert_occurrence(
    pool: &PgPool,
    tracker_id: i64,
    contact_id: i64,
) -> Result<i64, DbError> {
    let id = sqlx::query_scalar::<_, i64>(
        "INSERT INTO occurrences (tracker_id, contact_id) VALUES ($1, $2) RETURNING id",
    )
    .bind(tracker_id)
    .bind(contact_id)
    .fetch_one(pool)
    .await?;

    Ok(id)
}

/// Links an occurrence to one of the alert rules it satisfies.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the insert fails.
pub async fn link_occurrence_alert_rule(
    pool: &PgPool,
    occurrence_id: i64,
    alert_rule_id: i64,
) -> Result<(), DbError> {
    sqlx::query(
        "INSERT INTO occurrence_alert_rules (occurrence_id, alert_rule_id) VALUES ($1, $2) \
         ON CONFLICT DO NOTHING",
    )
    .bind(occurrence_id)
    .bind(alert_rule_id)
    .execute(pool)
    .await?;

    Ok(())
}

/// Counts occurrences linked to an alert rule within the half-open window
/// `(after, until]`. A `None` watermark means all occurrences up to `until`.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the query fails.
pub async fn occurrence_count_for_rule(
    pool: &PgPool,
    alert_rule_id: i64,
    after: Option<DateTime<Utc>>,
    until: DateTime<Utc>,
) -> Result<i64, DbError> {
    let count = sqlx::query_scalar::<_, i64>(
        "SELECT COUNT(*) \
         FROM occurrences o \
         JOIN occurrence_alert_rules oar ON oar.occurrence_id = o.id \
         WHERE oar.alert_rule_id = $1 \
           AND ($2::timestamptz IS NULL OR o.occurred_at > $2) \
           AND o.occurred_at <= $3",
    )
    .bind(alert_rule_id)
    .bind(after)
    .bind(until)
    .fetch_one(pool)
    .await?;

    Ok(count)
}

/// Advances an alert rule's incremental-scan watermark.
///
/// # Errors
///
/// Returns [`DbError::Sqlx`] if the update fails.
pub async fn set_alert_rule_last_executed(
    pool: &PgPool,
    alert_rule_id: i64,
    executed_at: DateTime<Utc>,
) -> Result<(), DbError> {
    sqlx::query("UPDATE alert_rules SET last_executed = $1 WHERE id = $2")
        .bind(executed_at)
        .bind(alert_rule_id)
        .execute(pool)
        .await?;

    Ok(())
}
