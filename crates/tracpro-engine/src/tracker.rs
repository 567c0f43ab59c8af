//! Tracker evaluation: snapshots, group rules, threshold notifications,
//! periodic reports, and field resets.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use sqlx::PgPool;
use tracpro_core::regions::RegionTree;
use tracpro_core::trackers::{
    over_group_maximum, recipients, snapshots_below_or_at_minimum, snapshots_over_or_at_maximum,
    total_group_sum, under_group_minimum, ReportingPeriod, RuleAction, RuleCondition,
    SnapshotValue, ThresholdSelector, Thresholds,
};
use tracpro_db::contacts::OrgRow;
use tracpro_db::trackers::{AlertRuleRow, GroupRuleRow, TrackerRow};
use tracpro_rapidpro::types::ContactUpdate;
use tracpro_rapidpro::RapidProClient;

use crate::error::EngineError;
use crate::notify::Notifier;

/// Evaluates trackers: captures snapshots, applies group rules, sends
/// threshold and report notifications, and resets fields at period
/// boundaries.
pub struct TrackerRuleEngine {
    pool: PgPool,
    client: Arc<RapidProClient>,
    notifier: Arc<dyn Notifier>,
}

impl TrackerRuleEngine {
    #[must_use]
    pub fn new(pool: PgPool, client: Arc<RapidProClient>, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            pool,
            client,
            notifier,
        }
    }

    /// Region ids under the tracker's scope: its region and every
    /// descendant.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure.
    pub async fn scope_regions(&self, tracker: &TrackerRow) -> Result<Vec<i64>, EngineError> {
        let edges = tracpro_db::contacts::region_edges(&self.pool, tracker.org_id).await?;
        let tree = RegionTree::from_edges(edges);
        Ok(tree.descendants_inclusive(tracker.region_id))
    }

    /// Captures a snapshot of every contact-field value under the tracker's
    /// region. Append-only; a second call on unchanged data writes new rows.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failure.
    pub async fn create_snapshots(&self, tracker: &TrackerRow) -> Result<usize, EngineError> {
        let regions = self.scope_regions(tracker).await?;
        let fields =
            tracpro_db::contacts::contact_fields_for(&self.pool, tracker.field_id, &regions)
                .await?;
        for field in &fields {
            tracpro_db::trackers::insert_snapshot(&self.pool, field.id, field.value).await?;
        }
        tracing::info!(tracker = tracker.id, snapshots = fields.len(), "snapshots captured");
        Ok(fields.len())
    }

    /// Applies the tracker's group rules over its current snapshots and
    /// returns the ids of contacts whose group membership changed.
    ///
    /// For each rule, snapshots whose value satisfies the rule's condition
    /// against the resolved threshold trigger the add/remove action on the
    /// rule's region group. An occurrence is recorded per triggering
    /// contact only when at least one alert rule matches the (org, action,
    /// group) tuple; the occurrence links to every matching alert rule.
    /// Modified contacts are pushed back to RapidPro; push failures are
    /// logged per contact and never abort the batch.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCode`] for unrecognized stored rule
    /// codes and [`EngineError::Db`] on store failure.
    pub async fn apply_group_rules(
        &self,
        org: &OrgRow,
        tracker: &TrackerRow,
    ) -> Result<BTreeSet<i64>, EngineError> {
        let regions = self.scope_regions(tracker).await?;
        let snapshots = tracpro_db::trackers::snapshot_values_for_tracker(
            &self.pool,
            tracker.field_id,
            &regions,
        )
        .await?;
        let thresholds = tracker.thresholds();
        let rules = tracpro_db::trackers::list_group_rules(&self.pool, tracker.id).await?;

        let mut modified = BTreeSet::new();
        for rule in &rules {
            let (action, condition, selector) = decode_rule(rule)?;
            let Some(threshold) = thresholds.resolve(selector) else {
                tracing::warn!(
                    rule = rule.id,
                    selector = selector.code(),
                    "group rule references an unset threshold, skipping"
                );
                continue;
            };

            // The rule's region doubles as its RapidPro contact group.
            let region = tracpro_db::contacts::get_region(&self.pool, rule.region_id).await?;
            let group =
                tracpro_db::contacts::get_group_by_uuid(&self.pool, org.id, region.uuid).await?;
            let alert_rules = tracpro_db::trackers::find_alert_rules_matching(
                &self.pool,
                org.id,
                action.code(),
                group.id,
            )
            .await?;

            for snapshot in matching_snapshots(&snapshots, condition, threshold) {
                match action {
                    RuleAction::Add => {
                        tracpro_db::contacts::add_contact_to_group(
                            &self.pool,
                            snapshot.contact_id,
                            group.id,
                        )
                        .await?;
                    }
                    RuleAction::Remove => {
                        tracpro_db::contacts::remove_contact_from_group(
                            &self.pool,
                            snapshot.contact_id,
                            group.id,
                        )
                        .await?;
                    }
                }
                modified.insert(snapshot.contact_id);

                if let Some(links) = occurrence_links(&alert_rules) {
                    let occurrence = tracpro_db::trackers::insert_occurrence(
                        &self.pool,
                        tracker.id,
                        snapshot.contact_id,
                    )
                    .await?;
                    for alert_rule_id in links {
                        tracpro_db::trackers::link_occurrence_alert_rule(
                            &self.pool,
                            occurrence,
                            alert_rule_id,
                        )
                        .await?;
                    }
                }
            }
        }

        let values: HashMap<i64, i64> =
            snapshots.iter().map(|s| (s.contact_id, s.value)).collect();
        for &contact_id in &modified {
            let value = values.get(&contact_id).copied().unwrap_or_default();
            self.push_contact(tracker, contact_id, value).await;
        }

        tracing::info!(
            tracker = tracker.id,
            rules = rules.len(),
            modified = modified.len(),
            "group rules applied"
        );
        Ok(modified)
    }

    /// Sends threshold-breach messages: one per snapshot at or beyond a
    /// contact threshold, plus a group message when the group sum breaches
    /// a group threshold. Delivery failures are logged and swallowed.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure.
    pub async fn send_threshold_notifications(
        &self,
        tracker: &TrackerRow,
    ) -> Result<(), EngineError> {
        let regions = self.scope_regions(tracker).await?;
        let snapshots = tracpro_db::trackers::snapshot_values_for_tracker(
            &self.pool,
            tracker.field_id,
            &regions,
        )
        .await?;
        let thresholds = tracker.thresholds();
        let (_, _, field_label) =
            tracpro_db::contacts::get_data_field(&self.pool, tracker.field_id).await?;

        let contact_recipients = recipients(&tracker.contact_threshold_emails);
        if !contact_recipients.is_empty() {
            for snapshot in snapshots_below_or_at_minimum(&snapshots, &thresholds) {
                let contact =
                    tracpro_db::contacts::get_contact(&self.pool, snapshot.contact_id).await?;
                self.notify(
                    &contact_recipients,
                    &format!("{field_label}: contact below minimum"),
                    &format!(
                        "Contact {} reported {} for {field_label}, at or below the minimum of {}.",
                        contact.name,
                        snapshot.value,
                        thresholds.minimum_contact.unwrap_or_default()
                    ),
                );
            }
            for snapshot in snapshots_over_or_at_maximum(&snapshots, &thresholds) {
                let contact =
                    tracpro_db::contacts::get_contact(&self.pool, snapshot.contact_id).await?;
                self.notify(
                    &contact_recipients,
                    &format!("{field_label}: contact over maximum"),
                    &format!(
                        "Contact {} reported {} for {field_label}, at or above the maximum of {}.",
                        contact.name,
                        snapshot.value,
                        thresholds.maximum_contact.unwrap_or_default()
                    ),
                );
            }
        }

        let group_recipients = recipients(&tracker.group_threshold_emails);
        if !group_recipients.is_empty() {
            let sum = total_group_sum(&snapshots);
            if under_group_minimum(sum, &thresholds) {
                self.notify(
                    &group_recipients,
                    &format!("{field_label}: group below minimum"),
                    &format!(
                        "Group total {sum} for {field_label} is at or below the minimum of {}.",
                        thresholds.minimum_group.unwrap_or_default()
                    ),
                );
            }
            if over_group_maximum(sum, &thresholds) {
                self.notify(
                    &group_recipients,
                    &format!("{field_label}: group over maximum"),
                    &format!(
                        "Group total {sum} for {field_label} is at or above the maximum of {}.",
                        thresholds.maximum_group.unwrap_or_default()
                    ),
                );
            }
        }

        Ok(())
    }

    /// Runs the periodic cycle for every tracker of the org whose reporting
    /// period matches: send the report, then reset fields and push the
    /// zeroed values back to RapidPro. Failures are isolated per tracker.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] if the tracker listing itself fails.
    pub async fn run_period(
        &self,
        org: &OrgRow,
        period: ReportingPeriod,
    ) -> Result<usize, EngineError> {
        let trackers =
            tracpro_db::trackers::list_trackers_for_period(&self.pool, org.id, period).await?;
        let mut completed = 0;
        for tracker in &trackers {
            if let Err(e) = self.send_period_report(tracker).await {
                tracing::error!(tracker = tracker.id, error = %e, "period report failed");
                continue;
            }
            completed += 1;
        }
        Ok(completed)
    }

    /// Sends one tracker's periodic report and resets its contact fields,
    /// pushing zeroed values to RapidPro (push failures logged per
    /// contact).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query or reset failure.
    pub async fn send_period_report(&self, tracker: &TrackerRow) -> Result<(), EngineError> {
        let regions = self.scope_regions(tracker).await?;
        let snapshots = tracpro_db::trackers::snapshot_values_for_tracker(
            &self.pool,
            tracker.field_id,
            &regions,
        )
        .await?;
        let (_, _, field_label) =
            tracpro_db::contacts::get_data_field(&self.pool, tracker.field_id).await?;
        let period = tracker.period()?;

        let report_recipients = recipients(&tracker.emails);
        if !report_recipients.is_empty() {
            self.notify(
                &report_recipients,
                &format!("{} report: {field_label}", period.label()),
                &report_body(&field_label, &snapshots, &tracker.thresholds()),
            );
        }

        let reset = tracpro_db::contacts::reset_contact_fields(
            &self.pool,
            tracker.field_id,
            &regions,
        )
        .await?;
        for contact_id in reset {
            self.push_contact(tracker, contact_id, 0).await;
        }
        Ok(())
    }

    /// Pushes one contact's current state (including the tracked field's
    /// value) to RapidPro. Failures are logged, never propagated.
    async fn push_contact(&self, tracker: &TrackerRow, contact_id: i64, value: i64) {
        if let Err(e) = self.try_push_contact(tracker, contact_id, value).await {
            tracing::warn!(contact = contact_id, error = %e, "contact push-back failed");
        }
    }

    async fn try_push_contact(
        &self,
        tracker: &TrackerRow,
        contact_id: i64,
        value: i64,
    ) -> Result<(), EngineError> {
        let contact = tracpro_db::contacts::get_contact(&self.pool, contact_id).await?;
        let group_uuids =
            tracpro_db::contacts::contact_group_uuids(&self.pool, contact_id).await?;
        let (_, field_key, _) =
            tracpro_db::contacts::get_data_field(&self.pool, tracker.field_id).await?;

        let update = ContactUpdate {
            uuid: contact.uuid,
            name: contact.name,
            urns: vec![contact.urn],
            fields: HashMap::from([(field_key, value.to_string())]),
            group_uuids,
        };
        self.client.update_contact(&update).await?;
        Ok(())
    }

    fn notify(&self, recipients: &[String], subject: &str, body: &str) {
        if let Err(e) = self.notifier.send(recipients, subject, body) {
            tracing::warn!(subject, error = %e, "notification send failed");
        }
    }
}

/// The alert-rule ids a triggering snapshot's occurrence should link to.
/// No matching alert rules means no occurrence is recorded at all; any
/// matches mean exactly one occurrence, linked to every matching rule.
fn occurrence_links(alert_rules: &[AlertRuleRow]) -> Option<Vec<i64>> {
    if alert_rules.is_empty() {
        None
    } else {
        Some(alert_rules.iter().map(|r| r.id).collect())
    }
}

/// Snapshots whose value satisfies `condition` against `threshold`.
fn matching_snapshots(
    snapshots: &[SnapshotValue],
    condition: RuleCondition,
    threshold: i64,
) -> Vec<&SnapshotValue> {
    snapshots
        .iter()
        .filter(|s| condition.matches(s.value, threshold))
        .collect()
}

fn decode_rule(
    rule: &GroupRuleRow,
) -> Result<(RuleAction, RuleCondition, ThresholdSelector), EngineError> {
    let action = RuleAction::from_code(&rule.action).ok_or_else(|| EngineError::InvalidCode {
        kind: "group rule action",
        value: rule.action.clone(),
    })?;
    let condition =
        RuleCondition::from_code(&rule.condition).ok_or_else(|| EngineError::InvalidCode {
            kind: "group rule condition",
            value: rule.condition.clone(),
        })?;
    let selector =
        ThresholdSelector::from_code(&rule.threshold).ok_or_else(|| EngineError::InvalidCode {
            kind: "threshold selector",
            value: rule.threshold.clone(),
        })?;
    Ok((action, condition, selector))
}

fn report_body(field_label: &str, snapshots: &[SnapshotValue], thresholds: &Thresholds) -> String {
    let sum = total_group_sum(snapshots);
    let low = snapshots_below_or_at_minimum(snapshots, thresholds).len();
    let high = snapshots_over_or_at_maximum(snapshots, thresholds).len();
    format!(
        "{field_label}: {} snapshots, group total {sum} (target {}). \
         {low} contacts at or below minimum, {high} at or above maximum.",
        snapshots.len(),
        thresholds.target_group
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snapshot(contact_id: i64, value: i64) -> SnapshotValue {
        SnapshotValue {
            snapshot_id: contact_id,
            contact_id,
            value,
        }
    }

    #[test]
    fn matching_snapshots_applies_strict_conditions() {
        let snapshots = vec![snapshot(1, 5), snapshot(2, 10), snapshot(3, 15)];
        let over = matching_snapshots(&snapshots, RuleCondition::Greater, 10);
        assert_eq!(over.len(), 1);
        assert_eq!(over[0].contact_id, 3);
        let under = matching_snapshots(&snapshots, RuleCondition::Less, 10);
        assert_eq!(under.len(), 1);
        assert_eq!(under[0].contact_id, 1);
    }

    fn alert_rule(id: i64) -> AlertRuleRow {
        AlertRuleRow {
            id,
            alert_id: 1,
            poll_id: 1,
            region_id: 1,
            group_id: 1,
            action: "add".to_string(),
            last_executed: None,
        }
    }

    #[test]
    fn no_matching_alert_rules_records_no_occurrence() {
        assert_eq!(occurrence_links(&[]), None);
    }

    #[test]
    fn one_occurrence_links_to_every_matching_alert_rule() {
        let rules = vec![alert_rule(7), alert_rule(9), alert_rule(11)];
        assert_eq!(occurrence_links(&rules), Some(vec![7, 9, 11]));
    }

    #[test]
    fn decode_rule_rejects_unknown_codes() {
        let rule = GroupRuleRow {
            id: 1,
            tracker_id: 1,
            region_id: 1,
            action: "add".to_string(),
            condition: "greater".to_string(),
            threshold: "contact_median".to_string(),
        };
        assert!(matches!(
            decode_rule(&rule),
            Err(EngineError::InvalidCode {
                kind: "threshold selector",
                ..
            })
        ));
    }

    #[test]
    fn report_body_summarizes_the_scenario() {
        let thresholds = Thresholds {
            minimum_group: Some(20),
            target_group: 40,
            maximum_group: Some(45),
            minimum_contact: Some(10),
            target_contact: 20,
            maximum_contact: Some(30),
        };
        let snapshots = vec![snapshot(1, 5), snapshot(2, 40)];
        let body = report_body("water level", &snapshots, &thresholds);
        assert!(body.contains("group total 45"));
        assert!(body.contains("1 contacts at or below minimum"));
        assert!(body.contains("1 at or above maximum"));
    }
}
