//! Poll and question reconciliation against RapidPro flow definitions.

use std::sync::Arc;

use sqlx::PgPool;
use tracpro_core::polls::track_rename;
use tracpro_core::rules::{infer_question_type, Rule};
use tracpro_db::contacts::OrgRow;
use tracpro_rapidpro::types::FlowRule;
use tracpro_rapidpro::RapidProClient;
use uuid::Uuid;

use crate::error::EngineError;

/// What one sync pass did, for logging and CLI output.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncOutcome {
    pub polls_synced: usize,
    pub polls_deactivated: u64,
    pub questions_synced: usize,
    pub questions_deleted: u64,
}

/// Reconciles the org's polls and questions against the flows RapidPro
/// currently reports.
pub struct PollSyncEngine {
    pool: PgPool,
    client: Arc<RapidProClient>,
}

impl PollSyncEngine {
    #[must_use]
    pub fn new(pool: PgPool, client: Arc<RapidProClient>) -> Self {
        Self { pool, client }
    }

    /// Syncs one org: fetches its non-archived flows, deactivates polls
    /// whose flow disappeared upstream, upserts the rest with name tracking
    /// applied, and reconciles each poll's questions against the flow
    /// definition's rulesets.
    ///
    /// Idempotent given stable upstream state: a second pass with unchanged
    /// flows rewrites identical rows.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::RapidPro`] on fetch failure and
    /// [`EngineError::Db`] on store failure. The caller isolates failures
    /// per org.
    pub async fn sync(&self, org: &OrgRow) -> Result<SyncOutcome, EngineError> {
        let flows = self.client.get_flows(Some(false)).await?;
        let flow_uuids: Vec<Uuid> = flows.iter().map(|f| f.uuid).collect();

        let mut outcome = SyncOutcome {
            polls_deactivated: tracpro_db::polls::deactivate_polls_not_in(
                &self.pool, org.id, &flow_uuids,
            )
            .await?,
            ..SyncOutcome::default()
        };

        for flow in &flows {
            let existing = tracpro_db::polls::get_poll_by_flow(&self.pool, org.id, flow.uuid).await?;
            let name = match &existing {
                Some(poll) => track_rename(&poll.name, &poll.rapidpro_name, &flow.name),
                None => flow.name.clone(),
            };
            let poll =
                tracpro_db::polls::upsert_poll(&self.pool, org.id, flow.uuid, &name, &flow.name)
                    .await?;

            let definition = self.client.get_flow_definition(flow.uuid).await?;
            let ruleset_uuids: Vec<Uuid> = definition.rule_sets.iter().map(|rs| rs.uuid).collect();
            outcome.questions_deleted +=
                tracpro_db::polls::delete_questions_not_in(&self.pool, poll.id, &ruleset_uuids)
                    .await?;

            for (index, ruleset) in definition.rule_sets.iter().enumerate() {
                let rules = extract_rules(&ruleset.rules);
                let existing =
                    tracpro_db::polls::get_question(&self.pool, poll.id, ruleset.uuid).await?;
                let (name, question_type) = match &existing {
                    Some(q) => (
                        track_rename(&q.name, &q.rapidpro_name, &ruleset.label),
                        q.question_type.clone(),
                    ),
                    None => (
                        ruleset.label.clone(),
                        infer_question_type(&rules).code().to_string(),
                    ),
                };

                #[allow(clippy::cast_possible_truncation, clippy::cast_possible_wrap)]
                let order = (index + 1) as i32;
                tracpro_db::polls::upsert_question(
                    &self.pool,
                    poll.id,
                    ruleset.uuid,
                    &name,
                    &ruleset.label,
                    &question_type,
                    order,
                    &serde_json::to_value(&rules)?,
                )
                .await?;
                outcome.questions_synced += 1;
            }

            outcome.polls_synced += 1;
        }

        tracing::info!(
            org = org.name,
            polls = outcome.polls_synced,
            deactivated = outcome.polls_deactivated,
            questions = outcome.questions_synced,
            "poll sync complete"
        );
        Ok(outcome)
    }

    /// Atomically marks exactly the given flows' polls active and every
    /// other poll of the org inactive.
    ///
    /// # Errors
    ///
    /// Returns [`tracpro_db::DbError::UnknownFlowUuids`] (wrapped in
    /// [`EngineError::Db`]) naming the UUIDs with no matching poll; nothing
    /// is committed in that case.
    pub async fn set_active_for_org(
        &self,
        org: &OrgRow,
        flow_uuids: &[Uuid],
    ) -> Result<(), EngineError> {
        tracpro_db::polls::set_active_for_org(&self.pool, org.id, flow_uuids).await?;
        Ok(())
    }
}

/// Converts a ruleset's raw rules into the stored rule list, dropping the
/// implicit catch-all terminus and any test kind the categorizer does not
/// implement.
pub(crate) fn extract_rules(raw: &[FlowRule]) -> Vec<Rule> {
    raw.iter()
        .filter(|r| r.test.get("type").and_then(serde_json::Value::as_str) != Some("true"))
        .filter_map(|r| {
            let combined = serde_json::json!({
                "test": r.test,
                "category": r.category,
            });
            match serde_json::from_value::<Rule>(combined) {
                Ok(rule) => Some(rule),
                Err(e) => {
                    tracing::warn!(test = %r.test, error = %e, "skipping unsupported rule test");
                    None
                }
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use serde_json::json;
    use tracpro_core::rules::{CategoryValue, RuleTest};

    use super::*;

    fn flow_rule(test: serde_json::Value, category: serde_json::Value) -> FlowRule {
        serde_json::from_value(json!({ "test": test, "category": category })).unwrap()
    }

    #[test]
    fn extract_rules_drops_the_catch_all() {
        let raw = vec![
            flow_rule(json!({"type": "gt", "test": "10"}), json!("High")),
            flow_rule(json!({"type": "true"}), json!("Other")),
        ];
        let rules = extract_rules(&raw);
        assert_eq!(rules.len(), 1);
        assert_eq!(
            rules[0].test,
            RuleTest::Gt {
                test: "10".to_string()
            }
        );
    }

    #[test]
    fn extract_rules_keeps_localized_categories() {
        let raw = vec![flow_rule(
            json!({"type": "contains_any", "test": {"base": "yes si"}}),
            json!({"base": "Yes", "fra": "Oui"}),
        )];
        let rules = extract_rules(&raw);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].category.label(), Some("Yes"));
    }

    #[test]
    fn extract_rules_skips_unknown_test_kinds() {
        let raw = vec![
            flow_rule(json!({"type": "ward", "test": "x"}), json!("Ward")),
            flow_rule(json!({"type": "number"}), json!("Numbered")),
        ];
        let rules = extract_rules(&raw);
        assert_eq!(rules.len(), 1);
        assert_eq!(rules[0].test, RuleTest::Number);
        assert_eq!(
            rules[0].category,
            CategoryValue::Plain("Numbered".to_string())
        );
    }

    #[test]
    fn extracted_rules_round_trip_through_json() {
        let raw = vec![flow_rule(
            json!({"type": "between", "min": "1", "max": "5"}),
            json!("Few"),
        )];
        let rules = extract_rules(&raw);
        let stored = serde_json::to_value(&rules).unwrap();
        let back: Vec<Rule> = serde_json::from_value(stored).unwrap();
        assert_eq!(back, rules);
    }
}
