//! Alert triggering: correlates tracker occurrences with alert rules and
//! re-enters affected contacts into poll flows.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracpro_core::polls::{org_local_day_bounds, PollRunType, ResponseStatus};
use tracpro_db::contacts::OrgRow;
use tracpro_db::trackers::AlertRuleRow;
use tracpro_rapidpro::types::FlowStart;
use tracpro_rapidpro::RapidProClient;

use crate::error::EngineError;

/// Triggers poll re-entry from accumulated tracker occurrences.
pub struct AlertRuleEngine {
    pool: PgPool,
    client: Arc<RapidProClient>,
}

impl AlertRuleEngine {
    #[must_use]
    pub fn new(pool: PgPool, client: Arc<RapidProClient>) -> Self {
        Self { pool, client }
    }

    /// Scans every alert rule of the org: rules with occurrences newer than
    /// their `last_executed` watermark (within `(last_executed, now]`)
    /// start the rule's flow for all contacts currently in the rule's
    /// group, without restarting already-participating contacts, and then
    /// advance the watermark.
    ///
    /// A RapidPro failure for one rule is logged and skipped, leaving that
    /// rule's watermark unadvanced; other rules continue. Returns the
    /// number of rules that triggered.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failure outside a rule's
    /// external call.
    pub async fn trigger_from_occurrences(
        &self,
        org: &OrgRow,
        now: DateTime<Utc>,
    ) -> Result<usize, EngineError> {
        let rules = tracpro_db::trackers::list_alert_rules_for_org(&self.pool, org.id).await?;
        let mut triggered = 0;
        for rule in &rules {
            match self.trigger_rule(org, rule, now).await {
                Ok(true) => triggered += 1,
                Ok(false) => {}
                Err(EngineError::RapidPro(e)) => {
                    tracing::error!(
                        alert_rule = rule.id,
                        error = %e,
                        "flow start failed, leaving watermark unadvanced"
                    );
                }
                Err(other) => return Err(other),
            }
        }
        tracing::info!(org = org.name, rules = rules.len(), triggered, "alert scan complete");
        Ok(triggered)
    }

    /// Evaluates one rule. Returns whether it triggered.
    async fn trigger_rule(
        &self,
        org: &OrgRow,
        rule: &AlertRuleRow,
        now: DateTime<Utc>,
    ) -> Result<bool, EngineError> {
        let count = tracpro_db::trackers::occurrence_count_for_rule(
            &self.pool,
            rule.id,
            rule.last_executed,
            now,
        )
        .await?;
        if count == 0 {
            return Ok(false);
        }

        let contacts = tracpro_db::contacts::contacts_in_group(&self.pool, rule.group_id).await?;
        if contacts.is_empty() {
            // Nothing to re-enter, but newer occurrences are consumed.
            tracpro_db::trackers::set_alert_rule_last_executed(&self.pool, rule.id, now).await?;
            return Ok(false);
        }

        let poll = tracpro_db::polls::get_poll(&self.pool, rule.poll_id).await?;
        self.client
            .create_flow_start(&FlowStart {
                flow_uuid: poll.flow_uuid,
                contacts: contacts.iter().map(|c| c.uuid).collect(),
                restart_participants: false,
            })
            .await?;

        // Book-keep locally what the flow start did remotely: an empty
        // response per contact on today's universal pollrun.
        let pollrun = self.universal_pollrun(org, poll.id, now).await?;
        for contact in &contacts {
            tracpro_db::responses::deactivate_contact_responses(&self.pool, pollrun.id, contact.id)
                .await?;
            tracpro_db::responses::create_response(
                &self.pool,
                None,
                pollrun.id,
                contact.id,
                now,
                now,
                ResponseStatus::Empty.code(),
            )
            .await?;
        }

        tracpro_db::trackers::set_alert_rule_last_executed(&self.pool, rule.id, now).await?;
        tracing::info!(
            alert_rule = rule.id,
            occurrences = count,
            contacts = contacts.len(),
            "alert rule triggered"
        );
        Ok(true)
    }

    async fn universal_pollrun(
        &self,
        org: &OrgRow,
        poll_id: i64,
        now: DateTime<Utc>,
    ) -> Result<tracpro_db::pollruns::PollRunRow, EngineError> {
        let (day_start, day_end) = org_local_day_bounds(now, org.utc_offset_minutes);
        if let Some(existing) =
            tracpro_db::pollruns::find_universal_on_day(&self.pool, poll_id, day_start, day_end)
                .await?
        {
            return Ok(existing);
        }
        let created = tracpro_db::pollruns::create_pollrun(
            &self.pool,
            poll_id,
            None,
            PollRunType::Universal.code(),
            now,
            None,
        )
        .await?;
        Ok(created)
    }
}
