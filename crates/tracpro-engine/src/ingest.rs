//! Flow-run ingestion: converts RapidPro runs into responses and answers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::PgPool;
use tracpro_core::polls::{
    derive_status, org_local_day_bounds, run_updated_on, PollRunType, ResponseStatus,
};
use tracpro_core::rules::ALL_RESPONSES;
use tracpro_db::contacts::{ContactRow, OrgRow};
use tracpro_db::polls::PollRow;
use tracpro_db::pollruns::PollRunRow;
use tracpro_db::responses::ResponseRow;
use tracpro_rapidpro::types::Run;
use tracpro_rapidpro::RapidProClient;

use crate::cache::CategoryCountCache;
use crate::error::EngineError;

/// Converts external flow runs into Response/Answer rows, idempotently.
pub struct RunIngestionEngine {
    pool: PgPool,
    client: Arc<RapidProClient>,
    cache: Arc<dyn CategoryCountCache>,
}

impl RunIngestionEngine {
    #[must_use]
    pub fn new(
        pool: PgPool,
        client: Arc<RapidProClient>,
        cache: Arc<dyn CategoryCountCache>,
    ) -> Self {
        Self {
            pool,
            client,
            cache,
        }
    }

    /// Ingests one run. Returns the response unchanged when the run's
    /// `updated_on` matches what is already stored (idempotent
    /// short-circuit); otherwise replaces the response's answers, creating
    /// the response and its universal pollrun first if the run is new.
    ///
    /// # Errors
    ///
    /// - [`EngineError::UnknownFlow`] when no supplied poll and no active
    ///   poll matches the run's flow.
    /// - [`EngineError::MalformedCategory`] when a localized category dict
    ///   arrives empty.
    /// - [`EngineError::Db`] / [`EngineError::RapidPro`] on store or
    ///   contact-fetch failure.
    pub async fn ingest(
        &self,
        org: &OrgRow,
        run: &Run,
        poll: Option<&PollRow>,
    ) -> Result<ResponseRow, EngineError> {
        let updated_on = run_updated_on(run.created_on, run.values.iter().map(|v| v.time));

        let existing =
            tracpro_db::responses::find_response_by_run(&self.pool, org.id, run.id).await?;
        if let Some(response) = &existing {
            if response.updated_on == updated_on {
                tracing::debug!(run = run.id, "run already ingested, skipping");
                return Ok(response.clone());
            }
        }

        let resolved;
        let poll = match poll {
            Some(p) => p,
            None => {
                resolved =
                    tracpro_db::polls::get_active_poll_by_flow(&self.pool, org.id, run.flow)
                        .await
                        .map_err(|e| match e {
                            tracpro_db::DbError::NotFound => EngineError::UnknownFlow(run.flow),
                            other => EngineError::Db(other),
                        })?;
                &resolved
            }
        };

        let contact = self.resolve_contact(org, run).await?;
        let status = derive_status(run.completed, !run.values.is_empty());

        let response = match existing {
            Some(stale) => {
                tracpro_db::responses::delete_answers_for_response(&self.pool, stale.id).await?;
                tracpro_db::responses::update_response(
                    &self.pool,
                    stale.id,
                    updated_on,
                    status.code(),
                )
                .await?;
                ResponseRow {
                    updated_on,
                    status: status.code().to_string(),
                    ..stale
                }
            }
            None => {
                let pollrun = self
                    .universal_pollrun(org, poll, run.created_on)
                    .await?;
                tracpro_db::responses::deactivate_contact_responses(
                    &self.pool, pollrun.id, contact.id,
                )
                .await?;
                tracpro_db::responses::create_response(
                    &self.pool,
                    Some(run.id),
                    pollrun.id,
                    contact.id,
                    run.created_on,
                    updated_on,
                    status.code(),
                )
                .await?
            }
        };

        let questions =
            tracpro_db::polls::list_active_questions(&self.pool, poll.id).await?;
        let by_ruleset: HashMap<uuid::Uuid, &tracpro_db::polls::QuestionRow> =
            questions.iter().map(|q| (q.ruleset_uuid, q)).collect();

        for value in &run.values {
            let Some(question) = by_ruleset.get(&value.node) else {
                continue;
            };
            // RapidPro's categorization is authoritative; a null category
            // stays null rather than being recomputed from the stored rules.
            let category = answer_category(&value.category)?;
            tracpro_db::responses::create_answer(
                &self.pool,
                response.id,
                question.id,
                value.value.as_deref(),
                category.as_deref(),
                value.time,
            )
            .await?;
            self.cache.invalidate(response.pollrun_id, question.id);
        }

        Ok(response)
    }

    /// Creates an empty response for a contact just started (or restarted)
    /// in a pollrun, deactivating any prior response of theirs first.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on store failure.
    pub async fn create_empty(
        &self,
        pollrun: &PollRunRow,
        contact_id: i64,
    ) -> Result<ResponseRow, EngineError> {
        let now = Utc::now();
        tracpro_db::responses::deactivate_contact_responses(&self.pool, pollrun.id, contact_id)
            .await?;
        let response = tracpro_db::responses::create_response(
            &self.pool,
            None,
            pollrun.id,
            contact_id,
            now,
            now,
            ResponseStatus::Empty.code(),
        )
        .await?;
        Ok(response)
    }

    /// Gets or creates the universal pollrun for the poll on the org-local
    /// calendar day of `conducted_on`.
    async fn universal_pollrun(
        &self,
        org: &OrgRow,
        poll: &PollRow,
        conducted_on: chrono::DateTime<Utc>,
    ) -> Result<PollRunRow, EngineError> {
        let (day_start, day_end) = org_local_day_bounds(conducted_on, org.utc_offset_minutes);
        if let Some(existing) =
            tracpro_db::pollruns::find_universal_on_day(&self.pool, poll.id, day_start, day_end)
                .await?
        {
            return Ok(existing);
        }
        let created = tracpro_db::pollruns::create_pollrun(
            &self.pool,
            poll.id,
            None,
            PollRunType::Universal.code(),
            conducted_on,
            None,
        )
        .await?;
        Ok(created)
    }

    /// Finds the run's contact locally, fetching it from RapidPro when it
    /// has never been seen. A fetched contact's home region is the first of
    /// its group memberships that matches a stored region.
    async fn resolve_contact(&self, org: &OrgRow, run: &Run) -> Result<ContactRow, EngineError> {
        if let Some(contact) =
            tracpro_db::contacts::get_contact_by_uuid(&self.pool, org.id, run.contact).await?
        {
            return Ok(contact);
        }

        let fetched = self.client.get_contact(run.contact).await?;
        let mut region_id = None;
        for group_uuid in &fetched.group_uuids {
            if let Some(region) =
                tracpro_db::contacts::get_region_by_uuid(&self.pool, org.id, *group_uuid).await?
            {
                region_id = Some(region.id);
                break;
            }
        }

        let contact = tracpro_db::contacts::create_contact(
            &self.pool,
            org.id,
            fetched.uuid,
            fetched.name.as_deref().unwrap_or(""),
            fetched.urns.first().map_or("", String::as_str),
            region_id,
            fetched.language.as_deref(),
        )
        .await?;
        Ok(contact)
    }
}

/// Collapses a run value's category to a single stored label.
///
/// Strings pass through; localized dicts prefer the `base` locale and fall
/// back to their first entry; the sentinel "All Responses" maps to no
/// category at all.
///
/// # Errors
///
/// Returns [`EngineError::MalformedCategory`] for an empty localized dict.
pub(crate) fn answer_category(
    raw: &serde_json::Value,
) -> Result<Option<String>, EngineError> {
    let label = match raw {
        serde_json::Value::Null => None,
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Object(map) => {
            let chosen = map
                .get("base")
                .or_else(|| map.values().next())
                .ok_or(EngineError::MalformedCategory)?;
            match chosen {
                serde_json::Value::String(s) => Some(s.clone()),
                other => Some(other.to_string()),
            }
        }
        other => Some(other.to_string()),
    };
    Ok(label.filter(|l| l != ALL_RESPONSES))
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn plain_category_passes_through() {
        assert_eq!(
            answer_category(&json!("Yes")).unwrap(),
            Some("Yes".to_string())
        );
    }

    #[test]
    fn localized_category_prefers_base() {
        let raw = json!({"fra": "Oui", "base": "Yes"});
        assert_eq!(answer_category(&raw).unwrap(), Some("Yes".to_string()));
    }

    #[test]
    fn localized_category_falls_back_to_first_entry() {
        let raw = json!({"fra": "Oui"});
        assert_eq!(answer_category(&raw).unwrap(), Some("Oui".to_string()));
    }

    #[test]
    fn empty_localized_category_is_an_error() {
        assert!(matches!(
            answer_category(&json!({})),
            Err(EngineError::MalformedCategory)
        ));
    }

    #[test]
    fn all_responses_sentinel_maps_to_none() {
        assert_eq!(answer_category(&json!("All Responses")).unwrap(), None);
        assert_eq!(
            answer_category(&json!({"base": "All Responses"})).unwrap(),
            None
        );
    }

    #[test]
    fn null_category_is_none() {
        assert_eq!(answer_category(&serde_json::Value::Null).unwrap(), None);
    }

    #[test]
    fn uncategorized_numeric_value_stays_uncategorized() {
        // A value RapidPro left uncategorized is stored without a category
        // even when the question carries numeric rules that would match.
        let value: tracpro_rapidpro::types::RunValue = serde_json::from_value(json!({
            "node": "73a90f53-9d0b-4a61-9b3f-3e6c2a1f5c10",
            "value": "7",
            "category": null,
            "time": "2016-08-01T10:05:00Z"
        }))
        .unwrap();
        assert_eq!(answer_category(&value.category).unwrap(), None);
    }
}
