//! Region-aware read path over pollruns, responses, and answers.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tracpro_core::polls::{PollRunType, ResponseStatus};
use tracpro_core::regions::{covers_region, response_region_scope, visible_from_region, RegionTree};
use tracpro_core::words::word_counts;
use tracpro_db::pollruns::PollRunRow;
use tracpro_db::responses::ResponseRow;

use crate::cache::{CategoryCountCache, CategoryCounts};
use crate::error::EngineError;

/// Answers "which responses / counts does this pollrun have for this
/// region" questions for the reporting layer.
pub struct PollRunResolver {
    pool: PgPool,
    cache: Arc<dyn CategoryCountCache>,
}

impl PollRunResolver {
    #[must_use]
    pub fn new(pool: PgPool, cache: Arc<dyn CategoryCountCache>) -> Self {
        Self { pool, cache }
    }

    /// Loads the org's region hierarchy.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] if the edge query fails.
    pub async fn region_tree(&self, org_id: i64) -> Result<RegionTree, EngineError> {
        let edges = tracpro_db::contacts::region_edges(&self.pool, org_id).await?;
        Ok(RegionTree::from_edges(edges))
    }

    /// Whether the pollrun covers `region`. Thin wrapper decoding the
    /// stored type tag before delegating to the pure predicate.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidCode`] for an unrecognized stored type.
    pub fn covers(
        &self,
        pollrun: &PollRunRow,
        region: Option<i64>,
        include_subregions: bool,
        tree: &RegionTree,
    ) -> Result<bool, EngineError> {
        let pollrun_type = decode_type(pollrun)?;
        Ok(covers_region(
            pollrun_type,
            pollrun.region_id,
            region,
            include_subregions,
            tree,
        ))
    }

    /// Active responses of active contacts for a pollrun, scoped by region.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotCovered`] when the pollrun does not cover
    /// the requested region; this is a caller contract violation, not a
    /// data error.
    pub async fn get_responses(
        &self,
        org_id: i64,
        pollrun: &PollRunRow,
        region: Option<i64>,
        include_subregions: bool,
        include_empty: bool,
    ) -> Result<Vec<ResponseRow>, EngineError> {
        let tree = self.region_tree(org_id).await?;
        if !self.covers(pollrun, region, include_subregions, &tree)? {
            return Err(EngineError::NotCovered {
                pollrun_id: pollrun.id,
                region_id: region.unwrap_or_default(),
            });
        }
        let scope = scope_for(pollrun, decode_type(pollrun)?, region, include_subregions, &tree);
        let rows = tracpro_db::responses::list_responses_for_pollrun(
            &self.pool,
            pollrun.id,
            scope.as_deref(),
            include_empty,
        )
        .await?;
        Ok(rows)
    }

    /// Response counts by status, with the fixed three-key histogram:
    /// absent statuses are zero.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::NotCovered`] like [`Self::get_responses`],
    /// and [`EngineError::InvalidCode`] for an unknown stored status.
    pub async fn get_response_counts(
        &self,
        org_id: i64,
        pollrun: &PollRunRow,
        region: Option<i64>,
        include_subregions: bool,
    ) -> Result<HashMap<ResponseStatus, i64>, EngineError> {
        let tree = self.region_tree(org_id).await?;
        if !self.covers(pollrun, region, include_subregions, &tree)? {
            return Err(EngineError::NotCovered {
                pollrun_id: pollrun.id,
                region_id: region.unwrap_or_default(),
            });
        }
        let scope = scope_for(pollrun, decode_type(pollrun)?, region, include_subregions, &tree);
        let rows = tracpro_db::responses::response_status_counts(
            &self.pool,
            pollrun.id,
            scope.as_deref(),
        )
        .await?;

        let mut counts: HashMap<ResponseStatus, i64> =
            ResponseStatus::ALL.iter().map(|s| (*s, 0)).collect();
        for (code, count) in rows {
            let status = ResponseStatus::from_code(&code).ok_or(EngineError::InvalidCode {
                kind: "response status",
                value: code,
            })?;
            counts.insert(status, count);
        }
        Ok(counts)
    }

    /// True iff no newer pollrun of the same poll is visible from `region`
    /// (sub-regions excluded for this check).
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure or
    /// [`EngineError::InvalidCode`] for an unknown stored type.
    pub async fn is_last_for_region(
        &self,
        org_id: i64,
        pollrun: &PollRunRow,
        region: Option<i64>,
    ) -> Result<bool, EngineError> {
        let tree = self.region_tree(org_id).await?;
        let newer = tracpro_db::pollruns::list_newer_for_poll(
            &self.pool,
            pollrun.poll_id,
            pollrun.conducted_on,
        )
        .await?;
        for candidate in &newer {
            let candidate_type = decode_type(candidate)?;
            if visible_from_region(candidate_type, candidate.region_id, region, false, &tree) {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Per-category answer counts for one question in a pollrun, scoped to
    /// a region and its descendants. Read-through cached.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure.
    pub async fn category_counts(
        &self,
        org_id: i64,
        pollrun_id: i64,
        question_id: i64,
        region: Option<i64>,
    ) -> Result<CategoryCounts, EngineError> {
        if let Some(hit) = self.cache.get(pollrun_id, question_id, region) {
            return Ok(hit);
        }
        let tree = self.region_tree(org_id).await?;
        let scope = region_scope_vec(region, true, &tree);
        let counts = tracpro_db::responses::category_counts(
            &self.pool,
            pollrun_id,
            question_id,
            scope.as_deref(),
        )
        .await?;
        self.cache.put(pollrun_id, question_id, region, counts.clone());
        Ok(counts)
    }

    /// Most frequent words across a question's open-ended answers.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure.
    pub async fn answer_word_counts(
        &self,
        org_id: i64,
        pollrun_id: i64,
        question_id: i64,
        region: Option<i64>,
        limit: usize,
    ) -> Result<Vec<(String, usize)>, EngineError> {
        let tree = self.region_tree(org_id).await?;
        let scope = region_scope_vec(region, true, &tree);
        let values = tracpro_db::responses::list_answer_values(
            &self.pool,
            pollrun_id,
            question_id,
            scope.as_deref(),
        )
        .await?;
        Ok(word_counts(values.iter().map(String::as_str), limit))
    }

    /// An org's pollruns over active polls within a conducted-on range.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::Db`] on query failure.
    pub async fn pollruns_by_dates(
        &self,
        org_id: i64,
        start: Option<DateTime<Utc>>,
        end: Option<DateTime<Utc>>,
    ) -> Result<Vec<PollRunRow>, EngineError> {
        let rows = tracpro_db::pollruns::list_by_dates(&self.pool, org_id, start, end).await?;
        Ok(rows)
    }
}

fn decode_type(pollrun: &PollRunRow) -> Result<PollRunType, EngineError> {
    PollRunType::from_code(&pollrun.pollrun_type).ok_or_else(|| EngineError::InvalidCode {
        kind: "pollrun type",
        value: pollrun.pollrun_type.clone(),
    })
}

/// The contact-region ids a response query should restrict to. `None` means
/// no restriction.
///
/// A pollrun with its own region limits responses to that region, widened
/// to the full subtree only for propagated runs with sub-regions included.
/// Region-less pollruns fall back to the caller's region filter.
fn scope_for(
    pollrun: &PollRunRow,
    pollrun_type: PollRunType,
    region: Option<i64>,
    include_subregions: bool,
    tree: &RegionTree,
) -> Option<Vec<i64>> {
    if let Some(own) = pollrun.region_id {
        if pollrun_type == PollRunType::Propagated && include_subregions {
            Some(tree.descendants_inclusive(own))
        } else {
            Some(vec![own])
        }
    } else {
        region_scope_vec(region, include_subregions, tree)
    }
}

fn region_scope_vec(
    region: Option<i64>,
    include_subregions: bool,
    tree: &RegionTree,
) -> Option<Vec<i64>> {
    response_region_scope(region, include_subregions, tree).map(|set| {
        let mut ids: Vec<i64> = set.into_iter().collect();
        ids.sort_unstable();
        ids
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    /// 1 → {2, 3}; 2 → {4}.
    fn tree() -> RegionTree {
        RegionTree::from_edges(vec![(1, None), (2, Some(1)), (3, Some(1)), (4, Some(2))])
    }

    fn pollrun(region_id: Option<i64>, pollrun_type: PollRunType) -> PollRunRow {
        PollRunRow {
            id: 1,
            poll_id: 1,
            region_id,
            pollrun_type: pollrun_type.code().to_string(),
            conducted_on: Utc::now(),
            created_by: None,
        }
    }

    #[test]
    fn universal_pollrun_scope_follows_the_filter_region() {
        let run = pollrun(None, PollRunType::Universal);
        let scope = scope_for(&run, PollRunType::Universal, Some(2), true, &tree());
        assert_eq!(scope, Some(vec![2, 4]));
        assert_eq!(
            scope_for(&run, PollRunType::Universal, None, true, &tree()),
            None
        );
    }

    #[test]
    fn regional_pollrun_scope_is_its_own_region_only() {
        let run = pollrun(Some(2), PollRunType::Regional);
        let scope = scope_for(&run, PollRunType::Regional, Some(1), true, &tree());
        assert_eq!(scope, Some(vec![2]));
    }

    #[test]
    fn propagated_pollrun_widens_to_descendants_with_subregions() {
        let run = pollrun(Some(2), PollRunType::Propagated);
        assert_eq!(
            scope_for(&run, PollRunType::Propagated, None, true, &tree()),
            Some(vec![2, 4])
        );
        assert_eq!(
            scope_for(&run, PollRunType::Propagated, None, false, &tree()),
            Some(vec![2])
        );
    }

    #[test]
    fn unknown_type_code_is_rejected() {
        let mut run = pollrun(None, PollRunType::Universal);
        run.pollrun_type = "weekly".to_string();
        assert!(matches!(
            decode_type(&run),
            Err(EngineError::InvalidCode { .. })
        ));
    }
}
