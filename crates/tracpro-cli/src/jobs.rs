//! Job handlers for the CLI.
//!
//! Each mirrors one of the daemon's scheduled jobs as a one-shot
//! invocation. Per-org failures abort the run here (unlike the scheduler)
//! so a human gets a non-zero exit code to act on.

use std::sync::Arc;

use sqlx::PgPool;
use tracpro_core::polls::ResponseStatus;
use tracpro_core::trackers::ReportingPeriod;
use tracpro_core::AppConfig;
use tracpro_db::contacts::OrgRow;
use tracpro_engine::{
    AlertRuleEngine, LogNotifier, NoopCache, PollRunResolver, PollSyncEngine, RunIngestionEngine,
    TrackerRuleEngine,
};
use tracpro_rapidpro::RapidProClient;
use uuid::Uuid;

fn build_client(config: &AppConfig) -> anyhow::Result<Arc<RapidProClient>> {
    let client = RapidProClient::with_base_url(
        &config.rapidpro_api_token,
        config.client_timeout_secs,
        &config.rapidpro_base_url,
    )?
    .with_retry_policy(
        config.client_max_retries,
        config.client_retry_backoff_base_ms,
    );
    Ok(Arc::new(client))
}

/// The org with the given id, or every org when no filter is given.
async fn resolve_orgs(pool: &PgPool, org: Option<i64>) -> anyhow::Result<Vec<OrgRow>> {
    match org {
        Some(id) => Ok(vec![tracpro_db::contacts::get_org(pool, id).await?]),
        None => Ok(tracpro_db::contacts::list_orgs(pool).await?),
    }
}

pub(crate) async fn sync(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let engine = PollSyncEngine::new(pool.clone(), build_client(config)?);
    for org in resolve_orgs(pool, org).await? {
        let outcome = engine.sync(&org).await?;
        println!(
            "{}: {} polls synced, {} deactivated, {} questions",
            org.name, outcome.polls_synced, outcome.polls_deactivated, outcome.questions_synced
        );
    }
    Ok(())
}

pub(crate) async fn activate(
    pool: &PgPool,
    config: &AppConfig,
    org: i64,
    flows: &[Uuid],
) -> anyhow::Result<()> {
    let engine = PollSyncEngine::new(pool.clone(), build_client(config)?);
    let org = tracpro_db::contacts::get_org(pool, org).await?;
    engine.set_active_for_org(&org, flows).await?;
    println!("{}: {} polls active", org.name, flows.len());
    Ok(())
}

pub(crate) async fn ingest(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let client = build_client(config)?;
    let engine = RunIngestionEngine::new(pool.clone(), Arc::clone(&client), Arc::new(NoopCache));
    for org in resolve_orgs(pool, org).await? {
        let mut total = 0usize;
        for poll in tracpro_db::polls::list_active_polls(pool, org.id).await? {
            let after =
                tracpro_db::responses::latest_updated_on_for_poll(pool, poll.id).await?;
            let runs = client.get_runs_for_flow(poll.flow_uuid, after).await?;
            for run in &runs {
                engine.ingest(&org, run, Some(&poll)).await?;
            }
            total += runs.len();
        }
        println!("{}: {total} runs ingested", org.name);
    }
    Ok(())
}

pub(crate) async fn snapshots(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let engine = TrackerRuleEngine::new(pool.clone(), build_client(config)?, Arc::new(LogNotifier));
    for org in resolve_orgs(pool, org).await? {
        for tracker in tracpro_db::trackers::list_trackers_for_org(pool, org.id).await? {
            let count = engine.create_snapshots(&tracker).await?;
            println!("tracker {}: {count} snapshots captured", tracker.id);
        }
    }
    Ok(())
}

pub(crate) async fn apply_rules(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let engine = TrackerRuleEngine::new(pool.clone(), build_client(config)?, Arc::new(LogNotifier));
    for org in resolve_orgs(pool, org).await? {
        for tracker in tracpro_db::trackers::list_trackers_for_org(pool, org.id).await? {
            let modified = engine.apply_group_rules(&org, &tracker).await?;
            println!("tracker {}: {} contacts modified", tracker.id, modified.len());
        }
    }
    Ok(())
}

pub(crate) async fn thresholds(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let engine = TrackerRuleEngine::new(pool.clone(), build_client(config)?, Arc::new(LogNotifier));
    for org in resolve_orgs(pool, org).await? {
        for tracker in tracpro_db::trackers::list_trackers_for_org(pool, org.id).await? {
            engine.send_threshold_notifications(&tracker).await?;
        }
        println!("{}: threshold notifications sent", org.name);
    }
    Ok(())
}

pub(crate) async fn trigger_alerts(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
) -> anyhow::Result<()> {
    let engine = AlertRuleEngine::new(pool.clone(), build_client(config)?);
    for org in resolve_orgs(pool, org).await? {
        let triggered = engine
            .trigger_from_occurrences(&org, chrono::Utc::now())
            .await?;
        println!("{}: {triggered} alert rules triggered", org.name);
    }
    Ok(())
}

pub(crate) async fn pollruns(
    pool: &PgPool,
    org: i64,
    region: Option<i64>,
    days: i64,
) -> anyhow::Result<()> {
    let org = tracpro_db::contacts::get_org(pool, org).await?;
    let resolver = PollRunResolver::new(pool.clone(), Arc::new(NoopCache));
    let tree = resolver.region_tree(org.id).await?;
    let start = chrono::Utc::now() - chrono::Duration::days(days);
    for run in resolver.pollruns_by_dates(org.id, Some(start), None).await? {
        if !resolver.covers(&run, region, true, &tree)? {
            continue;
        }
        let counts = resolver
            .get_response_counts(org.id, &run, region, true)
            .await?;
        let count_of = |status| counts.get(&status).copied().unwrap_or_default();
        println!(
            "pollrun {} (poll {}, {}): {} complete, {} partial, {} empty",
            run.id,
            run.poll_id,
            run.conducted_on.date_naive(),
            count_of(ResponseStatus::Complete),
            count_of(ResponseStatus::Partial),
            count_of(ResponseStatus::Empty),
        );
    }
    Ok(())
}

pub(crate) async fn breakdown(
    pool: &PgPool,
    org: i64,
    pollrun: i64,
    question: i64,
    region: Option<i64>,
) -> anyhow::Result<()> {
    let org = tracpro_db::contacts::get_org(pool, org).await?;
    let run = tracpro_db::pollruns::get_pollrun(pool, pollrun).await?;
    let resolver = PollRunResolver::new(pool.clone(), Arc::new(NoopCache));
    for (category, count) in resolver
        .category_counts(org.id, run.id, question, region)
        .await?
    {
        println!("{}: {count}", category.as_deref().unwrap_or("(uncategorized)"));
    }
    let words = resolver
        .answer_word_counts(org.id, run.id, question, region, 10)
        .await?;
    if !words.is_empty() {
        let summary: Vec<String> = words.iter().map(|(w, n)| format!("{w} ({n})")).collect();
        println!("top words: {}", summary.join(", "));
    }
    Ok(())
}

pub(crate) async fn report(
    pool: &PgPool,
    config: &AppConfig,
    org: Option<i64>,
    period: &str,
) -> anyhow::Result<()> {
    let period = ReportingPeriod::from_code(period)
        .ok_or_else(|| anyhow::anyhow!("unknown reporting period '{period}'"))?;
    let engine = TrackerRuleEngine::new(pool.clone(), build_client(config)?, Arc::new(LogNotifier));
    for org in resolve_orgs(pool, org).await? {
        let completed = engine.run_period(&org, period).await?;
        println!("{}: {completed} {} reports sent", org.name, period.label());
    }
    Ok(())
}
