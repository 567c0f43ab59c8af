//! Background job scheduler.
//!
//! Initialises a [`JobScheduler`] at daemon startup and registers the
//! recurring jobs: poll sync, run ingestion, tracker evaluation, alert
//! scanning, and per-period tracker reports. Every job iterates orgs and
//! isolates failures per org so one org's bad state never starves the rest.

mod trackers;

use std::sync::Arc;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracpro_engine::{NoopCache, PollSyncEngine, RunIngestionEngine};
use tracpro_rapidpro::RapidProClient;

/// Builds and starts the background job scheduler.
///
/// Registers all recurring jobs and starts the scheduler. Returns the
/// running [`JobScheduler`] handle, which must be kept alive for the
/// lifetime of the process; dropping it shuts down all jobs.
///
/// # Errors
///
/// Returns an error if the RapidPro client cannot be constructed, a job
/// cannot be registered, or the scheduler fails to start.
pub async fn build_scheduler(
    pool: PgPool,
    config: Arc<tracpro_core::AppConfig>,
) -> anyhow::Result<JobScheduler> {
    let client = Arc::new(
        RapidProClient::with_base_url(
            &config.rapidpro_api_token,
            config.client_timeout_secs,
            &config.rapidpro_base_url,
        )?
        .with_retry_policy(
            config.client_max_retries,
            config.client_retry_backoff_base_ms,
        ),
    );

    let scheduler = JobScheduler::new().await?;

    register_sync_job(&scheduler, pool.clone(), Arc::clone(&client)).await?;
    register_ingest_job(&scheduler, pool.clone(), Arc::clone(&client)).await?;
    trackers::register_tracker_eval_job(&scheduler, pool.clone(), Arc::clone(&client)).await?;
    trackers::register_alert_scan_job(&scheduler, pool.clone(), Arc::clone(&client)).await?;
    trackers::register_report_jobs(&scheduler, pool, client).await?;

    scheduler.start().await?;
    Ok(scheduler)
}

/// Reads a job's cron expression from the environment, falling back to the
/// built-in default.
fn cron_from_env(var: &str, default: &str) -> String {
    std::env::var(var).unwrap_or_else(|_| default.to_string())
}

/// Register the hourly poll sync job.
///
/// Runs at the top of every hour (`0 0 * * * *`) by default; override with
/// `TRACPRO_POLL_SYNC_CRON`.
async fn register_sync_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    client: Arc<RapidProClient>,
) -> Result<(), JobSchedulerError> {
    let cron = cron_from_env("TRACPRO_POLL_SYNC_CRON", "0 0 * * * *");
    let engine = Arc::new(PollSyncEngine::new(pool.clone(), client));
    let pool = Arc::new(pool);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let engine = Arc::clone(&engine);

        Box::pin(async move {
            tracing::info!("scheduler: starting poll sync run");
            run_sync_job(&pool, &engine).await;
            tracing::info!("scheduler: poll sync run complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered poll sync job");
    Ok(())
}

/// Sync every org's polls, isolating failures per org.
async fn run_sync_job(pool: &PgPool, engine: &PollSyncEngine) {
    let orgs = match tracpro_db::contacts::list_orgs(pool).await {
        Ok(orgs) => orgs,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: poll sync failed to list orgs");
            return;
        }
    };

    for org in &orgs {
        match engine.sync(org).await {
            Ok(outcome) => tracing::info!(
                org = org.name,
                polls = outcome.polls_synced,
                "scheduler: org synced"
            ),
            Err(e) => tracing::error!(org = org.name, error = %e, "scheduler: org sync failed"),
        }
    }
}

/// Register the run ingestion job.
///
/// Runs every five minutes (`0 */5 * * * *`) by default; override with
/// `TRACPRO_RUN_INGEST_CRON`.
async fn register_ingest_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    client: Arc<RapidProClient>,
) -> Result<(), JobSchedulerError> {
    let cron = cron_from_env("TRACPRO_RUN_INGEST_CRON", "0 */5 * * * *");
    let engine = Arc::new(RunIngestionEngine::new(
        pool.clone(),
        Arc::clone(&client),
        Arc::new(NoopCache),
    ));
    let pool = Arc::new(pool);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let client = Arc::clone(&client);
        let engine = Arc::clone(&engine);

        Box::pin(async move {
            tracing::debug!("scheduler: starting run ingestion");
            run_ingest_job(&pool, &client, &engine).await;
            tracing::debug!("scheduler: run ingestion complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered run ingestion job");
    Ok(())
}

/// Ingest new runs for every active poll of every org. Fetches runs
/// modified after the poll's latest stored `updated_on` watermark; per-poll
/// and per-run failures are logged and skipped.
async fn run_ingest_job(pool: &PgPool, client: &RapidProClient, engine: &RunIngestionEngine) {
    let orgs = match tracpro_db::contacts::list_orgs(pool).await {
        Ok(orgs) => orgs,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: ingestion failed to list orgs");
            return;
        }
    };

    for org in &orgs {
        let polls = match tracpro_db::polls::list_active_polls(pool, org.id).await {
            Ok(polls) => polls,
            Err(e) => {
                tracing::error!(org = org.name, error = %e, "scheduler: failed to list polls");
                continue;
            }
        };

        for poll in &polls {
            let after = match tracpro_db::responses::latest_updated_on_for_poll(pool, poll.id).await
            {
                Ok(after) => after,
                Err(e) => {
                    tracing::error!(poll = poll.id, error = %e, "scheduler: watermark query failed");
                    continue;
                }
            };

            let runs = match client.get_runs_for_flow(poll.flow_uuid, after).await {
                Ok(runs) => runs,
                Err(e) => {
                    tracing::error!(poll = poll.id, error = %e, "scheduler: run fetch failed");
                    continue;
                }
            };

            let mut ingested = 0usize;
            for run in &runs {
                match engine.ingest(org, run, Some(poll)).await {
                    Ok(_) => ingested += 1,
                    Err(e) => {
                        tracing::error!(run = run.id, error = %e, "scheduler: run ingest failed");
                    }
                }
            }
            if !runs.is_empty() {
                tracing::info!(
                    poll = poll.id,
                    fetched = runs.len(),
                    ingested,
                    "scheduler: poll runs ingested"
                );
            }
        }
    }
}
