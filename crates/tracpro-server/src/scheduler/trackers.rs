//! Scheduled jobs for the tracker and alerting layer.
//!
//! Registers the tracker evaluation cycle (snapshots, group rules,
//! threshold notifications), the alert occurrence scan, and one report job
//! per reporting period.

use std::sync::Arc;

use sqlx::PgPool;
use tokio_cron_scheduler::{Job, JobScheduler, JobSchedulerError};
use tracpro_core::trackers::ReportingPeriod;
use tracpro_engine::{AlertRuleEngine, LogNotifier, TrackerRuleEngine};
use tracpro_rapidpro::RapidProClient;

use super::cron_from_env;

/// Register the daily tracker evaluation job.
///
/// Runs at 01:00 UTC (`0 0 1 * * *`) by default; override with
/// `TRACPRO_TRACKER_EVAL_CRON`. Each tracker's cycle is snapshot capture,
/// group rule application, and threshold notifications, in that order.
pub(super) async fn register_tracker_eval_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    client: Arc<RapidProClient>,
) -> Result<(), JobSchedulerError> {
    let cron = cron_from_env("TRACPRO_TRACKER_EVAL_CRON", "0 0 1 * * *");
    let engine = Arc::new(TrackerRuleEngine::new(
        pool.clone(),
        client,
        Arc::new(LogNotifier),
    ));
    let pool = Arc::new(pool);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let engine = Arc::clone(&engine);

        Box::pin(async move {
            tracing::info!("scheduler: starting tracker evaluation");
            run_tracker_eval_job(&pool, &engine).await;
            tracing::info!("scheduler: tracker evaluation complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered tracker evaluation job");
    Ok(())
}

/// Evaluate every tracker of every org, isolating failures per tracker.
async fn run_tracker_eval_job(pool: &PgPool, engine: &TrackerRuleEngine) {
    let orgs = match tracpro_db::contacts::list_orgs(pool).await {
        Ok(orgs) => orgs,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: tracker eval failed to list orgs");
            return;
        }
    };

    for org in &orgs {
        let trackers = match tracpro_db::trackers::list_trackers_for_org(pool, org.id).await {
            Ok(trackers) => trackers,
            Err(e) => {
                tracing::error!(org = org.name, error = %e, "scheduler: failed to list trackers");
                continue;
            }
        };

        for tracker in &trackers {
            if let Err(e) = engine.create_snapshots(tracker).await {
                tracing::error!(tracker = tracker.id, error = %e, "scheduler: snapshots failed");
                continue;
            }
            match engine.apply_group_rules(org, tracker).await {
                Ok(modified) => {
                    if !modified.is_empty() {
                        tracing::info!(
                            tracker = tracker.id,
                            modified = modified.len(),
                            "scheduler: group memberships changed"
                        );
                    }
                }
                Err(e) => {
                    tracing::error!(tracker = tracker.id, error = %e, "scheduler: group rules failed");
                    continue;
                }
            }
            if let Err(e) = engine.send_threshold_notifications(tracker).await {
                tracing::error!(tracker = tracker.id, error = %e, "scheduler: threshold notifications failed");
            }
        }
    }
}

/// Register the alert occurrence scan.
///
/// Runs every 15 minutes (`0 */15 * * * *`) by default; override with
/// `TRACPRO_ALERT_SCAN_CRON`.
pub(super) async fn register_alert_scan_job(
    scheduler: &JobScheduler,
    pool: PgPool,
    client: Arc<RapidProClient>,
) -> Result<(), JobSchedulerError> {
    let cron = cron_from_env("TRACPRO_ALERT_SCAN_CRON", "0 */15 * * * *");
    let engine = Arc::new(AlertRuleEngine::new(pool.clone(), client));
    let pool = Arc::new(pool);

    let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
        let pool = Arc::clone(&pool);
        let engine = Arc::clone(&engine);

        Box::pin(async move {
            tracing::debug!("scheduler: starting alert scan");
            run_alert_scan_job(&pool, &engine).await;
            tracing::debug!("scheduler: alert scan complete");
        })
    })?;

    scheduler.add(job).await?;
    tracing::info!(cron = %cron, "scheduler: registered alert scan job");
    Ok(())
}

/// Scan every org's alert rules. Per-rule isolation happens inside the
/// engine; this loop isolates whole-org failures.
async fn run_alert_scan_job(pool: &PgPool, engine: &AlertRuleEngine) {
    let orgs = match tracpro_db::contacts::list_orgs(pool).await {
        Ok(orgs) => orgs,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: alert scan failed to list orgs");
            return;
        }
    };

    for org in &orgs {
        match engine.trigger_from_occurrences(org, chrono::Utc::now()).await {
            Ok(triggered) if triggered > 0 => {
                tracing::info!(org = org.name, triggered, "scheduler: alert rules triggered");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(org = org.name, error = %e, "scheduler: alert scan failed"),
        }
    }
}

/// Register one report job per reporting period.
///
/// Fortnightly and quarterly periods are approximated with calendar-day
/// crons (1st/15th, and the first of each quarter month). Override any of
/// them with `TRACPRO_REPORT_<PERIOD>_CRON`, e.g.
/// `TRACPRO_REPORT_WEEKLY_CRON`.
pub(super) async fn register_report_jobs(
    scheduler: &JobScheduler,
    pool: PgPool,
    client: Arc<RapidProClient>,
) -> Result<(), JobSchedulerError> {
    let engine = Arc::new(TrackerRuleEngine::new(
        pool.clone(),
        client,
        Arc::new(LogNotifier),
    ));
    let pool = Arc::new(pool);

    for period in ReportingPeriod::ALL {
        let default = default_report_cron(period);
        let var = format!("TRACPRO_REPORT_{}_CRON", period.code().to_uppercase());
        let cron = cron_from_env(&var, default);

        let pool = Arc::clone(&pool);
        let engine = Arc::clone(&engine);
        let job = Job::new_async(cron.as_str(), move |_uuid, _lock| {
            let pool = Arc::clone(&pool);
            let engine = Arc::clone(&engine);

            Box::pin(async move {
                tracing::info!(period = period.code(), "scheduler: starting report run");
                run_report_job(&pool, &engine, period).await;
                tracing::info!(period = period.code(), "scheduler: report run complete");
            })
        })?;

        scheduler.add(job).await?;
        tracing::info!(period = period.code(), cron = %cron, "scheduler: registered report job");
    }
    Ok(())
}

fn default_report_cron(period: ReportingPeriod) -> &'static str {
    match period {
        ReportingPeriod::Daily => "0 0 2 * * *",
        ReportingPeriod::Weekly => "0 0 2 * * MON",
        ReportingPeriod::Fortnightly => "0 0 2 1,15 * *",
        ReportingPeriod::Monthly => "0 0 2 1 * *",
        ReportingPeriod::Quarterly => "0 0 2 1 1,4,7,10 *",
    }
}

/// Send reports and reset fields for every matching tracker of every org.
async fn run_report_job(pool: &PgPool, engine: &TrackerRuleEngine, period: ReportingPeriod) {
    let orgs = match tracpro_db::contacts::list_orgs(pool).await {
        Ok(orgs) => orgs,
        Err(e) => {
            tracing::error!(error = %e, "scheduler: report run failed to list orgs");
            return;
        }
    };

    for org in &orgs {
        match engine.run_period(org, period).await {
            Ok(completed) if completed > 0 => {
                tracing::info!(org = org.name, completed, "scheduler: tracker reports sent");
            }
            Ok(_) => {}
            Err(e) => tracing::error!(org = org.name, error = %e, "scheduler: report run failed"),
        }
    }
}
