mod jobs;

use clap::{Parser, Subcommand};
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "tracpro-cli")]
#[command(about = "TracPro command line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Run pending database migrations.
    Migrate,
    /// Sync polls and questions from RapidPro.
    Sync {
        /// Restrict to one org id; all orgs when omitted.
        #[arg(long)]
        org: Option<i64>,
    },
    /// Mark exactly the given flows' polls active for an org.
    Activate {
        #[arg(long)]
        org: i64,
        /// Flow UUIDs to activate; every other poll of the org is
        /// deactivated.
        #[arg(required = true)]
        flows: Vec<Uuid>,
    },
    /// Fetch and ingest new flow runs for active polls.
    Ingest {
        #[arg(long)]
        org: Option<i64>,
    },
    /// Capture tracker snapshots.
    Snapshots {
        #[arg(long)]
        org: Option<i64>,
    },
    /// Apply tracker group rules over current snapshots.
    ApplyRules {
        #[arg(long)]
        org: Option<i64>,
    },
    /// Send threshold-breach notifications.
    Thresholds {
        #[arg(long)]
        org: Option<i64>,
    },
    /// Scan alert rules and trigger flow re-entry from occurrences.
    TriggerAlerts {
        #[arg(long)]
        org: Option<i64>,
    },
    /// Send periodic tracker reports and reset contact fields.
    Report {
        #[arg(long)]
        org: Option<i64>,
        /// Reporting period: daily, weekly, fortnightly, monthly, or
        /// quarterly.
        #[arg(long)]
        period: String,
    },
    /// List recent pollruns with their response-status counts.
    Pollruns {
        #[arg(long)]
        org: i64,
        /// Restrict counts to responses from this region and its
        /// sub-regions.
        #[arg(long)]
        region: Option<i64>,
        /// How far back to look, in days.
        #[arg(long, default_value_t = 30)]
        days: i64,
    },
    /// Show one question's category breakdown and top answer words.
    Breakdown {
        #[arg(long)]
        org: i64,
        #[arg(long)]
        pollrun: i64,
        #[arg(long)]
        question: i64,
        #[arg(long)]
        region: Option<i64>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt::init();

    let cli = Cli::parse();
    let config = tracpro_core::load_app_config()?;
    let pool_config = tracpro_db::PoolConfig::from_app_config(&config);
    let pool = tracpro_db::connect_pool(&config.database_url, pool_config).await?;

    match cli.command {
        Commands::Migrate => {
            tracpro_db::run_migrations(&pool).await?;
            println!("migrations up to date");
        }
        Commands::Sync { org } => jobs::sync(&pool, &config, org).await?,
        Commands::Activate { org, flows } => jobs::activate(&pool, &config, org, &flows).await?,
        Commands::Ingest { org } => jobs::ingest(&pool, &config, org).await?,
        Commands::Snapshots { org } => jobs::snapshots(&pool, &config, org).await?,
        Commands::ApplyRules { org } => jobs::apply_rules(&pool, &config, org).await?,
        Commands::Thresholds { org } => jobs::thresholds(&pool, &config, org).await?,
        Commands::TriggerAlerts { org } => jobs::trigger_alerts(&pool, &config, org).await?,
        Commands::Report { org, period } => jobs::report(&pool, &config, org, &period).await?,
        Commands::Pollruns { org, region, days } => {
            jobs::pollruns(&pool, org, region, days).await?;
        }
        Commands::Breakdown {
            org,
            pollrun,
            question,
            region,
        } => jobs::breakdown(&pool, org, pollrun, question, region).await?,
    }

    Ok(())
}
