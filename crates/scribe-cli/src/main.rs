use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;

use scribe_core::config::SchedulerConfig;
use scribe_core::queue::{JobQueue, BACKFILL_PRIORITY};
use scribe_core::scheduler::DailyScheduler;
use scribe_core::tracker::RunTracker;
use scribe_state::{SqliteActivityCalendar, SqliteDatabase};

#[derive(Parser)]
#[command(name = "scribe")]
#[command(about = "Admin surface for the background journal/memory workflow subsystem", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    #[arg(long, default_value = "sqlite://./.scribe/scribe.db?mode=rwc")]
    database_url: String,
}

#[derive(Subcommand)]
enum Commands {
    /// Initialize the database with migrations
    Init,

    /// Show queue counts by status
    Stats,

    /// Show recent queue jobs
    Recent {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },

    /// Reset all failed jobs back to pending
    RetryFailed,

    /// Purge completed jobs past the retention window
    ClearCompleted {
        #[arg(long, default_value_t = 7)]
        days: i64,
    },

    /// Cancel one queue job (pending rows are deleted, processing rows are
    /// marked failed)
    CancelJob { id: i64 },

    /// Delete every pending queue job
    CancelPending,

    /// Queue gap days for one user, or for all users when --user is omitted
    Backfill {
        #[arg(long)]
        user: Option<String>,

        #[arg(long, default_value_t = BACKFILL_PRIORITY)]
        priority: i64,
    },

    /// List currently running workflow runs
    ActiveRuns {
        #[arg(long)]
        workflow: Option<String>,
    },

    /// Force a running workflow run to failed
    CancelRun { run_id: String },

    /// Run the daily enqueue procedure now, regardless of the clock
    TriggerDaily,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::INFO)
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();

    let db = Arc::new(SqliteDatabase::new(&cli.database_url).await?);
    let calendar = Arc::new(SqliteActivityCalendar::new(db.pool().clone()));

    match cli.command {
        Commands::Init => {
            db.run_migrations().await?;
            info!("database initialized");
        }
        Commands::Stats => {
            let queue = JobQueue::new(db, calendar);
            let stats = queue.stats().await?;
            println!("{}", serde_json::to_string_pretty(&stats)?);
        }
        Commands::Recent { limit } => {
            let queue = JobQueue::new(db, calendar);
            let jobs = queue.recent(limit).await?;
            println!("{}", serde_json::to_string_pretty(&jobs)?);
        }
        Commands::RetryFailed => {
            let queue = JobQueue::new(db, calendar);
            let reset = queue.retry_failed().await?;
            println!("Reset {reset} failed jobs to pending");
        }
        Commands::ClearCompleted { days } => {
            let queue = JobQueue::new(db, calendar);
            let deleted = queue.clear_completed(days).await?;
            println!("Deleted {deleted} completed jobs older than {days} days");
        }
        Commands::CancelJob { id } => {
            let queue = JobQueue::new(db, calendar);
            let previous = queue.cancel_job(id).await?;
            println!("Cancelled job {id} (was: {})", previous.as_str());
        }
        Commands::CancelPending => {
            let queue = JobQueue::new(db, calendar);
            let cancelled = queue.cancel_all_pending().await?;
            println!("Cancelled {cancelled} pending jobs");
        }
        Commands::Backfill { user, priority } => {
            let queue = JobQueue::new(db, calendar);
            match user {
                Some(user_id) => {
                    let added = queue.enqueue_user_gaps(&user_id, priority).await?;
                    println!("Queued {added} gap days for user {user_id}");
                }
                None => {
                    let report = queue.enqueue_all_gaps(priority).await?;
                    println!(
                        "Queued {} gap days across {} users",
                        report.jobs_added, report.users_affected
                    );
                }
            }
        }
        Commands::ActiveRuns { workflow } => {
            let tracker = RunTracker::new(db);
            let runs = tracker.query_active(workflow.as_deref()).await?;
            println!("{}", serde_json::to_string_pretty(&runs)?);
        }
        Commands::CancelRun { run_id } => {
            let tracker = RunTracker::new(db);
            tracker.cancel(&run_id).await?;
            println!("Run {run_id} cancelled");
        }
        Commands::TriggerDaily => {
            let scheduler = DailyScheduler::new(db, calendar, SchedulerConfig::default())?;
            let queued = scheduler.trigger_now().await?;
            println!("Queued {queued} journals for yesterday");
        }
    }

    Ok(())
}
