// Daily cron producer.
//
// Fires once per day (01:00 local by default), targets yesterday, and queues
// a journal job for every user with activity but no journal on that date.
// Idempotency rides entirely on the queue's (user, date) uniqueness
// constraint: re-running the procedure enqueues nothing new for users that
// are already queued.

use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration as ChronoDuration, Local};
use cron::Schedule;
use serde::Serialize;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::SchedulerConfig;
use crate::database::JobRepository;
use crate::error::ScribeError;
use crate::sources::ActivityCalendar;

/// Priority for scheduler-produced same-day jobs; above backfill so they are
/// processed first.
pub const DAILY_JOB_PRIORITY: i64 = 10;

const JOB_ID: &str = "daily_journal_enqueue";
const JOB_NAME: &str = "Daily Journal Queue Job";

#[derive(Debug, Clone, Serialize)]
pub struct SchedulerStatus {
    pub running: bool,
    pub job_id: &'static str,
    pub job_name: &'static str,
    pub next_run: Option<DateTime<Local>>,
}

pub struct DailyScheduler<D: JobRepository + 'static, C: ActivityCalendar + 'static> {
    db: Arc<D>,
    calendar: Arc<C>,
    schedule: Schedule,
    running: Arc<AtomicBool>,
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl<D: JobRepository, C: ActivityCalendar> DailyScheduler<D, C> {
    pub fn new(db: Arc<D>, calendar: Arc<C>, config: SchedulerConfig) -> anyhow::Result<Self> {
        let schedule =
            Schedule::from_str(&config.cron_expr).map_err(|source| ScribeError::InvalidCron {
                expr: config.cron_expr.clone(),
                source,
            })?;
        Ok(Self {
            db,
            calendar,
            schedule,
            running: Arc::new(AtomicBool::new(false)),
            handle: Mutex::new(None),
        })
    }

    /// Start the fire loop. No-op when already running.
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let db = Arc::clone(&self.db);
        let calendar = Arc::clone(&self.calendar);
        let schedule = self.schedule.clone();
        let running = Arc::clone(&self.running);

        let handle = tokio::spawn(async move {
            info!("journal scheduler started");
            while running.load(Ordering::SeqCst) {
                let now = Local::now();
                let Some(next) = schedule.after(&now).next() else {
                    error!("cron schedule yields no future fire time, stopping scheduler");
                    running.store(false, Ordering::SeqCst);
                    break;
                };
                let wait = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;

                if !running.load(Ordering::SeqCst) {
                    break;
                }
                if let Err(e) = daily_enqueue(db.as_ref(), calendar.as_ref()).await {
                    // A failed fire must not kill the schedule.
                    error!("daily journal job failed: {e:#}");
                }
            }
            info!("journal scheduler stopped");
        });

        *self.handle.lock().expect("scheduler handle lock") = Some(handle);
    }

    /// Stop the fire loop.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.handle.lock().expect("scheduler handle lock").take() {
            handle.abort();
        }
        info!("journal scheduler stopped");
    }

    pub fn status(&self) -> SchedulerStatus {
        SchedulerStatus {
            running: self.running.load(Ordering::SeqCst),
            job_id: JOB_ID,
            job_name: JOB_NAME,
            next_run: self.schedule.upcoming(Local).next(),
        }
    }

    /// Run the daily procedure synchronously regardless of the clock.
    /// Returns the number of newly queued jobs.
    pub async fn trigger_now(&self) -> anyhow::Result<usize> {
        info!("manual trigger: running daily journal job now");
        daily_enqueue(self.db.as_ref(), self.calendar.as_ref()).await
    }
}

async fn daily_enqueue<D: JobRepository, C: ActivityCalendar>(
    db: &D,
    calendar: &C,
) -> anyhow::Result<usize> {
    let target = Local::now().date_naive() - ChronoDuration::days(1);
    info!(%target, "daily journal job starting");

    let users = calendar.users_with_activity_no_journal(target).await?;
    if users.is_empty() {
        info!(%target, "no users need journals");
        return Ok(0);
    }

    let mut queued = 0;
    for user_id in &users {
        // The calendar already excludes synthetic ids; guard here as well so
        // a loose implementation cannot queue anonymous sessions.
        if user_id.starts_with("anon-") {
            continue;
        }
        if db.enqueue_job(user_id, target, DAILY_JOB_PRIORITY).await? {
            queued += 1;
        }
    }

    info!(%target, queued, "daily journal job queued users");
    Ok(queued)
}
