// Background queue consumer.
//
// Single-concurrency by design: the queue's priority/FIFO ordering is only
// meaningful with one active consumer, and the step executor fronts a
// rate-limited AI backend. A failing job never stops the loop; a failing
// store call makes the loop back off and retry forever.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{error, info};
use uuid::Uuid;

use crate::config::WorkerConfig;
use crate::database::JobRepository;
use crate::executor::StepExecutor;
use crate::models::{ProgressMap, QueueJob, QueueStats, Scalar};

#[derive(Debug, Clone, Serialize)]
pub struct WorkerStatus {
    pub running: bool,
    pub current_job_id: Option<i64>,
    pub jobs_processed: u64,
    pub jobs_failed: u64,
    pub queue_stats: QueueStats,
}

struct WorkerInner<D> {
    db: Arc<D>,
    executor: Arc<dyn StepExecutor>,
    config: WorkerConfig,
    running: AtomicBool,
    current_job: Mutex<Option<i64>>,
    jobs_processed: AtomicU64,
    jobs_failed: AtomicU64,
}

pub struct Worker<D: JobRepository + 'static> {
    inner: Arc<WorkerInner<D>>,
}

impl<D: JobRepository + 'static> Worker<D> {
    pub fn new(db: Arc<D>, executor: Arc<dyn StepExecutor>, config: WorkerConfig) -> Self {
        Self {
            inner: Arc::new(WorkerInner {
                db,
                executor,
                config,
                running: AtomicBool::new(false),
                current_job: Mutex::new(None),
                jobs_processed: AtomicU64::new(0),
                jobs_failed: AtomicU64::new(0),
            }),
        }
    }

    /// Spawn the consumption loop. A second call while the loop is alive is
    /// a no-op; the queue has exactly one consumer.
    pub fn start(&self) -> JoinHandle<()> {
        if self.inner.running.swap(true, Ordering::SeqCst) {
            return tokio::spawn(async {});
        }
        let inner = Arc::clone(&self.inner);
        tokio::spawn(async move {
            info!("journal worker started");
            while inner.running.load(Ordering::SeqCst) {
                if let Err(e) = Self::process_next(&inner).await {
                    // Store unreachable or similar: log, back off, keep going.
                    error!("worker loop error: {e:#}");
                    sleep(inner.config.idle_interval).await;
                }
            }
            info!("journal worker stopped");
        })
    }

    /// Request a graceful stop; takes effect at the next loop turn.
    pub fn stop(&self) {
        info!("stopping journal worker");
        self.inner.running.store(false, Ordering::SeqCst);
    }

    pub async fn status(&self) -> anyhow::Result<WorkerStatus> {
        let queue_stats = self.inner.db.queue_stats().await?;
        Ok(WorkerStatus {
            running: self.inner.running.load(Ordering::SeqCst),
            current_job_id: *self.inner.current_job.lock().expect("worker state lock"),
            jobs_processed: self.inner.jobs_processed.load(Ordering::SeqCst),
            jobs_failed: self.inner.jobs_failed.load(Ordering::SeqCst),
            queue_stats,
        })
    }

    async fn process_next(inner: &Arc<WorkerInner<D>>) -> anyhow::Result<()> {
        let Some(job) = inner.db.next_pending_job().await? else {
            sleep(inner.config.idle_interval).await;
            return Ok(());
        };

        *inner.current_job.lock().expect("worker state lock") = Some(job.id);
        info!(
            job_id = job.id,
            user_id = %job.user_id,
            target_date = %job.target_date,
            "processing journal job"
        );

        inner.db.mark_job_processing(job.id).await?;
        let result = Self::execute_job(inner, &job).await;
        *inner.current_job.lock().expect("worker state lock") = None;
        result?;

        // Deliberate pacing between jobs.
        sleep(inner.config.pacing_interval).await;
        Ok(())
    }

    async fn execute_job(inner: &Arc<WorkerInner<D>>, job: &QueueJob) -> anyhow::Result<()> {
        let run_id = Uuid::new_v4().to_string();
        let params = ProgressMap::from([(
            "target_date".to_string(),
            Scalar::Text(job.target_date.to_string()),
        )]);

        // The executor runs in its own task so a panic lands here as a
        // JoinError and is recorded on the job instead of killing the loop.
        let executor = Arc::clone(&inner.executor);
        let user_id = job.user_id.clone();
        let handle =
            tokio::spawn(async move { executor.execute(&user_id, &params, &run_id).await });

        match handle.await {
            Err(join_error) => {
                let error = format!("executor aborted: {join_error}");
                inner.db.mark_job_failed(job.id, &error).await?;
                inner.jobs_failed.fetch_add(1, Ordering::SeqCst);
                error!(job_id = job.id, error = %error, "journal job aborted");
            }
            Ok(Ok(outcome)) if outcome.success => {
                inner.db.mark_job_completed(job.id).await?;
                inner.jobs_processed.fetch_add(1, Ordering::SeqCst);
                info!(job_id = job.id, "journal job completed");
            }
            Ok(Ok(outcome)) => {
                let error = outcome.error.unwrap_or_else(|| "unknown error".to_string());
                inner.db.mark_job_failed(job.id, &error).await?;
                inner.jobs_failed.fetch_add(1, Ordering::SeqCst);
                error!(job_id = job.id, error = %error, "journal job failed");
            }
            Ok(Err(e)) => {
                let error = format!("{e:#}");
                inner.db.mark_job_failed(job.id, &error).await?;
                inner.jobs_failed.fetch_add(1, Ordering::SeqCst);
                error!(job_id = job.id, error = %error, "journal job raised");
            }
        }
        Ok(())
    }
}
