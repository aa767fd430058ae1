//! Worker pool that drains a job queue through a handler.

use std::io;
use std::sync::{Arc, Mutex, mpsc};
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, error, info, warn};

use super::queue::{JobQueue, QueueError};
use super::types::{JobResult, RecipientJob};

/// Handles one claimed job.
pub trait JobHandler: Send + Sync {
    fn handle(&self, job: &RecipientJob) -> JobResult;
}

impl<H: JobHandler + ?Sized> JobHandler for Arc<H> {
    fn handle(&self, job: &RecipientJob) -> JobResult {
        (**self).handle(job)
    }
}

/// Job executor configuration.
#[derive(Debug, Clone)]
pub struct JobExecutorConfig {
    /// How long an idle worker sleeps before polling again
    pub poll_interval: Duration,
    /// Number of worker threads
    pub workers: usize,
    /// Thread name prefix, also used in logs
    pub name: String,
}

impl Default for JobExecutorConfig {
    fn default() -> Self {
        Self {
            poll_interval: Duration::from_millis(250),
            workers: 4,
            name: "delivery-worker".to_string(),
        }
    }
}

impl JobExecutorConfig {
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_workers(mut self, workers: usize) -> Self {
        self.workers = workers.max(1);
        self
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }
}

/// Executor runtime statistics.
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct ExecutorStats {
    pub jobs_processed: u64,
    pub jobs_acked: u64,
    pub jobs_abandoned: u64,
    pub current_running: usize,
    pub uptime_secs: u64,
}

/// Handle to control a running worker pool.
#[derive(Debug)]
pub struct JobExecutorHandle {
    shutdown: Vec<mpsc::Sender<()>>,
    joins: Vec<thread::JoinHandle<()>>,
    stats: Arc<Mutex<ExecutorStats>>,
}

impl JobExecutorHandle {
    /// Request graceful shutdown and wait for in-flight jobs to finish.
    pub fn shutdown(self) {
        for tx in &self.shutdown {
            let _ = tx.send(());
        }
        for join in self.joins {
            let _ = join.join();
        }
    }

    /// Get current executor statistics.
    pub fn stats(&self) -> ExecutorStats {
        self.stats
            .lock()
            .map(|s| s.clone())
            .unwrap_or_default()
    }
}

/// Background job executor.
///
/// Each worker claims a ready job, runs the handler, and acknowledges the job
/// unless the handler abandoned it. Abandoned jobs come back after the queue's
/// visibility timeout.
pub struct JobExecutor<Q: JobQueue, H: JobHandler> {
    queue: Q,
    handler: H,
}

impl<Q, H> JobExecutor<Q, H>
where
    Q: JobQueue + 'static,
    H: JobHandler + 'static,
{
    pub fn new(queue: Q, handler: H) -> Self {
        Self { queue, handler }
    }

    /// Spawn `config.workers` threads sharing this executor.
    pub fn spawn(self, config: JobExecutorConfig) -> io::Result<JobExecutorHandle> {
        let executor = Arc::new(self);
        let stats = Arc::new(Mutex::new(ExecutorStats::default()));
        let mut shutdown = Vec::with_capacity(config.workers);
        let mut joins = Vec::with_capacity(config.workers);

        for n in 0..config.workers.max(1) {
            let (tx, rx) = mpsc::channel::<()>();
            let executor = executor.clone();
            let config = config.clone();
            let stats = stats.clone();
            let name = format!("{}-{n}", config.name);

            let join = thread::Builder::new()
                .name(name.clone())
                .spawn(move || executor_loop(&executor, &name, &config, rx, &stats))?;

            shutdown.push(tx);
            joins.push(join);
        }

        Ok(JobExecutorHandle {
            shutdown,
            joins,
            stats,
        })
    }

    /// Claim and run one ready job on the calling thread.
    ///
    /// Returns `Ok(false)` when nothing was ready.
    pub fn run_once(&self) -> Result<bool, QueueError> {
        let Some(job) = self.queue.claim_ready()? else {
            return Ok(false);
        };
        self.execute(&job)?;
        Ok(true)
    }

    /// Run every job that is ready right now, including ones that become
    /// ready immediately as a result. Returns the number of jobs run.
    pub fn drain(&self) -> Result<usize, QueueError> {
        let mut count = 0;
        while self.run_once()? {
            count += 1;
        }
        Ok(count)
    }

    fn execute(&self, job: &RecipientJob) -> Result<JobResult, QueueError> {
        let result = self.handler.handle(job);
        match &result {
            JobResult::Done => self.queue.ack(job.id)?,
            JobResult::Abandon(reason) => {
                warn!(job_id = %job.id, recipient_id = %job.recipient_id, error = %reason, "job abandoned, awaiting redelivery");
            }
        }
        Ok(result)
    }
}

fn executor_loop<Q, H>(
    executor: &JobExecutor<Q, H>,
    name: &str,
    config: &JobExecutorConfig,
    shutdown_rx: mpsc::Receiver<()>,
    stats: &Mutex<ExecutorStats>,
) where
    Q: JobQueue + 'static,
    H: JobHandler + 'static,
{
    info!(executor = %name, "job executor started");
    let start_time = Instant::now();

    loop {
        // Check for shutdown
        if shutdown_rx.try_recv().is_ok() {
            break;
        }

        if let Ok(mut s) = stats.lock() {
            s.uptime_secs = start_time.elapsed().as_secs();
        }

        match executor.queue.claim_ready() {
            Ok(Some(job)) => {
                debug!(
                    executor = %name,
                    job_id = %job.id,
                    recipient_id = %job.recipient_id,
                    reason = ?job.reason,
                    "claimed job"
                );

                if let Ok(mut s) = stats.lock() {
                    s.current_running += 1;
                }

                let result = executor.execute(&job);

                if let Ok(mut s) = stats.lock() {
                    s.current_running = s.current_running.saturating_sub(1);
                    s.jobs_processed += 1;
                    match result {
                        Ok(JobResult::Done) => s.jobs_acked += 1,
                        Ok(JobResult::Abandon(_)) | Err(_) => s.jobs_abandoned += 1,
                    }
                }
            }
            Ok(None) => {
                // Nothing ready; wait for a shutdown signal or the next poll.
                if shutdown_rx.recv_timeout(config.poll_interval).is_ok() {
                    break;
                }
            }
            Err(e) => {
                error!(executor = %name, error = %e, "failed to claim job");
                thread::sleep(config.poll_interval);
            }
        }
    }

    info!(executor = %name, "job executor stopped");
}
