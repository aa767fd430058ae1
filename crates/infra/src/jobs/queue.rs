//! Recipient job queue: immediate and delayed enqueue, leased claims.

use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashMap};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tracing::debug;

use super::clock::Clock;
use super::types::{JobId, RecipientJob};

/// Job queue abstraction.
///
/// Delivery is at-least-once: a claimed job that is not acknowledged within
/// the queue's visibility timeout becomes claimable again.
pub trait JobQueue: Send + Sync {
    /// Make `job` ready now.
    fn enqueue(&self, job: RecipientJob) -> Result<JobId, QueueError>;

    /// Make `job` ready after `delay`.
    fn enqueue_after(&self, job: RecipientJob, delay: Duration) -> Result<JobId, QueueError>;

    /// Claim the earliest job whose ready time has passed, if any.
    fn claim_ready(&self) -> Result<Option<RecipientJob>, QueueError>;

    /// Acknowledge a claimed job. Unknown or already-acked ids are ignored.
    fn ack(&self, job_id: JobId) -> Result<(), QueueError>;

    fn stats(&self) -> Result<QueueStats, QueueError>;
}

/// Queue error.
#[derive(Debug, Clone, thiserror::Error)]
pub enum QueueError {
    #[error("queue unavailable: {0}")]
    Unavailable(String),
}

/// Queue statistics.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize)]
pub struct QueueStats {
    /// Ready now.
    pub ready: usize,
    /// Waiting for a future ready time.
    pub scheduled: usize,
    pub in_flight: usize,
    pub enqueued_total: u64,
    pub acked_total: u64,
    pub redelivered_total: u64,
}

#[derive(Debug)]
struct Scheduled {
    ready_at: DateTime<Utc>,
    seq: u64,
    job: RecipientJob,
}

impl PartialEq for Scheduled {
    fn eq(&self, other: &Self) -> bool {
        self.ready_at == other.ready_at && self.seq == other.seq
    }
}

impl Eq for Scheduled {}

impl PartialOrd for Scheduled {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Scheduled {
    fn cmp(&self, other: &Self) -> Ordering {
        (self.ready_at, self.seq).cmp(&(other.ready_at, other.seq))
    }
}

#[derive(Debug)]
struct Lease {
    job: RecipientJob,
    deadline: DateTime<Utc>,
}

#[derive(Debug, Default)]
struct QueueState {
    /// Min-heap on `(ready_at, seq)`; `seq` keeps FIFO order for equal times.
    pending: BinaryHeap<Reverse<Scheduled>>,
    leased: HashMap<JobId, Lease>,
    seq: u64,
    enqueued_total: u64,
    acked_total: u64,
    redelivered_total: u64,
}

impl QueueState {
    fn push(&mut self, job: RecipientJob, ready_at: DateTime<Utc>) {
        self.seq += 1;
        self.pending.push(Reverse(Scheduled {
            ready_at,
            seq: self.seq,
            job,
        }));
    }

    fn reclaim_expired(&mut self, now: DateTime<Utc>) {
        let expired: Vec<JobId> = self
            .leased
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(id, _)| *id)
            .collect();
        for id in expired {
            if let Some(lease) = self.leased.remove(&id) {
                debug!(job_id = %id, recipient_id = %lease.job.recipient_id, "lease expired, redelivering");
                self.redelivered_total += 1;
                self.push(lease.job, now);
            }
        }
    }
}

/// In-memory delay queue for tests/dev and single-process deployments.
///
/// Jobs are lost on restart; the controller's resume sweep re-enqueues
/// every QUEUED recipient, so a restart only needs a pause/resume.
pub struct InMemoryJobQueue {
    clock: Arc<dyn Clock>,
    visibility_timeout: chrono::Duration,
    state: Mutex<QueueState>,
}

impl InMemoryJobQueue {
    pub fn new(clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Self {
        Self {
            clock,
            visibility_timeout: chrono::Duration::from_std(visibility_timeout)
                .unwrap_or_else(|_| chrono::Duration::days(365)),
            state: Mutex::new(QueueState::default()),
        }
    }

    pub fn arc(clock: Arc<dyn Clock>, visibility_timeout: Duration) -> Arc<Self> {
        Arc::new(Self::new(clock, visibility_timeout))
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, QueueState>, QueueError> {
        self.state
            .lock()
            .map_err(|_| QueueError::Unavailable("queue lock poisoned".into()))
    }

    fn schedule(&self, job: RecipientJob, delay: Duration) -> Result<JobId, QueueError> {
        let delay = chrono::Duration::from_std(delay)
            .map_err(|e| QueueError::Unavailable(format!("delay out of range: {e}")))?;
        let ready_at = self.clock.now() + delay;
        let id = job.id;
        let mut state = self.lock()?;
        state.enqueued_total += 1;
        state.push(job, ready_at);
        debug!(job_id = %id, %ready_at, "job enqueued");
        Ok(id)
    }
}

impl JobQueue for InMemoryJobQueue {
    fn enqueue(&self, job: RecipientJob) -> Result<JobId, QueueError> {
        self.schedule(job, Duration::ZERO)
    }

    fn enqueue_after(&self, job: RecipientJob, delay: Duration) -> Result<JobId, QueueError> {
        self.schedule(job, delay)
    }

    fn claim_ready(&self) -> Result<Option<RecipientJob>, QueueError> {
        let now = self.clock.now();
        let mut state = self.lock()?;
        state.reclaim_expired(now);

        let due = state
            .pending
            .peek()
            .is_some_and(|Reverse(top)| top.ready_at <= now);
        if !due {
            return Ok(None);
        }
        let Some(Reverse(next)) = state.pending.pop() else {
            return Ok(None);
        };

        let job = next.job;
        state.leased.insert(
            job.id,
            Lease {
                job: job.clone(),
                deadline: now + self.visibility_timeout,
            },
        );
        Ok(Some(job))
    }

    fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        let mut state = self.lock()?;
        if state.leased.remove(&job_id).is_some() {
            state.acked_total += 1;
        }
        Ok(())
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        let now = self.clock.now();
        let state = self.lock()?;
        let ready = state
            .pending
            .iter()
            .filter(|Reverse(s)| s.ready_at <= now)
            .count();
        Ok(QueueStats {
            ready,
            scheduled: state.pending.len() - ready,
            in_flight: state.leased.len(),
            enqueued_total: state.enqueued_total,
            acked_total: state.acked_total,
            redelivered_total: state.redelivered_total,
        })
    }
}

impl<Q: JobQueue + ?Sized> JobQueue for Arc<Q> {
    fn enqueue(&self, job: RecipientJob) -> Result<JobId, QueueError> {
        (**self).enqueue(job)
    }

    fn enqueue_after(&self, job: RecipientJob, delay: Duration) -> Result<JobId, QueueError> {
        (**self).enqueue_after(job, delay)
    }

    fn claim_ready(&self) -> Result<Option<RecipientJob>, QueueError> {
        (**self).claim_ready()
    }

    fn ack(&self, job_id: JobId) -> Result<(), QueueError> {
        (**self).ack(job_id)
    }

    fn stats(&self) -> Result<QueueStats, QueueError> {
        (**self).stats()
    }
}
