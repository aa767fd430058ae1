//! Recipient job system: delay queue, backoff schedule, clock and workers.
//!
//! ## Design
//!
//! - One job per recipient attempt; jobs carry ids only
//! - Time-ordered ready queue (`ready_at` min-heap) for immediate and delayed work
//! - At-least-once: claimed jobs are leased and redelivered unless acknowledged
//! - Retry timing comes from a fixed `BackoffSchedule`, not from the queue
//! - The clock is injected so delayed work is testable without sleeping
//!
//! ## Components
//!
//! - `RecipientJob`: queued unit of work
//! - `JobQueue`: enqueue / enqueue_after / claim_ready / ack
//! - `BackoffSchedule`: attempt count -> retry delay or give up
//! - `JobExecutor`: worker pool that drains the queue through a `JobHandler`

pub mod backoff;
pub mod clock;
pub mod executor;
pub mod queue;
pub mod types;

pub use backoff::{BackoffDecision, BackoffSchedule, ScheduleParseError};
pub use clock::{Clock, ManualClock, SystemClock};
pub use executor::{ExecutorStats, JobExecutor, JobExecutorConfig, JobExecutorHandle, JobHandler};
pub use queue::{InMemoryJobQueue, JobQueue, QueueError, QueueStats};
pub use types::{EnqueueReason, JobId, JobResult, RecipientJob};
