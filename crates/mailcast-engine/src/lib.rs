//! # Mailcast Engine
//!
//! The scheduling and dispatch core: turns a stored campaign definition
//! into a correctly-timed, rate-limited, cancellable, restart-safe bulk
//! send.
//!
//! ## Architecture
//! ```text
//! Scheduler
//!   ├── Trigger: Recurring("0 9 * * *") — cron-evaluated tokio task
//!   ├── Trigger: OneTime(2026-08-12 15:00) — one-shot delay task
//!   └── on fire → overlap check → build Job → Dispatch
//!
//! Dispatch (one task per Job)
//!   resolve cid assets → per recipient: stop-check → render → send
//!   (≤2 retries, 1s backoff) → update registry → rate-limit sleep
//!   → persist final counters + campaign status
//!
//! JobRegistry
//!   process-wide table of in-flight jobs: progress counters,
//!   cooperative stop flags, completion state
//! ```

pub mod cron;
pub mod dispatch;
pub mod registry;
pub mod render;
pub mod scheduler;

#[cfg(test)]
pub(crate) mod testutil;

pub use cron::CronSchedule;
pub use dispatch::Dispatcher;
pub use registry::{Job, JobRegistry, JobSnapshot};
pub use scheduler::{ScheduleStatus, Scheduler, TriggerKind};
