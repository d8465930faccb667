//! Mailcast error taxonomy.
//!
//! Validation errors (`InvalidPattern`, `InvalidSchedule`) surface to the
//! caller before any state mutation. `Send` is the per-recipient, retryable
//! kind; `Transport` is fatal to the whole job. `Persistence` failures are
//! retried once by the engine and then logged, never propagated into a hang.

use thiserror::Error;

/// All errors produced by Mailcast components.
#[derive(Debug, Error)]
pub enum MailcastError {
    /// One-shot schedule timestamp is not in the future.
    #[error("invalid schedule: {0}")]
    InvalidSchedule(String),

    /// Malformed cron recurrence expression.
    #[error("invalid cron pattern: {0}")]
    InvalidPattern(String),

    #[error("campaign not found: {0}")]
    CampaignNotFound(String),

    #[error("job not found: {0}")]
    JobNotFound(String),

    /// The recipient source yielded no rows with a syntactically valid email.
    #[error("no valid recipients in source")]
    NoValidRecipients,

    /// Transport could not be constructed — fatal to the job, zero sends.
    #[error("transport error: {0}")]
    Transport(String),

    /// A single send attempt failed — retried, then isolated per recipient.
    #[error("send error: {0}")]
    Send(String),

    /// Durable store read/write failure.
    #[error("persistence error: {0}")]
    Persistence(String),

    /// A firing overlapped a still-active job and was skipped.
    #[error("concurrent execution skipped: {0}")]
    ConcurrentExecutionSkipped(String),

    /// Recipient source could not be read.
    #[error("recipient source error: {0}")]
    Source(String),

    #[error("resource not found: {0}")]
    ResourceNotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, MailcastError>;
