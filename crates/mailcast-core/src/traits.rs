//! Collaborator traits — the seams between the engine and the outside
//! world. Production implementations live in mailcast-smtp and
//! mailcast-store; tests substitute in-memory fakes.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::types::{Campaign, CampaignStatus, Recipient, RenderedEmail, RunOutcome};

/// Sends one rendered message to one address.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, email: &RenderedEmail) -> Result<()>;
}

/// Builds a fresh transport for each job. A construction failure is fatal
/// to the job before any send is attempted.
pub trait TransportFactory: Send + Sync {
    fn create(&self) -> Result<Box<dyn Transport>>;
}

/// Maps an embedded-content identifier found in a template (`cid:logo`)
/// to its byte payload.
#[async_trait]
pub trait ResourceResolver: Send + Sync {
    async fn resolve(&self, id: &str) -> Result<Vec<u8>>;
}

/// Yields the recipient rows for a campaign's recipient-source reference.
/// Parsing/ingestion of the underlying source is outside the engine.
#[async_trait]
pub trait RecipientSource: Send + Sync {
    async fn fetch(&self, source_ref: &str) -> Result<Vec<Recipient>>;
}

/// Transactional access to the durable campaign record.
///
/// All counter updates are additive on the store side — callers pass
/// deltas, never recomputed totals, so concurrent executions and process
/// restarts cannot resurrect stale counts.
pub trait CampaignStore: Send + Sync {
    fn get(&self, id: &str) -> Result<Campaign>;

    fn insert(&self, campaign: &Campaign) -> Result<()>;

    /// All campaigns with status=scheduled, for startup reconciliation.
    fn list_scheduled(&self) -> Result<Vec<Campaign>>;

    /// Persist a recurring schedule: status=scheduled, is_scheduled=true,
    /// schedule_pattern set, scheduled_at cleared.
    fn set_scheduled_recurring(
        &self,
        id: &str,
        pattern: &str,
        timezone: Option<&str>,
    ) -> Result<()>;

    /// Persist a one-shot schedule: status=scheduled, is_scheduled=true,
    /// scheduled_at set, schedule_pattern cleared.
    fn set_scheduled_once(
        &self,
        id: &str,
        at: DateTime<Utc>,
        timezone: Option<&str>,
    ) -> Result<()>;

    /// Revert to draft and clear both schedule columns.
    fn set_unscheduled(&self, id: &str) -> Result<()>;

    /// Job started: status=sending, last_executed=now.
    fn mark_sending(&self, id: &str, at: DateTime<Utc>) -> Result<()>;

    /// Interim counter flush — additive.
    fn apply_progress(&self, id: &str, sent_delta: u32, failed_delta: u32) -> Result<()>;

    /// Final run outcome — additive counters, execution_count + 1, status
    /// transition, all in one transaction.
    fn apply_run(&self, id: &str, outcome: &RunOutcome) -> Result<()>;

    /// Record a failure status + last_error without touching counters.
    fn record_error(&self, id: &str, status: CampaignStatus, error: &str) -> Result<()>;

    fn set_status(&self, id: &str, status: CampaignStatus) -> Result<()>;
}
