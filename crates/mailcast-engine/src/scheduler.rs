//! Scheduler — owns trigger lifecycle for campaigns.
//!
//! Each armed trigger is an independent tokio task that sleeps until its
//! fire time (no polling). Firing consults the job registry first: a
//! campaign with an active job skips the firing rather than overlapping
//! it. At startup, `reconcile_on_startup` rebuilds triggers from the
//! durable store; stale one-shot schedules are cleared, never fired
//! retroactively.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, FixedOffset, Offset, Utc};
use serde::Serialize;

use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{CampaignStore, RecipientSource};
use mailcast_core::types::{CampaignStatus, Recipient, Schedule};

use crate::cron::CronSchedule;
use crate::dispatch::{Dispatcher, SendJob};
use crate::registry::{Job, JobRegistry};

/// What kind of trigger is armed for a campaign.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "snake_case", tag = "mode")]
pub enum TriggerKind {
    Recurring { pattern: String },
    OneTime { at: DateTime<Utc> },
}

struct Trigger {
    kind: TriggerKind,
    handle: tokio::task::JoinHandle<()>,
}

/// Armed-trigger view merged with the durable record, for drift detection.
#[derive(Debug, Clone, Serialize)]
pub struct ScheduleStatus {
    pub campaign_id: String,
    pub is_scheduled: bool,
    pub trigger_armed: bool,
    #[serde(flatten)]
    pub trigger: Option<TriggerKind>,
    pub next_fire_time: Option<DateTime<Utc>>,
    pub execution_count: u32,
    pub last_executed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Everything a trigger task needs at fire time — cloned into each
/// spawned timer so triggers never hold a reference back to the
/// scheduler itself.
#[derive(Clone)]
struct FireContext {
    store: Arc<dyn CampaignStore>,
    registry: Arc<JobRegistry>,
    recipients: Arc<dyn RecipientSource>,
    dispatcher: Dispatcher,
    triggers: Arc<Mutex<HashMap<String, Trigger>>>,
}

/// The scheduler — arms, fires, and destroys campaign triggers.
pub struct Scheduler {
    store: Arc<dyn CampaignStore>,
    registry: Arc<JobRegistry>,
    recipients: Arc<dyn RecipientSource>,
    dispatcher: Dispatcher,
    triggers: Arc<Mutex<HashMap<String, Trigger>>>,
}

impl Scheduler {
    pub fn new(
        store: Arc<dyn CampaignStore>,
        registry: Arc<JobRegistry>,
        recipients: Arc<dyn RecipientSource>,
        dispatcher: Dispatcher,
    ) -> Arc<Self> {
        Arc::new(Self {
            store,
            registry,
            recipients,
            dispatcher,
            triggers: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    pub fn registry(&self) -> &Arc<JobRegistry> {
        &self.registry
    }

    fn context(&self) -> FireContext {
        FireContext {
            store: Arc::clone(&self.store),
            registry: Arc::clone(&self.registry),
            recipients: Arc::clone(&self.recipients),
            dispatcher: self.dispatcher.clone(),
            triggers: Arc::clone(&self.triggers),
        }
    }

    /// Arm a recurring cron trigger. Re-scheduling an already-scheduled
    /// campaign replaces the prior trigger — no duplicate firings.
    pub fn schedule_recurring(
        &self,
        campaign_id: &str,
        pattern: &str,
        timezone: Option<&str>,
    ) -> Result<()> {
        let cron = CronSchedule::parse(pattern)?;
        self.store.get(campaign_id)?;
        let offset = parse_offset(timezone);

        self.store
            .set_scheduled_recurring(campaign_id, pattern, timezone)?;
        self.arm_recurring(campaign_id, cron, pattern.to_string(), offset);
        tracing::info!("📅 Recurring trigger armed for campaign {campaign_id}: '{pattern}'");
        Ok(())
    }

    /// Arm a one-shot trigger for an absolute time. Fails with
    /// `InvalidSchedule` — leaving the campaign untouched — when the
    /// timestamp is not in the future.
    pub fn schedule_one_time(
        &self,
        campaign_id: &str,
        at: DateTime<Utc>,
        timezone: Option<&str>,
    ) -> Result<()> {
        self.store.get(campaign_id)?;
        let now = Utc::now();
        if at <= now {
            return Err(MailcastError::InvalidSchedule(format!(
                "scheduled time {} is in the past",
                at.to_rfc3339()
            )));
        }

        self.store.set_scheduled_once(campaign_id, at, timezone)?;
        self.arm_one_time(campaign_id, at);
        tracing::info!(
            "⏰ One-time trigger armed for campaign {campaign_id} at {} ({}s from now)",
            at.to_rfc3339(),
            (at - now).num_seconds()
        );
        Ok(())
    }

    /// Destroy any trigger for the campaign and revert it to draft.
    /// Success when no trigger exists — unscheduling is idempotent.
    pub fn unschedule(&self, campaign_id: &str) -> Result<()> {
        if let Some(old) = self.triggers.lock().unwrap().remove(campaign_id) {
            old.handle.abort();
            tracing::info!("🗑️ Trigger destroyed for campaign {campaign_id}");
        }
        self.store.set_unscheduled(campaign_id)?;
        Ok(())
    }

    /// Bypass timing: build and run a job for the campaign right now.
    pub async fn execute_now(&self, campaign_id: &str) -> Result<String> {
        if let Some(active) = self.registry.active_job_for(campaign_id) {
            tracing::warn!(
                "⏭️ Concurrent execution skipped for campaign {campaign_id} (job {} active)",
                active.id
            );
            return Err(MailcastError::ConcurrentExecutionSkipped(format!(
                "campaign {campaign_id} already has an active job ({})",
                active.id
            )));
        }
        start_job(&self.context(), campaign_id).await
    }

    /// Rebuild triggers from the durable store after a restart.
    pub fn reconcile_on_startup(&self) -> Result<usize> {
        let scheduled = self.store.list_scheduled()?;
        let mut armed = 0;
        let now = Utc::now();

        for campaign in &scheduled {
            match campaign.schedule() {
                Schedule::Recurring(pattern) => match CronSchedule::parse(&pattern) {
                    Ok(cron) => {
                        let offset = parse_offset(campaign.timezone.as_deref());
                        self.arm_recurring(&campaign.id, cron, pattern.clone(), offset);
                        armed += 1;
                        tracing::info!(
                            "🔄 Re-armed recurring trigger for campaign {}: '{pattern}'",
                            campaign.id
                        );
                    }
                    Err(e) => {
                        tracing::warn!(
                            "⚠️ Campaign {} has an unusable stored pattern: {e}",
                            campaign.id
                        );
                        self.store.set_unscheduled(&campaign.id).ok();
                    }
                },
                Schedule::OneTime(at) if at > now => {
                    self.arm_one_time(&campaign.id, at);
                    armed += 1;
                    tracing::info!(
                        "🔄 Re-armed one-time trigger for campaign {} at {}",
                        campaign.id,
                        at.to_rfc3339()
                    );
                }
                Schedule::OneTime(at) => {
                    // Fire time passed while the process was down. Do not
                    // fire retroactively — clear the schedule instead.
                    tracing::warn!(
                        "⚠️ Campaign {} scheduled_at {} already passed — reverting to draft",
                        campaign.id,
                        at.to_rfc3339()
                    );
                    self.store.set_unscheduled(&campaign.id).ok();
                }
                Schedule::None => {
                    tracing::warn!(
                        "⚠️ Campaign {} is marked scheduled but has no schedule — clearing",
                        campaign.id
                    );
                    self.store.set_unscheduled(&campaign.id).ok();
                }
            }
        }

        tracing::info!("✅ Reconciliation armed {armed} trigger(s) from {} scheduled campaign(s)", scheduled.len());
        Ok(armed)
    }

    /// Armed-trigger view for a campaign, independent of the durable
    /// record so drift between the two is visible.
    pub fn schedule_status(&self, campaign_id: &str) -> Result<ScheduleStatus> {
        let campaign = self.store.get(campaign_id)?;
        let triggers = self.triggers.lock().unwrap();
        let trigger = triggers.get(campaign_id);

        let next_fire_time = trigger.and_then(|t| match &t.kind {
            TriggerKind::OneTime { at } => Some(*at),
            TriggerKind::Recurring { pattern } => CronSchedule::parse(pattern)
                .ok()?
                .next_after(Utc::now(), parse_offset(campaign.timezone.as_deref())),
        });

        Ok(ScheduleStatus {
            campaign_id: campaign_id.to_string(),
            is_scheduled: campaign.is_scheduled,
            trigger_armed: trigger.is_some(),
            trigger: trigger.map(|t| t.kind.clone()),
            next_fire_time,
            execution_count: campaign.execution_count,
            last_executed: campaign.last_executed,
            last_error: campaign.last_error,
        })
    }

    /// Request stop on every active job of the campaign and mark it
    /// paused. Returns how many jobs were signalled.
    pub fn pause_campaign(&self, campaign_id: &str) -> Result<usize> {
        self.store.get(campaign_id)?;
        let signalled = self.registry.request_stop_for_campaign(campaign_id);
        self.store.set_status(campaign_id, CampaignStatus::Paused)?;
        tracing::info!("⏸️ Campaign {campaign_id} paused; {signalled} active job(s) signalled");
        Ok(signalled)
    }

    /// Abort all armed triggers (process shutdown). Recurring triggers
    /// are recreated by reconciliation at next startup.
    pub fn shutdown(&self) {
        let mut triggers = self.triggers.lock().unwrap();
        let count = triggers.len();
        for (_, trigger) in triggers.drain() {
            trigger.handle.abort();
        }
        tracing::info!("🧹 Scheduler shut down; {count} trigger(s) destroyed");
    }

    // ─── Internals ──────────────────────────────────────

    fn arm_recurring(
        &self,
        campaign_id: &str,
        cron: CronSchedule,
        pattern: String,
        offset: FixedOffset,
    ) {
        let ctx = self.context();
        let id = campaign_id.to_string();
        let handle = tokio::spawn(async move {
            loop {
                let now = Utc::now();
                let Some(next) = cron.next_after(now, offset) else {
                    tracing::warn!("⚠️ Pattern for campaign {id} has no future fire time — trigger idle");
                    break;
                };
                let delay = (next - now).to_std().unwrap_or_default();
                tokio::time::sleep(delay).await;
                fire(&ctx, &id).await;
            }
        });
        self.install_trigger(campaign_id, TriggerKind::Recurring { pattern }, handle);
    }

    fn arm_one_time(&self, campaign_id: &str, at: DateTime<Utc>) {
        let ctx = self.context();
        let id = campaign_id.to_string();
        let handle = tokio::spawn(async move {
            let delay = (at - Utc::now()).to_std().unwrap_or_default();
            tokio::time::sleep(delay).await;
            fire(&ctx, &id).await;
            // One-shot triggers are discarded after firing.
            ctx.triggers.lock().unwrap().remove(&id);
        });
        self.install_trigger(campaign_id, TriggerKind::OneTime { at }, handle);
    }

    /// Atomically replace any prior trigger for the campaign.
    fn install_trigger(&self, campaign_id: &str, kind: TriggerKind, handle: tokio::task::JoinHandle<()>) {
        let mut triggers = self.triggers.lock().unwrap();
        if let Some(old) = triggers.insert(campaign_id.to_string(), Trigger { kind, handle }) {
            old.handle.abort();
        }
    }
}

/// Trigger fire path: overlap guard, then job construction + dispatch.
async fn fire(ctx: &FireContext, campaign_id: &str) {
    if let Some(active) = ctx.registry.active_job_for(campaign_id) {
        tracing::warn!(
            "⏭️ Concurrent execution skipped: campaign {campaign_id} job {} still active",
            active.id
        );
        return;
    }

    match start_job(ctx, campaign_id).await {
        Ok(job_id) => {
            tracing::info!("🔔 Trigger fired for campaign {campaign_id} → job {job_id}");
        }
        Err(e) => {
            tracing::error!("❌ Trigger fire failed for campaign {campaign_id}: {e}");
            // Recurring campaigns stay armed for the next tick; one-shot
            // campaigns go terminal.
            let status = match ctx.store.get(campaign_id) {
                Ok(c) if c.is_recurring() => CampaignStatus::Scheduled,
                _ => CampaignStatus::Failed,
            };
            ctx.store
                .record_error(campaign_id, status, &e.to_string())
                .ok();
        }
    }
}

/// Build a job from the current campaign definition and hand it to the
/// dispatcher on its own task — the trigger timer is never blocked by a
/// running send.
async fn start_job(ctx: &FireContext, campaign_id: &str) -> Result<String> {
    let campaign = ctx.store.get(campaign_id)?;
    let rows = ctx.recipients.fetch(&campaign.recipient_source).await?;
    let eligible: Vec<Recipient> = rows
        .into_iter()
        .filter(|r| r.has_valid_email(&campaign.email_column))
        .collect();
    if eligible.is_empty() {
        return Err(MailcastError::NoValidRecipients);
    }

    ctx.registry.reap_terminal_for_campaign(campaign_id);
    let job = Job::new(campaign_id, eligible.len() as u32);
    let job_id = job.id.clone();
    ctx.registry.register(job);

    let dispatcher = ctx.dispatcher.clone();
    let send_job = SendJob {
        job_id: job_id.clone(),
        campaign,
        recipients: eligible,
    };
    tokio::spawn(async move {
        dispatcher.run(send_job).await;
    });
    Ok(job_id)
}

/// Parse a timezone given as a fixed UTC offset ("+05:30", "-0800",
/// "UTC"). Anything unparseable falls back to UTC with a warning.
pub fn parse_offset(timezone: Option<&str>) -> FixedOffset {
    let utc = Utc.fix();
    let Some(tz) = timezone else { return utc };
    let tz = tz.trim();
    if tz.is_empty() || tz.eq_ignore_ascii_case("utc") || tz.eq_ignore_ascii_case("z") {
        return utc;
    }

    let (sign, rest) = match tz.as_bytes()[0] {
        b'+' => (1, &tz[1..]),
        b'-' => (-1, &tz[1..]),
        _ => (1, tz),
    };
    let (hours, minutes) = if let Some((h, m)) = rest.split_once(':') {
        (h.parse::<i32>().ok(), m.parse::<i32>().ok())
    } else if rest.len() == 4 {
        (rest[..2].parse::<i32>().ok(), rest[2..].parse::<i32>().ok())
    } else {
        (rest.parse::<i32>().ok(), Some(0))
    };

    match (hours, minutes) {
        (Some(h), Some(m)) if h <= 14 && m < 60 => {
            FixedOffset::east_opt(sign * (h * 3600 + m * 60)).unwrap_or(utc)
        }
        _ => {
            tracing::warn!("⚠️ Unparseable timezone '{tz}' — falling back to UTC");
            utc
        }
    }
}
