//! Dispatch engine — drives exactly one job's recipient list to
//! completion or cancellation.
//!
//! Per recipient, strictly in input order: stop-check → render → send
//! with bounded retry → counter update → rate-limit sleep. A single
//! recipient's failure never aborts the job; cancellation is honored
//! between sends, never mid-send.

use std::sync::Arc;

use chrono::Utc;
use mailcast_core::error::Result;
use mailcast_core::traits::{CampaignStore, ResourceResolver, Transport, TransportFactory};
use mailcast_core::types::{Campaign, CampaignStatus, InlineResource, Recipient, RenderedEmail, RunOutcome};

use crate::registry::JobRegistry;
use crate::render;

/// Transient send failures are retried this many times per recipient.
const SEND_RETRIES: u32 = 2;
/// Fixed backoff between retries — independent of the rate-limit delay.
const RETRY_BACKOFF: std::time::Duration = std::time::Duration::from_secs(1);

/// One job handed to the dispatcher: the campaign definition at fire time
/// plus its eligible recipients, order preserved.
pub struct SendJob {
    pub job_id: String,
    pub campaign: Campaign,
    pub recipients: Vec<Recipient>,
}

/// Executes jobs against the shared registry and durable store.
#[derive(Clone)]
pub struct Dispatcher {
    pub registry: Arc<JobRegistry>,
    pub store: Arc<dyn CampaignStore>,
    pub resolver: Arc<dyn ResourceResolver>,
    pub transports: Arc<dyn TransportFactory>,
    /// Base URL for the open-tracking pixel.
    pub tracking_base_url: String,
    /// Interim counter flush cadence (recipients per flush).
    pub flush_every: u32,
}

impl Dispatcher {
    /// Run one job to completion, cancellation, or failure. Never panics
    /// and never propagates errors — every outcome lands in the registry
    /// and the durable record.
    pub async fn run(&self, job: SendJob) {
        let SendJob { job_id, campaign, recipients } = job;

        let transport = match self.transports.create() {
            Ok(t) => t,
            Err(e) => {
                tracing::error!("❌ Transport construction failed for campaign {}: {e}", campaign.id);
                self.registry.mark_completed(&job_id, Some(e.to_string())).ok();
                let status = if campaign.is_recurring() {
                    CampaignStatus::Scheduled
                } else {
                    CampaignStatus::Failed
                };
                self.persist_with_retry("record transport error", || {
                    self.store.record_error(&campaign.id, status, &e.to_string())
                });
                return;
            }
        };

        self.persist_with_retry("mark sending", || {
            self.store.mark_sending(&campaign.id, Utc::now())
        });

        // Resolve embedded resources once per job. Unresolvable
        // identifiers are dropped; the job proceeds without them.
        let inline = self.resolve_inline(&campaign).await;

        tracing::info!(
            "🚀 Job {} started: campaign {} ({} recipients, rate {}ms)",
            job_id,
            campaign.id,
            recipients.len(),
            campaign.rate_limit_ms
        );

        let total = recipients.len();
        let mut sent: u32 = 0;
        let mut failed: u32 = 0;
        let mut flushed_sent: u32 = 0;
        let mut flushed_failed: u32 = 0;
        let mut stopped = false;

        for (i, recipient) in recipients.iter().enumerate() {
            // Cooperative cancellation: observed once per iteration,
            // before the send — never mid-send. A job missing from the
            // registry is treated as a stop.
            if self.registry.should_stop(&job_id).unwrap_or(true) {
                tracing::info!("🛑 Job {} stopping after {} of {} recipients", job_id, i, total);
                stopped = true;
                break;
            }

            let Some(email) = recipient.field(&campaign.email_column) else {
                // Eligibility filtering happens before job creation; a
                // missing column here still must not abort the job.
                failed += 1;
                self.registry.update_progress(&job_id, 0, 1).ok();
                continue;
            };
            let display_name = campaign
                .name_column
                .as_deref()
                .and_then(|col| recipient.field(col))
                .unwrap_or("");

            let rendered = self.render_message(&campaign, recipient, email, display_name, &inline);
            match send_with_retry(transport.as_ref(), &rendered).await {
                Ok(()) => {
                    sent += 1;
                    self.registry.update_progress(&job_id, 1, 0).ok();
                }
                Err(e) => {
                    failed += 1;
                    tracing::warn!("✉️ Failed to send to {}: {e}", email);
                    self.registry.update_progress(&job_id, 0, 1).ok();
                }
            }

            if (sent + failed) % self.flush_every.max(1) == 0 {
                self.persist_with_retry("interim progress", || {
                    self.store.apply_progress(
                        &campaign.id,
                        sent - flushed_sent,
                        failed - flushed_failed,
                    )
                });
                flushed_sent = sent;
                flushed_failed = failed;
            }

            // Inter-recipient rate limit — applies after success and
            // failure alike, but not after the last recipient.
            if i + 1 < total {
                tokio::time::sleep(std::time::Duration::from_millis(campaign.rate_limit_ms)).await;
            }
        }

        // Transport released here; pooled connections close on drop.
        drop(transport);

        let (status, last_error) = if stopped {
            self.registry.mark_stopped(&job_id).ok();
            if campaign.is_recurring() {
                (CampaignStatus::Scheduled, Some("send stopped before completion".to_string()))
            } else {
                (CampaignStatus::Failed, Some("send stopped before completion".to_string()))
            }
        } else {
            self.registry.mark_completed(&job_id, None).ok();
            if campaign.is_recurring() {
                (CampaignStatus::Scheduled, None)
            } else {
                (CampaignStatus::Completed, None)
            }
        };

        let outcome = RunOutcome {
            total: total as u32,
            sent_delta: sent - flushed_sent,
            failed_delta: failed - flushed_failed,
            status,
            last_error,
            finished_at: Utc::now(),
        };
        self.persist_with_retry("apply run outcome", || {
            self.store.apply_run(&campaign.id, &outcome)
        });

        tracing::info!(
            "🏁 Job {} finished: {} sent, {} failed{}",
            job_id,
            sent,
            failed,
            if stopped { " (stopped)" } else { "" }
        );
    }

    async fn resolve_inline(&self, campaign: &Campaign) -> Vec<InlineResource> {
        let mut resources = Vec::new();
        for cid in render::extract_cid_refs(&campaign.content_template) {
            match self.resolver.resolve(&cid).await {
                Ok(data) => resources.push(InlineResource { cid, data }),
                Err(e) => {
                    tracing::warn!("⚠️ Embedded resource '{}' not resolved: {e} — dropped", cid);
                }
            }
        }
        resources
    }

    fn render_message(
        &self,
        campaign: &Campaign,
        recipient: &Recipient,
        email: &str,
        display_name: &str,
        inline: &[InlineResource],
    ) -> RenderedEmail {
        let subject = render::personalize(
            &campaign.subject_template,
            &campaign.variables,
            recipient,
            display_name,
        );
        let body = render::personalize(
            &campaign.content_template,
            &campaign.variables,
            recipient,
            display_name,
        );
        let html =
            render::append_tracking_pixel(&body, &self.tracking_base_url, &campaign.id, email);

        RenderedEmail {
            to: email.to_string(),
            to_name: (!display_name.is_empty()).then(|| display_name.to_string()),
            subject,
            html,
            inline: inline.to_vec(),
            campaign_id: campaign.id.clone(),
        }
    }

    /// Store writes are retried once, then logged — they never block the
    /// engine or crash the process.
    fn persist_with_retry<F: Fn() -> Result<()>>(&self, what: &str, op: F) {
        if let Err(first) = op() {
            tracing::warn!("⚠️ Persistence ({what}) failed: {first} — retrying once");
            if let Err(second) = op() {
                tracing::error!("❌ Persistence ({what}) failed after retry: {second}");
            }
        }
    }
}

/// Send one message with bounded retries and fixed backoff.
async fn send_with_retry(transport: &dyn Transport, email: &RenderedEmail) -> Result<()> {
    let mut attempts = 0;
    loop {
        match transport.send(email).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                attempts += 1;
                if attempts > SEND_RETRIES {
                    return Err(e);
                }
                tracing::warn!(
                    "↪️ Send to {} failed (attempt {attempts}/{}): {e} — backing off",
                    email.to,
                    SEND_RETRIES + 1
                );
                tokio::time::sleep(RETRY_BACKOFF).await;
            }
        }
    }
}
