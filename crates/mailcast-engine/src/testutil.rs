//! In-memory collaborator fakes for engine tests.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::{
    CampaignStore, RecipientSource, ResourceResolver, Transport, TransportFactory,
};
use mailcast_core::types::{Campaign, CampaignStatus, Recipient, RenderedEmail, RunOutcome};

use crate::dispatch::Dispatcher;
use crate::registry::JobRegistry;

// ─── Campaign / recipient builders ──────────────────────────

pub fn campaign(id: &str) -> Campaign {
    Campaign {
        id: id.into(),
        name: format!("campaign {id}"),
        recipient_source: "test-source".into(),
        email_column: "email".into(),
        name_column: Some("name".into()),
        subject_template: "Hello {{name}}".into(),
        content_template: "<html><body>Hi {{name}}</body></html>".into(),
        variables: Vec::new(),
        rate_limit_ms: 100,
        schedule_pattern: None,
        scheduled_at: None,
        timezone: None,
        status: CampaignStatus::Draft,
        is_scheduled: false,
        total_recipients: 0,
        emails_sent: 0,
        emails_failed: 0,
        execution_count: 0,
        last_executed: None,
        last_error: None,
    }
}

pub fn recipient(email: &str, name: &str) -> Recipient {
    let mut fields = HashMap::new();
    fields.insert("email".to_string(), email.to_string());
    fields.insert("name".to_string(), name.to_string());
    Recipient::new(fields)
}

pub fn recipients(n: usize) -> Vec<Recipient> {
    (0..n)
        .map(|i| recipient(&format!("user{i}@example.com"), &format!("User {i}")))
        .collect()
}

// ─── In-memory campaign store ──────────────────────────

#[derive(Default)]
pub struct MemoryStore {
    rows: Mutex<HashMap<String, Campaign>>,
    /// Fail this many upcoming writes (persistence-retry tests).
    pub writes_to_fail: AtomicU32,
}

impl MemoryStore {
    pub fn with(campaigns: Vec<Campaign>) -> Arc<Self> {
        let store = Self::default();
        {
            let mut rows = store.rows.lock().unwrap();
            for c in campaigns {
                rows.insert(c.id.clone(), c);
            }
        }
        Arc::new(store)
    }

    fn write<F: FnOnce(&mut Campaign)>(&self, id: &str, f: F) -> Result<()> {
        if self.writes_to_fail.load(Ordering::SeqCst) > 0 {
            self.writes_to_fail.fetch_sub(1, Ordering::SeqCst);
            return Err(MailcastError::Persistence("injected write failure".into()));
        }
        let mut rows = self.rows.lock().unwrap();
        let c = rows
            .get_mut(id)
            .ok_or_else(|| MailcastError::CampaignNotFound(id.to_string()))?;
        f(c);
        Ok(())
    }
}

impl CampaignStore for MemoryStore {
    fn get(&self, id: &str) -> Result<Campaign> {
        self.rows
            .lock()
            .unwrap()
            .get(id)
            .cloned()
            .ok_or_else(|| MailcastError::CampaignNotFound(id.to_string()))
    }

    fn insert(&self, campaign: &Campaign) -> Result<()> {
        self.rows
            .lock()
            .unwrap()
            .insert(campaign.id.clone(), campaign.clone());
        Ok(())
    }

    fn list_scheduled(&self) -> Result<Vec<Campaign>> {
        Ok(self
            .rows
            .lock()
            .unwrap()
            .values()
            .filter(|c| c.status == CampaignStatus::Scheduled && c.is_scheduled)
            .cloned()
            .collect())
    }

    fn set_scheduled_recurring(&self, id: &str, pattern: &str, timezone: Option<&str>) -> Result<()> {
        let pattern = pattern.to_string();
        let timezone = timezone.map(str::to_string);
        self.write(id, move |c| {
            c.status = CampaignStatus::Scheduled;
            c.is_scheduled = true;
            c.schedule_pattern = Some(pattern);
            c.scheduled_at = None;
            c.timezone = timezone;
        })
    }

    fn set_scheduled_once(&self, id: &str, at: DateTime<Utc>, timezone: Option<&str>) -> Result<()> {
        let timezone = timezone.map(str::to_string);
        self.write(id, move |c| {
            c.status = CampaignStatus::Scheduled;
            c.is_scheduled = true;
            c.scheduled_at = Some(at);
            c.schedule_pattern = None;
            c.timezone = timezone;
        })
    }

    fn set_unscheduled(&self, id: &str) -> Result<()> {
        self.write(id, |c| {
            c.status = CampaignStatus::Draft;
            c.is_scheduled = false;
            c.schedule_pattern = None;
            c.scheduled_at = None;
        })
    }

    fn mark_sending(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        self.write(id, move |c| {
            c.status = CampaignStatus::Sending;
            c.last_executed = Some(at);
        })
    }

    fn apply_progress(&self, id: &str, sent_delta: u32, failed_delta: u32) -> Result<()> {
        self.write(id, move |c| {
            c.emails_sent += sent_delta;
            c.emails_failed += failed_delta;
        })
    }

    fn apply_run(&self, id: &str, outcome: &RunOutcome) -> Result<()> {
        let outcome = outcome.clone();
        self.write(id, move |c| {
            c.emails_sent += outcome.sent_delta;
            c.emails_failed += outcome.failed_delta;
            c.total_recipients += outcome.total;
            c.execution_count += 1;
            c.status = outcome.status;
            c.is_scheduled = outcome.status == CampaignStatus::Scheduled;
            c.last_executed = Some(outcome.finished_at);
            c.last_error = outcome.last_error;
        })
    }

    fn record_error(&self, id: &str, status: CampaignStatus, error: &str) -> Result<()> {
        let error = error.to_string();
        self.write(id, move |c| {
            c.status = status;
            c.is_scheduled = status == CampaignStatus::Scheduled;
            c.last_error = Some(error);
        })
    }

    fn set_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        self.write(id, move |c| c.status = status)
    }
}

// ─── Static recipient source ──────────────────────────

pub struct StaticSource(pub Vec<Recipient>);

#[async_trait]
impl RecipientSource for StaticSource {
    async fn fetch(&self, _source_ref: &str) -> Result<Vec<Recipient>> {
        Ok(self.0.clone())
    }
}

pub struct FailingSource;

#[async_trait]
impl RecipientSource for FailingSource {
    async fn fetch(&self, source_ref: &str) -> Result<Vec<Recipient>> {
        Err(MailcastError::Source(format!("unreadable: {source_ref}")))
    }
}

// ─── Mock transport ──────────────────────────

#[derive(Default)]
pub struct TransportLog {
    /// (recipient, virtual send instant) per successful attempt.
    pub sends: Mutex<Vec<(RenderedEmail, tokio::time::Instant)>>,
    /// Every attempt, successful or not.
    pub attempts: Mutex<Vec<String>>,
    /// Recipients that fail permanently.
    pub fail_permanently: Mutex<HashSet<String>>,
    /// Remaining transient failures per recipient.
    pub fail_transiently: Mutex<HashMap<String, u32>>,
}

pub struct MockTransport {
    log: Arc<TransportLog>,
}

#[async_trait]
impl Transport for MockTransport {
    async fn send(&self, email: &RenderedEmail) -> Result<()> {
        self.log.attempts.lock().unwrap().push(email.to.clone());

        if self.log.fail_permanently.lock().unwrap().contains(&email.to) {
            return Err(MailcastError::Send(format!("mock refuses {}", email.to)));
        }
        {
            let mut transient = self.log.fail_transiently.lock().unwrap();
            if let Some(left) = transient.get_mut(&email.to) {
                if *left > 0 {
                    *left -= 1;
                    return Err(MailcastError::Send(format!("mock transient for {}", email.to)));
                }
            }
        }
        self.log
            .sends
            .lock()
            .unwrap()
            .push((email.clone(), tokio::time::Instant::now()));
        Ok(())
    }
}

#[derive(Default)]
pub struct MockTransportFactory {
    pub log: Arc<TransportLog>,
    pub fail_create: Mutex<bool>,
}

impl TransportFactory for MockTransportFactory {
    fn create(&self) -> Result<Box<dyn Transport>> {
        if *self.fail_create.lock().unwrap() {
            return Err(MailcastError::Transport("mock factory refused".into()));
        }
        Ok(Box::new(MockTransport {
            log: Arc::clone(&self.log),
        }))
    }
}

// ─── Resolver fakes ──────────────────────────

#[derive(Default)]
pub struct MapResolver(pub HashMap<String, Vec<u8>>);

#[async_trait]
impl ResourceResolver for MapResolver {
    async fn resolve(&self, id: &str) -> Result<Vec<u8>> {
        self.0
            .get(id)
            .cloned()
            .ok_or_else(|| MailcastError::ResourceNotFound(id.to_string()))
    }
}

// ─── Wiring helper ──────────────────────────

pub struct Rig {
    pub store: Arc<MemoryStore>,
    pub registry: Arc<JobRegistry>,
    pub factory: Arc<MockTransportFactory>,
    pub dispatcher: Dispatcher,
}

/// Assemble a dispatcher over in-memory fakes.
pub fn rig(campaigns: Vec<Campaign>) -> Rig {
    let store = MemoryStore::with(campaigns);
    let registry = Arc::new(JobRegistry::new());
    let factory = Arc::new(MockTransportFactory::default());
    let dispatcher = Dispatcher {
        registry: Arc::clone(&registry),
        store: store.clone(),
        resolver: Arc::new(MapResolver::default()),
        transports: factory.clone(),
        tracking_base_url: "http://track.local".into(),
        flush_every: 20,
    };
    Rig {
        store,
        registry,
        factory,
        dispatcher,
    }
}

/// Await a registry predicate under paused time, bounded.
pub async fn wait_for<F: Fn() -> bool>(cond: F) {
    for _ in 0..20_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    panic!("condition not reached");
}
