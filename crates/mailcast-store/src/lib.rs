//! SQLite-backed persistence for campaign records.
//! Survives restarts; all counter updates are additive on the SQL side so
//! accumulated totals never depend on values captured before a run.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use mailcast_core::error::{MailcastError, Result};
use mailcast_core::traits::CampaignStore;
use mailcast_core::types::{Campaign, CampaignStatus, RunOutcome, VariableBinding};

/// SQLite-backed campaign store.
///
/// rusqlite connections are not Sync; a Mutex serializes access, which
/// also gives each store call transaction-like atomicity.
pub struct SqliteCampaignStore {
    conn: Mutex<rusqlite::Connection>,
}

impl SqliteCampaignStore {
    /// Open or create the campaign database.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent)?;
        }
        let conn = rusqlite::Connection::open(path)
            .map_err(|e| MailcastError::Persistence(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// In-memory database, for tests and ephemeral runs.
    pub fn open_in_memory() -> Result<Self> {
        let conn = rusqlite::Connection::open_in_memory()
            .map_err(|e| MailcastError::Persistence(format!("DB open: {e}")))?;
        let store = Self { conn: Mutex::new(conn) };
        store.migrate()?;
        Ok(store)
    }

    /// Run migrations to create tables.
    fn migrate(&self) -> Result<()> {
        self.conn
            .lock()
            .unwrap()
            .execute_batch(
                "
            CREATE TABLE IF NOT EXISTS campaigns (
                id TEXT PRIMARY KEY,
                name TEXT NOT NULL,
                recipient_source TEXT NOT NULL,
                email_column TEXT NOT NULL DEFAULT 'email',
                name_column TEXT,
                subject_template TEXT NOT NULL DEFAULT '',
                content_template TEXT NOT NULL DEFAULT '',
                variables TEXT NOT NULL DEFAULT '[]',    -- JSON array of bindings
                rate_limit_ms INTEGER NOT NULL DEFAULT 1000,
                schedule_pattern TEXT,
                scheduled_at TEXT,
                timezone TEXT,
                status TEXT NOT NULL DEFAULT 'draft',
                is_scheduled INTEGER NOT NULL DEFAULT 0,
                total_recipients INTEGER NOT NULL DEFAULT 0,
                emails_sent INTEGER NOT NULL DEFAULT 0,
                emails_failed INTEGER NOT NULL DEFAULT 0,
                execution_count INTEGER NOT NULL DEFAULT 0,
                last_executed TEXT,
                last_error TEXT,
                created_at TEXT NOT NULL
            );
         ",
            )
            .map_err(|e| MailcastError::Persistence(format!("Migration: {e}")))?;
        Ok(())
    }

    fn row_to_campaign(row: &rusqlite::Row<'_>) -> rusqlite::Result<Campaign> {
        let variables_json: String = row.get("variables")?;
        let variables: Vec<VariableBinding> =
            serde_json::from_str(&variables_json).unwrap_or_default();
        let status_str: String = row.get("status")?;
        let scheduled_at: Option<String> = row.get("scheduled_at")?;
        let last_executed: Option<String> = row.get("last_executed")?;

        Ok(Campaign {
            id: row.get("id")?,
            name: row.get("name")?,
            recipient_source: row.get("recipient_source")?,
            email_column: row.get("email_column")?,
            name_column: row.get("name_column")?,
            subject_template: row.get("subject_template")?,
            content_template: row.get("content_template")?,
            variables,
            rate_limit_ms: row.get::<_, i64>("rate_limit_ms")? as u64,
            schedule_pattern: row.get("schedule_pattern")?,
            scheduled_at: scheduled_at.and_then(parse_rfc3339),
            timezone: row.get("timezone")?,
            status: CampaignStatus::parse(&status_str),
            is_scheduled: row.get::<_, i64>("is_scheduled")? != 0,
            total_recipients: row.get::<_, i64>("total_recipients")? as u32,
            emails_sent: row.get::<_, i64>("emails_sent")? as u32,
            emails_failed: row.get::<_, i64>("emails_failed")? as u32,
            execution_count: row.get::<_, i64>("execution_count")? as u32,
            last_executed: last_executed.and_then(parse_rfc3339),
            last_error: row.get("last_error")?,
        })
    }
}

fn parse_rfc3339(s: String) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(&s)
        .ok()
        .map(|d| d.with_timezone(&Utc))
}

const SELECT_COLUMNS: &str = "SELECT id, name, recipient_source, email_column, name_column, \
     subject_template, content_template, variables, rate_limit_ms, schedule_pattern, \
     scheduled_at, timezone, status, is_scheduled, total_recipients, emails_sent, \
     emails_failed, execution_count, last_executed, last_error FROM campaigns";

impl CampaignStore for SqliteCampaignStore {
    fn get(&self, id: &str) -> Result<Campaign> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            &format!("{SELECT_COLUMNS} WHERE id = ?1"),
            [id],
            Self::row_to_campaign,
        )
        .map_err(|e| match e {
            rusqlite::Error::QueryReturnedNoRows => MailcastError::CampaignNotFound(id.to_string()),
            other => MailcastError::Persistence(format!("Get campaign: {other}")),
        })
    }

    fn insert(&self, c: &Campaign) -> Result<()> {
        let variables = serde_json::to_string(&c.variables)
            .map_err(|e| MailcastError::Persistence(format!("Serialize variables: {e}")))?;
        self.conn
            .lock()
            .unwrap()
            .execute(
                "INSERT OR REPLACE INTO campaigns
                 (id, name, recipient_source, email_column, name_column, subject_template,
                  content_template, variables, rate_limit_ms, schedule_pattern, scheduled_at,
                  timezone, status, is_scheduled, total_recipients, emails_sent, emails_failed,
                  execution_count, last_executed, last_error, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16,
                         ?17, ?18, ?19, ?20, ?21)",
                rusqlite::params![
                    c.id,
                    c.name,
                    c.recipient_source,
                    c.email_column,
                    c.name_column,
                    c.subject_template,
                    c.content_template,
                    variables,
                    c.rate_limit_ms as i64,
                    c.schedule_pattern,
                    c.scheduled_at.map(|t| t.to_rfc3339()),
                    c.timezone,
                    c.status.as_str(),
                    c.is_scheduled as i32,
                    c.total_recipients,
                    c.emails_sent,
                    c.emails_failed,
                    c.execution_count,
                    c.last_executed.map(|t| t.to_rfc3339()),
                    c.last_error,
                    Utc::now().to_rfc3339(),
                ],
            )
            .map_err(|e| MailcastError::Persistence(format!("Insert campaign: {e}")))?;
        Ok(())
    }

    fn list_scheduled(&self) -> Result<Vec<Campaign>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = 'scheduled' AND is_scheduled = 1 \
                 ORDER BY created_at"
            ))
            .map_err(|e| MailcastError::Persistence(format!("List scheduled: {e}")))?;
        let rows = stmt
            .query_map([], Self::row_to_campaign)
            .map_err(|e| MailcastError::Persistence(format!("List scheduled: {e}")))?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    fn set_scheduled_recurring(
        &self,
        id: &str,
        pattern: &str,
        timezone: Option<&str>,
    ) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = 'scheduled', is_scheduled = 1,
                 schedule_pattern = ?1, scheduled_at = NULL, timezone = ?2 WHERE id = ?3",
                rusqlite::params![pattern, timezone, id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Set recurring: {e}")))?;
        ensure_found(changed, id)
    }

    fn set_scheduled_once(&self, id: &str, at: DateTime<Utc>, timezone: Option<&str>) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = 'scheduled', is_scheduled = 1,
                 scheduled_at = ?1, schedule_pattern = NULL, timezone = ?2 WHERE id = ?3",
                rusqlite::params![at.to_rfc3339(), timezone, id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Set one-time: {e}")))?;
        ensure_found(changed, id)
    }

    fn set_unscheduled(&self, id: &str) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = 'draft', is_scheduled = 0,
                 schedule_pattern = NULL, scheduled_at = NULL WHERE id = ?1",
                [id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Unschedule: {e}")))?;
        ensure_found(changed, id)
    }

    fn mark_sending(&self, id: &str, at: DateTime<Utc>) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = 'sending', last_executed = ?1 WHERE id = ?2",
                rusqlite::params![at.to_rfc3339(), id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Mark sending: {e}")))?;
        ensure_found(changed, id)
    }

    fn apply_progress(&self, id: &str, sent_delta: u32, failed_delta: u32) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET emails_sent = emails_sent + ?1,
                 emails_failed = emails_failed + ?2 WHERE id = ?3",
                rusqlite::params![sent_delta, failed_delta, id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Apply progress: {e}")))?;
        ensure_found(changed, id)
    }

    fn apply_run(&self, id: &str, outcome: &RunOutcome) -> Result<()> {
        let is_scheduled = outcome.status == CampaignStatus::Scheduled;
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET
                 emails_sent = emails_sent + ?1,
                 emails_failed = emails_failed + ?2,
                 total_recipients = total_recipients + ?3,
                 execution_count = execution_count + 1,
                 status = ?4,
                 is_scheduled = ?5,
                 last_executed = ?6,
                 last_error = ?7
                 WHERE id = ?8",
                rusqlite::params![
                    outcome.sent_delta,
                    outcome.failed_delta,
                    outcome.total,
                    outcome.status.as_str(),
                    is_scheduled as i32,
                    outcome.finished_at.to_rfc3339(),
                    outcome.last_error,
                    id,
                ],
            )
            .map_err(|e| MailcastError::Persistence(format!("Apply run: {e}")))?;
        ensure_found(changed, id)
    }

    fn record_error(&self, id: &str, status: CampaignStatus, error: &str) -> Result<()> {
        let is_scheduled = status == CampaignStatus::Scheduled;
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = ?1, is_scheduled = ?2, last_error = ?3
                 WHERE id = ?4",
                rusqlite::params![status.as_str(), is_scheduled as i32, error, id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Record error: {e}")))?;
        ensure_found(changed, id)
    }

    fn set_status(&self, id: &str, status: CampaignStatus) -> Result<()> {
        let changed = self
            .conn
            .lock()
            .unwrap()
            .execute(
                "UPDATE campaigns SET status = ?1 WHERE id = ?2",
                rusqlite::params![status.as_str(), id],
            )
            .map_err(|e| MailcastError::Persistence(format!("Set status: {e}")))?;
        ensure_found(changed, id)
    }
}

fn ensure_found(changed: usize, id: &str) -> Result<()> {
    if changed == 0 {
        Err(MailcastError::CampaignNotFound(id.to_string()))
    } else {
        Ok(())
    }
}
