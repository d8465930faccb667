//! Campaign data model — the subset of the durable record the engine
//! reads and writes, plus the in-flight message shapes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Campaign lifecycle status, as stored in the durable record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Scheduled,
    Sending,
    Completed,
    Failed,
    Paused,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Scheduled => "scheduled",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Paused => "paused",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "scheduled" => CampaignStatus::Scheduled,
            "sending" => CampaignStatus::Sending,
            "completed" => CampaignStatus::Completed,
            "failed" => CampaignStatus::Failed,
            "paused" => CampaignStatus::Paused,
            _ => CampaignStatus::Draft,
        }
    }
}

/// A placeholder → source-field binding used during personalization.
/// `{{placeholder}}` in the template is replaced by the recipient's
/// value for `column`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct VariableBinding {
    pub placeholder: String,
    pub column: String,
}

/// The stored definition of a bulk email send.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Campaign {
    pub id: String,
    pub name: String,
    /// Opaque reference handed to the RecipientSource collaborator.
    pub recipient_source: String,
    /// Source column holding the recipient email address.
    pub email_column: String,
    /// Source column holding the display name (optional).
    pub name_column: Option<String>,
    pub subject_template: String,
    /// HTML body with `{{placeholder}}` tokens and `cid:` references.
    pub content_template: String,
    pub variables: Vec<VariableBinding>,
    /// Fixed inter-send delay in milliseconds.
    pub rate_limit_ms: u64,
    /// Cron pattern for recurring schedules (5-field).
    pub schedule_pattern: Option<String>,
    /// Absolute fire time for one-shot schedules.
    pub scheduled_at: Option<DateTime<Utc>>,
    /// UTC offset (e.g. "+05:30") applied when evaluating the schedule.
    pub timezone: Option<String>,
    pub status: CampaignStatus,
    pub is_scheduled: bool,
    pub total_recipients: u32,
    pub emails_sent: u32,
    pub emails_failed: u32,
    pub execution_count: u32,
    pub last_executed: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Schedule descriptor derived from the stored pattern/timestamp columns.
/// At most one of the two is active per campaign.
#[derive(Debug, Clone, PartialEq)]
pub enum Schedule {
    None,
    Recurring(String),
    OneTime(DateTime<Utc>),
}

impl Campaign {
    pub fn schedule(&self) -> Schedule {
        if let Some(pattern) = &self.schedule_pattern {
            Schedule::Recurring(pattern.clone())
        } else if let Some(at) = self.scheduled_at {
            Schedule::OneTime(at)
        } else {
            Schedule::None
        }
    }

    /// Recurring campaigns revert to `scheduled` after a run; everything
    /// else reaches a terminal status.
    pub fn is_recurring(&self) -> bool {
        self.schedule_pattern.is_some()
    }
}

/// One addressable row extracted from the campaign's recipient source.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Recipient {
    pub fields: HashMap<String, String>,
}

impl Recipient {
    pub fn new(fields: HashMap<String, String>) -> Self {
        Self { fields }
    }

    pub fn field(&self, column: &str) -> Option<&str> {
        self.fields.get(column).map(String::as_str)
    }

    /// Syntactic eligibility: the email column must contain `@` and `.`.
    pub fn has_valid_email(&self, email_column: &str) -> bool {
        match self.field(email_column) {
            Some(email) => email.contains('@') && email.contains('.'),
            None => false,
        }
    }
}

/// An embedded asset resolved from a `cid:` reference in the template.
#[derive(Debug, Clone, PartialEq)]
pub struct InlineResource {
    pub cid: String,
    pub data: Vec<u8>,
}

/// A fully personalized message, ready for the transport.
#[derive(Debug, Clone)]
pub struct RenderedEmail {
    pub to: String,
    pub to_name: Option<String>,
    pub subject: String,
    pub html: String,
    pub inline: Vec<InlineResource>,
    /// Tracking headers: campaign id + recipient email.
    pub campaign_id: String,
}

/// Result of one job execution, applied additively to the durable record.
#[derive(Debug, Clone)]
pub struct RunOutcome {
    /// Recipients this run attempted to cover (eligible list length).
    pub total: u32,
    /// Sent/failed counts not yet flushed to the store.
    pub sent_delta: u32,
    pub failed_delta: u32,
    pub status: CampaignStatus,
    pub last_error: Option<String>,
    pub finished_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_roundtrip() {
        for s in ["draft", "scheduled", "sending", "completed", "failed", "paused"] {
            assert_eq!(CampaignStatus::parse(s).as_str(), s);
        }
        assert_eq!(CampaignStatus::parse("garbage"), CampaignStatus::Draft);
    }

    #[test]
    fn test_recipient_email_eligibility() {
        let mut fields = HashMap::new();
        fields.insert("email".to_string(), "a@b.com".to_string());
        let r = Recipient::new(fields);
        assert!(r.has_valid_email("email"));
        assert!(!r.has_valid_email("Email"));

        let mut fields = HashMap::new();
        fields.insert("email".to_string(), "not-an-address".to_string());
        assert!(!Recipient::new(fields).has_valid_email("email"));
    }

    #[test]
    fn test_schedule_descriptor() {
        let mut c = Campaign {
            id: "c1".into(),
            name: "test".into(),
            recipient_source: "r".into(),
            email_column: "email".into(),
            name_column: None,
            subject_template: "s".into(),
            content_template: "b".into(),
            variables: vec![],
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
        };
        assert_eq!(c.schedule(), Schedule::None);
        c.schedule_pattern = Some("0 9 * * *".into());
        assert!(matches!(c.schedule(), Schedule::Recurring(_)));
        assert!(c.is_recurring());
    }
}
