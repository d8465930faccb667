//! Job Registry — process-wide table of in-flight jobs.
//! Single source of truth for progress counters and cooperative stop
//! flags. Reads hand out snapshots; mutations are serialized per map
//! access so progress updates never race a stop request into a lost
//! write.

use std::collections::HashMap;
use std::sync::RwLock;

use chrono::{DateTime, Utc};
use mailcast_core::error::{MailcastError, Result};
use serde::Serialize;

/// One execution attempt of a campaign's bulk send.
#[derive(Debug, Clone, Serialize)]
pub struct Job {
    pub id: String,
    pub campaign_id: String,
    pub total: u32,
    pub sent: u32,
    pub failed: u32,
    /// Write-once stop flag, observed once per recipient iteration.
    pub stop_requested: bool,
    pub completed: bool,
    pub stopped: bool,
    pub error: Option<String>,
    pub started_at: DateTime<Utc>,
    pub ended_at: Option<DateTime<Utc>>,
}

impl Job {
    pub fn new(campaign_id: &str, total: u32) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            campaign_id: campaign_id.to_string(),
            total,
            sent: 0,
            failed: 0,
            stop_requested: false,
            completed: false,
            stopped: false,
            error: None,
            started_at: Utc::now(),
            ended_at: None,
        }
    }

    /// A job still counts as active until it reaches a terminal flag.
    pub fn is_active(&self) -> bool {
        !self.completed && !self.stopped
    }
}

/// Snapshot returned to readers — identical shape, cloned out under the lock.
pub type JobSnapshot = Job;

/// Concurrency-safe registry of in-flight jobs, keyed by job id.
#[derive(Default)]
pub struct JobRegistry {
    jobs: RwLock<HashMap<String, Job>>,
}

impl JobRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, job: Job) {
        tracing::debug!("🗂️ Job registered: {} (campaign {})", job.id, job.campaign_id);
        self.jobs.write().unwrap().insert(job.id.clone(), job);
    }

    pub fn should_stop(&self, job_id: &str) -> Result<bool> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(job_id)
            .map(|j| j.stop_requested)
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))
    }

    /// Request cooperative cancellation. Acknowledged immediately; the
    /// dispatch loop observes the flag before its next send.
    pub fn request_stop(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))?;
        job.stop_requested = true;
        tracing::info!("🛑 Stop requested for job {}", job_id);
        Ok(())
    }

    pub fn update_progress(&self, job_id: &str, sent_delta: u32, failed_delta: u32) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))?;
        job.sent += sent_delta;
        job.failed += failed_delta;
        Ok(())
    }

    pub fn mark_completed(&self, job_id: &str, error: Option<String>) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))?;
        job.completed = true;
        job.error = error;
        job.ended_at = Some(Utc::now());
        Ok(())
    }

    /// Terminal state for a cancelled job; partial counters stay as-is.
    pub fn mark_stopped(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        let job = jobs
            .get_mut(job_id)
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))?;
        job.stopped = true;
        job.ended_at = Some(Utc::now());
        Ok(())
    }

    pub fn get(&self, job_id: &str) -> Result<JobSnapshot> {
        let jobs = self.jobs.read().unwrap();
        jobs.get(job_id)
            .cloned()
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))
    }

    pub fn list(&self) -> Vec<JobSnapshot> {
        self.jobs.read().unwrap().values().cloned().collect()
    }

    /// The active job for a campaign, if any — the overlap guard the
    /// scheduler consults before honoring a trigger fire.
    pub fn active_job_for(&self, campaign_id: &str) -> Option<JobSnapshot> {
        let jobs = self.jobs.read().unwrap();
        jobs.values()
            .find(|j| j.campaign_id == campaign_id && j.is_active())
            .cloned()
    }

    /// Stop every active job of a campaign; returns how many were signalled.
    pub fn request_stop_for_campaign(&self, campaign_id: &str) -> usize {
        let mut jobs = self.jobs.write().unwrap();
        let mut signalled = 0;
        for job in jobs.values_mut() {
            if job.campaign_id == campaign_id && job.is_active() {
                job.stop_requested = true;
                signalled += 1;
            }
        }
        signalled
    }

    /// Drop terminal jobs of a campaign before a new one is registered,
    /// so finished runs do not pile up in the table.
    pub fn reap_terminal_for_campaign(&self, campaign_id: &str) -> usize {
        let mut jobs = self.jobs.write().unwrap();
        let before = jobs.len();
        jobs.retain(|_, j| j.campaign_id != campaign_id || j.is_active());
        before - jobs.len()
    }

    /// Remove a terminal job once consumers have observed its state.
    pub fn reap(&self, job_id: &str) -> Result<()> {
        let mut jobs = self.jobs.write().unwrap();
        jobs.remove(job_id)
            .map(|_| ())
            .ok_or_else(|| MailcastError::JobNotFound(job_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_and_get() {
        let registry = JobRegistry::new();
        let job = Job::new("c1", 10);
        let id = job.id.clone();
        registry.register(job);

        let snap = registry.get(&id).unwrap();
        assert_eq!(snap.campaign_id, "c1");
        assert_eq!(snap.total, 10);
        assert!(snap.is_active());
    }

    #[test]
    fn test_unknown_id_is_not_found() {
        let registry = JobRegistry::new();
        assert!(matches!(
            registry.get("missing"),
            Err(MailcastError::JobNotFound(_))
        ));
        assert!(registry.request_stop("missing").is_err());
        assert!(registry.update_progress("missing", 1, 0).is_err());
        // Errors must not create state.
        assert!(registry.list().is_empty());
    }

    #[test]
    fn test_progress_accumulates() {
        let registry = JobRegistry::new();
        let job = Job::new("c1", 5);
        let id = job.id.clone();
        registry.register(job);

        registry.update_progress(&id, 1, 0).unwrap();
        registry.update_progress(&id, 1, 1).unwrap();
        let snap = registry.get(&id).unwrap();
        assert_eq!(snap.sent, 2);
        assert_eq!(snap.failed, 1);
    }

    #[test]
    fn test_stop_flag_is_sticky() {
        let registry = JobRegistry::new();
        let job = Job::new("c1", 5);
        let id = job.id.clone();
        registry.register(job);

        assert!(!registry.should_stop(&id).unwrap());
        registry.request_stop(&id).unwrap();
        assert!(registry.should_stop(&id).unwrap());
        // Progress updates racing the stop must not clear it.
        registry.update_progress(&id, 1, 0).unwrap();
        assert!(registry.should_stop(&id).unwrap());
    }

    #[test]
    fn test_active_job_guard() {
        let registry = JobRegistry::new();
        let job = Job::new("c1", 5);
        let id = job.id.clone();
        registry.register(job);

        assert!(registry.active_job_for("c1").is_some());
        assert!(registry.active_job_for("c2").is_none());

        registry.mark_completed(&id, None).unwrap();
        assert!(registry.active_job_for("c1").is_none());
    }

    #[test]
    fn test_stop_for_campaign_counts_active_only() {
        let registry = JobRegistry::new();
        let done = Job::new("c1", 5);
        let done_id = done.id.clone();
        registry.register(done);
        registry.mark_completed(&done_id, None).unwrap();
        registry.register(Job::new("c1", 5));
        registry.register(Job::new("c2", 5));

        assert_eq!(registry.request_stop_for_campaign("c1"), 1);
    }

    #[test]
    fn test_reap_removes_terminal_job() {
        let registry = JobRegistry::new();
        let job = Job::new("c1", 5);
        let id = job.id.clone();
        registry.register(job);
        registry.mark_stopped(&id).unwrap();

        registry.reap(&id).unwrap();
        assert!(registry.get(&id).is_err());
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        use std::sync::Arc;
        let registry = Arc::new(JobRegistry::new());
        let job = Job::new("c1", 100);
        let id = job.id.clone();
        registry.register(job);

        let mut handles = Vec::new();
        for _ in 0..8 {
            let registry = Arc::clone(&registry);
            let id = id.clone();
            handles.push(std::thread::spawn(move || {
                for _ in 0..50 {
                    registry.update_progress(&id, 1, 0).unwrap();
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(registry.get(&id).unwrap().sent, 400);
    }
}
