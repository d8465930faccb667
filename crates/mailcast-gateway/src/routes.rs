//! API route handlers for the gateway.
//!
//! Mutating calls answer validation synchronously; bulk-send completion
//! is always observed by polling the job status, never via the original
//! call's response.

use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::{DateTime, Utc};
use serde::Deserialize;

use mailcast_core::error::MailcastError;
use mailcast_engine::cron;

use super::server::AppState;

/// Schedule request body: recurring (cron pattern) or one-shot (timestamp).
#[derive(Debug, Deserialize)]
pub struct ScheduleRequest {
    pub mode: String,
    #[serde(default)]
    pub pattern: Option<String>,
    #[serde(default)]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(default)]
    pub timezone: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ValidateRequest {
    pub pattern: String,
}

type ApiResponse = (StatusCode, Json<serde_json::Value>);

fn ok(value: serde_json::Value) -> ApiResponse {
    (StatusCode::OK, Json(value))
}

fn fail(e: &MailcastError) -> ApiResponse {
    let status = match e {
        MailcastError::CampaignNotFound(_) | MailcastError::JobNotFound(_) => {
            StatusCode::NOT_FOUND
        }
        MailcastError::InvalidPattern(_)
        | MailcastError::InvalidSchedule(_)
        | MailcastError::NoValidRecipients
        | MailcastError::ConcurrentExecutionSkipped(_) => StatusCode::BAD_REQUEST,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (
        status,
        Json(serde_json::json!({"success": false, "error": e.to_string()})),
    )
}

/// Health check endpoint.
pub async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "ok",
        "service": "mailcast-gateway",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

/// Arm a recurring or one-shot trigger for a campaign.
pub async fn schedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(req): Json<ScheduleRequest>,
) -> ApiResponse {
    let result = match req.mode.as_str() {
        "recurring" => match &req.pattern {
            Some(pattern) => state
                .scheduler
                .schedule_recurring(&id, pattern, req.timezone.as_deref())
                .map(|_| format!("Campaign scheduled with pattern '{pattern}'")),
            None => Err(MailcastError::InvalidPattern(
                "recurring mode requires 'pattern'".into(),
            )),
        },
        "once" => match req.timestamp {
            Some(at) => state
                .scheduler
                .schedule_one_time(&id, at, req.timezone.as_deref())
                .map(|_| format!("Campaign scheduled for {}", at.to_rfc3339())),
            None => Err(MailcastError::InvalidSchedule(
                "once mode requires 'timestamp'".into(),
            )),
        },
        other => Err(MailcastError::InvalidSchedule(format!(
            "unknown mode '{other}' (expected 'recurring' or 'once')"
        ))),
    };

    match result {
        Ok(message) => ok(serde_json::json!({"success": true, "message": message})),
        Err(e) => fail(&e),
    }
}

/// Destroy any trigger for the campaign (idempotent).
pub async fn unschedule_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.scheduler.unschedule(&id) {
        Ok(()) => ok(serde_json::json!({"success": true})),
        Err(e) => fail(&e),
    }
}

/// Bypass timing and run the campaign immediately.
pub async fn execute_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.scheduler.execute_now(&id).await {
        Ok(job_id) => ok(serde_json::json!({"success": true, "job_id": job_id})),
        Err(e) => fail(&e),
    }
}

/// Stop every active job of the campaign and mark it paused.
pub async fn pause_campaign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.scheduler.pause_campaign(&id) {
        Ok(signalled) => ok(serde_json::json!({
            "success": true,
            "jobs_stopped": signalled,
        })),
        Err(e) => fail(&e),
    }
}

/// Armed-trigger view merged with the durable schedule fields.
pub async fn schedule_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.scheduler.schedule_status(&id) {
        Ok(status) => (
            StatusCode::OK,
            Json(serde_json::to_value(status).unwrap_or_default()),
        ),
        Err(e) => fail(&e),
    }
}

/// Snapshot of one job's progress.
pub async fn job_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.registry.get(&id) {
        Ok(snapshot) => (
            StatusCode::OK,
            Json(serde_json::to_value(snapshot).unwrap_or_default()),
        ),
        Err(e) => fail(&e),
    }
}

/// All in-flight and recently finished jobs.
pub async fn list_jobs(State(state): State<Arc<AppState>>) -> Json<serde_json::Value> {
    Json(serde_json::json!({"jobs": state.registry.list()}))
}

/// Request cooperative stop. Acknowledged immediately; completion is
/// observable via the job status query.
pub async fn stop_job(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResponse {
    match state.registry.request_stop(&id) {
        Ok(()) => ok(serde_json::json!({"success": true, "message": "stop requested"})),
        Err(e) => fail(&e),
    }
}

/// Validate a cron pattern without touching any campaign.
pub async fn validate_pattern(Json(req): Json<ValidateRequest>) -> Json<serde_json::Value> {
    match cron::validate(&req.pattern) {
        Ok(()) => Json(serde_json::json!({"valid": true})),
        Err(reason) => Json(serde_json::json!({"valid": false, "error": reason})),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schedule_request_shapes() {
        let recurring: ScheduleRequest = serde_json::from_str(
            r#"{"mode": "recurring", "pattern": "0 9 * * *", "timezone": "+05:30"}"#,
        )
        .unwrap();
        assert_eq!(recurring.mode, "recurring");
        assert_eq!(recurring.pattern.as_deref(), Some("0 9 * * *"));
        assert!(recurring.timestamp.is_none());

        let once: ScheduleRequest =
            serde_json::from_str(r#"{"mode": "once", "timestamp": "2026-09-01T09:00:00Z"}"#)
                .unwrap();
        assert_eq!(once.mode, "once");
        assert!(once.timestamp.is_some());
        assert!(once.timezone.is_none());
    }

    #[test]
    fn test_error_mapping() {
        let (status, _) = fail(&MailcastError::CampaignNotFound("x".into()));
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = fail(&MailcastError::InvalidPattern("bad".into()));
        assert_eq!(status, StatusCode::BAD_REQUEST);
        let (status, _) = fail(&MailcastError::Persistence("io".into()));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
    }

    #[tokio::test]
    async fn test_validate_endpoint_reports_reason() {
        let Json(valid) = validate_pattern(Json(ValidateRequest {
            pattern: "*/10 * * * *".into(),
        }))
        .await;
        assert_eq!(valid["valid"], true);

        let Json(invalid) = validate_pattern(Json(ValidateRequest {
            pattern: "61 * * * *".into(),
        }))
        .await;
        assert_eq!(invalid["valid"], false);
        assert!(!invalid["error"].as_str().unwrap_or("").is_empty());
    }
}
