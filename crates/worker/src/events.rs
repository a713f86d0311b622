//! Job lifecycle events and where they go.
//!
//! The orchestrator reports progress as [`JobEvent`]s through the
//! [`EventSink`] capability. [`TracingSink`] writes them to the local log;
//! [`LogShipper`] does the same and additionally forwards each event to a
//! remote log collector, best-effort and off the job's critical path.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::config::LogApiConfig;

pub const EVENT_JOB_RECEIVED: &str = "job.received";
pub const EVENT_JOB_REJECTED: &str = "job.rejected";
pub const EVENT_JOB_SUBMITTED: &str = "job.submitted";
pub const EVENT_JOB_COMPLETED: &str = "job.completed";
pub const EVENT_JOB_FAILED: &str = "job.failed";

/// HTTP timeout for a single shipping attempt.
const SHIP_TIMEOUT: Duration = Duration::from_secs(5);

/// Shipped messages are cut to this many characters.
pub const MAX_SHIPPED_MESSAGE_CHARS: usize = 1000;

// ---------------------------------------------------------------------------
// JobEvent
// ---------------------------------------------------------------------------

/// Severity of a [`JobEvent`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum EventLevel {
    Info,
    Warn,
    Error,
}

/// Something that happened while handling a job.
///
/// Constructed via [`JobEvent::new`] and enriched with
/// [`for_job`](JobEvent::for_job), [`with_level`](JobEvent::with_level), and
/// [`with_payload`](JobEvent::with_payload).
#[derive(Debug, Clone, Serialize)]
pub struct JobEvent {
    /// Dot-separated event name, e.g. `"job.submitted"`.
    pub event_type: String,
    pub job_id: Option<String>,
    pub level: EventLevel,
    pub message: String,
    /// Free-form JSON carrying event-specific data.
    pub payload: serde_json::Value,
    pub timestamp: DateTime<Utc>,
}

impl JobEvent {
    /// Create an `info` event with an empty payload.
    pub fn new(event_type: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            event_type: event_type.into(),
            job_id: None,
            level: EventLevel::Info,
            message: message.into(),
            payload: serde_json::Value::Object(Default::default()),
            timestamp: Utc::now(),
        }
    }

    pub fn for_job(mut self, job_id: impl Into<String>) -> Self {
        self.job_id = Some(job_id.into());
        self
    }

    pub fn with_level(mut self, level: EventLevel) -> Self {
        self.level = level;
        self
    }

    pub fn with_payload(mut self, payload: serde_json::Value) -> Self {
        self.payload = payload;
        self
    }
}

// ---------------------------------------------------------------------------
// Sinks
// ---------------------------------------------------------------------------

/// Destination for job events.
///
/// `emit` must not block the caller or fail; delivery problems are the
/// sink's own business.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: JobEvent);
}

/// Writes events to the local `tracing` log only.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl TracingSink {
    fn log(event: &JobEvent) {
        let job_id = event.job_id.as_deref().unwrap_or("-");
        match event.level {
            EventLevel::Info => tracing::info!(
                event_type = %event.event_type,
                job_id,
                payload = %event.payload,
                "{}",
                event.message,
            ),
            EventLevel::Warn => tracing::warn!(
                event_type = %event.event_type,
                job_id,
                payload = %event.payload,
                "{}",
                event.message,
            ),
            EventLevel::Error => tracing::error!(
                event_type = %event.event_type,
                job_id,
                payload = %event.payload,
                "{}",
                event.message,
            ),
        }
    }
}

impl EventSink for TracingSink {
    fn emit(&self, event: JobEvent) {
        Self::log(&event);
    }
}

/// Logs events locally and ships them to a remote log API.
///
/// Each delivery is a single POST spawned on the current tokio runtime.
/// Failures are logged at `debug` and otherwise ignored, so a dead log
/// endpoint never affects job outcomes.
pub struct LogShipper {
    client: reqwest::Client,
    endpoint: String,
    token: Option<String>,
    app_name: String,
}

impl LogShipper {
    pub fn new(config: &LogApiConfig, app_name: impl Into<String>) -> Result<Self, reqwest::Error> {
        let client = reqwest::Client::builder().timeout(SHIP_TIMEOUT).build()?;
        Ok(Self {
            client,
            endpoint: config.endpoint.clone(),
            token: config.token.clone(),
            app_name: app_name.into(),
        })
    }

    /// The JSON body shipped for `event`.
    pub fn body(&self, event: &JobEvent) -> serde_json::Value {
        serde_json::json!({
            "app_name": self.app_name,
            "job_id": event.job_id,
            "level": event.level,
            "event_type": event.event_type,
            "message": truncate_chars(&event.message, MAX_SHIPPED_MESSAGE_CHARS),
            "payload": event.payload,
            "timestamp": event.timestamp,
        })
    }

    async fn ship(
        client: reqwest::Client,
        endpoint: String,
        token: Option<String>,
        body: serde_json::Value,
    ) {
        let mut request = client.post(&endpoint).json(&body);
        if let Some(token) = &token {
            request = request.bearer_auth(token);
        }
        match request.send().await {
            Ok(response) if !response.status().is_success() => {
                tracing::debug!(
                    endpoint,
                    status = response.status().as_u16(),
                    "Log API rejected event",
                );
            }
            Ok(_) => {}
            Err(e) => tracing::debug!(endpoint, error = %e, "Log shipping failed"),
        }
    }
}

impl EventSink for LogShipper {
    fn emit(&self, event: JobEvent) {
        TracingSink::log(&event);

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::debug!("No tokio runtime; event not shipped");
            return;
        };
        runtime.spawn(Self::ship(
            self.client.clone(),
            self.endpoint.clone(),
            self.token.clone(),
            self.body(&event),
        ));
    }
}

fn truncate_chars(message: &str, max: usize) -> String {
    match message.char_indices().nth(max) {
        Some((cut, _)) => message[..cut].to_string(),
        None => message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn shipper() -> LogShipper {
        LogShipper::new(
            &LogApiConfig {
                endpoint: "http://127.0.0.1:9/logs".into(),
                token: Some("token".into()),
            },
            "snap-worker-test",
        )
        .unwrap()
    }

    #[test]
    fn builder_sets_fields() {
        let event = JobEvent::new(EVENT_JOB_FAILED, "boom")
            .for_job("job-1")
            .with_level(EventLevel::Error)
            .with_payload(serde_json::json!({ "stage": "submitted" }));

        assert_eq!(event.event_type, "job.failed");
        assert_eq!(event.job_id.as_deref(), Some("job-1"));
        assert_eq!(event.level, EventLevel::Error);
        assert_eq!(event.payload["stage"], "submitted");
    }

    #[test]
    fn new_event_defaults_to_info_with_empty_payload() {
        let event = JobEvent::new(EVENT_JOB_RECEIVED, "hello");
        assert_eq!(event.level, EventLevel::Info);
        assert!(event.job_id.is_none());
        assert_eq!(event.payload, serde_json::json!({}));
    }

    #[test]
    fn shipped_body_has_expected_shape() {
        let event = JobEvent::new(EVENT_JOB_COMPLETED, "done")
            .for_job("job-7")
            .with_level(EventLevel::Warn);

        let body = shipper().body(&event);

        assert_eq!(body["app_name"], "snap-worker-test");
        assert_eq!(body["job_id"], "job-7");
        assert_eq!(body["level"], "warn");
        assert_eq!(body["event_type"], "job.completed");
        assert_eq!(body["message"], "done");
        assert!(body["timestamp"].is_string());
    }

    #[test]
    fn shipped_message_is_truncated() {
        let long = "é".repeat(MAX_SHIPPED_MESSAGE_CHARS + 50);
        let body = shipper().body(&JobEvent::new(EVENT_JOB_FAILED, long));
        let message = body["message"].as_str().unwrap();
        assert_eq!(message.chars().count(), MAX_SHIPPED_MESSAGE_CHARS);
    }

    #[test]
    fn emit_outside_runtime_does_not_panic() {
        shipper().emit(JobEvent::new(EVENT_JOB_RECEIVED, "no runtime"));
    }

    #[tokio::test]
    async fn emit_to_dead_endpoint_is_silent() {
        shipper().emit(JobEvent::new(EVENT_JOB_RECEIVED, "nobody listening"));
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}
