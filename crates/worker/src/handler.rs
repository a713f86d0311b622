//! Job orchestration.
//!
//! [`JobHandler::handle`] drives one job through
//! `Received → Validated → ResourceChecked → PayloadBuilt → Submitted →
//! Polling → Succeeded | Failed → ResponseReady` and turns every outcome
//! into a [`JobResponse`]. Nothing escapes as an error or a panic.

use std::sync::Arc;
use std::time::Duration;

use snap_comfyui::backoff::PollBackoff;
use snap_comfyui::{ComfyUIApiError, ComfyUIBackend, HistoryEntry, JobOutcome};
use snap_core::error::CoreError;
use snap_core::job::{JobInput, JobRequest, JobResponse, OutputImage};
use snap_core::resources::ResourceIssue;

use crate::config::WorkerConfig;
use crate::events::{
    EventLevel, EventSink, JobEvent, EVENT_JOB_COMPLETED, EVENT_JOB_FAILED, EVENT_JOB_RECEIVED,
    EVENT_JOB_REJECTED, EVENT_JOB_SUBMITTED,
};
use crate::guard::ResourceGuard;
use crate::outputs::{CollectError, OutputCollector};
use crate::telemetry::HostTelemetry;
use crate::templates::TemplateStore;

/// Upper bound on the delay between history polls after errors.
const MAX_POLL_BACKOFF: Duration = Duration::from_secs(30);

/// Log a "still running" line once per this many pending polls.
const LOG_EVERY_N_POLLS: u64 = 30;

// ---------------------------------------------------------------------------
// Stages and errors
// ---------------------------------------------------------------------------

/// Where a job is in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobStage {
    Received,
    Validated,
    ResourceChecked,
    PayloadBuilt,
    Submitted,
    Polling,
    Succeeded,
    Failed,
    ResponseReady,
}

impl JobStage {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Received => "received",
            Self::Validated => "validated",
            Self::ResourceChecked => "resource_checked",
            Self::PayloadBuilt => "payload_built",
            Self::Submitted => "submitted",
            Self::Polling => "polling",
            Self::Succeeded => "succeeded",
            Self::Failed => "failed",
            Self::ResponseReady => "response_ready",
        }
    }
}

impl std::fmt::Display for JobStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a job failed. Converted to a [`JobResponse`] at the boundary.
#[derive(Debug, thiserror::Error)]
enum HandlerError {
    #[error(transparent)]
    Validation(CoreError),

    #[error(transparent)]
    Resources(#[from] ResourceIssue),

    #[error("Failed to build workflow payload: {0}")]
    Payload(CoreError),

    #[error("Failed to queue prompt: {0}")]
    Submit(ComfyUIApiError),

    #[error("Failed to poll job history: {0}")]
    Poll(ComfyUIApiError),

    #[error("Workflow execution error: {0}")]
    Execution(String),

    #[error("No output found")]
    NoOutput,

    #[error(transparent)]
    Collect(#[from] CollectError),
}

impl HandlerError {
    /// Missing or unreadable templates leave the worker in a state a fresh
    /// process fixes.
    fn refresh_worker(&self) -> bool {
        matches!(self, Self::Payload(_))
    }

    /// Rejected before anything was submitted.
    fn is_rejection(&self) -> bool {
        matches!(self, Self::Validation(_) | Self::Resources(_))
    }
}

// ---------------------------------------------------------------------------
// JobHandler
// ---------------------------------------------------------------------------

/// Runs jobs against one ComfyUI backend.
pub struct JobHandler {
    config: Arc<WorkerConfig>,
    backend: Arc<dyn ComfyUIBackend>,
    guard: ResourceGuard,
    templates: TemplateStore,
    collector: OutputCollector,
    events: Arc<dyn EventSink>,
}

impl JobHandler {
    pub fn new(
        config: Arc<WorkerConfig>,
        backend: Arc<dyn ComfyUIBackend>,
        telemetry: Arc<dyn HostTelemetry>,
        events: Arc<dyn EventSink>,
    ) -> Self {
        Self {
            guard: ResourceGuard::new(telemetry, config.thresholds),
            templates: TemplateStore::new(&config.workflows_dir),
            collector: OutputCollector::from_config(&config),
            config,
            backend,
            events,
        }
    }

    /// Process one job and produce the response for the outer runtime.
    pub async fn handle(&self, request: JobRequest) -> JobResponse {
        let job_id = request.id.as_str();
        self.stage(job_id, JobStage::Received);
        self.events
            .emit(JobEvent::new(EVENT_JOB_RECEIVED, "Job received").for_job(job_id));

        let response = match self.run(&request).await {
            Ok(images) => {
                self.stage(job_id, JobStage::Succeeded);
                self.events.emit(
                    JobEvent::new(EVENT_JOB_COMPLETED, "Job completed")
                        .for_job(job_id)
                        .with_payload(serde_json::json!({ "images": images.len() })),
                );
                let response = JobResponse::success(images);
                if self.guard.needs_refresh() {
                    response.with_refresh()
                } else {
                    response
                }
            }
            Err(e) => {
                self.stage(job_id, JobStage::Failed);
                tracing::error!(job_id, error = %e, "Job failed");
                let event_type = if e.is_rejection() {
                    EVENT_JOB_REJECTED
                } else {
                    EVENT_JOB_FAILED
                };
                self.events.emit(
                    JobEvent::new(event_type, e.to_string())
                        .for_job(job_id)
                        .with_level(EventLevel::Error),
                );
                let response = JobResponse::failure(e.to_string());
                if e.refresh_worker() {
                    response.with_refresh()
                } else {
                    response
                }
            }
        };

        tracing::info!(
            job_id,
            stage = %JobStage::ResponseReady,
            success = response.is_success(),
            refresh_worker = response.refresh_worker(),
            "Job response ready",
        );
        response
    }

    async fn run(&self, request: &JobRequest) -> Result<Vec<OutputImage>, HandlerError> {
        let job_id = request.id.as_str();

        let input = JobInput::parse(&request.input).map_err(HandlerError::Validation)?;
        self.stage(job_id, JobStage::Validated);

        self.guard.pre_check()?;
        self.stage(job_id, JobStage::ResourceChecked);

        let workflow = self
            .templates
            .build_payload(input.workflow, &input.payload)
            .map_err(|e| match e {
                // A malformed custom graph is the caller's input, not a
                // broken worker.
                CoreError::Validation(_) => HandlerError::Validation(e),
                other => HandlerError::Payload(other),
            })?;
        self.stage(job_id, JobStage::PayloadBuilt);

        let submitted = self
            .backend
            .submit(&workflow)
            .await
            .map_err(HandlerError::Submit)?;
        let prompt_id = submitted.prompt_id.as_str();
        tracing::info!(
            job_id,
            prompt_id,
            stage = %JobStage::Submitted,
            workflow = %input.workflow,
            queue_number = submitted.number,
            "Workflow queued",
        );
        self.events.emit(
            JobEvent::new(EVENT_JOB_SUBMITTED, "Workflow queued")
                .for_job(job_id)
                .with_payload(serde_json::json!({
                    "prompt_id": prompt_id,
                    "workflow": input.workflow.as_str(),
                })),
        );

        self.stage(job_id, JobStage::Polling);
        let entry = self.poll_until_terminal(job_id, prompt_id).await?;

        if entry.outcome() == JobOutcome::Failed {
            return Err(HandlerError::Execution(entry.error_message()));
        }

        let images = self.collector.collect(&entry.outputs)?;
        if images.is_empty() {
            return Err(HandlerError::NoOutput);
        }
        Ok(images)
    }

    /// Poll history until the prompt succeeds or fails.
    ///
    /// A prompt missing from history is still queued and is waited on
    /// without limit. Transport errors back off exponentially and fail the
    /// job once `max_poll_errors` happen in a row.
    async fn poll_until_terminal(
        &self,
        job_id: &str,
        prompt_id: &str,
    ) -> Result<HistoryEntry, HandlerError> {
        let mut backoff = PollBackoff::new(
            self.config.poll_interval,
            MAX_POLL_BACKOFF,
            self.config.max_poll_errors,
        );
        let mut polls = 0u64;

        loop {
            polls += 1;

            match self.backend.history(prompt_id).await {
                Ok(Some(entry)) if entry.outcome() != JobOutcome::Pending => {
                    tracing::info!(
                        job_id,
                        prompt_id,
                        polls,
                        status = %entry.status.status_str,
                        "Prompt finished",
                    );
                    return Ok(entry);
                }
                Ok(_) => {
                    backoff.record_success();
                    if polls % LOG_EVERY_N_POLLS == 0 {
                        tracing::info!(job_id, prompt_id, polls, "Waiting for prompt to finish");
                    }
                }
                Err(e) => {
                    let Some(delay) = backoff.record_error() else {
                        return Err(HandlerError::Poll(e));
                    };
                    tracing::warn!(
                        job_id,
                        prompt_id,
                        consecutive_errors = backoff.consecutive_errors(),
                        retry_in_ms = delay.as_millis() as u64,
                        error = %e,
                        "History poll failed, retrying",
                    );
                }
            }

            tokio::time::sleep(backoff.delay()).await;
        }
    }

    fn stage(&self, job_id: &str, stage: JobStage) {
        tracing::info!(job_id, stage = %stage, "Job stage");
    }
}
