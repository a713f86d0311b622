//! ComfyUI REST client library.
//!
//! Provides the HTTP API wrapper (workflow submission, history lookup,
//! liveness), typed history entries, the startup readiness prober, and
//! the error budget used when history polling runs into transport errors.

pub mod api;
pub mod backoff;
pub mod history;
pub mod readiness;

pub use api::{ComfyUIApi, ComfyUIApiError, ComfyUIBackend, SubmitResponse};
pub use history::{HistoryEntry, ImageRef, JobOutcome};
