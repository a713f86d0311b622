//! Serverless worker that runs ComfyUI workflows one job at a time.
//!
//! A job is validated, gated on host resources, turned into a ComfyUI
//! workflow document, queued, polled to completion, and answered with the
//! produced images as base64. See [`handler::JobHandler`].

pub mod config;
pub mod events;
pub mod guard;
pub mod handler;
pub mod logging;
pub mod outputs;
pub mod telemetry;
pub mod templates;
