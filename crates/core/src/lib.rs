//! Core domain logic for the snap ComfyUI worker.
//!
//! Everything in this crate is pure (no network or filesystem access) so
//! it can be tested in isolation: job request validation and response
//! shapes, the workflow document model with its parameter overlay and
//! filename-prefix rewriting, and resource threshold evaluation.

pub mod error;
pub mod job;
pub mod resources;
pub mod workflow;
