//! Startup readiness probe.
//!
//! ComfyUI takes a while to load models after the container starts.
//! [`wait_for_ready`] blocks until the root endpoint answers 200. There is
//! no attempt limit: the worker is useless until the backend is up, and
//! the host kills the process if startup takes too long.

use std::time::Duration;

use crate::api::ComfyUIApi;

/// Default delay between probes.
pub const DEFAULT_PROBE_INTERVAL: Duration = Duration::from_millis(200);

/// Emit a progress line once per this many consecutive failures.
pub const LOG_EVERY_N_FAILURES: u32 = 15;

/// Poll ComfyUI until it responds with HTTP 200.
///
/// Connection-refused errors are expected while the backend boots and
/// are retried silently. Returns the number of probes it took.
pub async fn wait_for_ready(api: &ComfyUIApi, interval: Duration) -> u32 {
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match api.is_alive().await {
            Ok(true) => {
                tracing::info!(api_url = api.api_url(), attempt, "ComfyUI is ready");
                return attempt;
            }
            Ok(false) => {}
            Err(e) if e.is_connect() => {}
            Err(e) => {
                tracing::debug!(api_url = api.api_url(), error = %e, "ComfyUI readiness probe failed");
            }
        }

        if progress_due(attempt) {
            tracing::info!(
                api_url = api.api_url(),
                attempt,
                "Waiting for ComfyUI to become ready",
            );
        }

        tokio::time::sleep(interval).await;
    }
}

/// Whether this many failed readiness checks warrant a progress line.
fn progress_due(failed_attempts: u32) -> bool {
    failed_attempts % LOG_EVERY_N_FAILURES == 0
}
