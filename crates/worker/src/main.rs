use std::sync::Arc;

use snap_comfyui::readiness::wait_for_ready;
use snap_comfyui::ComfyUIApi;
use snap_core::job::JobRequest;

use snap_worker::config::WorkerConfig;
use snap_worker::events::{EventSink, LogShipper, TracingSink};
use snap_worker::handler::JobHandler;
use snap_worker::logging;
use snap_worker::telemetry::CgroupTelemetry;

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    // --- Configuration ---
    let config = match WorkerConfig::from_env() {
        Ok(config) => Arc::new(config),
        Err(e) => {
            eprintln!("Invalid configuration: {e}");
            std::process::exit(1);
        }
    };

    // --- Tracing ---
    logging::init(&config);
    tracing::info!(
        comfyui_url = %config.comfyui_url,
        workflows_dir = %config.workflows_dir.display(),
        "Loaded worker configuration",
    );

    // --- ComfyUI ---
    let api = match ComfyUIApi::new(&config.comfyui_url, config.request_timeout) {
        Ok(api) => api,
        Err(e) => {
            tracing::error!(error = %e, "Failed to build ComfyUI client");
            std::process::exit(1);
        }
    };
    wait_for_ready(&api, config.ready_poll_interval).await;

    // --- Event sink ---
    let events: Arc<dyn EventSink> = match &config.log_api {
        Some(log_api) => match LogShipper::new(log_api, &config.app_name) {
            Ok(shipper) => {
                tracing::info!(endpoint = %log_api.endpoint, "Log shipping enabled");
                Arc::new(shipper)
            }
            Err(e) => {
                tracing::warn!(error = %e, "Log shipping disabled: failed to build client");
                Arc::new(TracingSink)
            }
        },
        None => Arc::new(TracingSink),
    };

    let handler = JobHandler::new(
        Arc::clone(&config),
        Arc::new(api),
        Arc::new(CgroupTelemetry::new(&config.disk_check_path)),
        events,
    );

    // --- Job ---
    let request = match read_job_request(&config) {
        Ok(request) => request,
        Err(e) => {
            tracing::error!(path = %config.job_input_path.display(), error = %e, "Failed to read job request");
            std::process::exit(1);
        }
    };

    let response = handler.handle(request).await;

    match serde_json::to_string(&response) {
        Ok(json) => println!("{json}"),
        Err(e) => {
            tracing::error!(error = %e, "Failed to encode job response");
            std::process::exit(1);
        }
    }
}

fn read_job_request(config: &WorkerConfig) -> Result<JobRequest, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(&config.job_input_path)?;
    Ok(serde_json::from_str(&contents)?)
}
