use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use snap_comfyui::readiness::DEFAULT_PROBE_INTERVAL;
use snap_core::resources::{ResourceThresholds, DEFAULT_LOW_DISK_BYTES, DEFAULT_LOW_MEMORY_GB};

/// Remote log collection endpoint.
#[derive(Debug, Clone)]
pub struct LogApiConfig {
    pub endpoint: String,
    /// Sent as a bearer token when set.
    pub token: Option<String>,
}

/// Worker configuration loaded once at startup.
///
/// Constructed by [`WorkerConfig::from_env`] and shared read-only (via
/// `Arc`) by the resource guard, backend client, and job handler.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// ComfyUI base URL.
    pub comfyui_url: String,
    /// Per-request timeout for ComfyUI calls.
    pub request_timeout: Duration,
    /// Delay between history polls while a job runs.
    pub poll_interval: Duration,
    /// Delay between startup readiness probes.
    pub ready_poll_interval: Duration,
    /// Consecutive history-poll failures tolerated before a job fails.
    pub max_poll_errors: u32,
    pub thresholds: ResourceThresholds,
    /// Filesystem checked for free space.
    pub disk_check_path: PathBuf,
    /// Directory holding `<workflow>.json` templates.
    pub workflows_dir: PathBuf,
    /// ComfyUI output directory (`type == "output"` images).
    pub output_dir: PathBuf,
    /// Temp directory on the shared network volume, searched first.
    pub volume_temp_dir: PathBuf,
    /// Local ComfyUI temp directory, searched second.
    pub temp_dir: PathBuf,
    pub log_api: Option<LogApiConfig>,
    /// Emit JSON log lines instead of human-readable ones.
    pub log_json: bool,
    /// Application name attached to shipped log events.
    pub app_name: String,
    /// Job request file consumed by the binary.
    pub job_input_path: PathBuf,
}

/// A configuration value that could not be parsed.
#[derive(Debug, thiserror::Error)]
#[error("{name} must be a valid {expected}, got '{value}'")]
pub struct ConfigError {
    pub name: &'static str,
    pub expected: &'static str,
    pub value: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            comfyui_url: "http://127.0.0.1:3000".into(),
            request_timeout: Duration::from_secs(600),
            poll_interval: Duration::from_millis(1000),
            ready_poll_interval: DEFAULT_PROBE_INTERVAL,
            max_poll_errors: 10,
            thresholds: ResourceThresholds::default(),
            disk_check_path: PathBuf::from("/"),
            workflows_dir: PathBuf::from("/workflows"),
            output_dir: PathBuf::from("/comfyui/output"),
            volume_temp_dir: PathBuf::from("/runpod-volume/ComfyUI/temp"),
            temp_dir: PathBuf::from("/comfyui/temp"),
            log_api: None,
            log_json: false,
            app_name: "snap-worker".into(),
            job_input_path: PathBuf::from("test_input.json"),
        }
    }
}

impl WorkerConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                        | Default                          |
    /// |--------------------------------|----------------------------------|
    /// | `COMFYUI_URL`                  | `http://127.0.0.1:3000`          |
    /// | `COMFYUI_REQUEST_TIMEOUT_SECS` | `600`                            |
    /// | `POLL_INTERVAL_MS`             | `1000`                           |
    /// | `READY_POLL_INTERVAL_MS`       | `200`                            |
    /// | `MAX_POLL_ERRORS`              | `10`                             |
    /// | `LOW_MEMORY_THRESHOLD_GB`      | `1.0`                            |
    /// | `LOW_DISK_THRESHOLD_BYTES`     | `1073741824`                     |
    /// | `DISK_CHECK_PATH`              | `/`                              |
    /// | `WORKFLOWS_DIR`                | `/workflows`                     |
    /// | `COMFYUI_OUTPUT_DIR`           | `/comfyui/output`                |
    /// | `VOLUME_TEMP_DIR`              | `/runpod-volume/ComfyUI/temp`    |
    /// | `COMFYUI_TEMP_DIR`             | `/comfyui/temp`                  |
    /// | `LOG_API_ENDPOINT`             | unset (no log shipping)          |
    /// | `LOG_API_TOKEN`                | unset                            |
    /// | `LOG_FORMAT`                   | `text` (`json` for JSON lines)   |
    /// | `APP_NAME`                     | `snap-worker`                    |
    /// | `JOB_INPUT_PATH`               | `test_input.json`                |
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build a configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let defaults = Self::default();
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let path = |name: &str, default: PathBuf| var(name).map(PathBuf::from).unwrap_or(default);

        let request_timeout_secs: u64 = parse_var(
            &var,
            "COMFYUI_REQUEST_TIMEOUT_SECS",
            defaults.request_timeout.as_secs(),
            "integer",
        )?;
        let poll_interval_ms: u64 = parse_var(
            &var,
            "POLL_INTERVAL_MS",
            defaults.poll_interval.as_millis() as u64,
            "integer",
        )?;
        let ready_poll_interval_ms: u64 = parse_var(
            &var,
            "READY_POLL_INTERVAL_MS",
            defaults.ready_poll_interval.as_millis() as u64,
            "integer",
        )?;
        let max_poll_errors: u32 =
            parse_var(&var, "MAX_POLL_ERRORS", defaults.max_poll_errors, "integer")?;
        let low_memory_gb: f64 = parse_var(
            &var,
            "LOW_MEMORY_THRESHOLD_GB",
            DEFAULT_LOW_MEMORY_GB,
            "number",
        )?;
        let low_disk_bytes: u64 = parse_var(
            &var,
            "LOW_DISK_THRESHOLD_BYTES",
            DEFAULT_LOW_DISK_BYTES,
            "integer",
        )?;

        let log_api = var("LOG_API_ENDPOINT").map(|endpoint| LogApiConfig {
            endpoint,
            token: var("LOG_API_TOKEN"),
        });

        Ok(Self {
            comfyui_url: var("COMFYUI_URL").unwrap_or(defaults.comfyui_url),
            request_timeout: Duration::from_secs(request_timeout_secs),
            poll_interval: Duration::from_millis(poll_interval_ms),
            ready_poll_interval: Duration::from_millis(ready_poll_interval_ms),
            max_poll_errors,
            thresholds: ResourceThresholds {
                low_memory_gb,
                low_disk_bytes,
            },
            disk_check_path: path("DISK_CHECK_PATH", defaults.disk_check_path),
            workflows_dir: path("WORKFLOWS_DIR", defaults.workflows_dir),
            output_dir: path("COMFYUI_OUTPUT_DIR", defaults.output_dir),
            volume_temp_dir: path("VOLUME_TEMP_DIR", defaults.volume_temp_dir),
            temp_dir: path("COMFYUI_TEMP_DIR", defaults.temp_dir),
            log_api,
            log_json: var("LOG_FORMAT").is_some_and(|f| f.eq_ignore_ascii_case("json")),
            app_name: var("APP_NAME").unwrap_or(defaults.app_name),
            job_input_path: path("JOB_INPUT_PATH", defaults.job_input_path),
        })
    }
}

fn parse_var<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    name: &'static str,
    default: T,
    expected: &'static str,
) -> Result<T, ConfigError> {
    match var(name) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError {
            name,
            expected,
            value,
        }),
    }
}
