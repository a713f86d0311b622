//! Host resource snapshots and threshold evaluation.
//!
//! Pure logic with no filesystem access. The worker's telemetry layer
//! builds a [`ResourceSnapshot`] and passes it in. Every metric is
//! optional: a metric the host could not report is skipped, never
//! treated as a failure.

use serde::Serialize;

/// Bytes in one gibibyte (the "GB" used throughout telemetry).
pub const BYTES_PER_GB: u64 = 1024 * 1024 * 1024;

/// Default low-memory threshold in GB.
pub const DEFAULT_LOW_MEMORY_GB: f64 = 1.0;

/// Default low-disk threshold in bytes (1 GB).
pub const DEFAULT_LOW_DISK_BYTES: u64 = BYTES_PER_GB;

/// Convert a byte count to GB.
pub fn bytes_to_gb(bytes: u64) -> f64 {
    bytes as f64 / BYTES_PER_GB as f64
}

fn gb(bytes: &u64) -> f64 {
    bytes_to_gb(*bytes)
}

/// Container memory figures, in GB.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MemoryInfo {
    pub total_gb: Option<f64>,
    pub used_gb: Option<f64>,
    pub available_gb: Option<f64>,
}

/// Container CPU allocation and cumulative usage.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CpuInfo {
    /// Effective core count (quota / period, or host cores when unlimited).
    pub cores: Option<f64>,
    /// Cumulative CPU time consumed by the container, in microseconds.
    pub usage_usec: Option<u64>,
}

/// Filesystem capacity for the disk the backend writes to.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiskInfo {
    pub total_bytes: Option<u64>,
    pub used_bytes: Option<u64>,
    pub free_bytes: Option<u64>,
}

/// One point-in-time reading of host resources.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ResourceSnapshot {
    pub memory: MemoryInfo,
    pub cpu: CpuInfo,
    pub disk: DiskInfo,
}

/// Limits below which the worker is considered unhealthy.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResourceThresholds {
    pub low_memory_gb: f64,
    pub low_disk_bytes: u64,
}

impl Default for ResourceThresholds {
    fn default() -> Self {
        Self {
            low_memory_gb: DEFAULT_LOW_MEMORY_GB,
            low_disk_bytes: DEFAULT_LOW_DISK_BYTES,
        }
    }
}

/// A failed resource check.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ResourceIssue {
    #[error(
        "Insufficient memory: {available_gb:.2} GB available, at least {threshold_gb:.2} GB required"
    )]
    LowMemory { available_gb: f64, threshold_gb: f64 },

    #[error(
        "Insufficient disk space: {:.2} GB free, at least {:.2} GB required",
        gb(.free_bytes),
        gb(.threshold_bytes)
    )]
    LowDisk { free_bytes: u64, threshold_bytes: u64 },
}

/// Check available memory against the low-memory threshold.
///
/// Returns `None` when memory is healthy or was not reported.
pub fn check_memory(
    snapshot: &ResourceSnapshot,
    thresholds: &ResourceThresholds,
) -> Option<ResourceIssue> {
    let available_gb = snapshot.memory.available_gb?;
    (available_gb < thresholds.low_memory_gb).then_some(ResourceIssue::LowMemory {
        available_gb,
        threshold_gb: thresholds.low_memory_gb,
    })
}

/// Check free disk space against the low-disk threshold.
///
/// Returns `None` when disk is healthy or was not reported.
pub fn check_disk(
    snapshot: &ResourceSnapshot,
    thresholds: &ResourceThresholds,
) -> Option<ResourceIssue> {
    let free_bytes = snapshot.disk.free_bytes?;
    (free_bytes < thresholds.low_disk_bytes).then_some(ResourceIssue::LowDisk {
        free_bytes,
        threshold_bytes: thresholds.low_disk_bytes,
    })
}
