//! Resource checks around a job.
//!
//! The pre-check runs before anything is submitted and rejects the job on
//! low disk or low memory. The post-check runs after a successful job and
//! only asks for a worker refresh on low memory.

use std::sync::Arc;

use snap_core::resources::{
    check_disk, check_memory, ResourceIssue, ResourceSnapshot, ResourceThresholds,
};

use crate::telemetry::HostTelemetry;

pub struct ResourceGuard {
    telemetry: Arc<dyn HostTelemetry>,
    thresholds: ResourceThresholds,
}

impl ResourceGuard {
    pub fn new(telemetry: Arc<dyn HostTelemetry>, thresholds: ResourceThresholds) -> Self {
        Self {
            telemetry,
            thresholds,
        }
    }

    /// Take a fresh reading and log it.
    pub fn snapshot(&self) -> ResourceSnapshot {
        let snapshot = self.telemetry.snapshot();
        tracing::info!(
            memory_total_gb = ?snapshot.memory.total_gb,
            memory_used_gb = ?snapshot.memory.used_gb,
            memory_available_gb = ?snapshot.memory.available_gb,
            cpu_cores = ?snapshot.cpu.cores,
            cpu_usage_usec = ?snapshot.cpu.usage_usec,
            disk_free_bytes = ?snapshot.disk.free_bytes,
            disk_total_bytes = ?snapshot.disk.total_bytes,
            "Container resources",
        );
        snapshot
    }

    pub fn check_disk(&self) -> Result<(), ResourceIssue> {
        match check_disk(&self.snapshot(), &self.thresholds) {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }

    pub fn check_memory(&self) -> Result<(), ResourceIssue> {
        match check_memory(&self.snapshot(), &self.thresholds) {
            Some(issue) => Err(issue),
            None => Ok(()),
        }
    }

    /// Gate a job before submission: disk first, then memory.
    ///
    /// Both checks read the same snapshot.
    pub fn pre_check(&self) -> Result<(), ResourceIssue> {
        let snapshot = self.snapshot();
        if let Some(issue) = check_disk(&snapshot, &self.thresholds) {
            tracing::warn!(error = %issue, "Disk check failed");
            return Err(issue);
        }
        if let Some(issue) = check_memory(&snapshot, &self.thresholds) {
            tracing::warn!(error = %issue, "Memory check failed");
            return Err(issue);
        }
        Ok(())
    }

    /// Whether the worker should be recycled after this job.
    pub fn needs_refresh(&self) -> bool {
        match check_memory(&self.snapshot(), &self.thresholds) {
            Some(issue) => {
                tracing::warn!(error = %issue, "Low memory after job, requesting worker refresh");
                true
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use snap_core::resources::{DiskInfo, MemoryInfo, BYTES_PER_GB};

    use super::*;

    struct FixedTelemetry(Mutex<ResourceSnapshot>);

    impl HostTelemetry for FixedTelemetry {
        fn snapshot(&self) -> ResourceSnapshot {
            self.0.lock().unwrap().clone()
        }
    }

    fn guard(available_gb: Option<f64>, free_bytes: Option<u64>) -> ResourceGuard {
        let snapshot = ResourceSnapshot {
            memory: MemoryInfo {
                available_gb,
                ..Default::default()
            },
            disk: DiskInfo {
                free_bytes,
                ..Default::default()
            },
            ..Default::default()
        };
        ResourceGuard::new(
            Arc::new(FixedTelemetry(Mutex::new(snapshot))),
            ResourceThresholds::default(),
        )
    }

    #[test]
    fn healthy_host_passes() {
        let guard = guard(Some(8.0), Some(50 * BYTES_PER_GB));
        assert!(guard.pre_check().is_ok());
        assert!(!guard.needs_refresh());
    }

    #[test]
    fn disk_is_checked_before_memory() {
        let guard = guard(Some(0.5), Some(BYTES_PER_GB / 2));
        let err = guard.pre_check().unwrap_err();
        assert!(matches!(err, ResourceIssue::LowDisk { .. }));
        assert!(err.to_string().contains("disk"));
    }

    #[test]
    fn low_memory_fails_pre_check_and_requests_refresh() {
        let guard = guard(Some(0.5), Some(50 * BYTES_PER_GB));
        let err = guard.pre_check().unwrap_err();
        assert!(err.to_string().contains("memory"));
        assert!(guard.check_memory().is_err());
        assert!(guard.check_disk().is_ok());
        assert!(guard.needs_refresh());
    }

    #[test]
    fn missing_metrics_are_healthy() {
        let guard = guard(None, None);
        assert!(guard.pre_check().is_ok());
        assert!(!guard.needs_refresh());
    }
}
