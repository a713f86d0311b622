//! Host resource telemetry.
//!
//! [`CgroupTelemetry`] reads the container's own limits rather than the
//! host's: cgroup v2 first, then cgroup v1, then `/proc/meminfo` when no
//! memory limit applies. Disk figures come from `statvfs` on a configured
//! path. Every reader degrades to `None` on failure; a snapshot is never an
//! error.

use std::path::{Path, PathBuf};

use snap_core::resources::{bytes_to_gb, CpuInfo, DiskInfo, MemoryInfo, ResourceSnapshot};

const DEFAULT_CGROUP_ROOT: &str = "/sys/fs/cgroup";
const DEFAULT_MEMINFO_PATH: &str = "/proc/meminfo";

/// cgroup v1 reports "unlimited" as a huge page-aligned number.
const CGROUP_V1_UNLIMITED: u64 = 1 << 60;

/// Source of [`ResourceSnapshot`]s.
pub trait HostTelemetry: Send + Sync {
    /// Take a fresh reading. Never cached.
    fn snapshot(&self) -> ResourceSnapshot;
}

/// Reads container limits from cgroupfs and procfs.
#[derive(Debug, Clone)]
pub struct CgroupTelemetry {
    cgroup_root: PathBuf,
    meminfo_path: PathBuf,
    disk_path: PathBuf,
}

impl CgroupTelemetry {
    pub fn new(disk_path: impl Into<PathBuf>) -> Self {
        Self::with_roots(DEFAULT_CGROUP_ROOT, DEFAULT_MEMINFO_PATH, disk_path)
    }

    /// Read from alternative cgroup and meminfo locations.
    pub fn with_roots(
        cgroup_root: impl Into<PathBuf>,
        meminfo_path: impl Into<PathBuf>,
        disk_path: impl Into<PathBuf>,
    ) -> Self {
        Self {
            cgroup_root: cgroup_root.into(),
            meminfo_path: meminfo_path.into(),
            disk_path: disk_path.into(),
        }
    }

    fn cgroup_file(&self, relative: &str) -> PathBuf {
        self.cgroup_root.join(relative)
    }

    // -- memory --------------------------------------------------------------

    /// `(limit, usage)` in bytes from the container's memory cgroup.
    fn cgroup_memory(&self) -> (Option<u64>, Option<u64>) {
        let v2_usage = read_u64(&self.cgroup_file("memory.current"));
        if v2_usage.is_some() {
            let limit = read_limit(&self.cgroup_file("memory.max"));
            return (limit, v2_usage);
        }

        let limit = read_u64(&self.cgroup_file("memory/memory.limit_in_bytes"))
            .filter(|limit| *limit < CGROUP_V1_UNLIMITED);
        let usage = read_u64(&self.cgroup_file("memory/memory.usage_in_bytes"));
        (limit, usage)
    }

    fn memory_info(&self) -> MemoryInfo {
        let (limit, usage) = self.cgroup_memory();

        if let (Some(limit), Some(usage)) = (limit, usage) {
            return MemoryInfo {
                total_gb: Some(bytes_to_gb(limit)),
                used_gb: Some(bytes_to_gb(usage)),
                available_gb: Some(bytes_to_gb(limit.saturating_sub(usage))),
            };
        }

        let total = read_meminfo_bytes(&self.meminfo_path, "MemTotal:");
        let available = read_meminfo_bytes(&self.meminfo_path, "MemAvailable:");
        let used = match (total, available) {
            (Some(total), Some(available)) => Some(total.saturating_sub(available)),
            _ => usage,
        };

        let info = MemoryInfo {
            total_gb: total.map(bytes_to_gb),
            used_gb: used.map(bytes_to_gb),
            available_gb: available.map(bytes_to_gb),
        };
        if info == MemoryInfo::default() {
            tracing::warn!(
                cgroup_root = %self.cgroup_root.display(),
                "Memory telemetry unavailable",
            );
        }
        info
    }

    // -- cpu -----------------------------------------------------------------

    fn cpu_quota_cores(&self) -> Option<f64> {
        if let Some(contents) = read_trimmed(&self.cgroup_file("cpu.max")) {
            return parse_cpu_max(&contents);
        }

        let quota: i64 = read_trimmed(&self.cgroup_file("cpu/cpu.cfs_quota_us"))?
            .parse()
            .ok()?;
        let period = read_u64(&self.cgroup_file("cpu/cpu.cfs_period_us"))?;
        (quota > 0 && period > 0).then(|| quota as f64 / period as f64)
    }

    fn cpu_usage_usec(&self) -> Option<u64> {
        if let Some(stat) = read_trimmed(&self.cgroup_file("cpu.stat")) {
            return stat.lines().find_map(|line| {
                line.strip_prefix("usage_usec ")
                    .and_then(|v| v.trim().parse().ok())
            });
        }
        read_u64(&self.cgroup_file("cpuacct/cpuacct.usage")).map(|nanos| nanos / 1000)
    }

    fn cpu_info(&self) -> CpuInfo {
        let cores = self.cpu_quota_cores().or_else(|| {
            std::thread::available_parallelism()
                .ok()
                .map(|n| n.get() as f64)
        });
        CpuInfo {
            cores,
            usage_usec: self.cpu_usage_usec(),
        }
    }

    // -- disk ----------------------------------------------------------------

    fn disk_info(&self) -> DiskInfo {
        let info = disk_stats(&self.disk_path);
        if info == DiskInfo::default() {
            tracing::warn!(path = %self.disk_path.display(), "Disk telemetry unavailable");
        }
        info
    }
}

impl HostTelemetry for CgroupTelemetry {
    fn snapshot(&self) -> ResourceSnapshot {
        ResourceSnapshot {
            memory: self.memory_info(),
            cpu: self.cpu_info(),
            disk: self.disk_info(),
        }
    }
}

// ---------------------------------------------------------------------------
// File helpers
// ---------------------------------------------------------------------------

fn read_trimmed(path: &Path) -> Option<String> {
    std::fs::read_to_string(path)
        .ok()
        .map(|s| s.trim().to_string())
}

fn read_u64(path: &Path) -> Option<u64> {
    read_trimmed(path)?.parse().ok()
}

/// A cgroup v2 limit file: a byte count, or `max` for unlimited.
fn read_limit(path: &Path) -> Option<u64> {
    match read_trimmed(path)?.as_str() {
        "max" => None,
        value => value.parse().ok(),
    }
}

/// Parse cgroup v2 `cpu.max` (`"<quota|max> <period>"`) into cores.
fn parse_cpu_max(contents: &str) -> Option<f64> {
    let mut parts = contents.split_whitespace();
    let quota: f64 = parts.next()?.parse().ok()?;
    let period: f64 = parts.next()?.parse().ok()?;
    (quota > 0.0 && period > 0.0).then(|| quota / period)
}

fn read_meminfo_bytes(path: &Path, key: &str) -> Option<u64> {
    let contents = std::fs::read_to_string(path).ok()?;
    contents.lines().find_map(|line| {
        let raw = line.strip_prefix(key)?.trim().strip_suffix("kB")?.trim();
        raw.parse::<u64>().ok().map(|kib| kib.saturating_mul(1024))
    })
}

#[cfg(unix)]
fn disk_stats(path: &Path) -> DiskInfo {
    use std::ffi::CString;
    use std::mem::MaybeUninit;
    use std::os::unix::ffi::OsStrExt;

    let Ok(c_path) = CString::new(path.as_os_str().as_bytes()) else {
        return DiskInfo::default();
    };
    let mut stat = MaybeUninit::<libc::statvfs>::uninit();

    // SAFETY: `c_path` is a valid NUL-terminated string and `stat` points to
    // writable memory of the right size.
    let ret = unsafe { libc::statvfs(c_path.as_ptr(), stat.as_mut_ptr()) };
    if ret != 0 {
        return DiskInfo::default();
    }
    // SAFETY: statvfs returned 0, so the struct is initialised.
    let stat = unsafe { stat.assume_init() };

    let block_size = stat.f_frsize as u64;
    let total = stat.f_blocks as u64 * block_size;
    let free = stat.f_bavail as u64 * block_size;
    DiskInfo {
        total_bytes: Some(total),
        used_bytes: Some(total.saturating_sub(free)),
        free_bytes: Some(free),
    }
}

#[cfg(not(unix))]
fn disk_stats(_path: &Path) -> DiskInfo {
    DiskInfo::default()
}
