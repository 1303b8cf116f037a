// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! CPU usage and limit from cgroup v1 files.
//!
//! Limits are reported in nanocores (1 core = 1,000,000,000 nanocores). Usage is
//! reported both as the raw cumulative counter and, from the second tick on, as a
//! percentage of the limit over the last interval.

use crate::clock::{Clock, Timestamp};
use crate::errors::CollectorError;
use crate::sampler::Collector;
use crate::store::MetricStore;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::debug;

const CGROUP_CPU_USAGE_PATH: &str = "/sys/fs/cgroup/cpu/cpuacct.usage"; // Total CPU time, in nanoseconds, consumed by all tasks in this cgroup
const CGROUP_CPUSET_CPUS_PATH: &str = "/sys/fs/cgroup/cpuset/cpuset.cpus"; // CPUs that tasks in this cgroup are permitted to access
const CGROUP_CPU_PERIOD_PATH: &str = "/sys/fs/cgroup/cpu/cpu.cfs_period_us"; // CFS reallocation period, in microseconds
const CGROUP_CPU_QUOTA_PATH: &str = "/sys/fs/cgroup/cpu/cpu.cfs_quota_us"; // CPU time, in microseconds, all tasks may use per period

pub const CPU_USAGE_NS_METRIC: &str = "cpu.usage_ns";
pub const CPU_LIMIT_NC_METRIC: &str = "cpu.limit_nc";
pub const CPU_USAGE_PCT_METRIC: &str = "cpu.usage_pct";

const NANOS_PER_CORE: f64 = 1_000_000_000.0;

/// Locations of the cgroup v1 files the collector reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CgroupPaths {
    pub usage: PathBuf,
    pub cpuset_cpus: PathBuf,
    pub cfs_period: PathBuf,
    pub cfs_quota: PathBuf,
}

impl Default for CgroupPaths {
    fn default() -> Self {
        Self {
            usage: PathBuf::from(CGROUP_CPU_USAGE_PATH),
            cpuset_cpus: PathBuf::from(CGROUP_CPUSET_CPUS_PATH),
            cfs_period: PathBuf::from(CGROUP_CPU_PERIOD_PATH),
            cfs_quota: PathBuf::from(CGROUP_CPU_QUOTA_PATH),
        }
    }
}

impl CgroupPaths {
    /// Same layout as `/sys/fs/cgroup`, rooted at `root`.
    #[must_use]
    pub fn under(root: &Path) -> Self {
        Self {
            usage: root.join("cpu/cpuacct.usage"),
            cpuset_cpus: root.join("cpuset/cpuset.cpus"),
            cfs_period: root.join("cpu/cpu.cfs_period_us"),
            cfs_quota: root.join("cpu/cpu.cfs_quota_us"),
        }
    }
}

/// Statistics from cgroup v1 files, normalized to nanoseconds
#[derive(Debug, Default)]
struct CgroupStats {
    total: Option<u64>,            // Cumulative CPU usage in nanoseconds
    cpu_count: Option<u64>,        // Number of accessible logical CPUs
    scheduler_period: Option<u64>, // CFS scheduler period in nanoseconds
    scheduler_quota: Option<u64>,  // CFS scheduler quota in nanoseconds
}

pub struct CgroupCpuCollector {
    store: Arc<MetricStore>,
    clock: Clock,
    paths: CgroupPaths,
    host_cpus: u64,
    previous: Mutex<Option<(u64, Timestamp)>>,
}

impl CgroupCpuCollector {
    #[must_use]
    pub fn new(store: Arc<MetricStore>, clock: Clock) -> Self {
        Self::with_paths(store, clock, CgroupPaths::default())
    }

    #[must_use]
    pub fn with_paths(store: Arc<MetricStore>, clock: Clock, paths: CgroupPaths) -> Self {
        Self {
            store,
            clock,
            paths,
            host_cpus: num_cpus::get() as u64,
            previous: Mutex::new(None),
        }
    }

    /// Overrides the host CPU count used when no cgroup limit applies.
    #[must_use]
    pub fn with_host_cpus(mut self, host_cpus: u64) -> Self {
        self.host_cpus = host_cpus;
        self
    }

    #[allow(clippy::cast_precision_loss)]
    fn usage_pct(&self, total: u64, now: Timestamp, limit_nc: f64) -> Option<f64> {
        let mut previous = self.previous.lock().unwrap_or_else(PoisonError::into_inner);
        let last = previous.replace((total, now));
        let (last_total, last_time) = last?;

        let elapsed_ns = now.as_duration().saturating_sub(last_time.as_duration()).as_nanos();
        if elapsed_ns == 0 || total < last_total || limit_nc <= 0.0 {
            return None;
        }
        let used_nc = (total - last_total) as f64 / elapsed_ns as f64 * NANOS_PER_CORE;
        Some(used_nc / limit_nc * 100.0)
    }
}

impl Collector for CgroupCpuCollector {
    fn name(&self) -> &str {
        "cgroup_cpu"
    }

    #[allow(clippy::cast_precision_loss)]
    fn collect(&self) -> Result<(), CollectorError> {
        let stats = read_cgroup_stats(&self.paths);
        let total = stats.total.ok_or_else(|| {
            CollectorError::Failed(format!(
                "Could not read CPU usage from {}",
                self.paths.usage.display()
            ))
        })?;
        let (limit_nc, defaulted) = compute_cpu_limit_nc(&stats, self.host_cpus);
        if defaulted {
            debug!("No CPU limit found, defaulting to host CPU count: {} CPUs", self.host_cpus);
        }

        let now = self.clock.now();
        self.store.upsert(CPU_USAGE_NS_METRIC, total as f64, now)?;
        self.store.upsert(CPU_LIMIT_NC_METRIC, limit_nc, now)?;
        if let Some(pct) = self.usage_pct(total, now, limit_nc) {
            self.store.upsert(CPU_USAGE_PCT_METRIC, pct, now)?;
        }
        Ok(())
    }
}

fn read_u64(path: &Path) -> Option<u64> {
    fs::read_to_string(path)
        .ok()
        .and_then(|contents| contents.trim().parse::<u64>().ok())
}

fn read_cgroup_stats(paths: &CgroupPaths) -> CgroupStats {
    let total = read_u64(&paths.usage);
    if total.is_none() {
        debug!("Could not read CPU usage from {}", paths.usage.display());
    }

    let cpu_count = match fs::read_to_string(&paths.cpuset_cpus)
        .map_err(CollectorError::from)
        .and_then(|contents| parse_cpuset(&contents))
    {
        Ok(count) => Some(count),
        Err(e) => {
            debug!("Could not read CPU count from {}: {e}", paths.cpuset_cpus.display());
            None
        }
    };

    // microseconds to nanoseconds
    let scheduler_period = read_u64(&paths.cfs_period).map(|v| v.saturating_mul(1000));
    if scheduler_period.is_none() {
        debug!("Could not read scheduler period from {}", paths.cfs_period.display());
    }

    let scheduler_quota = fs::read_to_string(&paths.cfs_quota)
        .ok()
        .and_then(|contents| contents.trim().parse::<i64>().ok())
        .and_then(|quota| {
            if quota < 0 {
                debug!("CFS scheduler quota is {quota}, no quota applies");
                None
            } else {
                u64::try_from(quota).ok().map(|v| v.saturating_mul(1000))
            }
        });

    CgroupStats {
        total,
        cpu_count,
        scheduler_period,
        scheduler_quota,
    }
}

/// Counts the CPUs in a cpuset list.
///
/// The list is comma-separated, with dashes for ranges: `0-2,16` is CPUs 0, 1, 2 and
/// 16, so the count is 4.
pub fn parse_cpuset(cpuset: &str) -> Result<u64, CollectorError> {
    let cpuset = cpuset.trim();
    if cpuset.is_empty() {
        return Err(CollectorError::Failed("cpuset is empty".to_string()));
    }

    let parse = |value: &str| {
        value.trim().parse::<u64>().map_err(|e| {
            CollectorError::Failed(format!("Failed to parse CPU '{value}' in cpuset '{cpuset}': {e}"))
        })
    };

    let overflow = |part: &str| {
        CollectorError::Failed(format!("CPU count overflows at '{part}' in cpuset '{cpuset}'"))
    };

    let mut cpu_count: u64 = 0;
    for part in cpuset.split(',') {
        match part.split_once('-') {
            Some((start, end)) => {
                let (start, end) = (parse(start)?, parse(end)?);
                if end < start {
                    return Err(CollectorError::Failed(format!(
                        "Invalid CPU range '{part}' in cpuset '{cpuset}'"
                    )));
                }
                cpu_count = (end - start)
                    .checked_add(1)
                    .and_then(|span| cpu_count.checked_add(span))
                    .ok_or_else(|| overflow(part))?;
            }
            None => {
                parse(part)?;
                cpu_count = cpu_count.checked_add(1).ok_or_else(|| overflow(part))?;
            }
        }
    }
    Ok(cpu_count)
}

/// Computes the CPU limit in nanocores, with fallback to the host CPU count.
#[allow(clippy::cast_precision_loss)]
fn compute_cpu_limit_nc(stats: &CgroupStats, host_cpus: u64) -> (f64, bool) {
    match compute_cgroup_cpu_limit_nc(stats, host_cpus) {
        Some(limit) => (limit, false),
        None => (host_cpus as f64 * NANOS_PER_CORE, true),
    }
}

/// `min(cpuset, CFS quota)`. A cpuset equal to the host CPU count is not a limit.
#[allow(clippy::cast_precision_loss)]
fn compute_cgroup_cpu_limit_nc(stats: &CgroupStats, host_cpus: u64) -> Option<f64> {
    let cpuset_limit = stats
        .cpu_count
        .filter(|count| *count != host_cpus)
        .map(|count| count as f64 * NANOS_PER_CORE);

    let quota_limit = match (stats.scheduler_quota, stats.scheduler_period) {
        (Some(quota), Some(period)) if period > 0 => {
            Some(NANOS_PER_CORE * (quota as f64 / period as f64))
        }
        _ => None,
    };

    match (cpuset_limit, quota_limit) {
        (Some(cpuset), Some(quota)) => Some(cpuset.min(quota)),
        (cpuset, quota) => cpuset.or(quota),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tempfile::TempDir;

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    fn cgroup(usage: Option<&str>, cpuset: &str, period: &str, quota: &str) -> TempDir {
        let dir = TempDir::new().unwrap();
        if let Some(usage) = usage {
            write(dir.path(), "cpu/cpuacct.usage", usage);
        }
        write(dir.path(), "cpuset/cpuset.cpus", cpuset);
        write(dir.path(), "cpu/cpu.cfs_period_us", period);
        write(dir.path(), "cpu/cpu.cfs_quota_us", quota);
        dir
    }

    #[test]
    fn test_parse_cpuset() {
        assert_eq!(parse_cpuset("0-2,16").unwrap(), 4);
        assert_eq!(parse_cpuset("3\n").unwrap(), 1);
        assert_eq!(parse_cpuset("0-7").unwrap(), 8);
        assert!(parse_cpuset("").is_err());
        assert!(parse_cpuset("a-b").is_err());
        assert!(parse_cpuset("4-1").is_err());
    }

    #[test]
    fn test_parse_cpuset_rejects_overflowing_ranges() {
        assert!(matches!(
            parse_cpuset("0-18446744073709551615"),
            Err(CollectorError::Failed(_))
        ));
        assert!(matches!(
            parse_cpuset("1-18446744073709551615,0"),
            Err(CollectorError::Failed(_))
        ));
        assert_eq!(
            parse_cpuset("1-18446744073709551615").unwrap(),
            u64::MAX
        );
    }

    #[test]
    fn test_limit_is_min_of_cpuset_and_quota() {
        let stats = CgroupStats {
            total: Some(0),
            cpu_count: Some(2),
            scheduler_period: Some(100_000_000),
            scheduler_quota: Some(50_000_000),
        };
        assert_eq!(compute_cpu_limit_nc(&stats, 8), (500_000_000.0, false));

        let stats = CgroupStats {
            cpu_count: Some(2),
            ..Default::default()
        };
        assert_eq!(compute_cpu_limit_nc(&stats, 8), (2_000_000_000.0, false));
    }

    #[test]
    fn test_limit_defaults_to_host_cpus() {
        let stats = CgroupStats {
            cpu_count: Some(4),
            ..Default::default()
        };
        assert_eq!(compute_cpu_limit_nc(&stats, 4), (4_000_000_000.0, true));
    }

    #[test]
    fn test_collect_records_usage_and_limit() {
        let dir = cgroup(Some("123456789\n"), "0-1", "100000", "-1");
        let store = Arc::new(MetricStore::new(None));
        let collector = CgroupCpuCollector::with_paths(
            Arc::clone(&store),
            Clock::new(),
            CgroupPaths::under(dir.path()),
        )
        .with_host_cpus(8);

        collector.collect().unwrap();

        assert_eq!(store.get(CPU_USAGE_NS_METRIC).unwrap().current_value, 123_456_789.0);
        assert_eq!(store.get(CPU_LIMIT_NC_METRIC).unwrap().current_value, 2_000_000_000.0);
        assert!(store.get(CPU_USAGE_PCT_METRIC).is_none());
    }

    #[test]
    fn test_usage_pct_from_consecutive_readings() {
        let store = Arc::new(MetricStore::new(None));
        let collector = CgroupCpuCollector::with_paths(store, Clock::new(), CgroupPaths::default());

        let first = Timestamp::from_duration(Duration::from_secs(1));
        let second = Timestamp::from_duration(Duration::from_secs(2));
        assert!(collector.usage_pct(1_000_000_000, first, 2.0 * NANOS_PER_CORE).is_none());
        // one core busy for the whole second, out of two
        let pct = collector
            .usage_pct(2_000_000_000, second, 2.0 * NANOS_PER_CORE)
            .unwrap();
        assert!((pct - 50.0).abs() < 1e-9);
    }

    #[test]
    fn test_missing_usage_is_an_error() {
        let dir = cgroup(None, "0", "100000", "50000");
        let store = Arc::new(MetricStore::new(None));
        let collector = CgroupCpuCollector::with_paths(
            Arc::clone(&store),
            Clock::new(),
            CgroupPaths::under(dir.path()),
        );

        let err = collector.collect().unwrap_err();
        assert!(err.to_string().starts_with("Could not read CPU usage from"));
        assert!(store.is_empty());
    }
}
