// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! File descriptor and thread usage of one process, from `/proc/<pid>`.

use crate::clock::Clock;
use crate::errors::CollectorError;
use crate::sampler::Collector;
use crate::store::MetricStore;
use regex::Regex;
use std::fs::{self, File};
use std::io::{self, BufRead};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

const PROC_PATH: &str = "/proc";
const SELF_PID: &str = "self";

pub const FD_USE_METRIC: &str = "process.fd_use";
pub const FD_MAX_METRIC: &str = "process.fd_max";
pub const THREADS_USE_METRIC: &str = "process.threads_use";
pub const THREADS_MAX_METRIC: &str = "process.threads_max";

pub struct ProcessUsageCollector {
    store: Arc<MetricStore>,
    clock: Clock,
    proc_root: PathBuf,
    pid: String,
    fd_limit: Regex,
    threads_limit: Regex,
}

impl ProcessUsageCollector {
    /// Watches the current process through `/proc/self`.
    pub fn new(store: Arc<MetricStore>, clock: Clock) -> Result<Self, CollectorError> {
        Self::with_proc_root(store, clock, PROC_PATH, SELF_PID)
    }

    pub fn with_proc_root(
        store: Arc<MetricStore>,
        clock: Clock,
        proc_root: impl Into<PathBuf>,
        pid: impl Into<String>,
    ) -> Result<Self, CollectorError> {
        // Soft limit is the first number after the label
        let fd_limit = Regex::new(r"^Max open files[ \t]+([0-9]+)")
            .map_err(|e| CollectorError::Failed(format!("Failed to create regex: {e}")))?;
        let threads_limit = Regex::new(r"^Max processes[ \t]+([0-9]+)")
            .map_err(|e| CollectorError::Failed(format!("Failed to create regex: {e}")))?;

        Ok(Self {
            store,
            clock,
            proc_root: proc_root.into(),
            pid: pid.into(),
            fd_limit,
            threads_limit,
        })
    }

    fn process_dir(&self) -> PathBuf {
        self.proc_root.join(&self.pid)
    }

    /// Soft limits from `/proc/<pid>/limits`, if the file is readable.
    fn read_limits(&self) -> (Option<u64>, Option<u64>) {
        let limits_path = self.process_dir().join("limits");
        let Ok(file) = File::open(&limits_path) else {
            debug!("Could not open {}", limits_path.display());
            return (None, None);
        };

        let mut fd_max = None;
        let mut threads_max = None;
        for line in io::BufReader::new(file).lines().map_while(Result::ok) {
            if fd_max.is_none() {
                fd_max = capture_limit(&self.fd_limit, &line);
            }
            if threads_max.is_none() {
                threads_max = capture_limit(&self.threads_limit, &line);
            }
            if fd_max.is_some() && threads_max.is_some() {
                break;
            }
        }
        (fd_max, threads_max)
    }
}

fn capture_limit(re: &Regex, line: &str) -> Option<u64> {
    re.captures(line)
        .and_then(|captures| captures.get(1))
        .and_then(|limit| limit.as_str().parse().ok())
}

/// Number of entries in a directory such as `/proc/<pid>/fd`.
fn count_entries(path: &Path) -> Result<usize, CollectorError> {
    Ok(fs::read_dir(path)?.count())
}

impl Collector for ProcessUsageCollector {
    fn name(&self) -> &str {
        "process_usage"
    }

    #[allow(clippy::cast_precision_loss)]
    fn collect(&self) -> Result<(), CollectorError> {
        let dir = self.process_dir();
        let fd_use = count_entries(&dir.join("fd"))?;
        let threads_use = count_entries(&dir.join("task"))?;
        let (fd_max, threads_max) = self.read_limits();

        let now = self.clock.now();
        self.store.upsert(FD_USE_METRIC, fd_use as f64, now)?;
        self.store.upsert(THREADS_USE_METRIC, threads_use as f64, now)?;
        if let Some(fd_max) = fd_max {
            self.store.upsert(FD_MAX_METRIC, fd_max as f64, now)?;
        }
        if let Some(threads_max) = threads_max {
            self.store.upsert(THREADS_MAX_METRIC, threads_max as f64, now)?;
        }
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const LIMITS: &str = "\
Limit                     Soft Limit           Hard Limit           Units
Max cpu time              unlimited            unlimited            seconds
Max processes             1024                 4096                 processes
Max open files            1024                 1048576              files
";

    fn fake_proc(pid: &str, fds: usize, threads: usize, limits: Option<&str>) -> TempDir {
        let dir = TempDir::new().unwrap();
        let process = dir.path().join(pid);
        fs::create_dir_all(process.join("fd")).unwrap();
        fs::create_dir_all(process.join("task")).unwrap();
        for fd in 0..fds {
            File::create(process.join("fd").join(fd.to_string())).unwrap();
        }
        for task in 0..threads {
            fs::create_dir(process.join("task").join(format!("{}", 100 + task))).unwrap();
        }
        if let Some(limits) = limits {
            fs::write(process.join("limits"), limits).unwrap();
        }
        dir
    }

    #[test]
    fn test_collect_counts_fds_threads_and_limits() {
        let root = fake_proc("1337", 3, 2, Some(LIMITS));
        let store = Arc::new(MetricStore::new(None));
        let collector =
            ProcessUsageCollector::with_proc_root(Arc::clone(&store), Clock::new(), root.path(), "1337")
                .unwrap();

        collector.collect().unwrap();

        assert_eq!(store.get(FD_USE_METRIC).unwrap().current_value, 3.0);
        assert_eq!(store.get(THREADS_USE_METRIC).unwrap().current_value, 2.0);
        assert_eq!(store.get(FD_MAX_METRIC).unwrap().current_value, 1024.0);
        assert_eq!(store.get(THREADS_MAX_METRIC).unwrap().current_value, 1024.0);
    }

    #[test]
    fn test_missing_limits_only_skips_limit_metrics() {
        let root = fake_proc("7", 1, 1, None);
        let store = Arc::new(MetricStore::new(None));
        let collector =
            ProcessUsageCollector::with_proc_root(Arc::clone(&store), Clock::new(), root.path(), "7")
                .unwrap();

        collector.collect().unwrap();

        assert!(store.get(FD_USE_METRIC).is_some());
        assert!(store.get(FD_MAX_METRIC).is_none());
        assert!(store.get(THREADS_MAX_METRIC).is_none());
    }

    #[test]
    fn test_missing_process_is_an_error() {
        let root = TempDir::new().unwrap();
        let store = Arc::new(MetricStore::new(None));
        let collector =
            ProcessUsageCollector::with_proc_root(Arc::clone(&store), Clock::new(), root.path(), "42")
                .unwrap();

        assert!(matches!(collector.collect(), Err(CollectorError::Io(_))));
        assert!(store.is_empty());
    }

    #[cfg(target_os = "linux")]
    #[test]
    fn test_collect_self() {
        let store = Arc::new(MetricStore::new(None));
        let collector = ProcessUsageCollector::new(Arc::clone(&store), Clock::new()).unwrap();
        collector.collect().unwrap();
        assert!(store.get(THREADS_USE_METRIC).unwrap().current_value >= 1.0);
    }
}
