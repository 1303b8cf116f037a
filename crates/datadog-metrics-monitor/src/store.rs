// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric store: current value and lifetime extrema per metric name.
//!
//! Samples are created on first write and updated in place afterwards. Reads always
//! hand out copies, so a reader never observes a sample in the middle of an update.
//! A single `RwLock` guards the map and is held only for the one operation.

use crate::clock::Timestamp;
use crate::constants::METRIC_STORE;
use crate::errors::MonitorError;
use fnv::FnvBuildHasher;
use hashbrown::HashMap;
use serde::Serialize;
use std::sync::{PoisonError, RwLock};
use tracing::debug;
use ustr::{ustr, Ustr};

pub(crate) type FastMap<K, V> = HashMap<K, V, FnvBuildHasher>;

/// Point-in-time copy of one metric.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MetricSample {
    pub name: Ustr,
    pub current_value: f64,
    pub min_value: f64,
    pub max_value: f64,
    pub sample_count: u64,
    pub last_update: Timestamp,
}

impl MetricSample {
    fn new(name: Ustr, value: f64, timestamp: Timestamp) -> Self {
        Self {
            name,
            current_value: value,
            min_value: value,
            max_value: value,
            sample_count: 1,
            last_update: timestamp,
        }
    }

    fn record(&mut self, value: f64, timestamp: Timestamp) {
        self.current_value = value;
        self.min_value = self.min_value.min(value);
        self.max_value = self.max_value.max(value);
        self.sample_count = self.sample_count.saturating_add(1);
        self.last_update = timestamp;
    }

    /// `min <= current <= max`, which holds for every sample the store hands out.
    #[must_use]
    pub fn is_coherent(&self) -> bool {
        self.sample_count == 0
            || (self.min_value <= self.current_value && self.current_value <= self.max_value)
    }
}

/// Builds the name of one partition of a metric, e.g. `cpu.usage_pct.3` for CPU 3.
#[must_use]
pub fn partitioned_name(name: &str, partition: usize) -> String {
    format!("{name}.{partition}")
}

pub struct MetricStore {
    samples: RwLock<FastMap<Ustr, MetricSample>>,
    max_metrics: Option<usize>,
}

impl MetricStore {
    /// Creates a store. `max_metrics` caps the number of distinct names; `None` is unbounded.
    #[must_use]
    pub fn new(max_metrics: Option<usize>) -> Self {
        Self {
            samples: RwLock::new(FastMap::with_hasher(FnvBuildHasher::default())),
            max_metrics,
        }
    }

    /// Records `value` for `name`, creating the sample on first write.
    ///
    /// Only new names count against the capacity; updating an existing metric never
    /// fails once it has been admitted. Returns a copy of the updated sample.
    pub fn upsert(
        &self,
        name: &str,
        value: f64,
        timestamp: Timestamp,
    ) -> Result<MetricSample, MonitorError> {
        if name.is_empty() {
            return Err(MonitorError::InvalidMetricName(name.to_string()));
        }
        if !value.is_finite() {
            return Err(MonitorError::NonFiniteValue {
                name: name.to_string(),
                value,
            });
        }

        let key = ustr(name);
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(sample) = samples.get_mut(&key) {
            sample.record(value, timestamp);
            return Ok(*sample);
        }

        if let Some(capacity) = self.max_metrics {
            if samples.len() >= capacity {
                debug!("Rejecting new metric {name}: store holds {capacity} metrics");
                return Err(MonitorError::CapacityExceeded {
                    registry: METRIC_STORE,
                    capacity,
                });
            }
        }

        let sample = MetricSample::new(key, value, timestamp);
        samples.insert(key, sample);
        Ok(sample)
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<MetricSample> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        samples.get(&ustr(name)).copied()
    }

    /// Copies every sample, ordered by name.
    #[must_use]
    pub fn snapshot(&self) -> Vec<MetricSample> {
        let mut snapshot: Vec<MetricSample> = {
            let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
            samples.values().copied().collect()
        };
        snapshot.sort_unstable_by(|a, b| a.name.as_str().cmp(b.name.as_str()));
        snapshot
    }

    /// Current value of every metric, taken under one read lock.
    pub(crate) fn values(&self) -> FastMap<Ustr, f64> {
        let samples = self.samples.read().unwrap_or_else(PoisonError::into_inner);
        let mut values = FastMap::with_capacity_and_hasher(samples.len(), FnvBuildHasher::default());
        values.extend(samples.iter().map(|(name, s)| (*name, s.current_value)));
        values
    }

    /// Drops the accumulated statistics for `name`. Returns whether it existed.
    pub fn reset(&self, name: &str) -> bool {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.remove(&ustr(name)).is_some()
    }

    pub fn reset_all(&self) {
        let mut samples = self.samples.write().unwrap_or_else(PoisonError::into_inner);
        samples.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.samples
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> Option<usize> {
        self.max_metrics
    }
}

impl Default for MetricStore {
    fn default() -> Self {
        Self::new(Some(crate::constants::DEFAULT_MAX_METRICS))
    }
}
