// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bounded registry of warning/critical rules, one per metric name.

use crate::clock::Timestamp;
use crate::constants::THRESHOLD_REGISTRY;
use crate::errors::MonitorError;
use crate::evaluator::AlertEvent;
use crate::store::FastMap;
use fnv::FnvBuildHasher;
use serde::Serialize;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{PoisonError, RwLock};
use tracing::{debug, warn};
use ustr::{ustr, Ustr};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AlarmState {
    #[default]
    Normal,
    Warning,
    Critical,
}

impl fmt::Display for AlarmState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            AlarmState::Normal => "normal",
            AlarmState::Warning => "warning",
            AlarmState::Critical => "critical",
        };
        f.write_str(name)
    }
}

/// Maps a value onto an alarm state. The critical check runs first, so a value
/// at or above both levels is always `Critical`.
#[must_use]
pub fn classify(value: f64, warning_level: f64, critical_level: f64) -> AlarmState {
    if value >= critical_level {
        AlarmState::Critical
    } else if value >= warning_level {
        AlarmState::Warning
    } else {
        AlarmState::Normal
    }
}

static NEXT_REGISTRY_ID: AtomicU64 = AtomicU64::new(1);

/// Opaque reference to a registered threshold. Only the registry that issued a
/// handle accepts it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ThresholdHandle {
    registry: u64,
    index: usize,
}

impl ThresholdHandle {
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Threshold {
    pub metric_name: Ustr,
    pub warning_level: f64,
    pub critical_level: f64,
    pub enabled: bool,
    pub state: AlarmState,
    pub last_transition: Option<Timestamp>,
}

impl Threshold {
    fn new(metric_name: Ustr, warning_level: f64, critical_level: f64) -> Self {
        Self {
            metric_name,
            warning_level,
            critical_level,
            enabled: true,
            state: AlarmState::Normal,
            last_transition: None,
        }
    }

    /// Moves to the state `value` maps to. Emits an event only when the state changes.
    fn observe(&mut self, value: f64, now: Timestamp) -> Option<AlertEvent> {
        let target = classify(value, self.warning_level, self.critical_level);
        if target == self.state {
            return None;
        }

        let event = AlertEvent {
            metric_name: self.metric_name,
            old_state: self.state,
            new_state: target,
            value,
            timestamp: now,
        };
        self.state = target;
        self.last_transition = Some(now);
        Some(event)
    }
}

/// Outcome of one pass over the registry.
#[derive(Debug, Default)]
pub(crate) struct Applied {
    pub events: Vec<AlertEvent>,
    pub evaluated: usize,
    pub skipped: usize,
    pub disabled: usize,
}

struct Entries {
    thresholds: Vec<Threshold>,
    by_name: FastMap<Ustr, usize>,
}

pub struct ThresholdRegistry {
    id: u64,
    entries: RwLock<Entries>,
    max_thresholds: usize,
}

impl ThresholdRegistry {
    #[must_use]
    pub fn new(max_thresholds: usize) -> Self {
        Self {
            id: NEXT_REGISTRY_ID.fetch_add(1, Ordering::Relaxed),
            entries: RwLock::new(Entries {
                thresholds: Vec::with_capacity(max_thresholds),
                by_name: FastMap::with_capacity_and_hasher(
                    max_thresholds,
                    FnvBuildHasher::default(),
                ),
            }),
            max_thresholds,
        }
    }

    /// Registers an enabled threshold in the `Normal` state.
    ///
    /// A `warning_level` above `critical_level` is accepted, but such a threshold can
    /// never report `Warning`.
    pub fn register(
        &self,
        metric_name: &str,
        warning_level: f64,
        critical_level: f64,
    ) -> Result<ThresholdHandle, MonitorError> {
        if metric_name.is_empty() {
            return Err(MonitorError::InvalidMetricName(metric_name.to_string()));
        }
        for level in [warning_level, critical_level] {
            if level.is_nan() {
                return Err(MonitorError::NonFiniteValue {
                    name: metric_name.to_string(),
                    value: level,
                });
            }
        }

        let name = ustr(metric_name);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        if entries.by_name.contains_key(&name) {
            return Err(MonitorError::DuplicateMetric(metric_name.to_string()));
        }
        if entries.thresholds.len() >= self.max_thresholds {
            return Err(MonitorError::CapacityExceeded {
                registry: THRESHOLD_REGISTRY,
                capacity: self.max_thresholds,
            });
        }
        if warning_level > critical_level {
            warn!(
                "Threshold for {metric_name} has warning level {warning_level} above critical level {critical_level}, it will never report warning"
            );
        }

        let index = entries.thresholds.len();
        entries
            .thresholds
            .push(Threshold::new(name, warning_level, critical_level));
        entries.by_name.insert(name, index);
        debug!("Registered threshold for {metric_name} (warning {warning_level}, critical {critical_level})");
        Ok(self.handle(index))
    }

    fn handle(&self, index: usize) -> ThresholdHandle {
        ThresholdHandle {
            registry: self.id,
            index,
        }
    }

    /// Index of `handle` in this registry, or `None` for another registry's handle.
    fn slot(&self, handle: ThresholdHandle) -> Option<usize> {
        (handle.registry == self.id).then_some(handle.index)
    }

    /// Resumes evaluation. The stored state is left as it was.
    pub fn enable(&self, handle: ThresholdHandle) -> Result<(), MonitorError> {
        self.set_enabled(handle, true)
    }

    /// Suspends evaluation. The stored state is left as it was.
    pub fn disable(&self, handle: ThresholdHandle) -> Result<(), MonitorError> {
        self.set_enabled(handle, false)
    }

    fn set_enabled(&self, handle: ThresholdHandle, enabled: bool) -> Result<(), MonitorError> {
        let unknown = MonitorError::UnknownThreshold(handle.index);
        let index = self.slot(handle).ok_or_else(|| unknown.clone())?;
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        let threshold = entries.thresholds.get_mut(index).ok_or(unknown)?;
        threshold.enabled = enabled;
        Ok(())
    }

    #[must_use]
    pub fn get(&self, handle: ThresholdHandle) -> Option<Threshold> {
        let index = self.slot(handle)?;
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.thresholds.get(index).copied()
    }

    #[must_use]
    pub fn find(&self, metric_name: &str) -> Option<(ThresholdHandle, Threshold)> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        let index = *entries.by_name.get(&ustr(metric_name))?;
        entries
            .thresholds
            .get(index)
            .map(|threshold| (self.handle(index), *threshold))
    }

    /// Copies every threshold in registration order.
    #[must_use]
    pub fn list(&self) -> Vec<Threshold> {
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.thresholds.clone()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .thresholds
            .len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.max_thresholds
    }

    /// Runs every enabled threshold against `values`. Thresholds whose metric has no
    /// value yet are skipped and keep their state.
    pub(crate) fn apply(&self, values: &FastMap<Ustr, f64>, now: Timestamp) -> Applied {
        let mut applied = Applied::default();
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);

        for threshold in &mut entries.thresholds {
            if !threshold.enabled {
                applied.disabled += 1;
                continue;
            }
            let Some(value) = values.get(&threshold.metric_name) else {
                applied.skipped += 1;
                continue;
            };
            applied.evaluated += 1;
            if let Some(event) = threshold.observe(*value, now) {
                applied.events.push(event);
            }
        }
        applied
    }
}

impl Default for ThresholdRegistry {
    fn default() -> Self {
        Self::new(crate::constants::DEFAULT_MAX_THRESHOLDS)
    }
}
