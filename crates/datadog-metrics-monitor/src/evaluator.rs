// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Turns threshold state changes into alert events.
//!
//! Each pass reads the current value of every metric (store read lock, released),
//! applies every enabled threshold (registry write lock, released), and only then
//! hands the resulting events to the sink. No lock is held while a sink runs, and a
//! sink that panics only loses the event it was given.

use crate::clock::Timestamp;
use crate::errors::SinkError;
use crate::sampler::panic_message;
use crate::sink::AlertSink;
use crate::store::MetricStore;
use crate::threshold::{AlarmState, ThresholdRegistry};
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};
use ustr::Ustr;

/// One threshold state change.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AlertEvent {
    pub metric_name: Ustr,
    pub old_state: AlarmState,
    pub new_state: AlarmState,
    pub value: f64,
    pub timestamp: Timestamp,
}

impl AlertEvent {
    #[must_use]
    pub fn is_escalation(&self) -> bool {
        self.new_state > self.old_state
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EvaluationSummary {
    /// Enabled thresholds whose metric had a value.
    pub evaluated: usize,
    /// Enabled thresholds whose metric has never been recorded.
    pub skipped: usize,
    pub disabled: usize,
    pub transitions: usize,
    /// Transitions the sink refused.
    pub dropped: usize,
}

pub struct AlertEvaluator {
    store: Arc<MetricStore>,
    registry: Arc<ThresholdRegistry>,
    sink: Arc<dyn AlertSink>,
    delivered: AtomicU64,
    dropped: AtomicU64,
}

impl AlertEvaluator {
    pub fn new(
        store: Arc<MetricStore>,
        registry: Arc<ThresholdRegistry>,
        sink: Arc<dyn AlertSink>,
    ) -> Self {
        Self {
            store,
            registry,
            sink,
            delivered: AtomicU64::new(0),
            dropped: AtomicU64::new(0),
        }
    }

    pub fn evaluate(&self, now: Timestamp) -> EvaluationSummary {
        let values = self.store.values();
        let applied = self.registry.apply(&values, now);

        let mut summary = EvaluationSummary {
            evaluated: applied.evaluated,
            skipped: applied.skipped,
            disabled: applied.disabled,
            transitions: applied.events.len(),
            dropped: 0,
        };

        for event in applied.events {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| self.sink.offer(event)));
            let reason = match outcome {
                Ok(Ok(())) => {
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    continue;
                }
                Ok(Err(SinkError::Overflow)) => "full".to_string(),
                Ok(Err(SinkError::Closed)) => "closed".to_string(),
                Err(payload) => format!("panicked ({})", panic_message(&*payload)),
            };
            summary.dropped += 1;
            let total = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
            warn!(
                "Alert sink {reason}, dropping {} -> {} for {} ({total} dropped so far)",
                event.old_state, event.new_state, event.metric_name
            );
        }

        if summary.transitions > 0 {
            debug!(
                "Evaluated {} thresholds: {} transitions, {} dropped",
                summary.evaluated, summary.transitions, summary.dropped
            );
        }
        summary
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn delivered_events(&self) -> u64 {
        self.delivered.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn store(&self) -> &Arc<MetricStore> {
        &self.store
    }

    #[must_use]
    pub fn registry(&self) -> &Arc<ThresholdRegistry> {
        &self.registry
    }
}
