// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Read-only snapshot of the monitor, as JSON or a plain-text table.

use crate::clock::Clock;
use crate::sampler::Sampler;
use crate::store::MetricStore;
use crate::threshold::{AlarmState, ThresholdRegistry};
use serde::Serialize;
use std::fmt;
use std::sync::Arc;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub name: String,
    pub current: f64,
    pub min: f64,
    pub max: f64,
    pub count: u64,
    pub last_update_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ThresholdReport {
    pub metric_name: String,
    pub warning: f64,
    pub critical: f64,
    pub enabled: bool,
    pub state: AlarmState,
    pub last_transition_ms: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SamplerReport {
    pub running: bool,
    pub ticks: u64,
    pub collectors: usize,
    pub collector_failures: u64,
    pub alerts_dropped: u64,
    pub last_tick_duration_us: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Report {
    pub uptime_ms: u64,
    pub metrics: Vec<MetricReport>,
    pub thresholds: Vec<ThresholdReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sampler: Option<SamplerReport>,
}

impl Report {
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}

impl fmt::Display for Report {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "uptime_ms: {}", self.uptime_ms)?;
        if let Some(sampler) = &self.sampler {
            writeln!(
                f,
                "sampler: running={} ticks={} collectors={} failures={} alerts_dropped={} last_tick_us={}",
                sampler.running,
                sampler.ticks,
                sampler.collectors,
                sampler.collector_failures,
                sampler.alerts_dropped,
                sampler.last_tick_duration_us
            )?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "{:<40} {:>14} {:>14} {:>14} {:>10} {:>12}",
            "metric", "current", "min", "max", "count", "updated_ms"
        )?;
        for m in &self.metrics {
            writeln!(
                f,
                "{:<40} {:>14.3} {:>14.3} {:>14.3} {:>10} {:>12}",
                m.name, m.current, m.min, m.max, m.count, m.last_update_ms
            )?;
        }

        writeln!(f)?;
        writeln!(
            f,
            "{:<40} {:>14} {:>14} {:>8} {:>9} {:>14}",
            "threshold", "warning", "critical", "enabled", "state", "changed_ms"
        )?;
        for t in &self.thresholds {
            let changed = t
                .last_transition_ms
                .map_or_else(|| "-".to_string(), |ms| ms.to_string());
            writeln!(
                f,
                "{:<40} {:>14.3} {:>14.3} {:>8} {:>9} {:>14}",
                t.metric_name,
                t.warning,
                t.critical,
                t.enabled,
                t.state.to_string(),
                changed
            )?;
        }
        Ok(())
    }
}

/// Builds [`Report`]s. Only reads; never changes store or registry state.
pub struct Reporter {
    store: Arc<MetricStore>,
    registry: Arc<ThresholdRegistry>,
    clock: Clock,
    sampler: Option<Arc<Sampler>>,
}

impl Reporter {
    #[must_use]
    pub fn new(store: Arc<MetricStore>, registry: Arc<ThresholdRegistry>, clock: Clock) -> Self {
        Self {
            store,
            registry,
            clock,
            sampler: None,
        }
    }

    #[must_use]
    pub fn with_sampler(mut self, sampler: Arc<Sampler>) -> Self {
        self.sampler = Some(sampler);
        self
    }

    #[must_use]
    pub fn render(&self) -> Report {
        let metrics = self
            .store
            .snapshot()
            .into_iter()
            .map(|s| MetricReport {
                name: s.name.to_string(),
                current: s.current_value,
                min: s.min_value,
                max: s.max_value,
                count: s.sample_count,
                last_update_ms: s.last_update.as_millis(),
            })
            .collect();

        let thresholds = self
            .registry
            .list()
            .into_iter()
            .map(|t| ThresholdReport {
                metric_name: t.metric_name.to_string(),
                warning: t.warning_level,
                critical: t.critical_level,
                enabled: t.enabled,
                state: t.state,
                last_transition_ms: t.last_transition.map(|ts| ts.as_millis()),
            })
            .collect();

        let sampler = self.sampler.as_ref().map(|sampler| {
            let stats = sampler.stats();
            SamplerReport {
                running: sampler.is_running(),
                ticks: stats.ticks,
                collectors: stats.collectors,
                collector_failures: stats.collector_failures,
                alerts_dropped: stats.alerts_dropped,
                last_tick_duration_us: u64::try_from(stats.last_tick_duration.as_micros())
                    .unwrap_or(u64::MAX),
            }
        });

        Report {
            uptime_ms: self.clock.now().as_millis(),
            metrics,
            thresholds,
            sampler,
        }
    }
}
