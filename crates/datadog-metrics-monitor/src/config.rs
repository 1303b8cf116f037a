// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::constants::{
    DEFAULT_ALERT_QUEUE_SIZE, DEFAULT_MAX_METRICS, DEFAULT_MAX_THRESHOLDS, DEFAULT_SAMPLE_INTERVAL,
};
use crate::errors::MonitorError;
use std::env;
use std::time::Duration;
use tracing::warn;

const VALID_LOG_LEVELS: [&str; 5] = ["trace", "debug", "info", "warn", "error"];

/// A threshold to register when the monitor is built.
#[derive(Debug, Clone, PartialEq)]
pub struct ThresholdSpec {
    pub metric_name: String,
    pub warning_level: f64,
    pub critical_level: f64,
}

/// Configuration for the monitor
#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    /// Period between sampler ticks
    pub sample_interval: Duration,
    /// Maximum number of distinct metric names, `None` for no limit
    pub max_metrics: Option<usize>,
    /// Maximum number of thresholds
    pub max_thresholds: usize,
    /// Capacity of the alert channel
    pub alert_queue_size: usize,
    /// Whether the sampler records its own `monitor.*` metrics
    pub internal_metrics: bool,
    /// Log level (e.g., trace, debug, info, warn, error)
    pub log_level: String,
    /// Thresholds registered at startup
    pub thresholds: Vec<ThresholdSpec>,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            sample_interval: DEFAULT_SAMPLE_INTERVAL,
            max_metrics: Some(DEFAULT_MAX_METRICS),
            max_thresholds: DEFAULT_MAX_THRESHOLDS,
            alert_queue_size: DEFAULT_ALERT_QUEUE_SIZE,
            internal_metrics: true,
            log_level: "info".to_string(),
            thresholds: Vec::new(),
        }
    }
}

impl MonitorConfig {
    /// Create configuration from environment variables
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Builds the configuration from any key lookup. Unparseable numbers fall back to
    /// their defaults.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let sample_interval = lookup("DD_MONITOR_SAMPLE_INTERVAL_MS")
            .and_then(|val| val.trim().parse::<u64>().ok())
            .map_or(defaults.sample_interval, Duration::from_millis);
        // 0 lifts the limit
        let max_metrics = match lookup("DD_MONITOR_MAX_METRICS")
            .and_then(|val| val.trim().parse::<usize>().ok())
        {
            Some(0) => None,
            Some(max) => Some(max),
            None => defaults.max_metrics,
        };
        let max_thresholds = lookup("DD_MONITOR_MAX_THRESHOLDS")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.max_thresholds);
        let alert_queue_size = lookup("DD_MONITOR_ALERT_QUEUE_SIZE")
            .and_then(|val| val.trim().parse::<usize>().ok())
            .unwrap_or(defaults.alert_queue_size);
        let internal_metrics = lookup("DD_MONITOR_INTERNAL_METRICS")
            .map(|val| val.to_lowercase() != "false")
            .unwrap_or(defaults.internal_metrics);
        let log_level = lookup("DD_LOG_LEVEL")
            .map(|val| val.to_lowercase())
            .unwrap_or(defaults.log_level);
        let thresholds = lookup("DD_MONITOR_THRESHOLDS")
            .map(|val| parse_threshold_specs(&val))
            .unwrap_or_default();

        let config = Self {
            sample_interval,
            max_metrics,
            max_thresholds,
            alert_queue_size,
            internal_metrics,
            log_level,
            thresholds,
        };

        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<(), MonitorError> {
        if self.sample_interval.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "Sample interval must be greater than 0".to_string(),
            ));
        }

        if self.max_thresholds == 0 {
            return Err(MonitorError::InvalidConfig(
                "Threshold capacity must be greater than 0".to_string(),
            ));
        }

        if self.alert_queue_size == 0 {
            return Err(MonitorError::InvalidConfig(
                "Alert queue size must be greater than 0".to_string(),
            ));
        }

        if self.thresholds.len() > self.max_thresholds {
            return Err(MonitorError::InvalidConfig(format!(
                "{} thresholds configured but capacity is {}",
                self.thresholds.len(),
                self.max_thresholds
            )));
        }

        if !VALID_LOG_LEVELS.contains(&self.log_level.as_str()) {
            return Err(MonitorError::InvalidConfig(format!(
                "Invalid log level '{}'. Must be one of: trace, debug, info, warn, error",
                self.log_level
            )));
        }

        Ok(())
    }
}

/// Parses `name:warning:critical` entries separated by commas.
///
/// The levels are taken from the right, so metric names may contain colons.
/// Malformed entries are logged and skipped.
#[must_use]
pub fn parse_threshold_specs(value: &str) -> Vec<ThresholdSpec> {
    value
        .split(',')
        .map(str::trim)
        .filter(|entry| !entry.is_empty())
        .filter_map(|entry| {
            let spec = parse_threshold_spec(entry);
            if spec.is_none() {
                warn!("Ignoring malformed threshold '{entry}', expected name:warning:critical");
            }
            spec
        })
        .collect()
}

fn parse_threshold_spec(entry: &str) -> Option<ThresholdSpec> {
    let mut parts = entry.rsplitn(3, ':');
    let critical_level = parts.next()?.trim().parse::<f64>().ok()?;
    let warning_level = parts.next()?.trim().parse::<f64>().ok()?;
    let metric_name = parts.next()?.trim();
    if metric_name.is_empty() || !warning_level.is_finite() || !critical_level.is_finite() {
        return None;
    }
    Some(ThresholdSpec {
        metric_name: metric_name.to_string(),
        warning_level,
        critical_level,
    })
}
