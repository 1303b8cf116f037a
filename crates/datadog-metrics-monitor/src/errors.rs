// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Error types for the monitor.
//!
//! Registration and lifecycle errors ([`MonitorError`]) are returned to the caller.
//! Errors raised inside the sampling loop ([`CollectorError`], [`SinkError`]) are
//! recovered where they happen and only surface through logs and internal metrics.

use std::io;

/// Errors returned synchronously by store, registry and sampler operations.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MonitorError {
    #[error("{registry} is full ({capacity} entries)")]
    CapacityExceeded {
        registry: &'static str,
        capacity: usize,
    },

    #[error("A threshold is already registered for metric '{0}'")]
    DuplicateMetric(String),

    #[error("Sampler is already running")]
    AlreadyRunning,

    #[error("Sampler is not running")]
    NotRunning,

    #[error("Unknown threshold handle {0}")]
    UnknownThreshold(usize),

    #[error("Invalid metric name '{0}'")]
    InvalidMetricName(String),

    #[error("Non-finite value {value} for metric '{name}'")]
    NonFiniteValue { name: String, value: f64 },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

/// Failure of a single collector invocation during one tick.
#[derive(Debug, thiserror::Error)]
pub enum CollectorError {
    #[error("{0}")]
    Failed(String),

    #[error("Collector panicked: {0}")]
    Panicked(String),

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("Store rejected sample: {0}")]
    Store(#[from] MonitorError),
}

/// Reasons an alert sink refused an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum SinkError {
    #[error("Alert sink is full")]
    Overflow,

    #[error("Alert sink is closed")]
    Closed,
}
