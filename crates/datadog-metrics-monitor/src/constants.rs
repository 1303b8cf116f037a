// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

/// Default number of distinct metric names the store accepts.
pub const DEFAULT_MAX_METRICS: usize = 1_024;

/// Default number of thresholds the registry accepts.
pub const DEFAULT_MAX_THRESHOLDS: usize = 16;

/// Default period between sampler ticks.
pub const DEFAULT_SAMPLE_INTERVAL: Duration = Duration::from_secs(1);

/// Default capacity of the alert channel. Events beyond this are dropped and counted.
pub const DEFAULT_ALERT_QUEUE_SIZE: usize = 100;

/// Prefix shared by the metrics the sampler records about itself.
pub const INTERNAL_METRIC_PREFIX: &str = "monitor.";

/// Number of the most recently completed tick.
pub const SAMPLER_TICKS_METRIC: &str = "monitor.sampler.ticks";

/// Lifetime count of failed or panicked collector invocations.
pub const COLLECTOR_FAILURES_METRIC: &str = "monitor.collector.failures";

/// Lifetime count of alert events the sink could not accept.
pub const ALERTS_DROPPED_METRIC: &str = "monitor.alerts.dropped";

/// Time spent running collectors in the latest tick, in microseconds.
pub const TICK_DURATION_METRIC: &str = "monitor.sampler.tick_duration_us";

pub(crate) const METRIC_STORE: &str = "metric store";
pub(crate) const THRESHOLD_REGISTRY: &str = "threshold registry";
