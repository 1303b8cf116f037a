// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Metric registry, periodic sampler and threshold alerting.
//!
//! The crate is organised around one explicitly constructed facility, [`Monitor`],
//! which owns:
//!
//! - a [`MetricStore`] of named samples (current value, lifetime extrema, count),
//! - a bounded [`ThresholdRegistry`] of warning/critical rules,
//! - a [`Sampler`] that drives registered collectors on a fixed interval,
//! - an [`AlertEvaluator`] that turns threshold state changes into [`AlertEvent`]s,
//! - a [`Reporter`] that renders a read-only snapshot of all of the above.
//!
//! ```text
//!  Sampler tick ──> collectors (in order) ──> MetricStore
//!        │                                        │
//!        └──────> AlertEvaluator <────────────────┘
//!                      │   ▲
//!                      │   └── ThresholdRegistry
//!                      ▼
//!                  AlertSink ──> channel / log / callback
//! ```
//!
//! # Usage
//!
//! ```rust,ignore
//! use datadog_metrics_monitor::{Monitor, MonitorConfig};
//!
//! let (monitor, mut alerts) = Monitor::new(MonitorConfig::default())?;
//! monitor.register_threshold("cpu.usage_pct", 70.0, 90.0)?;
//!
//! let store = monitor.store();
//! let clock = monitor.clock();
//! monitor.register_collector("cpu", move || {
//!     store.upsert("cpu.usage_pct", read_cpu_pct(), clock.now())?;
//!     Ok(())
//! });
//!
//! monitor.start().await?;
//! while let Some(event) = alerts.recv().await {
//!     println!("{} {} -> {}", event.metric_name, event.old_state, event.new_state);
//! }
//! ```

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod clock;
pub mod collectors;
pub mod config;
pub mod constants;
pub mod errors;
pub mod evaluator;
pub mod logger;
pub mod monitor;
pub mod report;
pub mod sampler;
pub mod sink;
pub mod store;
pub mod threshold;

pub use clock::{Clock, Timestamp};
pub use config::{MonitorConfig, ThresholdSpec};
pub use errors::{CollectorError, MonitorError, SinkError};
pub use evaluator::{AlertEvaluator, AlertEvent, EvaluationSummary};
pub use monitor::Monitor;
pub use report::{MetricReport, Report, Reporter, SamplerReport, ThresholdReport};
pub use sampler::{Collector, FnCollector, Sampler, SamplerStats};
pub use sink::{AlertReceiver, AlertSink, CallbackSink, ChannelSink, FanoutSink, LogSink};
pub use store::{partitioned_name, MetricSample, MetricStore};
pub use threshold::{AlarmState, Threshold, ThresholdHandle, ThresholdRegistry};
