// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The monitor facility: one store, one registry, one sampler, wired together.
//!
//! Nothing here is global. Every [`Monitor`] owns its components, so independent
//! monitors can run side by side in one process.

use crate::clock::Clock;
use crate::config::MonitorConfig;
use crate::errors::{CollectorError, MonitorError};
use crate::evaluator::{AlertEvaluator, EvaluationSummary};
use crate::report::{Report, Reporter};
use crate::sampler::{Collector, Sampler, SamplerStats};
use crate::sink::{AlertReceiver, AlertSink, ChannelSink, FanoutSink, LogSink};
use crate::store::{MetricSample, MetricStore};
use crate::threshold::{ThresholdHandle, ThresholdRegistry};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

pub struct Monitor {
    config: MonitorConfig,
    clock: Clock,
    store: Arc<MetricStore>,
    registry: Arc<ThresholdRegistry>,
    evaluator: Arc<AlertEvaluator>,
    sampler: Arc<Sampler>,
    reporter: Reporter,
}

impl Monitor {
    /// Builds a monitor whose alerts go to a bounded channel and to the log.
    pub fn new(config: MonitorConfig) -> Result<(Self, AlertReceiver), MonitorError> {
        let (channel, receiver) = ChannelSink::new(config.alert_queue_size);
        let sink = FanoutSink::new(vec![Arc::new(channel), Arc::new(LogSink)]);
        let monitor = Self::with_sink(config, Arc::new(sink))?;
        Ok((monitor, receiver))
    }

    /// Builds a monitor delivering alerts to `sink`. Thresholds listed in the
    /// configuration are registered before this returns.
    pub fn with_sink(config: MonitorConfig, sink: Arc<dyn AlertSink>) -> Result<Self, MonitorError> {
        config.validate()?;

        let clock = Clock::new();
        let store = Arc::new(MetricStore::new(config.max_metrics));
        let registry = Arc::new(ThresholdRegistry::new(config.max_thresholds));
        for spec in &config.thresholds {
            registry.register(&spec.metric_name, spec.warning_level, spec.critical_level)?;
        }

        let evaluator = Arc::new(AlertEvaluator::new(
            Arc::clone(&store),
            Arc::clone(&registry),
            sink,
        ));
        let sampler = Arc::new(Sampler::new(
            Arc::clone(&evaluator),
            clock,
            config.internal_metrics,
        ));
        let reporter = Reporter::new(Arc::clone(&store), Arc::clone(&registry), clock)
            .with_sampler(Arc::clone(&sampler));

        info!(
            "Monitor ready with {} thresholds, sampling every {}ms",
            registry.len(),
            config.sample_interval.as_millis()
        );

        Ok(Self {
            config,
            clock,
            store,
            registry,
            evaluator,
            sampler,
            reporter,
        })
    }

    #[must_use]
    pub fn config(&self) -> &MonitorConfig {
        &self.config
    }

    #[must_use]
    pub fn clock(&self) -> Clock {
        self.clock
    }

    #[must_use]
    pub fn store(&self) -> Arc<MetricStore> {
        Arc::clone(&self.store)
    }

    #[must_use]
    pub fn thresholds(&self) -> Arc<ThresholdRegistry> {
        Arc::clone(&self.registry)
    }

    #[must_use]
    pub fn sampler(&self) -> Arc<Sampler> {
        Arc::clone(&self.sampler)
    }

    /// Records a value stamped with the monitor's clock.
    pub fn upsert(&self, name: &str, value: f64) -> Result<MetricSample, MonitorError> {
        self.store.upsert(name, value, self.clock.now())
    }

    #[must_use]
    pub fn get(&self, name: &str) -> Option<MetricSample> {
        self.store.get(name)
    }

    pub fn register_threshold(
        &self,
        metric_name: &str,
        warning_level: f64,
        critical_level: f64,
    ) -> Result<ThresholdHandle, MonitorError> {
        self.registry
            .register(metric_name, warning_level, critical_level)
    }

    pub fn enable_threshold(&self, handle: ThresholdHandle) -> Result<(), MonitorError> {
        self.registry.enable(handle)
    }

    pub fn disable_threshold(&self, handle: ThresholdHandle) -> Result<(), MonitorError> {
        self.registry.disable(handle)
    }

    pub fn register_collector<F>(&self, name: impl Into<String>, collect: F)
    where
        F: Fn() -> Result<(), CollectorError> + Send + Sync + 'static,
    {
        self.sampler.register_collector(name, collect);
    }

    pub fn register(&self, collector: Arc<dyn Collector>) {
        self.sampler.register(collector);
    }

    /// Starts sampling at the configured interval.
    pub async fn start(&self) -> Result<(), MonitorError> {
        self.sampler.start(self.config.sample_interval).await
    }

    pub async fn start_with_interval(&self, interval: Duration) -> Result<(), MonitorError> {
        self.sampler.start(interval).await
    }

    pub async fn stop(&self) -> Result<(), MonitorError> {
        self.sampler.stop().await
    }

    pub async fn run_tick(&self) -> Result<EvaluationSummary, MonitorError> {
        self.sampler.run_tick().await
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.sampler.is_running()
    }

    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.sampler.tick_count()
    }

    #[must_use]
    pub fn stats(&self) -> SamplerStats {
        self.sampler.stats()
    }

    /// Evaluates thresholds against the current values without running collectors.
    /// Fails with `AlreadyRunning` while sampling is active.
    pub async fn evaluate_now(&self) -> Result<EvaluationSummary, MonitorError> {
        self.sampler.evaluate_now().await
    }

    #[must_use]
    pub fn dropped_alerts(&self) -> u64 {
        self.evaluator.dropped_events()
    }

    #[must_use]
    pub fn render(&self) -> Report {
        self.reporter.render()
    }
}
