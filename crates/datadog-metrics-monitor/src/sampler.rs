// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Periodic sampler.
//!
//! A running sampler owns one tokio task that wakes on a fixed interval and performs a
//! tick:
//!
//! 1. run every registered collector, in registration order,
//! 2. record the sampler's own metrics (when enabled),
//! 3. evaluate thresholds against the freshly collected values.
//!
//! A collector that returns an error or panics is logged and counted, and the tick
//! carries on with the next collector. Ticks never overlap: the worker runs them
//! inline, and `stop` waits for the tick in flight before returning. Manual ticks and
//! evaluations are refused while the worker is active.

use crate::clock::{Clock, Timestamp};
use crate::constants::{
    ALERTS_DROPPED_METRIC, COLLECTOR_FAILURES_METRIC, SAMPLER_TICKS_METRIC, TICK_DURATION_METRIC,
};
use crate::errors::{CollectorError, MonitorError};
use crate::evaluator::{AlertEvaluator, EvaluationSummary};
use crate::store::MetricStore;
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// A source of metrics, invoked once per tick.
///
/// Collectors write into the [`MetricStore`] they captured at construction. They run
/// on the sampler task, so slow collectors delay the whole tick.
pub trait Collector: Send + Sync {
    fn name(&self) -> &str;
    fn collect(&self) -> Result<(), CollectorError>;
}

/// Adapts a closure into a [`Collector`].
pub struct FnCollector<F> {
    name: String,
    collect: F,
}

impl<F> FnCollector<F>
where
    F: Fn() -> Result<(), CollectorError> + Send + Sync,
{
    pub fn new(name: impl Into<String>, collect: F) -> Self {
        Self {
            name: name.into(),
            collect,
        }
    }
}

impl<F> Collector for FnCollector<F>
where
    F: Fn() -> Result<(), CollectorError> + Send + Sync,
{
    fn name(&self) -> &str {
        &self.name
    }

    fn collect(&self) -> Result<(), CollectorError> {
        (self.collect)()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SamplerStats {
    pub ticks: u64,
    pub collector_failures: u64,
    pub alerts_dropped: u64,
    /// Time spent running collectors in the latest tick.
    pub last_tick_duration: Duration,
    pub collectors: usize,
}

struct Worker {
    cancel: CancellationToken,
    task: JoinHandle<()>,
}

fn is_active(worker: &Option<Worker>) -> bool {
    worker.as_ref().is_some_and(|worker| !worker.task.is_finished())
}

/// Clears the running flag when the sampling task exits, however it exits.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

struct SamplerInner {
    collectors: RwLock<Vec<Arc<dyn Collector>>>,
    store: Arc<MetricStore>,
    evaluator: Arc<AlertEvaluator>,
    clock: Clock,
    internal_metrics: bool,
    ticks: AtomicU64,
    failures: AtomicU64,
    last_tick_us: AtomicU64,
    running: AtomicBool,
}

pub struct Sampler {
    inner: Arc<SamplerInner>,
    worker: Mutex<Option<Worker>>,
}

impl Sampler {
    #[must_use]
    pub fn new(evaluator: Arc<AlertEvaluator>, clock: Clock, internal_metrics: bool) -> Self {
        Self {
            inner: Arc::new(SamplerInner {
                collectors: RwLock::new(Vec::new()),
                store: Arc::clone(evaluator.store()),
                evaluator,
                clock,
                internal_metrics,
                ticks: AtomicU64::new(0),
                failures: AtomicU64::new(0),
                last_tick_us: AtomicU64::new(0),
                running: AtomicBool::new(false),
            }),
            worker: Mutex::new(None),
        }
    }

    /// Registers a closure collector. It runs from the next tick on.
    pub fn register_collector<F>(&self, name: impl Into<String>, collect: F)
    where
        F: Fn() -> Result<(), CollectorError> + Send + Sync + 'static,
    {
        self.register(Arc::new(FnCollector::new(name, collect)));
    }

    pub fn register(&self, collector: Arc<dyn Collector>) {
        debug!("Registered collector {}", collector.name());
        self.inner
            .collectors
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(collector);
    }

    #[must_use]
    pub fn collector_count(&self) -> usize {
        self.inner
            .collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Spawns the sampling task. The first tick runs immediately.
    ///
    /// Must be called from within a tokio runtime.
    pub async fn start(&self, interval: Duration) -> Result<(), MonitorError> {
        if interval.is_zero() {
            return Err(MonitorError::InvalidConfig(
                "sample interval must be greater than zero".to_string(),
            ));
        }

        let mut worker = self.worker.lock().await;
        if is_active(&worker) {
            return Err(MonitorError::AlreadyRunning);
        }
        if let Some(Worker { task, .. }) = worker.take() {
            if let Err(e) = task.await {
                warn!("Previous sampler task ended abnormally: {e}");
            }
        }

        let cancel = CancellationToken::new();
        self.inner.running.store(true, Ordering::Release);
        let task = tokio::spawn(run(Arc::clone(&self.inner), interval, cancel.clone()));
        *worker = Some(Worker { cancel, task });

        info!(
            "Sampler started with a {}ms interval and {} collectors",
            interval.as_millis(),
            self.collector_count()
        );
        Ok(())
    }

    /// Cancels the sampling task and waits for it to finish its current tick.
    pub async fn stop(&self) -> Result<(), MonitorError> {
        let mut worker = self.worker.lock().await;
        let Some(Worker { cancel, task }) = worker.take() else {
            return Err(MonitorError::NotRunning);
        };

        cancel.cancel();
        if let Err(e) = task.await {
            warn!("Sampler task ended abnormally: {e}");
        }
        self.inner.running.store(false, Ordering::Release);
        info!("Sampler stopped after {} ticks", self.tick_count());
        Ok(())
    }

    /// Runs one tick on the calling task. Fails with `AlreadyRunning` while the
    /// sampling task is active, so manual and periodic ticks never interleave.
    pub async fn run_tick(&self) -> Result<EvaluationSummary, MonitorError> {
        let worker = self.worker.lock().await;
        if is_active(&worker) {
            return Err(MonitorError::AlreadyRunning);
        }
        Ok(self.inner.tick())
    }

    /// Evaluates thresholds against the current values without running collectors.
    /// Refused with `AlreadyRunning` while the sampling task is active, so an
    /// evaluation never lands between a tick's collection and its own evaluation.
    pub async fn evaluate_now(&self) -> Result<EvaluationSummary, MonitorError> {
        let worker = self.worker.lock().await;
        if is_active(&worker) {
            return Err(MonitorError::AlreadyRunning);
        }
        Ok(self.inner.evaluator.evaluate(self.inner.clock.now()))
    }

    #[must_use]
    pub fn is_running(&self) -> bool {
        self.inner.running.load(Ordering::Acquire)
    }

    /// Completed ticks over the sampler's lifetime, across restarts.
    #[must_use]
    pub fn tick_count(&self) -> u64 {
        self.inner.ticks.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> SamplerStats {
        SamplerStats {
            ticks: self.tick_count(),
            collector_failures: self.inner.failures.load(Ordering::Relaxed),
            alerts_dropped: self.inner.evaluator.dropped_events(),
            last_tick_duration: Duration::from_micros(
                self.inner.last_tick_us.load(Ordering::Relaxed),
            ),
            collectors: self.collector_count(),
        }
    }
}

impl Drop for Sampler {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.get_mut().take() {
            worker.cancel.cancel();
        }
    }
}

async fn run(inner: Arc<SamplerInner>, interval: Duration, cancel: CancellationToken) {
    let _running = RunningGuard(&inner.running);
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!("Sampler shutting down");
                break;
            }
            _ = ticker.tick() => {
                inner.tick();
            }
        }
    }
}

impl SamplerInner {
    fn tick(&self) -> EvaluationSummary {
        let tick = self.ticks.load(Ordering::Acquire) + 1;
        let collectors: Vec<Arc<dyn Collector>> = self
            .collectors
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();

        let started = Instant::now();
        for collector in &collectors {
            let outcome = panic::catch_unwind(AssertUnwindSafe(|| collector.collect()))
                .unwrap_or_else(|payload| Err(CollectorError::Panicked(panic_message(&*payload))));
            if let Err(e) = outcome {
                self.failures.fetch_add(1, Ordering::Relaxed);
                warn!("Collector {} failed on tick {tick}: {e}", collector.name());
            }
        }
        let elapsed = started.elapsed();
        let elapsed_us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.last_tick_us.store(elapsed_us, Ordering::Relaxed);

        let now = self.clock.now();
        if self.internal_metrics {
            self.record_internal_metrics(tick, elapsed_us, now);
        }
        let summary = self.evaluator.evaluate(now);
        self.ticks.store(tick, Ordering::Release);
        summary
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_internal_metrics(&self, tick: u64, elapsed_us: u64, now: Timestamp) {
        let metrics = [
            (SAMPLER_TICKS_METRIC, tick as f64),
            (
                COLLECTOR_FAILURES_METRIC,
                self.failures.load(Ordering::Relaxed) as f64,
            ),
            (
                ALERTS_DROPPED_METRIC,
                self.evaluator.dropped_events() as f64,
            ),
            (TICK_DURATION_METRIC, elapsed_us as f64),
        ];
        for (name, value) in metrics {
            if let Err(e) = self.store.upsert(name, value, now) {
                debug!("Could not record {name}: {e}");
            }
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic payload".to_string()
    }
}
