// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Destinations for alert events.
//!
//! The evaluator hands every state transition to one [`AlertSink`]. Sinks are called
//! from the sampling task, so `offer` must return immediately: a sink that cannot
//! take an event reports [`SinkError`] and the evaluator counts it as dropped.
//!
//! ```text
//!  AlertEvaluator ──offer──> FanoutSink ──> ChannelSink ──> mpsc ──> AlertReceiver
//!                                 └──────> LogSink ──> tracing
//! ```
//!
//! # Implementations
//!
//! - [`ChannelSink`]: bounded tokio channel, the consumer reads from an [`AlertReceiver`]
//! - [`LogSink`]: writes each transition through `tracing`
//! - [`CallbackSink`]: runs a caller-provided closure
//! - [`FanoutSink`]: offers each event to several sinks

use crate::errors::SinkError;
use crate::evaluator::AlertEvent;
use crate::threshold::AlarmState;
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TryRecvError, error::TrySendError};
use tracing::{info, warn};

/// Receives alert events from the evaluator.
///
/// Implementations must not block: `offer` runs on the sampler task between
/// collection and the next tick.
pub trait AlertSink: Send + Sync {
    fn offer(&self, event: AlertEvent) -> Result<(), SinkError>;
}

/// Bounded channel sink.
///
/// Uses `try_send`; when the consumer falls behind the event is refused with
/// [`SinkError::Overflow`] instead of waiting for room.
#[derive(Debug, Clone)]
pub struct ChannelSink {
    tx: mpsc::Sender<AlertEvent>,
}

impl ChannelSink {
    /// Creates the sink and the matching receiver. A capacity of zero is raised to one.
    #[must_use]
    pub fn new(capacity: usize) -> (Self, AlertReceiver) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self { tx }, AlertReceiver { rx })
    }
}

impl AlertSink for ChannelSink {
    fn offer(&self, event: AlertEvent) -> Result<(), SinkError> {
        self.tx.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => SinkError::Overflow,
            TrySendError::Closed(_) => SinkError::Closed,
        })
    }
}

/// Consumer side of a [`ChannelSink`].
#[derive(Debug)]
pub struct AlertReceiver {
    rx: mpsc::Receiver<AlertEvent>,
}

impl AlertReceiver {
    /// Waits for the next event. Returns `None` once every sender is gone.
    pub async fn recv(&mut self) -> Option<AlertEvent> {
        self.rx.recv().await
    }

    /// Returns the next queued event without waiting.
    pub fn try_recv(&mut self) -> Option<AlertEvent> {
        match self.rx.try_recv() {
            Ok(event) => Some(event),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Takes every event currently queued.
    pub fn drain(&mut self) -> Vec<AlertEvent> {
        let mut events = Vec::new();
        while let Some(event) = self.try_recv() {
            events.push(event);
        }
        events
    }
}

/// Writes transitions to the `tracing` pipeline. Never refuses an event.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn offer(&self, event: AlertEvent) -> Result<(), SinkError> {
        let AlertEvent {
            metric_name,
            old_state,
            new_state,
            value,
            ..
        } = event;
        match new_state {
            AlarmState::Critical => {
                warn!("Metric {metric_name} is critical at {value} (was {old_state})");
            }
            AlarmState::Warning => {
                warn!("Metric {metric_name} is warning at {value} (was {old_state})");
            }
            AlarmState::Normal => {
                info!("Metric {metric_name} cleared at {value} (was {old_state})");
            }
        }
        Ok(())
    }
}

/// Runs a closure for every event. The closure must not block.
pub struct CallbackSink<F> {
    callback: F,
}

impl<F> CallbackSink<F>
where
    F: Fn(AlertEvent) + Send + Sync,
{
    pub fn new(callback: F) -> Self {
        Self { callback }
    }
}

impl<F> AlertSink for CallbackSink<F>
where
    F: Fn(AlertEvent) + Send + Sync,
{
    fn offer(&self, event: AlertEvent) -> Result<(), SinkError> {
        (self.callback)(event);
        Ok(())
    }
}

/// Offers each event to every inner sink, in order.
///
/// All sinks see the event even if an earlier one refused it. The first refusal is
/// returned so the evaluator still counts the drop.
#[derive(Clone, Default)]
pub struct FanoutSink {
    sinks: Vec<Arc<dyn AlertSink>>,
}

impl FanoutSink {
    #[must_use]
    pub fn new(sinks: Vec<Arc<dyn AlertSink>>) -> Self {
        Self { sinks }
    }

    pub fn push(&mut self, sink: Arc<dyn AlertSink>) {
        self.sinks.push(sink);
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.sinks.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sinks.is_empty()
    }
}

impl AlertSink for FanoutSink {
    fn offer(&self, event: AlertEvent) -> Result<(), SinkError> {
        let mut result = Ok(());
        for sink in &self.sinks {
            if let Err(e) = sink.offer(event) {
                if result.is_ok() {
                    result = Err(e);
                }
            }
        }
        result
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use crate::clock::Timestamp;
    use std::sync::Mutex;
    use tracing_test::traced_test;
    use ustr::ustr;

    fn event(new_state: AlarmState) -> AlertEvent {
        AlertEvent {
            metric_name: ustr("cpu"),
            old_state: AlarmState::Normal,
            new_state,
            value: 95.0,
            timestamp: Timestamp::from_millis(3),
        }
    }

    #[tokio::test]
    async fn test_channel_sink_delivers_in_order() {
        let (sink, mut rx) = ChannelSink::new(4);
        sink.offer(event(AlarmState::Warning)).unwrap();
        sink.offer(event(AlarmState::Critical)).unwrap();

        assert_eq!(rx.recv().await.unwrap().new_state, AlarmState::Warning);
        assert_eq!(rx.recv().await.unwrap().new_state, AlarmState::Critical);
        assert!(rx.try_recv().is_none());
    }

    #[test]
    fn test_channel_sink_overflow_and_close() {
        let (sink, mut rx) = ChannelSink::new(1);
        sink.offer(event(AlarmState::Warning)).unwrap();
        assert_eq!(
            sink.offer(event(AlarmState::Critical)),
            Err(SinkError::Overflow)
        );

        assert_eq!(rx.drain().len(), 1);
        drop(rx);
        assert_eq!(sink.offer(event(AlarmState::Normal)), Err(SinkError::Closed));
    }

    #[test]
    fn test_zero_capacity_channel_holds_one_event() {
        let (sink, mut rx) = ChannelSink::new(0);
        sink.offer(event(AlarmState::Warning)).unwrap();
        assert_eq!(rx.drain().len(), 1);
    }

    #[test]
    #[traced_test]
    fn test_log_sink_levels() {
        let sink = LogSink;
        sink.offer(event(AlarmState::Critical)).unwrap();
        sink.offer(event(AlarmState::Normal)).unwrap();

        assert!(logs_contain("Metric cpu is critical at 95"));
        assert!(logs_contain("Metric cpu cleared at 95"));
        logs_assert(|lines: &[&str]| {
            let critical: Vec<_> = lines.iter().filter(|l| l.contains("is critical")).collect();
            match critical.as_slice() {
                [line] if line.contains("WARN") => Ok(()),
                other => Err(format!("expected one WARN line for critical, got {other:?}")),
            }
        });
    }

    #[test]
    fn test_callback_sink() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = {
            let seen = Arc::clone(&seen);
            CallbackSink::new(move |e: AlertEvent| seen.lock().unwrap().push(e.new_state))
        };
        sink.offer(event(AlarmState::Warning)).unwrap();
        assert_eq!(*seen.lock().unwrap(), vec![AlarmState::Warning]);
    }

    #[test]
    fn test_fanout_reaches_every_sink_and_reports_overflow() {
        let (full, _rx_full) = ChannelSink::new(1);
        full.offer(event(AlarmState::Warning)).unwrap();
        let (open, mut rx_open) = ChannelSink::new(4);

        let fanout = FanoutSink::new(vec![Arc::new(full), Arc::new(open), Arc::new(LogSink)]);
        assert_eq!(fanout.len(), 3);
        assert_eq!(
            fanout.offer(event(AlarmState::Critical)),
            Err(SinkError::Overflow)
        );
        assert_eq!(rx_open.drain().len(), 1);
    }
}
