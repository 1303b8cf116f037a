// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use datadog_metrics_monitor::{
    AlarmState, AlertEvent, CallbackSink, CollectorError, Monitor, MonitorConfig, MonitorError,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::Duration;
use tokio::time::{sleep, timeout, Instant};

const INTERVAL: Duration = Duration::from_millis(10);
const WAIT: Duration = Duration::from_secs(5);

fn quiet_config() -> MonitorConfig {
    MonitorConfig {
        sample_interval: INTERVAL,
        internal_metrics: false,
        ..Default::default()
    }
}

async fn wait_for_ticks(monitor: &Monitor, ticks: u64) {
    let deadline = Instant::now() + WAIT;
    while monitor.tick_count() < ticks {
        assert!(Instant::now() < deadline, "sampler did not reach {ticks} ticks");
        sleep(Duration::from_millis(2)).await;
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scripted_values_produce_four_transitions() {
    let (monitor, mut alerts) = Monitor::new(quiet_config()).unwrap();
    monitor.register_threshold("cpu.usage_pct", 70.0, 90.0).unwrap();

    let script = Arc::new(Mutex::new(vec![60.0, 80.0, 95.0, 75.0, 50.0].into_iter()));
    let store = monitor.store();
    let clock = monitor.clock();
    monitor.register_collector("scripted", move || {
        if let Some(value) = script.lock().unwrap().next() {
            store.upsert("cpu.usage_pct", value, clock.now())?;
        }
        Ok(())
    });

    monitor.start().await.unwrap();
    let mut events = Vec::new();
    while events.len() < 4 {
        let event = timeout(WAIT, alerts.recv()).await.unwrap().unwrap();
        events.push(event);
    }
    wait_for_ticks(&monitor, 7).await;
    monitor.stop().await.unwrap();

    let transitions: Vec<_> = events.iter().map(|e| (e.old_state, e.new_state)).collect();
    assert_eq!(
        transitions,
        vec![
            (AlarmState::Normal, AlarmState::Warning),
            (AlarmState::Warning, AlarmState::Critical),
            (AlarmState::Critical, AlarmState::Warning),
            (AlarmState::Warning, AlarmState::Normal),
        ]
    );
    assert_eq!(
        events.iter().map(|e| e.value).collect::<Vec<_>>(),
        vec![80.0, 95.0, 75.0, 50.0]
    );
    assert!(alerts.try_recv().is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_failing_collectors_do_not_stop_sampling() {
    let (monitor, _alerts) = Monitor::new(quiet_config()).unwrap();
    let healthy_runs = Arc::new(AtomicUsize::new(0));

    monitor.register_collector("fails", || Err(CollectorError::Failed("no data".into())));
    monitor.register_collector("panics", || -> Result<(), CollectorError> {
        panic!("collector bug")
    });
    {
        let healthy_runs = Arc::clone(&healthy_runs);
        let store = monitor.store();
        let clock = monitor.clock();
        monitor.register_collector("healthy", move || {
            healthy_runs.fetch_add(1, Ordering::SeqCst);
            store.upsert("healthy.value", 1.0, clock.now())?;
            Ok(())
        });
    }

    monitor.start().await.unwrap();
    wait_for_ticks(&monitor, 3).await;
    monitor.stop().await.unwrap();

    let ticks = monitor.tick_count();
    let stats = monitor.stats();
    assert_eq!(healthy_runs.load(Ordering::SeqCst) as u64, ticks);
    assert_eq!(stats.collector_failures, 2 * ticks);
    assert_eq!(monitor.get("healthy.value").unwrap().sample_count, ticks);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_stop_and_restart() {
    let (monitor, _alerts) = Monitor::new(quiet_config()).unwrap();

    assert_eq!(monitor.stop().await.unwrap_err(), MonitorError::NotRunning);
    monitor.start().await.unwrap();
    assert_eq!(monitor.start().await.unwrap_err(), MonitorError::AlreadyRunning);
    wait_for_ticks(&monitor, 2).await;
    monitor.stop().await.unwrap();

    let stopped_at = monitor.tick_count();
    sleep(INTERVAL * 5).await;
    assert_eq!(monitor.tick_count(), stopped_at);
    assert!(!monitor.is_running());

    monitor.start().await.unwrap();
    wait_for_ticks(&monitor, stopped_at + 2).await;
    monitor.stop().await.unwrap();
    assert!(monitor.tick_count() >= stopped_at + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_readers_see_coherent_samples_while_sampling() {
    let (monitor, _alerts) = Monitor::new(quiet_config()).unwrap();
    let counter = Arc::new(AtomicUsize::new(0));
    {
        let counter = Arc::clone(&counter);
        let store = monitor.store();
        let clock = monitor.clock();
        monitor.register_collector("swing", move || {
            let n = counter.fetch_add(1, Ordering::SeqCst);
            let value = if n % 2 == 0 { 1_000.0 } else { -1_000.0 };
            for i in 0..50 {
                store.upsert(&format!("swing.{i}"), value * f64::from(i), clock.now())?;
            }
            Ok(())
        });
    }

    monitor.start().await.unwrap();
    let store = monitor.store();
    let reader = thread::spawn(move || {
        let mut reads = 0;
        while reads < 2_000 {
            for sample in store.snapshot() {
                assert!(sample.min_value <= sample.current_value);
                assert!(sample.current_value <= sample.max_value);
            }
            reads += 1;
        }
    });
    tokio::task::spawn_blocking(move || reader.join().unwrap())
        .await
        .unwrap();
    monitor.stop().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_report_while_running() {
    let config = MonitorConfig {
        sample_interval: INTERVAL,
        ..Default::default()
    };
    let (monitor, _alerts) = Monitor::new(config).unwrap();
    monitor.register_threshold("monitor.sampler.ticks", 3.0, 1_000_000.0).unwrap();

    monitor.start().await.unwrap();
    wait_for_ticks(&monitor, 4).await;
    let report = monitor.render();
    monitor.stop().await.unwrap();

    let json: serde_json::Value = serde_json::from_str(&report.to_json().unwrap()).unwrap();
    assert_eq!(json["sampler"]["running"], true);
    assert!(json["metrics"]
        .as_array()
        .unwrap()
        .iter()
        .any(|m| m["name"] == "monitor.sampler.ticks"));
    assert_eq!(json["thresholds"][0]["state"], "warning");
    assert!(json["thresholds"][0]["last_transition_ms"].is_u64());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_panicking_sink_does_not_stop_sampling() {
    let sink = CallbackSink::new(|_: AlertEvent| panic!("alert handler bug"));
    let monitor = Monitor::with_sink(quiet_config(), Arc::new(sink)).unwrap();
    monitor.register_threshold("m", 1.0, 2.0).unwrap();
    let store = monitor.store();
    let clock = monitor.clock();
    monitor.register_collector("constant", move || {
        store.upsert("m", 5.0, clock.now())?;
        Ok(())
    });

    monitor.start().await.unwrap();
    wait_for_ticks(&monitor, 3).await;
    assert!(monitor.is_running());
    assert!(monitor.render().sampler.unwrap().running);
    monitor.stop().await.unwrap();

    let ticks = monitor.tick_count();
    assert_eq!(monitor.get("m").unwrap().sample_count, ticks);
    assert_eq!(monitor.dropped_alerts(), 1);
}

#[tokio::test]
async fn test_custom_sink_and_configured_thresholds() {
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = {
        let seen = Arc::clone(&seen);
        CallbackSink::new(move |event: AlertEvent| seen.lock().unwrap().push(event))
    };
    let config = MonitorConfig::from_lookup(|key| match key {
        "DD_MONITOR_THRESHOLDS" => Some("disk:/var:80:95".to_string()),
        "DD_MONITOR_INTERNAL_METRICS" => Some("false".to_string()),
        _ => None,
    })
    .unwrap();
    let monitor = Monitor::with_sink(config, Arc::new(sink)).unwrap();

    monitor.upsert("disk:/var", 85.0).unwrap();
    monitor.run_tick().await.unwrap();
    monitor.upsert("disk:/var", 99.0).unwrap();
    monitor.run_tick().await.unwrap();

    let states: Vec<_> = seen.lock().unwrap().iter().map(|e| e.new_state).collect();
    assert_eq!(states, vec![AlarmState::Warning, AlarmState::Critical]);
}

#[tokio::test]
async fn test_disabled_threshold_stays_silent() {
    let (monitor, mut alerts) = Monitor::new(quiet_config()).unwrap();
    let handle = monitor.register_threshold("mem", 50.0, 90.0).unwrap();
    monitor.disable_threshold(handle).unwrap();

    monitor.upsert("mem", 95.0).unwrap();
    monitor.run_tick().await.unwrap();
    assert!(alerts.try_recv().is_none());

    monitor.enable_threshold(handle).unwrap();
    monitor.run_tick().await.unwrap();
    assert_eq!(alerts.try_recv().unwrap().new_state, AlarmState::Critical);
}
