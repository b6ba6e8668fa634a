//! E2E tests for the threaded acquisition pipeline

use digitizers::stages::SIMULATED_TRIGGER_NAME;
use digitizers::{PipelineConfig, PipelineHandle, StatsStore};
use std::sync::{Arc, Mutex};
use std::time::Duration;

fn config() -> PipelineConfig {
    PipelineConfig {
        sample_rate: 100_000.0,
        chunk_size: 500,
        trigger_period: 1_200,
        pre_trigger: 100,
        post_trigger: 200,
        post_mortem_capacity: 2_000,
        realtime: false,
        ..Default::default()
    }
}

#[test]
fn test_windows_flow_to_consumer() {
    let mut handle = PipelineHandle::spawn(config()).unwrap();
    let windows = handle.windows();

    for _ in 0..5 {
        let window = windows.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(window.samples.len(), 300);
        assert_eq!(window.trigger.name, SIMULATED_TRIGGER_NAME);
        // the chunk AcqInfo lands inside some windows, never outside the range
        for (rel, _) in &window.acq_infos {
            assert!((-100..200).contains(rel));
        }
    }

    handle.stop();
    assert!(!handle.is_alive());
}

#[test]
fn test_shared_stats_and_post_mortem() {
    let stats = Arc::new(Mutex::new(StatsStore::new()));
    let mut handle = PipelineHandle::spawn_with_stats(
        PipelineConfig {
            decimation: 4,
            pre_trigger: 25,
            post_trigger: 50,
            ..config()
        },
        Arc::clone(&stats),
    )
    .unwrap();

    let window = handle.windows().recv_timeout(Duration::from_secs(5)).unwrap();
    assert_eq!(window.samples.len(), 75);

    let sink = handle.post_mortem();
    sink.freeze();
    let data = sink.drain(1_000);
    assert_eq!(data.len(), 1_000);
    assert!(data.info.timestamp > 0);
    assert!(data.info.timebase > 0.0);

    handle.stop();
    let store = stats.lock().unwrap();
    assert!(store.stats().windows_emitted >= 1);
    assert!(store.stats().samples_processed >= 1_500);
    assert!(!store.recent_windows().is_empty());
}

#[test]
fn test_invalid_config_fails_to_spawn() {
    let result = PipelineHandle::spawn(PipelineConfig {
        post_mortem_capacity: 0,
        ..config()
    });
    assert!(result.is_err());
}
