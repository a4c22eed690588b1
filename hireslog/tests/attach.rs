use hireslog::{Collector, CollectorConfig, ControlClient, Logger, Origin};
use rstest::*;
use std::path::PathBuf;
use std::time::Duration;
use tempfile::tempdir;

fn test_config(capacity: u64) -> (CollectorConfig, PathBuf) {
    let dir = tempdir().unwrap();
    let socket_path = dir.path().join("hireslog.sock");
    std::mem::forget(dir);
    (
        CollectorConfig {
            capacity,
            socket_path: socket_path.clone(),
            // Coarse ratio is fine for tests; keeps startup fast.
            calibration_interval: Duration::from_millis(50),
        },
        socket_path,
    )
}

#[rstest]
fn attach_publish_pop_round_trip() {
    let (config, socket_path) = test_config(64);
    let mut collector = Collector::create(config).unwrap();

    let logger = Logger::attach(&socket_path).unwrap();
    logger.publish(42, 7, 13).unwrap();
    logger.publish(43, 8, 14).unwrap();

    let first = collector.pop().expect("first published entry");
    assert_eq!(first.event_id, 42);
    assert_eq!(first.data1, 7);
    assert_eq!(first.data2, 13);
    assert!(!first.is_kernel());

    let second = collector.pop().expect("second published entry");
    assert_eq!(second.event_id, 43);
    assert!(first.timestamp <= second.timestamp);

    assert!(collector.pop().is_none());
    assert_eq!(collector.dropped(), 0);
}

#[rstest]
fn attach_caches_geometry_and_calibration() {
    let (config, socket_path) = test_config(16);
    let collector = Collector::create(config).unwrap();

    let logger = Logger::attach(&socket_path).unwrap();

    assert_eq!(logger.geometry(), collector.geometry());
    assert_eq!(logger.geometry().capacity, 16);
    assert_eq!(logger.geometry().idx_mask, 15);
    assert_eq!(logger.cycles_per_us(), collector.cycles_per_us());
    assert!(logger.cycles_per_us() > 0);
}

#[rstest]
fn geometry_queries_are_idempotent() {
    let (config, socket_path) = test_config(16);
    let collector = Collector::create(config).unwrap();

    let mut logger = Logger::attach(&socket_path).unwrap();
    let first = logger.refresh_geometry().unwrap();
    let second = logger.refresh_geometry().unwrap();

    assert_eq!(first, second);
    assert_eq!(first, collector.geometry());
    assert_eq!(first, logger.geometry());
}

#[rstest]
fn kernel_origin_is_visible_to_the_collector() {
    let (config, socket_path) = test_config(16);
    let mut collector = Collector::create(config).unwrap();

    let logger = Logger::attach_with_origin(&socket_path, Origin::Kernel).unwrap();
    logger.publish(100, 0, 0).unwrap();

    let entry = collector.pop().unwrap();
    assert!(entry.is_kernel());
    assert_eq!(entry.event_id, 100);
}

#[rstest]
fn overflow_drops_are_counted_and_observable() {
    let (config, socket_path) = test_config(4);
    let mut collector = Collector::create(config).unwrap();

    let logger = Logger::attach(&socket_path).unwrap();
    let outcomes: Vec<_> = (1..=5u32).map(|i| logger.publish(i, i as u64, 0)).collect();

    assert_eq!(outcomes.iter().filter(|o| o.is_ok()).count(), 4);
    assert_eq!(outcomes.iter().filter(|o| o.is_err()).count(), 1);
    assert_eq!(logger.dropped(), 1);
    assert_eq!(collector.dropped(), 1);

    for expected in 1..=4u32 {
        assert_eq!(collector.pop().unwrap().event_id, expected);
    }
    assert!(collector.pop().is_none());
}

#[rstest]
fn reset_clears_a_quiesced_ring() {
    let (config, socket_path) = test_config(4);
    let mut collector = Collector::create(config).unwrap();

    let logger = Logger::attach(&socket_path).unwrap();
    for i in 1..=5u32 {
        let _ = logger.publish(i, 0, 0);
    }
    assert_eq!(collector.dropped(), 1);

    // Quiesce the only producer, then reset over the sideband.
    drop(logger);
    let mut client = ControlClient::connect(&socket_path).unwrap();
    client.reset().unwrap();

    assert!(collector.pop().is_none());
    assert_eq!(collector.dropped(), 0);
    assert_eq!(collector.available(), 0);

    // The ring is usable again after the reset.
    let logger = Logger::attach(&socket_path).unwrap();
    logger.publish(9, 1, 2).unwrap();
    assert_eq!(collector.pop().unwrap().event_id, 9);
}

#[rstest]
fn sideband_serves_cycles_per_us_to_raw_clients() {
    let (config, socket_path) = test_config(16);
    let collector = Collector::create(config).unwrap();

    let mut client = ControlClient::connect(&socket_path).unwrap();
    assert_eq!(client.cycles_per_us().unwrap(), collector.cycles_per_us());

    let wire = client.geometry().unwrap();
    assert_eq!(wire.capacity, 16);
    assert_eq!(wire.idx_mask, 15);
}

#[rstest]
fn attach_fails_without_a_collector() {
    let dir = tempdir().unwrap();
    let missing = dir.path().join("nobody-home.sock");
    assert!(Logger::attach(&missing).is_err());
}

#[rstest]
fn multiple_loggers_preserve_per_thread_order() {
    let (config, socket_path) = test_config(4096);
    let mut collector = Collector::create(config).unwrap();

    let num_loggers = 3usize;
    let per_logger = 200u64;

    let handles: Vec<_> = (0..num_loggers)
        .map(|id| {
            let socket_path = socket_path.clone();
            std::thread::spawn(move || {
                let logger = Logger::attach(&socket_path).unwrap();
                for seq in 0..per_logger {
                    logger
                        .publish(id as u32, seq, 0)
                        .expect("ring sized to never fill");
                }
            })
        })
        .collect();

    let mut next_seq = vec![0u64; num_loggers];
    let mut received = 0u64;
    let expected = num_loggers as u64 * per_logger;
    while received < expected {
        match collector.pop() {
            Some(entry) => {
                let id = entry.event_id as usize;
                assert_eq!(entry.data1, next_seq[id], "logger {} out of order", id);
                next_seq[id] += 1;
                received += 1;
            }
            None => std::thread::yield_now(),
        }
    }

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(collector.dropped(), 0);
}
