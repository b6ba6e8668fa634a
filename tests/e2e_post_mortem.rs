//! E2E tests for the post-mortem buffer
//!
//! Covers wrap-around read-out, drain idempotence and read-out while the
//! buffer is fed from another thread.

use digitizers::{AcqInfo, PostMortemSink, SidebandTag, StageRunner, StreamChunk};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

fn ramp(start: usize, len: usize) -> Vec<f32> {
    (start..start + len).map(|i| i as f32).collect()
}

/// Draining after a wrap returns the most recently written samples
#[test]
fn test_wrap_correctness() {
    let sink = PostMortemSink::new(100, "signal", "V").unwrap();
    for part in ramp(0, 130).chunks(13) {
        sink.append(part, None, &[]);
    }

    sink.freeze();
    let data = sink.drain(30);
    assert_eq!(data.values, ramp(100, 30));
    assert_eq!(data.errors.len(), 30);
}

/// A second drain without re-freezing is empty
#[test]
fn test_idempotent_drain() {
    let sink = PostMortemSink::new(100, "signal", "V").unwrap();
    sink.append(&ramp(0, 50), None, &[]);

    sink.freeze();
    sink.freeze();
    assert_eq!(sink.drain(10).len(), 10);
    assert!(sink.drain(10).is_empty());
    assert_eq!(sink.drain(10).info.timestamp, -1);
}

/// The leading timestamp is extrapolated from the last AcqInfo
#[test]
fn test_leading_timestamp() {
    let sink = PostMortemSink::new(1000, "signal", "V").unwrap();
    let mut runner = StageRunner::new(sink.clone(), 64, 64).unwrap();
    let info = AcqInfo {
        timestamp: 2_000_000_000,
        timebase: 1e-6,
        status: 1,
        ..Default::default()
    };

    runner.process(StreamChunk::new(0, vec![0.0; 500]).with_tags(vec![SidebandTag::acq_info(400, &info)]));
    sink.freeze();
    let data = sink.drain(200);

    // first drained sample is offset 300, 100 samples before the anchor
    assert_eq!(data.info.timestamp, 2_000_000_000 - 100_000);
    assert_eq!(data.info.status, 1);
    assert_eq!(data.info.post_trigger_samples, 200);
}

/// Freezing from another thread never tears the streamed data
#[test]
fn test_read_out_while_streaming() {
    let sink = PostMortemSink::new(256, "signal", "V").unwrap();
    let mut runner = StageRunner::new(sink.clone(), 32, 32).unwrap();
    let done = Arc::new(AtomicBool::new(false));

    let writer_done = Arc::clone(&done);
    let writer = std::thread::spawn(move || {
        for i in 0..500 {
            let out = runner.process(StreamChunk::new(i * 40, ramp(i as usize * 40, 40)));
            assert_eq!(out.len(), 40);
        }
        writer_done.store(true, Ordering::Release);
    });

    let mut reads = 0;
    loop {
        let finished = done.load(Ordering::Acquire);
        sink.freeze();
        let data = sink.drain(128);
        for pair in data.values.windows(2) {
            assert_eq!(pair[1], pair[0] + 1.0);
        }
        reads += 1;
        if finished {
            break;
        }
    }
    writer.join().unwrap();
    assert!(reads > 0);
    assert_eq!(sink.nitems_written(), 20_000);
}
