//! E2E tests for decimation tag re-timing
//!
//! Checks status merging and that windows cut from a decimated stream keep
//! their size and trigger anchoring.

use approx::assert_relative_eq;
use digitizers::stages::ExtractedWindow;
use digitizers::{
    AcqInfo, SidebandTag, StageRunner, StreamChunk, TagReTimer, TriggerExtractor, TriggerPayload,
    WindowSpec,
};

fn acq(offset: u64, status: u32) -> SidebandTag {
    SidebandTag::acq_info(
        offset,
        &AcqInfo {
            timestamp: 10_000,
            timebase: 2e-6,
            status,
            ..Default::default()
        },
    )
}

/// Two AcqInfo tags collapsing onto one decimated sample OR their status
#[test]
fn test_status_merge_k5() {
    let mut runner = StageRunner::new(TagReTimer::new(5), 128, 128).unwrap();
    let out = runner.process(StreamChunk::new(0, vec![1.0; 25]).with_tags(vec![acq(11, 2), acq(13, 1)]));

    assert_eq!(out.values.len(), 5);
    assert_eq!(out.tags.len(), 1);
    assert_eq!(out.tags[0].offset, 2);

    let merged = out.tags[0].decode_acq_info().unwrap();
    assert_eq!(merged.status, 3);
    assert_eq!(merged.timestamp, 10_000);
    assert_relative_eq!(merged.timebase, 1e-5);
}

/// Tags in different decimated samples stay separate
#[test]
fn test_no_merge_across_groups() {
    let mut runner = StageRunner::new(TagReTimer::new(5), 128, 128).unwrap();
    let out = runner.process(StreamChunk::new(0, vec![1.0; 25]).with_tags(vec![acq(4, 2), acq(5, 1)]));

    let offsets: Vec<_> = out.tags.iter().map(|t| t.offset).collect();
    assert_eq!(offsets, vec![0, 1]);
}

/// Window size and anchoring survive decimation for any decimation factor
#[test]
fn test_decimated_windows() {
    let values: Vec<f32> = (0..5000).map(|i| i as f32).collect();
    let triggers = [1000u64, 2500, 4000];
    let spec = WindowSpec::new(10, 15).unwrap();

    for k in [0usize, 1, 2, 5, 10] {
        let mut tags: Vec<_> = triggers
            .iter()
            .map(|o| SidebandTag::trigger(*o, &TriggerPayload::new("T", *o as i64, 0.0)))
            .collect();
        tags.push(acq(1001, 4));

        let mut retimer = StageRunner::new(TagReTimer::new(k), 333, 512).unwrap();
        let extractor = TriggerExtractor::new(spec, 0).unwrap();
        let mut extractor = StageRunner::new(extractor, 97, 512).unwrap();

        let decimated = retimer.process(StreamChunk::new(0, values.clone()).with_tags(tags));
        let out = extractor.process(decimated);

        let windows = ExtractedWindow::from_chunk(&out, spec);
        assert_eq!(windows.len(), 3, "decimation {}", k);
        let k = k.max(1) as f32;
        for (window, trigger) in windows.iter().zip(triggers) {
            assert_eq!(window.samples.len(), 25);
            assert_eq!(window.trigger.timestamp_ns, trigger as i64);
            // mean of the group containing the trigger
            let group_start = (trigger as f32 / k).floor() * k;
            assert_relative_eq!(window.samples[10], group_start + (k - 1.0) / 2.0);
        }
        assert!(windows[0].acq_infos.iter().any(|(_, info)| info.status == 4));
    }
}
