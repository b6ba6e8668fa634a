//! E2E tests for trigger-synchronized window extraction
//!
//! Drives the extractor through the stage runner the way a pipeline does and
//! checks window geometry and tag placement.

use digitizers::stages::{DropReason, ExtractedWindow};
use digitizers::{
    AcqInfo, SidebandTag, StageRunner, StreamChunk, TriggerExtractor, TriggerPayload, WindowSpec,
};

fn trigger(offset: u64) -> SidebandTag {
    SidebandTag::trigger(offset, &TriggerPayload::new("CMD_BP_START", 1_000 + offset as i64, 0.25))
}

fn acq(offset: u64, status: u32) -> SidebandTag {
    SidebandTag::acq_info(
        offset,
        &AcqInfo {
            timestamp: offset as i64,
            timebase: 1e-6,
            status,
            ..Default::default()
        },
    )
}

fn extractor(pre: u64, post: u64, batch: usize) -> StageRunner<TriggerExtractor> {
    let spec = WindowSpec::new(pre, post).unwrap();
    StageRunner::new(TriggerExtractor::new(spec, 0).unwrap(), batch, 4096).unwrap()
}

/// Feed `values` in pieces of `piece` samples, collecting all output
fn feed(
    runner: &mut StageRunner<TriggerExtractor>,
    values: &[f32],
    tags: &[SidebandTag],
    piece: usize,
) -> StreamChunk {
    let mut out = StreamChunk::default();
    for (i, part) in values.chunks(piece).enumerate() {
        let start = (i * piece) as u64;
        let end = start + part.len() as u64;
        let part_tags = tags
            .iter()
            .filter(|t| t.offset >= start && t.offset < end)
            .cloned()
            .collect();
        let produced = runner.process(StreamChunk::new(start, part.to_vec()).with_tags(part_tags));
        out.values.extend(produced.values);
        out.tags.extend(produced.tags);
    }
    out
}

/// One trigger in a constant stream yields exactly one window
#[test]
fn test_single_trigger_scenario() {
    let mut runner = extractor(20, 10, 1024);
    let out = feed(&mut runner, &[0.5; 1000], &[trigger(500), acq(503, 2)], 1000);

    assert_eq!(out.values.len(), 30);
    assert!(out.values.iter().all(|v| *v == 0.5));

    assert_eq!(out.tags.len(), 2);
    assert!(out.tags[0].is_trigger());
    assert_eq!(out.tags[0].offset, 20);
    assert_eq!(out.tags[1].offset, 23);
    let info = out.tags[1].decode_acq_info().unwrap();
    assert_eq!(info.status, 2);

    // Trigger payload is forwarded untouched
    let payload = out.tags[0].decode_trigger().unwrap();
    assert_eq!(payload, TriggerPayload::new("CMD_BP_START", 1_500, 0.25));
}

/// Output is a whole number of windows whatever the batching
#[test]
fn test_window_size_invariant() {
    let values: Vec<f32> = (0..3000).map(|i| i as f32).collect();
    let tags: Vec<_> = [150u64, 700, 1290, 2001, 2990].iter().map(|o| trigger(*o)).collect();
    let spec = WindowSpec::new(30, 70).unwrap();

    for piece in [1usize, 5, 64, 333, 3000] {
        for batch in [1usize, 17, 512] {
            let mut runner = extractor(30, 70, batch);
            let out = feed(&mut runner, &values, &tags, piece);

            // trigger 2990 never completes its post-trigger part
            assert_eq!(out.values.len(), 4 * 100, "piece {} batch {}", piece, batch);
            let windows = ExtractedWindow::from_chunk(&out, spec);
            for (window, trigger) in windows.iter().zip([150, 700, 1290, 2001]) {
                assert_eq!(window.samples[30], trigger as f32);
                assert_eq!(window.samples.len(), 100);
            }
        }
    }
}

/// Every AcqInfo at relative offset r lands at pre + r
#[test]
fn test_acq_info_relative_placement() {
    let pre = 8u64;
    let post = 12u64;
    for r in -(pre as i64)..(post as i64) {
        let mut runner = extractor(pre, post, 7);
        let at = (100 + r) as u64;
        let out = feed(&mut runner, &[0.0; 200], &[trigger(100), acq(at, 1)], 50);

        let acq_tags: Vec<_> = out.tags.iter().filter(|t| t.is_acq_info()).collect();
        assert_eq!(acq_tags.len(), 1, "relative offset {}", r);
        assert_eq!(acq_tags[0].offset as i64, pre as i64 + r);
    }
}

/// AcqInfo just outside the window is not forwarded
#[test]
fn test_acq_info_outside_window() {
    let mut runner = extractor(8, 12, 64);
    let out = feed(&mut runner, &[0.0; 200], &[acq(91, 1), trigger(100), acq(112, 1)], 200);
    assert_eq!(out.tags.len(), 1);
    assert!(out.tags[0].is_trigger());
}

/// Triggers that cannot have a full pre-trigger window are dropped
#[test]
fn test_early_trigger_dropped() {
    let mut runner = extractor(20, 10, 64);
    let out = feed(&mut runner, &[0.0; 200], &[trigger(5), trigger(20), trigger(100)], 200);

    assert_eq!(out.values.len(), 30);
    let stats = runner.stage().stats();
    assert_eq!(stats.triggers_detected, 3);
    assert_eq!(stats.triggers_dropped, 2);
    assert_eq!(stats.windows_emitted, 1);

    let dropped = runner.stage_mut().take_dropped();
    assert!(dropped
        .iter()
        .all(|d| d.reason == DropReason::TooCloseToStreamStart));
    assert_eq!(dropped.iter().map(|d| d.offset).collect::<Vec<_>>(), vec![5, 20]);
}

/// Densely spaced triggers are served in arrival order
#[test]
fn test_dense_triggers_produce_overlapping_windows() {
    let values: Vec<f32> = (0..400).map(|i| i as f32).collect();
    let tags: Vec<_> = (0..5).map(|i| trigger(100 + i * 3)).collect();
    let mut runner = extractor(10, 20, 32);
    let out = feed(&mut runner, &values, &tags, 400);

    let windows = ExtractedWindow::from_chunk(&out, WindowSpec::new(10, 20).unwrap());
    assert_eq!(windows.len(), 5);
    for (i, window) in windows.iter().enumerate() {
        assert_eq!(window.samples[10], (100 + i * 3) as f32);
        assert_eq!(window.trigger.timestamp_ns, 1_100 + (i as i64) * 3);
    }
}
