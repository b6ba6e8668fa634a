//! Trigger-synchronized window extraction
//!
//! Cuts a fixed `pre_trigger + post_trigger` window out of a live stream
//! around every trigger tag. Samples outside any window are dropped. The
//! trigger tag and every acquisition info tag that falls inside the window are
//! re-anchored to the window's output position.
//!
//! The extractor keeps its own history ring so that a window can still be
//! cut after the samples preceding the trigger have been consumed. Triggers
//! that arrive while a window is still being collected are queued and served
//! in arrival order; a queued trigger whose window has already fallen out of
//! the history is dropped.

use crate::error::ConfigError;
use crate::runtime::{Stage, StreamChunk, WorkInput, WorkOutput, WorkReturn, MAX_BUFFER_ITEMS};
use crate::tags::{AcqInfo, SidebandTag, TagKind, TriggerPayload};
use ringbuf::traits::{Consumer, Observer, RingBuffer};
use ringbuf::HeapRb;
use serde::Serialize;
use std::collections::VecDeque;

/// Window geometry around a trigger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct WindowSpec {
    /// Samples before the trigger sample
    pub pre_trigger: u64,
    /// Samples from the trigger sample onwards
    pub post_trigger: u64,
}

impl WindowSpec {
    pub fn new(pre_trigger: u64, post_trigger: u64) -> Result<Self, ConfigError> {
        let len = pre_trigger
            .checked_add(post_trigger)
            .filter(|len| *len <= MAX_BUFFER_ITEMS as u64)
            .ok_or_else(|| ConfigError::Invalid {
                field: "window",
                reason: format!(
                    "pre_trigger {} + post_trigger {} exceeds the limit of {} samples",
                    pre_trigger, post_trigger, MAX_BUFFER_ITEMS
                ),
            })?;
        if len == 0 {
            return Err(ConfigError::EmptyWindow {
                pre_trigger,
                post_trigger,
            });
        }
        Ok(Self {
            pre_trigger,
            post_trigger,
        })
    }

    /// Total window length in samples
    pub fn window_len(&self) -> usize {
        (self.pre_trigger + self.post_trigger) as usize
    }
}

/// Extraction state machine
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractorState {
    WaitTrigger,
    CalcOutputRange,
    WaitAllData,
    OutputData,
}

/// Why a trigger did not produce a window
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DropReason {
    /// Trigger offset does not exceed the pre-trigger length
    TooCloseToStreamStart,
    /// Window start has already left the retained history
    HistoryExhausted,
    /// Trigger payload could not be decoded
    MalformedPayload,
}

impl std::fmt::Display for DropReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let text = match self {
            DropReason::TooCloseToStreamStart => "too close to stream start",
            DropReason::HistoryExhausted => "history exhausted",
            DropReason::MalformedPayload => "malformed payload",
        };
        f.write_str(text)
    }
}

/// A trigger that was seen but did not produce a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DroppedTrigger {
    /// Absolute input offset of the trigger tag
    pub offset: u64,
    pub reason: DropReason,
}

/// Extractor counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ExtractorStats {
    pub triggers_detected: u64,
    pub windows_emitted: u64,
    pub triggers_dropped: u64,
    pub payloads_rejected: u64,
}

#[derive(Debug, Clone)]
struct PendingTrigger {
    offset: u64,
    payload: TriggerPayload,
}

/// Trigger-synchronized window extractor
pub struct TriggerExtractor {
    spec: WindowSpec,
    history_depth: usize,
    values: HeapRb<f32>,
    errors: HeapRb<f32>,
    acq_history: VecDeque<(u64, AcqInfo)>,
    queued: VecDeque<PendingTrigger>,
    state: ExtractorState,
    active: Option<PendingTrigger>,
    window_start: u64,
    window_end: u64,
    window_acq: Vec<(u64, AcqInfo)>,
    scanned_until: u64,
    stats: ExtractorStats,
    dropped: Vec<DroppedTrigger>,
}

impl TriggerExtractor {
    /// Create an extractor
    ///
    /// # Arguments
    /// * `spec` - Window geometry
    /// * `history` - Requested history depth; at least the window length is kept
    pub fn new(spec: WindowSpec, history: usize) -> Result<Self, ConfigError> {
        let spec = WindowSpec::new(spec.pre_trigger, spec.post_trigger)?;
        if history > MAX_BUFFER_ITEMS {
            return Err(ConfigError::Invalid {
                field: "history",
                reason: format!("{} exceeds the limit of {} samples", history, MAX_BUFFER_ITEMS),
            });
        }
        let history_depth = history.max(spec.window_len());
        Ok(Self {
            spec,
            history_depth,
            values: HeapRb::new(history_depth),
            errors: HeapRb::new(history_depth),
            acq_history: VecDeque::new(),
            queued: VecDeque::new(),
            state: ExtractorState::WaitTrigger,
            active: None,
            window_start: 0,
            window_end: 0,
            window_acq: Vec::new(),
            scanned_until: 0,
            stats: ExtractorStats::default(),
            dropped: Vec::new(),
        })
    }

    pub fn spec(&self) -> WindowSpec {
        self.spec
    }

    pub fn history_depth(&self) -> usize {
        self.history_depth
    }

    pub fn state(&self) -> ExtractorState {
        self.state
    }

    pub fn stats(&self) -> ExtractorStats {
        self.stats
    }

    /// Number of triggers waiting behind the one being collected
    pub fn queued_triggers(&self) -> usize {
        self.queued.len()
    }

    /// Take the triggers dropped since the last call
    pub fn take_dropped(&mut self) -> Vec<DroppedTrigger> {
        std::mem::take(&mut self.dropped)
    }

    fn drop_trigger(&mut self, offset: u64, reason: DropReason) {
        match reason {
            DropReason::MalformedPayload => self.stats.payloads_rejected += 1,
            _ => self.stats.triggers_dropped += 1,
        }
        tracing::warn!(offset, reason = %reason, "Dropping trigger");
        self.dropped.push(DroppedTrigger { offset, reason });
    }

    fn queue_trigger(&mut self, tag: &SidebandTag) {
        match tag.decode_trigger() {
            Ok(payload) => {
                self.stats.triggers_detected += 1;
                tracing::debug!(offset = tag.offset, name = %payload.name, "Trigger detected");
                self.queued.push_back(PendingTrigger {
                    offset: tag.offset,
                    payload,
                });
            }
            Err(e) => {
                tracing::debug!(offset = tag.offset, error = %e, "Undecodable trigger payload");
                self.drop_trigger(tag.offset, DropReason::MalformedPayload);
            }
        }
    }

    /// Move `n` input samples starting at absolute offset `read` into history
    fn consume(&mut self, input: &WorkInput<'_>, read: u64, n: usize) {
        if n == 0 {
            return;
        }
        let start = (read - input.nitems_read) as usize;
        self.values
            .push_slice_overwrite(&input.values[start..start + n]);
        match input.errors {
            Some(errors) => self.errors.push_slice_overwrite(&errors[start..start + n]),
            None => self.errors.push_iter_overwrite(std::iter::repeat(0.0).take(n)),
        }

        let end = read + n as u64;
        for tag in input.tags_in_range(read, end) {
            match tag.kind {
                TagKind::AcqInfo => match tag.decode_acq_info() {
                    Ok(info) => {
                        if self.active.is_some()
                            && tag.offset >= self.window_start
                            && tag.offset < self.window_end
                        {
                            self.window_acq.push((tag.offset, info));
                        }
                        self.acq_history.push_back((tag.offset, info));
                    }
                    Err(e) => {
                        self.stats.payloads_rejected += 1;
                        tracing::warn!(offset = tag.offset, error = %e, "Skipping malformed acq_info tag");
                    }
                },
                TagKind::Trigger if tag.offset >= self.scanned_until => self.queue_trigger(tag),
                _ => {}
            }
        }
        self.scanned_until = self.scanned_until.max(end);

        let horizon = end.saturating_sub(self.history_depth as u64);
        while self
            .acq_history
            .front()
            .is_some_and(|(offset, _)| *offset < horizon)
        {
            self.acq_history.pop_front();
        }
    }

    fn emit_window(&mut self, read: u64, output: &mut WorkOutput<'_>) -> usize {
        let len = self.spec.window_len();
        let lag = (read - self.window_end) as usize;
        let skip = self.values.occupied_len().saturating_sub(lag + len);

        for (slot, value) in output.values[..len]
            .iter_mut()
            .zip(self.values.iter().skip(skip).take(len))
        {
            *slot = *value;
        }
        if let Some(out_errors) = output.errors.as_deref_mut() {
            for (slot, error) in out_errors[..len]
                .iter_mut()
                .zip(self.errors.iter().skip(skip).take(len))
            {
                *slot = *error;
            }
        }

        let base = output.nitems_written;
        let mut tags = Vec::with_capacity(self.window_acq.len() + 1);
        if let Some(trigger) = self.active.take() {
            tags.push(SidebandTag::trigger(
                base + self.spec.pre_trigger,
                &trigger.payload,
            ));
        }
        for (offset, info) in self.window_acq.drain(..) {
            tags.push(SidebandTag::acq_info(base + (offset - self.window_start), &info));
        }
        tags.sort_by_key(|t| t.offset);
        for tag in tags {
            output.add_tag(tag);
        }

        self.stats.windows_emitted += 1;
        len
    }
}

impl Stage for TriggerExtractor {
    fn name(&self) -> &str {
        "trigger_extractor"
    }

    fn start(&mut self) {
        self.values = HeapRb::new(self.history_depth);
        self.errors = HeapRb::new(self.history_depth);
        self.acq_history.clear();
        self.queued.clear();
        self.state = ExtractorState::WaitTrigger;
        self.active = None;
        self.window_start = 0;
        self.window_end = 0;
        self.window_acq.clear();
        self.scanned_until = 0;
        self.dropped.clear();
    }

    fn work(&mut self, input: &WorkInput<'_>, output: &mut WorkOutput<'_>) -> WorkReturn {
        let mut consumed = 0usize;
        let input_end = input.end();

        loop {
            let read = input.nitems_read + consumed as u64;
            match self.state {
                ExtractorState::WaitTrigger => {
                    if let Some(next) = self.queued.pop_front() {
                        self.active = Some(next);
                        self.state = ExtractorState::CalcOutputRange;
                        continue;
                    }

                    let next_offset = input
                        .tags_in_range(read.max(self.scanned_until), input_end)
                        .find(|t| t.is_trigger())
                        .map(|t| t.offset);

                    match next_offset {
                        Some(offset) => {
                            let n = (offset - read) as usize;
                            self.consume(input, read, n);
                            consumed += n;
                            for tag in input.tags_in_range(offset, offset + 1) {
                                if tag.is_trigger() {
                                    self.queue_trigger(tag);
                                }
                            }
                            self.scanned_until = offset + 1;
                        }
                        None => {
                            let n = (input_end - read) as usize;
                            self.consume(input, read, n);
                            consumed += n;
                            break;
                        }
                    }
                }
                ExtractorState::CalcOutputRange => {
                    let Some(trigger) = self.active.as_ref() else {
                        self.state = ExtractorState::WaitTrigger;
                        continue;
                    };
                    let offset = trigger.offset;
                    self.state = ExtractorState::WaitTrigger;

                    if offset <= self.spec.pre_trigger {
                        self.active = None;
                        self.drop_trigger(offset, DropReason::TooCloseToStreamStart);
                        continue;
                    }

                    let window_start = offset - self.spec.pre_trigger;
                    let relative_start = window_start as i64 - read as i64;
                    // Queued triggers are served in offset order and history
                    // holds at least one window, so only an out-of-order
                    // queue can reach this drop.
                    if relative_start < -(self.history_depth as i64) {
                        self.active = None;
                        self.drop_trigger(offset, DropReason::HistoryExhausted);
                        continue;
                    }

                    self.window_start = window_start;
                    self.window_end = offset + self.spec.post_trigger;
                    let window_end = self.window_end;
                    self.window_acq = self
                        .acq_history
                        .iter()
                        .filter(|(o, _)| *o >= window_start && *o < window_end)
                        .copied()
                        .collect();
                    self.state = ExtractorState::WaitAllData;
                }
                ExtractorState::WaitAllData => {
                    if read < self.window_end {
                        let n = (self.window_end.min(input_end) - read) as usize;
                        self.consume(input, read, n);
                        consumed += n;
                        if read + (n as u64) < self.window_end {
                            break;
                        }
                    }
                    self.state = ExtractorState::OutputData;
                }
                ExtractorState::OutputData => {
                    if output.capacity() < self.spec.window_len() {
                        return WorkReturn::insufficient_output(consumed);
                    }
                    let produced = self.emit_window(read, output);
                    self.state = ExtractorState::WaitTrigger;
                    return WorkReturn::ok(consumed, produced);
                }
            }
        }

        if consumed == 0 {
            WorkReturn::insufficient_input(0)
        } else {
            WorkReturn::ok(consumed, 0)
        }
    }
}

/// One extracted window as delivered to consumers
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ExtractedWindow {
    /// Absolute output offset of the first window sample
    pub first_offset: u64,
    pub samples: Vec<f32>,
    pub errors: Option<Vec<f32>>,
    pub trigger: TriggerPayload,
    /// Acquisition info tags, offset relative to the trigger sample
    pub acq_infos: Vec<(i64, AcqInfo)>,
}

impl ExtractedWindow {
    /// Split extractor output into windows
    ///
    /// The chunk must start on a window boundary, which holds for any chunk
    /// taken from a [`StageRunner`](crate::runtime::StageRunner) driving a
    /// [`TriggerExtractor`].
    pub fn from_chunk(chunk: &StreamChunk, spec: WindowSpec) -> Vec<ExtractedWindow> {
        let len = spec.window_len();
        let pre = spec.pre_trigger as i64;

        chunk
            .values
            .chunks_exact(len)
            .enumerate()
            .filter_map(|(i, samples)| {
                let first_offset = chunk.offset + (i * len) as u64;
                let end = first_offset + len as u64;
                let tags = chunk
                    .tags
                    .iter()
                    .filter(|t| t.offset >= first_offset && t.offset < end);

                let mut trigger = None;
                let mut acq_infos = Vec::new();
                for tag in tags {
                    if tag.is_trigger() && trigger.is_none() {
                        trigger = tag.decode_trigger().ok();
                    } else if let Ok(info) = tag.decode_acq_info() {
                        acq_infos.push(((tag.offset - first_offset) as i64 - pre, info));
                    }
                }

                let errors = chunk
                    .errors
                    .as_ref()
                    .and_then(|e| e.get(i * len..(i + 1) * len))
                    .map(<[f32]>::to_vec);

                trigger.map(|trigger| ExtractedWindow {
                    first_offset,
                    samples: samples.to_vec(),
                    errors,
                    trigger,
                    acq_infos,
                })
            })
            .collect()
    }
}
