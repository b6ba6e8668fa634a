//! Statistics storage
//!
//! Counters for the streaming stages plus bounded histories of recently
//! extracted windows and dropped triggers.

use crate::stages::{DropReason, ExtractedWindow};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::VecDeque;

/// Maximum number of dropped-trigger events kept
const MAX_DROP_EVENTS: usize = 1000;

/// Maximum number of window summaries kept
const MAX_RECENT_WINDOWS: usize = 100;

/// A trigger that did not produce a window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DropEvent {
    /// When the drop was recorded
    pub timestamp: DateTime<Utc>,
    /// Absolute offset of the trigger in the extractor input
    pub trigger_offset: u64,
    pub reason: DropReason,
}

/// Short description of an extracted window
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WindowSummary {
    /// When the window was extracted
    pub timestamp: DateTime<Utc>,
    /// Absolute output offset of the first sample
    pub first_offset: u64,
    pub trigger_name: String,
    pub trigger_timestamp_ns: i64,
    pub samples: usize,
    /// OR of all acquisition info statuses inside the window
    pub status: u32,
    pub mean: f32,
}

impl WindowSummary {
    pub fn from_window(window: &ExtractedWindow) -> Self {
        let mean = if window.samples.is_empty() {
            0.0
        } else {
            window.samples.iter().sum::<f32>() / window.samples.len() as f32
        };
        Self {
            timestamp: Utc::now(),
            first_offset: window.first_offset,
            trigger_name: window.trigger.name.clone(),
            trigger_timestamp_ns: window.trigger.timestamp_ns,
            samples: window.samples.len(),
            status: window.acq_infos.iter().fold(0, |acc, (_, info)| acc | info.status),
            mean,
        }
    }
}

/// Running counters
#[derive(Debug, Default, Clone, PartialEq, Serialize)]
pub struct RunningStats {
    /// Source samples processed
    pub samples_processed: u64,
    pub chunks_processed: u64,
    pub windows_emitted: u64,
    /// Windows dropped because the consumer lagged behind
    pub windows_discarded: u64,
    pub triggers_detected: u64,
    pub triggers_dropped: u64,
    /// Undecodable tag payloads
    pub payloads_rejected: u64,
    /// Acquisition info tags folded together by decimation
    pub acq_infos_merged: u64,
    /// Seconds since the pipeline started
    pub uptime_seconds: u64,
}

/// Statistics store shared between the pipeline and its readers
#[derive(Debug)]
pub struct StatsStore {
    stats: RunningStats,
    drop_events: VecDeque<DropEvent>,
    recent_windows: VecDeque<WindowSummary>,
    started_at: DateTime<Utc>,
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StatsStore {
    pub fn new() -> Self {
        Self {
            stats: RunningStats::default(),
            drop_events: VecDeque::with_capacity(MAX_DROP_EVENTS),
            recent_windows: VecDeque::with_capacity(MAX_RECENT_WINDOWS),
            started_at: Utc::now(),
        }
    }

    /// Record one processed source chunk
    pub fn record_chunk(&mut self, samples: usize) {
        self.stats.samples_processed += samples as u64;
        self.stats.chunks_processed += 1;
        self.stats.uptime_seconds = (Utc::now() - self.started_at).num_seconds().max(0) as u64;
    }

    /// Record an extracted window
    pub fn record_window(&mut self, window: &ExtractedWindow) {
        self.stats.windows_emitted += 1;
        if self.recent_windows.len() >= MAX_RECENT_WINDOWS {
            self.recent_windows.pop_front();
        }
        self.recent_windows.push_back(WindowSummary::from_window(window));
    }

    /// Record a window the consumer had no room for
    pub fn record_discarded(&mut self) {
        self.stats.windows_discarded += 1;
    }

    /// Record a trigger that did not produce a window
    ///
    /// Malformed trigger payloads are counted as rejected payloads, all other
    /// reasons as dropped triggers.
    pub fn record_drop(&mut self, trigger_offset: u64, reason: DropReason) {
        match reason {
            DropReason::MalformedPayload => self.stats.payloads_rejected += 1,
            _ => self.stats.triggers_dropped += 1,
        }
        if self.drop_events.len() >= MAX_DROP_EVENTS {
            self.drop_events.pop_front();
        }
        self.drop_events.push_back(DropEvent {
            timestamp: Utc::now(),
            trigger_offset,
            reason,
        });
    }

    pub fn record_triggers_detected(&mut self, count: u64) {
        self.stats.triggers_detected += count;
    }

    /// Record undecodable payloads that are not triggers
    pub fn record_rejected(&mut self, count: u64) {
        self.stats.payloads_rejected += count;
    }

    pub fn record_merged(&mut self, count: u64) {
        self.stats.acq_infos_merged += count;
    }

    pub fn stats(&self) -> &RunningStats {
        &self.stats
    }

    pub fn drop_events(&self) -> &VecDeque<DropEvent> {
        &self.drop_events
    }

    pub fn recent_windows(&self) -> &VecDeque<WindowSummary> {
        &self.recent_windows
    }

    /// The last `count` drop events, newest first
    pub fn latest_drops(&self, count: usize) -> Vec<DropEvent> {
        self.drop_events.iter().rev().take(count).cloned().collect()
    }

    /// Reset counters without clearing history
    pub fn reset_counters(&mut self) {
        self.stats = RunningStats::default();
        self.started_at = Utc::now();
    }

    /// Clear all history and reset statistics
    pub fn clear(&mut self) {
        self.reset_counters();
        self.drop_events.clear();
        self.recent_windows.clear();
    }
}
