//! Post-mortem ring buffer
//!
//! A pass-through stage that keeps the most recent samples of the stream in
//! a fixed-capacity ring. An out-of-band reader can freeze the buffer and
//! drain a snapshot for diagnostics while the stream keeps flowing.
//!
//! Freezing captures the ring as an owned snapshot. Writes after the freeze
//! go to the live ring only, so the drained data is exactly what the buffer
//! held at freeze time. Draining releases the snapshot.

use crate::error::ConfigError;
use crate::runtime::{Stage, WorkInput, WorkOutput, WorkReturn, MAX_BUFFER_ITEMS};
use crate::tags::{AcqInfo, SidebandTag};
use serde::Serialize;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

/// Name and unit of the buffered signal
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignalMetadata {
    pub name: String,
    pub unit: String,
}

/// Acquisition parameters describing a drained batch
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct MeasurementInfo {
    /// Distance between samples in seconds
    pub timebase: f64,
    pub user_delay: f64,
    pub actual_delay: f64,
    /// Channel status bits of the last seen acquisition info
    pub status: u32,
    /// Timestamp of the first drained sample (UTC nanoseconds), -1 when unknown
    pub timestamp: i64,
    pub pre_trigger_samples: u64,
    pub post_trigger_samples: u64,
}

impl Default for MeasurementInfo {
    fn default() -> Self {
        Self {
            timebase: 0.0,
            user_delay: 0.0,
            actual_delay: 0.0,
            status: 0,
            timestamp: -1,
            pre_trigger_samples: 0,
            post_trigger_samples: 0,
        }
    }
}

/// Result of draining the post-mortem buffer
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct PostMortemData {
    pub values: Vec<f32>,
    pub errors: Vec<f32>,
    pub info: MeasurementInfo,
}

impl PostMortemData {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

#[derive(Debug, Clone)]
struct Ring {
    values: Vec<f32>,
    errors: Vec<f32>,
    write_index: usize,
    nitems: u64,
    last_acq: Option<(AcqInfo, u64)>,
}

impl Ring {
    fn new(capacity: usize) -> Self {
        Self {
            values: vec![0.0; capacity],
            errors: vec![0.0; capacity],
            write_index: 0,
            nitems: 0,
            last_acq: None,
        }
    }

    fn capacity(&self) -> usize {
        self.values.len()
    }

    fn write(&mut self, values: &[f32], errors: Option<&[f32]>) {
        let capacity = self.capacity();
        // Only the last `capacity` samples can survive
        let skip = values.len().saturating_sub(capacity);
        let mut pos = skip;
        while pos < values.len() {
            let n = (values.len() - pos).min(capacity - self.write_index);
            let range = self.write_index..self.write_index + n;
            self.values[range.clone()].copy_from_slice(&values[pos..pos + n]);
            match errors {
                Some(errors) => self.errors[range].copy_from_slice(&errors[pos..pos + n]),
                None => self.errors[range].fill(0.0),
            }
            self.write_index = (self.write_index + n) % capacity;
            pos += n;
        }
        self.nitems += values.len() as u64;
    }

    fn read_last(&self, n: usize) -> (Vec<f32>, Vec<f32>) {
        let capacity = self.capacity();
        let start = (self.write_index + capacity - n) % capacity;
        let mut values = Vec::with_capacity(n);
        let mut errors = Vec::with_capacity(n);
        if start + n <= capacity {
            values.extend_from_slice(&self.values[start..start + n]);
            errors.extend_from_slice(&self.errors[start..start + n]);
        } else {
            values.extend_from_slice(&self.values[start..]);
            values.extend_from_slice(&self.values[..self.write_index]);
            errors.extend_from_slice(&self.errors[start..]);
            errors.extend_from_slice(&self.errors[..self.write_index]);
        }
        (values, errors)
    }

    fn timestamp_of(&self, offset: u64) -> i64 {
        let Some((info, anchor)) = self.last_acq else {
            return -1;
        };
        if info.timestamp < 0 {
            return -1;
        }
        // Float to int casts saturate; a pre-epoch result counts as unknown
        if offset >= anchor {
            let delta = (info.timebase * (offset - anchor) as f64 * 1e9).round() as i64;
            info.timestamp.saturating_add(delta).max(-1)
        } else {
            let delta = (info.timebase * (anchor - offset) as f64 * 1e9).round() as i64;
            info.timestamp.saturating_sub(delta).max(-1)
        }
    }

    fn drain(&self, n: usize) -> PostMortemData {
        let n = n.min(self.capacity()).min(self.nitems as usize);
        let (values, errors) = self.read_last(n);
        let first_offset = self.nitems - n as u64;
        let acq = self.last_acq.map(|(info, _)| info).unwrap_or_default();

        PostMortemData {
            values,
            errors,
            info: MeasurementInfo {
                timebase: acq.timebase,
                user_delay: acq.user_delay,
                actual_delay: acq.actual_delay,
                status: acq.status,
                timestamp: self.timestamp_of(first_offset),
                pre_trigger_samples: 0,
                post_trigger_samples: n as u64,
            },
        }
    }
}

#[derive(Debug)]
struct SinkState {
    live: Ring,
    frozen: Option<Ring>,
}

/// Shared handle to a post-mortem buffer
///
/// Cloning yields another handle to the same buffer, so one clone can sit in
/// the streaming path while another serves diagnostic reads.
#[derive(Debug, Clone)]
pub struct PostMortemSink {
    state: Arc<Mutex<SinkState>>,
    metadata: SignalMetadata,
    capacity: usize,
}

impl PostMortemSink {
    /// Create a buffer holding the last `capacity` samples
    ///
    /// # Arguments
    /// * `capacity` - Number of samples retained, must be non-zero
    /// * `name` - Signal name reported by [`metadata`](Self::metadata)
    /// * `unit` - Signal unit reported by [`metadata`](Self::metadata)
    ///
    /// # Example
    /// ```
    /// use digitizers_core::stages::PostMortemSink;
    ///
    /// let sink = PostMortemSink::new(100, "beam_current", "mA").unwrap();
    /// sink.append(&[1.0, 2.0, 3.0], None, &[]);
    /// sink.freeze();
    /// assert_eq!(sink.drain(2).values, vec![2.0, 3.0]);
    /// ```
    pub fn new(
        capacity: usize,
        name: impl Into<String>,
        unit: impl Into<String>,
    ) -> Result<Self, ConfigError> {
        if capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if capacity > MAX_BUFFER_ITEMS {
            return Err(ConfigError::Invalid {
                field: "capacity",
                reason: format!("{} exceeds the limit of {} samples", capacity, MAX_BUFFER_ITEMS),
            });
        }
        Ok(Self {
            state: Arc::new(Mutex::new(SinkState {
                live: Ring::new(capacity),
                frozen: None,
            })),
            metadata: SignalMetadata {
                name: name.into(),
                unit: unit.into(),
            },
            capacity,
        })
    }

    fn lock(&self) -> MutexGuard<'_, SinkState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn metadata(&self) -> SignalMetadata {
        self.metadata.clone()
    }

    pub fn buffer_size(&self) -> usize {
        self.capacity
    }

    /// Total number of samples written since creation
    pub fn nitems_written(&self) -> u64 {
        self.lock().live.nitems
    }

    pub fn is_frozen(&self) -> bool {
        self.lock().frozen.is_some()
    }

    /// Store samples and remember the last acquisition info among `tags`
    ///
    /// Tag offsets are absolute positions in the buffered stream.
    pub fn append(&self, values: &[f32], errors: Option<&[f32]>, tags: &[SidebandTag]) {
        let mut state = self.lock();
        let ring = &mut state.live;
        ring.write(values, errors);

        let last = tags
            .iter()
            .rev()
            .filter(|t| t.is_acq_info())
            .find_map(|t| t.decode_acq_info().ok().map(|info| (info, t.offset)));
        if last.is_some() {
            ring.last_acq = last;
        }
    }

    /// Freeze the readable view; repeated calls keep the first snapshot
    pub fn freeze(&self) {
        let mut state = self.lock();
        if state.frozen.is_none() {
            tracing::info!(nitems = state.live.nitems, "Post-mortem buffer frozen");
            state.frozen = Some(state.live.clone());
        }
    }

    /// Drain the last `n` samples of the frozen view and unfreeze
    ///
    /// Returns `None` when the buffer is not frozen.
    pub fn try_drain(&self, n: usize) -> Option<PostMortemData> {
        let mut state = self.lock();
        let snapshot = state.frozen.take()?;
        let data = snapshot.drain(n);
        tracing::info!(requested = n, drained = data.len(), "Post-mortem buffer drained");
        Some(data)
    }

    /// Like [`try_drain`](Self::try_drain) but yields an empty batch when not frozen
    pub fn drain(&self, n: usize) -> PostMortemData {
        self.try_drain(n).unwrap_or_default()
    }
}

impl Stage for PostMortemSink {
    fn name(&self) -> &str {
        "post_mortem_sink"
    }

    fn work(&mut self, input: &WorkInput<'_>, output: &mut WorkOutput<'_>) -> WorkReturn {
        if input.is_empty() {
            return WorkReturn::insufficient_input(0);
        }
        let n = input.len().min(output.capacity());
        if n == 0 {
            return WorkReturn::insufficient_output(0);
        }

        let end = input.nitems_read + n as u64;
        let tags: Vec<SidebandTag> = input.tags_in_range(input.nitems_read, end).cloned().collect();
        let errors = input.errors.map(|e| &e[..n]);
        self.append(&input.values[..n], errors, &tags);

        output.values[..n].copy_from_slice(&input.values[..n]);
        if let (Some(src), Some(dst)) = (errors, output.errors.as_deref_mut()) {
            dst[..n].copy_from_slice(src);
        }
        for tag in tags {
            let offset = output.nitems_written + (tag.offset - input.nitems_read);
            output.add_tag(tag.with_offset(offset));
        }
        WorkReturn::ok(n, n)
    }
}
