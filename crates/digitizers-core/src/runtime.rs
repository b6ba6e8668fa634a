//! Stage runtime
//!
//! Stages are driven by a pull-based host: each invocation hands the stage a
//! batch of input samples (plus the sideband tags attached to them) and a
//! writable output region. The stage reports how much it consumed and
//! produced, or that it cannot make progress until more input arrives or more
//! output space is available. Stages never block and never spawn threads.
//!
//! [`StageRunner`] is a small single-threaded host that queues pushed chunks
//! and drives one stage with bounded batches.

use crate::error::ConfigError;
use crate::tags::SidebandTag;

/// Largest buffer, in samples, a stage or runner may be configured with
pub const MAX_BUFFER_ITEMS: usize = 1 << 26;

/// Outcome category of a single work invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkStatus {
    /// Progress was made (or no progress is possible without more input)
    Ok,
    /// Fewer than the minimum batch of input items was available
    InsufficientInput,
    /// Output is ready but the output region is too small
    InsufficientOutput,
}

/// Result of a single work invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkReturn {
    /// Number of input items consumed
    pub consumed: usize,
    /// Number of output items produced
    pub produced: usize,
    /// Outcome category
    pub status: WorkStatus,
}

impl WorkReturn {
    pub fn ok(consumed: usize, produced: usize) -> Self {
        Self {
            consumed,
            produced,
            status: WorkStatus::Ok,
        }
    }

    pub fn insufficient_input(consumed: usize) -> Self {
        Self {
            consumed,
            produced: 0,
            status: WorkStatus::InsufficientInput,
        }
    }

    pub fn insufficient_output(consumed: usize) -> Self {
        Self {
            consumed,
            produced: 0,
            status: WorkStatus::InsufficientOutput,
        }
    }
}

/// Read-only view of the input batch of one invocation
#[derive(Debug, Clone, Copy)]
pub struct WorkInput<'a> {
    /// Sample values
    pub values: &'a [f32],
    /// Optional error samples, same length as `values`
    pub errors: Option<&'a [f32]>,
    /// Tags attached to the batch, sorted by absolute offset
    pub tags: &'a [SidebandTag],
    /// Absolute offset of `values[0]`
    pub nitems_read: u64,
}

impl<'a> WorkInput<'a> {
    pub fn new(values: &'a [f32], tags: &'a [SidebandTag], nitems_read: u64) -> Self {
        Self {
            values,
            errors: None,
            tags,
            nitems_read,
        }
    }

    pub fn with_errors(mut self, errors: &'a [f32]) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absolute offset one past the last sample of the batch
    pub fn end(&self) -> u64 {
        self.nitems_read + self.values.len() as u64
    }

    /// Tags with absolute offsets in `[start, end)`
    pub fn tags_in_range(&self, start: u64, end: u64) -> impl Iterator<Item = &'a SidebandTag> {
        let tags = self.tags;
        let first = tags.partition_point(|t| t.offset < start);
        tags[first..].iter().take_while(move |t| t.offset < end)
    }
}

/// Writable view of the output region of one invocation
#[derive(Debug)]
pub struct WorkOutput<'a> {
    /// Output sample slots
    pub values: &'a mut [f32],
    /// Optional output error slots, same length as `values`
    pub errors: Option<&'a mut [f32]>,
    /// Absolute offset of `values[0]`
    pub nitems_written: u64,
    tags: Vec<SidebandTag>,
}

impl<'a> WorkOutput<'a> {
    pub fn new(values: &'a mut [f32], nitems_written: u64) -> Self {
        Self {
            values,
            errors: None,
            nitems_written,
            tags: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: &'a mut [f32]) -> Self {
        self.errors = Some(errors);
        self
    }

    /// Number of output slots available
    pub fn capacity(&self) -> usize {
        self.values.len()
    }

    /// Attach a tag to an absolute output offset
    pub fn add_tag(&mut self, tag: SidebandTag) {
        self.tags.push(tag);
    }

    pub fn tags(&self) -> &[SidebandTag] {
        &self.tags
    }

    pub fn into_tags(self) -> Vec<SidebandTag> {
        self.tags
    }
}

/// A streaming processing stage
pub trait Stage: Send {
    /// Human-readable stage name used in logs
    fn name(&self) -> &str;

    /// Reset internal state before (re)starting a stream
    fn start(&mut self) {}

    /// Minimum number of input items required per invocation
    fn min_input_items(&self) -> usize {
        1
    }

    /// Process one batch
    fn work(&mut self, input: &WorkInput<'_>, output: &mut WorkOutput<'_>) -> WorkReturn;
}

/// A contiguous piece of a stream with its tags at absolute offsets
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StreamChunk {
    /// Absolute offset of the first sample
    pub offset: u64,
    pub values: Vec<f32>,
    pub errors: Option<Vec<f32>>,
    pub tags: Vec<SidebandTag>,
}

impl StreamChunk {
    pub fn new(offset: u64, values: Vec<f32>) -> Self {
        Self {
            offset,
            values,
            errors: None,
            tags: Vec::new(),
        }
    }

    pub fn with_errors(mut self, errors: Vec<f32>) -> Self {
        self.errors = Some(errors);
        self
    }

    pub fn with_tags(mut self, tags: Vec<SidebandTag>) -> Self {
        self.tags = tags;
        self
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Absolute offset one past the last sample
    pub fn end(&self) -> u64 {
        self.offset + self.values.len() as u64
    }
}

/// Single-threaded host driving one stage
pub struct StageRunner<S: Stage> {
    stage: S,
    max_batch: usize,
    pending_values: Vec<f32>,
    pending_errors: Option<Vec<f32>>,
    /// Index of the first unconsumed pending sample
    pending_start: usize,
    pending_tags: Vec<SidebandTag>,
    nitems_read: u64,
    nitems_written: u64,
    scratch_values: Vec<f32>,
    scratch_errors: Vec<f32>,
    out_offset: u64,
    out_values: Vec<f32>,
    out_errors: Option<Vec<f32>>,
    out_tags: Vec<SidebandTag>,
}

impl<S: Stage> StageRunner<S> {
    /// Create a runner
    ///
    /// # Arguments
    /// * `stage` - Stage to drive, started immediately
    /// * `max_batch` - Upper bound on input items per invocation
    /// * `output_capacity` - Output slots offered per invocation
    pub fn new(mut stage: S, max_batch: usize, output_capacity: usize) -> Result<Self, ConfigError> {
        if max_batch == 0 || output_capacity == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if output_capacity > MAX_BUFFER_ITEMS {
            return Err(ConfigError::Invalid {
                field: "output_capacity",
                reason: format!("{} exceeds the limit of {}", output_capacity, MAX_BUFFER_ITEMS),
            });
        }
        stage.start();
        Ok(Self {
            stage,
            max_batch,
            pending_values: Vec::new(),
            pending_errors: None,
            pending_start: 0,
            pending_tags: Vec::new(),
            nitems_read: 0,
            nitems_written: 0,
            scratch_values: vec![0.0; output_capacity],
            scratch_errors: vec![0.0; output_capacity],
            out_offset: 0,
            out_values: Vec::new(),
            out_errors: None,
            out_tags: Vec::new(),
        })
    }

    pub fn stage(&self) -> &S {
        &self.stage
    }

    pub fn stage_mut(&mut self) -> &mut S {
        &mut self.stage
    }

    pub fn nitems_read(&self) -> u64 {
        self.nitems_read
    }

    pub fn nitems_written(&self) -> u64 {
        self.nitems_written
    }

    /// Samples queued but not yet consumed by the stage
    pub fn pending_len(&self) -> usize {
        self.pending_values.len() - self.pending_start
    }

    /// Queue a chunk of input
    ///
    /// Tag offsets must be absolute positions in this runner's input stream.
    /// Once any chunk carries an error channel, chunks without one are padded
    /// with zero errors. An error channel whose length differs from the
    /// values is truncated or zero-padded to match.
    pub fn push(&mut self, chunk: StreamChunk) {
        let StreamChunk {
            values,
            errors,
            mut tags,
            ..
        } = chunk;

        let errors = errors.map(|mut errs| {
            if errs.len() != values.len() {
                tracing::warn!(
                    values = values.len(),
                    errors = errs.len(),
                    "Error channel length mismatch, fitting to values"
                );
                errs.resize(values.len(), 0.0);
            }
            errs
        });

        match (&mut self.pending_errors, errors) {
            (Some(pending), Some(errs)) => pending.extend(errs),
            (Some(pending), None) => pending.resize(pending.len() + values.len(), 0.0),
            (None, Some(errs)) => {
                let mut pending = vec![0.0; self.pending_values.len()];
                pending.extend(errs);
                self.pending_errors = Some(pending);
            }
            (None, None) => {}
        }
        self.pending_values.extend(values);

        tags.sort_by_key(|t| t.offset);
        self.pending_tags.extend(tags);
        self.pending_tags.sort_by_key(|t| t.offset);
    }

    /// Drive the stage until it starves or stops making progress
    pub fn run(&mut self) -> WorkStatus {
        loop {
            let start = self.pending_start;
            let batch = self
                .pending_len()
                .min(self.max_batch.max(self.stage.min_input_items()));
            let batch_end = self.nitems_read + batch as u64;
            let tag_count = self.pending_tags.partition_point(|t| t.offset < batch_end);

            let mut input = WorkInput::new(
                &self.pending_values[start..start + batch],
                &self.pending_tags[..tag_count],
                self.nitems_read,
            );
            if let Some(errors) = &self.pending_errors {
                input = input.with_errors(&errors[start..start + batch]);
            }

            let mut output = WorkOutput::new(&mut self.scratch_values, self.nitems_written);
            if self.pending_errors.is_some() {
                output = output.with_errors(&mut self.scratch_errors);
            }

            let ret = self.stage.work(&input, &mut output);
            let tags = output.into_tags();

            let consumed = ret.consumed.min(batch);
            let produced = ret.produced.min(self.scratch_values.len());
            self.collect_output(produced, tags);
            self.consume(consumed);

            if ret.status != WorkStatus::Ok {
                return ret.status;
            }
            if consumed == 0 && produced == 0 {
                return WorkStatus::Ok;
            }
        }
    }

    /// Take everything produced since the last call
    pub fn take_output(&mut self) -> StreamChunk {
        let chunk = StreamChunk {
            offset: self.out_offset,
            values: std::mem::take(&mut self.out_values),
            errors: self.out_errors.take(),
            tags: std::mem::take(&mut self.out_tags),
        };
        self.out_offset = self.nitems_written;
        chunk
    }

    /// Push a chunk, run the stage and take its output
    pub fn process(&mut self, chunk: StreamChunk) -> StreamChunk {
        self.push(chunk);
        self.run();
        self.take_output()
    }

    /// Drop queued input and output and restart the stage
    pub fn reset(&mut self) {
        self.pending_values.clear();
        self.pending_errors = None;
        self.pending_start = 0;
        self.pending_tags.clear();
        self.nitems_read = 0;
        self.nitems_written = 0;
        self.out_offset = 0;
        self.out_values.clear();
        self.out_errors = None;
        self.out_tags.clear();
        self.stage.start();
    }

    fn collect_output(&mut self, produced: usize, tags: Vec<SidebandTag>) {
        self.out_values
            .extend_from_slice(&self.scratch_values[..produced]);
        if self.pending_errors.is_some() {
            let out_len = self.out_values.len() - produced;
            let errors = self.out_errors.get_or_insert_with(|| vec![0.0; out_len]);
            errors.extend_from_slice(&self.scratch_errors[..produced]);
        }
        self.out_tags.extend(tags);
        self.nitems_written += produced as u64;
    }

    fn consume(&mut self, consumed: usize) {
        if consumed == 0 {
            return;
        }
        self.pending_start += consumed;
        // Compact once the consumed prefix dominates the queue
        if self.pending_start * 2 >= self.pending_values.len() {
            self.pending_values.drain(..self.pending_start);
            if let Some(errors) = &mut self.pending_errors {
                errors.drain(..self.pending_start);
            }
            self.pending_start = 0;
        }
        self.nitems_read += consumed as u64;
        let read = self.nitems_read;
        let stale = self.pending_tags.partition_point(|t| t.offset < read);
        self.pending_tags.drain(..stale);
    }
}
