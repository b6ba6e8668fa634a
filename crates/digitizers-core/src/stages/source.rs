//! Simulated digitizer source
//!
//! Produces a sine wave with deterministic noise in fixed-size acquisition
//! chunks. Every chunk carries an acquisition info tag on its first sample and
//! a trigger tag is attached every `trigger_period` samples, so that the full
//! windowing chain can run without hardware.

use crate::runtime::StreamChunk;
use crate::tags::{AcqInfo, SidebandTag, TriggerPayload};
use std::f64::consts::TAU;

/// Trigger name used for simulated triggers
pub const SIMULATED_TRIGGER_NAME: &str = "CMD_SIMULATED_TRIGGER";

/// Initial noise generator state
const NOISE_SEED: u32 = 0xDEADBEEF;

/// Deterministic signal generator standing in for a digitizer
#[derive(Debug, Clone)]
pub struct SimulatedDigitizer {
    /// Sample rate in Hz
    sample_rate: f64,
    /// Samples per emitted chunk
    chunk_size: usize,
    /// Sine frequency in Hz
    frequency: f64,
    amplitude: f32,
    noise_amplitude: f32,
    /// Samples between triggers, 0 disables triggers
    trigger_period: u64,
    /// UTC nanoseconds of sample 0
    start_timestamp: i64,
    /// Emit a constant error channel equal to the noise amplitude
    with_errors: bool,
    /// Absolute offset of the next sample
    offset: u64,
    noise_seed: u32,
}

impl SimulatedDigitizer {
    /// Create a source emitting `chunk_size` samples per chunk
    ///
    /// # Arguments
    /// * `sample_rate` - Sample rate in Hz
    /// * `chunk_size` - Samples per chunk
    ///
    /// # Example
    /// ```
    /// use digitizers_core::stages::SimulatedDigitizer;
    ///
    /// let mut source = SimulatedDigitizer::new(10_000.0, 500).with_trigger_period(250);
    /// let chunk = source.next_chunk();
    /// assert_eq!(chunk.len(), 500);
    /// assert_eq!(chunk.tags.iter().filter(|t| t.is_trigger()).count(), 2);
    /// ```
    pub fn new(sample_rate: f64, chunk_size: usize) -> Self {
        Self {
            sample_rate,
            chunk_size,
            frequency: 50.0,
            amplitude: 1.0,
            noise_amplitude: 0.0,
            trigger_period: 0,
            start_timestamp: 0,
            with_errors: false,
            offset: 0,
            noise_seed: NOISE_SEED,
        }
    }

    pub fn with_signal(mut self, frequency: f64, amplitude: f32) -> Self {
        self.frequency = frequency;
        self.amplitude = amplitude;
        self
    }

    pub fn with_noise(mut self, noise_amplitude: f32) -> Self {
        self.noise_amplitude = noise_amplitude;
        self
    }

    pub fn with_trigger_period(mut self, trigger_period: u64) -> Self {
        self.trigger_period = trigger_period;
        self
    }

    pub fn with_start_timestamp(mut self, start_timestamp: i64) -> Self {
        self.start_timestamp = start_timestamp;
        self
    }

    pub fn with_errors(mut self, with_errors: bool) -> Self {
        self.with_errors = with_errors;
        self
    }

    /// Seconds between two samples
    pub fn timebase(&self) -> f64 {
        if self.sample_rate > 0.0 {
            1.0 / self.sample_rate
        } else {
            0.0
        }
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Absolute offset of the next sample to be produced
    pub fn offset(&self) -> u64 {
        self.offset
    }

    /// Timestamp of the sample at `offset`
    pub fn timestamp_at(&self, offset: u64) -> i64 {
        self.start_timestamp + (offset as f64 * self.timebase() * 1e9) as i64
    }

    fn generate_noise(&mut self) -> f32 {
        // LCG parameters (same as glibc)
        self.noise_seed = self.noise_seed.wrapping_mul(1103515245).wrapping_add(12345);
        let bits = (self.noise_seed >> 16) & 0x7FFF;
        (bits as f32 / 16384.0) - 1.0
    }

    /// Produce the next chunk
    pub fn next_chunk(&mut self) -> StreamChunk {
        let start = self.offset;
        let timebase = self.timebase();
        let phase_step = TAU * self.frequency * timebase;

        let mut values = Vec::with_capacity(self.chunk_size);
        for i in 0..self.chunk_size as u64 {
            let phase = phase_step * (start + i) as f64;
            let noise = if self.noise_amplitude > 0.0 {
                self.generate_noise() * self.noise_amplitude
            } else {
                0.0
            };
            values.push(self.amplitude * phase.sin() as f32 + noise);
        }

        let end = start + self.chunk_size as u64;
        let mut tags = vec![SidebandTag::acq_info(
            start,
            &AcqInfo {
                timestamp: self.timestamp_at(start),
                timebase,
                user_delay: 0.0,
                actual_delay: 0.0,
                status: 0,
            },
        )];
        if self.trigger_period > 0 {
            // offset 0 never carries a trigger
            let first = start.max(self.trigger_period).div_ceil(self.trigger_period)
                * self.trigger_period;
            let mut trigger = first;
            while trigger < end {
                tags.push(SidebandTag::trigger(
                    trigger,
                    &TriggerPayload::new(SIMULATED_TRIGGER_NAME, self.timestamp_at(trigger), 0.0),
                ));
                trigger += self.trigger_period;
            }
        }

        let mut chunk = StreamChunk::new(start, values).with_tags(tags);
        if self.with_errors {
            chunk = chunk.with_errors(vec![self.noise_amplitude; self.chunk_size]);
        }
        self.offset = end;
        chunk
    }

    /// Restart from offset 0 with the initial noise state
    pub fn reset(&mut self) {
        self.offset = 0;
        self.noise_seed = NOISE_SEED;
    }
}
