//! Pipeline configuration
//!
//! Every field has a serde default so that partial JSON documents load.

use crate::error::ConfigError;
use crate::runtime::MAX_BUFFER_ITEMS;
use crate::stages::WindowSpec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

fn default_sample_rate() -> f64 {
    crate::DEFAULT_SAMPLE_RATE
}

fn default_chunk_size() -> usize {
    1000
}

fn default_signal_frequency() -> f64 {
    50.0
}

fn default_amplitude() -> f32 {
    1.0
}

fn default_noise_amplitude() -> f32 {
    0.05
}

fn default_trigger_period() -> u64 {
    2500
}

fn default_decimation() -> usize {
    1
}

fn default_pre_trigger() -> u64 {
    100
}

fn default_post_trigger() -> u64 {
    400
}

fn default_post_mortem_capacity() -> usize {
    10_000
}

fn default_signal_name() -> String {
    "simulated_signal".to_string()
}

fn default_unit() -> String {
    "V".to_string()
}

fn default_window_queue() -> usize {
    64
}

fn default_realtime() -> bool {
    true
}

/// Configuration of the simulated acquisition pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PipelineConfig {
    /// Source sample rate in Hz
    #[serde(default = "default_sample_rate")]
    pub sample_rate: f64,
    /// Samples per acquisition chunk
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    /// Simulated sine frequency in Hz
    #[serde(default = "default_signal_frequency")]
    pub signal_frequency: f64,
    #[serde(default = "default_amplitude")]
    pub amplitude: f32,
    #[serde(default = "default_noise_amplitude")]
    pub noise_amplitude: f32,
    /// Source samples between triggers (0 = no triggers)
    #[serde(default = "default_trigger_period")]
    pub trigger_period: u64,
    /// Averaging factor ahead of the extractor (1 = no decimation)
    #[serde(default = "default_decimation")]
    pub decimation: usize,
    /// Window samples before the trigger, after decimation
    #[serde(default = "default_pre_trigger")]
    pub pre_trigger: u64,
    /// Window samples from the trigger onwards, after decimation
    #[serde(default = "default_post_trigger")]
    pub post_trigger: u64,
    /// Extra extractor history (at least one window is always kept)
    #[serde(default)]
    pub history: usize,
    /// Samples retained by the post-mortem buffer
    #[serde(default = "default_post_mortem_capacity")]
    pub post_mortem_capacity: usize,
    #[serde(default = "default_signal_name")]
    pub signal_name: String,
    #[serde(default = "default_unit")]
    pub unit: String,
    /// Extracted windows buffered for a slow consumer
    #[serde(default = "default_window_queue")]
    pub window_queue: usize,
    /// Emit an error channel alongside the values
    #[serde(default)]
    pub with_errors: bool,
    /// Pace chunks at the sample rate instead of running flat out
    #[serde(default = "default_realtime")]
    pub realtime: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            sample_rate: default_sample_rate(),
            chunk_size: default_chunk_size(),
            signal_frequency: default_signal_frequency(),
            amplitude: default_amplitude(),
            noise_amplitude: default_noise_amplitude(),
            trigger_period: default_trigger_period(),
            decimation: default_decimation(),
            pre_trigger: default_pre_trigger(),
            post_trigger: default_post_trigger(),
            history: 0,
            post_mortem_capacity: default_post_mortem_capacity(),
            signal_name: default_signal_name(),
            unit: default_unit(),
            window_queue: default_window_queue(),
            with_errors: false,
            realtime: default_realtime(),
        }
    }
}

impl PipelineConfig {
    /// Check the configuration for values no stage can run with
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(self.sample_rate.is_finite() && self.sample_rate > 0.0) {
            return Err(ConfigError::Invalid {
                field: "sample_rate",
                reason: format!("must be a positive number, got {}", self.sample_rate),
            });
        }
        if self.chunk_size == 0 {
            return Err(ConfigError::ZeroBatch);
        }
        if self.post_mortem_capacity == 0 {
            return Err(ConfigError::ZeroCapacity);
        }
        if self.window_queue == 0 {
            return Err(ConfigError::Invalid {
                field: "window_queue",
                reason: "must be at least 1".to_string(),
            });
        }
        for (field, value) in [
            ("chunk_size", self.chunk_size),
            ("history", self.history),
            ("post_mortem_capacity", self.post_mortem_capacity),
        ] {
            if value > MAX_BUFFER_ITEMS {
                return Err(ConfigError::Invalid {
                    field,
                    reason: format!("{} exceeds the limit of {} samples", value, MAX_BUFFER_ITEMS),
                });
            }
        }
        self.window_spec()?;
        Ok(())
    }

    pub fn window_spec(&self) -> Result<WindowSpec, ConfigError> {
        WindowSpec::new(self.pre_trigger, self.post_trigger)
    }

    /// Effective decimation factor (0 behaves like 1)
    pub fn effective_decimation(&self) -> usize {
        self.decimation.max(1)
    }

    /// Wall-clock duration of one chunk at the configured sample rate
    pub fn chunk_duration(&self) -> Duration {
        Duration::from_secs_f64(self.chunk_size as f64 / self.sample_rate)
    }
}
