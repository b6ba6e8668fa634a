//! Digitizers Core - Streaming stages for digitizer acquisition
//!
//! This library provides tag-synchronized windowing and re-timing for
//! digitizer and oscilloscope sample streams. Samples flow through stages
//! that cut fixed windows around trigger events, average and re-time sideband
//! metadata across decimation, and keep the most recent samples for
//! post-mortem read-out.

pub mod config;
pub mod error;
pub mod pipeline;
pub mod runtime;
pub mod stages;
pub mod stats;
pub mod tags;

pub use config::PipelineConfig;
pub use error::{ConfigError, PipelineError, TagError};
pub use pipeline::{Pipeline, PipelineHandle};
pub use runtime::{Stage, StageRunner, StreamChunk, WorkInput, WorkOutput, WorkReturn, WorkStatus};
pub use stages::{
    ExtractedWindow, PostMortemData, PostMortemSink, SimulatedDigitizer, TagReTimer,
    TriggerExtractor, WindowSpec,
};
pub use stats::store::StatsStore;
pub use tags::{AcqInfo, SidebandTag, TagKind, TriggerPayload};

/// Library version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by the build script
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default simulated sample rate in Hz
pub const DEFAULT_SAMPLE_RATE: f64 = 10_000.0;
