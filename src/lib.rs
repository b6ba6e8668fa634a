//! Digitizers - Trigger-synchronized windowing for digitizer streams
//!
//! This library re-exports the streaming stages, pipeline and statistics
//! from `digitizers-core` and holds the application configuration used by
//! the `digitizers` binary.

pub mod config;

pub use digitizers_core::{pipeline, runtime, stages, stats, tags};

pub use digitizers_core::{
    AcqInfo, ConfigError, ExtractedWindow, Pipeline, PipelineConfig, PipelineError,
    PipelineHandle, PostMortemData, PostMortemSink, SidebandTag, SimulatedDigitizer, Stage,
    StageRunner, StatsStore, StreamChunk, TagKind, TagReTimer, TriggerExtractor, TriggerPayload,
    WindowSpec, WorkInput, WorkOutput, WorkReturn, WorkStatus,
};
pub use digitizers_core::{BUILD_DATE, DEFAULT_SAMPLE_RATE, VERSION};

pub use config::AppConfig;
