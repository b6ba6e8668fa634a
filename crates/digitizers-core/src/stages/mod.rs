//! Streaming stages

pub mod extractor;
pub mod post_mortem;
pub mod retimer;
pub mod source;

pub use extractor::{
    DropReason, DroppedTrigger, ExtractedWindow, ExtractorState, ExtractorStats, TriggerExtractor,
    WindowSpec,
};
pub use post_mortem::{MeasurementInfo, PostMortemData, PostMortemSink, SignalMetadata};
pub use retimer::{ReTimerStats, TagReTimer};
pub use source::{SimulatedDigitizer, SIMULATED_TRIGGER_NAME};
