//! Pipeline statistics

pub mod store;

pub use store::{DropEvent, RunningStats, StatsStore, WindowSummary};
