//! Sideband tags
//!
//! A tag is a metadata event attached to one absolute sample offset. The
//! payload travels as a loosely typed JSON value so that stages can forward
//! tags they do not understand and so that a malformed payload is detected
//! when (and only when) a stage tries to decode it.

use crate::error::TagError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

/// Channel status bits carried in [`AcqInfo::status`]
pub mod status {
    /// Overvoltage has occurred on the channel
    pub const OVERFLOW: u32 = 0x01;
    /// Not enough pre- or post-trigger samples to apply realignment or user delay
    pub const REALIGNMENT_ERROR: u32 = 0x02;
    /// Buffer too small to extract all samples
    pub const NOT_ALL_DATA_EXTRACTED: u32 = 0x04;
}

/// Tag key used for trigger events
pub const TRIGGER_TAG_NAME: &str = "trigger";

/// Tag key used for acquisition info events
pub const ACQ_INFO_TAG_NAME: &str = "acq_info";

/// Kind of a sideband tag
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TagKind {
    /// Trigger event
    Trigger,
    /// Acquisition info (timebase, status, timestamp)
    AcqInfo,
    /// Any other tag, identified by its key
    Other(String),
}

impl TagKind {
    /// Key under which the tag is known on the wire
    pub fn key(&self) -> &str {
        match self {
            TagKind::Trigger => TRIGGER_TAG_NAME,
            TagKind::AcqInfo => ACQ_INFO_TAG_NAME,
            TagKind::Other(key) => key,
        }
    }
}

/// A metadata event attached to an absolute sample offset
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SidebandTag {
    /// Absolute sample offset the tag is attached to
    pub offset: u64,
    /// Tag kind
    pub kind: TagKind,
    /// Undecoded payload
    pub payload: Value,
}

impl SidebandTag {
    /// Create a tag with an arbitrary payload
    pub fn new(offset: u64, kind: TagKind, payload: Value) -> Self {
        Self {
            offset,
            kind,
            payload,
        }
    }

    /// Create a trigger tag
    pub fn trigger(offset: u64, trigger: &TriggerPayload) -> Self {
        Self::new(offset, TagKind::Trigger, trigger.to_value())
    }

    /// Create an acquisition info tag
    pub fn acq_info(offset: u64, info: &AcqInfo) -> Self {
        Self::new(offset, TagKind::AcqInfo, info.to_value())
    }

    /// Create a tag of a kind no stage interprets
    pub fn other(offset: u64, key: impl Into<String>, payload: Value) -> Self {
        Self::new(offset, TagKind::Other(key.into()), payload)
    }

    /// Same tag moved to another offset
    pub fn with_offset(mut self, offset: u64) -> Self {
        self.offset = offset;
        self
    }

    /// Whether this is a trigger tag
    pub fn is_trigger(&self) -> bool {
        self.kind == TagKind::Trigger
    }

    /// Whether this is an acquisition info tag
    pub fn is_acq_info(&self) -> bool {
        self.kind == TagKind::AcqInfo
    }

    /// Decode the trigger payload
    pub fn decode_trigger(&self) -> Result<TriggerPayload, TagError> {
        self.expect_kind(TagKind::Trigger)?;
        Ok(TriggerPayload::deserialize(&self.payload)?)
    }

    /// Decode the acquisition info payload
    pub fn decode_acq_info(&self) -> Result<AcqInfo, TagError> {
        self.expect_kind(TagKind::AcqInfo)?;
        Ok(AcqInfo::deserialize(&self.payload)?)
    }

    fn expect_kind(&self, expected: TagKind) -> Result<(), TagError> {
        if self.kind == expected {
            Ok(())
        } else {
            Err(TagError::WrongKind {
                expected,
                found: self.kind.clone(),
            })
        }
    }
}

/// Trigger event payload
///
/// Immutable once created: stages re-anchor the tag carrying it but never
/// modify the payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TriggerPayload {
    /// Event identifier (e.g. timing event name)
    pub name: String,
    /// Trigger timestamp (UTC nanoseconds)
    pub timestamp_ns: i64,
    /// Sub-sample offset of the trigger relative to the tagged sample (nanoseconds)
    pub offset_ns: f64,
}

impl TriggerPayload {
    /// Create a trigger payload
    pub fn new(name: impl Into<String>, timestamp_ns: i64, offset_ns: f64) -> Self {
        Self {
            name: name.into(),
            timestamp_ns,
            offset_ns,
        }
    }

    fn to_value(&self) -> Value {
        json!({
            "name": self.name,
            "timestamp_ns": self.timestamp_ns,
            "offset_ns": self.offset_ns,
        })
    }
}

/// Acquisition info payload
///
/// ```text
/// user_delay          |--->
/// realignment delay   |--------->
/// actual_delay        |------------>
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AcqInfo {
    /// Timestamp of the tagged sample (UTC nanoseconds), -1 when unknown
    pub timestamp: i64,
    /// Distance between samples in seconds
    pub timebase: f64,
    /// Delay requested by the user (may be negative)
    pub user_delay: f64,
    /// User delay plus realignment delay
    pub actual_delay: f64,
    /// Channel status bitmask, see [`status`]
    pub status: u32,
}

impl Default for AcqInfo {
    fn default() -> Self {
        Self {
            timestamp: -1,
            timebase: 0.0,
            user_delay: 0.0,
            actual_delay: 0.0,
            status: 0,
        }
    }
}

impl AcqInfo {
    /// Merge another acquisition info into this one
    ///
    /// Status bits are OR-ed, all other fields are kept from `self`.
    pub fn merge(self, other: &AcqInfo) -> Self {
        Self {
            status: self.status | other.status,
            ..self
        }
    }

    /// Whether the timestamp is valid
    pub fn has_timestamp(&self) -> bool {
        self.timestamp >= 0
    }

    fn to_value(&self) -> Value {
        json!({
            "timestamp": self.timestamp,
            "timebase": self.timebase,
            "user_delay": self.user_delay,
            "actual_delay": self.actual_delay,
            "status": self.status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_trigger_tag_decodes() {
        let payload = TriggerPayload::new("CMD_BEAM_INJECTION", 1_700_000_000_000, 12.5);
        let tag = SidebandTag::trigger(500, &payload);

        assert!(tag.is_trigger());
        assert_eq!(tag.offset, 500);
        assert_eq!(tag.decode_trigger().unwrap(), payload);
    }

    #[test]
    fn test_acq_info_tag_decodes() {
        let info = AcqInfo {
            timestamp: 42,
            timebase: 1e-6,
            user_delay: 0.5,
            actual_delay: 0.75,
            status: status::OVERFLOW,
        };
        let tag = SidebandTag::acq_info(7, &info);

        assert!(tag.is_acq_info());
        assert_eq!(tag.decode_acq_info().unwrap(), info);
    }

    #[test]
    fn test_wrong_kind_rejected() {
        let tag = SidebandTag::acq_info(0, &AcqInfo::default());
        let err = tag.decode_trigger().unwrap_err();
        assert!(matches!(
            err,
            TagError::WrongKind {
                expected: TagKind::Trigger,
                found: TagKind::AcqInfo
            }
        ));
    }

    #[test]
    fn test_malformed_payload_rejected() {
        let tag = SidebandTag::new(3, TagKind::Trigger, json!({"name": 17}));
        assert!(matches!(tag.decode_trigger(), Err(TagError::Malformed(_))));

        let tag = SidebandTag::new(3, TagKind::AcqInfo, json!("not a tuple"));
        assert!(matches!(tag.decode_acq_info(), Err(TagError::Malformed(_))));
    }

    #[test]
    fn test_merge_ors_status_keeps_first() {
        let first = AcqInfo {
            timestamp: 100,
            timebase: 2e-6,
            status: 2,
            ..Default::default()
        };
        let second = AcqInfo {
            timestamp: 999,
            timebase: 5.0,
            status: 1,
            ..Default::default()
        };

        let merged = first.merge(&second);
        assert_eq!(merged.status, 3);
        assert_eq!(merged.timestamp, 100);
        assert_eq!(merged.timebase, 2e-6);
    }

    #[test]
    fn test_with_offset_keeps_payload() {
        let tag = SidebandTag::other(10, "custom", json!({"a": 1}));
        let moved = tag.clone().with_offset(2);
        assert_eq!(moved.offset, 2);
        assert_eq!(moved.payload, tag.payload);
        assert_eq!(moved.kind.key(), "custom");
    }

    #[test]
    fn test_default_acq_info_has_no_timestamp() {
        assert!(!AcqInfo::default().has_timestamp());
    }
}
