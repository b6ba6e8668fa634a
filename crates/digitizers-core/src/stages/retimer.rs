//! Decimation with tag re-timing
//!
//! Every `decimation` input samples are averaged into one output sample. The
//! sideband tags attached to those input samples are moved onto the output
//! sample: acquisition info tags collapse into a single tag whose status is
//! the OR of all merged statuses, every other tag is forwarded individually.

use crate::runtime::{Stage, WorkInput, WorkOutput, WorkReturn};
use crate::tags::{AcqInfo, SidebandTag, TagKind};
use serde::Serialize;

/// Re-timer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ReTimerStats {
    /// Acquisition info tags folded into another one
    pub acq_infos_merged: u64,
    /// Tags forwarded unmerged
    pub tags_forwarded: u64,
}

/// Averaging decimator that re-times sideband tags
pub struct TagReTimer {
    decimation: usize,
    stats: ReTimerStats,
}

impl TagReTimer {
    /// Create a re-timer averaging `decimation` samples into one
    ///
    /// A decimation of zero behaves like one.
    pub fn new(decimation: usize) -> Self {
        Self {
            decimation: decimation.max(1),
            stats: ReTimerStats::default(),
        }
    }

    pub fn decimation(&self) -> usize {
        self.decimation
    }

    pub fn stats(&self) -> ReTimerStats {
        self.stats
    }

    fn retime_tags(&mut self, input: &WorkInput<'_>, output: &mut WorkOutput<'_>, i: usize) {
        let k = self.decimation as u64;
        let start = input.nitems_read + i as u64 * k;
        let out_offset = output.nitems_written + i as u64;

        let mut merged: Option<AcqInfo> = None;
        let mut forwarded = Vec::new();
        for tag in input.tags_in_range(start, start + k) {
            if tag.kind != TagKind::AcqInfo {
                forwarded.push(tag.clone().with_offset(out_offset));
                continue;
            }
            match tag.decode_acq_info() {
                Ok(info) => {
                    merged = Some(match merged {
                        Some(acc) => {
                            self.stats.acq_infos_merged += 1;
                            acc.merge(&info)
                        }
                        None => AcqInfo {
                            timebase: info.timebase * k as f64,
                            ..info
                        },
                    });
                }
                Err(e) => {
                    tracing::warn!(offset = tag.offset, error = %e, "Forwarding undecodable acq_info tag unmerged");
                    forwarded.push(tag.clone().with_offset(out_offset));
                }
            }
        }

        if let Some(info) = merged {
            output.add_tag(SidebandTag::acq_info(out_offset, &info));
        }
        self.stats.tags_forwarded += forwarded.len() as u64;
        for tag in forwarded {
            output.add_tag(tag);
        }
    }
}

impl Stage for TagReTimer {
    fn name(&self) -> &str {
        "tag_retimer"
    }

    fn min_input_items(&self) -> usize {
        self.decimation
    }

    fn work(&mut self, input: &WorkInput<'_>, output: &mut WorkOutput<'_>) -> WorkReturn {
        let k = self.decimation;
        if input.len() < k {
            return WorkReturn::insufficient_input(0);
        }
        let n = (input.len() / k).min(output.capacity());
        if n == 0 {
            return WorkReturn::insufficient_output(0);
        }

        for (slot, group) in output.values[..n]
            .iter_mut()
            .zip(input.values.chunks_exact(k))
        {
            *slot = group.iter().sum::<f32>() / k as f32;
        }
        if let (Some(errors), Some(out_errors)) = (input.errors, output.errors.as_deref_mut()) {
            for (slot, group) in out_errors[..n].iter_mut().zip(errors.chunks_exact(k)) {
                *slot = group.iter().sum::<f32>() / k as f32;
            }
        }

        for i in 0..n {
            self.retime_tags(input, output, i);
        }

        WorkReturn::ok(n * k, n)
    }
}
