//! Grouped summaries over runs of consecutive segments.
//!
//! Summarizing a whole long chapter in one call would exceed the service's
//! input budget and silently drop the tail. Instead, segments are grouped
//! into fixed-size contiguous runs (`[0,1]`, `[2,3]`, `[4]` for five
//! segments and `group_size = 2`) and each run is summarized on its own.
//! Every segment belongs to exactly one group.
//!
//! A [`SummaryGroup`] only exists once all of its segments are `Done`.
//! [`SummaryBoard`] tracks one slot per planned group and rebuilds a group
//! when the text it was built from changes.

use std::ops::Range;

use serde::{Deserialize, Serialize};

use crate::fingerprint::fingerprint;
use crate::models::{Segment, SegmentState};

pub const DEFAULT_GROUP_SIZE: usize = 2;

/// Which text of each segment feeds the summary.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SummaryInput {
    /// The transformed text.
    #[default]
    Result,
    /// The original text.
    Source,
}

/// A summary over one contiguous run of segments.
#[derive(Debug, Clone, Serialize)]
pub struct SummaryGroup {
    pub group_index: usize,
    pub segment_indices: Range<usize>,
    /// Concatenated input text of the covered segments.
    pub input_text: String,
    /// Cache key: hash of `input_text` and the summary instructions.
    pub fingerprint: String,
    pub state: SegmentState,
    pub retry_count: u32,
    pub force_refresh: bool,
}

impl SummaryGroup {
    pub fn summary_text(&self) -> Option<&str> {
        self.state.result_text()
    }

    pub fn reset_for_regenerate(&mut self) {
        self.state = SegmentState::Pending;
        self.retry_count = 0;
        self.force_refresh = true;
    }

    pub fn reset_for_retry(&mut self) {
        self.state = SegmentState::Pending;
        self.retry_count = 0;
    }
}

/// Contiguous index ranges, one per group. A `group_size` of 0 is treated as 1.
pub fn plan_groups(segment_count: usize, group_size: usize) -> Vec<Range<usize>> {
    let size = group_size.max(1);
    (0..segment_count)
        .step_by(size)
        .map(|start| start..(start + size).min(segment_count))
        .collect()
}

/// Concatenated input for `range`, or `None` if any segment there is not `Done`.
pub fn group_input(segments: &[Segment], range: Range<usize>, input: SummaryInput) -> Option<String> {
    let covered = segments.get(range)?;
    let mut text = String::new();
    for seg in covered {
        let result = seg.result_text()?;
        match input {
            SummaryInput::Result => text.push_str(result),
            SummaryInput::Source => text.push_str(&seg.source_text),
        }
    }
    Some(text)
}

/// Build group `group_index` if every segment in its run is `Done`.
///
/// ```rust
/// use chapterloom_core::group::{maybe_build_group, SummaryInput};
/// use chapterloom_core::models::Segment;
///
/// let segments = vec![Segment::new(0, 0, 3, "One", "polish")];
/// assert!(maybe_build_group(&segments, 0, 2, SummaryInput::Result, "summarize").is_none());
/// ```
pub fn maybe_build_group(
    segments: &[Segment],
    group_index: usize,
    group_size: usize,
    input: SummaryInput,
    instructions: &str,
) -> Option<SummaryGroup> {
    let range = plan_groups(segments.len(), group_size)
        .into_iter()
        .nth(group_index)?;
    let input_text = group_input(segments, range.clone(), input)?;
    let fingerprint = fingerprint(&input_text, instructions);
    Some(SummaryGroup {
        group_index,
        segment_indices: range,
        input_text,
        fingerprint,
        state: SegmentState::Pending,
        retry_count: 0,
        force_refresh: false,
    })
}

/// One slot per planned group, filled as groups become ready.
#[derive(Debug, Clone)]
pub struct SummaryBoard {
    group_size: usize,
    input: SummaryInput,
    instructions: String,
    slots: Vec<Option<SummaryGroup>>,
}

impl SummaryBoard {
    pub fn new(
        segment_count: usize,
        group_size: usize,
        input: SummaryInput,
        instructions: impl Into<String>,
    ) -> Self {
        let slots = plan_groups(segment_count, group_size)
            .into_iter()
            .map(|_| None)
            .collect();
        Self {
            group_size,
            input,
            instructions: instructions.into(),
            slots,
        }
    }

    pub fn instructions(&self) -> &str {
        &self.instructions
    }

    /// Number of planned groups.
    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Sync the slots with the current segment states.
    ///
    /// Creates groups whose segments just became `Done`, recreates groups
    /// whose input changed (a segment was regenerated), and drops groups
    /// whose segments are no longer all `Done`. Returns the indices of
    /// groups that were created or recreated.
    pub fn refresh(&mut self, segments: &[Segment]) -> Vec<usize> {
        let mut changed = Vec::new();
        for (group_index, slot) in self.slots.iter_mut().enumerate() {
            let built = maybe_build_group(
                segments,
                group_index,
                self.group_size,
                self.input,
                &self.instructions,
            );
            let existing = slot.as_ref().map(|g| g.fingerprint.clone());
            match (existing, built) {
                (Some(existing), Some(fresh)) if existing == fresh.fingerprint => {}
                (_, Some(fresh)) => {
                    tracing::debug!(group = group_index, "summary group ready");
                    *slot = Some(fresh);
                    changed.push(group_index);
                }
                (Some(_), None) => {
                    tracing::debug!(group = group_index, "summary group invalidated");
                    *slot = None;
                }
                (None, None) => {}
            }
        }
        changed
    }

    pub fn group(&self, group_index: usize) -> Option<&SummaryGroup> {
        self.slots.get(group_index)?.as_ref()
    }

    pub fn group_mut(&mut self, group_index: usize) -> Option<&mut SummaryGroup> {
        self.slots.get_mut(group_index)?.as_mut()
    }

    /// Groups that currently exist, in group order.
    pub fn groups(&self) -> impl Iterator<Item = &SummaryGroup> {
        self.slots.iter().flatten()
    }

    pub fn groups_mut(&mut self) -> impl Iterator<Item = &mut SummaryGroup> {
        self.slots.iter_mut().flatten()
    }
}
