//! Grouped-summary coordinator.
//!
//! Runs the summary pass over a [`SummaryBoard`]: every group whose
//! segments are all `Done` is summarized with one service call, through
//! the same cache, retry, and cancellation rules as segments. Group
//! results are cached under the group's own fingerprint.

use anyhow::{bail, Result};

use chapterloom_core::group::{SummaryBoard, SummaryGroup};
use chapterloom_core::models::{Segment, SegmentState};

use crate::cancel::CancellationToken;
use crate::dispatch::{Dispatcher, ProcessOutcome, RunSummary, Tally};
use crate::progress::{PipelineEvent, Unit};

pub struct GroupCoordinator<'a> {
    dispatcher: &'a Dispatcher,
}

impl<'a> GroupCoordinator<'a> {
    pub fn new(dispatcher: &'a Dispatcher) -> Self {
        Self { dispatcher }
    }

    /// Sync `board` with `segments`, then summarize every ready group
    /// that is not yet `Done`.
    pub async fn run_ready(
        &self,
        board: &mut SummaryBoard,
        segments: &[Segment],
        cancel: &CancellationToken,
    ) -> RunSummary {
        board.refresh(segments);
        let instructions = board.instructions().to_string();

        let ready: Vec<&mut SummaryGroup> = board.groups_mut().filter(|g| !g.state.is_done()).collect();
        let tally = Tally::new(ready.len());
        self.dispatcher.reporter().report(PipelineEvent::Started {
            unit: Unit::Summary,
            total: ready.len() as u64,
        });
        tracing::info!(groups = ready.len(), "summarizing");

        let runs = ready
            .into_iter()
            .map(|group| self.dispatcher.drive(group, &instructions, cancel, &tally));
        futures::future::join_all(runs).await.into_iter().collect()
    }

    /// Discard group `group_index`'s summary and request a fresh one.
    pub async fn regenerate(
        &self,
        board: &mut SummaryBoard,
        group_index: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let instructions = board.instructions().to_string();
        let Some(group) = board.group_mut(group_index) else {
            bail!("Summary group {} is not ready", group_index);
        };
        if let Err(e) = self.dispatcher.cache().invalidate(&group.fingerprint).await {
            tracing::warn!(group = group_index, error = %e, "cache invalidate failed");
        }
        group.reset_for_regenerate();
        Ok(self
            .dispatcher
            .drive(group, &instructions, cancel, &Tally::new(1))
            .await)
    }

    /// Retry a failed group with a fresh retry budget.
    pub async fn retry(
        &self,
        board: &mut SummaryBoard,
        group_index: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let instructions = board.instructions().to_string();
        let Some(group) = board.group_mut(group_index) else {
            bail!("Summary group {} is not ready", group_index);
        };
        if !matches!(group.state, SegmentState::Error { .. }) {
            bail!(
                "Summary group {} is {}, only failed groups can be retried",
                group_index,
                group.state.label()
            );
        }
        group.reset_for_retry();
        Ok(self
            .dispatcher
            .drive(group, &instructions, cancel, &Tally::new(1))
            .await)
    }
}
