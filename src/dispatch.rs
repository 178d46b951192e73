//! Segment dispatcher.
//!
//! Drives segments (and summary groups) through the [`TransformClient`]
//! under a bounded number of concurrent calls, keeping each unit's state
//! machine current:
//!
//! ```text
//! Pending ──lookup hit──────────────────────────▶ Done
//!    │
//!    └─miss─▶ Processing ──slot──▶ call ──ok───▶ Done (stored in cache)
//!                 ▲                  │
//!                 └── backoff ◀── retryable ──▶ Error (budget spent)
//! ```
//!
//! Cache hits never take a concurrency slot. Cancellation at any await
//! point puts the unit back in `Pending`. Failures are local to their
//! unit: siblings keep running and the document still renders in full.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Result};
use rand::Rng;
use tokio::sync::Semaphore;

use chapterloom_core::cache::SegmentCache;
use chapterloom_core::group::SummaryGroup;
use chapterloom_core::models::{Document, ErrorInfo, ErrorKind, Segment, SegmentState};
use chapterloom_core::transform::{TransformClient, TransformError, TransformRequest};

use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::progress::{NoProgress, PipelineEvent, ProgressReporter, Resolution, Unit};

/// Immutable dispatcher settings.
#[derive(Debug, Clone)]
pub struct DispatchSettings {
    pub concurrency: usize,
    pub max_retries: u32,
    pub timeout: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
    pub max_output_size: usize,
    /// Inputs longer than this many characters fail with `OversizedInput`.
    pub max_input_chars: usize,
}

impl Default for DispatchSettings {
    fn default() -> Self {
        Self::from_config(&Config::minimal())
    }
}

impl DispatchSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            concurrency: config.dispatch.concurrency.max(1),
            max_retries: config.dispatch.max_retries,
            timeout: config.dispatch.timeout(),
            backoff_base: Duration::from_millis(config.dispatch.backoff_base_ms),
            backoff_max: Duration::from_millis(config.dispatch.backoff_max_ms),
            max_output_size: config.transform.max_output_size,
            max_input_chars: config.transform.max_input_chars,
        }
    }

    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`,
    /// capped at `backoff_max`, plus up to 10% jitter. A server-provided
    /// `retry_after` wins when it is longer.
    pub fn backoff(&self, attempt: u32, retry_after: Option<Duration>) -> Duration {
        let exp = attempt.saturating_sub(1).min(16);
        let delay = self
            .backoff_base
            .saturating_mul(1u32 << exp)
            .min(self.backoff_max);
        let jitter_ms = (delay.as_millis() as u64) / 10;
        let jitter = if jitter_ms > 0 {
            Duration::from_millis(rand::thread_rng().gen_range(0..=jitter_ms))
        } else {
            Duration::ZERO
        };
        let delay = delay + jitter;
        match retry_after {
            Some(server) if server > delay => server,
            _ => delay,
        }
    }
}

/// How one `process` call ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessOutcome {
    /// `Done` from the cache, no service call.
    CacheHit,
    /// `Done` from a fresh service call.
    Transformed,
    /// `Done` with the source text, because there was nothing to transform.
    Passthrough,
    /// `Error`.
    Failed,
    /// Back to `Pending`.
    Cancelled,
}

/// Outcome tallies for a batch run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunSummary {
    pub cached: usize,
    pub transformed: usize,
    pub passthrough: usize,
    pub failed: usize,
    pub cancelled: usize,
}

impl RunSummary {
    pub fn record(&mut self, outcome: ProcessOutcome) {
        match outcome {
            ProcessOutcome::CacheHit => self.cached += 1,
            ProcessOutcome::Transformed => self.transformed += 1,
            ProcessOutcome::Passthrough => self.passthrough += 1,
            ProcessOutcome::Failed => self.failed += 1,
            ProcessOutcome::Cancelled => self.cancelled += 1,
        }
    }

    pub fn total(&self) -> usize {
        self.cached + self.transformed + self.passthrough + self.failed + self.cancelled
    }
}

impl FromIterator<ProcessOutcome> for RunSummary {
    fn from_iter<I: IntoIterator<Item = ProcessOutcome>>(iter: I) -> Self {
        let mut summary = RunSummary::default();
        for outcome in iter {
            summary.record(outcome);
        }
        summary
    }
}

/// Anything the dispatcher can drive through the state machine.
pub(crate) trait Transformable: Send {
    const UNIT: Unit;

    fn position(&self) -> usize;
    fn input(&self) -> &str;
    fn fingerprint(&self) -> &str;
    fn set_state(&mut self, state: SegmentState);
    fn retry_count(&self) -> u32;
    fn bump_retry(&mut self);
    fn force_refresh(&self) -> bool;
    fn clear_force_refresh(&mut self);

    /// Final text to store for a service result.
    fn finish(&self, result: String) -> String {
        result
    }
}

impl Transformable for Segment {
    const UNIT: Unit = Unit::Segment;

    fn position(&self) -> usize {
        self.index
    }
    fn input(&self) -> &str {
        &self.source_text
    }
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
    fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }
    fn retry_count(&self) -> u32 {
        self.retry_count
    }
    fn bump_retry(&mut self) {
        self.retry_count += 1;
    }
    fn force_refresh(&self) -> bool {
        self.force_refresh
    }
    fn clear_force_refresh(&mut self) {
        self.force_refresh = false;
    }

    fn finish(&self, result: String) -> String {
        reattach_trailing_whitespace(&self.source_text, result)
    }
}

impl Transformable for SummaryGroup {
    const UNIT: Unit = Unit::Summary;

    fn position(&self) -> usize {
        self.group_index
    }
    fn input(&self) -> &str {
        &self.input_text
    }
    fn fingerprint(&self) -> &str {
        &self.fingerprint
    }
    fn set_state(&mut self, state: SegmentState) {
        self.state = state;
    }
    fn retry_count(&self) -> u32 {
        self.retry_count
    }
    fn bump_retry(&mut self) {
        self.retry_count += 1;
    }
    fn force_refresh(&self) -> bool {
        self.force_refresh
    }
    fn clear_force_refresh(&mut self) {
        self.force_refresh = false;
    }
}

/// Replace the result's trailing whitespace with the source's, so
/// reassembled segments keep their paragraph breaks.
pub fn reattach_trailing_whitespace(source: &str, result: String) -> String {
    let tail = &source[source.trim_end().len()..];
    let body = result.trim_end();
    if body.len() == result.len() && tail.is_empty() {
        return result;
    }
    let mut out = String::with_capacity(body.len() + tail.len());
    out.push_str(body);
    out.push_str(tail);
    out
}

/// Settled-unit counter for progress events within one batch.
pub(crate) struct Tally {
    finished: AtomicU64,
    total: u64,
}

impl Tally {
    pub(crate) fn new(total: usize) -> Self {
        Self {
            finished: AtomicU64::new(0),
            total: total as u64,
        }
    }

    fn settle(&self) -> (u64, u64) {
        (self.finished.fetch_add(1, Ordering::Relaxed) + 1, self.total)
    }
}

enum Attempt {
    Ok(String),
    Err(TransformError),
    Cancelled,
}

/// Retries spent in one pass, counted per error kind so each kind draws
/// on its own budget.
#[derive(Debug, Default)]
struct RetryLedger {
    spent: Vec<(ErrorKind, u32)>,
}

impl RetryLedger {
    fn spent(&self, kind: ErrorKind) -> u32 {
        self.spent
            .iter()
            .find(|(k, _)| *k == kind)
            .map_or(0, |&(_, n)| n)
    }

    /// Record a retry for `err` if its kind still has budget left.
    fn try_spend(&mut self, err: &TransformError, max_retries: u32) -> bool {
        let kind = err.kind();
        if self.spent(kind) >= err.retry_budget(max_retries) {
            return false;
        }
        match self.spent.iter_mut().find(|(k, _)| *k == kind) {
            Some((_, n)) => *n += 1,
            None => self.spent.push((kind, 1)),
        }
        true
    }
}

/// Bounded-concurrency driver shared by every unit of a run.
pub struct Dispatcher {
    client: Arc<dyn TransformClient>,
    cache: SegmentCache,
    settings: DispatchSettings,
    slots: Arc<Semaphore>,
    reporter: Arc<dyn ProgressReporter>,
}

impl Dispatcher {
    pub fn new(
        client: Arc<dyn TransformClient>,
        cache: SegmentCache,
        settings: DispatchSettings,
    ) -> Self {
        let slots = Arc::new(Semaphore::new(settings.concurrency.max(1)));
        Self {
            client,
            cache,
            settings,
            slots,
            reporter: Arc::new(NoProgress),
        }
    }

    pub fn with_reporter(mut self, reporter: Arc<dyn ProgressReporter>) -> Self {
        self.reporter = reporter;
        self
    }

    pub fn cache(&self) -> &SegmentCache {
        &self.cache
    }

    pub fn settings(&self) -> &DispatchSettings {
        &self.settings
    }

    pub(crate) fn reporter(&self) -> &dyn ProgressReporter {
        self.reporter.as_ref()
    }

    /// Drive one segment to `Done`, `Error`, or (on cancel) `Pending`.
    pub async fn process(
        &self,
        segment: &mut Segment,
        instructions: &str,
        cancel: &CancellationToken,
    ) -> ProcessOutcome {
        self.drive(segment, instructions, cancel, &Tally::new(1)).await
    }

    /// Process every segment not yet `Done`, concurrently under the slot bound.
    pub async fn process_all(&self, doc: &mut Document, cancel: &CancellationToken) -> RunSummary {
        let instructions = doc.instructions.as_str();
        let pending: Vec<&mut Segment> = doc.segments.iter_mut().filter(|s| !s.is_done()).collect();
        let tally = Tally::new(pending.len());

        self.reporter.report(PipelineEvent::Started {
            unit: Unit::Segment,
            total: pending.len() as u64,
        });
        tracing::info!(document = %doc.id, segments = pending.len(), client = self.client.name(), "dispatching");

        let runs = pending
            .into_iter()
            .map(|seg| self.drive(seg, instructions, cancel, &tally));
        let summary: RunSummary = futures::future::join_all(runs).await.into_iter().collect();

        tracing::info!(
            document = %doc.id,
            cached = summary.cached,
            transformed = summary.transformed,
            failed = summary.failed,
            cancelled = summary.cancelled,
            "dispatch finished"
        );
        summary
    }

    /// Discard segment `index`'s result and transform it again.
    ///
    /// The cached value is invalidated first, and the segment bypasses the
    /// cache on this pass, so the old result can never come back.
    pub async fn regenerate(
        &self,
        doc: &mut Document,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        self.mark_for_regenerate(doc, index).await?;
        let instructions = doc.instructions.as_str();
        let segment = &mut doc.segments[index];
        Ok(self.process(segment, instructions, cancel).await)
    }

    /// Invalidate segment `index`'s cached result and flag it to bypass the
    /// cache, without transforming it yet. The next `process_all` makes the
    /// single forced pass.
    pub async fn mark_for_regenerate(&self, doc: &mut Document, index: usize) -> Result<()> {
        let Some(segment) = doc.segments.get_mut(index) else {
            bail!("No segment with index {}", index);
        };
        if let Err(e) = self.cache.invalidate(&segment.fingerprint).await {
            tracing::warn!(segment = index, error = %e, "cache invalidate failed");
        }
        segment.reset_for_regenerate();
        Ok(())
    }

    /// Retry a failed segment with a fresh retry budget.
    pub async fn retry(
        &self,
        doc: &mut Document,
        index: usize,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutcome> {
        let instructions = doc.instructions.as_str();
        let Some(segment) = doc.segments.get_mut(index) else {
            bail!("No segment with index {}", index);
        };
        if !matches!(segment.state, SegmentState::Error { .. }) {
            bail!(
                "Segment {} is {}, only failed segments can be retried",
                index,
                segment.state.label()
            );
        }
        segment.reset_for_retry();
        Ok(self.process(segment, instructions, cancel).await)
    }

    pub(crate) async fn drive<T: Transformable>(
        &self,
        unit: &mut T,
        instructions: &str,
        cancel: &CancellationToken,
        tally: &Tally,
    ) -> ProcessOutcome {
        let index = unit.position();

        if cancel.is_cancelled() {
            return self.cancelled(unit);
        }

        if unit.input().split_whitespace().next().is_none() {
            let text = unit.input().to_string();
            return self.done(unit, text, Resolution::Passthrough, tally);
        }

        if !unit.force_refresh() {
            if let Some(hit) = self.cache.lookup(unit.fingerprint()).await {
                tracing::debug!(unit = T::UNIT.as_str(), index, "cache hit");
                return self.done(unit, hit, Resolution::Cached, tally);
            }
        }

        let chars = unit.input().chars().count();
        if chars > self.settings.max_input_chars {
            let info = ErrorInfo::new(
                ErrorKind::OversizedInput,
                format!(
                    "{} characters exceeds the {} character limit; lower segmenting.chunk_size",
                    chars, self.settings.max_input_chars
                ),
            );
            return self.failed(unit, info, tally);
        }

        unit.set_state(SegmentState::Processing);
        self.reporter.report(PipelineEvent::Processing {
            unit: T::UNIT,
            index,
        });

        let _permit = tokio::select! {
            permit = self.slots.acquire() => match permit {
                Ok(permit) => permit,
                Err(e) => {
                    let info = ErrorInfo::new(ErrorKind::ServiceError, e.to_string());
                    return self.failed(unit, info, tally);
                }
            },
            _ = cancel.cancelled() => return self.cancelled(unit),
        };

        let request = TransformRequest {
            text: unit.input().to_string(),
            instructions: instructions.to_string(),
            max_output_size: self.settings.max_output_size,
        };

        let mut ledger = RetryLedger::default();
        loop {
            let err = match self.attempt(&request, cancel).await {
                Attempt::Ok(text) => {
                    let text = unit.finish(text);
                    if let Err(e) = self.cache.store(unit.fingerprint(), &text).await {
                        tracing::warn!(unit = T::UNIT.as_str(), index, error = %e, "cache store failed");
                    }
                    unit.clear_force_refresh();
                    return self.done(unit, text, Resolution::Transformed, tally);
                }
                Attempt::Cancelled => return self.cancelled(unit),
                Attempt::Err(err) => err,
            };

            if !ledger.try_spend(&err, self.settings.max_retries) {
                tracing::warn!(unit = T::UNIT.as_str(), index, error = %err, "giving up");
                return self.failed(unit, ErrorInfo::from(&err), tally);
            }

            unit.bump_retry();
            let delay = self.settings.backoff(unit.retry_count(), err.retry_after());
            tracing::debug!(
                unit = T::UNIT.as_str(),
                index,
                attempt = unit.retry_count(),
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "retrying"
            );
            self.reporter.report(PipelineEvent::Retrying {
                unit: T::UNIT,
                index,
                attempt: unit.retry_count(),
                delay_ms: delay.as_millis() as u64,
                kind: err.kind(),
            });

            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return self.cancelled(unit),
            }
        }
    }

    async fn attempt(&self, request: &TransformRequest, cancel: &CancellationToken) -> Attempt {
        let call = tokio::time::timeout(self.settings.timeout, self.client.transform(request));
        tokio::select! {
            result = call => match result {
                Ok(Ok(response)) => Attempt::Ok(response.text),
                Ok(Err(err)) => Attempt::Err(err),
                Err(_) => Attempt::Err(TransformError::Timeout(self.settings.timeout)),
            },
            _ = cancel.cancelled() => Attempt::Cancelled,
        }
    }

    fn done<T: Transformable>(
        &self,
        unit: &mut T,
        text: String,
        resolution: Resolution,
        tally: &Tally,
    ) -> ProcessOutcome {
        unit.set_state(SegmentState::Done { result_text: text });
        let (finished, total) = tally.settle();
        self.reporter.report(PipelineEvent::Done {
            unit: T::UNIT,
            index: unit.position(),
            resolution,
            finished,
            total,
        });
        match resolution {
            Resolution::Cached => ProcessOutcome::CacheHit,
            Resolution::Transformed => ProcessOutcome::Transformed,
            Resolution::Passthrough => ProcessOutcome::Passthrough,
        }
    }

    fn failed<T: Transformable>(&self, unit: &mut T, error: ErrorInfo, tally: &Tally) -> ProcessOutcome {
        let kind = error.kind;
        unit.set_state(SegmentState::Error { error });
        let (finished, total) = tally.settle();
        self.reporter.report(PipelineEvent::Failed {
            unit: T::UNIT,
            index: unit.position(),
            kind,
            finished,
            total,
        });
        ProcessOutcome::Failed
    }

    fn cancelled<T: Transformable>(&self, unit: &mut T) -> ProcessOutcome {
        unit.set_state(SegmentState::Pending);
        self.reporter.report(PipelineEvent::Cancelled {
            unit: T::UNIT,
            index: unit.position(),
        });
        ProcessOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(base_ms: u64, max_ms: u64) -> DispatchSettings {
        DispatchSettings {
            backoff_base: Duration::from_millis(base_ms),
            backoff_max: Duration::from_millis(max_ms),
            ..DispatchSettings::default()
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let s = settings(1000, 4000);
        let within = |d: Duration, lo: u64| {
            let ms = d.as_millis() as u64;
            ms >= lo && ms <= lo + lo / 10
        };
        assert!(within(s.backoff(1, None), 1000));
        assert!(within(s.backoff(2, None), 2000));
        assert!(within(s.backoff(3, None), 4000));
        assert!(within(s.backoff(9, None), 4000));
    }

    #[test]
    fn test_backoff_honours_longer_retry_after() {
        let s = settings(10, 100);
        assert_eq!(s.backoff(1, Some(Duration::from_secs(5))), Duration::from_secs(5));
        assert!(s.backoff(1, Some(Duration::from_millis(1))) >= Duration::from_millis(10));
    }

    #[test]
    fn test_retry_ledger_budgets_each_kind_separately() {
        let mut ledger = RetryLedger::default();
        let limited = TransformError::rate_limited("429");
        let service = TransformError::ServiceError("502".into());

        assert!(ledger.try_spend(&limited, 2));
        assert!(ledger.try_spend(&service, 2));
        assert!(!ledger.try_spend(&service, 2));
        assert!(ledger.try_spend(&limited, 2));
        assert!(!ledger.try_spend(&limited, 2));
        assert!(!ledger.try_spend(&TransformError::InvalidInput("bad".into()), 2));
        assert_eq!(ledger.spent(ErrorKind::RateLimited), 2);
    }

    #[test]
    fn test_reattach_trailing_whitespace() {
        assert_eq!(
            reattach_trailing_whitespace("One.\n\n", "Uno.".to_string()),
            "Uno.\n\n"
        );
        assert_eq!(
            reattach_trailing_whitespace("One.", "Uno.  \n".to_string()),
            "Uno."
        );
        assert_eq!(reattach_trailing_whitespace("One.", "Uno.".to_string()), "Uno.");
    }

    #[test]
    fn test_run_summary_from_outcomes() {
        let summary: RunSummary = [
            ProcessOutcome::CacheHit,
            ProcessOutcome::Failed,
            ProcessOutcome::Transformed,
            ProcessOutcome::Transformed,
        ]
        .into_iter()
        .collect();
        assert_eq!(summary.transformed, 2);
        assert_eq!(summary.total(), 4);
    }
}
