//! Core data models for the segmentation pipeline.
//!
//! A [`Document`] owns an ordered list of [`Segment`]s that cover its raw
//! text exactly. Each segment carries its own [`SegmentState`]; the result
//! text only exists in [`SegmentState::Done`] and the error only in
//! [`SegmentState::Error`].

use std::fmt;

use serde::Serialize;

use crate::fingerprint::fingerprint;
use crate::segment::{segment, SegmenterConfig};

/// Classification of a segment-level failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// The segment exceeds the service's input ceiling. Never retried.
    OversizedInput,
    /// The service asked us to slow down.
    RateLimited,
    /// The call exceeded its deadline.
    Timeout,
    /// Malformed or empty response, server failure, or transport error.
    ServiceError,
    /// The service rejected the request.
    InvalidInput,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::OversizedInput => "oversized_input",
            ErrorKind::RateLimited => "rate_limited",
            ErrorKind::Timeout => "timeout",
            ErrorKind::ServiceError => "service_error",
            ErrorKind::InvalidInput => "invalid_input",
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error details recorded on a failed segment or summary group.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    pub kind: ErrorKind,
    pub message: String,
}

impl ErrorInfo {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

impl fmt::Display for ErrorInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.kind, self.message)
    }
}

/// Lifecycle state shared by segments and summary groups.
///
/// ```text
/// Pending ──▶ Processing ──▶ Done
///                 ▲   └────▶ Error
///                 └── retry / regenerate
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum SegmentState {
    Pending,
    Processing,
    Done { result_text: String },
    Error { error: ErrorInfo },
}

impl SegmentState {
    /// Short lowercase label (`pending`, `processing`, `done`, `error`).
    pub fn label(&self) -> &'static str {
        match self {
            SegmentState::Pending => "pending",
            SegmentState::Processing => "processing",
            SegmentState::Done { .. } => "done",
            SegmentState::Error { .. } => "error",
        }
    }

    pub fn result_text(&self) -> Option<&str> {
        match self {
            SegmentState::Done { result_text } => Some(result_text),
            _ => None,
        }
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        match self {
            SegmentState::Error { error } => Some(error),
            _ => None,
        }
    }

    pub fn is_done(&self) -> bool {
        matches!(self, SegmentState::Done { .. })
    }
}

/// An addressable slice `[start, end)` of a document.
#[derive(Debug, Clone, Serialize)]
pub struct Segment {
    /// Position in the document; defines reassembly order.
    pub index: usize,
    /// Byte offset of the first byte in the document's raw text.
    pub start: usize,
    /// Byte offset one past the last byte. Equals the next segment's `start`.
    pub end: usize,
    pub source_text: String,
    /// Cache key: hash of `source_text` and the active instructions.
    pub fingerprint: String,
    pub state: SegmentState,
    pub retry_count: u32,
    /// Skip the cache lookup on the next pass (set by regenerate).
    pub force_refresh: bool,
}

impl Segment {
    pub fn new(
        index: usize,
        start: usize,
        end: usize,
        source_text: impl Into<String>,
        instructions: &str,
    ) -> Self {
        let source_text = source_text.into();
        let fingerprint = fingerprint(&source_text, instructions);
        Self {
            index,
            start,
            end,
            source_text,
            fingerprint,
            state: SegmentState::Pending,
            retry_count: 0,
            force_refresh: false,
        }
    }

    pub fn result_text(&self) -> Option<&str> {
        self.state.result_text()
    }

    pub fn error_info(&self) -> Option<&ErrorInfo> {
        self.state.error_info()
    }

    pub fn is_done(&self) -> bool {
        self.state.is_done()
    }

    pub fn word_count(&self) -> usize {
        self.source_text.split_whitespace().count()
    }

    /// Prepare an explicit regenerate: back to `Pending`, retry budget
    /// restored, next pass bypasses the cache.
    pub fn reset_for_regenerate(&mut self) {
        self.state = SegmentState::Pending;
        self.retry_count = 0;
        self.force_refresh = true;
    }

    /// Prepare a user retry of a failed segment. The cache is consulted as usual.
    pub fn reset_for_retry(&mut self) {
        self.state = SegmentState::Pending;
        self.retry_count = 0;
    }
}

/// Per-state tallies for a document.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct StateCounts {
    pub pending: usize,
    pub processing: usize,
    pub done: usize,
    pub error: usize,
}

/// The unit of work: one chapter split into segments.
#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: String,
    pub raw_text: String,
    pub instructions: String,
    pub segments: Vec<Segment>,
}

impl Document {
    /// Segment `raw_text` and build a document whose segments are all `Pending`.
    pub fn new(
        id: impl Into<String>,
        raw_text: impl Into<String>,
        instructions: impl Into<String>,
        config: &SegmenterConfig,
    ) -> Self {
        let raw_text = raw_text.into();
        let instructions = instructions.into();
        let segments = segment(&raw_text, config)
            .into_iter()
            .enumerate()
            .map(|(index, bounds)| {
                Segment::new(
                    index,
                    bounds.start,
                    bounds.end,
                    &raw_text[bounds.start..bounds.end],
                    &instructions,
                )
            })
            .collect();

        Self {
            id: id.into(),
            raw_text,
            instructions,
            segments,
        }
    }

    pub fn counts(&self) -> StateCounts {
        let mut counts = StateCounts::default();
        for seg in &self.segments {
            match seg.state {
                SegmentState::Pending => counts.pending += 1,
                SegmentState::Processing => counts.processing += 1,
                SegmentState::Done { .. } => counts.done += 1,
                SegmentState::Error { .. } => counts.error += 1,
            }
        }
        counts
    }

    /// True when every segment is `Done`.
    pub fn is_complete(&self) -> bool {
        self.segments.iter().all(Segment::is_done)
    }

    pub fn segment(&self, index: usize) -> Option<&Segment> {
        self.segments.get(index)
    }

    pub fn segment_mut(&mut self, index: usize) -> Option<&mut Segment> {
        self.segments.get_mut(index)
    }

    /// Drop every transformed result and go back to the original text.
    pub fn restore_original(&mut self) {
        for seg in &mut self.segments {
            seg.state = SegmentState::Pending;
            seg.retry_count = 0;
            seg.force_refresh = false;
        }
    }
}
