//! Reassembly of a document from its segments.
//!
//! [`render`] is a pure view over the current segment states, always in
//! index order. Finished segments show their transformed text; every other
//! segment shows its original text with a status, so the chapter is fully
//! readable at every point of the pipeline.

use serde::Serialize;

use crate::models::{Document, ErrorInfo, SegmentState};

/// How a rendered segment should be presented.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayState {
    /// Transformed text is shown.
    Enhanced,
    /// Original text, transformation not started.
    Pending,
    /// Original text, transformation in flight.
    Processing,
    /// Original text, transformation failed.
    Failed,
}

/// One segment of the rendered view.
#[derive(Debug, Clone, Serialize)]
pub struct RenderedSegment<'a> {
    pub index: usize,
    pub display: DisplayState,
    pub text: &'a str,
    pub error: Option<&'a ErrorInfo>,
}

impl RenderedSegment<'_> {
    /// Status line for segments still showing original text.
    pub fn marker(&self) -> Option<String> {
        match self.display {
            DisplayState::Enhanced => None,
            DisplayState::Pending => Some(format!("[segment {}: original, pending]", self.index)),
            DisplayState::Processing => {
                Some(format!("[segment {}: original, processing]", self.index))
            }
            DisplayState::Failed => Some(match self.error {
                Some(err) => format!("[segment {}: original, failed ({})]", self.index, err),
                None => format!("[segment {}: original, failed]", self.index),
            }),
        }
    }
}

/// Render every segment of `doc` in index order.
pub fn render(doc: &Document) -> Vec<RenderedSegment<'_>> {
    let mut ordered: Vec<_> = doc.segments.iter().collect();
    ordered.sort_by_key(|seg| seg.index);

    ordered
        .into_iter()
        .map(|seg| match &seg.state {
            SegmentState::Done { result_text } => RenderedSegment {
                index: seg.index,
                display: DisplayState::Enhanced,
                text: result_text,
                error: None,
            },
            SegmentState::Pending => original(seg.index, &seg.source_text, DisplayState::Pending),
            SegmentState::Processing => {
                original(seg.index, &seg.source_text, DisplayState::Processing)
            }
            SegmentState::Error { error } => RenderedSegment {
                error: Some(error),
                ..original(seg.index, &seg.source_text, DisplayState::Failed)
            },
        })
        .collect()
}

fn original(index: usize, text: &str, display: DisplayState) -> RenderedSegment<'_> {
    RenderedSegment {
        index,
        display,
        text,
        error: None,
    }
}

/// Concatenate the rendered view into one string.
///
/// Without markers, a fully finished document renders as exactly the
/// concatenation of every segment's result text. With markers, each
/// segment still showing original text is preceded by its status line.
pub fn render_text(doc: &Document, with_markers: bool) -> String {
    let mut out = String::with_capacity(doc.raw_text.len());
    for piece in render(doc) {
        if with_markers {
            if let Some(marker) = piece.marker() {
                if !out.is_empty() && !out.ends_with('\n') {
                    out.push('\n');
                }
                out.push_str(&marker);
                out.push('\n');
            }
        }
        out.push_str(piece.text);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{ErrorKind, Segment};
    use crate::segment::SegmenterConfig;

    fn doc() -> Document {
        Document::new(
            "d",
            "First sentence here. Second sentence here. Third sentence here.",
            "polish",
            &SegmenterConfig {
                chunk_size: 3,
                snap_window: 400,
            },
        )
    }

    fn finish(seg: &mut Segment) {
        seg.state = SegmentState::Done {
            result_text: format!("<{}>", seg.index),
        };
    }

    #[test]
    fn test_untouched_document_renders_original() {
        let d = doc();
        assert_eq!(d.segments.len(), 3);
        assert_eq!(render_text(&d, false), d.raw_text);
        assert!(render(&d).iter().all(|r| r.display == DisplayState::Pending));
    }

    #[test]
    fn test_all_done_is_concatenated_results() {
        let mut d = doc();
        d.segments.iter_mut().for_each(finish);
        assert_eq!(render_text(&d, false), "<0><1><2>");
    }

    #[test]
    fn test_mixed_states_keep_full_text() {
        let mut d = doc();
        finish(&mut d.segments[1]);
        d.segments[2].state = SegmentState::Error {
            error: ErrorInfo::new(ErrorKind::RateLimited, "429"),
        };
        let rendered = render(&d);
        assert_eq!(rendered[0].display, DisplayState::Pending);
        assert_eq!(rendered[1].display, DisplayState::Enhanced);
        assert_eq!(rendered[2].display, DisplayState::Failed);
        assert_eq!(rendered[2].text, d.segments[2].source_text);

        let text = render_text(&d, false);
        assert!(text.starts_with(&d.segments[0].source_text));
        assert!(text.contains("<1>"));
        assert!(text.ends_with(&d.segments[2].source_text));
    }

    #[test]
    fn test_markers() {
        let mut d = doc();
        finish(&mut d.segments[0]);
        d.segments[1].state = SegmentState::Processing;
        let text = render_text(&d, true);
        assert!(text.contains("[segment 1: original, processing]"));
        assert!(text.contains("[segment 2: original, pending]"));
        assert!(!text.contains("[segment 0"));
    }

    #[test]
    fn test_render_follows_index_not_storage_order() {
        let mut d = doc();
        d.segments.iter_mut().for_each(finish);
        d.segments.reverse();
        assert_eq!(render_text(&d, false), "<0><1><2>");
    }
}
