//! Word-count segmenter with boundary snapping.
//!
//! Splits a chapter into [`SegmentBounds`] that cover the text exactly:
//! the first segment starts at byte 0, the last ends at `text.len()`, and
//! each segment's `end` equals the next segment's `start`.
//!
//! # Algorithm
//!
//! 1. Count words (maximal runs of non-whitespace).
//! 2. Plan per-segment word counts with [`plan_word_counts`]:
//!    - `N < chunk_size` → one segment;
//!    - `N < 2 × chunk_size` → two balanced segments;
//!    - otherwise `ceil(N / chunk_size)` segments, all full-size except the
//!      last two, which share the remainder evenly so no tiny tail is left.
//! 3. Place a raw boundary at the first word of each following segment.
//! 4. Snap each raw boundary to the nearest sentence end within
//!    `snap_window` bytes, else the nearest paragraph break, else keep it.
//!    A boundary never lands inside a markup tag; one that would is pushed
//!    past the tag's closing `>`.
//!
//! Whitespace after a break stays with the earlier segment, so every
//! segment after the first starts on visible text.
//!
//! # Example
//!
//! ```rust
//! use chapterloom_core::segment::{segment, SegmenterConfig};
//!
//! let text = "One two three. Four five six. Seven eight nine.";
//! let config = SegmenterConfig { chunk_size: 4, snap_window: 400 };
//! let bounds = segment(text, &config);
//! assert_eq!(bounds.first().map(|b| b.start), Some(0));
//! assert_eq!(bounds.last().map(|b| b.end), Some(text.len()));
//! ```

use serde::{Deserialize, Serialize};

/// Default maximum words per segment.
pub const DEFAULT_CHUNK_SIZE: usize = 3000;

/// Default distance, in bytes, searched on each side of a raw boundary
/// for a sentence or paragraph break.
pub const DEFAULT_SNAP_WINDOW: usize = 400;

/// Sentence terminators that must be followed by whitespace.
const SENTENCE_TERMINATORS: &[char] = &['.', '!', '?', '…'];

/// Full-width terminators; CJK text rarely puts whitespace after them.
const FULL_WIDTH_TERMINATORS: &[char] = &['。', '！', '？'];

/// Characters allowed between a terminator and the following whitespace.
const SENTENCE_CLOSERS: &[char] = &['"', '\'', '”', '’', ')', ']', '»', '」', '』'];

/// Segmenter settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmenterConfig {
    /// Maximum words per segment. Must be > 0.
    pub chunk_size: usize,
    /// Snap search distance in bytes on each side of a raw boundary.
    pub snap_window: usize,
}

impl Default for SegmenterConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            snap_window: DEFAULT_SNAP_WINDOW,
        }
    }
}

/// Byte range `[start, end)` of one segment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SegmentBounds {
    pub start: usize,
    pub end: usize,
}

impl SegmentBounds {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.start == self.end
    }
}

/// Split `text` into ordered, gap-free segment bounds.
///
/// # Guarantees
///
/// - Empty text yields no segments; any other text yields at least one.
/// - Bounds are contiguous, strictly increasing, and cover `0..text.len()`.
/// - Every boundary sits on a UTF-8 char boundary and outside markup tags.
/// - Text without any internal sentence or paragraph break stays a single
///   segment. Text with paragraph breaks but no sentence ends still splits.
pub fn segment(text: &str, config: &SegmenterConfig) -> Vec<SegmentBounds> {
    if text.is_empty() {
        return Vec::new();
    }

    let whole = vec![SegmentBounds {
        start: 0,
        end: text.len(),
    }];

    let word_starts = word_starts(text);
    let counts = plan_word_counts(word_starts.len(), config.chunk_size);
    if counts.len() <= 1 {
        return whole;
    }

    let breaks = BreakIndex::build(text);
    if breaks.sentences.is_empty() && breaks.paragraphs.is_empty() {
        tracing::debug!(
            words = word_starts.len(),
            "no sentence or paragraph break in document, keeping a single segment"
        );
        return whole;
    }

    let mut boundaries = Vec::with_capacity(counts.len() - 1);
    let mut consumed = 0usize;
    for count in &counts[..counts.len() - 1] {
        consumed += count;
        let Some(&raw) = word_starts.get(consumed) else {
            break;
        };
        let snapped = breaks.snap(raw, config.snap_window);
        let previous = boundaries.last().copied().unwrap_or(0);
        if snapped > previous && snapped < text.len() {
            boundaries.push(snapped);
        } else {
            tracing::debug!(raw, snapped, "dropping collapsed boundary");
        }
    }

    let mut bounds = Vec::with_capacity(boundaries.len() + 1);
    let mut start = 0usize;
    for boundary in boundaries {
        bounds.push(SegmentBounds {
            start,
            end: boundary,
        });
        start = boundary;
    }
    bounds.push(SegmentBounds {
        start,
        end: text.len(),
    });
    bounds
}

/// Plan how many words each segment receives.
///
/// ```rust
/// use chapterloom_core::segment::plan_word_counts;
///
/// assert_eq!(plan_word_counts(2500, 3000), vec![2500]);
/// assert_eq!(plan_word_counts(5000, 3000), vec![2500, 2500]);
/// assert_eq!(plan_word_counts(7000, 3000), vec![3000, 2000, 2000]);
/// ```
pub fn plan_word_counts(total: usize, chunk_size: usize) -> Vec<usize> {
    if total == 0 {
        return Vec::new();
    }
    if chunk_size == 0 || total < chunk_size {
        return vec![total];
    }
    if total < 2 * chunk_size {
        return vec![total.div_ceil(2), total / 2];
    }

    let segments = total.div_ceil(chunk_size);
    let full = segments - 2;
    let remainder = total - full * chunk_size;
    let mut counts = vec![chunk_size; full];
    counts.push(remainder.div_ceil(2));
    counts.push(remainder / 2);
    counts
}

/// Number of words in `text`.
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// Byte offsets where each word begins.
fn word_starts(text: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut in_word = false;
    for (i, c) in text.char_indices() {
        if c.is_whitespace() {
            in_word = false;
        } else if !in_word {
            starts.push(i);
            in_word = true;
        }
    }
    starts
}

/// Precomputed safe split points and tag spans for one text.
struct BreakIndex {
    /// Offsets just after a sentence end and its trailing whitespace.
    sentences: Vec<usize>,
    /// Offsets just after a line break run or a closing block tag.
    paragraphs: Vec<usize>,
    /// `(start, end)` of every tag; `end` is one past the closing `>`,
    /// or the text length for an unclosed tag.
    tags: Vec<(usize, usize)>,
    len: usize,
}

impl BreakIndex {
    fn build(text: &str) -> Self {
        let tags = find_tags(text);
        let mut sentences = Vec::new();
        let mut paragraphs = Vec::new();
        let chars: Vec<(usize, char)> = text.char_indices().collect();

        let mut i = 0usize;
        while i < chars.len() {
            let (offset, c) = chars[i];
            if in_tag(&tags, offset) {
                i += 1;
                continue;
            }

            if FULL_WIDTH_TERMINATORS.contains(&c) {
                let mut j = i + 1;
                while j < chars.len() && is_terminator_or_closer(chars[j].1) {
                    j += 1;
                }
                let j = skip_whitespace(&chars, j);
                push_point(&mut sentences, &tags, &chars, j, text.len());
                i = j.max(i + 1);
                continue;
            }

            if SENTENCE_TERMINATORS.contains(&c) {
                let mut j = i + 1;
                while j < chars.len() && is_terminator_or_closer(chars[j].1) {
                    j += 1;
                }
                let after_closers = j;
                j = skip_closing_tags(&chars, &tags, j);
                match chars.get(j).map(|&(_, next)| next) {
                    Some(next) if next.is_whitespace() => {
                        let j = skip_whitespace(&chars, j);
                        push_point(&mut sentences, &tags, &chars, j, text.len());
                        i = j;
                    }
                    // `end.</p><p>Next`: closing markup then a new tag.
                    Some('<') if j > after_closers => {
                        push_point(&mut sentences, &tags, &chars, j, text.len());
                        i = j;
                    }
                    _ => i += 1,
                }
                continue;
            }

            if c == '\n' {
                let j = skip_whitespace(&chars, i);
                push_point(&mut paragraphs, &tags, &chars, j, text.len());
                i = j.max(i + 1);
                continue;
            }

            i += 1;
        }

        for &(start, end) in &tags {
            if is_block_close(&text[start..end]) {
                let j = chars.partition_point(|&(o, _)| o < end);
                let j = skip_whitespace(&chars, j);
                push_point(&mut paragraphs, &tags, &chars, j, text.len());
            }
        }
        paragraphs.sort_unstable();
        paragraphs.dedup();

        Self {
            sentences,
            paragraphs,
            tags,
            len: text.len(),
        }
    }

    /// Move a raw boundary to the best safe split point near it.
    fn snap(&self, raw: usize, window: usize) -> usize {
        let chosen = nearest_within(&self.sentences, raw, window)
            .or_else(|| nearest_within(&self.paragraphs, raw, window))
            .unwrap_or(raw);
        self.push_out_of_tag(chosen)
    }

    fn push_out_of_tag(&self, offset: usize) -> usize {
        match enclosing_tag(&self.tags, offset) {
            Some((_, end)) => end.min(self.len),
            None => offset,
        }
    }
}

fn is_terminator_or_closer(c: char) -> bool {
    SENTENCE_TERMINATORS.contains(&c)
        || FULL_WIDTH_TERMINATORS.contains(&c)
        || SENTENCE_CLOSERS.contains(&c)
}

fn skip_whitespace(chars: &[(usize, char)], mut j: usize) -> usize {
    while j < chars.len() && chars[j].1.is_whitespace() {
        j += 1;
    }
    j
}

/// Skip `</...>` tags that directly follow a terminator (`end.</em> Next`).
fn skip_closing_tags(chars: &[(usize, char)], tags: &[(usize, usize)], mut j: usize) -> usize {
    while j + 1 < chars.len() && chars[j].1 == '<' && chars[j + 1].1 == '/' {
        let offset = chars[j].0;
        match tags.binary_search_by_key(&offset, |&(start, _)| start) {
            Ok(found) => {
                let end = tags[found].1;
                j = chars.partition_point(|&(o, _)| o < end);
            }
            Err(_) => break,
        }
    }
    j
}

/// Record a split point at char index `j` if text follows it and it is not
/// inside a tag.
fn push_point(
    points: &mut Vec<usize>,
    tags: &[(usize, usize)],
    chars: &[(usize, char)],
    j: usize,
    len: usize,
) {
    let Some(&(offset, _)) = chars.get(j) else {
        return;
    };
    if offset > 0 && offset < len && !in_tag(tags, offset) {
        points.push(offset);
    }
}

fn in_tag(tags: &[(usize, usize)], offset: usize) -> bool {
    enclosing_tag(tags, offset).is_some()
}

/// The tag strictly containing `offset`. Tags are sorted and disjoint.
fn enclosing_tag(tags: &[(usize, usize)], offset: usize) -> Option<(usize, usize)> {
    let idx = tags.partition_point(|&(start, _)| start < offset);
    let candidate = tags.get(idx.checked_sub(1)?)?;
    (offset < candidate.1).then_some(*candidate)
}

/// Locate markup tags: `<` followed by a letter, `/`, or `!`.
fn find_tags(text: &str) -> Vec<(usize, usize)> {
    let bytes = text.as_bytes();
    let mut tags = Vec::new();
    let mut i = 0usize;
    while i < bytes.len() {
        if bytes[i] == b'<' {
            let opens_tag = bytes
                .get(i + 1)
                .is_some_and(|&b| b.is_ascii_alphabetic() || b == b'/' || b == b'!');
            if opens_tag {
                let end = text[i..]
                    .find('>')
                    .map(|pos| i + pos + 1)
                    .unwrap_or(text.len());
                tags.push((i, end));
                i = end;
                continue;
            }
        }
        i += 1;
    }
    tags
}

/// `</p>`, `</div>`, `<br>`, `<br/>` and friends end a paragraph.
fn is_block_close(tag: &str) -> bool {
    let lower = tag.to_ascii_lowercase();
    let name: String = lower
        .trim_start_matches('<')
        .trim_start_matches('/')
        .chars()
        .take_while(|c| c.is_ascii_alphanumeric())
        .collect();
    if name == "br" {
        return true;
    }
    lower.starts_with("</")
        && matches!(
            name.as_str(),
            "p" | "div" | "blockquote" | "li" | "h1" | "h2" | "h3" | "h4" | "h5" | "h6"
        )
}

/// Nearest point to `target` within `window` bytes. Ties go to the earlier
/// point so segments lean toward staying under the chunk size.
fn nearest_within(points: &[usize], target: usize, window: usize) -> Option<usize> {
    let idx = points.partition_point(|&p| p < target);
    let after = points.get(idx).copied();
    let before = idx.checked_sub(1).and_then(|i| points.get(i).copied());

    let best = match (before, after) {
        (Some(b), Some(a)) => {
            if target - b <= a - target {
                b
            } else {
                a
            }
        }
        (Some(b), None) => b,
        (None, Some(a)) => a,
        (None, None) => return None,
    };
    (best.abs_diff(target) <= window).then_some(best)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// `sentences` sentences of ten words each, separated by single spaces.
    fn prose(sentences: usize) -> String {
        (0..sentences)
            .map(|s| {
                let words: Vec<String> = (0..10).map(|w| format!("w{}x{}", s, w)).collect();
                format!("{}.", words.join(" "))
            })
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn config(chunk_size: usize) -> SegmenterConfig {
        SegmenterConfig {
            chunk_size,
            ..Default::default()
        }
    }

    fn word_counts(text: &str, bounds: &[SegmentBounds]) -> Vec<usize> {
        bounds
            .iter()
            .map(|b| word_count(&text[b.start..b.end]))
            .collect()
    }

    fn assert_covers(text: &str, bounds: &[SegmentBounds]) {
        assert_eq!(bounds.first().map(|b| b.start), Some(0));
        assert_eq!(bounds.last().map(|b| b.end), Some(text.len()));
        for pair in bounds.windows(2) {
            assert_eq!(pair[0].end, pair[1].start, "gap or overlap in {:?}", bounds);
            assert!(pair[0].start < pair[0].end);
        }
        let joined: String = bounds.iter().map(|b| &text[b.start..b.end]).collect();
        assert_eq!(joined, text);
    }

    #[test]
    fn test_plan_formula() {
        assert_eq!(plan_word_counts(2500, 3000), vec![2500]);
        assert_eq!(plan_word_counts(5000, 3000), vec![2500, 2500]);
        assert_eq!(plan_word_counts(9000, 3000), vec![3000, 3000, 3000]);
        assert_eq!(plan_word_counts(7000, 3000), vec![3000, 2000, 2000]);
        assert_eq!(plan_word_counts(5001, 3000), vec![2501, 2500]);
        assert_eq!(plan_word_counts(6000, 3000), vec![3000, 3000]);
        assert_eq!(plan_word_counts(10_001, 3000), vec![3000, 3000, 2001, 2000]);
        assert!(plan_word_counts(0, 3000).is_empty());
    }

    #[test]
    fn test_plan_sums_to_total() {
        for total in [1usize, 17, 2999, 3000, 3001, 8999, 12_345, 40_000] {
            let counts = plan_word_counts(total, 3000);
            assert_eq!(counts.iter().sum::<usize>(), total, "total {}", total);
            assert!(counts.iter().all(|&c| c <= 3000));
        }
    }

    #[test]
    fn test_empty_text_has_no_segments() {
        assert!(segment("", &config(3000)).is_empty());
    }

    #[test]
    fn test_whitespace_only_is_one_segment() {
        let bounds = segment("  \n\n ", &config(3000));
        assert_eq!(bounds.len(), 1);
    }

    #[test]
    fn test_small_document_single_segment() {
        let text = prose(250);
        let bounds = segment(&text, &config(3000));
        assert_eq!(word_counts(&text, &bounds), vec![2500]);
    }

    #[test]
    fn test_two_balanced_segments() {
        let text = prose(500);
        let bounds = segment(&text, &config(3000));
        assert_covers(&text, &bounds);
        assert_eq!(word_counts(&text, &bounds), vec![2500, 2500]);
    }

    #[test]
    fn test_exact_multiple() {
        let text = prose(900);
        let bounds = segment(&text, &config(3000));
        assert_covers(&text, &bounds);
        assert_eq!(word_counts(&text, &bounds), vec![3000, 3000, 3000]);
    }

    #[test]
    fn test_last_two_share_remainder() {
        let text = prose(700);
        let bounds = segment(&text, &config(3000));
        assert_covers(&text, &bounds);
        assert_eq!(word_counts(&text, &bounds), vec![3000, 2000, 2000]);
    }

    #[test]
    fn test_boundary_snaps_to_sentence_end() {
        let text = "Alpha beta gamma delta. Epsilon zeta eta theta. Iota kappa.";
        // 10 words, chunk 6: the raw boundary at "zeta" snaps back to "Epsilon".
        let bounds = segment(text, &config(6));
        assert_covers(text, &bounds);
        assert_eq!(bounds.len(), 2);
        assert!(text[bounds[1].start..].starts_with("Epsilon"));
        assert!(text[..bounds[0].end].ends_with("delta. "));
    }

    #[test]
    fn test_falls_back_to_paragraph_break() {
        let text = "one two three four\nfive six seven eight. nine ten eleven twelve";
        let bounds = segment(
            text,
            &SegmenterConfig {
                chunk_size: 6,
                snap_window: 10,
            },
        );
        assert_covers(text, &bounds);
        assert_eq!(bounds.len(), 2);
        assert!(text[bounds[1].start..].starts_with("five"));
    }

    #[test]
    fn test_raw_boundary_when_nothing_in_window() {
        let text = "a b c d e f g h i j k l m n o p q r s t. u";
        let bounds = segment(
            text,
            &SegmenterConfig {
                chunk_size: 12,
                snap_window: 2,
            },
        );
        assert_covers(text, &bounds);
        assert_eq!(bounds.len(), 2);
        assert!(text[bounds[1].start..].starts_with('l'));
    }

    #[test]
    fn test_single_sentence_stays_whole() {
        let text = (0..50).map(|i| format!("w{}", i)).collect::<Vec<_>>().join(" ");
        let bounds = segment(&text, &config(10));
        assert_eq!(bounds.len(), 1);
    }

    #[test]
    fn test_unpunctuated_lines_still_split() {
        let text = (0..900)
            .map(|line| {
                (0..10)
                    .map(|w| format!("l{}w{}", line, w))
                    .collect::<Vec<_>>()
                    .join(" ")
            })
            .collect::<Vec<_>>()
            .join("\n");
        let bounds = segment(&text, &SegmenterConfig::default());
        assert_covers(&text, &bounds);
        assert_eq!(word_counts(&text, &bounds), vec![3000, 3000, 3000]);
        assert!(text[bounds[1].start..].starts_with("l300w0"));
    }

    #[test]
    fn test_unpunctuated_html_blocks_split_on_tags() {
        let text = (0..12)
            .map(|p| format!("<p>p{} one two three four</p>", p))
            .collect::<Vec<_>>()
            .join(" ");
        let bounds = segment(&text, &config(20));
        assert_covers(&text, &bounds);
        assert_eq!(bounds.len(), 3);
        for b in &bounds[1..] {
            assert!(text[b.start..].starts_with("<p>"), "boundary {} is mid-block", b.start);
        }
    }

    #[test]
    fn test_never_splits_inside_tag() {
        let text = "One two three. <span class=\"note big\">four five</span> six seven. eight nine ten eleven.";
        // 13 words, chunk 5: the first raw boundary is the word `big">four`,
        // which starts inside the <span> tag.
        let bounds = segment(
            text,
            &SegmenterConfig {
                chunk_size: 5,
                snap_window: 0,
            },
        );
        assert_covers(text, &bounds);
        assert!(bounds.iter().any(|b| text[b.start..].starts_with("four five")));
        for b in &bounds[1..] {
            let before = &text[..b.start];
            assert!(
                before.rfind('<').map_or(true, |lt| before.rfind('>').is_some_and(|gt| gt > lt)),
                "boundary {} is inside a tag",
                b.start
            );
        }
    }

    #[test]
    fn test_unclosed_tag_merges_tail() {
        let text = "One two three. Four five <b class=\"x y z never closed six seven eight";
        let bounds = segment(
            text,
            &SegmenterConfig {
                chunk_size: 5,
                snap_window: 0,
            },
        );
        assert_covers(text, &bounds);
        assert!(bounds.len() <= 2);
    }

    #[test]
    fn test_html_paragraph_tags() {
        let text = "<p>One two three.</p><p>Four five six.</p><p>Seven eight nine.</p>";
        let bounds = segment(text, &config(4));
        assert_covers(text, &bounds);
        assert!(bounds.len() >= 2);
        for b in &bounds[1..] {
            assert!(text[b.start..].starts_with("<p>"), "bad split at {}", b.start);
        }
    }

    #[test]
    fn test_multibyte_text_boundaries_are_char_aligned() {
        let text = "Ça va très bien. Où est la bibliothèque? Le café est fermé. Déjà vu encore.";
        let bounds = segment(text, &config(5));
        assert_covers(text, &bounds);
        for b in &bounds {
            assert!(text.is_char_boundary(b.start));
        }
    }

    #[test]
    fn test_full_width_terminators() {
        let text = "我们走吧。 他说好的。 然后他们离开了。 天黑了。";
        let bounds = segment(text, &config(2));
        assert_covers(text, &bounds);
        assert!(bounds.len() >= 2);
    }

    #[test]
    fn test_coverage_across_sizes() {
        let text = prose(137);
        for chunk in [1usize, 3, 10, 55, 300, 1000, 2000] {
            let bounds = segment(&text, &config(chunk));
            assert_covers(&text, &bounds);
        }
    }

    #[test]
    fn test_deterministic() {
        let text = prose(321);
        assert_eq!(segment(&text, &config(1000)), segment(&text, &config(1000)));
    }
}
