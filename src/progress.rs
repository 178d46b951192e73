//! Pipeline progress reporting.
//!
//! Reports per-segment progress during `enhance` and `summarize` so users
//! see what is in flight, what came from the cache, and what failed.
//! Progress is emitted on **stderr** so stdout stays reserved for the
//! reassembled text.

use std::io::Write;

use chapterloom_core::models::ErrorKind;

/// Where a finished segment's text came from.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Resolution {
    Cached,
    Transformed,
    Passthrough,
}

impl Resolution {
    pub fn as_str(&self) -> &'static str {
        match self {
            Resolution::Cached => "cached",
            Resolution::Transformed => "transformed",
            Resolution::Passthrough => "passthrough",
        }
    }
}

/// What kind of unit an event is about.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Unit {
    Segment,
    Summary,
}

impl Unit {
    pub fn as_str(&self) -> &'static str {
        match self {
            Unit::Segment => "segment",
            Unit::Summary => "summary",
        }
    }
}

/// A single progress event.
#[derive(Clone, Debug)]
pub enum PipelineEvent {
    /// Work is about to start on `total` units.
    Started { unit: Unit, total: u64 },
    /// A unit moved to `Processing`.
    Processing { unit: Unit, index: usize },
    /// A failed attempt will be retried after `delay_ms`.
    Retrying {
        unit: Unit,
        index: usize,
        attempt: u32,
        delay_ms: u64,
        kind: ErrorKind,
    },
    /// A unit reached `Done`. `finished` counts units settled so far.
    Done {
        unit: Unit,
        index: usize,
        resolution: Resolution,
        finished: u64,
        total: u64,
    },
    /// A unit was cancelled and went back to `Pending`.
    Cancelled { unit: Unit, index: usize },
    /// A unit reached `Error`.
    Failed {
        unit: Unit,
        index: usize,
        kind: ErrorKind,
        finished: u64,
        total: u64,
    },
}

/// Reports pipeline progress. Implementations write to stderr (human or JSON).
pub trait ProgressReporter: Send + Sync {
    /// Emit a progress event. Called concurrently from segment tasks.
    fn report(&self, event: PipelineEvent);
}

/// Human-friendly progress on stderr: "segment 3  done (cached)  4 / 12".
pub struct StderrProgress;

impl ProgressReporter for StderrProgress {
    fn report(&self, event: PipelineEvent) {
        let line = match &event {
            PipelineEvent::Started { unit, total } => {
                format!("{}s  {} queued\n", unit.as_str(), format_number(*total))
            }
            PipelineEvent::Processing { unit, index } => {
                format!("{} {}  processing...\n", unit.as_str(), index)
            }
            PipelineEvent::Retrying {
                unit,
                index,
                attempt,
                delay_ms,
                kind,
            } => format!(
                "{} {}  {}, retry {} in {} ms\n",
                unit.as_str(),
                index,
                kind,
                attempt,
                format_number(*delay_ms)
            ),
            PipelineEvent::Done {
                unit,
                index,
                resolution,
                finished,
                total,
            } => format!(
                "{} {}  done ({})  {} / {}\n",
                unit.as_str(),
                index,
                resolution.as_str(),
                format_number(*finished),
                format_number(*total)
            ),
            PipelineEvent::Cancelled { unit, index } => {
                format!("{} {}  cancelled\n", unit.as_str(), index)
            }
            PipelineEvent::Failed {
                unit,
                index,
                kind,
                finished,
                total,
            } => format!(
                "{} {}  failed ({})  {} / {}\n",
                unit.as_str(),
                index,
                kind,
                format_number(*finished),
                format_number(*total)
            ),
        };
        let mut stderr = std::io::stderr().lock();
        let _ = stderr.write_all(line.as_bytes());
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl ProgressReporter for JsonProgress {
    fn report(&self, event: PipelineEvent) {
        let obj = match &event {
            PipelineEvent::Started { unit, total } => serde_json::json!({
                "event": "started",
                "unit": unit.as_str(),
                "total": total
            }),
            PipelineEvent::Processing { unit, index } => serde_json::json!({
                "event": "processing",
                "unit": unit.as_str(),
                "index": index
            }),
            PipelineEvent::Retrying {
                unit,
                index,
                attempt,
                delay_ms,
                kind,
            } => serde_json::json!({
                "event": "retrying",
                "unit": unit.as_str(),
                "index": index,
                "attempt": attempt,
                "delay_ms": delay_ms,
                "kind": kind.as_str()
            }),
            PipelineEvent::Done {
                unit,
                index,
                resolution,
                finished,
                total,
            } => serde_json::json!({
                "event": "done",
                "unit": unit.as_str(),
                "index": index,
                "resolution": resolution.as_str(),
                "n": finished,
                "total": total
            }),
            PipelineEvent::Cancelled { unit, index } => serde_json::json!({
                "event": "cancelled",
                "unit": unit.as_str(),
                "index": index
            }),
            PipelineEvent::Failed {
                unit,
                index,
                kind,
                finished,
                total,
            } => serde_json::json!({
                "event": "failed",
                "unit": unit.as_str(),
                "index": index,
                "kind": kind.as_str(),
                "n": finished,
                "total": total
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl ProgressReporter for NoProgress {
    fn report(&self, _event: PipelineEvent) {}
}

fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    for (i, c) in s.chars().rev().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn reporter(&self) -> Box<dyn ProgressReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_number_comma() {
        assert_eq!(format_number(0), "0");
        assert_eq!(format_number(999), "999");
        assert_eq!(format_number(1000), "1,000");
        assert_eq!(format_number(1_234_567), "1,234,567");
    }

    #[test]
    fn labels() {
        assert_eq!(Resolution::Cached.as_str(), "cached");
        assert_eq!(Unit::Summary.as_str(), "summary");
    }
}
