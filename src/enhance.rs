//! `plan`, `enhance`, and `summarize` commands.
//!
//! Each command loads one chapter through a [`FileSource`], segments it,
//! and (except `plan`) runs it through the [`Dispatcher`]. The reassembled
//! chapter or the summaries go to stdout; progress and the status report
//! go to stderr.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use chapterloom_core::cache::SegmentCache;
use chapterloom_core::group::SummaryBoard;
use chapterloom_core::models::Document;
use chapterloom_core::reassemble::render_text;

use crate::cancel::CancellationToken;
use crate::client::create_client;
use crate::config::Config;
use crate::db;
use crate::dispatch::{DispatchSettings, Dispatcher, RunSummary};
use crate::migrate::run_migrations;
use crate::progress::ProgressMode;
use crate::source::{effective_instructions, ChapterSource, FileSource};
use crate::sqlite_cache::SqliteCacheBackend;
use crate::summary::GroupCoordinator;

/// Options for `enhance`.
#[derive(Debug, Clone)]
pub struct EnhanceOptions {
    pub output: Option<PathBuf>,
    pub markers: bool,
    pub regenerate: Vec<usize>,
    pub progress: ProgressMode,
}

/// Read and segment a chapter file.
pub async fn load_document(cfg: &Config, path: &Path) -> Result<Document> {
    let source = FileSource::new(path);
    let content = source.extract().await?;
    let instructions = effective_instructions(&cfg.transform.instructions, &content);
    let doc = Document::new(
        content.id,
        content.text,
        instructions,
        &cfg.segmenting.segmenter(),
    );
    tracing::info!(
        source = source.name(),
        document = %doc.id,
        segments = doc.segments.len(),
        "chapter loaded"
    );
    Ok(doc)
}

/// Dispatcher backed by the SQLite cache and the configured client.
pub async fn open_dispatcher(cfg: &Config, progress: ProgressMode) -> Result<Dispatcher> {
    run_migrations(cfg).await?;
    let pool = db::connect(cfg).await?;
    let cache = SegmentCache::new(Arc::new(SqliteCacheBackend::new(pool)));
    let client = create_client(cfg)?;
    Ok(
        Dispatcher::new(client, cache, DispatchSettings::from_config(cfg))
            .with_reporter(Arc::from(progress.reporter())),
    )
}

/// Token cancelled on Ctrl-C.
fn interrupt_token() -> CancellationToken {
    let token = CancellationToken::new();
    let signal = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            tracing::warn!("interrupted, cancelling in-flight segments");
            signal.cancel();
        }
    });
    token
}

/// Print the segment plan without calling the service.
pub async fn run_plan(cfg: &Config, path: &Path) -> Result<()> {
    let doc = load_document(cfg, path).await?;

    println!(
        "{:>5}  {:>10}  {:>10}  {:>7}  FINGERPRINT",
        "INDEX", "START", "END", "WORDS"
    );
    for seg in &doc.segments {
        println!(
            "{:>5}  {:>10}  {:>10}  {:>7}  {}",
            seg.index,
            seg.start,
            seg.end,
            seg.word_count(),
            &seg.fingerprint[..12]
        );
    }

    let words: usize = doc.segments.iter().map(|s| s.word_count()).sum();
    println!();
    println!(
        "{} segments, {} words, {} bytes (chunk_size = {})",
        doc.segments.len(),
        words,
        doc.raw_text.len(),
        cfg.segmenting.chunk_size
    );
    Ok(())
}

/// Enhance a chapter and print the reassembled text.
///
/// Segment failures do not fail the command; they are listed in the
/// status report and their original text is kept in the output.
pub async fn run_enhance(cfg: &Config, path: &Path, options: &EnhanceOptions) -> Result<()> {
    let mut doc = load_document(cfg, path).await?;
    for &index in &options.regenerate {
        if index >= doc.segments.len() {
            bail!(
                "--regenerate {}: chapter has only {} segments",
                index,
                doc.segments.len()
            );
        }
    }

    let dispatcher = open_dispatcher(cfg, options.progress).await?;
    let cancel = interrupt_token();

    let summary = enhance_document(&dispatcher, &mut doc, &options.regenerate, &cancel).await?;

    let text = render_text(&doc, options.markers);
    match &options.output {
        Some(out) => std::fs::write(out, &text)
            .with_context(|| format!("Failed to write output: {}", out.display()))?,
        None => {
            let mut stdout = std::io::stdout().lock();
            stdout.write_all(text.as_bytes())?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n")?;
            }
            stdout.flush()?;
        }
    }

    report_status(&doc, &summary);
    Ok(())
}

/// Run one enhancement pass over `doc`.
///
/// Segments listed in `regenerate` are invalidated up front so the batch
/// makes their one forced call; each segment is counted once.
pub async fn enhance_document(
    dispatcher: &Dispatcher,
    doc: &mut Document,
    regenerate: &[usize],
    cancel: &CancellationToken,
) -> Result<RunSummary> {
    for &index in regenerate {
        dispatcher.mark_for_regenerate(doc, index).await?;
    }
    Ok(dispatcher.process_all(doc, cancel).await)
}

/// Enhance a chapter, then summarize it group by group.
pub async fn run_summarize(
    cfg: &Config,
    path: &Path,
    group_size: Option<usize>,
    progress: ProgressMode,
) -> Result<()> {
    let group_size = group_size.unwrap_or(cfg.summary.group_size);
    if group_size == 0 {
        bail!("--group-size must be > 0");
    }

    let mut doc = load_document(cfg, path).await?;
    let dispatcher = open_dispatcher(cfg, progress).await?;
    let cancel = interrupt_token();

    let summary = dispatcher.process_all(&mut doc, &cancel).await;
    report_status(&doc, &summary);

    let mut board = SummaryBoard::new(
        doc.segments.len(),
        group_size,
        cfg.summary.input,
        cfg.summary.instructions.clone(),
    );
    let groups = GroupCoordinator::new(&dispatcher)
        .run_ready(&mut board, &doc.segments, &cancel)
        .await;

    let plan = chapterloom_core::group::plan_groups(doc.segments.len(), group_size);
    for (group_index, range) in plan.iter().enumerate() {
        println!(
            "## Group {} (segments {}-{})",
            group_index,
            range.start,
            range.end.saturating_sub(1)
        );
        match board.group(group_index) {
            Some(group) => match (group.summary_text(), group.state.error_info()) {
                (Some(text), _) => println!("{}", text.trim_end()),
                (None, Some(err)) => println!("[summary failed ({})]", err),
                (None, None) => println!("[summary {}]", group.state.label()),
            },
            None => {
                let unfinished = doc.segments[range.clone()]
                    .iter()
                    .filter(|s| !s.is_done())
                    .count();
                println!("[not ready: {} segment(s) unfinished]", unfinished);
            }
        }
        println!();
    }

    eprintln!(
        "summaries: {} groups, {} done ({} cached), {} failed",
        plan.len(),
        groups.cached + groups.transformed + groups.passthrough,
        groups.cached,
        groups.failed
    );
    Ok(())
}

fn report_status(doc: &Document, summary: &RunSummary) {
    let counts = doc.counts();
    eprintln!(
        "segments: {} total, {} done ({} cached, {} transformed), {} failed, {} pending",
        doc.segments.len(),
        counts.done,
        summary.cached,
        summary.transformed,
        counts.error,
        counts.pending + counts.processing
    );
    for seg in &doc.segments {
        if let Some(err) = seg.error_info() {
            eprintln!("  segment {} failed: {}", seg.index, err);
        }
    }
}
