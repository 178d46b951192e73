//! # Chapterloom
//!
//! Enhance long novel chapters through a size-limited AI text service.
//!
//! A chapter is split into word-budgeted segments whose boundaries snap to
//! sentence or paragraph ends. Each segment goes through the service on
//! its own, with caching, retries, and failure isolation. The chapter is
//! then reassembled in order. Grouped summaries cover runs of consecutive
//! segments without dropping or repeating any of them.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐   ┌───────────┐   ┌────────────┐   ┌─────────────┐
//! │ChapterSource│──▶│ Segmenter │──▶│ Dispatcher │──▶│ Reassembler │
//! │ txt/html/.. │   │  (core)   │   │ cache+retry│   │   (core)    │
//! └─────────────┘   └───────────┘   └─────┬──────┘   └─────────────┘
//!                                         │
//!                      ┌──────────────────┼──────────────────┐
//!                      ▼                  ▼                  ▼
//!                ┌──────────┐     ┌──────────────┐   ┌──────────────┐
//!                │  SQLite  │     │ OpenAI-compat│   │    Group     │
//!                │  cache   │     │    client    │   │ Coordinator  │
//!                └──────────┘     └──────────────┘   └──────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! chapterloom init
//! chapterloom plan chapter-12.txt
//! chapterloom enhance chapter-12.txt --output chapter-12.enhanced.txt
//! chapterloom summarize chapter-12.txt --group-size 3
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`db`] | Database connection |
//! | [`migrate`] | Schema migrations |
//! | [`sqlite_cache`] | SQLite cache backend |
//! | [`client`] | Transformation clients |
//! | [`dispatch`] | Concurrent segment processing |
//! | [`summary`] | Grouped summaries |
//! | [`cancel`] | Cancellation token |
//! | [`source`] | Chapter sources |
//! | [`extract`] | Text extraction for html, docx, pdf |
//! | [`progress`] | Progress reporting |
//! | [`enhance`] | `plan`, `enhance`, `summarize` commands |
//! | [`cache_cmd`] | `cache` commands |

pub mod cache_cmd;
pub mod cancel;
pub mod client;
pub mod config;
pub mod db;
pub mod dispatch;
pub mod enhance;
pub mod extract;
pub mod migrate;
pub mod progress;
pub mod source;
pub mod sqlite_cache;
pub mod summary;
