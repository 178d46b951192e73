//! # Chapterloom Core
//!
//! Runtime-free logic for Chapterloom: data models, the word-count
//! segmenter, content fingerprints, the segment cache abstraction, the
//! transformation client trait, summary grouping, and reassembly.
//!
//! This crate contains no tokio, sqlx, HTTP, or filesystem I/O. The
//! application crate supplies the dispatcher, the SQLite cache backend,
//! and the concrete transformation clients.
//!
//! ```text
//! raw text ──▶ segment ──▶ Document { segments } ──▶ reassemble::render
//!                               │
//!                               └──▶ group::SummaryBoard ──▶ summaries
//! ```

pub mod cache;
pub mod fingerprint;
pub mod group;
pub mod models;
pub mod reassemble;
pub mod segment;
pub mod transform;
