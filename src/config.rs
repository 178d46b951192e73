//! TOML configuration parsing and validation.
//!
//! Only `[db]` is required. Every other section falls back to defaults,
//! so a minimal file is:
//!
//! ```toml
//! [db]
//! path = "./data/chapterloom.sqlite"
//! ```
//!
//! The loaded [`Config`] is converted into immutable per-component
//! settings ([`SegmenterConfig`], [`DispatchConfig`], [`SummaryConfig`])
//! handed to each component at construction.

use anyhow::{bail, Context, Result};
use chapterloom_core::group::{SummaryInput, DEFAULT_GROUP_SIZE};
use chapterloom_core::segment::{SegmenterConfig, DEFAULT_CHUNK_SIZE, DEFAULT_SNAP_WINDOW};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Highest accepted `dispatch.concurrency`.
const MAX_CONCURRENCY: usize = 16;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    #[serde(default)]
    pub segmenting: SegmentingConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub transform: TransformConfig,
    #[serde(default)]
    pub summary: SummaryConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct SegmentingConfig {
    #[serde(default = "default_chunk_size")]
    pub chunk_size: usize,
    #[serde(default = "default_snap_window")]
    pub snap_window: usize,
}

impl Default for SegmentingConfig {
    fn default() -> Self {
        Self {
            chunk_size: DEFAULT_CHUNK_SIZE,
            snap_window: DEFAULT_SNAP_WINDOW,
        }
    }
}

impl SegmentingConfig {
    pub fn segmenter(&self) -> SegmenterConfig {
        SegmenterConfig {
            chunk_size: self.chunk_size,
            snap_window: self.snap_window,
        }
    }
}

fn default_chunk_size() -> usize {
    DEFAULT_CHUNK_SIZE
}
fn default_snap_window() -> usize {
    DEFAULT_SNAP_WINDOW
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_backoff_base_ms")]
    pub backoff_base_ms: u64,
    #[serde(default = "default_backoff_max_ms")]
    pub backoff_max_ms: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            concurrency: 2,
            max_retries: 3,
            timeout_secs: 120,
            backoff_base_ms: 1000,
            backoff_max_ms: 32_000,
        }
    }
}

impl DispatchConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

fn default_concurrency() -> usize {
    2
}
fn default_max_retries() -> u32 {
    3
}
fn default_timeout_secs() -> u64 {
    120
}
fn default_backoff_base_ms() -> u64 {
    1000
}
fn default_backoff_max_ms() -> u64 {
    32_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct TransformConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    #[serde(default = "default_instructions")]
    pub instructions: String,
    #[serde(default = "default_max_output_size")]
    pub max_output_size: usize,
    /// Segments longer than this (in characters) fail as oversized input
    /// without calling the service.
    #[serde(default = "default_max_input_chars")]
    pub max_input_chars: usize,
}

impl Default for TransformConfig {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: default_base_url(),
            api_key_env: default_api_key_env(),
            instructions: default_instructions(),
            max_output_size: default_max_output_size(),
            max_input_chars: default_max_input_chars(),
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_model() -> String {
    "gpt-4o-mini".to_string()
}
fn default_base_url() -> String {
    "https://api.openai.com/v1".to_string()
}
fn default_api_key_env() -> String {
    "OPENAI_API_KEY".to_string()
}
fn default_instructions() -> String {
    "Rewrite the following novel text so it reads fluently and naturally. \
     Keep every event, name, and line of dialogue. Do not summarize, translate, \
     or add commentary. Return only the rewritten text."
        .to_string()
}
fn default_max_output_size() -> usize {
    4096
}
fn default_max_input_chars() -> usize {
    60_000
}

#[derive(Debug, Deserialize, Clone)]
pub struct SummaryConfig {
    #[serde(default = "default_group_size")]
    pub group_size: usize,
    #[serde(default)]
    pub input: SummaryInput,
    #[serde(default = "default_summary_instructions")]
    pub instructions: String,
}

impl Default for SummaryConfig {
    fn default() -> Self {
        Self {
            group_size: DEFAULT_GROUP_SIZE,
            input: SummaryInput::default(),
            instructions: default_summary_instructions(),
        }
    }
}

fn default_group_size() -> usize {
    DEFAULT_GROUP_SIZE
}
fn default_summary_instructions() -> String {
    "Summarize the following passage of a novel in a few sentences. \
     Mention the characters involved and what happens. Return only the summary."
        .to_string()
}

impl Config {
    /// Config used by commands that never touch the service or database
    /// when no config file is present (e.g. `plan`).
    pub fn minimal() -> Self {
        Self {
            db: DbConfig {
                path: PathBuf::from("./data/chapterloom.sqlite"),
            },
            segmenting: SegmentingConfig::default(),
            dispatch: DispatchConfig::default(),
            transform: TransformConfig::default(),
            summary: SummaryConfig::default(),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config = parse_config(&content)?;
    tracing::debug!(path = %path.display(), provider = %config.transform.provider, "config loaded");
    Ok(config)
}

/// Parse and validate configuration text.
pub fn parse_config(content: &str) -> Result<Config> {
    let config: Config = toml::from_str(content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

fn validate(config: &Config) -> Result<()> {
    if config.segmenting.chunk_size == 0 {
        bail!("segmenting.chunk_size must be > 0");
    }

    if config.dispatch.concurrency == 0 || config.dispatch.concurrency > MAX_CONCURRENCY {
        bail!("dispatch.concurrency must be in [1, {}]", MAX_CONCURRENCY);
    }
    if config.dispatch.timeout_secs == 0 {
        bail!("dispatch.timeout_secs must be > 0");
    }
    if config.dispatch.backoff_max_ms < config.dispatch.backoff_base_ms {
        bail!("dispatch.backoff_max_ms must be >= dispatch.backoff_base_ms");
    }

    if config.summary.group_size == 0 {
        bail!("summary.group_size must be > 0");
    }

    if config.transform.max_output_size == 0 {
        bail!("transform.max_output_size must be > 0");
    }
    if config.transform.max_input_chars == 0 {
        bail!("transform.max_input_chars must be > 0");
    }

    match config.transform.provider.as_str() {
        "disabled" => {}
        "openai" => {
            if config.transform.model.trim().is_empty() {
                bail!(
                    "transform.model must not be empty when provider is '{}'",
                    config.transform.provider
                );
            }
        }
        other => bail!(
            "Unknown transform provider: '{}'. Must be disabled or openai.",
            other
        ),
    }

    Ok(())
}
