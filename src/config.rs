//! Configuration for the Muse orchestrator.
//!
//! Settings are read from `muse.toml`, with sensible defaults for every
//! field so a missing file (or a partial one) always yields a usable
//! configuration.
//!
//! # Configuration File Format
//!
//! ```toml
//! [limits]
//! session_capacity = 500
//! history_cap = 80
//! requests_per_minute = 120
//! messages_per_minute = 30
//! trust_forwarded_for = false
//! grace_window_secs = 60
//!
//! [engine]
//! transient_retries = 2
//! worker_deadline_secs = 120
//!
//! [artifacts]
//! root = "artifacts"
//!
//! [delegate]
//! command = "muse-planner"
//!
//! [generate]
//! command = "muse-render"
//!
//! [intent]
//! no_text_markers = ["sin texto", "no text"]
//! trend_markers = ["tendencia", "trends"]
//! build_confirmations = ["/build", "ok", "dale"]
//! ```

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Admission and session bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum concurrently registered chat sessions.
    #[serde(default = "default_session_capacity")]
    pub session_capacity: usize,
    /// Maximum retained messages per session (oldest trimmed first).
    #[serde(default = "default_history_cap")]
    pub history_cap: usize,
    /// Request-style calls admitted per source key per minute.
    #[serde(default = "default_requests_per_minute")]
    pub requests_per_minute: usize,
    /// Real-time messages admitted per connection per minute.
    #[serde(default = "default_messages_per_minute")]
    pub messages_per_minute: usize,
    /// Trust the first `x-forwarded-for` entry as the source key.
    /// Off by default; only enable behind a proxy that sets it.
    #[serde(default)]
    pub trust_forwarded_for: bool,
    /// Seconds a connectionless session stays addressable before eviction.
    #[serde(default = "default_grace_window_secs")]
    pub grace_window_secs: u64,
}

fn default_session_capacity() -> usize {
    500
}

fn default_history_cap() -> usize {
    80
}

fn default_requests_per_minute() -> usize {
    120
}

fn default_messages_per_minute() -> usize {
    30
}

fn default_grace_window_secs() -> u64 {
    60
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            session_capacity: default_session_capacity(),
            history_cap: default_history_cap(),
            requests_per_minute: default_requests_per_minute(),
            messages_per_minute: default_messages_per_minute(),
            trust_forwarded_for: false,
            grace_window_secs: default_grace_window_secs(),
        }
    }
}

/// Execution engine tuning.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Retries for transient worker failures, per invocation.
    #[serde(default = "default_transient_retries")]
    pub transient_retries: u32,
    /// Hard deadline for a single worker invocation, in seconds.
    #[serde(default = "default_worker_deadline_secs")]
    pub worker_deadline_secs: u64,
}

fn default_transient_retries() -> u32 {
    2
}

fn default_worker_deadline_secs() -> u64 {
    120
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            transient_retries: default_transient_retries(),
            worker_deadline_secs: default_worker_deadline_secs(),
        }
    }
}

/// Artifact persistence settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArtifactsConfig {
    /// Root directory for per-run artifact directories.
    #[serde(default = "default_artifact_root")]
    pub root: PathBuf,
}

fn default_artifact_root() -> PathBuf {
    PathBuf::from("artifacts")
}

impl Default for ArtifactsConfig {
    fn default() -> Self {
        Self {
            root: default_artifact_root(),
        }
    }
}

/// Brand asset locations.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BrandsConfig {
    /// Root directory holding one subdirectory per brand.
    #[serde(default = "default_brands_root")]
    pub root: PathBuf,
}

fn default_brands_root() -> PathBuf {
    PathBuf::from("brands")
}

impl Default for BrandsConfig {
    fn default() -> Self {
        Self {
            root: default_brands_root(),
        }
    }
}

/// Planning delegate settings. An empty command disables the delegate and
/// planning falls back to the deterministic rules.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DelegateConfig {
    /// External command invoked to propose a worker plan.
    #[serde(default)]
    pub command: Option<String>,
    /// Extra arguments passed before the prompt.
    #[serde(default)]
    pub args: Vec<String>,
}

/// Generation backend settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateConfig {
    /// External command invoked once per campaign item.
    #[serde(default)]
    pub command: Option<String>,
    /// Extra arguments passed before the item payload.
    #[serde(default)]
    pub args: Vec<String>,
    /// Minimum byte size below which a produced file is suspect.
    #[serde(default = "default_min_output_bytes")]
    pub min_output_bytes: u64,
}

fn default_min_output_bytes() -> u64 {
    20_000
}

impl Default for GenerateConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            min_output_bytes: default_min_output_bytes(),
        }
    }
}

/// Free-text intent lexicon. The matching is lower-cased substring search;
/// the phrases themselves are data, so deployments can localize them
/// without touching code.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IntentConfig {
    /// Phrases meaning the campaign art should carry no text overlay.
    #[serde(default = "default_no_text_markers")]
    pub no_text_markers: Vec<String>,
    /// Phrases meaning the user wants trend/inspiration research.
    #[serde(default = "default_trend_markers")]
    pub trend_markers: Vec<String>,
    /// Phrases that confirm a pending build request.
    #[serde(default = "default_build_confirmations")]
    pub build_confirmations: Vec<String>,
}

fn default_no_text_markers() -> Vec<String> {
    [
        "sin texto",
        "no text",
        "sin copy",
        "sin headline",
        "sin titulares",
        "solo producto",
        "solo la foto",
        "sin tipografia",
        "sin tipografía",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_trend_markers() -> Vec<String> {
    [
        "tendencia",
        "trends",
        "inspiracion",
        "inspiración",
        "que esta funcionando",
        "qué está funcionando",
        "referencias",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

fn default_build_confirmations() -> Vec<String> {
    [
        "/build", "ok", "dale", "aprobado", "apruebo", "si", "sí", "genera", "ejecuta",
        "adelante",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

impl Default for IntentConfig {
    fn default() -> Self {
        Self {
            no_text_markers: default_no_text_markers(),
            trend_markers: default_trend_markers(),
            build_confirmations: default_build_confirmations(),
        }
    }
}

/// Top-level configuration, one section per subsystem.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MuseConfig {
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub artifacts: ArtifactsConfig,
    #[serde(default)]
    pub brands: BrandsConfig,
    #[serde(default)]
    pub delegate: DelegateConfig,
    #[serde(default)]
    pub generate: GenerateConfig,
    #[serde(default)]
    pub intent: IntentConfig,
}

impl MuseConfig {
    /// Parse configuration from TOML content.
    pub fn parse(content: &str) -> Result<Self> {
        toml::from_str(content).context("Failed to parse muse.toml")
    }

    /// Load configuration from a file path.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::parse(&content)
    }

    /// Load `muse.toml` from a directory, or defaults if absent.
    pub fn load_or_default(dir: &Path) -> Result<Self> {
        let config_path = dir.join("muse.toml");
        if config_path.exists() {
            Self::load(&config_path)
        } else {
            Ok(Self::default())
        }
    }
}
