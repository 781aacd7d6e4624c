//! Campaign request model and free-text intent inference.
//!
//! A `ContentRequest` is the immutable input to planning and execution. It
//! can be built directly from CLI flags, or translated from a free chat
//! message with `translate_user_text`, which applies the configurable
//! intent lexicon for things the user phrased rather than flagged.

use crate::config::IntentConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Bounds for the campaign length when translating free text.
pub const MIN_DAYS: u32 = 1;
pub const MAX_DAYS: u32 = 14;
const DEFAULT_DAYS: u32 = 3;

/// One content-creation request. Immutable once constructed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ContentRequest {
    /// What the campaign should achieve, free text.
    pub objective: String,
    /// Brand identifier the campaign belongs to.
    pub brand: String,
    /// Optional campaign label grouping the output.
    #[serde(default)]
    pub campaign: Option<String>,
    /// Number of content items (one per day).
    pub days: u32,
    /// Whether to produce final assets or stop at planning.
    pub build: bool,
    /// Whether the visuals should carry text overlays.
    pub include_text: bool,
    /// A style reference was supplied with the request.
    pub style_ref_present: bool,
    /// Quality-check retry allowance.
    pub max_retries: u32,
    /// Free-form constraints passed through to workers.
    #[serde(default)]
    pub constraints: Vec<String>,
}

impl ContentRequest {
    /// A request with conventional defaults for the given brand/objective.
    pub fn new(brand: impl Into<String>, objective: impl Into<String>) -> Self {
        Self {
            objective: objective.into(),
            brand: brand.into(),
            campaign: None,
            days: DEFAULT_DAYS,
            build: true,
            include_text: true,
            style_ref_present: false,
            max_retries: 1,
            constraints: Vec::new(),
        }
    }
}

/// Context signals consulted by the plan rules, derived from the request
/// text and the brand's on-disk references.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PlanSignals {
    /// A style reference image accompanied the request.
    pub has_style_ref: bool,
    /// The brand directory already holds reference images.
    pub has_brand_refs: bool,
    /// The request text asks for trends or inspiration.
    pub asks_trends: bool,
}

impl PlanSignals {
    /// Derive signals from a request and the intent lexicon. Brand reference
    /// presence must be checked separately (`has_local_brand_refs`).
    pub fn derive(request: &ContentRequest, intent: &IntentConfig, has_brand_refs: bool) -> Self {
        Self {
            has_style_ref: request.style_ref_present,
            has_brand_refs,
            asks_trends: asks_trends(&request.objective, intent),
        }
    }
}

/// Whether the text asks for trend or inspiration research.
pub fn asks_trends(text: &str, intent: &IntentConfig) -> bool {
    let msg = text.to_lowercase();
    intent.trend_markers.iter().any(|m| msg.contains(m.as_str()))
}

/// Whether the text wants text overlays on the visuals. Defaults to true;
/// only an explicit no-text phrase turns it off.
pub fn infer_include_text(text: &str, intent: &IntentConfig) -> bool {
    let msg = text.trim().to_lowercase();
    !intent.no_text_markers.iter().any(|m| msg.contains(m.as_str()))
}

/// Whether the text confirms a pending build request. Matches either an
/// exact confirmation phrase or a leading one ("dale, genera los assets").
pub fn is_build_confirmation(text: &str, intent: &IntentConfig) -> bool {
    let msg = text.trim().to_lowercase();
    if msg.is_empty() {
        return false;
    }
    intent.build_confirmations.iter().any(|phrase| {
        let p = phrase.as_str();
        msg == p
            || msg.starts_with(&format!("{p} "))
            || msg.starts_with(&format!("{p},"))
            || msg.starts_with(&format!("{p}."))
    })
}

/// Whether the brand's reference directory holds any style images.
pub fn has_local_brand_refs(brand_dir: &Path) -> bool {
    let refs_dir = brand_dir.join("references");
    if !refs_dir.exists() {
        return false;
    }
    for ext in ["jpg", "jpeg", "png", "webp"] {
        let pattern = refs_dir.join(format!("*.{ext}"));
        if let Ok(mut paths) = glob::glob(&pattern.to_string_lossy()) {
            if paths.next().is_some() {
                return true;
            }
        }
    }
    false
}

/// Provenance of a request derived from free text. Persisted with the run
/// so translated runs stay auditable: what was said, and what the
/// heuristics made of it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InputTranslation {
    pub source_text: String,
    pub objective: String,
    pub days: u32,
    pub build: bool,
    pub include_text: bool,
    pub reason: String,
}

/// Translate a free chat message into a request with heuristic defaults,
/// plus the translation record for the run artifact. Days are clamped to
/// the supported range; text overlay intent comes from the lexicon.
pub fn translate_user_text(
    brand: &str,
    text: &str,
    intent: &IntentConfig,
    max_retries: u32,
) -> (ContentRequest, InputTranslation) {
    let days = extract_days(text).unwrap_or(DEFAULT_DAYS).clamp(MIN_DAYS, MAX_DAYS);
    let objective = text.trim().to_string();
    let include_text = infer_include_text(text, intent);
    let translation = InputTranslation {
        source_text: text.to_string(),
        objective: objective.clone(),
        days,
        build: true,
        include_text,
        reason: "heuristic_lexicon".to_string(),
    };
    let request = ContentRequest {
        objective,
        brand: brand.to_string(),
        campaign: None,
        days,
        build: true,
        include_text,
        style_ref_present: false,
        max_retries,
        constraints: Vec::new(),
    };
    (request, translation)
}

/// Pull a day count out of phrases like "5 dias" / "for 7 days".
fn extract_days(text: &str) -> Option<u32> {
    let msg = text.to_lowercase();
    let mut tokens = msg.split_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if let Ok(n) = token.parse::<u32>() {
            if let Some(next) = tokens.peek() {
                if next.starts_with("dia") || next.starts_with("día") || next.starts_with("day") {
                    return Some(n);
                }
            }
        }
    }
    None
}
