//! Built-in worker implementations.
//!
//! These make the CLI path end-to-end runnable without external services:
//! research reads brand metadata from disk, copy and design are
//! deterministic, generate shells out to a configured renderer, and the
//! quality critic applies a cheap file heuristic. Each is an ordinary
//! `Worker`; the engine treats them no differently than a remote one.

use crate::config::GenerateConfig;
use crate::errors::WorkerError;
use crate::plan::WorkerKind;
use crate::worker::{QaVerdict, Worker, WorkerContext};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::path::Path;
use std::process::Stdio;
use tokio::process::Command;

/// Brand metadata stored as `brand.toml` inside the brand directory.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BrandProfile {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub industry: Option<String>,
    #[serde(default)]
    pub preferred_styles: Vec<String>,
}

impl BrandProfile {
    pub fn load(brand_dir: &Path) -> Self {
        let path = brand_dir.join("brand.toml");
        std::fs::read_to_string(&path)
            .ok()
            .and_then(|content| toml::from_str(&content).ok())
            .unwrap_or_default()
    }
}

// ── research ──

/// Builds a trend brief from the brand's local metadata.
pub struct ResearchWorker;

#[async_trait::async_trait]
impl Worker for ResearchWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Research
    }

    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError> {
        let profile = BrandProfile::load(&ctx.brand_dir);
        let industry = profile.industry.clone().unwrap_or_else(|| "generic".to_string());

        let mut recommended = profile.preferred_styles.clone();
        if recommended.is_empty() {
            recommended.push("minimal_clean".to_string());
        }

        let key_insights = vec![
            format!("Objective focus: {}", ctx.request.objective),
            "Keep product fidelity and clear hierarchy.".to_string(),
            "Prefer high contrast text areas for social formats.".to_string(),
        ];

        Ok(json!({
            "industry": industry,
            "recommended_styles": recommended,
            "key_insights": key_insights,
            "source_mode": "knowledge_base",
        }))
    }
}

// ── copy ──

const THEMES: [&str; 5] = ["teaser", "main_offer", "last_chance", "social_proof", "reminder"];

/// Deterministic copy: one item per day, cycling through the theme list.
pub struct CopyWorker;

fn theme_copy(theme: &str, base: &str, objective: &str) -> (String, String) {
    match theme {
        "teaser" => (
            format!("{base} que se siente distinto"),
            "Pronto una propuesta visual nueva".to_string(),
        ),
        "main_offer" => (
            format!("{base} protagonista del dia"),
            format!("Campana enfocada en {objective}"),
        ),
        "last_chance" => (
            format!("Ultimo impulso para {base}"),
            "Cierre de campana con alta recordacion".to_string(),
        ),
        "social_proof" => (
            format!("{base} recomendado por la comunidad"),
            "Confianza, consistencia y resultados".to_string(),
        ),
        _ => (
            format!("{base} sigue en tendencia"),
            "No cortes el momentum de la campana".to_string(),
        ),
    }
}

#[async_trait::async_trait]
impl Worker for CopyWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Copy
    }

    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError> {
        let profile = BrandProfile::load(&ctx.brand_dir);
        let base = profile.name.unwrap_or_else(|| ctx.request.brand.clone());

        let items: Vec<Value> = (1..=ctx.request.days)
            .map(|day| {
                let theme = THEMES[((day - 1) as usize) % THEMES.len()];
                let (headline, subheadline) = theme_copy(theme, &base, &ctx.request.objective);
                json!({
                    "day": day,
                    "theme": theme,
                    "size": "feed",
                    "headline": headline,
                    "subheadline": subheadline,
                })
            })
            .collect();

        Ok(json!({ "items": items }))
    }
}

// ── design ──

/// Picks the first recommended style and stamps every item with it.
pub struct DesignWorker;

#[async_trait::async_trait]
impl Worker for DesignWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Design
    }

    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError> {
        let style = ctx
            .output(WorkerKind::Research)
            .and_then(|brief| brief["recommended_styles"].get(0))
            .and_then(Value::as_str)
            .unwrap_or("minimal_clean")
            .to_string();

        let mut items: Vec<Value> = ctx
            .output(WorkerKind::Copy)
            .and_then(|copy| copy["items"].as_array())
            .cloned()
            .unwrap_or_else(|| {
                // No-copy campaigns still need one design slot per day.
                (1..=ctx.request.days)
                    .map(|day| json!({"day": day, "theme": "visual_only", "size": "feed"}))
                    .collect()
            });
        for item in &mut items {
            item["style"] = json!(style);
        }

        Ok(json!({
            "selected_style": style,
            "visual_direction": format!("Style '{style}': clean composition, consistent palette, strong focal product."),
            "items": items,
        }))
    }
}

// ── generate ──

/// Renders one asset per item by spawning the configured command with the
/// item payload and target path as arguments.
pub struct GenerateWorker {
    config: GenerateConfig,
}

impl GenerateWorker {
    pub fn new(config: GenerateConfig) -> Self {
        Self { config }
    }
}

#[async_trait::async_trait]
impl Worker for GenerateWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Generate
    }

    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError> {
        let Some(command) = self.config.command.as_deref() else {
            return Err(WorkerError::fatal("no generation command configured"));
        };

        let items: Vec<Value> = ctx
            .output(WorkerKind::Design)
            .and_then(|design| design["items"].as_array())
            .cloned()
            .unwrap_or_else(|| {
                (1..=ctx.request.days)
                    .map(|day| json!({"day": day, "size": "feed"}))
                    .collect()
            });

        tokio::fs::create_dir_all(&ctx.run_dir).await.map_err(|e| {
            WorkerError::fatal(format!("cannot create output directory: {e}"))
        })?;

        let mut results = Vec::with_capacity(items.len());
        for (i, mut item) in items.into_iter().enumerate() {
            let day = item["day"].as_u64().unwrap_or((i + 1) as u64);
            let target = ctx.run_dir.join(format!("day_{day}.png"));
            if let Some(feedback) = &ctx.qa_feedback {
                item["qa_feedback"] = feedback.clone();
            }
            let payload = serde_json::to_string(&item)
                .map_err(|e| WorkerError::fatal(format!("unserializable item: {e}")))?;

            let output = Command::new(command)
                .args(&self.config.args)
                .arg(&payload)
                .arg(&target)
                .stdout(Stdio::piped())
                .stderr(Stdio::piped())
                .output()
                .await
                .map_err(|e| {
                    WorkerError::transient(format!("failed to spawn generation command: {e}"))
                })?;

            let error = if output.status.success() {
                None
            } else {
                Some(String::from_utf8_lossy(&output.stderr).trim().to_string())
            };
            results.push(json!({
                "day": day,
                "file": target.to_string_lossy(),
                "error": error,
            }));
        }

        Ok(json!({ "items": results }))
    }
}

// ── qa ──

/// Small quality gate keeping the retry loop bounded and observable:
/// generation errors, missing files, and implausibly small files fail.
pub struct QaCriticWorker {
    min_output_bytes: u64,
}

impl QaCriticWorker {
    pub fn new(min_output_bytes: u64) -> Self {
        Self { min_output_bytes }
    }
}

#[async_trait::async_trait]
impl Worker for QaCriticWorker {
    fn kind(&self) -> WorkerKind {
        WorkerKind::Qa
    }

    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError> {
        let items: Vec<Value> = ctx
            .output(WorkerKind::Generate)
            .and_then(|generated| generated["items"].as_array())
            .cloned()
            .unwrap_or_default();

        if items.is_empty() {
            return Ok(QaVerdict::failed("missing_file", json!("no generated items")).to_value());
        }

        for item in &items {
            if let Some(error) = item["error"].as_str() {
                return Ok(QaVerdict::failed("generation_error", json!(error)).to_value());
            }
            let Some(file) = item["file"].as_str() else {
                return Ok(QaVerdict::failed("missing_file", item.clone()).to_value());
            };
            let metadata = match tokio::fs::metadata(file).await {
                Ok(m) => m,
                Err(_) => {
                    return Ok(QaVerdict::failed(
                        "missing_file",
                        json!(format!("Image file not found after generation: {file}")),
                    )
                    .to_value());
                }
            };
            if metadata.len() < self.min_output_bytes {
                return Ok(QaVerdict::failed(
                    "suspicious_small_image",
                    json!(format!("Generated file too small ({} bytes).", metadata.len())),
                )
                .to_value());
            }
        }

        Ok(QaVerdict::passed().to_value())
    }
}
