//! Optional planning delegate.
//!
//! The delegate is an external command that receives the campaign request
//! as a prompt and answers with strict JSON naming which workers to run.
//! Everything about it is best-effort: a missing binary, a non-zero exit,
//! or unparseable output all surface as errors the resolver downgrades to
//! the deterministic rules.

use crate::config::DelegateConfig;
use crate::request::{ContentRequest, PlanSignals};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::process::Stdio;
use tokio::process::Command;

/// One proposed worker decision from the delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProposedStep {
    pub name: String,
    #[serde(default)]
    pub run: bool,
    #[serde(default)]
    pub reason: String,
}

/// The delegate's full answer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlanProposal {
    #[serde(default)]
    pub workers: Vec<ProposedStep>,
    #[serde(default)]
    pub reason: String,
}

impl PlanProposal {
    /// Parse delegate output, tolerating prose or markdown around the JSON
    /// object by extracting the outermost brace window.
    pub fn parse(raw: &str) -> Result<Self> {
        let cleaned = if let Some(start) = raw.find('{') {
            if let Some(end) = raw.rfind('}') {
                &raw[start..=end]
            } else {
                raw
            }
        } else {
            raw
        };
        serde_json::from_str(cleaned).context("Failed to parse delegate response as JSON")
    }
}

/// Abstraction over plan proposal sources, mockable in tests.
#[async_trait::async_trait]
pub trait PlanningDelegate: Send + Sync {
    async fn propose_plan(
        &self,
        request: &ContentRequest,
        signals: &PlanSignals,
    ) -> Result<PlanProposal>;
}

const DELEGATE_SYSTEM_PROMPT: &str = r#"You are a strict JSON planner for campaign orchestration. No markdown.

Respond with valid JSON only, matching this schema:
{
  "workers": [
    {"name": "research", "run": true, "reason": "..."},
    {"name": "copy", "run": true, "reason": "..."},
    {"name": "design", "run": true, "reason": "..."},
    {"name": "generate", "run": true, "reason": "..."},
    {"name": "qa", "run": true, "reason": "..."}
  ],
  "reason": "overall rationale"
}

Hard constraints:
- If build=false: generate=false and qa=false
- If build=true: generate must be true
- If include_text=false: copy=false
- If max_retries=0: qa=false
Policy guidance:
- Run research if the user asks for trends/inspiration OR there is no style reference and no brand references
- Run copy only if include_text=true
- Run design if build=true
- Run qa if build=true and max_retries>0
"#;

/// Delegate backed by an external command (configured in `[delegate]`).
pub struct CommandDelegate {
    command: String,
    args: Vec<String>,
}

impl CommandDelegate {
    /// Build from config; `None` when no command is configured.
    pub fn from_config(config: &DelegateConfig) -> Option<Self> {
        let command = config.command.clone()?;
        if command.trim().is_empty() {
            return None;
        }
        Some(Self {
            command,
            args: config.args.clone(),
        })
    }

    fn build_prompt(request: &ContentRequest, signals: &PlanSignals) -> String {
        format!(
            "Decide which workers to run for this campaign request. Return ONLY strict JSON.\n\n\
             brand={}\n\
             objective={}\n\
             days={}\n\
             build={}\n\
             include_text={}\n\
             max_retries={}\n\
             has_style_ref_input={}\n\
             has_brand_style_ref={}\n\
             asks_trends={}\n",
            request.brand,
            request.objective,
            request.days,
            request.build,
            request.include_text,
            request.max_retries,
            signals.has_style_ref,
            signals.has_brand_refs,
            signals.asks_trends,
        )
    }
}

#[async_trait::async_trait]
impl PlanningDelegate for CommandDelegate {
    async fn propose_plan(
        &self,
        request: &ContentRequest,
        signals: &PlanSignals,
    ) -> Result<PlanProposal> {
        let prompt = Self::build_prompt(request, signals);

        let output = Command::new(&self.command)
            .args(&self.args)
            .arg("--system")
            .arg(DELEGATE_SYSTEM_PROMPT)
            .arg(prompt)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .context("Failed to run planning delegate command")?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("Planning delegate failed: {}", stderr);
        }

        let text = String::from_utf8_lossy(&output.stdout);
        if text.trim().is_empty() {
            anyhow::bail!("Planning delegate returned empty output");
        }
        PlanProposal::parse(&text)
    }
}
