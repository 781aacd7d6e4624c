//! Durable per-run artifacts.
//!
//! Each run owns its own directory under the store root, so concurrent
//! runs never contend on a shared file. The trace is a JSONL file appended
//! one outcome at a time; sealing writes the final document and rendered
//! report through a temp-file rename so readers only ever observe a fully
//! consistent artifact. Sealing twice is a no-op returning the existing
//! reference.

use crate::engine::TraceSink;
use crate::errors::StoreError;
use crate::orchestrator::RunResult;
use crate::worker::WorkerOutcome;
use serde_json::{Value, json};
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

const TRACE_FILE: &str = "trace.jsonl";
const DOCUMENT_FILE: &str = "artifacts.json";
const REPORT_FILE: &str = "report.md";

#[derive(Debug, Clone)]
pub struct ArtifactStore {
    root: PathBuf,
}

impl ArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Create the run directory and return its scoped handle.
    pub async fn open(&self, run_id: &str) -> Result<ArtifactHandle, StoreError> {
        let dir = self.root.join(run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StoreError::CreateDirFailed {
                path: dir.clone(),
                source,
            })?;
        Ok(ArtifactHandle {
            run_id: run_id.to_string(),
            dir,
            sealed: Mutex::new(None),
        })
    }

    /// Read a sealed run document, or `None` if the run is absent or not
    /// yet sealed.
    pub async fn read_sealed(&self, run_id: &str) -> Result<Option<Value>, StoreError> {
        let path = self.root.join(run_id).join(DOCUMENT_FILE);
        match tokio::fs::read_to_string(&path).await {
            Ok(content) => {
                let doc = serde_json::from_str(&content)
                    .map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
                Ok(Some(doc))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(StoreError::Other(anyhow::anyhow!(e))),
        }
    }
}

/// Run-scoped artifact handle. Owns the run directory for its lifetime.
#[derive(Debug)]
pub struct ArtifactHandle {
    run_id: String,
    dir: PathBuf,
    sealed: Mutex<Option<PathBuf>>,
}

impl ArtifactHandle {
    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Append one outcome as a JSON line. Monotonic, never rewrites.
    pub async fn append_trace(&self, outcome: &WorkerOutcome) -> Result<(), StoreError> {
        let line = serde_json::to_string(outcome)
            .map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
        let append = async {
            let mut file = tokio::fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.dir.join(TRACE_FILE))
                .await?;
            file.write_all(line.as_bytes()).await?;
            file.write_all(b"\n").await?;
            file.flush().await?;
            Ok::<(), std::io::Error>(())
        };
        append.await.map_err(|source| StoreError::TraceAppendFailed {
            run_id: self.run_id.clone(),
            source,
        })
    }

    /// Write the final document and report atomically. Idempotent: a
    /// second seal returns the existing document path without writing.
    pub async fn seal(&self, result: &RunResult) -> Result<PathBuf, StoreError> {
        let mut sealed = self.sealed.lock().await;
        if let Some(existing) = sealed.as_ref() {
            return Ok(existing.clone());
        }
        let document_path = self.dir.join(DOCUMENT_FILE);
        if tokio::fs::try_exists(&document_path).await.unwrap_or(false) {
            *sealed = Some(document_path.clone());
            return Ok(document_path);
        }

        let document = build_document(result);
        let body = serde_json::to_string_pretty(&document)
            .map_err(|e| StoreError::Other(anyhow::anyhow!(e)))?;
        self.write_atomic(DOCUMENT_FILE, body.as_bytes()).await?;
        self.write_atomic(REPORT_FILE, render_report(result).as_bytes())
            .await?;

        *sealed = Some(document_path.clone());
        Ok(document_path)
    }

    async fn write_atomic(&self, name: &str, content: &[u8]) -> Result<(), StoreError> {
        let target = self.dir.join(name);
        let tmp = self.dir.join(format!("{name}.tmp"));
        let write = async {
            tokio::fs::write(&tmp, content).await?;
            tokio::fs::rename(&tmp, &target).await?;
            Ok::<(), std::io::Error>(())
        };
        write.await.map_err(|source| StoreError::SealFailed {
            run_id: self.run_id.clone(),
            source,
        })
    }
}

#[async_trait::async_trait]
impl TraceSink for ArtifactHandle {
    async fn append(&self, outcome: &WorkerOutcome) -> Result<(), StoreError> {
        self.append_trace(outcome).await
    }
}

/// The write-once run document.
fn build_document(result: &RunResult) -> Value {
    json!({
        "run_id": result.run_id,
        "created_at": result.created_at.to_rfc3339(),
        "input": result.request,
        "worker_plan": {
            "sequence": result.plan.sequence(),
            "mode": result.plan.mode,
            "reason": result.plan.reason,
            "workers": result.plan.steps,
        },
        "orchestration_trace": result.trace,
        "input_translation": result.translation,
        "result": {
            "status": result.status,
            "total_cost_usd": result.total_cost_usd,
            "duration_ms": result.duration_ms,
        },
    })
}

/// Human-readable companion summary.
fn render_report(result: &RunResult) -> String {
    let mut out = String::new();
    out.push_str(&format!("# Campaign run {}\n\n", result.run_id));
    out.push_str(&format!(
        "- Brand: {}\n- Objective: {}\n- Days: {}\n- Status: {:?}\n- Plan mode: {:?}\n\n",
        result.request.brand,
        result.request.objective,
        result.request.days,
        result.status,
        result.plan.mode,
    ));
    out.push_str("## Worker plan\n\n");
    for step in &result.plan.steps {
        out.push_str(&format!(
            "- {}: {} ({})\n",
            step.kind,
            if step.will_run { "run" } else { "skip" },
            step.reason,
        ));
    }
    out.push_str("\n## Trace\n\n");
    for outcome in &result.trace {
        if outcome.skipped {
            out.push_str(&format!(
                "- {} skipped: {}\n",
                outcome.kind,
                outcome.reason.as_deref().unwrap_or(""),
            ));
        } else {
            out.push_str(&format!(
                "- {} attempt {}: {} ({} ms)\n",
                outcome.kind,
                outcome.attempt,
                if outcome.success { "ok" } else { "failed" },
                outcome.duration_ms,
            ));
        }
    }
    out
}
