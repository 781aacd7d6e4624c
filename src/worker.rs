//! The uniform worker contract and its surrounding types.
//!
//! Every pipeline stage — built-in or external — implements `Worker`. The
//! engine only ever sees this trait: it passes an accumulated context in
//! and records a `WorkerOutcome` per attempt.

use crate::errors::WorkerError;
use crate::plan::WorkerKind;
use crate::request::ContentRequest;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

/// Accumulated state flowing through one run. Earlier outputs are visible
/// to later steps keyed by the producing stage.
#[derive(Debug, Clone)]
pub struct WorkerContext {
    pub request: ContentRequest,
    /// Brand asset directory (references, product photos).
    pub brand_dir: PathBuf,
    /// Run-scoped output directory for produced assets.
    pub run_dir: PathBuf,
    outputs: HashMap<WorkerKind, Value>,
    /// Last quality verdict, merged in before a generate retry.
    pub qa_feedback: Option<Value>,
}

impl WorkerContext {
    pub fn new(request: ContentRequest, brand_dir: PathBuf, run_dir: PathBuf) -> Self {
        Self {
            request,
            brand_dir,
            run_dir,
            outputs: HashMap::new(),
            qa_feedback: None,
        }
    }

    pub fn insert_output(&mut self, kind: WorkerKind, payload: Value) {
        self.outputs.insert(kind, payload);
    }

    pub fn output(&self, kind: WorkerKind) -> Option<&Value> {
        self.outputs.get(&kind)
    }

    pub fn merge_qa_feedback(&mut self, verdict: Value) {
        self.qa_feedback = Some(verdict);
    }
}

/// One recorded attempt (or skip) of one stage. Append-only in the trace.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerOutcome {
    pub kind: WorkerKind,
    /// 1-based attempt number; always 1 for skips.
    pub attempt: u32,
    pub success: bool,
    pub skipped: bool,
    /// Plan reason for skips, empty otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    /// Worker output, or `Value::Null` for skips and failures.
    pub payload: Value,
    /// Error classification (`transient`, `deadline`, `fatal`) on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
}

impl WorkerOutcome {
    pub fn skipped(kind: WorkerKind, reason: impl Into<String>) -> Self {
        Self {
            kind,
            attempt: 1,
            success: true,
            skipped: true,
            reason: Some(reason.into()),
            payload: Value::Null,
            error_kind: None,
            duration_ms: 0,
        }
    }

    pub fn succeeded(kind: WorkerKind, attempt: u32, payload: Value, duration_ms: u64) -> Self {
        Self {
            kind,
            attempt,
            success: true,
            skipped: false,
            reason: None,
            payload,
            error_kind: None,
            duration_ms,
        }
    }

    pub fn failed(kind: WorkerKind, attempt: u32, error: &WorkerError, duration_ms: u64) -> Self {
        Self {
            kind,
            attempt,
            success: false,
            skipped: false,
            reason: None,
            payload: Value::Null,
            error_kind: Some(error.kind().to_string()),
            duration_ms,
        }
    }
}

/// Quality verdict convention: workers report `{ok, reason, details}`.
/// Anything else counts as a failed check.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QaVerdict {
    pub ok: bool,
    pub reason: String,
    #[serde(default)]
    pub details: Value,
}

impl QaVerdict {
    pub fn passed() -> Self {
        Self {
            ok: true,
            reason: "passed".to_string(),
            details: Value::Null,
        }
    }

    pub fn failed(reason: impl Into<String>, details: Value) -> Self {
        Self {
            ok: false,
            reason: reason.into(),
            details,
        }
    }

    /// Interpret a quality worker's payload. Malformed payloads become a
    /// failed verdict with reason `invalid_verdict`.
    pub fn from_payload(payload: &Value) -> Self {
        match serde_json::from_value::<QaVerdict>(payload.clone()) {
            Ok(verdict) => verdict,
            Err(_) => Self {
                ok: false,
                reason: "invalid_verdict".to_string(),
                details: payload.clone(),
            },
        }
    }

    pub fn to_value(&self) -> Value {
        serde_json::to_value(self).unwrap_or(Value::Null)
    }
}

/// The uniform stage contract.
#[async_trait::async_trait]
pub trait Worker: Send + Sync {
    fn kind(&self) -> WorkerKind;

    /// Perform one attempt. The engine owns retries and deadlines. A
    /// worker that spends money may report a numeric `cost_usd` in its
    /// payload; run totals are the sum of those fields.
    async fn run(&self, ctx: &WorkerContext) -> Result<Value, WorkerError>;
}

/// Stage-keyed worker lookup. Plans referencing a missing worker fail fatally
/// at execution time, not registration time, so partial registries are fine
/// for plan-only usage.
#[derive(Default, Clone)]
pub struct WorkerRegistry {
    workers: HashMap<WorkerKind, Arc<dyn Worker>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, worker: Arc<dyn Worker>) {
        self.workers.insert(worker.kind(), worker);
    }

    pub fn get(&self, kind: WorkerKind) -> Option<Arc<dyn Worker>> {
        self.workers.get(&kind).cloned()
    }
}
