//! The campaign orchestrator facade.
//!
//! `run_campaign` is the one entrypoint the CLI and server call: it
//! resolves a plan, opens the run's artifact handle, drives the engine,
//! and seals the result. Worker failures land in the trace and the run
//! status — the caller still gets a `RunResult`. Only environmental
//! problems (an unwritable artifact root) propagate as errors.

use crate::artifact::ArtifactStore;
use crate::config::MuseConfig;
use crate::engine::{ExecutionEngine, RunStatus};
use crate::plan::{CommandDelegate, PlanResolver, PlanningDelegate, WorkerPlan};
use crate::request::{ContentRequest, InputTranslation, PlanSignals, has_local_brand_refs};
use crate::worker::{WorkerContext, WorkerOutcome, WorkerRegistry};
use crate::workers::{CopyWorker, DesignWorker, GenerateWorker, QaCriticWorker, ResearchWorker};
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Final summary of one campaign run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunResult {
    pub run_id: String,
    pub created_at: DateTime<Utc>,
    pub request: ContentRequest,
    /// Free-text translation provenance; absent for flag-built requests.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub translation: Option<InputTranslation>,
    pub plan: WorkerPlan,
    pub trace: Vec<WorkerOutcome>,
    pub status: RunStatus,
    /// Path of the sealed document, once sealed.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artifact_ref: Option<PathBuf>,
    pub total_cost_usd: f64,
    pub duration_ms: u64,
}

/// Fresh unique run id, sortable by start time.
pub fn new_run_id() -> String {
    let stamp = Utc::now().format("%Y%m%d-%H%M%S");
    let suffix: String = uuid::Uuid::new_v4().simple().to_string()[..6].to_string();
    format!("run-{stamp}-{suffix}")
}

pub struct Orchestrator {
    config: MuseConfig,
    resolver: PlanResolver,
    engine: ExecutionEngine,
    store: ArtifactStore,
}

impl Orchestrator {
    /// Orchestrator with the built-in worker set and the configured
    /// planning delegate (if any).
    pub fn from_config(config: MuseConfig) -> Self {
        let registry = default_registry(&config);
        let delegate: Option<Box<dyn PlanningDelegate>> =
            CommandDelegate::from_config(&config.delegate)
                .map(|d| Box::new(d) as Box<dyn PlanningDelegate>);
        Self::new(config, registry, delegate)
    }

    pub fn new(
        config: MuseConfig,
        registry: WorkerRegistry,
        delegate: Option<Box<dyn PlanningDelegate>>,
    ) -> Self {
        let engine = ExecutionEngine::new(
            registry,
            config.engine.transient_retries,
            Duration::from_secs(config.engine.worker_deadline_secs),
        );
        let store = ArtifactStore::new(config.artifacts.root.clone());
        Self {
            config,
            resolver: PlanResolver::new(delegate),
            engine,
            store,
        }
    }

    pub fn store(&self) -> &ArtifactStore {
        &self.store
    }

    fn brand_dir(&self, brand: &str) -> PathBuf {
        self.config.brands.root.join(brand)
    }

    fn signals(&self, request: &ContentRequest) -> PlanSignals {
        let has_brand_refs = has_local_brand_refs(&self.brand_dir(&request.brand));
        PlanSignals::derive(request, &self.config.intent, has_brand_refs)
    }

    /// Resolve the plan for a request without executing anything.
    pub async fn preview_plan(&self, request: &ContentRequest) -> WorkerPlan {
        self.resolver.resolve(request, &self.signals(request)).await
    }

    /// Run a campaign to completion.
    pub async fn run_campaign(&self, request: ContentRequest) -> Result<RunResult> {
        let (_tx, rx) = watch::channel(false);
        self.run_inner(request, None, rx).await
    }

    /// Run a campaign built from free text, sealing the translation
    /// provenance into the run artifact.
    pub async fn run_translated_campaign(
        &self,
        request: ContentRequest,
        translation: InputTranslation,
    ) -> Result<RunResult> {
        let (_tx, rx) = watch::channel(false);
        self.run_inner(request, Some(translation), rx).await
    }

    /// Run a campaign with an external cancellation flag, checked between
    /// worker steps.
    pub async fn run_campaign_cancellable(
        &self,
        request: ContentRequest,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunResult> {
        self.run_inner(request, None, cancel).await
    }

    async fn run_inner(
        &self,
        request: ContentRequest,
        translation: Option<InputTranslation>,
        cancel: watch::Receiver<bool>,
    ) -> Result<RunResult> {
        let run_id = new_run_id();
        let created_at = Utc::now();
        let started = std::time::Instant::now();
        tracing::info!(run_id, brand = %request.brand, "starting campaign run");

        let plan = self.preview_plan(&request).await;
        let handle = self
            .store
            .open(&run_id)
            .await
            .context("failed to open artifact store for run")?;

        let ctx = WorkerContext::new(
            request.clone(),
            self.brand_dir(&request.brand),
            handle.dir().join("output"),
        );
        let report = self.engine.execute(&plan, ctx, cancel, &handle).await;

        // Workers that talk to paid backends report a `cost_usd` number in
        // their payload; the run total is their sum.
        let total_cost_usd: f64 = report
            .trace
            .iter()
            .filter(|o| o.success && !o.skipped)
            .filter_map(|o| o.payload.get("cost_usd").and_then(serde_json::Value::as_f64))
            .sum();

        let mut result = RunResult {
            run_id: run_id.clone(),
            created_at,
            request,
            translation,
            plan,
            trace: report.trace,
            status: report.status,
            artifact_ref: None,
            total_cost_usd,
            duration_ms: started.elapsed().as_millis() as u64,
        };
        let sealed = handle
            .seal(&result)
            .await
            .context("failed to seal run artifact")?;
        result.artifact_ref = Some(sealed);

        tracing::info!(run_id, status = ?result.status, duration_ms = result.duration_ms, "campaign run sealed");
        Ok(result)
    }
}

/// The built-in worker set wired from config.
pub fn default_registry(config: &MuseConfig) -> WorkerRegistry {
    let mut registry = WorkerRegistry::new();
    registry.register(Arc::new(ResearchWorker));
    registry.register(Arc::new(CopyWorker));
    registry.register(Arc::new(DesignWorker));
    registry.register(Arc::new(GenerateWorker::new(config.generate.clone())));
    registry.register(Arc::new(QaCriticWorker::new(config.generate.min_output_bytes)));
    registry
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::plan::{PlanMode, WorkerKind};

    fn config_in(dir: &std::path::Path) -> MuseConfig {
        let mut config = MuseConfig::default();
        config.artifacts.root = dir.join("artifacts");
        config.brands.root = dir.join("brands");
        config
    }

    #[test]
    fn run_ids_are_unique_and_prefixed() {
        let a = new_run_id();
        let b = new_run_id();
        assert!(a.starts_with("run-"));
        assert_ne!(a, b);
    }

    #[tokio::test]
    async fn plan_only_request_completes_without_generation() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(config_in(dir.path()));
        let mut request = ContentRequest::new("acme", "summer launch");
        request.build = false;

        let result = orchestrator.run_campaign(request).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.plan.mode, PlanMode::Fallback);
        assert!(!result.plan.will_run(WorkerKind::Generate));
        // research + copy ran; design/generate/qa were skips.
        let skips = result.trace.iter().filter(|o| o.skipped).count();
        assert_eq!(skips, 3);

        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["worker_plan"]["mode"], "fallback");
        assert_eq!(doc["result"]["status"], "completed");
    }

    #[tokio::test]
    async fn build_without_renderer_fails_but_still_seals() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(config_in(dir.path()));
        let request = ContentRequest::new("acme", "summer launch");

        let result = orchestrator.run_campaign(request).await.unwrap();
        // The built-in generate worker has no command configured.
        assert_eq!(result.status, RunStatus::Failed);
        assert!(result.artifact_ref.is_some());
        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["result"]["status"], "failed");
    }

    #[tokio::test]
    async fn translated_run_seals_input_translation() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(config_in(dir.path()));
        let intent = crate::config::IntentConfig::default();
        let (mut request, translation) =
            crate::request::translate_user_text("acme", "campaña de 2 dias sin texto", &intent, 1);
        request.build = false;

        let result = orchestrator
            .run_translated_campaign(request, translation)
            .await
            .unwrap();
        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["input_translation"]["source_text"], "campaña de 2 dias sin texto");
        assert_eq!(doc["input_translation"]["days"], 2);
        assert_eq!(doc["input_translation"]["include_text"], false);
        assert_eq!(doc["input_translation"]["reason"], "heuristic_lexicon");
    }

    #[tokio::test]
    async fn worker_cost_reports_are_summed() {
        use crate::worker::{Worker, WorkerContext, WorkerRegistry};
        use serde_json::{Value, json};

        struct CostWorker(crate::plan::WorkerKind, f64);

        #[async_trait::async_trait]
        impl Worker for CostWorker {
            fn kind(&self) -> crate::plan::WorkerKind {
                self.0
            }
            async fn run(&self, _ctx: &WorkerContext) -> Result<Value, crate::errors::WorkerError> {
                Ok(json!({"cost_usd": self.1}))
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let mut registry = WorkerRegistry::new();
        registry.register(Arc::new(CostWorker(WorkerKind::Research, 0.02)));
        registry.register(Arc::new(CostWorker(WorkerKind::Copy, 0.03)));
        let orchestrator = Orchestrator::new(config_in(dir.path()), registry, None);

        let mut request = ContentRequest::new("acme", "launch");
        request.build = false;
        let result = orchestrator.run_campaign(request).await.unwrap();
        assert!((result.total_cost_usd - 0.05).abs() < 1e-9);
        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert!((doc["result"]["total_cost_usd"].as_f64().unwrap() - 0.05).abs() < 1e-9);
    }

    #[tokio::test]
    async fn cancelled_flag_seals_as_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Orchestrator::from_config(config_in(dir.path()));
        let (tx, rx) = watch::channel(false);
        tx.send(true).unwrap();
        let result = orchestrator
            .run_campaign_cancellable(ContentRequest::new("acme", "launch"), rx)
            .await
            .unwrap();
        assert_eq!(result.status, RunStatus::Cancelled);
        assert!(result.trace.is_empty());
    }

    #[tokio::test]
    async fn preview_plan_reflects_brand_references() {
        let dir = tempfile::tempdir().unwrap();
        let config = config_in(dir.path());
        let refs = config.brands.root.join("acme/references");
        std::fs::create_dir_all(&refs).unwrap();
        std::fs::write(refs.join("style.jpg"), b"jpg").unwrap();

        let orchestrator = Orchestrator::from_config(config);
        let mut request = ContentRequest::new("acme", "summer launch");
        request.style_ref_present = true;
        let plan = orchestrator.preview_plan(&request).await;
        assert!(!plan.will_run(WorkerKind::Research));
    }
}
