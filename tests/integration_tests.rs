//! Integration tests for Muse
//!
//! Cross-module scenarios: CLI smoke tests, full campaign runs with mock
//! workers, bounded session/rate behavior, and the REST surface.

use assert_cmd::Command;
use assert_cmd::cargo::cargo_bin_cmd;
use predicates::prelude::*;
use tempfile::TempDir;

/// Helper to create a muse Command
fn muse_cmd() -> Command {
    cargo_bin_cmd!("muse")
}

fn create_temp_project() -> TempDir {
    TempDir::new().unwrap()
}

// =============================================================================
// Basic CLI Tests
// =============================================================================

mod cli_basics {
    use super::*;

    #[test]
    fn test_muse_help() {
        muse_cmd().arg("--help").assert().success();
    }

    #[test]
    fn test_muse_version() {
        muse_cmd().arg("--version").assert().success();
    }

    #[test]
    fn test_plan_command_prints_decisions() {
        let dir = create_temp_project();
        muse_cmd()
            .current_dir(dir.path())
            .args(["plan", "--brand", "acme", "--objective", "summer launch"])
            .assert()
            .success()
            .stdout(predicate::str::contains("research: run"))
            .stdout(predicate::str::contains("missing style references"));
    }

    #[test]
    fn test_plan_no_build_skips_generation() {
        let dir = create_temp_project();
        muse_cmd()
            .current_dir(dir.path())
            .args([
                "plan",
                "--brand",
                "acme",
                "--objective",
                "summer launch",
                "--no-build",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("generate: skip (build=false)"))
            .stdout(predicate::str::contains("qa: skip"));
    }

    #[test]
    fn test_run_plan_only_seals_artifact() {
        let dir = create_temp_project();
        muse_cmd()
            .current_dir(dir.path())
            .args([
                "run",
                "--brand",
                "acme",
                "--objective",
                "summer launch",
                "--no-build",
            ])
            .assert()
            .success()
            .stdout(predicate::str::contains("finished: Completed"))
            .stdout(predicate::str::contains("artifact:"));

        let artifacts = dir.path().join("artifacts");
        let runs: Vec<_> = std::fs::read_dir(&artifacts).unwrap().collect();
        assert_eq!(runs.len(), 1);
        let run_dir = runs[0].as_ref().unwrap().path();
        assert!(run_dir.join("artifacts.json").exists());
        assert!(run_dir.join("report.md").exists());
        assert!(run_dir.join("trace.jsonl").exists());
    }
}

// =============================================================================
// Campaign execution scenarios
// =============================================================================

mod campaign_runs {
    use muse::config::MuseConfig;
    use muse::engine::RunStatus;
    use muse::errors::WorkerError;
    use muse::orchestrator::Orchestrator;
    use muse::plan::{PlanMode, WorkerKind};
    use muse::request::ContentRequest;
    use muse::worker::{QaVerdict, Worker, WorkerContext, WorkerRegistry};
    use serde_json::{Value, json};
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct OkWorker(WorkerKind);

    #[async_trait::async_trait]
    impl Worker for OkWorker {
        fn kind(&self) -> WorkerKind {
            self.0
        }
        async fn run(&self, _ctx: &WorkerContext) -> Result<Value, WorkerError> {
            Ok(json!({"worker": self.0.as_str()}))
        }
    }

    /// Quality critic that fails the first `failures` evaluations.
    struct CountingQa {
        failures: AtomicU32,
    }

    #[async_trait::async_trait]
    impl Worker for CountingQa {
        fn kind(&self) -> WorkerKind {
            WorkerKind::Qa
        }
        async fn run(&self, _ctx: &WorkerContext) -> Result<Value, WorkerError> {
            let remaining = self.failures.fetch_update(
                Ordering::SeqCst,
                Ordering::SeqCst,
                |n| n.checked_sub(1),
            );
            if remaining.is_ok() {
                Ok(QaVerdict::failed("suspicious_small_image", Value::Null).to_value())
            } else {
                Ok(QaVerdict::passed().to_value())
            }
        }
    }

    fn mock_registry(qa_failures: u32) -> WorkerRegistry {
        let mut registry = WorkerRegistry::new();
        for kind in [
            WorkerKind::Research,
            WorkerKind::Copy,
            WorkerKind::Design,
            WorkerKind::Generate,
        ] {
            registry.register(Arc::new(OkWorker(kind)));
        }
        registry.register(Arc::new(CountingQa {
            failures: AtomicU32::new(qa_failures),
        }));
        registry
    }

    fn orchestrator(dir: &std::path::Path, qa_failures: u32) -> Orchestrator {
        let mut config = MuseConfig::default();
        config.artifacts.root = dir.join("artifacts");
        config.brands.root = dir.join("brands");
        Orchestrator::new(config, mock_registry(qa_failures), None)
    }

    /// `{build:true, includeText:false, maxRetries:1, styleRef:true}` yields
    /// `[research:skip, copy:skip, design, generate, qa]`, and one failed
    /// quality pass shows generate invoked twice in the trace.
    #[tokio::test]
    async fn qa_retry_scenario_traces_two_generate_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), 1);

        let mut request = ContentRequest::new("acme", "summer launch");
        request.include_text = false;
        request.max_retries = 1;
        request.style_ref_present = true;
        // Brand references exist, so research is skipped too.
        let refs = dir.path().join("brands/acme/references");
        std::fs::create_dir_all(&refs).unwrap();
        std::fs::write(refs.join("style.png"), b"png").unwrap();

        let result = orchestrator.run_campaign(request).await.unwrap();
        assert_eq!(result.status, RunStatus::Completed);
        assert_eq!(result.plan.sequence(), vec!["design", "generate", "qa"]);

        let generate_attempts = result
            .trace
            .iter()
            .filter(|o| o.kind == WorkerKind::Generate && !o.skipped)
            .count();
        assert_eq!(generate_attempts, 2);
        let qa_attempts = result
            .trace
            .iter()
            .filter(|o| o.kind == WorkerKind::Qa && !o.skipped)
            .count();
        assert_eq!(qa_attempts, 2);
    }

    #[tokio::test]
    async fn qa_exhaustion_seals_degraded_success() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), 99);
        let mut request = ContentRequest::new("acme", "summer launch");
        request.max_retries = 2;

        let result = orchestrator.run_campaign(request).await.unwrap();
        assert_eq!(result.status, RunStatus::DegradedSuccess);
        // First pass plus two retries.
        let generate_attempts = result
            .trace
            .iter()
            .filter(|o| o.kind == WorkerKind::Generate && !o.skipped)
            .count();
        assert_eq!(generate_attempts, 3);

        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(doc["result"]["status"], "degraded_success");
    }

    #[tokio::test]
    async fn trace_file_matches_sealed_trace() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), 0);
        let result = orchestrator
            .run_campaign(ContentRequest::new("acme", "launch"))
            .await
            .unwrap();

        let run_dir = dir.path().join("artifacts").join(&result.run_id);
        let trace_file = std::fs::read_to_string(run_dir.join("trace.jsonl")).unwrap();
        assert_eq!(trace_file.lines().count(), result.trace.len());

        let doc = orchestrator
            .store()
            .read_sealed(&result.run_id)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(
            doc["orchestration_trace"].as_array().unwrap().len(),
            result.trace.len()
        );
        assert_eq!(doc["worker_plan"]["mode"], "fallback");
    }

    #[tokio::test]
    async fn concurrent_runs_do_not_interleave_artifacts() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = Arc::new(orchestrator(dir.path(), 0));

        let mut handles = Vec::new();
        for i in 0..5 {
            let orchestrator = orchestrator.clone();
            handles.push(tokio::spawn(async move {
                orchestrator
                    .run_campaign(ContentRequest::new("acme", format!("campaign {i}")))
                    .await
                    .unwrap()
            }));
        }
        let mut run_ids = Vec::new();
        for handle in handles {
            let result = handle.await.unwrap();
            assert_eq!(result.status, RunStatus::Completed);
            run_ids.push(result.run_id);
        }
        run_ids.sort();
        run_ids.dedup();
        assert_eq!(run_ids.len(), 5);
        for run_id in &run_ids {
            let doc = orchestrator.store().read_sealed(run_id).await.unwrap().unwrap();
            assert_eq!(doc["run_id"], run_id.as_str());
        }
    }

    #[tokio::test]
    async fn plan_properties_hold_across_requests() {
        let dir = tempfile::tempdir().unwrap();
        let orchestrator = orchestrator(dir.path(), 0);

        // build=false: generate and qa never run.
        let mut request = ContentRequest::new("acme", "launch");
        request.build = false;
        let plan = orchestrator.preview_plan(&request).await;
        assert!(!plan.will_run(WorkerKind::Generate));
        assert!(!plan.will_run(WorkerKind::Qa));
        assert_eq!(plan.mode, PlanMode::Fallback);

        // build=true, max_retries=0: qa never runs.
        let mut request = ContentRequest::new("acme", "launch");
        request.max_retries = 0;
        let plan = orchestrator.preview_plan(&request).await;
        assert!(plan.will_run(WorkerKind::Generate));
        assert!(!plan.will_run(WorkerKind::Qa));
    }
}

// =============================================================================
// Session and rate bounds
// =============================================================================

mod resource_bounds {
    use muse::ratelimit::RateLimiter;
    use muse::server::session::{ChatEntry, SessionRegistry};
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn registry_never_exceeds_capacity_under_churn() {
        let registry = SessionRegistry::new(5, 80, Duration::from_secs(60));
        for i in 0..50 {
            let (tx, _rx) = mpsc::unbounded_channel();
            registry.admit(&format!("session-{i}"), tx).await.unwrap();
            assert!(registry.len().await <= 5);
        }
        assert_eq!(registry.len().await, 5);
        // The most recent sessions survived.
        assert!(registry.get("session-49").await.is_some());
        assert!(registry.get("session-0").await.is_none());
    }

    #[tokio::test]
    async fn history_bounded_at_cap_regardless_of_volume() {
        let registry = SessionRegistry::new(5, 80, Duration::from_secs(60));
        let (tx, _rx) = mpsc::unbounded_channel();
        registry.admit("s", tx).await.unwrap();
        for i in 0..500 {
            registry.record("s", ChatEntry::new("user", format!("m{i}"))).await;
        }
        let history = registry.get("s").await.unwrap().history().await;
        assert_eq!(history.len(), 80);
        assert_eq!(history[0].content, "m420");
        assert_eq!(history[79].content, "m499");
    }

    /// 31 messages in a minute against a 30/minute limit: the 31st is
    /// rejected; 60+ seconds after the first, a new one is admitted.
    #[tokio::test(start_paused = true)]
    async fn message_limit_scenario() {
        let limiter = RateLimiter::per_minute(30);
        for _ in 0..30 {
            assert!(limiter.check("conn-1").await);
            tokio::time::advance(Duration::from_millis(100)).await;
        }
        assert!(!limiter.check("conn-1").await);

        tokio::time::advance(Duration::from_secs(60)).await;
        assert!(limiter.check("conn-1").await);
    }
}

// =============================================================================
// REST surface
// =============================================================================

mod rest_api {
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use http_body_util::BodyExt;
    use muse::config::MuseConfig;
    use muse::server::{AppState, build_router};
    use serde_json::Value;
    use tower::ServiceExt;

    fn app(dir: &std::path::Path) -> axum::Router {
        let mut config = MuseConfig::default();
        config.artifacts.root = dir.join("artifacts");
        config.brands.root = dir.join("brands");
        build_router(AppState::from_config(config))
    }

    #[tokio::test]
    async fn campaign_endpoint_returns_plan_and_run_id() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/campaigns")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"brand":"acme","objective":"3 dias sin texto","build":false}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        let sequence: Vec<&str> = body["plan"]["sequence"]
            .as_array()
            .unwrap()
            .iter()
            .map(|v| v.as_str().unwrap())
            .collect();
        // The REST body carries explicit flags; free-text intent inference
        // only applies on the chat path, so copy still runs here.
        assert!(sequence.contains(&"research"));
        assert_eq!(body["status"], "completed");
    }

    #[tokio::test]
    async fn unknown_run_is_a_clean_404() {
        let dir = tempfile::tempdir().unwrap();
        let response = app(dir.path())
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/api/runs/run-00000000-000000-ffffff")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body: Value = serde_json::from_slice(&bytes).unwrap();
        assert!(body["error"].as_str().unwrap().contains("not found"));
    }
}
