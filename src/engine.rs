//! Sequential plan execution.
//!
//! One engine instance executes one plan at a time; independent runs use
//! independent contexts and trace sinks, so nothing here is shared across
//! runs. Steps run strictly in plan order, each invocation carries a
//! deadline, transient failures are retried up to a fixed bound, and the
//! quality loop re-invokes generation at most `max_retries` times before
//! settling for a degraded success.

use crate::errors::{StoreError, WorkerError};
use crate::plan::{WorkerKind, WorkerPlan};
use crate::worker::{QaVerdict, Worker, WorkerContext, WorkerOutcome, WorkerRegistry};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::Instant;

/// Terminal state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    /// Every planned step succeeded (quality check included, if planned).
    Completed,
    /// The run finished but a non-essential step failed or the quality
    /// retry allowance was exhausted.
    DegradedSuccess,
    Failed,
    Cancelled,
}

/// Everything the engine learned about one run.
#[derive(Debug)]
pub struct ExecutionReport {
    pub status: RunStatus,
    pub trace: Vec<WorkerOutcome>,
    /// Final accumulated context (step outputs, last quality feedback).
    pub context: WorkerContext,
    /// Last quality verdict observed, if the quality step ran.
    pub last_verdict: Option<QaVerdict>,
}

/// Receives each outcome as it is recorded, for durable trace appends.
#[async_trait::async_trait]
pub trait TraceSink: Send + Sync {
    async fn append(&self, outcome: &WorkerOutcome) -> Result<(), StoreError>;
}

/// A sink that drops outcomes, for plan-preview and test paths.
pub struct NullSink;

#[async_trait::async_trait]
impl TraceSink for NullSink {
    async fn append(&self, _outcome: &WorkerOutcome) -> Result<(), StoreError> {
        Ok(())
    }
}

const TRANSIENT_BACKOFF: Duration = Duration::from_millis(250);

pub struct ExecutionEngine {
    registry: WorkerRegistry,
    transient_retries: u32,
    worker_deadline: Duration,
}

/// Where the quality loop goes after one generate+evaluate pass.
enum QaTransition {
    Accept(QaVerdict),
    Retry(QaVerdict),
    Exhausted(QaVerdict),
}

impl ExecutionEngine {
    pub fn new(registry: WorkerRegistry, transient_retries: u32, worker_deadline: Duration) -> Self {
        Self {
            registry,
            transient_retries,
            worker_deadline,
        }
    }

    /// Execute `plan` to completion, recording every attempt and skip in
    /// order. Cancellation is checked between steps and between quality
    /// passes; an in-flight worker call is never preempted, only bounded
    /// by its deadline.
    pub async fn execute(
        &self,
        plan: &WorkerPlan,
        mut ctx: WorkerContext,
        cancel: watch::Receiver<bool>,
        sink: &dyn TraceSink,
    ) -> ExecutionReport {
        let mut trace: Vec<WorkerOutcome> = Vec::new();
        let mut attempts: HashMap<WorkerKind, u32> = HashMap::new();
        let mut degraded = false;
        let mut last_verdict: Option<QaVerdict> = None;

        let qa_planned = plan.will_run(WorkerKind::Qa);

        for kind in WorkerKind::ORDERED {
            if *cancel.borrow() {
                return ExecutionReport {
                    status: RunStatus::Cancelled,
                    trace,
                    context: ctx,
                    last_verdict,
                };
            }

            let step = plan.step(kind);
            if !step.will_run {
                let outcome = WorkerOutcome::skipped(kind, step.reason.clone());
                record(sink, &mut trace, outcome).await;
                continue;
            }

            // Generate and qa are driven together by the quality loop.
            if kind == WorkerKind::Qa && qa_planned {
                continue;
            }
            if kind == WorkerKind::Generate && qa_planned {
                match self
                    .quality_loop(&mut ctx, &mut trace, &mut attempts, &cancel, sink)
                    .await
                {
                    Ok(QaTransition::Accept(verdict)) => {
                        last_verdict = Some(verdict);
                    }
                    Ok(QaTransition::Exhausted(verdict)) => {
                        last_verdict = Some(verdict);
                        degraded = true;
                    }
                    Ok(QaTransition::Retry(_)) => unreachable!("retry is loop-internal"),
                    Err(status) => {
                        return ExecutionReport {
                            status,
                            trace,
                            context: ctx,
                            last_verdict,
                        };
                    }
                }
                continue;
            }

            match self.invoke(kind, &ctx, &mut trace, &mut attempts, sink).await {
                Ok(payload) => ctx.insert_output(kind, payload),
                Err(err) if matches!(err, WorkerError::Fatal { .. }) => {
                    return ExecutionReport {
                        status: RunStatus::Failed,
                        trace,
                        context: ctx,
                        last_verdict,
                    };
                }
                Err(_) => {
                    // Generation is the step everything downstream depends
                    // on; anything earlier just degrades the run.
                    if kind == WorkerKind::Generate {
                        return ExecutionReport {
                            status: RunStatus::Failed,
                            trace,
                            context: ctx,
                            last_verdict,
                        };
                    }
                    degraded = true;
                }
            }
        }

        let status = if degraded {
            RunStatus::DegradedSuccess
        } else {
            RunStatus::Completed
        };
        ExecutionReport {
            status,
            trace,
            context: ctx,
            last_verdict,
        }
    }

    /// Generate → Evaluate → {Accept, Retry, Exhausted}. At most
    /// `max_retries` re-generations beyond the first pass; worker errors
    /// escape as a terminal run status.
    async fn quality_loop(
        &self,
        ctx: &mut WorkerContext,
        trace: &mut Vec<WorkerOutcome>,
        attempts: &mut HashMap<WorkerKind, u32>,
        cancel: &watch::Receiver<bool>,
        sink: &dyn TraceSink,
    ) -> Result<QaTransition, RunStatus> {
        let max_attempts = ctx.request.max_retries.saturating_add(1);

        for pass in 1..=max_attempts {
            if *cancel.borrow() {
                return Err(RunStatus::Cancelled);
            }
            let payload = self
                .invoke(WorkerKind::Generate, ctx, trace, attempts, sink)
                .await
                .map_err(|_| RunStatus::Failed)?;
            ctx.insert_output(WorkerKind::Generate, payload);

            let verdict = match self
                .invoke(WorkerKind::Qa, ctx, trace, attempts, sink)
                .await
            {
                Ok(payload) => QaVerdict::from_payload(&payload),
                Err(err) if matches!(err, WorkerError::Fatal { .. }) => {
                    return Err(RunStatus::Failed);
                }
                // An unanswerable quality check degrades rather than loops.
                Err(_) => {
                    return Ok(QaTransition::Exhausted(QaVerdict::failed(
                        "invalid_verdict",
                        Value::Null,
                    )));
                }
            };

            if verdict.ok {
                return Ok(QaTransition::Accept(verdict));
            }
            if pass < max_attempts {
                tracing::debug!(reason = %verdict.reason, pass, "quality check failed, retrying generation");
                ctx.merge_qa_feedback(verdict.to_value());
                continue;
            }
            return Ok(QaTransition::Exhausted(verdict));
        }
        unreachable!("quality loop always returns within max_attempts")
    }

    /// One logical invocation: deadline per attempt, transient errors
    /// retried up to the engine bound, every attempt traced.
    async fn invoke(
        &self,
        kind: WorkerKind,
        ctx: &WorkerContext,
        trace: &mut Vec<WorkerOutcome>,
        attempts: &mut HashMap<WorkerKind, u32>,
        sink: &dyn TraceSink,
    ) -> Result<Value, WorkerError> {
        let Some(worker) = self.registry.get(kind) else {
            let err = WorkerError::fatal(format!("no worker registered for '{kind}'"));
            let attempt = next_attempt(attempts, kind);
            record(sink, trace, WorkerOutcome::failed(kind, attempt, &err, 0)).await;
            return Err(err);
        };

        let mut remaining = self.transient_retries;
        loop {
            let attempt = next_attempt(attempts, kind);
            let started = Instant::now();
            let result = self.attempt(worker.clone(), ctx).await;
            let duration_ms = started.elapsed().as_millis() as u64;

            match result {
                Ok(payload) => {
                    record(
                        sink,
                        trace,
                        WorkerOutcome::succeeded(kind, attempt, payload.clone(), duration_ms),
                    )
                    .await;
                    return Ok(payload);
                }
                Err(err) => {
                    record(sink, trace, WorkerOutcome::failed(kind, attempt, &err, duration_ms))
                        .await;
                    if err.is_transient() && remaining > 0 {
                        remaining -= 1;
                        tracing::warn!(worker = %kind, error = %err, remaining, "transient worker failure, retrying");
                        tokio::time::sleep(TRANSIENT_BACKOFF).await;
                        continue;
                    }
                    return Err(err);
                }
            }
        }
    }

    async fn attempt(
        &self,
        worker: Arc<dyn Worker>,
        ctx: &WorkerContext,
    ) -> Result<Value, WorkerError> {
        match tokio::time::timeout(self.worker_deadline, worker.run(ctx)).await {
            Ok(result) => result,
            Err(_) => Err(WorkerError::DeadlineExceeded {
                seconds: self.worker_deadline.as_secs(),
            }),
        }
    }
}

fn next_attempt(attempts: &mut HashMap<WorkerKind, u32>, kind: WorkerKind) -> u32 {
    let counter = attempts.entry(kind).or_insert(0);
    *counter += 1;
    *counter
}

async fn record(sink: &dyn TraceSink, trace: &mut Vec<WorkerOutcome>, outcome: WorkerOutcome) {
    if let Err(e) = sink.append(&outcome).await {
        tracing::warn!(error = %e, "failed to persist trace entry");
    }
    trace.push(outcome);
}
