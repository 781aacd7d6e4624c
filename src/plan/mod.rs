//! Worker plan resolution.
//!
//! A plan always carries exactly five steps in the fixed order
//! research → copy → design → generate → qa. `PlanResolver` is infallible:
//! the deterministic rules always produce a plan, and an optional planning
//! delegate can only refine it — delegate failures degrade silently to the
//! rules.

pub mod delegate;

use crate::request::{ContentRequest, PlanSignals};
use serde::{Deserialize, Serialize};

pub use delegate::{CommandDelegate, PlanningDelegate, ProposedStep};

/// The five worker stages, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WorkerKind {
    Research,
    Copy,
    Design,
    Generate,
    Qa,
}

impl WorkerKind {
    /// All kinds in execution order.
    pub const ORDERED: [WorkerKind; 5] = [
        WorkerKind::Research,
        WorkerKind::Copy,
        WorkerKind::Design,
        WorkerKind::Generate,
        WorkerKind::Qa,
    ];

    /// Fixed position in the execution order.
    pub fn order_index(&self) -> usize {
        match self {
            WorkerKind::Research => 0,
            WorkerKind::Copy => 1,
            WorkerKind::Design => 2,
            WorkerKind::Generate => 3,
            WorkerKind::Qa => 4,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            WorkerKind::Research => "research",
            WorkerKind::Copy => "copy",
            WorkerKind::Design => "design",
            WorkerKind::Generate => "generate",
            WorkerKind::Qa => "qa",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        match name {
            "research" => Some(WorkerKind::Research),
            "copy" => Some(WorkerKind::Copy),
            "design" => Some(WorkerKind::Design),
            "generate" => Some(WorkerKind::Generate),
            "qa" => Some(WorkerKind::Qa),
            _ => None,
        }
    }
}

impl std::fmt::Display for WorkerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the final plan was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanMode {
    /// Delegate proposal accepted without repair.
    #[serde(rename = "llm")]
    Llm,
    /// Delegate proposal needed filling or constraint overrides.
    #[serde(rename = "fallback-repaired")]
    FallbackRepaired,
    /// Deterministic rules only (delegate absent or failed).
    #[serde(rename = "fallback")]
    Fallback,
}

/// One planned stage: run or skip, with the rule (or delegate reason) that
/// decided it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStep {
    pub kind: WorkerKind,
    pub will_run: bool,
    pub reason: String,
}

/// The resolved plan. Immutable once returned by the resolver.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPlan {
    /// Exactly five steps, ordered research → copy → design → generate → qa.
    pub steps: Vec<WorkerStep>,
    pub mode: PlanMode,
    /// Overall planning rationale (delegate's, or the fallback marker).
    pub reason: String,
}

impl WorkerPlan {
    pub fn step(&self, kind: WorkerKind) -> &WorkerStep {
        &self.steps[kind.order_index()]
    }

    pub fn will_run(&self, kind: WorkerKind) -> bool {
        self.step(kind).will_run
    }

    /// Names of the steps that will run, in order.
    pub fn sequence(&self) -> Vec<&'static str> {
        self.steps
            .iter()
            .filter(|s| s.will_run)
            .map(|s| s.kind.as_str())
            .collect()
    }
}

/// Deterministic fallback rules. Always succeeds.
pub fn fallback_plan(request: &ContentRequest, signals: &PlanSignals) -> WorkerPlan {
    let research_run = (!signals.has_style_ref && !signals.has_brand_refs) || signals.asks_trends;
    let copy_run = request.include_text;
    let design_run = request.build;
    let generate_run = request.build;
    let qa_run = request.build && request.max_retries > 0;

    let research_reason = if research_run && !signals.asks_trends {
        "missing style references"
    } else if research_run {
        "trend request"
    } else {
        "style references available"
    };

    WorkerPlan {
        steps: vec![
            WorkerStep {
                kind: WorkerKind::Research,
                will_run: research_run,
                reason: research_reason.to_string(),
            },
            WorkerStep {
                kind: WorkerKind::Copy,
                will_run: copy_run,
                reason: if copy_run { "include_text=true" } else { "include_text=false" }
                    .to_string(),
            },
            WorkerStep {
                kind: WorkerKind::Design,
                will_run: design_run,
                reason: if design_run { "build=true" } else { "build=false" }.to_string(),
            },
            WorkerStep {
                kind: WorkerKind::Generate,
                will_run: generate_run,
                reason: if generate_run { "build=true" } else { "build=false" }.to_string(),
            },
            WorkerStep {
                kind: WorkerKind::Qa,
                will_run: qa_run,
                reason: if qa_run {
                    "max_retries>0"
                } else {
                    "max_retries=0 or build=false"
                }
                .to_string(),
            },
        ],
        mode: PlanMode::Fallback,
        reason: "fallback_policy".to_string(),
    }
}

/// Resolves worker plans, optionally consulting a planning delegate.
pub struct PlanResolver {
    delegate: Option<Box<dyn PlanningDelegate>>,
}

impl PlanResolver {
    pub fn new(delegate: Option<Box<dyn PlanningDelegate>>) -> Self {
        Self { delegate }
    }

    /// Rules-only resolver.
    pub fn deterministic() -> Self {
        Self { delegate: None }
    }

    /// Resolve a plan. Never fails: delegate errors degrade to the
    /// deterministic rules and are tagged `fallback`.
    pub async fn resolve(&self, request: &ContentRequest, signals: &PlanSignals) -> WorkerPlan {
        let baseline = fallback_plan(request, signals);

        let Some(delegate) = &self.delegate else {
            return baseline;
        };

        match delegate.propose_plan(request, signals).await {
            Ok(proposal) => merge_proposal(request, baseline, &proposal),
            Err(e) => {
                eprintln!("[planner] delegate failed, using deterministic plan: {e}");
                baseline
            }
        }
    }
}

/// Overlay a delegate proposal onto the rule baseline, re-enforcing the
/// hard constraints. Any filled step or constraint override downgrades the
/// mode from `llm` to `fallback-repaired`.
fn merge_proposal(
    request: &ContentRequest,
    baseline: WorkerPlan,
    proposal: &delegate::PlanProposal,
) -> WorkerPlan {
    let mut steps = baseline.steps;
    let mut repaired = false;

    for kind in WorkerKind::ORDERED {
        let proposed = proposal
            .workers
            .iter()
            .find(|w| WorkerKind::from_name(&w.name) == Some(kind));
        match proposed {
            Some(step) => {
                let slot = &mut steps[kind.order_index()];
                slot.will_run = step.run;
                if !step.reason.trim().is_empty() {
                    slot.reason = step.reason.trim().to_string();
                }
            }
            None => repaired = true, // baseline rule fills the gap
        }
    }

    // Hard constraints always win over the delegate.
    let mut enforce = |kind: WorkerKind, value: bool| {
        let slot = &mut steps[kind.order_index()];
        if slot.will_run != value {
            slot.will_run = value;
            repaired = true;
        }
    };
    if !request.build {
        enforce(WorkerKind::Generate, false);
        enforce(WorkerKind::Qa, false);
    } else {
        enforce(WorkerKind::Generate, true);
    }
    if !request.include_text {
        enforce(WorkerKind::Copy, false);
    }
    if request.max_retries == 0 {
        enforce(WorkerKind::Qa, false);
    }

    WorkerPlan {
        steps,
        mode: if repaired { PlanMode::FallbackRepaired } else { PlanMode::Llm },
        reason: if proposal.reason.trim().is_empty() {
            "llm_worker_plan".to_string()
        } else {
            proposal.reason.trim().to_string()
        },
    }
}
