//! Muse: content-campaign orchestration.
//!
//! The core loop: resolve a worker plan for a request (deterministic rules
//! with an optional planning delegate), execute it sequentially through
//! the uniform worker contract with a bounded quality-retry state machine,
//! and seal every run into a durable artifact. A small server exposes the
//! same orchestrator over REST and a session-bounded real-time channel.

pub mod artifact;
pub mod config;
pub mod engine;
pub mod errors;
pub mod orchestrator;
pub mod plan;
pub mod ratelimit;
pub mod request;
pub mod server;
pub mod worker;
pub mod workers;

pub use config::MuseConfig;
pub use engine::{ExecutionEngine, RunStatus};
pub use errors::{AdmissionError, StoreError, WorkerError};
pub use orchestrator::{Orchestrator, RunResult};
pub use plan::{PlanMode, PlanResolver, WorkerKind, WorkerPlan};
pub use request::ContentRequest;
