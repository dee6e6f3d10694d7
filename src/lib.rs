//! Mend: autonomous issue fixing
//!
//! A tight Rust binary that takes a GitHub issue and drives it through a
//! fixed pipeline of stages (analyze, search, plan, generate, apply,
//! build, test, review, submit) with durable state, bounded concurrency,
//! and automatic recovery from transient failures and process restarts.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────┐
//! │            Task Scheduler                │
//! │  poll → dequeue → run (≤ maxConcurrent)  │
//! └────────────────────┬─────────────────────┘
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │         Workflow Orchestrator            │
//! │   state machine + stage coordinator      │
//! │   + recovery manager (classify/retry)    │
//! └────────────────────┬─────────────────────┘
//!                      ▼
//! ┌──────────────────────────────────────────┐
//! │  Stage handlers (external collaborators) │
//! │  GitHub · Gemini · ripgrep · patch · sh  │
//! └──────────────────────────────────────────┘
//! ```
//!
//! The task queue is the single in-memory source of truth; the queue store
//! mirrors it to `.mend/queue.json` with atomic write-then-rename so a
//! restarted scheduler can pick up where the previous process died.

pub mod agents;
pub mod config;
pub mod gemini;
pub mod github;
pub mod observe;
pub mod orchestrator;
pub mod patch;
pub mod search;

// Re-exports for convenience
pub use config::Config;
pub use gemini::GeminiClient;
pub use github::GitHubClient;
pub use observe::{Monitor, TracingMonitor};
pub use orchestrator::{
    QueueStore, RecoveryManager, StageCoordinator, StateMachine, TaskQueue, TaskScheduler,
    WorkflowInput, WorkflowOrchestrator, WorkflowResult, WorkflowStatus,
};

use orchestrator::state::{State, Trigger};

/// Crate-level error type
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("GitHub error: {0}")]
    Github(String),

    #[error("Gemini error: {0}")]
    Gemini(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("Timed out: {0}")]
    Timeout(String),

    #[error("Unusable model output: {0}")]
    ModelOutput(String),

    #[error("Missing workflow context: {0}")]
    MissingContext(&'static str),

    #[error("Illegal transition: {trigger} from {state}")]
    IllegalTransition { state: State, trigger: Trigger },

    #[error("Patch error: {0}")]
    Patch(String),

    #[error("Command error: {0}")]
    Command(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML error: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
}

impl Error {
    /// Stable machine-readable code, surfaced on `WorkflowResult.error`.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Config(_) => "CONFIG",
            Error::Github(_) => "GITHUB",
            Error::Gemini(_) => "GEMINI",
            Error::RateLimited(_) => "RATE_LIMITED",
            Error::Timeout(_) => "TIMEOUT",
            Error::ModelOutput(_) => "MODEL_OUTPUT",
            Error::MissingContext(_) => "MISSING_CONTEXT",
            Error::IllegalTransition { .. } => "ILLEGAL_TRANSITION",
            Error::Patch(_) => "PATCH",
            Error::Command(_) => "COMMAND",
            Error::Io(_) => "IO",
            Error::Json(_) => "JSON",
            Error::Toml(_) => "TOML",
            Error::Http(_) => "HTTP",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
