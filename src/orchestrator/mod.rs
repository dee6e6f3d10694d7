//! Workflow orchestration
//!
//! The engine that drives one issue fix from `IDLE` to a terminal state,
//! plus the queue machinery that runs many such fixes concurrently:
//!
//! - [`state`] / [`machine`]: the state graph and the guarded,
//!   observable state machine that walks it
//! - [`coordinator`]: one async stage handler per operational state
//! - [`recovery`]: error classification and the retry budget
//! - [`workflow`]: the orchestrator tying the three together
//! - [`queue`] / [`store`] / [`scheduler`]: priority queue, atomic JSON
//!   persistence, and the polling scheduler with crash recovery
//! - [`handlers`]: the production stage handlers (GitHub, Gemini, patch,
//!   build/test commands)

pub mod coordinator;
pub mod data;
pub mod handlers;
pub mod machine;
pub mod queue;
pub mod recovery;
pub mod scheduler;
pub mod state;
pub mod store;
pub mod workflow;

pub use coordinator::{StageCoordinator, StageHandler};
pub use data::{StageOutput, WorkflowData, WorkflowInput, WorkflowResult, WorkflowStatus};
pub use machine::StateMachine;
pub use queue::{QueueStats, Task, TaskQueue, TaskStatus};
pub use recovery::{ErrorClassification, ErrorKind, RecoveryManager};
pub use scheduler::{OrchestratorFactory, SchedulerOptions, SchedulerStatus, TaskScheduler};
pub use state::{State, Trigger};
pub use store::QueueStore;
pub use workflow::{CancelHandle, WorkflowOptions, WorkflowOrchestrator};
