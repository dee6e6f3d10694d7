//! Workflow states and triggers
//!
//! The state graph is a fixed, closed set: ten core progression states plus
//! three control states. `DONE` and `CANCELLED` are terminal; `IDLE` is the
//! only initial state. Triggers are the events the state machine consumes
//! to select the next state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// A workflow state.
///
/// Core states form the fix pipeline; `PAUSED`, `ERROR` and `CANCELLED`
/// are control states reachable only through control triggers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum State {
    Idle,
    Analyzing,
    Searching,
    Planning,
    Generating,
    Applying,
    Building,
    Testing,
    Reviewing,
    Submitting,
    Done,
    Paused,
    Error,
    Cancelled,
}

/// The nine states that carry a registered stage handler.
pub const OPERATIONAL_STATES: [State; 9] = [
    State::Analyzing,
    State::Searching,
    State::Planning,
    State::Generating,
    State::Applying,
    State::Building,
    State::Testing,
    State::Reviewing,
    State::Submitting,
];

impl State {
    /// Terminal states have no outgoing triggers.
    pub fn is_terminal(&self) -> bool {
        matches!(self, State::Done | State::Cancelled)
    }

    /// Whether this state executes a stage handler.
    pub fn is_operational(&self) -> bool {
        OPERATIONAL_STATES.contains(self)
    }
}

impl fmt::Display for State {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            State::Idle => "IDLE",
            State::Analyzing => "ANALYZING",
            State::Searching => "SEARCHING",
            State::Planning => "PLANNING",
            State::Generating => "GENERATING",
            State::Applying => "APPLYING",
            State::Building => "BUILDING",
            State::Testing => "TESTING",
            State::Reviewing => "REVIEWING",
            State::Submitting => "SUBMITTING",
            State::Done => "DONE",
            State::Paused => "PAUSED",
            State::Error => "ERROR",
            State::Cancelled => "CANCELLED",
        };
        f.write_str(name)
    }
}

/// An event the state machine consumes.
///
/// Success triggers are emitted by the orchestrator after a stage handler
/// completes; control triggers come from control input (cancel flag,
/// recovery decisions, pause/resume).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Trigger {
    AnalysisOk,
    SearchOk,
    PlanOk,
    GenerationOk,
    ApplyOk,
    BuildOk,
    TestOk,
    ReviewOk,
    SubmitOk,
    Pause,
    Resume,
    Cancel,
    Fail,
    Retry,
}

impl fmt::Display for Trigger {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Trigger::AnalysisOk => "ANALYSIS_OK",
            Trigger::SearchOk => "SEARCH_OK",
            Trigger::PlanOk => "PLAN_OK",
            Trigger::GenerationOk => "GENERATION_OK",
            Trigger::ApplyOk => "APPLY_OK",
            Trigger::BuildOk => "BUILD_OK",
            Trigger::TestOk => "TEST_OK",
            Trigger::ReviewOk => "REVIEW_OK",
            Trigger::SubmitOk => "SUBMIT_OK",
            Trigger::Pause => "PAUSE",
            Trigger::Resume => "RESUME",
            Trigger::Cancel => "CANCEL",
            Trigger::Fail => "FAIL",
            Trigger::Retry => "RETRY",
        };
        f.write_str(name)
    }
}

/// Explicit per-state success-trigger mapping.
///
/// Returns the trigger the orchestrator fires when the handler for `state`
/// completes successfully. Only operational states have one.
pub fn success_trigger(state: State) -> Option<Trigger> {
    match state {
        State::Analyzing => Some(Trigger::AnalysisOk),
        State::Searching => Some(Trigger::SearchOk),
        State::Planning => Some(Trigger::PlanOk),
        State::Generating => Some(Trigger::GenerationOk),
        State::Applying => Some(Trigger::ApplyOk),
        State::Building => Some(Trigger::BuildOk),
        State::Testing => Some(Trigger::TestOk),
        State::Reviewing => Some(Trigger::ReviewOk),
        State::Submitting => Some(Trigger::SubmitOk),
        _ => None,
    }
}

/// Emitted to observers every time a transition is applied.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StateChangeEvent {
    pub run_id: String,
    pub from: State,
    pub to: State,
    pub trigger: Trigger,
    pub timestamp: DateTime<Utc>,
}
