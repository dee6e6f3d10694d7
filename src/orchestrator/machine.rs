//! State machine: transition table, guards, observers
//!
//! Pure transition logic, no I/O. The table is static and total: looking
//! up an undefined `(state, trigger)` pair leaves the state unchanged and
//! emits nothing; the caller decides whether that is an error.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use super::data::WorkflowData;
use super::state::{State, StateChangeEvent, Trigger, OPERATIONAL_STATES};
use crate::{Error, Result};

/// A side-effect-free predicate that can veto a table-defined transition.
pub type GuardFn = Arc<dyn Fn(&WorkflowData, Trigger) -> bool + Send + Sync>;

/// Observer invoked after every applied transition.
pub type ObserverFn = Box<dyn Fn(&StateChangeEvent) + Send + Sync>;

/// The static transition table.
///
/// `CANCEL` and `FAIL` are available from every handler-bearing state;
/// `PAUSE` only from `GENERATING`, because `RESUME` always returns there.
pub fn next_state(state: State, trigger: Trigger) -> Option<State> {
    use State::*;
    use Trigger::*;

    // Control triggers shared by all operational states.
    if state.is_operational() {
        match trigger {
            Cancel => return Some(Cancelled),
            Fail => return Some(Error),
            _ => {}
        }
    }

    match (state, trigger) {
        (Idle, AnalysisOk) => Some(Analyzing),
        (Analyzing, AnalysisOk) => Some(Searching),
        (Searching, SearchOk) => Some(Planning),
        (Planning, PlanOk) => Some(Generating),
        (Generating, GenerationOk) => Some(Applying),
        (Generating, Pause) => Some(Paused),
        (Applying, ApplyOk) => Some(Building),
        (Building, BuildOk) => Some(Testing),
        (Testing, TestOk) => Some(Reviewing),
        (Reviewing, ReviewOk) => Some(Submitting),
        (Submitting, SubmitOk) => Some(Done),
        (Paused, Resume) => Some(Generating),
        (Error, Retry) => Some(Generating),
        _ => None,
    }
}

/// Validate the static tables at startup: every non-terminal state must
/// have at least one outgoing trigger, and every operational state's
/// success trigger must map to a defined transition.
pub fn validate_tables() -> Result<()> {
    const ALL_STATES: [State; 14] = [
        State::Idle,
        State::Analyzing,
        State::Searching,
        State::Planning,
        State::Generating,
        State::Applying,
        State::Building,
        State::Testing,
        State::Reviewing,
        State::Submitting,
        State::Done,
        State::Paused,
        State::Error,
        State::Cancelled,
    ];
    const ALL_TRIGGERS: [Trigger; 14] = [
        Trigger::AnalysisOk,
        Trigger::SearchOk,
        Trigger::PlanOk,
        Trigger::GenerationOk,
        Trigger::ApplyOk,
        Trigger::BuildOk,
        Trigger::TestOk,
        Trigger::ReviewOk,
        Trigger::SubmitOk,
        Trigger::Pause,
        Trigger::Resume,
        Trigger::Cancel,
        Trigger::Fail,
        Trigger::Retry,
    ];

    for state in ALL_STATES {
        let has_outgoing = ALL_TRIGGERS
            .iter()
            .any(|t| next_state(state, *t).is_some());
        if state.is_terminal() {
            if has_outgoing {
                return Err(Error::Config(format!(
                    "terminal state {state} has an outgoing transition"
                )));
            }
        } else if !has_outgoing {
            return Err(Error::Config(format!(
                "non-terminal state {state} has no outgoing trigger"
            )));
        }
    }

    for state in OPERATIONAL_STATES {
        let trigger = super::state::success_trigger(state).ok_or_else(|| {
            Error::Config(format!("operational state {state} has no success trigger"))
        })?;
        if next_state(state, trigger).is_none() {
            return Err(Error::Config(format!(
                "success trigger {trigger} undefined for {state}"
            )));
        }
    }

    Ok(())
}

/// One run's state machine instance.
pub struct StateMachine {
    run_id: String,
    current: State,
    guards: HashMap<(State, Trigger), GuardFn>,
    observers: Vec<ObserverFn>,
}

impl StateMachine {
    pub fn new(run_id: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            current: State::Idle,
            guards: HashMap::new(),
            observers: Vec::new(),
        }
    }

    pub fn current(&self) -> State {
        self.current
    }

    /// Register a guard for a `(state, trigger)` pair.
    ///
    /// Guard sets per transition are mutually exclusive: a second guard for
    /// the same pair is a configuration error, asserted here rather than
    /// resolved by precedence at transition time.
    pub fn register_guard(&mut self, state: State, trigger: Trigger, guard: GuardFn) -> Result<()> {
        if self.guards.contains_key(&(state, trigger)) {
            return Err(Error::Config(format!(
                "guard already registered for ({state}, {trigger})"
            )));
        }
        self.guards.insert((state, trigger), guard);
        Ok(())
    }

    /// Register an observer for state-change events.
    pub fn on_transition(&mut self, observer: ObserverFn) {
        self.observers.push(observer);
    }

    /// Attempt a transition.
    ///
    /// Returns `Some(next)` and applies it when `(current, trigger)` is in
    /// the table and no guard vetoes it; returns `None` and leaves the
    /// state unchanged otherwise. No event is emitted for an illegal or
    /// vetoed trigger.
    pub fn transition(&mut self, trigger: Trigger, context: &WorkflowData) -> Option<State> {
        let next = next_state(self.current, trigger)?;

        if let Some(guard) = self.guards.get(&(self.current, trigger)) {
            if !guard(context, trigger) {
                return None;
            }
        }

        let event = StateChangeEvent {
            run_id: self.run_id.clone(),
            from: self.current,
            to: next,
            trigger,
            timestamp: Utc::now(),
        };
        self.current = next;

        for observer in &self.observers {
            observer(&event);
        }

        Some(next)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::data::{ReviewResult, WorkflowInput};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    fn ctx() -> WorkflowData {
        WorkflowData::new(WorkflowInput {
            owner: "o".to_string(),
            repo: "r".to_string(),
            issue_number: 1,
        })
    }

    #[test]
    fn tables_are_valid() {
        validate_tables().unwrap();
    }

    #[test]
    fn happy_path_traverses_all_core_states() {
        let mut sm = StateMachine::new("run-1");
        let ctx = ctx();
        let path = [
            (Trigger::AnalysisOk, State::Analyzing),
            (Trigger::AnalysisOk, State::Searching),
            (Trigger::SearchOk, State::Planning),
            (Trigger::PlanOk, State::Generating),
            (Trigger::GenerationOk, State::Applying),
            (Trigger::ApplyOk, State::Building),
            (Trigger::BuildOk, State::Testing),
            (Trigger::TestOk, State::Reviewing),
            (Trigger::ReviewOk, State::Submitting),
            (Trigger::SubmitOk, State::Done),
        ];
        for (trigger, expected) in path {
            assert_eq!(sm.transition(trigger, &ctx), Some(expected));
        }
        assert!(sm.current().is_terminal());
    }

    #[test]
    fn undefined_pair_leaves_state_unchanged_and_emits_nothing() {
        let mut sm = StateMachine::new("run-1");
        let events = Arc::new(AtomicUsize::new(0));
        let counter = events.clone();
        sm.on_transition(Box::new(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        }));

        // SUBMIT_OK is not defined from IDLE.
        assert_eq!(sm.transition(Trigger::SubmitOk, &ctx()), None);
        assert_eq!(sm.current(), State::Idle);
        assert_eq!(events.load(Ordering::SeqCst), 0);

        // Terminal states accept nothing.
        let ctx = ctx();
        assert_eq!(sm.transition(Trigger::AnalysisOk, &ctx), Some(State::Analyzing));
        assert_eq!(sm.transition(Trigger::Resume, &ctx), None);
        assert_eq!(events.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn cancel_and_fail_available_from_all_operational_states() {
        for state in OPERATIONAL_STATES {
            assert_eq!(next_state(state, Trigger::Cancel), Some(State::Cancelled));
            assert_eq!(next_state(state, Trigger::Fail), Some(State::Error));
        }
        assert_eq!(next_state(State::Idle, Trigger::Cancel), None);
        assert_eq!(next_state(State::Paused, Trigger::Fail), None);
    }

    #[test]
    fn pause_only_from_generating_and_resume_returns_there() {
        assert_eq!(next_state(State::Generating, Trigger::Pause), Some(State::Paused));
        assert_eq!(next_state(State::Analyzing, Trigger::Pause), None);
        assert_eq!(next_state(State::Paused, Trigger::Resume), Some(State::Generating));
        assert_eq!(next_state(State::Error, Trigger::Retry), Some(State::Generating));
    }

    #[test]
    fn guard_vetoes_defined_transition() {
        let mut sm = StateMachine::new("run-1");
        sm.register_guard(
            State::Reviewing,
            Trigger::ReviewOk,
            Arc::new(|ctx, _| ctx.review_result.as_ref().is_some_and(|r| r.approved)),
        )
        .unwrap();

        let mut ctx = ctx();
        // Walk to REVIEWING.
        for trigger in [
            Trigger::AnalysisOk,
            Trigger::AnalysisOk,
            Trigger::SearchOk,
            Trigger::PlanOk,
            Trigger::GenerationOk,
            Trigger::ApplyOk,
            Trigger::BuildOk,
            Trigger::TestOk,
        ] {
            sm.transition(trigger, &ctx).unwrap();
        }
        assert_eq!(sm.current(), State::Reviewing);

        // No review result yet: vetoed, treated as if the trigger were absent.
        assert_eq!(sm.transition(Trigger::ReviewOk, &ctx), None);
        assert_eq!(sm.current(), State::Reviewing);

        ctx.review_result = Some(ReviewResult {
            approved: true,
            summary: "ok".to_string(),
            issues: vec![],
            suggestions: vec![],
        });
        assert_eq!(sm.transition(Trigger::ReviewOk, &ctx), Some(State::Submitting));
    }

    #[test]
    fn duplicate_guard_registration_is_rejected() {
        let mut sm = StateMachine::new("run-1");
        let guard: GuardFn = Arc::new(|_, _| true);
        sm.register_guard(State::Reviewing, Trigger::ReviewOk, guard.clone())
            .unwrap();
        assert!(sm
            .register_guard(State::Reviewing, Trigger::ReviewOk, guard)
            .is_err());
    }
}
