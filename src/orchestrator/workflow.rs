//! Workflow orchestrator
//!
//! Ties the state machine, stage coordinator and recovery manager into one
//! run: advance the machine, invoke the handler for the current state,
//! merge its output, classify failures, retry or stop. All mutation of
//! external systems happens inside stage handlers; the orchestrator itself
//! only measures time and emits events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use super::coordinator::StageCoordinator;
use super::data::{WorkflowData, WorkflowError, WorkflowInput, WorkflowResult, WorkflowStatus};
use super::machine::{self, StateMachine};
use super::recovery::RecoveryManager;
use super::state::{success_trigger, State, Trigger};
use crate::observe::{trace_execution, Monitor};
use crate::{Error, Result};

/// Options for constructing an orchestrator.
#[derive(Debug, Clone)]
pub struct WorkflowOptions {
    /// Attempt budget for retryable failures (attempts count executions,
    /// starting at 1).
    pub max_iterations: u32,
}

impl Default for WorkflowOptions {
    fn default() -> Self {
        Self { max_iterations: 3 }
    }
}

/// Cloneable handle for requesting cancellation from outside the run.
#[derive(Debug, Clone)]
pub struct CancelHandle(Arc<AtomicBool>);

impl CancelHandle {
    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives one run from `IDLE` to a terminal state.
pub struct WorkflowOrchestrator {
    run_id: String,
    machine: StateMachine,
    coordinator: StageCoordinator,
    recovery: RecoveryManager,
    monitor: Arc<dyn Monitor>,
    cancel_requested: Arc<AtomicBool>,
    pause_requested: Arc<AtomicBool>,
}

impl WorkflowOrchestrator {
    pub fn new(
        run_id: impl Into<String>,
        coordinator: StageCoordinator,
        options: WorkflowOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Result<Self> {
        machine::validate_tables()?;

        let run_id = run_id.into();
        let mut machine = StateMachine::new(run_id.clone());

        // REVIEW_OK passes only when the review output marks approval.
        machine.register_guard(
            State::Reviewing,
            Trigger::ReviewOk,
            Arc::new(|ctx, _| ctx.review_result.as_ref().is_some_and(|r| r.approved)),
        )?;

        let observer_monitor = monitor.clone();
        machine.on_transition(Box::new(move |event| {
            observer_monitor.log(
                &format!("{} → {} on {}", event.from, event.to, event.trigger),
                &event.run_id,
            );
        }));

        Ok(Self {
            run_id,
            machine,
            coordinator,
            recovery: RecoveryManager::new(options.max_iterations),
            monitor,
            cancel_requested: Arc::new(AtomicBool::new(false)),
            pause_requested: Arc::new(AtomicBool::new(false)),
        })
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Request cancellation. Cooperative: consulted at the next loop
    /// boundary, so an in-flight handler always settles first.
    pub fn cancel(&self) {
        self.cancel_requested.store(true, Ordering::SeqCst);
    }

    /// Handle usable after the orchestrator has been handed off to a task.
    pub fn cancel_handle(&self) -> CancelHandle {
        CancelHandle(self.cancel_requested.clone())
    }

    /// Request a pause. Honored only while in `GENERATING`, the one state
    /// `RESUME` can return to.
    pub fn pause(&self) {
        self.pause_requested.store(true, Ordering::SeqCst);
    }

    /// Execute the workflow to a terminal state.
    ///
    /// Stage failures produce an `Ok(WorkflowResult)` with `status:
    /// failed`; only fatal configuration/logic errors (missing handler,
    /// illegal transition) surface as `Err`.
    pub async fn run(&mut self, input: WorkflowInput) -> Result<WorkflowResult> {
        let started = Instant::now();
        let mut data = WorkflowData::new(input);
        let mut attempt: u32 = 1;
        let mut last_error: Option<WorkflowError> = None;

        // Kick off: IDLE → ANALYZING.
        self.apply(Trigger::AnalysisOk, &data)?;

        let status = loop {
            let state = self.machine.current();

            if state == State::Done {
                break WorkflowStatus::Completed;
            }
            if state == State::Cancelled {
                break WorkflowStatus::Cancelled;
            }

            if self.cancel_requested.load(Ordering::SeqCst) {
                self.apply(Trigger::Cancel, &data)?;
                break WorkflowStatus::Cancelled;
            }

            if state == State::Generating && self.pause_requested.swap(false, Ordering::SeqCst) {
                self.apply(Trigger::Pause, &data)?;
                break WorkflowStatus::Paused;
            }

            let execution = trace_execution(
                &self.monitor,
                &state.to_string(),
                &self.run_id,
                self.coordinator.execute(state, &data),
            )
            .await;

            match execution {
                Ok(output) => {
                    data.merge(output);
                    let trigger = success_trigger(state).ok_or_else(|| {
                        Error::Config(format!("no success trigger for {state}"))
                    })?;
                    self.apply(trigger, &data)?;
                }
                Err(err) => {
                    // Missing handler is a configuration error, not a stage
                    // failure: fatal, never classified for retry.
                    if matches!(err, Error::Config(_)) {
                        return Err(err);
                    }

                    let classification = self.recovery.classify(&err);
                    self.monitor.record(
                        "stage_error",
                        1.0,
                        &[
                            ("stage", &state.to_string()),
                            ("kind", &format!("{:?}", classification.kind)),
                        ],
                    );
                    last_error = Some(WorkflowError::from(&err));
                    self.apply(Trigger::Fail, &data)?;

                    if self.recovery.should_retry(&classification, attempt) {
                        attempt += 1;
                        last_error = None;
                        self.apply(Trigger::Retry, &data)?;
                    } else {
                        break WorkflowStatus::Failed;
                    }
                }
            }
        };

        if status == WorkflowStatus::Cancelled {
            // Cancellation is not an error.
            last_error = None;
        }

        Ok(WorkflowResult {
            status,
            run_id: self.run_id.clone(),
            final_state: self.machine.current(),
            attempt,
            duration_ms: started.elapsed().as_millis() as u64,
            data,
            error: last_error,
        })
    }

    /// Fire a trigger; an undefined or vetoed transition here is a fatal
    /// logic error, never silently ignored.
    fn apply(&mut self, trigger: Trigger, data: &WorkflowData) -> Result<State> {
        let state = self.machine.current();
        self.machine
            .transition(trigger, data)
            .ok_or(Error::IllegalTransition { state, trigger })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::testing::RecordingMonitor;
    use crate::orchestrator::data::{
        ApplyResult, CommandResult, PlanStep, ReviewResult, StageOutput, Submission,
    };
    use crate::orchestrator::state::OPERATIONAL_STATES;
    use std::sync::atomic::AtomicU32;
    use tokio::sync::Notify;

    fn input() -> WorkflowInput {
        WorkflowInput {
            owner: "o".to_string(),
            repo: "r".to_string(),
            issue_number: 1,
        }
    }

    fn stub_output(state: State, approved: bool) -> StageOutput {
        let mut output = StageOutput::default();
        match state {
            State::Planning => {
                output.plan = Some(vec![PlanStep {
                    description: "stub".to_string(),
                    target_files: vec![],
                    strategy: "minimal".to_string(),
                }])
            }
            State::Applying => {
                output.apply_result = Some(ApplyResult {
                    applied_files: vec![],
                    patch_count: 0,
                })
            }
            State::Building => {
                output.build_result = Some(CommandResult {
                    success: true,
                    output: String::new(),
                    errors: vec![],
                })
            }
            State::Testing => {
                output.test_result = Some(CommandResult {
                    success: true,
                    output: String::new(),
                    errors: vec![],
                })
            }
            State::Reviewing => {
                output.review_result = Some(ReviewResult {
                    approved,
                    summary: "stub".to_string(),
                    issues: vec![],
                    suggestions: vec![],
                })
            }
            State::Submitting => {
                output.submission = Some(Submission {
                    pr_number: 0,
                    pr_url: String::new(),
                    commit_message: String::new(),
                })
            }
            _ => {}
        }
        output
    }

    /// Coordinator with trivial handlers everywhere except GENERATING,
    /// which the caller provides.
    fn coordinator_with_generating<F>(approved: bool, generating: F) -> StageCoordinator
    where
        F: for<'a> Fn(&'a WorkflowData) -> futures::future::BoxFuture<'a, Result<StageOutput>>
            + Send
            + Sync
            + 'static,
    {
        let mut coordinator = StageCoordinator::new();
        for state in OPERATIONAL_STATES {
            if state == State::Generating {
                continue;
            }
            coordinator
                .register(state, move |_ctx| {
                    Box::pin(async move { Ok(stub_output(state, approved)) })
                })
                .unwrap();
        }
        coordinator.register(State::Generating, generating).unwrap();
        coordinator
    }

    fn orchestrator(coordinator: StageCoordinator) -> WorkflowOrchestrator {
        WorkflowOrchestrator::new(
            "run-test",
            coordinator,
            WorkflowOptions { max_iterations: 3 },
            Arc::new(RecordingMonitor::default()),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn happy_path_completes_with_full_context() {
        let coordinator = coordinator_with_generating(true, |_| {
            Box::pin(async { Ok(StageOutput::default()) })
        });
        let mut orch = orchestrator(coordinator);

        let result = orch.run(input()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        assert_eq!(result.final_state, State::Done);
        assert_eq!(result.attempt, 1);
        assert!(result.error.is_none());
        assert!(result.data.plan.is_some());
        assert!(result.data.review_result.is_some());
        assert!(result.data.submission.is_some());
    }

    #[tokio::test]
    async fn retryable_failures_consume_attempts_then_succeed() {
        let failures = Arc::new(AtomicU32::new(2));
        let counter = failures.clone();
        let coordinator = coordinator_with_generating(true, move |_| {
            let counter = counter.clone();
            Box::pin(async move {
                if counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                    n.checked_sub(1)
                })
                .is_ok()
                {
                    Err(Error::Timeout("gemini".to_string()))
                } else {
                    Ok(StageOutput::default())
                }
            })
        });
        let mut orch = orchestrator(coordinator);

        let result = orch.run(input()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Completed);
        // Two failures then success: attempts 1 and 2 failed, 3 succeeded.
        assert_eq!(result.attempt, 3);
        assert!(result.error.is_none());
    }

    #[tokio::test]
    async fn exhausted_attempts_end_in_error_state() {
        let coordinator = coordinator_with_generating(true, |_| {
            Box::pin(async { Err(Error::Timeout("always".to_string())) })
        });
        let mut orch = orchestrator(coordinator);

        let result = orch.run(input()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.final_state, State::Error);
        assert_eq!(result.attempt, 3);
        let error = result.error.unwrap();
        assert_eq!(error.code, "TIMEOUT");
    }

    #[tokio::test]
    async fn structural_failure_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let coordinator = coordinator_with_generating(true, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Box::pin(async { Err(Error::MissingContext("analysis")) })
        });
        let mut orch = orchestrator(coordinator);

        let result = orch.run(input()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Failed);
        assert_eq!(result.attempt, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(result.error.unwrap().code, "MISSING_CONTEXT");
    }

    #[tokio::test]
    async fn cancellation_waits_for_the_inflight_handler() {
        let release = Arc::new(Notify::new());
        let handler_done = Arc::new(AtomicBool::new(false));

        let gate = release.clone();
        let done = handler_done.clone();
        let coordinator = coordinator_with_generating(true, move |_| {
            let gate = gate.clone();
            let done = done.clone();
            Box::pin(async move {
                gate.notified().await;
                done.store(true, Ordering::SeqCst);
                Ok(StageOutput::default())
            })
        });
        let mut orch = orchestrator(coordinator);
        let handle = orch.cancel_handle();

        let run = tokio::spawn(async move { orch.run(input()).await });

        // Let the run reach GENERATING, then cancel while its handler is
        // still pending.
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        handle.cancel();
        assert!(!handler_done.load(Ordering::SeqCst));
        release.notify_one();

        let result = run.await.unwrap().unwrap();
        assert_eq!(result.status, WorkflowStatus::Cancelled);
        assert_eq!(result.final_state, State::Cancelled);
        assert!(result.error.is_none());
        // The in-flight handler settled before cancellation took effect.
        assert!(handler_done.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn unapproved_review_surfaces_as_illegal_transition() {
        let coordinator = coordinator_with_generating(false, |_| {
            Box::pin(async { Ok(StageOutput::default()) })
        });
        let mut orch = orchestrator(coordinator);

        let err = orch.run(input()).await.unwrap_err();
        assert!(matches!(
            err,
            Error::IllegalTransition {
                state: State::Reviewing,
                trigger: Trigger::ReviewOk,
            }
        ));
    }

    #[tokio::test]
    async fn missing_handler_is_fatal() {
        // Only GENERATING registered: the run dies at ANALYZING.
        let mut coordinator = StageCoordinator::new();
        coordinator
            .register(State::Generating, |_| {
                Box::pin(async { Ok(StageOutput::default()) })
            })
            .unwrap();
        let mut orch = orchestrator(coordinator);

        let err = orch.run(input()).await.unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[tokio::test]
    async fn pause_mid_generating_returns_paused() {
        let coordinator = coordinator_with_generating(true, |_| {
            Box::pin(async {
                tokio::time::sleep(std::time::Duration::from_millis(30)).await;
                Ok(StageOutput::default())
            })
        });
        let mut orch = orchestrator(coordinator);
        orch.pause();

        let result = orch.run(input()).await.unwrap();
        assert_eq!(result.status, WorkflowStatus::Paused);
        assert_eq!(result.final_state, State::Paused);
    }
}
