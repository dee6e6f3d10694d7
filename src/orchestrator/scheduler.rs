//! Task scheduler
//!
//! Polls the queue, launches workflows up to a concurrency cap, persists
//! every status transition, and recovers from a prior crash by reloading
//! the snapshot. A concurrency slot is reserved inside the queue lock,
//! before any asynchronous work, so two poll iterations can never
//! over-admit; the slot is released by a drop guard on every exit path.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use tokio::sync::Mutex;

use super::data::{WorkflowInput, WorkflowResult};
use super::queue::{QueueStats, Task, TaskQueue, TaskStatus};
use super::store::QueueStore;
use super::workflow::{CancelHandle, WorkflowOrchestrator};
use crate::observe::Monitor;
use crate::Result;

/// Builds a fresh orchestrator for each launched task, keyed by task id
/// and workflow input.
pub type OrchestratorFactory =
    Box<dyn Fn(&str, &WorkflowInput) -> Result<WorkflowOrchestrator> + Send + Sync>;

/// Scheduler configuration.
#[derive(Debug, Clone)]
pub struct SchedulerOptions {
    /// Maximum concurrent workflow executions (default: 3)
    pub max_concurrent: usize,
    /// Queue polling interval (default: 1s)
    pub poll_interval: Duration,
}

impl Default for SchedulerOptions {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            poll_interval: Duration::from_secs(1),
        }
    }
}

/// Snapshot of the scheduler's control state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SchedulerStatus {
    pub is_running: bool,
    pub is_paused: bool,
    pub running_count: usize,
    pub max_concurrent: usize,
}

/// Manages concurrent workflow execution over the task queue.
pub struct TaskScheduler {
    inner: Arc<Inner>,
}

struct Inner {
    queue: Mutex<TaskQueue>,
    store: QueueStore,
    factory: OrchestratorFactory,
    monitor: Arc<dyn Monitor>,
    max_concurrent: usize,
    poll_interval: Duration,
    is_running: AtomicBool,
    is_paused: AtomicBool,
    in_flight: AtomicUsize,
    cancels: StdMutex<HashMap<String, CancelHandle>>,
    poll_task: Mutex<Option<tokio::task::JoinHandle<()>>>,
}

/// Releases a reserved concurrency slot when dropped, on every exit path.
struct SlotGuard(Arc<Inner>);

impl Drop for SlotGuard {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

impl TaskScheduler {
    pub fn new(
        store: QueueStore,
        factory: OrchestratorFactory,
        options: SchedulerOptions,
        monitor: Arc<dyn Monitor>,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                queue: Mutex::new(TaskQueue::new()),
                store,
                factory,
                monitor,
                max_concurrent: options.max_concurrent,
                poll_interval: options.poll_interval,
                is_running: AtomicBool::new(false),
                is_paused: AtomicBool::new(false),
                in_flight: AtomicUsize::new(0),
                cancels: StdMutex::new(HashMap::new()),
                poll_task: Mutex::new(None),
            }),
        }
    }

    /// Queue a new workflow invocation and persist the snapshot.
    pub async fn add(&self, input: WorkflowInput, priority: u8) -> Result<String> {
        let id = {
            let mut queue = self.inner.queue.lock().await;
            queue.add(input, priority)
        };
        self.inner.persist().await?;
        Ok(id)
    }

    /// Load the persisted queue and begin processing.
    ///
    /// A task persisted as `running` cannot have survived a process
    /// restart; it is demoted to `pending` before the poll loop starts.
    pub async fn start(&self) -> Result<()> {
        if self.inner.is_running.swap(true, Ordering::SeqCst) {
            return Ok(());
        }

        let mut tasks = self.inner.store.load().await?;
        if !tasks.is_empty() {
            for task in &mut tasks {
                if task.status == TaskStatus::Running {
                    task.status = TaskStatus::Pending;
                }
            }
            self.inner.queue.lock().await.restore(tasks);
        }

        let handle = tokio::spawn(self.inner.clone().poll_loop());
        *self.inner.poll_task.lock().await = Some(handle);
        Ok(())
    }

    /// Halt new admission, wait for the poll loop to exit and in-flight
    /// tasks to finish, then persist a final snapshot.
    ///
    /// Joining the poll loop before the drain wait means no task can be
    /// admitted once `stop` returns; an iteration already past its
    /// `is_running` check gets to finish first.
    pub async fn stop(&self) -> Result<()> {
        if !self.inner.is_running.swap(false, Ordering::SeqCst) {
            return Ok(());
        }

        if let Some(handle) = self.inner.poll_task.lock().await.take() {
            handle.await.ok();
        }

        while self.inner.in_flight.load(Ordering::SeqCst) > 0 {
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        self.inner.persist().await
    }

    /// Gate new admission; running tasks are unaffected.
    pub fn pause(&self) {
        self.inner.is_paused.store(true, Ordering::SeqCst);
    }

    pub fn resume(&self) {
        self.inner.is_paused.store(false, Ordering::SeqCst);
    }

    /// Request cooperative cancellation of every in-flight run.
    pub fn cancel_all(&self) {
        for handle in self.inner.cancel_registry().values() {
            handle.cancel();
        }
    }

    pub fn can_accept_new_task(&self) -> bool {
        self.inner.in_flight.load(Ordering::SeqCst) < self.inner.max_concurrent
    }

    pub fn running_count(&self) -> usize {
        self.inner.in_flight.load(Ordering::SeqCst)
    }

    pub fn get_status(&self) -> SchedulerStatus {
        SchedulerStatus {
            is_running: self.inner.is_running.load(Ordering::SeqCst),
            is_paused: self.inner.is_paused.load(Ordering::SeqCst),
            running_count: self.inner.in_flight.load(Ordering::SeqCst),
            max_concurrent: self.inner.max_concurrent,
        }
    }

    pub async fn get_task(&self, task_id: &str) -> Option<Task> {
        self.inner.queue.lock().await.get(task_id).cloned()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.inner.queue.lock().await.get_all()
    }

    pub async fn stats(&self) -> QueueStats {
        self.inner.queue.lock().await.get_stats()
    }

    /// Drop every task and delete the snapshot.
    pub async fn clear(&self) -> Result<()> {
        self.inner.queue.lock().await.clear();
        self.inner.store.clear().await
    }
}

impl Inner {
    async fn poll_loop(self: Arc<Self>) {
        while self.is_running.load(Ordering::SeqCst) {
            if !self.is_paused.load(Ordering::SeqCst) {
                self.admit().await;
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    /// Admit pending tasks while concurrency slots are free.
    async fn admit(self: &Arc<Self>) {
        loop {
            let task = {
                let mut queue = self.queue.lock().await;
                if self.in_flight.load(Ordering::SeqCst) >= self.max_concurrent {
                    None
                } else if let Some(task) = queue.dequeue() {
                    // Reserve the slot before any await happens.
                    self.in_flight.fetch_add(1, Ordering::SeqCst);
                    queue.update_status(&task.id, TaskStatus::Running);
                    Some(task)
                } else {
                    None
                }
            };

            let Some(task) = task else { break };

            if let Err(e) = self.persist().await {
                tracing::error!(task_id = %task.id, "queue persist failed: {e}");
            }

            tokio::spawn(self.clone().execute(task));
        }
    }

    /// Run one task to completion and record the outcome.
    async fn execute(self: Arc<Self>, task: Task) {
        let _slot = SlotGuard(self.clone());

        let outcome = self.run_task(&task).await;
        self.cancel_registry().remove(&task.id);

        {
            let mut queue = self.queue.lock().await;
            match outcome {
                Ok(result) => queue.update_result(&task.id, result),
                Err(e) => {
                    self.monitor
                        .log(&format!("workflow failed fatally: {e}"), &task.id);
                    queue.update_status(&task.id, TaskStatus::Failed);
                    queue.set_error(&task.id, e.to_string());
                }
            }
        }

        if let Err(e) = self.persist().await {
            tracing::error!(task_id = %task.id, "queue persist failed: {e}");
        }
    }

    async fn run_task(&self, task: &Task) -> Result<WorkflowResult> {
        let mut orchestrator = (self.factory)(&task.id, &task.workflow_input)?;
        self.cancel_registry()
            .insert(task.id.clone(), orchestrator.cancel_handle());
        orchestrator.run(task.workflow_input.clone()).await
    }

    /// A poisoned registry lock still yields a usable map.
    fn cancel_registry(&self) -> std::sync::MutexGuard<'_, HashMap<String, CancelHandle>> {
        self.cancels
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn persist(&self) -> Result<()> {
        let tasks = self.queue.lock().await.get_all();
        self.store.save(&tasks).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::observe::testing::RecordingMonitor;
    use crate::orchestrator::testkit;
    use crate::orchestrator::workflow::WorkflowOptions;
    use std::sync::atomic::AtomicUsize;
    use tokio::sync::Semaphore;

    fn input(issue_number: u64) -> WorkflowInput {
        WorkflowInput {
            owner: "o".to_string(),
            repo: "r".to_string(),
            issue_number,
        }
    }

    fn monitor() -> Arc<dyn Monitor> {
        Arc::new(RecordingMonitor::default())
    }

    /// Factory whose GENERATING stage blocks on `gate` and tracks the peak
    /// number of simultaneously running handlers.
    fn gated_factory(
        gate: Arc<Semaphore>,
        current: Arc<AtomicUsize>,
        peak: Arc<AtomicUsize>,
    ) -> OrchestratorFactory {
        Box::new(move |task_id, _input| {
            let gate = gate.clone();
            let current = current.clone();
            let peak = peak.clone();
            let coordinator = testkit::stub_coordinator(move |_| {
                let gate = gate.clone();
                let current = current.clone();
                let peak = peak.clone();
                Box::pin(async move {
                    let now = current.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    let permit = gate.acquire().await.map_err(|e| {
                        crate::Error::Command(format!("gate closed: {e}"))
                    })?;
                    permit.forget();
                    current.fetch_sub(1, Ordering::SeqCst);
                    Ok(Default::default())
                })
            });
            WorkflowOrchestrator::new(task_id, coordinator, WorkflowOptions::default(), monitor())
        })
    }

    fn instant_factory() -> OrchestratorFactory {
        Box::new(|task_id, _input| {
            let coordinator =
                testkit::stub_coordinator(|_| Box::pin(async { Ok(Default::default()) }));
            WorkflowOrchestrator::new(task_id, coordinator, WorkflowOptions::default(), monitor())
        })
    }

    fn failing_factory() -> OrchestratorFactory {
        Box::new(|task_id, _input| {
            let coordinator = testkit::stub_coordinator(|_| {
                Box::pin(async { Err(crate::Error::MissingContext("analysis")) })
            });
            WorkflowOrchestrator::new(task_id, coordinator, WorkflowOptions::default(), monitor())
        })
    }

    fn scheduler(store: QueueStore, factory: OrchestratorFactory, max: usize) -> TaskScheduler {
        TaskScheduler::new(
            store,
            factory,
            SchedulerOptions {
                max_concurrent: max,
                poll_interval: Duration::from_millis(10),
            },
            monitor(),
        )
    }

    async fn wait_until<F>(mut condition: F)
    where
        F: FnMut() -> bool,
    {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within 2s");
    }

    #[tokio::test]
    async fn persisted_running_task_restarts_as_pending() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.json"));

        // A previous process died while a task was running.
        let mut queue = TaskQueue::new();
        let id = queue.add(input(1), 6);
        queue.update_status(&id, TaskStatus::Running);
        store.save(&queue.get_all()).await.unwrap();

        let sched = scheduler(store, instant_factory(), 2);
        sched.pause(); // inspect before anything gets admitted
        sched.start().await.unwrap();

        let task = sched.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.priority, 6);

        sched.stop().await.unwrap();
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn concurrency_never_exceeds_the_cap() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.json"));

        let gate = Arc::new(Semaphore::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let sched = scheduler(
            store,
            gated_factory(gate.clone(), current.clone(), peak.clone()),
            2,
        );
        for n in 0..5 {
            sched.add(input(n), 5).await.unwrap();
        }
        sched.start().await.unwrap();

        // Two slots fill; the other three tasks stay pending.
        wait_until(|| sched.running_count() == 2).await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(sched.running_count(), 2);
        assert!(!sched.can_accept_new_task());

        // Release everyone; the scheduler drains the backlog.
        gate.add_permits(5);
        for _ in 0..200 {
            if sched.stats().await.completed == 5 {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sched.stop().await.unwrap();

        let stats = sched.stats().await;
        assert_eq!(stats.completed, 5);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn results_and_errors_are_recorded_and_persisted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");
        let store = QueueStore::new(path.clone());

        let sched = scheduler(store, failing_factory(), 1);
        let id = sched.add(input(1), 5).await.unwrap();
        sched.start().await.unwrap();

        // wait_until needs a sync probe; poll through a channel-free loop.
        for _ in 0..200 {
            if let Some(task) = sched.get_task(&id).await {
                if task.status == TaskStatus::Failed {
                    break;
                }
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sched.stop().await.unwrap();

        let task = sched.get_task(&id).await.unwrap();
        assert_eq!(task.status, TaskStatus::Failed);
        let message = task.error.unwrap();
        assert!(message.contains("analysis"), "unexpected error: {message}");
        assert!(task.completed_at.is_some());

        // The failure survived to disk.
        let persisted = QueueStore::new(path).load().await.unwrap();
        assert_eq!(persisted[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn add_persists_immediately() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("queue.json");

        let sched = scheduler(QueueStore::new(path.clone()), instant_factory(), 1);
        let id = sched.add(input(7), 9).await.unwrap();

        let persisted = QueueStore::new(path).load().await.unwrap();
        assert_eq!(persisted.len(), 1);
        assert_eq!(persisted[0].id, id);
        assert_eq!(persisted[0].priority, 9);
        assert_eq!(persisted[0].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn pause_gates_admission_and_resume_lifts_it() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.json"));

        let sched = scheduler(store, instant_factory(), 1);
        sched.pause();
        let id = sched.add(input(1), 5).await.unwrap();
        sched.start().await.unwrap();

        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(
            sched.get_task(&id).await.unwrap().status,
            TaskStatus::Pending
        );

        sched.resume();
        for _ in 0..200 {
            if sched.get_task(&id).await.unwrap().status == TaskStatus::Completed {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        sched.stop().await.unwrap();
        assert_eq!(
            sched.get_task(&id).await.unwrap().status,
            TaskStatus::Completed
        );
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn stop_admits_nothing_after_it_returns() {
        let dir = tempfile::tempdir().unwrap();
        let store = QueueStore::new(dir.path().join("queue.json"));

        let gate = Arc::new(Semaphore::new(0));
        let current = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let sched = Arc::new(scheduler(
            store,
            gated_factory(gate.clone(), current, peak),
            1,
        ));
        let first = sched.add(input(1), 9).await.unwrap();
        let second = sched.add(input(2), 1).await.unwrap();
        sched.start().await.unwrap();
        wait_until(|| sched.running_count() == 1).await;

        // Stop while the first task holds the only slot, then let it finish.
        let stopper = {
            let sched = sched.clone();
            tokio::spawn(async move { sched.stop().await })
        };
        tokio::time::sleep(Duration::from_millis(30)).await;
        gate.add_permits(1);
        stopper.await.unwrap().unwrap();

        assert_eq!(
            sched.get_task(&first).await.unwrap().status,
            TaskStatus::Completed
        );
        // The freed slot must not admit the second task post-stop.
        assert_eq!(
            sched.get_task(&second).await.unwrap().status,
            TaskStatus::Pending
        );
        assert_eq!(sched.running_count(), 0);
    }
}
