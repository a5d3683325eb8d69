//! Sequential execution of a batch against a task stream client.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use batchrun_client::{
    ClientError, DebugControl, RunLogEntry, RunLogSink, SubmitTarget, TaskRequest,
    TaskStreamClient,
};
use chrono::Utc;
use tokio::sync::{broadcast, watch};
use tracing::{Instrument as _, debug, info, warn};
use uuid::Uuid;

use crate::aggregate::{self, BatchSummary, ExportTable};
use crate::board::{BatchSnapshot, TaskBoard};
use crate::config::BatchConfig;
use crate::dispatch::{Dispatch, TaskOutcome};
use crate::error::BatchError;
use crate::extract;
use crate::history::{HistoryEntry, HistoryLog};
use crate::notice::Notice;
use crate::observability::task_span;
use crate::task::{Task, TaskId, TaskStatus};
use crate::validate::{InputSlot, validate_rows};

/// Outcome of an automatic run (submit or retry-all).
#[derive(Debug, Clone, PartialEq)]
pub struct RunReport {
    pub run_id: Option<Uuid>,
    pub generation: u64,
    pub summary: BatchSummary,
    /// The sequence reached and settled the last task.
    pub finished: bool,
    /// Task whose stream error stopped the sequence.
    pub stopped_at: Option<TaskId>,
}

type InFlight = Arc<Mutex<HashSet<(u64, TaskId)>>>;

struct RunnerInner {
    config: BatchConfig,
    board: Arc<TaskBoard>,
    client: Arc<dyn TaskStreamClient>,
    debug_control: Option<Arc<dyn DebugControl>>,
    run_log: Option<Arc<dyn RunLogSink>>,
    notices: broadcast::Sender<Notice>,
    history: Mutex<HistoryLog>,
    in_flight: InFlight,
    /// Held by one `submit` from its busy check until its run returns.
    submitting: AtomicBool,
}

/// Drives batch runs: one task stream at a time, in id order.
///
/// Cheap to clone; clones share the same task list, so a single-task retry
/// can be spawned while an automatic run is still going.
#[derive(Clone)]
pub struct BatchRunner {
    inner: Arc<RunnerInner>,
}

/// Builder for [`BatchRunner`].
pub struct BatchRunnerBuilder {
    client: Arc<dyn TaskStreamClient>,
    config: BatchConfig,
    debug_control: Option<Arc<dyn DebugControl>>,
    run_log: Option<Arc<dyn RunLogSink>>,
    history: Option<HistoryLog>,
}

impl BatchRunnerBuilder {
    pub fn config(mut self, config: BatchConfig) -> Self {
        self.config = config;
        self
    }

    /// Gate checked before every submission.
    pub fn debug_control(mut self, control: Arc<dyn DebugControl>) -> Self {
        self.debug_control = Some(control);
        self
    }

    /// Sink receiving the counts of every finished automatic run.
    pub fn run_log(mut self, sink: Arc<dyn RunLogSink>) -> Self {
        self.run_log = Some(sink);
        self
    }

    /// Starts from a previously saved history instead of an empty one.
    pub fn history(mut self, history: HistoryLog) -> Self {
        self.history = Some(history);
        self
    }

    pub fn build(self) -> Result<BatchRunner, BatchError> {
        self.config.validate()?;
        let (notices, _rx) = broadcast::channel(self.config.notice_capacity);
        let history = self
            .history
            .unwrap_or_else(|| HistoryLog::new(self.config.history_limit));
        Ok(BatchRunner {
            inner: Arc::new(RunnerInner {
                config: self.config,
                board: Arc::new(TaskBoard::new()),
                client: self.client,
                debug_control: self.debug_control,
                run_log: self.run_log,
                notices,
                history: Mutex::new(history),
                in_flight: Arc::new(Mutex::new(HashSet::new())),
                submitting: AtomicBool::new(false),
            }),
        })
    }
}

/// Holds a task's in-flight slot for the lifetime of one dispatch. Dropping
/// it before the dispatch ended (caller cancelled) fails the task.
struct ActiveDispatch {
    dispatch: Dispatch,
    in_flight: InFlight,
    key: (u64, TaskId),
}

impl Drop for ActiveDispatch {
    fn drop(&mut self) {
        if !self.dispatch.is_ended() {
            self.dispatch.on_failure("dispatch cancelled".into());
        }
        self.in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&self.key);
    }
}

/// Clears the submission flag on every exit path, cancellation included.
struct SubmitSlot<'a>(&'a AtomicBool);

impl<'a> SubmitSlot<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SubmitSlot<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl BatchRunner {
    pub fn builder(client: Arc<dyn TaskStreamClient>) -> BatchRunnerBuilder {
        BatchRunnerBuilder {
            client,
            config: BatchConfig::default(),
            debug_control: None,
            run_log: None,
            history: None,
        }
    }

    pub fn config(&self) -> &BatchConfig {
        &self.inner.config
    }

    /// Current task list.
    pub fn snapshot(&self) -> Arc<BatchSnapshot> {
        self.inner.board.current()
    }

    /// Observes every task-list mutation.
    pub fn subscribe(&self) -> watch::Receiver<Arc<BatchSnapshot>> {
        self.inner.board.subscribe()
    }

    pub fn notices(&self) -> broadcast::Receiver<Notice> {
        self.inner.notices.subscribe()
    }

    pub fn summary(&self) -> BatchSummary {
        aggregate::summarize(&self.snapshot().tasks)
    }

    /// Export of the current batch; empty after [`clear`](Self::clear).
    pub fn export(&self) -> ExportTable {
        let snapshot = self.snapshot();
        aggregate::export_table(&snapshot.slots, &snapshot.tasks)
    }

    pub fn history(&self) -> HistoryLog {
        self.inner
            .history
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Validates `grid`, passes the debug gate, replaces the task list and
    /// runs every task in order.
    pub async fn submit(
        &self,
        target: SubmitTarget,
        slots: Vec<InputSlot>,
        grid: &[Vec<String>],
    ) -> Result<RunReport, BatchError> {
        let Some(_slot) = SubmitSlot::acquire(&self.inner.submitting) else {
            return Err(BatchError::Busy {
                pending: self.unfinished_count(),
            });
        };
        let unfinished = self.unfinished_count();
        if unfinished > 0 {
            return Err(BatchError::Busy {
                pending: unfinished,
            });
        }

        let params = match validate_rows(&slots, grid) {
            Ok(params) => params,
            Err(errors) => {
                warn!(errors = errors.len(), "batch input rejected");
                self.publish(Notice::ValidationFailed {
                    errors: errors.clone(),
                });
                return Err(errors.into());
            }
        };

        self.ensure_debug_enabled(&target).await?;

        let group_size = self.inner.config.group_size;
        let tasks: Vec<Task> = params
            .into_iter()
            .enumerate()
            .map(|(idx, p)| Task::new((idx + 1) as TaskId, p, idx < group_size))
            .collect();
        info!(
            workflow_id = target.workflow_id(),
            tasks = tasks.len(),
            group_size,
            "batch submitted"
        );
        let generation = self.inner.board.replace(target, slots, tasks);
        self.run_sequence(generation).await
    }

    fn unfinished_count(&self) -> usize {
        self.snapshot()
            .tasks
            .iter()
            .filter(|t| t.status == TaskStatus::Pending || t.loading)
            .count()
    }

    /// Restarts the whole batch from task 1, whatever the task statuses are.
    ///
    /// The list is reinstalled under a new generation, so a run still going
    /// on the old one stops applying events.
    pub async fn retry_all(&self) -> Result<RunReport, BatchError> {
        let current = self.snapshot();
        let Some(target) = current.target.clone() else {
            return Err(BatchError::NoBatch);
        };
        if current.is_empty() {
            return Err(BatchError::NoBatch);
        }
        let group_size = self.inner.config.group_size;
        let tasks = current
            .tasks
            .iter()
            .enumerate()
            .map(|(idx, t)| Task::new(t.id, t.params.clone(), idx < group_size))
            .collect();
        info!(tasks = current.tasks.len(), "retrying batch from task 1");
        let generation = self
            .inner
            .board
            .replace(target, current.slots.clone(), tasks);
        self.run_sequence(generation).await
    }

    /// Dispatches task `id` alone. The following task is never dispatched
    /// from here.
    pub async fn retry_task(&self, id: TaskId) -> Result<TaskOutcome, BatchError> {
        let current = self.snapshot();
        if current.is_empty() {
            return Err(BatchError::NoBatch);
        }
        if current.task(id).is_none() {
            return Err(BatchError::UnknownTask(id));
        }
        self.run_task(current.generation, id, true).await
    }

    /// Discards the task list.
    pub fn clear(&self) {
        info!("batch cleared");
        self.inner.board.clear();
    }

    fn publish(&self, notice: Notice) {
        // no subscribers is fine
        let _ = self.inner.notices.send(notice);
    }

    async fn ensure_debug_enabled(&self, target: &SubmitTarget) -> Result<(), BatchError> {
        let Some(control) = &self.inner.debug_control else {
            return Ok(());
        };
        let workflow_id = target.workflow_id();
        let result = async {
            let status = control.debug_status(workflow_id).await?;
            if !status.enabled {
                info!(workflow_id, "enabling debug mode before batch run");
                control.enable_debug(workflow_id).await?;
            }
            Ok::<(), ClientError>(())
        }
        .await;
        result.map_err(|err| {
            let message = err.message().to_string();
            warn!(workflow_id, error = %err, "debug gate failed");
            self.publish(Notice::DebugEnableFailed {
                message: message.clone(),
            });
            BatchError::DebugGate(message)
        })
    }

    async fn run_sequence(&self, generation: u64) -> Result<RunReport, BatchError> {
        let total = self.snapshot().tasks.len();
        let mut finished = false;
        let mut stopped_at = None;

        for id in 1..=total as TaskId {
            match self.run_task(generation, id, false).await? {
                TaskOutcome::Completed | TaskOutcome::TimedOut => {}
                TaskOutcome::Failed { .. } => {
                    stopped_at = Some(id);
                    break;
                }
                TaskOutcome::Discarded => {
                    debug!(generation, task_id = id, "batch superseded, stopping sequence");
                    break;
                }
            }
            if id as usize == total {
                finished = true;
            }
        }

        if !finished {
            self.release_undispatched(generation);
        }
        let snapshot = self.snapshot();
        let current = snapshot.generation == generation;
        let summary = if current {
            aggregate::summarize(&snapshot.tasks)
        } else {
            BatchSummary::default()
        };
        let finished = finished && current;
        if finished {
            self.finish_run(&snapshot, summary).await;
        }
        Ok(RunReport {
            run_id: if current { snapshot.run_id } else { None },
            generation,
            summary,
            finished,
            stopped_at,
        })
    }

    async fn finish_run(&self, snapshot: &BatchSnapshot, summary: BatchSummary) {
        info!(
            generation = snapshot.generation,
            ok_count = summary.ok_count,
            fail_count = summary.fail_count,
            "batch run finished"
        );
        self.publish(Notice::RunFinished {
            ok_count: summary.ok_count,
            fail_count: summary.fail_count,
        });
        let Some(target) = &snapshot.target else {
            return;
        };
        if let Some(run_id) = snapshot.run_id {
            self.inner
                .history
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push(
                    target.workflow_id(),
                    HistoryEntry {
                        run_id,
                        at: Utc::now(),
                        rows: summary.total,
                        ok_count: summary.ok_count,
                        fail_count: summary.fail_count,
                    },
                );
        }
        if let Some(sink) = &self.inner.run_log {
            let entry = RunLogEntry {
                workflow_id: target.workflow_id().to_string(),
                workflow_name: target.name().to_string(),
                node_name: target.node_name().map(ToOwned::to_owned),
                ok_count: summary.ok_count,
                fail_count: summary.fail_count,
            };
            if let Err(err) = sink.record_run(entry).await {
                warn!(error = %err, "failed to record batch run log");
            }
        }
    }

    /// Initial-group tasks the stopped sequence never reached go back to
    /// `Pending`, so `loading` only ever means an open stream.
    fn release_undispatched(&self, generation: u64) {
        let snapshot = self.snapshot();
        if snapshot.generation != generation {
            return;
        }
        let in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        for task in snapshot.tasks.iter().filter(|t| t.loading) {
            if !in_flight.contains(&(generation, task.id)) {
                self.inner.board.patch(generation, task.id, Task::release);
            }
        }
    }

    /// Reserves the in-flight slot of task `id` and marks it running.
    /// `None` when a stream for that task is already open.
    fn claim(&self, generation: u64, id: TaskId) -> Option<ActiveDispatch> {
        let mut in_flight = self
            .inner
            .in_flight
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if !in_flight.insert((generation, id)) {
            return None;
        }
        let dispatch = Dispatch::begin(self.inner.board.clone(), generation, id);
        Some(ActiveDispatch {
            dispatch,
            in_flight: self.inner.in_flight.clone(),
            key: (generation, id),
        })
    }

    async fn run_task(
        &self,
        generation: u64,
        id: TaskId,
        single: bool,
    ) -> Result<TaskOutcome, BatchError> {
        let snapshot = self.snapshot();
        if snapshot.generation != generation {
            return Ok(TaskOutcome::Discarded);
        }
        let target = snapshot.target.clone().ok_or(BatchError::NoBatch)?;
        let task = snapshot.task(id).ok_or(BatchError::UnknownTask(id))?;
        let request = TaskRequest {
            target,
            inputs: task.params.to_inputs(),
            batch_index: id,
            batch_total: snapshot.tasks.len() as u32,
        };

        let Some(active) = self.claim(generation, id) else {
            if single {
                return Err(BatchError::TaskInFlight(id));
            }
            debug!(generation, task_id = id, "task already streaming, waiting for it");
            return Ok(self.await_settled(generation, id).await);
        };

        let span = task_span(request.target.workflow_id(), generation, id);
        info!(parent: &span, single, "dispatching task");
        let outcome = active
            .dispatch
            .drive(
                self.inner.client.clone(),
                request,
                self.inner.config.task_timeout(),
            )
            .instrument(span)
            .await;
        drop(active);

        match &outcome {
            TaskOutcome::Completed => info!(generation, task_id = id, "task completed"),
            TaskOutcome::Failed { message } => {
                warn!(generation, task_id = id, error = %message, "task failed");
                self.publish(Notice::TaskFailed {
                    id,
                    message: message.clone(),
                });
                if extract::is_request_timeout(message) {
                    self.publish(Notice::RefreshRequested);
                }
            }
            TaskOutcome::TimedOut | TaskOutcome::Discarded => {}
        }
        Ok(outcome)
    }

    /// Waits for a stream opened elsewhere (a single-task retry) to settle
    /// and reads its outcome from the board.
    async fn await_settled(&self, generation: u64, id: TaskId) -> TaskOutcome {
        let mut rx = self.inner.board.subscribe();
        loop {
            {
                let snapshot = rx.borrow_and_update();
                if snapshot.generation != generation {
                    return TaskOutcome::Discarded;
                }
                match snapshot.task(id) {
                    None => return TaskOutcome::Discarded,
                    Some(task) if !task.loading => {
                        return match task.status {
                            TaskStatus::Completed => TaskOutcome::Completed,
                            TaskStatus::Failed => match &task.stream_state.error {
                                Some(message) => TaskOutcome::Failed {
                                    message: message.clone(),
                                },
                                None => TaskOutcome::TimedOut,
                            },
                            TaskStatus::Pending | TaskStatus::Running => TaskOutcome::Discarded,
                        };
                    }
                    Some(_) => {}
                }
            }
            if rx.changed().await.is_err() {
                return TaskOutcome::Discarded;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::validate::SlotKind;
    use batchrun_client::{DebugStatus, TaskStreamEvent, TaskStreamHandle};
    use futures::{StreamExt as _, stream};
    use serde_json::json;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;
    use tokio::sync::Notify;

    type Events = Vec<Result<TaskStreamEvent, ClientError>>;

    #[derive(Clone)]
    enum Script {
        Events(Events),
        Gated(Arc<Notify>, Events),
        Hang,
        OpenError(ClientError),
    }

    fn answer(id: TaskId) -> Script {
        Script::Events(vec![
            Ok(TaskStreamEvent::Started {
                message_id: Some(format!("m-{id}")),
            }),
            Ok(TaskStreamEvent::Chunk {
                payload: json!({"text": "thinking"}),
            }),
            Ok(TaskStreamEvent::Finished {
                payload: json!({"outputs": {"answer": format!("answer {id}")}}),
            }),
        ])
    }

    fn error_finish(message: &str) -> Script {
        Script::Events(vec![Ok(TaskStreamEvent::Finished {
            payload: json!({"error": message}),
        })])
    }

    #[derive(Default)]
    struct FakeClient {
        scripts: Mutex<HashMap<TaskId, VecDeque<Script>>>,
        requests: Mutex<Vec<TaskRequest>>,
    }

    impl FakeClient {
        fn script(&self, id: TaskId, script: Script) {
            self.scripts
                .lock()
                .unwrap()
                .entry(id)
                .or_default()
                .push_back(script);
        }

        fn calls(&self) -> Vec<TaskId> {
            self.requests
                .lock()
                .unwrap()
                .iter()
                .map(|r| r.batch_index)
                .collect()
        }
    }

    #[async_trait::async_trait]
    impl TaskStreamClient for FakeClient {
        async fn open_stream(
            &self,
            request: TaskRequest,
        ) -> Result<TaskStreamHandle, ClientError> {
            let id = request.batch_index;
            self.requests.lock().unwrap().push(request);
            let script = self
                .scripts
                .lock()
                .unwrap()
                .get_mut(&id)
                .and_then(VecDeque::pop_front)
                .unwrap_or_else(|| answer(id));
            match script {
                Script::Events(events) => Ok(TaskStreamHandle::new(Box::pin(stream::iter(events)))),
                Script::Gated(gate, events) => Ok(TaskStreamHandle::new(Box::pin(
                    stream::once(async move {
                        gate.notified().await;
                        stream::iter(events)
                    })
                    .flatten(),
                ))),
                Script::Hang => Ok(TaskStreamHandle::new(Box::pin(stream::pending::<
                    Result<TaskStreamEvent, ClientError>,
                >()))),
                Script::OpenError(err) => Err(err),
            }
        }
    }

    struct FakeDebug {
        enabled: bool,
        enable_error: Option<ClientError>,
        enable_calls: AtomicUsize,
        status_delay: Duration,
    }

    #[async_trait::async_trait]
    impl DebugControl for FakeDebug {
        async fn debug_status(&self, _workflow_id: &str) -> Result<DebugStatus, ClientError> {
            tokio::time::sleep(self.status_delay).await;
            Ok(DebugStatus {
                enabled: self.enabled,
            })
        }

        async fn enable_debug(&self, _workflow_id: &str) -> Result<(), ClientError> {
            self.enable_calls.fetch_add(1, Ordering::SeqCst);
            match &self.enable_error {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }
    }

    #[derive(Default)]
    struct FakeRunLog {
        entries: Mutex<Vec<RunLogEntry>>,
    }

    #[async_trait::async_trait]
    impl RunLogSink for FakeRunLog {
        async fn record_run(&self, entry: RunLogEntry) -> Result<(), ClientError> {
            self.entries.lock().unwrap().push(entry);
            Ok(())
        }
    }

    fn slots() -> Vec<InputSlot> {
        vec![InputSlot::new("question", SlotKind::Text)]
    }

    fn grid(n: usize) -> Vec<Vec<String>> {
        (1..=n).map(|i| vec![format!("q{i}")]).collect()
    }

    fn target() -> SubmitTarget {
        SubmitTarget::workflow("wf-1", "demo")
    }

    fn runner(client: Arc<FakeClient>) -> (BatchRunner, Arc<FakeRunLog>) {
        runner_with(client, BatchConfig::default())
    }

    fn runner_with(client: Arc<FakeClient>, config: BatchConfig) -> (BatchRunner, Arc<FakeRunLog>) {
        let run_log = Arc::new(FakeRunLog::default());
        let runner = BatchRunner::builder(client)
            .config(config)
            .run_log(run_log.clone())
            .build()
            .expect("runner");
        (runner, run_log)
    }

    fn drain(rx: &mut broadcast::Receiver<Notice>) -> Vec<Notice> {
        let mut out = Vec::new();
        while let Ok(notice) = rx.try_recv() {
            out.push(notice);
        }
        out
    }

    async fn wait_for_calls(client: &FakeClient, n: usize) {
        for _ in 0..200 {
            if client.calls().len() >= n {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("expected {n} dispatches, saw {:?}", client.calls());
    }

    #[tokio::test]
    async fn submit_runs_every_task_in_order() {
        let client = Arc::new(FakeClient::default());
        let (runner, run_log) = runner(client.clone());
        let mut notices = runner.notices();

        let report = runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        assert_eq!(client.calls(), vec![1, 2, 3]);
        assert!(report.finished);
        assert_eq!(report.summary.ok_count, 3);
        assert_eq!(report.stopped_at, None);

        let snapshot = runner.snapshot();
        let ids: Vec<TaskId> = snapshot.tasks.iter().map(|t| t.id).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        for task in &snapshot.tasks {
            assert_eq!(task.status, TaskStatus::Completed);
            assert!(!task.loading);
            assert_eq!(task.stream_state.text, format!("answer {}", task.id));
            assert_eq!(task.message_id, Some(format!("m-{}", task.id)));
        }

        assert_eq!(
            drain(&mut notices),
            vec![Notice::RunFinished {
                ok_count: 3,
                fail_count: 0
            }]
        );
        let entries = run_log.entries.lock().unwrap().clone();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].workflow_name, "demo");
        assert_eq!(entries[0].ok_count, 3);
        assert_eq!(runner.history().entries("wf-1").len(), 1);
    }

    #[tokio::test]
    async fn requests_carry_inputs_and_batch_position() {
        let client = Arc::new(FakeClient::default());
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(3)).await.expect("submit");
        let requests = client.requests.lock().unwrap().clone();
        assert_eq!(requests[1].batch_index, 2);
        assert_eq!(requests[1].batch_total, 3);
        assert_eq!(requests[1].inputs["question"], json!("q2"));
    }

    #[tokio::test]
    async fn next_task_waits_for_previous_terminal_event() {
        let client = Arc::new(FakeClient::default());
        let gate = Arc::new(Notify::new());
        client.script(
            1,
            Script::Gated(
                gate.clone(),
                vec![Ok(TaskStreamEvent::Finished {
                    payload: json!({"outputs": "one"}),
                })],
            ),
        );
        let (runner, _) = runner(client.clone());

        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.submit(target(), slots(), &grid(3)).await })
        };
        wait_for_calls(&client, 1).await;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(client.calls(), vec![1]);
        let snapshot = runner.snapshot();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Running);
        assert!(snapshot.tasks[0].loading);
        for task in &snapshot.tasks[1..] {
            assert_eq!(task.status, TaskStatus::Pending);
            assert!(!task.loading);
        }

        gate.notify_one();
        let report = handle.await.expect("join").expect("submit");
        assert!(report.finished);
        assert_eq!(client.calls(), vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn error_finish_fails_task_and_stops_sequence() {
        let client = Arc::new(FakeClient::default());
        client.script(2, error_finish("boom"));
        let (runner, run_log) = runner(client.clone());
        let mut notices = runner.notices();

        let report = runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        assert_eq!(client.calls(), vec![1, 2]);
        assert!(!report.finished);
        assert_eq!(report.stopped_at, Some(2));
        let snapshot = runner.snapshot();
        assert_eq!(snapshot.tasks[1].status, TaskStatus::Failed);
        assert!(!snapshot.tasks[1].loading);
        assert_eq!(snapshot.tasks[1].stream_state.error.as_deref(), Some("boom"));
        assert_eq!(snapshot.tasks[2].status, TaskStatus::Pending);
        assert_eq!(
            drain(&mut notices),
            vec![Notice::TaskFailed {
                id: 2,
                message: "boom".into()
            }]
        );
        assert!(run_log.entries.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn timeout_fails_task_silently_and_sequence_advances() {
        let client = Arc::new(FakeClient::default());
        client.script(2, Script::Hang);
        let config = BatchConfig::default().with_task_timeout(Duration::from_millis(50));
        let (runner, run_log) = runner_with(client.clone(), config);
        let mut notices = runner.notices();

        let report = runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        assert_eq!(client.calls(), vec![1, 2, 3]);
        assert!(report.finished);
        let task = runner.snapshot().tasks[1].clone();
        assert_eq!(task.status, TaskStatus::Failed);
        assert!(!task.loading);
        assert_eq!(task.stream_state.error, None);
        assert_eq!(
            drain(&mut notices),
            vec![Notice::RunFinished {
                ok_count: 2,
                fail_count: 1
            }]
        );
        assert_eq!(run_log.entries.lock().unwrap()[0].fail_count, 1);
    }

    #[tokio::test]
    async fn request_timeout_error_also_requests_refresh() {
        let client = Arc::new(FakeClient::default());
        client.script(1, error_finish("Request timeout"));
        let (runner, _) = runner(client.clone());
        let mut notices = runner.notices();

        runner.submit(target(), slots(), &grid(2)).await.expect("submit");

        assert_eq!(
            drain(&mut notices),
            vec![
                Notice::TaskFailed {
                    id: 1,
                    message: "Request timeout".into()
                },
                Notice::RefreshRequested,
            ]
        );
    }

    #[tokio::test]
    async fn open_error_fails_the_task() {
        let client = Arc::new(FakeClient::default());
        client.script(1, Script::OpenError(ClientError::api("bad gateway", Some(502))));
        let (runner, _) = runner(client.clone());

        let report = runner.submit(target(), slots(), &grid(2)).await.expect("submit");

        assert_eq!(report.stopped_at, Some(1));
        let task = runner.snapshot().tasks[0].clone();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.stream_state.error.as_deref(), Some("bad gateway"));
    }

    #[tokio::test]
    async fn stream_without_finish_fails_the_task() {
        let client = Arc::new(FakeClient::default());
        client.script(
            1,
            Script::Events(vec![Ok(TaskStreamEvent::Chunk {
                payload: json!("partial"),
            })]),
        );
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(1)).await.expect("submit");
        let task = runner.snapshot().tasks[0].clone();
        assert_eq!(task.status, TaskStatus::Failed);
        assert_eq!(task.stream_state.text, "partial");
    }

    #[tokio::test]
    async fn single_retry_does_not_dispatch_following_task() {
        let client = Arc::new(FakeClient::default());
        client.script(2, error_finish("boom"));
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        let outcome = runner.retry_task(2).await.expect("retry");

        assert_eq!(outcome, TaskOutcome::Completed);
        assert_eq!(client.calls(), vec![1, 2, 2]);
        let snapshot = runner.snapshot();
        assert_eq!(snapshot.tasks[1].status, TaskStatus::Completed);
        assert_eq!(snapshot.tasks[2].status, TaskStatus::Pending);
    }

    #[tokio::test]
    async fn retry_all_restarts_from_first_task() {
        let client = Arc::new(FakeClient::default());
        client.script(2, error_finish("boom"));
        let (runner, run_log) = runner(client.clone());
        let first = runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        let report = runner.retry_all().await.expect("retry all");

        assert!(report.generation > first.generation);
        assert!(report.finished);
        assert_eq!(client.calls(), vec![1, 2, 1, 2, 3]);
        assert_eq!(report.summary.ok_count, 3);
        assert_eq!(run_log.entries.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn single_retry_of_streaming_task_is_rejected() {
        let client = Arc::new(FakeClient::default());
        let gate = Arc::new(Notify::new());
        client.script(
            1,
            Script::Gated(
                gate.clone(),
                vec![Ok(TaskStreamEvent::Finished {
                    payload: json!({"outputs": "one"}),
                })],
            ),
        );
        let (runner, _) = runner(client.clone());
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.submit(target(), slots(), &grid(2)).await })
        };
        wait_for_calls(&client, 1).await;

        assert_eq!(
            runner.retry_task(1).await,
            Err(BatchError::TaskInFlight(1))
        );

        gate.notify_one();
        handle.await.expect("join").expect("submit");
        assert_eq!(client.calls(), vec![1, 2]);
    }

    #[tokio::test]
    async fn sequence_waits_for_a_retry_already_streaming_its_task() {
        let client = Arc::new(FakeClient::default());
        client.script(2, error_finish("boom"));
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        // task 2's retry hangs on a gate while the full sequence restarts
        let gate = Arc::new(Notify::new());
        client.script(
            2,
            Script::Gated(
                gate.clone(),
                vec![Ok(TaskStreamEvent::Finished {
                    payload: json!({"outputs": "late two"}),
                })],
            ),
        );
        let generation = runner.snapshot().generation;
        let retry = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_task(generation, 2, true).await })
        };
        wait_for_calls(&client, 3).await;
        let sequence = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_sequence(generation).await })
        };
        wait_for_calls(&client, 4).await;
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert_eq!(client.calls(), vec![1, 2, 2, 1]);

        gate.notify_one();
        assert_eq!(retry.await.expect("join"), Ok(TaskOutcome::Completed));
        let report = sequence.await.expect("join").expect("sequence");
        assert!(report.finished);
        assert_eq!(client.calls(), vec![1, 2, 2, 1, 3]);
    }

    #[tokio::test]
    async fn clear_discards_tasks_and_results() {
        let client = Arc::new(FakeClient::default());
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(2)).await.expect("submit");
        assert!(aggregate::has_results(&runner.snapshot().tasks));
        assert_eq!(runner.export().rows.len(), 2);

        runner.clear();

        assert!(runner.snapshot().is_empty());
        assert!(!aggregate::has_results(&runner.snapshot().tasks));
        assert!(runner.export().rows.is_empty());
        assert_eq!(runner.retry_all().await, Err(BatchError::NoBatch));
        assert_eq!(runner.retry_task(1).await, Err(BatchError::NoBatch));
    }

    #[tokio::test]
    async fn invalid_rows_create_no_tasks() {
        let client = Arc::new(FakeClient::default());
        let (runner, _) = runner(client.clone());
        let mut notices = runner.notices();
        let slots = vec![InputSlot::new("n", SlotKind::Integer)];
        let grid = vec![vec!["1".to_string()], vec!["x".to_string()]];

        let err = runner
            .submit(target(), slots, &grid)
            .await
            .expect_err("invalid");

        assert!(matches!(err, BatchError::Validation(ref e) if e.len() == 1));
        assert!(client.calls().is_empty());
        assert!(runner.snapshot().is_empty());
        assert!(matches!(
            drain(&mut notices).as_slice(),
            [Notice::ValidationFailed { .. }]
        ));
    }

    #[tokio::test]
    async fn unfinished_batch_blocks_new_submission() {
        let client = Arc::new(FakeClient::default());
        client.script(1, error_finish("boom"));
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        let err = runner
            .submit(target(), slots(), &grid(1))
            .await
            .expect_err("busy");
        assert_eq!(err, BatchError::Busy { pending: 2 });

        runner.clear();
        runner.submit(target(), slots(), &grid(1)).await.expect("after clear");
    }

    #[tokio::test]
    async fn group_size_marks_initial_tasks_running() {
        let client = Arc::new(FakeClient::default());
        let gate = Arc::new(Notify::new());
        client.script(
            1,
            Script::Gated(
                gate.clone(),
                vec![Ok(TaskStreamEvent::Finished {
                    payload: json!({"outputs": "one"}),
                })],
            ),
        );
        let (runner, _) = runner_with(client.clone(), BatchConfig::default().with_group_size(2));
        let handle = {
            let runner = runner.clone();
            tokio::spawn(async move { runner.submit(target(), slots(), &grid(3)).await })
        };
        wait_for_calls(&client, 1).await;

        let statuses: Vec<TaskStatus> = runner.snapshot().tasks.iter().map(|t| t.status).collect();
        assert_eq!(
            statuses,
            vec![TaskStatus::Running, TaskStatus::Running, TaskStatus::Pending]
        );
        assert_eq!(client.calls(), vec![1]);

        gate.notify_one();
        handle.await.expect("join").expect("submit");
    }

    #[tokio::test]
    async fn stopped_sequence_releases_undispatched_group_tasks() {
        let client = Arc::new(FakeClient::default());
        client.script(1, error_finish("boom"));
        let (runner, _) = runner_with(client.clone(), BatchConfig::default().with_group_size(2));

        runner.submit(target(), slots(), &grid(3)).await.expect("submit");

        let snapshot = runner.snapshot();
        assert_eq!(snapshot.tasks[0].status, TaskStatus::Failed);
        assert_eq!(snapshot.tasks[1].status, TaskStatus::Pending);
        assert!(snapshot.tasks.iter().all(|t| !t.loading));
    }

    #[tokio::test]
    async fn debug_gate_enables_before_running() {
        let client = Arc::new(FakeClient::default());
        let debug = Arc::new(FakeDebug {
            enabled: false,
            enable_error: None,
            enable_calls: AtomicUsize::new(0),
            status_delay: Duration::ZERO,
        });
        let runner = BatchRunner::builder(client.clone())
            .debug_control(debug.clone())
            .build()
            .expect("runner");

        runner.submit(target(), slots(), &grid(1)).await.expect("submit");

        assert_eq!(debug.enable_calls.load(Ordering::SeqCst), 1);
        assert_eq!(client.calls(), vec![1]);
    }

    #[tokio::test]
    async fn debug_enable_failure_aborts_submission() {
        let client = Arc::new(FakeClient::default());
        let debug = Arc::new(FakeDebug {
            enabled: false,
            enable_error: Some(ClientError::api("forbidden", Some(403))),
            enable_calls: AtomicUsize::new(0),
            status_delay: Duration::ZERO,
        });
        let runner = BatchRunner::builder(client.clone())
            .debug_control(debug)
            .build()
            .expect("runner");
        let mut notices = runner.notices();

        let err = runner
            .submit(target(), slots(), &grid(2))
            .await
            .expect_err("gate");

        assert_eq!(err, BatchError::DebugGate("forbidden".into()));
        assert!(client.calls().is_empty());
        assert!(runner.snapshot().is_empty());
        assert_eq!(
            drain(&mut notices),
            vec![Notice::DebugEnableFailed {
                message: "forbidden".into()
            }]
        );

        // the failed attempt released its submission slot
        assert_eq!(
            runner.submit(target(), slots(), &grid(2)).await,
            Err(BatchError::DebugGate("forbidden".into()))
        );
    }

    #[tokio::test]
    async fn concurrent_submit_is_rejected_while_first_passes_debug_gate() {
        let client = Arc::new(FakeClient::default());
        let debug = Arc::new(FakeDebug {
            enabled: true,
            enable_error: None,
            enable_calls: AtomicUsize::new(0),
            status_delay: Duration::from_millis(30),
        });
        let runner = BatchRunner::builder(client.clone())
            .debug_control(debug)
            .build()
            .expect("runner");

        let grid_a = grid(2);
        let grid_b = grid(3);
        let (first, second) = tokio::join!(
            runner.submit(target(), slots(), &grid_a),
            runner.submit(target(), slots(), &grid_b),
        );

        let report = first.expect("first submit");
        assert!(report.finished);
        assert_eq!(report.summary.total, 2);
        assert_eq!(second, Err(BatchError::Busy { pending: 0 }));
        assert_eq!(client.calls(), vec![1, 2]);

        runner.submit(target(), slots(), &grid(1)).await.expect("after first run");
    }

    #[tokio::test]
    async fn retry_of_unknown_task_is_rejected() {
        let client = Arc::new(FakeClient::default());
        let (runner, _) = runner(client.clone());
        runner.submit(target(), slots(), &grid(2)).await.expect("submit");

        assert_eq!(
            runner.retry_task(99).await,
            Err(BatchError::UnknownTask(99))
        );
        assert_eq!(client.calls(), vec![1, 2]);
    }

    #[tokio::test]
    async fn node_target_reports_node_name_to_run_log() {
        let client = Arc::new(FakeClient::default());
        let run_log = Arc::new(FakeRunLog::default());
        let runner = BatchRunner::builder(client)
            .run_log(run_log.clone())
            .build()
            .expect("runner");

        runner
            .submit(SubmitTarget::node("wf-1", "demo", "n-1", "llm"), slots(), &grid(1))
            .await
            .expect("submit");

        let entries = run_log.entries.lock().unwrap().clone();
        assert_eq!(entries[0].node_name.as_deref(), Some("llm"));
    }
}
