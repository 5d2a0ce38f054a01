//! Saga orchestration: correlate events across aggregates into follow-up
//! commands.
//!
//! A [`Saga`] is a stateless reaction policy. The [`SagaOrchestrator`] owns
//! every saga instance, keyed by saga name and correlation id, and is the
//! only thing that mutates them. Instance lifecycle:
//!
//! ```text
//! Idle --start--> Waiting --confirm--> Completed
//!                    |
//!                    +--dispatch fails--> Failed
//! ```
//!
//! Terminal instances are retired from the live set. Until the bridge
//! reports that history has been replayed, starts only rebuild `Waiting`
//! instances; the follow-up commands of those still waiting are dispatched
//! once the orchestrator is caught up. This completes sagas interrupted
//! between their two writes without re-dispatching finished ones.
//!
//! Replay alone cannot tell a failed instance from an interrupted one, since
//! a failure appends nothing to the store. With a dead-letter directory set,
//! [`SagaOrchestrator::restore_dead_letters`] reads the logged failures back
//! before replay so those instances stay `Failed`. Without one, a failed
//! follow-up is dispatched again after a restart.

use std::collections::{BTreeSet, HashMap};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::command::CommandEnvelope;
use crate::command_bus::CommandBus;
use crate::error::{BoxError, RegistrationError, SagaError};
use crate::event::{RecordedEvent, now_millis};
use crate::event_bus::{EventBus, EventHandler};

/// What a saga wants done in response to an event.
#[derive(Debug, Clone, PartialEq)]
pub enum SagaReaction {
    /// Nothing to do.
    Ignore,
    /// Open an instance for `correlation_id` and dispatch `command`.
    Start {
        correlation_id: String,
        command: CommandEnvelope,
    },
    /// The follow-up for `correlation_id` has taken effect.
    Confirm { correlation_id: String },
}

/// A cross-aggregate reaction policy.
pub trait Saga: Send + Sync + 'static {
    /// Unique name, used as a key and as the dead-letter directory name.
    fn name(&self) -> &str;

    /// Event type tags this saga reacts to.
    fn event_types(&self) -> &'static [&'static str];

    /// Decide how to react to `event`.
    ///
    /// # Errors
    ///
    /// Returns an error if the event cannot be interpreted. The error is
    /// logged; no instance changes state.
    fn react(&self, event: &RecordedEvent) -> Result<SagaReaction, BoxError>;
}

/// State of one saga instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state")]
pub enum SagaState {
    /// No instance exists.
    Idle,
    /// Follow-up command issued (or pending), confirmation not yet seen.
    Waiting,
    Completed,
    Failed { error: String },
}

/// A live saga instance.
#[derive(Debug, Clone, PartialEq)]
pub struct SagaInstance {
    pub saga: String,
    pub correlation_id: String,
    /// The follow-up command this instance is waiting on.
    pub command: CommandEnvelope,
    pub started_at: u64,
    /// Whether `command` has been handed to the command bus.
    pub dispatched: bool,
}

/// A failed follow-up dispatch, kept for operator visibility.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaFailure {
    pub saga: String,
    pub correlation_id: String,
    pub command: CommandEnvelope,
    /// Human-readable cause.
    pub error: String,
    /// Unix epoch milliseconds.
    pub failed_at: u64,
}

/// Running totals of instance transitions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SagaReport {
    pub started: usize,
    pub completed: usize,
    pub failed: usize,
}

type InstanceKey = (String, String);

#[derive(Default)]
struct OrchestratorState {
    instances: HashMap<InstanceKey, SagaInstance>,
    /// Terminal state of retired instances. Holds one entry per correlation
    /// id ever started, so it grows with the number of sagas run (for the
    /// identity saga, one per user); it is what makes a redelivered start a
    /// no-op.
    outcomes: HashMap<InstanceKey, SagaState>,
    failures: Vec<SagaFailure>,
    report: SagaReport,
}

/// Owns saga instances and drives them from events.
pub struct SagaOrchestrator {
    sagas: Vec<Arc<dyn Saga>>,
    commands: Arc<CommandBus>,
    dead_letter_dir: Option<PathBuf>,
    live: AtomicBool,
    state: Mutex<OrchestratorState>,
}

impl std::fmt::Debug for SagaOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<_> = self.sagas.iter().map(|s| s.name().to_owned()).collect();
        f.debug_struct("SagaOrchestrator")
            .field("sagas", &names)
            .field("live", &self.is_live())
            .field("dead_letter_dir", &self.dead_letter_dir)
            .finish()
    }
}

impl SagaOrchestrator {
    /// Create an orchestrator dispatching through `commands`.
    ///
    /// # Arguments
    ///
    /// * `commands` - The command bus follow-up commands are dispatched on.
    /// * `sagas` - The sagas to drive.
    /// * `dead_letter_dir` - If set, each failure is also appended to
    ///   `<dir>/<saga>/dead_letters.jsonl`.
    pub fn new(
        commands: Arc<CommandBus>,
        sagas: Vec<Arc<dyn Saga>>,
        dead_letter_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            sagas,
            commands,
            dead_letter_dir,
            live: AtomicBool::new(false),
            state: Mutex::new(OrchestratorState::default()),
        }
    }

    /// Register the orchestrator on `bus` for every type any saga reacts to.
    pub fn register_on(self: &Arc<Self>, bus: &mut EventBus) {
        let types: BTreeSet<&'static str> = self
            .sagas
            .iter()
            .flat_map(|saga| saga.event_types().iter().copied())
            .collect();
        let handler: Arc<dyn EventHandler> = Arc::clone(self) as Arc<dyn EventHandler>;
        for event_type in types {
            bus.register(event_type, Arc::clone(&handler));
        }
    }

    /// Whether history has been replayed and starts dispatch immediately.
    pub fn is_live(&self) -> bool {
        self.live.load(Ordering::Acquire)
    }

    /// Current state of the instance for `(saga, correlation_id)`.
    pub fn state(&self, saga: &str, correlation_id: &str) -> SagaState {
        let key = (saga.to_owned(), correlation_id.to_owned());
        let state = self.lock();
        if state.instances.contains_key(&key) {
            return SagaState::Waiting;
        }
        state.outcomes.get(&key).cloned().unwrap_or(SagaState::Idle)
    }

    /// Instances currently waiting for confirmation, oldest first.
    pub fn waiting(&self) -> Vec<SagaInstance> {
        let mut waiting: Vec<_> = self.lock().instances.values().cloned().collect();
        waiting.sort_by_key(|i| i.started_at);
        waiting
    }

    /// Every dispatch failure seen so far.
    pub fn failures(&self) -> Vec<SagaFailure> {
        self.lock().failures.clone()
    }

    pub fn report(&self) -> SagaReport {
        self.lock().report
    }

    /// Number of retired instances whose outcome is kept.
    pub fn retained(&self) -> usize {
        self.lock().outcomes.len()
    }

    /// Mark every instance found in the dead-letter logs as `Failed`.
    ///
    /// Call before history is replayed. Restored failures are listed by
    /// [`failures`](Self::failures) but not counted in the report. Does
    /// nothing without a dead-letter directory.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DeadLetterLog`] if a log exists but
    /// cannot be read.
    pub fn restore_dead_letters(&self) -> Result<usize, RegistrationError> {
        let Some(dir) = &self.dead_letter_dir else {
            return Ok(0);
        };
        let mut restored = Vec::new();
        for saga in &self.sagas {
            let path = dead_letter_path(dir, saga.name());
            let failures = read_dead_letters(&path)
                .map_err(|source| RegistrationError::DeadLetterLog { path, source })?;
            restored.extend(failures);
        }

        let mut state = self.lock();
        for failure in &restored {
            let key = (failure.saga.clone(), failure.correlation_id.clone());
            state.outcomes.insert(
                key,
                SagaState::Failed {
                    error: failure.error.clone(),
                },
            );
        }
        let count = restored.len();
        state.failures.extend(restored);
        Ok(count)
    }

    fn lock(&self) -> MutexGuard<'_, OrchestratorState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    async fn start(
        &self,
        saga: &dyn Saga,
        correlation_id: String,
        mut command: CommandEnvelope,
        cause: &RecordedEvent,
    ) -> Result<(), SagaError> {
        if command.context.correlation_id.is_none() {
            command.context.correlation_id = Some(correlation_id.clone());
        }
        command.context.causation_id = Some(cause.event_id.to_string());

        let key = (saga.name().to_owned(), correlation_id);
        let live = self.is_live();
        {
            let mut state = self.lock();
            if state.instances.contains_key(&key) || state.outcomes.contains_key(&key) {
                tracing::debug!(
                    saga = %key.0,
                    correlation_id = %key.1,
                    "duplicate start ignored"
                );
                return Ok(());
            }
            state.instances.insert(
                key.clone(),
                SagaInstance {
                    saga: key.0.clone(),
                    correlation_id: key.1.clone(),
                    command: command.clone(),
                    started_at: cause.global_position,
                    dispatched: live,
                },
            );
            state.report.started += 1;
        }

        if !live {
            tracing::debug!(
                saga = %key.0,
                correlation_id = %key.1,
                "instance rebuilt from history, dispatch deferred"
            );
            return Ok(());
        }
        self.dispatch(key, command).await
    }

    async fn dispatch(&self, key: InstanceKey, command: CommandEnvelope) -> Result<(), SagaError> {
        let command_type = command.command_type.clone();
        match self.commands.dispatch(command.clone()).await {
            Ok(outcome) => {
                tracing::info!(
                    saga = %key.0,
                    correlation_id = %key.1,
                    command_type = %command_type,
                    stream_id = %outcome.stream_id,
                    version = outcome.version,
                    "saga dispatched follow-up command"
                );
                Ok(())
            }
            Err(source) => {
                tracing::error!(
                    saga = %key.0,
                    correlation_id = %key.1,
                    command_type = %command_type,
                    error = %source,
                    "saga follow-up dispatch failed"
                );
                self.fail(&key, command, source.to_string());
                Err(SagaError::DispatchFailure {
                    saga: key.0,
                    correlation_id: key.1,
                    source,
                })
            }
        }
    }

    fn fail(&self, key: &InstanceKey, command: CommandEnvelope, error: String) {
        let failure = SagaFailure {
            saga: key.0.clone(),
            correlation_id: key.1.clone(),
            command,
            error: error.clone(),
            failed_at: now_millis(),
        };
        {
            let mut state = self.lock();
            state.instances.remove(key);
            state.outcomes.insert(key.clone(), SagaState::Failed { error });
            state.failures.push(failure.clone());
            state.report.failed += 1;
        }

        if let Some(dir) = &self.dead_letter_dir {
            let path = dead_letter_path(dir, &failure.saga);
            if let Err(e) = append_dead_letter(&path, &failure) {
                tracing::error!(
                    path = %path.display(),
                    error = %e,
                    "failed to write dead letter"
                );
            }
        }
    }

    fn confirm(&self, saga: &str, correlation_id: String) {
        let key = (saga.to_owned(), correlation_id);
        let mut state = self.lock();
        if state.instances.remove(&key).is_some() {
            state.outcomes.insert(key.clone(), SagaState::Completed);
            state.report.completed += 1;
            tracing::info!(saga = %key.0, correlation_id = %key.1, "saga completed");
        } else {
            tracing::debug!(
                saga = %key.0,
                correlation_id = %key.1,
                "confirmation without a waiting instance"
            );
        }
    }
}

#[async_trait]
impl EventHandler for SagaOrchestrator {
    fn name(&self) -> &str {
        "saga-orchestrator"
    }

    async fn handle(&self, event: &RecordedEvent) -> Result<(), BoxError> {
        let mut first_error: Option<SagaError> = None;

        for saga in &self.sagas {
            if !saga.event_types().contains(&event.event_type.as_str()) {
                continue;
            }
            let span = tracing::info_span!(
                "saga",
                saga = saga.name(),
                event_type = %event.event_type,
                stream_id = %event.stream_id,
            );
            let reaction = {
                let _entered = span.enter();
                saga.react(event)
            };

            let result = match reaction {
                Ok(SagaReaction::Ignore) => Ok(()),
                Ok(SagaReaction::Start {
                    correlation_id,
                    command,
                }) => {
                    self.start(saga.as_ref(), correlation_id, command, event)
                        .await
                }
                Ok(SagaReaction::Confirm { correlation_id }) => {
                    self.confirm(saga.name(), correlation_id);
                    Ok(())
                }
                Err(source) => {
                    tracing::error!(
                        saga = saga.name(),
                        event_type = %event.event_type,
                        error = %source,
                        "saga could not react to event"
                    );
                    Err(SagaError::React {
                        saga: saga.name().to_owned(),
                        event_type: event.event_type.clone(),
                        source,
                    })
                }
            };
            if let Err(e) = result {
                first_error.get_or_insert(e);
            }
        }

        match first_error {
            Some(e) => Err(Box::new(e)),
            None => Ok(()),
        }
    }

    async fn caught_up(&self) {
        let pending: Vec<SagaInstance> = {
            let mut state = self.lock();
            let mut pending: Vec<SagaInstance> = state
                .instances
                .values_mut()
                .filter(|i| !i.dispatched)
                .map(|i| {
                    i.dispatched = true;
                    i.clone()
                })
                .collect();
            pending.sort_by_key(|i| i.started_at);
            self.live.store(true, Ordering::Release);
            pending
        };

        tracing::info!(pending = pending.len(), "saga orchestrator caught up");
        for instance in pending {
            let key = (instance.saga, instance.correlation_id);
            // Failures are recorded by `dispatch`.
            let _ = self.dispatch(key, instance.command).await;
        }
    }
}

fn dead_letter_path(dir: &Path, saga: &str) -> PathBuf {
    dir.join(saga).join("dead_letters.jsonl")
}

/// Append a single failure to the JSONL dead-letter log at `path`.
///
/// Creates the file and its parent directory if they do not exist.
///
/// # Errors
///
/// Returns `io::Error` if file I/O fails.
pub(crate) fn append_dead_letter(path: &Path, failure: &SagaFailure) -> io::Result<()> {
    use std::io::Write;
    let json = serde_json::to_string(failure).map_err(io::Error::other)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)?;
    writeln!(file, "{json}")?;
    Ok(())
}

/// Read back a dead-letter log written by the orchestrator.
///
/// A missing file reads as empty.
///
/// # Errors
///
/// Returns `io::Error` if the file cannot be read or a line is not a
/// valid [`SagaFailure`].
pub fn read_dead_letters(path: &Path) -> io::Result<Vec<SagaFailure>> {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };
    contents
        .lines()
        .filter(|line| !line.trim().is_empty())
        .map(|line| serde_json::from_str(line).map_err(io::Error::other))
        .collect()
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;
    use crate::command::CommandOutcome;
    use crate::command_bus::CommandHandler;
    use crate::error::DispatchError;
    use crate::event::ProposedEvent;

    /// `Pinged` starts an instance that dispatches `Pong`; `Ponged` confirms.
    struct PingPong;

    impl Saga for PingPong {
        fn name(&self) -> &str {
            "ping-pong"
        }

        fn event_types(&self) -> &'static [&'static str] {
            &["Pinged", "Ponged"]
        }

        fn react(&self, event: &RecordedEvent) -> Result<SagaReaction, BoxError> {
            Ok(match event.event_type.as_str() {
                "Pinged" => SagaReaction::Start {
                    correlation_id: event.aggregate_id.clone(),
                    command: CommandEnvelope::new(
                        "Pong",
                        event.aggregate_id.clone(),
                        serde_json::Value::Null,
                    ),
                },
                "Ponged" => SagaReaction::Confirm {
                    correlation_id: event.aggregate_id.clone(),
                },
                _ => SagaReaction::Ignore,
            })
        }
    }

    struct PongHandler {
        calls: AtomicUsize,
        reject: bool,
    }

    #[async_trait]
    impl CommandHandler for PongHandler {
        async fn handle(&self, command: CommandEnvelope) -> Result<CommandOutcome, DispatchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.reject {
                return Err(DispatchError::HandlerError("pong refused".into()));
            }
            Ok(CommandOutcome {
                stream_id: format!("pong-{}", command.aggregate_id),
                version: 1,
                events: vec![],
            })
        }
    }

    fn orchestrator(reject: bool, dir: Option<PathBuf>) -> (Arc<SagaOrchestrator>, Arc<PongHandler>) {
        let handler = Arc::new(PongHandler {
            calls: AtomicUsize::new(0),
            reject,
        });
        let mut bus = CommandBus::new();
        bus.register("Pong", handler.clone()).expect("register");
        let orchestrator = SagaOrchestrator::new(Arc::new(bus), vec![Arc::new(PingPong)], dir);
        (Arc::new(orchestrator), handler)
    }

    fn recorded(event_type: &str, id: &str, position: u64) -> RecordedEvent {
        let proposed = ProposedEvent::new("ping", id, event_type, serde_json::Value::Null);
        RecordedEvent::from_proposed(proposed, &format!("ping-{id}"), 1, position, 0)
    }

    #[tokio::test]
    async fn live_start_dispatches_and_confirmation_completes() {
        let (saga, pong) = orchestrator(false, None);
        saga.caught_up().await;

        saga.handle(&recorded("Pinged", "p1", 0)).await.unwrap();
        assert_eq!(saga.state("ping-pong", "p1"), SagaState::Waiting);
        assert_eq!(pong.calls.load(Ordering::SeqCst), 1);

        saga.handle(&recorded("Ponged", "p1", 1)).await.unwrap();
        assert_eq!(saga.state("ping-pong", "p1"), SagaState::Completed);
        assert!(saga.waiting().is_empty());
        assert_eq!(
            saga.report(),
            SagaReport {
                started: 1,
                completed: 1,
                failed: 0
            }
        );
    }

    #[tokio::test]
    async fn follow_up_carries_correlation_and_causation() {
        let (saga, _) = orchestrator(false, None);
        let ping = recorded("Pinged", "p1", 0);
        saga.handle(&ping).await.unwrap();

        let waiting = saga.waiting();
        assert_eq!(waiting.len(), 1);
        let context = &waiting[0].command.context;
        assert_eq!(context.correlation_id.as_deref(), Some("p1"));
        assert_eq!(context.causation_id, Some(ping.event_id.to_string()));
    }

    #[tokio::test]
    async fn replay_defers_dispatch_until_caught_up() {
        let (saga, pong) = orchestrator(false, None);

        // History: p1 finished before the restart, p2 was interrupted.
        saga.handle(&recorded("Pinged", "p1", 0)).await.unwrap();
        saga.handle(&recorded("Ponged", "p1", 1)).await.unwrap();
        saga.handle(&recorded("Pinged", "p2", 2)).await.unwrap();
        assert_eq!(pong.calls.load(Ordering::SeqCst), 0);

        saga.caught_up().await;
        assert!(saga.is_live());
        assert_eq!(pong.calls.load(Ordering::SeqCst), 1);
        assert_eq!(saga.state("ping-pong", "p1"), SagaState::Completed);
        assert_eq!(saga.state("ping-pong", "p2"), SagaState::Waiting);
    }

    #[tokio::test]
    async fn duplicate_start_is_ignored() {
        let (saga, pong) = orchestrator(false, None);
        saga.caught_up().await;

        saga.handle(&recorded("Pinged", "p1", 0)).await.unwrap();
        saga.handle(&recorded("Pinged", "p1", 0)).await.unwrap();
        assert_eq!(pong.calls.load(Ordering::SeqCst), 1);
        assert_eq!(saga.report().started, 1);
    }

    #[tokio::test]
    async fn dispatch_failure_marks_failed_and_dead_letters() {
        let tmp = tempfile::tempdir().expect("failed to create tmpdir");
        let (saga, _) = orchestrator(true, Some(tmp.path().to_path_buf()));
        saga.caught_up().await;

        let err = saga
            .handle(&recorded("Pinged", "p1", 0))
            .await
            .expect_err("dispatch fails");
        assert!(err.to_string().contains("pong refused"));

        assert!(matches!(
            saga.state("ping-pong", "p1"),
            SagaState::Failed { .. }
        ));
        let failures = saga.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].correlation_id, "p1");
        assert_eq!(failures[0].command.command_type, "Pong");

        let path = tmp.path().join("ping-pong").join("dead_letters.jsonl");
        let logged = read_dead_letters(&path).expect("read dead letters");
        assert_eq!(logged, failures);
    }

    #[tokio::test]
    async fn restored_failure_is_not_dispatched_on_replay() {
        let tmp = tempfile::tempdir().expect("failed to create tmpdir");
        {
            let (saga, _) = orchestrator(true, Some(tmp.path().to_path_buf()));
            saga.caught_up().await;
            let _ = saga.handle(&recorded("Pinged", "p1", 0)).await;
        }

        // Restart: the handler would now accept, but p1 already failed.
        let (saga, pong) = orchestrator(false, Some(tmp.path().to_path_buf()));
        assert_eq!(saga.restore_dead_letters().expect("restore"), 1);
        saga.handle(&recorded("Pinged", "p1", 0)).await.unwrap();
        saga.handle(&recorded("Pinged", "p2", 1)).await.unwrap();
        saga.caught_up().await;

        assert_eq!(pong.calls.load(Ordering::SeqCst), 1);
        assert!(matches!(
            saga.state("ping-pong", "p1"),
            SagaState::Failed { ref error } if error.contains("pong refused")
        ));
        assert_eq!(saga.state("ping-pong", "p2"), SagaState::Waiting);
        assert_eq!(saga.failures().len(), 1);
        assert_eq!(saga.report().failed, 0);

        let path = tmp.path().join("ping-pong").join("dead_letters.jsonl");
        assert_eq!(read_dead_letters(&path).expect("read").len(), 1);
    }

    #[test]
    fn restore_without_dead_letter_dir_is_a_no_op() {
        let (saga, _) = orchestrator(false, None);
        assert_eq!(saga.restore_dead_letters().expect("restore"), 0);
    }

    #[test]
    fn unreadable_dead_letter_log_fails_restore() {
        let tmp = tempfile::tempdir().expect("failed to create tmpdir");
        let path = tmp.path().join("ping-pong").join("dead_letters.jsonl");
        std::fs::create_dir_all(path.parent().unwrap()).unwrap();
        std::fs::write(&path, b"not json\n").unwrap();

        let (saga, _) = orchestrator(false, Some(tmp.path().to_path_buf()));
        let err = saga.restore_dead_letters().expect_err("corrupt log");
        assert!(matches!(err, RegistrationError::DeadLetterLog { .. }));
    }

    #[tokio::test]
    async fn retained_outcomes_grow_per_correlation_id_only() {
        let (saga, _) = orchestrator(false, None);
        saga.caught_up().await;

        for round in 0..3 {
            for id in ["p1", "p2"] {
                saga.handle(&recorded("Pinged", id, round)).await.unwrap();
                saga.handle(&recorded("Ponged", id, round)).await.unwrap();
            }
        }
        assert_eq!(saga.retained(), 2);
        assert!(saga.waiting().is_empty());
    }

    #[test]
    fn missing_dead_letter_log_reads_empty() {
        let tmp = tempfile::tempdir().expect("failed to create tmpdir");
        let logged = read_dead_letters(&tmp.path().join("none.jsonl")).expect("read");
        assert!(logged.is_empty());
    }

    #[test]
    fn register_on_covers_saga_event_types() {
        let (saga, _) = orchestrator(false, None);
        let mut bus = EventBus::new();
        saga.register_on(&mut bus);
        assert_eq!(bus.handler_count("Pinged"), 1);
        assert_eq!(bus.handler_count("Ponged"), 1);
    }
}
