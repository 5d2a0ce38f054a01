//! Top-level entry point that composes the store, the three buses, the saga
//! orchestrator and the store-to-bus bridge into a single [`Runtime`].
//!
//! The runtime is assembled once at startup by [`RuntimeBuilder`]; every
//! dispatch table is fixed from then on. There is no global state: callers
//! pass the runtime (or an `Arc` of it) to whatever needs it.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use serde_json::Value;
use tracing::Instrument;

use crate::command::{CommandEnvelope, CommandOutcome};
use crate::command_bus::{CommandBus, CommandHandler};
use crate::error::{DispatchError, QueryError, RegistrationError};
use crate::event_bus::{EventBus, EventHandler};
use crate::live::{BridgeConfig, BridgeHandle, spawn_bridge};
use crate::query::{QueryBus, QueryEnvelope, QueryHandler};
use crate::saga::{Saga, SagaOrchestrator};
use crate::store::EventStore;

/// A running CQRS core.
///
/// `Clone` is cheap: all fields are shared.
#[derive(Clone)]
pub struct Runtime {
    store: Arc<dyn EventStore>,
    commands: Arc<CommandBus>,
    events: Arc<EventBus>,
    queries: Arc<QueryBus>,
    sagas: Arc<SagaOrchestrator>,
    bridge: BridgeHandle,
}

impl std::fmt::Debug for Runtime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Runtime")
            .field("commands", &self.commands)
            .field("events", &self.events)
            .field("queries", &self.queries)
            .field("sagas", &self.sagas)
            .field("bridge", &self.bridge)
            .finish()
    }
}

impl Runtime {
    /// Start building a runtime over `store`.
    pub fn builder(store: Arc<dyn EventStore>) -> RuntimeBuilder {
        RuntimeBuilder::new(store)
    }

    /// Dispatch a command to its handler.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::HandlerNotFound`] if no handler is registered.
    /// * [`DispatchError::ConcurrencyConflict`] if another writer won the
    ///   append; the caller may retry.
    /// * [`DispatchError::HandlerError`] if the aggregate rejected it.
    pub async fn submit_command(
        &self,
        command: CommandEnvelope,
    ) -> Result<CommandOutcome, DispatchError> {
        self.commands.dispatch(command).await
    }

    /// Dispatch a command, retrying up to `max_retries` times while it loses
    /// optimistic concurrency races. Each retry replays the aggregate anew.
    ///
    /// # Errors
    ///
    /// Returns the last conflict once retries are exhausted, or the first
    /// non-conflict error.
    pub async fn submit_command_with_retry(
        &self,
        command: CommandEnvelope,
        max_retries: u32,
    ) -> Result<CommandOutcome, DispatchError> {
        let span = tracing::info_span!(
            "submit",
            command_type = %command.command_type,
            aggregate_id = %command.aggregate_id,
        );
        async move {
            let mut attempt = 0;
            loop {
                match self.commands.dispatch(command.clone()).await {
                    Err(e) if e.is_conflict() && attempt < max_retries => {
                        attempt += 1;
                        tracing::warn!(attempt, max_retries, error = %e, "retrying after conflict");
                    }
                    result => return result,
                }
            }
        }
        .instrument(span)
        .await
    }

    /// Execute a side-effect-free query.
    ///
    /// # Errors
    ///
    /// * [`QueryError::HandlerNotFound`] if no handler is registered.
    /// * [`QueryError::NotFound`] if the requested read model does not exist.
    pub async fn execute_query(&self, query: QueryEnvelope) -> Result<Value, QueryError> {
        self.queries.execute(query).await
    }

    /// Wait until the bridge has caught up and has published every event
    /// in the store, including events appended by reactions to those
    /// events.
    ///
    /// # Returns
    ///
    /// `false` if the bridge stopped first.
    pub async fn settle(&self) -> bool {
        if !self.bridge.wait_caught_up().await {
            return false;
        }
        loop {
            let head = self.store.head_position();
            if head > 0 && !self.bridge.wait_for(head - 1).await {
                return false;
            }
            if self.store.head_position() == head {
                return true;
            }
        }
    }

    pub fn store(&self) -> &Arc<dyn EventStore> {
        &self.store
    }

    pub fn sagas(&self) -> &Arc<SagaOrchestrator> {
        &self.sagas
    }

    pub fn bridge(&self) -> &BridgeHandle {
        &self.bridge
    }

    /// Stop the bridge. Commands and queries keep working; events appended
    /// afterwards are no longer published.
    pub async fn shutdown(&self) {
        self.bridge.shutdown().await;
        tracing::info!("runtime stopped");
    }
}

/// Builder for a [`Runtime`].
///
/// Registrations are collected as given and validated by
/// [`start`](RuntimeBuilder::start).
///
/// # Examples
///
/// ```no_run
/// use std::sync::Arc;
/// use identity_es::{InMemoryEventStore, Runtime};
/// use identity_es::identity::IdentityModule;
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let store = Arc::new(InMemoryEventStore::new());
/// let identity = IdentityModule::new(store.clone());
/// let runtime = Runtime::builder(store)
///     .command_handlers(identity.command_handlers())
///     .event_handlers(identity.event_handlers())
///     .query_handlers(identity.query_handlers())
///     .sagas(identity.sagas())
///     .start()
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct RuntimeBuilder {
    store: Arc<dyn EventStore>,
    command_handlers: Vec<(String, Arc<dyn CommandHandler>)>,
    event_handlers: Vec<(String, Arc<dyn EventHandler>)>,
    query_handlers: Vec<(String, Arc<dyn QueryHandler>)>,
    sagas: Vec<Arc<dyn Saga>>,
    bridge_config: BridgeConfig,
    dead_letter_dir: Option<PathBuf>,
}

impl RuntimeBuilder {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            command_handlers: Vec::new(),
            event_handlers: Vec::new(),
            query_handlers: Vec::new(),
            sagas: Vec::new(),
            bridge_config: BridgeConfig::default(),
            dead_letter_dir: None,
        }
    }

    /// Register the handler for one command type.
    pub fn command_handler(
        mut self,
        command_type: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Self {
        self.command_handlers.push((command_type.into(), handler));
        self
    }

    /// Register a table of command handlers.
    pub fn command_handlers(
        mut self,
        handlers: impl IntoIterator<Item = (String, Arc<dyn CommandHandler>)>,
    ) -> Self {
        self.command_handlers.extend(handlers);
        self
    }

    /// Add an event handler to one event type's fan-out.
    pub fn event_handler(
        mut self,
        event_type: impl Into<String>,
        handler: Arc<dyn EventHandler>,
    ) -> Self {
        self.event_handlers.push((event_type.into(), handler));
        self
    }

    /// Register a table of event handlers.
    pub fn event_handlers(
        mut self,
        handlers: impl IntoIterator<Item = (String, Arc<dyn EventHandler>)>,
    ) -> Self {
        self.event_handlers.extend(handlers);
        self
    }

    /// Register the handler for one query type.
    pub fn query_handler(
        mut self,
        query_type: impl Into<String>,
        handler: Arc<dyn QueryHandler>,
    ) -> Self {
        self.query_handlers.push((query_type.into(), handler));
        self
    }

    /// Register a table of query handlers.
    pub fn query_handlers(
        mut self,
        handlers: impl IntoIterator<Item = (String, Arc<dyn QueryHandler>)>,
    ) -> Self {
        self.query_handlers.extend(handlers);
        self
    }

    pub fn saga(mut self, saga: Arc<dyn Saga>) -> Self {
        self.sagas.push(saga);
        self
    }

    pub fn sagas(mut self, sagas: impl IntoIterator<Item = Arc<dyn Saga>>) -> Self {
        self.sagas.extend(sagas);
        self
    }

    /// Set where the bridge starts and how it reconnects.
    ///
    /// If not called, [`BridgeConfig::default()`] is used.
    pub fn bridge_config(mut self, config: BridgeConfig) -> Self {
        self.bridge_config = config;
        self
    }

    /// Also append saga failures to `<dir>/<saga>/dead_letters.jsonl`.
    pub fn dead_letter_dir(mut self, dir: impl AsRef<Path>) -> Self {
        self.dead_letter_dir = Some(dir.as_ref().to_owned());
        self
    }

    /// Build the dispatch tables and start the bridge.
    ///
    /// Must be called from within a Tokio runtime.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError`] if two handlers claim the same command
    /// or query type, or if a saga dead-letter log cannot be read.
    pub async fn start(self) -> Result<Runtime, RegistrationError> {
        let mut commands = CommandBus::new();
        for (command_type, handler) in self.command_handlers {
            commands.register(command_type, handler)?;
        }
        let commands = Arc::new(commands);

        let mut queries = QueryBus::new();
        for (query_type, handler) in self.query_handlers {
            queries.register(query_type, handler)?;
        }

        let mut events = EventBus::new();
        for (event_type, handler) in self.event_handlers {
            events.register(event_type, handler);
        }

        let saga_count = self.sagas.len();
        let sagas = Arc::new(SagaOrchestrator::new(
            Arc::clone(&commands),
            self.sagas,
            self.dead_letter_dir,
        ));
        let restored = sagas.restore_dead_letters()?;
        if restored > 0 {
            tracing::info!(failures = restored, "saga failures restored from dead letters");
        }
        sagas.register_on(&mut events);
        let events = Arc::new(events);

        let bridge = spawn_bridge(
            Arc::clone(&self.store),
            Arc::clone(&events),
            self.bridge_config,
        );

        tracing::info!(sagas = saga_count, "runtime started");

        Ok(Runtime {
            store: self.store,
            commands,
            events,
            queries: Arc::new(queries),
            sagas,
            bridge,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterCommand};
    use crate::command::CommandContext;
    use crate::error::StoreError;
    use crate::event::ProposedEvent;
    use crate::handler::{AggregateCommandHandler, AggregateQueryHandler};
    use crate::memory::InMemoryEventStore;
    use crate::store::{AppendResult, EventStream, ExpectedVersion, Subscription};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn increment(id: &str) -> CommandEnvelope {
        CommandEnvelope::for_aggregate::<Counter>(id, &CounterCommand::Increment, CommandContext::default())
            .expect("envelope")
    }

    #[tokio::test]
    async fn duplicate_command_registration_fails_start() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let result = Runtime::builder(Arc::clone(&store))
            .command_handlers(AggregateCommandHandler::<Counter>::registrations(Arc::clone(&store)))
            .command_handlers(AggregateCommandHandler::<Counter>::registrations(Arc::clone(&store)))
            .start()
            .await;
        assert!(matches!(
            result,
            Err(RegistrationError::DuplicateCommandHandler { .. })
        ));
    }

    #[tokio::test]
    async fn submit_then_query_round_trip() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let runtime = Runtime::builder(Arc::clone(&store))
            .command_handlers(AggregateCommandHandler::<Counter>::registrations(Arc::clone(&store)))
            .query_handler(
                "GetCounter",
                Arc::new(AggregateQueryHandler::<Counter>::new(Arc::clone(&store))),
            )
            .start()
            .await
            .expect("start");

        runtime.submit_command(increment("c-1")).await.expect("submit");
        let view = runtime
            .execute_query(QueryEnvelope::new("GetCounter", json!({"id": "c-1"})))
            .await
            .expect("query");
        assert_eq!(view["state"]["value"], 1);
        assert!(runtime.settle().await);
        assert_eq!(runtime.bridge().position(), 1);
        runtime.shutdown().await;
    }

    /// Store whose first `conflicts` appends fail with a conflict.
    struct Contended {
        inner: InMemoryEventStore,
        conflicts: AtomicUsize,
    }

    #[async_trait]
    impl EventStore for Contended {
        async fn append(
            &self,
            stream_id: &str,
            expected: ExpectedVersion,
            events: Vec<ProposedEvent>,
        ) -> Result<AppendResult, StoreError> {
            let remaining = self.conflicts.load(Ordering::SeqCst);
            if remaining > 0 {
                self.conflicts.store(remaining - 1, Ordering::SeqCst);
                return Err(StoreError::ConcurrencyConflict {
                    stream_id: stream_id.to_owned(),
                    expected,
                    actual: 99,
                });
            }
            self.inner.append(stream_id, expected, events).await
        }

        async fn read_stream(
            &self,
            stream_id: &str,
            from_version: u64,
        ) -> Result<EventStream, StoreError> {
            self.inner.read_stream(stream_id, from_version).await
        }

        async fn stream_version(&self, stream_id: &str) -> Result<u64, StoreError> {
            self.inner.stream_version(stream_id).await
        }

        fn head_position(&self) -> u64 {
            self.inner.head_position()
        }

        fn subscribe_all(&self, from_position: u64) -> Subscription {
            self.inner.subscribe_all(from_position)
        }
    }

    async fn contended_runtime(conflicts: usize) -> Runtime {
        let store: Arc<dyn EventStore> = Arc::new(Contended {
            inner: InMemoryEventStore::new(),
            conflicts: AtomicUsize::new(conflicts),
        });
        Runtime::builder(Arc::clone(&store))
            .command_handlers(AggregateCommandHandler::<Counter>::registrations(store))
            .start()
            .await
            .expect("start")
    }

    #[tokio::test]
    async fn retry_recovers_from_conflicts_within_budget() {
        let runtime = contended_runtime(2).await;
        let outcome = runtime
            .submit_command_with_retry(increment("c-1"), 2)
            .await
            .expect("third attempt succeeds");
        assert_eq!(outcome.version, 1);
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let runtime = contended_runtime(3).await;
        let err = runtime
            .submit_command_with_retry(increment("c-1"), 2)
            .await
            .expect_err("budget exhausted");
        assert!(err.is_conflict());
        runtime.shutdown().await;
    }

    #[tokio::test]
    async fn unknown_query_is_handler_not_found() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let runtime = Runtime::builder(store).start().await.expect("start");
        let err = runtime
            .execute_query(QueryEnvelope::new("Nope", Value::Null))
            .await
            .expect_err("no handler");
        assert!(matches!(err, QueryError::HandlerNotFound { .. }));
        runtime.shutdown().await;
    }
}
