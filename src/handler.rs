//! Generic aggregate command and query handlers.
//!
//! A command handler replays the target stream, lets the aggregate decide,
//! and appends the decided events with the replayed version as the
//! expected version. A query handler replays and returns the state.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::Instrument;

use crate::aggregate::{Aggregate, Loaded, load_aggregate};
use crate::command::{CommandContext, CommandEnvelope, CommandOutcome};
use crate::command_bus::CommandHandler;
use crate::error::{DispatchError, QueryError, StoreError};
use crate::event::{encode_domain_event, join_tagged, stream_id};
use crate::query::{QueryEnvelope, QueryHandler};
use crate::registry::EventRegistry;
use crate::store::{EventStore, ExpectedVersion};

/// Command handler for every command type of aggregate `A`.
pub struct AggregateCommandHandler<A: Aggregate> {
    store: Arc<dyn EventStore>,
    registry: EventRegistry<A::DomainEvent>,
}

impl<A: Aggregate> AggregateCommandHandler<A> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            registry: A::event_registry(),
        }
    }

    /// One registration entry per command type of `A`, sharing one handler.
    pub fn registrations(store: Arc<dyn EventStore>) -> Vec<(String, Arc<dyn CommandHandler>)> {
        let handler: Arc<dyn CommandHandler> = Arc::new(Self::new(store));
        A::COMMAND_TYPES
            .iter()
            .map(|&command_type| (command_type.to_owned(), Arc::clone(&handler)))
            .collect()
    }

    /// Rebuild the aggregate from its stream.
    ///
    /// # Errors
    ///
    /// Propagates replay failures; see [`load_aggregate`].
    pub async fn load(&self, id: &str) -> Result<Loaded<A>, StoreError> {
        load_aggregate::<A>(self.store.as_ref(), &self.registry, id).await
    }

    /// Replay, decide, append.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::HandlerError`] if the aggregate rejects the command.
    /// * [`DispatchError::ConcurrencyConflict`] if another writer appended
    ///   to the stream after it was replayed.
    /// * [`DispatchError::Store`] if replay or append fails otherwise.
    pub async fn execute(
        &self,
        id: &str,
        cmd: A::Command,
        ctx: &CommandContext,
    ) -> Result<CommandOutcome, DispatchError> {
        let stream = stream_id(A::AGGREGATE_TYPE, id);
        let loaded = self.load(id).await?;

        let decided = loaded
            .state
            .handle(cmd)
            .map_err(|e| DispatchError::HandlerError(Box::new(e)))?;

        if decided.is_empty() {
            tracing::debug!(stream_id = %stream, "command produced no events");
            return Ok(CommandOutcome {
                stream_id: stream,
                version: loaded.version,
                events: Vec::new(),
            });
        }

        let proposed = decided
            .iter()
            .map(|event| encode_domain_event(event, ctx, A::AGGREGATE_TYPE, id))
            .collect::<Result<Vec<_>, _>>()?;

        let appended = self
            .store
            .append(&stream, ExpectedVersion::Exact(loaded.version), proposed)
            .await?;

        tracing::info!(
            stream_id = %stream,
            from_version = loaded.version + 1,
            to_version = appended.version,
            "command applied"
        );

        Ok(CommandOutcome {
            stream_id: stream,
            version: appended.version,
            events: appended.events,
        })
    }
}

#[async_trait]
impl<A: Aggregate> CommandHandler for AggregateCommandHandler<A> {
    async fn handle(&self, command: CommandEnvelope) -> Result<CommandOutcome, DispatchError> {
        let span = tracing::info_span!(
            "dispatch",
            aggregate_type = A::AGGREGATE_TYPE,
            command_type = %command.command_type,
            aggregate_id = %command.aggregate_id,
        );

        async move {
            let tagged = join_tagged(&command.command_type, &command.payload);
            let cmd: A::Command =
                serde_json::from_value(tagged).map_err(|source| DispatchError::InvalidCommand {
                    command_type: command.command_type.clone(),
                    source,
                })?;
            self.execute(&command.aggregate_id, cmd, &command.context)
                .await
        }
        .instrument(span)
        .await
    }
}

/// Payload of a by-id aggregate query.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ById {
    pub id: String,
}

/// Read model returned by [`AggregateQueryHandler`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateView<A> {
    pub id: String,
    pub version: u64,
    pub state: A,
}

/// Answers a by-id query by replaying the aggregate's stream.
pub struct AggregateQueryHandler<A: Aggregate> {
    store: Arc<dyn EventStore>,
    registry: EventRegistry<A::DomainEvent>,
}

impl<A: Aggregate> AggregateQueryHandler<A> {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        Self {
            store,
            registry: A::event_registry(),
        }
    }

    /// Replay and return the aggregate, or `NotFound` for an empty stream.
    ///
    /// # Errors
    ///
    /// * [`QueryError::NotFound`] if the stream has no events.
    /// * [`QueryError::Store`] if replay fails.
    pub async fn view(&self, id: &str) -> Result<AggregateView<A>, QueryError> {
        let loaded = load_aggregate::<A>(self.store.as_ref(), &self.registry, id).await?;
        if !loaded.exists() {
            return Err(QueryError::NotFound {
                resource: A::AGGREGATE_TYPE,
                id: id.to_owned(),
            });
        }
        Ok(AggregateView {
            id: loaded.id,
            version: loaded.version,
            state: loaded.state,
        })
    }
}

#[async_trait]
impl<A: Aggregate> QueryHandler for AggregateQueryHandler<A> {
    async fn handle(&self, query: QueryEnvelope) -> Result<Value, QueryError> {
        let ById { id } = query.decode()?;
        let view = self.view(&id).await?;
        Ok(serde_json::to_value(view)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterCommand};
    use crate::memory::InMemoryEventStore;
    use serde_json::json;

    fn handler(store: &InMemoryEventStore) -> AggregateCommandHandler<Counter> {
        AggregateCommandHandler::new(Arc::new(store.clone()))
    }

    fn envelope(command: &CounterCommand) -> CommandEnvelope {
        CommandEnvelope::for_aggregate::<Counter>("c-1", command, CommandContext::default())
            .expect("envelope")
    }

    #[tokio::test]
    async fn appended_events_target_the_aggregate_with_contiguous_versions() {
        let store = InMemoryEventStore::new();
        let handler = handler(&store);

        handler
            .handle(envelope(&CounterCommand::Increment))
            .await
            .expect("first");
        let outcome = handler
            .handle(envelope(&CounterCommand::Add { amount: 2 }))
            .await
            .expect("second");

        assert_eq!(outcome.stream_id, "counter-c-1");
        assert_eq!(outcome.version, 2);
        let event = &outcome.events[0];
        assert_eq!(event.aggregate_id, "c-1");
        assert_eq!(event.version, 2);
        assert_eq!(event.event_type, "Added");
    }

    #[tokio::test]
    async fn rejection_appends_nothing() {
        let store = InMemoryEventStore::new();
        let err = handler(&store)
            .handle(envelope(&CounterCommand::Decrement))
            .await
            .expect_err("decrement at zero");
        assert!(matches!(err, DispatchError::HandlerError(_)));
        assert_eq!(store.head_position(), 0);
    }

    #[tokio::test]
    async fn malformed_payload_is_invalid_command() {
        let store = InMemoryEventStore::new();
        let err = handler(&store)
            .handle(CommandEnvelope::new("Add", "c-1", json!({"amount": "many"})))
            .await
            .expect_err("bad payload");
        assert!(matches!(err, DispatchError::InvalidCommand { .. }));
    }

    #[tokio::test]
    async fn stale_replay_surfaces_conflict() {
        let store = InMemoryEventStore::new();
        let handler = handler(&store);
        handler
            .handle(envelope(&CounterCommand::Increment))
            .await
            .expect("seed");

        // Simulate a writer that replayed at version 0 and appends late.
        let late = encode_domain_event(
            &crate::aggregate::test_fixtures::CounterEvent::Incremented,
            &CommandContext::default(),
            "counter",
            "c-1",
        )
        .expect("encode");
        let err = store
            .append("counter-c-1", ExpectedVersion::Exact(0), vec![late])
            .await
            .expect_err("late writer conflicts");
        assert!(DispatchError::from(err).is_conflict());
    }

    #[test]
    fn registrations_cover_every_command_type() {
        let store: Arc<dyn EventStore> = Arc::new(InMemoryEventStore::new());
        let types: Vec<String> = AggregateCommandHandler::<Counter>::registrations(store)
            .into_iter()
            .map(|(t, _)| t)
            .collect();
        assert_eq!(types, vec!["Increment", "Decrement", "Add"]);
    }

    #[tokio::test]
    async fn query_returns_state_or_not_found() {
        let store = InMemoryEventStore::new();
        handler(&store)
            .handle(envelope(&CounterCommand::Add { amount: 5 }))
            .await
            .expect("seed");

        let queries = AggregateQueryHandler::<Counter>::new(Arc::new(store.clone()));
        let value = queries
            .handle(QueryEnvelope::new("GetCounter", json!({"id": "c-1"})))
            .await
            .expect("query");
        assert_eq!(value, json!({"id": "c-1", "version": 1, "state": {"value": 5}}));

        let missing = queries
            .handle(QueryEnvelope::new("GetCounter", json!({"id": "c-9"})))
            .await
            .expect_err("missing");
        assert!(matches!(missing, QueryError::NotFound { .. }));
    }
}
