//! Event-sourced CQRS core for an identity domain.
//!
//! Commands go through the [`CommandBus`] to one aggregate handler, which
//! replays the target stream, decides, and appends to the [`EventStore`]
//! under optimistic concurrency. A bridge feeds the store's catch-up
//! subscription into the [`EventBus`], which fans each event out to
//! projections and to the [`SagaOrchestrator`]. [`Runtime`] owns all of it.

mod aggregate;
pub use aggregate::{Aggregate, Loaded, load_aggregate};
mod command;
mod command_bus;
mod error;
mod event;
mod event_bus;
mod handler;
pub mod identity;
mod live;
mod memory;
mod projection;
mod query;
mod registry;
mod runtime;
mod saga;
mod storage;
mod store;

pub use command::{CommandContext, CommandEnvelope, CommandOutcome};
pub use command_bus::{CommandBus, CommandHandler};
pub use error::{BoxError, DispatchError, QueryError, RegistrationError, SagaError, StoreError};
pub use event::{EventMetadata, ProposedEvent, RecordedEvent, encode_domain_event, stream_id};
pub use event_bus::{EventBus, EventHandler, PublishReport};
pub use handler::{AggregateCommandHandler, AggregateQueryHandler, AggregateView, ById};
pub use live::{BridgeConfig, BridgeHandle, StartFrom, spawn_bridge};
pub use memory::InMemoryEventStore;
pub use projection::{Projection, ProjectionHandle, ProjectionHandler};
pub use query::{QueryBus, QueryEnvelope, QueryHandler};
pub use registry::{Decoder, EventRegistry, payload};
pub use runtime::{Runtime, RuntimeBuilder};
pub use saga::{
    Saga, SagaFailure, SagaInstance, SagaOrchestrator, SagaReaction, SagaReport, SagaState,
    read_dead_letters,
};
pub use storage::{FileEventStore, StoreLayout};
pub use store::{
    AppendResult, EventStore, EventStream, ExpectedVersion, Subscription, SubscriptionMessage,
};
