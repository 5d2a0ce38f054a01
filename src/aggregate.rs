//! Aggregate trait and stream replay.

use serde::{Serialize, de::DeserializeOwned};
use tokio_stream::StreamExt;

use crate::error::StoreError;
use crate::event::stream_id;
use crate::registry::EventRegistry;
use crate::store::EventStore;

/// A domain aggregate whose state is derived from its event history.
///
/// The implementing type itself serves as the aggregate's state.
/// State is built by folding domain events through the [`apply`](Aggregate::apply) method.
///
/// # Associated Types
///
/// - `Command`: the set of commands this aggregate can handle, adjacently
///   tagged (`#[serde(tag = "type", content = "data")]`).
/// - `DomainEvent`: the closed set of events this aggregate can produce and
///   apply, adjacently tagged the same way.
/// - `Error`: command rejection / validation error.
///
/// # Contract
///
/// - [`handle`](Aggregate::handle) must be a pure decision function: no I/O, no side effects.
///   It validates a command against the current state and returns zero or more events.
/// - [`apply`](Aggregate::apply) must be a pure, total function. Replaying the same
///   events always yields the same state.
/// - Every tag the aggregate persists must be present in
///   [`event_registry`](Aggregate::event_registry).
pub trait Aggregate:
    Default + Clone + Serialize + DeserializeOwned + Send + Sync + 'static
{
    /// Identifies this aggregate type (e.g. "user"). Prefix of its stream ids.
    const AGGREGATE_TYPE: &'static str;

    /// Type tags of the commands this aggregate handles.
    const COMMAND_TYPES: &'static [&'static str];

    /// The set of commands this aggregate can handle.
    type Command: Serialize + DeserializeOwned + Send + 'static;

    /// The set of events this aggregate can produce and apply.
    type DomainEvent: Serialize + Clone + Send + Sync + 'static;

    /// Command rejection / validation error type.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Decoders for every event tag this aggregate persists.
    fn event_registry() -> EventRegistry<Self::DomainEvent>;

    /// Validate a command against the current state and produce events.
    ///
    /// Returns `Ok(vec![])` if the command is a no-op.
    /// Returns `Err` to reject the command.
    fn handle(&self, cmd: Self::Command) -> Result<Vec<Self::DomainEvent>, Self::Error>;

    /// Apply a single event to produce the next state.
    fn apply(self, event: &Self::DomainEvent) -> Self;
}

/// An aggregate rebuilt from its stream at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct Loaded<A> {
    /// Aggregate instance identifier.
    pub id: String,
    /// Version of the last applied event; `0` for a stream with no events.
    pub version: u64,
    pub state: A,
}

impl<A> Loaded<A> {
    /// Returns `true` if at least one event has been applied.
    pub fn exists(&self) -> bool {
        self.version > 0
    }
}

/// Replay an aggregate's stream from version 1 and fold it into state.
///
/// Replay halts at the first event that cannot be decoded; no partial state
/// is ever returned.
///
/// # Errors
///
/// * [`StoreError::UnknownEventType`] if a persisted tag is not in `registry`.
/// * [`StoreError::MalformedEvent`] if a payload has the wrong shape.
/// * [`StoreError::CorruptStream`] if versions are not contiguous from 1.
pub async fn load_aggregate<A: Aggregate>(
    store: &dyn EventStore,
    registry: &EventRegistry<A::DomainEvent>,
    id: &str,
) -> Result<Loaded<A>, StoreError> {
    let stream = stream_id(A::AGGREGATE_TYPE, id);
    let mut events = store.read_stream(&stream, 1).await?;

    let mut state = A::default();
    let mut version = 0;
    while let Some(recorded) = events.next().await {
        let recorded = recorded?;
        if recorded.version != version + 1 {
            return Err(StoreError::CorruptStream {
                stream_id: stream,
                reason: format!(
                    "expected version {} but found {}",
                    version + 1,
                    recorded.version
                ),
            });
        }
        let event = registry.decode(&recorded)?;
        state = state.apply(&event);
        version = recorded.version;
    }

    Ok(Loaded {
        id: id.to_owned(),
        version,
        state,
    })
}
