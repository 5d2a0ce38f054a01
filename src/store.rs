//! The event store contract: append with optimistic concurrency, stream
//! reads, and a catch-up subscription over the global log.

use std::fmt;

use async_trait::async_trait;
use futures::stream::BoxStream;
use serde::{Deserialize, Serialize};

use crate::error::StoreError;
use crate::event::{ProposedEvent, RecordedEvent};

/// Lazily produced, finite sequence of one stream's events.
pub type EventStream = BoxStream<'static, Result<RecordedEvent, StoreError>>;

/// Live feed produced by [`EventStore::subscribe_all`].
pub type Subscription = BoxStream<'static, Result<SubscriptionMessage, StoreError>>;

/// The stream version a writer expects to find at append time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ExpectedVersion {
    /// Accept any current stream version (no concurrency check).
    Any,
    /// The stream must not have any events yet. Equivalent to `Exact(0)`.
    NoStream,
    /// The stream must be at exactly this version.
    Exact(u64),
}

impl ExpectedVersion {
    /// Whether a stream currently at `actual` satisfies this expectation.
    pub fn matches(self, actual: u64) -> bool {
        match self {
            Self::Any => true,
            Self::NoStream => actual == 0,
            Self::Exact(v) => actual == v,
        }
    }
}

impl fmt::Display for ExpectedVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => f.write_str("any version"),
            Self::NoStream => f.write_str("no stream"),
            Self::Exact(v) => write!(f, "version {v}"),
        }
    }
}

/// Result of a successful append.
#[derive(Debug, Clone, PartialEq)]
pub struct AppendResult {
    /// Stream version after the append.
    pub version: u64,
    /// The written records, in version order. Empty for a zero-event append.
    pub events: Vec<RecordedEvent>,
}

/// One item of a catch-up subscription.
#[derive(Debug, Clone, PartialEq)]
pub enum SubscriptionMessage {
    /// The next event in global order.
    Event(RecordedEvent),
    /// Every event that existed when the subscription started has been
    /// delivered; what follows is live. Sent exactly once.
    CaughtUp,
}

/// Durable, append-only, per-stream ordered log of events.
///
/// Appends are the only mutation and the only place concurrency is
/// resolved: an append either writes every event contiguously after the
/// expected version or writes nothing.
#[async_trait]
pub trait EventStore: Send + Sync + 'static {
    /// Append `events` to `stream_id`.
    ///
    /// # Errors
    ///
    /// * [`StoreError::ConcurrencyConflict`] if the stream head does not
    ///   match `expected`. Nothing is written.
    /// * [`StoreError::StreamMismatch`] if an event targets another stream.
    /// * [`StoreError::Io`] if a durable backend fails to persist.
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<AppendResult, StoreError>;

    /// Read a stream's events with `version >= from_version`.
    ///
    /// A stream that has never been written to reads as empty. Each call
    /// returns an independent stream, so callers may re-read from scratch.
    async fn read_stream(&self, stream_id: &str, from_version: u64)
    -> Result<EventStream, StoreError>;

    /// Current version of a stream; `0` if it has no events.
    async fn stream_version(&self, stream_id: &str) -> Result<u64, StoreError>;

    /// Position the next appended event will receive.
    fn head_position(&self) -> u64;

    /// Subscribe to every event with `global_position >= from_position`,
    /// followed by one [`SubscriptionMessage::CaughtUp`] marker and then
    /// live appends, without gaps or duplicates.
    fn subscribe_all(&self, from_position: u64) -> Subscription;
}
