//! In-process event store backend.
//!
//! Holds the global log and a per-stream index behind one mutex. The head
//! position is broadcast over a `watch` channel so catch-up subscriptions
//! can park until the next append.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::watch;

use crate::error::StoreError;
use crate::event::{ProposedEvent, RecordedEvent, now_millis};
use crate::store::{
    AppendResult, EventStore, EventStream, ExpectedVersion, Subscription, SubscriptionMessage,
};

/// Global log plus per-stream index into it.
#[derive(Debug, Default)]
pub(crate) struct LogState {
    log: Vec<RecordedEvent>,
    /// Stream id -> global positions of its events, in version order.
    streams: HashMap<String, Vec<usize>>,
}

impl LogState {
    fn stream_version(&self, stream_id: &str) -> u64 {
        self.streams
            .get(stream_id)
            .map(|positions| positions.len() as u64)
            .unwrap_or(0)
    }

    /// Validate an append and stamp the records it would write.
    ///
    /// Does not mutate; [`commit`](LogState::commit) makes the records visible.
    fn stage(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
        recorded_at: u64,
    ) -> Result<Vec<RecordedEvent>, StoreError> {
        if let Some(stray) = events.iter().find(|e| e.stream_id() != stream_id) {
            return Err(StoreError::StreamMismatch {
                stream_id: stream_id.to_owned(),
                event_stream: stray.stream_id(),
            });
        }

        let actual = self.stream_version(stream_id);
        if !expected.matches(actual) {
            return Err(StoreError::ConcurrencyConflict {
                stream_id: stream_id.to_owned(),
                expected,
                actual,
            });
        }

        let base_position = self.log.len() as u64;
        Ok(events
            .into_iter()
            .enumerate()
            .map(|(i, proposed)| {
                let offset = i as u64;
                RecordedEvent::from_proposed(
                    proposed,
                    stream_id,
                    actual + offset + 1,
                    base_position + offset,
                    recorded_at,
                )
            })
            .collect())
    }

    fn commit(&mut self, records: &[RecordedEvent]) {
        for record in records {
            let position = self.log.len();
            self.streams
                .entry(record.stream_id.clone())
                .or_default()
                .push(position);
            self.log.push(record.clone());
        }
    }

    /// Re-insert a record read back from durable storage, checking that it
    /// continues both the global log and its stream without gaps.
    pub(crate) fn restore(&mut self, record: RecordedEvent) -> Result<(), StoreError> {
        let expected_position = self.log.len() as u64;
        if record.global_position != expected_position {
            return Err(StoreError::CorruptStream {
                stream_id: record.stream_id,
                reason: format!(
                    "global position {} where {expected_position} was expected",
                    record.global_position
                ),
            });
        }
        let expected_version = self.stream_version(&record.stream_id) + 1;
        if record.version != expected_version {
            return Err(StoreError::CorruptStream {
                stream_id: record.stream_id,
                reason: format!(
                    "version {} where {expected_version} was expected",
                    record.version
                ),
            });
        }
        self.commit(std::slice::from_ref(&record));
        Ok(())
    }

    pub(crate) fn len(&self) -> usize {
        self.log.len()
    }
}

struct Shared {
    state: Mutex<LogState>,
    /// Number of events in the log; bumped after every commit.
    head: watch::Sender<u64>,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, LogState> {
        // A panic while holding the lock cannot leave a half-committed
        // append behind: `commit` is the only mutation and it never fails.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn event_at(&self, position: u64) -> Option<RecordedEvent> {
        self.lock().log.get(position as usize).cloned()
    }
}

/// Event store that keeps every stream in memory.
///
/// `Clone` is cheap; clones share the same log.
///
/// # Examples
///
/// ```
/// use identity_es::{EventStore, ExpectedVersion, InMemoryEventStore, ProposedEvent};
///
/// # async fn example() -> Result<(), identity_es::StoreError> {
/// let store = InMemoryEventStore::new();
/// let event = ProposedEvent::new("user", "u-1", "UserCreatedEvent", serde_json::json!({}));
/// let result = store.append("user-u-1", ExpectedVersion::NoStream, vec![event]).await?;
/// assert_eq!(result.version, 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct InMemoryEventStore {
    shared: Arc<Shared>,
}

impl std::fmt::Debug for InMemoryEventStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryEventStore")
            .field("head", &*self.shared.head.borrow())
            .finish()
    }
}

impl Default for InMemoryEventStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::from_state(LogState::default())
    }

    /// Wrap an already populated log (used by durable backends on open).
    pub(crate) fn from_state(state: LogState) -> Self {
        let (head, _) = watch::channel(state.len() as u64);
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(state),
                head,
            }),
        }
    }

    /// Validate and commit an append as one critical section.
    fn append_now(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<AppendResult, StoreError> {
        let mut state = self.shared.lock();
        let records = state.stage(stream_id, expected, events, now_millis())?;
        state.commit(&records);
        let version = state.stream_version(stream_id);
        let head = state.len() as u64;
        drop(state);
        Ok(self.publish(stream_id, records, version, head))
    }

    /// Validate, persist and commit an append, running `persist` without
    /// holding the log lock so readers are not blocked on it.
    ///
    /// The caller must serialise every append to this store (the durable
    /// backend holds its journal lock across the call); otherwise the
    /// staged versions could go stale before they are committed. If
    /// `persist` fails nothing is committed.
    pub(crate) fn append_serialized<F>(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
        persist: F,
    ) -> Result<AppendResult, StoreError>
    where
        F: FnOnce(&[RecordedEvent]) -> Result<(), StoreError>,
    {
        let records = self
            .shared
            .lock()
            .stage(stream_id, expected, events, now_millis())?;
        if !records.is_empty() {
            persist(&records)?;
        }
        let mut state = self.shared.lock();
        state.commit(&records);
        let version = state.stream_version(stream_id);
        let head = state.len() as u64;
        drop(state);
        Ok(self.publish(stream_id, records, version, head))
    }

    fn publish(
        &self,
        stream_id: &str,
        records: Vec<RecordedEvent>,
        version: u64,
        head: u64,
    ) -> AppendResult {
        if !records.is_empty() {
            self.shared.head.send_replace(head);
            tracing::debug!(
                stream_id,
                version,
                count = records.len(),
                "events appended"
            );
        }
        AppendResult {
            version,
            events: records,
        }
    }
}

/// Cursor state carried by a subscription stream between items.
struct Cursor {
    shared: Arc<Shared>,
    head_rx: watch::Receiver<u64>,
    next: u64,
    /// Head at subscription time; `CaughtUp` is sent once `next` reaches it.
    caught_up_at: u64,
    caught_up_sent: bool,
}

#[async_trait]
impl EventStore for InMemoryEventStore {
    async fn append(
        &self,
        stream_id: &str,
        expected: ExpectedVersion,
        events: Vec<ProposedEvent>,
    ) -> Result<AppendResult, StoreError> {
        self.append_now(stream_id, expected, events)
    }

    async fn read_stream(
        &self,
        stream_id: &str,
        from_version: u64,
    ) -> Result<EventStream, StoreError> {
        let state = self.shared.lock();
        let events: Vec<RecordedEvent> = state
            .streams
            .get(stream_id)
            .map(|positions| {
                positions
                    .iter()
                    .map(|&p| state.log[p].clone())
                    .filter(|e| e.version >= from_version)
                    .collect()
            })
            .unwrap_or_default();
        drop(state);
        Ok(Box::pin(tokio_stream::iter(events.into_iter().map(Ok))))
    }

    async fn stream_version(&self, stream_id: &str) -> Result<u64, StoreError> {
        Ok(self.shared.lock().stream_version(stream_id))
    }

    fn head_position(&self) -> u64 {
        *self.shared.head.borrow()
    }

    fn subscribe_all(&self, from_position: u64) -> Subscription {
        let head_rx = self.shared.head.subscribe();
        let caught_up_at = *head_rx.borrow();
        let cursor = Cursor {
            shared: Arc::clone(&self.shared),
            head_rx,
            next: from_position,
            caught_up_at,
            caught_up_sent: false,
        };

        Box::pin(futures::stream::unfold(cursor, |mut cursor| async move {
            loop {
                if !cursor.caught_up_sent && cursor.next >= cursor.caught_up_at {
                    cursor.caught_up_sent = true;
                    return Some((Ok(SubscriptionMessage::CaughtUp), cursor));
                }

                // Mark the current head as seen before reading the log, so an
                // append racing with the read still wakes `changed()` below.
                cursor.head_rx.borrow_and_update();
                if let Some(event) = cursor.shared.event_at(cursor.next) {
                    cursor.next += 1;
                    return Some((Ok(SubscriptionMessage::Event(event)), cursor));
                }

                if cursor.head_rx.changed().await.is_err() {
                    return None;
                }
            }
        }))
    }
}
