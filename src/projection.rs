//! Cross-stream read models fed by the event bus.
//!
//! A [`Projection`] folds events from any number of streams into a
//! read-optimized view. [`ProjectionHandler`] adapts it to the event bus and
//! shares its state through a [`ProjectionHandle`]. Because the bus may
//! redeliver an event after a restart, the handler remembers the last
//! applied version of every stream and skips anything at or below it.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::error::BoxError;
use crate::event::RecordedEvent;
use crate::event_bus::{EventBus, EventHandler};

/// A read model that consumes events from the global log.
///
/// # Contract
///
/// - [`apply`](Projection::apply) must be deterministic: given the same
///   sequence of events, it must produce the same state.
/// - It is only called for the types listed in
///   [`EVENT_TYPES`](Projection::EVENT_TYPES).
pub trait Projection: Default + Send + Sync + 'static {
    /// Name used in logs.
    const NAME: &'static str;

    /// Event type tags this projection subscribes to.
    const EVENT_TYPES: &'static [&'static str];

    /// Apply a single event.
    ///
    /// # Errors
    ///
    /// An error is logged by the event bus and does not affect other
    /// handlers. The event is not marked as applied, so a redelivery
    /// retries it.
    fn apply(&mut self, event: &RecordedEvent) -> Result<(), BoxError>;
}

struct Tracked<P> {
    state: P,
    /// Last applied version per stream.
    applied: HashMap<String, u64>,
}

/// Read access to a projection's state.
///
/// `Clone` is cheap; clones share the state.
pub struct ProjectionHandle<P> {
    inner: Arc<RwLock<Tracked<P>>>,
}

impl<P> Clone for ProjectionHandle<P> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<P: Projection> ProjectionHandle<P> {
    /// Run `f` against the current state under a read lock.
    pub async fn read<R>(&self, f: impl FnOnce(&P) -> R) -> R {
        let guard = self.inner.read().await;
        f(&guard.state)
    }

    /// Clone of the current state.
    pub async fn snapshot(&self) -> P
    where
        P: Clone,
    {
        self.read(P::clone).await
    }

    /// Last version of `stream_id` applied to this projection; `0` if none.
    pub async fn applied_version(&self, stream_id: &str) -> u64 {
        let guard = self.inner.read().await;
        guard.applied.get(stream_id).copied().unwrap_or(0)
    }
}

/// Event bus adapter for a [`Projection`].
pub struct ProjectionHandler<P> {
    inner: Arc<RwLock<Tracked<P>>>,
}

impl<P: Projection> ProjectionHandler<P> {
    /// Create the handler and a handle sharing its state.
    pub fn new() -> (Self, ProjectionHandle<P>) {
        let inner = Arc::new(RwLock::new(Tracked {
            state: P::default(),
            applied: HashMap::new(),
        }));
        let handle = ProjectionHandle {
            inner: Arc::clone(&inner),
        };
        (Self { inner }, handle)
    }

    /// Register a new projection of type `P` for each of its event types.
    pub fn register(bus: &mut EventBus) -> ProjectionHandle<P> {
        let (handler, handle) = Self::new();
        let handler: Arc<dyn EventHandler> = Arc::new(handler);
        for &event_type in P::EVENT_TYPES {
            bus.register(event_type, Arc::clone(&handler));
        }
        handle
    }
}

#[async_trait]
impl<P: Projection> EventHandler for ProjectionHandler<P> {
    fn name(&self) -> &str {
        P::NAME
    }

    async fn handle(&self, event: &RecordedEvent) -> Result<(), BoxError> {
        let mut guard = self.inner.write().await;
        let last = guard.applied.get(&event.stream_id).copied().unwrap_or(0);
        if event.version <= last {
            tracing::debug!(
                projection = P::NAME,
                stream_id = %event.stream_id,
                version = event.version,
                "skipping already applied event"
            );
            return Ok(());
        }

        guard.state.apply(event)?;
        guard.applied.insert(event.stream_id.clone(), event.version);
        tracing::debug!(
            projection = P::NAME,
            global_position = event.global_position,
            event_type = %event.event_type,
            "event applied"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ProposedEvent;

    #[derive(Debug, Clone, Default, PartialEq)]
    struct TickCount {
        ticks: u64,
    }

    impl Projection for TickCount {
        const NAME: &'static str = "tick-count";
        const EVENT_TYPES: &'static [&'static str] = &["Tick", "Boom"];

        fn apply(&mut self, event: &RecordedEvent) -> Result<(), BoxError> {
            if event.event_type == "Boom" {
                return Err("cannot count a boom".into());
            }
            self.ticks += 1;
            Ok(())
        }
    }

    fn recorded(event_type: &str, id: &str, version: u64) -> RecordedEvent {
        let proposed = ProposedEvent::new("clock", id, event_type, serde_json::Value::Null);
        RecordedEvent::from_proposed(proposed, &format!("clock-{id}"), version, 0, 0)
    }

    #[tokio::test]
    async fn redelivered_event_is_applied_once() {
        let (handler, handle) = ProjectionHandler::<TickCount>::new();

        handler.handle(&recorded("Tick", "a", 1)).await.unwrap();
        handler.handle(&recorded("Tick", "a", 1)).await.unwrap();
        handler.handle(&recorded("Tick", "b", 1)).await.unwrap();
        handler.handle(&recorded("Tick", "a", 2)).await.unwrap();

        assert_eq!(handle.snapshot().await, TickCount { ticks: 3 });
        assert_eq!(handle.applied_version("clock-a").await, 2);
    }

    #[tokio::test]
    async fn failed_apply_is_not_marked_applied() {
        let (handler, handle) = ProjectionHandler::<TickCount>::new();

        assert!(handler.handle(&recorded("Boom", "a", 1)).await.is_err());
        assert_eq!(handle.applied_version("clock-a").await, 0);
    }

    #[test]
    fn register_subscribes_to_every_event_type() {
        let mut bus = EventBus::new();
        let _handle = ProjectionHandler::<TickCount>::register(&mut bus);
        assert_eq!(bus.handler_count("Tick"), 1);
        assert_eq!(bus.handler_count("Boom"), 1);
    }
}
