//! In-process publish/subscribe fan-out of recorded events.
//!
//! Each event type may have any number of handlers. Delivery to each
//! handler runs in its own task, so a failing or panicking handler never
//! prevents delivery to the others. Failures are logged and counted in the
//! returned [`PublishReport`]; they do not roll back the committed event.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::task::JoinSet;

use crate::error::BoxError;
use crate::event::RecordedEvent;

/// A subscriber to events of one or more type tags.
///
/// Handlers may see the same `(stream_id, version)` more than once across
/// process restarts and must tolerate redelivery.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Name used in logs.
    fn name(&self) -> &str;

    /// React to one event.
    async fn handle(&self, event: &RecordedEvent) -> Result<(), BoxError>;

    /// Called once, after every event that existed when the bridge
    /// subscribed has been delivered.
    async fn caught_up(&self) {}
}

/// Outcome of publishing a single event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublishReport {
    /// Handlers that completed successfully.
    pub delivered: usize,
    /// Handlers that returned an error or panicked.
    pub failed: usize,
}

/// One-to-many event dispatcher.
#[derive(Default)]
pub struct EventBus {
    handlers: HashMap<String, Vec<Arc<dyn EventHandler>>>,
    /// Every distinct handler, in registration order.
    distinct: Vec<Arc<dyn EventHandler>>,
}

impl fmt::Debug for EventBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("EventBus")
            .field("event_types", &types)
            .field("handlers", &self.distinct.len())
            .finish()
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `handler` to the fan-out list of `event_type`.
    pub fn register(&mut self, event_type: impl Into<String>, handler: Arc<dyn EventHandler>) {
        let event_type = event_type.into();
        tracing::debug!(event_type = %event_type, handler = handler.name(), "event handler registered");
        if !self.distinct.iter().any(|h| Arc::ptr_eq(h, &handler)) {
            self.distinct.push(Arc::clone(&handler));
        }
        self.handlers.entry(event_type).or_default().push(handler);
    }

    /// Number of handlers registered for `event_type`.
    pub fn handler_count(&self, event_type: &str) -> usize {
        self.handlers.get(event_type).map_or(0, Vec::len)
    }

    /// Deliver `event` to every handler registered for its type and wait
    /// for all of them to finish.
    ///
    /// Handlers for one event run concurrently and in no particular order.
    pub async fn publish(&self, event: RecordedEvent) -> PublishReport {
        let Some(handlers) = self.handlers.get(&event.event_type) else {
            return PublishReport::default();
        };

        let event = Arc::new(event);
        let mut tasks = JoinSet::new();
        for handler in handlers {
            let handler = Arc::clone(handler);
            let event = Arc::clone(&event);
            tasks.spawn(async move {
                let result = handler.handle(&event).await;
                (handler, result)
            });
        }

        let mut report = PublishReport::default();
        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok((_, Ok(()))) => report.delivered += 1,
                Ok((handler, Err(e))) => {
                    report.failed += 1;
                    tracing::error!(
                        handler = handler.name(),
                        event_type = %event.event_type,
                        stream_id = %event.stream_id,
                        version = event.version,
                        error = %e,
                        "event handler failed"
                    );
                }
                Err(e) => {
                    report.failed += 1;
                    tracing::error!(
                        event_type = %event.event_type,
                        stream_id = %event.stream_id,
                        version = event.version,
                        error = %e,
                        "event handler panicked"
                    );
                }
            }
        }
        report
    }

    /// Tell every distinct handler that historical replay is complete.
    pub async fn notify_caught_up(&self) {
        for handler in &self.distinct {
            handler.caught_up().await;
        }
    }
}
