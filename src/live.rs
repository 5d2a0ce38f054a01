//! Bridge from the event store's catch-up subscription into the event bus.
//!
//! This module provides [`BridgeConfig`] for choosing where the bridge
//! starts and how it reconnects, and [`BridgeHandle`] for observing and
//! stopping a running bridge.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{Mutex, watch};
use tokio::task::JoinHandle;
use tokio_stream::StreamExt;

use crate::event_bus::EventBus;
use crate::store::{EventStore, SubscriptionMessage};

/// Where the bridge's first subscription starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum StartFrom {
    /// Replay the whole log, then go live.
    #[default]
    Beginning,
    /// Start at a global position.
    Position(u64),
    /// Skip history; deliver only events appended after startup.
    Live,
}

/// Configuration for the store-to-bus bridge.
///
/// # Examples
///
/// ```
/// use std::time::Duration;
/// use identity_es::{BridgeConfig, StartFrom};
///
/// let config = BridgeConfig {
///     start: StartFrom::Live,
///     ..BridgeConfig::default()
/// };
/// assert_eq!(config.reconnect_base_delay, Duration::from_millis(100));
/// ```
#[derive(Debug, Clone)]
pub struct BridgeConfig {
    /// Default: [`StartFrom::Beginning`].
    pub start: StartFrom,

    /// Base delay for exponential backoff after a subscription error.
    ///
    /// The bridge waits `reconnect_base_delay`, then twice that, and so on
    /// up to [`reconnect_max_delay`](BridgeConfig::reconnect_max_delay).
    /// Receiving `CaughtUp` resets the backoff.
    ///
    /// Default: 100 milliseconds.
    pub reconnect_base_delay: Duration,

    /// Default: 5 seconds.
    pub reconnect_max_delay: Duration,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            start: StartFrom::Beginning,
            reconnect_base_delay: Duration::from_millis(100),
            reconnect_max_delay: Duration::from_secs(5),
        }
    }
}

/// Handle for observing and stopping the bridge task.
///
/// `Clone` is cheap: all fields are shared.
#[derive(Clone)]
pub struct BridgeHandle {
    shutdown_tx: Arc<watch::Sender<bool>>,
    caught_up_rx: watch::Receiver<bool>,
    /// Next global position to publish.
    position_rx: watch::Receiver<u64>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl std::fmt::Debug for BridgeHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BridgeHandle")
            .field("caught_up", &self.is_caught_up())
            .field("position", &self.position())
            .finish()
    }
}

impl BridgeHandle {
    /// `true` once the historical part of the first subscription has been
    /// published.
    pub fn is_caught_up(&self) -> bool {
        *self.caught_up_rx.borrow()
    }

    /// Wait until [`is_caught_up`](BridgeHandle::is_caught_up) holds and
    /// every handler has been notified.
    ///
    /// # Returns
    ///
    /// `false` if the bridge stopped first.
    pub async fn wait_caught_up(&self) -> bool {
        let mut rx = self.caught_up_rx.clone();
        rx.wait_for(|caught_up| *caught_up).await.is_ok()
    }

    /// The next global position the bridge will publish.
    pub fn position(&self) -> u64 {
        *self.position_rx.borrow()
    }

    /// Wait until the event at `position` has been published to every
    /// handler.
    ///
    /// # Returns
    ///
    /// `true` once the event has been published, `false` if the bridge
    /// stopped first.
    pub async fn wait_for(&self, position: u64) -> bool {
        let mut rx = self.position_rx.clone();
        rx.wait_for(|next| *next > position).await.is_ok()
    }

    /// Signal the bridge to stop and wait for it to exit.
    ///
    /// An event being published when the signal arrives is delivered to
    /// completion first. Calling `shutdown` more than once is safe.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let task = self.task.lock().await.take();
        if let Some(join_handle) = task
            && let Err(e) = join_handle.await
        {
            tracing::error!(error = %e, "bridge task panicked");
        }
    }
}

/// Spawn the bridge task.
///
/// The task subscribes to `store`, publishes every event on `bus` in
/// global order, notifies the bus once when the first subscription
/// catches up, and resubscribes from the next unpublished position with
/// exponential backoff if the subscription fails.
pub fn spawn_bridge(
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    config: BridgeConfig,
) -> BridgeHandle {
    let start = match config.start {
        StartFrom::Beginning => 0,
        StartFrom::Position(position) => position,
        StartFrom::Live => store.head_position(),
    };
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let (position_tx, position_rx) = watch::channel(start);
    let (caught_up_tx, caught_up_rx) = watch::channel(false);

    let task = tokio::spawn(run_bridge(
        store,
        bus,
        config,
        caught_up_tx,
        position_tx,
        shutdown_rx,
    ));

    BridgeHandle {
        shutdown_tx: Arc::new(shutdown_tx),
        caught_up_rx,
        position_rx,
        task: Arc::new(Mutex::new(Some(task))),
    }
}

async fn run_bridge(
    store: Arc<dyn EventStore>,
    bus: Arc<EventBus>,
    config: BridgeConfig,
    caught_up_tx: watch::Sender<bool>,
    position_tx: watch::Sender<u64>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    let mut backoff_delay = config.reconnect_base_delay;

    loop {
        if *shutdown_rx.borrow() {
            return;
        }

        let from_position = *position_tx.borrow();
        tracing::info!(from_position, "bridge: subscribing");
        let mut subscription = store.subscribe_all(from_position);

        let failure = loop {
            let item = tokio::select! {
                item = subscription.next() => item,
                _ = shutdown_rx.changed() => {
                    tracing::info!("bridge: shutting down");
                    return;
                }
            };

            match item {
                Some(Ok(SubscriptionMessage::Event(event))) => {
                    let position = event.global_position;
                    if position < *position_tx.borrow() {
                        continue;
                    }
                    let report = bus.publish(event).await;
                    if report.failed > 0 {
                        tracing::warn!(
                            position,
                            failed = report.failed,
                            delivered = report.delivered,
                            "bridge: event published with handler failures"
                        );
                    }
                    position_tx.send_replace(position + 1);
                }
                Some(Ok(SubscriptionMessage::CaughtUp)) => {
                    backoff_delay = config.reconnect_base_delay;
                    if !*caught_up_tx.borrow() {
                        tracing::info!(position = *position_tx.borrow(), "bridge: caught up");
                        bus.notify_caught_up().await;
                        caught_up_tx.send_replace(true);
                    }
                }
                Some(Err(e)) => break e.to_string(),
                None => break "subscription ended".to_owned(),
            }
        };

        tracing::error!(
            error = %failure,
            retry_in_ms = backoff_delay.as_millis() as u64,
            "bridge: subscription failed, will reconnect"
        );
        tokio::select! {
            _ = tokio::time::sleep(backoff_delay) => {}
            _ = shutdown_rx.changed() => return,
        }
        backoff_delay = (backoff_delay * 2).min(config.reconnect_max_delay);
    }
}
