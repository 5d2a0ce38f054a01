//! Type-tag registry used to decode persisted events during replay.

use std::collections::HashMap;
use std::fmt;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::StoreError;
use crate::event::RecordedEvent;

/// Decoder for one event type tag: turns a payload into the domain event.
pub type Decoder<E> = fn(Value) -> serde_json::Result<E>;

/// Mapping from persisted type tag to the decoder that reconstructs it.
///
/// Replay goes through [`decode`](EventRegistry::decode), which refuses
/// tags it does not know instead of skipping them.
///
/// # Examples
///
/// ```
/// use identity_es::EventRegistry;
///
/// #[derive(Debug, PartialEq)]
/// enum Evt { Renamed(String) }
///
/// let registry = EventRegistry::<Evt>::new()
///     .with("Renamed", |data| serde_json::from_value(data).map(Evt::Renamed));
/// assert!(registry.contains("Renamed"));
/// assert!(!registry.contains("Deleted"));
/// ```
pub struct EventRegistry<E> {
    decoders: HashMap<&'static str, Decoder<E>>,
}

impl<E> EventRegistry<E> {
    pub fn new() -> Self {
        Self {
            decoders: HashMap::new(),
        }
    }

    /// Register a decoder for `tag`, replacing any previous one.
    pub fn register(&mut self, tag: &'static str, decoder: Decoder<E>) {
        self.decoders.insert(tag, decoder);
    }

    /// Builder form of [`register`](EventRegistry::register).
    pub fn with(mut self, tag: &'static str, decoder: Decoder<E>) -> Self {
        self.register(tag, decoder);
        self
    }

    pub fn contains(&self, tag: &str) -> bool {
        self.decoders.contains_key(tag)
    }

    /// Registered tags, sorted.
    pub fn tags(&self) -> Vec<&'static str> {
        let mut tags: Vec<_> = self.decoders.keys().copied().collect();
        tags.sort_unstable();
        tags
    }

    /// Decode a recorded event into the domain event.
    ///
    /// # Errors
    ///
    /// * [`StoreError::UnknownEventType`] if the tag is not registered.
    /// * [`StoreError::MalformedEvent`] if the payload has the wrong shape.
    pub fn decode(&self, event: &RecordedEvent) -> Result<E, StoreError> {
        let decoder =
            self.decoders
                .get(event.event_type.as_str())
                .ok_or_else(|| StoreError::UnknownEventType {
                    stream_id: event.stream_id.clone(),
                    version: event.version,
                    event_type: event.event_type.clone(),
                })?;
        decoder(event.payload.clone()).map_err(|source| StoreError::MalformedEvent {
            stream_id: event.stream_id.clone(),
            version: event.version,
            event_type: event.event_type.clone(),
            source,
        })
    }
}

impl<E> Default for EventRegistry<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for EventRegistry<E> {
    fn clone(&self) -> Self {
        Self {
            decoders: self.decoders.clone(),
        }
    }
}

impl<E> fmt::Debug for EventRegistry<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventRegistry")
            .field("tags", &self.tags())
            .finish()
    }
}

/// Decode a payload straight into a payload struct.
///
/// Convenience for registry entries whose variant wraps a single struct.
pub fn payload<T: DeserializeOwned>(data: Value) -> serde_json::Result<T> {
    serde_json::from_value(data)
}
