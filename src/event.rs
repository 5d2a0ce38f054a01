//! Event encoding and the record types shared by the store, the buses and
//! the saga orchestrator.
//!
//! Domain events are adjacently tagged serde enums
//! (`#[serde(tag = "type", content = "data")]`). The `"type"` field becomes
//! the persisted type tag and `"data"` the payload.

use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::command::CommandContext;
use crate::error::StoreError;

/// Derive the stream id that holds one aggregate instance's events.
///
/// The aggregate type is part of the key so that different aggregate kinds
/// sharing an identifier (a user and its auth record) live in separate
/// streams.
///
/// # Examples
///
/// ```
/// use identity_es::stream_id;
/// assert_eq!(stream_id("auth", "u-1"), "auth-u-1");
/// ```
pub fn stream_id(aggregate_type: &str, aggregate_id: &str) -> String {
    format!("{aggregate_type}-{aggregate_id}")
}

/// Current wall-clock time in Unix epoch milliseconds.
pub(crate) fn now_millis() -> u64 {
    SystemTime::UNIX_EPOCH
        .elapsed()
        .map(|d| d.as_millis() as u64)
        .unwrap_or_default()
}

/// Cross-cutting metadata stamped on every event.
///
/// Copied from the [`CommandContext`] of the command that produced the
/// event, so projections and sagas can trace an event back to its cause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Identity of whoever issued the command.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<String>,
    /// Correlation id shared by every write in one cross-aggregate workflow.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub correlation_id: Option<String>,
    /// Id of the event that caused the command, when issued by a saga.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub causation_id: Option<String>,
}

impl From<&CommandContext> for EventMetadata {
    fn from(ctx: &CommandContext) -> Self {
        Self {
            actor: ctx.actor.clone(),
            correlation_id: ctx.correlation_id.clone(),
            causation_id: ctx.causation_id.clone(),
        }
    }
}

/// An event that has been decided but not yet appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProposedEvent {
    /// Client-assigned UUID v4.
    pub event_id: Uuid,
    /// Aggregate type of the producing aggregate (e.g. `"user"`).
    pub aggregate_type: String,
    /// Aggregate instance identifier.
    pub aggregate_id: String,
    /// Event type tag (e.g. `"UserCreatedEvent"`).
    pub event_type: String,
    /// JSON payload: the `"data"` part of the tagged domain event.
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
}

impl ProposedEvent {
    /// Build a proposed event from a raw type tag and payload.
    pub fn new(
        aggregate_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            aggregate_type: aggregate_type.into(),
            aggregate_id: aggregate_id.into(),
            event_type: event_type.into(),
            payload,
            metadata: EventMetadata::default(),
        }
    }

    /// Attach metadata.
    pub fn with_metadata(mut self, metadata: EventMetadata) -> Self {
        self.metadata = metadata;
        self
    }

    /// The stream this event belongs to.
    pub fn stream_id(&self) -> String {
        stream_id(&self.aggregate_type, &self.aggregate_id)
    }
}

/// An event as persisted in the store and delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordedEvent {
    pub event_id: Uuid,
    pub stream_id: String,
    pub aggregate_type: String,
    pub aggregate_id: String,
    /// One-based, gapless version within the stream.
    pub version: u64,
    /// Zero-based position in the store-wide log.
    pub global_position: u64,
    pub event_type: String,
    pub payload: serde_json::Value,
    pub metadata: EventMetadata,
    /// Append timestamp (Unix epoch milliseconds).
    pub recorded_at: u64,
}

impl RecordedEvent {
    /// Stamp a proposed event with its position in the log.
    pub(crate) fn from_proposed(
        proposed: ProposedEvent,
        stream_id: &str,
        version: u64,
        global_position: u64,
        recorded_at: u64,
    ) -> Self {
        Self {
            event_id: proposed.event_id,
            stream_id: stream_id.to_owned(),
            aggregate_type: proposed.aggregate_type,
            aggregate_id: proposed.aggregate_id,
            version,
            global_position,
            event_type: proposed.event_type,
            payload: proposed.payload,
            metadata: proposed.metadata,
            recorded_at,
        }
    }

    /// Correlation id from metadata, if any.
    pub fn correlation_id(&self) -> Option<&str> {
        self.metadata.correlation_id.as_deref()
    }
}

/// Encode an adjacently tagged domain event into a [`ProposedEvent`].
///
/// # Arguments
///
/// * `event` - The domain event to encode.
/// * `ctx` - Command context whose actor and correlation data become metadata.
/// * `aggregate_type` - The producing aggregate's type name.
/// * `aggregate_id` - The producing aggregate instance.
///
/// # Errors
///
/// Returns [`StoreError::Serialization`] if the event does not serialize, or
/// [`StoreError::CorruptStream`] if it does not serialize to a tagged object.
pub fn encode_domain_event<E: Serialize>(
    event: &E,
    ctx: &CommandContext,
    aggregate_type: &str,
    aggregate_id: &str,
) -> Result<ProposedEvent, StoreError> {
    let (event_type, payload) = split_tagged(serde_json::to_value(event)?).ok_or_else(|| {
        StoreError::CorruptStream {
            stream_id: stream_id(aggregate_type, aggregate_id),
            reason: "domain event must serialize to a {\"type\", \"data\"} object".into(),
        }
    })?;

    Ok(
        ProposedEvent::new(aggregate_type, aggregate_id, event_type, payload)
            .with_metadata(EventMetadata::from(ctx)),
    )
}

/// Split an adjacently tagged JSON object into its tag and content.
///
/// Unit variants carry no `"data"` field; their content is `null`.
pub(crate) fn split_tagged(value: serde_json::Value) -> Option<(String, serde_json::Value)> {
    let serde_json::Value::Object(mut obj) = value else {
        return None;
    };
    let tag = match obj.remove("type")? {
        serde_json::Value::String(tag) => tag,
        _ => return None,
    };
    let data = obj.remove("data").unwrap_or(serde_json::Value::Null);
    Some((tag, data))
}

/// Rebuild the adjacently tagged JSON form from a tag and content.
pub(crate) fn join_tagged(tag: &str, data: &serde_json::Value) -> serde_json::Value {
    if data.is_null() {
        serde_json::json!({ "type": tag })
    } else {
        serde_json::json!({ "type": tag, "data": data })
    }
}
