//! Command envelope and dispatch types.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::aggregate::Aggregate;
use crate::event::{RecordedEvent, split_tagged};

/// Cross-cutting metadata passed alongside a command.
///
/// Carries audit and correlation information without polluting the
/// command or event types. Fields are copied onto the
/// [`EventMetadata`](crate::EventMetadata) of every event the command
/// produces.
///
/// # Examples
///
/// ```
/// use identity_es::CommandContext;
///
/// let ctx = CommandContext::default()
///     .with_actor("user-42")
///     .with_correlation_id("req-abc-123");
///
/// assert_eq!(ctx.actor.as_deref(), Some("user-42"));
/// assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc-123"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandContext {
    /// Identity of the actor issuing the command (e.g. a user ID).
    pub actor: Option<String>,
    /// Correlation ID for tracing a workflow across aggregates.
    pub correlation_id: Option<String>,
    /// Id of the event that caused this command.
    pub causation_id: Option<String>,
}

impl CommandContext {
    /// Set the actor identity.
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    /// Set the correlation ID.
    pub fn with_correlation_id(mut self, id: impl Into<String>) -> Self {
        self.correlation_id = Some(id.into());
        self
    }

    /// Set the causation ID.
    pub fn with_causation_id(mut self, id: impl Into<String>) -> Self {
        self.causation_id = Some(id.into());
        self
    }
}

/// A type-erased command: a type tag, exactly one target aggregate, and a
/// JSON payload.
///
/// The command bus routes on `command_type`; the aggregate handler decodes
/// `{"type": command_type, "data": payload}` into its typed command.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CommandEnvelope {
    /// Command type tag (e.g. `"CreateUser"`).
    pub command_type: String,
    /// Target aggregate instance identifier.
    pub aggregate_id: String,
    /// JSON-serialized command payload.
    pub payload: Value,
    /// Cross-cutting metadata forwarded to the produced events.
    pub context: CommandContext,
}

impl CommandEnvelope {
    /// Build an envelope from a raw type tag and payload.
    pub fn new(
        command_type: impl Into<String>,
        aggregate_id: impl Into<String>,
        payload: Value,
    ) -> Self {
        Self {
            command_type: command_type.into(),
            aggregate_id: aggregate_id.into(),
            payload,
            context: CommandContext::default(),
        }
    }

    /// Build an envelope from an aggregate's typed, adjacently tagged command.
    ///
    /// # Errors
    ///
    /// Returns `serde_json::Error` if the command does not serialize to a
    /// `{"type", "data"}` object.
    pub fn for_aggregate<A: Aggregate>(
        aggregate_id: impl Into<String>,
        command: &A::Command,
        context: CommandContext,
    ) -> serde_json::Result<Self> {
        let value = serde_json::to_value(command)?;
        let (command_type, payload) = split_tagged(value).ok_or_else(|| {
            <serde_json::Error as serde::ser::Error>::custom(
                "command must serialize to a {\"type\", \"data\"} object",
            )
        })?;
        Ok(Self {
            command_type,
            aggregate_id: aggregate_id.into(),
            payload,
            context,
        })
    }

    /// Replace the context.
    pub fn with_context(mut self, context: CommandContext) -> Self {
        self.context = context;
        self
    }
}

/// Result of a successfully handled command.
#[derive(Debug, Clone, PartialEq)]
pub struct CommandOutcome {
    /// The stream the events were appended to.
    pub stream_id: String,
    /// Stream version after the append. Unchanged for no-op commands.
    pub version: u64,
    /// The appended events, in version order.
    pub events: Vec<RecordedEvent>,
}

impl CommandOutcome {
    /// Global position of the last appended event, if any were appended.
    pub fn last_position(&self) -> Option<u64> {
        self.events.last().map(|e| e.global_position)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::aggregate::test_fixtures::{Counter, CounterCommand};
    use serde_json::json;

    #[test]
    fn default_context_has_no_fields_set() {
        let ctx = CommandContext::default();
        assert_eq!(ctx.actor, None);
        assert_eq!(ctx.correlation_id, None);
        assert_eq!(ctx.causation_id, None);
    }

    #[test]
    fn builder_chains_all_fields() {
        let ctx = CommandContext::default()
            .with_actor("admin")
            .with_correlation_id("req-abc")
            .with_causation_id("evt-1");

        assert_eq!(ctx.actor.as_deref(), Some("admin"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("req-abc"));
        assert_eq!(ctx.causation_id.as_deref(), Some("evt-1"));
    }

    #[test]
    fn builder_accepts_string_owned() {
        let ctx = CommandContext::default()
            .with_actor(String::from("svc-auth"))
            .with_correlation_id(String::from("id-007"));

        assert_eq!(ctx.actor.as_deref(), Some("svc-auth"));
        assert_eq!(ctx.correlation_id.as_deref(), Some("id-007"));
    }

    #[test]
    fn for_aggregate_splits_tag_and_payload() {
        let envelope = CommandEnvelope::for_aggregate::<Counter>(
            "c-1",
            &CounterCommand::Add { amount: 3 },
            CommandContext::default().with_actor("tester"),
        )
        .expect("envelope should build");

        assert_eq!(envelope.command_type, "Add");
        assert_eq!(envelope.aggregate_id, "c-1");
        assert_eq!(envelope.payload, json!({"amount": 3}));
        assert_eq!(envelope.context.actor.as_deref(), Some("tester"));
    }

    #[test]
    fn for_aggregate_unit_command_has_null_payload() {
        let envelope = CommandEnvelope::for_aggregate::<Counter>(
            "c-1",
            &CounterCommand::Increment,
            CommandContext::default(),
        )
        .expect("envelope should build");

        assert_eq!(envelope.command_type, "Increment");
        assert!(envelope.payload.is_null());
    }

    #[test]
    fn command_envelope_serde_roundtrip() {
        let envelope = CommandEnvelope::new("CreateAuth", "u-1", json!({"user_id": "u-1"}))
            .with_context(CommandContext::default().with_actor("saga"));

        let json = serde_json::to_string(&envelope).expect("serialization should succeed");
        let deserialized: CommandEnvelope =
            serde_json::from_str(&json).expect("deserialization should succeed");

        assert_eq!(deserialized, envelope);
    }
}
