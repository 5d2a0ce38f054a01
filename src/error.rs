//! Crate-level error types for the event store, command dispatch, queries,
//! registration and saga orchestration.

use crate::store::ExpectedVersion;

/// Boxed error supplied by user code (domain rejections, projection failures).
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Error returned by [`EventStore`](crate::EventStore) operations and by
/// aggregate replay.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The stream head moved past the version the writer expected.
    ///
    /// Recoverable: re-read the aggregate and retry the command.
    #[error(
        "optimistic concurrency conflict on stream {stream_id}: expected {expected}, actual version {actual}"
    )]
    ConcurrencyConflict {
        stream_id: String,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// A persisted type tag has no registered decoder.
    ///
    /// Fatal for replay: the stream cannot be reconstructed deterministically.
    #[error("unknown event type '{event_type}' in stream {stream_id} at version {version}")]
    UnknownEventType {
        stream_id: String,
        version: u64,
        event_type: String,
    },

    /// The tag is known but its payload does not have the registered shape.
    #[error("malformed '{event_type}' payload in stream {stream_id} at version {version}: {source}")]
    MalformedEvent {
        stream_id: String,
        version: u64,
        event_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The persisted log violates an ordering or framing invariant.
    #[error("corrupt stream {stream_id}: {reason}")]
    CorruptStream { stream_id: String, reason: String },

    /// An appended event names a different aggregate than the target stream.
    #[error("event for {event_stream} cannot be appended to stream {stream_id}")]
    StreamMismatch {
        stream_id: String,
        event_stream: String,
    },

    /// JSON encoding of an event or record failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Disk I/O failure in a durable backend.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl StoreError {
    /// Returns `true` for the recoverable optimistic concurrency conflict.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

/// Error returned when dispatching a command through the
/// [`CommandBus`](crate::CommandBus).
#[derive(Debug, thiserror::Error)]
pub enum DispatchError {
    /// No handler is registered for the command's type tag.
    #[error("no command handler registered for '{command_type}'")]
    HandlerNotFound { command_type: String },

    /// The payload does not decode into the handler's command type.
    #[error("invalid '{command_type}' command payload: {source}")]
    InvalidCommand {
        command_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The handler's business validation rejected the command.
    #[error("command rejected: {0}")]
    HandlerError(#[source] BoxError),

    /// The append lost an optimistic concurrency race.
    #[error(
        "optimistic concurrency conflict on stream {stream_id}: expected {expected}, actual version {actual}"
    )]
    ConcurrencyConflict {
        stream_id: String,
        expected: ExpectedVersion,
        actual: u64,
    },

    /// Replay or append failed for a reason other than a conflict.
    #[error("event store error: {0}")]
    Store(#[source] StoreError),
}

impl DispatchError {
    /// Returns `true` if retrying after a re-read may succeed.
    pub fn is_conflict(&self) -> bool {
        matches!(self, Self::ConcurrencyConflict { .. })
    }
}

impl From<StoreError> for DispatchError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            } => Self::ConcurrencyConflict {
                stream_id,
                expected,
                actual,
            },
            other => Self::Store(other),
        }
    }
}

/// Error returned when executing a query through the
/// [`QueryBus`](crate::QueryBus).
#[derive(Debug, thiserror::Error)]
pub enum QueryError {
    #[error("no query handler registered for '{query_type}'")]
    HandlerNotFound { query_type: String },

    #[error("invalid '{query_type}' query payload: {source}")]
    InvalidQuery {
        query_type: String,
        #[source]
        source: serde_json::Error,
    },

    /// The requested read model does not exist.
    #[error("{resource} '{id}' not found")]
    NotFound { resource: &'static str, id: String },

    #[error("event store error: {0}")]
    Store(#[from] StoreError),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Startup-time configuration error raised while building the runtime.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    /// A second handler was registered for a command type.
    #[error("a command handler is already registered for '{command_type}'")]
    DuplicateCommandHandler { command_type: String },

    /// A second handler was registered for a query type.
    #[error("a query handler is already registered for '{query_type}'")]
    DuplicateQueryHandler { query_type: String },

    /// A saga dead-letter log exists but cannot be read back.
    #[error("cannot restore saga dead letters from {}: {source}", path.display())]
    DeadLetterLog {
        path: std::path::PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Error raised by the saga orchestrator.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// The follow-up command could not be dispatched; the saga is `Failed`
    /// and the cross-aggregate state needs compensating action.
    #[error("saga '{saga}' failed to dispatch follow-up for '{correlation_id}': {source}")]
    DispatchFailure {
        saga: String,
        correlation_id: String,
        #[source]
        source: DispatchError,
    },

    /// The saga could not interpret an event it subscribed to.
    #[error("saga '{saga}' could not react to '{event_type}': {source}")]
    React {
        saga: String,
        event_type: String,
        #[source]
        source: BoxError,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, thiserror::Error)]
    #[error("test domain error")]
    struct TestDomainError;

    #[test]
    fn conflict_converts_into_dispatch_conflict() {
        let err = StoreError::ConcurrencyConflict {
            stream_id: "user-u1".into(),
            expected: ExpectedVersion::Exact(1),
            actual: 2,
        };
        let dispatch = DispatchError::from(err);
        assert!(dispatch.is_conflict());
        assert_eq!(
            dispatch.to_string(),
            "optimistic concurrency conflict on stream user-u1: expected version 1, actual version 2"
        );
    }

    #[test]
    fn other_store_errors_wrap_as_store() {
        let err = StoreError::CorruptStream {
            stream_id: "user-u1".into(),
            reason: "gap".into(),
        };
        let dispatch = DispatchError::from(err);
        assert!(matches!(dispatch, DispatchError::Store(_)));
        assert!(!dispatch.is_conflict());
    }

    #[test]
    fn handler_error_displays_inner() {
        let err = DispatchError::HandlerError(Box::new(TestDomainError));
        assert_eq!(err.to_string(), "command rejected: test domain error");
    }

    #[test]
    fn unknown_event_type_display() {
        let err = StoreError::UnknownEventType {
            stream_id: "auth-u1".into(),
            version: 3,
            event_type: "Bogus".into(),
        };
        assert_eq!(
            err.to_string(),
            "unknown event type 'Bogus' in stream auth-u1 at version 3"
        );
    }

    #[test]
    fn io_from_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file missing");
        let err = StoreError::from(io_err);
        assert!(err.to_string().contains("file missing"));
    }

    const _: () = {
        #[allow(dead_code)]
        fn assert_send_sync<T: Send + Sync>() {}

        #[allow(dead_code)]
        fn check() {
            assert_send_sync::<StoreError>();
            assert_send_sync::<DispatchError>();
            assert_send_sync::<QueryError>();
            assert_send_sync::<SagaError>();
        }
    };
}
