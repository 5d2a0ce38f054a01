//! Side-effect-free reads: query envelopes, handlers and the query bus.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::error::{QueryError, RegistrationError};

/// A type-erased query: a type tag and a JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueryEnvelope {
    /// Query type tag (e.g. `"GetUser"`).
    pub query_type: String,
    pub payload: Value,
}

impl QueryEnvelope {
    pub fn new(query_type: impl Into<String>, payload: Value) -> Self {
        Self {
            query_type: query_type.into(),
            payload,
        }
    }

    /// Decode the payload into a typed query.
    ///
    /// # Errors
    ///
    /// Returns [`QueryError::InvalidQuery`] if the payload has the wrong shape.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T, QueryError> {
        serde_json::from_value(self.payload.clone()).map_err(|source| QueryError::InvalidQuery {
            query_type: self.query_type.clone(),
            source,
        })
    }
}

/// Answers queries of one or more type tags. Never writes.
#[async_trait]
pub trait QueryHandler: Send + Sync + 'static {
    async fn handle(&self, query: QueryEnvelope) -> Result<Value, QueryError>;
}

/// Routes each query to the one handler registered for its type tag.
#[derive(Default)]
pub struct QueryBus {
    handlers: HashMap<String, Arc<dyn QueryHandler>>,
}

impl std::fmt::Debug for QueryBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("QueryBus")
            .field("query_types", &types)
            .finish()
    }
}

impl QueryBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `query_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateQueryHandler`] if the type is taken.
    pub fn register(
        &mut self,
        query_type: impl Into<String>,
        handler: Arc<dyn QueryHandler>,
    ) -> Result<(), RegistrationError> {
        let query_type = query_type.into();
        if self.handlers.contains_key(&query_type) {
            return Err(RegistrationError::DuplicateQueryHandler { query_type });
        }
        self.handlers.insert(query_type, handler);
        Ok(())
    }

    /// Execute a query.
    ///
    /// # Errors
    ///
    /// * [`QueryError::HandlerNotFound`] if no handler is registered.
    /// * Whatever the handler returns, typically [`QueryError::NotFound`].
    pub async fn execute(&self, query: QueryEnvelope) -> Result<Value, QueryError> {
        let handler =
            self.handlers
                .get(&query.query_type)
                .ok_or_else(|| QueryError::HandlerNotFound {
                    query_type: query.query_type.clone(),
                })?;
        handler.handle(query).await
    }
}
