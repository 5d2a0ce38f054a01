//! Single-handler-per-type command dispatch.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;

use crate::command::{CommandEnvelope, CommandOutcome};
use crate::error::{DispatchError, RegistrationError};

/// Handles commands of one or more type tags.
#[async_trait]
pub trait CommandHandler: Send + Sync + 'static {
    /// Execute the command and return what was appended.
    async fn handle(&self, command: CommandEnvelope) -> Result<CommandOutcome, DispatchError>;
}

/// Routes each command to the one handler registered for its type tag.
///
/// Built once at startup and shared behind an `Arc`; registration after
/// startup is not possible because dispatch only needs `&self`.
#[derive(Default)]
pub struct CommandBus {
    handlers: HashMap<String, Arc<dyn CommandHandler>>,
}

impl fmt::Debug for CommandBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut types: Vec<_> = self.handlers.keys().collect();
        types.sort();
        f.debug_struct("CommandBus")
            .field("command_types", &types)
            .finish()
    }
}

impl CommandBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the handler for `command_type`.
    ///
    /// # Errors
    ///
    /// Returns [`RegistrationError::DuplicateCommandHandler`] if a handler is
    /// already registered for the type.
    pub fn register(
        &mut self,
        command_type: impl Into<String>,
        handler: Arc<dyn CommandHandler>,
    ) -> Result<(), RegistrationError> {
        let command_type = command_type.into();
        if self.handlers.contains_key(&command_type) {
            return Err(RegistrationError::DuplicateCommandHandler { command_type });
        }
        tracing::debug!(command_type = %command_type, "command handler registered");
        self.handlers.insert(command_type, handler);
        Ok(())
    }

    pub fn is_registered(&self, command_type: &str) -> bool {
        self.handlers.contains_key(command_type)
    }

    /// Dispatch a command to its handler and return the handler's outcome.
    ///
    /// No queuing and no retry happen here.
    ///
    /// # Errors
    ///
    /// * [`DispatchError::HandlerNotFound`] if no handler is registered.
    /// * Whatever the handler returns.
    pub async fn dispatch(&self, command: CommandEnvelope) -> Result<CommandOutcome, DispatchError> {
        let handler = self.handlers.get(&command.command_type).ok_or_else(|| {
            DispatchError::HandlerNotFound {
                command_type: command.command_type.clone(),
            }
        })?;
        handler.handle(command).await
    }
}
