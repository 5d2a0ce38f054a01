//! Joins user creation to auth creation.

use super::auth::{Auth, AuthCommand, CreateAuth};
use super::user::UserCreated;
use crate::command::{CommandContext, CommandEnvelope};
use crate::error::BoxError;
use crate::event::RecordedEvent;
use crate::registry::payload;
use crate::saga::{Saga, SagaReaction};

/// `UserCreatedEvent` starts an instance keyed by the user id and issues
/// `CreateAuth` for the same id; `AuthCreatedEvent` completes it.
#[derive(Debug, Clone, Copy, Default)]
pub struct UserAuthSaga;

impl UserAuthSaga {
    pub const NAME: &'static str = "user-auth";
}

impl Saga for UserAuthSaga {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn event_types(&self) -> &'static [&'static str] {
        &["UserCreatedEvent", "AuthCreatedEvent"]
    }

    fn react(&self, event: &RecordedEvent) -> Result<SagaReaction, BoxError> {
        match event.event_type.as_str() {
            "UserCreatedEvent" => {
                let created: UserCreated = payload(event.payload.clone())?;
                let user_id = event.aggregate_id.clone();
                let command = AuthCommand::CreateAuth(CreateAuth {
                    user_id: user_id.clone(),
                    username: created.username,
                    email: created.email,
                    credential: created.credential,
                });
                let mut context = CommandContext::default().with_correlation_id(user_id.clone());
                if let Some(actor) = &event.metadata.actor {
                    context = context.with_actor(actor.clone());
                }
                Ok(SagaReaction::Start {
                    command: CommandEnvelope::for_aggregate::<Auth>(&user_id, &command, context)?,
                    correlation_id: user_id,
                })
            }
            "AuthCreatedEvent" => Ok(SagaReaction::Confirm {
                correlation_id: event.aggregate_id.clone(),
            }),
            _ => Ok(SagaReaction::Ignore),
        }
    }
}
