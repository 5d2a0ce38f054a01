//! The `Auth` aggregate: how a user proves who they are.
//!
//! One auth record exists per user and shares the user's id, so
//! `auth-<id>` and `user-<id>` are sibling streams.

use serde::{Deserialize, Serialize};

use super::{Credential, IdentityError, validate_email};
use crate::aggregate::Aggregate;
use crate::registry::{EventRegistry, payload};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthRecord {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub credential: Credential,
}

/// Auth state. `record` is `None` until the auth record is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Auth {
    pub record: Option<AuthRecord>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateAuth {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChangeCredential {
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthCommand {
    CreateAuth(CreateAuth),
    ChangeCredential(ChangeCredential),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthCreated {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthUpdated {
    pub credential: Credential,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum AuthEvent {
    AuthCreatedEvent(AuthCreated),
    AuthUpdatedEvent(AuthUpdated),
}

impl Aggregate for Auth {
    const AGGREGATE_TYPE: &'static str = "auth";
    const COMMAND_TYPES: &'static [&'static str] = &["CreateAuth", "ChangeCredential"];

    type Command = AuthCommand;
    type DomainEvent = AuthEvent;
    type Error = IdentityError;

    fn event_registry() -> EventRegistry<AuthEvent> {
        EventRegistry::new()
            .with("AuthCreatedEvent", |data| {
                payload(data).map(AuthEvent::AuthCreatedEvent)
            })
            .with("AuthUpdatedEvent", |data| {
                payload(data).map(AuthEvent::AuthUpdatedEvent)
            })
    }

    fn handle(&self, cmd: AuthCommand) -> Result<Vec<AuthEvent>, IdentityError> {
        match cmd {
            AuthCommand::CreateAuth(create) => {
                if self.record.is_some() {
                    return Err(IdentityError::AlreadyExists("auth"));
                }
                if create.username.trim().is_empty() {
                    return Err(IdentityError::EmptyUsername);
                }
                validate_email(&create.email)?;
                create.credential.validate()?;
                Ok(vec![AuthEvent::AuthCreatedEvent(AuthCreated {
                    user_id: create.user_id,
                    username: create.username.trim().to_owned(),
                    email: create.email,
                    credential: create.credential,
                })])
            }
            AuthCommand::ChangeCredential(change) => {
                let Some(record) = &self.record else {
                    return Err(IdentityError::NotFound("auth"));
                };
                change.credential.validate()?;
                if change.credential == record.credential {
                    return Ok(Vec::new());
                }
                Ok(vec![AuthEvent::AuthUpdatedEvent(AuthUpdated {
                    credential: change.credential,
                })])
            }
        }
    }

    fn apply(mut self, event: &AuthEvent) -> Self {
        match event {
            AuthEvent::AuthCreatedEvent(created) => {
                self.record = Some(AuthRecord {
                    user_id: created.user_id.clone(),
                    username: created.username.clone(),
                    email: created.email.clone(),
                    credential: created.credential.clone(),
                });
            }
            AuthEvent::AuthUpdatedEvent(updated) => {
                if let Some(record) = self.record.as_mut() {
                    record.credential = updated.credential.clone();
                }
            }
        }
        self
    }
}
