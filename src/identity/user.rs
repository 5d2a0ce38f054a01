//! The `User` aggregate: a person's profile.

use serde::{Deserialize, Serialize};

use super::{Credential, IdentityError, validate_email};
use crate::aggregate::Aggregate;
use crate::registry::{EventRegistry, payload};

/// Profile of an existing user.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Profile {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
}

/// User state. `profile` is `None` until the user is created.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub profile: Option<Profile>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateUser {
    pub username: String,
    pub email: String,
    #[serde(default)]
    pub first_name: String,
    #[serde(default)]
    pub last_name: String,
    /// Handed to the auth record the user saga creates.
    pub credential: Credential,
}

/// Partial profile update; `None` leaves a field unchanged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UpdateUser {
    #[serde(default)]
    pub first_name: Option<String>,
    #[serde(default)]
    pub last_name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserCommand {
    CreateUser(CreateUser),
    UpdateUser(UpdateUser),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserCreated {
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub credential: Credential,
}

/// Only the fields that changed are set.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserUpdated {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub first_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data")]
pub enum UserEvent {
    UserCreatedEvent(UserCreated),
    UserUpdatedEvent(UserUpdated),
}

impl Aggregate for User {
    const AGGREGATE_TYPE: &'static str = "user";
    const COMMAND_TYPES: &'static [&'static str] = &["CreateUser", "UpdateUser"];

    type Command = UserCommand;
    type DomainEvent = UserEvent;
    type Error = IdentityError;

    fn event_registry() -> EventRegistry<UserEvent> {
        EventRegistry::new()
            .with("UserCreatedEvent", |data| {
                payload(data).map(UserEvent::UserCreatedEvent)
            })
            .with("UserUpdatedEvent", |data| {
                payload(data).map(UserEvent::UserUpdatedEvent)
            })
    }

    fn handle(&self, cmd: UserCommand) -> Result<Vec<UserEvent>, IdentityError> {
        match cmd {
            UserCommand::CreateUser(create) => {
                if self.profile.is_some() {
                    return Err(IdentityError::AlreadyExists("user"));
                }
                let username = create.username.trim();
                if username.is_empty() {
                    return Err(IdentityError::EmptyUsername);
                }
                validate_email(&create.email)?;
                create.credential.validate()?;
                Ok(vec![UserEvent::UserCreatedEvent(UserCreated {
                    username: username.to_owned(),
                    email: create.email,
                    first_name: create.first_name,
                    last_name: create.last_name,
                    credential: create.credential,
                })])
            }
            UserCommand::UpdateUser(update) => {
                let Some(profile) = &self.profile else {
                    return Err(IdentityError::NotFound("user"));
                };
                if let Some(email) = &update.email {
                    validate_email(email)?;
                }
                let changed = UserUpdated {
                    first_name: update.first_name.filter(|v| *v != profile.first_name),
                    last_name: update.last_name.filter(|v| *v != profile.last_name),
                    email: update.email.filter(|v| *v != profile.email),
                };
                if changed == UserUpdated::default() {
                    return Ok(Vec::new());
                }
                Ok(vec![UserEvent::UserUpdatedEvent(changed)])
            }
        }
    }

    fn apply(mut self, event: &UserEvent) -> Self {
        match event {
            UserEvent::UserCreatedEvent(created) => {
                self.profile = Some(Profile {
                    username: created.username.clone(),
                    email: created.email.clone(),
                    first_name: created.first_name.clone(),
                    last_name: created.last_name.clone(),
                });
            }
            UserEvent::UserUpdatedEvent(updated) => {
                if let Some(profile) = self.profile.as_mut() {
                    if let Some(first_name) = &updated.first_name {
                        profile.first_name.clone_from(first_name);
                    }
                    if let Some(last_name) = &updated.last_name {
                        profile.last_name.clone_from(last_name);
                    }
                    if let Some(email) = &updated.email {
                        profile.email.clone_from(email);
                    }
                }
            }
        }
        self
    }
}
