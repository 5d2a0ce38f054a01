//! The identity domain: users, their auth records, the saga joining the
//! two, and the read models the credential-verification adapters query.
//!
//! [`IdentityModule`] hands the startup wiring its registration tables:
//!
//! ```no_run
//! use std::sync::Arc;
//! use identity_es::{CommandContext, CommandEnvelope, InMemoryEventStore, Runtime};
//! use identity_es::identity::{Credential, CreateUser, IdentityModule, User, UserCommand};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let store = Arc::new(InMemoryEventStore::new());
//! let identity = IdentityModule::new(store.clone());
//! let runtime = identity.install(Runtime::builder(store)).start().await?;
//!
//! let create = UserCommand::CreateUser(CreateUser {
//!     username: "ada".into(),
//!     email: "ada@example.com".into(),
//!     first_name: "Ada".into(),
//!     last_name: "Lovelace".into(),
//!     credential: Credential::Local { secret_hash: "argon2id$...".into() },
//! });
//! let cmd = CommandEnvelope::for_aggregate::<User>("u-1", &create, CommandContext::default())?;
//! runtime.submit_command(cmd).await?;
//! # Ok(())
//! # }
//! ```

mod auth;
mod projections;
mod saga;
mod user;

use std::sync::Arc;

use serde::{Deserialize, Serialize};

pub use auth::{
    Auth, AuthCommand, AuthCreated, AuthEvent, AuthRecord, AuthUpdated, ChangeCredential,
    CreateAuth,
};
pub use projections::{
    AuthDirectory, AuthDirectoryQueries, AuthSummary, ByEmail, ByLogin, UserDirectory,
    UserDirectoryQueries, UserSummary,
};
pub use saga::UserAuthSaga;
pub use user::{CreateUser, Profile, UpdateUser, User, UserCommand, UserCreated, UserEvent, UserUpdated};

use crate::command_bus::CommandHandler;
use crate::event_bus::EventHandler;
use crate::handler::{AggregateCommandHandler, AggregateQueryHandler};
use crate::projection::{Projection, ProjectionHandle, ProjectionHandler};
use crate::query::QueryHandler;
use crate::runtime::RuntimeBuilder;
use crate::saga::Saga;
use crate::store::EventStore;

/// Query type tags served by the identity module.
pub mod queries {
    /// `{"id"}` → the replayed user.
    pub const GET_USER: &str = "GetUser";
    /// `{"id"}` → the replayed auth record.
    pub const GET_AUTH: &str = "GetAuth";
    /// `{"email"}` → a [`UserSummary`](super::UserSummary).
    pub const FIND_USER_BY_EMAIL: &str = "FindUserByEmail";
    /// Any payload → every [`UserSummary`](super::UserSummary), by id.
    pub const LIST_USERS: &str = "ListUsers";
    /// `{"login"}` (username or email) → an [`AuthSummary`](super::AuthSummary).
    pub const FIND_AUTH_BY_LOGIN: &str = "FindAuthByLogin";
}

/// How a user authenticates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "provider", rename_all = "snake_case")]
pub enum Credential {
    /// Username or email plus a password, stored only as a hash.
    Local { secret_hash: String },
    /// Federated login; the provider's id for the user.
    Facebook { subject_id: String },
}

impl Credential {
    pub fn provider(&self) -> &'static str {
        match self {
            Self::Local { .. } => "local",
            Self::Facebook { .. } => "facebook",
        }
    }

    /// # Errors
    ///
    /// Returns [`IdentityError::InvalidCredential`] if the secret hash or
    /// subject id is blank.
    pub fn validate(&self) -> Result<(), IdentityError> {
        let (value, what) = match self {
            Self::Local { secret_hash } => (secret_hash, "local credential needs a secret hash"),
            Self::Facebook { subject_id } => {
                (subject_id, "facebook credential needs a subject id")
            }
        };
        if value.trim().is_empty() {
            return Err(IdentityError::InvalidCredential(what));
        }
        Ok(())
    }
}

/// Command rejections of the identity aggregates.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    #[error("{0} already exists")]
    AlreadyExists(&'static str),

    #[error("{0} does not exist")]
    NotFound(&'static str),

    #[error("username must not be empty")]
    EmptyUsername,

    #[error("invalid email address '{0}'")]
    InvalidEmail(String),

    #[error("invalid credential: {0}")]
    InvalidCredential(&'static str),
}

pub(crate) fn validate_email(email: &str) -> Result<(), IdentityError> {
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && !domain.is_empty() => Ok(()),
        _ => Err(IdentityError::InvalidEmail(email.to_owned())),
    }
}

/// Registration tables for the identity domain.
pub struct IdentityModule {
    store: Arc<dyn EventStore>,
    users: Arc<ProjectionHandler<UserDirectory>>,
    user_directory: ProjectionHandle<UserDirectory>,
    auths: Arc<ProjectionHandler<AuthDirectory>>,
    auth_directory: ProjectionHandle<AuthDirectory>,
}

impl IdentityModule {
    pub fn new(store: Arc<dyn EventStore>) -> Self {
        let (users, user_directory) = ProjectionHandler::new();
        let (auths, auth_directory) = ProjectionHandler::new();
        Self {
            store,
            users: Arc::new(users),
            user_directory,
            auths: Arc::new(auths),
            auth_directory,
        }
    }

    /// Command type → handler for both aggregates.
    pub fn command_handlers(&self) -> Vec<(String, Arc<dyn CommandHandler>)> {
        let mut handlers = AggregateCommandHandler::<User>::registrations(Arc::clone(&self.store));
        handlers.extend(AggregateCommandHandler::<Auth>::registrations(Arc::clone(
            &self.store,
        )));
        handlers
    }

    /// Event type → projection handler.
    pub fn event_handlers(&self) -> Vec<(String, Arc<dyn EventHandler>)> {
        let users: Arc<dyn EventHandler> = self.users.clone();
        let auths: Arc<dyn EventHandler> = self.auths.clone();
        let user_types = UserDirectory::EVENT_TYPES
            .iter()
            .map(move |t| ((*t).to_owned(), Arc::clone(&users)));
        let auth_types = AuthDirectory::EVENT_TYPES
            .iter()
            .map(move |t| ((*t).to_owned(), Arc::clone(&auths)));
        user_types.chain(auth_types).collect()
    }

    /// Query type → handler.
    pub fn query_handlers(&self) -> Vec<(String, Arc<dyn QueryHandler>)> {
        let get_user: Arc<dyn QueryHandler> =
            Arc::new(AggregateQueryHandler::<User>::new(Arc::clone(&self.store)));
        let get_auth: Arc<dyn QueryHandler> =
            Arc::new(AggregateQueryHandler::<Auth>::new(Arc::clone(&self.store)));
        let users: Arc<dyn QueryHandler> =
            Arc::new(UserDirectoryQueries::new(self.user_directory.clone()));
        let auths: Arc<dyn QueryHandler> =
            Arc::new(AuthDirectoryQueries::new(self.auth_directory.clone()));
        vec![
            (queries::GET_USER.to_owned(), get_user),
            (queries::GET_AUTH.to_owned(), get_auth),
            (queries::FIND_USER_BY_EMAIL.to_owned(), Arc::clone(&users)),
            (queries::LIST_USERS.to_owned(), users),
            (queries::FIND_AUTH_BY_LOGIN.to_owned(), auths),
        ]
    }

    pub fn sagas(&self) -> Vec<Arc<dyn Saga>> {
        vec![Arc::new(UserAuthSaga)]
    }

    /// Add every table to `builder`.
    pub fn install(&self, builder: RuntimeBuilder) -> RuntimeBuilder {
        builder
            .command_handlers(self.command_handlers())
            .event_handlers(self.event_handlers())
            .query_handlers(self.query_handlers())
            .sagas(self.sagas())
    }

    pub fn user_directory(&self) -> &ProjectionHandle<UserDirectory> {
        &self.user_directory
    }

    pub fn auth_directory(&self) -> &ProjectionHandle<AuthDirectory> {
        &self.auth_directory
    }
}
