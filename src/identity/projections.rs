//! Read models for lookups replay cannot answer: by email, by login, and
//! listing.

use std::collections::{BTreeMap, HashMap};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Credential;
use super::auth::{Auth, AuthEvent};
use super::queries;
use super::user::{User, UserEvent, UserUpdated};
use crate::aggregate::Aggregate;
use crate::error::{BoxError, QueryError};
use crate::event::RecordedEvent;
use crate::projection::{Projection, ProjectionHandle};
use crate::query::{QueryEnvelope, QueryHandler};
use crate::registry::EventRegistry;

fn login_key(login: &str) -> String {
    login.trim().to_lowercase()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSummary {
    pub id: String,
    pub username: String,
    pub email: String,
    pub first_name: String,
    pub last_name: String,
    pub version: u64,
}

/// Users by id, with an email index.
#[derive(Debug, Clone)]
pub struct UserDirectory {
    registry: EventRegistry<UserEvent>,
    users: BTreeMap<String, UserSummary>,
    by_email: HashMap<String, String>,
}

impl Default for UserDirectory {
    fn default() -> Self {
        Self {
            registry: User::event_registry(),
            users: BTreeMap::new(),
            by_email: HashMap::new(),
        }
    }
}

impl UserDirectory {
    pub fn get(&self, id: &str) -> Option<&UserSummary> {
        self.users.get(id)
    }

    /// Case-insensitive.
    pub fn find_by_email(&self, email: &str) -> Option<&UserSummary> {
        self.by_email
            .get(&login_key(email))
            .and_then(|id| self.users.get(id))
    }

    /// Every user, ordered by id.
    pub fn list(&self) -> Vec<UserSummary> {
        self.users.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.users.len()
    }

    pub fn is_empty(&self) -> bool {
        self.users.is_empty()
    }
}

impl Projection for UserDirectory {
    const NAME: &'static str = "user-directory";
    const EVENT_TYPES: &'static [&'static str] = &["UserCreatedEvent", "UserUpdatedEvent"];

    fn apply(&mut self, event: &RecordedEvent) -> Result<(), BoxError> {
        let id = event.aggregate_id.clone();
        match self.registry.decode(event)? {
            UserEvent::UserCreatedEvent(created) => {
                self.by_email.insert(login_key(&created.email), id.clone());
                self.users.insert(
                    id.clone(),
                    UserSummary {
                        id,
                        username: created.username,
                        email: created.email,
                        first_name: created.first_name,
                        last_name: created.last_name,
                        version: event.version,
                    },
                );
            }
            UserEvent::UserUpdatedEvent(updated) => {
                let Some(user) = self.users.get_mut(&id) else {
                    return Err(format!("update for unknown user '{id}'").into());
                };
                if let Some(email) = updated.email {
                    self.by_email.remove(&login_key(&user.email));
                    self.by_email.insert(login_key(&email), id.clone());
                    user.email = email;
                }
                if let Some(first_name) = updated.first_name {
                    user.first_name = first_name;
                }
                if let Some(last_name) = updated.last_name {
                    user.last_name = last_name;
                }
                user.version = event.version;
            }
        }
        Ok(())
    }
}

/// What the credential-verification adapters need to check a login.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthSummary {
    pub user_id: String,
    pub username: String,
    pub email: String,
    pub provider: String,
    pub credential: Credential,
}

/// Auth records by user id, indexed by username and email.
///
/// The email key follows the user's current address: a `UserUpdatedEvent`
/// carrying a new email re-keys the entry. A login key is owned by the
/// first user that claims it; a later claim by another user is logged and
/// not indexed.
#[derive(Debug, Clone)]
pub struct AuthDirectory {
    registry: EventRegistry<AuthEvent>,
    users: EventRegistry<UserEvent>,
    by_user: HashMap<String, AuthSummary>,
    by_login: HashMap<String, String>,
    /// Email changes seen before the user's auth record was created.
    pending_email: HashMap<String, String>,
}

impl Default for AuthDirectory {
    fn default() -> Self {
        Self {
            registry: Auth::event_registry(),
            users: User::event_registry(),
            by_user: HashMap::new(),
            by_login: HashMap::new(),
            pending_email: HashMap::new(),
        }
    }
}

impl AuthDirectory {
    pub fn get(&self, user_id: &str) -> Option<&AuthSummary> {
        self.by_user.get(user_id)
    }

    /// Look up by username or email, case-insensitively.
    pub fn find_by_login(&self, login: &str) -> Option<&AuthSummary> {
        self.by_login
            .get(&login_key(login))
            .and_then(|user_id| self.by_user.get(user_id))
    }

    fn index_login(&mut self, login: &str, user_id: &str) {
        let key = login_key(login);
        match self.by_login.get(&key) {
            Some(owner) if owner != user_id => {
                tracing::warn!(
                    login = %key,
                    owner = %owner,
                    user_id,
                    "login already belongs to another user, not indexed"
                );
            }
            Some(_) => {}
            None => {
                self.by_login.insert(key, user_id.to_owned());
            }
        }
    }

    fn unindex_login(&mut self, login: &str, user_id: &str) {
        let key = login_key(login);
        if self.by_login.get(&key).is_some_and(|owner| owner == user_id) {
            self.by_login.remove(&key);
        }
    }

    fn change_email(&mut self, user_id: &str, email: String) {
        let Some((previous, username)) = self
            .by_user
            .get(user_id)
            .map(|a| (a.email.clone(), a.username.clone()))
        else {
            self.pending_email.insert(user_id.to_owned(), email);
            return;
        };
        // The username may share the old key; keep it indexed.
        if login_key(&previous) != login_key(&username) {
            self.unindex_login(&previous, user_id);
        }
        self.index_login(&email, user_id);
        if let Some(auth) = self.by_user.get_mut(user_id) {
            auth.email = email;
        }
    }
}

impl Projection for AuthDirectory {
    const NAME: &'static str = "auth-directory";
    const EVENT_TYPES: &'static [&'static str] =
        &["AuthCreatedEvent", "AuthUpdatedEvent", "UserUpdatedEvent"];

    fn apply(&mut self, event: &RecordedEvent) -> Result<(), BoxError> {
        let user_id = event.aggregate_id.clone();
        if event.aggregate_type == User::AGGREGATE_TYPE {
            if let UserEvent::UserUpdatedEvent(UserUpdated {
                email: Some(email), ..
            }) = self.users.decode(event)?
            {
                self.change_email(&user_id, email);
            }
            return Ok(());
        }

        match self.registry.decode(event)? {
            AuthEvent::AuthCreatedEvent(created) => {
                let email = self.pending_email.remove(&user_id).unwrap_or(created.email);
                self.index_login(&created.username, &user_id);
                self.index_login(&email, &user_id);
                self.by_user.insert(
                    user_id.clone(),
                    AuthSummary {
                        user_id,
                        username: created.username,
                        email,
                        provider: created.credential.provider().to_owned(),
                        credential: created.credential,
                    },
                );
            }
            AuthEvent::AuthUpdatedEvent(updated) => {
                let Some(auth) = self.by_user.get_mut(&user_id) else {
                    return Err(format!("update for unknown auth record '{user_id}'").into());
                };
                auth.provider = updated.credential.provider().to_owned();
                auth.credential = updated.credential;
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByEmail {
    pub email: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ByLogin {
    pub login: String,
}

/// Serves `FindUserByEmail` and `ListUsers` from the [`UserDirectory`].
pub struct UserDirectoryQueries {
    directory: ProjectionHandle<UserDirectory>,
}

impl UserDirectoryQueries {
    pub fn new(directory: ProjectionHandle<UserDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl QueryHandler for UserDirectoryQueries {
    async fn handle(&self, query: QueryEnvelope) -> Result<Value, QueryError> {
        match query.query_type.as_str() {
            queries::FIND_USER_BY_EMAIL => {
                let ByEmail { email } = query.decode()?;
                let found = self
                    .directory
                    .read(|d| d.find_by_email(&email).cloned())
                    .await;
                let user = found.ok_or(QueryError::NotFound {
                    resource: "user",
                    id: email,
                })?;
                Ok(serde_json::to_value(user)?)
            }
            queries::LIST_USERS => {
                let users = self.directory.read(UserDirectory::list).await;
                Ok(serde_json::to_value(users)?)
            }
            other => Err(QueryError::HandlerNotFound {
                query_type: other.to_owned(),
            }),
        }
    }
}

/// Serves `FindAuthByLogin` from the [`AuthDirectory`].
pub struct AuthDirectoryQueries {
    directory: ProjectionHandle<AuthDirectory>,
}

impl AuthDirectoryQueries {
    pub fn new(directory: ProjectionHandle<AuthDirectory>) -> Self {
        Self { directory }
    }
}

#[async_trait]
impl QueryHandler for AuthDirectoryQueries {
    async fn handle(&self, query: QueryEnvelope) -> Result<Value, QueryError> {
        let ByLogin { login } = query.decode()?;
        let found = self
            .directory
            .read(|d| d.find_by_login(&login).cloned())
            .await;
        let auth = found.ok_or(QueryError::NotFound {
            resource: "auth",
            id: login,
        })?;
        Ok(serde_json::to_value(auth)?)
    }
}
