//! Self-contained demo of the identity domain on a durable store: user
//! registration, the saga that creates the matching auth record, read-model
//! lookups, and a restart that replays the journal.
//!
//! Run with: `cargo run --example identity`
//!
//! Set `RUST_LOG=identity_es=debug` to watch dispatch and saga spans.

use std::sync::Arc;

use identity_es::identity::{
    Auth, AuthCommand, ChangeCredential, CreateUser, Credential, IdentityModule, UpdateUser, User,
    UserAuthSaga, UserCommand, queries,
};
use identity_es::{
    CommandContext, CommandEnvelope, EventStore, FileEventStore, QueryEnvelope, Runtime, SagaState,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn register(username: &str, email: &str, credential: Credential) -> UserCommand {
    UserCommand::CreateUser(CreateUser {
        username: username.into(),
        email: email.into(),
        first_name: String::new(),
        last_name: String::new(),
        credential,
    })
}

async fn start(
    store: Arc<dyn EventStore>,
    base: &std::path::Path,
) -> Result<(Runtime, IdentityModule), Box<dyn std::error::Error>> {
    let identity = IdentityModule::new(Arc::clone(&store));
    let runtime = identity
        .install(Runtime::builder(store))
        .dead_letter_dir(base.join("sagas"))
        .start()
        .await?;
    Ok((runtime, identity))
}

// ---------------------------------------------------------------------------
// Main
// ---------------------------------------------------------------------------

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("identity_es=info")),
        )
        .init();

    let tmp = tempfile::tempdir()?;
    let store: Arc<dyn EventStore> = Arc::new(FileEventStore::open(tmp.path())?);
    let (runtime, identity) = start(Arc::clone(&store), tmp.path()).await?;

    let ctx = CommandContext::default().with_actor("demo");

    // Two users, one local and one federated.
    let ada = register(
        "ada",
        "ada@example.com",
        Credential::Local {
            secret_hash: "argon2id$v=19$m=65536,t=3,p=4$c2FsdA$aGFzaA".into(),
        },
    );
    runtime
        .submit_command(CommandEnvelope::for_aggregate::<User>("u-ada", &ada, ctx.clone())?)
        .await?;

    let grace = register(
        "grace",
        "grace@example.com",
        Credential::Facebook {
            subject_id: "fb-1906".into(),
        },
    );
    runtime
        .submit_command(CommandEnvelope::for_aggregate::<User>("u-grace", &grace, ctx.clone())?)
        .await?;

    // Registering the same id twice is rejected by the aggregate.
    let again = CommandEnvelope::for_aggregate::<User>("u-ada", &ada, ctx.clone())?;
    match runtime.submit_command(again).await {
        Ok(_) => println!("unexpected: duplicate registration accepted"),
        Err(e) => println!("duplicate registration rejected: {e}"),
    }

    // Profile update and credential rotation.
    let update = UserCommand::UpdateUser(UpdateUser {
        first_name: Some("Ada".into()),
        last_name: Some("Lovelace".into()),
        ..UpdateUser::default()
    });
    runtime
        .submit_command(CommandEnvelope::for_aggregate::<User>("u-ada", &update, ctx.clone())?)
        .await?;

    runtime.settle().await;

    let rotate = AuthCommand::ChangeCredential(ChangeCredential {
        credential: Credential::Local {
            secret_hash: "argon2id$v=19$m=65536,t=3,p=4$c2FsdDI$aGFzaDI".into(),
        },
    });
    runtime
        .submit_command_with_retry(
            CommandEnvelope::for_aggregate::<Auth>("u-ada", &rotate, ctx)?,
            3,
        )
        .await?;

    runtime.settle().await;

    // Queries: replayed aggregate state and read models.
    let user = runtime
        .execute_query(QueryEnvelope::new(queries::GET_USER, json!({"id": "u-ada"})))
        .await?;
    println!("GetUser u-ada      = {user}");

    let login = runtime
        .execute_query(QueryEnvelope::new(
            queries::FIND_AUTH_BY_LOGIN,
            json!({"login": "grace@example.com"}),
        ))
        .await?;
    println!("FindAuthByLogin    = {login}");

    let users = identity.user_directory().read(|d| d.len()).await;
    println!("user directory     = {users} users");

    for id in ["u-ada", "u-grace"] {
        let state = runtime.sagas().state(UserAuthSaga::NAME, id);
        println!("saga {id:<8}      = {state:?}");
        assert_eq!(state, SagaState::Completed);
    }

    runtime.shutdown().await;
    let head = store.head_position();
    drop(runtime);
    drop(store);

    // Restart over the same journal: history replays, nothing is re-dispatched.
    let store: Arc<dyn EventStore> = Arc::new(FileEventStore::open(tmp.path())?);
    let (runtime, identity) = start(Arc::clone(&store), tmp.path()).await?;
    runtime.settle().await;

    let first_name = identity
        .user_directory()
        .read(|d| d.get("u-ada").map(|u| u.first_name.clone()))
        .await;
    println!("after restart: head={}, ada first name={first_name:?}", store.head_position());

    assert_eq!(store.head_position(), head);
    assert_eq!(first_name.as_deref(), Some("Ada"));
    assert!(runtime.sagas().waiting().is_empty());

    runtime.shutdown().await;
    println!("all assertions passed");

    Ok(())
}
