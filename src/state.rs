//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use jsonwebtoken::{DecodingKey, EncodingKey};
use rusqlite::Connection;

use crate::{
    Error,
    chat::CompletionModel,
    classify::ClassificationAdapter,
    db::initialize,
    feed::FeedClient,
    pagination::PaginationConfig,
    sync::CredentialLocks,
    transaction::SqliteTransactionStore,
};

/// The keys used for signing and verifying bearer tokens.
#[derive(Clone)]
pub struct JwtKeys {
    /// The encoding key for signing tokens.
    pub encoding_key: EncodingKey,
    /// The decoding key for verifying tokens.
    pub decoding_key: DecodingKey,
}

impl JwtKeys {
    /// Derive both keys from a shared secret.
    pub fn from_secret(secret: &str) -> Self {
        Self {
            encoding_key: EncodingKey::from_secret(secret.as_ref()),
            decoding_key: DecodingKey::from_secret(secret.as_ref()),
        }
    }
}

/// The state of the REST server.
///
/// The feed client, classification adapter and completion model are
/// injected so tests and deployments can swap the external collaborators
/// without touching the handlers or the sync engine.
#[derive(Clone)]
pub struct AppState {
    /// The database connection.
    pub db_connection: Arc<Mutex<Connection>>,
    /// The keys for signing and verifying bearer tokens.
    pub jwt_keys: JwtKeys,
    /// The config that controls how to serve pages of data.
    pub pagination_config: PaginationConfig,
    /// The client for the external account-aggregation feed.
    pub feed: Arc<dyn FeedClient>,
    /// The transaction classification adapter.
    pub classifier: ClassificationAdapter,
    /// The completion capability backing the chat endpoint, when configured.
    pub completions: Option<Arc<dyn CompletionModel>>,
    /// Per-credential locks serializing sync runs.
    pub sync_locks: CredentialLocks,
    /// The store the sync engine writes transactions through.
    pub transaction_store: SqliteTransactionStore,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the tables for
    /// the domain models.
    ///
    /// # Errors
    ///
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        jwt_secret: &str,
        pagination_config: PaginationConfig,
        feed: Arc<dyn FeedClient>,
        classifier: ClassificationAdapter,
        completions: Option<Arc<dyn CompletionModel>>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let connection = Arc::new(Mutex::new(db_connection));

        Ok(Self {
            transaction_store: SqliteTransactionStore::new(connection.clone()),
            db_connection: connection,
            jwt_keys: JwtKeys::from_secret(jwt_secret),
            pagination_config,
            feed,
            classifier,
            completions,
            sync_locks: CredentialLocks::new(),
        })
    }
}

// this impl tells the Claims extractor how to access the keys from our state
impl FromRef<AppState> for JwtKeys {
    fn from_ref(state: &AppState) -> Self {
        state.jwt_keys.clone()
    }
}
