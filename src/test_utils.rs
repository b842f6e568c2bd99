//! Shared helpers for route tests: an app backed by an in-memory database
//! and a fixture feed.

use std::sync::Arc;

use axum_test::TestServer;
use rusqlite::Connection;

use crate::{
    classify::ClassificationAdapter,
    feed::StaticFeed,
    pagination::PaginationConfig,
    routing::build_router,
    state::AppState,
};

/// The JWT secret used by test servers.
pub const TEST_SECRET: &str = "test-secret";

/// Create an [AppState] over an in-memory database and the given fixture
/// feed.
pub fn test_state(feed: Arc<StaticFeed>) -> AppState {
    let connection = Connection::open_in_memory().expect("could not open in-memory database");

    AppState::new(
        connection,
        TEST_SECRET,
        PaginationConfig::default(),
        feed,
        ClassificationAdapter::local_only(),
        None,
    )
    .expect("could not create app state")
}

/// Create a test server and the fixture feed behind it.
pub fn test_server() -> (TestServer, Arc<StaticFeed>) {
    let feed = Arc::new(StaticFeed::new());
    let state = test_state(feed.clone());
    let server = TestServer::new(build_router(state));

    (server, feed)
}

/// Register a fresh user and return their bearer token.
pub async fn register_test_user(server: &TestServer) -> String {
    let response = server
        .post(crate::endpoints::REGISTER)
        .json(&serde_json::json!({
            "email": "test@test.com",
            "password": "averysecurepassword",
            "firstName": "Test",
        }))
        .await;

    response.assert_status(axum::http::StatusCode::CREATED);

    response.json::<serde_json::Value>()["token"]
        .as_str()
        .expect("registration response did not include a token")
        .to_owned()
}
