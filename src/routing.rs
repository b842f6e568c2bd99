//! Application router configuration.
//!
//! Authentication is enforced per handler through the [Claims] extractor;
//! registration, login and the feed webhook are the only routes that do not
//! require a bearer token.

use axum::{
    Json, Router,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, patch, post},
};
use serde_json::json;

use crate::{
    account, auth,
    auth::Claims,
    budget,
    category::CATEGORIES,
    chat, endpoints, link,
    state::AppState,
    summary, transaction, webhook,
};

/// Return a router with all the app's routes.
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/", get(get_coffee))
        .route(endpoints::REGISTER, post(auth::register))
        .route(endpoints::LOG_IN, post(auth::log_in))
        .route(endpoints::ME, get(auth::me))
        .route(endpoints::ACCOUNTS, get(account::get_accounts))
        .route(endpoints::ACCOUNT, get(account::get_account))
        .route(endpoints::TRANSACTIONS, get(transaction::get_transactions))
        .route(endpoints::TRANSACTION, get(transaction::get_transaction))
        .route(
            endpoints::TRANSACTION_CATEGORY,
            patch(transaction::update_transaction_category),
        )
        .route(endpoints::MONTHLY_STATS, get(transaction::get_monthly_stats))
        .route(
            endpoints::SPENDING_BY_CATEGORY,
            get(transaction::get_spending_by_category),
        )
        .route(endpoints::CREATE_LINK_TOKEN, get(link::create_link_token))
        .route(
            endpoints::EXCHANGE_PUBLIC_TOKEN,
            post(link::exchange_public_token),
        )
        .route(endpoints::SYNC_TRANSACTIONS, post(link::sync_now))
        .route(endpoints::WEBHOOK, post(webhook::handle_webhook))
        .route(endpoints::SUMMARY, get(summary::get_summary))
        .route(endpoints::BUDGETS, get(budget::get_budgets))
        .route(endpoints::CATEGORIES, get(get_categories))
        .route(endpoints::CHAT, post(chat::ask_question))
        .fallback(get_404_not_found)
        .with_state(state)
}

/// Attempt to get a cup of coffee from the server.
async fn get_coffee() -> Response {
    (StatusCode::IM_A_TEAPOT, "I'm a teapot").into_response()
}

/// A route handler listing the fixed category taxonomy.
async fn get_categories(_claims: Claims) -> Json<serde_json::Value> {
    Json(json!({ "categories": CATEGORIES }))
}

async fn get_404_not_found() -> Response {
    (
        StatusCode::NOT_FOUND,
        Json(json!({
            "status": "error",
            "message": "The requested resource could not be found.",
        })),
    )
        .into_response()
}

#[cfg(test)]
mod auth_route_tests {
    use axum::http::StatusCode;
    use serde_json::json;

    use crate::{
        endpoints,
        test_utils::{register_test_user, test_server},
    };

    #[tokio::test]
    async fn register_returns_user_and_token() {
        let (server, _feed) = test_server();

        let response = server
            .post(endpoints::REGISTER)
            .json(&json!({
                "email": "test@test.com",
                "password": "averysecurepassword",
                "firstName": "Test",
                "lastName": "User",
            }))
            .await;

        response.assert_status(StatusCode::CREATED);
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["user"]["email"], "test@test.com");
        assert!(body["user"].get("passwordHash").is_none());
        assert!(body["token"].is_string());
    }

    #[tokio::test]
    async fn register_rejects_invalid_email() {
        let (server, _feed) = test_server();

        server
            .post(endpoints::REGISTER)
            .json(&json!({
                "email": "not-an-email",
                "password": "averysecurepassword",
            }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn register_rejects_duplicate_email() {
        let (server, _feed) = test_server();
        register_test_user(&server).await;

        server
            .post(endpoints::REGISTER)
            .json(&json!({
                "email": "test@test.com",
                "password": "adifferentsecurepassword",
            }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn log_in_with_valid_credentials_returns_a_token() {
        let (server, _feed) = test_server();
        register_test_user(&server).await;

        let response = server
            .post(endpoints::LOG_IN)
            .json(&json!({
                "email": "test@test.com",
                "password": "averysecurepassword",
            }))
            .await;

        response.assert_status_ok();
        assert!(response.json::<serde_json::Value>()["token"].is_string());
    }

    #[tokio::test]
    async fn log_in_with_wrong_password_is_unauthorized() {
        let (server, _feed) = test_server();
        register_test_user(&server).await;

        server
            .post(endpoints::LOG_IN)
            .json(&json!({
                "email": "test@test.com",
                "password": "thewrongpassword",
            }))
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn me_returns_the_authenticated_user() {
        let (server, _feed) = test_server();
        let token = register_test_user(&server).await;

        let response = server
            .get(endpoints::ME)
            .authorization_bearer(token)
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<serde_json::Value>()["user"]["email"],
            "test@test.com"
        );
    }

    #[tokio::test]
    async fn protected_routes_require_a_bearer_token() {
        let (server, _feed) = test_server();

        for path in [
            endpoints::ME,
            endpoints::ACCOUNTS,
            endpoints::TRANSACTIONS,
            endpoints::SUMMARY,
            endpoints::BUDGETS,
            endpoints::CATEGORIES,
        ] {
            server
                .get(path)
                .await
                .assert_status(StatusCode::UNAUTHORIZED);
        }
    }

    #[tokio::test]
    async fn garbage_token_is_unauthorized() {
        let (server, _feed) = test_server();

        server
            .get(endpoints::ACCOUNTS)
            .authorization_bearer("not-a-jwt")
            .await
            .assert_status(StatusCode::UNAUTHORIZED);
    }
}

#[cfg(test)]
mod link_route_tests {
    use axum::http::StatusCode;
    use serde_json::json;
    use time::macros::date;

    use crate::{
        account::test_fixtures::{credit_card, depository},
        endpoints,
        feed::{FeedChanges, FeedTransaction},
        test_utils::{register_test_user, test_server},
    };

    fn grocery_transaction(account: &str) -> FeedTransaction {
        FeedTransaction {
            external_id: "txn-grocery-1".to_owned(),
            external_account_id: account.to_owned(),
            name: "GROCERY STORE".to_owned(),
            merchant_name: Some("Grocery Store".to_owned()),
            amount: 75.50,
            date: date!(2024 - 06 - 01),
            pending: false,
            payment_channel: Some("in store".to_owned()),
            category: vec!["Shops".to_owned()],
            description: None,
            city: None,
            region: None,
            country: None,
            currency_code: Some("USD".to_owned()),
        }
    }

    #[tokio::test]
    async fn create_link_token_returns_a_token_and_expiry() {
        let (server, _feed) = test_server();
        let token = register_test_user(&server).await;

        let response = server
            .get(endpoints::CREATE_LINK_TOKEN)
            .authorization_bearer(token)
            .await;

        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert!(body["linkToken"].is_string());
        assert!(body["expiration"].is_string());
    }

    #[tokio::test]
    async fn exchange_links_accounts_and_syncs_the_first_page() {
        let (server, feed) = test_server();
        let token = register_test_user(&server).await;

        // The first exchange on the fixture feed yields access-sandbox-1.
        feed.set_accounts(
            "access-sandbox-1",
            vec![depository("ext-acct-1", 1000.0, Some(900.0))],
        );
        feed.push_changes(
            "access-sandbox-1",
            FeedChanges {
                added: vec![grocery_transaction("ext-acct-1")],
                next_cursor: "cursor-1".to_owned(),
                ..Default::default()
            },
        );

        let response = server
            .post(endpoints::EXCHANGE_PUBLIC_TOKEN)
            .authorization_bearer(&token)
            .json(&json!({ "publicToken": "public-1" }))
            .await;

        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["success"], true);
        assert_eq!(body["accountsAdded"], 1);

        let transactions = server
            .get(endpoints::TRANSACTIONS)
            .authorization_bearer(&token)
            .await
            .json::<serde_json::Value>();
        let rows = transactions["transactions"].as_array().unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["name"], "GROCERY STORE");
        assert_eq!(rows[0]["amount"], 75.50);
        assert_eq!(rows[0]["autoCategory"], "Food");
        assert_eq!(rows[0]["upstreamCategory"], "Shops");

        let accounts = server
            .get(endpoints::ACCOUNTS)
            .authorization_bearer(&token)
            .await
            .json::<serde_json::Value>();
        assert_eq!(accounts["totalBalance"], 1000.0);
        assert_eq!(accounts["totalAvailableBalance"], 900.0);
    }

    #[tokio::test]
    async fn exchange_requires_a_public_token() {
        let (server, _feed) = test_server();
        let token = register_test_user(&server).await;

        server
            .post(endpoints::EXCHANGE_PUBLIC_TOKEN)
            .authorization_bearer(token)
            .json(&json!({ "publicToken": "" }))
            .await
            .assert_status(StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn manual_sync_pulls_each_credential_once_and_refreshes_balances() {
        let (server, feed) = test_server();
        let token = register_test_user(&server).await;

        // Two accounts share the one credential.
        feed.set_accounts(
            "access-sandbox-1",
            vec![
                depository("ext-acct-1", 1000.0, Some(900.0)),
                credit_card("ext-acct-2", 200.0),
            ],
        );
        server
            .post(endpoints::EXCHANGE_PUBLIC_TOKEN)
            .authorization_bearer(&token)
            .json(&json!({ "publicToken": "public-1" }))
            .await
            .assert_status_ok();
        let fetches_after_exchange = feed.fetch_calls();

        // The feed has fresh balances by the time of the manual sync.
        feed.set_accounts(
            "access-sandbox-1",
            vec![
                depository("ext-acct-1", 1100.0, Some(950.0)),
                credit_card("ext-acct-2", 150.0),
            ],
        );

        let response = server
            .post(endpoints::SYNC_TRANSACTIONS)
            .authorization_bearer(&token)
            .await;

        response.assert_status_ok();
        let body = response.json::<serde_json::Value>();
        assert_eq!(body["accountsProcessed"], 1);
        assert_eq!(
            feed.fetch_calls(),
            fetches_after_exchange + 1,
            "two accounts sharing a credential must sync that feed exactly once"
        );

        let accounts = server
            .get(endpoints::ACCOUNTS)
            .authorization_bearer(&token)
            .await
            .json::<serde_json::Value>();
        assert_eq!(accounts["totalBalance"], 950.0);
    }

    #[tokio::test]
    async fn manual_sync_with_no_accounts_is_a_no_op() {
        let (server, _feed) = test_server();
        let token = register_test_user(&server).await;

        let response = server
            .post(endpoints::SYNC_TRANSACTIONS)
            .authorization_bearer(token)
            .await;

        response.assert_status_ok();
        assert_eq!(
            response.json::<serde_json::Value>()["accountsProcessed"],
            0
        );
    }
}
