//! Account linking and manual sync endpoints: create a link token,
//! exchange a public token for a credential, and sync on demand.

use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;

use crate::{
    Error,
    account,
    auth::Claims,
    state::AppState,
    sync::{SyncOutcome, sync_transactions},
};

/// A route handler that creates a link token for starting the account
/// linking flow in the frontend.
pub async fn create_link_token(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, Error> {
    let link_token = state.feed.create_link_token(claims.sub).await?;

    Ok(Json(json!({
        "linkToken": link_token.link_token,
        "expiration": link_token.expiration,
    })))
}

/// Request body for [exchange_public_token].
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeBody {
    /// The public token produced by the linking flow.
    pub public_token: String,
}

/// A route handler that exchanges a public token for an access credential,
/// stores the accounts behind it, and runs the initial transaction sync.
pub async fn exchange_public_token(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<ExchangeBody>,
) -> Result<Json<serde_json::Value>, Error> {
    if body.public_token.trim().is_empty() {
        return Err(Error::Validation("Public token is required".to_owned()));
    }

    let exchange = state.feed.exchange_public_token(&body.public_token).await?;
    let feed_accounts = state.feed.list_accounts(&exchange.access_token).await?;

    let accounts_added = {
        let connection = state.db_connection.lock().unwrap();
        let mut accounts_added = 0;
        for feed_account in &feed_accounts {
            account::upsert_from_feed(
                claims.sub,
                &exchange.access_token,
                &exchange.item_id,
                feed_account,
                &connection,
            )?;
            accounts_added += 1;
        }

        accounts_added
    };

    let mut store = state.transaction_store.clone();
    sync_transactions(
        &mut store,
        &state.db_connection,
        state.feed.as_ref(),
        &state.classifier,
        &state.sync_locks,
        claims.sub,
        &exchange.access_token,
    )
    .await?;

    Ok(Json(json!({
        "success": true,
        "accountsAdded": accounts_added,
    })))
}

/// A route handler that syncs every credential the user has linked, then
/// refreshes account balances.
///
/// Accounts sharing one access credential share one transaction feed, so
/// the credential list is deduplicated before syncing: each feed is pulled
/// exactly once per request.
pub async fn sync_now(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, Error> {
    let accounts = {
        let connection = state.db_connection.lock().unwrap();
        account::accounts_for_user(claims.sub, &connection)?
    };

    if accounts.is_empty() {
        return Ok(Json(json!({
            "message": "No accounts to sync",
            "accountsProcessed": 0,
        })));
    }

    let mut access_tokens: Vec<&str> = Vec::new();
    for account in &accounts {
        if !access_tokens.contains(&account.access_token.as_str()) {
            access_tokens.push(&account.access_token);
        }
    }

    let mut total = SyncOutcome::default();
    for access_token in &access_tokens {
        let mut store = state.transaction_store.clone();
        let outcome = sync_transactions(
            &mut store,
            &state.db_connection,
            state.feed.as_ref(),
            &state.classifier,
            &state.sync_locks,
            claims.sub,
            access_token,
        )
        .await?;

        total.added_count += outcome.added_count;
        total.modified_count += outcome.modified_count;
        total.removed_count += outcome.removed_count;
    }

    // Reconcile balances even when no new transactions exist.
    for access_token in &access_tokens {
        let feed_accounts = state.feed.list_accounts(access_token).await?;
        let connection = state.db_connection.lock().unwrap();
        account::apply_feed_balances(access_token, &feed_accounts, &connection)?;
    }

    Ok(Json(json!({
        "message": "Transactions synced successfully",
        "accountsProcessed": access_tokens.len(),
        "transactionsAdded": total.added_count,
        "transactionsModified": total.modified_count,
        "transactionsRemoved": total.removed_count,
    })))
}
