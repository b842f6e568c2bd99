//! The webhook dispatcher: routes asynchronous feed notifications to the
//! sync engine or to account status updates.
//!
//! The handler always acknowledges with 200, even when internal processing
//! fails, so the sender never retry-storms; failures are logged instead.

use axum::{
    Json,
    extract::{State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use crate::{
    Error,
    account::{self, Account, AccountStatus},
    state::AppState,
    sync::sync_transactions,
};

/// Notification codes that mean new transaction data is ready to pull.
const TRANSACTION_UPDATE_CODES: [&str; 3] =
    ["SYNC_UPDATES_AVAILABLE", "DEFAULT_UPDATE", "HISTORICAL_UPDATE"];

/// The error block attached to item-error notifications.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookErrorBody {
    /// The upstream error code.
    pub error_code: Option<String>,
}

/// An asynchronous notification from the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct WebhookPayload {
    /// The notification family, e.g. "TRANSACTIONS" or "ITEM".
    pub webhook_type: String,
    /// The notification code within the family.
    pub webhook_code: String,
    /// The feed item the notification concerns.
    pub item_id: String,
    /// Error details for item-error notifications.
    pub error: Option<WebhookErrorBody>,
}

/// A route handler for feed notifications. Unauthenticated: the feed calls
/// it directly. Always returns 200, including for payloads that fail to
/// parse.
pub async fn handle_webhook(
    State(state): State<AppState>,
    payload: Result<Json<WebhookPayload>, JsonRejection>,
) -> Response {
    let Json(payload) = match payload {
        Ok(payload) => payload,
        Err(rejection) => {
            tracing::error!("could not parse webhook payload: {rejection}");
            return (StatusCode::OK, "Webhook received with errors").into_response();
        }
    };

    tracing::info!(
        "Received webhook: {} - {} for item {}",
        payload.webhook_type,
        payload.webhook_code,
        payload.item_id
    );

    if let Err(error) = dispatch(&state, &payload).await {
        tracing::error!(
            "Error processing webhook {} - {}: {error}",
            payload.webhook_type,
            payload.webhook_code
        );
        return (StatusCode::OK, "Webhook received with errors").into_response();
    }

    (StatusCode::OK, "Webhook processed").into_response()
}

async fn dispatch(state: &AppState, payload: &WebhookPayload) -> Result<(), Error> {
    let accounts = {
        let connection = state.db_connection.lock().unwrap();
        account::accounts_by_item(&payload.item_id, &connection)?
    };

    let Some(first_account) = accounts.first() else {
        tracing::warn!("no accounts found for item: {}", payload.item_id);
        return Ok(());
    };

    match payload.webhook_type.as_str() {
        "TRANSACTIONS" => {
            if TRANSACTION_UPDATE_CODES.contains(&payload.webhook_code.as_str()) {
                run_sync(state, first_account).await?;
            }
        }
        "ITEM" => match payload.webhook_code.as_str() {
            "ERROR" => {
                let error_code = payload
                    .error
                    .as_ref()
                    .and_then(|error| error.error_code.as_deref())
                    .unwrap_or("UNKNOWN");
                tracing::error!(
                    "feed item error for item {}: {error_code}",
                    payload.item_id
                );

                let connection = state.db_connection.lock().unwrap();
                account::set_status_by_item(
                    &payload.item_id,
                    AccountStatus::Error,
                    Some(error_code),
                    &connection,
                )?;
            }
            "PENDING_EXPIRATION" => {
                // Remediation needs the user to re-authenticate; nothing to
                // sync here.
                tracing::warn!("feed item pending expiration: {}", payload.item_id);

                let connection = state.db_connection.lock().unwrap();
                account::set_status_by_item(
                    &payload.item_id,
                    AccountStatus::PendingExpiration,
                    None,
                    &connection,
                )?;
            }
            _ => {}
        },
        _ => {}
    }

    Ok(())
}

async fn run_sync(state: &AppState, account: &Account) -> Result<(), Error> {
    let mut store = state.transaction_store.clone();

    sync_transactions(
        &mut store,
        &state.db_connection,
        state.feed.as_ref(),
        &state.classifier,
        &state.sync_locks,
        account.user_id,
        &account.access_token,
    )
    .await?;

    Ok(())
}
