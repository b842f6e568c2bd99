//! The chat endpoint: answers free-text questions from a summary of the
//! user's finances via an external completion capability.

use async_trait::async_trait;
use axum::{Json, extract::State};
use serde::Deserialize;
use serde_json::json;

use crate::{Error, account, auth::Claims, state::AppState, transaction};

/// The answer returned when no completion capability is configured or the
/// capability fails.
pub const FALLBACK_ANSWER: &str = "Unable to generate response";

/// How many recent transactions are included in the summary sent to the
/// completion capability.
const SUMMARY_TRANSACTION_LIMIT: u64 = 100;

/// An external text-completion capability.
#[async_trait]
pub trait CompletionModel: Send + Sync {
    /// Produce a completion for `prompt`.
    async fn complete(&self, prompt: &str) -> Result<String, Error>;
}

/// Request body for [ask_question].
#[derive(Debug, Deserialize)]
pub struct ChatBody {
    /// The user's free-text question.
    pub question: String,
}

/// A route handler that answers a finance question about the user's data.
///
/// The completion capability is optional and unreliable by design: any
/// failure is logged and answered with [FALLBACK_ANSWER] rather than an
/// error response.
pub async fn ask_question(
    State(state): State<AppState>,
    claims: Claims,
    Json(body): Json<ChatBody>,
) -> Result<Json<serde_json::Value>, Error> {
    if body.question.trim().is_empty() {
        return Err(Error::Validation("Question is required".to_owned()));
    }

    let summary = {
        let connection = state.db_connection.lock().unwrap();
        let accounts = account::accounts_for_user(claims.sub, &connection)?;
        let transactions =
            transaction::recent_transactions(claims.sub, SUMMARY_TRANSACTION_LIMIT, &connection)?;

        json!({
            "accounts": accounts
                .iter()
                .map(|account| json!({ "name": account.name, "balance": account.current_balance }))
                .collect::<Vec<_>>(),
            "transactions": transactions
                .iter()
                .map(|transaction| json!({
                    "date": transaction.date.to_string(),
                    "name": transaction.name,
                    "amount": transaction.amount,
                    "category": transaction.effective_category(),
                }))
                .collect::<Vec<_>>(),
        })
    };

    let prompt = format!(
        "You are a helpful personal finance assistant. Answer the user's question based on their \
         data.\nUser question: {}\nUser data: {}",
        body.question.trim(),
        summary
    );

    let answer = match &state.completions {
        Some(completions) => match completions.complete(&prompt).await {
            Ok(answer) => answer,
            Err(error) => {
                tracing::error!("completion capability failed: {error}");
                FALLBACK_ANSWER.to_owned()
            }
        },
        None => {
            tracing::debug!("no completion capability configured");
            FALLBACK_ANSWER.to_owned()
        }
    };

    Ok(Json(json!({ "answer": answer })))
}
