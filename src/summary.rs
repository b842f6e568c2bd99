//! The financial summary endpoint: net worth, spending by category and
//! active budgets in one response.

use std::collections::BTreeMap;

use axum::{Json, extract::State};
use serde_json::json;

use crate::{Error, account, auth::Claims, budget, state::AppState, transaction};

/// A route handler for the one-shot financial summary.
///
/// Net worth follows the same sign rule as the accounts listing: liability
/// balances (stored as amounts owed) subtract from the total, so the two
/// endpoints can never disagree.
pub async fn get_summary(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = state.db_connection.lock().unwrap();

    let accounts = account::accounts_for_user(claims.sub, &connection)?;
    let totals = account::totals(&accounts);
    let budgets = budget::active_budgets(claims.sub, &connection)?;
    let spending = transaction::spending_by_category(claims.sub, None, None, &connection)?;

    let spending_by_category: BTreeMap<String, f64> = spending
        .into_iter()
        .map(|category| (category.category, category.total))
        .collect();

    Ok(Json(json!({
        "netWorth": totals.total_balance,
        "totalBalance": totals.total_balance,
        "totalAvailableBalance": totals.total_available_balance,
        "spendingByCategory": spending_by_category,
        "budgets": budgets,
    })))
}
