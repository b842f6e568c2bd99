//! Budget rows: read-only input to the summary aggregation and the budget
//! listing endpoint.

use axum::{Json, extract::State};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::json;
use time::Date;

use crate::{Error, auth::Claims, db::DatabaseId, state::AppState};

/// How often a budget resets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BudgetPeriod {
    /// Resets at the start of every week.
    Weekly,
    /// Resets at the start of every month.
    Monthly,
    /// Resets at the start of every year.
    Annual,
}

impl BudgetPeriod {
    /// The string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Weekly => "weekly",
            Self::Monthly => "monthly",
            Self::Annual => "annual",
        }
    }

    fn from_column(period: &str) -> Self {
        match period {
            "weekly" => Self::Weekly,
            "annual" => Self::Annual,
            _ => Self::Monthly,
        }
    }
}

/// A spending target for one category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Budget {
    /// The local database ID.
    pub id: DatabaseId,
    /// The owning user.
    pub user_id: DatabaseId,
    /// The category the budget applies to.
    pub category: String,
    /// The target amount for the period.
    pub amount: f64,
    /// How often the budget resets.
    pub period: BudgetPeriod,
    /// When the budget starts applying.
    pub start_date: Date,
    /// When the budget stops applying, if ever.
    pub end_date: Option<Date>,
    /// Whether unused amounts roll over to the next period.
    pub rollover: bool,
    /// Whether the budget is currently in force.
    pub is_active: bool,
    /// Free-form notes.
    pub notes: Option<String>,
}

pub fn create_budget_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS budget (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            category TEXT NOT NULL,
            amount REAL NOT NULL,
            period TEXT NOT NULL,
            start_date TEXT NOT NULL,
            end_date TEXT,
            rollover INTEGER NOT NULL DEFAULT 0,
            is_active INTEGER NOT NULL DEFAULT 1,
            notes TEXT,
            FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    Ok(())
}

pub fn map_row_to_budget(row: &rusqlite::Row) -> Result<Budget, rusqlite::Error> {
    let period: String = row.get(4)?;

    Ok(Budget {
        id: row.get(0)?,
        user_id: row.get(1)?,
        category: row.get(2)?,
        amount: row.get(3)?,
        period: BudgetPeriod::from_column(&period),
        start_date: row.get(5)?,
        end_date: row.get(6)?,
        rollover: row.get(7)?,
        is_active: row.get(8)?,
        notes: row.get(9)?,
    })
}

const BUDGET_COLUMNS: &str =
    "id, user_id, category, amount, period, start_date, end_date, rollover, is_active, notes";

/// Get every budget belonging to `user_id`.
pub fn budgets_for_user(
    user_id: DatabaseId,
    connection: &Connection,
) -> Result<Vec<Budget>, Error> {
    connection
        .prepare(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budget WHERE user_id = :user_id ORDER BY category ASC"
        ))?
        .query_map(&[(":user_id", &user_id)], map_row_to_budget)?
        .map(|maybe_budget| maybe_budget.map_err(Error::Sql))
        .collect()
}

/// Get the budgets currently in force for `user_id`.
pub fn active_budgets(user_id: DatabaseId, connection: &Connection) -> Result<Vec<Budget>, Error> {
    connection
        .prepare(&format!(
            "SELECT {BUDGET_COLUMNS} FROM budget
             WHERE user_id = :user_id AND is_active = 1 ORDER BY category ASC"
        ))?
        .query_map(&[(":user_id", &user_id)], map_row_to_budget)?
        .map(|maybe_budget| maybe_budget.map_err(Error::Sql))
        .collect()
}

/// A route handler for listing the user's budgets.
pub async fn get_budgets(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = state.db_connection.lock().unwrap();
    let budgets = budgets_for_user(claims.sub, &connection)?;

    Ok(Json(json!({ "budgets": budgets })))
}
