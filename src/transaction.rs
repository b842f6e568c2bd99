//! The transaction store: idempotent upserts keyed by the feed's
//! transaction identifier, category updates, filtered queries, spending
//! aggregates, and the transaction endpoints.

use std::sync::{Arc, Mutex};

use axum::{
    Json,
    extract::{Path, Query, State},
};
use rusqlite::{Connection, params_from_iter, types::Value};
use serde::{Deserialize, Serialize};
use serde_json::json;
use time::{Date, Month, OffsetDateTime, util::days_in_year_month};

use crate::{
    Error,
    auth::Claims,
    category::effective_category,
    db::DatabaseId,
    feed::FeedTransaction,
    pagination::Pagination,
    state::AppState,
};

/// A transaction synced from the aggregation feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Transaction {
    /// The local database ID.
    pub id: DatabaseId,
    /// The owning user.
    pub user_id: DatabaseId,
    /// The local ID of the owning account.
    pub account_id: DatabaseId,
    /// The feed's globally unique identifier; the idempotency key.
    pub external_transaction_id: String,
    /// The category reported by the feed. Immutable once set.
    pub upstream_category: Option<String>,
    /// The category assigned by the classification adapter. Overwritten on
    /// every upsert.
    pub auto_category: Option<String>,
    /// The category chosen by the user. Highest precedence; only written by
    /// [set_user_category].
    pub user_category: Option<String>,
    /// Display name, e.g. "GROCERY STORE".
    pub name: String,
    /// The merchant name, when the feed could resolve one.
    pub merchant_name: Option<String>,
    /// Signed amount: positive is an outflow (expense), negative an inflow
    /// (income).
    pub amount: f64,
    /// The date the transaction posted.
    pub date: Date,
    /// Whether the transaction is still pending.
    pub pending: bool,
    /// How the transaction was made, e.g. "online" or "in store".
    pub payment_channel: Option<String>,
    /// Location: city.
    pub city: Option<String>,
    /// Location: region or state.
    pub region: Option<String>,
    /// Location: country code.
    pub country: Option<String>,
    /// ISO 4217 currency code.
    pub currency_code: String,
}

impl Transaction {
    /// The category to display, derived from the three stored fields.
    pub fn effective_category(&self) -> &str {
        effective_category(
            self.user_category.as_deref(),
            self.auto_category.as_deref(),
            self.upstream_category.as_deref(),
        )
    }
}

/// The data written by an upsert. Everything except `user_category`, which
/// an upsert never touches.
#[derive(Debug, Clone)]
pub struct NewTransaction {
    /// The owning user.
    pub user_id: DatabaseId,
    /// The local ID of the owning account.
    pub account_id: DatabaseId,
    /// The feed's identifier for the transaction.
    pub external_transaction_id: String,
    /// The category reported by the feed.
    pub upstream_category: Option<String>,
    /// The category assigned by the classification adapter.
    pub auto_category: Option<String>,
    /// Display name.
    pub name: String,
    /// The merchant name.
    pub merchant_name: Option<String>,
    /// Signed amount.
    pub amount: f64,
    /// The date the transaction posted.
    pub date: Date,
    /// Whether the transaction is still pending.
    pub pending: bool,
    /// Payment channel.
    pub payment_channel: Option<String>,
    /// Location: city.
    pub city: Option<String>,
    /// Location: region or state.
    pub region: Option<String>,
    /// Location: country code.
    pub country: Option<String>,
    /// ISO 4217 currency code.
    pub currency_code: String,
}

impl NewTransaction {
    /// Build the row to store for a feed transaction owned by `account_id`,
    /// carrying the classification adapter's label.
    pub fn from_feed(
        user_id: DatabaseId,
        account_id: DatabaseId,
        entry: &FeedTransaction,
        auto_category: String,
    ) -> Self {
        Self {
            user_id,
            account_id,
            external_transaction_id: entry.external_id.clone(),
            upstream_category: entry.upstream_category().map(str::to_owned),
            auto_category: Some(auto_category),
            name: entry.name.clone(),
            merchant_name: entry.merchant_name.clone(),
            amount: entry.amount,
            date: entry.date,
            pending: entry.pending,
            payment_channel: entry.payment_channel.clone(),
            city: entry.city.clone(),
            region: entry.region.clone(),
            country: entry.country.clone(),
            currency_code: entry.currency_code.clone().unwrap_or_else(|| "USD".to_owned()),
        }
    }
}

/// The mutations the sync engine performs on stored transactions.
///
/// The SQLite implementation is [SqliteTransactionStore]; tests inject
/// failing doubles to exercise the sync engine's cursor guarantees.
pub trait TransactionStore {
    /// Insert the transaction, or update every mutable field if a row with
    /// the same external transaction ID already exists. `user_category` is
    /// never touched, and `upstream_category` is only written when the
    /// stored value is NULL.
    fn upsert(&mut self, new_transaction: &NewTransaction) -> Result<Transaction, Error>;

    /// Delete the transaction with the given external ID.
    ///
    /// Returns whether a row was removed; an absent ID is not an error.
    fn delete_by_external_id(&mut self, external_id: &str) -> Result<bool, Error>;
}

/// Stores transactions in a SQLite database.
#[derive(Clone)]
pub struct SqliteTransactionStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteTransactionStore {
    /// Create a new store for the SQLite `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }
}

const TRANSACTION_COLUMNS: &str = "id, user_id, account_id, external_transaction_id, \
    upstream_category, auto_category, user_category, name, merchant_name, amount, date, \
    pending, payment_channel, city, region, country, currency_code";

/// The SQL expression implementing the category precedence rule.
const EFFECTIVE_CATEGORY_SQL: &str = "CASE \
    WHEN user_category IS NOT NULL THEN user_category \
    WHEN auto_category IS NOT NULL THEN auto_category \
    WHEN upstream_category IS NOT NULL THEN upstream_category \
    ELSE 'Uncategorized' END";

impl TransactionStore for SqliteTransactionStore {
    fn upsert(&mut self, new_transaction: &NewTransaction) -> Result<Transaction, Error> {
        let connection = self.connection.lock().unwrap();

        upsert(new_transaction, &connection)
    }

    fn delete_by_external_id(&mut self, external_id: &str) -> Result<bool, Error> {
        let connection = self.connection.lock().unwrap();

        delete_by_external_id(external_id, &connection)
    }
}

pub fn create_transaction_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS \"transaction\" (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            account_id INTEGER NOT NULL,
            external_transaction_id TEXT NOT NULL UNIQUE,
            upstream_category TEXT,
            auto_category TEXT,
            user_category TEXT,
            name TEXT NOT NULL,
            merchant_name TEXT,
            amount REAL NOT NULL,
            date TEXT NOT NULL,
            pending INTEGER NOT NULL DEFAULT 0,
            payment_channel TEXT,
            city TEXT,
            region TEXT,
            country TEXT,
            currency_code TEXT NOT NULL DEFAULT 'USD',
            FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE,
            FOREIGN KEY(account_id) REFERENCES account(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS transaction_user_date_index ON \"transaction\"(user_id, date)",
        (),
    )?;
    connection.execute(
        "CREATE INDEX IF NOT EXISTS transaction_account_index ON \"transaction\"(account_id)",
        (),
    )?;

    Ok(())
}

pub fn map_row_to_transaction(row: &rusqlite::Row) -> Result<Transaction, rusqlite::Error> {
    Ok(Transaction {
        id: row.get(0)?,
        user_id: row.get(1)?,
        account_id: row.get(2)?,
        external_transaction_id: row.get(3)?,
        upstream_category: row.get(4)?,
        auto_category: row.get(5)?,
        user_category: row.get(6)?,
        name: row.get(7)?,
        merchant_name: row.get(8)?,
        amount: row.get(9)?,
        date: row.get(10)?,
        pending: row.get(11)?,
        payment_channel: row.get(12)?,
        city: row.get(13)?,
        region: row.get(14)?,
        country: row.get(15)?,
        currency_code: row.get(16)?,
    })
}

/// Insert or update a transaction row keyed by its external transaction ID.
///
/// On update, `upstream_category` is only filled when previously NULL,
/// `auto_category` and the remaining feed fields are overwritten, and
/// `user_category` is left alone.
///
/// # Errors
///
/// Returns an [Error::Sql] if the statement fails.
pub fn upsert(
    new_transaction: &NewTransaction,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "INSERT INTO \"transaction\" (user_id, account_id, external_transaction_id, \
                upstream_category, auto_category, name, merchant_name, amount, date, pending, \
                payment_channel, city, region, country, currency_code)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)
             ON CONFLICT(external_transaction_id) DO UPDATE SET
                upstream_category =
                    COALESCE(\"transaction\".upstream_category, excluded.upstream_category),
                auto_category = excluded.auto_category,
                name = excluded.name,
                merchant_name = excluded.merchant_name,
                amount = excluded.amount,
                date = excluded.date,
                pending = excluded.pending,
                payment_channel = excluded.payment_channel,
                city = excluded.city,
                region = excluded.region,
                country = excluded.country,
                currency_code = excluded.currency_code
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row(
            (
                new_transaction.user_id,
                new_transaction.account_id,
                &new_transaction.external_transaction_id,
                &new_transaction.upstream_category,
                &new_transaction.auto_category,
                &new_transaction.name,
                &new_transaction.merchant_name,
                new_transaction.amount,
                new_transaction.date,
                new_transaction.pending,
                &new_transaction.payment_channel,
                &new_transaction.city,
                &new_transaction.region,
                &new_transaction.country,
                &new_transaction.currency_code,
            ),
            map_row_to_transaction,
        )?;

    Ok(transaction)
}

/// Delete a transaction by its external ID.
///
/// Returns whether a row was removed. Deleting an absent ID is a no-op, not
/// an error.
pub fn delete_by_external_id(external_id: &str, connection: &Connection) -> Result<bool, Error> {
    let removed = connection.execute(
        "DELETE FROM \"transaction\" WHERE external_transaction_id = ?1",
        (external_id,),
    )?;

    Ok(removed > 0)
}

/// Set the user-chosen category on one of `user_id`'s transactions.
///
/// This is the only writer of `user_category`.
///
/// # Errors
///
/// Returns an [Error::NotFound] if the transaction does not exist or belongs
/// to another user.
pub fn set_user_category(
    user_id: DatabaseId,
    transaction_id: DatabaseId,
    category: &str,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "UPDATE \"transaction\" SET user_category = ?1
             WHERE id = ?2 AND user_id = ?3
             RETURNING {TRANSACTION_COLUMNS}"
        ))?
        .query_row((category, transaction_id, user_id), map_row_to_transaction)?;

    Ok(transaction)
}

/// Get one of `user_id`'s transactions by its local ID.
///
/// # Errors
///
/// Returns an [Error::NotFound] if the transaction does not exist or belongs
/// to another user.
pub fn transaction_by_id(
    user_id: DatabaseId,
    transaction_id: DatabaseId,
    connection: &Connection,
) -> Result<Transaction, Error> {
    let transaction = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE id = :id AND user_id = :user_id"
        ))?
        .query_row(
            &[(":id", &transaction_id), (":user_id", &user_id)],
            map_row_to_transaction,
        )?;

    Ok(transaction)
}

/// Defines how transactions should be fetched by [query_transactions].
#[derive(Debug, Default, Clone)]
pub struct TransactionFilter {
    /// Include transactions on or after this date.
    pub start_date: Option<Date>,
    /// Include transactions on or before this date.
    pub end_date: Option<Date>,
    /// Restrict to one account.
    pub account_id: Option<DatabaseId>,
    /// Match the category against the raw upstream, auto and user fields.
    ///
    /// Deliberately *not* matched against the resolved effective category:
    /// a transaction matches when any one of its three stored category
    /// fields equals the filter.
    pub category: Option<String>,
    /// Selects up to the first N transactions.
    pub limit: u64,
    /// Skips the first N transactions.
    pub offset: u64,
}

fn build_where_clause(
    user_id: DatabaseId,
    filter: &TransactionFilter,
) -> (String, Vec<Value>) {
    let mut where_parts = vec!["user_id = ?1".to_owned()];
    let mut parameters = vec![Value::Integer(user_id)];

    if let Some(start_date) = filter.start_date {
        parameters.push(Value::Text(start_date.to_string()));
        where_parts.push(format!("date >= ?{}", parameters.len()));
    }

    if let Some(end_date) = filter.end_date {
        parameters.push(Value::Text(end_date.to_string()));
        where_parts.push(format!("date <= ?{}", parameters.len()));
    }

    if let Some(account_id) = filter.account_id {
        parameters.push(Value::Integer(account_id));
        where_parts.push(format!("account_id = ?{}", parameters.len()));
    }

    if let Some(category) = &filter.category {
        parameters.push(Value::Text(category.clone()));
        let index = parameters.len();
        where_parts.push(format!(
            "(upstream_category = ?{index} OR auto_category = ?{index} OR user_category = ?{index})"
        ));
    }

    (where_parts.join(" AND "), parameters)
}

/// Query `user_id`'s transactions with optional filters, newest first.
///
/// Returns the page of rows and the total number of rows matching the
/// filter (ignoring the page bounds).
///
/// # Errors
///
/// Returns an [Error::Sql] if a statement fails.
pub fn query_transactions(
    user_id: DatabaseId,
    filter: &TransactionFilter,
    connection: &Connection,
) -> Result<(Vec<Transaction>, u64), Error> {
    let (where_clause, parameters) = build_where_clause(user_id, filter);

    let total = connection
        .prepare(&format!(
            "SELECT COUNT(*) FROM \"transaction\" WHERE {where_clause}"
        ))?
        .query_row(params_from_iter(parameters.iter()), |row| {
            Ok(row.get::<_, i64>(0)? as u64)
        })?;

    let rows = connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\" WHERE {where_clause}
             ORDER BY date DESC, id DESC LIMIT {} OFFSET {}",
            filter.limit, filter.offset
        ))?
        .query_map(params_from_iter(parameters.iter()), map_row_to_transaction)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::Sql))
        .collect::<Result<Vec<_>, _>>()?;

    Ok((rows, total))
}

/// Spending for one effective category.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CategorySpend {
    /// The effective category label.
    pub category: String,
    /// The summed expense amount.
    pub total: f64,
    /// The number of contributing transactions.
    pub count: u64,
}

/// Sum expenses by effective category over an optional date range, largest
/// total first.
///
/// Only positive (expense-sign) amounts contribute; income never appears in
/// spending aggregates.
pub fn spending_by_category(
    user_id: DatabaseId,
    date_range: Option<(Date, Date)>,
    limit: Option<u64>,
    connection: &Connection,
) -> Result<Vec<CategorySpend>, Error> {
    let mut query = format!(
        "SELECT {EFFECTIVE_CATEGORY_SQL} AS category, SUM(amount) AS total, COUNT(id) AS count
         FROM \"transaction\"
         WHERE user_id = ?1 AND amount > 0"
    );
    let mut parameters = vec![Value::Integer(user_id)];

    if let Some((start_date, end_date)) = date_range {
        parameters.push(Value::Text(start_date.to_string()));
        query.push_str(&format!(" AND date >= ?{}", parameters.len()));
        parameters.push(Value::Text(end_date.to_string()));
        query.push_str(&format!(" AND date <= ?{}", parameters.len()));
    }

    query.push_str(" GROUP BY category ORDER BY total DESC");

    if let Some(limit) = limit {
        query.push_str(&format!(" LIMIT {limit}"));
    }

    connection
        .prepare(&query)?
        .query_map(params_from_iter(parameters.iter()), |row| {
            Ok(CategorySpend {
                category: row.get(0)?,
                total: row.get(1)?,
                count: row.get::<_, i64>(2)? as u64,
            })
        })?
        .map(|maybe_spend| maybe_spend.map_err(Error::Sql))
        .collect()
}

/// Expense totals per day over a date range, in date order.
pub fn daily_spending(
    user_id: DatabaseId,
    start_date: Date,
    end_date: Date,
    connection: &Connection,
) -> Result<Vec<(Date, f64)>, Error> {
    connection
        .prepare(
            "SELECT date, SUM(amount) FROM \"transaction\"
             WHERE user_id = ?1 AND amount > 0 AND date >= ?2 AND date <= ?3
             GROUP BY date ORDER BY date ASC",
        )?
        .query_map(
            (user_id, start_date.to_string(), end_date.to_string()),
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?
        .map(|maybe_day| maybe_day.map_err(Error::Sql))
        .collect()
}

/// Income, expense and count totals over a date range.
///
/// Income is reported as a magnitude: the feed signs inflows negative.
pub fn range_totals(
    user_id: DatabaseId,
    start_date: Date,
    end_date: Date,
    connection: &Connection,
) -> Result<(f64, f64, u64), Error> {
    connection
        .prepare(
            "SELECT COALESCE(ABS(SUM(CASE WHEN amount < 0 THEN amount END)), 0),
                    COALESCE(SUM(CASE WHEN amount > 0 THEN amount END), 0),
                    COUNT(id)
             FROM \"transaction\"
             WHERE user_id = ?1 AND date >= ?2 AND date <= ?3",
        )?
        .query_row(
            (user_id, start_date.to_string(), end_date.to_string()),
            |row| Ok((row.get(0)?, row.get(1)?, row.get::<_, i64>(2)? as u64)),
        )
        .map_err(Error::from)
}

/// The most recent transactions with their resolved categories, for the
/// chat summary.
pub fn recent_transactions(
    user_id: DatabaseId,
    limit: u64,
    connection: &Connection,
) -> Result<Vec<Transaction>, Error> {
    connection
        .prepare(&format!(
            "SELECT {TRANSACTION_COLUMNS} FROM \"transaction\"
             WHERE user_id = :user_id ORDER BY date DESC, id DESC LIMIT {limit}"
        ))?
        .query_map(&[(":user_id", &user_id)], map_row_to_transaction)?
        .map(|maybe_transaction| maybe_transaction.map_err(Error::Sql))
        .collect()
}

/// Resolve a month query to an inclusive date range.
///
/// Year and month select that month; a year alone selects the whole year;
/// neither defaults to the current month.
pub fn stats_date_range(year: Option<i32>, month: Option<u8>) -> Result<(Date, Date), Error> {
    match (year, month) {
        (Some(year), Some(month)) => {
            let month = Month::try_from(month)
                .map_err(|_| Error::Validation(format!("{month} is not a valid month")))?;
            let start = Date::from_calendar_date(year, month, 1)
                .map_err(|e| Error::Validation(e.to_string()))?;
            let end = Date::from_calendar_date(year, month, days_in_year_month(year, month))
                .map_err(|e| Error::Validation(e.to_string()))?;

            Ok((start, end))
        }
        (Some(year), None) => {
            let start = Date::from_calendar_date(year, Month::January, 1)
                .map_err(|e| Error::Validation(e.to_string()))?;
            let end = Date::from_calendar_date(year, Month::December, 31)
                .map_err(|e| Error::Validation(e.to_string()))?;

            Ok((start, end))
        }
        _ => Ok(current_month_range()),
    }
}

/// The first and last day of the current month.
pub fn current_month_range() -> (Date, Date) {
    let today = OffsetDateTime::now_utc().date();
    let start = today.replace_day(1).expect("day 1 is valid for every month");
    let end = today
        .replace_day(days_in_year_month(today.year(), today.month()))
        .expect("last day of month is valid");

    (start, end)
}

/// Query string accepted by [get_transactions].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListQuery {
    /// Include transactions on or after this date.
    pub start_date: Option<Date>,
    /// Include transactions on or before this date.
    pub end_date: Option<Date>,
    /// Restrict to one account.
    pub account_id: Option<DatabaseId>,
    /// Match any of the three raw category fields.
    pub category: Option<String>,
    /// 1-based page number.
    pub page: Option<u64>,
    /// Page size.
    pub limit: Option<u64>,
}

/// A route handler for listing the user's transactions with filters and
/// pagination.
pub async fn get_transactions(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<TransactionListQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let (page, limit, offset) = state.pagination_config.resolve(query.page, query.limit);
    let filter = TransactionFilter {
        start_date: query.start_date,
        end_date: query.end_date,
        account_id: query.account_id,
        category: query.category,
        limit,
        offset,
    };

    let connection = state.db_connection.lock().unwrap();
    let (transactions, total) = query_transactions(claims.sub, &filter, &connection)?;

    Ok(Json(json!({
        "transactions": transactions,
        "pagination": Pagination::new(total, page, limit),
    })))
}

/// A route handler for getting one transaction by ID.
pub async fn get_transaction(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<DatabaseId>,
) -> Result<Json<serde_json::Value>, Error> {
    let connection = state.db_connection.lock().unwrap();
    let transaction = transaction_by_id(claims.sub, transaction_id, &connection)?;

    Ok(Json(json!({ "transaction": transaction })))
}

/// Request body for [update_transaction_category].
#[derive(Debug, Deserialize)]
pub struct UpdateCategoryBody {
    /// The category chosen by the user.
    pub category: String,
}

/// A route handler for setting the user-chosen category on a transaction.
pub async fn update_transaction_category(
    State(state): State<AppState>,
    claims: Claims,
    Path(transaction_id): Path<DatabaseId>,
    Json(body): Json<UpdateCategoryBody>,
) -> Result<Json<serde_json::Value>, Error> {
    if body.category.trim().is_empty() {
        return Err(Error::Validation("Category is required".to_owned()));
    }

    let connection = state.db_connection.lock().unwrap();
    let transaction =
        set_user_category(claims.sub, transaction_id, body.category.trim(), &connection)?;

    Ok(Json(json!({ "success": true, "transaction": transaction })))
}

/// Query string accepted by [get_monthly_stats].
#[derive(Debug, Default, Deserialize)]
pub struct MonthlyStatsQuery {
    /// The year to report on.
    pub year: Option<i32>,
    /// The month to report on; requires `year`.
    pub month: Option<u8>,
}

/// A route handler for the monthly income/expense statistics.
pub async fn get_monthly_stats(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<MonthlyStatsQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let (start_date, end_date) = stats_date_range(query.year, query.month)?;

    let connection = state.db_connection.lock().unwrap();
    let (income, expenses, transaction_count) =
        range_totals(claims.sub, start_date, end_date, &connection)?;
    let top_categories = spending_by_category(
        claims.sub,
        Some((start_date, end_date)),
        Some(5),
        &connection,
    )?;
    let daily = daily_spending(claims.sub, start_date, end_date, &connection)?;

    Ok(Json(json!({
        "income": income,
        "expenses": expenses,
        "net": income - expenses,
        "transactionCount": transaction_count,
        "topCategories": top_categories,
        "dailySpending": daily
            .into_iter()
            .map(|(date, total)| json!({ "date": date.to_string(), "total": total }))
            .collect::<Vec<_>>(),
    })))
}

/// Query string accepted by [get_spending_by_category].
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SpendingQuery {
    /// Include transactions on or after this date.
    pub start_date: Option<Date>,
    /// Include transactions on or before this date.
    pub end_date: Option<Date>,
}

/// A route handler for spending grouped by effective category, with
/// percentages of the total.
pub async fn get_spending_by_category(
    State(state): State<AppState>,
    claims: Claims,
    Query(query): Query<SpendingQuery>,
) -> Result<Json<serde_json::Value>, Error> {
    let date_range = match (query.start_date, query.end_date) {
        (None, None) => current_month_range(),
        (start_date, end_date) => (
            start_date.unwrap_or(Date::MIN),
            end_date.unwrap_or(Date::MAX),
        ),
    };

    let connection = state.db_connection.lock().unwrap();
    let spending = spending_by_category(claims.sub, Some(date_range), None, &connection)?;

    let total_spending: f64 = spending.iter().map(|category| category.total).sum();
    let categories: Vec<_> = spending
        .into_iter()
        .map(|category| {
            let percentage = if total_spending > 0.0 {
                category.total / total_spending * 100.0
            } else {
                0.0
            };

            json!({
                "category": category.category,
                "total": category.total,
                "count": category.count,
                "percentage": percentage,
            })
        })
        .collect();

    Ok(Json(json!({
        "categories": categories,
        "totalSpending": total_spending,
    })))
}
