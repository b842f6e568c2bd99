//! The account ledger: locally stored bank accounts keyed by the feed's
//! account identifier, balance bookkeeping, and the account endpoints.

use std::collections::HashMap;

use axum::{Json, extract::Path, extract::State};
use rusqlite::Connection;
use serde::Serialize;
use serde_json::{Value, json};
use time::OffsetDateTime;

use crate::{
    Error,
    auth::Claims,
    db::DatabaseId,
    feed::FeedAccount,
    state::AppState,
};

/// The class of an account, which decides how it contributes to totals.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountClass {
    /// Checking, savings and similar cash accounts.
    Depository,
    /// Credit cards. The stored balance is the amount owed.
    Credit,
    /// Loans. The stored balance is the amount owed.
    Loan,
    /// Brokerage and retirement accounts.
    Investment,
    /// Anything the feed reports that does not fit the other classes.
    Other,
}

impl AccountClass {
    /// Parse a class string from the feed. Unknown classes map to
    /// [AccountClass::Other].
    pub fn from_feed(class: &str) -> Self {
        match class {
            "depository" => Self::Depository,
            "credit" => Self::Credit,
            "loan" => Self::Loan,
            "investment" => Self::Investment,
            _ => Self::Other,
        }
    }

    /// The string stored in the database and returned over the API.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Depository => "depository",
            Self::Credit => "credit",
            Self::Loan => "loan",
            Self::Investment => "investment",
            Self::Other => "other",
        }
    }

    /// Whether balances on this class represent money owed.
    pub fn is_liability(&self) -> bool {
        matches!(self, Self::Credit | Self::Loan)
    }
}

/// The health of the feed connection behind an account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AccountStatus {
    /// The connection is healthy.
    Active,
    /// The feed reported an item error; see the stored error code.
    Error,
    /// The feed access is about to expire and the user must re-authenticate.
    PendingExpiration,
}

impl AccountStatus {
    /// The string stored in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Error => "error",
            Self::PendingExpiration => "pending_expiration",
        }
    }

    fn from_column(status: &str) -> Self {
        match status {
            "error" => Self::Error,
            "pending_expiration" => Self::PendingExpiration,
            _ => Self::Active,
        }
    }
}

/// A bank account linked through the aggregation feed.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Account {
    /// The local database ID.
    pub id: DatabaseId,
    /// The owning user.
    pub user_id: DatabaseId,
    /// The feed's globally unique identifier for the account.
    pub external_account_id: String,
    /// The feed's identifier for the item grouping accounts under one
    /// credential.
    pub item_id: String,
    /// The access credential for the feed. Owned exclusively by the
    /// backend; never serialized into responses.
    #[serde(skip_serializing)]
    pub access_token: String,
    /// Display name.
    pub name: String,
    /// The institution's official account name.
    pub official_name: Option<String>,
    /// The account class.
    #[serde(rename = "type")]
    pub class: AccountClass,
    /// The account subtype, e.g. "checking".
    pub subtype: Option<String>,
    /// The last few digits of the account number.
    pub mask: Option<String>,
    /// The posted balance. Liability accounts store the amount owed as a
    /// positive number.
    pub current_balance: f64,
    /// The amount available for spending; present only for depository
    /// accounts.
    pub available_balance: Option<f64>,
    /// ISO 4217 currency code.
    pub currency_code: String,
    /// The connection status.
    pub status: AccountStatus,
    /// The upstream error code recorded when `status` is `error`.
    pub error_code: Option<String>,
    /// When the balances were last refreshed from the feed.
    pub last_refreshed: OffsetDateTime,
}

/// Totals across a set of accounts.
///
/// Non-liability balances contribute positively; credit and loan balances
/// (stored as positive amounts owed) are subtracted.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Totals {
    /// Assets minus liabilities.
    pub total_balance: f64,
    /// The sum of available balances on non-liability accounts.
    pub total_available_balance: f64,
}

pub fn create_account_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS account (
            id INTEGER PRIMARY KEY,
            user_id INTEGER NOT NULL,
            external_account_id TEXT NOT NULL UNIQUE,
            item_id TEXT NOT NULL,
            access_token TEXT NOT NULL,
            name TEXT NOT NULL,
            official_name TEXT,
            class TEXT NOT NULL,
            subtype TEXT,
            mask TEXT,
            current_balance REAL NOT NULL,
            available_balance REAL,
            currency_code TEXT NOT NULL,
            status TEXT NOT NULL DEFAULT 'active',
            error_code TEXT,
            last_refreshed TEXT NOT NULL,
            FOREIGN KEY(user_id) REFERENCES user(id) ON UPDATE CASCADE ON DELETE CASCADE
        )",
        (),
    )?;

    connection.execute(
        "CREATE INDEX IF NOT EXISTS account_item_index ON account(item_id)",
        (),
    )?;

    Ok(())
}

pub fn map_row_to_account(row: &rusqlite::Row) -> Result<Account, rusqlite::Error> {
    let class: String = row.get(7)?;
    let status: String = row.get(13)?;

    Ok(Account {
        id: row.get(0)?,
        user_id: row.get(1)?,
        external_account_id: row.get(2)?,
        item_id: row.get(3)?,
        access_token: row.get(4)?,
        name: row.get(5)?,
        official_name: row.get(6)?,
        class: AccountClass::from_feed(&class),
        subtype: row.get(8)?,
        mask: row.get(9)?,
        current_balance: row.get(10)?,
        available_balance: row.get(11)?,
        currency_code: row.get(12)?,
        status: AccountStatus::from_column(&status),
        error_code: row.get(14)?,
        last_refreshed: row.get(15)?,
    })
}

const ACCOUNT_COLUMNS: &str = "id, user_id, external_account_id, item_id, access_token, name, \
    official_name, class, subtype, mask, current_balance, available_balance, currency_code, \
    status, error_code, last_refreshed";

/// Create or update an account from the feed's description of it.
///
/// Keyed by the external account identifier, so re-linking the same account
/// updates the stored row in place. A fresh upsert clears any error status.
///
/// # Errors
///
/// Returns an [Error::Sql] if the upsert fails.
pub fn upsert_from_feed(
    user_id: DatabaseId,
    access_token: &str,
    item_id: &str,
    feed_account: &FeedAccount,
    connection: &Connection,
) -> Result<Account, Error> {
    let account = connection
        .prepare(&format!(
            "INSERT INTO account (user_id, external_account_id, item_id, access_token, name, \
                official_name, class, subtype, mask, current_balance, available_balance, \
                currency_code, last_refreshed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)
             ON CONFLICT(external_account_id) DO UPDATE SET
                item_id = excluded.item_id,
                access_token = excluded.access_token,
                name = excluded.name,
                official_name = excluded.official_name,
                class = excluded.class,
                subtype = excluded.subtype,
                mask = excluded.mask,
                current_balance = excluded.current_balance,
                available_balance = excluded.available_balance,
                currency_code = excluded.currency_code,
                status = 'active',
                error_code = NULL,
                last_refreshed = excluded.last_refreshed
             RETURNING {ACCOUNT_COLUMNS}"
        ))?
        .query_row(
            (
                user_id,
                &feed_account.external_id,
                item_id,
                access_token,
                &feed_account.name,
                &feed_account.official_name,
                AccountClass::from_feed(&feed_account.class).as_str(),
                &feed_account.subtype,
                &feed_account.mask,
                feed_account.balances.current.unwrap_or(0.0),
                feed_account.balances.available,
                feed_account
                    .balances
                    .currency_code
                    .as_deref()
                    .unwrap_or("USD"),
                OffsetDateTime::now_utc(),
            ),
            map_row_to_account,
        )?;

    Ok(account)
}

/// Get every account belonging to `user_id`, newest first.
pub fn accounts_for_user(
    user_id: DatabaseId,
    connection: &Connection,
) -> Result<Vec<Account>, Error> {
    connection
        .prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE user_id = :user_id ORDER BY id DESC"
        ))?
        .query_map(&[(":user_id", &user_id)], map_row_to_account)?
        .map(|maybe_account| maybe_account.map_err(Error::Sql))
        .collect()
}

/// Get one of `user_id`'s accounts by its local ID.
///
/// # Errors
///
/// Returns an [Error::NotFound] if the account does not exist or belongs to
/// another user.
pub fn account_by_id(
    user_id: DatabaseId,
    account_id: DatabaseId,
    connection: &Connection,
) -> Result<Account, Error> {
    let account = connection
        .prepare(&format!(
            "SELECT {ACCOUNT_COLUMNS} FROM account WHERE id = :id AND user_id = :user_id"
        ))?
        .query_row(&[(":id", &account_id), (":user_id", &user_id)], map_row_to_account)?;

    Ok(account)
}

/// Get every account linked under the feed item `item_id`, regardless of
/// owner. Used by the webhook dispatcher, which has no authenticated user.
pub fn accounts_by_item(item_id: &str, connection: &Connection) -> Result<Vec<Account>, Error> {
    connection
        .prepare(&format!("SELECT {ACCOUNT_COLUMNS} FROM account WHERE item_id = :item_id"))?
        .query_map(&[(":item_id", &item_id)], map_row_to_account)?
        .map(|maybe_account| maybe_account.map_err(Error::Sql))
        .collect()
}

/// Map the feed's account identifiers to local account IDs for every
/// account behind `access_token`.
pub fn account_ids_by_external(
    access_token: &str,
    connection: &Connection,
) -> Result<HashMap<String, DatabaseId>, Error> {
    connection
        .prepare("SELECT external_account_id, id FROM account WHERE access_token = :access_token")?
        .query_map(&[(":access_token", &access_token)], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, DatabaseId>(1)?))
        })?
        .map(|maybe_pair| maybe_pair.map_err(Error::Sql))
        .collect()
}

/// Overwrite the stored balances for every account behind `access_token`
/// with the balances the feed just reported.
///
/// Returns the number of accounts updated. Feed accounts with no local row
/// are ignored.
pub fn apply_feed_balances(
    access_token: &str,
    feed_accounts: &[FeedAccount],
    connection: &Connection,
) -> Result<usize, Error> {
    let mut statement = connection.prepare(
        "UPDATE account
         SET current_balance = ?1, available_balance = ?2, last_refreshed = ?3
         WHERE access_token = ?4 AND external_account_id = ?5",
    )?;

    let refreshed_at = OffsetDateTime::now_utc();
    let mut updated = 0;

    for feed_account in feed_accounts {
        updated += statement.execute((
            feed_account.balances.current.unwrap_or(0.0),
            feed_account.balances.available,
            refreshed_at,
            access_token,
            &feed_account.external_id,
        ))?;
    }

    Ok(updated)
}

/// Mark every account under `item_id` with `status` and an optional
/// upstream error code.
///
/// Returns the number of accounts updated.
pub fn set_status_by_item(
    item_id: &str,
    status: AccountStatus,
    error_code: Option<&str>,
    connection: &Connection,
) -> Result<usize, Error> {
    let updated = connection.execute(
        "UPDATE account SET status = ?1, error_code = ?2, last_refreshed = ?3 WHERE item_id = ?4",
        (
            status.as_str(),
            error_code,
            OffsetDateTime::now_utc(),
            item_id,
        ),
    )?;

    Ok(updated)
}

/// Total up balances across `accounts`.
///
/// Non-liability classes add their stored balance; credit and loan accounts
/// subtract theirs, since they store the amount owed. Available balances
/// are summed for non-liability accounts only, ignoring NULLs.
pub fn totals(accounts: &[Account]) -> Totals {
    let mut totals = Totals::default();

    for account in accounts {
        if account.class.is_liability() {
            totals.total_balance -= account.current_balance;
        } else {
            totals.total_balance += account.current_balance;

            if let Some(available) = account.available_balance {
                totals.total_available_balance += available;
            }
        }
    }

    totals
}

/// A route handler for listing the user's accounts with computed totals.
pub async fn get_accounts(
    State(state): State<AppState>,
    claims: Claims,
) -> Result<Json<Value>, Error> {
    let connection = state.db_connection.lock().unwrap();
    let accounts = accounts_for_user(claims.sub, &connection)?;
    let totals = totals(&accounts);

    Ok(Json(json!({
        "accounts": accounts,
        "totalBalance": totals.total_balance,
        "totalAvailableBalance": totals.total_available_balance,
    })))
}

/// A route handler for getting one of the user's accounts by ID.
pub async fn get_account(
    State(state): State<AppState>,
    claims: Claims,
    Path(account_id): Path<DatabaseId>,
) -> Result<Json<Value>, Error> {
    let connection = state.db_connection.lock().unwrap();
    let account = account_by_id(claims.sub, account_id, &connection)?;

    Ok(Json(json!({ "account": account })))
}

#[cfg(test)]
pub(crate) mod test_fixtures {
    use crate::feed::{FeedAccount, FeedBalances};

    /// A depository feed account with the given balances.
    pub fn depository(external_id: &str, current: f64, available: Option<f64>) -> FeedAccount {
        FeedAccount {
            external_id: external_id.to_owned(),
            name: "Checking".to_owned(),
            official_name: Some("Everyday Checking".to_owned()),
            class: "depository".to_owned(),
            subtype: Some("checking".to_owned()),
            mask: Some("0000".to_owned()),
            balances: FeedBalances {
                current: Some(current),
                available,
                currency_code: Some("USD".to_owned()),
            },
        }
    }

    /// A credit card feed account carrying `owed` as its current balance.
    pub fn credit_card(external_id: &str, owed: f64) -> FeedAccount {
        FeedAccount {
            external_id: external_id.to_owned(),
            name: "Credit Card".to_owned(),
            official_name: None,
            class: "credit".to_owned(),
            subtype: Some("credit card".to_owned()),
            mask: Some("9999".to_owned()),
            balances: FeedBalances {
                current: Some(owed),
                available: None,
                currency_code: Some("USD".to_owned()),
            },
        }
    }
}
