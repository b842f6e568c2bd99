//! Database bootstrap: creates the schema for every domain model.

use rusqlite::{Connection, Transaction as SqlTransaction, TransactionBehavior};

use crate::{Error, account, budget, sync, transaction, user};

/// The type used for database row IDs.
pub type DatabaseId = i64;

/// Create the application tables if they do not exist yet.
///
/// All tables are created within a single exclusive transaction so a
/// half-initialised schema is never left behind.
///
/// # Errors
///
/// Returns an [Error::Sql] if any of the table creation statements fail.
pub fn initialize(connection: &Connection) -> Result<(), Error> {
    let sql_transaction =
        SqlTransaction::new_unchecked(connection, TransactionBehavior::Exclusive)?;

    user::create_user_table(&sql_transaction)?;
    account::create_account_table(&sql_transaction)?;
    transaction::create_transaction_table(&sql_transaction)?;
    sync::create_sync_cursor_table(&sql_transaction)?;
    budget::create_budget_table(&sql_transaction)?;

    sql_transaction.commit()?;

    Ok(())
}
