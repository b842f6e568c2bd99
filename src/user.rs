//! Code for creating the user table and fetching users from the database.

use rusqlite::Connection;
use serde::Serialize;
use time::OffsetDateTime;

use crate::{Error, db::DatabaseId, password::PasswordHash};

/// A registered user of the application.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct User {
    /// The user's ID in the application database.
    pub id: DatabaseId,
    /// The user's email address, unique across all users.
    pub email: String,
    /// The user's password hash. Never serialized into responses.
    #[serde(skip_serializing)]
    pub password_hash: PasswordHash,
    /// The user's given name, if provided at registration.
    pub first_name: Option<String>,
    /// The user's family name, if provided at registration.
    pub last_name: Option<String>,
    /// When the user registered.
    pub created_at: OffsetDateTime,
    /// When the user last logged in.
    pub last_login: Option<OffsetDateTime>,
}

/// The data needed to register a new user.
#[derive(Debug, Clone)]
pub struct NewUser {
    /// A validated email address.
    pub email: String,
    /// The hash of the password chosen by the user.
    pub password_hash: PasswordHash,
    /// The user's given name.
    pub first_name: Option<String>,
    /// The user's family name.
    pub last_name: Option<String>,
}

pub fn create_user_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user (
            id INTEGER PRIMARY KEY,
            email TEXT NOT NULL UNIQUE,
            password_hash TEXT NOT NULL,
            first_name TEXT,
            last_name TEXT,
            created_at TEXT NOT NULL,
            last_login TEXT
        )",
        (),
    )?;

    Ok(())
}

pub fn map_row_to_user(row: &rusqlite::Row) -> Result<User, rusqlite::Error> {
    let raw_password_hash: String = row.get(2)?;

    Ok(User {
        id: row.get(0)?,
        email: row.get(1)?,
        password_hash: PasswordHash::new_unchecked(&raw_password_hash),
        first_name: row.get(3)?,
        last_name: row.get(4)?,
        created_at: row.get(5)?,
        last_login: row.get(6)?,
    })
}

const USER_COLUMNS: &str =
    "id, email, password_hash, first_name, last_name, created_at, last_login";

/// Create and insert a new user into the database.
///
/// # Errors
///
/// Returns an [Error::Validation] if the email is already registered, or an
/// [Error::Sql] if another SQL related error occurred.
pub fn insert_user(new_user: NewUser, connection: &Connection) -> Result<User, Error> {
    let user = connection
        .prepare(&format!(
            "INSERT INTO user (email, password_hash, first_name, last_name, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             RETURNING {USER_COLUMNS}"
        ))?
        .query_row(
            (
                &new_user.email,
                new_user.password_hash.as_ref(),
                &new_user.first_name,
                &new_user.last_name,
                OffsetDateTime::now_utc(),
            ),
            map_row_to_user,
        )
        .map_err(|error| match error {
            // Code 2067 occurs when a UNIQUE constraint failed.
            rusqlite::Error::SqliteFailure(sql_error, Some(ref desc))
                if sql_error.extended_code == 2067 && desc.contains("email") =>
            {
                Error::Validation("User with this email already exists".to_owned())
            }
            error => error.into(),
        })?;

    Ok(user)
}

/// Get the user registered with `email`.
///
/// # Errors
///
/// Returns an [Error::NotFound] if no user is registered with `email`, or an
/// [Error::Sql] if there was some other SQL error.
pub fn user_by_email(email: &str, connection: &Connection) -> Result<User, Error> {
    let user = connection
        .prepare(&format!("SELECT {USER_COLUMNS} FROM user WHERE email = :email"))?
        .query_row(&[(":email", email)], map_row_to_user)?;

    Ok(user)
}

/// Get the user with an ID equal to `user_id`.
///
/// # Errors
///
/// Returns an [Error::NotFound] if `user_id` does not belong to a registered
/// user, or an [Error::Sql] if there was some other SQL error.
pub fn user_by_id(user_id: DatabaseId, connection: &Connection) -> Result<User, Error> {
    let user = connection
        .prepare(&format!("SELECT {USER_COLUMNS} FROM user WHERE id = :id"))?
        .query_row(&[(":id", &user_id)], map_row_to_user)?;

    Ok(user)
}

/// Record that the user just logged in.
pub fn touch_last_login(user_id: DatabaseId, connection: &Connection) -> Result<(), Error> {
    connection.execute(
        "UPDATE user SET last_login = ?1 WHERE id = ?2",
        (OffsetDateTime::now_utc(), user_id),
    )?;

    Ok(())
}
