//! Defines the app level error type and its conversion to JSON error responses.

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde_json::json;

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The client sent a request that is well-formed HTTP but invalid for the
    /// operation (missing field, unparseable date, bad category, etc.).
    #[error("{0}")]
    Validation(String),

    /// The requested resource could not be found.
    ///
    /// For HTTP request handlers, the client should check that the parameters
    /// (e.g., ID) are correct and that the resource has been created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// The bearer token is missing, malformed, expired, or refers to a user
    /// that no longer exists.
    #[error("{0}")]
    Auth(String),

    /// The aggregation feed or another upstream capability failed.
    ///
    /// Wraps the upstream error code and message so callers can surface them.
    #[error("upstream service error {code}: {message}")]
    ExternalService {
        /// Upstream error code, e.g. `ITEM_LOGIN_REQUIRED`.
        code: String,
        /// Human readable upstream message.
        message: String,
    },

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    Sql(rusqlite::Error),

    /// An unexpected internal failure (hashing, token signing, etc.).
    ///
    /// The wrapped string should only be logged on the server, never sent to
    /// the client.
    #[error("{0}")]
    Internal(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::Sql(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        let (status_code, message) = match self {
            Error::Validation(message) => (StatusCode::BAD_REQUEST, message),
            Error::NotFound => (
                StatusCode::NOT_FOUND,
                "The requested resource could not be found.".to_owned(),
            ),
            Error::Auth(message) => (StatusCode::UNAUTHORIZED, message),
            Error::ExternalService { code, message } => (
                StatusCode::BAD_GATEWAY,
                format!("Upstream error: {code} - {message}"),
            ),
            // Storage and internal errors are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    "Internal server error".to_owned(),
                )
            }
        };

        (
            status_code,
            Json(json!({ "status": "error", "message": message })),
        )
            .into_response()
    }
}
