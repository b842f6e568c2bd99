//! ledgerlink is a personal finance backend: users link bank accounts
//! through an external aggregation feed, the server pulls transaction
//! changes incrementally with a stored cursor, assigns each transaction a
//! spending category, and serves aggregated views (balances, net worth,
//! monthly spending, budgets) as a JSON API.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum_server::Handle;
use tokio::signal;

pub mod account;
pub mod auth;
pub mod budget;
pub mod category;
pub mod chat;
pub mod classify;
pub mod db;
pub mod endpoints;
mod error;
pub mod feed;
pub mod link;
pub mod pagination;
pub mod password;
pub mod routing;
pub mod state;
pub mod summary;
pub mod sync;
pub mod transaction;
pub mod user;
pub mod webhook;

#[cfg(test)]
mod test_utils;

pub use error::Error;
pub use routing::build_router;
pub use state::AppState;

/// An async task that waits for either the ctrl+c or terminate signal,
/// whichever comes first, and then signals the server to shut down
/// gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}
