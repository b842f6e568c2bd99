//! The contract for the external account-aggregation feed.
//!
//! The feed is an external collaborator: the backend exchanges a public
//! token for an access credential, lists the accounts behind that
//! credential, and pulls pages of transaction changes with an opaque cursor.
//! Everything here is behind [FeedClient] so the sync engine and the
//! webhook dispatcher never touch a concrete transport, and tests can swap
//! in a fixture-backed client.

use std::{
    collections::HashMap,
    sync::{
        Mutex,
        atomic::{AtomicUsize, Ordering},
    },
};

use async_trait::async_trait;
use serde::Deserialize;
use time::Date;

use crate::{Error, db::DatabaseId};

/// Balances reported by the feed for one account.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct FeedBalances {
    /// The posted balance. Credit and loan accounts report the amount owed
    /// as a positive number.
    pub current: Option<f64>,
    /// The amount available for spending. Only present for depository
    /// accounts.
    pub available: Option<f64>,
    /// ISO 4217 currency code, e.g. "USD".
    pub currency_code: Option<String>,
}

/// One account as reported by the feed.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedAccount {
    /// The feed's globally unique identifier for the account.
    pub external_id: String,
    /// Display name, e.g. "Plaid Checking".
    pub name: String,
    /// The institution's official account name.
    pub official_name: Option<String>,
    /// The account class, e.g. "depository" or "credit".
    pub class: String,
    /// The account subtype, e.g. "checking".
    pub subtype: Option<String>,
    /// The last few digits of the account number.
    pub mask: Option<String>,
    /// The account balances.
    pub balances: FeedBalances,
}

/// One transaction as reported by the feed in an added or modified list.
#[derive(Debug, Clone, Deserialize)]
pub struct FeedTransaction {
    /// The feed's globally unique identifier for the transaction. This is
    /// the idempotency key for local storage.
    pub external_id: String,
    /// The external identifier of the owning account.
    pub external_account_id: String,
    /// Display name, e.g. "GROCERY STORE".
    pub name: String,
    /// The merchant name, when the feed could resolve one.
    pub merchant_name: Option<String>,
    /// Signed amount. Positive values are outflows (expenses), negative
    /// values are inflows (income), by convention of the feed.
    pub amount: f64,
    /// The date the transaction posted.
    pub date: Date,
    /// Whether the transaction is still pending.
    pub pending: bool,
    /// How the transaction was made, e.g. "online" or "in store".
    pub payment_channel: Option<String>,
    /// The feed's own category hierarchy, most general label first.
    pub category: Vec<String>,
    /// The raw statement description, when available.
    pub description: Option<String>,
    /// Location fields, when available.
    pub city: Option<String>,
    /// Region or state.
    pub region: Option<String>,
    /// Country code.
    pub country: Option<String>,
    /// ISO 4217 currency code.
    pub currency_code: Option<String>,
}

impl FeedTransaction {
    /// The most general label of the feed's category hierarchy, if any.
    pub fn upstream_category(&self) -> Option<&str> {
        self.category.first().map(String::as_str)
    }
}

/// A transaction the feed reports as removed.
#[derive(Debug, Clone, Deserialize)]
pub struct RemovedTransaction {
    /// The external identifier of the removed transaction.
    pub external_id: String,
}

/// One page of transaction changes from the feed.
#[derive(Debug, Clone, Default)]
pub struct FeedChanges {
    /// Transactions added since the cursor.
    pub added: Vec<FeedTransaction>,
    /// Transactions modified since the cursor.
    pub modified: Vec<FeedTransaction>,
    /// Transactions removed since the cursor.
    pub removed: Vec<RemovedTransaction>,
    /// Whether more pages are available.
    pub has_more: bool,
    /// The cursor to resume from after this page.
    pub next_cursor: String,
}

/// The result of exchanging a public token.
#[derive(Debug, Clone)]
pub struct TokenExchange {
    /// The access credential authorizing feed reads for the linked item.
    pub access_token: String,
    /// The feed's identifier for the item (institution connection).
    pub item_id: String,
}

/// A short-lived token used by the frontend to start the account linking
/// flow.
#[derive(Debug, Clone)]
pub struct LinkToken {
    /// The opaque link token.
    pub link_token: String,
    /// When the link token expires, as reported by the feed.
    pub expiration: String,
}

/// A client for the external account-aggregation feed.
///
/// Implementations wrap a concrete transport. The app constructs one client
/// and injects it into the handlers and the sync engine, so tests can
/// substitute a double.
#[async_trait]
pub trait FeedClient: Send + Sync {
    /// Create a link token for starting the account linking flow.
    async fn create_link_token(&self, user_id: DatabaseId) -> Result<LinkToken, Error>;

    /// Exchange a public token from the linking flow for an access
    /// credential.
    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange, Error>;

    /// List the accounts behind an access credential, with fresh balances.
    async fn list_accounts(&self, access_token: &str) -> Result<Vec<FeedAccount>, Error>;

    /// Fetch one page of transaction changes.
    ///
    /// A `None` cursor requests changes from the beginning of history.
    async fn fetch_changes(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<FeedChanges, Error>;
}

/// A fixture-backed [FeedClient] for local development and tests.
///
/// Accounts and pages of changes are queued per access token. Fetching
/// changes pops the next queued page; once the queue is empty an empty
/// final page is returned, mirroring a feed with nothing new to report.
#[derive(Default)]
pub struct StaticFeed {
    inner: Mutex<StaticFeedState>,
    fetch_calls: AtomicUsize,
}

#[derive(Default)]
struct StaticFeedState {
    accounts: HashMap<String, Vec<FeedAccount>>,
    pages: HashMap<String, Vec<FeedChanges>>,
    next_item: usize,
}

impl StaticFeed {
    /// Create an empty feed.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the accounts returned for `access_token`.
    pub fn set_accounts(&self, access_token: &str, accounts: Vec<FeedAccount>) {
        self.inner
            .lock()
            .unwrap()
            .accounts
            .insert(access_token.to_owned(), accounts);
    }

    /// Queue a page of changes for `access_token`.
    pub fn push_changes(&self, access_token: &str, changes: FeedChanges) {
        self.inner
            .lock()
            .unwrap()
            .pages
            .entry(access_token.to_owned())
            .or_default()
            .push(changes);
    }

    /// The number of [FeedClient::fetch_changes] calls made so far.
    pub fn fetch_calls(&self) -> usize {
        self.fetch_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl FeedClient for StaticFeed {
    async fn create_link_token(&self, user_id: DatabaseId) -> Result<LinkToken, Error> {
        Ok(LinkToken {
            link_token: format!("link-sandbox-{user_id}"),
            expiration: "1970-01-01T00:30:00Z".to_owned(),
        })
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<TokenExchange, Error> {
        if public_token.is_empty() {
            return Err(Error::ExternalService {
                code: "INVALID_PUBLIC_TOKEN".to_owned(),
                message: "the public token is empty".to_owned(),
            });
        }

        let mut state = self.inner.lock().unwrap();
        state.next_item += 1;
        let item = state.next_item;

        Ok(TokenExchange {
            access_token: format!("access-sandbox-{item}"),
            item_id: format!("item-sandbox-{item}"),
        })
    }

    async fn list_accounts(&self, access_token: &str) -> Result<Vec<FeedAccount>, Error> {
        Ok(self
            .inner
            .lock()
            .unwrap()
            .accounts
            .get(access_token)
            .cloned()
            .unwrap_or_default())
    }

    async fn fetch_changes(
        &self,
        access_token: &str,
        cursor: Option<&str>,
    ) -> Result<FeedChanges, Error> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);

        let mut state = self.inner.lock().unwrap();
        let pages = state.pages.entry(access_token.to_owned()).or_default();

        if pages.is_empty() {
            return Ok(FeedChanges {
                next_cursor: cursor.unwrap_or("cursor-0").to_owned(),
                ..Default::default()
            });
        }

        Ok(pages.remove(0))
    }
}
