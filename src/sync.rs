//! The sync engine: pulls transaction changes from the feed with a stored
//! cursor, classifies them, and applies them to local storage.
//!
//! The cursor for a credential only advances after a page's adds, modifies
//! and removes have all been applied, so a failure mid-page makes the next
//! run re-fetch the same page. Re-delivery is safe because upserts are
//! idempotent by external transaction ID.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use futures::future::join_all;
use rusqlite::{Connection, OptionalExtension};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::OwnedMutexGuard;

use crate::{
    Error,
    account,
    classify::{ClassificationAdapter, ClassifyRequest},
    db::DatabaseId,
    feed::{FeedClient, FeedTransaction},
    transaction::{NewTransaction, TransactionStore},
};

/// How many transactions of a page are classified concurrently.
///
/// Classification is a blocking external call on the critical path of sync;
/// a small batch keeps pages from serializing on network latency without
/// flooding the capability.
const CLASSIFY_BATCH: usize = 4;

/// Counters reported by one sync run.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncOutcome {
    /// Transactions newly created.
    pub added_count: usize,
    /// Transactions updated in place.
    pub modified_count: usize,
    /// Transactions deleted.
    pub removed_count: usize,
}

pub fn create_sync_cursor_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS sync_cursor (
            access_token TEXT PRIMARY KEY,
            cursor TEXT NOT NULL,
            updated_at TEXT NOT NULL
        )",
        (),
    )?;

    Ok(())
}

/// Load the stored cursor for an access credential.
///
/// `None` means the credential has never completed a page and the next sync
/// starts from the beginning of history.
pub fn load_cursor(access_token: &str, connection: &Connection) -> Result<Option<String>, Error> {
    let cursor = connection
        .prepare("SELECT cursor FROM sync_cursor WHERE access_token = :access_token")?
        .query_row(&[(":access_token", &access_token)], |row| row.get(0))
        .optional()?;

    Ok(cursor)
}

/// Persist the cursor for an access credential.
///
/// Callers must only do this after fully applying the page that produced
/// `cursor`.
pub fn store_cursor(
    access_token: &str,
    cursor: &str,
    connection: &Connection,
) -> Result<(), Error> {
    connection.execute(
        "INSERT INTO sync_cursor (access_token, cursor, updated_at) VALUES (?1, ?2, ?3)
         ON CONFLICT(access_token) DO UPDATE SET
            cursor = excluded.cursor,
            updated_at = excluded.updated_at",
        (access_token, cursor, OffsetDateTime::now_utc()),
    )?;

    Ok(())
}

/// Per-credential mutual exclusion for sync runs.
///
/// Two syncs of the same credential would interleave cursor reads and
/// writes and corrupt the incremental-sync guarantee; syncs of different
/// credentials are independent and run in parallel.
#[derive(Clone, Default)]
pub struct CredentialLocks {
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl CredentialLocks {
    /// Create an empty lock registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Acquire the lock for `access_token`, waiting for any sync already
    /// running on the same credential.
    pub async fn acquire(&self, access_token: &str) -> OwnedMutexGuard<()> {
        let lock = self
            .locks
            .lock()
            .unwrap()
            .entry(access_token.to_owned())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone();

        lock.lock_owned().await
    }
}

/// Classify `entries` with the adapter, a batch at a time, preserving
/// order.
async fn classify_entries(
    classifier: &ClassificationAdapter,
    entries: &[&FeedTransaction],
) -> Vec<String> {
    let requests: Vec<ClassifyRequest> = entries
        .iter()
        .map(|entry| ClassifyRequest {
            name: &entry.name,
            amount: entry.amount,
            date: entry.date,
            description: entry.description.as_deref(),
        })
        .collect();

    let mut labels = Vec::with_capacity(entries.len());

    for batch in requests.chunks(CLASSIFY_BATCH) {
        let batch_labels = join_all(batch.iter().map(|request| classifier.classify(request))).await;

        labels.extend(batch_labels);
    }

    labels
}

/// Pull every pending page of transaction changes for one access
/// credential and apply it to local storage.
///
/// Entries referencing accounts with no local row are skipped, not errored:
/// the account may have been removed locally. The stored cursor advances
/// only after a page has been fully applied; any failure aborts the run
/// without advancing it, and the error is surfaced to the caller.
///
/// # Errors
///
/// Returns an [Error::ExternalService] if the feed fails, or whatever error
/// the store surfaced while applying a page.
pub async fn sync_transactions<S: TransactionStore>(
    store: &mut S,
    connection: &Arc<Mutex<Connection>>,
    feed: &dyn FeedClient,
    classifier: &ClassificationAdapter,
    locks: &CredentialLocks,
    user_id: DatabaseId,
    access_token: &str,
) -> Result<SyncOutcome, Error> {
    let _credential_guard = locks.acquire(access_token).await;

    let (account_ids, mut cursor) = {
        let connection = connection.lock().unwrap();
        (
            account::account_ids_by_external(access_token, &connection)?,
            load_cursor(access_token, &connection)?,
        )
    };

    let mut outcome = SyncOutcome::default();

    loop {
        tracing::debug!(resuming = cursor.is_some(), "fetching a page of changes");
        let page = feed.fetch_changes(access_token, cursor.as_deref()).await?;

        tracing::debug!(
            added = page.added.len(),
            modified = page.modified.len(),
            removed = page.removed.len(),
            "applying page"
        );
        let added: Vec<&FeedTransaction> = page
            .added
            .iter()
            .filter(|entry| account_ids.contains_key(&entry.external_account_id))
            .collect();
        let modified: Vec<&FeedTransaction> = page
            .modified
            .iter()
            .filter(|entry| account_ids.contains_key(&entry.external_account_id))
            .collect();

        let skipped = page.added.len() + page.modified.len() - added.len() - modified.len();
        if skipped > 0 {
            tracing::debug!("skipped {skipped} entries referencing unknown accounts");
        }

        let added_labels = classify_entries(classifier, &added).await;
        let modified_labels = classify_entries(classifier, &modified).await;

        for (entry, label) in added.iter().zip(added_labels) {
            let account_id = account_ids[&entry.external_account_id];
            store.upsert(&NewTransaction::from_feed(user_id, account_id, entry, label))?;
            outcome.added_count += 1;
        }

        for (entry, label) in modified.iter().zip(modified_labels) {
            let account_id = account_ids[&entry.external_account_id];
            store.upsert(&NewTransaction::from_feed(user_id, account_id, entry, label))?;
            outcome.modified_count += 1;
        }

        for removed in &page.removed {
            store.delete_by_external_id(&removed.external_id)?;
            outcome.removed_count += 1;
        }

        // The page is fully applied; only now may the cursor move.
        {
            let connection = connection.lock().unwrap();
            store_cursor(access_token, &page.next_cursor, &connection)?;
        }
        cursor = Some(page.next_cursor);

        if !page.has_more {
            break;
        }
    }

    tracing::info!(
        "Synced transactions: {} added, {} modified, {} removed",
        outcome.added_count,
        outcome.modified_count,
        outcome.removed_count
    );

    Ok(outcome)
}


#[cfg(test)]
mod sync_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        account::{test_fixtures::depository, upsert_from_feed},
        classify::ClassificationAdapter,
        db::{DatabaseId, initialize},
        feed::{FeedChanges, FeedTransaction, RemovedTransaction, StaticFeed},
        password::PasswordHash,
        transaction::{
            NewTransaction, SqliteTransactionStore, Transaction, TransactionFilter,
            TransactionStore, query_transactions,
        },
        user,
    };

    use super::{CredentialLocks, SyncOutcome, load_cursor, store_cursor, sync_transactions};

    fn feed_transaction(external_id: &str, account: &str, name: &str, amount: f64) -> FeedTransaction {
        FeedTransaction {
            external_id: external_id.to_owned(),
            external_account_id: account.to_owned(),
            name: name.to_owned(),
            merchant_name: None,
            amount,
            date: date!(2024 - 06 - 01),
            pending: false,
            payment_channel: Some("in store".to_owned()),
            category: vec!["Shops".to_owned()],
            description: None,
            city: None,
            region: None,
            country: None,
            currency_code: Some("USD".to_owned()),
        }
    }

    struct SyncHarness {
        connection: Arc<Mutex<Connection>>,
        store: SqliteTransactionStore,
        feed: StaticFeed,
        classifier: ClassificationAdapter,
        locks: CredentialLocks,
        user_id: DatabaseId,
    }

    fn get_test_harness() -> SyncHarness {
        let conn = Connection::open_in_memory().unwrap();
        initialize(&conn).unwrap();

        let user = user::insert_user(
            user::NewUser {
                email: "foo@bar.baz".to_owned(),
                password_hash: PasswordHash::new_unchecked("notarealhash"),
                first_name: None,
                last_name: None,
            },
            &conn,
        )
        .unwrap();
        upsert_from_feed(
            user.id,
            "access-1",
            "item-1",
            &depository("ext-acct-1", 1000.0, Some(900.0)),
            &conn,
        )
        .unwrap();

        let connection = Arc::new(Mutex::new(conn));

        SyncHarness {
            store: SqliteTransactionStore::new(connection.clone()),
            connection,
            feed: StaticFeed::new(),
            classifier: ClassificationAdapter::local_only(),
            locks: CredentialLocks::new(),
            user_id: user.id,
        }
    }

    async fn run_sync<S: TransactionStore>(
        harness: &SyncHarness,
        store: &mut S,
    ) -> Result<SyncOutcome, Error> {
        sync_transactions(
            store,
            &harness.connection,
            &harness.feed,
            &harness.classifier,
            &harness.locks,
            harness.user_id,
            "access-1",
        )
        .await
    }

    fn stored_transactions(harness: &SyncHarness) -> Vec<Transaction> {
        let connection = harness.connection.lock().unwrap();
        let (rows, _) = query_transactions(
            harness.user_id,
            &TransactionFilter {
                limit: 100,
                ..Default::default()
            },
            &connection,
        )
        .unwrap();

        rows
    }

    #[tokio::test]
    async fn multi_page_sync_applies_every_page_and_advances_the_cursor() {
        let harness = get_test_harness();
        harness.feed.push_changes(
            "access-1",
            FeedChanges {
                added: vec![feed_transaction("txn-1", "ext-acct-1", "GROCERY STORE", 75.50)],
                has_more: true,
                next_cursor: "cursor-1".to_owned(),
                ..Default::default()
            },
        );
        harness.feed.push_changes(
            "access-1",
            FeedChanges {
                added: vec![feed_transaction("txn-2", "ext-acct-1", "UBER TRIP", 18.20)],
                modified: vec![feed_transaction("txn-1", "ext-acct-1", "GROCERY STORE", 80.00)],
                next_cursor: "cursor-2".to_owned(),
                ..Default::default()
            },
        );

        let mut store = harness.store.clone();
        let outcome = run_sync(&harness, &mut store).await.unwrap();

        assert_eq!(
            outcome,
            SyncOutcome {
                added_count: 2,
                modified_count: 1,
                removed_count: 0
            }
        );

        let rows = stored_transactions(&harness);
        assert_eq!(rows.len(), 2);
        let grocery = rows
            .iter()
            .find(|t| t.external_transaction_id == "txn-1")
            .unwrap();
        assert_eq!(grocery.amount, 80.00);
        assert_eq!(grocery.auto_category.as_deref(), Some("Food"));
        assert_eq!(grocery.upstream_category.as_deref(), Some("Shops"));

        let connection = harness.connection.lock().unwrap();
        assert_eq!(
            load_cursor("access-1", &connection),
            Ok(Some("cursor-2".to_owned()))
        );
    }

    #[tokio::test]
    async fn entries_for_unknown_accounts_are_skipped_not_errored() {
        let harness = get_test_harness();
        harness.feed.push_changes(
            "access-1",
            FeedChanges {
                added: vec![
                    feed_transaction("txn-1", "ext-acct-1", "GROCERY STORE", 75.50),
                    feed_transaction("txn-2", "ext-acct-gone", "PHANTOM", 10.00),
                ],
                next_cursor: "cursor-1".to_owned(),
                ..Default::default()
            },
        );

        let mut store = harness.store.clone();
        let outcome = run_sync(&harness, &mut store).await.unwrap();

        assert_eq!(outcome.added_count, 1);
        assert_eq!(stored_transactions(&harness).len(), 1);
    }

    #[tokio::test]
    async fn removing_an_absent_transaction_is_a_no_op() {
        let harness = get_test_harness();
        harness.feed.push_changes(
            "access-1",
            FeedChanges {
                removed: vec![RemovedTransaction {
                    external_id: "txn-never-synced".to_owned(),
                }],
                next_cursor: "cursor-1".to_owned(),
                ..Default::default()
            },
        );

        let mut store = harness.store.clone();
        let outcome = run_sync(&harness, &mut store).await.unwrap();

        assert_eq!(outcome.removed_count, 1);
        assert!(stored_transactions(&harness).is_empty());
    }

    #[tokio::test]
    async fn feed_failure_surfaces_without_advancing_the_cursor() {
        let harness = get_test_harness();
        {
            let connection = harness.connection.lock().unwrap();
            store_cursor("access-1", "cursor-0", &connection).unwrap();
        }

        struct DownFeed;

        #[async_trait::async_trait]
        impl crate::feed::FeedClient for DownFeed {
            async fn create_link_token(
                &self,
                _: DatabaseId,
            ) -> Result<crate::feed::LinkToken, Error> {
                unimplemented!()
            }

            async fn exchange_public_token(
                &self,
                _: &str,
            ) -> Result<crate::feed::TokenExchange, Error> {
                unimplemented!()
            }

            async fn list_accounts(
                &self,
                _: &str,
            ) -> Result<Vec<crate::feed::FeedAccount>, Error> {
                unimplemented!()
            }

            async fn fetch_changes(
                &self,
                _: &str,
                _: Option<&str>,
            ) -> Result<FeedChanges, Error> {
                Err(Error::ExternalService {
                    code: "INSTITUTION_DOWN".to_owned(),
                    message: "the institution is not responding".to_owned(),
                })
            }
        }

        let mut store = harness.store.clone();
        let result = sync_transactions(
            &mut store,
            &harness.connection,
            &DownFeed,
            &harness.classifier,
            &harness.locks,
            harness.user_id,
            "access-1",
        )
        .await;

        assert!(matches!(result, Err(Error::ExternalService { .. })));
        let connection = harness.connection.lock().unwrap();
        assert_eq!(
            load_cursor("access-1", &connection),
            Ok(Some("cursor-0".to_owned()))
        );
    }

    /// Delegates to the SQLite store but fails on the nth upsert call.
    struct FailingStore {
        inner: SqliteTransactionStore,
        fail_on_call: usize,
        calls: usize,
    }

    impl TransactionStore for FailingStore {
        fn upsert(&mut self, new_transaction: &NewTransaction) -> Result<Transaction, Error> {
            self.calls += 1;
            if self.calls == self.fail_on_call {
                return Err(Error::Internal("injected storage failure".to_owned()));
            }

            self.inner.upsert(new_transaction)
        }

        fn delete_by_external_id(&mut self, external_id: &str) -> Result<bool, Error> {
            self.inner.delete_by_external_id(external_id)
        }
    }

    #[tokio::test]
    async fn cursor_never_advances_past_a_page_that_failed_mid_apply() {
        let harness = get_test_harness();
        {
            let connection = harness.connection.lock().unwrap();
            store_cursor("access-1", "cursor-0", &connection).unwrap();
        }

        let page = FeedChanges {
            added: vec![
                feed_transaction("txn-1", "ext-acct-1", "GROCERY STORE", 75.50),
                feed_transaction("txn-2", "ext-acct-1", "UBER TRIP", 18.20),
            ],
            next_cursor: "cursor-1".to_owned(),
            ..Default::default()
        };
        harness.feed.push_changes("access-1", page.clone());

        // The second added transaction of the page hits a storage failure.
        let mut failing_store = FailingStore {
            inner: harness.store.clone(),
            fail_on_call: 2,
            calls: 0,
        };
        let result = run_sync(&harness, &mut failing_store).await;
        assert!(matches!(result, Err(Error::Internal(_))));

        {
            let connection = harness.connection.lock().unwrap();
            assert_eq!(
                load_cursor("access-1", &connection),
                Ok(Some("cursor-0".to_owned())),
                "a failed page must not advance the cursor"
            );
        }

        // The feed re-delivers the same page on the next run, which now
        // succeeds and applies the page exactly once.
        harness.feed.push_changes("access-1", page);
        let mut store = harness.store.clone();
        let outcome = run_sync(&harness, &mut store).await.unwrap();

        assert_eq!(outcome.added_count, 2);
        let rows = stored_transactions(&harness);
        assert_eq!(rows.len(), 2, "re-delivered upserts must not duplicate rows");

        let connection = harness.connection.lock().unwrap();
        assert_eq!(
            load_cursor("access-1", &connection),
            Ok(Some("cursor-1".to_owned()))
        );
    }

    #[tokio::test]
    async fn syncs_of_the_same_credential_are_mutually_exclusive() {
        let locks = CredentialLocks::new();

        let first = locks.acquire("access-1").await;
        // A second acquire for a different credential proceeds immediately.
        let _other = locks.acquire("access-2").await;

        // A second acquire for the same credential waits until release.
        let pending = {
            let locks = locks.clone();
            tokio::spawn(async move {
                let _guard = locks.acquire("access-1").await;
            })
        };
        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        drop(first);
        pending.await.unwrap();
    }
}
