// Invariant-Checked Bulk Deleter
//
// Removes every row of a table. Each row is first checked against the
// closed world of known writers; a violating row is left in place and
// the pass stops there.

use serde::Serialize;
use tracing::{debug, error, info};

use crate::invariants::{ClosedWorldAttributes, InvariantEngine, InvariantViolation};
use crate::pool::KnownWriters;
use crate::scan::{ScanError, TableScanner};
use crate::seed::RANDOM_CONTENT;
use crate::store::{Key, KvStore, MalformedRow, StoreError};

#[derive(Debug, thiserror::Error)]
pub enum DeleteError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("concurrency defect detected: {0}")]
    InvariantViolation(#[from] InvariantViolation),

    #[error("scanned row has no usable key: {0}")]
    MalformedRow(#[from] MalformedRow),

    #[error("delete of {key} failed: {source}")]
    DeleteFailed { key: Key, source: StoreError },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct DeleteSummary {
    pub pages: usize,
    pub rows_deleted: usize,
}

/// Rows may hold the key, the seed payload and one column per known
/// writer. Anything else is a write from an unknown writer.
pub fn closed_world(writers: &KnownWriters) -> InvariantEngine {
    let mut engine = InvariantEngine::new();
    engine.register(ClosedWorldAttributes::new(writers, [RANDOM_CONTENT]));
    engine
}

/// Delete every row of `table`, checking each one against the closed
/// world of `writers`.
///
/// Deletes are unconditional. A violation or failed delete ends the
/// pass; rows after that point are left untouched.
pub async fn delete_all<S>(
    store: &S,
    table: &str,
    writers: &KnownWriters,
) -> Result<DeleteSummary, DeleteError>
where
    S: KvStore + ?Sized,
{
    let invariants = closed_world(writers);
    let mut scanner = TableScanner::new(store, table);
    let mut summary = DeleteSummary::default();

    while let Some(rows) = scanner.next_page().await? {
        for row in &rows {
            if let Err(violation) = invariants.evaluate(row) {
                error!(table, %violation, "row failed invariant check");
                return Err(violation.into());
            }

            let key = row.key()?;
            store
                .delete_item(table, &key)
                .await
                .map_err(|source| DeleteError::DeleteFailed {
                    key: key.clone(),
                    source,
                })?;
            summary.rows_deleted += 1;
        }
        summary.pages += 1;
        debug!(table, page = summary.pages, rows = rows.len(), "deleted page");
    }

    info!(
        table,
        pages = summary.pages,
        rows = summary.rows_deleted,
        "deleted all rows"
    );
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;
    use crate::pool::WriterId;
    use crate::store::{
        ContinuationToken, InMemoryStore, PutCondition, Row, Scalar, ScanPage, StoreErrorKind,
    };

    const TABLE: &str = "deleter-test";

    fn writers() -> KnownWriters {
        ["alpha", "beta"].into_iter().map(WriterId::new).collect()
    }

    struct FailingDeletes {
        inner: InMemoryStore,
        fail_at: usize,
        deletes: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for FailingDeletes {
        async fn create_table(&self, table: &str) -> Result<bool, StoreError> {
            self.inner.create_table(table).await
        }

        async fn put_item(
            &self,
            table: &str,
            row: Row,
            condition: Option<PutCondition>,
        ) -> Result<(), StoreError> {
            self.inner.put_item(table, row, condition).await
        }

        async fn scan(
            &self,
            table: &str,
            token: Option<ContinuationToken>,
        ) -> Result<ScanPage, StoreError> {
            self.inner.scan(table, token).await
        }

        async fn update_item(
            &self,
            table: &str,
            key: &Key,
            attribute: &str,
            value: Scalar,
        ) -> Result<(), StoreError> {
            self.inner.update_item(table, key, attribute, value).await
        }

        async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
            if self.deletes.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(StoreError::new(StoreErrorKind::Backend, "injected failure"));
            }
            self.inner.delete_item(table, key).await
        }
    }

    async fn store_with(rows: Vec<Row>) -> InMemoryStore {
        let store = InMemoryStore::with_page_limits(2, usize::MAX);
        store.create_table(TABLE).await.unwrap();
        for row in rows {
            store.put_item(TABLE, row, None).await.unwrap();
        }
        store
    }

    fn row(pk: &str, attributes: &[&str]) -> Row {
        let mut row = Row::with_key(&Key::new(pk, "A"));
        for name in attributes {
            row.set(*name, "filled");
        }
        row
    }

    #[tokio::test]
    async fn deletes_rows_written_by_known_writers() {
        let store = store_with(vec![
            row("PK-0", &["alpha", "beta", "RandomContent"]),
            row("PK-1", &["alpha"]),
            row("PK-2", &[]),
        ])
        .await;

        let summary = delete_all(&store, TABLE, &writers()).await.unwrap();
        assert_eq!(summary.rows_deleted, 3);
        assert_eq!(store.row_count(TABLE), Some(0));
    }

    #[tokio::test]
    async fn phantom_attribute_stops_the_pass() {
        let store = store_with(vec![
            row("PK-0", &["alpha"]),
            row("PK-1", &["alpha", "gamma"]),
            row("PK-2", &["beta"]),
            row("PK-3", &["beta"]),
        ])
        .await;

        let err = delete_all(&store, TABLE, &writers()).await.unwrap_err();
        match err {
            DeleteError::InvariantViolation(violation) => {
                assert_eq!(violation.key, Some(Key::new("PK-1", "A")));
                assert!(violation.reason.contains("gamma"));
            }
            other => panic!("unexpected error: {other}"),
        }

        // Only the row before the violation is gone.
        assert_eq!(store.row_count(TABLE), Some(3));
        assert!(store.get(TABLE, &Key::new("PK-0", "A")).is_none());
        assert!(store.get(TABLE, &Key::new("PK-1", "A")).is_some());
        assert!(store.get(TABLE, &Key::new("PK-3", "A")).is_some());
    }

    #[tokio::test]
    async fn no_writers_still_rejects_unknown_columns() {
        let store = store_with(vec![row("PK-0", &["phantom"])]).await;
        let err = delete_all(&store, TABLE, &KnownWriters::default())
            .await
            .unwrap_err();
        assert!(matches!(err, DeleteError::InvariantViolation(_)));
        assert_eq!(store.row_count(TABLE), Some(1));
    }

    #[tokio::test]
    async fn failed_delete_stops_before_later_pages() {
        let store = FailingDeletes {
            inner: store_with((0..6).map(|i| row(&format!("PK-{i}"), &["alpha"])).collect())
                .await,
            fail_at: 2,
            deletes: AtomicUsize::new(0),
        };

        let err = delete_all(&store, TABLE, &writers()).await.unwrap_err();
        match err {
            DeleteError::DeleteFailed { key, source } => {
                assert_eq!(key, Key::new("PK-2", "A"));
                assert_eq!(source.kind(), StoreErrorKind::Backend);
            }
            other => panic!("unexpected error: {other}"),
        }

        // First page gone, the failing row and everything after it kept.
        assert_eq!(store.deletes.load(Ordering::SeqCst), 3);
        assert_eq!(store.inner.row_count(TABLE), Some(4));
        for pk in ["PK-2", "PK-3", "PK-4", "PK-5"] {
            assert!(store.inner.get(TABLE, &Key::new(pk, "A")).is_some());
        }
    }

    #[tokio::test]
    async fn missing_table_is_a_scan_failure() {
        let store = InMemoryStore::new();
        let err = delete_all(&store, TABLE, &writers()).await.unwrap_err();
        assert!(matches!(err, DeleteError::Scan(_)));
    }
}
