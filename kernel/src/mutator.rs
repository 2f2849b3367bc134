// Randomized Bulk Mutator
//
// Sets one column on every row of a table. Each scan page is shuffled
// before it is applied so concurrent passes touch rows in different
// orders.

use rand::Rng;
use serde::Serialize;
use tracing::debug;

use crate::scan::{ScanError, TableScanner};
use crate::shuffle::shuffle;
use crate::store::{Key, KvStore, MalformedRow, Scalar, StoreError};

/// Value written by every mutator pass.
pub const FILLED: &str = "filled";

#[derive(Debug, thiserror::Error)]
pub enum MutatorError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("scanned row has no usable key: {0}")]
    MalformedRow(#[from] MalformedRow),

    #[error("update of `{column}` on {key} failed: {source}")]
    UpdateFailed {
        key: Key,
        column: String,
        source: StoreError,
    },
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UpdateSummary {
    pub pages: usize,
    pub rows_updated: usize,
}

/// Set `column = "filled"` on every row of `table`.
///
/// The first failed update ends the pass; nothing is retried.
pub async fn update_all<S, R>(
    store: &S,
    table: &str,
    column: &str,
    rng: &mut R,
) -> Result<UpdateSummary, MutatorError>
where
    S: KvStore + ?Sized,
    R: Rng + Send + ?Sized,
{
    let mut scanner = TableScanner::new(store, table);
    let mut summary = UpdateSummary::default();

    while let Some(mut rows) = scanner.next_page().await? {
        shuffle(&mut rows, rng);

        for row in &rows {
            let key = row.key()?;
            store
                .update_item(table, &key, column, Scalar::from(FILLED))
                .await
                .map_err(|source| MutatorError::UpdateFailed {
                    key: key.clone(),
                    column: column.to_string(),
                    source,
                })?;
            summary.rows_updated += 1;
        }
        summary.pages += 1;
    }

    debug!(
        table,
        column,
        pages = summary.pages,
        rows = summary.rows_updated,
        "update pass complete"
    );
    Ok(summary)
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::store::{
        ContinuationToken, InMemoryStore, PutCondition, Row, ScanPage, StoreErrorKind,
    };
    use async_trait::async_trait;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const TABLE: &str = "mutator-test";

    /// Store wrapper that fails the n-th update.
    pub(crate) struct FailingUpdates {
        pub inner: InMemoryStore,
        pub fail_at: usize,
        pub updates: AtomicUsize,
    }

    #[async_trait]
    impl KvStore for FailingUpdates {
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
            if self.updates.fetch_add(1, Ordering::SeqCst) == self.fail_at {
                return Err(StoreError::new(StoreErrorKind::Backend, "injected failure"));
            }
            self.inner.update_item(table, key, attribute, value).await
        }

        async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
            self.inner.delete_item(table, key).await
        }
    }

    pub(crate) async fn seeded(page_rows: usize, count: usize) -> InMemoryStore {
        let store = InMemoryStore::with_page_limits(page_rows, usize::MAX);
        store.create_table(TABLE).await.unwrap();
        for i in 0..count {
            store
                .put_item(TABLE, Row::with_key(&Key::new(format!("PK-{i}"), "A")), None)
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn fills_column_on_every_row() {
        let store = seeded(4, 13).await;
        let mut rng = StdRng::seed_from_u64(11);

        let summary = update_all(&store, TABLE, "writer", &mut rng).await.unwrap();
        assert_eq!(summary, UpdateSummary { pages: 4, rows_updated: 13 });

        let rows = TableScanner::new(&store, TABLE).collect_rows().await.unwrap();
        assert_eq!(rows.len(), 13);
        for row in rows {
            assert_eq!(row.get("writer"), Some(&Scalar::from(FILLED)));
        }
    }

    #[tokio::test]
    async fn empty_table_is_a_no_op() {
        let store = seeded(4, 0).await;
        let mut rng = StdRng::seed_from_u64(0);
        let summary = update_all(&store, TABLE, "writer", &mut rng).await.unwrap();
        assert_eq!(summary.rows_updated, 0);
    }

    #[tokio::test]
    async fn update_failure_stops_the_pass() {
        let store = FailingUpdates {
            inner: seeded(100, 10).await,
            fail_at: 3,
            updates: AtomicUsize::new(0),
        };
        let mut rng = StdRng::seed_from_u64(5);

        let err = update_all(&store, TABLE, "writer", &mut rng).await.unwrap_err();
        assert!(matches!(err, MutatorError::UpdateFailed { .. }));
        assert_eq!(store.updates.load(Ordering::SeqCst), 4);

        let filled = TableScanner::new(&store.inner, TABLE)
            .collect_rows()
            .await
            .unwrap()
            .into_iter()
            .filter(|row| row.contains("writer"))
            .count();
        assert_eq!(filled, 3);
    }
}
