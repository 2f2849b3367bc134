// In-Process Sorted Store
//
// Tables are ordered maps keyed by `(PK, SK)`. Every point operation
// takes the store lock once, which gives per-row atomicity. Scans copy
// a single page under the lock and resume from an exclusive start key.

use std::collections::{BTreeMap, HashMap};
use std::ops::Bound;
use std::sync::{PoisonError, RwLock};

use async_trait::async_trait;

use super::{
    ContinuationToken, Key, KvStore, PutCondition, Row, Scalar, ScanPage, StoreError,
    StoreErrorKind,
};

/// Default maximum rows per scan page.
pub const DEFAULT_PAGE_ROWS: usize = 100;

/// Default scan page size budget (DynamoDB returns at most 1 MiB per page).
pub const DEFAULT_PAGE_BYTES: usize = 1024 * 1024;

type Table = BTreeMap<Key, Row>;

#[derive(Debug)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    page_rows: usize,
    page_bytes: usize,
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::with_page_limits(DEFAULT_PAGE_ROWS, DEFAULT_PAGE_BYTES)
    }

    /// Both limits are clamped so a non-empty page holds at least one row.
    pub fn with_page_limits(page_rows: usize, page_bytes: usize) -> Self {
        Self {
            tables: RwLock::new(HashMap::new()),
            page_rows: page_rows.max(1),
            page_bytes: page_bytes.max(1),
        }
    }

    /// Number of rows currently stored in `table`.
    pub fn row_count(&self, table: &str) -> Option<usize> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).map(BTreeMap::len)
    }

    /// Point read, used by tests and diagnostics.
    pub fn get(&self, table: &str, key: &Key) -> Option<Row> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        tables.get(table).and_then(|t| t.get(key)).cloned()
    }

    fn with_table<T>(
        &self,
        table: &str,
        f: impl FnOnce(&mut Table) -> Result<T, StoreError>,
    ) -> Result<T, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get_mut(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;
        f(rows)
    }

    fn page(&self, rows: &Table, token: Option<&ContinuationToken>) -> ScanPage {
        let lower = match token {
            Some(token) => Bound::Excluded(token.last_key().clone()),
            None => Bound::Unbounded,
        };

        let mut remaining = rows.range((lower, Bound::Unbounded)).peekable();
        let mut page = Vec::new();
        let mut last_key = None;
        let mut bytes = 0;

        while let Some((key, row)) = remaining.peek() {
            let size = row.approximate_size();
            if !page.is_empty() && (page.len() >= self.page_rows || bytes + size > self.page_bytes)
            {
                break;
            }
            bytes += size;
            last_key = Some((*key).clone());
            page.push((*row).clone());
            remaining.next();
        }

        // Resume strictly after the last row handed out.
        let next = match remaining.peek() {
            Some(_) => last_key.map(ContinuationToken::new),
            None => None,
        };

        ScanPage { rows: page, next }
    }
}

#[async_trait]
impl KvStore for InMemoryStore {
    async fn create_table(&self, table: &str) -> Result<bool, StoreError> {
        let mut tables = self.tables.write().unwrap_or_else(PoisonError::into_inner);
        if tables.contains_key(table) {
            return Ok(false);
        }
        tables.insert(table.to_string(), Table::new());
        Ok(true)
    }

    async fn put_item(
        &self,
        table: &str,
        row: Row,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError> {
        let key = row
            .key()
            .map_err(|e| StoreError::new(StoreErrorKind::Codec, e.to_string()))?;

        self.with_table(table, |rows| {
            if condition == Some(PutCondition::KeyNotExists) && rows.contains_key(&key) {
                return Err(StoreError::conditional_check_failed(format!(
                    "the conditional request failed: {key} already exists"
                )));
            }
            rows.insert(key, row);
            Ok(())
        })
    }

    async fn scan(
        &self,
        table: &str,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError> {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        let rows = tables
            .get(table)
            .ok_or_else(|| StoreError::table_not_found(table))?;
        Ok(self.page(rows, token.as_ref()))
    }

    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        attribute: &str,
        value: Scalar,
    ) -> Result<(), StoreError> {
        self.with_table(table, |rows| {
            rows.entry(key.clone())
                .or_insert_with(|| Row::with_key(key))
                .set(attribute, value);
            Ok(())
        })
    }

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError> {
        self.with_table(table, |rows| {
            rows.remove(key);
            Ok(())
        })
    }
}
