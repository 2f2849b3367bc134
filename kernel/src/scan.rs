// Full-Table Scanner
//
// Walks a table page by page. The continuation token returned with a
// page is the only thing that decides whether another page is fetched.

use tracing::debug;

use crate::store::{ContinuationToken, KvStore, Row, StoreError};

#[derive(Debug, thiserror::Error)]
#[error("scan of table `{table}` failed after {pages} page(s): {source}")]
pub struct ScanError {
    pub table: String,
    pub pages: usize,
    pub source: StoreError,
}

#[derive(Debug)]
enum Cursor {
    Start,
    Resume(ContinuationToken),
    Done,
}

/// Lazy traversal of every row in a table.
///
/// A scanner makes one pass; create a new one to start over. Rows
/// written or deleted while the pass is running may or may not be seen.
pub struct TableScanner<'a, S: ?Sized> {
    store: &'a S,
    table: &'a str,
    cursor: Cursor,
    pages: usize,
}

impl<'a, S> TableScanner<'a, S>
where
    S: KvStore + ?Sized,
{
    pub fn new(store: &'a S, table: &'a str) -> Self {
        Self {
            store,
            table,
            cursor: Cursor::Start,
            pages: 0,
        }
    }

    /// Fetch the next page, or `None` once the traversal is complete.
    ///
    /// A failed request ends the traversal.
    pub async fn next_page(&mut self) -> Result<Option<Vec<Row>>, ScanError> {
        let token = match std::mem::replace(&mut self.cursor, Cursor::Done) {
            Cursor::Done => return Ok(None),
            Cursor::Start => None,
            Cursor::Resume(token) => Some(token),
        };

        let page = self
            .store
            .scan(self.table, token)
            .await
            .map_err(|source| ScanError {
                table: self.table.to_string(),
                pages: self.pages,
                source,
            })?;

        self.pages += 1;
        if let Some(next) = page.next {
            self.cursor = Cursor::Resume(next);
        }
        debug!(
            table = self.table,
            page = self.pages,
            rows = page.rows.len(),
            more = self.is_active(),
            "scanned page"
        );
        Ok(Some(page.rows))
    }

    /// Pages fetched so far.
    pub fn pages(&self) -> usize {
        self.pages
    }

    fn is_active(&self) -> bool {
        !matches!(self.cursor, Cursor::Done)
    }

    /// Drain the remaining pages into one list.
    pub async fn collect_rows(mut self) -> Result<Vec<Row>, ScanError> {
        let mut rows = Vec::new();
        while let Some(page) = self.next_page().await? {
            rows.extend(page);
        }
        Ok(rows)
    }
}
