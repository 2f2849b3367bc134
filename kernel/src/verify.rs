// Read-only invariant pass over a whole table.

use serde::Serialize;
use tracing::{error, info};

use crate::invariants::{InvariantEngine, InvariantViolation};
use crate::scan::{ScanError, TableScanner};

#[derive(Debug, thiserror::Error)]
pub enum VerifyError {
    #[error(transparent)]
    Scan(#[from] ScanError),

    #[error("table check failed: {0}")]
    InvariantViolation(#[from] InvariantViolation),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct VerifySummary {
    pub pages: usize,
    pub rows_checked: usize,
}

/// Evaluate `invariants` on every row without changing the table.
pub async fn verify_all<S>(
    store: &S,
    table: &str,
    invariants: &InvariantEngine,
) -> Result<VerifySummary, VerifyError>
where
    S: crate::store::KvStore + ?Sized,
{
    let mut scanner = TableScanner::new(store, table);
    let mut summary = VerifySummary::default();

    while let Some(rows) = scanner.next_page().await? {
        for row in &rows {
            if let Err(violation) = invariants.evaluate(row) {
                error!(table, %violation, "row failed verification");
                return Err(violation.into());
            }
            summary.rows_checked += 1;
        }
        summary.pages += 1;
    }

    info!(table, rows = summary.rows_checked, "verified table");
    Ok(summary)
}
