// Conditional Write Guard
//
// Puts a row only if no row with the same key exists, and sorts the
// resulting failure into "precondition failed" versus everything else.

use serde::Serialize;
use tracing::info;

use crate::store::{Key, KvStore, PutCondition, Row, StoreError, StoreErrorKind};

/// Cancellation reason code reported for a failed condition.
const CONDITIONAL_CHECK_FAILED: &str = "ConditionalCheckFailed";

#[derive(Debug, thiserror::Error)]
pub enum GuardError {
    #[error("conditional check failed for {key}: row already exists")]
    ConditionalCheckFailed { key: Key },

    #[error("put of {key} failed: {source}")]
    PutFailed { key: Key, source: StoreError },

    #[error("row has no usable key: {0}")]
    MalformedRow(#[from] crate::store::MalformedRow),

    #[error("duplicate put of {key} was accepted; the precondition was not enforced")]
    DuplicateAccepted { key: Key },
}

impl GuardError {
    pub fn is_conditional_check_failure(&self) -> bool {
        matches!(self, GuardError::ConditionalCheckFailed { .. })
    }
}

/// Classify a transaction cancellation from its per-item reason codes.
///
/// Any `ConditionalCheckFailed` reason makes the whole cancellation a
/// conditional failure; items that were not at fault report `None` or `"None"`.
pub fn classify_cancellation_reasons<'a>(
    codes: impl IntoIterator<Item = Option<&'a str>>,
) -> StoreErrorKind {
    if codes
        .into_iter()
        .flatten()
        .any(|code| code == CONDITIONAL_CHECK_FAILED)
    {
        StoreErrorKind::ConditionalCheckFailed
    } else {
        StoreErrorKind::Backend
    }
}

/// Put `row` only if its key is not already present.
pub async fn conditional_put<S>(store: &S, table: &str, row: Row) -> Result<(), GuardError>
where
    S: KvStore + ?Sized,
{
    let key = row.key()?;
    match store
        .put_item(table, row, Some(PutCondition::KeyNotExists))
        .await
    {
        Ok(()) => Ok(()),
        Err(err) if err.is_conditional_check_failure() => {
            Err(GuardError::ConditionalCheckFailed { key })
        }
        Err(source) => Err(GuardError::PutFailed { key, source }),
    }
}

/// Result of the duplicate-put probe.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProbeOutcome {
    pub key: Key,
    pub rejected_as: StoreErrorKind,
}

/// Put the same key-only row twice.
///
/// The first put must succeed and the second must be rejected as a
/// conditional check failure. Anything else is an error.
pub async fn probe_duplicate_put<S>(
    store: &S,
    table: &str,
    key: &Key,
) -> Result<ProbeOutcome, GuardError>
where
    S: KvStore + ?Sized,
{
    info!(%key, "putting item");
    conditional_put(store, table, Row::with_key(key)).await?;

    info!(%key, "putting same item; expecting a conditional check failure");
    match conditional_put(store, table, Row::with_key(key)).await {
        Ok(()) => Err(GuardError::DuplicateAccepted { key: key.clone() }),
        Err(GuardError::ConditionalCheckFailed { key }) => {
            info!(%key, "as expected: conditional check failure");
            Ok(ProbeOutcome {
                key,
                rejected_as: StoreErrorKind::ConditionalCheckFailed,
            })
        }
        Err(other) => Err(other),
    }
}
