// Key-Value Store Abstraction
//
// Defines the row model and the contract of the external key-value
// store. The bulk mutation engine only ever talks to a table through
// `KvStore`; implementations may be in-process or remote.

use std::collections::BTreeMap;
use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

#[cfg(feature = "dynamodb")]
pub mod dynamodb;
pub mod memory;

pub use memory::InMemoryStore;

/// Partition key attribute name.
pub const PK: &str = "PK";

/// Sort key attribute name.
pub const SK: &str = "SK";

/// Typed scalar attribute value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Scalar {
    S(String),
    /// Decimal text, as the wire format carries it.
    N(String),
    Bool(bool),
}

impl Scalar {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Scalar::S(s) => Some(s),
            _ => None,
        }
    }

    /// Rough size on the wire, used for page budgeting.
    pub fn approximate_size(&self) -> usize {
        match self {
            Scalar::S(s) | Scalar::N(s) => s.len(),
            Scalar::Bool(_) => 1,
        }
    }
}

impl From<&str> for Scalar {
    fn from(value: &str) -> Self {
        Scalar::S(value.to_string())
    }
}

impl From<String> for Scalar {
    fn from(value: String) -> Self {
        Scalar::S(value)
    }
}

/// Two-part primary key of a row.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Key {
    pub pk: String,
    pub sk: String,
}

impl Key {
    pub fn new(pk: impl Into<String>, sk: impl Into<String>) -> Self {
        Self {
            pk: pk.into(),
            sk: sk.into(),
        }
    }
}

impl fmt::Display for Key {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({}, {})", self.pk, self.sk)
    }
}

/// A row is a mapping from attribute name to scalar value.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    attributes: BTreeMap<String, Scalar>,
}

/// Raised when a row does not carry a usable primary key.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("row has no valid `{attribute}` key attribute")]
pub struct MalformedRow {
    pub attribute: &'static str,
}

impl Row {
    /// Create a row holding only its key attributes.
    pub fn with_key(key: &Key) -> Self {
        let mut row = Row::default();
        row.set(PK, key.pk.as_str());
        row.set(SK, key.sk.as_str());
        row
    }

    pub fn set(&mut self, name: impl Into<String>, value: impl Into<Scalar>) {
        self.attributes.insert(name.into(), value.into());
    }

    pub fn get(&self, name: &str) -> Option<&Scalar> {
        self.attributes.get(name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.attributes.contains_key(name)
    }

    /// Attribute names, key attributes included.
    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }

    pub fn attributes(&self) -> impl Iterator<Item = (&str, &Scalar)> {
        self.attributes.iter().map(|(k, v)| (k.as_str(), v))
    }

    pub fn len(&self) -> usize {
        self.attributes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.attributes.is_empty()
    }

    /// Extract the `(PK, SK)` key. Both must be non-empty strings.
    pub fn key(&self) -> Result<Key, MalformedRow> {
        let pk = self.key_part(PK)?;
        let sk = self.key_part(SK)?;
        Ok(Key::new(pk, sk))
    }

    fn key_part(&self, attribute: &'static str) -> Result<&str, MalformedRow> {
        match self.get(attribute).and_then(Scalar::as_str) {
            Some(value) if !value.is_empty() => Ok(value),
            _ => Err(MalformedRow { attribute }),
        }
    }

    pub fn approximate_size(&self) -> usize {
        self.attributes
            .iter()
            .map(|(k, v)| k.len() + v.approximate_size())
            .sum()
    }
}

impl FromIterator<(String, Scalar)> for Row {
    fn from_iter<T: IntoIterator<Item = (String, Scalar)>>(iter: T) -> Self {
        Self {
            attributes: iter.into_iter().collect(),
        }
    }
}

/// Opaque scan cursor. Only stores mint tokens.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContinuationToken(Key);

impl ContinuationToken {
    pub(crate) fn new(last_key: Key) -> Self {
        Self(last_key)
    }

    pub(crate) fn last_key(&self) -> &Key {
        &self.0
    }
}

/// One page of a table scan.
#[derive(Debug, Clone, Default)]
pub struct ScanPage {
    pub rows: Vec<Row>,
    /// Absent once the table has been fully traversed.
    pub next: Option<ContinuationToken>,
}

/// Server-evaluated precondition on a put.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PutCondition {
    /// `attribute_not_exists(PK)`: no row with the same key may exist.
    KeyNotExists,
}

/// Closed classification of store failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StoreErrorKind {
    ConditionalCheckFailed,
    TableNotFound,
    /// A value could not be converted to or from the store's wire types.
    Codec,
    /// Transport, throttling, service faults and anything else.
    Backend,
}

#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
#[error("{kind:?}: {message}")]
pub struct StoreError {
    pub kind: StoreErrorKind,
    pub message: String,
}

impl StoreError {
    pub fn new(kind: StoreErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn conditional_check_failed(message: impl Into<String>) -> Self {
        Self::new(StoreErrorKind::ConditionalCheckFailed, message)
    }

    pub fn table_not_found(table: &str) -> Self {
        Self::new(
            StoreErrorKind::TableNotFound,
            format!("table `{table}` does not exist"),
        )
    }

    pub fn kind(&self) -> StoreErrorKind {
        self.kind
    }

    pub fn is_conditional_check_failure(&self) -> bool {
        self.kind == StoreErrorKind::ConditionalCheckFailed
    }
}

/// Key-value store reachable by the engine.
///
/// Properties required from implementations:
/// - Each point operation is atomic per row
/// - Scans eventually visit every row present for the whole traversal
/// - `update_item` creates the row when absent
///
/// Implementations make no point-in-time guarantee across scan pages.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Create the table with a `PK` hash / `SK` range key schema.
    ///
    /// Returns `false` when the table already existed.
    async fn create_table(&self, table: &str) -> Result<bool, StoreError>;

    async fn put_item(
        &self,
        table: &str,
        row: Row,
        condition: Option<PutCondition>,
    ) -> Result<(), StoreError>;

    /// Fetch one page, starting after `token` when given.
    async fn scan(
        &self,
        table: &str,
        token: Option<ContinuationToken>,
    ) -> Result<ScanPage, StoreError>;

    /// Set a single attribute on the row at `key`.
    async fn update_item(
        &self,
        table: &str,
        key: &Key,
        attribute: &str,
        value: Scalar,
    ) -> Result<(), StoreError>;

    async fn delete_item(&self, table: &str, key: &Key) -> Result<(), StoreError>;
}
