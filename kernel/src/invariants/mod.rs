// Invariant Framework
//
// Invariants are pure rules that every row visible in a table must
// satisfy. The deleter evaluates them *before* removing a row, so a
// violation stops the pass while the evidence is still in the table.

use std::collections::{BTreeSet, HashSet};
use std::hash::Hash;

use crate::pool::KnownWriters;
use crate::store::{Key, Row, Scalar, PK, SK};

/// Result of invariant evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InvariantResult {
    Pass,
    Fail(String),
}

/// Trait implemented by all row invariants.
///
/// Invariants must be:
/// - Pure
/// - Deterministic
/// - Side-effect free
pub trait Invariant: Send + Sync {
    fn name(&self) -> &'static str;

    fn validate(&self, row: &Row) -> InvariantResult;
}

/// Invariant engine that evaluates a set of invariants.
#[derive(Default)]
pub struct InvariantEngine {
    invariants: Vec<Box<dyn Invariant>>,
}

impl InvariantEngine {
    /// Create a new invariant engine.
    pub fn new() -> Self {
        Self {
            invariants: Vec::new(),
        }
    }

    /// Register an invariant.
    pub fn register<I: Invariant + 'static>(&mut self, invariant: I) {
        self.invariants.push(Box::new(invariant));
    }

    /// Evaluate all invariants against one row.
    ///
    /// Stops at the first failure.
    pub fn evaluate(&self, row: &Row) -> Result<(), InvariantViolation> {
        for invariant in &self.invariants {
            match invariant.validate(row) {
                InvariantResult::Pass => continue,
                InvariantResult::Fail(reason) => {
                    return Err(InvariantViolation {
                        invariant: invariant.name(),
                        key: row.key().ok(),
                        reason,
                    })
                }
            }
        }
        Ok(())
    }
}

/// Returned when an invariant is violated.
#[derive(Debug, thiserror::Error)]
#[error("invariant `{invariant}` violated for row {}: {reason}", key_label(.key))]
pub struct InvariantViolation {
    pub invariant: &'static str,
    /// Absent when the offending row has no usable key.
    pub key: Option<Key>,
    pub reason: String,
}

fn key_label(key: &Option<Key>) -> String {
    match key {
        Some(key) => key.to_string(),
        None => "<unkeyed>".to_string(),
    }
}

/// True iff every element of `subset` appears in `superset`.
///
/// An empty `subset` is a subset of anything.
pub fn is_subset<T, A, B>(subset: A, superset: B) -> bool
where
    T: Eq + Hash,
    A: IntoIterator<Item = T>,
    B: IntoIterator<Item = T>,
{
    let superset: HashSet<T> = superset.into_iter().collect();
    subset.into_iter().all(|item| superset.contains(&item))
}

/// Every attribute name on a row must be a key attribute, a declared
/// seed attribute, or the identity of a known writer.
#[derive(Debug, Clone)]
pub struct ClosedWorldAttributes {
    allowed: BTreeSet<String>,
}

impl ClosedWorldAttributes {
    pub fn new<'a>(
        writers: &KnownWriters,
        seed_attributes: impl IntoIterator<Item = &'a str>,
    ) -> Self {
        let mut allowed: BTreeSet<String> = [PK, SK].iter().map(|s| s.to_string()).collect();
        allowed.extend(seed_attributes.into_iter().map(str::to_string));
        allowed.extend(writers.iter().map(|w| w.as_str().to_string()));
        Self { allowed }
    }
}

impl Invariant for ClosedWorldAttributes {
    fn name(&self) -> &'static str {
        "closed-world-attributes"
    }

    fn validate(&self, row: &Row) -> InvariantResult {
        let allowed = self.allowed.iter().map(String::as_str);
        if is_subset(row.attribute_names(), allowed) {
            return InvariantResult::Pass;
        }

        let unknown: Vec<&str> = row
            .attribute_names()
            .filter(|name| !self.allowed.contains(*name))
            .collect();
        InvariantResult::Fail(format!(
            "attributes {unknown:?} were not written by any known writer"
        ))
    }
}

/// Every known writer must have set its attribute to `value` on the row.
#[derive(Debug, Clone)]
pub struct AllWritersFilled {
    writers: KnownWriters,
    value: Scalar,
}

impl AllWritersFilled {
    pub fn new(writers: KnownWriters, value: impl Into<Scalar>) -> Self {
        Self {
            writers,
            value: value.into(),
        }
    }
}

impl Invariant for AllWritersFilled {
    fn name(&self) -> &'static str {
        "all-writers-filled"
    }

    fn validate(&self, row: &Row) -> InvariantResult {
        let missing: Vec<&str> = self
            .writers
            .iter()
            .map(|w| w.as_str())
            .filter(|w| row.get(w) != Some(&self.value))
            .collect();

        if missing.is_empty() {
            InvariantResult::Pass
        } else {
            InvariantResult::Fail(format!(
                "{} of {} writer attribute(s) missing or not {:?}: {:?}",
                missing.len(),
                self.writers.len(),
                self.value,
                missing
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::WriterId;
    use proptest::prelude::*;

    fn writers(names: &[&str]) -> KnownWriters {
        names.iter().map(|n| WriterId::new(*n)).collect()
    }

    fn row(extra: &[&str]) -> Row {
        let mut row = Row::with_key(&Key::new("PK-1", "A"));
        for name in extra {
            row.set(*name, "filled");
        }
        row
    }

    #[test]
    fn subset_basics() {
        assert!(is_subset(Vec::<&str>::new(), vec!["y"]));
        assert!(is_subset(Vec::<&str>::new(), Vec::<&str>::new()));
        assert!(!is_subset(vec!["x"], vec!["y"]));
        assert!(is_subset(vec!["x", "x"], vec!["y", "x"]));
    }

    #[test]
    fn closed_world_accepts_known_writers() {
        let check = ClosedWorldAttributes::new(&writers(&["abc", "def"]), ["RandomContent"]);
        assert_eq!(check.validate(&row(&["abc", "RandomContent"])), InvariantResult::Pass);
        assert_eq!(check.validate(&row(&[])), InvariantResult::Pass);
    }

    #[test]
    fn closed_world_names_unknown_attributes() {
        let check = ClosedWorldAttributes::new(&writers(&["abc"]), std::iter::empty());
        match check.validate(&row(&["abc", "phantom"])) {
            InvariantResult::Fail(reason) => assert!(reason.contains("phantom")),
            InvariantResult::Pass => panic!("phantom attribute accepted"),
        }
    }

    #[test]
    fn all_writers_filled_requires_value() {
        let check = AllWritersFilled::new(writers(&["abc", "def"]), "filled");
        assert_eq!(check.validate(&row(&["abc", "def"])), InvariantResult::Pass);

        let mut wrong = row(&["abc"]);
        wrong.set("def", "empty");
        assert!(matches!(check.validate(&wrong), InvariantResult::Fail(_)));
    }

    #[test]
    fn engine_stops_at_first_failure() {
        let mut engine = InvariantEngine::new();
        engine.register(ClosedWorldAttributes::new(&writers(&["abc"]), std::iter::empty()));
        engine.register(AllWritersFilled::new(writers(&["abc"]), "filled"));

        let err = engine.evaluate(&row(&["zzz"])).unwrap_err();
        assert_eq!(err.invariant, "closed-world-attributes");
        assert_eq!(err.key, Some(Key::new("PK-1", "A")));
        assert!(err.to_string().contains("(PK-1, A)"));

        assert!(engine.evaluate(&row(&["abc"])).is_ok());
    }

    proptest! {
        #[test]
        fn subset_matches_definition(
            a in prop::collection::vec(0u8..16, 0..12),
            b in prop::collection::vec(0u8..16, 0..12),
        ) {
            let expected = a.iter().all(|x| b.contains(x));
            prop_assert_eq!(is_subset(a.iter(), b.iter()), expected);
        }
    }
}
