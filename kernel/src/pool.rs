// Concurrent Writer Pool
//
// Runs one mutator pass per writer, all against the same table at the
// same time. Each writer fills the column named after its identity.
// The identities are handed back so later passes can check the table
// against exactly the set of writers that ran.

use std::borrow::Borrow;
use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, info};

use crate::mutator::{update_all, MutatorError};
use crate::store::KvStore;

/// Length of a generated writer identity.
pub const WRITER_ID_LEN: usize = 8;

/// Random label of one writer; also the name of the column it fills.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct WriterId(String);

impl WriterId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Lowercase ASCII letters only, so it can never shadow `PK`, `SK`
    /// or a mixed-case seed attribute.
    pub fn random<R: Rng + ?Sized>(rng: &mut R) -> Self {
        let id = (0..WRITER_ID_LEN)
            .map(|_| char::from(rng.gen_range(b'a'..=b'z')))
            .collect();
        Self(id)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for WriterId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for WriterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Identities of every writer that has been let loose on a table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct KnownWriters(BTreeSet<WriterId>);

impl KnownWriters {
    /// Draw `count` distinct identities.
    pub fn generate<R: Rng + ?Sized>(count: usize, rng: &mut R) -> Self {
        let mut ids = BTreeSet::new();
        while ids.len() < count {
            ids.insert(WriterId::random(rng));
        }
        Self(ids)
    }

    pub fn iter(&self) -> impl Iterator<Item = &WriterId> {
        self.0.iter()
    }

    pub fn contains(&self, name: &str) -> bool {
        self.0.contains(name)
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl FromIterator<WriterId> for KnownWriters {
    fn from_iter<T: IntoIterator<Item = WriterId>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

#[derive(Debug, thiserror::Error)]
pub enum PoolError {
    #[error("worker {worker} ({writer}) failed: {source}")]
    Worker {
        worker: usize,
        writer: WriterId,
        source: MutatorError,
    },

    #[error("worker task did not complete: {0}")]
    Join(#[from] tokio::task::JoinError),
}

/// Run `worker_count` concurrent update passes over `table`.
///
/// All identities are drawn before the first worker starts. Waits for
/// every worker; the first failure aborts the rest and is returned.
/// `seed` makes identities and shuffle orders reproducible.
pub async fn run_concurrent_updates<S>(
    store: Arc<S>,
    table: &str,
    worker_count: usize,
    seed: Option<u64>,
) -> Result<KnownWriters, PoolError>
where
    S: KvStore + ?Sized + 'static,
{
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    let writers = KnownWriters::generate(worker_count, &mut rng);

    let mut tasks = JoinSet::new();
    for (worker, writer) in writers.iter().enumerate() {
        let store = Arc::clone(&store);
        let table = table.to_string();
        let writer = writer.clone();
        let mut worker_rng = StdRng::seed_from_u64(rng.gen());

        tasks.spawn(async move {
            debug!(worker, %writer, "worker started");
            match update_all(store.as_ref(), &table, writer.as_str(), &mut worker_rng).await {
                Ok(summary) => {
                    debug!(worker, %writer, rows = summary.rows_updated, "worker finished");
                    Ok(summary)
                }
                Err(source) => Err(PoolError::Worker {
                    worker,
                    writer,
                    source,
                }),
            }
        });
    }

    let mut rows_updated = 0;
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(summary)) => rows_updated += summary.rows_updated,
            Ok(Err(err)) => {
                tasks.abort_all();
                return Err(err);
            }
            Err(err) => {
                tasks.abort_all();
                return Err(PoolError::Join(err));
            }
        }
    }

    info!(
        workers = writers.len(),
        rows_updated, "all workers have finished"
    );
    Ok(writers)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mutator::tests::{seeded, FailingUpdates};
    use crate::mutator::FILLED;
    use crate::scan::TableScanner;
    use crate::store::Scalar;
    use std::sync::atomic::AtomicUsize;

    const TABLE: &str = "mutator-test";

    #[test]
    fn generated_identities_are_distinct_lowercase() {
        let mut rng = StdRng::seed_from_u64(9);
        let writers = KnownWriters::generate(200, &mut rng);
        assert_eq!(writers.len(), 200);
        for writer in writers.iter() {
            assert_eq!(writer.as_str().len(), WRITER_ID_LEN);
            assert!(writer.as_str().bytes().all(|b| b.is_ascii_lowercase()));
        }
    }

    #[test]
    fn contains_looks_up_by_column_name() {
        let writers: KnownWriters = ["alpha", "beta"].into_iter().map(WriterId::new).collect();
        assert!(writers.contains("beta"));
        assert!(!writers.contains("gamma"));
        assert!(!writers.contains("Beta"));
    }

    #[test]
    fn zero_writers_is_empty() {
        let mut rng = StdRng::seed_from_u64(9);
        assert!(KnownWriters::generate(0, &mut rng).is_empty());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn every_row_gets_one_attribute_per_writer() {
        let store = Arc::new(seeded(3, 20).await);

        let writers = run_concurrent_updates(Arc::clone(&store), TABLE, 8, Some(42))
            .await
            .unwrap();
        assert_eq!(writers.len(), 8);

        let rows = TableScanner::new(store.as_ref(), TABLE)
            .collect_rows()
            .await
            .unwrap();
        assert_eq!(rows.len(), 20);
        for row in rows {
            // PK, SK and one column per writer.
            assert_eq!(row.len(), 2 + writers.len());
            for writer in writers.iter() {
                assert_eq!(row.get(writer.as_str()), Some(&Scalar::from(FILLED)));
            }
        }
    }

    #[tokio::test]
    async fn seeded_runs_draw_the_same_identities() {
        let a = run_concurrent_updates(Arc::new(seeded(5, 3).await), TABLE, 4, Some(7))
            .await
            .unwrap();
        let b = run_concurrent_updates(Arc::new(seeded(5, 3).await), TABLE, 4, Some(7))
            .await
            .unwrap();
        assert_eq!(a, b);
    }

    #[tokio::test]
    async fn worker_failure_fails_the_pool() {
        let store = Arc::new(FailingUpdates {
            inner: seeded(10, 10).await,
            fail_at: 15,
            updates: AtomicUsize::new(0),
        });

        let err = run_concurrent_updates(store, TABLE, 4, Some(1))
            .await
            .unwrap_err();
        assert!(matches!(err, PoolError::Worker { .. }));
    }
}
