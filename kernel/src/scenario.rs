// End-to-End Concurrency Scenario
//
// Runs the full pipeline against one table:
// create → duplicate-put probe → seed → concurrent writers → verify
// → checked delete → final scan

use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::SeedableRng;
use serde::Serialize;
use tracing::info;
use uuid::Uuid;

use crate::config::ScenarioConfig;
use crate::deleter::{closed_world, delete_all, DeleteError};
use crate::guard::{probe_duplicate_put, GuardError, ProbeOutcome};
use crate::invariants::{AllWritersFilled, InvariantEngine};
use crate::mutator::FILLED;
use crate::pool::{run_concurrent_updates, KnownWriters, PoolError};
use crate::scan::{ScanError, TableScanner};
use crate::seed::{seed_items, SeedError, SEED_SORT_KEY};
use crate::store::{Key, KvStore, StoreError};
use crate::verify::{verify_all, VerifyError};

/// Partition key of the row used by the duplicate-put probe.
pub const PROBE_PARTITION_KEY: &str = "ITEM#123";

/// Wall-clock time spent in one phase.
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTiming {
    pub phase: &'static str,
    pub millis: u64,
}

/// Result of a full scenario run.
#[derive(Debug, Clone, Serialize)]
pub struct ScenarioReport {
    pub run_id: Uuid,
    pub table: String,
    pub table_created: bool,
    pub probe: ProbeOutcome,
    pub rows_seeded: usize,
    pub writers: usize,
    pub rows_verified: usize,
    pub rows_deleted: usize,
    pub rows_remaining: usize,
    pub phases: Vec<PhaseTiming>,
}

/// Errors that can occur during a scenario run.
#[derive(Debug, thiserror::Error)]
pub enum ScenarioError {
    #[error("creating table failed: {0}")]
    CreateTable(#[source] StoreError),

    #[error("conditional put probe failed: {0}")]
    Probe(#[from] GuardError),

    #[error(transparent)]
    Seed(#[from] SeedError),

    #[error("concurrent updates failed: {0}")]
    Pool(#[from] PoolError),

    #[error("post-update verification failed: {0}")]
    Verify(#[from] VerifyError),

    #[error("delete pass failed: {0}")]
    Delete(#[from] DeleteError),

    #[error("final scan failed: {0}")]
    FinalScan(#[from] ScanError),

    #[error("table `{table}` still holds {remaining} row(s) after the delete pass")]
    TableNotEmpty { table: String, remaining: usize },
}

struct Phases(Vec<PhaseTiming>);

impl Phases {
    fn record(&mut self, phase: &'static str, started: Instant) {
        let millis = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);
        info!(phase, millis, "phase complete");
        self.0.push(PhaseTiming { phase, millis });
    }
}

/// Run the full scenario against `store`.
///
/// Any failure ends the run at the phase where it happened.
pub async fn run_scenario<S>(
    store: Arc<S>,
    config: &ScenarioConfig,
) -> Result<ScenarioReport, ScenarioError>
where
    S: KvStore + ?Sized + 'static,
{
    let run_id = Uuid::new_v4();
    let table = config.table.as_str();
    let mut phases = Phases(Vec::new());
    let mut rng = match config.seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    info!(%run_id, table, "starting scenario");

    // 1. Table
    let started = Instant::now();
    let table_created = store
        .create_table(table)
        .await
        .map_err(ScenarioError::CreateTable)?;
    info!(table, table_created, "table ready");
    phases.record("create_table", started);

    // 2. Conditional write that must fail the second time
    let started = Instant::now();
    let probe_key = Key::new(PROBE_PARTITION_KEY, SEED_SORT_KEY);
    let probe = probe_duplicate_put(store.as_ref(), table, &probe_key).await?;
    phases.record("conditional_put_probe", started);

    // 3. Seed
    let started = Instant::now();
    let rows_seeded = seed_items(
        store.as_ref(),
        table,
        config.item_count,
        config.text_len,
        &mut rng,
    )
    .await?;
    phases.record("seed", started);

    // 4. Concurrent writers
    let started = Instant::now();
    let writers = run_concurrent_updates(
        Arc::clone(&store),
        table,
        config.worker_count,
        config.seed,
    )
    .await?;
    phases.record("concurrent_updates", started);

    // 5. Every row carries every writer's column and nothing else
    let started = Instant::now();
    let verified = verify_all(store.as_ref(), table, &fill_check(&writers)).await?;
    phases.record("verify", started);

    // 6. Checked delete
    let started = Instant::now();
    let deleted = delete_all(store.as_ref(), table, &writers).await?;
    phases.record("delete_all", started);

    // 7. Nothing may survive
    let remaining = TableScanner::new(store.as_ref(), table)
        .collect_rows()
        .await?
        .len();
    if remaining > 0 {
        return Err(ScenarioError::TableNotEmpty {
            table: table.to_string(),
            remaining,
        });
    }

    info!(%run_id, table, "scenario completed");
    Ok(ScenarioReport {
        run_id,
        table: table.to_string(),
        table_created,
        probe,
        rows_seeded,
        writers: writers.len(),
        rows_verified: verified.rows_checked,
        rows_deleted: deleted.rows_deleted,
        rows_remaining: remaining,
        phases: phases.0,
    })
}

fn fill_check(writers: &KnownWriters) -> InvariantEngine {
    let mut engine = closed_world(writers);
    engine.register(AllWritersFilled::new(writers.clone(), FILLED));
    engine
}
