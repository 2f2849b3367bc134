// Contend Kernel
//
// Concurrency-safe bulk mutation engine for key-value tables:
// paginated scans, shuffled bulk updates from many concurrent writers,
// conditional writes and invariant-checked bulk deletes.

pub mod config;
pub mod deleter;
pub mod guard;
pub mod invariants;
pub mod mutator;
pub mod pool;
pub mod scan;
pub mod scenario;
pub mod seed;
pub mod shuffle;
pub mod store;
pub mod verify;
