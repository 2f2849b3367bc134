// Seed rows for a run: `PK-<i>` / `A` with a random text payload.

use rand::Rng;
use tracing::info;

use crate::guard::{conditional_put, GuardError};
use crate::store::{Key, KvStore, Row};

/// Attribute holding the random payload of a seeded row.
pub const RANDOM_CONTENT: &str = "RandomContent";

/// Sort key shared by every seeded row.
pub const SEED_SORT_KEY: &str = "A";

const LETTERS: &[u8] = b"abcdefghijklmnopqrstuvwxyzABCDEFGHIJKLMNOPQRSTUVWXYZ";

#[derive(Debug, thiserror::Error)]
#[error("seeding row {index} failed: {source}")]
pub struct SeedError {
    pub index: usize,
    pub source: GuardError,
}

/// `len` letters drawn uniformly from `a-z` and `A-Z`.
pub fn random_text<R: Rng + ?Sized>(len: usize, rng: &mut R) -> String {
    (0..len)
        .map(|_| char::from(LETTERS[rng.gen_range(0..LETTERS.len())]))
        .collect()
}

pub fn seed_key(index: usize) -> Key {
    Key::new(format!("PK-{index}"), SEED_SORT_KEY)
}

/// Put `count` seed rows with conditional puts. Stops at the first failure.
pub async fn seed_items<S, R>(
    store: &S,
    table: &str,
    count: usize,
    text_len: usize,
    rng: &mut R,
) -> Result<usize, SeedError>
where
    S: KvStore + ?Sized,
    R: Rng + Send + ?Sized,
{
    for index in 0..count {
        let mut row = Row::with_key(&seed_key(index));
        row.set(RANDOM_CONTENT, random_text(text_len, rng));
        conditional_put(store, table, row)
            .await
            .map_err(|source| SeedError { index, source })?;
    }
    info!(table, count, text_len, "seeded items");
    Ok(count)
}
