//! Short shareable identifiers for resources.
//!
//! Allocation is bounded: a candidate is checked against the store up to
//! [`MAX_ATTEMPTS`] times and the last candidate is used even if it was
//! taken. The `UNIQUE(short_id)` constraint on insert is what actually
//! prevents duplicates; a collision that slips past the checks surfaces as
//! a `Conflict` the client can retry.

use rand::Rng;

use crate::db::Database;
use crate::error::ServerError;

pub const ALPHABET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZabcdefghijklmnopqrstuvwxyz0123456789";
pub const SHORT_ID_LEN: usize = 8;
pub const MAX_ATTEMPTS: usize = 10;

/// One uniformly random candidate.
pub fn generate<R: Rng + ?Sized>(rng: &mut R) -> String {
    (0..SHORT_ID_LEN)
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Generate candidates until `is_taken` reports a free one, at most
/// [`MAX_ATTEMPTS`] checks.
pub fn allocate_with<R, F, E>(rng: &mut R, mut is_taken: F) -> Result<String, E>
where
    R: Rng + ?Sized,
    F: FnMut(&str) -> Result<bool, E>,
{
    let mut candidate = generate(rng);
    for _ in 0..MAX_ATTEMPTS {
        if !is_taken(&candidate)? {
            return Ok(candidate);
        }
        candidate = generate(rng);
    }
    tracing::warn!(
        short_id = %candidate,
        attempts = MAX_ATTEMPTS,
        "short id retries exhausted; relying on insert constraint"
    );
    Ok(candidate)
}

pub fn is_valid(short_id: &str) -> bool {
    short_id.len() == SHORT_ID_LEN && short_id.bytes().all(|b| ALPHABET.contains(&b))
}

/// Allocate against the resources table.
pub fn allocate(db: &Database) -> Result<String, ServerError> {
    allocate_with(&mut rand::rng(), |candidate| db.short_id_taken(candidate))
}
