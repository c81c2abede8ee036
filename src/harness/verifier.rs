//! Consistency oracle: every iteration must fold to the same hash as iteration 0.

#![allow(missing_docs)]

use crate::core::errors::{HsvError, IterationHash, Result};

/// Compare every slot with slot 0.
///
/// Returns the common hash, or [`HsvError::HashMismatch`] listing every
/// iteration that differs. An empty slot list verifies trivially to 0.
pub fn verify(hashes: &[IterationHash]) -> Result<u32> {
    let Some(first) = hashes.first() else {
        return Ok(0);
    };
    let baseline = first.hash;
    let mismatches: Vec<IterationHash> = hashes
        .iter()
        .skip(1)
        .filter(|slot| slot.hash != baseline)
        .copied()
        .collect();

    if mismatches.is_empty() {
        Ok(baseline)
    } else {
        Err(HsvError::HashMismatch {
            baseline,
            mismatches,
        })
    }
}
