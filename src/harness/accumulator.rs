//! Per-iteration XOR accumulator used as the order-independent correctness oracle.
//!
//! Each slot holds the XOR of the FNV-1 hashes of every record signature
//! folded into that iteration. XOR is commutative and associative, so the
//! final value does not depend on the order in which worker threads finish.

#![allow(missing_docs)]

use parking_lot::Mutex;

use crate::core::errors::{HsvError, IterationHash, Result};

const FNV32_OFFSET_BASIS: u32 = 0x811c_9dc5;
const FNV32_PRIME: u32 = 0x0100_0193;

/// 32-bit FNV-1 hash (multiply, then XOR) of a string's UTF-8 bytes.
#[must_use]
pub fn fnv1_32(value: &str) -> u32 {
    let mut hash = FNV32_OFFSET_BASIS;
    for byte in value.as_bytes() {
        hash = hash.wrapping_mul(FNV32_PRIME);
        hash ^= u32::from(*byte);
    }
    hash
}

/// Array of rolling checksums, one lock per slot.
///
/// Folds into different iterations never contend; folds into the same
/// iteration are serialized by that slot's lock, held only for the XOR.
#[derive(Debug)]
pub struct HashAccumulator {
    slots: Vec<Mutex<u32>>,
}

impl HashAccumulator {
    #[must_use]
    pub fn new(iterations: usize) -> Self {
        Self {
            slots: (0..iterations).map(|_| Mutex::new(0)).collect(),
        }
    }

    #[must_use]
    pub fn iterations(&self) -> usize {
        self.slots.len()
    }

    /// Hash `signature` and XOR it into the slot for `iteration`.
    ///
    /// Returns the hash that was folded.
    pub fn fold(&self, iteration: usize, signature: &str) -> Result<u32> {
        let slot = self.slots.get(iteration).ok_or_else(|| HsvError::Runtime {
            details: format!(
                "fold into iteration {iteration} but only {} slots exist",
                self.slots.len()
            ),
        })?;
        let code = fnv1_32(signature);
        *slot.lock() ^= code;
        Ok(code)
    }

    /// Current value of every slot, in iteration order.
    #[must_use]
    pub fn snapshot(&self) -> Vec<IterationHash> {
        self.slots
            .iter()
            .enumerate()
            .map(|(iteration, slot)| IterationHash {
                iteration,
                hash: *slot.lock(),
            })
            .collect()
    }
}
