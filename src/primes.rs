//! Process-wide prime index.
//!
//! Primes are numbered from zero in ascending order (`2 -> 0`, `3 -> 1`,
//! `5 -> 2`, ...). The table only ever grows, so an index handed out once
//! stays valid for the lifetime of the process.

use std::collections::HashMap;
use std::sync::{OnceLock, PoisonError, RwLock};

use thiserror::Error;
use tracing::debug;

/// Number of entries the table may grow to.
pub const MAX_PRIME_INDEX: usize = 1 << 20;

/// The prime at index `MAX_PRIME_INDEX - 1`, the largest the table can hold.
pub const MAX_PRIME_VALUE: u64 = 16_290_047;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PrimeError {
    #[error("{0} is not a prime")]
    NotFound(u64),
    #[error("cannot factorize values below 1")]
    InvalidInput,
    #[error("prime table limit of {MAX_PRIME_INDEX} entries exceeded")]
    LimitExceeded,
}

/// Append-only table of primes with a reverse lookup.
#[derive(Debug, Clone)]
pub struct PrimeTable {
    primes: Vec<u64>,
    positions: HashMap<u64, usize>,
}

impl Default for PrimeTable {
    fn default() -> Self {
        Self::new()
    }
}

impl PrimeTable {
    pub fn new() -> Self {
        let primes = vec![2, 3];
        let positions = primes.iter().enumerate().map(|(i, &p)| (p, i)).collect();
        Self { primes, positions }
    }

    pub fn len(&self) -> usize {
        self.primes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.primes.is_empty()
    }

    pub fn get(&self, index: usize) -> Option<u64> {
        self.primes.get(index).copied()
    }

    pub fn position(&self, value: u64) -> Option<usize> {
        self.positions.get(&value).copied()
    }

    pub fn largest(&self) -> u64 {
        self.primes.last().copied().unwrap_or(2)
    }

    pub fn extend_to_index(&mut self, index: usize) -> Result<(), PrimeError> {
        if index >= MAX_PRIME_INDEX {
            return Err(PrimeError::LimitExceeded);
        }
        while self.primes.len() <= index {
            self.push_next();
        }
        Ok(())
    }

    pub fn extend_to_value(&mut self, value: u64) -> Result<(), PrimeError> {
        if value > MAX_PRIME_VALUE {
            return Err(PrimeError::LimitExceeded);
        }
        while self.largest() < value {
            if self.primes.len() >= MAX_PRIME_INDEX {
                return Err(PrimeError::LimitExceeded);
            }
            self.push_next();
        }
        Ok(())
    }

    fn push_next(&mut self) {
        let mut candidate = self.largest() + 2;
        while !self.is_prime_by_table(candidate) {
            candidate += 2;
        }
        self.positions.insert(candidate, self.primes.len());
        self.primes.push(candidate);
    }

    // Every prime below `candidate` is already in the table, and the table
    // always reaches past sqrt(candidate) because candidate < 2 * largest.
    fn is_prime_by_table(&self, candidate: u64) -> bool {
        self.primes
            .iter()
            .take_while(|&&p| p * p <= candidate)
            .all(|&p| candidate % p != 0)
    }
}

fn table() -> &'static RwLock<PrimeTable> {
    static TABLE: OnceLock<RwLock<PrimeTable>> = OnceLock::new();
    TABLE.get_or_init(|| RwLock::new(PrimeTable::new()))
}

/// The prime at `index`, growing the shared table if needed.
pub fn prime_at(index: usize) -> Result<u64, PrimeError> {
    {
        let table = table().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(prime) = table.get(index) {
            return Ok(prime);
        }
    }
    let mut table = table().write().unwrap_or_else(PoisonError::into_inner);
    let before = table.len();
    table.extend_to_index(index)?;
    debug!(from = before, to = table.len(), "extended prime table");
    table.get(index).ok_or(PrimeError::LimitExceeded)
}

/// Zero-based position of `value` in the prime sequence.
pub fn index_of(value: u64) -> Result<usize, PrimeError> {
    {
        let table = table().read().unwrap_or_else(PoisonError::into_inner);
        if let Some(index) = table.position(value) {
            return Ok(index);
        }
        if value <= table.largest() {
            return Err(PrimeError::NotFound(value));
        }
    }
    if value > MAX_PRIME_VALUE {
        return Err(PrimeError::LimitExceeded);
    }
    let mut table = table().write().unwrap_or_else(PoisonError::into_inner);
    table.extend_to_value(value)?;
    table.position(value).ok_or(PrimeError::NotFound(value))
}

pub fn extend_to_index(index: usize) -> Result<(), PrimeError> {
    prime_at(index).map(|_| ())
}

pub fn extend_to_value(value: u64) -> Result<(), PrimeError> {
    if value > MAX_PRIME_VALUE {
        return Err(PrimeError::LimitExceeded);
    }
    let mut table = table().write().unwrap_or_else(PoisonError::into_inner);
    table.extend_to_value(value)
}

/// Number of primes currently cached by the shared table.
pub fn cached_len() -> usize {
    table().read().unwrap_or_else(PoisonError::into_inner).len()
}

/// Trial-division factorization into ascending `(prime, exponent)` pairs.
///
/// `factorize(1)` is empty. A residual cofactor left after dividing out every
/// prime up to its square root is itself prime and is added to the table so
/// that `index_of` can resolve it afterwards. A cofactor above
/// [`MAX_PRIME_VALUE`] fails with `LimitExceeded` without touching the table.
pub fn factorize(n: u128) -> Result<Vec<(u64, u32)>, PrimeError> {
    if n == 0 {
        return Err(PrimeError::InvalidInput);
    }
    let mut remaining = n;
    let mut factors = Vec::new();
    let mut index = 0;
    while remaining > 1 {
        let prime = prime_at(index)?;
        let p = u128::from(prime);
        if p * p > remaining {
            break;
        }
        if remaining % p == 0 {
            let mut exponent = 0;
            while remaining % p == 0 {
                remaining /= p;
                exponent += 1;
            }
            factors.push((prime, exponent));
        }
        index += 1;
    }
    if remaining > 1 {
        let prime = u64::try_from(remaining)
            .ok()
            .filter(|&p| p <= MAX_PRIME_VALUE)
            .ok_or(PrimeError::LimitExceeded)?;
        extend_to_value(prime)?;
        factors.push((prime, 1));
    }
    Ok(factors)
}
