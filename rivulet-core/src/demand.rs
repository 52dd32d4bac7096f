//! Demand accounting helpers
//!
//! Demand is a `u64` where [`UNBOUNDED`] means "no limit". Additions saturate
//! at `UNBOUNDED`; once unbounded a counter never decreases.

use std::sync::atomic::{AtomicU64, Ordering};

/// Demand value meaning "emit everything"
pub const UNBOUNDED: u64 = u64::MAX;

/// Saturating add of two demand values
pub fn add_cap(a: u64, b: u64) -> u64 {
    a.saturating_add(b)
}

/// Atomically add `n` to `demand`, returning the previous value
pub fn add(demand: &AtomicU64, n: u64) -> u64 {
    let mut current = demand.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = add_cap(current, n);
        match demand.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(previous) => return previous,
            Err(actual) => current = actual,
        }
    }
}

/// Atomically subtract `n` produced items from `demand`, returning the remainder
pub fn produced(demand: &AtomicU64, n: u64) -> u64 {
    let mut current = demand.load(Ordering::Acquire);
    loop {
        if current == UNBOUNDED {
            return UNBOUNDED;
        }
        let next = current.saturating_sub(n);
        match demand.compare_exchange_weak(current, next, Ordering::AcqRel, Ordering::Acquire) {
            Ok(_) => return next,
            Err(actual) => current = actual,
        }
    }
}
