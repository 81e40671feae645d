//! Monotonic id allocation for channels and waiters.
//!
//! Channel ids are used *only* to establish a deadlock-free lock order in
//! [`crate::select`]; waiter ids exist so a waiter can be logged and reasoned
//! about without comparing raw pointers.

use std::sync::atomic::{AtomicU64, Ordering};

static NEXT_CHAN_ID: AtomicU64 = AtomicU64::new(1);
static NEXT_WAITER_ID: AtomicU64 = AtomicU64::new(1);

/// Allocates the next globally unique channel id.
pub(crate) fn next_chan_id() -> u64 {
    NEXT_CHAN_ID.fetch_add(1, Ordering::Relaxed)
}

/// Allocates the next globally unique waiter id.
pub(crate) fn next_waiter_id() -> u64 {
    NEXT_WAITER_ID.fetch_add(1, Ordering::Relaxed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_distinct_and_increasing() {
        let a = next_chan_id();
        let b = next_chan_id();
        assert!(b > a);
        let wa = next_waiter_id();
        let wb = next_waiter_id();
        assert!(wb > wa);
    }
}
