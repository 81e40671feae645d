//! A parked send or recv operation, and the per-channel queue of them.
//!
//! A channel's queue of pending operations is kept as a `VecDeque` guarded
//! by the channel's own mutex rather than as an intrusive doubly linked list
//! of raw pointers — the corpus's own KAIST kernel channel (`tx_waiter` /
//! `rx_waiter: SpinLock<Vec<ParkHandle>>`) takes the same "lock-guarded
//! owned-node collection" shape, and it is the representation the spec's own
//! re-architecture notes recommend over hand-rolled pointer chasing. `remove`
//! is `O(n)` in the number of waiters currently pending on one channel, which
//! in practice is small.

use std::cell::UnsafeCell;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::id::next_waiter_id;
use crate::park::{ParkSlot, WakeToken};

/// Which side of a channel a [`Waiter`] is parked on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Kind {
    Send,
    Recv,
}

/// A parked send or recv operation sitting in a channel's `send_q`/`recv_q`.
///
/// `slot` is the spec's `elem`: for a send waiter it is filled in (with the
/// value being offered) before the waiter is ever enqueued; for a recv
/// waiter it starts empty and is filled in by whichever thread performs the
/// hand-off, strictly before that thread calls `park.wake(..)`. The `wake`
/// call's `Release` store is what makes that write visible to the parked
/// thread once it observes the wake through `park()`'s `Acquire` load — so
/// `slot` itself never needs its own synchronization.
pub(crate) struct Waiter<T> {
    pub(crate) sid: u64,
    pub(crate) kind: Kind,
    slot: UnsafeCell<Option<T>>,
    pub(crate) park: Arc<ParkSlot>,
    pub(crate) select_done: Option<Arc<AtomicBool>>,
    /// Set by [`Waiter::claim`] iff *this particular* waiter is the one that
    /// won the shared `select_done` race. Several sibling waiters (one per
    /// `select` case) share one `select_done` flag but each has its own
    /// `own_claimed`, which is how a case later figures out whether it was
    /// the one a counterparty picked up.
    own_claimed: AtomicBool,
}

// SAFETY: `slot` is written by at most one thread (the hand-off performer)
// before `park.wake` is called, and read by at most one thread (the parked
// owner) after `park.park()` returns. The two accesses never race because
// they are ordered by the acquire/release pair on `park`'s internal state.
unsafe impl<T: Send> Send for Waiter<T> {}
unsafe impl<T: Send> Sync for Waiter<T> {}

impl<T> Waiter<T> {
    /// Creates a send waiter carrying `val`, parked on the calling thread.
    pub(crate) fn new_send(val: T, park: Arc<ParkSlot>, select_done: Option<Arc<AtomicBool>>) -> Self {
        Waiter {
            sid: next_waiter_id(),
            kind: Kind::Send,
            slot: UnsafeCell::new(Some(val)),
            park,
            select_done,
            own_claimed: AtomicBool::new(false),
        }
    }

    /// Creates an empty recv waiter, parked on the calling thread.
    pub(crate) fn new_recv(park: Arc<ParkSlot>, select_done: Option<Arc<AtomicBool>>) -> Self {
        Waiter {
            sid: next_waiter_id(),
            kind: Kind::Recv,
            slot: UnsafeCell::new(None),
            park,
            select_done,
            own_claimed: AtomicBool::new(false),
        }
    }

    /// Takes the value out of the slot. Has two legitimate callers:
    /// a receiver that just dequeued this (send) waiter while holding the
    /// channel's lock, and the waiter's own owning thread, reading its
    /// (recv) slot back out after `park()` returns.
    ///
    /// # Safety
    /// Must only be called either (a) while holding the owning channel's
    /// lock, by the thread performing the hand-off, or (b) by this waiter's
    /// own owning thread after its `park` has woken with `Delivered` — in
    /// that case no lock is held, but the `Release`/`Acquire` pair on `park`
    /// establishes the happens-before edge that makes the earlier `put`
    /// visible here. Either way, at most one `take` may observe the value.
    pub(crate) unsafe fn take(&self) -> Option<T> {
        (*self.slot.get()).take()
    }

    /// Writes a value into the slot. Used by a sender performing a direct
    /// hand-off into a parked receiver.
    ///
    /// # Safety
    /// Must only be called while holding the owning channel's lock, and at
    /// most once per waiter, strictly before `self.park.wake(..)` is called.
    pub(crate) unsafe fn put(&self, val: T) {
        *self.slot.get() = Some(val);
    }

    /// Attempts to claim this waiter for the given waker, atomically, by
    /// setting `select_done` from `false` to `true`. Waiters with no
    /// `select_done` (i.e. not part of a select) are always claimable. On a
    /// winning claim of a shared flag, also marks `own_claimed` so that
    /// *this* waiter (out of however many siblings share the flag) can later
    /// report that it specifically was the one claimed.
    fn claim(&self) -> bool {
        match &self.select_done {
            None => true,
            Some(flag) => {
                let won = flag
                    .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
                    .is_ok();
                if won {
                    self.own_claimed.store(true, Ordering::Release);
                }
                won
            }
        }
    }

    /// Whether this specific waiter was the one a dequeuer claimed, among
    /// any siblings sharing the same `select_done` flag.
    pub(crate) fn was_claimed(&self) -> bool {
        self.own_claimed.load(Ordering::Acquire)
    }

    /// Delivers a wake token to this waiter. Callers must have successfully
    /// called [`Waiter::claim`] (directly, or via [`WaiterQueue::dequeue`])
    /// before calling this.
    pub(crate) fn wake(&self, token: WakeToken) {
        self.park.wake(token);
    }
}

/// The FIFO of waiters parked on one side (send or recv) of one channel.
pub(crate) struct WaiterQueue<T> {
    items: VecDeque<Arc<Waiter<T>>>,
}

impl<T> WaiterQueue<T> {
    pub(crate) fn new() -> Self {
        WaiterQueue {
            items: VecDeque::new(),
        }
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub(crate) fn enqueue(&mut self, w: Arc<Waiter<T>>) {
        self.items.push_back(w);
    }

    /// Pops the oldest *claimable* waiter, skipping and discarding any
    /// ghosts (select losers already claimed by another waker) along the
    /// way.
    pub(crate) fn dequeue(&mut self) -> Option<Arc<Waiter<T>>> {
        while let Some(w) = self.items.pop_front() {
            if w.claim() {
                return Some(w);
            }
            // Lost the race (or this waiter's select already completed
            // elsewhere); it's a ghost, drop it and keep looking.
        }
        None
    }

    /// Removes `w` from the queue if it is still present. Tolerates `w`
    /// having already been dequeued by a counterparty.
    pub(crate) fn remove(&mut self, w: &Arc<Waiter<T>>) {
        if let Some(pos) = self.items.iter().position(|x| Arc::ptr_eq(x, w)) {
            self.items.remove(pos);
        }
    }

    /// Drains every waiter out of the queue (used by `close`), discarding
    /// any that fail to claim — a select waiter whose sibling on another
    /// channel already won the race is a ghost here too, and must not be
    /// woken a second time through its shared `ParkSlot`.
    pub(crate) fn drain_all(&mut self) -> Vec<Arc<Waiter<T>>> {
        self.items.drain(..).filter(|w| w.claim()).collect()
    }
}
