//! The one-shot park/unpark primitive a blocked send, recv, or select sits on.
//!
//! This is the same idea as the `Worker` state machine in the teacher
//! crate's `burst-chan` sibling: a small atomic state plus the blocked
//! thread's own [`std::thread::Thread`] handle, woken with
//! `Thread::unpark()`. There the state tracked whether a slot held work;
//! here it tracks whether the slot holds a completed hand-off or a
//! channel-closed signal.

use std::sync::atomic::{AtomicU8, Ordering};
use std::thread::{self, Thread};

const EMPTY: u8 = 0;
const DELIVERED: u8 = 1;
const CLOSED: u8 = 2;

/// What a parked waiter was woken with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum WakeToken {
    /// A counterparty completed the hand-off this waiter was parked for.
    Delivered,
    /// The channel was closed while this waiter was parked.
    Closed,
}

/// A single-poster, single-taker hand-off slot.
///
/// The taker is always the thread that created the `ParkSlot` and calls
/// [`ParkSlot::park`]. Exactly one poster may call [`ParkSlot::wake`] — for
/// ordinary send/recv waiters this is enforced by construction (only one
/// counterparty can dequeue the waiter in the first place); for select
/// waiters it is enforced by the shared `select_done` flag in
/// [`crate::waiter::Waiter`], which gates whether a dequeuer is even allowed
/// to call `wake` at all.
pub(crate) struct ParkSlot {
    state: AtomicU8,
    thread: Thread,
}

impl ParkSlot {
    /// Creates a park slot for the calling thread.
    pub(crate) fn new() -> Self {
        ParkSlot {
            state: AtomicU8::new(EMPTY),
            thread: thread::current(),
        }
    }

    /// Blocks the calling thread until [`ParkSlot::wake`] is called, then
    /// returns the token it was woken with.
    ///
    /// Must only be called by the thread that created this `ParkSlot`.
    pub(crate) fn park(&self) -> WakeToken {
        loop {
            match self.state.load(Ordering::Acquire) {
                EMPTY => thread::park(),
                DELIVERED => return WakeToken::Delivered,
                CLOSED => return WakeToken::Closed,
                other => unreachable!("park slot in impossible state {}", other),
            }
        }
    }

    /// Delivers a token to the parked thread and unparks it.
    ///
    /// Calling this more than once on the same slot is a logic error in this
    /// crate (it would mean two counterparties both believed they had won
    /// the hand-off) and is guarded against by [`crate::waiter::WaiterQueue`]
    /// rather than by this type.
    pub(crate) fn wake(&self, token: WakeToken) {
        let raw = match token {
            WakeToken::Delivered => DELIVERED,
            WakeToken::Closed => CLOSED,
        };
        debug_assert_eq!(
            self.state.swap(raw, Ordering::Release),
            EMPTY,
            "park slot woken twice"
        );
        self.thread.unpark();
    }
}
