//! The channel itself: bounded buffer, paired waiter queues, single-op
//! send/recv/close.
//!
//! A [`Chan<T>`] is a cheap, cloneable handle — `Arc<Inner<T>>` under the
//! hood — exactly like a Go channel value: there is no separate sender or
//! receiver type, any handle can send, receive, or close.

use std::collections::VecDeque;
use std::fmt;
use std::mem;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{CloseError, RecvOutcome, SendError};
use crate::id::next_chan_id;
use crate::park::{ParkSlot, WakeToken};
use crate::waiter::{Waiter, WaiterQueue};

/// The mutable state guarded by a channel's lock.
pub(crate) struct ChanState<T> {
    pub(crate) buf: VecDeque<T>,
    pub(crate) send_q: WaiterQueue<T>,
    pub(crate) recv_q: WaiterQueue<T>,
    pub(crate) closed: bool,
}

/// Shared channel state. Reachable only through a [`Chan<T>`] handle.
pub(crate) struct Inner<T> {
    pub(crate) id: u64,
    pub(crate) capacity: usize,
    // Fast-path mirrors of the locked state, so `try_send`/`try_recv` can
    // often avoid locking at all when the outcome is obviously "would
    // block". Always written (with `Release`) at the end of a locked
    // critical section that changes the corresponding field, and read (with
    // `Acquire`) before the lock is taken.
    closed_mirror: AtomicBool,
    qcount_mirror: AtomicUsize,
    send_q_nonempty: AtomicBool,
    recv_q_nonempty: AtomicBool,
    state: Mutex<ChanState<T>>,
}

impl<T> Inner<T> {
    fn sync_mirrors(&self, state: &ChanState<T>) {
        self.closed_mirror.store(state.closed, Ordering::Release);
        self.qcount_mirror.store(state.buf.len(), Ordering::Release);
        self.send_q_nonempty
            .store(!state.send_q.is_empty(), Ordering::Release);
        self.recv_q_nonempty
            .store(!state.recv_q.is_empty(), Ordering::Release);
    }

    /// Locks the channel and runs `f`, syncing the fast-path mirrors
    /// afterwards.
    pub(crate) fn with_locked<R>(&self, f: impl FnOnce(&mut ChanState<T>) -> R) -> R {
        let mut guard = self.state.lock();
        let r = f(&mut guard);
        self.sync_mirrors(&guard);
        r
    }

    /// Acquires the lock without producing a guard, for use by the select
    /// engine, which must hold locks on several channels at once in an
    /// order it computes itself (so it cannot simply nest scoped guards).
    /// `data_ptr`/`force_unlock` are exactly the escape hatch `parking_lot`
    /// documents for this "manual lock/unlock, decoupled from a guard's
    /// lifetime" use case (the same trick its own condvar support is built
    /// on).
    pub(crate) fn lock_raw(&self) {
        let guard = self.state.lock();
        mem::forget(guard);
    }

    /// # Safety
    /// Must be paired 1:1 with a prior [`Inner::lock_raw`] call on this
    /// same `Inner`, with no other unlock of the same acquisition in
    /// between.
    pub(crate) unsafe fn unlock_raw(&self) {
        self.sync_mirrors(&*self.state.data_ptr());
        self.state.force_unlock();
    }

    /// # Safety
    /// Must only be called while a `lock_raw`/`unlock_raw` pair (or an
    /// ordinary `state.lock()` guard) is held by the calling thread.
    pub(crate) unsafe fn state_mut(&self) -> &mut ChanState<T> {
        &mut *self.state.data_ptr()
    }
}

/// A bounded, multi-producer multi-consumer channel handle.
///
/// Cloning a `Chan` is cheap (an `Arc` bump) and yields another handle to
/// the *same* underlying channel — there is no sender/receiver split.
/// `capacity == 0` makes the channel a synchronous rendezvous: `send`
/// blocks until a `recv` is ready to take the value directly.
pub struct Chan<T> {
    pub(crate) inner: Arc<Inner<T>>,
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Chan {
            inner: self.inner.clone(),
        }
    }
}

impl<T> fmt::Debug for Chan<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Chan")
            .field("id", &self.inner.id)
            .field("capacity", &self.inner.capacity)
            .finish()
    }
}

/// Creates a new channel with the given capacity. A capacity of `0` creates
/// an unbuffered (synchronous rendezvous) channel.
pub fn make<T>(capacity: usize) -> Chan<T> {
    let id = next_chan_id();
    log::trace!("chan {}: created with capacity {}", id, capacity);
    Chan {
        inner: Arc::new(Inner {
            id,
            capacity,
            closed_mirror: AtomicBool::new(false),
            qcount_mirror: AtomicUsize::new(0),
            send_q_nonempty: AtomicBool::new(false),
            recv_q_nonempty: AtomicBool::new(false),
            state: Mutex::new(ChanState {
                buf: VecDeque::with_capacity(capacity),
                send_q: WaiterQueue::new(),
                recv_q: WaiterQueue::new(),
                closed: false,
            }),
        }),
    }
}

/// Outcome of attempting a send while already holding the channel's lock.
pub(crate) enum SendAttempt<T> {
    Sent,
    Closed(T),
    WouldBlock(T),
}

/// Outcome of attempting a recv while already holding the channel's lock.
pub(crate) enum RecvAttempt<T> {
    Msg(T),
    Closed,
    WouldBlock,
}

/// Outcome of the blocking `send`'s single locked critical section: either
/// the value is already gone (delivered or rejected), or it parked and the
/// caller must wait on `park`.
enum SendSlow<T> {
    Sent,
    Closed(T),
    Parked(Arc<Waiter<T>>),
}

/// Outcome of the blocking `recv`'s single locked critical section.
enum RecvSlow<T> {
    Msg(T),
    Closed,
    Parked(Arc<Waiter<T>>),
}

/// The send half of the slow-path algorithm (spec §4.D steps 1-3), shared
/// by `send`, `try_send`, and the select engine's send-case poll.
pub(crate) fn try_send_locked<T>(capacity: usize, state: &mut ChanState<T>, val: T) -> SendAttempt<T> {
    if state.closed {
        return SendAttempt::Closed(val);
    }
    if let Some(w) = state.recv_q.dequeue() {
        // Direct hand-off: write the value into the parked receiver's slot,
        // then wake it. `send_q` invariantly holds only recv waiters, so
        // this is never a send waiter woken as a receiver.
        unsafe { w.put(val) };
        w.wake(WakeToken::Delivered);
        return SendAttempt::Sent;
    }
    if state.buf.len() < capacity {
        state.buf.push_back(val);
        return SendAttempt::Sent;
    }
    SendAttempt::WouldBlock(val)
}

/// The recv half of the slow-path algorithm (spec §4.E steps 1-3), shared
/// by `recv`, `try_recv`, and the select engine's recv-case poll.
pub(crate) fn try_recv_locked<T>(capacity: usize, state: &mut ChanState<T>) -> RecvAttempt<T> {
    if state.closed && state.buf.is_empty() {
        return RecvAttempt::Closed;
    }
    if let Some(w) = state.send_q.dequeue() {
        let val = if capacity == 0 {
            // Unbuffered: never touch `buf`.
            unsafe { w.take() }.expect("send waiter missing its value")
        } else {
            // A sender only ever parks when the buffer is full (channel
            // invariant), so there is always a front item to hand to the
            // receiver while the sender's value takes its place at the back.
            let front = state
                .buf
                .pop_front()
                .expect("buffer must be full when a sender is parked");
            let incoming = unsafe { w.take() }.expect("send waiter missing its value");
            state.buf.push_back(incoming);
            front
        };
        w.wake(WakeToken::Delivered);
        return RecvAttempt::Msg(val);
    }
    if let Some(val) = state.buf.pop_front() {
        return RecvAttempt::Msg(val);
    }
    RecvAttempt::WouldBlock
}

impl<T> Chan<T> {
    /// This channel's stable identifier, used only to order lock
    /// acquisition in [`crate::select`].
    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// The channel's fixed capacity (`0` for a synchronous rendezvous).
    pub fn capacity(&self) -> usize {
        self.inner.capacity
    }

    /// Sends `val`, blocking until it is delivered (to a waiting receiver,
    /// or into the buffer).
    ///
    /// # Errors
    /// Fails with [`SendError`], returning `val`, if the channel is closed
    /// (either already closed, or closed while this call was parked).
    pub fn send(&self, val: T) -> Result<(), SendError<T>> {
        let inner = &*self.inner;
        let park = Arc::new(ParkSlot::new());

        // The whole decide-or-park decision runs inside one locked critical
        // section, so a racing `recv` or `close` can never land in the gap
        // between "would block" and "enqueued" — there is no such gap.
        let slow = inner.with_locked(|state| match try_send_locked(inner.capacity, state, val) {
            SendAttempt::Sent => SendSlow::Sent,
            SendAttempt::Closed(val) => SendSlow::Closed(val),
            SendAttempt::WouldBlock(val) => {
                let waiter = Arc::new(Waiter::new_send(val, park.clone(), None));
                state.send_q.enqueue(waiter.clone());
                SendSlow::Parked(waiter)
            }
        });

        let waiter = match slow {
            SendSlow::Sent => {
                log::trace!("chan {}: send completed without blocking", inner.id);
                return Ok(());
            }
            SendSlow::Closed(val) => return Err(SendError(val)),
            SendSlow::Parked(waiter) => waiter,
        };

        log::trace!("chan {}: send parked (waiter {})", inner.id, waiter.sid);
        match park.park() {
            WakeToken::Delivered => Ok(()),
            WakeToken::Closed => {
                // The value never left the waiter's slot (the channel
                // closed before anyone dequeued it), so hand it back.
                let val = unsafe { waiter.take() }
                    .expect("closed send waiter should still hold its value");
                Err(SendError(val))
            }
        }
    }

    /// Attempts to send `val` without blocking.
    ///
    /// Returns `Ok(true)` if delivered, `Ok(false)` if the channel has no
    /// room right now, and `Err` if the channel is closed.
    pub fn try_send(&self, val: T) -> Result<bool, SendError<T>> {
        let inner = &*self.inner;

        // Fast path: if the mirrors clearly show "would block", skip the
        // lock entirely. Read order matches spec §4.D: recv_q head, then
        // qcount, then closed need not be re-read here since `with_locked`
        // always re-validates definitively below when we don't bail out.
        let recv_waiting = inner.recv_q_nonempty.load(Ordering::Acquire);
        let qcount = inner.qcount_mirror.load(Ordering::Acquire);
        let closed = inner.closed_mirror.load(Ordering::Acquire);
        if !closed {
            let would_block = if inner.capacity == 0 {
                !recv_waiting
            } else {
                qcount >= inner.capacity
            };
            if would_block {
                log::trace!("chan {}: try_send fast-path would block", inner.id);
                return Ok(false);
            }
        }

        match inner.with_locked(|state| try_send_locked(inner.capacity, state, val)) {
            SendAttempt::Sent => Ok(true),
            SendAttempt::Closed(val) => Err(SendError(val)),
            SendAttempt::WouldBlock(_) => Ok(false),
        }
    }

    /// Receives a value, blocking until one is available or the channel is
    /// closed.
    pub fn recv(&self) -> RecvOutcome<T> {
        let inner = &*self.inner;
        let park = Arc::new(ParkSlot::new());

        // Same reasoning as `send`: decide-and-park is one locked critical
        // section, so a racing `send` or `close` can't slip into the gap
        // between "would block" and "enqueued".
        let slow = inner.with_locked(|state| match try_recv_locked(inner.capacity, state) {
            RecvAttempt::Msg(v) => RecvSlow::Msg(v),
            RecvAttempt::Closed => RecvSlow::Closed,
            RecvAttempt::WouldBlock => {
                let waiter = Arc::new(Waiter::new_recv(park.clone(), None));
                state.recv_q.enqueue(waiter.clone());
                RecvSlow::Parked(waiter)
            }
        });

        let waiter = match slow {
            RecvSlow::Msg(v) => return RecvOutcome::Msg(v),
            RecvSlow::Closed => return RecvOutcome::Closed,
            RecvSlow::Parked(waiter) => waiter,
        };

        log::trace!("chan {}: recv parked (waiter {})", inner.id, waiter.sid);
        match park.park() {
            WakeToken::Delivered => {
                let val = unsafe { waiter.take() }
                    .expect("delivered recv waiter should hold a value");
                RecvOutcome::Msg(val)
            }
            WakeToken::Closed => RecvOutcome::Closed,
        }
    }

    /// Attempts to receive a value without blocking.
    ///
    /// Returns `None` if the channel is empty and open, `Some(Msg(v))` if a
    /// value was available, and `Some(Closed)` if the channel is closed and
    /// drained.
    pub fn try_recv(&self) -> Option<RecvOutcome<T>> {
        let inner = &*self.inner;

        // Fast path, read order per spec §4.E: send_q head, qcount, closed.
        let send_waiting = inner.send_q_nonempty.load(Ordering::Acquire);
        let qcount = inner.qcount_mirror.load(Ordering::Acquire);
        let closed = inner.closed_mirror.load(Ordering::Acquire);
        if !closed {
            let would_block = if inner.capacity == 0 {
                !send_waiting
            } else {
                qcount == 0 && !send_waiting
            };
            if would_block {
                log::trace!("chan {}: try_recv fast-path would block", inner.id);
                return None;
            }
        }

        match inner.with_locked(|state| try_recv_locked(inner.capacity, state)) {
            RecvAttempt::Msg(v) => Some(RecvOutcome::Msg(v)),
            RecvAttempt::Closed => Some(RecvOutcome::Closed),
            RecvAttempt::WouldBlock => None,
        }
    }

    /// Closes the channel, waking every parked sender and receiver with a
    /// "closed" signal.
    ///
    /// # Errors
    /// Fails with [`CloseError`] if the channel was already closed.
    pub fn close(&self) -> Result<(), CloseError> {
        let inner = &*self.inner;
        let drained = inner.with_locked(|state| {
            if state.closed {
                return None;
            }
            state.closed = true;
            let mut all = state.send_q.drain_all();
            all.extend(state.recv_q.drain_all());
            Some(all)
        });

        let drained = match drained {
            Some(d) => d,
            None => return Err(CloseError),
        };

        log::debug!(
            "chan {}: closed, waking {} parked waiter(s)",
            inner.id,
            drained.len()
        );
        // Woken outside the lock: draining first bounds the critical
        // section and avoids any chance of an unparked thread reacquiring
        // this same lock while we still hold it. `drain_all` has already
        // filtered out ghosts (select waiters whose sibling elsewhere won
        // the claim), so every waiter reaching here is genuinely ours to
        // wake.
        for w in drained {
            w.wake(WakeToken::Closed);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn unbuffered_rendezvous() {
        let c: Chan<i32> = make(0);
        let c2 = c.clone();
        let th = thread::spawn(move || c2.send(42).unwrap());
        assert_eq!(c.recv(), RecvOutcome::Msg(42));
        th.join().unwrap();
    }

    #[test]
    fn buffered_fifo() {
        let c: Chan<i32> = make(2);
        c.send(1).unwrap();
        c.send(2).unwrap();
        assert_eq!(c.recv(), RecvOutcome::Msg(1));
        assert_eq!(c.recv(), RecvOutcome::Msg(2));
    }

    #[test]
    fn close_drains_buffer_then_reports_closed() {
        let c: Chan<i32> = make(2);
        c.send(10).unwrap();
        c.send(20).unwrap();
        c.close().unwrap();
        assert_eq!(c.recv(), RecvOutcome::Msg(10));
        assert_eq!(c.recv(), RecvOutcome::Msg(20));
        assert_eq!(c.recv(), RecvOutcome::Closed);
        assert_eq!(c.recv(), RecvOutcome::Closed);
    }

    #[test]
    fn try_recv_on_empty_open_channel_would_block() {
        let c: Chan<i32> = make(1);
        assert!(c.try_recv().is_none());
    }

    #[test]
    fn try_send_full_buffer_would_block() {
        let c: Chan<i32> = make(1);
        assert_eq!(c.try_send(1).unwrap(), true);
        assert_eq!(c.try_send(2).unwrap(), false);
    }

    #[test]
    fn double_close_fails() {
        let c: Chan<i32> = make(0);
        c.close().unwrap();
        assert_eq!(c.close(), Err(CloseError));
    }

    #[test]
    fn send_on_closed_fails_and_returns_value() {
        let c: Chan<i32> = make(0);
        c.close().unwrap();
        match c.send(7) {
            Err(SendError(v)) => assert_eq!(v, 7),
            Ok(()) => panic!("send on closed channel must fail"),
        }
    }

    #[test]
    fn close_wakes_blocked_recv() {
        let c: Chan<i32> = make(0);
        let c2 = c.clone();
        let th = thread::spawn(move || c2.recv());
        thread::sleep(Duration::from_millis(20));
        c.close().unwrap();
        assert_eq!(th.join().unwrap(), RecvOutcome::Closed);
    }

    #[test]
    fn close_wakes_blocked_send_with_error() {
        let c: Chan<i32> = make(0);
        let c2 = c.clone();
        let th = thread::spawn(move || c2.send(99));
        thread::sleep(Duration::from_millis(20));
        c.close().unwrap();
        match th.join().unwrap() {
            Err(SendError(v)) => assert_eq!(v, 99),
            Ok(()) => panic!("parked send must fail once the channel is closed"),
        }
    }
}
