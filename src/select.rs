//! Multi-way `select` over a mixture of send and recv cases.
//!
//! This follows the same three-pass shape as Go's `runtime.selectgo`: poll
//! every case in a random order while holding all their locks at once
//! (pass 1), and only if none are ready, park a waiter on every case and
//! block (pass 2), then on waking, re-lock everything to find out which
//! case actually won and to unregister the rest (pass 3). The random poll
//! order is what gives every ready case an equal chance of being picked
//! when several are ready simultaneously; the lock order (channels sorted
//! by id) is what lets `select` hold N locks at once without ever risking
//! a deadlock against another concurrent `select`.

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use rand::seq::SliceRandom;

use crate::chan::{try_recv_locked, try_send_locked, Chan, RecvAttempt, SendAttempt};
use crate::error::RecvOutcome;
use crate::park::{ParkSlot, WakeToken};
use crate::waiter::Waiter;

/// What happened when a case was polled while its channel's lock was held.
#[doc(hidden)]
pub enum PollResult {
    /// The case completed; its result is stashed inside the case itself.
    Completed,
    Closed,
    WouldBlock,
}

/// One arm of a [`select`] call.
///
/// Built with [`recv`] or [`send`]; not meant to be implemented outside this
/// crate (every method takes a raw lock token on faith that `select` is the
/// only caller sequencing them correctly).
pub trait SelectCase<R> {
    #[doc(hidden)]
    fn chan_id(&self) -> u64;
    #[doc(hidden)]
    fn lock_raw(&self);
    #[doc(hidden)]
    unsafe fn unlock_raw(&self);
    #[doc(hidden)]
    fn poll_locked(&mut self) -> PollResult;
    #[doc(hidden)]
    fn enqueue_locked(&mut self, select_done: &Arc<AtomicBool>, park: &Arc<ParkSlot>);
    #[doc(hidden)]
    fn cleanup_locked(&mut self);
    #[doc(hidden)]
    fn is_winner(&self) -> bool;
    #[doc(hidden)]
    fn run(self: Box<Self>) -> R;
}

struct RecvCase<'a, T, R> {
    chan: Chan<T>,
    handler: Option<Box<dyn FnOnce(RecvOutcome<T>) -> R + 'a>>,
    result: Option<RecvOutcome<T>>,
    waiter: Option<Arc<Waiter<T>>>,
}

impl<'a, T: Send, R> SelectCase<R> for RecvCase<'a, T, R> {
    fn chan_id(&self) -> u64 {
        self.chan.id()
    }

    fn lock_raw(&self) {
        self.chan.inner.lock_raw()
    }

    unsafe fn unlock_raw(&self) {
        self.chan.inner.unlock_raw()
    }

    fn poll_locked(&mut self) -> PollResult {
        let state = unsafe { self.chan.inner.state_mut() };
        match try_recv_locked(self.chan.inner.capacity, state) {
            RecvAttempt::Msg(v) => {
                self.result = Some(RecvOutcome::Msg(v));
                PollResult::Completed
            }
            RecvAttempt::Closed => {
                self.result = Some(RecvOutcome::Closed);
                PollResult::Completed
            }
            RecvAttempt::WouldBlock => PollResult::WouldBlock,
        }
    }

    fn enqueue_locked(&mut self, select_done: &Arc<AtomicBool>, park: &Arc<ParkSlot>) {
        let w = Arc::new(Waiter::new_recv(park.clone(), Some(select_done.clone())));
        let state = unsafe { self.chan.inner.state_mut() };
        state.recv_q.enqueue(w.clone());
        self.waiter = Some(w);
    }

    fn cleanup_locked(&mut self) {
        if let Some(w) = &self.waiter {
            let state = unsafe { self.chan.inner.state_mut() };
            state.recv_q.remove(w);
        }
    }

    fn is_winner(&self) -> bool {
        self.waiter.as_ref().map_or(false, |w| w.was_claimed())
    }

    fn run(mut self: Box<Self>) -> R {
        let outcome = match self.result.take() {
            Some(outcome) => outcome,
            None => {
                // Woken as the winner rather than completed in pass 1: the
                // hand-off's sender already wrote into our own slot before
                // waking us.
                let w = self.waiter.take().expect("winning recv case has no waiter");
                let v = unsafe { w.take() }.expect("delivered recv waiter should hold a value");
                RecvOutcome::Msg(v)
            }
        };
        (self.handler.take().expect("recv case run twice"))(outcome)
    }
}

struct SendCase<'a, T, R> {
    chan: Chan<T>,
    val: Option<T>,
    handler: Option<Box<dyn FnOnce() -> R + 'a>>,
    waiter: Option<Arc<Waiter<T>>>,
}

impl<'a, T: Send, R> SelectCase<R> for SendCase<'a, T, R> {
    fn chan_id(&self) -> u64 {
        self.chan.id()
    }

    fn lock_raw(&self) {
        self.chan.inner.lock_raw()
    }

    unsafe fn unlock_raw(&self) {
        self.chan.inner.unlock_raw()
    }

    fn poll_locked(&mut self) -> PollResult {
        let val = self.val.take().expect("send case polled twice");
        let state = unsafe { self.chan.inner.state_mut() };
        match try_send_locked(self.chan.inner.capacity, state, val) {
            SendAttempt::Sent => PollResult::Completed,
            SendAttempt::Closed(_) => PollResult::Closed,
            SendAttempt::WouldBlock(val) => {
                self.val = Some(val);
                PollResult::WouldBlock
            }
        }
    }

    fn enqueue_locked(&mut self, select_done: &Arc<AtomicBool>, park: &Arc<ParkSlot>) {
        let val = self.val.take().expect("send case has no value to offer");
        let w = Arc::new(Waiter::new_send(val, park.clone(), Some(select_done.clone())));
        let state = unsafe { self.chan.inner.state_mut() };
        state.send_q.enqueue(w.clone());
        self.waiter = Some(w);
    }

    fn cleanup_locked(&mut self) {
        if let Some(w) = &self.waiter {
            let state = unsafe { self.chan.inner.state_mut() };
            state.send_q.remove(w);
        }
    }

    fn is_winner(&self) -> bool {
        self.waiter.as_ref().map_or(false, |w| w.was_claimed())
    }

    fn run(mut self: Box<Self>) -> R {
        (self.handler.take().expect("send case run twice"))()
    }
}

/// Builds a recv case for [`select`]: if `chan` yields a value (or closes)
/// while this select runs, `on_recv` is called with the outcome and its
/// result becomes `select`'s return value.
pub fn recv<'a, T, R>(
    chan: &Chan<T>,
    on_recv: impl FnOnce(RecvOutcome<T>) -> R + 'a,
) -> Box<dyn SelectCase<R> + 'a>
where
    T: Send + 'a,
    R: 'a,
{
    Box::new(RecvCase {
        chan: chan.clone(),
        handler: Some(Box::new(on_recv)),
        result: None,
        waiter: None,
    })
}

/// Builds a send case for [`select`]: if `val` is delivered (directly to a
/// receiver, or into the buffer) while this select runs, `on_sent` is
/// called and its result becomes `select`'s return value.
///
/// # Panics
/// If `chan` is observed closed while this select is resolving this case,
/// `select` panics — the same way an unconditional [`crate::chan::Chan::send`]
/// on a closed channel would, except `select`'s single `R` return type
/// leaves no room to carry a [`crate::error::SendError`] back out.
pub fn send<'a, T, R>(
    chan: &Chan<T>,
    val: T,
    on_sent: impl FnOnce() -> R + 'a,
) -> Box<dyn SelectCase<R> + 'a>
where
    T: Send + 'a,
    R: 'a,
{
    Box::new(SendCase {
        chan: chan.clone(),
        val: Some(val),
        handler: Some(Box::new(on_sent)),
        waiter: None,
    })
}

/// Locks every distinct channel referenced by `cases`, in `lock_order`,
/// skipping repeats (two cases on the same channel must lock it only once).
fn lock_all<R>(lock_order: &[usize], cases: &[Box<dyn SelectCase<R> + '_>]) {
    let mut last_id = None;
    for &i in lock_order {
        let id = cases[i].chan_id();
        if last_id == Some(id) {
            continue;
        }
        cases[i].lock_raw();
        last_id = Some(id);
    }
}

/// Unlocks everything `lock_all` locked, in reverse order.
fn unlock_all<R>(lock_order: &[usize], cases: &[Box<dyn SelectCase<R> + '_>]) {
    let mut last_id = None;
    for &i in lock_order.iter().rev() {
        let id = cases[i].chan_id();
        if last_id == Some(id) {
            continue;
        }
        unsafe { cases[i].unlock_raw() };
        last_id = Some(id);
    }
}

/// Blocks until exactly one of `cases` completes, then runs and returns
/// that case's handler.
///
/// If `default` is given, `select` never blocks: when no case is ready on
/// the first pass, `default` runs immediately instead of a case's handler.
///
/// Cases are polled in a random order each pass, so when several are ready
/// at once every one of them has an equal chance of being picked — no case
/// is structurally favoured by its position in `cases`. Locks across the
/// distinct channels involved are always acquired in ascending channel-id
/// order (regardless of poll order), which is what lets two overlapping
/// `select` calls never deadlock against each other.
///
/// # Panics
/// If a send case's channel is observed closed, or if `cases` is empty and
/// no `default` is given.
pub fn select<'a, R>(
    mut cases: Vec<Box<dyn SelectCase<R> + 'a>>,
    default: Option<Box<dyn FnOnce() -> R + 'a>>,
) -> R {
    if cases.is_empty() {
        return match default {
            Some(d) => d(),
            None => panic!("select called with no cases and no default"),
        };
    }

    let mut default = default;
    let mut lock_order: Vec<usize> = (0..cases.len()).collect();
    lock_order.sort_by_key(|&i| cases[i].chan_id());

    loop {
        let mut poll_order: Vec<usize> = (0..cases.len()).collect();
        poll_order.shuffle(&mut rand::thread_rng());

        lock_all(&lock_order, &cases);

        let mut winner = None;
        let mut send_closed = false;
        for &i in &poll_order {
            match cases[i].poll_locked() {
                PollResult::Completed => {
                    winner = Some(i);
                    break;
                }
                PollResult::Closed => {
                    send_closed = true;
                    break;
                }
                PollResult::WouldBlock => {}
            }
        }

        if send_closed {
            unlock_all(&lock_order, &cases);
            panic!("select: send on closed channel");
        }

        if let Some(i) = winner {
            unlock_all(&lock_order, &cases);
            log::trace!("select: case {} ready without blocking", i);
            return cases.remove(i).run();
        }

        if let Some(d) = default.take() {
            unlock_all(&lock_order, &cases);
            return d();
        }

        // Pass 2: no case is ready and there's no default, so park on all
        // of them at once, sharing one `select_done` flag and one park
        // slot. Whichever counterparty calls `Waiter::claim` first across
        // every one of these channels' queues wins; every other waiter
        // becomes a ghost the next time its queue is drained.
        let select_done = Arc::new(AtomicBool::new(false));
        let park = Arc::new(ParkSlot::new());
        for &i in &lock_order {
            cases[i].enqueue_locked(&select_done, &park);
        }
        unlock_all(&lock_order, &cases);

        let token = park.park();

        // Pass 3: re-lock to unregister every case's waiter before doing
        // anything else, whether or not it turned out to be the winner.
        lock_all(&lock_order, &cases);
        for &i in &lock_order {
            cases[i].cleanup_locked();
        }
        unlock_all(&lock_order, &cases);

        match token {
            WakeToken::Delivered => {
                let i = cases
                    .iter()
                    .position(|c| c.is_winner())
                    .expect("select woken with Delivered but no case claims the win");
                log::trace!("select: case {} won after parking", i);
                return cases.remove(i).run();
            }
            WakeToken::Closed => {
                // One of our channels closed while we were parked, but it
                // wasn't necessarily the channel that matters for a win —
                // loop back and re-poll everything from scratch.
                continue;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::chan::make;
    use std::thread;
    use std::time::Duration;

    #[test]
    fn picks_the_only_ready_case() {
        let a: Chan<i32> = make(1);
        let b: Chan<i32> = make(1);
        a.send(1).unwrap();
        let got = select(
            vec![
                recv(&a, |v| ("a", v)),
                recv(&b, |v| ("b", v)),
            ],
            None,
        );
        assert_eq!(got, ("a", RecvOutcome::Msg(1)));
    }

    #[test]
    fn default_fires_when_nothing_ready() {
        let a: Chan<i32> = make(1);
        let got = select(vec![recv(&a, |v| v)], Some(Box::new(|| RecvOutcome::Closed)));
        assert_eq!(got, RecvOutcome::Closed);
    }

    #[test]
    fn blocks_until_a_case_becomes_ready() {
        let a: Chan<i32> = make(0);
        let a2 = a.clone();
        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a2.send(5).unwrap();
        });
        let got = select(vec![recv(&a, |v| v)], None);
        assert_eq!(got, RecvOutcome::Msg(5));
        th.join().unwrap();
    }

    #[test]
    fn send_case_completes_via_waiting_receiver() {
        let a: Chan<i32> = make(0);
        let a2 = a.clone();
        let th = thread::spawn(move || a2.recv());
        thread::sleep(Duration::from_millis(20));
        let got = select(vec![send(&a, 7, || "sent")], None);
        assert_eq!(got, "sent");
        assert_eq!(th.join().unwrap(), RecvOutcome::Msg(7));
    }

    #[test]
    fn wakes_with_closed_when_channel_closes_while_parked() {
        let a: Chan<i32> = make(0);
        let a2 = a.clone();
        let th = thread::spawn(move || {
            thread::sleep(Duration::from_millis(20));
            a2.close().unwrap();
        });
        let got = select(vec![recv(&a, |v| v)], None);
        assert_eq!(got, RecvOutcome::Closed);
        th.join().unwrap();
    }

    #[test]
    fn exactly_one_case_runs_among_two_ready() {
        let a: Chan<i32> = make(1);
        let b: Chan<i32> = make(1);
        a.send(1).unwrap();
        b.send(2).unwrap();
        let got = select(vec![recv(&a, |_| 'a'), recv(&b, |_| 'b')], None);
        assert!(got == 'a' || got == 'b');
        // Whichever case didn't run left its channel untouched.
        if got == 'a' {
            assert_eq!(b.try_recv(), Some(RecvOutcome::Msg(2)));
        } else {
            assert_eq!(a.try_recv(), Some(RecvOutcome::Msg(1)));
        }
    }

    #[test]
    #[should_panic(expected = "send on closed channel")]
    fn send_on_closed_channel_panics() {
        let a: Chan<i32> = make(0);
        a.close().unwrap();
        select(vec![send(&a, 1, || ())], None);
    }

    #[test]
    #[should_panic(expected = "no cases and no default")]
    fn empty_select_without_default_panics() {
        select::<()>(vec![], None);
    }
}
