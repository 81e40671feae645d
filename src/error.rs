//! Error types for this crate.
//!
//! These cover the two *recoverable* user errors the spec's error taxonomy
//! names (send-on-closed, close-of-closed). The third kind, spurious
//! wakeup, is an internal invariant violation and is never represented as a
//! value — it panics, the same way the teacher crate panics on an
//! unexpected atomic state ("Please report this error.").

use std::error::Error;
use std::fmt;

/// Returned by [`crate::chan::Chan::send`] and
/// [`crate::chan::Chan::try_send`] when the channel is closed.
///
/// Carries the value back, mirroring `std::sync::mpsc::SendError`, so a
/// failed send never silently drops the caller's data.
pub struct SendError<T>(pub T);

impl<T> SendError<T> {
    /// Consumes the error, returning the value that could not be sent.
    pub fn into_inner(self) -> T {
        self.0
    }
}

impl<T> fmt::Debug for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("SendError(..)")
    }
}

impl<T> fmt::Display for SendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("send on closed channel")
    }
}

impl<T> Error for SendError<T> {}

/// Returned by [`crate::chan::Chan::close`] when the channel was already
/// closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CloseError;

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("close of closed channel")
    }
}

impl Error for CloseError {}

/// The result of a blocking [`crate::chan::Chan::recv`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecvOutcome<T> {
    /// A value was received.
    Msg(T),
    /// The channel is closed and its buffer is empty; no more values will
    /// ever arrive.
    Closed,
}

impl<T> RecvOutcome<T> {
    /// Returns the received value, panicking if the channel was closed.
    pub fn unwrap(self) -> T {
        match self {
            RecvOutcome::Msg(v) => v,
            RecvOutcome::Closed => panic!("called `RecvOutcome::unwrap()` on a `Closed` value"),
        }
    }

    /// Converts into a plain `Option`, discarding the distinction between
    /// "closed" and a hypothetical future variant.
    pub fn into_option(self) -> Option<T> {
        match self {
            RecvOutcome::Msg(v) => Some(v),
            RecvOutcome::Closed => None,
        }
    }
}
