//! Channel and select error types
//!
//! Every failure surfaces synchronously at the failing call; nothing is
//! retried internally. Retry policy (backoff on contention, rebuilding a
//! select) is a caller concern.
//!
//! A receive on a closed, drained channel is NOT an error - it is the `None`
//! terminal signal - so there is no error variant for it.

use std::fmt;

/// Error from a blocking [`Channel::send`](crate::channel::Channel::send).
///
/// The undelivered value is dropped: a sender that was parked no longer owns
/// its value, so the blocking path cannot hand it back. The non-blocking
/// [`TrySendError`] variants do return the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendError {
    /// The channel was closed before the value could be delivered.
    Closed,
}

/// Error from [`Channel::try_send`](crate::channel::Channel::try_send).
///
/// Both variants hand the value back so the caller can retry without cloning.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrySendError<T> {
    /// No buffer space and no waiting receiver right now.
    Full(T),
    /// The channel is closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    /// Recover the value that could not be sent.
    pub fn into_inner(self) -> T {
        match self {
            TrySendError::Full(value) | TrySendError::Closed(value) => value,
        }
    }

    /// True for the [`TrySendError::Closed`] variant.
    pub fn is_closed(&self) -> bool {
        matches!(self, TrySendError::Closed(_))
    }
}

/// Error from [`Channel::try_receive`](crate::channel::Channel::try_receive).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TryRecvError {
    /// Nothing buffered and no sender parked right now.
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

/// Error from [`Channel::close`](crate::channel::Channel::close).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseError {
    /// The channel was already closed. Closing twice is a caller error.
    AlreadyClosed,
}

/// Error from [`Selector::wait`](crate::select::Selector::wait).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectError {
    /// No case is ready and none can ever become ready: every case is a send
    /// on a closed channel (vacuously, an empty case list). Blocking would
    /// hang the strand forever, so the call fails instead.
    Deadlock,
}

impl fmt::Display for SendError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SendError::Closed => write!(f, "send on closed channel"),
        }
    }
}

impl<T> fmt::Display for TrySendError<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TrySendError::Full(_) => write!(f, "channel full, no receiver waiting"),
            TrySendError::Closed(_) => write!(f, "send on closed channel"),
        }
    }
}

impl fmt::Display for TryRecvError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TryRecvError::Empty => write!(f, "channel empty, no sender waiting"),
            TryRecvError::Closed => write!(f, "channel closed and drained"),
        }
    }
}

impl fmt::Display for CloseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CloseError::AlreadyClosed => write!(f, "channel already closed"),
        }
    }
}

impl fmt::Display for SelectError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SelectError::Deadlock => {
                write!(f, "select can never complete: all cases are dead")
            }
        }
    }
}

impl std::error::Error for SendError {}
impl<T: fmt::Debug> std::error::Error for TrySendError<T> {}
impl std::error::Error for TryRecvError {}
impl std::error::Error for CloseError {}
impl std::error::Error for SelectError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_try_send_error_into_inner() {
        assert_eq!(TrySendError::Full(7).into_inner(), 7);
        assert_eq!(TrySendError::Closed("x").into_inner(), "x");
    }

    #[test]
    fn test_try_send_error_is_closed() {
        assert!(TrySendError::Closed(0).is_closed());
        assert!(!TrySendError::Full(0).is_closed());
    }

    #[test]
    fn test_display_messages_name_the_condition() {
        assert_eq!(SendError::Closed.to_string(), "send on closed channel");
        assert_eq!(CloseError::AlreadyClosed.to_string(), "channel already closed");
        assert_eq!(TryRecvError::Empty.to_string(), "channel empty, no sender waiting");
        assert!(SelectError::Deadlock.to_string().contains("dead"));
    }
}
