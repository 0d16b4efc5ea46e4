//! Channel operations for CSP-style concurrency
//!
//! Channels are the primary communication mechanism between strands. A
//! channel is a single shared handle: clone it and hand one to every party;
//! producers, consumers, and closers are equal peers on the same handle.
//! There is no global registry; the handle is an `Arc` around the channel
//! state, reclaimed when the last handle drops.
//!
//! ## Buffering
//!
//! Capacity 0 is a rendezvous: a send completes only when a receiver takes
//! the value. Capacity > 0 decouples the two sides up to the buffer limit.
//!
//! ## Blocking
//!
//! `send` and `receive` park the calling strand on the channel's condvars.
//! `try_send` and `try_receive` never block; the selector is built on them.
//! Blocked senders form a FIFO (their values queue in arrival order), and
//! blocked receivers hold tickets so wakeup order cannot starve a waiter.
//! Non-blocking receivers may take a value ahead of the ticket line; they
//! compete, they do not stall it.
//!
//! ## Close semantics
//!
//! `close` is one-shot; a second close is a caller error. Parked senders
//! whose values were not yet accepted fail and their values are dropped.
//! Buffered values remain receivable in FIFO order, after which receives
//! return `None`.

use crate::error::{CloseError, SendError, TryRecvError, TrySendError};
use crate::select::SelectWaker;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard};
use tracing::{debug, trace};

// Message statistics across all channels (for the at-exit report)
//
// Lock-free atomic increments on the send/receive hot paths. "Sent" counts
// values accepted for delivery: buffered directly, or taken from a parked
// sender's queue slot. Values retracted by close are never counted.
pub static TOTAL_MESSAGES_SENT: AtomicU64 = AtomicU64::new(0);
pub static TOTAL_MESSAGES_RECEIVED: AtomicU64 = AtomicU64::new(0);

/// Channel state guarded by the one per-channel mutex.
struct Inner<T> {
    /// Committed values, oldest first. Stays within `capacity` except for
    /// handoff deposits made for parked receivers (see `deposit_allowed`).
    buffer: VecDeque<T>,
    /// Values of parked senders, oldest first. A value leaves this queue
    /// only by being accepted (delivered or buffered) or retracted by close.
    pending: VecDeque<T>,
    /// Monotonic, false -> true only.
    closed: bool,
    /// Total values ever enqueued into `pending`; a parked sender's ticket.
    pending_enqueued: u64,
    /// Values from `pending` that were accepted. A sender with ticket `t`
    /// has completed once `pending_accepted > t`.
    pending_accepted: u64,
    /// Receiver FIFO line: next ticket to hand out / ticket at the head.
    recv_next_ticket: u64,
    recv_serving: u64,
    /// Receivers currently parked in the ticket line.
    recv_waiting: usize,
    /// Wakers registered by blocked selectors; notified on every mutation.
    waiters: Vec<Arc<SelectWaker>>,
}

struct Shared<T> {
    capacity: usize,
    inner: Mutex<Inner<T>>,
    /// Receivers park here waiting for a value (or close).
    recv_cv: Condvar,
    /// Parked senders wait here for acceptance (or retraction).
    send_cv: Condvar,
}

/// A typed, thread-safe conduit between strands.
///
/// Cloning the handle shares the same channel; all clones are equal peers
/// for sending, receiving, and closing.
pub struct Channel<T> {
    shared: Arc<Shared<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> Channel<T> {
    /// Create a channel with the given buffer capacity.
    ///
    /// Capacity 0 creates a rendezvous channel: every send must pair with a
    /// receiver. Always succeeds; capacity is fixed for the channel's life.
    pub fn new(capacity: usize) -> Self {
        debug!(capacity, "channel created");
        Self {
            shared: Arc::new(Shared {
                capacity,
                inner: Mutex::new(Inner {
                    buffer: VecDeque::with_capacity(capacity),
                    pending: VecDeque::new(),
                    closed: false,
                    pending_enqueued: 0,
                    pending_accepted: 0,
                    recv_next_ticket: 0,
                    recv_serving: 0,
                    recv_waiting: 0,
                    waiters: Vec::new(),
                }),
                recv_cv: Condvar::new(),
                send_cv: Condvar::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner<T>> {
        self.shared
            .inner
            .lock()
            .expect("channel mutex poisoned - a strand panicked inside a channel operation")
    }

    /// Buffer capacity this channel was created with (0 = rendezvous).
    pub fn capacity(&self) -> usize {
        self.shared.capacity
    }

    /// Number of values currently buffered (parked senders not included).
    pub fn len(&self) -> usize {
        self.lock().buffer.len()
    }

    /// True when no value is buffered.
    pub fn is_empty(&self) -> bool {
        self.lock().buffer.is_empty()
    }

    /// True once `close` has been called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Send a value, blocking until it is accepted for delivery.
    ///
    /// With buffer space free the value is buffered and the call returns.
    /// Otherwise the sender parks behind every earlier blocked send and
    /// completes when its value is handed to a receiver (rendezvous) or
    /// moved into freed buffer space. Fails with [`SendError::Closed`] if
    /// the channel is closed before acceptance; the value is then dropped,
    /// not delivered.
    pub fn send(&self, value: T) -> Result<(), SendError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(SendError::Closed);
        }

        if inner.pending.is_empty() && inner.buffer.len() < self.shared.capacity {
            inner.buffer.push_back(value);
            TOTAL_MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
            trace!(len = inner.buffer.len(), "send: buffered");
            self.shared.recv_cv.notify_all();
            notify_select_waiters(&inner);
            return Ok(());
        }

        // Park: the value queues behind every earlier blocked send and is
        // now visible to receivers (and selectors) as handoff material.
        let ticket = inner.pending_enqueued;
        inner.pending_enqueued += 1;
        inner.pending.push_back(value);
        trace!(ticket, "send: parked");
        self.shared.recv_cv.notify_all();
        notify_select_waiters(&inner);

        loop {
            if inner.pending_accepted > ticket {
                return Ok(());
            }
            if inner.closed {
                // Close retracted the whole pending queue, this value with it.
                return Err(SendError::Closed);
            }
            inner = self
                .shared
                .send_cv
                .wait(inner)
                .expect("channel mutex poisoned while a sender was parked");
        }
    }

    /// Send without blocking.
    ///
    /// Succeeds when there is buffer space, or when a parked receiver can be
    /// handed the value directly. Otherwise the value comes back in
    /// [`TrySendError::Full`] (or [`TrySendError::Closed`]).
    pub fn try_send(&self, value: T) -> Result<(), TrySendError<T>> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(TrySendError::Closed(value));
        }
        if !deposit_allowed(&inner, self.shared.capacity) {
            return Err(TrySendError::Full(value));
        }

        inner.buffer.push_back(value);
        TOTAL_MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
        trace!(len = inner.buffer.len(), "try_send: buffered");
        self.shared.recv_cv.notify_all();
        notify_select_waiters(&inner);
        Ok(())
    }

    /// Receive a value, blocking until one is available.
    ///
    /// Returns `None` once the channel is closed and drained - the defined
    /// terminal signal, not an error. Blocked receivers are served in FIFO
    /// ticket order.
    pub fn receive(&self) -> Option<T> {
        let mut inner = self.lock();

        // Fast path: no line, so a waiting value can be taken directly.
        if inner.recv_serving == inner.recv_next_ticket {
            if let Some(value) = take_value(&self.shared, &mut inner) {
                TOTAL_MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
                return Some(value);
            }
            if inner.closed {
                return None;
            }
        }

        let ticket = inner.recv_next_ticket;
        inner.recv_next_ticket += 1;
        inner.recv_waiting += 1;
        trace!(ticket, "receive: parked");
        // A parked receiver makes a handoff deposit possible, so send cases
        // watching this channel may have become ready.
        notify_select_waiters(&inner);

        loop {
            if inner.recv_serving == ticket {
                if let Some(value) = take_value(&self.shared, &mut inner) {
                    inner.recv_serving += 1;
                    inner.recv_waiting -= 1;
                    TOTAL_MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
                    self.shared.recv_cv.notify_all();
                    return Some(value);
                }
                if inner.closed {
                    inner.recv_serving += 1;
                    inner.recv_waiting -= 1;
                    self.shared.recv_cv.notify_all();
                    return None;
                }
            }
            inner = self
                .shared
                .recv_cv
                .wait(inner)
                .expect("channel mutex poisoned while a receiver was parked");
        }
    }

    /// Receive without blocking.
    ///
    /// Takes a buffered value or a parked sender's value if one is waiting.
    /// May take a value ahead of the ticket line; queued receivers keep
    /// their relative order among themselves.
    pub fn try_receive(&self) -> Result<T, TryRecvError> {
        let mut inner = self.lock();
        if let Some(value) = take_value(&self.shared, &mut inner) {
            TOTAL_MESSAGES_RECEIVED.fetch_add(1, Ordering::Relaxed);
            return Ok(value);
        }
        if inner.closed {
            return Err(TryRecvError::Closed);
        }
        Err(TryRecvError::Empty)
    }

    /// Close the channel. One-shot: a second close fails with
    /// [`CloseError::AlreadyClosed`].
    ///
    /// Wakes every blocked party. Parked senders fail (their values are
    /// retracted and dropped); receivers drain the buffer, then see `None`.
    pub fn close(&self) -> Result<(), CloseError> {
        let mut inner = self.lock();
        if inner.closed {
            return Err(CloseError::AlreadyClosed);
        }
        inner.closed = true;
        let retracted = inner.pending.len();
        inner.pending.clear();
        debug!(
            retracted,
            buffered = inner.buffer.len(),
            "channel closed"
        );
        self.shared.recv_cv.notify_all();
        self.shared.send_cv.notify_all();
        notify_select_waiters(&inner);
        Ok(())
    }

    /// Register a selector's waker; it is notified on every state mutation.
    pub(crate) fn register_waker(&self, waker: &Arc<SelectWaker>) {
        let mut inner = self.lock();
        if !inner.waiters.iter().any(|w| Arc::ptr_eq(w, waker)) {
            inner.waiters.push(Arc::clone(waker));
        }
    }

    pub(crate) fn unregister_waker(&self, waker: &Arc<SelectWaker>) {
        let mut inner = self.lock();
        inner.waiters.retain(|w| !Arc::ptr_eq(w, waker));
    }
}

/// Whether a non-parking send may place a value right now.
///
/// True when there is buffer space behind no parked senders, or when more
/// receivers are parked than values already destined for them - the handoff
/// deposit that makes rendezvous channels selectable. A deposit is safe
/// because a parked receiver drains the buffer even after close, so an
/// accepted value can never be retracted.
fn deposit_allowed<T>(inner: &Inner<T>, capacity: usize) -> bool {
    inner.pending.is_empty()
        && (inner.buffer.len() < capacity || inner.recv_waiting > inner.buffer.len())
}

/// Take the next deliverable value: buffer front first, then a parked
/// sender's value. Accepting a pending value completes that send.
fn take_value<T>(shared: &Shared<T>, inner: &mut Inner<T>) -> Option<T> {
    if let Some(value) = inner.buffer.pop_front() {
        // The oldest parked send moves into the freed slot - but only into
        // real buffer space. A rendezvous sender (capacity 0) is accepted
        // solely by a receiver taking its value directly.
        if inner.buffer.len() < shared.capacity {
            if let Some(parked) = inner.pending.pop_front() {
                inner.buffer.push_back(parked);
                inner.pending_accepted += 1;
                TOTAL_MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
                shared.send_cv.notify_all();
            }
        }
        notify_select_waiters(inner);
        return Some(value);
    }
    if let Some(value) = inner.pending.pop_front() {
        // Rendezvous handoff: the value never touches the buffer.
        inner.pending_accepted += 1;
        TOTAL_MESSAGES_SENT.fetch_add(1, Ordering::Relaxed);
        shared.send_cv.notify_all();
        notify_select_waiters(inner);
        return Some(value);
    }
    None
}

fn notify_select_waiters<T>(inner: &Inner<T>) {
    for waker in &inner.waiters {
        waker.notify();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use std::time::Duration;

    #[test]
    fn test_try_send_try_receive_buffered() {
        let ch = Channel::new(10);
        assert!(ch.try_send(1).is_ok());
        assert!(ch.try_send(2).is_ok());
        assert_eq!(ch.try_receive(), Ok(1));
        assert_eq!(ch.try_receive(), Ok(2));
        assert_eq!(ch.try_receive(), Err(TryRecvError::Empty));
    }

    #[test]
    fn test_try_send_full() {
        let ch = Channel::new(2);
        assert!(ch.try_send(1).is_ok());
        assert!(ch.try_send(2).is_ok());
        assert_eq!(ch.try_send(3), Err(TrySendError::Full(3)));

        assert_eq!(ch.try_receive(), Ok(1));
        assert!(ch.try_send(3).is_ok());
    }

    #[test]
    fn test_rendezvous_try_send_needs_receiver() {
        let ch: Channel<i64> = Channel::new(0);
        assert_eq!(ch.try_send(9), Err(TrySendError::Full(9)));
    }

    #[test]
    fn test_close_drains_then_signals_closed() {
        let ch = Channel::new(10);
        for i in 0..3 {
            ch.try_send(i).expect("buffered send");
        }
        ch.close().expect("first close");

        // Exactly the three buffered values, in order, then the terminal signal.
        assert_eq!(ch.receive(), Some(0));
        assert_eq!(ch.receive(), Some(1));
        assert_eq!(ch.receive(), Some(2));
        assert_eq!(ch.receive(), None);
        assert_eq!(ch.try_receive(), Err(TryRecvError::Closed));
    }

    #[test]
    fn test_double_close_is_an_error() {
        let ch: Channel<i64> = Channel::new(1);
        assert!(ch.close().is_ok());
        assert_eq!(ch.close(), Err(CloseError::AlreadyClosed));
    }

    #[test]
    fn test_send_on_closed_fails_immediately() {
        let ch = Channel::new(4);
        ch.close().expect("close");
        assert_eq!(ch.send(5), Err(SendError::Closed));
        assert_eq!(ch.try_send(5), Err(TrySendError::Closed(5)));
    }

    #[test]
    fn test_receive_on_closed_empty_is_none() {
        let ch: Channel<i64> = Channel::new(0);
        ch.close().expect("close");
        assert_eq!(ch.receive(), None);
    }

    #[test]
    fn test_accessors() {
        let ch = Channel::new(3);
        assert_eq!(ch.capacity(), 3);
        assert!(ch.is_empty());
        assert!(!ch.is_closed());

        ch.try_send(1).expect("send");
        assert_eq!(ch.len(), 1);
        assert!(!ch.is_empty());

        ch.close().expect("close");
        assert!(ch.is_closed());
    }

    #[test]
    fn test_rendezvous_squares_in_order() {
        // Capacity-0 pipeline: A sends the squares of 0..5, B receives them
        // in exactly that order.
        let ch = Channel::new(0);

        let tx = ch.clone();
        scheduler::spawn("squares-sender", move || {
            for i in 0..5i64 {
                tx.send(i * i).expect("receiver is draining");
            }
            tx.close().expect("sole closer");
        })
        .expect("spawn");

        let mut seen = Vec::new();
        while let Some(v) = ch.receive() {
            seen.push(v);
        }
        assert_eq!(seen, vec![0, 1, 4, 9, 16]);
    }

    #[test]
    fn test_buffered_fifo_across_strands() {
        // Every sent value arrives exactly once; each producer's values keep
        // their relative order.
        const PRODUCERS: i64 = 3;
        const PER_PRODUCER: i64 = 100;

        let ch = Channel::new(4);
        let done = Channel::new(PRODUCERS as usize);

        for p in 0..PRODUCERS {
            let tx = ch.clone();
            let done = done.clone();
            scheduler::spawn(format!("producer-{p}"), move || {
                for i in 0..PER_PRODUCER {
                    tx.send(p * 1000 + i).expect("channel open while producing");
                }
                done.send(()).expect("done channel open");
            })
            .expect("spawn");
        }

        let closer_ch = ch.clone();
        let closer_done = done.clone();
        scheduler::spawn("closer", move || {
            for _ in 0..PRODUCERS {
                closer_done.receive().expect("one signal per producer");
            }
            closer_ch.close().expect("sole closer");
        })
        .expect("spawn");

        let mut seen = Vec::new();
        while let Some(v) = ch.receive() {
            seen.push(v);
        }
        assert_eq!(seen.len(), (PRODUCERS * PER_PRODUCER) as usize);

        for p in 0..PRODUCERS {
            let run: Vec<i64> = seen.iter().copied().filter(|v| v / 1000 == p).collect();
            let expected: Vec<i64> = (0..PER_PRODUCER).map(|i| p * 1000 + i).collect();
            assert_eq!(run, expected, "producer {p} values out of order");
        }
    }

    #[test]
    fn test_close_retracts_parked_sender() {
        let ch = Channel::new(1);
        let result = Channel::new(1);

        ch.try_send(1).expect("fills the buffer");

        let tx = ch.clone();
        let res = result.clone();
        scheduler::spawn("parked-sender", move || {
            let outcome = tx.send(2);
            res.send(outcome.is_err()).expect("result channel open");
        })
        .expect("spawn");

        // Give the sender time to park; if close wins the race the send
        // fails immediately, which is the same observable outcome.
        std::thread::sleep(Duration::from_millis(50));
        ch.close().expect("first close");

        assert_eq!(result.receive(), Some(true), "parked send must fail");
        assert_eq!(ch.receive(), Some(1), "buffered value survives close");
        assert_eq!(ch.receive(), None, "retracted value is not delivered");
    }

    #[test]
    fn test_rendezvous_try_send_reaches_parked_receiver() {
        let ch = Channel::new(0);
        let result = Channel::new(1);

        let rx = ch.clone();
        let res = result.clone();
        scheduler::spawn("parked-receiver", move || {
            let got = rx.receive();
            res.send(got).expect("result channel open");
        })
        .expect("spawn");

        // Spin until the receiver is parked and the handoff lands.
        let mut value = 77i64;
        loop {
            match ch.try_send(value) {
                Ok(()) => break,
                Err(TrySendError::Full(v)) => {
                    value = v;
                    std::thread::sleep(Duration::from_millis(1));
                }
                Err(TrySendError::Closed(_)) => panic!("channel not closed here"),
            }
        }
        assert_eq!(result.receive(), Some(Some(77)));
    }

    #[test]
    fn test_two_parked_receivers_both_served() {
        let ch = Channel::new(0);
        let results = Channel::new(2);

        for i in 0..2 {
            let rx = ch.clone();
            let res = results.clone();
            scheduler::spawn(format!("receiver-{i}"), move || {
                let got = rx.receive().expect("a value each");
                res.send(got).expect("results channel open");
            })
            .expect("spawn");
        }

        let tx = ch.clone();
        scheduler::spawn("sender", move || {
            tx.send(10).expect("receiver waiting");
            tx.send(20).expect("receiver waiting");
        })
        .expect("spawn");

        let mut got = vec![
            results.receive().expect("first result"),
            results.receive().expect("second result"),
        ];
        got.sort_unstable();
        assert_eq!(got, vec![10, 20]);
    }
}
