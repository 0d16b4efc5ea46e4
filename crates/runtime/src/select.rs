//! Multi-way channel selection
//!
//! A [`Selector`] holds an ordered list of send/receive cases over any mix
//! of channels, blocks until at least one can complete, and commits to
//! exactly one. Receive cases write into caller-provided destination slots,
//! so one selector can mix channels of different element types.
//!
//! ## Atomicity
//!
//! Each attempt checks readiness and commits under that channel's own lock,
//! so there is no gap for a case to become ready and un-ready between check
//! and commit. When nothing is ready the selector registers one shared
//! waker on every referenced channel, re-runs the attempt pass (a mutation
//! between the first pass and registration would otherwise be lost), and
//! only then parks. Any channel mutation notifies the waker.
//!
//! ## Choice and starvation
//!
//! The attempt order is shuffled uniformly on every pass, so across
//! repeated calls no persistently-ready case can starve another.
//!
//! ## Termination
//!
//! A receive case on a closed, drained channel is permanently ready and
//! commits as [`Selection::Closed`]. A send case on a closed channel is
//! permanently dead. When every case is dead, [`Selector::wait`] fails with
//! [`SelectError::Deadlock`] instead of blocking forever.

use crate::channel::Channel;
use crate::error::{SelectError, TryRecvError, TrySendError};
use rand::seq::SliceRandom;
use rand::thread_rng;
use std::sync::{Arc, Condvar, Mutex};
use tracing::trace;

/// Outcome of a committed select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Selection {
    /// The send case at this index delivered its value.
    Sent(usize),
    /// The receive case at this index took a value (now in its slot).
    Received(usize),
    /// The receive case at this index observed closed-and-drained; its slot
    /// is untouched.
    Closed(usize),
    /// No case was ready ([`Selector::try_select`] only).
    Default,
}

/// One-invocation waiter shared between a selector and its channels.
///
/// Channels notify it on every state mutation; the selector parks on it
/// when no case is ready.
pub(crate) struct SelectWaker {
    signaled: Mutex<bool>,
    cv: Condvar,
}

impl SelectWaker {
    fn new() -> Self {
        Self {
            signaled: Mutex::new(false),
            cv: Condvar::new(),
        }
    }

    pub(crate) fn notify(&self) {
        let mut signaled = self
            .signaled
            .lock()
            .expect("select waker mutex poisoned");
        *signaled = true;
        self.cv.notify_all();
    }

    fn park(&self) {
        let mut signaled = self
            .signaled
            .lock()
            .expect("select waker mutex poisoned");
        while !*signaled {
            signaled = self
                .cv
                .wait(signaled)
                .expect("select waker mutex poisoned while parked");
        }
        *signaled = false;
    }
}

/// What one attempt on one case produced.
enum Attempt {
    Fired(Fired),
    /// Not ready now; may become ready later.
    Blocked,
    /// Can never fire: a send on a closed channel.
    Dead,
}

enum Fired {
    Sent,
    Received,
    ClosedRecv,
}

trait Case {
    /// Try the operation without blocking. Readiness check and commit are
    /// one atomic step under the channel's lock.
    fn attempt(&mut self) -> Attempt;
    fn register(&self, waker: &Arc<SelectWaker>);
    fn unregister(&self, waker: &Arc<SelectWaker>);
}

struct RecvCase<'a, T> {
    channel: Channel<T>,
    slot: &'a mut Option<T>,
}

impl<'a, T> Case for RecvCase<'a, T> {
    fn attempt(&mut self) -> Attempt {
        match self.channel.try_receive() {
            Ok(value) => {
                *self.slot = Some(value);
                Attempt::Fired(Fired::Received)
            }
            Err(TryRecvError::Empty) => Attempt::Blocked,
            Err(TryRecvError::Closed) => Attempt::Fired(Fired::ClosedRecv),
        }
    }

    fn register(&self, waker: &Arc<SelectWaker>) {
        self.channel.register_waker(waker);
    }

    fn unregister(&self, waker: &Arc<SelectWaker>) {
        self.channel.unregister_waker(waker);
    }
}

struct SendCase<T> {
    channel: Channel<T>,
    value: Option<T>,
}

impl<T> Case for SendCase<T> {
    fn attempt(&mut self) -> Attempt {
        let value = match self.value.take() {
            Some(value) => value,
            // Already delivered; a committed case is never re-attempted.
            None => return Attempt::Dead,
        };
        match self.channel.try_send(value) {
            Ok(()) => Attempt::Fired(Fired::Sent),
            Err(TrySendError::Full(value)) => {
                self.value = Some(value);
                Attempt::Blocked
            }
            Err(TrySendError::Closed(value)) => {
                self.value = Some(value);
                Attempt::Dead
            }
        }
    }

    fn register(&self, waker: &Arc<SelectWaker>) {
        self.channel.register_waker(waker);
    }

    fn unregister(&self, waker: &Arc<SelectWaker>) {
        self.channel.unregister_waker(waker);
    }
}

enum ScanOutcome {
    Fired(Selection),
    Blocked,
    AllDead,
}

/// An ordered list of channel operations to wait on.
///
/// Cases are added with [`recv`](Selector::recv) and
/// [`send`](Selector::send); indices in the resulting [`Selection`] follow
/// the order of those calls. The selector and its cases live for a single
/// [`wait`](Selector::wait) or [`try_select`](Selector::try_select) call. A
/// send value that does not commit is dropped with the selector; loops
/// rebuild their cases each iteration.
pub struct Selector<'a> {
    cases: Vec<Box<dyn Case + 'a>>,
}

impl<'a> Selector<'a> {
    pub fn new() -> Self {
        Self { cases: Vec::new() }
    }

    /// Add a receive case. On commit the value is written into `slot`.
    pub fn recv<T: 'a>(&mut self, channel: &Channel<T>, slot: &'a mut Option<T>) {
        self.cases.push(Box::new(RecvCase {
            channel: channel.clone(),
            slot,
        }));
    }

    /// Add a send case offering `value`.
    pub fn send<T: 'a>(&mut self, channel: &Channel<T>, value: T) {
        self.cases.push(Box::new(SendCase {
            channel: channel.clone(),
            value: Some(value),
        }));
    }

    /// Number of cases added so far.
    pub fn len(&self) -> usize {
        self.cases.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cases.is_empty()
    }

    /// Block until one case commits.
    ///
    /// Fails with [`SelectError::Deadlock`] when every case is a send on a
    /// closed channel (or no cases were added): nothing can ever become
    /// ready and blocking would hang the strand.
    pub fn wait(mut self) -> Result<Selection, SelectError> {
        let waker = Arc::new(SelectWaker::new());
        let mut order: Vec<usize> = (0..self.cases.len()).collect();
        let mut rng = thread_rng();
        let mut registered = false;

        let outcome = loop {
            order.shuffle(&mut rng);
            match self.scan(&order) {
                ScanOutcome::Fired(selection) => break Ok(selection),
                ScanOutcome::AllDead => break Err(SelectError::Deadlock),
                ScanOutcome::Blocked => {}
            }
            if !registered {
                for case in &self.cases {
                    case.register(&waker);
                }
                registered = true;
                // A channel may have mutated between the scan and the
                // registrations; re-scan before parking or that change
                // is lost.
                continue;
            }
            trace!(cases = self.cases.len(), "select parked");
            waker.park();
        };

        if registered {
            for case in &self.cases {
                case.unregister(&waker);
            }
        }
        outcome
    }

    /// Attempt one pass; return [`Selection::Default`] when nothing is
    /// ready. Never blocks and never fails.
    pub fn try_select(mut self) -> Selection {
        let mut order: Vec<usize> = (0..self.cases.len()).collect();
        order.shuffle(&mut thread_rng());
        match self.scan(&order) {
            ScanOutcome::Fired(selection) => selection,
            ScanOutcome::Blocked | ScanOutcome::AllDead => Selection::Default,
        }
    }

    fn scan(&mut self, order: &[usize]) -> ScanOutcome {
        let mut dead = 0;
        for &idx in order {
            match self.cases[idx].attempt() {
                Attempt::Fired(Fired::Sent) => {
                    return ScanOutcome::Fired(Selection::Sent(idx));
                }
                Attempt::Fired(Fired::Received) => {
                    return ScanOutcome::Fired(Selection::Received(idx));
                }
                Attempt::Fired(Fired::ClosedRecv) => {
                    return ScanOutcome::Fired(Selection::Closed(idx));
                }
                Attempt::Dead => dead += 1,
                Attempt::Blocked => {}
            }
        }
        if dead == self.cases.len() {
            ScanOutcome::AllDead
        } else {
            ScanOutcome::Blocked
        }
    }
}

impl<'a> Default for Selector<'a> {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler;
    use std::time::Duration;

    #[test]
    fn test_ready_case_wins_over_idle() {
        let ready = Channel::new(1);
        let idle: Channel<i64> = Channel::new(1);
        ready.try_send(42).expect("buffered");

        let mut a = None;
        let mut b = None;
        let mut sel = Selector::new();
        sel.recv(&ready, &mut a);
        sel.recv(&idle, &mut b);

        assert_eq!(sel.wait(), Ok(Selection::Received(0)));
        assert_eq!(a, Some(42));
        assert_eq!(b, None);
    }

    #[test]
    fn test_try_select_default_when_nothing_ready() {
        let empty: Channel<i64> = Channel::new(1);
        let full = Channel::new(1);
        full.try_send(1).expect("buffered");

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&empty, &mut slot);
        sel.send(&full, 2);

        assert_eq!(sel.try_select(), Selection::Default);
        assert_eq!(slot, None);
    }

    #[test]
    fn test_send_case_commits_into_buffer_space() {
        let out = Channel::new(1);
        let idle: Channel<i64> = Channel::new(1);

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&idle, &mut slot);
        sel.send(&out, 456);

        assert_eq!(sel.wait(), Ok(Selection::Sent(1)));
        assert_eq!(out.try_receive(), Ok(456));
    }

    #[test]
    fn test_closed_receive_case_is_ready() {
        let closed: Channel<i64> = Channel::new(1);
        closed.close().expect("close");
        let idle: Channel<i64> = Channel::new(1);

        let mut a = None;
        let mut b = None;
        let mut sel = Selector::new();
        sel.recv(&closed, &mut a);
        sel.recv(&idle, &mut b);

        assert_eq!(sel.wait(), Ok(Selection::Closed(0)));
        assert_eq!(a, None);
    }

    #[test]
    fn test_closed_receive_drains_buffer_first() {
        let ch = Channel::new(2);
        ch.try_send(7).expect("buffered");
        ch.close().expect("close");

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&ch, &mut slot);
        assert_eq!(sel.wait(), Ok(Selection::Received(0)));
        assert_eq!(slot, Some(7));

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&ch, &mut slot);
        assert_eq!(sel.wait(), Ok(Selection::Closed(0)));
    }

    #[test]
    fn test_all_send_cases_closed_is_deadlock() {
        let a: Channel<i64> = Channel::new(1);
        let b: Channel<i64> = Channel::new(1);
        a.close().expect("close");
        b.close().expect("close");

        let mut sel = Selector::new();
        sel.send(&a, 1);
        sel.send(&b, 2);
        assert_eq!(sel.wait(), Err(SelectError::Deadlock));

        let mut sel = Selector::new();
        sel.send(&a, 1);
        assert_eq!(sel.try_select(), Selection::Default);
    }

    #[test]
    fn test_empty_selector_is_deadlock() {
        let sel = Selector::new();
        assert!(sel.is_empty());
        assert_eq!(sel.wait(), Err(SelectError::Deadlock));

        let sel = Selector::new();
        assert_eq!(sel.try_select(), Selection::Default);
    }

    #[test]
    fn test_blocked_select_woken_by_late_send() {
        let ch = Channel::new(1);

        let tx = ch.clone();
        scheduler::spawn("late-sender", move || {
            std::thread::sleep(Duration::from_millis(20));
            tx.send(99).expect("select is waiting");
        })
        .expect("spawn");

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&ch, &mut slot);
        assert_eq!(sel.wait(), Ok(Selection::Received(0)));
        assert_eq!(slot, Some(99));
    }

    #[test]
    fn test_select_receives_from_parked_rendezvous_sender() {
        let ch = Channel::new(0);

        let tx = ch.clone();
        scheduler::spawn("rendezvous-sender", move || {
            tx.send(5).expect("select takes the handoff");
        })
        .expect("spawn");

        let mut slot = None;
        let mut sel = Selector::new();
        sel.recv(&ch, &mut slot);
        assert_eq!(sel.wait(), Ok(Selection::Received(0)));
        assert_eq!(slot, Some(5));
    }

    #[test]
    fn test_select_sends_to_parked_rendezvous_receiver() {
        let ch = Channel::new(0);
        let result = Channel::new(1);

        let rx = ch.clone();
        let res = result.clone();
        scheduler::spawn("rendezvous-receiver", move || {
            let got = rx.receive();
            res.send(got).expect("result channel open");
        })
        .expect("spawn");

        let mut sel = Selector::new();
        sel.send(&ch, 11);
        assert_eq!(sel.wait(), Ok(Selection::Sent(0)));
        assert_eq!(result.receive(), Some(Some(11)));
    }

    #[test]
    fn test_blocked_select_fails_when_channel_closes() {
        // A send case on an open rendezvous channel with no receiver parks;
        // closing the channel turns it dead and the select must fail rather
        // than hang.
        let ch: Channel<i64> = Channel::new(0);

        let closer = ch.clone();
        scheduler::spawn("closer", move || {
            std::thread::sleep(Duration::from_millis(20));
            closer.close().expect("first close");
        })
        .expect("spawn");

        let mut sel = Selector::new();
        sel.send(&ch, 1);
        assert_eq!(sel.wait(), Err(SelectError::Deadlock));
    }

    #[test]
    fn test_timeout_pattern_with_timer_channel() {
        // The idiomatic timeout wrapper: a strand sleeps then sends on a
        // timer channel; selecting over the idle channel and the timer
        // commits to the timer with no special-casing.
        let idle: Channel<i64> = Channel::new(1);
        let timer = Channel::new(1);

        let t = timer.clone();
        scheduler::spawn("timer", move || {
            std::thread::sleep(Duration::from_millis(10));
            let _ = t.send(());
        })
        .expect("spawn");

        let mut slot = None;
        let mut tick = None;
        let mut sel = Selector::new();
        sel.recv(&idle, &mut slot);
        sel.recv(&timer, &mut tick);
        assert_eq!(sel.wait(), Ok(Selection::Received(1)));
        assert_eq!(tick, Some(()));
        assert_eq!(slot, None);
    }

    #[test]
    fn test_no_ready_case_starves_forever() {
        // Two permanently-ready send cases: over many calls the shuffled
        // attempt order must commit each side at least once.
        let a = Channel::new(1000);
        let b = Channel::new(1000);

        let mut hits = [0usize; 2];
        for _ in 0..100 {
            let mut sel = Selector::new();
            sel.send(&a, 1);
            sel.send(&b, 1);
            match sel.wait() {
                Ok(Selection::Sent(idx)) => hits[idx] += 1,
                other => panic!("unexpected selection: {other:?}"),
            }
        }
        assert!(hits[0] > 0, "case 0 starved across 100 calls");
        assert!(hits[1] > 0, "case 1 starved across 100 calls");
    }
}
