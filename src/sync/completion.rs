//! One-shot completion signal shared by any number of waiters.
//!
//! A [`Completion`] starts undecided and is decided exactly once, as
//! [`Grant::Granted`] or [`Grant::Rejected`]. Deciding and waking are split:
//! the async lock decides while holding its spin lock, so the decision is
//! ordered with the bookkeeping, and wakes the registered tasks only after
//! the spin lock is released.
//!
//! # Cancel Safety
//!
//! A waiter that stops polling leaves at most a stale waker behind; waking a
//! stale waker is harmless.

use std::sync::atomic::{AtomicU8, Ordering};
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

const UNDECIDED: u8 = 0;
const GRANTED: u8 = 1;
const REJECTED: u8 = 2;

/// How a completion was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Grant {
    /// The waiters received the access they asked for.
    Granted,
    /// The waiters were turned away; they hold nothing.
    Rejected,
}

impl Grant {
    const fn to_bits(self) -> u8 {
        match self {
            Self::Granted => GRANTED,
            Self::Rejected => REJECTED,
        }
    }

    const fn from_bits(bits: u8) -> Option<Self> {
        match bits {
            GRANTED => Some(Self::Granted),
            REJECTED => Some(Self::Rejected),
            _ => None,
        }
    }
}

/// A completion signal that many tasks can wait on.
#[derive(Debug, Default)]
pub struct Completion {
    decision: AtomicU8,
    wakers: Mutex<Vec<Waker>>,
}

impl Completion {
    /// Creates an undecided completion.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            decision: AtomicU8::new(UNDECIDED),
            wakers: parking_lot::const_mutex(Vec::new()),
        }
    }

    /// Records the decision without waking anyone.
    ///
    /// Returns false, leaving the earlier decision in place, if the
    /// completion was already decided.
    pub fn decide(&self, grant: Grant) -> bool {
        self.decision
            .compare_exchange(UNDECIDED, grant.to_bits(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Wakes every task registered so far.
    ///
    /// Call after [`decide`](Self::decide), outside any spin lock.
    pub fn wake_all(&self) {
        let wakers = std::mem::take(&mut *self.wakers.lock());
        for waker in wakers {
            waker.wake();
        }
    }

    /// Returns the decision, if one has been made.
    #[must_use]
    pub fn decision(&self) -> Option<Grant> {
        Grant::from_bits(self.decision.load(Ordering::Acquire))
    }

    /// Returns true once the completion has been decided.
    #[must_use]
    pub fn is_decided(&self) -> bool {
        self.decision().is_some()
    }

    /// Returns the decision, or registers the task's waker and returns
    /// `Pending`.
    pub fn poll_decision(&self, cx: &mut Context<'_>) -> Poll<Grant> {
        if let Some(grant) = self.decision() {
            return Poll::Ready(grant);
        }
        let mut wakers = self.wakers.lock();
        // Re-check under the mutex: a decider that already drained the list
        // made its decision visible before taking the mutex.
        if let Some(grant) = self.decision() {
            return Poll::Ready(grant);
        }
        if !wakers.iter().any(|w| w.will_wake(cx.waker())) {
            wakers.push(cx.waker().clone());
        }
        Poll::Pending
    }

    /// Number of registered wakers; diagnostic only.
    #[must_use]
    pub fn waiter_count(&self) -> usize {
        self.wakers.lock().len()
    }
}
