//! One-writer/many-readers lock for tasks.
//!
//! [`AsyncOneManyLock`] never blocks a thread. All bookkeeping happens under a
//! short spin lock that is held only for a few field updates: the signed owner
//! count (`0` free, `-1` one writer, `n > 0` readers), a FIFO queue of writer
//! completions, and a single completion shared by every queued reader.
//!
//! [`wait`](AsyncOneManyLock::wait) does its bookkeeping eagerly and returns an
//! [`Acquire`] handle. If access was available the handle is already
//! complete; otherwise it resolves once a release hands the lock over.
//! Releasing decides the next owner under the spin lock and wakes it after the
//! spin lock is dropped.
//!
//! # Cancel Safety
//!
//! Dropping an unresolved [`Acquire`] withdraws its request. If the grant was
//! already decided but never observed, dropping the handle releases it, so the
//! lock is never left owned by a waiter that went away.
//!
//! # Example
//!
//! ```
//! use futures_lite::future::block_on;
//! use onemany::sync::{AccessMode, AsyncOneManyLock};
//!
//! let lock = AsyncOneManyLock::new();
//! block_on(async {
//!     let guard = lock.lock(AccessMode::Exclusive).await?;
//!     assert!(!lock.try_acquire(AccessMode::Shared)?);
//!     drop(guard);
//!     assert!(lock.is_free());
//!     Ok::<(), onemany::LockError>(())
//! })?;
//! # Ok::<(), onemany::LockError>(())
//! ```

use core::fmt;
use std::cell::Cell;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};

use crate::error::{Counter, LockError};
use crate::tracing_compat::{debug, trace, warn};
use crate::util::SpinLock;

use super::completion::{Completion, Grant};
use super::AccessMode;

/// Upper bound for every counter the async lock keeps.
const ASYNC_COUNTER_LIMIT: u32 = i32::MAX as u32;

const WRITER_OWNED: i32 = -1;

fn capacity(counter: Counter) -> LockError {
    LockError::CapacityExceeded {
        counter,
        limit: ASYNC_COUNTER_LIMIT,
    }
}

struct Inner {
    /// `0` free, `-1` writer, `n > 0` readers.
    state: i32,
    writers: VecDeque<Arc<Completion>>,
    readers_waiting: u32,
    /// Completed once for every reader queued since the last hand-off.
    readers_signal: Arc<Completion>,
    closed: bool,
}

impl Inner {
    fn new() -> Self {
        Self {
            state: 0,
            writers: VecDeque::new(),
            readers_waiting: 0,
            readers_signal: Arc::new(Completion::new()),
            closed: false,
        }
    }

    fn admit(&mut self, mode: AccessMode) -> Result<Ticket, LockError> {
        if self.closed {
            return Err(LockError::Closed);
        }
        match mode {
            AccessMode::Exclusive => {
                if self.state == 0 {
                    self.state = WRITER_OWNED;
                    return Ok(Ticket::Ready(Ok(())));
                }
                if self.writers.len() >= ASYNC_COUNTER_LIMIT as usize {
                    return Err(capacity(Counter::WritersWaiting));
                }
                let completion = Arc::new(Completion::new());
                self.writers.push_back(Arc::clone(&completion));
                Ok(Ticket::Writer(completion))
            }
            AccessMode::Shared => {
                if self.readers_may_enter() {
                    self.add_reader()?;
                    return Ok(Ticket::Ready(Ok(())));
                }
                if self.readers_waiting >= ASYNC_COUNTER_LIMIT {
                    return Err(capacity(Counter::ReadersWaiting));
                }
                self.readers_waiting += 1;
                Ok(Ticket::Reader(Arc::clone(&self.readers_signal)))
            }
        }
    }

    fn try_admit(&mut self, mode: AccessMode) -> Result<bool, LockError> {
        if self.closed {
            return Err(LockError::Closed);
        }
        match mode {
            AccessMode::Exclusive if self.state == 0 => {
                self.state = WRITER_OWNED;
                Ok(true)
            }
            AccessMode::Shared if self.readers_may_enter() => {
                self.add_reader()?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn readers_may_enter(&self) -> bool {
        self.state >= 0 && self.writers.is_empty()
    }

    fn add_reader(&mut self) -> Result<(), LockError> {
        self.state = self
            .state
            .checked_add(1)
            .ok_or_else(|| capacity(Counter::ReadersActive))?;
        Ok(())
    }

    /// Drops one grant and, if that frees the lock, picks the next owner.
    fn release(&mut self) -> Result<Option<Arc<Completion>>, LockError> {
        match self.state {
            0 => Err(LockError::NotHeld),
            WRITER_OWNED => {
                self.state = 0;
                self.hand_off()
            }
            _ => {
                self.state -= 1;
                if self.state == 0 {
                    self.hand_off()
                } else {
                    Ok(None)
                }
            }
        }
    }

    /// Grants the free lock to the first queued writer, else to every queued
    /// reader. Returns the completion the caller must wake.
    fn hand_off(&mut self) -> Result<Option<Arc<Completion>>, LockError> {
        debug_assert_eq!(self.state, 0);
        if let Some(writer) = self.writers.pop_front() {
            self.state = WRITER_OWNED;
            writer.decide(Grant::Granted);
            return Ok(Some(writer));
        }
        self.grant_waiting_readers()
    }

    /// Admits every queued reader at once. If they do not fit next to the
    /// active readers, nothing changes and they stay queued.
    fn grant_waiting_readers(&mut self) -> Result<Option<Arc<Completion>>, LockError> {
        if self.readers_waiting == 0 {
            return Ok(None);
        }
        self.state = i32::try_from(self.readers_waiting)
            .ok()
            .and_then(|waiting| self.state.checked_add(waiting))
            .ok_or_else(|| capacity(Counter::ReadersActive))?;
        self.readers_waiting = 0;
        let signal = std::mem::replace(&mut self.readers_signal, Arc::new(Completion::new()));
        signal.decide(Grant::Granted);
        Ok(Some(signal))
    }

    /// Withdraws a writer whose handle went away before being granted.
    fn withdraw_writer(
        &mut self,
        completion: &Arc<Completion>,
    ) -> Result<Option<Arc<Completion>>, LockError> {
        self.writers.retain(|queued| !Arc::ptr_eq(queued, completion));
        // Readers queued only because of that writer may go now.
        if self.readers_may_enter() {
            self.grant_waiting_readers()
        } else {
            Ok(None)
        }
    }

    fn withdraw_reader(&mut self) {
        debug_assert!(self.readers_waiting > 0);
        self.readers_waiting = self.readers_waiting.saturating_sub(1);
    }

    fn snapshot(&self) -> AsyncLockSnapshot {
        AsyncLockSnapshot {
            state: self.state,
            writers_waiting: self.writers.len(),
            readers_waiting: self.readers_waiting,
            closed: self.closed,
        }
    }
}

/// A one-writer/many-readers lock whose waiters are futures.
pub struct AsyncOneManyLock {
    inner: SpinLock<Inner>,
}

impl AsyncOneManyLock {
    /// Creates a free, open lock.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: SpinLock::new(Inner::new()),
        }
    }

    /// Requests access and returns a handle that resolves once it is granted.
    ///
    /// The request is recorded before this returns: a handle for a free lock
    /// is already complete (see [`Acquire::is_completed`]). The granted
    /// caller must eventually call [`release`](Self::release). A closed lock
    /// or a full counter resolves the handle with the error immediately.
    pub fn wait(&self, mode: AccessMode) -> Acquire<'_> {
        let admitted = self.inner.lock().admit(mode);
        let ticket = match admitted {
            Ok(ticket) => ticket,
            Err(err) => {
                warn!(%err, %mode, "async acquire rejected");
                Ticket::Ready(Err(err))
            }
        };
        if matches!(ticket, Ticket::Writer(_) | Ticket::Reader(_)) {
            trace!(%mode, "async waiter queued");
        }
        Acquire {
            lock: self,
            mode,
            ticket,
            observed: Cell::new(false),
        }
    }

    /// Acquires access only if no queueing is needed.
    pub fn try_acquire(&self, mode: AccessMode) -> Result<bool, LockError> {
        self.inner.lock().try_admit(mode)
    }

    /// Acquires access and returns a guard that releases it on drop.
    pub fn lock(&self, mode: AccessMode) -> LockFuture<'_> {
        LockFuture {
            acquire: self.wait(mode),
        }
    }

    /// Releases one grant: the writer's, or one reader's.
    ///
    /// Releasing a lock nobody holds is [`LockError::NotHeld`] and changes
    /// nothing.
    pub fn release(&self) -> Result<(), LockError> {
        let next = self.inner.lock().release();
        match next {
            Ok(Some(completion)) => {
                trace!(waiters = completion.waiter_count(), "async hand-off");
                completion.wake_all();
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(err) => {
                warn!(%err, "async release on a lock that grants nothing");
                Err(err)
            }
        }
    }

    /// Rejects every queued waiter with [`LockError::Closed`] and refuses new
    /// requests. Current holders keep their grants and still release them.
    pub fn close(&self) {
        let mut rejected = Vec::new();
        {
            let mut inner = self.inner.lock();
            if inner.closed {
                return;
            }
            inner.closed = true;
            for writer in inner.writers.drain(..) {
                writer.decide(Grant::Rejected);
                rejected.push(writer);
            }
            if inner.readers_waiting > 0 {
                inner.readers_waiting = 0;
                let signal =
                    std::mem::replace(&mut inner.readers_signal, Arc::new(Completion::new()));
                signal.decide(Grant::Rejected);
                rejected.push(signal);
            }
        }
        debug!(rejected = rejected.len(), "async one-many lock closed");
        for completion in rejected {
            completion.wake_all();
        }
    }

    /// Returns true once [`close`](Self::close) has been called.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.inner.lock().closed
    }

    /// Returns a point-in-time view of the lock.
    #[must_use]
    pub fn snapshot(&self) -> AsyncLockSnapshot {
        self.inner.lock().snapshot()
    }

    /// Returns true if nothing holds or waits for the lock.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.snapshot().is_free()
    }

    /// Settles a handle dropped before it observed its outcome.
    fn abandon(&self, ticket: &Ticket) {
        let settled = {
            let mut inner = self.inner.lock();
            match ticket {
                Ticket::Writer(completion) => match completion.decision() {
                    None => inner.withdraw_writer(completion),
                    Some(Grant::Granted) => inner.release(),
                    Some(Grant::Rejected) => Ok(None),
                },
                Ticket::Reader(signal) => match signal.decision() {
                    None => {
                        inner.withdraw_reader();
                        Ok(None)
                    }
                    Some(Grant::Granted) => inner.release(),
                    Some(Grant::Rejected) => Ok(None),
                },
                Ticket::Ready(_) | Ticket::Done => Ok(None),
            }
        };
        match settled {
            Ok(to_wake) => {
                trace!("abandoned async waiter settled");
                if let Some(completion) = to_wake {
                    completion.wake_all();
                }
            }
            Err(err) => warn!(%err, "abandoned async waiter left readers queued"),
        }
    }
}

impl Default for AsyncOneManyLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for AsyncOneManyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AsyncOneManyLock")
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl Drop for AsyncOneManyLock {
    fn drop(&mut self) {
        let snapshot = self.inner.get_mut().snapshot();
        if snapshot.state != 0 {
            warn!(%snapshot, "async one-many lock dropped while still granted");
        }
    }
}

/// Point-in-time view of an [`AsyncOneManyLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsyncLockSnapshot {
    /// `0` free, `-1` writer, `n > 0` readers.
    pub state: i32,
    /// Writers queued.
    pub writers_waiting: usize,
    /// Readers queued.
    pub readers_waiting: u32,
    /// Whether the lock has been closed.
    pub closed: bool,
}

impl AsyncLockSnapshot {
    /// Returns true if a writer holds the lock.
    #[must_use]
    pub const fn is_write_locked(&self) -> bool {
        self.state == WRITER_OWNED
    }

    /// Number of readers holding the lock.
    #[must_use]
    pub const fn readers_active(&self) -> u32 {
        if self.state > 0 {
            self.state.unsigned_abs()
        } else {
            0
        }
    }

    /// Returns true if nothing holds or waits for the lock.
    #[must_use]
    pub const fn is_free(&self) -> bool {
        self.state == 0 && self.writers_waiting == 0 && self.readers_waiting == 0
    }
}

impl fmt::Display for AsyncLockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let owner = match self.state {
            0 => "free".to_owned(),
            WRITER_OWNED => "writer".to_owned(),
            n => format!("{n} readers"),
        };
        write!(
            f,
            "{owner} (writers_waiting={}, readers_waiting={}{})",
            self.writers_waiting,
            self.readers_waiting,
            if self.closed { ", closed" } else { "" }
        )
    }
}

#[derive(Debug)]
enum Ticket {
    /// Settled when the handle was created.
    Ready(Result<(), LockError>),
    /// Queued writer.
    Writer(Arc<Completion>),
    /// Queued reader, sharing the readers' completion.
    Reader(Arc<Completion>),
    /// Outcome handed to the caller.
    Done,
}

/// Handle returned by [`AsyncOneManyLock::wait`].
///
/// Resolves to `Ok(())` once access is granted, or to the error that
/// prevented it. After it resolves, or after
/// [`is_completed`](Self::is_completed) returned true, the grant belongs to
/// the caller, who releases it with [`AsyncOneManyLock::release`].
#[must_use = "dropping an unresolved handle withdraws the request"]
pub struct Acquire<'a> {
    lock: &'a AsyncOneManyLock,
    mode: AccessMode,
    ticket: Ticket,
    observed: Cell<bool>,
}

impl Acquire<'_> {
    /// The kind of access requested.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }

    /// Returns true if the handle would resolve without waiting.
    pub fn is_completed(&self) -> bool {
        let completed = match &self.ticket {
            Ticket::Ready(_) | Ticket::Done => true,
            Ticket::Writer(completion) | Ticket::Reader(completion) => completion.is_decided(),
        };
        if completed {
            self.observed.set(true);
        }
        completed
    }
}

impl Future for Acquire<'_> {
    type Output = Result<(), LockError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match &self.ticket {
            Ticket::Ready(outcome) => *outcome,
            Ticket::Writer(completion) | Ticket::Reader(completion) => {
                match completion.poll_decision(cx) {
                    Poll::Ready(Grant::Granted) => Ok(()),
                    Poll::Ready(Grant::Rejected) => Err(LockError::Closed),
                    Poll::Pending => return Poll::Pending,
                }
            }
            Ticket::Done => panic!("`Acquire` polled after completion"),
        };
        self.ticket = Ticket::Done;
        Poll::Ready(outcome)
    }
}

impl Drop for Acquire<'_> {
    fn drop(&mut self) {
        if !self.observed.get() {
            self.lock.abandon(&self.ticket);
        }
    }
}

impl fmt::Debug for Acquire<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Acquire")
            .field("mode", &self.mode)
            .field("ticket", &self.ticket)
            .finish_non_exhaustive()
    }
}

/// Future returned by [`AsyncOneManyLock::lock`].
#[must_use = "futures do nothing unless awaited"]
#[derive(Debug)]
pub struct LockFuture<'a> {
    acquire: Acquire<'a>,
}

impl<'a> Future for LockFuture<'a> {
    type Output = Result<AsyncAccessGuard<'a>, LockError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = &mut *self;
        match Pin::new(&mut this.acquire).poll(cx) {
            Poll::Ready(Ok(())) => Poll::Ready(Ok(AsyncAccessGuard {
                lock: this.acquire.lock,
                mode: this.acquire.mode,
            })),
            Poll::Ready(Err(err)) => Poll::Ready(Err(err)),
            Poll::Pending => Poll::Pending,
        }
    }
}

/// Access granted by [`AsyncOneManyLock::lock`]; released on drop.
#[must_use = "guard will be immediately released if not held"]
#[derive(Debug)]
pub struct AsyncAccessGuard<'a> {
    lock: &'a AsyncOneManyLock,
    mode: AccessMode,
}

impl AsyncAccessGuard<'_> {
    /// The kind of access held.
    #[must_use]
    pub const fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl Drop for AsyncAccessGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.release() {
            warn!(%err, mode = %self.mode, "async guard release failed");
        }
    }
}
