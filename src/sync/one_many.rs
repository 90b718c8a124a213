//! Blocking one-writer/many-readers lock over a single packed atomic word.
//!
//! Every decision is made by a compare-and-swap on the [`LockState`] word:
//! granting access, recording a waiter, choosing who inherits the lock on
//! release. The two semaphores are pure parking devices. A thread parks only
//! after the word already counts it as waiting, and a releaser wakes threads
//! only after its CAS committed, using the [`Wake`] it computed from the word
//! it replaced. Since the word is the only source of truth and the
//! semaphores count permits, a wakeup cannot be lost.
//!
//! # Writer Preference
//!
//! A writer that queues behind active readers flips the mode to
//! [`LockMode::OwnedByReadersAndWriterPending`]; readers arriving after that
//! park instead of joining. When the last reader leaves, the lock is reserved
//! for one woken writer. When a writer leaves, the next writer wins over parked
//! readers; only with no writer waiting are all parked readers let in at once.
//!
//! A reservation is claimed only by the writer it woke. Writers arriving
//! while the word is [`LockMode::ReservedForWriter`] queue like any other,
//! and parked writers are woken in the order they parked.
//!
//! # Example
//!
//! ```
//! use onemany::sync::{AccessMode, OneManyLock};
//!
//! let lock = OneManyLock::new();
//! {
//!     let _write = lock.write()?;
//!     assert!(lock.try_enter(AccessMode::Shared).map(|got| !got)?);
//! }
//! let _read = lock.read()?;
//! # Ok::<(), onemany::LockError>(())
//! ```

use core::fmt;
use std::marker::PhantomData;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::LockConfig;
use crate::error::LockError;
use crate::tracing_compat::{trace, warn};
use crate::util::thread_id::{current_thread_token, NO_OWNER};

use super::semaphore::Semaphore;
use super::state::{Entry, LockMode, LockState, Wake};
use super::AccessMode;

/// A one-writer/many-readers lock that blocks the calling thread.
///
/// The lock guards no data of its own: callers pair [`enter`](Self::enter)
/// with [`leave`](Self::leave) around their own shared state, or use the
/// [`read`](Self::read)/[`write`](Self::write) guards.
pub struct OneManyLock {
    state: AtomicU32,
    readers: Semaphore,
    writers: Semaphore,
    /// Token of the thread holding exclusive access, `NO_OWNER` otherwise.
    writer_owner: AtomicU64,
    cas_retries: AtomicU64,
    config: LockConfig,
}

impl OneManyLock {
    /// Creates a free lock with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Creates a free lock with the given configuration.
    #[must_use]
    pub fn with_config(config: LockConfig) -> Self {
        Self {
            state: AtomicU32::new(LockState::FREE.bits()),
            readers: Semaphore::new(),
            writers: Semaphore::new(),
            writer_owner: AtomicU64::new(NO_OWNER),
            cas_retries: AtomicU64::new(0),
            config,
        }
    }

    /// Returns the configuration this lock was built with.
    #[must_use]
    pub const fn config(&self) -> &LockConfig {
        &self.config
    }

    /// Blocks until access of the requested kind is granted.
    ///
    /// Fails only with [`LockError::CapacityExceeded`], in which case nothing
    /// was acquired and the lock is unchanged.
    pub fn enter(&self, mode: AccessMode) -> Result<(), LockError> {
        let entered = match mode {
            AccessMode::Exclusive => self.enter_writer(),
            AccessMode::Shared => self.enter_reader(),
        };
        if let Err(err) = &entered {
            warn!(%err, %mode, "acquire rejected");
        }
        entered
    }

    /// Acquires access only if that needs no waiting.
    ///
    /// Returns `Ok(false)` if the caller would have had to queue.
    pub fn try_enter(&self, mode: AccessMode) -> Result<bool, LockError> {
        let acquired = match mode {
            AccessMode::Exclusive => self.try_transition(|word| Ok(word.writer_try_enter()))?,
            AccessMode::Shared => self.try_transition(LockState::reader_try_enter)?,
        };
        if acquired && mode.is_exclusive() {
            self.claim_ownership();
        }
        Ok(acquired)
    }

    /// Releases access granted to the calling thread.
    ///
    /// Exclusive access is released only by the thread that holds it
    /// ([`LockError::NotOwner`] otherwise). Shared access is not tied to a
    /// thread. Releasing a lock that grants nothing is
    /// [`LockError::NotHeld`]. A rejected release leaves the word untouched.
    pub fn leave(&self) -> Result<(), LockError> {
        let word = self.state();
        match word.mode() {
            LockMode::OwnedByWriter => self.leave_writer(),
            LockMode::OwnedByReaders | LockMode::OwnedByReadersAndWriterPending => {
                self.leave_reader()
            }
            LockMode::Free | LockMode::ReservedForWriter => {
                warn!(state = %word, "leave called on a lock that grants nothing");
                Err(LockError::NotHeld)
            }
        }
    }

    /// Acquires shared access, released when the guard drops.
    pub fn read(&self) -> Result<ReadGuard<'_>, LockError> {
        self.enter(AccessMode::Shared)?;
        Ok(ReadGuard { lock: self })
    }

    /// Acquires exclusive access, released when the guard drops.
    pub fn write(&self) -> Result<WriteGuard<'_>, LockError> {
        self.enter(AccessMode::Exclusive)?;
        Ok(WriteGuard {
            lock: self,
            _not_send: PhantomData,
        })
    }

    /// Returns the current state word.
    #[must_use]
    pub fn state(&self) -> LockState {
        LockState::from_bits(self.state.load(Ordering::Acquire))
    }

    /// Returns a point-in-time view of the lock for diagnostics.
    #[must_use]
    pub fn snapshot(&self) -> LockSnapshot {
        LockSnapshot::from(self.state())
    }

    /// Returns true if nothing holds or waits for the lock.
    #[must_use]
    pub fn is_free(&self) -> bool {
        self.state().is_free()
    }

    /// Number of compare-and-swap attempts that lost a race and were retried.
    ///
    /// A steadily climbing count under modest contention is worth a look; it
    /// never indicates an error by itself.
    #[must_use]
    pub fn cas_retries(&self) -> u64 {
        self.cas_retries.load(Ordering::Relaxed)
    }

    fn enter_writer(&self) -> Result<(), LockError> {
        if self.spin(|word| Ok(word.writer_try_enter()))? {
            self.claim_ownership();
            return Ok(());
        }
        let mut woken = false;
        loop {
            let (next, entry) = self.transition(|word| word.writer_enter(woken))?;
            match entry {
                Entry::Granted => {
                    self.claim_ownership();
                    return Ok(());
                }
                Entry::Queued => {
                    trace!(state = %next, "writer queued");
                    self.writers.park();
                    // A release reserved the word for exactly this wakeup.
                    woken = true;
                    trace!("writer woken");
                }
            }
        }
    }

    fn enter_reader(&self) -> Result<(), LockError> {
        if self.spin(LockState::reader_try_enter)? {
            return Ok(());
        }
        let (next, entry) = self.transition(LockState::reader_enter)?;
        if entry == Entry::Queued {
            trace!(state = %next, "reader queued");
            // The releaser grants before it wakes, so waking means owning.
            self.readers.park();
            trace!("reader woken with access granted");
        }
        Ok(())
    }

    fn leave_writer(&self) -> Result<(), LockError> {
        let token = current_thread_token();
        let owner = self.writer_owner.load(Ordering::Relaxed);
        if owner != token {
            warn!(owner, caller = token, "exclusive leave from a non-owner thread");
            return Err(LockError::NotOwner);
        }
        self.writer_owner.store(NO_OWNER, Ordering::Relaxed);
        // Only the owner moves the word out of OwnedByWriter, so the mode
        // cannot change under us; waiters may still bump their counters.
        let (next, wake) = self.transition(|word| Ok(word.writer_leave()))?;
        trace!(state = %next, ?wake, "writer released");
        self.wake(wake);
        Ok(())
    }

    fn leave_reader(&self) -> Result<(), LockError> {
        let (next, wake) = self.transition(|word| {
            if word.mode().is_reader_owned() && word.readers_active() > 0 {
                Ok(word.reader_leave())
            } else {
                Err(LockError::NotHeld)
            }
        })?;
        if wake != Wake::Nobody {
            trace!(state = %next, ?wake, "last reader released");
        }
        self.wake(wake);
        Ok(())
    }

    fn claim_ownership(&self) {
        self.writer_owner
            .store(current_thread_token(), Ordering::Relaxed);
    }

    fn wake(&self, wake: Wake) {
        match wake {
            Wake::Nobody => {}
            Wake::Writer => self.writers.release(1),
            Wake::Readers(count) => self.readers.release(count),
        }
    }

    /// Load, compute, compare-and-swap, retry on mismatch. Never blocks.
    fn transition<T>(
        &self,
        step: impl Fn(LockState) -> Result<(LockState, T), LockError>,
    ) -> Result<(LockState, T), LockError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (next, outcome) = step(LockState::from_bits(current))?;
            match self.state.compare_exchange_weak(
                current,
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok((next, outcome)),
                Err(actual) => {
                    self.cas_retries.fetch_add(1, Ordering::Relaxed);
                    current = actual;
                }
            }
        }
    }

    /// Like [`transition`](Self::transition) for the immediate transitions
    /// only: gives up as soon as the word says the caller would have to queue.
    fn try_transition(
        &self,
        step: impl Fn(LockState) -> Result<Option<LockState>, LockError>,
    ) -> Result<bool, LockError> {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let Some(next) = step(LockState::from_bits(current))? else {
                return Ok(false);
            };
            match self.state.compare_exchange_weak(
                current,
                next.bits(),
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return Ok(true),
                Err(actual) => {
                    self.cas_retries.fetch_add(1, Ordering::Relaxed);
                    current = actual;
                }
            }
        }
    }

    /// Optimistic spin phase before queueing.
    fn spin(
        &self,
        step: impl Fn(LockState) -> Result<Option<LockState>, LockError>,
    ) -> Result<bool, LockError> {
        for _ in 0..self.config.spin_count {
            if self.try_transition(&step)? {
                return Ok(true);
            }
            std::hint::spin_loop();
        }
        Ok(false)
    }
}

impl Default for OneManyLock {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for OneManyLock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OneManyLock")
            .field("state", &self.state())
            .field("cas_retries", &self.cas_retries())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl Drop for OneManyLock {
    fn drop(&mut self) {
        let word = LockState::from_bits(*self.state.get_mut());
        if !word.is_free() {
            warn!(state = %word, "one-many lock dropped while still granted");
        }
    }
}

/// Point-in-time view of a [`OneManyLock`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockSnapshot {
    /// Ownership mode.
    pub mode: LockMode,
    /// Readers holding the lock.
    pub readers_active: u32,
    /// Readers parked for the lock.
    pub readers_waiting: u32,
    /// Writers parked for the lock.
    pub writers_waiting: u32,
}

impl From<LockState> for LockSnapshot {
    fn from(word: LockState) -> Self {
        Self {
            mode: word.mode(),
            readers_active: word.readers_active(),
            readers_waiting: word.readers_waiting(),
            writers_waiting: word.writers_waiting(),
        }
    }
}

impl fmt::Display for LockSnapshot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (active={}, readers_waiting={}, writers_waiting={})",
            self.mode, self.readers_active, self.readers_waiting, self.writers_waiting
        )
    }
}

/// Shared access to a [`OneManyLock`]; released on drop.
#[must_use = "guard will be immediately released if not held"]
#[derive(Debug)]
pub struct ReadGuard<'a> {
    lock: &'a OneManyLock,
}

impl Drop for ReadGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.leave_reader() {
            warn!(%err, "read guard release failed");
        }
    }
}

/// Exclusive access to a [`OneManyLock`]; released on drop.
///
/// Not `Send`: exclusive access is owned by the thread that acquired it.
#[must_use = "guard will be immediately released if not held"]
#[derive(Debug)]
pub struct WriteGuard<'a> {
    lock: &'a OneManyLock,
    _not_send: PhantomData<*const ()>,
}

impl Drop for WriteGuard<'_> {
    fn drop(&mut self) {
        if let Err(err) = self.lock.leave_writer() {
            warn!(%err, "write guard release failed");
        }
    }
}
