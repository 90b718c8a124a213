//! The packed state word of [`OneManyLock`](super::OneManyLock).
//!
//! One `u32` carries everything the lock knows, so every transition is a
//! single compare-and-swap and a reader can never observe a mode that
//! disagrees with the counters:
//!
//! ```text
//!  31 30 29          21 20          12 11           3 2    0
//! +-----+--------------+--------------+--------------+------+
//! |  0  |writers_waiting|readers_waiting|readers_active| mode |
//! +-----+--------------+--------------+--------------+------+
//!         9 bits          9 bits         9 bits        3 bits
//! ```
//!
//! Each counter saturates at [`COUNTER_LIMIT`]. Incrementing a full counter
//! is refused with [`LockError::CapacityExceeded`]; it never wraps into the
//! neighbouring field.
//!
//! The transition functions here are pure: they take the current word and
//! return the next word plus what the caller must do once its CAS commits
//! (park, or wake someone). [`OneManyLock`](super::OneManyLock) only adds the
//! CAS loop and the semaphores.

use core::fmt;

use crate::error::{Counter, LockError};

const MODE_BITS: u32 = 3;
const COUNTER_BITS: u32 = 9;

const MODE_MASK: u32 = (1 << MODE_BITS) - 1;
const COUNTER_MASK: u32 = (1 << COUNTER_BITS) - 1;

const READERS_ACTIVE_SHIFT: u32 = MODE_BITS;
const READERS_WAITING_SHIFT: u32 = READERS_ACTIVE_SHIFT + COUNTER_BITS;
const WRITERS_WAITING_SHIFT: u32 = READERS_WAITING_SHIFT + COUNTER_BITS;

/// Largest value any counter in the word can hold.
pub const COUNTER_LIMIT: u32 = COUNTER_MASK;

/// Ownership mode of a [`OneManyLock`](super::OneManyLock).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum LockMode {
    /// Nobody holds the lock.
    Free = 0,
    /// One writer holds the lock.
    OwnedByWriter = 1,
    /// One or more readers hold the lock and no writer is queued.
    OwnedByReaders = 2,
    /// Readers hold the lock and at least one writer is queued behind them;
    /// new readers must queue too.
    OwnedByReadersAndWriterPending = 3,
    /// The lock was just handed to a woken writer that has not claimed it yet.
    ReservedForWriter = 4,
}

impl LockMode {
    const fn from_bits(bits: u32) -> Self {
        match bits {
            0 => Self::Free,
            1 => Self::OwnedByWriter,
            2 => Self::OwnedByReaders,
            3 => Self::OwnedByReadersAndWriterPending,
            4 => Self::ReservedForWriter,
            _ => panic!("corrupt lock mode bits"),
        }
    }

    /// Returns true if readers currently hold the lock.
    #[must_use]
    pub const fn is_reader_owned(self) -> bool {
        matches!(
            self,
            Self::OwnedByReaders | Self::OwnedByReadersAndWriterPending
        )
    }
}

impl fmt::Display for LockMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Free => "free",
            Self::OwnedByWriter => "owned-by-writer",
            Self::OwnedByReaders => "owned-by-readers",
            Self::OwnedByReadersAndWriterPending => "owned-by-readers-writer-pending",
            Self::ReservedForWriter => "reserved-for-writer",
        };
        f.write_str(name)
    }
}

/// Who to wake once a release has been committed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Wake {
    /// Nobody is waiting.
    Nobody,
    /// Release one parked writer.
    Writer,
    /// Release this many parked readers; they already own the lock.
    Readers(u32),
}

/// Outcome of an acquire transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Entry {
    /// The lock was granted by this transition.
    Granted,
    /// The caller was recorded as a waiter and must park.
    Queued,
}

/// A counter field inside the word.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    ReadersActive,
    ReadersWaiting,
    WritersWaiting,
}

impl Field {
    const fn shift(self) -> u32 {
        match self {
            Self::ReadersActive => READERS_ACTIVE_SHIFT,
            Self::ReadersWaiting => READERS_WAITING_SHIFT,
            Self::WritersWaiting => WRITERS_WAITING_SHIFT,
        }
    }

    const fn counter(self) -> Counter {
        match self {
            Self::ReadersActive => Counter::ReadersActive,
            Self::ReadersWaiting => Counter::ReadersWaiting,
            Self::WritersWaiting => Counter::WritersWaiting,
        }
    }
}

/// The packed lock word.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct LockState(u32);

impl LockState {
    /// The initial word: free, all counters zero.
    pub const FREE: Self = Self(0);

    #[must_use]
    pub(crate) const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Rebuilds a word from [`bits`](Self::bits), or `None` if the bits do not
    /// name a valid mode or use the reserved top bits.
    #[must_use]
    pub const fn try_from_bits(bits: u32) -> Option<Self> {
        let reserved = bits >> (WRITERS_WAITING_SHIFT + COUNTER_BITS);
        if reserved != 0 || (bits & MODE_MASK) > LockMode::ReservedForWriter as u32 {
            return None;
        }
        Some(Self(bits))
    }

    /// Returns the raw word.
    #[must_use]
    pub const fn bits(self) -> u32 {
        self.0
    }

    /// Ownership mode.
    #[must_use]
    pub const fn mode(self) -> LockMode {
        LockMode::from_bits(self.0 & MODE_MASK)
    }

    /// Readers currently holding the lock.
    #[must_use]
    pub const fn readers_active(self) -> u32 {
        (self.0 >> READERS_ACTIVE_SHIFT) & COUNTER_MASK
    }

    /// Readers parked waiting for the lock.
    #[must_use]
    pub const fn readers_waiting(self) -> u32 {
        (self.0 >> READERS_WAITING_SHIFT) & COUNTER_MASK
    }

    /// Writers parked waiting for the lock.
    #[must_use]
    pub const fn writers_waiting(self) -> u32 {
        (self.0 >> WRITERS_WAITING_SHIFT) & COUNTER_MASK
    }

    /// Returns true if nothing holds or waits for the lock.
    #[must_use]
    pub const fn is_free(self) -> bool {
        self.0 == 0
    }

    #[must_use]
    const fn with_mode(self, mode: LockMode) -> Self {
        Self((self.0 & !MODE_MASK) | mode as u32)
    }

    const fn get(self, field: Field) -> u32 {
        (self.0 >> field.shift()) & COUNTER_MASK
    }

    const fn with(self, field: Field, value: u32) -> Self {
        let shift = field.shift();
        Self((self.0 & !(COUNTER_MASK << shift)) | ((value & COUNTER_MASK) << shift))
    }

    fn increment(self, field: Field) -> Result<Self, LockError> {
        let current = self.get(field);
        if current >= COUNTER_LIMIT {
            return Err(LockError::CapacityExceeded {
                counter: field.counter(),
                limit: COUNTER_LIMIT,
            });
        }
        Ok(self.with(field, current + 1))
    }

    fn decrement(self, field: Field) -> Self {
        let current = self.get(field);
        debug_assert!(current > 0, "{} underflow in {self:?}", field.counter());
        self.with(field, current.saturating_sub(1))
    }

    /// Writer acquire: the next word and whether the writer got the lock or
    /// must park.
    ///
    /// `woken` is true only for the writer that a release just woke. A
    /// reservation belongs to that writer; any other writer finding the word
    /// reserved queues behind it.
    pub fn writer_enter(self, woken: bool) -> Result<(Self, Entry), LockError> {
        match self.mode() {
            LockMode::Free => Ok((self.with_mode(LockMode::OwnedByWriter), Entry::Granted)),
            LockMode::ReservedForWriter if woken => {
                Ok((self.with_mode(LockMode::OwnedByWriter), Entry::Granted))
            }
            LockMode::OwnedByWriter | LockMode::ReservedForWriter => {
                Ok((self.increment(Field::WritersWaiting)?, Entry::Queued))
            }
            LockMode::OwnedByReaders | LockMode::OwnedByReadersAndWriterPending => Ok((
                self.increment(Field::WritersWaiting)?
                    .with_mode(LockMode::OwnedByReadersAndWriterPending),
                Entry::Queued,
            )),
        }
    }

    /// Writer acquire restricted to the immediate transitions. Never claims a
    /// reservation, which belongs to a woken writer.
    #[must_use]
    pub fn writer_try_enter(self) -> Option<Self> {
        match self.mode() {
            LockMode::Free => Some(self.with_mode(LockMode::OwnedByWriter)),
            _ => None,
        }
    }

    /// Reader acquire: the next word and whether the reader got the lock or
    /// must park.
    ///
    /// A reader never joins readers that have a writer queued behind them.
    pub fn reader_enter(self) -> Result<(Self, Entry), LockError> {
        match self.mode() {
            LockMode::Free => Ok((
                self.with_mode(LockMode::OwnedByReaders)
                    .with(Field::ReadersActive, 1),
                Entry::Granted,
            )),
            LockMode::OwnedByReaders => {
                Ok((self.increment(Field::ReadersActive)?, Entry::Granted))
            }
            LockMode::OwnedByWriter
            | LockMode::OwnedByReadersAndWriterPending
            | LockMode::ReservedForWriter => {
                Ok((self.increment(Field::ReadersWaiting)?, Entry::Queued))
            }
        }
    }

    /// Reader acquire restricted to the immediate transitions.
    ///
    /// Returns `Ok(None)` if the reader would have to queue.
    pub fn reader_try_enter(self) -> Result<Option<Self>, LockError> {
        match self.reader_enter()? {
            (next, Entry::Granted) => Ok(Some(next)),
            (_, Entry::Queued) => Ok(None),
        }
    }

    /// Writer release. The caller must hold the lock exclusively.
    #[must_use]
    pub fn writer_leave(self) -> (Self, Wake) {
        debug_assert_eq!(self.mode(), LockMode::OwnedByWriter);
        self.hand_off()
    }

    /// Reader release. The caller must hold the lock shared.
    #[must_use]
    pub fn reader_leave(self) -> (Self, Wake) {
        debug_assert!(self.mode().is_reader_owned());
        let next = self.decrement(Field::ReadersActive);
        if next.readers_active() > 0 {
            return (next, Wake::Nobody);
        }
        next.hand_off()
    }

    /// Picks the next owner once no one holds the lock: a writer first, then
    /// every parked reader at once, else free.
    fn hand_off(self) -> (Self, Wake) {
        if self.writers_waiting() > 0 {
            let next = self
                .decrement(Field::WritersWaiting)
                .with_mode(LockMode::ReservedForWriter)
                .with(Field::ReadersActive, 0);
            return (next, Wake::Writer);
        }
        let readers = self.readers_waiting();
        if readers > 0 {
            let next = self
                .with_mode(LockMode::OwnedByReaders)
                .with(Field::ReadersActive, readers)
                .with(Field::ReadersWaiting, 0);
            return (next, Wake::Readers(readers));
        }
        (Self::FREE, Wake::Nobody)
    }
}

impl Default for LockState {
    fn default() -> Self {
        Self::FREE
    }
}

impl fmt::Debug for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockState")
            .field("mode", &self.mode())
            .field("readers_active", &self.readers_active())
            .field("readers_waiting", &self.readers_waiting())
            .field("writers_waiting", &self.writers_waiting())
            .finish()
    }
}

impl fmt::Display for LockState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} (active={}, readers_waiting={}, writers_waiting={})",
            self.mode(),
            self.readers_active(),
            self.readers_waiting(),
            self.writers_waiting()
        )
    }
}
