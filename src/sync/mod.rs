//! One-writer/many-readers locks and the primitives they are built from.
//!
//! # Primitives
//!
//! - [`OneManyLock`]: blocking lock; one packed atomic word plus two parking
//!   semaphores
//! - [`AsyncOneManyLock`]: task lock; never blocks a thread, hands out
//!   completion handles instead
//! - [`HybridLock`]: spin-then-park exclusive lock with owner tracking and
//!   recursion
//! - [`Semaphore`]: counting semaphore used to park threads
//! - [`Completion`]: one-shot, multi-waiter completion signal
//!
//! # Shared Contract
//!
//! Both one-many locks implement [`OneManyAccess`]. The two are deliberately
//! separate types rather than one abstraction over an execution model: the
//! associated [`Handle`](OneManyAccess::Handle) of [`OneManyLock`] is the
//! result of a call that may block the thread, that of [`AsyncOneManyLock`] is
//! a future that must be awaited.
//!
//! # Fairness
//!
//! | Scenario                     | Behavior                                    |
//! |------------------------------|---------------------------------------------|
//! | No writer queued             | Readers enter immediately                   |
//! | Writer queued behind readers | New readers queue behind the writer         |
//! | Writer releases              | Next writer first, else all queued readers  |
//! | Several writers              | FIFO                                        |
//!
//! No ordering is promised among readers.

mod async_one_many;
mod completion;
mod hybrid;
mod one_many;
mod semaphore;
pub mod state;

pub use async_one_many::{
    Acquire, AsyncAccessGuard, AsyncLockSnapshot, AsyncOneManyLock, LockFuture,
};
pub use completion::{Completion, Grant};
pub use hybrid::HybridLock;
pub use one_many::{LockSnapshot, OneManyLock, ReadGuard, WriteGuard};
pub use semaphore::Semaphore;
pub use state::{Entry, LockMode, LockState, Wake, COUNTER_LIMIT};

use core::fmt;

use crate::error::LockError;

/// The kind of access requested from a one-many lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AccessMode {
    /// Shared (reader) access; any number of holders, no writer.
    Shared,
    /// Exclusive (writer) access; one holder, no readers.
    Exclusive,
}

impl AccessMode {
    /// Returns true for [`AccessMode::Exclusive`].
    #[must_use]
    pub const fn is_exclusive(self) -> bool {
        matches!(self, Self::Exclusive)
    }
}

impl From<bool> for AccessMode {
    /// `true` requests exclusive access.
    fn from(exclusive: bool) -> Self {
        if exclusive {
            Self::Exclusive
        } else {
            Self::Shared
        }
    }
}

impl fmt::Display for AccessMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Shared => "shared",
            Self::Exclusive => "exclusive",
        })
    }
}

/// The acquire/release contract shared by the one-many locks.
pub trait OneManyAccess {
    /// What [`acquire`](Self::acquire) hands back: the outcome of a blocking
    /// call, or a future to await.
    type Handle<'a>
    where
        Self: 'a;

    /// Requests access of the given kind.
    fn acquire(&self, mode: AccessMode) -> Self::Handle<'_>;

    /// Releases access previously granted by [`acquire`](Self::acquire).
    fn release(&self) -> Result<(), LockError>;
}

impl OneManyAccess for OneManyLock {
    type Handle<'a> = Result<(), LockError>;

    fn acquire(&self, mode: AccessMode) -> Self::Handle<'_> {
        self.enter(mode)
    }

    fn release(&self) -> Result<(), LockError> {
        self.leave()
    }
}

impl OneManyAccess for AsyncOneManyLock {
    type Handle<'a> = Acquire<'a>;

    fn acquire(&self, mode: AccessMode) -> Self::Handle<'_> {
        self.wait(mode)
    }

    fn release(&self) -> Result<(), LockError> {
        Self::release(self)
    }
}
