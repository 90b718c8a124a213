//! Blocking counting semaphore used to park threads.
//!
//! This is the kernel-style parking primitive behind [`OneManyLock`] and
//! [`HybridLock`]. It carries no lock state of its own beyond a wake count:
//! the owning lock decides in its atomic word who is entitled to proceed and
//! only then calls [`release`](Semaphore::release) with the number of threads
//! to let through. Because permits are counted, a release that happens before
//! the matching [`park`](Semaphore::park) is never lost.
//!
//! Permits go out in ticket order: each `park` draws the next ticket and
//! proceeds once that many permits have been released, so parked threads
//! leave in the order they parked.
//!
//! [`OneManyLock`]: super::OneManyLock
//! [`HybridLock`]: super::HybridLock

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Tickets {
    /// Tickets drawn by `park`.
    issued: u64,
    /// Permits handed out by `release`.
    released: u64,
}

/// A counting semaphore with FIFO `park` and batched `release`.
#[derive(Debug, Default)]
pub struct Semaphore {
    tickets: Mutex<Tickets>,
    /// Signalled whenever permits are added.
    available: Condvar,
}

impl Semaphore {
    /// Creates a semaphore with no permits.
    #[must_use]
    pub const fn new() -> Self {
        Self {
            tickets: parking_lot::const_mutex(Tickets {
                issued: 0,
                released: 0,
            }),
            available: Condvar::new(),
        }
    }

    /// Blocks the calling thread until its turn comes up, then consumes a
    /// permit.
    pub fn park(&self) {
        let mut tickets = self.tickets.lock();
        let ticket = tickets.issued;
        tickets.issued += 1;
        while ticket >= tickets.released {
            self.available.wait(&mut tickets);
        }
    }

    /// Adds `count` permits, letting the next `count` parked threads proceed.
    pub fn release(&self, count: u32) {
        if count == 0 {
            return;
        }
        let mut tickets = self.tickets.lock();
        tickets.released += u64::from(count);
        drop(tickets);
        // Only the holders of the next tickets may leave, so wake everyone
        // and let each check its own.
        self.available.notify_all();
    }

    #[cfg(test)]
    fn available_permits(&self) -> u64 {
        let tickets = self.tickets.lock();
        tickets.released.saturating_sub(tickets.issued)
    }
}
