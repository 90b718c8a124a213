//! Spin-then-park exclusive lock with owner tracking and recursion.
//!
//! The fast path is a single compare-and-swap on a waiter count: `0` means
//! free, `1` means held with nobody parked, `n` means held with `n - 1`
//! threads parked on the semaphore. A contender first retries the fast path
//! [`spin_count`](crate::LockConfig::spin_count) times, then registers itself
//! in the count and parks. A releaser that sees parked threads hands the lock
//! directly to one of them.
//!
//! The owning thread may enter again; each `enter` must be paired with a
//! `leave`.

use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};

use crate::config::LockConfig;
use crate::error::{Counter, LockError};
use crate::tracing_compat::{trace, warn};
use crate::util::thread_id::{current_thread_token, NO_OWNER};

use super::semaphore::Semaphore;

/// A recursive exclusive lock that spins briefly before parking.
#[derive(Debug)]
pub struct HybridLock {
    waiters: AtomicU32,
    parked: Semaphore,
    owner: AtomicU64,
    /// Written only by the owner.
    recursion: AtomicU32,
    config: LockConfig,
}

impl HybridLock {
    /// Creates an unlocked lock with the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::with_config(LockConfig::default())
    }

    /// Creates an unlocked lock with the given configuration.
    #[must_use]
    pub fn with_config(config: LockConfig) -> Self {
        Self {
            waiters: AtomicU32::new(0),
            parked: Semaphore::new(),
            owner: AtomicU64::new(NO_OWNER),
            recursion: AtomicU32::new(0),
            config,
        }
    }

    /// Blocks until the calling thread owns the lock.
    ///
    /// Re-entering from the owning thread only bumps the recursion count.
    pub fn enter(&self) -> Result<(), LockError> {
        let token = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == token {
            return self.recurse();
        }

        for _ in 0..self.config.spin_count {
            if self.try_claim() {
                self.take_ownership(token);
                return Ok(());
            }
            std::hint::spin_loop();
        }

        if self.waiters.fetch_add(1, Ordering::Acquire) > 0 {
            trace!("hybrid lock contended, parking");
            // The releaser leaves the count raised for us: waking means owning.
            self.parked.park();
        }
        self.take_ownership(token);
        Ok(())
    }

    /// Takes the lock only if it is free, or re-enters it from the owner.
    pub fn try_enter(&self) -> Result<bool, LockError> {
        let token = current_thread_token();
        if self.owner.load(Ordering::Relaxed) == token {
            return self.recurse().map(|()| true);
        }
        if self.try_claim() {
            self.take_ownership(token);
            return Ok(true);
        }
        Ok(false)
    }

    /// Undoes one `enter` by the owning thread.
    pub fn leave(&self) -> Result<(), LockError> {
        let token = current_thread_token();
        let owner = self.owner.load(Ordering::Relaxed);
        if owner != token {
            let err = if owner == NO_OWNER {
                LockError::NotHeld
            } else {
                LockError::NotOwner
            };
            warn!(%err, owner, caller = token, "hybrid leave rejected");
            return Err(err);
        }

        let depth = self.recursion.load(Ordering::Relaxed);
        if depth > 1 {
            self.recursion.store(depth - 1, Ordering::Relaxed);
            return Ok(());
        }
        self.recursion.store(0, Ordering::Relaxed);
        self.owner.store(NO_OWNER, Ordering::Relaxed);

        if self.waiters.fetch_sub(1, Ordering::Release) > 1 {
            trace!("hybrid lock handing off to a parked thread");
            self.parked.release(1);
        }
        Ok(())
    }

    /// Returns true if some thread owns the lock.
    #[must_use]
    pub fn is_locked(&self) -> bool {
        self.waiters.load(Ordering::Acquire) > 0
    }

    /// Returns true if the calling thread owns the lock.
    #[must_use]
    pub fn is_owned_by_current_thread(&self) -> bool {
        self.owner.load(Ordering::Relaxed) == current_thread_token()
    }

    /// Threads parked or about to park; diagnostic only.
    #[must_use]
    pub fn waiting(&self) -> u32 {
        self.waiters.load(Ordering::Relaxed).saturating_sub(1)
    }

    fn try_claim(&self) -> bool {
        self.waiters
            .compare_exchange(0, 1, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    fn take_ownership(&self, token: u64) {
        self.owner.store(token, Ordering::Relaxed);
        self.recursion.store(1, Ordering::Relaxed);
    }

    fn recurse(&self) -> Result<(), LockError> {
        let depth = self.recursion.load(Ordering::Relaxed);
        let next = depth.checked_add(1).ok_or(LockError::CapacityExceeded {
            counter: Counter::Recursion,
            limit: u32::MAX,
        })?;
        self.recursion.store(next, Ordering::Relaxed);
        Ok(())
    }
}

impl Default for HybridLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, wait_until};
    use std::sync::Arc;
    use std::thread;

    fn init_test(name: &str) {
        init_test_logging();
        crate::test_phase!(name);
    }

    #[test]
    fn recursion_needs_matching_leaves() {
        init_test("recursion_needs_matching_leaves");
        let lock = HybridLock::new();
        lock.enter().expect("enter");
        lock.enter().expect("re-enter");
        let got = lock.try_enter().expect("try re-enter");
        crate::assert_with_log!(got, "owner re-enters", true, got);

        lock.leave().expect("leave 3");
        lock.leave().expect("leave 2");
        let held = lock.is_locked();
        crate::assert_with_log!(held, "still held", true, held);
        lock.leave().expect("leave 1");
        let held = lock.is_locked();
        crate::assert_with_log!(!held, "released", false, held);
        crate::test_complete!("recursion_needs_matching_leaves");
    }

    #[test]
    fn leave_errors() {
        init_test("leave_errors");
        let lock = Arc::new(HybridLock::new());
        let err = lock.leave();
        crate::assert_with_log!(
            err == Err(LockError::NotHeld),
            "not held",
            Err::<(), _>(LockError::NotHeld),
            err
        );

        lock.enter().expect("enter");
        let other = Arc::clone(&lock);
        let err = thread::spawn(move || other.leave())
            .join()
            .expect("thread panicked");
        crate::assert_with_log!(
            err == Err(LockError::NotOwner),
            "not owner",
            Err::<(), _>(LockError::NotOwner),
            err
        );
        lock.leave().expect("owner leave");
        crate::test_complete!("leave_errors");
    }

    #[test]
    fn contender_parks_until_handed_off() {
        init_test("contender_parks_until_handed_off");
        let lock = Arc::new(HybridLock::with_config(LockConfig::new().spin_count(0)));
        lock.enter().expect("enter");

        let contender = Arc::clone(&lock);
        let handle = thread::spawn(move || {
            contender.enter().expect("contender enter");
            let owns = contender.is_owned_by_current_thread();
            contender.leave().expect("contender leave");
            owns
        });

        wait_until("contender parked", || lock.waiting() == 1);
        let got = lock.try_enter().expect("owner re-enter");
        crate::assert_with_log!(got, "owner still re-enters", true, got);
        lock.leave().expect("leave inner");
        lock.leave().expect("leave outer");

        let owned = handle.join().expect("contender panicked");
        crate::assert_with_log!(owned, "contender owned it", true, owned);
        let held = lock.is_locked();
        crate::assert_with_log!(!held, "free at the end", false, held);
        crate::test_complete!("contender_parks_until_handed_off");
    }

    #[test]
    fn counter_is_exclusive() {
        init_test("counter_is_exclusive");
        let lock = Arc::new(HybridLock::new());
        let counter = Arc::new(AtomicU64::new(0));
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let lock = Arc::clone(&lock);
                let counter = Arc::clone(&counter);
                thread::spawn(move || {
                    for _ in 0..1_000 {
                        lock.enter().expect("enter");
                        // Non-atomic read-modify-write; only safe under the lock.
                        let seen = counter.load(Ordering::Relaxed);
                        counter.store(seen + 1, Ordering::Relaxed);
                        lock.leave().expect("leave");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("worker panicked");
        }
        let total = counter.load(Ordering::Relaxed);
        crate::assert_with_log!(total == 4_000, "no lost updates", 4_000, total);
        crate::test_complete!("counter_is_exclusive");
    }
}
