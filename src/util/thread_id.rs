//! Per-thread owner tokens.
//!
//! `std::thread::ThreadId` cannot be stored in an atomic, so each thread lazily
//! draws a nonzero `u64` from a global counter the first time it asks. `0` is
//! reserved to mean "no owner".

use std::sync::atomic::{AtomicU64, Ordering};

/// Token value meaning "no thread".
pub const NO_OWNER: u64 = 0;

static NEXT_TOKEN: AtomicU64 = AtomicU64::new(1);

thread_local! {
    static TOKEN: u64 = NEXT_TOKEN.fetch_add(1, Ordering::Relaxed);
}

/// Returns the calling thread's token. Never [`NO_OWNER`].
#[must_use]
pub fn current_thread_token() -> u64 {
    TOKEN.with(|token| *token)
}
