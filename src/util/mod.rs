//! Internal utilities for the onemany locks.
//!
//! These are intentionally small: a spin lock for O(1) bookkeeping sections
//! and per-thread tokens for owner tracking.

pub mod spin;
pub mod thread_id;

pub use spin::{SpinLock, SpinLockGuard};
pub use thread_id::current_thread_token;
