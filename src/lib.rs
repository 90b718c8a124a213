//! onemany: one-writer/many-readers locks for threads and for tasks.
//!
//! # Overview
//!
//! The crate provides two independent implementations of the same contract:
//! exclusive access for one writer, shared access for any number of readers,
//! and no writer starvation. A reader that arrives while a writer is queued
//! waits behind that writer instead of joining the readers already inside.
//!
//! - [`sync::OneManyLock`] blocks the calling thread. Its entire state lives in
//!   one packed `u32` updated by compare-and-swap; two counting semaphores are
//!   used only to park and unpark threads once the word says they are queued.
//! - [`sync::AsyncOneManyLock`] never blocks a thread. Contention is resolved by
//!   handing out completion handles (futures) that a later `release` completes.
//!
//! Both implement [`sync::OneManyAccess`], whose associated handle type states
//! which of the two may block.
//!
//! # Module Structure
//!
//! - [`sync`]: the locks, their guards, the packed state word and the
//!   supporting semaphore and completion primitives
//! - [`error`]: [`LockError`] and the counter capacity limits
//! - [`config`]: [`LockConfig`] and its environment/file overrides
//! - [`util`]: small internal building blocks (spin lock, owner tokens)
//!
//! # Example
//!
//! ```
//! use onemany::sync::{AccessMode, OneManyLock};
//!
//! let lock = OneManyLock::new();
//! lock.enter(AccessMode::Shared)?;
//! lock.enter(AccessMode::Shared)?;
//! assert_eq!(lock.snapshot().readers_active, 2);
//! lock.leave()?;
//! lock.leave()?;
//! assert!(lock.is_free());
//! # Ok::<(), onemany::LockError>(())
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::missing_const_for_fn)]
#![allow(clippy::doc_markdown)]

pub mod config;
pub mod error;
pub mod sync;
pub mod tracing_compat;
pub mod util;

#[cfg(test)]
pub(crate) mod test_utils;

pub use config::LockConfig;
pub use error::{ConfigError, Counter, LockError, Result};
pub use sync::{AccessMode, AsyncOneManyLock, HybridLock, OneManyAccess, OneManyLock};
