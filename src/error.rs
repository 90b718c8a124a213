//! Error types for the one-many locks.
//!
//! Error handling follows these principles:
//!
//! - Protocol violations surface synchronously to the misbehaving caller, at
//!   the `leave`/`release`/`enter` call site, and never disturb other waiters.
//! - Misuse never touches the lock's counters: a rejected call leaves the
//!   state exactly as it found it.
//! - Counter overflow is a hard limit. The acquire that would overflow is
//!   rejected instead of wrapping the field.
//! - A failed compare-and-swap is not an error; it is retried internally.
//!
//! # Error Categories
//!
//! - **Usage**: [`LockError::NotHeld`], [`LockError::NotOwner`]
//! - **Capacity**: [`LockError::CapacityExceeded`]
//! - **Lifecycle**: [`LockError::Closed`]
//! - **Configuration**: [`ConfigError`]

use core::fmt;

/// Names one of the bounded counters tracked by a lock.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Counter {
    /// Readers currently holding shared access.
    ReadersActive,
    /// Readers queued for shared access.
    ReadersWaiting,
    /// Writers queued for exclusive access.
    WritersWaiting,
    /// Recursive acquisitions held by the owner of a [`HybridLock`](crate::sync::HybridLock).
    Recursion,
}

impl Counter {
    /// Returns a short lowercase name for logs and messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ReadersActive => "readers_active",
            Self::ReadersWaiting => "readers_waiting",
            Self::WritersWaiting => "writers_waiting",
            Self::Recursion => "recursion",
        }
    }
}

impl fmt::Display for Counter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned by lock operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, thiserror::Error)]
pub enum LockError {
    /// A release was requested but the lock grants nothing to release.
    #[error("lock released without a matching acquire")]
    NotHeld,
    /// The exclusive holder is a different thread than the caller.
    #[error("lock is exclusively owned by another thread")]
    NotOwner,
    /// The acquire would push a counter past its fixed width.
    #[error("{counter} would exceed its limit of {limit}")]
    CapacityExceeded {
        /// The counter that is full.
        counter: Counter,
        /// The largest value the counter can hold.
        limit: u32,
    },
    /// The lock was closed; pending and future acquisitions are refused.
    #[error("lock closed")]
    Closed,
}

impl LockError {
    /// Returns true for errors caused by the caller breaking the
    /// acquire/release protocol.
    #[must_use]
    pub const fn is_usage_error(&self) -> bool {
        matches!(self, Self::NotHeld | Self::NotOwner)
    }

    /// Returns true if the acquire was refused because a counter is full.
    ///
    /// Unlike usage errors, this may succeed when retried after the lock has
    /// drained.
    #[must_use]
    pub const fn is_capacity(&self) -> bool {
        matches!(self, Self::CapacityExceeded { .. })
    }
}

/// Error returned when building a [`LockConfig`](crate::LockConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable is set but could not be parsed.
    #[error("invalid value for {var}: expected {expected}, got {value:?}")]
    InvalidEnv {
        /// Variable name.
        var: &'static str,
        /// Description of the accepted values.
        expected: &'static str,
        /// The raw value found in the environment.
        value: String,
    },
    /// The configuration file could not be read.
    #[error("failed to read config file {path}: {source}")]
    Io {
        /// Path of the file.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The configuration file is not valid TOML for [`LockConfig`](crate::LockConfig).
    #[error("failed to parse config file {path}: {message}")]
    Parse {
        /// Path of the file.
        path: String,
        /// Parser message.
        message: String,
    },
}

/// A specialized `Result` for lock operations.
pub type Result<T, E = LockError> = core::result::Result<T, E>;
