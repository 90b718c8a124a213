//! Lock tuning configuration.
//!
//! # Configuration Precedence
//!
//! Settings are resolved in this order (highest priority first):
//!
//! 1. **Programmatic**: values set via builder methods (`spin_count(0)`)
//! 2. **Environment variables**: values from `ONEMANY_*` env vars
//! 3. **Config file**: values loaded from a TOML file (requires `config-file` feature)
//! 4. **Defaults**: [`LockConfig::default()`]
//!
//! # Supported Environment Variables
//!
//! | Variable | Type | Maps to |
//! |----------|------|---------|
//! | `ONEMANY_SPIN_COUNT` | `u32` | `spin_count` |
//!
//! # Defaults
//!
//! | Field | Default |
//! |-------|---------|
//! | `spin_count` | 64 |

use crate::error::ConfigError;
use crate::tracing_compat::debug;

/// Environment variable name for the optimistic spin count.
pub const ENV_SPIN_COUNT: &str = "ONEMANY_SPIN_COUNT";

/// Default number of optimistic spins before a contended thread parks.
pub const DEFAULT_SPIN_COUNT: u32 = 64;

/// Tuning knobs shared by the blocking locks.
///
/// The async lock never spins or parks and ignores this configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LockConfig {
    /// How many times a contended thread retries the immediate (no-queue)
    /// transitions, with a spin-loop hint between attempts, before it records
    /// itself as a waiter and parks. `0` parks right away.
    pub spin_count: u32,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            spin_count: DEFAULT_SPIN_COUNT,
        }
    }
}

impl LockConfig {
    /// Creates the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the optimistic spin count.
    #[must_use]
    pub const fn spin_count(mut self, spins: u32) -> Self {
        self.spin_count = spins;
        self
    }

    /// Defaults with environment overrides applied.
    pub fn from_env() -> Result<Self, ConfigError> {
        let mut config = Self::default();
        apply_env_overrides(&mut config)?;
        Ok(config)
    }
}

/// Apply environment variable overrides to a [`LockConfig`].
///
/// Only variables that are set are applied. A variable that is set but
/// unparseable is an error rather than silently ignored.
pub fn apply_env_overrides(config: &mut LockConfig) -> Result<(), ConfigError> {
    if let Some(val) = read_env(ENV_SPIN_COUNT) {
        config.spin_count = parse_u32(ENV_SPIN_COUNT, &val)?;
        debug!(spin_count = config.spin_count, "spin count overridden from environment");
    }
    Ok(())
}

fn read_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

fn parse_u32(var: &'static str, val: &str) -> Result<u32, ConfigError> {
    val.trim().parse::<u32>().map_err(|_| ConfigError::InvalidEnv {
        var,
        expected: "unsigned 32-bit integer",
        value: val.to_string(),
    })
}

// =========================================================================
// TOML config file support (feature-gated)
// =========================================================================

/// TOML-deserializable lock configuration.
///
/// ```toml
/// [lock]
/// spin_count = 128
/// ```
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LockTomlConfig {
    /// Lock settings.
    #[serde(default)]
    pub lock: LockToml,
}

/// `[lock]` section of the TOML config.
#[cfg(feature = "config-file")]
#[derive(serde::Deserialize, Default, Debug)]
pub struct LockToml {
    /// Optimistic spins before parking.
    pub spin_count: Option<u32>,
}

/// Apply a parsed TOML config to a [`LockConfig`].
#[cfg(feature = "config-file")]
pub fn apply_toml_config(config: &mut LockConfig, toml_config: &LockTomlConfig) {
    if let Some(spins) = toml_config.lock.spin_count {
        config.spin_count = spins;
    }
}

/// Parse TOML text into a [`LockTomlConfig`].
#[cfg(feature = "config-file")]
pub fn parse_toml_str(path: &str, contents: &str) -> Result<LockTomlConfig, ConfigError> {
    toml::from_str(contents).map_err(|e| ConfigError::Parse {
        path: path.to_string(),
        message: e.to_string(),
    })
}

#[cfg(feature = "config-file")]
impl LockConfig {
    /// Loads a configuration file, then applies environment overrides on top.
    pub fn from_file(path: impl AsRef<std::path::Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let display = path.display().to_string();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: display.clone(),
            source,
        })?;
        let parsed = parse_toml_str(&display, &contents)?;
        let mut config = Self::default();
        apply_toml_config(&mut config, &parsed);
        apply_env_overrides(&mut config)?;
        debug!(path = %display, spin_count = config.spin_count, "lock config loaded");
        Ok(config)
    }
}
