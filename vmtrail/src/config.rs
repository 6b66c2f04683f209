//! Store configuration.
//!
//! A [`StoreConfig`] names a backend and a retention window. It is plain
//! serde data so it can live in a config file, and [`StoreConfig::open`]
//! turns it into a boxed [`EventStore`].

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Result};
use crate::memory::InMemoryEventStore;
use crate::persistent::PersistentEventStore;
use crate::store::EventStore;

/// Default retention for the in-memory backend.
pub const DEFAULT_MEMORY_WINDOW: Duration = Duration::from_secs(60);

/// Default retention for the persistent backend (one day).
pub const DEFAULT_PERSISTENT_WINDOW: Duration = Duration::from_secs(24 * 3600);

/// Which backend holds the events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Backend {
    /// Ephemeral, lost on exit.
    Memory,
    /// Durable, stored in the given directory.
    Persistent {
        /// Store directory.
        path: PathBuf,
    },
}

/// Backend plus retention window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoreConfig {
    /// Rolling retention window.
    pub window: Duration,
    /// Backend selection.
    pub backend: Backend,
}

impl StoreConfig {
    /// In-memory store with the given window.
    pub fn memory(window: Duration) -> Self {
        Self {
            window,
            backend: Backend::Memory,
        }
    }

    /// Persistent store at `path` with the given window.
    pub fn persistent(path: impl Into<PathBuf>, window: Duration) -> Self {
        Self {
            window,
            backend: Backend::Persistent { path: path.into() },
        }
    }

    /// Checks that the window is usable.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidWindow`] if the window is zero or does
    /// not fit in a chrono `TimeDelta`.
    pub fn validate(&self) -> Result<()> {
        if self.window.is_zero() {
            return Err(ConfigError::InvalidWindow {
                window: self.window,
                reason: "window must be greater than zero".to_string(),
            }
            .into());
        }
        if chrono::TimeDelta::from_std(self.window).is_err() {
            return Err(ConfigError::InvalidWindow {
                window: self.window,
                reason: "window is too large".to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Validates the config and opens the selected backend.
    ///
    /// # Errors
    ///
    /// Returns a config error if validation fails, or a store error if the
    /// persistent backend cannot be opened. There is no fallback from a
    /// failed persistent open to the in-memory backend.
    pub fn open(&self) -> Result<Box<dyn EventStore>> {
        self.validate()?;
        match &self.backend {
            Backend::Memory => Ok(Box::new(InMemoryEventStore::new(self.window))),
            Backend::Persistent { path } => {
                Ok(Box::new(PersistentEventStore::open(path, self.window)?))
            }
        }
    }
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self::memory(DEFAULT_MEMORY_WINDOW)
    }
}

/// Parses a human-readable duration such as `"30s"`, `"10m"`, `"1h"` or `"7d"`.
///
/// # Errors
///
/// Returns [`ConfigError::InvalidDuration`] for an empty string, a
/// non-numeric amount, an unknown unit, or an amount that overflows.
pub fn parse_duration(s: &str) -> Result<Duration> {
    let input = s.trim();
    let invalid = |reason: String| ConfigError::InvalidDuration {
        input: s.to_string(),
        reason,
    };

    let Some(unit) = input.chars().last() else {
        return Err(invalid("empty duration string".to_string()).into());
    };
    let num_str = &input[..input.len() - unit.len_utf8()];
    let num: u64 = num_str
        .parse()
        .map_err(|e: std::num::ParseIntError| invalid(e.to_string()))?;

    let scale = match unit {
        's' => 1,
        'm' => 60,
        'h' => 3600,
        'd' => 86400,
        _ => return Err(invalid(format!("unknown unit '{unit}', use s, m, h, or d")).into()),
    };

    let secs = num
        .checked_mul(scale)
        .ok_or_else(|| invalid("duration overflows".to_string()))?;
    Ok(Duration::from_secs(secs))
}
