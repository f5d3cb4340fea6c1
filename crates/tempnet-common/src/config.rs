//! Configuration model for transient fixture creation.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants;
use crate::error::{Result, TempnetError};

/// Limits and paths used when creating and tearing down transient objects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TempnetConfig {
    /// Bound on attempts for collision-prone random allocations.
    pub max_attempts: u32,
    /// How long to wait for a bus device to materialize after creation.
    pub materialize_timeout: Duration,
    /// Probe interval while waiting for a bus device to materialize.
    pub materialize_probe: Duration,
    /// How long to wait for a network interface to become operational.
    pub up_timeout: Duration,
    /// Probe interval while waiting for a network interface.
    pub up_probe: Duration,
    /// Mount point of sysfs.
    pub sysfs_root: PathBuf,
}

impl Default for TempnetConfig {
    fn default() -> Self {
        Self {
            max_attempts: constants::DEFAULT_MAX_ATTEMPTS,
            materialize_timeout: Duration::from_secs(2),
            materialize_probe: Duration::from_millis(1),
            up_timeout: Duration::from_secs(2),
            up_probe: Duration::from_millis(100),
            sysfs_root: PathBuf::from(constants::DEFAULT_SYSFS_ROOT),
        }
    }
}

impl TempnetConfig {
    /// Builds the default configuration, overlaid with values taken from the
    /// process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if an environment override cannot be parsed.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the default configuration, overlaid with values returned by
    /// `lookup` for the recognized environment variable names.
    ///
    /// # Errors
    ///
    /// Returns an error if an override cannot be parsed or is out of range.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(root) = lookup(constants::ENV_SYSFS_ROOT) {
            config.sysfs_root = PathBuf::from(root);
        }
        if let Some(attempts) = lookup(constants::ENV_MAX_ATTEMPTS) {
            config.max_attempts =
                attempts
                    .trim()
                    .parse()
                    .map_err(|e| TempnetError::Config {
                        message: format!(
                            "{} must be a positive integer, got {attempts:?}: {e}",
                            constants::ENV_MAX_ATTEMPTS
                        ),
                    })?;
        }
        config.validate()?;
        Ok(config)
    }

    /// Checks the configuration for values that would make every operation
    /// fail.
    ///
    /// # Errors
    ///
    /// Returns an error if the retry bound is zero or a probe interval is zero.
    pub fn validate(&self) -> Result<()> {
        if self.max_attempts == 0 {
            return Err(TempnetError::Config {
                message: "max_attempts must be at least 1".into(),
            });
        }
        if self.materialize_probe.is_zero() || self.up_probe.is_zero() {
            return Err(TempnetError::Config {
                message: "probe intervals must be non-zero".into(),
            });
        }
        Ok(())
    }

    /// Returns the sysfs directory of the netdevsim bus.
    #[must_use]
    pub fn netdevsim_root(&self) -> PathBuf {
        self.sysfs_root.join("bus").join(constants::NETDEVSIM_BUS)
    }

    /// Returns the sysfs directory listing existing netdevsim devices.
    #[must_use]
    pub fn netdevsim_devices(&self) -> PathBuf {
        self.netdevsim_root().join("devices")
    }
}
