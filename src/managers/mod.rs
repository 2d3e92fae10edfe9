use std::{path::PathBuf, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::{CacheStore, ConfigError};

#[cfg(feature = "manager-cacache")]
pub mod cacache;

#[cfg(feature = "manager-moka")]
pub mod moka;

fn default_capacity() -> u64 {
    10_000
}

/// The cache store backends that can be selected from configuration.
///
/// ```rust
/// use http_kernel::CacheDriver;
///
/// let driver: CacheDriver =
///     serde_json::from_str(r#"{"type":"moka","capacity":100}"#).unwrap();
/// assert_eq!(driver, CacheDriver::Moka { capacity: 100 });
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum CacheDriver {
    /// In-memory store backed by moka
    Moka {
        /// Maximum number of entries
        #[serde(default = "default_capacity")]
        capacity: u64,
    },
    /// Disk store backed by cacache
    Cacache {
        /// Directory where the cache will be stored
        path: PathBuf,
    },
}

impl Default for CacheDriver {
    fn default() -> Self {
        Self::Moka { capacity: default_capacity() }
    }
}

impl CacheDriver {
    /// The configuration name of this driver
    pub fn name(&self) -> &'static str {
        match self {
            Self::Moka { .. } => "moka",
            Self::Cacache { .. } => "cacache",
        }
    }

    /// Builds the store described by this driver.
    ///
    /// Fails when the settings are invalid or the backend was compiled out.
    pub fn build(&self) -> Result<Arc<dyn CacheStore>, ConfigError> {
        match self {
            Self::Moka { capacity } => {
                if *capacity == 0 {
                    return Err(self.misconfigured("capacity must be positive"));
                }
                self.build_moka(*capacity)
            }
            Self::Cacache { path } => {
                if path.as_os_str().is_empty() {
                    return Err(self.misconfigured("path must not be empty"));
                }
                self.build_cacache(path.clone())
            }
        }
    }

    fn misconfigured(&self, reason: &str) -> ConfigError {
        ConfigError::Driver { driver: self.name(), reason: reason.to_string() }
    }

    #[cfg(feature = "manager-moka")]
    fn build_moka(
        &self,
        capacity: u64,
    ) -> Result<Arc<dyn CacheStore>, ConfigError> {
        Ok(Arc::new(moka::MokaStore::with_capacity(capacity)))
    }

    #[cfg(not(feature = "manager-moka"))]
    fn build_moka(
        &self,
        _capacity: u64,
    ) -> Result<Arc<dyn CacheStore>, ConfigError> {
        Err(self.misconfigured("the `manager-moka` feature is disabled"))
    }

    #[cfg(feature = "manager-cacache")]
    fn build_cacache(
        &self,
        path: PathBuf,
    ) -> Result<Arc<dyn CacheStore>, ConfigError> {
        Ok(Arc::new(cacache::CacacheStore::new(path)))
    }

    #[cfg(not(feature = "manager-cacache"))]
    fn build_cacache(
        &self,
        _path: PathBuf,
    ) -> Result<Arc<dyn CacheStore>, ConfigError> {
        Err(self.misconfigured("the `manager-cacache` feature is disabled"))
    }
}
