//! Engine configuration
//!
//! ```toml
//! version = "v4"
//! sector_cache_capacity = 128
//! validate_on_open = true
//! ```

use crate::error::{CfbError, Result};
use crate::header::Version;
use crate::io::DEFAULT_CACHE_BLOCKS;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Settings for creating and opening compound files
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Format version for newly created containers
    ///
    /// Opened containers keep the version found in their header.
    pub version: Version,

    /// Blocks kept in the LRU cache of a file-backed container
    pub sector_cache_capacity: usize,

    /// Resolve every stream chain when opening
    pub validate_on_open: bool,
}

impl Default for StorageConfig {
    fn default() -> Self {
        StorageConfig {
            version: Version::V3,
            sector_cache_capacity: DEFAULT_CACHE_BLOCKS,
            validate_on_open: true,
        }
    }
}

impl StorageConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: StorageConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Load and validate a TOML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Render as TOML
    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string(self).map_err(|err| CfbError::Config(err.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.sector_cache_capacity == 0 {
            return Err(CfbError::Config(
                "sector_cache_capacity must be greater than zero".to_string(),
            ));
        }
        Ok(())
    }
}
