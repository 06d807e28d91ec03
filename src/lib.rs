//! # cfb-store - Compound File Binary structured storage
//!
//! `cfb-store` reads, creates and edits Compound File Binary containers
//! (the OLE2 "structured storage" format behind legacy Office documents,
//! MSI packages and many other binary formats). A container is a small
//! filesystem in one file: storages play the role of directories and
//! streams hold bytes.
//!
//! - **Both format versions**: 512-byte sector (v3) and 4096-byte sector (v4) containers
//! - **Transparent size classes**: small streams live in the mini-stream,
//!   large ones in regular sectors, and data migrates as streams grow or shrink
//! - **Strict loading**: cyclic chains, dangling links and malformed directories
//!   are reported as errors, never followed
//! - **Whole-image persistence**: saving writes a freshly laid-out image
//!
//! ## Quick Start
//!
//! ```rust
//! use cfb_store::{CompoundFile, Result};
//! use std::io::{Read, Write};
//!
//! # fn main() -> Result<()> {
//! let mut file = CompoundFile::create()?;
//! file.create_storage("/Dir1")?;
//! file.create_stream("/Dir1/Stream1")?.write_all(b"Hello")?;
//!
//! let bytes = file.to_bytes()?;
//! let reopened = CompoundFile::open_bytes(bytes)?;
//!
//! let mut content = Vec::new();
//! reopened.stream_reader("/Dir1/Stream1")?.read_to_end(&mut content)?;
//! assert_eq!(content, b"Hello");
//! # Ok(())
//! # }
//! ```
//!
//! ## Advanced Usage
//!
//! ```rust,no_run
//! use cfb_store::{CompoundFileBuilder, Result, Version};
//!
//! # fn main() -> Result<()> {
//! let mut file = CompoundFileBuilder::new()
//!     .version(Version::V4)
//!     .validate_on_open(false)
//!     .create()?;
//!
//! file.write_stream("/Contents", &[0u8; 10_000])?;
//! file.save("report.cfb")?;
//!
//! let on_disk = CompoundFileBuilder::new()
//!     .sector_cache_capacity(256)
//!     .open_file("report.cfb")?;
//! assert_eq!(on_disk.entry("/Contents")?.size, 10_000);
//! # Ok(())
//! # }
//! ```

pub mod core;

// Re-export core modules internally so crate:: paths in core still work
#[allow(unused_imports)]
pub(crate) use self::core::{
    allocator, compound, config, directory, error, header, io, stream, validation,
};

// Re-export core types that users need
pub use crate::core::{
    compound::{CompoundFile, EntryInfo, StorageStats},
    config::StorageConfig,
    directory::entry::EntryType,
    error::{CfbError, ErrorKind, Result},
    header::{Version, MINI_STREAM_CUTOFF},
    io::{FileStore, ImageView, MemoryStore, SectorRead, SectorWrite},
    stream::{StreamHandle, StreamReader},
    validation::EntryName,
};

use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Builder for creating or opening compound files
///
/// Collects a [`StorageConfig`] through a fluent API and hands it to the
/// matching [`CompoundFile`] constructor.
///
/// # Examples
///
/// ```rust
/// use cfb_store::{CompoundFileBuilder, Version};
///
/// # fn main() -> cfb_store::Result<()> {
/// let file = CompoundFileBuilder::new()
///     .version(Version::V4)
///     .create()?;
/// assert_eq!(file.stats().sector_size, 4096);
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default)]
pub struct CompoundFileBuilder {
    config: StorageConfig,
}

impl CompoundFileBuilder {
    /// Create a new builder with default settings
    pub fn new() -> Self {
        CompoundFileBuilder {
            config: StorageConfig::default(),
        }
    }

    /// Format version for newly created containers
    pub fn version(mut self, version: Version) -> Self {
        self.config.version = version;
        self
    }

    /// Blocks cached when reading a file-backed container
    pub fn sector_cache_capacity(mut self, blocks: usize) -> Self {
        self.config.sector_cache_capacity = blocks;
        self
    }

    /// Resolve every stream chain when opening
    pub fn validate_on_open(mut self, enabled: bool) -> Self {
        self.config.validate_on_open = enabled;
        self
    }

    /// Replace all settings at once, e.g. with a config loaded from TOML
    pub fn config(mut self, config: StorageConfig) -> Self {
        self.config = config;
        self
    }

    /// Create an empty in-memory container
    pub fn create(self) -> Result<CompoundFile<MemoryStore>> {
        info!("Creating {:?} compound file", self.config.version);
        CompoundFile::create_with(self.config)
    }

    /// Open a container image held in memory
    pub fn open_bytes(self, bytes: impl Into<Vec<u8>>) -> Result<CompoundFile<MemoryStore>> {
        let bytes = bytes.into();
        debug!("Opening {}-byte in-memory image", bytes.len());
        CompoundFile::open_with(MemoryStore::new(bytes), self.config)
    }

    /// Read a whole container from `reader` into memory
    pub fn open_reader<R: Read>(self, reader: R) -> Result<CompoundFile<MemoryStore>> {
        CompoundFile::open_reader_with(reader, self.config)
    }

    /// Open a container file for reading and in-session edits
    pub fn open_file<P: AsRef<Path>>(self, path: P) -> Result<CompoundFile<FileStore>> {
        info!("Opening compound file {}", path.as_ref().display());
        CompoundFile::open_file_with(path, self.config)
    }

    /// Map a container file read-only
    pub fn open_mapped<P: AsRef<Path>>(self, path: P) -> Result<CompoundFile<ImageView>> {
        info!("Mapping compound file {}", path.as_ref().display());
        CompoundFile::open_mapped_with(path, self.config)
    }
}
