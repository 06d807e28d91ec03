//! Compound File Binary engine
//!
//! A compound file is a small filesystem inside one flat file: a header,
//! a sector allocation table (FAT), a second table for 64-byte mini sectors
//! (MiniFAT), a directory of storages and streams, and the stream payloads.
//!
//! - [`error`] - Error taxonomy
//! - [`header`] - Header codec and format constants
//! - [`allocator`] - Chain allocation:
//!   - [`allocator::fat`] - Regular sectors, including DIFAT growth
//!   - [`allocator::minifat`] - Mini sectors inside the mini-stream
//! - [`directory`] - Entry table and red-black sibling trees
//! - [`stream`] - Byte-range access to stream entries
//! - [`io`] - Backing stores (memory, file, read-only image)
//! - [`compound`] - The [`CompoundFile`] façade
//! - [`validation`] - Entry names and paths
//! - [`config`] - [`StorageConfig`]
//!
//! ## Layout
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │ Header (first sector)                       │
//! │  - Magic D0 CF 11 E0 A1 B1 1A E1            │
//! │  - Sector shift, counts, first 109 FAT      │
//! │    sector locations                         │
//! ├─────────────────────────────────────────────┤
//! │ Sector 0..N, each 512 or 4096 bytes         │
//! │  - FAT / DIFAT sectors                      │
//! │  - Directory chain (128-byte entries)       │
//! │  - MiniFAT chain                            │
//! │  - Mini-stream (64-byte mini sectors)       │
//! │  - Stream data chains                       │
//! └─────────────────────────────────────────────┘
//! ```

pub mod allocator;
pub mod compound;
pub mod config;
pub mod directory;
pub mod error;
pub mod header;
pub mod io;
pub mod stream;
pub mod validation;


// Re-export commonly used types
pub use allocator::{fat::Fat, minifat::MiniFat, AllocationTable, ChainAllocator};
pub use compound::{CompoundFile, EntryInfo, StorageStats};
pub use config::StorageConfig;
pub use directory::entry::EntryType;
pub use error::{CfbError, ErrorKind, Result};
pub use header::{Header, Version, MAGIC, MINI_STREAM_CUTOFF};
pub use io::{FileStore, ImageView, MemoryStore, SectorRead, SectorWrite};
pub use stream::{StreamHandle, StreamReader};
pub use validation::EntryName;
