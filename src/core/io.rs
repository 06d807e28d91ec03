//! Backing stores for compound file images
//!
//! Three materialization strategies share one positional interface:
//!
//! - [`MemoryStore`] - the whole image in an exclusively owned, growable buffer
//! - [`FileStore`] - an exclusive file handle read on demand through a sector
//!   cache; edits are kept in a dirty overlay and never patch the file itself
//! - [`ImageView`] - a read-only, clonable view over a shared buffer or a
//!   memory map, safe to hand to concurrent readers
//!
//! Sector `n` of a container starts at byte `(n + 1) * sector_size`; the
//! first sector-sized block holds the header.

use crate::error::{CfbError, Result};
use lru::LruCache;
use memmap2::Mmap;
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::num::NonZeroUsize;
use std::path::Path;
use std::sync::Arc;

/// Byte offset of `sector` in an image with the given sector size
pub fn sector_offset(sector_size: usize, sector: u32) -> u64 {
    (sector as u64 + 1) * sector_size as u64
}

/// Read access to a container image
pub trait SectorRead {
    /// Current length of the image in bytes
    fn len(&self) -> u64;

    /// Fill `buf` from absolute position `pos`
    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()>;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of (possibly partial) sectors after the header sector
    fn sector_count(&self, sector_size: usize) -> u32 {
        let len = self.len();
        let sector_size = sector_size as u64;
        if len <= sector_size {
            return 0;
        }
        (len - sector_size).div_ceil(sector_size).min(u32::MAX as u64) as u32
    }

    /// Read part of one sector
    ///
    /// A partial final sector reads as if zero-padded; a sector entirely past
    /// the end of the image is a dangling reference.
    fn read_sector_at(
        &self,
        sector_size: usize,
        sector: u32,
        offset: usize,
        buf: &mut [u8],
    ) -> Result<()> {
        debug_assert!(offset + buf.len() <= sector_size);
        if sector >= self.sector_count(sector_size) {
            return Err(CfbError::corrupt(sector, "sector beyond end of container"));
        }
        let pos = sector_offset(sector_size, sector) + offset as u64;
        let available = self.len().saturating_sub(pos).min(buf.len() as u64) as usize;
        self.read_exact_at(pos, &mut buf[..available])?;
        buf[available..].fill(0);
        Ok(())
    }

    /// Read a whole sector
    fn read_sector(&self, sector_size: usize, sector: u32) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; sector_size];
        self.read_sector_at(sector_size, sector, 0, &mut buf)?;
        Ok(buf)
    }
}

/// Write access to a container image
pub trait SectorWrite: SectorRead {
    /// Write `data` at absolute position `pos`, growing the image as needed
    fn write_all_at(&mut self, pos: u64, data: &[u8]) -> Result<()>;

    /// Write part of one sector
    fn write_sector_at(
        &mut self,
        sector_size: usize,
        sector: u32,
        offset: usize,
        data: &[u8],
    ) -> Result<()> {
        debug_assert!(offset + data.len() <= sector_size);
        self.write_all_at(sector_offset(sector_size, sector) + offset as u64, data)
    }
}

/// Whole image held in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    data: Vec<u8>,
}

impl MemoryStore {
    pub fn new(data: Vec<u8>) -> Self {
        MemoryStore { data }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn into_inner(self) -> Vec<u8> {
        self.data
    }
}

impl SectorRead for MemoryStore {
    fn len(&self) -> u64 {
        self.data.len() as u64
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let start = pos as usize;
        let end = start + buf.len();
        if end > self.data.len() {
            return Err(unexpected_eof(pos, buf.len()));
        }
        buf.copy_from_slice(&self.data[start..end]);
        Ok(())
    }
}

impl SectorWrite for MemoryStore {
    fn write_all_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let start = pos as usize;
        let end = start + data.len();
        if end > self.data.len() {
            self.data.resize(end, 0);
        }
        self.data[start..end].copy_from_slice(data);
        Ok(())
    }
}

/// Block granularity of the file cache and dirty overlay
///
/// Every sector size is a multiple of this and every sector is aligned to it.
const BLOCK_SIZE: usize = 512;

pub const DEFAULT_CACHE_BLOCKS: usize = 64;

/// Random-access store over an exclusively owned file handle
///
/// Clean blocks are read lazily and kept in an LRU cache; written blocks live
/// in an in-memory overlay until the container is written out. The handle is
/// released when the store is dropped, on every exit path.
pub struct FileStore {
    /// File handle - interior mutability lets `&self` readers seek
    file: Mutex<File>,

    /// Length of the file when it was opened
    file_len: u64,

    /// Logical image length including overlay growth
    len: u64,

    /// Clean blocks read from the file
    cache: Mutex<LruCache<u64, Arc<[u8]>>>,

    /// Blocks modified since opening
    dirty: BTreeMap<u64, Vec<u8>>,
}

impl FileStore {
    /// Open a file for random-access reading
    pub fn open<P: AsRef<Path>>(path: P, cache_blocks: usize) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_file(file, cache_blocks)
    }

    /// Wrap an already open file
    pub fn from_file(file: File, cache_blocks: usize) -> Result<Self> {
        let file_len = file.metadata()?.len();
        let capacity = NonZeroUsize::new(cache_blocks).unwrap_or(NonZeroUsize::MIN);
        Ok(FileStore {
            file: Mutex::new(file),
            file_len,
            len: file_len,
            cache: Mutex::new(LruCache::new(capacity)),
            dirty: BTreeMap::new(),
        })
    }

    /// Number of blocks held in the dirty overlay
    pub fn dirty_blocks(&self) -> usize {
        self.dirty.len()
    }

    /// Fetch a block as it currently reads, overlay first
    fn block(&self, index: u64) -> Result<Arc<[u8]>> {
        if let Some(block) = self.dirty.get(&index) {
            return Ok(Arc::from(block.as_slice()));
        }
        self.clean_block(index)
    }

    /// Fetch a block from the file (zero-padded past its end)
    fn clean_block(&self, index: u64) -> Result<Arc<[u8]>> {
        if let Some(block) = self.cache.lock().get(&index) {
            return Ok(Arc::clone(block));
        }

        let start = index * BLOCK_SIZE as u64;
        let mut data = vec![0u8; BLOCK_SIZE];
        if start < self.file_len {
            let available = (self.file_len - start).min(BLOCK_SIZE as u64) as usize;
            let mut file = self.file.lock();
            file.seek(SeekFrom::Start(start))?;
            file.read_exact(&mut data[..available])?;
        }

        let block: Arc<[u8]> = Arc::from(data);
        self.cache.lock().put(index, Arc::clone(&block));
        Ok(block)
    }
}

impl SectorRead for FileStore {
    fn len(&self) -> u64 {
        self.len
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        if pos + buf.len() as u64 > self.len {
            return Err(unexpected_eof(pos, buf.len()));
        }

        let mut done = 0;
        while done < buf.len() {
            let at = pos + done as u64;
            let index = at / BLOCK_SIZE as u64;
            let within = (at % BLOCK_SIZE as u64) as usize;
            let take = (BLOCK_SIZE - within).min(buf.len() - done);
            let block = self.block(index)?;
            buf[done..done + take].copy_from_slice(&block[within..within + take]);
            done += take;
        }
        Ok(())
    }
}

impl SectorWrite for FileStore {
    fn write_all_at(&mut self, pos: u64, data: &[u8]) -> Result<()> {
        let mut done = 0;
        while done < data.len() {
            let at = pos + done as u64;
            let index = at / BLOCK_SIZE as u64;
            let within = (at % BLOCK_SIZE as u64) as usize;
            let take = (BLOCK_SIZE - within).min(data.len() - done);

            if !self.dirty.contains_key(&index) {
                let current = if index * (BLOCK_SIZE as u64) < self.len {
                    self.clean_block(index)?.to_vec()
                } else {
                    vec![0u8; BLOCK_SIZE]
                };
                self.dirty.insert(index, current);
            }
            if let Some(block) = self.dirty.get_mut(&index) {
                block[within..within + take].copy_from_slice(&data[done..done + take]);
            }
            done += take;
        }

        self.len = self.len.max(pos + data.len() as u64);
        Ok(())
    }
}

impl std::fmt::Debug for FileStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileStore")
            .field("file_len", &self.file_len)
            .field("len", &self.len)
            .field("dirty_blocks", &self.dirty.len())
            .finish()
    }
}

#[derive(Debug)]
enum ImageBytes {
    Shared(Arc<[u8]>),
    Mapped(Arc<Mmap>),
}

/// Read-only view over a complete image
///
/// Cloning is cheap; clones share the underlying bytes.
#[derive(Debug, Clone)]
pub struct ImageView {
    bytes: Arc<ImageBytes>,
}

impl ImageView {
    pub fn from_bytes(bytes: impl Into<Arc<[u8]>>) -> Self {
        ImageView {
            bytes: Arc::new(ImageBytes::Shared(bytes.into())),
        }
    }

    /// Map a file read-only
    pub fn map<P: AsRef<Path>>(path: P) -> Result<Self> {
        let file = File::open(path)?;
        // SAFETY: the mapping is read-only; callers must not truncate or
        // rewrite the file while the view is alive.
        let map = unsafe { Mmap::map(&file)? };
        Ok(ImageView {
            bytes: Arc::new(ImageBytes::Mapped(Arc::new(map))),
        })
    }

    pub fn as_bytes(&self) -> &[u8] {
        match self.bytes.as_ref() {
            ImageBytes::Shared(bytes) => bytes,
            ImageBytes::Mapped(map) => map,
        }
    }
}

impl SectorRead for ImageView {
    fn len(&self) -> u64 {
        self.as_bytes().len() as u64
    }

    fn read_exact_at(&self, pos: u64, buf: &mut [u8]) -> Result<()> {
        let bytes = self.as_bytes();
        let start = pos as usize;
        let end = start + buf.len();
        if end > bytes.len() {
            return Err(unexpected_eof(pos, buf.len()));
        }
        buf.copy_from_slice(&bytes[start..end]);
        Ok(())
    }
}

fn unexpected_eof(pos: u64, len: usize) -> CfbError {
    CfbError::Io(std::io::Error::new(
        std::io::ErrorKind::UnexpectedEof,
        format!("read of {} bytes at {} past end of image", len, pos),
    ))
}
