//! Compound file façade
//!
//! [`CompoundFile`] owns the header, both allocation tables, the directory
//! and a backing store, and exposes path-based operations over them. The
//! allocation tables and directory are held in memory for the whole session;
//! only stream payloads are read from and written to the store. Writing out
//! recomputes the complete layout and emits a fresh image in one piece.

use crate::allocator::fat::Fat;
use crate::allocator::minifat::MiniFat;
use crate::allocator::{chain_start, ChainAllocator};
use crate::config::StorageConfig;
use crate::directory::entry::{
    datetime_to_filetime, filetime_to_datetime, DirEntry, EntryKind, EntryType, StorageData,
};
use crate::directory::{Directory, ROOT_ID};
use crate::error::{CfbError, Result};
use crate::header::{Header, Version, FREESECT, HEADER_SIZE, MINI_SECTOR_SIZE};
use crate::io::{sector_offset, FileStore, ImageView, MemoryStore, SectorRead, SectorWrite};
use crate::stream::{StreamHandle, StreamReader};
use crate::validation::{join_path, split_parent, split_path, EntryName};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::io::{Read, Write};
use std::path::Path;
use tempfile::NamedTempFile;

/// Public view of one directory entry
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntryInfo {
    pub name: String,
    /// Canonical `/`-separated path from the root
    pub path: String,
    pub entry_type: EntryType,
    /// Stream size; for the root, the size of the mini-stream
    pub size: u64,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    pub created: Option<DateTime<Utc>>,
    pub modified: Option<DateTime<Utc>>,
}

impl EntryInfo {
    pub fn is_stream(&self) -> bool {
        self.entry_type == EntryType::Stream
    }

    pub fn is_storage(&self) -> bool {
        !self.is_stream()
    }
}

/// Allocation statistics
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageStats {
    pub version: Version,
    pub sector_size: usize,
    /// Regular sectors described by the FAT
    pub total_sectors: usize,
    pub free_sectors: usize,
    /// Mini sectors described by the MiniFAT
    pub total_mini_sectors: usize,
    pub free_mini_sectors: usize,
    /// Directory slots including unused ones
    pub directory_slots: usize,
    /// Allocated entries, root included
    pub entries: usize,
}

/// A compound file over a backing store
///
/// Read operations are available for every store; creating, removing and
/// writing entries requires a [`SectorWrite`] store. Mutating calls on one
/// container must be serialized by the caller.
#[derive(Debug)]
pub struct CompoundFile<S = MemoryStore> {
    pub(crate) header: Header,
    pub(crate) fat: Fat,
    pub(crate) minifat: MiniFat,
    pub(crate) directory: Directory,
    pub(crate) store: S,
    /// Regular chain holding the mini-stream
    pub(crate) mini_chain: Vec<u32>,
    dir_chain: Vec<u32>,
    minifat_chain: Vec<u32>,
    config: StorageConfig,
}

impl CompoundFile<MemoryStore> {
    /// Create an empty in-memory container with default settings
    pub fn create() -> Result<Self> {
        Self::create_with(StorageConfig::default())
    }

    /// Create an empty in-memory container
    ///
    /// Sector 0 holds the FAT and sector 1 the directory; there is no
    /// mini-stream until a small stream is written.
    pub fn create_with(config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let version = config.version;
        let sector_size = version.sector_size();

        let mut fat = Fat::new(sector_size);
        let dir_chain = fat.allocate(1)?;
        let mut file = CompoundFile {
            header: Header::new(version),
            fat,
            minifat: MiniFat::new(sector_size),
            directory: Directory::new(),
            store: MemoryStore::new(vec![0u8; sector_size]),
            mini_chain: Vec::new(),
            dir_chain,
            minifat_chain: Vec::new(),
            config,
        };
        file.sync_header();

        tracing::debug!("Created {:?} container ({}-byte sectors)", version, sector_size);
        Ok(file)
    }

    /// Open a container image held in memory
    pub fn open_bytes(bytes: impl Into<Vec<u8>>) -> Result<Self> {
        Self::open_with(MemoryStore::new(bytes.into()), StorageConfig::default())
    }

    /// Read a whole container from `reader` into memory
    pub fn open_reader<R: Read>(reader: R) -> Result<Self> {
        Self::open_reader_with(reader, StorageConfig::default())
    }

    pub fn open_reader_with<R: Read>(mut reader: R, config: StorageConfig) -> Result<Self> {
        let mut bytes = Vec::new();
        reader.read_to_end(&mut bytes)?;
        Self::open_with(MemoryStore::new(bytes), config)
    }

    /// The image as it currently sits in the store (not a persisted layout)
    pub fn into_store(self) -> MemoryStore {
        self.store
    }
}

impl CompoundFile<FileStore> {
    /// Open a file for random access, reading sectors on demand
    ///
    /// Edits are kept in memory; the file itself is never modified. Use
    /// [`save`](CompoundFile::save) to persist.
    pub fn open_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_file_with(path, StorageConfig::default())
    }

    pub fn open_file_with<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        let store = FileStore::open(path.as_ref(), config.sector_cache_capacity)?;
        Self::open_with(store, config)
    }
}

impl CompoundFile<ImageView> {
    /// Open a file through a read-only memory map
    pub fn open_mapped<P: AsRef<Path>>(path: P) -> Result<Self> {
        Self::open_mapped_with(path, StorageConfig::default())
    }

    pub fn open_mapped_with<P: AsRef<Path>>(path: P, config: StorageConfig) -> Result<Self> {
        Self::open_with(ImageView::map(path)?, config)
    }
}

impl<S: SectorRead> CompoundFile<S> {
    /// Open the container held by `store`
    ///
    /// Fails without exposing any partial state if the header, allocation
    /// tables or directory are inconsistent. With `validate_on_open` every
    /// stream chain is resolved as well.
    pub fn open_with(store: S, config: StorageConfig) -> Result<Self> {
        config.validate()?;
        if store.len() < HEADER_SIZE as u64 {
            return Err(CfbError::format(format!(
                "container of {} bytes is shorter than a header",
                store.len()
            )));
        }
        let mut raw = [0u8; HEADER_SIZE];
        store.read_exact_at(0, &mut raw)?;
        let header = Header::from_bytes(&raw)?;
        header.validate_extent(store.len())?;
        let sector_size = header.sector_size();

        let fat = Fat::load(&header, &store)?;

        let dir_chain = fat.resolve_chain(header.first_dir_sector)?;
        if header.version == Version::V4 && header.num_dir_sectors as usize != dir_chain.len() {
            tracing::warn!(
                "Header declares {} directory sectors, chain holds {}",
                header.num_dir_sectors,
                dir_chain.len()
            );
        }
        let mut dir_bytes = Vec::with_capacity(dir_chain.len() * sector_size);
        for &sector in &dir_chain {
            dir_bytes.extend(store.read_sector(sector_size, sector)?);
        }
        let directory = Directory::load(&dir_bytes, header.version)?;

        let (minifat, minifat_chain) = MiniFat::load(&header, &fat, &store)?;

        let root = directory
            .root()?
            .stream_data()
            .copied()
            .ok_or_else(|| CfbError::format("root entry has no mini-stream"))?;
        let mini_chain = if root.size == 0 {
            Vec::new()
        } else {
            fat.resolve_chain(root.start)?
        };
        if (mini_chain.len() as u64) * (sector_size as u64) < root.size {
            return Err(CfbError::corrupt(
                root.start,
                format!(
                    "mini-stream chain of {} sectors cannot hold {} bytes",
                    mini_chain.len(),
                    root.size
                ),
            ));
        }

        let file = CompoundFile {
            header,
            fat,
            minifat,
            directory,
            store,
            mini_chain,
            dir_chain,
            minifat_chain,
            config,
        };

        if file.config.validate_on_open {
            let streams: Vec<u32> = file
                .directory
                .entries()
                .filter(|(_, entry)| entry.is_stream())
                .map(|(id, _)| id)
                .collect();
            for id in streams {
                file.verify_stream(id)?;
            }
        }

        tracing::debug!(
            "Opened {:?} container: {} entries, {} FAT sectors, {} mini FAT sectors",
            file.header.version,
            file.directory.entry_count(),
            file.fat.fat_sectors().len(),
            file.minifat_chain.len()
        );
        Ok(file)
    }

    pub fn version(&self) -> Version {
        self.header.version
    }

    /// Header as last read or written
    pub fn header(&self) -> &Header {
        &self.header
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Describe the entry at `path`
    pub fn entry(&self, path: &str) -> Result<EntryInfo> {
        let id = self.directory.lookup(path)?;
        Ok(self.info(join_path(&split_path(path)), self.directory.get(id)?))
    }

    pub fn exists(&self, path: &str) -> bool {
        self.directory.lookup(path).is_ok()
    }

    /// Children of the storage at `path`, in sibling order
    pub fn list(&self, path: &str) -> Result<Vec<EntryInfo>> {
        let storage = self.directory.lookup_storage(path)?;
        let prefix = split_path(path);
        self.directory
            .children(storage)?
            .into_iter()
            .map(|id| -> Result<EntryInfo> {
                let entry = self.directory.get(id)?;
                let mut parts = prefix.clone();
                parts.push(&entry.name);
                Ok(self.info(join_path(&parts), entry))
            })
            .collect()
    }

    /// Every entry below the root, depth-first in sibling order
    pub fn walk(&self) -> Result<Vec<EntryInfo>> {
        self.directory
            .walk()?
            .into_iter()
            .map(|(path, id)| -> Result<EntryInfo> {
                Ok(self.info(path, self.directory.get(id)?))
            })
            .collect()
    }

    fn info(&self, path: String, entry: &DirEntry) -> EntryInfo {
        let storage = entry.storage_data();
        EntryInfo {
            name: entry.name.clone(),
            path,
            entry_type: entry.entry_type(),
            size: entry.size(),
            clsid: storage.map_or([0; 16], |s| s.clsid),
            state_bits: storage.map_or(0, |s| s.state_bits),
            created: storage.and_then(|s| filetime_to_datetime(s.created)),
            modified: storage.and_then(|s| filetime_to_datetime(s.modified)),
        }
    }

    /// Index of the stream at `path`
    fn stream_id(&self, path: &str) -> Result<u32> {
        let id = self.directory.lookup(path)?;
        if self.directory.get(id)?.is_stream() {
            Ok(id)
        } else {
            Err(CfbError::WrongEntryKind {
                path: path.to_string(),
                expected: "stream",
            })
        }
    }

    /// Parent storage and index of the non-root entry at `path`
    fn locate(&self, path: &str) -> Result<(u32, u32)> {
        let mut parts = split_path(path);
        let name = parts.pop().ok_or_else(|| {
            CfbError::InvalidOperation(format!("'{}' names the root storage", path))
        })?;
        let parent = self.directory.lookup(&join_path(&parts))?;
        if !self.directory.get(parent)?.is_storage() {
            return Err(CfbError::NotFound(path.to_string()));
        }
        let id = self
            .directory
            .find_child(parent, name)?
            .ok_or_else(|| CfbError::NotFound(path.to_string()))?;
        Ok((parent, id))
    }

    /// Read-only cursor over the stream at `path`
    pub fn stream_reader(&self, path: &str) -> Result<StreamReader<'_, S>> {
        let id = self.stream_id(path)?;
        Ok(StreamReader::new(self, id))
    }

    /// Whole contents of the stream at `path`
    pub fn read_stream(&self, path: &str) -> Result<Vec<u8>> {
        let reader = self.stream_reader(path)?;
        reader.read_at(0, reader.len() as usize)
    }

    pub fn stats(&self) -> StorageStats {
        StorageStats {
            version: self.header.version,
            sector_size: self.fat.sector_size(),
            total_sectors: self.fat.total_sectors(),
            free_sectors: self.fat.free_sectors(),
            total_mini_sectors: self.minifat.total_sectors(),
            free_mini_sectors: self.minifat.free_sectors(),
            directory_slots: self.directory.slot_count(),
            entries: self.directory.entry_count(),
        }
    }

    /// Serialize the container to `sink`
    ///
    /// The complete image is assembled in memory before anything is written,
    /// so a failure leaves the sink untouched.
    pub fn write_to<W: Write>(&mut self, sink: &mut W) -> Result<()> {
        let image = self.build_image()?;
        sink.write_all(&image)?;
        sink.flush()?;
        tracing::info!("Wrote {}-byte container image", image.len());
        Ok(())
    }

    /// Serialize the container to a new buffer
    pub fn to_bytes(&mut self) -> Result<Vec<u8>> {
        self.build_image()
    }

    /// Persist to `path` through a temporary file and an atomic rename
    pub fn save<P: AsRef<Path>>(&mut self, path: P) -> Result<()> {
        let path = path.as_ref();
        let dir = path
            .parent()
            .filter(|parent| !parent.as_os_str().is_empty())
            .unwrap_or_else(|| Path::new("."));

        let image = self.build_image()?;
        let mut temp = NamedTempFile::new_in(dir)?;
        temp.write_all(&image)?;
        temp.as_file().sync_all()?;
        temp.persist(path).map_err(|err| CfbError::Io(err.error))?;

        tracing::info!("Saved {} bytes to {}", image.len(), path.display());
        Ok(())
    }

    /// Freeze the current state into a read-only container
    ///
    /// The snapshot owns its own image and can be shared between threads
    /// while this container keeps changing.
    pub fn snapshot(&mut self) -> Result<CompoundFile<ImageView>> {
        let image = self.build_image()?;
        CompoundFile::open_with(ImageView::from_bytes(image), self.config.clone())
    }

    /// Recompute the sector layout and assemble a complete image
    fn build_image(&mut self) -> Result<Vec<u8>> {
        let sector_size = self.fat.sector_size();

        // Mini-stream shrinks to the last mini sector in use
        let mini_bytes = self.minifat.used_count() as u64 * MINI_SECTOR_SIZE as u64;
        self.minifat.compact();
        self.mini_chain = self
            .fat
            .resize(&self.mini_chain, mini_bytes.div_ceil(sector_size as u64) as usize)?;
        let mini_start = chain_start(&self.mini_chain);
        if let Some(root) = self.directory.get_mut(ROOT_ID)?.stream_data_mut() {
            root.start = mini_start;
            root.size = mini_bytes;
        }

        self.minifat_chain = self
            .fat
            .resize(&self.minifat_chain, self.minifat.sectors_needed())?;
        self.dir_chain = self
            .fat
            .resize(&self.dir_chain, self.directory.sectors_needed(sector_size))?;
        self.sync_header();

        let sectors = self.fat.image_sector_count();
        let mut image = vec![0u8; sector_size * (sectors as usize + 1)];

        let stored = self.store.sector_count(sector_size).min(sectors);
        for sector in 0..stored {
            if self.fat.table().get(sector) == Some(FREESECT) {
                continue;
            }
            let at = sector_offset(sector_size, sector) as usize;
            self.store
                .read_sector_at(sector_size, sector, 0, &mut image[at..at + sector_size])?;
        }

        let directory = self.directory.encode(self.header.version, sector_size);
        place(&mut image, sector_size, &self.dir_chain, &directory);
        place(&mut image, sector_size, &self.minifat_chain, &self.minifat.encode());
        for (location, bytes) in self.fat.encode_fat_sectors() {
            place(&mut image, sector_size, &[location], &bytes);
        }
        let (_, difat_sectors) = self.fat.encode_difat();
        for (location, bytes) in difat_sectors {
            place(&mut image, sector_size, &[location], &bytes);
        }
        image[..HEADER_SIZE].copy_from_slice(&self.header.to_bytes());

        tracing::debug!(
            "Laid out {} sectors: {} FAT, {} DIFAT, {} directory, {} mini FAT, {} mini-stream",
            sectors,
            self.fat.fat_sectors().len(),
            self.fat.difat_sectors().len(),
            self.dir_chain.len(),
            self.minifat_chain.len(),
            self.mini_chain.len()
        );
        Ok(image)
    }

    /// Copy counts and locations from the live tables into the header
    fn sync_header(&mut self) {
        let (inline, _) = self.fat.encode_difat();
        let header = &mut self.header;
        header.num_fat_sectors = self.fat.fat_sectors().len() as u32;
        header.difat = inline;
        header.first_difat_sector = chain_start(self.fat.difat_sectors());
        header.num_difat_sectors = self.fat.difat_sectors().len() as u32;
        header.first_dir_sector = chain_start(&self.dir_chain);
        header.num_dir_sectors = self.dir_chain.len() as u32;
        header.first_minifat_sector = chain_start(&self.minifat_chain);
        header.num_minifat_sectors = self.minifat_chain.len() as u32;
    }
}

impl<S: SectorWrite> CompoundFile<S> {
    /// Add an entry under its parent storage
    fn create_entry(&mut self, path: &str, make: fn(&str) -> DirEntry) -> Result<u32> {
        let (parents, name) = split_parent(path)?;
        let parent = self.directory.lookup_storage(&join_path(&parents))?;
        let id = self.directory.insert(parent, make(name.as_str()))?;
        tracing::debug!("Created {:?} '{}'", self.directory.get(id)?.entry_type(), path);
        Ok(id)
    }

    /// Create an empty stream; the parent storage must exist
    pub fn create_stream(&mut self, path: &str) -> Result<StreamHandle<'_, S>> {
        let id = self.create_entry(path, DirEntry::stream)?;
        Ok(StreamHandle::new(self, id))
    }

    /// Create an empty storage; the parent storage must exist
    pub fn create_storage(&mut self, path: &str) -> Result<()> {
        self.create_entry(path, DirEntry::storage)?;
        Ok(())
    }

    /// Read-write cursor over an existing stream
    pub fn open_stream(&mut self, path: &str) -> Result<StreamHandle<'_, S>> {
        let id = self.stream_id(path)?;
        Ok(StreamHandle::new(self, id))
    }

    /// Replace the contents of a stream, creating it if it does not exist
    ///
    /// Missing parent storages are not created.
    pub fn write_stream(&mut self, path: &str, data: &[u8]) -> Result<()> {
        let id = match self.stream_id(path) {
            Ok(id) => id,
            Err(CfbError::NotFound(_)) => self.create_entry(path, DirEntry::stream)?,
            Err(err) => return Err(err),
        };
        self.set_entry_len(id, data.len() as u64)?;
        self.write_entry_at(id, 0, data)
    }

    /// Remove an entry; storages are removed with everything below them
    pub fn remove(&mut self, path: &str) -> Result<()> {
        let (parent, id) = self.locate(path)?;
        let removed = self.directory.remove(parent, id)?;
        for entry in &removed {
            if let EntryKind::Stream(data) = &entry.kind {
                self.release(data)?;
            }
        }
        tracing::debug!("Removed '{}' ({} entries)", path, removed.len());
        Ok(())
    }

    /// Rename an entry within its storage
    pub fn rename(&mut self, path: &str, new_name: &str) -> Result<()> {
        let name = EntryName::new(new_name)?;
        let (parent, id) = self.locate(path)?;
        self.directory.rename(parent, id, name.as_str())?;
        tracing::debug!("Renamed '{}' to '{}'", path, name);
        Ok(())
    }

    fn storage_mut(&mut self, path: &str) -> Result<&mut StorageData> {
        let id = self.directory.lookup(path)?;
        self.directory
            .get_mut(id)?
            .storage_data_mut()
            .ok_or_else(|| CfbError::WrongEntryKind {
                path: path.to_string(),
                expected: "storage",
            })
    }

    /// Set the class id of a storage or the root
    pub fn set_clsid(&mut self, path: &str, clsid: [u8; 16]) -> Result<()> {
        self.storage_mut(path)?.clsid = clsid;
        Ok(())
    }

    pub fn set_state_bits(&mut self, path: &str, bits: u32) -> Result<()> {
        self.storage_mut(path)?.state_bits = bits;
        Ok(())
    }

    /// Set creation and modification times of a storage; `None` clears
    pub fn set_times(
        &mut self,
        path: &str,
        created: Option<DateTime<Utc>>,
        modified: Option<DateTime<Utc>>,
    ) -> Result<()> {
        let storage = self.storage_mut(path)?;
        storage.created = created.map_or(0, datetime_to_filetime);
        storage.modified = modified.map_or(0, datetime_to_filetime);
        Ok(())
    }
}

/// Copy `bytes` into the image sectors listed in `chain`
fn place(image: &mut [u8], sector_size: usize, chain: &[u32], bytes: &[u8]) {
    for (&sector, chunk) in chain.iter().zip(bytes.chunks(sector_size)) {
        let at = sector_offset(sector_size, sector) as usize;
        image[at..at + chunk.len()].copy_from_slice(chunk);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::header::{read_u32, ENDOFCHAIN};

    #[test]
    fn test_empty_container_layout() {
        let mut file = CompoundFile::create().unwrap();
        let bytes = file.to_bytes().unwrap();
        assert_eq!(bytes.len(), 512 * 3);
        assert_eq!(read_u32(&bytes, 0x2C), 1);
        assert_eq!(read_u32(&bytes, 0x30), 1);
        assert_eq!(read_u32(&bytes, 0x3C), ENDOFCHAIN);
        assert_eq!(read_u32(&bytes, 0x4C), 0);

        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        assert!(reopened.list("/").unwrap().is_empty());
        assert_eq!(reopened.stats().entries, 1);
    }

    #[test]
    fn test_round_trip_tree() {
        let mut file = CompoundFile::create().unwrap();
        file.create_storage("/Dir1").unwrap();
        file.create_storage("/Dir1/Inner").unwrap();
        file.write_stream("/Dir1/Inner/Small", b"tiny").unwrap();
        file.write_stream("/Big", &vec![0x5A; 9000]).unwrap();

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        let paths: Vec<String> = reopened.walk().unwrap().into_iter().map(|e| e.path).collect();
        assert_eq!(paths, vec!["/Big", "/Dir1", "/Dir1/Inner", "/Dir1/Inner/Small"]);
        assert_eq!(reopened.read_stream("/dir1/inner/small").unwrap(), b"tiny");
        assert_eq!(reopened.read_stream("/Big").unwrap(), vec![0x5A; 9000]);
    }

    #[test]
    fn test_entry_kinds_and_errors() {
        let mut file = CompoundFile::create().unwrap();
        file.create_storage("/S").unwrap();
        file.write_stream("/S/T", b"x").unwrap();

        assert_eq!(file.entry("/").unwrap().entry_type, EntryType::Root);
        assert!(file.entry("/S").unwrap().is_storage());
        assert_eq!(file.entry("/S/T").unwrap().size, 1);
        assert!(matches!(file.entry("/nope"), Err(CfbError::NotFound(_))));
        assert!(matches!(file.read_stream("/S"), Err(CfbError::WrongEntryKind { .. })));
        assert!(matches!(file.list("/S/T"), Err(CfbError::WrongEntryKind { .. })));
        assert!(matches!(file.create_storage("/s"), Err(CfbError::NameConflict(_))));
        assert!(matches!(
            file.write_stream("/Missing/T", b"x"),
            Err(CfbError::NotFound(_))
        ));
        assert!(matches!(file.remove("/"), Err(CfbError::InvalidOperation(_))));
        assert!(matches!(
            file.create_stream("/bad:name"),
            Err(CfbError::InvalidName(_))
        ));
    }

    #[test]
    fn test_remove_frees_sectors() {
        let mut file = CompoundFile::create().unwrap();
        file.create_storage("/D").unwrap();
        file.write_stream("/D/Big", &vec![1; 20_000]).unwrap();
        file.write_stream("/D/Small", &[2; 100]).unwrap();
        let before = file.stats();

        file.remove("/D").unwrap();
        let after = file.stats();
        assert_eq!(after.entries, 1);
        assert!(after.free_sectors >= before.free_sectors + 40);
        assert_eq!(after.free_mini_sectors, after.total_mini_sectors);
    }

    #[test]
    fn test_rename_and_metadata() {
        let mut file = CompoundFile::create().unwrap();
        file.create_storage("/Old").unwrap();
        file.rename("/Old", "New").unwrap();
        assert!(!file.exists("/Old"));

        let when = DateTime::from_timestamp(1_600_000_000, 0).unwrap();
        file.set_clsid("/New", [7; 16]).unwrap();
        file.set_state_bits("/New", 3).unwrap();
        file.set_times("/New", Some(when), None).unwrap();
        file.set_clsid("/", [1; 16]).unwrap();

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        let info = reopened.entry("/New").unwrap();
        assert_eq!(info.clsid, [7; 16]);
        assert_eq!(info.state_bits, 3);
        assert_eq!(info.created, Some(when));
        assert_eq!(info.modified, None);
        assert_eq!(reopened.entry("/").unwrap().clsid, [1; 16]);
    }

    #[test]
    fn test_mini_stream_compacted_on_write() {
        let mut file = CompoundFile::create().unwrap();
        file.write_stream("/A", &[1; 3000]).unwrap();
        file.write_stream("/B", &[2; 100]).unwrap();
        file.remove("/A").unwrap();

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        let root = reopened.entry("/").unwrap();
        // B was allocated after A, so the mini-stream still reaches past it
        assert_eq!(root.size % 64, 0);
        assert!(root.size >= 100);
        assert_eq!(reopened.read_stream("/B").unwrap(), vec![2; 100]);
    }

    #[test]
    fn test_snapshot_is_independent() {
        let mut file = CompoundFile::create().unwrap();
        file.write_stream("/S", b"before").unwrap();
        let snapshot = file.snapshot().unwrap();
        file.write_stream("/S", b"after").unwrap();
        assert_eq!(snapshot.read_stream("/S").unwrap(), b"before");
        assert_eq!(file.read_stream("/S").unwrap(), b"after");
    }

    #[test]
    fn test_v4_container() {
        let config = StorageConfig {
            version: Version::V4,
            ..StorageConfig::default()
        };
        let mut file = CompoundFile::create_with(config).unwrap();
        file.write_stream("/Data", &vec![9; 10_000]).unwrap();
        let bytes = file.to_bytes().unwrap();
        assert_eq!(bytes.len() % 4096, 0);
        assert_eq!(read_u32(&bytes, 0x28), 1);

        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        assert_eq!(reopened.version(), Version::V4);
        assert_eq!(reopened.read_stream("/Data").unwrap(), vec![9; 10_000]);
    }

    #[test]
    fn test_open_rejects_short_and_garbage_input() {
        assert!(matches!(
            CompoundFile::open_bytes(vec![0u8; 100]),
            Err(CfbError::Format(_))
        ));
        assert!(matches!(
            CompoundFile::open_bytes(vec![0u8; 1024]),
            Err(CfbError::InvalidSignature)
        ));
    }
}
