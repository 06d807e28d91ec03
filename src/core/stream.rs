//! Stream accessor
//!
//! Reads and writes byte ranges of a stream entry across its sector chain.
//! Streams smaller than the mini-stream cutoff live in 64-byte mini sectors
//! inside the mini-stream; larger ones in regular sectors. The size class is
//! decided from the size at every resize, and a resize that crosses the
//! cutoff moves the payload to the other allocator.
//!
//! [`StreamReader`] and [`StreamHandle`] wrap an entry with a cursor and
//! implement the `std::io` traits on top of the offset-based operations.

use crate::allocator::{chain_start, ChainAllocator};
use crate::compound::CompoundFile;
use crate::directory::entry::{EntryKind, StreamData};
use crate::directory::ROOT_ID;
use crate::error::{CfbError, Result};
use crate::header::{MAXREGSECT, MINI_SECTOR_SIZE};
use crate::io::{SectorRead, SectorWrite};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::ops::Range;

/// Zero-fill granularity when a stream grows
const ZERO_CHUNK: usize = 64 * 1024;

/// Resolved location of a stream's bytes
enum Backing {
    Empty,
    Regular(Vec<u32>),
    Mini(Vec<u32>),
}

impl<S: SectorRead> CompoundFile<S> {
    /// Whether a stream of `size` bytes belongs in mini sectors
    pub(crate) fn is_mini(&self, size: u64) -> bool {
        size < self.header.mini_stream_cutoff as u64
    }

    /// Location and size of a stream entry
    pub(crate) fn stream_data(&self, id: u32) -> Result<StreamData> {
        let entry = self.directory.get(id)?;
        match &entry.kind {
            EntryKind::Stream(data) => Ok(*data),
            _ => Err(CfbError::WrongEntryKind {
                path: entry.name.clone(),
                expected: "stream",
            }),
        }
    }

    fn backing(&self, data: &StreamData) -> Result<Backing> {
        if data.size == 0 {
            Ok(Backing::Empty)
        } else if self.is_mini(data.size) {
            Ok(Backing::Mini(self.minifat.resolve_chain(data.start)?))
        } else {
            Ok(Backing::Regular(self.fat.resolve_chain(data.start)?))
        }
    }

    /// Copy bytes from `offset` into `buf`, returning how many were available
    pub(crate) fn read_entry_at(&self, id: u32, offset: u64, buf: &mut [u8]) -> Result<usize> {
        let data = self.stream_data(id)?;
        if offset >= data.size {
            return Ok(0);
        }
        let len = (data.size - offset).min(buf.len() as u64) as usize;
        let buf = &mut buf[..len];
        let sector_size = self.fat.sector_size();

        match self.backing(&data)? {
            Backing::Empty => {}
            Backing::Regular(chain) => read_chain(&self.store, sector_size, &chain, offset, buf)?,
            Backing::Mini(chain) => {
                read_mini(&self.store, sector_size, &self.mini_chain, &chain, offset, buf)?
            }
        }
        Ok(len)
    }

    /// Check that a stream's chain exists and covers its declared size
    pub(crate) fn verify_stream(&self, id: u32) -> Result<()> {
        let data = self.stream_data(id)?;
        let (chain, unit) = match self.backing(&data)? {
            Backing::Empty => return Ok(()),
            Backing::Regular(chain) => (chain, self.fat.sector_size() as u64),
            Backing::Mini(chain) => {
                let capacity = self.mini_chain.len() as u64 * self.fat.sector_size() as u64;
                if let Some(&outside) = chain
                    .iter()
                    .find(|&&m| (m as u64 + 1) * MINI_SECTOR_SIZE as u64 > capacity)
                {
                    return Err(CfbError::corrupt(
                        outside,
                        "mini sector lies outside the mini-stream",
                    ));
                }
                (chain, MINI_SECTOR_SIZE as u64)
            }
        };

        let needed = data.size.div_ceil(unit);
        if (chain.len() as u64) < needed {
            return Err(CfbError::corrupt(
                data.start,
                format!(
                    "chain of {} sectors cannot hold {} bytes",
                    chain.len(),
                    data.size
                ),
            ));
        }
        if chain.len() as u64 > needed {
            tracing::warn!(
                "Chain at {} holds {} sectors for {} bytes",
                data.start,
                chain.len(),
                data.size
            );
        }
        Ok(())
    }
}

impl<S: SectorWrite> CompoundFile<S> {
    /// Write `bytes` at `offset`, growing the stream first if needed
    pub(crate) fn write_entry_at(&mut self, id: u32, offset: u64, bytes: &[u8]) -> Result<()> {
        if bytes.is_empty() {
            return Ok(());
        }
        let end = offset
            .checked_add(bytes.len() as u64)
            .ok_or(CfbError::CapacityExceeded { index: u64::MAX })?;
        if end > self.stream_data(id)?.size {
            self.set_entry_len(id, end)?;
        }
        let data = self.stream_data(id)?;
        self.write_data(&data, offset, bytes)
    }

    /// Resize a stream to exactly `new_size` bytes
    ///
    /// Growth is zero-filled. Crossing the mini-stream cutoff in either
    /// direction moves the surviving bytes to the other allocator.
    pub(crate) fn set_entry_len(&mut self, id: u32, new_size: u64) -> Result<()> {
        let data = self.stream_data(id)?;
        if new_size == data.size {
            return Ok(());
        }
        if new_size > self.header.version.max_stream_size() {
            return Err(CfbError::CapacityExceeded { index: new_size });
        }

        let new_mini = self.is_mini(new_size);
        if self.is_mini(data.size) == new_mini {
            let start = self.resize_chain(&data, new_size, new_mini)?;
            let resized = StreamData { start, size: new_size };
            self.set_stream_data(id, resized)?;
            if new_size > data.size {
                self.zero_fill(&resized, data.size, new_size)?;
            }
            return Ok(());
        }

        // The old chain stays intact until the new one holds the data
        let count = unit_count(new_size, self.unit_size(new_mini))?;
        let keep = data.size.min(new_size);
        let mut saved = vec![0u8; keep as usize];
        self.read_entry_at(id, 0, &mut saved)?;

        let chain = self.allocate_units(count, new_mini)?;
        let moved = StreamData {
            start: chain_start(&chain),
            size: new_size,
        };
        let filled = self.fill_moved(&moved, &saved);
        if let Err(err) = filled {
            self.release(&moved)?;
            return Err(err);
        }

        self.release(&data)?;
        self.set_stream_data(id, moved)?;

        tracing::debug!(
            "Moved stream '{}' to {} sectors at {} bytes",
            self.directory.get(id)?.name,
            if new_mini { "mini" } else { "regular" },
            new_size
        );
        Ok(())
    }

    /// Return a stream's sectors to their allocator
    pub(crate) fn release(&mut self, data: &StreamData) -> Result<()> {
        match self.backing(data)? {
            Backing::Empty => Ok(()),
            Backing::Regular(chain) => self.fat.free(&chain),
            Backing::Mini(chain) => {
                self.minifat.free(&chain)?;
                self.ensure_mini_capacity()
            }
        }
    }

    /// Allocate a fresh chain of `count` units from one allocator
    fn allocate_units(&mut self, count: usize, mini: bool) -> Result<Vec<u32>> {
        if !mini {
            return self.fat.allocate(count);
        }
        let chain = self.minifat.allocate(count)?;
        if let Err(err) = self.ensure_mini_capacity() {
            self.minifat.free(&chain)?;
            return Err(err);
        }
        Ok(chain)
    }

    fn unit_size(&self, mini: bool) -> usize {
        if mini {
            MINI_SECTOR_SIZE
        } else {
            self.fat.sector_size()
        }
    }

    /// Resize a chain within its size class, returning the new start
    fn resize_chain(&mut self, data: &StreamData, new_size: u64, mini: bool) -> Result<u32> {
        let count = unit_count(new_size, self.unit_size(mini))?;
        let chain = match self.backing(data)? {
            Backing::Empty => Vec::new(),
            Backing::Regular(chain) | Backing::Mini(chain) => chain,
        };
        let chain = if mini {
            let chain = self.minifat.resize(&chain, count)?;
            self.ensure_mini_capacity()?;
            chain
        } else {
            self.fat.resize(&chain, count)?
        };
        Ok(chain_start(&chain))
    }

    /// Grow the mini-stream to cover every mini sector in use
    ///
    /// The root size follows the highest mini sector in use. The chain itself
    /// only shrinks when the image is rebuilt.
    fn ensure_mini_capacity(&mut self) -> Result<()> {
        let sector_size = self.fat.sector_size() as u64;
        let needed = self.minifat.used_count() as u64 * MINI_SECTOR_SIZE as u64;
        let sectors = needed.div_ceil(sector_size) as usize;
        if sectors > self.mini_chain.len() {
            self.mini_chain = self.fat.resize(&self.mini_chain, sectors)?;
        }

        let start = chain_start(&self.mini_chain);
        let root = self
            .directory
            .get_mut(ROOT_ID)?
            .stream_data_mut()
            .ok_or_else(|| CfbError::format("root entry has no mini-stream"))?;
        root.start = start;
        root.size = needed;
        Ok(())
    }

    fn set_stream_data(&mut self, id: u32, data: StreamData) -> Result<()> {
        let entry = self.directory.get_mut(id)?;
        let name = entry.name.clone();
        let slot = entry.stream_data_mut().ok_or(CfbError::WrongEntryKind {
            path: name,
            expected: "stream",
        })?;
        *slot = data;
        Ok(())
    }

    /// Write within the current chain without changing the size
    fn write_data(&mut self, data: &StreamData, offset: u64, bytes: &[u8]) -> Result<()> {
        let sector_size = self.fat.sector_size();
        match self.backing(data)? {
            Backing::Empty => Ok(()),
            Backing::Regular(chain) => write_chain(&mut self.store, sector_size, &chain, offset, bytes),
            Backing::Mini(chain) => {
                write_mini(&mut self.store, sector_size, &self.mini_chain, &chain, offset, bytes)
            }
        }
    }

    /// Copy surviving bytes into a fresh chain and zero the rest
    fn fill_moved(&mut self, moved: &StreamData, saved: &[u8]) -> Result<()> {
        self.write_data(moved, 0, saved)?;
        let keep = saved.len() as u64;
        if moved.size > keep {
            self.zero_fill(moved, keep, moved.size)?;
        }
        Ok(())
    }

    fn zero_fill(&mut self, data: &StreamData, from: u64, to: u64) -> Result<()> {
        let zeros = vec![0u8; ZERO_CHUNK.min((to - from) as usize)];
        let mut pos = from;
        while pos < to {
            let take = (to - pos).min(zeros.len() as u64) as usize;
            self.write_data(data, pos, &zeros[..take])?;
            pos += take as u64;
        }
        Ok(())
    }
}

/// Units of `unit` bytes needed for `size` bytes
fn unit_count(size: u64, unit: usize) -> Result<usize> {
    let count = size.div_ceil(unit as u64);
    if count > MAXREGSECT as u64 {
        return Err(CfbError::CapacityExceeded { index: count });
    }
    Ok(count as usize)
}

/// Visit the chain units covering `[offset, offset + len)`
///
/// The callback gets the sector index, the offset within that sector and the
/// matching range of the caller's buffer.
fn for_each_piece(
    chain: &[u32],
    unit: usize,
    offset: u64,
    len: usize,
    mut visit: impl FnMut(u32, usize, Range<usize>) -> Result<()>,
) -> Result<()> {
    let mut done = 0;
    while done < len {
        let pos = offset + done as u64;
        let index = (pos / unit as u64) as usize;
        let within = (pos % unit as u64) as usize;
        let take = (unit - within).min(len - done);
        let sector = *chain.get(index).ok_or_else(|| {
            CfbError::corrupt(
                chain_start(chain),
                format!("chain of {} sectors ends before offset {}", chain.len(), pos),
            )
        })?;
        visit(sector, within, done..done + take)?;
        done += take;
    }
    Ok(())
}

fn read_chain<S: SectorRead>(
    store: &S,
    sector_size: usize,
    chain: &[u32],
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    for_each_piece(chain, sector_size, offset, buf.len(), |sector, within, range| {
        store.read_sector_at(sector_size, sector, within, &mut buf[range])
    })
}

fn write_chain<S: SectorWrite>(
    store: &mut S,
    sector_size: usize,
    chain: &[u32],
    offset: u64,
    bytes: &[u8],
) -> Result<()> {
    for_each_piece(chain, sector_size, offset, bytes.len(), |sector, within, range| {
        store.write_sector_at(sector_size, sector, within, &bytes[range])
    })
}

/// Mini sector `m` sits at byte `m * 64` of the mini-stream
fn read_mini<S: SectorRead>(
    store: &S,
    sector_size: usize,
    mini_stream: &[u32],
    chain: &[u32],
    offset: u64,
    buf: &mut [u8],
) -> Result<()> {
    for_each_piece(chain, MINI_SECTOR_SIZE, offset, buf.len(), |mini, within, range| {
        let pos = mini as u64 * MINI_SECTOR_SIZE as u64 + within as u64;
        read_chain(store, sector_size, mini_stream, pos, &mut buf[range])
    })
}

fn write_mini<S: SectorWrite>(
    store: &mut S,
    sector_size: usize,
    mini_stream: &[u32],
    chain: &[u32],
    offset: u64,
    bytes: &[u8],
) -> Result<()> {
    for_each_piece(chain, MINI_SECTOR_SIZE, offset, bytes.len(), |mini, within, range| {
        let pos = mini as u64 * MINI_SECTOR_SIZE as u64 + within as u64;
        write_chain(&mut *store, sector_size, mini_stream, pos, &bytes[range])
    })
}

/// New cursor position for a seek, rejecting positions before the start
fn seek_position(current: u64, len: u64, pos: SeekFrom) -> io::Result<u64> {
    let (base, delta) = match pos {
        SeekFrom::Start(offset) => return Ok(offset),
        SeekFrom::End(delta) => (len, delta),
        SeekFrom::Current(delta) => (current, delta),
    };
    base.checked_add_signed(delta).ok_or_else(|| {
        io::Error::new(
            io::ErrorKind::InvalidInput,
            "seek to a negative or overflowing position",
        )
    })
}

/// Read-only cursor over a stream
///
/// Borrows the container immutably, so any number of readers can share a
/// container (or a snapshot across threads).
pub struct StreamReader<'a, S> {
    file: &'a CompoundFile<S>,
    id: u32,
    pos: u64,
}

impl<'a, S: SectorRead> StreamReader<'a, S> {
    pub(crate) fn new(file: &'a CompoundFile<S>, id: u32) -> Self {
        StreamReader { file, id, pos: 0 }
    }

    /// Declared size in bytes
    pub fn len(&self) -> u64 {
        self.file.stream_data(self.id).map_or(0, |data| data.size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`; shorter past the end
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let available = self.len().saturating_sub(offset).min(len as u64) as usize;
        let mut buf = vec![0u8; available];
        let read = self.file.read_entry_at(self.id, offset, &mut buf)?;
        buf.truncate(read);
        Ok(buf)
    }
}

impl<S: SectorRead> Read for StreamReader<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.file.read_entry_at(self.id, self.pos, buf)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<S: SectorRead> Seek for StreamReader<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_position(self.pos, self.len(), pos)?;
        Ok(self.pos)
    }
}

/// Read-write cursor over a stream
///
/// Holds the container exclusively while alive. Writing past the end grows
/// the stream; a gap left by seeking past the end reads as zeros.
#[derive(Debug)]
pub struct StreamHandle<'a, S> {
    file: &'a mut CompoundFile<S>,
    id: u32,
    pos: u64,
}

impl<'a, S: SectorRead> StreamHandle<'a, S> {
    pub(crate) fn new(file: &'a mut CompoundFile<S>, id: u32) -> Self {
        StreamHandle { file, id, pos: 0 }
    }

    /// Declared size in bytes
    pub fn len(&self) -> u64 {
        self.file.stream_data(self.id).map_or(0, |data| data.size)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Read up to `len` bytes at `offset`; shorter past the end
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        StreamReader::new(&*self.file, self.id).read_at(offset, len)
    }

    /// Whether the stream currently lives in mini sectors
    pub fn is_mini(&self) -> bool {
        let len = self.len();
        len > 0 && self.file.is_mini(len)
    }
}

impl<S: SectorWrite> StreamHandle<'_, S> {
    /// Write `bytes` at `offset`, growing the stream as needed
    pub fn write_at(&mut self, offset: u64, bytes: &[u8]) -> Result<()> {
        self.file.write_entry_at(self.id, offset, bytes)
    }

    /// Grow (zero-filled) or shrink the stream to `len` bytes
    pub fn set_len(&mut self, len: u64) -> Result<()> {
        self.file.set_entry_len(self.id, len)
    }
}

impl<S: SectorRead> Read for StreamHandle<'_, S> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let read = self.file.read_entry_at(self.id, self.pos, buf)?;
        self.pos += read as u64;
        Ok(read)
    }
}

impl<S: SectorWrite> Write for StreamHandle<'_, S> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.file.write_entry_at(self.id, self.pos, buf)?;
        self.pos += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        Ok(())
    }
}

impl<S: SectorRead> Seek for StreamHandle<'_, S> {
    fn seek(&mut self, pos: SeekFrom) -> io::Result<u64> {
        self.pos = seek_position(self.pos, self.len(), pos)?;
        Ok(self.pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::compound::CompoundFile;

    fn pattern(len: usize) -> Vec<u8> {
        (0..len).map(|i| (i * 7 % 256) as u8).collect()
    }

    #[test]
    fn test_small_write_uses_mini_sectors() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/Small").unwrap();
        stream.write_at(0, &pattern(100)).unwrap();
        assert!(stream.is_mini());
        assert_eq!(stream.read_at(0, 100).unwrap(), pattern(100));
        drop(stream);

        assert_eq!(file.minifat.used_count(), 2);
        assert_eq!(file.mini_chain.len(), 1);
    }

    #[test]
    fn test_cutoff_boundary() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/Edge").unwrap();
        stream.set_len(4095).unwrap();
        assert!(stream.is_mini());
        stream.set_len(4096).unwrap();
        assert!(!stream.is_mini());
        stream.set_len(4095).unwrap();
        assert!(stream.is_mini());
    }

    #[test]
    fn test_migration_keeps_prefix_and_zero_fills() {
        let mut file = CompoundFile::create().unwrap();
        let data = pattern(3000);
        let mut stream = file.create_stream("/Grow").unwrap();
        stream.write_at(0, &data).unwrap();

        stream.set_len(10_000).unwrap();
        assert!(!stream.is_mini());
        let read = stream.read_at(0, 10_000).unwrap();
        assert_eq!(&read[..3000], &data[..]);
        assert!(read[3000..].iter().all(|&b| b == 0));

        stream.set_len(1000).unwrap();
        assert!(stream.is_mini());
        assert_eq!(stream.read_at(0, 5000).unwrap(), &data[..1000]);
    }

    #[test]
    fn test_migration_frees_old_chain() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/S").unwrap();
        stream.write_at(0, &pattern(5000)).unwrap();
        stream.set_len(10).unwrap();
        drop(stream);
        // Only the FAT, directory and mini-stream sectors stay allocated
        assert_eq!(
            file.fat.total_sectors() - file.fat.free_sectors(),
            3
        );
    }

    #[test]
    fn test_shrink_then_grow_reads_zeros() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/S").unwrap();
        stream.write_at(0, &[0xAB; 600]).unwrap();
        stream.set_len(10).unwrap();
        stream.set_len(600).unwrap();
        let read = stream.read_at(0, 600).unwrap();
        assert!(read[..10].iter().all(|&b| b == 0xAB));
        assert!(read[10..].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_write_past_end_zero_fills_gap() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/Gap").unwrap();
        stream.write_at(0, b"head").unwrap();
        stream.write_at(8000, b"tail").unwrap();
        assert_eq!(stream.len(), 8004);
        let read = stream.read_at(0, 8004).unwrap();
        assert_eq!(&read[..4], b"head");
        assert!(read[4..8000].iter().all(|&b| b == 0));
        assert_eq!(&read[8000..], b"tail");
    }

    #[test]
    fn test_read_past_end_is_short() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/S").unwrap();
        stream.write_at(0, b"hello").unwrap();
        assert_eq!(stream.read_at(3, 100).unwrap(), b"lo");
        assert!(stream.read_at(5, 10).unwrap().is_empty());
        assert!(stream.read_at(50, 10).unwrap().is_empty());
    }

    #[test]
    fn test_io_traits() {
        let mut file = CompoundFile::create().unwrap();
        let mut stream = file.create_stream("/Io").unwrap();
        stream.write_all(b"hello world").unwrap();
        stream.seek(SeekFrom::Start(6)).unwrap();
        let mut word = String::new();
        stream.read_to_string(&mut word).unwrap();
        assert_eq!(word, "world");

        stream.seek(SeekFrom::End(-5)).unwrap();
        stream.write_all(b"there").unwrap();
        assert!(stream.seek(SeekFrom::Current(-100)).is_err());
        drop(stream);

        let mut reader = file.stream_reader("/Io").unwrap();
        let mut all = Vec::new();
        reader.read_to_end(&mut all).unwrap();
        assert_eq!(all, b"hello there");
    }

    #[test]
    fn test_neighbours_survive_migration() {
        let mut file = CompoundFile::create().unwrap();
        file.write_stream("/A", &pattern(700)).unwrap();
        file.write_stream("/B", &pattern(5000)).unwrap();
        file.write_stream("/C", &pattern(300)).unwrap();

        file.open_stream("/A").unwrap().set_len(6000).unwrap();
        file.open_stream("/B").unwrap().set_len(100).unwrap();

        assert_eq!(file.read_stream("/C").unwrap(), pattern(300));
        assert_eq!(&file.read_stream("/A").unwrap()[..700], &pattern(700)[..]);
        assert_eq!(file.read_stream("/B").unwrap(), &pattern(5000)[..100]);
    }
}
