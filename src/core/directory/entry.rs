//! Directory entry records
//!
//! Every entry occupies a fixed 128-byte record:
//!
//! ```text
//! 0x00  name            64 bytes, UTF-16LE, NUL-terminated
//! 0x40  name length     u16, bytes including the terminator
//! 0x42  entry type      u8 (0 unused, 1 storage, 2 stream, 5 root)
//! 0x43  color           u8 (0 red, 1 black)
//! 0x44  left sibling    u32
//! 0x48  right sibling   u32
//! 0x4C  child           u32
//! 0x50  class id        16 bytes
//! 0x60  state bits      u32
//! 0x64  created         u64 FILETIME
//! 0x6C  modified        u64 FILETIME
//! 0x74  start sector    u32
//! 0x78  stream size     u64 (version 3 uses only the low 32 bits)
//! ```

use crate::error::{CfbError, Result};
use crate::header::{read_u16, read_u32, read_u64, Version, ENDOFCHAIN};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

pub const DIR_ENTRY_SIZE: usize = 128;

/// Empty sibling/child reference
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

/// Longest entry name in UTF-16 code units, excluding the terminator
pub const MAX_NAME_UNITS: usize = 31;

pub const ROOT_NAME: &str = "Root Entry";

const TYPE_UNUSED: u8 = 0;
const TYPE_STORAGE: u8 = 1;
const TYPE_STREAM: u8 = 2;
const TYPE_ROOT: u8 = 5;

/// Seconds between 1601-01-01 and 1970-01-01
const FILETIME_UNIX_OFFSET: i64 = 11_644_473_600;
const FILETIME_TICKS_PER_SECOND: u64 = 10_000_000;

/// Red-black color of a sibling-tree node
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Color {
    Red,
    Black,
}

/// Kind of a directory entry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryType {
    Root,
    Storage,
    Stream,
}

/// Fields carried by storages and the root
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageData {
    /// Root of the children's sibling tree
    pub child: u32,
    pub clsid: [u8; 16],
    pub state_bits: u32,
    /// FILETIME, 0 when unset
    pub created: u64,
    /// FILETIME, 0 when unset
    pub modified: u64,
}

impl Default for StorageData {
    fn default() -> Self {
        StorageData {
            child: NOSTREAM,
            clsid: [0; 16],
            state_bits: 0,
            created: 0,
            modified: 0,
        }
    }
}

/// Location and size of a stream's data
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamData {
    pub start: u32,
    pub size: u64,
}

impl Default for StreamData {
    fn default() -> Self {
        StreamData {
            start: ENDOFCHAIN,
            size: 0,
        }
    }
}

/// Kind-specific part of an entry
///
/// The root is a storage whose start/size designate the mini-stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryKind {
    Root {
        storage: StorageData,
        mini_stream: StreamData,
    },
    Storage(StorageData),
    Stream(StreamData),
}

/// One allocated directory slot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub color: Color,
    pub left: u32,
    pub right: u32,
    pub kind: EntryKind,
}

impl DirEntry {
    pub fn root() -> Self {
        DirEntry {
            name: ROOT_NAME.to_string(),
            color: Color::Black,
            left: NOSTREAM,
            right: NOSTREAM,
            kind: EntryKind::Root {
                storage: StorageData::default(),
                mini_stream: StreamData::default(),
            },
        }
    }

    pub fn storage(name: &str) -> Self {
        Self::detached(name, EntryKind::Storage(StorageData::default()))
    }

    pub fn stream(name: &str) -> Self {
        Self::detached(name, EntryKind::Stream(StreamData::default()))
    }

    fn detached(name: &str, kind: EntryKind) -> Self {
        DirEntry {
            name: name.to_string(),
            color: Color::Red,
            left: NOSTREAM,
            right: NOSTREAM,
            kind,
        }
    }

    pub fn entry_type(&self) -> EntryType {
        match self.kind {
            EntryKind::Root { .. } => EntryType::Root,
            EntryKind::Storage(_) => EntryType::Storage,
            EntryKind::Stream(_) => EntryType::Stream,
        }
    }

    pub fn is_stream(&self) -> bool {
        matches!(self.kind, EntryKind::Stream(_))
    }

    pub fn is_storage(&self) -> bool {
        !self.is_stream()
    }

    pub fn storage_data(&self) -> Option<&StorageData> {
        match &self.kind {
            EntryKind::Root { storage, .. } | EntryKind::Storage(storage) => Some(storage),
            EntryKind::Stream(_) => None,
        }
    }

    pub fn storage_data_mut(&mut self) -> Option<&mut StorageData> {
        match &mut self.kind {
            EntryKind::Root { storage, .. } | EntryKind::Storage(storage) => Some(storage),
            EntryKind::Stream(_) => None,
        }
    }

    /// Data location of a stream, or of the mini-stream for the root
    pub fn stream_data(&self) -> Option<&StreamData> {
        match &self.kind {
            EntryKind::Root { mini_stream, .. } => Some(mini_stream),
            EntryKind::Stream(data) => Some(data),
            EntryKind::Storage(_) => None,
        }
    }

    pub fn stream_data_mut(&mut self) -> Option<&mut StreamData> {
        match &mut self.kind {
            EntryKind::Root { mini_stream, .. } => Some(mini_stream),
            EntryKind::Stream(data) => Some(data),
            EntryKind::Storage(_) => None,
        }
    }

    /// Root of the children's sibling tree (`NOSTREAM` for streams)
    pub fn child(&self) -> u32 {
        self.storage_data().map_or(NOSTREAM, |s| s.child)
    }

    /// Declared data size (0 for storages)
    pub fn size(&self) -> u64 {
        self.stream_data().map_or(0, |s| s.size)
    }

    /// Encode into a 128-byte record
    pub fn encode(&self, version: Version) -> [u8; DIR_ENTRY_SIZE] {
        let mut record = [0u8; DIR_ENTRY_SIZE];

        let units: Vec<u16> = self.name.encode_utf16().take(MAX_NAME_UNITS).collect();
        for (i, unit) in units.iter().enumerate() {
            record[i * 2..i * 2 + 2].copy_from_slice(&unit.to_le_bytes());
        }
        let name_len = ((units.len() + 1) * 2) as u16;
        record[0x40..0x42].copy_from_slice(&name_len.to_le_bytes());

        record[0x42] = match self.kind {
            EntryKind::Root { .. } => TYPE_ROOT,
            EntryKind::Storage(_) => TYPE_STORAGE,
            EntryKind::Stream(_) => TYPE_STREAM,
        };
        record[0x43] = match self.color {
            Color::Red => 0,
            Color::Black => 1,
        };
        record[0x44..0x48].copy_from_slice(&self.left.to_le_bytes());
        record[0x48..0x4C].copy_from_slice(&self.right.to_le_bytes());
        record[0x4C..0x50].copy_from_slice(&self.child().to_le_bytes());

        if let Some(storage) = self.storage_data() {
            record[0x50..0x60].copy_from_slice(&storage.clsid);
            record[0x60..0x64].copy_from_slice(&storage.state_bits.to_le_bytes());
            record[0x64..0x6C].copy_from_slice(&storage.created.to_le_bytes());
            record[0x6C..0x74].copy_from_slice(&storage.modified.to_le_bytes());
        }

        let (start, size) = match self.stream_data() {
            Some(data) if data.size > 0 => (data.start, data.size),
            Some(_) => (ENDOFCHAIN, 0),
            None => (0, 0),
        };
        let size = match version {
            Version::V3 => size & 0xFFFF_FFFF,
            Version::V4 => size,
        };
        record[0x74..0x78].copy_from_slice(&start.to_le_bytes());
        record[0x78..0x80].copy_from_slice(&size.to_le_bytes());

        record
    }

    /// Record for an unallocated slot
    pub fn encode_unused() -> [u8; DIR_ENTRY_SIZE] {
        let mut record = [0u8; DIR_ENTRY_SIZE];
        record[0x44..0x50].fill(0xFF);
        record
    }

    /// Decode a record; `None` for an unallocated slot
    pub fn decode(record: &[u8], version: Version) -> Result<Option<Self>> {
        let entry_type = record[0x42];
        if entry_type == TYPE_UNUSED {
            return Ok(None);
        }

        let name_len = read_u16(record, 0x40) as usize;
        if name_len > (MAX_NAME_UNITS + 1) * 2 || name_len % 2 != 0 {
            return Err(CfbError::format(format!(
                "directory entry name length {} is invalid",
                name_len
            )));
        }
        let units: Vec<u16> = (0..name_len.saturating_sub(2) / 2)
            .map(|i| read_u16(record, i * 2))
            .take_while(|&unit| unit != 0)
            .collect();
        let name = String::from_utf16(&units).map_err(|_| {
            CfbError::format("directory entry name is not valid UTF-16".to_string())
        })?;

        let color = match record[0x43] {
            0 => Color::Red,
            1 => Color::Black,
            other => {
                tracing::warn!("Entry '{}' has color byte {}, treating as black", name, other);
                Color::Black
            }
        };

        let storage = StorageData {
            child: read_u32(record, 0x4C),
            clsid: record[0x50..0x60].try_into().unwrap_or_default(),
            state_bits: read_u32(record, 0x60),
            created: read_u64(record, 0x64),
            modified: read_u64(record, 0x6C),
        };
        let mut size = read_u64(record, 0x78);
        if version == Version::V3 {
            size &= 0xFFFF_FFFF;
        }
        let data = StreamData {
            start: read_u32(record, 0x74),
            size,
        };

        let kind = match entry_type {
            TYPE_ROOT => EntryKind::Root {
                storage,
                mini_stream: data,
            },
            TYPE_STORAGE => EntryKind::Storage(storage),
            TYPE_STREAM => EntryKind::Stream(data),
            other => {
                return Err(CfbError::format(format!(
                    "entry '{}' has unsupported type {}",
                    name, other
                )))
            }
        };

        Ok(Some(DirEntry {
            name,
            color,
            left: read_u32(record, 0x44),
            right: read_u32(record, 0x48),
            kind,
        }))
    }
}

/// Sibling order: shorter names first, then code units compared upper-cased
pub fn compare_names(a: &str, b: &str) -> Ordering {
    let a: Vec<u16> = a.encode_utf16().collect();
    let b: Vec<u16> = b.encode_utf16().collect();
    a.len().cmp(&b.len()).then_with(|| {
        a.iter()
            .map(|&u| upper_unit(u))
            .cmp(b.iter().map(|&u| upper_unit(u)))
    })
}

/// Case-insensitive name equality under the sibling order
pub fn names_equal(a: &str, b: &str) -> bool {
    compare_names(a, b) == Ordering::Equal
}

/// Simple upper-case mapping of one UTF-16 code unit
fn upper_unit(unit: u16) -> u16 {
    let Some(c) = char::from_u32(unit as u32) else {
        return unit;
    };
    let mut upper = c.to_uppercase();
    match (upper.next(), upper.next()) {
        (Some(u), None) if (u as u32) <= 0xFFFF => u as u16,
        _ => unit,
    }
}

/// Convert a FILETIME to UTC; 0 means unset
pub fn filetime_to_datetime(filetime: u64) -> Option<DateTime<Utc>> {
    if filetime == 0 {
        return None;
    }
    let secs = (filetime / FILETIME_TICKS_PER_SECOND) as i64 - FILETIME_UNIX_OFFSET;
    let nanos = ((filetime % FILETIME_TICKS_PER_SECOND) * 100) as u32;
    DateTime::from_timestamp(secs, nanos)
}

/// Convert UTC to a FILETIME, clamping instants before 1601 to 0
pub fn datetime_to_filetime(time: DateTime<Utc>) -> u64 {
    let secs = time.timestamp() + FILETIME_UNIX_OFFSET;
    if secs < 0 {
        return 0;
    }
    secs as u64 * FILETIME_TICKS_PER_SECOND + time.timestamp_subsec_nanos() as u64 / 100
}
