//! Hand-assembled container images for tests
//!
//! Builds v3 images byte by byte so tests can open layouts the engine would
//! never write itself, including broken ones.

#![allow(dead_code)]

pub const FREESECT: u32 = 0xFFFF_FFFF;
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
pub const FATSECT: u32 = 0xFFFF_FFFD;
pub const NOSTREAM: u32 = 0xFFFF_FFFF;

pub const SECTOR: usize = 512;

pub const TYPE_STORAGE: u8 = 1;
pub const TYPE_STREAM: u8 = 2;
pub const TYPE_ROOT: u8 = 5;

pub const RED: u8 = 0;
pub const BLACK: u8 = 1;

/// One raw directory record
#[derive(Debug, Clone)]
pub struct RawEntry {
    pub name: &'static str,
    pub kind: u8,
    pub color: u8,
    pub left: u32,
    pub right: u32,
    pub child: u32,
    pub start: u32,
    pub size: u64,
}

impl RawEntry {
    pub fn root(child: u32, start: u32, size: u64) -> Self {
        RawEntry {
            name: "Root Entry",
            kind: TYPE_ROOT,
            color: BLACK,
            left: NOSTREAM,
            right: NOSTREAM,
            child,
            start,
            size,
        }
    }

    pub fn storage(name: &'static str, child: u32) -> Self {
        RawEntry {
            name,
            kind: TYPE_STORAGE,
            color: BLACK,
            left: NOSTREAM,
            right: NOSTREAM,
            child,
            start: 0,
            size: 0,
        }
    }

    pub fn stream(name: &'static str, start: u32, size: u64) -> Self {
        RawEntry {
            name,
            kind: TYPE_STREAM,
            color: BLACK,
            left: NOSTREAM,
            right: NOSTREAM,
            child: NOSTREAM,
            start,
            size,
        }
    }

    pub fn links(mut self, left: u32, right: u32) -> Self {
        self.left = left;
        self.right = right;
        self
    }

    pub fn color(mut self, color: u8) -> Self {
        self.color = color;
        self
    }

    pub fn encode(&self) -> [u8; 128] {
        let mut record = [0u8; 128];
        let units: Vec<u16> = self.name.encode_utf16().collect();
        for (i, unit) in units.iter().enumerate() {
            put_u16(&mut record, i * 2, *unit);
        }
        put_u16(&mut record, 0x40, ((units.len() + 1) * 2) as u16);
        record[0x42] = self.kind;
        record[0x43] = self.color;
        put_u32(&mut record, 0x44, self.left);
        put_u32(&mut record, 0x48, self.right);
        put_u32(&mut record, 0x4C, self.child);
        put_u32(&mut record, 0x74, self.start);
        record[0x78..0x80].copy_from_slice(&self.size.to_le_bytes());
        record
    }
}

pub fn put_u16(bytes: &mut [u8], at: usize, value: u16) {
    bytes[at..at + 2].copy_from_slice(&value.to_le_bytes());
}

pub fn put_u32(bytes: &mut [u8], at: usize, value: u32) {
    bytes[at..at + 4].copy_from_slice(&value.to_le_bytes());
}

pub fn get_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

/// Byte offset of regular sector `sector`
pub fn sector_at(sector: u32) -> usize {
    (sector as usize + 1) * SECTOR
}

/// A v3 image laid out as
///
/// - sector 0: FAT
/// - sector 1: directory (up to four entries)
/// - sector 2: MiniFAT
/// - sector 3: mini-stream
///
/// `mini` is copied into the mini-stream and `minifat` into the MiniFAT.
pub fn image(entries: &[RawEntry], minifat: &[u32], mini: &[u8]) -> Vec<u8> {
    assert!(entries.len() <= 4 && mini.len() <= SECTOR);
    let mut bytes = vec![0u8; SECTOR * 5];

    bytes[..8].copy_from_slice(&[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    put_u16(&mut bytes, 0x18, 0x003E);
    put_u16(&mut bytes, 0x1A, 3);
    put_u16(&mut bytes, 0x1C, 0xFFFE);
    put_u16(&mut bytes, 0x1E, 9);
    put_u16(&mut bytes, 0x20, 6);
    put_u32(&mut bytes, 0x2C, 1);
    put_u32(&mut bytes, 0x30, 1);
    put_u32(&mut bytes, 0x38, 4096);
    put_u32(&mut bytes, 0x3C, 2);
    put_u32(&mut bytes, 0x40, 1);
    put_u32(&mut bytes, 0x44, ENDOFCHAIN);
    put_u32(&mut bytes, 0x48, 0);
    put_u32(&mut bytes, 0x4C, 0);
    for i in 1..109 {
        put_u32(&mut bytes, 0x4C + i * 4, FREESECT);
    }

    let fat = sector_at(0);
    for i in 0..128 {
        put_u32(&mut bytes, fat + i * 4, FREESECT);
    }
    put_u32(&mut bytes, fat, FATSECT);
    put_u32(&mut bytes, fat + 4, ENDOFCHAIN);
    put_u32(&mut bytes, fat + 8, ENDOFCHAIN);
    put_u32(&mut bytes, fat + 12, ENDOFCHAIN);

    let dir = sector_at(1);
    for slot in 0..4 {
        let at = dir + slot * 128;
        match entries.get(slot) {
            Some(entry) => bytes[at..at + 128].copy_from_slice(&entry.encode()),
            None => {
                put_u32(&mut bytes, at + 0x44, NOSTREAM);
                put_u32(&mut bytes, at + 0x48, NOSTREAM);
                put_u32(&mut bytes, at + 0x4C, NOSTREAM);
            }
        }
    }

    let minifat_at = sector_at(2);
    for i in 0..128 {
        let value = minifat.get(i).copied().unwrap_or(FREESECT);
        put_u32(&mut bytes, minifat_at + i * 4, value);
    }

    let mini_at = sector_at(3);
    bytes[mini_at..mini_at + mini.len()].copy_from_slice(mini);
    bytes
}

/// Root with storage "Dir1" holding the 5-byte stream "Stream1" ("Hello")
pub fn dir1_stream1() -> Vec<u8> {
    image(
        &[
            RawEntry::root(1, 3, 64),
            RawEntry::storage("Dir1", 2),
            RawEntry::stream("Stream1", 0, 5),
        ],
        &[ENDOFCHAIN],
        b"Hello",
    )
}

pub fn pattern(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i % 251) as u8).collect()
}
