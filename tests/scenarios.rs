//! End-to-end container scenarios
//!
//! Byte-level checks of freshly written containers and of opening a
//! hand-assembled one.

mod common;

use cfb_store::{CompoundFile, EntryType, Version};
use common::*;
use std::io::{Read, Seek, SeekFrom, Write};

#[test]
fn test_empty_container_bytes() {
    let mut file = CompoundFile::create().unwrap();
    let bytes = file.to_bytes().unwrap();

    // Header, one FAT sector, one directory sector
    assert_eq!(bytes.len(), 3 * SECTOR);
    assert_eq!(&bytes[..8], &[0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1]);
    assert_eq!(get_u32(&bytes, 0x2C), 1, "FAT sector count");
    assert_eq!(get_u32(&bytes, 0x4C), 0, "first FAT sector");
    assert_eq!(get_u32(&bytes, 0x4C + 4), FREESECT);
    assert_eq!(get_u32(&bytes, 0x30), 1, "first directory sector");
    assert_eq!(get_u32(&bytes, 0x3C), ENDOFCHAIN, "no MiniFAT");
    assert_eq!(get_u32(&bytes, 0x44), ENDOFCHAIN, "no DIFAT");
    assert_eq!(get_u32(&bytes, 0x38), 4096);

    let fat = sector_at(0);
    assert_eq!(get_u32(&bytes, fat), FATSECT);
    assert_eq!(get_u32(&bytes, fat + 4), ENDOFCHAIN);
    assert!((2..128).all(|i| get_u32(&bytes, fat + i * 4) == FREESECT));

    let root = sector_at(1);
    let name: Vec<u16> = (0..10)
        .map(|i| u16::from_le_bytes([bytes[root + i * 2], bytes[root + i * 2 + 1]]))
        .collect();
    assert_eq!(String::from_utf16(&name).unwrap(), "Root Entry");
    assert_eq!(bytes[root + 0x42], TYPE_ROOT);
    assert_eq!(get_u32(&bytes, root + 0x4C), NOSTREAM);
    assert_eq!(get_u32(&bytes, root + 0x74), ENDOFCHAIN);

    // Remaining slots are unused records
    for slot in 1..4 {
        let at = root + slot * 128;
        assert_eq!(bytes[at + 0x42], 0);
        assert_eq!(get_u32(&bytes, at + 0x44), NOSTREAM);
    }
}

#[test]
fn test_multi_sector_stream() {
    let data = pattern(10_000);
    let mut file = CompoundFile::create().unwrap();
    file.create_stream("/Test").unwrap().write_all(&data).unwrap();
    let bytes = file.to_bytes().unwrap();

    // 20 data sectors after the FAT and directory
    assert_eq!(bytes.len(), 23 * SECTOR);

    let reopened = CompoundFile::open_bytes(bytes).unwrap();
    let info = reopened.entry("/Test").unwrap();
    assert_eq!(info.size, 10_000);
    assert_eq!(info.entry_type, EntryType::Stream);
    assert_eq!(reopened.read_stream("/Test").unwrap(), data);

    // Reads spanning sector boundaries
    let mut reader = reopened.stream_reader("/Test").unwrap();
    reader.seek(SeekFrom::Start(500)).unwrap();
    let mut buf = [0u8; 30];
    reader.read_exact(&mut buf).unwrap();
    assert_eq!(&buf[..], &data[500..530]);

    reader.seek(SeekFrom::End(-8)).unwrap();
    let mut tail = Vec::new();
    reader.read_to_end(&mut tail).unwrap();
    assert_eq!(tail, &data[9992..]);
}

#[test]
fn test_open_hand_built_container() {
    let file = CompoundFile::open_bytes(dir1_stream1()).unwrap();

    let top: Vec<String> = file.list("/").unwrap().into_iter().map(|e| e.name).collect();
    assert_eq!(top, vec!["Dir1"]);

    let inner = file.list("/Dir1").unwrap();
    assert_eq!(inner.len(), 1);
    assert_eq!(inner[0].name, "Stream1");
    assert_eq!(inner[0].path, "/Dir1/Stream1");
    assert_eq!(inner[0].size, 5);
    assert_eq!(file.read_stream("/Dir1/Stream1").unwrap(), b"Hello");
    assert_eq!(file.read_stream("/DIR1/STREAM1").unwrap(), b"Hello");

    let all = file.walk().unwrap();
    assert_eq!(all.len(), 2);
    assert_eq!(all[0].entry_type, EntryType::Storage);
    assert_eq!(all[0].size, 0);
    assert_eq!(all[1].entry_type, EntryType::Stream);
    assert_eq!(all[1].size, 5);
    assert_eq!(file.stats().entries, 3);
}

#[test]
fn test_edit_hand_built_container() {
    let mut file = CompoundFile::open_bytes(dir1_stream1()).unwrap();
    {
        let mut stream = file.open_stream("/Dir1/Stream1").unwrap();
        stream.seek(SeekFrom::End(0)).unwrap();
        stream.write_all(b", world").unwrap();
    }
    file.write_stream("/Dir1/Large", &pattern(6000)).unwrap();
    file.create_storage("/Dir2").unwrap();

    let bytes = file.to_bytes().unwrap();
    let reopened = CompoundFile::open_bytes(bytes).unwrap();
    assert_eq!(reopened.read_stream("/Dir1/Stream1").unwrap(), b"Hello, world");
    assert_eq!(reopened.read_stream("/Dir1/Large").unwrap(), pattern(6000));
    assert!(reopened.entry("/Dir2").unwrap().is_storage());
}

#[test]
fn test_v4_round_trip_keeps_version() {
    let mut file = cfb_store::CompoundFileBuilder::new()
        .version(Version::V4)
        .create()
        .unwrap();
    file.create_storage("/Store").unwrap();
    file.write_stream("/Store/Small", b"mini").unwrap();
    file.write_stream("/Store/Large", &pattern(5000)).unwrap();
    let bytes = file.to_bytes().unwrap();

    assert_eq!(u16::from_le_bytes([bytes[0x1A], bytes[0x1B]]), 4);
    assert_eq!(u16::from_le_bytes([bytes[0x1E], bytes[0x1F]]), 12);
    assert_eq!(bytes.len() % 4096, 0);

    let reopened = CompoundFile::open_bytes(bytes).unwrap();
    assert_eq!(reopened.version(), Version::V4);
    assert_eq!(reopened.read_stream("/Store/Small").unwrap(), b"mini");
    assert_eq!(reopened.read_stream("/Store/Large").unwrap(), pattern(5000));
}
