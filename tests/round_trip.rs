//! Round-trip tests
//!
//! Trees built through the public API must come back from `to_bytes` and
//! `open_bytes` with the same names, hierarchy and stream contents.

use cfb_store::{CompoundFile, CompoundFileBuilder, EntryInfo, Version};
use proptest::prelude::*;
use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::cmp::Ordering;
use std::collections::BTreeMap;

/// Sibling order: shorter names first, then upper-cased code units
fn sibling_order(a: &str, b: &str) -> Ordering {
    let a: Vec<u16> = a.to_uppercase().encode_utf16().collect();
    let b: Vec<u16> = b.to_uppercase().encode_utf16().collect();
    a.len().cmp(&b.len()).then_with(|| a.cmp(&b))
}

/// Build a random tree, returning the stream contents by path
fn random_tree(file: &mut CompoundFile, seed: u64) -> BTreeMap<String, Vec<u8>> {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut storages = vec![String::new()];
    let mut streams = BTreeMap::new();

    for i in 0..rng.gen_range(5..40) {
        let parent = storages[rng.gen_range(0..storages.len())].clone();
        let path = format!("{}/N{}x{}", parent, i, rng.gen_range(0..1000));
        if rng.gen_bool(0.3) {
            file.create_storage(&path).unwrap();
            storages.push(path);
        } else {
            let size = match rng.gen_range(0..3) {
                0 => rng.gen_range(0..64),
                1 => rng.gen_range(64..4096),
                _ => rng.gen_range(4096..30_000),
            };
            let mut data = vec![0u8; size];
            rng.fill_bytes(&mut data);
            file.write_stream(&path, &data).unwrap();
            streams.insert(path, data);
        }
    }
    streams
}

fn shape(entries: &[EntryInfo]) -> Vec<(String, bool, u64)> {
    entries
        .iter()
        .map(|e| (e.path.clone(), e.is_stream(), e.size))
        .collect()
}

#[test]
fn test_random_trees_round_trip() {
    for seed in 0..20 {
        let version = if seed % 2 == 0 { Version::V3 } else { Version::V4 };
        let mut file = CompoundFileBuilder::new().version(version).create().unwrap();
        let streams = random_tree(&mut file, seed);
        let before = file.walk().unwrap();

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        assert_eq!(shape(&reopened.walk().unwrap()), shape(&before), "seed {}", seed);
        for (path, data) in &streams {
            assert_eq!(&reopened.read_stream(path).unwrap(), data, "seed {} {}", seed, path);
        }
    }
}

#[test]
fn test_double_round_trip_is_stable() {
    let mut file = CompoundFile::create().unwrap();
    random_tree(&mut file, 99);
    let first = file.to_bytes().unwrap();

    let mut reopened = CompoundFile::open_bytes(first.clone()).unwrap();
    let second = reopened.to_bytes().unwrap();
    assert_eq!(first, second);
}

#[test]
fn test_entry_info_serializes() {
    let mut file = CompoundFile::create().unwrap();
    file.create_storage("/Meta").unwrap();
    file.write_stream("/Meta/Value", b"42").unwrap();

    let entries = file.walk().unwrap();
    let json = serde_json::to_string(&entries).unwrap();
    let parsed: Vec<EntryInfo> = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, entries);
    assert!(json.contains("\"entry_type\":\"Stream\""));
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_children_sorted_after_edits(
        names in prop::collection::btree_set("[A-Za-z0-9]{1,12}", 1..40),
        removals in prop::collection::vec(any::<prop::sample::Index>(), 0..20)
    ) {
        let mut file = CompoundFile::create().unwrap();
        let mut live: Vec<String> = Vec::new();
        for name in &names {
            // Case-insensitive duplicates are rejected
            let path = format!("/{}", name);
            match file.create_storage(&path) {
                Ok(()) => live.push(name.clone()),
                Err(err) => prop_assert_eq!(err.kind(), cfb_store::ErrorKind::NameConflict),
            }
        }
        for index in removals {
            if live.is_empty() {
                break;
            }
            let name = live.remove(index.index(live.len()));
            file.remove(&format!("/{}", name)).unwrap();
        }

        let listed: Vec<String> = file.list("/").unwrap().into_iter().map(|e| e.name).collect();
        live.sort_by(|a, b| sibling_order(a, b));
        prop_assert_eq!(&listed, &live);

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        let relisted: Vec<String> =
            reopened.list("/").unwrap().into_iter().map(|e| e.name).collect();
        prop_assert_eq!(relisted, live);
    }

    #[test]
    fn prop_write_then_read_exact(size in 0usize..20_000, seed in any::<u64>()) {
        let mut data = vec![0u8; size];
        StdRng::seed_from_u64(seed).fill_bytes(&mut data);

        let mut file = CompoundFile::create().unwrap();
        file.write_stream("/Payload", &data).unwrap();
        prop_assert_eq!(&file.read_stream("/Payload").unwrap(), &data);

        let bytes = file.to_bytes().unwrap();
        let reopened = CompoundFile::open_bytes(bytes).unwrap();
        prop_assert_eq!(reopened.entry("/Payload").unwrap().size, size as u64);
        prop_assert_eq!(reopened.read_stream("/Payload").unwrap(), data);
    }
}
