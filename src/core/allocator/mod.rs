//! Sector allocation tables
//!
//! A compound file links the sectors of every stream through an allocation
//! table: entry `i` holds the index of the sector that follows sector `i`, or
//! `ENDOFCHAIN` for the last sector of a chain. Two tables share this scheme:
//!
//! - [`fat::Fat`] - regular sectors (512 or 4096 bytes)
//! - [`minifat::MiniFat`] - 64-byte mini sectors stored inside the mini-stream
//!
//! Both use the same chain algorithms, provided here by [`ChainAllocator`]'s
//! default methods over an [`AllocationTable`]. They differ only in how the
//! table grows once every entry is in use.

pub mod fat;
pub mod minifat;

use crate::error::{CfbError, Result};
use crate::header::{DIFSECT, ENDOFCHAIN, FATSECT, FREESECT};
use ahash::AHashSet;
use std::collections::BTreeSet;

/// In-memory chain-linking array plus an ordered free set
///
/// The free set mirrors every `FREESECT` entry so the lowest free index can
/// be found without scanning the table.
#[derive(Debug, Clone, Default)]
pub struct AllocationTable {
    entries: Vec<u32>,
    free: BTreeSet<u32>,
}

impl AllocationTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a table from decoded entries
    pub fn from_entries(entries: Vec<u32>) -> Self {
        let free = entries
            .iter()
            .enumerate()
            .filter(|(_, &next)| next == FREESECT)
            .map(|(i, _)| i as u32)
            .collect();
        AllocationTable { entries, free }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn entries(&self) -> &[u32] {
        &self.entries
    }

    pub fn get(&self, index: u32) -> Option<u32> {
        self.entries.get(index as usize).copied()
    }

    /// Overwrite one entry, keeping the free set in sync
    pub fn set(&mut self, index: u32, value: u32) {
        let slot = &mut self.entries[index as usize];
        if *slot == FREESECT {
            self.free.remove(&index);
        }
        *slot = value;
        if value == FREESECT {
            self.free.insert(index);
        }
    }

    /// Append `count` free entries
    pub fn push_free(&mut self, count: usize) {
        let start = self.entries.len() as u32;
        self.entries.resize(self.entries.len() + count, FREESECT);
        self.free.extend(start..start + count as u32);
    }

    /// Drop entries past `len`; they must all be free
    pub fn truncate_free_tail(&mut self, len: usize) {
        if len >= self.entries.len() {
            return;
        }
        debug_assert!(self.entries[len..].iter().all(|&e| e == FREESECT));
        self.entries.truncate(len);
        self.free.split_off(&(len as u32));
    }

    pub fn free_count(&self) -> usize {
        self.free.len()
    }

    /// Lowest `count` free indices, ascending
    pub fn lowest_free(&self, count: usize) -> Vec<u32> {
        self.free.iter().take(count).copied().collect()
    }

    /// Index of the highest entry in use
    pub fn last_used(&self) -> Option<u32> {
        self.entries
            .iter()
            .rposition(|&e| e != FREESECT)
            .map(|i| i as u32)
    }

    /// Link `chain` in order and terminate it
    fn link(&mut self, chain: &[u32]) {
        for pair in chain.windows(2) {
            self.set(pair[0], pair[1]);
        }
        if let Some(&last) = chain.last() {
            self.set(last, ENDOFCHAIN);
        }
    }
}

/// Chain operations shared by the FAT and the MiniFAT
///
/// Implementors expose their table and decide how it grows; every chain
/// operation is defined once in terms of those.
pub trait ChainAllocator {
    /// The underlying table
    fn table(&self) -> &AllocationTable;

    /// The underlying table, mutably
    fn table_mut(&mut self) -> &mut AllocationTable;

    /// Add at least one free entry to the table
    fn grow(&mut self) -> Result<()>;

    /// Follow a chain from `start` to its terminator
    ///
    /// Fails with `CorruptChain` on a cycle, an index outside the table, or a
    /// link into a free or reserved sector.
    fn resolve_chain(&self, start: u32) -> Result<Vec<u32>> {
        let table = self.table();
        let mut chain = Vec::new();
        let mut visited = AHashSet::new();
        let mut current = start;

        while current != ENDOFCHAIN {
            let next = table.get(current).ok_or_else(|| {
                CfbError::corrupt(current, format!("index outside table of {}", table.len()))
            })?;
            if !visited.insert(current) {
                return Err(CfbError::corrupt(current, "cycle detected"));
            }
            match next {
                FREESECT => {
                    return Err(CfbError::corrupt(current, "chain runs into a free sector"))
                }
                FATSECT | DIFSECT => {
                    return Err(CfbError::corrupt(
                        current,
                        "chain runs into an allocation table sector",
                    ))
                }
                _ => {}
            }
            chain.push(current);
            current = next;
        }

        Ok(chain)
    }

    /// Allocate a fresh chain of `count` sectors, lowest free indices first
    fn allocate(&mut self, count: usize) -> Result<Vec<u32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        while self.table().free_count() < count {
            self.grow()?;
        }
        let chain = self.table().lowest_free(count);
        self.table_mut().link(&chain);
        tracing::trace!("Allocated chain of {} starting at {}", count, chain[0]);
        Ok(chain)
    }

    /// Grow `chain` by `additional` sectors
    fn extend(&mut self, chain: &[u32], additional: usize) -> Result<Vec<u32>> {
        let tail = self.allocate(additional)?;
        let mut grown = chain.to_vec();
        if let (Some(&last), Some(&first)) = (chain.last(), tail.first()) {
            self.table_mut().set(last, first);
        }
        grown.extend(tail);
        Ok(grown)
    }

    /// Shrink `chain` to `new_len` sectors, freeing the rest
    fn truncate(&mut self, chain: &[u32], new_len: usize) -> Result<Vec<u32>> {
        if new_len >= chain.len() {
            return Ok(chain.to_vec());
        }
        self.free(&chain[new_len..])?;
        if new_len > 0 {
            self.table_mut().set(chain[new_len - 1], ENDOFCHAIN);
        }
        Ok(chain[..new_len].to_vec())
    }

    /// Return every sector of `chain` to the free pool
    fn free(&mut self, chain: &[u32]) -> Result<()> {
        let table = self.table_mut();
        for &sector in chain {
            match table.get(sector) {
                None => {
                    return Err(CfbError::corrupt(sector, "cannot free sector outside table"))
                }
                Some(FREESECT) => {
                    tracing::warn!("Double-free detected for sector {}", sector);
                }
                Some(_) => table.set(sector, FREESECT),
            }
        }
        if let Some(&first) = chain.first() {
            tracing::trace!("Freed chain of {} starting at {}", chain.len(), first);
        }
        Ok(())
    }

    /// Resize `chain` to exactly `len` sectors
    fn resize(&mut self, chain: &[u32], len: usize) -> Result<Vec<u32>> {
        if len > chain.len() {
            self.extend(chain, len - chain.len())
        } else {
            self.truncate(chain, len)
        }
    }

    /// Number of entries in the table
    fn total_sectors(&self) -> usize {
        self.table().len()
    }

    /// Number of free entries in the table
    fn free_sectors(&self) -> usize {
        self.table().free_count()
    }
}

/// First sector of `chain`, or `ENDOFCHAIN` for an empty chain
pub fn chain_start(chain: &[u32]) -> u32 {
    chain.first().copied().unwrap_or(ENDOFCHAIN)
}

/// Decode a sector of little-endian table entries
pub(crate) fn decode_entries(sector: &[u8]) -> impl Iterator<Item = u32> + '_ {
    sector
        .chunks_exact(4)
        .map(|raw| u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]))
}

/// Encode table entries, padding with `FREESECT` to a multiple of `sector_size`
pub(crate) fn encode_entries(entries: &[u32], sector_size: usize) -> Vec<u8> {
    let per_sector = sector_size / 4;
    let padded = entries.len().div_ceil(per_sector) * per_sector;
    let mut bytes = Vec::with_capacity(padded * 4);
    for &entry in entries {
        bytes.extend_from_slice(&entry.to_le_bytes());
    }
    for _ in entries.len()..padded {
        bytes.extend_from_slice(&FREESECT.to_le_bytes());
    }
    bytes
}
