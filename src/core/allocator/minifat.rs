//! Mini sector allocation table
//!
//! Streams below the mini-stream cutoff are stored in 64-byte mini sectors.
//! All mini sectors live inside one ordinary stream (the mini-stream, owned by
//! the root entry), and the MiniFAT chains them exactly as the FAT chains
//! regular sectors. The MiniFAT's own sectors form a regular FAT chain.

use super::{decode_entries, encode_entries, AllocationTable, ChainAllocator};
use crate::allocator::fat::Fat;
use crate::error::{CfbError, Result};
use crate::header::{Header, ENDOFCHAIN, MAXREGSECT};
use crate::io::SectorRead;

#[derive(Debug, Clone)]
pub struct MiniFat {
    table: AllocationTable,
    sector_size: usize,
}

impl MiniFat {
    pub fn new(sector_size: usize) -> Self {
        MiniFat {
            table: AllocationTable::new(),
            sector_size,
        }
    }

    /// Load the MiniFAT, returning it with the regular chain that stores it
    pub fn load<S: SectorRead + ?Sized>(
        header: &Header,
        fat: &Fat,
        store: &S,
    ) -> Result<(Self, Vec<u32>)> {
        let sector_size = header.sector_size();
        let chain = if header.first_minifat_sector == ENDOFCHAIN {
            Vec::new()
        } else {
            fat.resolve_chain(header.first_minifat_sector)?
        };

        if chain.len() != header.num_minifat_sectors as usize {
            tracing::warn!(
                "Header declares {} mini FAT sectors, chain holds {}",
                header.num_minifat_sectors,
                chain.len()
            );
        }

        let mut entries = Vec::with_capacity(chain.len() * sector_size / 4);
        for &sector in &chain {
            let bytes = store.read_sector(sector_size, sector)?;
            entries.extend(decode_entries(&bytes));
        }

        Ok((
            MiniFat {
                table: AllocationTable::from_entries(entries),
                sector_size,
            },
            chain,
        ))
    }

    pub fn entries_per_sector(&self) -> usize {
        self.sector_size / 4
    }

    /// Number of mini sectors the mini-stream must hold
    pub fn used_count(&self) -> u32 {
        self.table.last_used().map_or(0, |last| last + 1)
    }

    /// Regular sectors needed to store the table
    pub fn sectors_needed(&self) -> usize {
        self.table.len().div_ceil(self.entries_per_sector())
    }

    /// Drop trailing free entries, keeping whole table sectors
    pub fn compact(&mut self) {
        let per_sector = self.entries_per_sector();
        let keep = (self.used_count() as usize).div_ceil(per_sector) * per_sector;
        self.table.truncate_free_tail(keep);
    }

    /// Encoded table, padded to whole sectors
    pub fn encode(&self) -> Vec<u8> {
        encode_entries(self.table.entries(), self.sector_size)
    }
}

impl ChainAllocator for MiniFat {
    fn table(&self) -> &AllocationTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut AllocationTable {
        &mut self.table
    }

    /// Append one table sector's worth of free mini sectors
    fn grow(&mut self) -> Result<()> {
        let per_sector = self.entries_per_sector();
        let last = self.table.len() as u64 + per_sector as u64 - 1;
        if last > MAXREGSECT as u64 {
            return Err(CfbError::CapacityExceeded { index: last });
        }
        self.table.push_free(per_sector);
        tracing::trace!("Grew mini FAT to {} entries", self.table.len());
        Ok(())
    }
}
