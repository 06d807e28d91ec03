//! Regular sector allocation table
//!
//! The FAT is itself stored in sectors of the container. Their locations are
//! listed in the DIFAT: the first 109 inline in the header, the rest in a
//! chain of DIFAT sectors whose last entry links to the next DIFAT sector.
//! When the table runs out of free entries it claims a new FAT sector from
//! the space that sector describes, and a new DIFAT sector once the existing
//! DIFAT capacity is exhausted.

use super::{decode_entries, encode_entries, AllocationTable, ChainAllocator};
use crate::error::{CfbError, Result};
use crate::header::{
    Header, DIFSECT, ENDOFCHAIN, FATSECT, FREESECT, HEADER_DIFAT_ENTRIES, MAXREGSECT,
};
use crate::io::SectorRead;
use ahash::AHashSet;

#[derive(Debug, Clone)]
pub struct Fat {
    table: AllocationTable,
    sector_size: usize,
    /// Locations of the FAT's own sectors, in table order
    fat_sectors: Vec<u32>,
    /// Locations of DIFAT sectors, in chain order
    difat_sectors: Vec<u32>,
}

impl Fat {
    /// Create an empty table
    pub fn new(sector_size: usize) -> Self {
        Fat {
            table: AllocationTable::new(),
            sector_size,
            fat_sectors: Vec::new(),
            difat_sectors: Vec::new(),
        }
    }

    /// Load the table described by `header` from `store`
    pub fn load<S: SectorRead + ?Sized>(header: &Header, store: &S) -> Result<Self> {
        let sector_size = header.sector_size();
        let per_sector = sector_size / 4;
        let wanted = header.num_fat_sectors as usize;

        let mut fat_sectors: Vec<u32> = header.difat[..wanted.min(HEADER_DIFAT_ENTRIES)].to_vec();
        let mut difat_sectors = Vec::new();
        let mut visited = AHashSet::new();
        let mut next = header.first_difat_sector;

        while fat_sectors.len() < wanted {
            if next == ENDOFCHAIN || next == FREESECT {
                return Err(CfbError::format(format!(
                    "DIFAT chain ends after {} of {} FAT sectors",
                    fat_sectors.len(),
                    wanted
                )));
            }
            if !visited.insert(next) {
                return Err(CfbError::corrupt(next, "cycle in DIFAT chain"));
            }
            let sector = store.read_sector(sector_size, next)?;
            let entries: Vec<u32> = decode_entries(&sector).collect();
            let (locations, link) = entries.split_at(per_sector - 1);
            let take = (wanted - fat_sectors.len()).min(locations.len());
            fat_sectors.extend_from_slice(&locations[..take]);
            difat_sectors.push(next);
            next = link[0];
        }

        if difat_sectors.len() != header.num_difat_sectors as usize {
            tracing::warn!(
                "Header declares {} DIFAT sectors, chain holds {}",
                header.num_difat_sectors,
                difat_sectors.len()
            );
        }

        let mut entries = Vec::with_capacity(wanted * per_sector);
        for &location in &fat_sectors {
            let sector = store.read_sector(sector_size, location).map_err(|err| match err {
                CfbError::CorruptChain { .. } => CfbError::format(format!(
                    "FAT sector {} lies beyond the end of the container",
                    location
                )),
                other => other,
            })?;
            entries.extend(decode_entries(&sector));
        }

        let mut table = AllocationTable::from_entries(entries);
        for &location in &fat_sectors {
            Self::claim(&mut table, location, FATSECT, "FAT")?;
        }
        for &location in &difat_sectors {
            Self::claim(&mut table, location, DIFSECT, "DIFAT")?;
        }

        Ok(Fat {
            table,
            sector_size,
            fat_sectors,
            difat_sectors,
        })
    }

    /// Make sure a table sector is marked as such in the table
    fn claim(table: &mut AllocationTable, location: u32, marker: u32, what: &str) -> Result<()> {
        match table.get(location) {
            None => Err(CfbError::format(format!(
                "{} sector {} is not covered by the FAT",
                what, location
            ))),
            Some(value) if value == marker => Ok(()),
            Some(value) => {
                tracing::warn!(
                    "{} sector {} marked {:#x} in the FAT, correcting",
                    what,
                    location,
                    value
                );
                table.set(location, marker);
                Ok(())
            }
        }
    }

    pub fn sector_size(&self) -> usize {
        self.sector_size
    }

    pub fn entries_per_sector(&self) -> usize {
        self.sector_size / 4
    }

    pub fn fat_sectors(&self) -> &[u32] {
        &self.fat_sectors
    }

    pub fn difat_sectors(&self) -> &[u32] {
        &self.difat_sectors
    }

    /// Number of sectors an image must contain to hold every allocated sector
    pub fn image_sector_count(&self) -> u32 {
        self.table.last_used().map_or(0, |last| last + 1)
    }

    /// DIFAT entries a DIFAT sector holds besides its link
    fn difat_capacity(&self) -> usize {
        HEADER_DIFAT_ENTRIES + self.difat_sectors.len() * (self.entries_per_sector() - 1)
    }

    /// Encoded contents of every FAT sector, paired with its location
    pub fn encode_fat_sectors(&self) -> Vec<(u32, Vec<u8>)> {
        let bytes = encode_entries(self.table.entries(), self.sector_size);
        self.fat_sectors
            .iter()
            .zip(bytes.chunks(self.sector_size))
            .map(|(&location, chunk)| (location, chunk.to_vec()))
            .collect()
    }

    /// Inline header DIFAT plus encoded DIFAT sectors
    pub fn encode_difat(&self) -> ([u32; HEADER_DIFAT_ENTRIES], Vec<(u32, Vec<u8>)>) {
        let mut inline = [FREESECT; HEADER_DIFAT_ENTRIES];
        let split = self.fat_sectors.len().min(HEADER_DIFAT_ENTRIES);
        inline[..split].copy_from_slice(&self.fat_sectors[..split]);

        let per_sector = self.entries_per_sector() - 1;
        let mut overflow = self.fat_sectors[split..].chunks(per_sector);
        let mut sectors = Vec::with_capacity(self.difat_sectors.len());

        for (i, &location) in self.difat_sectors.iter().enumerate() {
            let mut entries = overflow.next().map(<[u32]>::to_vec).unwrap_or_default();
            entries.resize(per_sector, FREESECT);
            entries.push(self.difat_sectors.get(i + 1).copied().unwrap_or(ENDOFCHAIN));
            sectors.push((location, encode_entries(&entries, self.sector_size)));
        }

        (inline, sectors)
    }
}

impl ChainAllocator for Fat {
    fn table(&self) -> &AllocationTable {
        &self.table
    }

    fn table_mut(&mut self) -> &mut AllocationTable {
        &mut self.table
    }

    /// Append one FAT sector, placed at the first index it describes
    fn grow(&mut self) -> Result<()> {
        let per_sector = self.entries_per_sector();
        let location = self.table.len() as u64;
        let last = location + per_sector as u64 - 1;
        if last > MAXREGSECT as u64 {
            return Err(CfbError::CapacityExceeded { index: last });
        }

        let location = location as u32;
        self.table.push_free(per_sector);
        self.table.set(location, FATSECT);
        self.fat_sectors.push(location);

        if self.fat_sectors.len() > self.difat_capacity() {
            let difat = self.table.lowest_free(1)[0];
            self.table.set(difat, DIFSECT);
            self.difat_sectors.push(difat);
            tracing::debug!("Allocated DIFAT sector {}", difat);
        }

        tracing::trace!(
            "Grew FAT to {} sectors ({} entries)",
            self.fat_sectors.len(),
            self.table.len()
        );
        Ok(())
    }
}
