use crate::error::{CfbError, Result};
use serde::{Deserialize, Serialize};

/// Compound file signature
pub const MAGIC: [u8; 8] = [0xD0, 0xCF, 0x11, 0xE0, 0xA1, 0xB1, 0x1A, 0xE1];

/// The header record is always 512 bytes; version 4 pads it to a full sector.
pub const HEADER_SIZE: usize = 512;

/// Number of FAT sector locations stored inline in the header
pub const HEADER_DIFAT_ENTRIES: usize = 109;

pub const MINOR_VERSION: u16 = 0x003E;
pub const BYTE_ORDER_MARK: u16 = 0xFFFE;
pub const MINI_SECTOR_SHIFT: u16 = 6;
pub const MINI_SECTOR_SIZE: usize = 1 << MINI_SECTOR_SHIFT;

/// Streams strictly smaller than this live in the mini-stream.
pub const MINI_STREAM_CUTOFF: u32 = 4096;

/// Largest regular sector index
pub const MAXREGSECT: u32 = 0xFFFF_FFFA;
/// Marks a DIFAT sector in the FAT
pub const DIFSECT: u32 = 0xFFFF_FFFC;
/// Marks a FAT sector in the FAT
pub const FATSECT: u32 = 0xFFFF_FFFD;
/// Terminates a chain
pub const ENDOFCHAIN: u32 = 0xFFFF_FFFE;
/// Unallocated sector
pub const FREESECT: u32 = 0xFFFF_FFFF;

const OFF_CLSID: usize = 0x08;
const OFF_MINOR_VERSION: usize = 0x18;
const OFF_MAJOR_VERSION: usize = 0x1A;
const OFF_BYTE_ORDER: usize = 0x1C;
const OFF_SECTOR_SHIFT: usize = 0x1E;
const OFF_MINI_SECTOR_SHIFT: usize = 0x20;
const OFF_NUM_DIR_SECTORS: usize = 0x28;
const OFF_NUM_FAT_SECTORS: usize = 0x2C;
const OFF_FIRST_DIR_SECTOR: usize = 0x30;
const OFF_TRANSACTION: usize = 0x34;
const OFF_MINI_CUTOFF: usize = 0x38;
const OFF_FIRST_MINIFAT: usize = 0x3C;
const OFF_NUM_MINIFAT: usize = 0x40;
const OFF_FIRST_DIFAT: usize = 0x44;
const OFF_NUM_DIFAT: usize = 0x48;
const OFF_DIFAT: usize = 0x4C;

/// Container format version
///
/// The major version fixes the sector size: version 3 uses 512-byte sectors,
/// version 4 uses 4096-byte sectors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Version {
    #[default]
    V3,
    V4,
}

impl Version {
    pub fn from_major(major: u16) -> Option<Self> {
        match major {
            3 => Some(Version::V3),
            4 => Some(Version::V4),
            _ => None,
        }
    }

    pub fn major(self) -> u16 {
        match self {
            Version::V3 => 3,
            Version::V4 => 4,
        }
    }

    pub fn sector_shift(self) -> u16 {
        match self {
            Version::V3 => 9,
            Version::V4 => 12,
        }
    }

    pub fn sector_size(self) -> usize {
        1 << self.sector_shift()
    }

    /// Largest stream size the directory record can carry
    ///
    /// Version 3 readers only look at the low 32 bits of the size field.
    pub fn max_stream_size(self) -> u64 {
        match self {
            Version::V3 => u32::MAX as u64,
            Version::V4 => u64::MAX,
        }
    }
}

/// Compound file header (first sector)
///
/// Count and location fields describe the layout found on disk when parsed,
/// and are overwritten from the live allocation state before every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    pub clsid: [u8; 16],
    pub version: Version,
    pub minor_version: u16,
    pub num_dir_sectors: u32,
    pub num_fat_sectors: u32,
    pub first_dir_sector: u32,
    pub transaction_signature: u32,
    pub mini_stream_cutoff: u32,
    pub first_minifat_sector: u32,
    pub num_minifat_sectors: u32,
    pub first_difat_sector: u32,
    pub num_difat_sectors: u32,
    /// Inline FAT sector locations, padded with `FREESECT`
    pub difat: [u32; HEADER_DIFAT_ENTRIES],
}

impl Header {
    /// Create a header for an empty container of the given version
    pub fn new(version: Version) -> Self {
        Header {
            clsid: [0; 16],
            version,
            minor_version: MINOR_VERSION,
            num_dir_sectors: 0,
            num_fat_sectors: 0,
            first_dir_sector: ENDOFCHAIN,
            transaction_signature: 0,
            mini_stream_cutoff: MINI_STREAM_CUTOFF,
            first_minifat_sector: ENDOFCHAIN,
            num_minifat_sectors: 0,
            first_difat_sector: ENDOFCHAIN,
            num_difat_sectors: 0,
            difat: [FREESECT; HEADER_DIFAT_ENTRIES],
        }
    }

    pub fn sector_size(&self) -> usize {
        self.version.sector_size()
    }

    /// Parse and validate a header from the leading bytes of a container
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(CfbError::format(format!(
                "container too small for header: {} bytes",
                bytes.len()
            )));
        }

        if bytes[..8] != MAGIC {
            return Err(CfbError::InvalidSignature);
        }

        let minor_version = read_u16(bytes, OFF_MINOR_VERSION);
        let major = read_u16(bytes, OFF_MAJOR_VERSION);
        let version = Version::from_major(major).ok_or(CfbError::UnsupportedVersion {
            major,
            minor: minor_version,
        })?;

        if read_u16(bytes, OFF_BYTE_ORDER) != BYTE_ORDER_MARK {
            return Err(CfbError::format("byte order mark is not little-endian"));
        }

        let sector_shift = read_u16(bytes, OFF_SECTOR_SHIFT);
        if sector_shift != version.sector_shift() {
            return Err(CfbError::InvalidSectorShift {
                major,
                shift: sector_shift,
            });
        }

        let mini_shift = read_u16(bytes, OFF_MINI_SECTOR_SHIFT);
        if mini_shift != MINI_SECTOR_SHIFT {
            return Err(CfbError::format(format!(
                "unsupported mini sector shift {}",
                mini_shift
            )));
        }

        let mini_stream_cutoff = read_u32(bytes, OFF_MINI_CUTOFF);
        if mini_stream_cutoff != MINI_STREAM_CUTOFF {
            return Err(CfbError::format(format!(
                "unsupported mini stream cutoff {}",
                mini_stream_cutoff
            )));
        }

        let num_dir_sectors = read_u32(bytes, OFF_NUM_DIR_SECTORS);
        if version == Version::V3 && num_dir_sectors != 0 {
            tracing::warn!(
                "Version 3 header declares {} directory sectors, ignoring",
                num_dir_sectors
            );
        }

        let mut clsid = [0u8; 16];
        clsid.copy_from_slice(&bytes[OFF_CLSID..OFF_CLSID + 16]);

        let mut difat = [FREESECT; HEADER_DIFAT_ENTRIES];
        for (i, slot) in difat.iter_mut().enumerate() {
            *slot = read_u32(bytes, OFF_DIFAT + i * 4);
        }

        Ok(Header {
            clsid,
            version,
            minor_version,
            num_dir_sectors,
            num_fat_sectors: read_u32(bytes, OFF_NUM_FAT_SECTORS),
            first_dir_sector: read_u32(bytes, OFF_FIRST_DIR_SECTOR),
            transaction_signature: read_u32(bytes, OFF_TRANSACTION),
            mini_stream_cutoff,
            first_minifat_sector: read_u32(bytes, OFF_FIRST_MINIFAT),
            num_minifat_sectors: read_u32(bytes, OFF_NUM_MINIFAT),
            first_difat_sector: read_u32(bytes, OFF_FIRST_DIFAT),
            num_difat_sectors: read_u32(bytes, OFF_NUM_DIFAT),
            difat,
        })
    }

    /// Check the declared counts and locations against the container length
    pub fn validate_extent(&self, container_len: u64) -> Result<()> {
        let sector_size = self.sector_size() as u64;
        if container_len < sector_size {
            return Err(CfbError::format(format!(
                "container of {} bytes is shorter than its {}-byte header sector",
                container_len, sector_size
            )));
        }

        let sectors = (container_len - sector_size).div_ceil(sector_size);
        let in_range = |sector: u32| (sector as u64) < sectors;

        if self.num_fat_sectors as u64 > sectors {
            return Err(CfbError::format(format!(
                "header declares {} FAT sectors but the container holds {}",
                self.num_fat_sectors, sectors
            )));
        }

        let inline = (self.num_fat_sectors as usize).min(HEADER_DIFAT_ENTRIES);
        if let Some(&bad) = self.difat[..inline].iter().find(|&&s| !in_range(s)) {
            return Err(CfbError::format(format!(
                "FAT sector {} lies beyond the end of the container",
                bad
            )));
        }

        if self.num_fat_sectors as usize > HEADER_DIFAT_ENTRIES && self.num_difat_sectors == 0 {
            return Err(CfbError::format(format!(
                "{} FAT sectors declared without a DIFAT chain",
                self.num_fat_sectors
            )));
        }

        if !in_range(self.first_dir_sector) {
            return Err(CfbError::format(format!(
                "first directory sector {:#x} out of range",
                self.first_dir_sector
            )));
        }

        if self.first_minifat_sector != ENDOFCHAIN && !in_range(self.first_minifat_sector) {
            return Err(CfbError::format(format!(
                "first mini FAT sector {:#x} out of range",
                self.first_minifat_sector
            )));
        }

        if self.num_difat_sectors as u64 > sectors {
            return Err(CfbError::format(format!(
                "header declares {} DIFAT sectors but the container holds {}",
                self.num_difat_sectors, sectors
            )));
        }

        Ok(())
    }

    /// Serialize to the 512-byte header record
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(HEADER_SIZE);

        bytes.extend_from_slice(&MAGIC);
        bytes.extend_from_slice(&self.clsid);
        bytes.extend_from_slice(&self.minor_version.to_le_bytes());
        bytes.extend_from_slice(&self.version.major().to_le_bytes());
        bytes.extend_from_slice(&BYTE_ORDER_MARK.to_le_bytes());
        bytes.extend_from_slice(&self.version.sector_shift().to_le_bytes());
        bytes.extend_from_slice(&MINI_SECTOR_SHIFT.to_le_bytes());
        bytes.extend_from_slice(&[0u8; 6]);
        let num_dir_sectors = match self.version {
            Version::V3 => 0,
            Version::V4 => self.num_dir_sectors,
        };
        bytes.extend_from_slice(&num_dir_sectors.to_le_bytes());
        bytes.extend_from_slice(&self.num_fat_sectors.to_le_bytes());
        bytes.extend_from_slice(&self.first_dir_sector.to_le_bytes());
        bytes.extend_from_slice(&self.transaction_signature.to_le_bytes());
        bytes.extend_from_slice(&self.mini_stream_cutoff.to_le_bytes());
        bytes.extend_from_slice(&self.first_minifat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.num_minifat_sectors.to_le_bytes());
        bytes.extend_from_slice(&self.first_difat_sector.to_le_bytes());
        bytes.extend_from_slice(&self.num_difat_sectors.to_le_bytes());
        for entry in &self.difat {
            bytes.extend_from_slice(&entry.to_le_bytes());
        }

        debug_assert_eq!(bytes.len(), HEADER_SIZE);
        bytes
    }
}

pub(crate) fn read_u16(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

pub(crate) fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([
        bytes[offset],
        bytes[offset + 1],
        bytes[offset + 2],
        bytes[offset + 3],
    ])
}

pub(crate) fn read_u64(bytes: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&bytes[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Header {
        let mut header = Header::new(Version::V3);
        header.num_fat_sectors = 1;
        header.difat[0] = 0;
        header.first_dir_sector = 1;
        header
    }

    #[test]
    fn test_header_layout_offsets() {
        let bytes = sample().to_bytes();
        assert_eq!(bytes.len(), HEADER_SIZE);
        assert_eq!(&bytes[..8], &MAGIC);
        assert_eq!(read_u16(&bytes, OFF_MAJOR_VERSION), 3);
        assert_eq!(read_u16(&bytes, OFF_SECTOR_SHIFT), 9);
        assert_eq!(read_u16(&bytes, OFF_MINI_SECTOR_SHIFT), 6);
        assert_eq!(read_u32(&bytes, OFF_MINI_CUTOFF), 4096);
        assert_eq!(read_u32(&bytes, OFF_FIRST_DIR_SECTOR), 1);
        assert_eq!(read_u32(&bytes, OFF_DIFAT), 0);
        assert_eq!(read_u32(&bytes, OFF_DIFAT + 4), FREESECT);
    }

    #[test]
    fn test_header_serialization() {
        let header = sample();
        let parsed = Header::from_bytes(&header.to_bytes()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn test_invalid_magic() {
        let mut bytes = sample().to_bytes();
        bytes[0] = b'X';
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(CfbError::InvalidSignature)
        ));
    }

    #[test]
    fn test_invalid_version() {
        let mut bytes = sample().to_bytes();
        bytes[OFF_MAJOR_VERSION] = 5;
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(CfbError::UnsupportedVersion { major: 5, .. })
        ));
    }

    #[test]
    fn test_sector_shift_must_match_version() {
        let mut bytes = sample().to_bytes();
        bytes[OFF_SECTOR_SHIFT] = 12;
        assert!(matches!(
            Header::from_bytes(&bytes),
            Err(CfbError::InvalidSectorShift { major: 3, shift: 12 })
        ));
    }

    #[test]
    fn test_truncated_header() {
        let bytes = sample().to_bytes();
        assert!(matches!(
            Header::from_bytes(&bytes[..100]),
            Err(CfbError::Format(_))
        ));
    }

    #[test]
    fn test_extent_validation() {
        let header = sample();
        // Header sector plus two sectors
        assert!(header.validate_extent(512 * 3).is_ok());
        // Directory sector 1 missing
        assert!(matches!(
            header.validate_extent(512 * 2),
            Err(CfbError::Format(_))
        ));

        let mut header = sample();
        header.num_fat_sectors = 40;
        assert!(header.validate_extent(512 * 3).is_err());
    }

    #[test]
    fn test_v4_writes_directory_count() {
        let mut header = Header::new(Version::V4);
        header.num_dir_sectors = 3;
        let bytes = header.to_bytes();
        assert_eq!(read_u16(&bytes, OFF_SECTOR_SHIFT), 12);
        assert_eq!(read_u32(&bytes, OFF_NUM_DIR_SECTORS), 3);

        let mut header = Header::new(Version::V3);
        header.num_dir_sectors = 3;
        assert_eq!(read_u32(&header.to_bytes(), OFF_NUM_DIR_SECTORS), 0);
    }
}
