//! HXS Snapshot Format v1 Constants
//!
//! All values are little-endian. Strings live in the string pool and are
//! referenced everywhere else as `(offset: u32, length: u32)` pairs.

/// Magic bytes: "HXS1"
pub const HXS_MAGIC: [u8; 4] = *b"HXS1";

/// Current format version
pub const HXS_VERSION: u16 = 1;

/// Header size in bytes
pub const HEADER_SIZE: usize = 64;

/// Section directory entry size
pub const SECTION_ENTRY_SIZE: usize = 16;

// =============================================================================
// Header
// =============================================================================

/// Header field byte offsets.
pub mod header {
    /// u8[4] magic = "HXS1"
    pub const MAGIC: usize = 0;
    /// u16 version
    pub const VERSION: usize = 4;
    /// u16 flags
    pub const FLAGS: usize = 6;
    /// u32 headerBytes (always 64)
    pub const HEADER_BYTES: usize = 8;
    /// u32 sectionCount
    pub const SECTION_COUNT: usize = 12;
    /// u32 sectionDirOffset
    pub const SECTION_DIR_OFFSET: usize = 16;
    /// u32 sectionDirBytes
    pub const SECTION_DIR_BYTES: usize = 20;
    /// u32 buildId
    pub const BUILD_ID: usize = 24;
    /// u32 snapshotCrc32 (whole file, this field excluded)
    pub const SNAPSHOT_CRC32: usize = 28;
}

bitflags::bitflags! {
    /// Header flags.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct HeaderFlags: u16 {
        /// Snapshot carries a CRC32 over the whole file
        const HAS_CRC32 = 1 << 0;
    }
}

pub mod section_entry {
    /// u16 section id
    pub const ID: usize = 0;
    /// u16 flags
    pub const FLAGS: usize = 2;
    /// u32 file offset
    pub const OFFSET: usize = 4;
    /// u32 byte length
    pub const LENGTH: usize = 8;
    /// u32 CRC32 (0 if unused)
    pub const CRC32: usize = 12;
}

// =============================================================================
// Section IDs
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum SectionId {
    /// String pool for hosts, patterns and templates
    StrPool = 0x0001,
    /// Host key hash -> ruleset id
    HostIndex = 0x0002,
    /// One record per host key
    RuleSets = 0x0003,
    /// Rules, grouped contiguously by ruleset
    Rules = 0x0004,
    /// Exclusion patterns, grouped contiguously by rule
    Exclusions = 0x0005,
}

impl SectionId {
    pub const ALL: [SectionId; 5] = [
        SectionId::StrPool,
        SectionId::HostIndex,
        SectionId::RuleSets,
        SectionId::Rules,
        SectionId::Exclusions,
    ];
}

impl TryFrom<u16> for SectionId {
    type Error = ();

    fn try_from(value: u16) -> Result<Self, Self::Error> {
        match value {
            0x0001 => Ok(Self::StrPool),
            0x0002 => Ok(Self::HostIndex),
            0x0003 => Ok(Self::RuleSets),
            0x0004 => Ok(Self::Rules),
            0x0005 => Ok(Self::Exclusions),
            _ => Err(()),
        }
    }
}

// =============================================================================
// Host Index Layout (open addressing, linear probing)
// =============================================================================

/// Header: capacity, count, seedLo, seedHi, reserved
pub const HOST_INDEX_HEADER_SIZE: usize = 20;

/// Entry: hashLo, hashHi, rulesetId
pub const HOST_INDEX_ENTRY_SIZE: usize = 12;

// =============================================================================
// Record Layouts
// =============================================================================

pub const RULESET_RECORD_SIZE: usize = 16;

pub mod ruleset_record {
    pub const HOST_OFF: usize = 0;
    pub const HOST_LEN: usize = 4;
    pub const RULE_START: usize = 8;
    pub const RULE_COUNT: usize = 12;
}

pub const RULE_RECORD_SIZE: usize = 24;

pub mod rule_record {
    pub const FROM_OFF: usize = 0;
    pub const FROM_LEN: usize = 4;
    pub const TO_OFF: usize = 8;
    pub const TO_LEN: usize = 12;
    pub const EXCL_START: usize = 16;
    pub const EXCL_COUNT: usize = 20;
}

pub const EXCLUSION_RECORD_SIZE: usize = 8;

pub mod exclusion_record {
    pub const PATTERN_OFF: usize = 0;
    pub const PATTERN_LEN: usize = 4;
}

// =============================================================================
// Helpers
// =============================================================================

/// Align offset to boundary.
#[inline]
pub const fn align_offset(offset: usize, alignment: usize) -> usize {
    (offset + alignment - 1) & !(alignment - 1)
}

#[inline]
pub fn validate_magic(data: &[u8]) -> bool {
    data.len() >= 4 && data[..4] == HXS_MAGIC
}

/// Read u16 little-endian; `None` past the end.
#[inline]
pub fn read_u16_le(data: &[u8], offset: usize) -> Option<u16> {
    let bytes = data.get(offset..offset.checked_add(2)?)?;
    Some(u16::from_le_bytes([bytes[0], bytes[1]]))
}

/// Read u32 little-endian; `None` past the end.
#[inline]
pub fn read_u32_le(data: &[u8], offset: usize) -> Option<u32> {
    let bytes = data.get(offset..offset.checked_add(4)?)?;
    Some(u32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]))
}

#[inline]
pub fn write_u16_le(data: &mut [u8], offset: usize, value: u16) {
    data[offset..offset + 2].copy_from_slice(&value.to_le_bytes());
}

#[inline]
pub fn write_u32_le(data: &mut [u8], offset: usize, value: u32) {
    data[offset..offset + 4].copy_from_slice(&value.to_le_bytes());
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reads_are_bounds_checked() {
        let data = [1u8, 0, 0, 0, 2];
        assert_eq!(read_u32_le(&data, 0), Some(1));
        assert_eq!(read_u32_le(&data, 2), None);
        assert_eq!(read_u16_le(&data, 3), Some(0x0200));
        assert_eq!(read_u16_le(&data, usize::MAX), None);
    }

    #[test]
    fn test_alignment() {
        assert_eq!(align_offset(0, 4), 0);
        assert_eq!(align_offset(5, 4), 8);
        assert_eq!(align_offset(8, 4), 8);
    }

    #[test]
    fn test_section_ids_round_trip() {
        for id in SectionId::ALL {
            assert_eq!(SectionId::try_from(id as u16), Ok(id));
        }
        assert!(SectionId::try_from(0x00ff).is_err());
    }
}
