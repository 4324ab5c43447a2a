//! HXS Snapshot Loader
//!
//! A snapshot is validated completely at load: header, CRC, section bounds and
//! every record's string and range references. After that, lookups cannot fail
//! and never index out of bounds.

use std::collections::HashMap;

use log::trace;

use super::format::*;
use crate::hash::{crc32_update, hash_host};
use crate::types::{HostRules, RuleDef};

/// Error type for snapshot loading.
#[derive(Debug, thiserror::Error)]
pub enum SnapshotError {
    #[error("Invalid magic bytes")]
    InvalidMagic,
    #[error("Unsupported version: {0}")]
    UnsupportedVersion(u16),
    #[error("CRC32 mismatch: stored={stored:#010x}, computed={computed:#010x}")]
    Crc32Mismatch { stored: u32, computed: u32 },
    #[error("Missing section: {0:?}")]
    MissingSection(SectionId),
    #[error("Invalid section {section:?}: {reason}")]
    InvalidSection { section: SectionId, reason: String },
    #[error("Data too short")]
    DataTooShort,
}

/// Section metadata.
#[derive(Debug, Clone)]
pub struct SectionInfo {
    pub id: SectionId,
    pub flags: u16,
    pub offset: usize,
    pub length: usize,
    pub crc32: u32,
}

/// Fixed-size record table inside a section.
#[derive(Debug, Clone, Copy, Default)]
struct Table {
    start: usize,
    count: usize,
    record_size: usize,
}

impl Table {
    fn record(&self, idx: usize) -> usize {
        self.start + idx * self.record_size
    }
}

/// A validated, immutable store image.
pub struct Snapshot {
    data: Box<[u8]>,
    pub version: u16,
    pub flags: HeaderFlags,
    pub build_id: u32,
    sections: HashMap<SectionId, SectionInfo>,
    pool_start: usize,
    pool_len: usize,
    index_entries: usize,
    index_capacity: usize,
    index_count: usize,
    rulesets: Table,
    rules: Table,
    exclusions: Table,
}

impl Snapshot {
    /// Load and validate a snapshot from bytes.
    pub fn load(data: impl Into<Box<[u8]>>) -> Result<Self, SnapshotError> {
        let data: Box<[u8]> = data.into();
        if data.len() < HEADER_SIZE {
            return Err(SnapshotError::DataTooShort);
        }
        if !validate_magic(&data) {
            return Err(SnapshotError::InvalidMagic);
        }

        let header_u32 = |offset| read_u32_le(&data, offset).ok_or(SnapshotError::DataTooShort);

        let version = read_u16_le(&data, header::VERSION).ok_or(SnapshotError::DataTooShort)?;
        if version != HXS_VERSION {
            return Err(SnapshotError::UnsupportedVersion(version));
        }

        let flags = HeaderFlags::from_bits_truncate(
            read_u16_le(&data, header::FLAGS).ok_or(SnapshotError::DataTooShort)?,
        );
        let section_count = header_u32(header::SECTION_COUNT)? as usize;
        let section_dir_offset = header_u32(header::SECTION_DIR_OFFSET)? as usize;
        let build_id = header_u32(header::BUILD_ID)?;

        if flags.contains(HeaderFlags::HAS_CRC32) {
            let stored = header_u32(header::SNAPSHOT_CRC32)?;
            let computed = snapshot_crc32(&data);
            if stored != computed {
                return Err(SnapshotError::Crc32Mismatch { stored, computed });
            }
        }

        let dir_end = section_count
            .checked_mul(SECTION_ENTRY_SIZE)
            .and_then(|bytes| bytes.checked_add(section_dir_offset))
            .ok_or(SnapshotError::DataTooShort)?;
        if dir_end > data.len() {
            return Err(SnapshotError::DataTooShort);
        }

        let mut sections = HashMap::new();
        for i in 0..section_count {
            let entry = section_dir_offset + i * SECTION_ENTRY_SIZE;
            let field = |offset| read_u32_le(&data, entry + offset).unwrap_or(0);
            let id_raw = read_u16_le(&data, entry + section_entry::ID).unwrap_or(0);
            let Ok(id) = SectionId::try_from(id_raw) else {
                trace!("skipping unknown snapshot section {id_raw:#06x}");
                continue;
            };

            let info = SectionInfo {
                id,
                flags: read_u16_le(&data, entry + section_entry::FLAGS).unwrap_or(0),
                offset: field(section_entry::OFFSET) as usize,
                length: field(section_entry::LENGTH) as usize,
                crc32: field(section_entry::CRC32),
            };
            if info.offset.checked_add(info.length).map_or(true, |end| end > data.len()) {
                return Err(SnapshotError::InvalidSection {
                    section: id,
                    reason: "extends past end of file".to_string(),
                });
            }
            sections.insert(id, info);
        }

        for id in SectionId::ALL {
            if !sections.contains_key(&id) {
                return Err(SnapshotError::MissingSection(id));
            }
        }

        let mut snapshot = Self {
            data,
            version,
            flags,
            build_id,
            sections,
            pool_start: 0,
            pool_len: 0,
            index_entries: 0,
            index_capacity: 0,
            index_count: 0,
            rulesets: Table::default(),
            rules: Table::default(),
            exclusions: Table::default(),
        };
        snapshot.map_sections()?;
        snapshot.validate_records()?;
        Ok(snapshot)
    }

    fn map_sections(&mut self) -> Result<(), SnapshotError> {
        let pool = self.section_info(SectionId::StrPool);
        let pool_len = read_u32_le(&self.data, pool.offset).unwrap_or(u32::MAX) as usize;
        if pool.length < 4 || pool_len > pool.length - 4 {
            return Err(invalid(SectionId::StrPool, "pool length exceeds section"));
        }
        self.pool_start = pool.offset + 4;
        self.pool_len = pool_len;

        let index = self.section_info(SectionId::HostIndex);
        if index.length < HOST_INDEX_HEADER_SIZE {
            return Err(invalid(SectionId::HostIndex, "header truncated"));
        }
        let capacity = read_u32_le(&self.data, index.offset).unwrap_or(0) as usize;
        let count = read_u32_le(&self.data, index.offset + 4).unwrap_or(0) as usize;
        if capacity != 0 && !capacity.is_power_of_two() {
            return Err(invalid(SectionId::HostIndex, "capacity is not a power of two"));
        }
        if count > capacity || (capacity > 0 && count == capacity) {
            return Err(invalid(SectionId::HostIndex, "index has no free slot"));
        }
        if HOST_INDEX_HEADER_SIZE + capacity * HOST_INDEX_ENTRY_SIZE > index.length {
            return Err(invalid(SectionId::HostIndex, "entries extend past section"));
        }
        self.index_entries = index.offset + HOST_INDEX_HEADER_SIZE;
        self.index_capacity = capacity;
        self.index_count = count;

        self.rulesets = self.map_table(SectionId::RuleSets, RULESET_RECORD_SIZE)?;
        self.rules = self.map_table(SectionId::Rules, RULE_RECORD_SIZE)?;
        self.exclusions = self.map_table(SectionId::Exclusions, EXCLUSION_RECORD_SIZE)?;
        Ok(())
    }

    fn map_table(&self, id: SectionId, record_size: usize) -> Result<Table, SnapshotError> {
        let info = self.section_info(id);
        let count = read_u32_le(&self.data, info.offset)
            .ok_or_else(|| invalid(id, "record count truncated"))? as usize;
        let needed = count
            .checked_mul(record_size)
            .and_then(|bytes| bytes.checked_add(4))
            .ok_or_else(|| invalid(id, "record count overflows"))?;
        if needed > info.length {
            return Err(invalid(id, "records extend past section"));
        }
        Ok(Table {
            start: info.offset + 4,
            count,
            record_size,
        })
    }

    fn validate_records(&self) -> Result<(), SnapshotError> {
        let mut next_rule = 0usize;
        for id in 0..self.rulesets.count {
            let rec = self.rulesets.record(id);
            let host = self
                .string_ref(rec + ruleset_record::HOST_OFF)
                .ok_or_else(|| invalid(SectionId::RuleSets, format!("ruleset {id}: bad host string")))?;
            if host.is_empty() {
                return Err(invalid(SectionId::RuleSets, format!("ruleset {id}: empty host")));
            }
            let (start, count) = self.range_ref(rec + ruleset_record::RULE_START);
            if start != next_rule || start + count > self.rules.count {
                return Err(invalid(SectionId::RuleSets, format!("ruleset {id}: bad rule range")));
            }
            next_rule = start + count;
        }

        let mut next_exclusion = 0usize;
        for id in 0..self.rules.count {
            let rec = self.rules.record(id);
            if self.string_ref(rec + rule_record::FROM_OFF).is_none()
                || self.string_ref(rec + rule_record::TO_OFF).is_none()
            {
                return Err(invalid(SectionId::Rules, format!("rule {id}: bad string")));
            }
            let (start, count) = self.range_ref(rec + rule_record::EXCL_START);
            if start != next_exclusion || start + count > self.exclusions.count {
                return Err(invalid(SectionId::Rules, format!("rule {id}: bad exclusion range")));
            }
            next_exclusion = start + count;
        }

        for id in 0..self.exclusions.count {
            let rec = self.exclusions.record(id);
            if self.string_ref(rec + exclusion_record::PATTERN_OFF).is_none() {
                return Err(invalid(SectionId::Exclusions, format!("exclusion {id}: bad string")));
            }
        }

        for slot in 0..self.index_capacity {
            let (lo, hi, value) = self.index_slot(slot);
            if (lo != 0 || hi != 0) && value as usize >= self.rulesets.count {
                return Err(invalid(SectionId::HostIndex, format!("slot {slot}: bad ruleset id")));
            }
        }

        Ok(())
    }

    fn section_info(&self, id: SectionId) -> SectionInfo {
        // Presence is checked in `load`.
        self.sections[&id].clone()
    }

    /// Resolve an `(offset, length)` pair stored at `at` into a pool string.
    fn string_ref(&self, at: usize) -> Option<&str> {
        let off = read_u32_le(&self.data, at)? as usize;
        let len = read_u32_le(&self.data, at + 4)? as usize;
        if off.checked_add(len)? > self.pool_len {
            return None;
        }
        let start = self.pool_start + off;
        std::str::from_utf8(&self.data[start..start + len]).ok()
    }

    fn string_at(&self, at: usize) -> &str {
        let s = self.string_ref(at);
        debug_assert!(s.is_some(), "string reference validated at load");
        s.unwrap_or_default()
    }

    fn range_ref(&self, at: usize) -> (usize, usize) {
        let start = read_u32_le(&self.data, at).unwrap_or(0) as usize;
        let count = read_u32_le(&self.data, at + 4).unwrap_or(0) as usize;
        (start, count)
    }

    fn index_slot(&self, slot: usize) -> (u32, u32, u32) {
        let entry = self.index_entries + slot * HOST_INDEX_ENTRY_SIZE;
        (
            read_u32_le(&self.data, entry).unwrap_or(0),
            read_u32_le(&self.data, entry + 4).unwrap_or(0),
            read_u32_le(&self.data, entry + 8).unwrap_or(0),
        )
    }

    pub fn section_count(&self) -> usize {
        self.sections.len()
    }

    pub fn get_section_info(&self, id: SectionId) -> Option<&SectionInfo> {
        self.sections.get(&id)
    }

    /// Size of the snapshot image in bytes.
    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    pub fn ruleset_count(&self) -> usize {
        self.rulesets.count
    }

    pub fn rule_count(&self) -> usize {
        self.rules.count
    }

    pub fn exclusion_count(&self) -> usize {
        self.exclusions.count
    }

    pub fn host_index_capacity(&self) -> usize {
        self.index_capacity
    }

    pub fn host_index_count(&self) -> usize {
        self.index_count
    }

    /// Find the ruleset id stored under an exact host key.
    pub fn find_ruleset(&self, host: &str) -> Option<usize> {
        if self.index_capacity == 0 {
            return None;
        }

        let hash = hash_host(host);
        let mask = self.index_capacity - 1;
        let mut slot = (hash.lo as usize) & mask;

        for _ in 0..self.index_capacity {
            let (lo, hi, value) = self.index_slot(slot);
            if lo == 0 && hi == 0 {
                return None;
            }
            if lo == hash.lo && hi == hash.hi {
                let id = value as usize;
                if self.ruleset_host(id).eq_ignore_ascii_case(host) {
                    return Some(id);
                }
            }
            slot = (slot + 1) & mask;
        }

        None
    }

    /// Host key of a ruleset.
    pub fn ruleset_host(&self, id: usize) -> &str {
        if id >= self.rulesets.count {
            return "";
        }
        self.string_at(self.rulesets.record(id) + ruleset_record::HOST_OFF)
    }

    /// Decode a ruleset into its stored rule definitions.
    pub fn ruleset(&self, id: usize) -> Option<HostRules> {
        if id >= self.rulesets.count {
            return None;
        }
        let rec = self.rulesets.record(id);
        let (rule_start, rule_count) = self.range_ref(rec + ruleset_record::RULE_START);

        let rules = (rule_start..rule_start + rule_count)
            .map(|rule_id| self.rule_def(rule_id))
            .collect();

        Some(HostRules::new(self.ruleset_host(id), rules))
    }

    fn rule_def(&self, rule_id: usize) -> RuleDef {
        let rec = self.rules.record(rule_id);
        let (excl_start, excl_count) = self.range_ref(rec + rule_record::EXCL_START);
        let exclusions = (excl_start..excl_start + excl_count)
            .map(|idx| {
                let at = self.exclusions.record(idx) + exclusion_record::PATTERN_OFF;
                self.string_at(at).to_string()
            })
            .collect();

        RuleDef {
            from: self.string_at(rec + rule_record::FROM_OFF).to_string(),
            to: self.string_at(rec + rule_record::TO_OFF).to_string(),
            exclusions,
        }
    }

    /// Iterate all host keys in storage order.
    pub fn hosts(&self) -> impl Iterator<Item = &str> + '_ {
        (0..self.rulesets.count).map(move |id| self.ruleset_host(id))
    }
}

impl std::fmt::Debug for Snapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Snapshot")
            .field("version", &self.version)
            .field("build_id", &self.build_id)
            .field("bytes", &self.data.len())
            .field("rulesets", &self.rulesets.count)
            .field("rules", &self.rules.count)
            .finish()
    }
}

/// CRC32 over the whole image with the stored CRC field skipped.
pub fn snapshot_crc32(data: &[u8]) -> u32 {
    let field_end = header::SNAPSHOT_CRC32 + 4;
    let crc = crc32_update(0xffffffff, &data[..header::SNAPSHOT_CRC32]);
    crc32_update(crc, &data[field_end..]) ^ 0xffffffff
}

fn invalid(section: SectionId, reason: impl Into<String>) -> SnapshotError {
    SnapshotError::InvalidSection {
        section,
        reason: reason.into(),
    }
}
