//! HXS Snapshot Writer
//!
//! Produces a complete, CRC-protected store image from host rule entries.
//! Host keys are lowercased; when a key repeats, the first entry wins.

use std::collections::{HashMap, HashSet};

use log::warn;

use super::format::*;
use super::loader::snapshot_crc32;
use crate::hash::{hash_host, Hash64, SEED_HI, SEED_LO};
use crate::host::normalize_host;
use crate::types::HostRules;

/// Build a snapshot with build id 0.
pub fn build_snapshot(entries: &[HostRules]) -> Vec<u8> {
    build_snapshot_with_id(entries, 0)
}

/// Build a snapshot stamped with `build_id`.
pub fn build_snapshot_with_id(entries: &[HostRules], build_id: u32) -> Vec<u8> {
    let mut str_pool = StringPool::new();
    let mut rulesets = RecordTable::new(RULESET_RECORD_SIZE);
    let mut rules = RecordTable::new(RULE_RECORD_SIZE);
    let mut exclusions = RecordTable::new(EXCLUSION_RECORD_SIZE);
    let mut index_entries: Vec<(Hash64, u32)> = Vec::with_capacity(entries.len());
    let mut seen: HashSet<String> = HashSet::with_capacity(entries.len());

    for entry in entries {
        let host = normalize_host(entry.host.trim()).into_owned();
        if host.is_empty() {
            warn!("skipping ruleset with empty host key");
            continue;
        }
        if !seen.insert(host.clone()) {
            warn!("duplicate host key '{host}' in snapshot input; keeping the first entry");
            continue;
        }

        let ruleset_id = rulesets.len() as u32;
        let rule_start = rules.len() as u32;

        for rule in &entry.rules {
            let excl_start = exclusions.len() as u32;
            for pattern in &rule.exclusions {
                let (off, len) = str_pool.intern(pattern);
                exclusions.push(&[off, len]);
            }

            let (from_off, from_len) = str_pool.intern(&rule.from);
            let (to_off, to_len) = str_pool.intern(&rule.to);
            rules.push(&[
                from_off,
                from_len,
                to_off,
                to_len,
                excl_start,
                rule.exclusions.len() as u32,
            ]);
        }

        let (host_off, host_len) = str_pool.intern(&host);
        rulesets.push(&[host_off, host_len, rule_start, entry.rules.len() as u32]);
        index_entries.push((hash_host(&host), ruleset_id));
    }

    let sections = [
        (SectionId::StrPool, str_pool.build()),
        (SectionId::HostIndex, build_host_index(&index_entries)),
        (SectionId::RuleSets, rulesets.build()),
        (SectionId::Rules, rules.build()),
        (SectionId::Exclusions, exclusions.build()),
    ];

    assemble(&sections, build_id)
}

fn assemble(sections: &[(SectionId, Vec<u8>)], build_id: u32) -> Vec<u8> {
    let section_dir_offset = HEADER_SIZE;
    let section_dir_bytes = sections.len() * SECTION_ENTRY_SIZE;
    let mut data_offset = align_offset(section_dir_offset + section_dir_bytes, 4);

    let mut offsets = Vec::with_capacity(sections.len());
    for (_, data) in sections {
        offsets.push(data_offset);
        data_offset = align_offset(data_offset + data.len(), 4);
    }

    let mut buffer = vec![0u8; data_offset];
    buffer[header::MAGIC..header::MAGIC + 4].copy_from_slice(&HXS_MAGIC);
    write_u16_le(&mut buffer, header::VERSION, HXS_VERSION);
    write_u16_le(&mut buffer, header::FLAGS, HeaderFlags::HAS_CRC32.bits());
    write_u32_le(&mut buffer, header::HEADER_BYTES, HEADER_SIZE as u32);
    write_u32_le(&mut buffer, header::SECTION_COUNT, sections.len() as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_OFFSET, section_dir_offset as u32);
    write_u32_le(&mut buffer, header::SECTION_DIR_BYTES, section_dir_bytes as u32);
    write_u32_le(&mut buffer, header::BUILD_ID, build_id);

    for (index, ((id, data), offset)) in sections.iter().zip(&offsets).enumerate() {
        let entry = section_dir_offset + index * SECTION_ENTRY_SIZE;
        write_u16_le(&mut buffer, entry + section_entry::ID, *id as u16);
        write_u16_le(&mut buffer, entry + section_entry::FLAGS, 0);
        write_u32_le(&mut buffer, entry + section_entry::OFFSET, *offset as u32);
        write_u32_le(&mut buffer, entry + section_entry::LENGTH, data.len() as u32);
        write_u32_le(&mut buffer, entry + section_entry::CRC32, 0);
        buffer[*offset..*offset + data.len()].copy_from_slice(data);
    }

    let crc = snapshot_crc32(&buffer);
    write_u32_le(&mut buffer, header::SNAPSHOT_CRC32, crc);
    buffer
}

struct StringPool {
    data: Vec<u8>,
    index: HashMap<String, u32>,
}

impl StringPool {
    fn new() -> Self {
        Self {
            data: Vec::new(),
            index: HashMap::new(),
        }
    }

    fn intern(&mut self, s: &str) -> (u32, u32) {
        if let Some(&offset) = self.index.get(s) {
            return (offset, s.len() as u32);
        }
        let offset = self.data.len() as u32;
        self.data.extend_from_slice(s.as_bytes());
        self.index.insert(s.to_string(), offset);
        (offset, s.len() as u32)
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.data.len() as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

/// Count-prefixed table of fixed-size u32 records.
struct RecordTable {
    record_size: usize,
    count: usize,
    data: Vec<u8>,
}

impl RecordTable {
    fn new(record_size: usize) -> Self {
        Self {
            record_size,
            count: 0,
            data: Vec::new(),
        }
    }

    fn len(&self) -> usize {
        self.count
    }

    fn push(&mut self, fields: &[u32]) {
        debug_assert_eq!(fields.len() * 4, self.record_size);
        for field in fields {
            self.data.extend_from_slice(&field.to_le_bytes());
        }
        self.count += 1;
    }

    fn build(self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(4 + self.data.len());
        buf.extend_from_slice(&(self.count as u32).to_le_bytes());
        buf.extend_from_slice(&self.data);
        buf
    }
}

fn build_host_index(entries: &[(Hash64, u32)]) -> Vec<u8> {
    let count = entries.len();
    let capacity = if count == 0 { 0 } else { compute_capacity(count) };

    let mut buf = vec![0u8; HOST_INDEX_HEADER_SIZE + capacity * HOST_INDEX_ENTRY_SIZE];
    write_u32_le(&mut buf, 0, capacity as u32);
    write_u32_le(&mut buf, 4, count as u32);
    write_u32_le(&mut buf, 8, SEED_LO);
    write_u32_le(&mut buf, 12, SEED_HI);

    if capacity == 0 {
        return buf;
    }

    let mask = capacity - 1;
    for (hash, value) in entries {
        let mut slot = (hash.lo as usize) & mask;
        loop {
            let entry = HOST_INDEX_HEADER_SIZE + slot * HOST_INDEX_ENTRY_SIZE;
            let occupied = read_u32_le(&buf, entry) != Some(0) || read_u32_le(&buf, entry + 4) != Some(0);
            if !occupied {
                write_u32_le(&mut buf, entry, hash.lo);
                write_u32_le(&mut buf, entry + 4, hash.hi);
                write_u32_le(&mut buf, entry + 8, *value);
                break;
            }
            slot = (slot + 1) & mask;
        }
    }

    buf
}

/// Smallest power of two keeping the load factor under 0.7.
fn compute_capacity(count: usize) -> usize {
    let target = (count * 10).div_ceil(7);
    target.next_power_of_two().max(2)
}
