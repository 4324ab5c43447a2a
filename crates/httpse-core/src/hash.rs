//! Hash functions for the rule store
//!
//! Host keys are hashed with Murmur3 32-bit under two seeds to form a 64-bit
//! composite key. The store additionally compares the stored host string, so a
//! collision can cost a probe but never return another host's rules.
//!
//! # Sentinel Handling
//!
//! The empty slot in the host index is `(lo=0, hi=0)`. `hash64` never returns it.

/// 64-bit hash represented as two 32-bit parts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(C)]
pub struct Hash64 {
    pub lo: u32,
    pub hi: u32,
}

impl Hash64 {
    /// Check if this hash is the empty sentinel (0, 0).
    #[inline]
    pub const fn is_empty(&self) -> bool {
        self.lo == 0 && self.hi == 0
    }
}

pub const SEED_LO: u32 = 0x9e3779b9;
pub const SEED_HI: u32 = 0x85ebca6b;

const C1: u32 = 0xcc9e2d51;
const C2: u32 = 0x1b873593;

#[inline]
fn mix_k(k: u32) -> u32 {
    k.wrapping_mul(C1).rotate_left(15).wrapping_mul(C2)
}

/// Murmur3 32-bit hash.
pub fn murmur3_32(data: &[u8], seed: u32) -> u32 {
    let mut h = seed;
    let mut chunks = data.chunks_exact(4);

    for chunk in &mut chunks {
        let k = u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
        h ^= mix_k(k);
        h = h.rotate_left(13).wrapping_mul(5).wrapping_add(0xe6546b64);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k: u32 = 0;
        for (i, &b) in tail.iter().enumerate() {
            k |= (b as u32) << (8 * i);
        }
        h ^= mix_k(k);
    }

    h ^= data.len() as u32;
    h ^= h >> 16;
    h = h.wrapping_mul(0x85ebca6b);
    h ^= h >> 13;
    h = h.wrapping_mul(0xc2b2ae35);
    h ^= h >> 16;
    h
}

/// Compute the 64-bit composite hash, never the (0, 0) sentinel.
#[inline]
pub fn hash64(data: &[u8]) -> Hash64 {
    let mut lo = murmur3_32(data, SEED_LO);
    let hi = murmur3_32(data, SEED_HI);
    if lo == 0 && hi == 0 {
        lo = 1;
    }
    Hash64 { lo, hi }
}

/// Hash a host key for the host index. ASCII case is folded first.
pub fn hash_host(host: &str) -> Hash64 {
    if host.bytes().any(|b| b.is_ascii_uppercase()) {
        hash64(host.to_ascii_lowercase().as_bytes())
    } else {
        hash64(host.as_bytes())
    }
}

/// CRC32 (IEEE 802.3) for snapshot integrity checking.
pub fn crc32(data: &[u8]) -> u32 {
    crc32_update(0xffffffff, data) ^ 0xffffffff
}

/// Feed more bytes into a running (non-finalized) CRC32 state.
///
/// Lets the loader checksum a file around the stored CRC field without copying.
pub fn crc32_update(mut crc: u32, data: &[u8]) -> u32 {
    static TABLE: [u32; 256] = {
        let mut table = [0u32; 256];
        let mut i = 0;
        while i < 256 {
            let mut c = i as u32;
            let mut j = 0;
            while j < 8 {
                c = if c & 1 != 0 { 0xedb88320 ^ (c >> 1) } else { c >> 1 };
                j += 1;
            }
            table[i] = c;
            i += 1;
        }
        table
    };

    for &byte in data {
        crc = TABLE[((crc ^ byte as u32) & 0xff) as usize] ^ (crc >> 8);
    }
    crc
}
