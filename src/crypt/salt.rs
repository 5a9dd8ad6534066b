//! Salt tables and the MD5-chained salt-seed table.
//!
//! Two kinds of lookup material feed the keystream:
//!
//! - The **salt-seed table**: 1024 ASCII hex bytes produced by 32 rounds of
//!   MD5 chaining over a textual seed. Source material for cipher-key
//!   derivation, never used directly as keystream.
//! - The **salt tables**: ten 256-byte tables, one per single-byte seed,
//!   selected per connection at key negotiation. Built once per gateway and
//!   shared read-only across every connection, so lookups need no
//!   synchronization.

use md5::{Digest, Md5};

/// Length of the salt-seed table in bytes (32 rounds of 32 hex chars)
pub const SALT_SEED_TABLE_LEN: usize = 1024;

/// Length of one per-seed salt table
pub const SALT_TABLE_LEN: usize = 256;

/// Number of distinct salt-table seeds the client may negotiate
pub const SALT_SEED_COUNT: usize = 10;

/// Lowercase-hex expansion of one MD5 digest.
fn hex32(digest: &[u8; 16]) -> [u8; 32] {
    const HEX: &[u8; 16] = b"0123456789abcdef";
    let mut out = [0u8; 32];
    for (i, &byte) in digest.iter().enumerate() {
        out[i * 2] = HEX[(byte >> 4) as usize];
        out[i * 2 + 1] = HEX[(byte & 0x0F) as usize];
    }
    out
}

/// 1024-byte ASCII-hex lookup table derived from a textual seed.
///
/// Immutable after construction; used only for indexed lookups during key
/// derivation.
pub struct SaltSeedTable([u8; SALT_SEED_TABLE_LEN]);

impl SaltSeedTable {
    /// Derive the table from `seed_text` by 32 rounds of MD5 chaining.
    ///
    /// Every round hashes the *entire* accumulated hex string, not just the
    /// newest chunk; the flat byte accumulator keeps that linear instead of
    /// re-growing strings.
    pub fn derive(seed_text: &str) -> Self {
        let mut acc: Vec<u8> = Vec::with_capacity(SALT_SEED_TABLE_LEN);

        let first: [u8; 16] = Md5::digest(seed_text.as_bytes()).into();
        let second: [u8; 16] = Md5::digest(hex32(&first)).into();
        acc.extend_from_slice(&hex32(&second));

        while acc.len() < SALT_SEED_TABLE_LEN {
            let digest: [u8; 16] = Md5::digest(&acc).into();
            acc.extend_from_slice(&hex32(&digest));
        }

        let mut table = [0u8; SALT_SEED_TABLE_LEN];
        table.copy_from_slice(&acc);
        Self(table)
    }

    /// Table byte at `index % 1024`.
    pub fn lookup(&self, index: usize) -> u8 {
        self.0[index % SALT_SEED_TABLE_LEN]
    }

    pub fn as_bytes(&self) -> &[u8; SALT_SEED_TABLE_LEN] {
        &self.0
    }
}

/// One 256-byte keystream salt table, selected by a single-byte seed.
#[derive(Clone)]
pub struct SaltTable([u8; SALT_TABLE_LEN]);

impl SaltTable {
    /// Derive the table for `seed` by chaining raw MD5 digests over
    /// `seed_text ‖ seed`.
    pub fn derive(seed_text: &str, seed: u8) -> Self {
        let mut table = [0u8; SALT_TABLE_LEN];

        let mut hasher = Md5::new();
        hasher.update(seed_text.as_bytes());
        hasher.update([seed]);
        let mut block: [u8; 16] = hasher.finalize().into();

        for (round, chunk) in table.chunks_exact_mut(16).enumerate() {
            if round > 0 {
                block = Md5::digest(block).into();
            }
            chunk.copy_from_slice(&block);
        }

        Self(table)
    }

    /// Salt byte for `index` (callers index by `sequence` and the rolling
    /// `salt_index`, both already in `0..256`).
    #[inline]
    pub fn get(&self, index: usize) -> u8 {
        self.0[index & 0xFF]
    }

    pub fn as_bytes(&self) -> &[u8; SALT_TABLE_LEN] {
        &self.0
    }
}

/// The full set of per-seed salt tables, built once at gateway startup.
pub struct SaltTableSet {
    tables: Vec<SaltTable>,
}

impl SaltTableSet {
    /// Precompute all `SALT_SEED_COUNT` tables for `seed_text`.
    pub fn build(seed_text: &str) -> Self {
        let tables = (0..SALT_SEED_COUNT)
            .map(|seed| SaltTable::derive(seed_text, seed as u8))
            .collect();
        Self { tables }
    }

    /// Table for a negotiated seed byte. Out-of-range seeds wrap, matching
    /// the forgiving lookup the legacy client relies on.
    pub fn get(&self, seed: u8) -> &SaltTable {
        &self.tables[seed as usize % SALT_SEED_COUNT]
    }
}
