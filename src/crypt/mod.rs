//! # Cipher Engine
//!
//! The symmetric cipher obfuscating frame payloads on the legacy wire.
//!
//! ## Components
//! - **Salt**: MD5-chained salt-seed table and the per-seed 256-byte salt
//!   tables, built once and shared read-only across connections
//! - **Key**: 9-byte cipher keys derived from `(a, b)` seed pairs, plus the
//!   opcode-to-cipher-mode lookup tables for both wire directions
//! - **Engine**: the XOR keystream involution, packet-integrity tag, and
//!   obfuscated seed trailer
//! - **Dialog**: the independent, lighter sub-cipher wrapping chant traffic
//!
//! ## Wire Compatibility
//! Every quirk here — the doubled sequence-salt XOR, the fixed tag byte
//! offsets, the seed clamping — is part of the contract with a client that
//! cannot be changed. Treat the algorithms as specification.

pub mod dialog;
pub mod engine;
pub mod key;
pub mod salt;

pub use engine::{apply_keystream, integrity_tag, CipherEngine, Direction};
pub use key::{
    derive_cipher_key, generate_crypto_seed, CipherKey, CipherMode, CipherModeTable, CipherTables,
    CryptoSeed,
};
pub use salt::{SaltSeedTable, SaltTable, SaltTableSet};
