//! sv-split: turn one ciphertext into per-backend shares and back
//!
//! # Overview
//! - `codec`: the codec selected by `$META.split` (`none` or `shamir`)
//! - `shamir`: K-of-M Shamir secret sharing over GF(256)
//! - `digest`: BLAKE3 digests used to compare replicated objects

pub mod codec;
pub mod digest;
pub mod shamir;

pub use codec::{ShareGroups, SparseGroups, SplitKind, Splitter};
pub use digest::{hash_bytes, hash_to_hex, Hash};
