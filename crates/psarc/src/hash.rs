//! Name hashing for table of contents entries.
//!
//! Producers store the MD5 digest of the upper-cased entry name. Readers of this crate never
//! depend on it, names come from the manifest.

use md5::{Digest, Md5};

use crate::types::NameHash;

/// MD5 digest of `name` after ASCII upper-casing
pub fn name_hash(name: &str) -> NameHash {
    let mut hasher = Md5::new();
    if name.bytes().any(|b| b.is_ascii_lowercase()) {
        hasher.update(name.to_ascii_uppercase().as_bytes());
    } else {
        hasher.update(name.as_bytes());
    }
    hasher.finalize().into()
}

/// Render a name hash as upper-case hex
pub fn to_hex(hash: &NameHash) -> String {
    hash.iter().map(|b| format!("{:02X}", b)).collect()
}
