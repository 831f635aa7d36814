//! Deterministic record identity.
//!
//! The export has no natural key, so an id is derived from the raw
//! attribute set plus the creation timestamp:
//! `<hex hash of canonical attributes>-<hex epoch millis>`.
//! Identical attributes (in identical order) always yield the same id,
//! which is what makes re-importing an export idempotent.

use super::attributes::{normalize_timestamp, timestamp_millis, Attributes};
use serde::{Deserialize, Serialize};

/// How the attribute part of an id is computed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IdentityScheme {
    /// 32-bit `h * 31 + c` rolling hash over UTF-16 code units.
    /// Cheap and compatible with ids produced by earlier imports,
    /// but collisions between distinct attribute sets are possible.
    #[default]
    Rolling32,
    /// First 16 bytes of a BLAKE3 digest of the canonical string.
    Blake3,
}

impl std::fmt::Display for IdentityScheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IdentityScheme::Rolling32 => write!(f, "rolling32"),
            IdentityScheme::Blake3 => write!(f, "blake3"),
        }
    }
}

/// Signed 32-bit rolling hash, wrapping on overflow.
pub fn rolling_hash(input: &str) -> i32 {
    input
        .encode_utf16()
        .fold(0i32, |hash, unit| {
            hash.wrapping_shl(5).wrapping_sub(hash).wrapping_add(unit as i32)
        })
}

/// Derive the id for a record from its raw (un-normalized) attributes.
pub fn record_id(attrs: &Attributes, scheme: IdentityScheme) -> String {
    let canonical = attrs.canonical_string();

    let hash_part = match scheme {
        IdentityScheme::Rolling32 => format!("{:x}", (rolling_hash(&canonical) as i64).abs()),
        IdentityScheme::Blake3 => {
            let digest = blake3::hash(canonical.as_bytes());
            digest.to_hex().as_str()[..32].to_string()
        }
    };

    let millis = attrs
        .get("creationDate")
        .map(normalize_timestamp)
        .and_then(|ts| timestamp_millis(&ts));

    format!("{}-{}", hash_part, hex_millis(millis))
}

/// Hex epoch milliseconds; `NaN` stands in for a missing or unreadable date.
fn hex_millis(millis: Option<i64>) -> String {
    match millis {
        Some(ms) if ms < 0 => format!("-{:x}", ms.unsigned_abs()),
        Some(ms) => format!("{:x}", ms),
        None => "NaN".to_string(),
    }
}
