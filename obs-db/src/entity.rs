//! The schema descriptor every entity implements so `Gateway<E>` can operate
//! on it generically (spec §4.B Persistence Gateway).

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    BigInt,
    Text,
    Timestamp,
    Bool,
    Json,
    Real,
}

#[derive(Debug, Clone, Copy)]
pub struct ColumnDef {
    pub name: &'static str,
    pub kind: ColumnKind,
}

/// Declares the shape a table has for the generic gateway: its name, its
/// typed columns (used to coerce filter values and to know how to bind
/// parameters), which columns participate in free-text `search`, and how to
/// derive the fixed-dimension `embedding` column from a row's JSON form.
pub trait Entity: Send + Sync + 'static {
    const TABLE: &'static str;
    const COLUMNS: &'static [ColumnDef];
    const TEXT_SEARCH_COLUMNS: &'static [&'static str];
    /// Non-null when this entity has a password shadow field on create/update
    /// (only `User` does). `(shadow_field, stored_field)`.
    const PASSWORD_SHADOW: Option<(&'static str, &'static str)> = None;

    fn column(name: &str) -> Option<ColumnDef> {
        Self::COLUMNS.iter().copied().find(|c| c.name == name)
    }
}

/// Deterministic fixed-dimension embedding used for similarity search. Not a
/// real model: a stand-in satisfying the "declared, deterministic encoder"
/// contract in spec §4.B. The row's canonicalized content is hashed, then
/// expanded via `obs_common::hkdf_expand_32` (the teacher's HKDF helper,
/// reused here instead of reading bytes straight off the digest) into the
/// 64 bytes backing the 16 `f32` lanes.
pub fn encode_embedding(row: &serde_json::Map<String, serde_json::Value>) -> [f32; 16] {
    use sha2::{Digest, Sha256};
    let mut keys: Vec<&String> = row.keys().collect();
    keys.sort();
    let mut hasher = Sha256::new();
    for k in keys {
        hasher.update(k.as_bytes());
        hasher.update(row[k].to_string().as_bytes());
    }
    let digest = hasher.finalize();

    let lo = obs_common::hkdf_expand_32(b"obs-embedding-lo", None, &digest)
        .expect("hkdf expand with a fixed 32-byte output length never fails");
    let hi = obs_common::hkdf_expand_32(b"obs-embedding-hi", None, &digest)
        .expect("hkdf expand with a fixed 32-byte output length never fails");

    let mut bytes = [0u8; 64];
    bytes[..32].copy_from_slice(&lo);
    bytes[32..].copy_from_slice(&hi);

    let mut out = [0f32; 16];
    for (i, slot) in out.iter_mut().enumerate() {
        let b = bytes[i * 4] as u32
            | (bytes[i * 4 + 1] as u32) << 8
            | (bytes[i * 4 + 2] as u32) << 16
            | (bytes[i * 4 + 3] as u32) << 24;
        *slot = (b as f32 / u32::MAX as f32) * 2.0 - 1.0;
    }
    out
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn embedding_is_deterministic_for_the_same_row() {
        let mut row = serde_json::Map::new();
        row.insert("email".to_owned(), serde_json::json!("a@b.com"));
        let a = encode_embedding(&row);
        let b = encode_embedding(&row);
        assert_eq!(a, b);
    }

    #[test]
    fn embedding_differs_for_different_rows() {
        let mut row_a = serde_json::Map::new();
        row_a.insert("email".to_owned(), serde_json::json!("a@b.com"));
        let mut row_b = serde_json::Map::new();
        row_b.insert("email".to_owned(), serde_json::json!("c@d.com"));
        assert_ne!(encode_embedding(&row_a), encode_embedding(&row_b));
    }
}
