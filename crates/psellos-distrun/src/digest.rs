//! Canonical artifact serialization and critical hashes.
//!
//! Every artifact is written in exactly one form:
//!
//! - `serde_json::to_string_pretty` (two-space indent),
//! - map keys in lexicographic order (all maps are `BTreeMap`-backed),
//! - a single trailing newline.
//!
//! The critical hash of an artifact is the SHA-256 of those exact bytes,
//! encoded as 64 lowercase hex digits. Two runs over identical input must
//! produce identical hashes for every primary artifact.

use serde::Serialize;
use sha2::{Digest as _, Sha256};
use std::fmt::Write as _;

/// Serialize a value into its canonical on-disk form.
pub fn canonical_json<T: Serialize + ?Sized>(value: &T) -> serde_json::Result<String> {
    let mut text = serde_json::to_string_pretty(value)?;
    text.push('\n');
    Ok(text)
}

/// SHA-256 over arbitrary bytes, lowercase hex.
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    let digest = hasher.finalize();
    let mut out = String::with_capacity(64);
    for b in digest.iter() {
        let _ = write!(&mut out, "{:02x}", b);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn hash_has_expected_width() {
        let h = sha256_hex(b"psellos");
        assert_eq!(h.len(), 64);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn canonical_form_sorts_keys_and_ends_with_newline() {
        let a = canonical_json(&json!({"b": 1, "a": 2})).unwrap();
        let b = canonical_json(&json!({"a": 2, "b": 1})).unwrap();
        assert_eq!(a, b);
        assert!(a.ends_with("}\n"));
        assert!(a.find("\"a\"").unwrap() < a.find("\"b\"").unwrap());
    }

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
