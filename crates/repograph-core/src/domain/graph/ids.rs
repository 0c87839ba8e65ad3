//! Stable identifiers derived from content

use sha2::{Digest, Sha256};

use crate::domain::merge::normalize_name;

fn short_digest(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part.as_bytes());
        hasher.update([0x1f]);
    }
    hex::encode(&hasher.finalize()[..16])
}

/// SHA-256 of file content, hex encoded
pub fn content_hash(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Id of a code declaration, scoped to its file
pub fn code_entity_id(path: &str, name: &str) -> String {
    format!("ent-{}", short_digest(&["code", path, name]))
}

/// Id of a document concept, shared across documents mentioning it
pub fn document_entity_id(name: &str) -> String {
    format!("ent-{}", short_digest(&["document", &normalize_name(name)]))
}

pub fn chunk_id(path: &str, start_byte: usize, end_byte: usize, content_hash: &str) -> String {
    format!(
        "chk-{}",
        short_digest(&[path, &start_byte.to_string(), &end_byte.to_string(), content_hash])
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_code_ids_are_file_scoped() {
        let a = code_entity_id("/repo/a.rs", "get");
        let b = code_entity_id("/repo/b.rs", "get");
        assert_ne!(a, b);
        assert_eq!(a, code_entity_id("/repo/a.rs", "get"));
        assert!(a.starts_with("ent-"));
    }

    #[test]
    fn test_document_ids_use_normalized_name() {
        assert_eq!(
            document_entity_id("UserRepository"),
            document_entity_id("`userrepository`")
        );
        assert_ne!(document_entity_id("UserRepository"), code_entity_id("", "UserRepository"));
    }

    #[test]
    fn test_content_hash_is_sha256_hex() {
        let hash = content_hash(b"hello");
        assert_eq!(hash.len(), 64);
        assert_eq!(
            hash,
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }
}
