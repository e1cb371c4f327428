//! Content hashes as advertised in form lists and manifests.
//!
//! Servers send `md5:<hex>` by convention, though some omit the prefix or pad
//! the value with whitespace. Comparisons always go through
//! [`normalize_hash`].

use std::fs::File;
use std::io;
use std::path::Path;

use md5::{Digest, Md5};

const MD5_PREFIX: &str = "md5:";

/// Lowercase hex MD5 of `data`.
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Lowercase hex MD5 of a file, streamed through the hasher.
pub fn md5_file(path: &Path) -> io::Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Md5::new();
    io::copy(&mut file, &mut hasher)?;
    Ok(hex::encode(hasher.finalize()))
}

/// Trim and strip a leading `md5:` (any case).
pub fn normalize_hash(hash: &str) -> &str {
    let trimmed = hash.trim();
    match trimmed.get(..MD5_PREFIX.len()) {
        Some(prefix) if prefix.eq_ignore_ascii_case(MD5_PREFIX) => trimmed[MD5_PREFIX.len()..].trim(),
        _ => trimmed,
    }
}

/// True when two advertised or computed hashes denote the same content.
pub fn hashes_match(a: &str, b: &str) -> bool {
    normalize_hash(a).eq_ignore_ascii_case(normalize_hash(b))
}

/// True when `local` exists and its MD5 matches the advertised hash.
pub fn is_up_to_date(local: &Path, advertised: &str) -> bool {
    match md5_file(local) {
        Ok(actual) => hashes_match(&actual, advertised),
        Err(_) => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn md5_of_known_input() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
    }

    #[test]
    fn normalize_strips_prefix_and_whitespace() {
        assert_eq!(normalize_hash("md5:deadbeef"), "deadbeef");
        assert_eq!(normalize_hash("  MD5:deadbeef "), "deadbeef");
        assert_eq!(normalize_hash("deadbeef "), "deadbeef");
        assert_eq!(normalize_hash(""), "");
    }

    #[test]
    fn prefixed_and_bare_hashes_match() {
        assert!(hashes_match("md5:ABCD1234", "abcd1234"));
        assert!(!hashes_match("md5:abcd1234", "abcd1235"));
    }

    #[test]
    fn file_hash_matches_in_memory_hash() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        let data = vec![7u8; 20_000];
        file.write_all(&data).unwrap();

        assert_eq!(md5_file(file.path()).unwrap(), md5_hex(&data));
        assert!(is_up_to_date(file.path(), &format!("md5:{}", md5_hex(&data))));
        assert!(!is_up_to_date(file.path(), "md5:00"));
    }

    #[test]
    fn missing_file_is_not_up_to_date() {
        let dir = tempfile::tempdir().unwrap();
        assert!(!is_up_to_date(&dir.path().join("absent.csv"), "md5:deadbeef"));
    }
}
