//! Stable content hashing for diffs.

use sha2::{Digest, Sha256};

/// SHA-256 of `diff` as lowercase hex, with CRLF line endings normalized.
///
/// Two diffs that differ only in line endings hash equally, so re-applying a
/// spec produced on another platform does not register as a content change.
pub fn diff_hash(diff: &str) -> String {
    let normalized = diff.replace("\r\n", "\n");
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn crlf_and_lf_hash_equally() {
        assert_eq!(diff_hash("-a\r\n+b\r\n"), diff_hash("-a\n+b\n"));
    }

    #[test]
    fn different_content_differs() {
        assert_ne!(diff_hash("-a\n+b\n"), diff_hash("-a\n+c\n"));
        assert_eq!(diff_hash("").len(), 64);
    }
}
