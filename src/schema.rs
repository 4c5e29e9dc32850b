// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Schema blobs: opaque, caller-defined byte sequences the core stores and
//! returns verbatim without interpreting their contents.
//!
//! The core validates only that a blob round-trips intact; it never parses
//! the JSON (or whatever format a caller chooses) inside it. Matching two
//! blobs for idempotent flow creation is done by comparing a CRC-32
//! fingerprint rather than the bytes themselves, since the registry only
//! ever needs to detect mismatch, not recover differences.

/// A 32-bit fingerprint of a schema blob's contents.
pub type Fingerprint = u32;

/// Computes the fingerprint of `blob`.
#[must_use]
pub fn fingerprint(blob: &[u8]) -> Fingerprint {
    crc32fast::hash(blob)
}

/// `true` if `blob` matches the fingerprint stored for an existing flow.
#[must_use]
pub fn matches(blob: &[u8], expected: Fingerprint) -> bool {
    fingerprint(blob) == expected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identical_blobs_match() {
        let blob = br#"{"type":"video","width":1920,"height":1080}"#;
        assert!(matches(blob, fingerprint(blob)));
    }

    #[test]
    fn differing_blobs_do_not_match() {
        let a = br#"{"type":"video"}"#;
        let b = br#"{"type":"audio"}"#;
        assert!(!matches(b, fingerprint(a)));
    }

    #[test]
    fn empty_blob_has_a_stable_fingerprint() {
        assert_eq!(fingerprint(b""), fingerprint(b""));
    }
}
