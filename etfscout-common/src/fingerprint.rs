//! Identifier-list fingerprinting
//!
//! A resumed run must be given the same ordered identifier list as the run
//! that wrote the checkpoints, otherwise batch indices no longer line up
//! with identifiers. The fingerprint makes that check explicit instead of
//! trusting the caller.

use sha2::{Digest, Sha256};

/// SHA-256 over the ordered identifier list, hex encoded
///
/// Order matters: the same set in a different order is a different run.
pub fn fingerprint_identifiers<S: AsRef<str>>(identifiers: &[S]) -> String {
    let mut hasher = Sha256::new();
    for id in identifiers {
        hasher.update(id.as_ref().as_bytes());
        hasher.update(b"\n");
    }
    let digest = hasher.finalize();
    let mut out = String::with_capacity(digest.len() * 2);
    for byte in digest {
        out.push_str(&format!("{:02x}", byte));
    }
    out
}
