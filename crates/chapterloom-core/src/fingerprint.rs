//! Content fingerprints used as cache keys and document identifiers.
//!
//! A segment fingerprint is the SHA-256 of the segment's exact source text
//! followed by the active instructions, so editing the instructions never
//! reuses results produced under the old ones.

use sha2::{Digest, Sha256};

/// Fingerprint a piece of text together with the instructions it is
/// transformed under.
///
/// A NUL byte separates the two parts so `("ab", "c")` and `("a", "bc")`
/// never collide.
///
/// ```rust
/// use chapterloom_core::fingerprint::fingerprint;
///
/// let a = fingerprint("It was night.", "Polish the prose.");
/// let b = fingerprint("It was night.", "Summarize.");
/// assert_ne!(a, b);
/// assert_eq!(a.len(), 64);
/// ```
pub fn fingerprint(text: &str, instructions: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hasher.update([0u8]);
    hasher.update(instructions.as_bytes());
    format!("{:x}", hasher.finalize())
}

/// Stable document identifier derived from its source locator (URL or path).
pub fn document_id(locator: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(locator.trim().as_bytes());
    format!("{:x}", hasher.finalize())
}
