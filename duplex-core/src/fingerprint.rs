//! Content fingerprinting: canonical SHA-256 digests used as the cheap
//! equality test that runs before any causal reasoning.

use sha2::{Digest, Sha256};

/// Canonicalises content before hashing.
///
/// Format-aware normalisation (YAML key order, markdown whitespace) belongs to
/// the layer that owns artifact semantics; it plugs in here.
pub trait Normalizer: Send + Sync {
    fn normalize(&self, content: &str) -> String;
}

/// Default normaliser: CRLF and lone CR become LF.
#[derive(Debug, Clone, Copy, Default)]
pub struct LineEndings;

impl Normalizer for LineEndings {
    fn normalize(&self, content: &str) -> String {
        normalize(content)
    }
}

/// Normalise line endings to LF.
pub fn normalize(content: &str) -> String {
    content.replace("\r\n", "\n").replace('\r', "\n")
}

/// Lowercase hex SHA-256 of the normalised content (64 chars).
pub fn checksum(content: &str) -> String {
    checksum_with(&LineEndings, content)
}

/// [`checksum`] with a caller-supplied normaliser.
pub fn checksum_with(normalizer: &dyn Normalizer, content: &str) -> String {
    let normalized = normalizer.normalize(content);
    let mut hasher = Sha256::new();
    hasher.update(normalized.as_bytes());
    hex::encode(hasher.finalize())
}
