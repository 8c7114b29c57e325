//! File content encoding and hashing for persisted backups.

use base64::Engine as _;
use base64::engine::general_purpose::STANDARD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// How file bytes are stored in a JSON backup.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContentEncoding {
    /// Valid UTF-8, stored verbatim.
    #[default]
    Utf8,
    /// Anything else, stored as standard base64.
    Base64,
}

/// Encode bytes for storage, preferring plain text.
pub fn encode(bytes: &[u8]) -> (String, ContentEncoding) {
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), ContentEncoding::Utf8),
        Err(_) => (STANDARD.encode(bytes), ContentEncoding::Base64),
    }
}

/// Decode stored content back to bytes. Returns None for corrupt base64.
pub fn decode(text: &str, encoding: ContentEncoding) -> Option<Vec<u8>> {
    match encoding {
        ContentEncoding::Utf8 => Some(text.as_bytes().to_vec()),
        ContentEncoding::Base64 => STANDARD.decode(text).ok(),
    }
}

/// Hex SHA-256 of `bytes`.
pub fn hash_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}
