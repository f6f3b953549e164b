// shared-types-rs/src/hashing.rs
// Content addressing for rendered prompts.

use sha2::{Digest, Sha256};

/// Lowercase hex SHA-256 of the prompt text. Identical text, identical hash.
pub fn prompt_hash(text: &str) -> String {
    format!("{:x}", Sha256::digest(text.as_bytes()))
}
