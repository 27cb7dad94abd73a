// src/codec.rs
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use sha2::{Digest, Sha256};

use crate::error::CodecError;

pub fn encode_base64url(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

pub fn decode_base64url(text: &str) -> Result<Vec<u8>, CodecError> {
    URL_SAFE_NO_PAD
        .decode(text)
        .map_err(|e| CodecError::Base64(e.to_string()))
}

pub fn encode_hex(bytes: &[u8]) -> String {
    hex::encode(bytes)
}

/// SHA-256 of `bytes`, lowercase hex.
pub fn fingerprint(bytes: &[u8]) -> String {
    encode_hex(&Sha256::digest(bytes))
}

/// Renders a secret for logs: first and last four characters only.
pub fn mask_token(token: Option<&str>) -> String {
    match token {
        None | Some("") => "<not set>".into(),
        Some(t) if t.chars().count() < 12 => "***".into(),
        Some(t) => {
            let chars: Vec<char> = t.chars().collect();
            let head: String = chars[..4].iter().collect();
            let tail: String = chars[chars.len() - 4..].iter().collect();
            format!("{head}...{tail}")
        }
    }
}
