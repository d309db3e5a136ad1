//! Base64 payload codec for the content API.

use super::{ContentError, ContentResult};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

/// Encodes raw bytes for a content API request body.
pub fn encode(bytes: &[u8]) -> String {
    BASE64.encode(bytes)
}

/// Decodes a content API payload.
///
/// Hosted APIs wrap base64 at 60-76 columns, so ASCII whitespace is ignored.
pub fn decode(encoded: &str) -> ContentResult<Vec<u8>> {
    let compact = encoded
        .chars()
        .filter(|c| !c.is_ascii_whitespace())
        .collect::<String>();
    BASE64
        .decode(compact.as_bytes())
        .map_err(|err| ContentError::Encoding(format!("invalid base64 payload: {err}")))
}
