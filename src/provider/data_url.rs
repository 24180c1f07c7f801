//! Decoding of inline `data:` artifacts

use base64::{engine::general_purpose::STANDARD, Engine};

use crate::error::ProviderError;

pub fn is_data_url(url: &str) -> bool {
    url.starts_with("data:")
}

/// Image format from a `data:image/<fmt>;base64,` prefix
pub fn format_of(data_url: &str) -> Option<&str> {
    let rest = data_url.strip_prefix("data:image/")?;
    let end = rest.find(|c| c == ';' || c == ',')?;
    Some(&rest[..end])
}

/// Decode the payload of a base64 data URL, enforcing `max_bytes`.
pub fn decode(data_url: &str, max_bytes: usize) -> Result<Vec<u8>, ProviderError> {
    let (header, payload) = data_url
        .split_once(',')
        .ok_or_else(|| ProviderError::Malformed("data URL without payload".to_string()))?;
    if !header.ends_with(";base64") {
        return Err(ProviderError::Malformed(
            "only base64 data URLs are supported".to_string(),
        ));
    }

    let payload = payload.trim();
    // Reject before allocating; 4 base64 chars encode 3 bytes
    if payload.len() / 4 * 3 > max_bytes.saturating_add(3) {
        return Err(ProviderError::TooLarge { limit: max_bytes });
    }

    let bytes = STANDARD
        .decode(payload)
        .map_err(|e| ProviderError::Malformed(format!("invalid base64 data: {}", e)))?;
    if bytes.len() > max_bytes {
        return Err(ProviderError::TooLarge { limit: max_bytes });
    }
    Ok(bytes)
}
