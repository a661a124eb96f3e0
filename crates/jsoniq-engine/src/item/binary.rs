//! hexBinary / base64Binary lexical forms.

use base64::{Engine as _, engine::general_purpose::STANDARD as BASE64_STANDARD};

/// Decode `([0-9a-fA-F]{2})*`; anything else is not a hexBinary.
pub(crate) fn decode_hex(input: &str) -> Option<Vec<u8>> {
    if !input.len().is_multiple_of(2) {
        return None;
    }
    let mut bytes = Vec::with_capacity(input.len() / 2);
    let mut chars = input.chars();
    while let (Some(high_ch), Some(low_ch)) = (chars.next(), chars.next()) {
        let high = high_ch.to_digit(16)?;
        let low = low_ch.to_digit(16)?;
        bytes.push(((high << 4) | low) as u8);
    }
    Some(bytes)
}

pub(crate) fn encode_hex_upper(bytes: &[u8]) -> String {
    use core::fmt::Write as _;
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = write!(out, "{byte:02X}");
    }
    out
}

/// Whitespace inside the lexical form is insignificant.
pub(crate) fn decode_base64(input: &str) -> Option<Vec<u8>> {
    let compact: String = input.chars().filter(|c| !c.is_ascii_whitespace()).collect();
    BASE64_STANDARD.decode(compact.as_bytes()).ok()
}

pub(crate) fn encode_base64(bytes: &[u8]) -> String {
    BASE64_STANDARD.encode(bytes)
}
