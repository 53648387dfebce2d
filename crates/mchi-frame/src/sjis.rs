//! Shift-JIS text as used for every human-readable string on the wire.

use std::borrow::Cow;

use encoding_rs::SHIFT_JIS;
use tracing::trace;

/// Decode Shift-JIS bytes. Malformed sequences become U+FFFD.
pub fn decode(bytes: &[u8]) -> Cow<'_, str> {
    let (text, had_errors) = SHIFT_JIS.decode_without_bom_handling(bytes);
    if had_errors {
        trace!(len = bytes.len(), "malformed Shift-JIS replaced");
    }
    text
}

/// Encode text as Shift-JIS. Unmappable characters become numeric character
/// references, matching what the target's own tools emit.
pub fn encode(text: &str) -> Cow<'_, [u8]> {
    let (bytes, _, had_unmappable) = SHIFT_JIS.encode(text);
    if had_unmappable {
        trace!(text, "unmappable characters in Shift-JIS encode");
    }
    bytes
}
