//! 8-digit hexadecimal identifiers.
//!
//! WordprocessingML stores paragraph ids (`w14:paraId`) and durable comment
//! ids (`w16cid:durableId`) as `ST_LongHexNumber`: exactly eight hex digits.
//! Word itself writes them uppercase and rejects values at or above
//! `0x80000000`.

/// Largest value Word accepts for a long hex identifier.
pub const MAX_LONG_HEX: u32 = 0x7FFF_FFFF;

/// Format a 32-bit value as eight uppercase hex digits.
///
/// # Examples
///
/// ```
/// use docx_comments::common::id::format_long_hex;
/// assert_eq!(format_long_hex(0x1A2B), "00001A2B");
/// ```
#[inline]
pub fn format_long_hex(value: u32) -> String {
    format!("{:08X}", value)
}

/// Parse an `ST_LongHexNumber` value.
///
/// Accepts either case (documents produced by other tools sometimes use
/// lowercase digits) but requires exactly eight digits.
pub fn parse_long_hex(s: &str) -> Option<u32> {
    if s.len() != 8 || !s.bytes().all(|b| b.is_ascii_hexdigit()) {
        return None;
    }
    u32::from_str_radix(s, 16).ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_long_hex() {
        assert_eq!(format_long_hex(0), "00000000");
        assert_eq!(format_long_hex(MAX_LONG_HEX), "7FFFFFFF");
        assert_eq!(format_long_hex(0xdeadbeef), "DEADBEEF");
    }

    #[test]
    fn test_parse_long_hex() {
        assert_eq!(parse_long_hex("00ABCDEF"), Some(0x00AB_CDEF));
        assert_eq!(parse_long_hex("00abcdef"), Some(0x00AB_CDEF));
        assert_eq!(parse_long_hex("ABCDEF"), None);
        assert_eq!(parse_long_hex("0000000G"), None);
        assert_eq!(parse_long_hex("+0000001"), None);
    }
}
