//! Compact primitive encodings
//!
//! Three building blocks used by the frame codec: length-prefixed modified
//! UTF-8 strings (compatible with legacy `writeUTF` readers), LEB128
//! varints, and bit-packed boolean arrays.

use std::io::Read;

use bytes::BufMut;

use crate::error::ProtocolError;

/// Maximum encoded byte length a string can occupy, imposed by the 16-bit
/// length prefix.
pub const MAX_UTF_LEN: usize = 65535;

/// Encoded byte length of `s` in modified UTF-8, excluding the length
/// prefix. Counted over UTF-16 code units so the result matches what legacy
/// `writeUTF` readers expect.
fn utf_len(s: &str) -> usize {
    s.encode_utf16()
        .map(|c| match c {
            0x0001..=0x007F => 1,
            0x0800..=0xFFFF => 3,
            // NUL and 0x80..=0x7FF
            _ => 2,
        })
        .sum()
}

/// Append the length-prefixed modified UTF-8 encoding of `s`.
///
/// Unlike standard UTF-8, the NUL character becomes the two-byte sequence
/// `0xC0 0x80` and supplementary characters are encoded as two three-byte
/// surrogate code units.
pub fn put_utf8<B: BufMut>(buf: &mut B, s: &str) -> Result<(), ProtocolError> {
    let len = utf_len(s);
    if len > MAX_UTF_LEN {
        return Err(ProtocolError::StringTooLong { len });
    }
    buf.put_u16(len as u16);
    for c in s.encode_utf16() {
        match c {
            0x0001..=0x007F => buf.put_u8(c as u8),
            0x0800..=0xFFFF => {
                buf.put_u8(0xE0 | (c >> 12) as u8);
                buf.put_u8(0x80 | ((c >> 6) & 0x3F) as u8);
                buf.put_u8(0x80 | (c & 0x3F) as u8);
            }
            _ => {
                buf.put_u8(0xC0 | ((c >> 6) & 0x1F) as u8);
                buf.put_u8(0x80 | (c & 0x3F) as u8);
            }
        }
    }
    Ok(())
}

/// Read a length-prefixed modified UTF-8 string.
pub fn read_utf8<R: Read>(input: &mut R) -> Result<String, ProtocolError> {
    let len = read_u16(input)? as usize;
    let mut bytes = vec![0u8; len];
    read_exact(input, &mut bytes)?;

    let mut units: Vec<u16> = Vec::with_capacity(len);
    let mut i = 0;
    while i < len {
        let b0 = bytes[i];
        if b0 & 0x80 == 0 {
            units.push(b0 as u16);
            i += 1;
        } else if b0 & 0xE0 == 0xC0 {
            if i + 1 >= len || bytes[i + 1] & 0xC0 != 0x80 {
                return Err(ProtocolError::MalformedString);
            }
            units.push(((b0 as u16 & 0x1F) << 6) | (bytes[i + 1] as u16 & 0x3F));
            i += 2;
        } else if b0 & 0xF0 == 0xE0 {
            if i + 2 >= len || bytes[i + 1] & 0xC0 != 0x80 || bytes[i + 2] & 0xC0 != 0x80 {
                return Err(ProtocolError::MalformedString);
            }
            units.push(
                ((b0 as u16 & 0x0F) << 12)
                    | ((bytes[i + 1] as u16 & 0x3F) << 6)
                    | (bytes[i + 2] as u16 & 0x3F),
            );
            i += 3;
        } else {
            return Err(ProtocolError::MalformedString);
        }
    }
    String::from_utf16(&units).map_err(|_| ProtocolError::MalformedString)
}

/// Append a LEB128 varint.
pub fn put_varint<B: BufMut>(buf: &mut B, mut value: u32) {
    while value & !0x7F != 0 {
        buf.put_u8((value & 0x7F) as u8 | 0x80);
        value >>= 7;
    }
    buf.put_u8(value as u8);
}

/// Read a LEB128 varint.
pub fn read_varint<R: Read>(input: &mut R) -> Result<u32, ProtocolError> {
    let mut value = 0u32;
    let mut shift = 0;
    loop {
        let b = read_u8(input)?;
        value |= ((b & 0x7F) as u32) << shift;
        if b & 0x80 == 0 {
            return Ok(value);
        }
        shift += 7;
        if shift > 28 {
            return Err(ProtocolError::OversizedVarint);
        }
    }
}

/// Append a varint length header followed by the flags packed LSB-first,
/// one byte per 8 entries.
pub fn put_bool_array<B: BufMut>(buf: &mut B, bits: &[bool]) {
    put_varint(buf, bits.len() as u32);
    let mut byte = 0u8;
    let mut filled = 0;
    for &b in bits {
        if b {
            byte |= 1 << filled;
        }
        filled += 1;
        if filled == 8 {
            buf.put_u8(byte);
            byte = 0;
            filled = 0;
        }
    }
    if filled > 0 {
        buf.put_u8(byte);
    }
}

/// Read a bit-packed boolean array.
pub fn read_bool_array<R: Read>(input: &mut R) -> Result<Vec<bool>, ProtocolError> {
    let len = read_varint(input)? as usize;
    // Cap the pre-allocation; a hostile length header must not OOM us.
    let mut bits = Vec::with_capacity(len.min(1 << 20));
    let mut byte = 0u8;
    for i in 0..len {
        if i % 8 == 0 {
            byte = read_u8(input)?;
        }
        bits.push(byte & (1 << (i % 8)) != 0);
    }
    Ok(bits)
}

pub(crate) fn read_u8<R: Read>(input: &mut R) -> Result<u8, ProtocolError> {
    let mut b = [0u8; 1];
    read_exact(input, &mut b)?;
    Ok(b[0])
}

pub(crate) fn read_u16<R: Read>(input: &mut R) -> Result<u16, ProtocolError> {
    let mut b = [0u8; 2];
    read_exact(input, &mut b)?;
    Ok(u16::from_be_bytes(b))
}

pub(crate) fn read_i64<R: Read>(input: &mut R) -> Result<i64, ProtocolError> {
    let mut b = [0u8; 8];
    read_exact(input, &mut b)?;
    Ok(i64::from_be_bytes(b))
}

fn read_exact<R: Read>(input: &mut R, buf: &mut [u8]) -> Result<(), ProtocolError> {
    input.read_exact(buf).map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            ProtocolError::TruncatedFrame
        } else {
            ProtocolError::Io(e)
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    fn utf8_roundtrip(s: &str) -> String {
        let mut buf = Vec::new();
        put_utf8(&mut buf, s).unwrap();
        read_utf8(&mut Cursor::new(buf)).unwrap()
    }

    #[test]
    fn test_utf8_ascii_roundtrip() {
        assert_eq!(utf8_roundtrip("com/example/Foo"), "com/example/Foo");
        assert_eq!(utf8_roundtrip(""), "");
    }

    #[test]
    fn test_utf8_multibyte_roundtrip() {
        // 2-byte, 3-byte and surrogate-pair code points, plus NUL
        for s in ["caf\u{e9}", "\u{4e2d}\u{6587}", "a\u{0}b", "\u{1F600}"] {
            assert_eq!(utf8_roundtrip(s), s);
        }
    }

    #[test]
    fn test_utf8_nul_uses_two_byte_form() {
        let mut buf = Vec::new();
        put_utf8(&mut buf, "\u{0}").unwrap();
        assert_eq!(buf, vec![0x00, 0x02, 0xC0, 0x80]);
    }

    #[test]
    fn test_utf8_empty_is_bare_prefix() {
        let mut buf = Vec::new();
        put_utf8(&mut buf, "").unwrap();
        assert_eq!(buf, vec![0x00, 0x00]);
    }

    #[test]
    fn test_utf8_max_length_accepted() {
        let s = "a".repeat(65535);
        let mut buf = Vec::new();
        put_utf8(&mut buf, &s).unwrap();
        assert_eq!(buf.len(), 65535 + 2);
        assert_eq!(utf8_roundtrip(&s), s);
    }

    #[test]
    fn test_utf8_over_length_rejected() {
        let s = "a".repeat(65536);
        let mut buf = Vec::new();
        match put_utf8(&mut buf, &s) {
            Err(ProtocolError::StringTooLong { len }) => assert_eq!(len, 65536),
            other => panic!("expected StringTooLong, got {:?}", other.map(|_| ())),
        }
        // A multibyte tail can push an under-limit char count over the byte limit
        let s = "a".repeat(65534) + "\u{e9}";
        assert!(matches!(
            put_utf8(&mut Vec::new(), &s),
            Err(ProtocolError::StringTooLong { len: 65536 })
        ));
    }

    #[test]
    fn test_varint_roundtrip() {
        for v in [0u32, 1, 127, 128, 300, 16383, 16384, u32::MAX] {
            let mut buf = Vec::new();
            put_varint(&mut buf, v);
            assert_eq!(read_varint(&mut Cursor::new(buf)).unwrap(), v);
        }
    }

    #[test]
    fn test_varint_single_byte_below_128() {
        let mut buf = Vec::new();
        put_varint(&mut buf, 64);
        assert_eq!(buf, vec![0x40]);
    }

    #[test]
    fn test_varint_overflow_rejected() {
        let buf = vec![0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x01];
        assert!(matches!(
            read_varint(&mut Cursor::new(buf)),
            Err(ProtocolError::OversizedVarint)
        ));
    }

    #[test]
    fn test_bool_array_edge_lengths() {
        for len in [0usize, 1, 7, 8, 9, 64] {
            // Alternating pattern keeps bit order visible
            let bits: Vec<bool> = (0..len).map(|i| i % 3 == 0).collect();
            let mut buf = Vec::new();
            put_bool_array(&mut buf, &bits);
            let decoded = read_bool_array(&mut Cursor::new(buf)).unwrap();
            assert_eq!(decoded, bits, "length {len}");
        }
    }

    #[test]
    fn test_bool_array_packs_one_byte_per_eight() {
        let bits = vec![true; 9];
        let mut buf = Vec::new();
        put_bool_array(&mut buf, &bits);
        // 1 varint byte + 2 payload bytes
        assert_eq!(buf, vec![0x09, 0xFF, 0x01]);
    }

    #[test]
    fn test_bool_array_lsb_first() {
        let mut bits = vec![false; 8];
        bits[0] = true;
        bits[3] = true;
        let mut buf = Vec::new();
        put_bool_array(&mut buf, &bits);
        assert_eq!(buf, vec![0x08, 0b0000_1001]);
    }

    #[test]
    fn test_truncated_input() {
        assert!(matches!(
            read_utf8(&mut Cursor::new(vec![0x00, 0x05, b'a'])),
            Err(ProtocolError::TruncatedFrame)
        ));
        assert!(matches!(
            read_bool_array(&mut Cursor::new(vec![0x10, 0xFF])),
            Err(ProtocolError::TruncatedFrame)
        ));
    }
}
