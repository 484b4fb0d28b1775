//! Variable-length primitive codec (spec.md §4.1).
//!
//! Every multi-byte integer is fronted by a single signed head byte that
//! either *is* the value (for small magnitudes) or is a sentinel announcing
//! how many big-endian bytes follow, the same discriminated-head idiom the
//! teacher uses for its own tag bytes (`constant_pool.rs`'s `ConstantPoolTag`
//! dispatch) and `byteorder::{BigEndian, ReadBytesExt, WriteBytesExt}` for
//! the fixed-width reads themselves.

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::buffer::{ReadCursor, WriteCursor};
use crate::error::{CodecError, Result};

const SENTINEL_SHORT: i8 = -128;
const SENTINEL_INT: i8 = -127;
const SENTINEL_LONG: i8 = -126;

const SHORT_ALPHABET: &[u8; 16] = b"0123456789ABCDEF";
const NIBBLE_ESCAPE: u8 = 254;
const WIDE_CHAR_ESCAPE: u8 = 255;
/// Below this run length the nibble form's 2-byte header no longer pays for
/// itself against one-byte-per-char plain encoding.
const MIN_NIBBLE_RUN: usize = 6;

pub fn write_c_int(out: &mut WriteCursor, v: i32) -> Result<()> {
    if (-126..=127).contains(&v) {
        out.write_u8(v as i8 as u8)
    } else if (i16::MIN as i32..=i16::MAX as i32).contains(&v) {
        out.write_u8(SENTINEL_SHORT as u8)?;
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_i16::<BigEndian>(v as i16).map_err(CodecError::Io)?;
        out.write_all(&buf)
    } else {
        out.write_u8(SENTINEL_INT as u8)?;
        let mut buf = [0u8; 4];
        (&mut buf[..]).write_i32::<BigEndian>(v).map_err(CodecError::Io)?;
        out.write_all(&buf)
    }
}

pub fn read_c_int(input: &mut ReadCursor) -> Result<i32> {
    let head = input.read_i8()?;
    match head {
        SENTINEL_SHORT => {
            let bytes = input.read_n(2)?;
            Ok((&bytes[..]).read_i16::<BigEndian>().map_err(CodecError::Io)? as i32)
        }
        SENTINEL_INT => {
            let bytes = input.read_n(4)?;
            (&bytes[..]).read_i32::<BigEndian>().map_err(CodecError::Io)
        }
        other => Ok(other as i32),
    }
}

pub fn write_c_long(out: &mut WriteCursor, v: i64) -> Result<()> {
    // -126 is `SENTINEL_LONG`: it must take the short-form branch below or
    // `read_c_long` reads it back as a sentinel instead of a value.
    if (-125..=127).contains(&v) {
        out.write_u8(v as i8 as u8)
    } else if (i16::MIN as i64..=i16::MAX as i64).contains(&v) {
        out.write_u8(SENTINEL_SHORT as u8)?;
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_i16::<BigEndian>(v as i16).map_err(CodecError::Io)?;
        out.write_all(&buf)
    } else if (i32::MIN as i64..=i32::MAX as i64).contains(&v) {
        out.write_u8(SENTINEL_INT as u8)?;
        let mut buf = [0u8; 4];
        (&mut buf[..]).write_i32::<BigEndian>(v as i32).map_err(CodecError::Io)?;
        out.write_all(&buf)
    } else {
        out.write_u8(SENTINEL_LONG as u8)?;
        let mut buf = [0u8; 8];
        (&mut buf[..]).write_i64::<BigEndian>(v).map_err(CodecError::Io)?;
        out.write_all(&buf)
    }
}

pub fn read_c_long(input: &mut ReadCursor) -> Result<i64> {
    let head = input.read_i8()?;
    match head {
        SENTINEL_SHORT => {
            let bytes = input.read_n(2)?;
            Ok((&bytes[..]).read_i16::<BigEndian>().map_err(CodecError::Io)? as i64)
        }
        SENTINEL_INT => {
            let bytes = input.read_n(4)?;
            Ok((&bytes[..]).read_i32::<BigEndian>().map_err(CodecError::Io)? as i64)
        }
        SENTINEL_LONG => {
            let bytes = input.read_n(8)?;
            (&bytes[..]).read_i64::<BigEndian>().map_err(CodecError::Io)
        }
        other => Ok(other as i64),
    }
}

/// Fixed-width (5-byte) form of [`write_c_int`]: always uses the 4-byte
/// sentinel form regardless of magnitude. [`read_c_int`] decodes it
/// transparently since the sentinel is self-describing; the fixed width
/// only matters to the writer, which needs a constant-size slot it can
/// reserve and backpatch later (the conditional skip-group jump target,
/// spec.md §4.5, whose value isn't known until after the group is written).
pub fn write_c_int_fixed5(out: &mut WriteCursor, v: i32) -> Result<()> {
    out.write_u8(SENTINEL_INT as u8)?;
    let mut buf = [0u8; 4];
    (&mut buf[..]).write_i32::<BigEndian>(v).map_err(CodecError::Io)?;
    out.write_all(&buf)
}

pub const C_INT_FIXED5_WIDTH: u64 = 5;

/// `readCShort`/`writeCShort`: unsigned head byte `0..254` is the value
/// itself, `255` escapes to a following big-endian `u16`.
pub fn write_c_short(out: &mut WriteCursor, v: u16) -> Result<()> {
    if v < 255 {
        out.write_u8(v as u8)
    } else {
        out.write_u8(WIDE_CHAR_ESCAPE)?;
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_u16::<BigEndian>(v).map_err(CodecError::Io)?;
        out.write_all(&buf)
    }
}

pub fn read_c_short(input: &mut ReadCursor) -> Result<u16> {
    let head = input.read_u8()?;
    if head == WIDE_CHAR_ESCAPE {
        let bytes = input.read_n(2)?;
        (&bytes[..]).read_u16::<BigEndian>().map_err(CodecError::Io)
    } else {
        Ok(head as u16)
    }
}

#[inline]
pub fn write_c_char(out: &mut WriteCursor, v: u16) -> Result<()> {
    write_c_short(out, v)
}

#[inline]
pub fn read_c_char(input: &mut ReadCursor) -> Result<u16> {
    read_c_short(input)
}

pub fn write_float(out: &mut WriteCursor, v: f32) -> Result<()> {
    let mut buf = [0u8; 4];
    (&mut buf[..]).write_u32::<BigEndian>(v.to_bits()).map_err(CodecError::Io)?;
    out.write_all(&buf)
}

pub fn read_float(input: &mut ReadCursor) -> Result<f32> {
    let bytes = input.read_n(4)?;
    let bits = (&bytes[..]).read_u32::<BigEndian>().map_err(CodecError::Io)?;
    Ok(f32::from_bits(bits))
}

pub fn write_double(out: &mut WriteCursor, v: f64) -> Result<()> {
    let mut buf = [0u8; 8];
    (&mut buf[..]).write_u64::<BigEndian>(v.to_bits()).map_err(CodecError::Io)?;
    out.write_all(&buf)
}

pub fn read_double(input: &mut ReadCursor) -> Result<f64> {
    let bytes = input.read_n(8)?;
    let bits = (&bytes[..]).read_u64::<BigEndian>().map_err(CodecError::Io)?;
    Ok(f64::from_bits(bits))
}

fn nibble_index(c: u16) -> Option<u8> {
    if c > 127 {
        return None;
    }
    SHORT_ALPHABET.iter().position(|&b| b as u16 == c).map(|i| i as u8)
}

/// Characters are handled as UTF-16 code units, not Rust `char`s: the
/// original format's "char" is 16 bits wide (it shares `readCShort`'s
/// encoding), so a character outside the Basic Multilingual Plane is two
/// code units (a surrogate pair), exactly as `String::encode_utf16` already
/// produces.
fn utf16_units(s: &str) -> Vec<u16> {
    s.encode_utf16().collect()
}

/// Length-prefixed compressed string form (spec.md §4.1).
pub fn write_string_compressed(out: &mut WriteCursor, s: &str) -> Result<()> {
    let units = utf16_units(s);
    write_c_int(out, units.len() as i32)?;

    let mut i = 0;
    while i < units.len() {
        let run_len = units[i..]
            .iter()
            .take_while(|&&c| nibble_index(c).is_some())
            .count()
            .min(255);

        if run_len >= MIN_NIBBLE_RUN {
            out.write_u8(NIBBLE_ESCAPE)?;
            out.write_u8(run_len as u8)?;
            for pair in units[i..i + run_len].chunks(2) {
                let hi = nibble_index(pair[0]).unwrap();
                let lo = pair.get(1).map(|&c| nibble_index(c).unwrap()).unwrap_or(0);
                out.write_u8((hi << 4) | lo)?;
            }
            i += run_len;
            continue;
        }

        let c = units[i];
        if c < 253 {
            out.write_u8(c as u8)?;
        } else {
            out.write_u8(WIDE_CHAR_ESCAPE)?;
            let mut buf = [0u8; 2];
            (&mut buf[..]).write_u16::<BigEndian>(c).map_err(CodecError::Io)?;
            out.write_all(&buf)?;
        }
        i += 1;
    }
    Ok(())
}

pub fn read_string_compressed(input: &mut ReadCursor) -> Result<String> {
    let len = read_c_int(input)? as usize;
    let mut units = Vec::with_capacity(len);

    while units.len() < len {
        let head = input.read_u8()?;
        match head {
            NIBBLE_ESCAPE => {
                let count = input.read_u8()? as usize;
                let packed = input.read_n((count + 1) / 2)?;
                for (idx, byte) in packed.iter().enumerate() {
                    let hi = byte >> 4;
                    units.push(SHORT_ALPHABET[hi as usize] as u16);
                    if idx * 2 + 1 < count {
                        let lo = byte & 0x0F;
                        units.push(SHORT_ALPHABET[lo as usize] as u16);
                    }
                }
            }
            WIDE_CHAR_ESCAPE => {
                let bytes = input.read_n(2)?;
                units.push((&bytes[..]).read_u16::<BigEndian>().map_err(CodecError::Io)?);
            }
            b => units.push(b as u16),
        }
    }
    String::from_utf16(&units).map_err(|_| CodecError::InvalidString("compressed string"))
}

/// UTF string form (spec.md §4.1): simpler length-prefixed form with a
/// single-byte escape per out-of-range code unit.
pub fn write_string_utf(out: &mut WriteCursor, s: &str) -> Result<()> {
    let units = utf16_units(s);
    write_c_int(out, units.len() as i32)?;
    for &c in &units {
        if c < 254 {
            out.write_u8(c as u8)?;
        } else {
            out.write_u8(WIDE_CHAR_ESCAPE)?;
            let mut buf = [0u8; 2];
            (&mut buf[..]).write_u16::<BigEndian>(c).map_err(CodecError::Io)?;
            out.write_all(&buf)?;
        }
    }
    Ok(())
}

pub fn read_string_utf(input: &mut ReadCursor) -> Result<String> {
    let len = read_c_int(input)? as usize;
    let mut units = Vec::with_capacity(len);
    for _ in 0..len {
        let head = input.read_u8()?;
        if head == WIDE_CHAR_ESCAPE {
            let bytes = input.read_n(2)?;
            units.push((&bytes[..]).read_u16::<BigEndian>().map_err(CodecError::Io)?);
        } else {
            units.push(head as u16);
        }
    }
    String::from_utf16(&units).map_err(|_| CodecError::InvalidString("UTF string"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip_int(v: i32) -> i32 {
        let mut w = WriteCursor::new();
        write_c_int(&mut w, v).unwrap();
        let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
        let mut r = ReadCursor::new(bytes);
        read_c_int(&mut r).unwrap()
    }

    fn roundtrip_long(v: i64) -> i64 {
        let mut w = WriteCursor::new();
        write_c_long(&mut w, v).unwrap();
        let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
        let mut r = ReadCursor::new(bytes);
        read_c_long(&mut r).unwrap()
    }

    #[test]
    fn c_int_small_values_are_one_byte() {
        for v in -126..=127 {
            let mut w = WriteCursor::new();
            write_c_int(&mut w, v).unwrap();
            assert_eq!(w.bytes().len(), 1, "value {v} should encode to one byte");
        }
    }

    #[test]
    fn c_int_roundtrip_boundaries() {
        for v in [i32::MIN, i32::MIN + 1, -32769, -32768, -127, -126, 127, 128, 32767, 32768, i32::MAX - 1, i32::MAX] {
            assert_eq!(roundtrip_int(v), v);
        }
    }

    #[test]
    fn c_long_roundtrip_boundaries() {
        for v in [i64::MIN, i64::MIN + 1, i32::MIN as i64 - 1, i32::MIN as i64, i32::MAX as i64, i32::MAX as i64 + 1, 0, -1, -126, -125, i64::MAX] {
            assert_eq!(roundtrip_long(v), v);
        }
    }

    #[test]
    fn c_short_roundtrip() {
        for v in [0u16, 1, 253, 254, 255, 256, u16::MAX] {
            let mut w = WriteCursor::new();
            write_c_short(&mut w, v).unwrap();
            let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
            let mut r = ReadCursor::new(bytes);
            assert_eq!(read_c_short(&mut r).unwrap(), v);
        }
    }

    #[test]
    fn string_utf_roundtrip_bit_exact() {
        for s in ["", "hello", "hi", "unicode: héllo wörld ☃", "emoji 🎉"] {
            let mut w = WriteCursor::new();
            write_string_utf(&mut w, s).unwrap();
            let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
            let mut r = ReadCursor::new(bytes);
            assert_eq!(read_string_utf(&mut r).unwrap(), s);
        }
    }

    #[test]
    fn string_compressed_roundtrip() {
        for s in ["", "hi", "DEADBEEF0123456789ABCDEF", "mixed CASE deadbeef text", "☃"] {
            let mut w = WriteCursor::new();
            write_string_compressed(&mut w, s).unwrap();
            let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
            let mut r = ReadCursor::new(bytes);
            assert_eq!(read_string_compressed(&mut r).unwrap(), s);
        }
    }

    #[test]
    fn string_compressed_ascii_is_compact() {
        let s = "hello world this is ascii text";
        let mut w = WriteCursor::new();
        write_string_compressed(&mut w, s).unwrap();
        // length prefix (1 byte for this length) + one byte per char
        assert!(w.bytes().len() <= s.chars().count() + 5);
    }
}
