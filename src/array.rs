//! Typed-array primitive-element encoding strategies (spec.md §4.6).
//!
//! Reference-element arrays recurse through the writer/reader state machine
//! directly and have no special body format; this module only covers the
//! compression strategies available to `int` element arrays, selected via
//! [`crate::value::ArrayValue::encoding`].

use byteorder::{BigEndian, ReadBytesExt, WriteBytesExt};

use crate::buffer::{ReadCursor, WriteCursor};
use crate::error::{CodecError, Result};
use crate::varint::{read_c_int, write_c_int};

#[repr(u8)]
#[derive(Clone, Copy, Eq, PartialEq, Debug)]
enum CompressedStrategy {
    Delta = 0,
    Varint = 1,
    Thin = 2,
    OffsetShort = 3,
}

/// Four raw big-endian bytes per element, no header (spec.md §4.6 `plain`).
pub fn write_plain(out: &mut WriteCursor, values: &[i32]) -> Result<()> {
    for &v in values {
        let mut buf = [0u8; 4];
        (&mut buf[..]).write_i32::<BigEndian>(v).map_err(CodecError::Io)?;
        out.write_all(&buf)?;
    }
    Ok(())
}

pub fn read_plain(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    let mut out = Vec::with_capacity(len);
    for _ in 0..len {
        let bytes = input.read_n(4)?;
        out.push((&bytes[..]).read_i32::<BigEndian>().map_err(CodecError::Io)?);
    }
    Ok(out)
}

/// Element-wise varint, no header (spec.md §4.6 default strategy).
pub fn write_varint_run(out: &mut WriteCursor, values: &[i32]) -> Result<()> {
    for &v in values {
        write_c_int(out, v)?;
    }
    Ok(())
}

pub fn read_varint_run(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    (0..len).map(|_| read_c_int(input)).collect()
}

/// Sparse `(index, value)` pairs for non-zero entries, terminated by
/// `index == length` (spec.md §4.6 `thin`, and §4.6 compressed submode 2).
pub fn write_thin_run(out: &mut WriteCursor, values: &[i32]) -> Result<()> {
    for (idx, &v) in values.iter().enumerate() {
        if v != 0 {
            write_c_int(out, idx as i32)?;
            write_c_int(out, v)?;
        }
    }
    write_c_int(out, values.len() as i32)
}

pub fn read_thin_run(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    let mut out = vec![0i32; len];
    loop {
        let idx = read_c_int(input)?;
        if idx as usize == len {
            break;
        }
        let idx = usize::try_from(idx).map_err(|_| CodecError::MalformedTag(idx as u8))?;
        if idx >= len {
            return Err(CodecError::MalformedTag(idx as u8));
        }
        out[idx] = read_c_int(input)?;
    }
    Ok(out)
}

fn write_delta_run(out: &mut WriteCursor, values: &[i32]) -> Result<()> {
    if values.is_empty() {
        return Ok(());
    }
    write_c_int(out, values[0])?;
    for w in values.windows(2) {
        write_c_int(out, w[1].wrapping_sub(w[0]))?;
    }
    Ok(())
}

fn read_delta_run(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    let mut out = Vec::with_capacity(len);
    if len == 0 {
        return Ok(out);
    }
    let mut prev = read_c_int(input)?;
    out.push(prev);
    for _ in 1..len {
        let delta = read_c_int(input)?;
        prev = prev.wrapping_add(delta);
        out.push(prev);
    }
    Ok(out)
}

fn write_offset_short(out: &mut WriteCursor, values: &[i32]) -> Result<Option<()>> {
    let Some(&base) = values.first() else {
        return Ok(Some(()));
    };
    let mut offsets = Vec::with_capacity(values.len());
    for &v in values {
        let offset = v as i64 - base as i64;
        if !(i16::MIN as i64..=i16::MAX as i64).contains(&offset) {
            return Ok(None);
        }
        offsets.push(offset as i16);
    }
    write_c_int(out, base)?;
    for offset in offsets {
        let mut buf = [0u8; 2];
        (&mut buf[..]).write_i16::<BigEndian>(offset).map_err(CodecError::Io)?;
        out.write_all(&buf)?;
    }
    Ok(Some(()))
}

fn read_offset_short(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    let mut out = Vec::with_capacity(len);
    if len == 0 {
        return Ok(out);
    }
    let base = read_c_int(input)?;
    for _ in 0..len {
        let bytes = input.read_n(2)?;
        let offset = (&bytes[..]).read_i16::<BigEndian>().map_err(CodecError::Io)?;
        out.push(base.wrapping_add(offset as i32));
    }
    Ok(out)
}

fn encode_candidate(strategy: CompressedStrategy, values: &[i32]) -> Option<Vec<u8>> {
    let mut w = WriteCursor::new();
    match strategy {
        CompressedStrategy::Delta => write_delta_run(&mut w, values).ok()?,
        CompressedStrategy::Varint => write_varint_run(&mut w, values).ok()?,
        CompressedStrategy::Thin => write_thin_run(&mut w, values).ok()?,
        CompressedStrategy::OffsetShort => write_offset_short(&mut w, values).ok()??,
    }
    Some(w.into_bytes())
}

/// Picks whichever sub-strategy yields the fewest bytes for this array and
/// writes `[discriminator byte][body]` (spec.md §4.6 `compressed`, int only).
pub fn write_compressed(out: &mut WriteCursor, values: &[i32]) -> Result<()> {
    let candidates = [CompressedStrategy::Delta, CompressedStrategy::Varint, CompressedStrategy::Thin, CompressedStrategy::OffsetShort];
    let (best_strategy, best_bytes) = candidates
        .into_iter()
        .filter_map(|s| encode_candidate(s, values).map(|bytes| (s, bytes)))
        .min_by_key(|(_, bytes)| bytes.len())
        .expect("varint run is always a valid candidate");

    out.write_u8(best_strategy as u8)?;
    out.write_all(&best_bytes)
}

pub fn read_compressed(input: &mut ReadCursor, len: usize) -> Result<Vec<i32>> {
    let discriminator = input.read_u8()?;
    match discriminator {
        0 => read_delta_run(input, len),
        1 => read_varint_run(input, len),
        2 => read_thin_run(input, len),
        3 => read_offset_short(input, len),
        other => Err(CodecError::MalformedTag(other)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn roundtrip(values: &[i32], write: impl Fn(&mut WriteCursor, &[i32]) -> Result<()>, read: impl Fn(&mut ReadCursor, usize) -> Result<Vec<i32>>) -> Vec<i32> {
        let mut w = WriteCursor::new();
        write(&mut w, values).unwrap();
        let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
        let mut r = ReadCursor::new(bytes);
        read(&mut r, values.len()).unwrap()
    }

    #[test]
    fn plain_roundtrip() {
        let values = [i32::MIN, -1, 0, 1, i32::MAX];
        assert_eq!(roundtrip(&values, write_plain, read_plain), values);
    }

    #[test]
    fn varint_run_roundtrip() {
        let values = [0, 5, -5, 127, -126, 1000];
        assert_eq!(roundtrip(&values, write_varint_run, read_varint_run), values);
    }

    #[test]
    fn thin_run_roundtrip_and_sparse_is_smaller() {
        let mut values = vec![0; 100];
        values[30] = 5;
        values[70] = 9;
        assert_eq!(roundtrip(&values, write_thin_run, read_thin_run), values);

        let mut plain_w = WriteCursor::new();
        write_plain(&mut plain_w, &values).unwrap();
        let mut thin_w = WriteCursor::new();
        write_thin_run(&mut thin_w, &values).unwrap();
        assert!(thin_w.bytes().len() < plain_w.bytes().len());
    }

    #[test]
    fn delta_run_roundtrip_and_monotonic_is_smaller_than_plain() {
        let values: Vec<i32> = (0..200).map(|i| i * 3).collect();
        let mut w = WriteCursor::new();
        write_delta_run(&mut w, &values).unwrap();
        let delta_len = w.bytes().len();
        let bytes: std::rc::Rc<[u8]> = w.into_bytes().into();
        let mut r = ReadCursor::new(bytes);
        assert_eq!(read_delta_run(&mut r, values.len()).unwrap(), values);

        let mut plain_w = WriteCursor::new();
        write_plain(&mut plain_w, &values).unwrap();
        assert!(delta_len < plain_w.bytes().len());
    }

    #[test]
    fn compressed_picks_best_and_roundtrips() {
        let small = vec![1, 2, 3, 4, 5];
        assert_eq!(roundtrip(&small, write_compressed, read_compressed), small);

        let mut sparse = vec![0; 50];
        sparse[10] = 42;
        assert_eq!(roundtrip(&sparse, write_compressed, read_compressed), sparse);
    }

    #[test]
    fn small_int_array_varint_uses_len_plus_header() {
        let values: Vec<i32> = (0..20).collect();
        let mut w = WriteCursor::new();
        write_varint_run(&mut w, &values).unwrap();
        assert_eq!(w.bytes().len(), values.len());
    }
}
