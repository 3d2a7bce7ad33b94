//! MessagePack primitive writers.
//!
//! These are stateless helpers that append a single MessagePack value, or a container header, to a [`GrowableBuffer`].
//! Only the subset of the format needed by the trace intake payloads is covered. Writers select the correct width for a
//! value but do not validate it beyond that: callers are responsible for passing values that make sense on the wire.
//!
//! Strings are written through [`GrowableBuffer::write_str`].

use crate::buf::GrowableBuffer;

/// Writes a single raw byte.
pub fn write_byte(buf: &mut GrowableBuffer, value: u8) {
    buf.put_u8(value);
}

/// Writes `nil`.
pub fn write_nil(buf: &mut GrowableBuffer) {
    buf.put_u8(0xC0);
}

/// Writes a boolean.
pub fn write_bool(buf: &mut GrowableBuffer, value: bool) {
    buf.put_u8(if value { 0xC3 } else { 0xC2 });
}

/// Writes an unsigned integer using the smallest encoding that fits.
pub fn write_unsigned(buf: &mut GrowableBuffer, value: u64) {
    if value <= 0x7F {
        buf.put_u8(value as u8);
    } else if value <= 0xFF {
        buf.put_slice(&[0xCC, value as u8]);
    } else if value <= 0xFFFF {
        let mut scratch = [0xCD; 3];
        scratch[1..].copy_from_slice(&(value as u16).to_be_bytes());
        buf.put_slice(&scratch);
    } else if value <= 0xFFFF_FFFF {
        let mut scratch = [0xCE; 5];
        scratch[1..].copy_from_slice(&(value as u32).to_be_bytes());
        buf.put_slice(&scratch);
    } else {
        write_id64(buf, value);
    }
}

/// Writes a signed integer using the smallest encoding that fits.
///
/// Non-negative values are written as unsigned integers.
pub fn write_signed(buf: &mut GrowableBuffer, value: i64) {
    if value >= 0 {
        write_unsigned(buf, value as u64);
    } else if value >= -0x20 {
        buf.put_u8(value as i8 as u8);
    } else if value >= -0x80 {
        buf.put_slice(&[0xD0, value as i8 as u8]);
    } else if value >= -0x8000 {
        let mut scratch = [0xD1; 3];
        scratch[1..].copy_from_slice(&(value as i16).to_be_bytes());
        buf.put_slice(&scratch);
    } else if value >= -0x8000_0000 {
        let mut scratch = [0xD2; 5];
        scratch[1..].copy_from_slice(&(value as i32).to_be_bytes());
        buf.put_slice(&scratch);
    } else {
        write_long64(buf, value);
    }
}

/// Writes a 32-bit integer, always using five bytes.
///
/// Non-negative values use the `uint32` tag and negative values the `int32` tag, so the width on the wire never depends
/// on the magnitude.
pub fn write_int32(buf: &mut GrowableBuffer, value: i32) {
    let mut scratch = [0u8; 5];
    if value >= 0 {
        scratch[0] = 0xCE;
        scratch[1..].copy_from_slice(&(value as u32).to_be_bytes());
    } else {
        scratch[0] = 0xD2;
        scratch[1..].copy_from_slice(&value.to_be_bytes());
    }
    buf.put_slice(&scratch);
}

/// Writes an unsigned 32-bit integer, always using five bytes.
pub fn write_uint32(buf: &mut GrowableBuffer, value: u32) {
    let mut scratch = [0xCE; 5];
    scratch[1..].copy_from_slice(&value.to_be_bytes());
    buf.put_slice(&scratch);
}

/// Writes an unsigned 64-bit integer, always using nine bytes.
pub fn write_id64(buf: &mut GrowableBuffer, value: u64) {
    let mut scratch = [0xCF; 9];
    scratch[1..].copy_from_slice(&value.to_be_bytes());
    buf.put_slice(&scratch);
}

/// Writes a signed 64-bit integer, always using nine bytes.
pub fn write_long64(buf: &mut GrowableBuffer, value: i64) {
    let mut scratch = [0xD3; 9];
    scratch[1..].copy_from_slice(&value.to_be_bytes());
    buf.put_slice(&scratch);
}

/// Writes a 64-bit IEEE-754 float in network byte order.
pub fn write_float64(buf: &mut GrowableBuffer, value: f64) {
    let mut scratch = [0xCB; 9];
    scratch[1..].copy_from_slice(&value.to_be_bytes());
    buf.put_slice(&scratch);
}

/// Writes an array header, using `fixarray` for up to 15 elements and `array32` otherwise.
pub fn write_array_header(buf: &mut GrowableBuffer, len: usize) {
    if len <= 15 {
        buf.put_u8(0x90 | len as u8);
    } else {
        write_array32_header(buf, len);
    }
}

/// Writes an `array32` header regardless of the number of elements.
pub fn write_array32_header(buf: &mut GrowableBuffer, len: usize) {
    write_prefixed_u32(buf, 0xDD, len);
}

/// Writes a map header, using `fixmap` for up to 15 entries and `map32` otherwise.
pub fn write_map_header(buf: &mut GrowableBuffer, len: usize) {
    if len <= 15 {
        buf.put_u8(0x80 | len as u8);
    } else {
        write_map32_header(buf, len);
    }
}

/// Writes a `map32` header regardless of the number of entries.
pub fn write_map32_header(buf: &mut GrowableBuffer, len: usize) {
    write_prefixed_u32(buf, 0xDF, len);
}

/// Writes a binary header using the smallest encoding that fits `len`.
pub fn write_bin_header(buf: &mut GrowableBuffer, len: usize) {
    if len <= 0xFF {
        buf.put_slice(&[0xC4, len as u8]);
    } else if len <= 0xFFFF {
        let mut scratch = [0xC5; 3];
        scratch[1..].copy_from_slice(&(len as u16).to_be_bytes());
        buf.put_slice(&scratch);
    } else {
        write_prefixed_u32(buf, 0xC6, len);
    }
}

/// Starts a `bin32` value whose length is not yet known.
///
/// A placeholder header is written and its offset returned. Once the wrapped bytes have been written, pass the offset
/// to [`finish_bin32`] to fill in the length.
pub fn begin_bin32(buf: &mut GrowableBuffer) -> usize {
    let offset = buf.len();
    buf.put_slice(&[0xC6, 0, 0, 0, 0]);
    offset
}

/// Completes a `bin32` value started with [`begin_bin32`].
pub fn finish_bin32(buf: &mut GrowableBuffer, offset: usize) {
    let len = buf.len() - offset - 5;
    buf.patch(offset + 1, &(len as u32).to_be_bytes());
}

fn write_prefixed_u32(buf: &mut GrowableBuffer, tag: u8, len: usize) {
    let mut scratch = [tag; 5];
    scratch[1..].copy_from_slice(&(len as u32).to_be_bytes());
    buf.put_slice(&scratch);
}
