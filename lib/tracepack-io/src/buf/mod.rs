//! Growable byte buffers.

use bytes::{BufMut as _, Bytes, BytesMut};
use tracing::trace;

/// Default minimum growth step for [`GrowableBuffer`], in bytes.
pub const DEFAULT_CHUNK_SIZE: usize = 2 * 1024 * 1024;

/// An append-only byte buffer with amortized growth.
///
/// `GrowableBuffer` tracks a logical length (the number of bytes written so far) and a physical capacity. When a write
/// needs more room than is available, the backing storage is grown to the next multiple of the configured chunk size,
/// which keeps the number of reallocations low when many small values are appended in sequence. Existing bytes are
/// always preserved across growth.
///
/// The buffer only ever appends: the single exception is [`patch`][Self::patch], which overwrites bytes that were
/// already written, and is used to back-fill length prefixes once the size of a nested value is known.
#[derive(Debug)]
pub struct GrowableBuffer {
    data: BytesMut,
    chunk_size: usize,
}

impl GrowableBuffer {
    /// Creates a new `GrowableBuffer` with the default chunk size.
    pub fn new() -> Self {
        Self::with_chunk_size(DEFAULT_CHUNK_SIZE)
    }

    /// Creates a new `GrowableBuffer` that grows in steps of `chunk_size` bytes.
    ///
    /// The initial capacity is a single chunk. A chunk size of zero is treated as one.
    pub fn with_chunk_size(chunk_size: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            data: BytesMut::with_capacity(chunk_size),
            chunk_size,
        }
    }

    /// Returns the number of bytes written to the buffer.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    /// Returns `true` if no bytes have been written to the buffer.
    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Returns the number of bytes the buffer can hold without growing.
    pub fn capacity(&self) -> usize {
        self.data.capacity()
    }

    /// Returns the chunk size used when growing the buffer.
    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    /// Returns the written bytes.
    pub fn as_slice(&self) -> &[u8] {
        &self.data[..]
    }

    /// Ensures that at least `additional` bytes can be written without further allocation.
    ///
    /// When the current capacity is insufficient, the buffer grows to the smallest multiple of the chunk size that fits
    /// the current length plus `additional`.
    pub fn reserve(&mut self, additional: usize) {
        let required = self.data.len() + additional;
        if required <= self.data.capacity() {
            return;
        }

        let target_capacity = required.div_ceil(self.chunk_size) * self.chunk_size;
        trace!(
            current_capacity = self.data.capacity(),
            target_capacity,
            "Growing buffer."
        );
        self.data.reserve(target_capacity - self.data.len());
    }

    /// Appends a single byte.
    pub fn put_u8(&mut self, value: u8) {
        self.reserve(1);
        self.data.put_u8(value);
    }

    /// Appends the given bytes.
    pub fn put_slice(&mut self, src: &[u8]) {
        self.reserve(src.len());
        self.data.put_slice(src);
    }

    /// Overwrites previously-written bytes starting at `offset`.
    ///
    /// # Panics
    ///
    /// Panics if the range `offset..offset + src.len()` extends past the written length of the buffer.
    pub fn patch(&mut self, offset: usize, src: &[u8]) {
        self.data[offset..offset + src.len()].copy_from_slice(src);
    }

    /// Writes `value` as a MessagePack string, returning the number of bytes written.
    ///
    /// The smallest header that can describe the UTF-8 length of `value` is used: a single-byte `fixstr` header up to
    /// 31 bytes, then `str8`, `str16`, and finally `str32`.
    pub fn write_str(&mut self, value: &str) -> usize {
        let len = value.len();
        let header_len = match len {
            0..=31 => 1,
            32..=0xFF => 2,
            0x100..=0xFFFF => 3,
            _ => 5,
        };

        self.reserve(header_len + len);
        match header_len {
            1 => self.data.put_u8(0xA0 | len as u8),
            2 => {
                self.data.put_u8(0xD9);
                self.data.put_u8(len as u8);
            }
            3 => {
                self.data.put_u8(0xDA);
                self.data.put_u16(len as u16);
            }
            _ => {
                self.data.put_u8(0xDB);
                self.data.put_u32(len as u32);
            }
        }
        self.data.put_slice(value.as_bytes());

        header_len + len
    }

    /// Appends the bytes in `from..to` of this buffer to `target`.
    ///
    /// # Panics
    ///
    /// Panics if the range is out of bounds of the written bytes.
    pub fn copy_into(&self, target: &mut GrowableBuffer, from: usize, to: usize) {
        target.put_slice(&self.data[from..to]);
    }

    /// Clears the buffer, keeping its allocated capacity.
    pub fn clear(&mut self) {
        self.data.clear();
    }

    /// Consumes the buffer, returning the written bytes.
    pub fn freeze(self) -> Bytes {
        self.data.freeze()
    }
}

impl Default for GrowableBuffer {
    fn default() -> Self {
        Self::new()
    }
}
