//! Bounds-checked big-endian cursors over caller-provided buffers.
//!
//! Every multi-byte field crosses the wire in network byte order no
//! matter the host, and every access is checked: a short buffer is a
//! decode error surfaced to the caller, never an out-of-bounds read.
//!
//! Besides the fixed widths, the codec speaks a packed unsigned-integer
//! format keyed on the top two bits of the first byte:
//!
//! ```text
//! value < 2^7   →  1 byte   0xxxxxxx
//! value < 2^14  →  2 bytes  10xxxxxx xxxxxxxx
//! value < 2^30  →  4 bytes  11xxxxxx xxxxxxxx xxxxxxxx xxxxxxxx
//! value ≥ 2^30  →  refused (PackedOverflow)
//! ```

use thiserror::Error;

/// Errors raised by the wire layer.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum WireError {
    /// A read ran past the end of the received buffer.
    #[error("unexpected end of buffer")]
    UnexpectedEnd,

    /// A write ran past the end of the output buffer.
    #[error("output buffer full")]
    BufferFull,

    /// A value too large for the packed-integer encoding.
    #[error("value {value} exceeds the packed-integer range (2^30 - 1)")]
    PackedOverflow {
        /// The value that did not fit.
        value: u32,
    },

    /// The leading byte is not a known message tag.
    #[error("unknown message tag {tag:#04x}")]
    UnknownTag {
        /// The tag byte as received.
        tag: u8,
    },

    /// An entity-kind byte outside the catalog.
    #[error("unknown entity kind {kind}")]
    BadKind {
        /// The kind byte as received.
        kind: u8,
    },
}

/// Sequential writer over a mutable byte buffer.
pub struct WireWriter<'a> {
    buffer: &'a mut [u8],
    position: usize,
}

impl<'a> WireWriter<'a> {
    /// Creates a writer positioned at the start of `buffer`.
    #[must_use]
    pub fn new(buffer: &'a mut [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Bytes written so far.
    #[inline]
    #[must_use]
    pub const fn position(&self) -> usize {
        self.position
    }

    fn put(&mut self, bytes: &[u8]) -> Result<(), WireError> {
        let end = self.position + bytes.len();
        if end > self.buffer.len() {
            return Err(WireError::BufferFull);
        }
        self.buffer[self.position..end].copy_from_slice(bytes);
        self.position = end;
        Ok(())
    }

    /// Writes one byte.
    pub fn write_u8(&mut self, value: u8) -> Result<(), WireError> {
        self.put(&[value])
    }

    /// Writes a `u16` big-endian.
    pub fn write_u16(&mut self, value: u16) -> Result<(), WireError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes a `u32` big-endian.
    pub fn write_u32(&mut self, value: u32) -> Result<(), WireError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes an `f32` big-endian.
    pub fn write_f32(&mut self, value: f32) -> Result<(), WireError> {
        self.put(&value.to_be_bytes())
    }

    /// Writes a packed unsigned integer (1, 2 or 4 bytes by magnitude).
    pub fn write_packed_u32(&mut self, value: u32) -> Result<(), WireError> {
        if value < 1 << 7 {
            self.write_u8(value as u8)
        } else if value < 1 << 14 {
            self.write_u16((1 << 15) | value as u16)
        } else if value < 1 << 30 {
            self.write_u32((0b11 << 30) | value)
        } else {
            Err(WireError::PackedOverflow { value })
        }
    }
}

/// Sequential reader over a received byte buffer.
pub struct WireReader<'a> {
    buffer: &'a [u8],
    position: usize,
}

impl<'a> WireReader<'a> {
    /// Creates a reader positioned at the start of `buffer`.
    #[must_use]
    pub const fn new(buffer: &'a [u8]) -> Self {
        Self {
            buffer,
            position: 0,
        }
    }

    /// Bytes not yet consumed.
    #[inline]
    #[must_use]
    pub const fn remaining(&self) -> usize {
        self.buffer.len() - self.position
    }

    fn take<const N: usize>(&mut self) -> Result<[u8; N], WireError> {
        let end = self.position + N;
        if end > self.buffer.len() {
            return Err(WireError::UnexpectedEnd);
        }
        let mut bytes = [0u8; N];
        bytes.copy_from_slice(&self.buffer[self.position..end]);
        self.position = end;
        Ok(bytes)
    }

    fn peek_u8(&self) -> Result<u8, WireError> {
        self.buffer
            .get(self.position)
            .copied()
            .ok_or(WireError::UnexpectedEnd)
    }

    /// Reads one byte.
    pub fn read_u8(&mut self) -> Result<u8, WireError> {
        Ok(self.take::<1>()?[0])
    }

    /// Reads a big-endian `u16`.
    pub fn read_u16(&mut self) -> Result<u16, WireError> {
        Ok(u16::from_be_bytes(self.take()?))
    }

    /// Reads a big-endian `u32`.
    pub fn read_u32(&mut self) -> Result<u32, WireError> {
        Ok(u32::from_be_bytes(self.take()?))
    }

    /// Reads a big-endian `f32`.
    pub fn read_f32(&mut self) -> Result<f32, WireError> {
        Ok(f32::from_be_bytes(self.take()?))
    }

    /// Reads a packed unsigned integer, selecting the width from the
    /// top two bits of the first byte.
    pub fn read_packed_u32(&mut self) -> Result<u32, WireError> {
        match self.peek_u8()? >> 6 {
            0 | 1 => Ok(u32::from(self.read_u8()?)),
            2 => Ok(u32::from(self.read_u16()? & 0x3FFF)),
            _ => Ok(self.read_u32()? & 0x3FFF_FFFF),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fixed_widths_are_big_endian() {
        let mut buf = [0u8; 16];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u16(0x0102).unwrap();
        writer.write_u32(0x0304_0506).unwrap();
        assert_eq!(&buf[..6], &[1, 2, 3, 4, 5, 6]);

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_u16().unwrap(), 0x0102);
        assert_eq!(reader.read_u32().unwrap(), 0x0304_0506);
    }

    #[test]
    fn test_f32_round_trip() {
        let mut buf = [0u8; 8];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_f32(-13.625).unwrap();
        writer.write_f32(f32::MIN_POSITIVE).unwrap();

        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_f32().unwrap(), -13.625);
        assert_eq!(reader.read_f32().unwrap(), f32::MIN_POSITIVE);
    }

    #[test]
    fn test_packed_round_trip_at_width_boundaries() {
        // (value, encoded length)
        let cases = [
            (0u32, 1usize),
            (127, 1),
            (128, 2),
            (16_383, 2),
            (16_384, 4),
            (1_073_741_823, 4),
        ];
        for (value, len) in cases {
            let mut buf = [0u8; 4];
            let mut writer = WireWriter::new(&mut buf);
            writer.write_packed_u32(value).unwrap();
            assert_eq!(writer.position(), len, "width for {value}");

            let mut reader = WireReader::new(&buf);
            assert_eq!(reader.read_packed_u32().unwrap(), value);
            assert_eq!(reader.remaining(), 4 - len);
        }
    }

    #[test]
    fn test_packed_rejects_oversized_values() {
        let mut buf = [0u8; 4];
        let mut writer = WireWriter::new(&mut buf);
        assert_eq!(
            writer.write_packed_u32(1 << 30),
            Err(WireError::PackedOverflow { value: 1 << 30 })
        );
        assert_eq!(
            writer.write_packed_u32(u32::MAX),
            Err(WireError::PackedOverflow { value: u32::MAX })
        );
        // Nothing was written by the failed attempts.
        assert_eq!(writer.position(), 0);
    }

    #[test]
    fn test_short_reads_fail_cleanly() {
        let buf = [0xC0, 0x00, 0x01]; // 4-byte packed marker, 3 bytes present
        let mut reader = WireReader::new(&buf);
        assert_eq!(reader.read_packed_u32(), Err(WireError::UnexpectedEnd));

        let mut reader = WireReader::new(&buf[..1]);
        assert_eq!(reader.read_u16(), Err(WireError::UnexpectedEnd));
        assert_eq!(reader.read_u8().unwrap(), 0xC0);
        assert_eq!(reader.read_u8(), Err(WireError::UnexpectedEnd));
    }

    #[test]
    fn test_writer_respects_buffer_end() {
        let mut buf = [0u8; 3];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_u16(7).unwrap();
        assert_eq!(writer.write_u16(7), Err(WireError::BufferFull));
        // Position unchanged after the refused write.
        assert_eq!(writer.position(), 2);
        writer.write_u8(9).unwrap();
    }

    #[test]
    fn test_two_byte_marker_bits() {
        let mut buf = [0u8; 2];
        let mut writer = WireWriter::new(&mut buf);
        writer.write_packed_u32(300).unwrap();
        assert_eq!(buf[0] >> 6, 0b10);
        assert_eq!(u32::from(u16::from_be_bytes(buf) & 0x3FFF), 300);
    }
}
