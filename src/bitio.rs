//! Bit-granular I/O over byte buffers, MSB-first within each byte as BUFR
//! packs its data section.

use crate::errors::{Error, Result};

/// Reads arbitrary-width big-endian bit fields from a borrowed buffer.
#[derive(Debug, Clone, Copy)]
pub struct BitReader<'a> {
    buf: &'a [u8],
    /// Cursor in bits from the start of `buf`.
    pos: usize,
}

impl<'a> BitReader<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        BitReader { buf, pos: 0 }
    }

    pub fn bit_position(&self) -> usize {
        self.pos
    }

    pub fn bits_remaining(&self) -> usize {
        (self.buf.len() * 8).saturating_sub(self.pos)
    }

    /// Read `nbits` (0..=64) as an unsigned big-endian field.
    pub fn read_bits(&mut self, nbits: usize) -> Result<u64> {
        if nbits == 0 {
            return Ok(0);
        }
        if nbits > 64 {
            return Err(Error::ParseError(format!(
                "Cannot read {} bits into a 64-bit value",
                nbits
            )));
        }
        if self.pos + nbits > self.buf.len() * 8 {
            return Err(Error::OutOfRange {
                position: self.pos,
                wanted: nbits,
                length: self.buf.len() * 8,
            });
        }

        if self.pos % 8 == 0 && nbits % 8 == 0 {
            return Ok(self.read_aligned_bytes(nbits / 8));
        }

        let mut value: u64 = 0;
        let mut remaining = nbits;
        while remaining > 0 {
            let byte = self.buf[self.pos / 8];
            let bit_in_byte = self.pos % 8;
            let take = remaining.min(8 - bit_in_byte);
            let shift = 8 - bit_in_byte - take;
            let mask = ((1u16 << take) - 1) as u8;
            let bits = (byte >> shift) & mask;
            value = (value << take) | (bits as u64);
            self.pos += take;
            remaining -= take;
        }
        Ok(value)
    }

    fn read_aligned_bytes(&mut self, nbytes: usize) -> u64 {
        let start = self.pos / 8;
        let mut value: u64 = 0;
        for i in 0..nbytes {
            value = (value << 8) | (self.buf[start + i] as u64);
        }
        self.pos += nbytes * 8;
        value
    }

    /// Read `nbytes` CCITT IA5 characters. Non-ASCII bytes are kept verbatim
    /// where they form valid UTF-8, otherwise replaced.
    pub fn read_string(&mut self, nbytes: usize) -> Result<String> {
        let mut raw = Vec::with_capacity(nbytes);
        for _ in 0..nbytes {
            raw.push(self.read_bits(8)? as u8);
        }
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    /// Advance to the next byte boundary.
    pub fn align_to_byte(&mut self) {
        self.pos = (self.pos + 7) & !7;
    }
}

/// Appends arbitrary-width big-endian bit fields to an owned growable
/// buffer. Values wider than the requested field are masked down and
/// counted; the stream itself stays well formed.
#[derive(Debug, Default)]
pub struct BitWriter {
    buf: Vec<u8>,
    /// Length in bits; the final partial byte of `buf` is zero-filled past it.
    len: usize,
    truncations: usize,
}

impl BitWriter {
    pub fn new() -> Self {
        BitWriter {
            buf: Vec::new(),
            len: 0,
            truncations: 0,
        }
    }

    pub fn bit_position(&self) -> usize {
        self.len
    }

    pub fn byte_len(&self) -> usize {
        (self.len + 7) / 8
    }

    /// Number of values so far that did not fit their declared width and
    /// were written masked. Lossy encodes are detectable through this.
    pub fn truncation_count(&self) -> usize {
        self.truncations
    }

    /// Append the low `nbits` of `value`; returns the new bit position.
    pub fn append_bits(&mut self, value: u64, nbits: usize) -> usize {
        if nbits == 0 {
            return self.len;
        }
        debug_assert!(nbits <= 64);
        if nbits < 64 && (value >> nbits) != 0 {
            self.truncations += 1;
            eprintln!(
                "bufrlib: value {} does not fit in {} bits, writing truncated",
                value, nbits
            );
        }

        let needed_bytes = (self.len + nbits + 7) / 8;
        if self.buf.len() < needed_bytes {
            self.buf.resize(needed_bytes, 0);
        }
        Self::put_bits(&mut self.buf, value, nbits, self.len);
        self.len += nbits;
        self.len
    }

    /// Overwrite `nbits` at an absolute bit offset. Used to backpatch
    /// section length fields once the section body is complete.
    pub fn write_bits_at(&mut self, value: u64, nbits: usize, bit_offset: usize) -> Result<()> {
        if bit_offset + nbits > self.len {
            return Err(Error::OutOfRange {
                position: bit_offset,
                wanted: nbits,
                length: self.len,
            });
        }
        Self::put_bits(&mut self.buf, value, nbits, bit_offset);
        Ok(())
    }

    fn put_bits(buf: &mut [u8], value: u64, nbits: usize, offset: usize) {
        let mut pos = offset;
        let mut remaining = nbits;
        while remaining > 0 {
            let bit_in_byte = pos % 8;
            let take = remaining.min(8 - bit_in_byte);
            let shift = 8 - bit_in_byte - take;
            let mask = (((1u16 << take) - 1) as u8) << shift;
            let bits = ((value >> (remaining - take)) as u8) & (((1u16 << take) - 1) as u8);
            let byte = &mut buf[pos / 8];
            *byte = (*byte & !mask) | (bits << shift);
            pos += take;
            remaining -= take;
        }
    }

    pub fn append_string(&mut self, s: &str, nbytes: usize) {
        let bytes = s.as_bytes();
        for i in 0..nbytes {
            // Short strings are space padded per CCITT IA5 convention.
            let b = bytes.get(i).copied().unwrap_or(b' ');
            self.append_bits(b as u64, 8);
        }
    }

    /// Zero-pad the final byte and hand over the buffer.
    pub fn finish(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_msb_first_across_byte_boundary() {
        // 0b10110001 0b01000000: 3 bits = 0b101, then 7 bits = 0b1000101
        let mut r = BitReader::new(&[0b1011_0001, 0b0100_0000]);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
        assert_eq!(r.read_bits(7).unwrap(), 0b1000101);
        assert_eq!(r.bit_position(), 10);
    }

    #[test]
    fn read_past_end_is_out_of_range() {
        let mut r = BitReader::new(&[0xff]);
        assert_eq!(r.read_bits(8).unwrap(), 0xff);
        assert!(matches!(
            r.read_bits(1),
            Err(Error::OutOfRange { position: 8, .. })
        ));
    }

    #[test]
    fn append_then_read_returns_masked_value() {
        let mut w = BitWriter::new();
        w.append_bits(0b1011, 4);
        w.append_bits(0x1234, 16);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_bits(4).unwrap(), 0b1011);
        assert_eq!(r.read_bits(16).unwrap(), 0x1234);
    }

    #[test]
    fn oversized_value_is_truncated_and_counted() {
        let mut w = BitWriter::new();
        w.append_bits(0b111_0101, 3);
        assert_eq!(w.truncation_count(), 1);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_bits(3).unwrap(), 0b101);
    }

    #[test]
    fn backpatch_keeps_neighbours_intact() {
        let mut w = BitWriter::new();
        w.append_bits(0xff, 8);
        w.append_bits(0, 24);
        w.append_bits(0xff, 8);
        w.write_bits_at(0xabcdef, 24, 8).unwrap();
        let buf = w.finish();
        assert_eq!(buf, vec![0xff, 0xab, 0xcd, 0xef, 0xff]);
    }

    #[test]
    fn final_byte_zero_padded() {
        let mut w = BitWriter::new();
        w.append_bits(0b11, 2);
        assert_eq!(w.byte_len(), 1);
        assert_eq!(w.finish(), vec![0b1100_0000]);
    }

    #[test]
    fn seven_bit_block_number() {
        // Descriptor (0,1,1) value 11 must pack as 0001011 in 7 bits.
        let mut w = BitWriter::new();
        w.append_bits(11, 7);
        let buf = w.finish();
        assert_eq!(buf, vec![0b0001011_0]);
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_bits(7).unwrap(), 11);
    }

    #[test]
    fn string_roundtrip_with_padding() {
        let mut w = BitWriter::new();
        w.append_bits(0b1, 1);
        w.append_string("OPERA", 8);
        let buf = w.finish();
        let mut r = BitReader::new(&buf);
        assert_eq!(r.read_bits(1).unwrap(), 1);
        assert_eq!(r.read_string(8).unwrap(), "OPERA   ");
    }
}
