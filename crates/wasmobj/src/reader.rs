//! Bounds-checked cursor over an input byte slice.
//!
//! All multi-byte fixed-width values are little-endian. Variable-length
//! integers are LEB128 and are rejected when they use more bytes than their
//! width allows or carry set bits beyond it.

use crate::error::{ErrorKind, ParseError, Result};

/// A forward-only read position within a slice of the input.
///
/// `base` is the absolute offset of `data[0]` in the whole input, so error
/// offsets always refer to the file rather than to the current section.
#[derive(Debug, Clone)]
pub struct ReadContext<'a> {
    data: &'a [u8],
    pos: usize,
    base: usize,
}

impl<'a> ReadContext<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self::with_base(data, 0)
    }

    pub fn with_base(data: &'a [u8], base: usize) -> Self {
        Self { data, pos: 0, base }
    }

    /// Position relative to the start of this context.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Position in the whole input.
    pub fn offset(&self) -> usize {
        self.base + self.pos
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    pub fn is_at_end(&self) -> bool {
        self.pos == self.data.len()
    }

    /// The unread bytes, without advancing.
    pub fn remaining_bytes(&self) -> &'a [u8] {
        &self.data[self.pos..]
    }

    fn eof(&self, needed: usize) -> ParseError {
        ParseError::new(ErrorKind::UnexpectedEof {
            offset: self.offset(),
            needed: needed - self.remaining(),
        })
    }

    pub fn read_bytes(&mut self, len: usize) -> Result<&'a [u8]> {
        if len > self.remaining() {
            return Err(self.eof(len));
        }
        let bytes = &self.data[self.pos..self.pos + len];
        self.pos += len;
        Ok(bytes)
    }

    fn read_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.read_bytes(N)?);
        Ok(out)
    }

    pub fn read_u8(&mut self) -> Result<u8> {
        let [b] = self.read_array::<1>()?;
        Ok(b)
    }

    pub fn read_u32(&mut self) -> Result<u32> {
        Ok(u32::from_le_bytes(self.read_array()?))
    }

    pub fn read_u64(&mut self) -> Result<u64> {
        Ok(u64::from_le_bytes(self.read_array()?))
    }

    pub fn read_var_u32(&mut self) -> Result<u32> {
        Ok(self.read_leb_unsigned(32)? as u32)
    }

    pub fn read_var_u64(&mut self) -> Result<u64> {
        self.read_leb_unsigned(64)
    }

    pub fn read_var_i32(&mut self) -> Result<i32> {
        Ok(self.read_leb_signed(32)? as i32)
    }

    pub fn read_var_i64(&mut self) -> Result<i64> {
        self.read_leb_signed(64)
    }

    /// A one-bit flag encoded as a LEB128 value that must be 0 or 1.
    pub fn read_var_u1(&mut self) -> Result<bool> {
        let start = self.offset();
        match self.read_leb_unsigned(1) {
            Ok(v) => Ok(v == 1),
            Err(e) if matches!(e.kind(), ErrorKind::BadLeb { .. }) => Err(ParseError::malformed(
                format!("invalid varuint1 at offset {start}"),
            )),
            Err(e) => Err(e),
        }
    }

    /// Length-prefixed opaque bytes.
    pub fn read_byte_vec(&mut self) -> Result<&'a [u8]> {
        let len = self.read_var_u32()? as usize;
        self.read_bytes(len)
    }

    /// Length-prefixed UTF-8 string.
    pub fn read_string(&mut self) -> Result<&'a str> {
        let start = self.offset();
        let bytes = self.read_byte_vec()?;
        std::str::from_utf8(bytes).map_err(|_| {
            ParseError::malformed(format!("string at offset {start} is not valid UTF-8"))
        })
    }

    /// Split off the next `len` bytes as a nested context and skip past them.
    pub fn frame(&mut self, len: usize) -> Result<ReadContext<'a>> {
        let base = self.offset();
        let data = self.read_bytes(len)?;
        Ok(ReadContext::with_base(data, base))
    }

    /// Fail unless every byte of this context has been consumed.
    pub fn expect_end(&self, what: &str) -> Result<()> {
        if self.is_at_end() {
            Ok(())
        } else {
            Err(ParseError::malformed(format!(
                "{what} has {} unconsumed trailing bytes",
                self.remaining()
            )))
        }
    }

    fn read_leb_unsigned(&mut self, bits: u32) -> Result<u64> {
        let start = self.offset();
        let mut result: u64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            let payload = u64::from(byte & 0x7f);
            if shift >= bits || (bits - shift < 7 && payload >> (bits - shift) != 0) {
                return Err(ParseError::new(ErrorKind::BadLeb { offset: start }));
            }
            result |= payload << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
        }
    }

    fn read_leb_signed(&mut self, bits: u32) -> Result<i64> {
        let start = self.offset();
        let bad = || ParseError::new(ErrorKind::BadLeb { offset: start });
        let mut result: i64 = 0;
        let mut shift: u32 = 0;
        loop {
            let byte = self.read_u8()?;
            let payload = i64::from(byte & 0x7f);
            if shift >= bits {
                return Err(bad());
            }
            // Only one payload bit is left in the tenth byte of a 64-bit value.
            if shift == 63 && payload != 0 && payload != 0x7f {
                return Err(bad());
            }
            result |= payload << shift;
            shift += 7;
            if byte & 0x80 == 0 {
                if shift < 64 && byte & 0x40 != 0 {
                    result |= -1i64 << shift;
                }
                break;
            }
        }
        if bits < 64 {
            let min = -(1i64 << (bits - 1));
            let max = (1i64 << (bits - 1)) - 1;
            if result < min || result > max {
                return Err(bad());
            }
        }
        Ok(result)
    }
}
