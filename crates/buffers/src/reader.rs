//! Binary buffer reader with cursor tracking.

use std::str;

use crate::BufferError;

/// A bounds-checked reader over a byte slice.
///
/// Every read returns `Err(BufferError::EndOfBuffer)` instead of panicking
/// when the input is truncated, so malformed updates surface as errors.
///
/// # Example
///
/// ```
/// use ycrdt_buffers::Reader;
///
/// let data = [0x01, 0xac, 0x02];
/// let mut reader = Reader::new(&data);
///
/// assert_eq!(reader.try_u8().unwrap(), 0x01);
/// assert_eq!(reader.try_var_uint().unwrap(), 300);
/// ```
#[derive(Debug, Clone)]
pub struct Reader<'a> {
    /// The underlying byte slice.
    pub uint8: &'a [u8],
    /// Current cursor position.
    pub x: usize,
    /// End position (exclusive).
    pub end: usize,
}

impl<'a> Reader<'a> {
    pub fn new(uint8: &'a [u8]) -> Self {
        let end = uint8.len();
        Self { uint8, x: 0, end }
    }

    /// Bytes left between the cursor and the end.
    pub fn remaining(&self) -> usize {
        self.end.saturating_sub(self.x)
    }

    /// Whether unread bytes remain.
    pub fn has_content(&self) -> bool {
        self.x < self.end
    }

    /// Returns the unread tail and moves the cursor to the end.
    pub fn rest(&mut self) -> &'a [u8] {
        let tail = &self.uint8[self.x.min(self.end)..self.end];
        self.x = self.end;
        tail
    }

    #[inline]
    fn check(&self, size: usize) -> Result<(), BufferError> {
        if self.x + size > self.end {
            Err(BufferError::EndOfBuffer)
        } else {
            Ok(())
        }
    }

    pub fn try_peek(&self) -> Result<u8, BufferError> {
        self.check(1)?;
        Ok(self.uint8[self.x])
    }

    #[inline]
    pub fn try_u8(&mut self) -> Result<u8, BufferError> {
        self.check(1)?;
        let val = self.uint8[self.x];
        self.x += 1;
        Ok(val)
    }

    /// Reads `size` raw bytes.
    pub fn try_buf(&mut self, size: usize) -> Result<&'a [u8], BufferError> {
        self.check(size)?;
        let slice = &self.uint8[self.x..self.x + size];
        self.x += size;
        Ok(slice)
    }

    fn try_array<const N: usize>(&mut self) -> Result<[u8; N], BufferError> {
        let bytes = self.try_buf(N)?;
        let mut out = [0u8; N];
        out.copy_from_slice(bytes);
        Ok(out)
    }

    pub fn try_u16(&mut self) -> Result<u16, BufferError> {
        Ok(u16::from_be_bytes(self.try_array()?))
    }

    pub fn try_u32(&mut self) -> Result<u32, BufferError> {
        Ok(u32::from_be_bytes(self.try_array()?))
    }

    pub fn try_i64(&mut self) -> Result<i64, BufferError> {
        Ok(i64::from_be_bytes(self.try_array()?))
    }

    pub fn try_f32(&mut self) -> Result<f32, BufferError> {
        Ok(f32::from_be_bytes(self.try_array()?))
    }

    pub fn try_f64(&mut self) -> Result<f64, BufferError> {
        Ok(f64::from_be_bytes(self.try_array()?))
    }

    /// Reads `size` bytes as UTF-8.
    pub fn try_utf8(&mut self, size: usize) -> Result<&'a str, BufferError> {
        let bytes = self.try_buf(size)?;
        str::from_utf8(bytes).map_err(|_| BufferError::InvalidUtf8)
    }

    // ── lib0 variable-length encodings ──────────────────────────────────

    pub fn try_var_uint(&mut self) -> Result<u64, BufferError> {
        let mut num: u64 = 0;
        let mut shift = 0u32;
        loop {
            let r = self.try_u8()?;
            if shift >= 64 {
                return Err(BufferError::VarIntOverflow);
            }
            num |= ((r & 0x7f) as u64) << shift;
            if r < 0x80 {
                return Ok(num);
            }
            shift += 7;
        }
    }

    /// Reads a var-uint that must fit in 32 bits.
    pub fn try_var_u32(&mut self) -> Result<u32, BufferError> {
        u32::try_from(self.try_var_uint()?).map_err(|_| BufferError::VarIntOverflow)
    }

    /// Reads a signed var-int as `(magnitude, negative)`, preserving the
    /// negative-zero marker.
    pub fn try_var_int_signed(&mut self) -> Result<(u64, bool), BufferError> {
        let r = self.try_u8()?;
        let negative = r & 0x40 != 0;
        let mut num = (r & 0x3f) as u64;
        if r & 0x80 == 0 {
            return Ok((num, negative));
        }
        let mut shift = 6u32;
        loop {
            let r = self.try_u8()?;
            if shift >= 64 {
                return Err(BufferError::VarIntOverflow);
            }
            num |= ((r & 0x7f) as u64) << shift;
            if r < 0x80 {
                return Ok((num, negative));
            }
            shift += 7;
        }
    }

    pub fn try_var_int(&mut self) -> Result<i64, BufferError> {
        let (magnitude, negative) = self.try_var_int_signed()?;
        let value = i64::try_from(magnitude).map_err(|_| BufferError::VarIntOverflow)?;
        Ok(if negative { -value } else { value })
    }

    /// Reads a length-prefixed UTF-8 string.
    pub fn try_var_string(&mut self) -> Result<&'a str, BufferError> {
        let len = self.try_var_uint()? as usize;
        self.try_utf8(len)
    }

    /// Reads a length-prefixed byte array.
    pub fn try_var_buf(&mut self) -> Result<&'a [u8], BufferError> {
        let len = self.try_var_uint()? as usize;
        self.try_buf(len)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Writer;

    #[test]
    fn test_fixed_width() {
        let data = [0x01, 0x02, 0x03, 0x04, 0x05];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_u8().unwrap(), 0x01);
        assert_eq!(reader.try_u32().unwrap(), 0x02030405);
        assert_eq!(reader.try_u8(), Err(BufferError::EndOfBuffer));
    }

    #[test]
    fn test_var_uint_large() {
        let mut w = Writer::new();
        w.var_uint(u32::MAX as u64);
        w.var_uint(1 << 40);
        let data = w.flush();
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_var_uint().unwrap(), u32::MAX as u64);
        assert_eq!(reader.try_var_uint().unwrap(), 1 << 40);
        assert!(!reader.has_content());
    }

    #[test]
    fn test_var_int_negative_zero() {
        let data = [0x40, 0x41, 0xc0, 0x01];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_var_int_signed().unwrap(), (0, true));
        assert_eq!(reader.try_var_int().unwrap(), -1);
        assert_eq!(reader.try_var_int().unwrap(), -64);
    }

    #[test]
    fn test_truncated_var_uint() {
        let data = [0x80, 0x80];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_var_uint(), Err(BufferError::EndOfBuffer));
    }

    #[test]
    fn test_var_string() {
        let mut w = Writer::new();
        w.var_string("hello wörld");
        let data = w.flush();
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_var_string().unwrap(), "hello wörld");
    }

    #[test]
    fn test_invalid_utf8() {
        let data = [0x02, 0xff, 0xfe];
        let mut reader = Reader::new(&data);
        assert_eq!(reader.try_var_string(), Err(BufferError::InvalidUtf8));
    }

    #[test]
    fn test_rest() {
        let data = [0x01, 0x02, 0x03];
        let mut reader = Reader::new(&data);
        reader.try_u8().unwrap();
        assert_eq!(reader.rest(), &[0x02, 0x03]);
        assert!(!reader.has_content());
    }
}
