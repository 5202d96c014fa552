//! Run-length column codecs for the column-oriented update format.
//!
//! Each encoder owns its own [`Writer`]; the resulting bytes are stored as a
//! length-prefixed column by the update encoder. Decoders borrow a column
//! slice and never fail once the column is exhausted: RLE columns repeat the
//! last value forever, matching how trailing runs are left unterminated.

use crate::{BufferError, Reader, Writer};

// ── RleEncoder ──────────────────────────────────────────────────────────

/// Run-length encoder for bytes. Writes a value, then `count - 1` once the
/// value changes. The final run length is never written.
#[derive(Debug, Default)]
pub struct RleEncoder {
    writer: Writer,
    s: Option<u8>,
    count: u64,
}

impl RleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: u8) {
        if self.s == Some(v) {
            self.count += 1;
        } else {
            if self.count > 0 {
                self.writer.var_uint(self.count - 1);
            }
            self.count = 1;
            self.writer.u8(v);
            self.s = Some(v);
        }
    }

    pub fn to_vec(self) -> Vec<u8> {
        self.writer.into_vec()
    }
}

#[derive(Debug)]
pub struct RleDecoder<'a> {
    reader: Reader<'a>,
    s: u8,
    /// Remaining repetitions of `s`; `None` once the run repeats forever.
    count: Option<u64>,
}

impl<'a> RleDecoder<'a> {
    pub fn new(column: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(column),
            s: 0,
            count: Some(0),
        }
    }

    pub fn read(&mut self) -> Result<u8, BufferError> {
        if self.count == Some(0) {
            self.s = self.reader.try_u8()?;
            self.count = if self.reader.has_content() {
                Some(self.reader.try_var_uint()? + 1)
            } else {
                None
            };
        }
        if let Some(count) = self.count.as_mut() {
            *count -= 1;
        }
        Ok(self.s)
    }
}

// ── UintOptRle ──────────────────────────────────────────────────────────

/// Run-length encoder for unsigned integers. A single value is written as
/// is; a run is written as the negated value followed by `count - 2`.
#[derive(Debug, Default)]
pub struct UintOptRleEncoder {
    writer: Writer,
    s: u64,
    count: u64,
}

impl UintOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: u64) {
        if self.s == v {
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.s = v;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            self.writer.var_int_signed(self.s, self.count > 1);
            if self.count > 1 {
                self.writer.var_uint(self.count - 2);
            }
        }
    }

    pub fn to_vec(mut self) -> Vec<u8> {
        self.flush();
        self.writer.into_vec()
    }
}

#[derive(Debug)]
pub struct UintOptRleDecoder<'a> {
    reader: Reader<'a>,
    s: u64,
    count: u64,
}

impl<'a> UintOptRleDecoder<'a> {
    pub fn new(column: &'a [u8]) -> Self {
        Self::from_reader(Reader::new(column))
    }

    fn from_reader(reader: Reader<'a>) -> Self {
        Self {
            reader,
            s: 0,
            count: 0,
        }
    }

    pub fn read(&mut self) -> Result<u64, BufferError> {
        if self.count == 0 {
            let (s, negative) = self.reader.try_var_int_signed()?;
            self.s = s;
            self.count = 1;
            if negative {
                self.count = self.reader.try_var_uint()? + 2;
            }
        }
        self.count -= 1;
        Ok(self.s)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        u32::try_from(self.read()?).map_err(|_| BufferError::VarIntOverflow)
    }
}

// ── IntDiffOptRle ───────────────────────────────────────────────────────

/// Encodes runs of equal differences between consecutive values. Each run
/// is written as `diff * 2 + has_count`, followed by `count - 2` when the
/// run is longer than one.
#[derive(Debug, Default)]
pub struct IntDiffOptRleEncoder {
    writer: Writer,
    s: i64,
    count: u64,
    diff: i64,
}

impl IntDiffOptRleEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, v: i64) {
        if self.diff == v - self.s {
            self.s = v;
            self.count += 1;
        } else {
            self.flush();
            self.count = 1;
            self.diff = v - self.s;
            self.s = v;
        }
    }

    fn flush(&mut self) {
        if self.count > 0 {
            let encoded = self.diff * 2 + if self.count == 1 { 0 } else { 1 };
            self.writer.var_int(encoded);
            if self.count > 1 {
                self.writer.var_uint(self.count - 2);
            }
        }
    }

    pub fn to_vec(mut self) -> Vec<u8> {
        self.flush();
        self.writer.into_vec()
    }
}

#[derive(Debug)]
pub struct IntDiffOptRleDecoder<'a> {
    reader: Reader<'a>,
    s: i64,
    count: u64,
    diff: i64,
}

impl<'a> IntDiffOptRleDecoder<'a> {
    pub fn new(column: &'a [u8]) -> Self {
        Self {
            reader: Reader::new(column),
            s: 0,
            count: 0,
            diff: 0,
        }
    }

    pub fn read(&mut self) -> Result<i64, BufferError> {
        if self.count == 0 {
            let diff = self.reader.try_var_int()?;
            let has_count = diff & 1 == 1;
            self.diff = diff >> 1;
            self.count = 1;
            if has_count {
                self.count = self.reader.try_var_uint()? + 2;
            }
        }
        self.s += self.diff;
        self.count -= 1;
        Ok(self.s)
    }

    pub fn read_u32(&mut self) -> Result<u32, BufferError> {
        u32::try_from(self.read()?).map_err(|_| BufferError::VarIntOverflow)
    }
}

// ── StringEncoder ───────────────────────────────────────────────────────

/// Concatenates all strings into one var-string followed by a
/// [`UintOptRleEncoder`] column of their UTF-16 lengths.
#[derive(Debug, Default)]
pub struct StringEncoder {
    s: String,
    lens: UintOptRleEncoder,
}

impl StringEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn write(&mut self, s: &str) {
        self.s.push_str(s);
        self.lens.write(s.encode_utf16().count() as u64);
    }

    pub fn to_vec(self) -> Vec<u8> {
        let mut writer = Writer::new();
        writer.var_string(&self.s);
        writer.buf(&self.lens.to_vec());
        writer.into_vec()
    }
}

#[derive(Debug)]
pub struct StringDecoder<'a> {
    lens: UintOptRleDecoder<'a>,
    units: Vec<u16>,
    pos: usize,
}

impl<'a> StringDecoder<'a> {
    pub fn new(column: &'a [u8]) -> Result<Self, BufferError> {
        let mut reader = Reader::new(column);
        let units = reader.try_var_string()?.encode_utf16().collect();
        Ok(Self {
            lens: UintOptRleDecoder::from_reader(reader),
            units,
            pos: 0,
        })
    }

    pub fn read(&mut self) -> Result<String, BufferError> {
        let len = self.lens.read()? as usize;
        let end = self.pos + len;
        if end > self.units.len() {
            return Err(BufferError::EndOfBuffer);
        }
        let s = String::from_utf16(&self.units[self.pos..end])
            .map_err(|_| BufferError::InvalidUtf8)?;
        self.pos = end;
        Ok(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn rle_leaves_last_run_open() {
        let mut e = RleEncoder::new();
        for v in [1, 1, 1, 2] {
            e.write(v);
        }
        let bytes = e.to_vec();
        assert_eq!(bytes, [1, 2, 2]);
        let mut d = RleDecoder::new(&bytes);
        let out: Vec<u8> = (0..6).map(|_| d.read().unwrap()).collect();
        assert_eq!(out, [1, 1, 1, 2, 2, 2]);
    }

    #[test]
    fn uint_opt_rle_run_of_zeros_uses_negative_zero() {
        let mut e = UintOptRleEncoder::new();
        for _ in 0..3 {
            e.write(0);
        }
        let bytes = e.to_vec();
        assert_eq!(bytes, [0x40, 0x01]);
        let mut d = UintOptRleDecoder::new(&bytes);
        for _ in 0..3 {
            assert_eq!(d.read().unwrap(), 0);
        }
    }

    #[test]
    fn int_diff_opt_rle_counts_up() {
        let mut e = IntDiffOptRleEncoder::new();
        for v in 0..10 {
            e.write(v);
        }
        let bytes = e.to_vec();
        let mut d = IntDiffOptRleDecoder::new(&bytes);
        for v in 0..10 {
            assert_eq!(d.read().unwrap(), v);
        }
    }

    #[test]
    fn string_decoder_splits_on_utf16_lengths() {
        let mut e = StringEncoder::new();
        e.write("ab");
        e.write("😀");
        e.write("");
        e.write("c");
        let bytes = e.to_vec();
        let mut d = StringDecoder::new(&bytes).unwrap();
        assert_eq!(d.read().unwrap(), "ab");
        assert_eq!(d.read().unwrap(), "😀");
        assert_eq!(d.read().unwrap(), "");
        assert_eq!(d.read().unwrap(), "c");
    }

    proptest! {
        #[test]
        fn uint_opt_rle_preserves_sequence(values in prop::collection::vec(0u64..4, 0..64)) {
            let mut e = UintOptRleEncoder::new();
            for v in &values {
                e.write(*v);
            }
            let bytes = e.to_vec();
            let mut d = UintOptRleDecoder::new(&bytes);
            for v in &values {
                prop_assert_eq!(d.read().unwrap(), *v);
            }
        }

        #[test]
        fn int_diff_opt_rle_preserves_sequence(values in prop::collection::vec(-50i64..50, 0..64)) {
            let mut e = IntDiffOptRleEncoder::new();
            for v in &values {
                e.write(*v);
            }
            let bytes = e.to_vec();
            let mut d = IntDiffOptRleDecoder::new(&bytes);
            for v in &values {
                prop_assert_eq!(d.read().unwrap(), *v);
            }
        }
    }
}
