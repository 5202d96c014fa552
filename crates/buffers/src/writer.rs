//! Binary buffer writer with auto-growing capacity.

/// A binary buffer writer backed by a growable byte vector.
///
/// Fixed-width integers and floats are written big-endian. The `var_*`
/// methods produce the lib0 variable-length encodings used by the update
/// formats.
///
/// # Example
///
/// ```
/// use ycrdt_buffers::Writer;
///
/// let mut writer = Writer::new();
/// writer.u8(0x01);
/// writer.var_uint(300);
/// assert_eq!(writer.flush(), [0x01, 0xac, 0x02]);
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Writer {
    uint8: Vec<u8>,
}

impl Writer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a writer with room for `capacity` bytes before reallocating.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            uint8: Vec::with_capacity(capacity),
        }
    }

    /// Number of bytes written so far.
    pub fn len(&self) -> usize {
        self.uint8.len()
    }

    pub fn is_empty(&self) -> bool {
        self.uint8.is_empty()
    }

    /// Returns a view of the written data.
    pub fn as_slice(&self) -> &[u8] {
        &self.uint8
    }

    /// Returns the written data and resets the writer.
    pub fn flush(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.uint8)
    }

    /// Consumes the writer and returns the written data.
    pub fn into_vec(self) -> Vec<u8> {
        self.uint8
    }

    #[inline]
    pub fn u8(&mut self, val: u8) {
        self.uint8.push(val);
    }

    #[inline]
    pub fn u16(&mut self, val: u16) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn u32(&mut self, val: u32) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn i64(&mut self, val: i64) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn f32(&mut self, val: f32) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    #[inline]
    pub fn f64(&mut self, val: f64) {
        self.uint8.extend_from_slice(&val.to_be_bytes());
    }

    /// Writes raw bytes without a length prefix.
    pub fn buf(&mut self, data: &[u8]) {
        self.uint8.extend_from_slice(data);
    }

    // ── lib0 variable-length encodings ──────────────────────────────────

    /// Writes an unsigned LEB128 integer (7 bits per byte, continuation bit
    /// set on every byte but the last).
    pub fn var_uint(&mut self, mut num: u64) {
        while num > 0x7f {
            self.uint8.push(0x80 | (num & 0x7f) as u8);
            num >>= 7;
        }
        self.uint8.push(num as u8);
    }

    /// Writes a signed variable-length integer.
    pub fn var_int(&mut self, num: i64) {
        self.var_int_signed(num.unsigned_abs(), num < 0);
    }

    /// Writes a variable-length integer from its magnitude and sign.
    ///
    /// The first byte carries a continuation bit, a sign bit and six data
    /// bits. Passing `negative = true` with a zero magnitude yields the
    /// negative-zero encoding that run-length columns use as a marker.
    pub fn var_int_signed(&mut self, magnitude: u64, negative: bool) {
        let mut num = magnitude;
        let cont = if num > 0x3f { 0x80 } else { 0 };
        let sign = if negative { 0x40 } else { 0 };
        self.uint8.push(cont | sign | (num & 0x3f) as u8);
        num >>= 6;
        while num > 0 {
            let cont = if num > 0x7f { 0x80 } else { 0 };
            self.uint8.push(cont | (num & 0x7f) as u8);
            num >>= 7;
        }
    }

    /// Writes a UTF-8 string prefixed with its byte length.
    pub fn var_string(&mut self, s: &str) {
        self.var_uint(s.len() as u64);
        self.uint8.extend_from_slice(s.as_bytes());
    }

    /// Writes a byte array prefixed with its length.
    pub fn var_buf(&mut self, data: &[u8]) {
        self.var_uint(data.len() as u64);
        self.uint8.extend_from_slice(data);
    }
}
