use std::collections::HashMap;
use std::sync::Arc;

use ycrdt_buffers::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, Reader, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UintOptRleDecoder, UintOptRleEncoder, Writer,
};

use super::{Decoder, DsDecoder, DsEncoder, Encoder};
use crate::any::Any;
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};

/// Delete-set writer for the v2 format. Standalone delete sets and
/// snapshots carry no columns, only the rest stream with clocks written
/// as deltas from the end of the previous range.
#[derive(Debug, Default)]
pub struct DsEncoderV2 {
    rest: Writer,
    ds_curr_val: u32,
}

impl DsEncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DsEncoder for DsEncoderV2 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    fn write_ds_clock(&mut self, clock: u32) {
        let diff = clock - self.ds_curr_val;
        self.ds_curr_val = clock;
        self.rest.var_uint(diff as u64);
    }

    fn write_ds_len(&mut self, len: u32) {
        debug_assert!(len > 0, "delete ranges are never empty");
        self.rest.var_uint(len.saturating_sub(1) as u64);
        self.ds_curr_val += len;
    }

    fn to_vec(self) -> Vec<u8> {
        self.rest.into_vec()
    }
}

/// Column-oriented encoder. Every field kind is collected into its own
/// run-length compressed column; the columns are emitted with length
/// prefixes followed by the unprefixed rest stream.
#[derive(Debug, Default)]
pub struct EncoderV2 {
    ds: DsEncoderV2,
    key_map: HashMap<String, u64>,
    key_clock: u64,
    key_clock_encoder: IntDiffOptRleEncoder,
    client_encoder: UintOptRleEncoder,
    left_clock_encoder: IntDiffOptRleEncoder,
    right_clock_encoder: IntDiffOptRleEncoder,
    info_encoder: RleEncoder,
    string_encoder: StringEncoder,
    parent_info_encoder: RleEncoder,
    type_ref_encoder: UintOptRleEncoder,
    len_encoder: UintOptRleEncoder,
}

impl EncoderV2 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DsEncoder for EncoderV2 {
    fn rest(&mut self) -> &mut Writer {
        self.ds.rest()
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds.reset_ds_cur_val();
    }

    fn write_ds_clock(&mut self, clock: u32) {
        self.ds.write_ds_clock(clock);
    }

    fn write_ds_len(&mut self, len: u32) {
        self.ds.write_ds_len(len);
    }

    fn to_vec(self) -> Vec<u8> {
        let mut out = Writer::new();
        // feature flag
        out.var_uint(0);
        out.var_buf(&self.key_clock_encoder.to_vec());
        out.var_buf(&self.client_encoder.to_vec());
        out.var_buf(&self.left_clock_encoder.to_vec());
        out.var_buf(&self.right_clock_encoder.to_vec());
        out.var_buf(&self.info_encoder.to_vec());
        out.var_buf(&self.string_encoder.to_vec());
        out.var_buf(&self.parent_info_encoder.to_vec());
        out.var_buf(&self.type_ref_encoder.to_vec());
        out.var_buf(&self.len_encoder.to_vec());
        out.buf(self.ds.rest.as_slice());
        out.into_vec()
    }
}

impl Encoder for EncoderV2 {
    fn write_left_id(&mut self, id: &ID) {
        self.client_encoder.write(id.client);
        self.left_clock_encoder.write(id.clock as i64);
    }

    fn write_right_id(&mut self, id: &ID) {
        self.client_encoder.write(id.client);
        self.right_clock_encoder.write(id.clock as i64);
    }

    fn write_client(&mut self, client: ClientID) {
        self.client_encoder.write(client);
    }

    fn write_info(&mut self, info: u8) {
        self.info_encoder.write(info);
    }

    fn write_string(&mut self, s: &str) {
        self.string_encoder.write(s);
    }

    fn write_parent_info(&mut self, is_root_key: bool) {
        self.parent_info_encoder.write(u8::from(is_root_key));
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.type_ref_encoder.write(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.len_encoder.write(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.ds.rest);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.ds.rest.var_buf(buf);
    }

    fn write_json(&mut self, any: &Any) {
        any.encode(&mut self.ds.rest);
    }

    /// Keys seen before are written as their index into the key table.
    fn write_key(&mut self, key: &str) {
        match self.key_map.get(key) {
            Some(clock) => self.key_clock_encoder.write(*clock as i64),
            None => {
                let clock = self.key_clock;
                self.key_clock += 1;
                self.key_map.insert(key.to_owned(), clock);
                self.key_clock_encoder.write(clock as i64);
                self.string_encoder.write(key);
            }
        }
    }
}

/// Delete-set reader for the v2 format, the counterpart of [`DsEncoderV2`].
#[derive(Debug)]
pub struct DsDecoderV2<'a> {
    rest: Reader<'a>,
    ds_curr_val: u32,
}

impl<'a> DsDecoderV2<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            rest: Reader::new(data),
            ds_curr_val: 0,
        }
    }
}

impl<'a> DsDecoder<'a> for DsDecoderV2<'a> {
    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds_curr_val = 0;
    }

    fn read_ds_clock(&mut self) -> Result<u32> {
        let diff = self.rest.try_var_u32()?;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(diff)
            .ok_or(Error::UnexpectedCase("delete set clock overflow"))?;
        Ok(self.ds_curr_val)
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        let diff = self.rest.try_var_u32()? + 1;
        self.ds_curr_val = self
            .ds_curr_val
            .checked_add(diff)
            .ok_or(Error::UnexpectedCase("delete set clock overflow"))?;
        Ok(diff)
    }
}

#[derive(Debug)]
pub struct DecoderV2<'a> {
    ds: DsDecoderV2<'a>,
    keys: Vec<Arc<str>>,
    key_clock_decoder: IntDiffOptRleDecoder<'a>,
    client_decoder: UintOptRleDecoder<'a>,
    left_clock_decoder: IntDiffOptRleDecoder<'a>,
    right_clock_decoder: IntDiffOptRleDecoder<'a>,
    info_decoder: RleDecoder<'a>,
    string_decoder: StringDecoder<'a>,
    parent_info_decoder: RleDecoder<'a>,
    type_ref_decoder: UintOptRleDecoder<'a>,
    len_decoder: UintOptRleDecoder<'a>,
}

impl<'a> DecoderV2<'a> {
    pub fn new(data: &'a [u8]) -> Result<Self> {
        let mut reader = Reader::new(data);
        let feature_flag = reader.try_var_uint()?;
        if feature_flag != 0 {
            return Err(Error::UnsupportedFeature(feature_flag));
        }
        let key_clock_decoder = IntDiffOptRleDecoder::new(reader.try_var_buf()?);
        let client_decoder = UintOptRleDecoder::new(reader.try_var_buf()?);
        let left_clock_decoder = IntDiffOptRleDecoder::new(reader.try_var_buf()?);
        let right_clock_decoder = IntDiffOptRleDecoder::new(reader.try_var_buf()?);
        let info_decoder = RleDecoder::new(reader.try_var_buf()?);
        let string_decoder = StringDecoder::new(reader.try_var_buf()?)?;
        let parent_info_decoder = RleDecoder::new(reader.try_var_buf()?);
        let type_ref_decoder = UintOptRleDecoder::new(reader.try_var_buf()?);
        let len_decoder = UintOptRleDecoder::new(reader.try_var_buf()?);
        Ok(Self {
            ds: DsDecoderV2 {
                rest: reader,
                ds_curr_val: 0,
            },
            keys: Vec::new(),
            key_clock_decoder,
            client_decoder,
            left_clock_decoder,
            right_clock_decoder,
            info_decoder,
            string_decoder,
            parent_info_decoder,
            type_ref_decoder,
            len_decoder,
        })
    }
}

impl<'a> DsDecoder<'a> for DecoderV2<'a> {
    fn rest(&mut self) -> &mut Reader<'a> {
        self.ds.rest()
    }

    fn reset_ds_cur_val(&mut self) {
        self.ds.reset_ds_cur_val();
    }

    fn read_ds_clock(&mut self) -> Result<u32> {
        self.ds.read_ds_clock()
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        self.ds.read_ds_len()
    }
}

impl<'a> Decoder<'a> for DecoderV2<'a> {
    fn from_slice(data: &'a [u8]) -> Result<Self> {
        Self::new(data)
    }

    fn read_left_id(&mut self) -> Result<ID> {
        let client = self.client_decoder.read()?;
        let clock = self.left_clock_decoder.read_u32()?;
        Ok(ID::new(client, clock))
    }

    fn read_right_id(&mut self) -> Result<ID> {
        let client = self.client_decoder.read()?;
        let clock = self.right_clock_decoder.read_u32()?;
        Ok(ID::new(client, clock))
    }

    fn read_client(&mut self) -> Result<ClientID> {
        Ok(self.client_decoder.read()?)
    }

    fn read_info(&mut self) -> Result<u8> {
        Ok(self.info_decoder.read()?)
    }

    fn read_string(&mut self) -> Result<Arc<str>> {
        Ok(self.string_decoder.read()?.into())
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.parent_info_decoder.read()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8> {
        Ok(self.type_ref_decoder.read()? as u8)
    }

    fn read_len(&mut self) -> Result<u32> {
        Ok(self.len_decoder.read_u32()?)
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.ds.rest)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>> {
        Ok(self.ds.rest.try_var_buf()?.to_vec())
    }

    fn read_json(&mut self) -> Result<Any> {
        Any::decode(&mut self.ds.rest)
    }

    fn read_key(&mut self) -> Result<Arc<str>> {
        let key_clock = self.key_clock_decoder.read()?;
        match usize::try_from(key_clock).ok().and_then(|i| self.keys.get(i)) {
            Some(key) => Ok(key.clone()),
            None => {
                let key: Arc<str> = self.string_decoder.read()?.into();
                self.keys.push(key.clone());
                Ok(key)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn repeated_keys_are_written_once() {
        let mut e = EncoderV2::new();
        e.write_key("bold");
        e.write_key("italic");
        e.write_key("bold");
        let bytes = e.to_vec();
        let mut d = DecoderV2::new(&bytes).unwrap();
        assert_eq!(&*d.read_key().unwrap(), "bold");
        assert_eq!(&*d.read_key().unwrap(), "italic");
        assert_eq!(&*d.read_key().unwrap(), "bold");
    }

    #[test]
    fn delete_set_fields_are_delta_encoded() {
        let mut e = EncoderV2::new();
        e.write_ds_clock(10);
        e.write_ds_len(5);
        e.write_ds_clock(20);
        e.write_ds_len(1);
        let bytes = e.to_vec();
        let mut d = DecoderV2::new(&bytes).unwrap();
        assert_eq!(d.read_ds_clock().unwrap(), 10);
        assert_eq!(d.read_ds_len().unwrap(), 5);
        assert_eq!(d.read_ds_clock().unwrap(), 20);
        assert_eq!(d.read_ds_len().unwrap(), 1);
    }

    #[test]
    fn standalone_delete_set_codec_has_no_header() {
        let mut e = DsEncoderV2::new();
        e.rest().var_uint(1);
        e.write_ds_clock(3);
        e.write_ds_len(2);
        let bytes = e.to_vec();
        assert_eq!(bytes, [1, 3, 1]);
        let mut d = DsDecoderV2::new(&bytes);
        assert_eq!(d.rest().try_var_uint().unwrap(), 1);
        assert_eq!(d.read_ds_clock().unwrap(), 3);
        assert_eq!(d.read_ds_len().unwrap(), 2);
    }

    #[test]
    fn nonzero_feature_flag_is_rejected() {
        let err = DecoderV2::new(&[1]).unwrap_err();
        assert!(matches!(err, Error::UnsupportedFeature(1)));
    }
}
