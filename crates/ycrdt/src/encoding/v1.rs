use std::sync::Arc;

use ycrdt_buffers::{Reader, Writer};

use super::{Decoder, DsDecoder, DsEncoder, Encoder};
use crate::any::Any;
use crate::error::Result;
use crate::id::{ClientID, ID};

/// Writes every field inline as a var-int, var-string or tagged value.
#[derive(Debug, Default)]
pub struct EncoderV1 {
    rest: Writer,
}

impl EncoderV1 {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DsEncoder for EncoderV1 {
    fn rest(&mut self) -> &mut Writer {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {}

    fn write_ds_clock(&mut self, clock: u32) {
        self.rest.var_uint(clock as u64);
    }

    fn write_ds_len(&mut self, len: u32) {
        self.rest.var_uint(len as u64);
    }

    fn to_vec(self) -> Vec<u8> {
        self.rest.into_vec()
    }
}

impl Encoder for EncoderV1 {
    fn write_left_id(&mut self, id: &ID) {
        self.rest.var_uint(id.client);
        self.rest.var_uint(id.clock as u64);
    }

    fn write_right_id(&mut self, id: &ID) {
        self.write_left_id(id);
    }

    fn write_client(&mut self, client: ClientID) {
        self.rest.var_uint(client);
    }

    fn write_info(&mut self, info: u8) {
        self.rest.u8(info);
    }

    fn write_string(&mut self, s: &str) {
        self.rest.var_string(s);
    }

    fn write_parent_info(&mut self, is_root_key: bool) {
        self.rest.var_uint(u64::from(is_root_key));
    }

    fn write_type_ref(&mut self, type_ref: u8) {
        self.rest.var_uint(type_ref as u64);
    }

    fn write_len(&mut self, len: u32) {
        self.rest.var_uint(len as u64);
    }

    fn write_any(&mut self, any: &Any) {
        any.encode(&mut self.rest);
    }

    fn write_buf(&mut self, buf: &[u8]) {
        self.rest.var_buf(buf);
    }

    fn write_json(&mut self, any: &Any) {
        self.rest.var_string(&any.to_json_string());
    }

    fn write_key(&mut self, key: &str) {
        self.rest.var_string(key);
    }
}

#[derive(Debug)]
pub struct DecoderV1<'a> {
    rest: Reader<'a>,
}

impl<'a> DecoderV1<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self {
            rest: Reader::new(data),
        }
    }

    fn read_id(&mut self) -> Result<ID> {
        let client = self.rest.try_var_uint()?;
        let clock = self.rest.try_var_u32()?;
        Ok(ID::new(client, clock))
    }
}

impl<'a> DsDecoder<'a> for DecoderV1<'a> {
    fn rest(&mut self) -> &mut Reader<'a> {
        &mut self.rest
    }

    fn reset_ds_cur_val(&mut self) {}

    fn read_ds_clock(&mut self) -> Result<u32> {
        Ok(self.rest.try_var_u32()?)
    }

    fn read_ds_len(&mut self) -> Result<u32> {
        Ok(self.rest.try_var_u32()?)
    }
}

impl<'a> Decoder<'a> for DecoderV1<'a> {
    fn from_slice(data: &'a [u8]) -> Result<Self> {
        Ok(Self::new(data))
    }

    fn read_left_id(&mut self) -> Result<ID> {
        self.read_id()
    }

    fn read_right_id(&mut self) -> Result<ID> {
        self.read_id()
    }

    fn read_client(&mut self) -> Result<ClientID> {
        Ok(self.rest.try_var_uint()?)
    }

    fn read_info(&mut self) -> Result<u8> {
        Ok(self.rest.try_u8()?)
    }

    fn read_string(&mut self) -> Result<Arc<str>> {
        Ok(self.rest.try_var_string()?.into())
    }

    fn read_parent_info(&mut self) -> Result<bool> {
        Ok(self.rest.try_var_uint()? == 1)
    }

    fn read_type_ref(&mut self) -> Result<u8> {
        Ok(self.rest.try_var_uint()? as u8)
    }

    fn read_len(&mut self) -> Result<u32> {
        Ok(self.rest.try_var_u32()?)
    }

    fn read_any(&mut self) -> Result<Any> {
        Any::decode(&mut self.rest)
    }

    fn read_buf(&mut self) -> Result<Vec<u8>> {
        Ok(self.rest.try_var_buf()?.to_vec())
    }

    fn read_json(&mut self) -> Result<Any> {
        let text = self.rest.try_var_string()?;
        Any::from_json_str(text)
    }

    fn read_key(&mut self) -> Result<Arc<str>> {
        self.read_string()
    }
}
