//! Field-level encoders for the two update formats.
//!
//! Block, content and delete-set serialization is written once against the
//! [`Encoder`]/[`Decoder`] traits; [`v1`] writes every field inline as
//! var-ints while [`v2`] routes fields into run-length compressed columns.
//! Delete sets only touch the [`DsEncoder`]/[`DsDecoder`] subset, which in
//! v2 has no columns at all.

pub mod v1;
pub mod v2;

use std::sync::Arc;

use ycrdt_buffers::{Reader, Writer};

use crate::any::Any;
use crate::error::Result;
use crate::id::{ClientID, ID};

pub use v1::{DecoderV1, EncoderV1};
pub use v2::{DecoderV2, DsDecoderV2, DsEncoderV2, EncoderV2};

/// Fields of a delete set. Standalone delete sets and snapshots only need
/// this part of an encoder.
pub trait DsEncoder: Default {
    /// Stream for fields that are not column encoded.
    fn rest(&mut self) -> &mut Writer;
    fn reset_ds_cur_val(&mut self);
    fn write_ds_clock(&mut self, clock: u32);
    fn write_ds_len(&mut self, len: u32);
    fn to_vec(self) -> Vec<u8>;
}

pub trait Encoder: DsEncoder {
    fn write_left_id(&mut self, id: &ID);
    fn write_right_id(&mut self, id: &ID);
    fn write_client(&mut self, client: ClientID);
    fn write_info(&mut self, info: u8);
    fn write_string(&mut self, s: &str);
    fn write_parent_info(&mut self, is_root_key: bool);
    fn write_type_ref(&mut self, type_ref: u8);
    fn write_len(&mut self, len: u32);
    fn write_any(&mut self, any: &Any);
    fn write_buf(&mut self, buf: &[u8]);
    fn write_json(&mut self, any: &Any);
    fn write_key(&mut self, key: &str);
}

pub trait DsDecoder<'a> {
    fn rest(&mut self) -> &mut Reader<'a>;
    fn reset_ds_cur_val(&mut self);
    fn read_ds_clock(&mut self) -> Result<u32>;
    fn read_ds_len(&mut self) -> Result<u32>;
}

pub trait Decoder<'a>: DsDecoder<'a> + Sized {
    fn from_slice(data: &'a [u8]) -> Result<Self>;
    fn read_left_id(&mut self) -> Result<ID>;
    fn read_right_id(&mut self) -> Result<ID>;
    fn read_client(&mut self) -> Result<ClientID>;
    fn read_info(&mut self) -> Result<u8>;
    fn read_string(&mut self) -> Result<Arc<str>>;
    fn read_parent_info(&mut self) -> Result<bool>;
    fn read_type_ref(&mut self) -> Result<u8>;
    fn read_len(&mut self) -> Result<u32>;
    fn read_any(&mut self) -> Result<Any>;
    fn read_buf(&mut self) -> Result<Vec<u8>>;
    fn read_json(&mut self) -> Result<Any>;
    fn read_key(&mut self) -> Result<Arc<str>>;
}
