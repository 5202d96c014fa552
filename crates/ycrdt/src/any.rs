//! The JSON-like value model stored in list and map content.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use serde_json::Value;
use ycrdt_buffers::{Reader, Writer};

use crate::error::{Error, Result};

const TAG_UNDEFINED: u8 = 127;
const TAG_NULL: u8 = 126;
const TAG_VAR_INT: u8 = 125;
const TAG_FLOAT32: u8 = 124;
const TAG_FLOAT64: u8 = 123;
const TAG_BIGINT: u8 = 122;
const TAG_FALSE: u8 = 121;
const TAG_TRUE: u8 = 120;
const TAG_STRING: u8 = 119;
const TAG_OBJECT: u8 = 118;
const TAG_ARRAY: u8 = 117;
const TAG_BUFFER: u8 = 116;

/// Largest magnitude written with the compact var-int tag.
const MAX_VAR_INT: f64 = 0x7fff_ffff as f64;

/// A closed sum of the values that can be stored in content without
/// becoming a shared type of their own.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Any {
    #[default]
    Undefined,
    Null,
    Bool(bool),
    Number(f64),
    BigInt(i64),
    String(Arc<str>),
    Buffer(Arc<[u8]>),
    Array(Arc<[Any]>),
    Map(Arc<IndexMap<String, Any>>),
}

impl Any {
    /// Writes the value using the tagged binary encoding.
    pub fn encode(&self, w: &mut Writer) {
        match self {
            Any::Undefined => w.u8(TAG_UNDEFINED),
            Any::Null => w.u8(TAG_NULL),
            Any::Bool(true) => w.u8(TAG_TRUE),
            Any::Bool(false) => w.u8(TAG_FALSE),
            Any::Number(n) => {
                let n = *n;
                if n.fract() == 0.0 && n.abs() <= MAX_VAR_INT {
                    w.u8(TAG_VAR_INT);
                    w.var_int_signed(n.abs() as u64, n.is_sign_negative());
                } else if (n as f32) as f64 == n {
                    w.u8(TAG_FLOAT32);
                    w.f32(n as f32);
                } else {
                    w.u8(TAG_FLOAT64);
                    w.f64(n);
                }
            }
            Any::BigInt(n) => {
                w.u8(TAG_BIGINT);
                w.i64(*n);
            }
            Any::String(s) => {
                w.u8(TAG_STRING);
                w.var_string(s);
            }
            Any::Buffer(buf) => {
                w.u8(TAG_BUFFER);
                w.var_buf(buf);
            }
            Any::Array(values) => {
                w.u8(TAG_ARRAY);
                w.var_uint(values.len() as u64);
                for v in values.iter() {
                    v.encode(w);
                }
            }
            Any::Map(entries) => {
                w.u8(TAG_OBJECT);
                w.var_uint(entries.len() as u64);
                for (k, v) in entries.iter() {
                    w.var_string(k);
                    v.encode(w);
                }
            }
        }
    }

    pub fn decode(r: &mut Reader<'_>) -> Result<Any> {
        let tag = r.try_u8()?;
        Ok(match tag {
            TAG_UNDEFINED => Any::Undefined,
            TAG_NULL => Any::Null,
            TAG_VAR_INT => {
                let (magnitude, negative) = r.try_var_int_signed()?;
                let n = magnitude as f64;
                Any::Number(if negative { -n } else { n })
            }
            TAG_FLOAT32 => Any::Number(r.try_f32()? as f64),
            TAG_FLOAT64 => Any::Number(r.try_f64()?),
            TAG_BIGINT => Any::BigInt(r.try_i64()?),
            TAG_FALSE => Any::Bool(false),
            TAG_TRUE => Any::Bool(true),
            TAG_STRING => Any::String(r.try_var_string()?.into()),
            TAG_OBJECT => {
                let len = r.try_var_uint()? as usize;
                let mut entries = IndexMap::with_capacity(len.min(1024));
                for _ in 0..len {
                    let key = r.try_var_string()?.to_owned();
                    let value = Any::decode(r)?;
                    entries.insert(key, value);
                }
                Any::Map(Arc::new(entries))
            }
            TAG_ARRAY => {
                let len = r.try_var_uint()? as usize;
                let mut values = Vec::with_capacity(len.min(1024));
                for _ in 0..len {
                    values.push(Any::decode(r)?);
                }
                Any::Array(values.into())
            }
            TAG_BUFFER => Any::Buffer(r.try_var_buf()?.into()),
            other => return Err(Error::UnknownAnyTag(other)),
        })
    }

    /// Converts into a `serde_json::Value`. Integral numbers become JSON
    /// integers, non-finite numbers and `Undefined` become `null`.
    pub fn to_json(&self) -> Value {
        match self {
            Any::Undefined | Any::Null => Value::Null,
            Any::Bool(b) => Value::Bool(*b),
            Any::Number(n) => number_to_json(*n),
            Any::BigInt(n) => Value::from(*n),
            Any::String(s) => Value::String(s.to_string()),
            Any::Buffer(buf) => Value::Array(buf.iter().map(|b| Value::from(*b)).collect()),
            Any::Array(values) => Value::Array(values.iter().map(Any::to_json).collect()),
            Any::Map(entries) => Value::Object(
                entries
                    .iter()
                    .map(|(k, v)| (k.clone(), v.to_json()))
                    .collect(),
            ),
        }
    }

    /// Stringifies the value as JSON text.
    pub fn to_json_string(&self) -> String {
        self.to_json().to_string()
    }

    pub fn from_json_str(text: &str) -> Result<Any> {
        let value: Value = serde_json::from_str(text)?;
        Ok(Any::from(value))
    }
}

fn number_to_json(n: f64) -> Value {
    if n.fract() == 0.0 && n.abs() < 9_007_199_254_740_992.0 {
        Value::from(n as i64)
    } else {
        serde_json::Number::from_f64(n)
            .map(Value::Number)
            .unwrap_or(Value::Null)
    }
}

impl fmt::Display for Any {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Any::Undefined => f.write_str("undefined"),
            other => write!(f, "{}", other.to_json()),
        }
    }
}

// ── Conversions ─────────────────────────────────────────────────────────

impl From<Value> for Any {
    fn from(value: Value) -> Self {
        match value {
            Value::Null => Any::Null,
            Value::Bool(b) => Any::Bool(b),
            Value::Number(n) => Any::Number(n.as_f64().unwrap_or(f64::NAN)),
            Value::String(s) => Any::String(s.into()),
            Value::Array(values) => Any::Array(values.into_iter().map(Any::from).collect()),
            Value::Object(entries) => Any::Map(Arc::new(
                entries.into_iter().map(|(k, v)| (k, Any::from(v))).collect(),
            )),
        }
    }
}

impl From<bool> for Any {
    fn from(b: bool) -> Self {
        Any::Bool(b)
    }
}

impl From<f64> for Any {
    fn from(n: f64) -> Self {
        Any::Number(n)
    }
}

impl From<f32> for Any {
    fn from(n: f32) -> Self {
        Any::Number(n as f64)
    }
}

impl From<i32> for Any {
    fn from(n: i32) -> Self {
        Any::Number(n as f64)
    }
}

impl From<u32> for Any {
    fn from(n: u32) -> Self {
        Any::Number(n as f64)
    }
}

impl From<i64> for Any {
    fn from(n: i64) -> Self {
        Any::Number(n as f64)
    }
}

impl From<&str> for Any {
    fn from(s: &str) -> Self {
        Any::String(s.into())
    }
}

impl From<String> for Any {
    fn from(s: String) -> Self {
        Any::String(s.into())
    }
}

impl From<Vec<u8>> for Any {
    fn from(buf: Vec<u8>) -> Self {
        Any::Buffer(buf.into())
    }
}

impl From<Vec<Any>> for Any {
    fn from(values: Vec<Any>) -> Self {
        Any::Array(values.into())
    }
}

impl From<IndexMap<String, Any>> for Any {
    fn from(entries: IndexMap<String, Any>) -> Self {
        Any::Map(Arc::new(entries))
    }
}
