//! Item payloads.

use std::sync::Arc;

use crate::any::Any;
use crate::branch::{BranchPtr, TypeRef};
use crate::doc::SubDoc;
use crate::encoding::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::types::Out;

pub const BLOCK_GC: u8 = 0;
pub const CONTENT_DELETED: u8 = 1;
pub const CONTENT_JSON: u8 = 2;
pub const CONTENT_BINARY: u8 = 3;
pub const CONTENT_STRING: u8 = 4;
pub const CONTENT_EMBED: u8 = 5;
pub const CONTENT_FORMAT: u8 = 6;
pub const CONTENT_TYPE: u8 = 7;
pub const CONTENT_ANY: u8 = 8;
pub const CONTENT_DOC: u8 = 9;
pub const BLOCK_SKIP: u8 = 10;

const REPLACEMENT: char = '\u{fffd}';

/// Payload of an item. Lengths are counted in list units: one per value,
/// one per UTF-16 code unit for strings.
#[derive(Debug, Clone, PartialEq)]
pub enum ItemContent {
    /// Placeholder left behind once deleted content is collected.
    Deleted(u32),
    /// Values stored in the legacy JSON-string encoding.
    Json(Vec<Any>),
    Binary(Vec<u8>),
    String(ContentString),
    Embed(Any),
    Format(Arc<str>, Any),
    Type(ContentType),
    Any(Vec<Any>),
    Doc(SubDoc),
}

/// Nested container content. `branch` is assigned when the owning item is
/// integrated into a store.
#[derive(Debug, Clone, PartialEq)]
pub struct ContentType {
    pub type_ref: TypeRef,
    pub(crate) branch: Option<BranchPtr>,
}

impl ContentType {
    pub fn new(type_ref: TypeRef) -> Self {
        Self {
            type_ref,
            branch: None,
        }
    }
}

impl ItemContent {
    pub fn len(&self) -> u32 {
        match self {
            ItemContent::Deleted(len) => *len,
            ItemContent::Json(values) | ItemContent::Any(values) => values.len() as u32,
            ItemContent::String(s) => s.len(),
            ItemContent::Binary(_)
            | ItemContent::Embed(_)
            | ItemContent::Format(..)
            | ItemContent::Type(_)
            | ItemContent::Doc(_) => 1,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether the content occupies list index space.
    pub fn is_countable(&self) -> bool {
        !matches!(self, ItemContent::Deleted(_) | ItemContent::Format(..))
    }

    pub fn ref_number(&self) -> u8 {
        match self {
            ItemContent::Deleted(_) => CONTENT_DELETED,
            ItemContent::Json(_) => CONTENT_JSON,
            ItemContent::Binary(_) => CONTENT_BINARY,
            ItemContent::String(_) => CONTENT_STRING,
            ItemContent::Embed(_) => CONTENT_EMBED,
            ItemContent::Format(..) => CONTENT_FORMAT,
            ItemContent::Type(_) => CONTENT_TYPE,
            ItemContent::Any(_) => CONTENT_ANY,
            ItemContent::Doc(_) => CONTENT_DOC,
        }
    }

    /// Copy suitable for re-insertion. Nested containers are copied empty.
    pub(crate) fn copy(&self) -> ItemContent {
        match self {
            ItemContent::Type(t) => ItemContent::Type(ContentType::new(t.type_ref.clone())),
            other => other.clone(),
        }
    }

    /// The values visible through list access.
    pub fn get_content(&self) -> Vec<Out> {
        (0..self.len()).filter_map(|i| self.content_at(i)).collect()
    }

    pub fn content_at(&self, index: u32) -> Option<Out> {
        let i = index as usize;
        match self {
            ItemContent::Any(values) | ItemContent::Json(values) => {
                values.get(i).cloned().map(Out::Any)
            }
            ItemContent::Binary(buf) if i == 0 => Some(Out::Any(Any::Buffer(buf.clone().into()))),
            ItemContent::String(s) => s.unit_at(index).map(|s| Out::Any(Any::String(s.into()))),
            ItemContent::Embed(any) if i == 0 => Some(Out::Any(any.clone())),
            ItemContent::Type(t) if i == 0 => t.branch.map(Out::Branch),
            ItemContent::Doc(doc) if i == 0 => Some(Out::Doc(doc.clone())),
            _ => None,
        }
    }

    /// Splits the content at `offset`, keeping the left part in place and
    /// returning the right part.
    pub(crate) fn splice(&mut self, offset: u32) -> Result<ItemContent> {
        let at = offset as usize;
        Ok(match self {
            ItemContent::Deleted(len) => {
                let right = *len - offset;
                *len = offset;
                ItemContent::Deleted(right)
            }
            ItemContent::Json(values) => ItemContent::Json(values.split_off(at)),
            ItemContent::Any(values) => ItemContent::Any(values.split_off(at)),
            ItemContent::String(s) => ItemContent::String(s.split_off(offset)),
            _ => return Err(Error::UnexpectedCase("content of length 1 cannot be split")),
        })
    }

    /// Appends `right` to this content when both are of a kind whose runs
    /// concatenate.
    pub(crate) fn try_merge(&mut self, right: &ItemContent) -> bool {
        match (self, right) {
            (ItemContent::Any(l), ItemContent::Any(r)) | (ItemContent::Json(l), ItemContent::Json(r)) => {
                l.extend(r.iter().cloned());
                true
            }
            (ItemContent::String(l), ItemContent::String(r)) => {
                l.push_str(r);
                true
            }
            (ItemContent::Deleted(l), ItemContent::Deleted(r)) => {
                *l += *r;
                true
            }
            _ => false,
        }
    }

    /// Writes the content skipping its first `offset` units.
    pub(crate) fn encode<E: Encoder>(&self, e: &mut E, offset: u32) {
        let at = offset as usize;
        match self {
            ItemContent::Deleted(len) => e.write_len(len - offset),
            ItemContent::Json(values) => {
                e.write_len(values.len() as u32 - offset);
                for v in &values[at..] {
                    match v {
                        Any::Undefined => e.write_string("undefined"),
                        v => e.write_string(&v.to_json_string()),
                    }
                }
            }
            ItemContent::Binary(buf) => e.write_buf(buf),
            ItemContent::String(s) => {
                if offset == 0 {
                    e.write_string(s.as_str())
                } else {
                    e.write_string(&s.clone().split_off(offset).text)
                }
            }
            ItemContent::Embed(any) => e.write_json(any),
            ItemContent::Format(key, value) => {
                e.write_key(key);
                e.write_json(value);
            }
            ItemContent::Type(t) => t.type_ref.encode(e),
            ItemContent::Any(values) => {
                e.write_len(values.len() as u32 - offset);
                for v in &values[at..] {
                    e.write_any(v);
                }
            }
            ItemContent::Doc(doc) => {
                e.write_string(&doc.guid);
                e.write_any(&doc.opts);
            }
        }
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(d: &mut D, ref_number: u8) -> Result<ItemContent> {
        Ok(match ref_number {
            CONTENT_DELETED => ItemContent::Deleted(d.read_len()?),
            CONTENT_JSON => {
                let len = d.read_len()?;
                let mut values = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    let text = d.read_string()?;
                    if &*text == "undefined" {
                        values.push(Any::Undefined);
                    } else {
                        values.push(Any::from_json_str(&text)?);
                    }
                }
                ItemContent::Json(values)
            }
            CONTENT_BINARY => ItemContent::Binary(d.read_buf()?),
            CONTENT_STRING => ItemContent::String(ContentString::from(&*d.read_string()?)),
            CONTENT_EMBED => ItemContent::Embed(d.read_json()?),
            CONTENT_FORMAT => {
                let key = d.read_key()?;
                let value = d.read_json()?;
                ItemContent::Format(key, value)
            }
            CONTENT_TYPE => ItemContent::Type(ContentType::new(TypeRef::decode(d)?)),
            CONTENT_ANY => {
                let len = d.read_len()?;
                let mut values = Vec::with_capacity(len.min(1024) as usize);
                for _ in 0..len {
                    values.push(d.read_any()?);
                }
                ItemContent::Any(values)
            }
            CONTENT_DOC => {
                let guid = d.read_string()?;
                let opts = d.read_any()?;
                ItemContent::Doc(SubDoc::from_wire(guid, opts))
            }
            other => return Err(Error::UnknownContentRef(other)),
        })
    }
}

// ── ContentString ───────────────────────────────────────────────────────

/// A string run measured in UTF-16 code units.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ContentString {
    text: String,
    utf16_len: u32,
}

impl ContentString {
    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> u32 {
        self.utf16_len
    }

    pub fn is_empty(&self) -> bool {
        self.utf16_len == 0
    }

    fn push_str(&mut self, other: &ContentString) {
        self.text.push_str(&other.text);
        self.utf16_len += other.utf16_len;
    }

    /// The code unit at `index` as a string. A lone half of a surrogate pair
    /// is returned as U+FFFD.
    fn unit_at(&self, index: u32) -> Option<String> {
        let unit = self.text.encode_utf16().nth(index as usize)?;
        Some(String::from_utf16_lossy(&[unit]))
    }

    /// Splits at a UTF-16 offset. A split inside a surrogate pair replaces
    /// both orphaned halves with U+FFFD so lengths stay unchanged.
    pub(crate) fn split_off(&mut self, offset: u32) -> ContentString {
        let mut units = 0u32;
        let mut split = None;
        for (byte, ch) in self.text.char_indices() {
            if units == offset {
                split = Some((byte, false));
                break;
            }
            let width = ch.len_utf16() as u32;
            if units + width > offset {
                split = Some((byte, true));
                break;
            }
            units += width;
        }
        let right = match split {
            None => String::new(),
            Some((byte, false)) => self.text.split_off(byte),
            Some((byte, true)) => {
                let tail = self.text.split_off(byte);
                let mut chars = tail.chars();
                chars.next();
                self.text.push(REPLACEMENT);
                let mut right = String::with_capacity(tail.len());
                right.push(REPLACEMENT);
                right.push_str(chars.as_str());
                right
            }
        };
        let right_len = self.utf16_len - offset;
        self.utf16_len = offset;
        ContentString {
            text: right,
            utf16_len: right_len,
        }
    }
}

impl From<&str> for ContentString {
    fn from(text: &str) -> Self {
        Self {
            text: text.to_owned(),
            utf16_len: text.encode_utf16().count() as u32,
        }
    }
}

impl From<String> for ContentString {
    fn from(text: String) -> Self {
        let utf16_len = text.encode_utf16().count() as u32;
        Self { text, utf16_len }
    }
}
