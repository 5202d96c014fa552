//! Shared container handles and the list/map primitives they are built on.

mod array;
mod map;
mod text;

pub use array::ArrayRef;
pub use map::MapRef;
pub use text::TextRef;

use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;

use crate::any::Any;
use crate::block::{Item, ItemPtr};
use crate::branch::{find_marker, update_marker_changes, BranchPtr, TypePtr, TypeRef};
use crate::content::{ContentType, ItemContent};
use crate::doc::SubDoc;
use crate::error::{Error, Result};
use crate::event::Event;
use crate::id::ID;
use crate::observer::SubscriptionId;
use crate::store::Store;
use crate::transaction::{ReadTxn, TransactionMut, WriteTxn};

// ── Values ──────────────────────────────────────────────────────────────

/// A value read out of a container.
#[derive(Debug, Clone, PartialEq)]
pub enum Out {
    Any(Any),
    Branch(BranchPtr),
    Doc(SubDoc),
}

impl Out {
    pub fn to_json<T: ReadTxn>(&self, txn: &T) -> Value {
        out_to_json(txn.store(), self)
    }

    pub fn as_any(&self) -> Option<&Any> {
        match self {
            Out::Any(any) => Some(any),
            _ => None,
        }
    }

    pub fn as_branch(&self) -> Option<BranchPtr> {
        match self {
            Out::Branch(b) => Some(*b),
            _ => None,
        }
    }

    pub fn to_array(&self) -> Option<ArrayRef> {
        self.as_branch().map(ArrayRef::from)
    }

    pub fn to_map(&self) -> Option<MapRef> {
        self.as_branch().map(MapRef::from)
    }

    pub fn to_text(&self) -> Option<TextRef> {
        self.as_branch().map(TextRef::from)
    }
}

impl From<Any> for Out {
    fn from(value: Any) -> Self {
        Out::Any(value)
    }
}

/// A value to be written into a container.
#[derive(Debug, Clone, PartialEq)]
pub enum In {
    Any(Any),
    /// A new, empty nested container of the given kind.
    Type(TypeRef),
    Doc(SubDoc),
}

impl From<Any> for In {
    fn from(value: Any) -> Self {
        In::Any(value)
    }
}

impl From<TypeRef> for In {
    fn from(value: TypeRef) -> Self {
        In::Type(value)
    }
}

impl From<SubDoc> for In {
    fn from(value: SubDoc) -> Self {
        In::Doc(value)
    }
}

macro_rules! in_from_any {
    ($($t:ty),*) => {
        $(impl From<$t> for In {
            fn from(value: $t) -> Self {
                In::Any(Any::from(value))
            }
        })*
    };
}

in_from_any!(bool, f64, f32, i32, u32, i64, &str, String, Vec<u8>, Vec<Any>, Value);

// ── Handles ─────────────────────────────────────────────────────────────

/// Capability shared by every container handle.
pub trait SharedRef: From<BranchPtr> {
    fn branch(&self) -> BranchPtr;

    /// Number of visible list units.
    fn len<T: ReadTxn>(&self, txn: &T) -> u32 {
        txn.store().branch(self.branch()).len()
    }

    fn is_empty<T: ReadTxn>(&self, txn: &T) -> bool {
        self.len(txn) == 0
    }

    /// Id of the item owning this container, `None` for roots.
    fn item_id<T: ReadTxn>(&self, txn: &T) -> Option<ID> {
        let store = txn.store();
        store.branch(self.branch()).item.map(|i| store.item(i).id())
    }

    fn to_json<T: ReadTxn>(&self, txn: &T) -> Value {
        branch_to_json(txn.store(), self.branch())
    }

    /// Subscribes to changes of this container.
    fn observe<W: WriteTxn, F>(&self, txn: &mut W, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &Event) + 'static,
    {
        txn.store_mut().branch_mut(self.branch()).observers.subscribe(f)
    }

    fn unobserve<W: WriteTxn>(&self, txn: &mut W, id: SubscriptionId) -> bool {
        txn.store_mut().branch_mut(self.branch()).observers.unsubscribe(id)
    }

    /// Subscribes to changes of this container and everything nested in
    /// it. Events arrive batched per transaction, shallowest first.
    fn observe_deep<W: WriteTxn, F>(&self, txn: &mut W, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &[Event]) + 'static,
    {
        txn.store_mut().branch_mut(self.branch()).deep_observers.subscribe(f)
    }

    fn unobserve_deep<W: WriteTxn>(&self, txn: &mut W, id: SubscriptionId) -> bool {
        txn.store_mut().branch_mut(self.branch()).deep_observers.unsubscribe(id)
    }
}

// ── JSON view ───────────────────────────────────────────────────────────

pub(crate) fn out_to_json(store: &Store, out: &Out) -> Value {
    match out {
        Out::Any(any) => any.to_json(),
        Out::Branch(b) => branch_to_json(store, *b),
        Out::Doc(doc) => Value::String(doc.guid.to_string()),
    }
}

pub(crate) fn branch_to_json(store: &Store, branch: BranchPtr) -> Value {
    let b = store.branch(branch);
    match b.type_ref() {
        TypeRef::Map => map_to_json(store, branch),
        TypeRef::Text | TypeRef::XmlText => Value::String(text_content(store, branch)),
        TypeRef::Undefined if !b.map.is_empty() => map_to_json(store, branch),
        _ => Value::Array(
            list_values(store, branch)
                .iter()
                .map(|v| out_to_json(store, v))
                .collect(),
        ),
    }
}

fn map_to_json(store: &Store, branch: BranchPtr) -> Value {
    let entries: BTreeMap<String, Value> = map_entries(store, branch)
        .into_iter()
        .map(|(k, v)| (k.to_string(), out_to_json(store, &v)))
        .collect();
    Value::Object(entries.into_iter().collect())
}

// ── List primitives ─────────────────────────────────────────────────────

/// Visible values of a container's list content.
pub(crate) fn list_values(store: &Store, branch: BranchPtr) -> Vec<Out> {
    let mut values = Vec::new();
    let mut cur = store.branch(branch).start;
    while let Some(ptr) = cur {
        let item = store.item(ptr);
        if item.is_visible_countable() {
            values.extend(item.content.get_content());
        }
        cur = item.right;
    }
    values
}

/// Concatenated visible string content.
pub(crate) fn text_content(store: &Store, branch: BranchPtr) -> String {
    let mut text = String::new();
    let mut cur = store.branch(branch).start;
    while let Some(ptr) = cur {
        let item = store.item(ptr);
        if let (false, ItemContent::String(s)) = (item.is_deleted(), &item.content) {
            text.push_str(s.as_str());
        }
        cur = item.right;
    }
    text
}

pub(crate) fn list_get(store: &Store, branch: BranchPtr, index: u32) -> Option<Out> {
    let (mut cur, mut index) = match find_marker(store, branch, index) {
        Some((ptr, marker_index)) => (Some(ptr), index.saturating_sub(marker_index)),
        None => (store.branch(branch).start, index),
    };
    while let Some(ptr) = cur {
        let item = store.item(ptr);
        if item.is_visible_countable() {
            if index < item.len {
                return item.content.content_at(index);
            }
            index -= item.len;
        }
        cur = item.right;
    }
    None
}

/// Converts values into item contents, packing runs of plain values into
/// one content. Buffers, nested containers and documents stand alone.
pub(crate) fn pack_contents(values: Vec<In>) -> Result<Vec<ItemContent>> {
    let mut contents = Vec::new();
    let mut run: Vec<Any> = Vec::new();
    for value in values {
        match value {
            In::Any(Any::Undefined) => {
                return Err(Error::UnsupportedContent("undefined cannot be inserted into a list"))
            }
            In::Any(Any::Buffer(buf)) => {
                if !run.is_empty() {
                    contents.push(ItemContent::Any(std::mem::take(&mut run)));
                }
                contents.push(ItemContent::Binary(buf.to_vec()));
            }
            In::Any(any) => run.push(any),
            In::Type(type_ref) => {
                if !run.is_empty() {
                    contents.push(ItemContent::Any(std::mem::take(&mut run)));
                }
                contents.push(ItemContent::Type(ContentType::new(type_ref)));
            }
            In::Doc(doc) => {
                if !run.is_empty() {
                    contents.push(ItemContent::Any(std::mem::take(&mut run)));
                }
                contents.push(ItemContent::Doc(doc));
            }
        }
    }
    if !run.is_empty() {
        contents.push(ItemContent::Any(run));
    }
    Ok(contents)
}

/// Inserts `contents` after `left` (at the head when `None`). Every new
/// item keeps the same right neighbour. Returns the last item created.
pub(crate) fn list_insert_after(
    txn: &mut TransactionMut,
    branch: BranchPtr,
    left: Option<ItemPtr>,
    contents: Vec<ItemContent>,
) -> Result<Option<ItemPtr>> {
    let store = &txn.doc.store;
    let right = match left {
        Some(l) => store.item(l).right,
        None => store.branch(branch).start,
    };
    let right_origin = right.map(|r| store.item(r).id());
    let mut left = left;
    for content in contents {
        let store = &txn.doc.store;
        let origin = left.map(|l| store.item(l).last_id());
        let item = Item::new(
            txn.next_id(),
            left,
            origin,
            right,
            right_origin,
            TypePtr::Branch(branch),
            None,
            content,
        );
        left = txn.integrate_item(item, 0)?;
    }
    Ok(left)
}

/// Inserts `contents` so the first one lands at list `index`.
pub(crate) fn list_insert(
    txn: &mut TransactionMut,
    branch: BranchPtr,
    index: u32,
    contents: Vec<ItemContent>,
) -> Result<Option<ItemPtr>> {
    let len = txn.doc.store.branch(branch).len();
    if index > len {
        return Err(Error::IndexOutOfBounds { index, len });
    }
    let inserted: u32 = contents
        .iter()
        .filter(|c| c.is_countable())
        .map(ItemContent::len)
        .sum();
    if index == 0 {
        update_marker_changes(&txn.doc.store, branch, index, inserted as i64);
        return list_insert_after(txn, branch, None, contents);
    }

    let store = &txn.doc.store;
    let (mut cur, mut rem) = match find_marker(store, branch, index) {
        // the marker item starts exactly at `index`: insert after the
        // nearest live item on its left
        Some((ptr, marker_index)) if marker_index >= index => {
            let mut left = store.item(ptr).left;
            while let Some(l) = left.filter(|l| store.item(*l).is_deleted()) {
                left = store.item(l).left;
            }
            (left, 0)
        }
        Some((ptr, marker_index)) => (Some(ptr), index.saturating_sub(marker_index)),
        None => (store.branch(branch).start, index),
    };
    while rem > 0 {
        let Some(ptr) = cur else {
            break;
        };
        let item = txn.doc.store.item(ptr);
        if item.is_visible_countable() {
            if rem <= item.len {
                if rem < item.len {
                    let id = ID::new(item.id().client, item.id().clock + rem);
                    txn.get_item_clean_start(id)?;
                }
                break;
            }
            rem -= item.len;
        }
        cur = item.right;
    }
    update_marker_changes(&txn.doc.store, branch, index, inserted as i64);
    list_insert_after(txn, branch, cur, contents)
}

/// Deletes `len` visible units starting at `index`.
pub(crate) fn list_delete(txn: &mut TransactionMut, branch: BranchPtr, index: u32, len: u32) -> Result<()> {
    if len == 0 {
        return Ok(());
    }
    let total = txn.doc.store.branch(branch).len();
    if index.checked_add(len).map_or(true, |end| end > total) {
        return Err(Error::IndexOutOfBounds { index: index.saturating_add(len), len: total });
    }
    let store = &txn.doc.store;
    let (mut cur, mut rem) = match find_marker(store, branch, index) {
        Some((ptr, marker_index)) => (Some(ptr), index.saturating_sub(marker_index)),
        None => (store.branch(branch).start, index),
    };
    // advance to the first unit to delete
    while let Some(ptr) = cur {
        if rem == 0 {
            break;
        }
        let item = txn.doc.store.item(ptr);
        if item.is_visible_countable() {
            if rem < item.len {
                let id = ID::new(item.id().client, item.id().clock + rem);
                txn.get_item_clean_start(id)?;
            }
            let item = txn.doc.store.item(ptr);
            rem -= rem.min(item.len);
        }
        cur = txn.doc.store.item(ptr).right;
    }
    let mut remaining = len;
    while remaining > 0 {
        let Some(ptr) = cur else {
            break;
        };
        let item = txn.doc.store.item(ptr);
        if item.is_visible_countable() {
            if remaining < item.len {
                let id = ID::new(item.id().client, item.id().clock + remaining);
                txn.get_item_clean_start(id)?;
            }
            let item_len = txn.doc.store.item(ptr).len;
            txn.delete_item(ptr);
            remaining -= item_len;
        }
        cur = txn.doc.store.item(ptr).right;
    }
    update_marker_changes(&txn.doc.store, branch, index, -(len as i64));
    Ok(())
}

// ── Map primitives ──────────────────────────────────────────────────────

fn map_content(value: In) -> ItemContent {
    match value {
        In::Any(Any::Buffer(buf)) => ItemContent::Binary(buf.to_vec()),
        In::Any(any) => ItemContent::Any(vec![any]),
        In::Type(type_ref) => ItemContent::Type(ContentType::new(type_ref)),
        In::Doc(doc) => ItemContent::Doc(doc),
    }
}

/// Writes a new entry for `key`. The previous entry stays in history,
/// deleted.
pub(crate) fn map_set(txn: &mut TransactionMut, branch: BranchPtr, key: &str, value: In) -> Result<Option<ItemPtr>> {
    let store = &txn.doc.store;
    let left = store.branch(branch).map.get(key).copied();
    let origin = left.map(|l| store.item(l).last_id());
    let item = Item::new(
        txn.next_id(),
        left,
        origin,
        None,
        None,
        TypePtr::Branch(branch),
        Some(Arc::from(key)),
        map_content(value),
    );
    txn.integrate_item(item, 0)
}

pub(crate) fn map_get(store: &Store, branch: BranchPtr, key: &str) -> Option<Out> {
    let ptr = *store.branch(branch).map.get(key)?;
    let item = store.item(ptr);
    if item.is_deleted() {
        return None;
    }
    item.content.content_at(item.len - 1)
}

/// Deletes the entry for `key`. Returns whether a live entry existed.
pub(crate) fn map_delete(txn: &mut TransactionMut, branch: BranchPtr, key: &str) -> bool {
    match txn.doc.store.branch(branch).map.get(key).copied() {
        Some(ptr) => txn.delete_item(ptr),
        None => false,
    }
}

/// Live entries in key order.
pub(crate) fn map_entries(store: &Store, branch: BranchPtr) -> Vec<(Arc<str>, Out)> {
    let mut entries: Vec<_> = store
        .branch(branch)
        .map
        .iter()
        .filter_map(|(key, &ptr)| {
            let item = store.item(ptr);
            if item.is_deleted() {
                return None;
            }
            let value = item.content.content_at(item.len - 1)?;
            Some((key.clone(), value))
        })
        .collect();
    entries.sort_by(|a, b| a.0.cmp(&b.0));
    entries
}

/// Branch created for the nested container held by `ptr`.
pub(crate) fn nested_branch(store: &Store, ptr: Option<ItemPtr>) -> Result<BranchPtr> {
    let ptr = ptr.ok_or(Error::UnexpectedCase("nested container was not integrated"))?;
    match &store.item(ptr).content {
        ItemContent::Type(t) => t.branch.ok_or(Error::UnexpectedCase("nested container without branch")),
        _ => Err(Error::UnexpectedCase("item does not hold a container")),
    }
}
