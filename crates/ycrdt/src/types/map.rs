use std::sync::Arc;

use crate::branch::{BranchPtr, TypeRef};
use crate::error::Result;
use crate::transaction::{ReadTxn, TransactionMut};

use super::{map_delete, map_entries, map_get, map_set, nested_branch, ArrayRef, In, Out, SharedRef, TextRef};

/// Handle to a shared key/value container. Concurrent writes to the same
/// key resolve to the write of the higher client id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MapRef(BranchPtr);

impl From<BranchPtr> for MapRef {
    fn from(branch: BranchPtr) -> Self {
        MapRef(branch)
    }
}

impl SharedRef for MapRef {
    fn branch(&self) -> BranchPtr {
        self.0
    }

    /// Number of live entries.
    fn len<T: ReadTxn>(&self, txn: &T) -> u32 {
        map_entries(txn.store(), self.0).len() as u32
    }
}

impl MapRef {
    pub fn insert(&self, txn: &mut TransactionMut, key: &str, value: impl Into<In>) -> Result<()> {
        map_set(txn, self.0, key, value.into())?;
        Ok(())
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, key: &str) -> Option<Out> {
        map_get(txn.store(), self.0, key)
    }

    /// Removes the entry, returning whether a live one existed.
    pub fn remove(&self, txn: &mut TransactionMut, key: &str) -> bool {
        map_delete(txn, self.0, key)
    }

    pub fn contains_key<T: ReadTxn>(&self, txn: &T, key: &str) -> bool {
        self.get(txn, key).is_some()
    }

    /// Live keys in sorted order.
    pub fn keys<T: ReadTxn>(&self, txn: &T) -> Vec<Arc<str>> {
        map_entries(txn.store(), self.0).into_iter().map(|(k, _)| k).collect()
    }

    /// Live entries in key order.
    pub fn iter<T: ReadTxn>(&self, txn: &T) -> impl Iterator<Item = (Arc<str>, Out)> {
        map_entries(txn.store(), self.0).into_iter()
    }

    pub fn insert_array(&self, txn: &mut TransactionMut, key: &str) -> Result<ArrayRef> {
        let ptr = map_set(txn, self.0, key, In::Type(TypeRef::Array))?;
        nested_branch(&txn.doc.store, ptr).map(ArrayRef::from)
    }

    pub fn insert_map(&self, txn: &mut TransactionMut, key: &str) -> Result<MapRef> {
        let ptr = map_set(txn, self.0, key, In::Type(TypeRef::Map))?;
        nested_branch(&txn.doc.store, ptr).map(MapRef::from)
    }

    pub fn insert_text(&self, txn: &mut TransactionMut, key: &str) -> Result<TextRef> {
        let ptr = map_set(txn, self.0, key, In::Type(TypeRef::Text))?;
        nested_branch(&txn.doc.store, ptr).map(TextRef::from)
    }
}
