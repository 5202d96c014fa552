use crate::branch::{BranchPtr, TypeRef};
use crate::error::Result;
use crate::transaction::{ReadTxn, TransactionMut};

use super::{list_delete, list_get, list_insert, list_values, nested_branch, pack_contents, In, MapRef, Out, SharedRef, TextRef};

/// Handle to a shared sequence of values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ArrayRef(BranchPtr);

impl From<BranchPtr> for ArrayRef {
    fn from(branch: BranchPtr) -> Self {
        ArrayRef(branch)
    }
}

impl SharedRef for ArrayRef {
    fn branch(&self) -> BranchPtr {
        self.0
    }
}

impl ArrayRef {
    pub fn insert(&self, txn: &mut TransactionMut, index: u32, value: impl Into<In>) -> Result<()> {
        self.insert_range(txn, index, vec![value.into()])
    }

    /// Inserts `values` so the first one lands at `index`. Consecutive
    /// plain values are stored in a single item.
    pub fn insert_range<V: Into<In>>(
        &self,
        txn: &mut TransactionMut,
        index: u32,
        values: impl IntoIterator<Item = V>,
    ) -> Result<()> {
        let contents = pack_contents(values.into_iter().map(Into::into).collect())?;
        list_insert(txn, self.0, index, contents)?;
        Ok(())
    }

    pub fn push_back(&self, txn: &mut TransactionMut, value: impl Into<In>) -> Result<()> {
        let len = self.len(&*txn);
        self.insert(txn, len, value)
    }

    pub fn push_front(&self, txn: &mut TransactionMut, value: impl Into<In>) -> Result<()> {
        self.insert(txn, 0, value)
    }

    pub fn remove(&self, txn: &mut TransactionMut, index: u32) -> Result<()> {
        self.remove_range(txn, index, 1)
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) -> Result<()> {
        list_delete(txn, self.0, index, len)
    }

    pub fn get<T: ReadTxn>(&self, txn: &T, index: u32) -> Option<Out> {
        list_get(txn.store(), self.0, index)
    }

    /// All visible values in order.
    pub fn iter<T: ReadTxn>(&self, txn: &T) -> impl Iterator<Item = Out> {
        list_values(txn.store(), self.0).into_iter()
    }

    pub fn insert_array(&self, txn: &mut TransactionMut, index: u32) -> Result<ArrayRef> {
        let ptr = list_insert(txn, self.0, index, pack_contents(vec![In::Type(TypeRef::Array)])?)?;
        nested_branch(&txn.doc.store, ptr).map(ArrayRef::from)
    }

    pub fn insert_map(&self, txn: &mut TransactionMut, index: u32) -> Result<MapRef> {
        let ptr = list_insert(txn, self.0, index, pack_contents(vec![In::Type(TypeRef::Map)])?)?;
        nested_branch(&txn.doc.store, ptr).map(MapRef::from)
    }

    pub fn insert_text(&self, txn: &mut TransactionMut, index: u32) -> Result<TextRef> {
        let ptr = list_insert(txn, self.0, index, pack_contents(vec![In::Type(TypeRef::Text)])?)?;
        nested_branch(&txn.doc.store, ptr).map(TextRef::from)
    }
}
