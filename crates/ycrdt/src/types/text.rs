use std::sync::Arc;

use crate::any::Any;
use crate::branch::BranchPtr;
use crate::content::{ContentString, ItemContent};
use crate::error::{Error, Result};
use crate::transaction::{ReadTxn, TransactionMut};

use super::{list_delete, list_insert, text_content, SharedRef};

/// Handle to shared text. Indexes and lengths count UTF-16 code units.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TextRef(BranchPtr);

impl From<BranchPtr> for TextRef {
    fn from(branch: BranchPtr) -> Self {
        TextRef(branch)
    }
}

impl SharedRef for TextRef {
    fn branch(&self) -> BranchPtr {
        self.0
    }
}

impl TextRef {
    pub fn insert(&self, txn: &mut TransactionMut, index: u32, chunk: &str) -> Result<()> {
        if chunk.is_empty() {
            return Ok(());
        }
        let content = ItemContent::String(ContentString::from(chunk));
        list_insert(txn, self.0, index, vec![content])?;
        Ok(())
    }

    /// Appends `chunk` at the end.
    pub fn push(&self, txn: &mut TransactionMut, chunk: &str) -> Result<()> {
        let len = self.len(&*txn);
        self.insert(txn, len, chunk)
    }

    /// Inserts a single embedded value occupying one index.
    pub fn insert_embed(&self, txn: &mut TransactionMut, index: u32, value: impl Into<Any>) -> Result<()> {
        list_insert(txn, self.0, index, vec![ItemContent::Embed(value.into())])?;
        Ok(())
    }

    pub fn remove_range(&self, txn: &mut TransactionMut, index: u32, len: u32) -> Result<()> {
        list_delete(txn, self.0, index, len)
    }

    /// Marks `[index, index + len)` with attribute `key`. A `key: null`
    /// marker closes the range. Formatting is stored as markers only and
    /// does not show up in [`TextRef::get_string`].
    pub fn format(&self, txn: &mut TransactionMut, index: u32, len: u32, key: &str, value: impl Into<Any>) -> Result<()> {
        if len == 0 {
            return Ok(());
        }
        let total = self.len(&*txn);
        if index.checked_add(len).map_or(true, |end| end > total) {
            return Err(Error::IndexOutOfBounds { index: index.saturating_add(len), len: total });
        }
        let key: Arc<str> = Arc::from(key);
        list_insert(txn, self.0, index + len, vec![ItemContent::Format(key.clone(), Any::Null)])?;
        list_insert(txn, self.0, index, vec![ItemContent::Format(key, value.into())])?;
        Ok(())
    }

    pub fn get_string<T: ReadTxn>(&self, txn: &T) -> String {
        text_content(txn.store(), self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::doc::Doc;

    #[test]
    fn insert_push_remove() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(|txn| {
            text.insert(txn, 0, "held")?;
            text.insert(txn, 2, "l")?;
            text.push(txn, "o world")?;
            text.remove_range(txn, 5, 6)
        })
        .unwrap();
        assert_eq!(text.get_string(&doc), "hello");
        assert_eq!(text.len(&doc), 5);
    }

    #[test]
    fn lengths_count_utf16_units() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(|txn| text.insert(txn, 0, "a😀b")).unwrap();
        assert_eq!(text.len(&doc), 4);
        doc.transact_mut(|txn| text.remove_range(txn, 3, 1)).unwrap();
        assert_eq!(text.get_string(&doc), "a😀");
    }

    #[test]
    fn format_keeps_visible_text() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(|txn| {
            text.insert(txn, 0, "hello world")?;
            text.format(txn, 0, 5, "bold", true)?;
            text.insert(txn, 11, "!")
        })
        .unwrap();
        assert_eq!(text.get_string(&doc), "hello world!");
        assert_eq!(text.len(&doc), 12);
        // formatting markers are non-countable and drop the index cache
        assert!(doc.store.branch(text.branch()).markers.is_none());
    }

    #[test]
    fn embeds_occupy_one_index() {
        let mut doc = Doc::with_client_id(1);
        let text = doc.get_or_insert_text("t");
        doc.transact_mut(|txn| {
            text.insert(txn, 0, "ab")?;
            text.insert_embed(txn, 1, "img")
        })
        .unwrap();
        assert_eq!(text.len(&doc), 3);
        assert_eq!(text.get_string(&doc), "ab");
    }
}
