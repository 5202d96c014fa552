//! Structural log entries: items, GC tombstones and the skip placeholders
//! of partial updates, plus the YATA integration algorithm.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

use crate::branch::{Branch, BranchPtr, TypePtr, TypeRef};
use crate::content::{ItemContent, BLOCK_GC, BLOCK_SKIP};
use crate::delete_set::DeleteSet;
use crate::encoding::Encoder;
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::store::Store;
use crate::transaction::TransactionMut;

pub(crate) const ITEM_FLAG_KEEP: u8 = 0b0001;
pub(crate) const ITEM_FLAG_COUNTABLE: u8 = 0b0010;
pub(crate) const ITEM_FLAG_DELETED: u8 = 0b0100;

pub(crate) const HAS_ORIGIN: u8 = 0b1000_0000;
pub(crate) const HAS_RIGHT_ORIGIN: u8 = 0b0100_0000;
pub(crate) const HAS_PARENT_SUB: u8 = 0b0010_0000;

/// Index of an item in the store's arena. Slots are never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ItemPtr(pub(crate) u32);

impl ItemPtr {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

/// A contiguous clock range of one replica: the extent of a GC tombstone or
/// of a skip placeholder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockRange {
    pub id: ID,
    pub len: u32,
}

impl BlockRange {
    pub const fn new(id: ID, len: u32) -> Self {
        Self { id, len }
    }
}

/// Entry of a replica's block list in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Block {
    Item(ItemPtr),
    GC(BlockRange),
}

// ── Item ────────────────────────────────────────────────────────────────

/// A structural node carrying content and its position in a container.
#[derive(Clone, PartialEq)]
pub struct Item {
    pub(crate) id: ID,
    pub(crate) len: u32,
    /// Live left neighbour.
    pub(crate) left: Option<ItemPtr>,
    /// Live right neighbour.
    pub(crate) right: Option<ItemPtr>,
    /// Last id of the left neighbour at creation time.
    pub(crate) origin: Option<ID>,
    /// Id of the right neighbour at creation time.
    pub(crate) right_origin: Option<ID>,
    pub(crate) parent: TypePtr,
    /// Map key; `None` for list content.
    pub(crate) parent_sub: Option<Arc<str>>,
    pub(crate) redone: Option<ID>,
    pub(crate) content: ItemContent,
    pub(crate) info: u8,
}

impl Item {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        id: ID,
        left: Option<ItemPtr>,
        origin: Option<ID>,
        right: Option<ItemPtr>,
        right_origin: Option<ID>,
        parent: TypePtr,
        parent_sub: Option<Arc<str>>,
        content: ItemContent,
    ) -> Self {
        let info = if content.is_countable() {
            ITEM_FLAG_COUNTABLE
        } else {
            0
        };
        Self {
            id,
            len: content.len(),
            left,
            right,
            origin,
            right_origin,
            parent,
            parent_sub,
            redone: None,
            content,
            info,
        }
    }

    pub fn id(&self) -> ID {
        self.id
    }

    pub fn len(&self) -> u32 {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn content(&self) -> &ItemContent {
        &self.content
    }

    pub fn parent_sub(&self) -> Option<&str> {
        self.parent_sub.as_deref()
    }

    /// Id of the last unit covered by this item.
    pub fn last_id(&self) -> ID {
        ID::new(self.id.client, self.id.clock + self.len - 1)
    }

    pub fn is_deleted(&self) -> bool {
        self.info & ITEM_FLAG_DELETED != 0
    }

    pub fn is_countable(&self) -> bool {
        self.info & ITEM_FLAG_COUNTABLE != 0
    }

    pub fn is_keep(&self) -> bool {
        self.info & ITEM_FLAG_KEEP != 0
    }

    pub(crate) fn is_visible_countable(&self) -> bool {
        self.info & (ITEM_FLAG_COUNTABLE | ITEM_FLAG_DELETED) == ITEM_FLAG_COUNTABLE
    }

    pub(crate) fn mark_deleted(&mut self) {
        self.info |= ITEM_FLAG_DELETED;
    }

    pub(crate) fn set_keep(&mut self, keep: bool) {
        if keep {
            self.info |= ITEM_FLAG_KEEP;
        } else {
            self.info &= !ITEM_FLAG_KEEP;
        }
    }

    pub(crate) fn parent_branch(&self) -> Option<BranchPtr> {
        match self.parent {
            TypePtr::Branch(b) => Some(b),
            _ => None,
        }
    }

    /// Cuts this decoded item at `diff`, keeping the left part in place and
    /// returning the right part, whose origin becomes the left part's end.
    pub(crate) fn split_off(&mut self, diff: u32) -> Result<Item> {
        let content = self.content.splice(diff)?;
        let mut right = Item::new(
            ID::new(self.id.client, self.id.clock + diff),
            None,
            Some(ID::new(self.id.client, self.id.clock + diff - 1)),
            None,
            self.right_origin,
            self.parent.clone(),
            self.parent_sub.clone(),
            content,
        );
        right.info = self.info;
        self.len = diff;
        Ok(right)
    }

    /// Writes the item skipping its first `offset` units. `store` resolves
    /// the parent of integrated items.
    pub(crate) fn encode<E: Encoder>(&self, e: &mut E, offset: u32, store: Option<&Store>) {
        let origin = if offset > 0 {
            Some(ID::new(self.id.client, self.id.clock + offset - 1))
        } else {
            self.origin
        };
        let mut info = self.content.ref_number() & 0b1_1111;
        if origin.is_some() {
            info |= HAS_ORIGIN;
        }
        if self.right_origin.is_some() {
            info |= HAS_RIGHT_ORIGIN;
        }
        if self.parent_sub.is_some() {
            info |= HAS_PARENT_SUB;
        }
        e.write_info(info);
        if let Some(id) = &origin {
            e.write_left_id(id);
        }
        if let Some(id) = &self.right_origin {
            e.write_right_id(id);
        }
        if origin.is_none() && self.right_origin.is_none() {
            let parent = match (&self.parent, store) {
                (TypePtr::Branch(b), Some(store)) => store.parent_ref(*b),
                (other, _) => other.clone(),
            };
            match parent {
                TypePtr::Named(name) => {
                    e.write_parent_info(true);
                    e.write_string(&name);
                }
                TypePtr::ID(id) => {
                    e.write_parent_info(false);
                    e.write_left_id(&id);
                }
                TypePtr::Branch(_) | TypePtr::Unknown => {
                    debug_assert!(false, "item without origins must have a parent");
                    e.write_parent_info(true);
                    e.write_string("");
                }
            }
            if let Some(sub) = &self.parent_sub {
                e.write_string(sub);
            }
        }
        self.content.encode(e, offset);
    }
}

impl fmt::Debug for Item {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut s = f.debug_struct("Item");
        s.field("id", &self.id).field("len", &self.len);
        if let Some(origin) = &self.origin {
            s.field("origin", origin);
        }
        if let Some(right_origin) = &self.right_origin {
            s.field("right_origin", right_origin);
        }
        if let Some(sub) = &self.parent_sub {
            s.field("parent_sub", sub);
        }
        s.field("deleted", &self.is_deleted())
            .field("content", &self.content)
            .finish()
    }
}

// ── Decoded blocks ──────────────────────────────────────────────────────

/// A block decoded from an update, not yet part of any store.
#[derive(Debug, Clone, PartialEq)]
pub enum BlockCarrier {
    Item(Box<Item>),
    GC(BlockRange),
    Skip(BlockRange),
}

impl BlockCarrier {
    pub fn id(&self) -> ID {
        match self {
            BlockCarrier::Item(item) => item.id,
            BlockCarrier::GC(r) | BlockCarrier::Skip(r) => r.id,
        }
    }

    pub fn len(&self) -> u32 {
        match self {
            BlockCarrier::Item(item) => item.len,
            BlockCarrier::GC(r) | BlockCarrier::Skip(r) => r.len,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, BlockCarrier::Skip(_))
    }

    pub(crate) fn end(&self) -> u32 {
        self.id().clock + self.len()
    }

    /// Drops the first `diff` units.
    pub(crate) fn trim_start(&mut self, diff: u32) -> Result<()> {
        if diff == 0 {
            return Ok(());
        }
        match self {
            BlockCarrier::Item(item) => {
                let right = item.split_off(diff)?;
                **item = right;
            }
            BlockCarrier::GC(r) | BlockCarrier::Skip(r) => {
                r.id.clock += diff;
                r.len -= diff;
            }
        }
        Ok(())
    }

    /// Appends an adjacent block of the same kind when the pair can be
    /// expressed as one.
    pub(crate) fn try_merge(&mut self, right: &BlockCarrier) -> bool {
        if self.end() != right.id().clock || self.id().client != right.id().client {
            return false;
        }
        match (self, right) {
            (BlockCarrier::GC(l), BlockCarrier::GC(r)) | (BlockCarrier::Skip(l), BlockCarrier::Skip(r)) => {
                l.len += r.len;
                true
            }
            (BlockCarrier::Item(l), BlockCarrier::Item(r)) => {
                let mergeable = r.origin == Some(l.last_id())
                    && l.right_origin == r.right_origin
                    && l.is_deleted() == r.is_deleted()
                    && l.redone.is_none()
                    && r.redone.is_none();
                if mergeable && l.content.try_merge(&r.content) {
                    l.len += r.len;
                    true
                } else {
                    false
                }
            }
            _ => false,
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, e: &mut E, offset: u32) {
        match self {
            BlockCarrier::Item(item) => item.encode(e, offset, None),
            BlockCarrier::GC(r) => {
                e.write_info(BLOCK_GC);
                e.write_len(r.len - offset);
            }
            BlockCarrier::Skip(r) => {
                e.write_info(BLOCK_SKIP);
                e.rest().var_uint((r.len - offset) as u64);
            }
        }
    }
}

// ── Integration ─────────────────────────────────────────────────────────

impl<'doc> TransactionMut<'doc> {
    /// Checks that every causal dependency of a decoded item is present.
    /// Returns the replica whose history is missing, or resolves the item's
    /// neighbours and parent into live references and returns `None`.
    pub(crate) fn get_missing(&mut self, item: &mut Item) -> Result<Option<ClientID>> {
        let store = &self.doc.store;
        for dep in [item.origin, item.right_origin].into_iter().flatten() {
            if dep.client != item.id.client && dep.clock >= store.get_state(&dep.client) {
                return Ok(Some(dep.client));
            }
        }
        if let TypePtr::ID(parent) = &item.parent {
            if parent.client != item.id.client && parent.clock >= store.get_state(&parent.client) {
                return Ok(Some(parent.client));
            }
        }

        let mut orphan = false;
        if let Some(origin) = item.origin {
            match self.get_item_clean_end(origin)? {
                Block::Item(ptr) => {
                    item.left = Some(ptr);
                    item.origin = Some(self.doc.store.item(ptr).last_id());
                }
                Block::GC(_) => orphan = true,
            }
        }
        if let Some(right_origin) = item.right_origin {
            match self.get_item_clean_start(right_origin)? {
                Block::Item(ptr) => {
                    item.right = Some(ptr);
                    item.right_origin = Some(self.doc.store.item(ptr).id);
                }
                Block::GC(_) => orphan = true,
            }
        }
        let store = &mut self.doc.store;
        if orphan {
            item.parent = TypePtr::Unknown;
            return Ok(None);
        }
        match item.parent.clone() {
            TypePtr::Unknown => {
                let neighbour = item.left.or(item.right);
                if let Some(n) = neighbour {
                    let n = store.item(n);
                    item.parent = n.parent.clone();
                    item.parent_sub = n.parent_sub.clone();
                }
            }
            TypePtr::ID(parent_id) => {
                item.parent = match store.find_block(&parent_id) {
                    Some(Block::Item(ptr)) => match &store.item(ptr).content {
                        ItemContent::Type(t) => t.branch.map_or(TypePtr::Unknown, TypePtr::Branch),
                        _ => TypePtr::Unknown,
                    },
                    _ => TypePtr::Unknown,
                };
            }
            TypePtr::Named(name) => {
                item.parent = TypePtr::Branch(store.get_or_create_root(&name, TypeRef::Undefined));
            }
            TypePtr::Branch(_) => {}
        }
        Ok(None)
    }

    /// Places `item` among its concurrently inserted siblings, links it
    /// into its container and registers it in the store. `offset` skips the
    /// units this replica already knows.
    pub(crate) fn integrate_item(&mut self, mut item: Item, offset: u32) -> Result<Option<ItemPtr>> {
        if offset > 0 {
            item.id.clock += offset;
            let left_id = ID::new(item.id.client, item.id.clock - 1);
            match self.get_item_clean_end(left_id)? {
                Block::Item(ptr) => {
                    item.left = Some(ptr);
                    item.origin = Some(self.doc.store.item(ptr).last_id());
                }
                Block::GC(_) => {
                    item.left = None;
                    item.parent = TypePtr::Unknown;
                }
            }
            item.content = item.content.splice(offset)?;
            item.len -= offset;
        }
        let store = &self.doc.store;
        if store.get_state(&item.id.client) != item.id.clock {
            return Err(Error::UnexpectedCase("block list is not contiguous"));
        }
        let Some(parent) = item.parent_branch() else {
            self.integrate_gc(BlockRange::new(item.id, item.len))?;
            return Ok(None);
        };

        let needs_scan = match item.left {
            None => item.right.map_or(true, |r| store.item(r).left.is_some()),
            Some(l) => store.item(l).right != item.right,
        };
        if needs_scan {
            item.left = resolve_conflicts(store, &item, parent);
        }

        let store = &mut self.doc.store;
        let left = item.left;
        let parent_sub = item.parent_sub.clone();
        let ptr = store.alloc_item(item);
        let right = match left {
            Some(l) => {
                let right = store.item(l).right;
                store.item_mut(l).right = Some(ptr);
                right
            }
            None => match &parent_sub {
                Some(key) => leftmost_entry(store, store.branch(parent), key),
                None => {
                    let branch = store.branch_mut(parent);
                    branch.start.replace(ptr)
                }
            },
        };
        store.item_mut(ptr).right = right;
        let mut displaced = None;
        match (right, &parent_sub) {
            (Some(r), _) => store.item_mut(r).left = Some(ptr),
            (None, Some(key)) => {
                store.branch_mut(parent).map.insert(key.clone(), ptr);
                displaced = left;
            }
            (None, None) => {}
        }
        if let Some(prev) = displaced {
            self.delete_item(prev);
        }

        let store = &mut self.doc.store;
        let item = store.item(ptr);
        let (id, len) = (item.id, item.len);
        if parent_sub.is_none() && item.is_visible_countable() {
            store.branch_mut(parent).block_len += len;
        }
        store.push_block(id.client, Block::Item(ptr))?;
        if !self.state.local {
            // remote insertions do not maintain marker indexes
            store.branch(parent).clear_markers();
        }
        self.integrate_content(ptr, parent);
        self.add_changed_type(parent, parent_sub.clone());

        let store = &self.doc.store;
        let parent_deleted = store
            .branch(parent)
            .item
            .is_some_and(|p| store.item(p).is_deleted());
        let lost_map_race = parent_sub.is_some() && store.item(ptr).right.is_some();
        if parent_deleted || lost_map_race {
            self.delete_item(ptr);
        }
        Ok(Some(ptr))
    }

    pub(crate) fn integrate_gc(&mut self, range: BlockRange) -> Result<()> {
        self.doc.store.push_block(range.id.client, Block::GC(range))
    }

    /// Content specific integration hook.
    fn integrate_content(&mut self, ptr: ItemPtr, parent: BranchPtr) {
        let store = &mut self.doc.store;
        let item = store.item(ptr);
        let (id, len) = (item.id, item.len);
        match &item.content {
            ItemContent::Deleted(_) => {
                store.item_mut(ptr).mark_deleted();
                self.state.delete_set.insert(id, len);
            }
            ItemContent::Type(t) => {
                let mut branch = Branch::new(t.type_ref.clone());
                branch.item = Some(ptr);
                let b = store.alloc_branch(branch);
                if let ItemContent::Type(t) = &mut store.item_mut(ptr).content {
                    t.branch = Some(b);
                }
            }
            ItemContent::Format(..) => {
                store.branch_mut(parent).markers = None;
            }
            ItemContent::Doc(doc) => {
                let doc = doc.clone();
                if doc.should_load {
                    self.state.subdocs_loaded.insert(doc.guid.clone(), doc.clone());
                }
                self.state.subdocs_added.insert(doc.guid.clone(), doc);
            }
            _ => {}
        }
    }

    /// Marks an item deleted, records it in the transaction's delete set and
    /// runs the content's delete hook. Returns `false` if it already was.
    pub(crate) fn delete_item(&mut self, ptr: ItemPtr) -> bool {
        let store = &mut self.doc.store;
        let item = store.item(ptr);
        if item.is_deleted() {
            return false;
        }
        let (id, len, parent_sub) = (item.id, item.len, item.parent_sub.clone());
        let item_countable = item.is_countable();
        let parent = item.parent_branch();
        if let Some(p) = parent {
            let branch = store.branch_mut(p);
            if item_countable && parent_sub.is_none() {
                branch.block_len = branch.block_len.saturating_sub(len);
            }
            if !self.state.local {
                branch.clear_markers();
            }
        }
        store.item_mut(ptr).mark_deleted();
        self.state.delete_set.insert(id, len);
        if let Some(p) = parent {
            self.add_changed_type(p, parent_sub);
        }

        let content_branch = match &self.doc.store.item(ptr).content {
            ItemContent::Type(t) => t.branch,
            ItemContent::Doc(doc) => {
                if self.state.subdocs_added.shift_remove(&doc.guid).is_none() {
                    self.state.subdocs_removed.insert(doc.guid.clone(), doc.clone());
                }
                None
            }
            _ => None,
        };
        if let Some(b) = content_branch {
            let store = &self.doc.store;
            let branch = store.branch(b);
            let mut children = Vec::new();
            let mut cur = branch.start;
            while let Some(c) = cur {
                children.push(c);
                cur = store.item(c).right;
            }
            children.extend(branch.map.values().copied());
            for child in children {
                let store = &self.doc.store;
                let c = store.item(child);
                if !c.is_deleted() {
                    self.delete_item(child);
                } else if c.id.clock < self.state.before_state.get(&c.id.client) {
                    self.state.merge_blocks.push(c.id);
                }
            }
            self.state.changed.shift_remove(&b);
            self.doc.store.branch(b).clear_markers();
        }
        true
    }

    /// Records that `branch` changed at `parent_sub` (`None` for list
    /// content), unless the branch was created in this transaction.
    pub(crate) fn add_changed_type(&mut self, branch: BranchPtr, parent_sub: Option<Arc<str>>) {
        let store = &self.doc.store;
        let track = match store.branch(branch).item {
            None => true,
            Some(owner) => {
                let owner = store.item(owner);
                owner.id.clock < self.state.before_state.get(&owner.id.client) && !owner.is_deleted()
            }
        };
        if track {
            self.state
                .changed
                .entry(branch)
                .or_default()
                .insert(parent_sub);
        }
    }

    /// Ensures a block boundary starts exactly at `id`, splitting if needed.
    pub(crate) fn get_item_clean_start(&mut self, id: ID) -> Result<Block> {
        self.doc
            .store
            .get_item_clean_start(id, &mut self.state.merge_blocks)
    }

    /// Ensures a block boundary ends exactly at `id`, splitting if needed.
    pub(crate) fn get_item_clean_end(&mut self, id: ID) -> Result<Block> {
        self.doc
            .store
            .get_item_clean_end(id, &mut self.state.merge_blocks)
    }

    /// Pins an item and its ancestors so garbage collection never discards
    /// them.
    pub fn keep(&mut self, id: ID, keep: bool) {
        let store = &mut self.doc.store;
        let mut cur = store.find_item(&id);
        while let Some(ptr) = cur {
            let item = store.item_mut(ptr);
            if item.is_keep() == keep {
                break;
            }
            item.set_keep(keep);
            let parent = item.parent_branch();
            cur = parent.and_then(|b| store.branch(b).item);
        }
    }

    /// Re-inserts a deleted item at its former position.
    ///
    /// `redo_items` lists items that are being redone together, so deleted
    /// parents among them are redone first. Map entries whose key was
    /// overwritten by another replica are not redone unless
    /// `ignore_remote_map_changes` is set. Returns the id of the new item,
    /// or `None` when no unambiguous position exists.
    pub fn redo(
        &mut self,
        id: ID,
        redo_items: &HashSet<ID>,
        items_to_delete: &DeleteSet,
        ignore_remote_map_changes: bool,
    ) -> Result<Option<ID>> {
        let ptr = match self.get_item_clean_start(id)? {
            Block::Item(ptr) => ptr,
            Block::GC(_) => return Ok(None),
        };
        self.redo_item(ptr, redo_items, items_to_delete, ignore_remote_map_changes)
            .map(|r| r.map(|p| self.doc.store.item(p).id))
    }

    fn redo_item(
        &mut self,
        ptr: ItemPtr,
        redo_items: &HashSet<ID>,
        items_to_delete: &DeleteSet,
        ignore_remote_map_changes: bool,
    ) -> Result<Option<ItemPtr>> {
        if let Some(redone) = self.doc.store.item(ptr).redone {
            return Ok(self.item_at(redone)?);
        }
        let Some(parent) = self.doc.store.item(ptr).parent_branch() else {
            return Ok(None);
        };
        let mut parent_item = self.doc.store.branch(parent).item;
        if let Some(p) = parent_item {
            let pi = self.doc.store.item(p);
            if pi.is_deleted() {
                if pi.redone.is_none() {
                    let pid = pi.id;
                    if !redo_items.contains(&pid)
                        || self
                            .redo_item(p, redo_items, items_to_delete, ignore_remote_map_changes)?
                            .is_none()
                    {
                        return Ok(None);
                    }
                }
                let mut cur = p;
                while let Some(redone) = self.doc.store.item(cur).redone {
                    match self.item_at(redone)? {
                        Some(next) => cur = next,
                        None => return Ok(None),
                    }
                }
                parent_item = Some(cur);
            }
        }
        let parent_type = match parent_item {
            None => parent,
            Some(p) => match &self.doc.store.item(p).content {
                ItemContent::Type(t) => match t.branch {
                    Some(b) => b,
                    None => return Ok(None),
                },
                _ => return Ok(None),
            },
        };

        let parent_sub = self.doc.store.item(ptr).parent_sub.clone();
        let (left, right) = if parent_sub.is_none() {
            let mut left = self.doc.store.item(ptr).left;
            while let Some(l) = left {
                if let Some(traced) = self.trace_redone(l, parent_item)? {
                    left = Some(traced);
                    break;
                }
                left = self.doc.store.item(l).left;
            }
            let mut right = Some(ptr);
            while let Some(r) = right {
                if let Some(traced) = self.trace_redone(r, parent_item)? {
                    right = Some(traced);
                    break;
                }
                right = self.doc.store.item(r).right;
            }
            (left, right)
        } else if self.doc.store.item(ptr).right.is_some() && !ignore_remote_map_changes {
            let mut left = ptr;
            loop {
                let Some(next) = self.doc.store.item(left).right else {
                    break;
                };
                let n = self.doc.store.item(next);
                if n.redone.is_none() && !items_to_delete.is_deleted(&n.id) {
                    break;
                }
                left = next;
                while let Some(redone) = self.doc.store.item(left).redone {
                    match self.item_at(redone)? {
                        Some(p) => left = p,
                        None => return Ok(None),
                    }
                }
            }
            if self.doc.store.item(left).right.is_some() {
                return Ok(None);
            }
            (Some(left), None)
        } else {
            let map = &self.doc.store.branch(parent_type).map;
            (parent_sub.as_deref().and_then(|k| map.get(k)).copied(), None)
        };

        let store = &self.doc.store;
        let next_id = ID::new(self.doc.client_id, store.get_state(&self.doc.client_id));
        let redone = Item::new(
            next_id,
            left,
            left.map(|l| store.item(l).last_id()),
            right,
            right.map(|r| store.item(r).id),
            TypePtr::Branch(parent_type),
            parent_sub,
            store.item(ptr).content.copy(),
        );
        self.doc.store.item_mut(ptr).redone = Some(next_id);
        let new_ptr = self.integrate_item(redone, 0)?;
        self.doc.store.branch(parent_type).clear_markers();
        self.keep(next_id, true);
        Ok(new_ptr)
    }

    /// Follows the redo chain of `ptr` until it reaches an item living in
    /// the container owned by `parent_item`.
    fn trace_redone(&mut self, ptr: ItemPtr, parent_item: Option<ItemPtr>) -> Result<Option<ItemPtr>> {
        let mut trace = Some(ptr);
        while let Some(t) = trace {
            let item = self.doc.store.item(t);
            let owner = item.parent_branch().and_then(|b| self.doc.store.branch(b).item);
            if item.parent_branch().is_some() && owner == parent_item {
                return Ok(Some(t));
            }
            let redone = item.redone;
            trace = match redone {
                Some(redone) => self.item_at(redone)?,
                None => None,
            };
        }
        Ok(None)
    }

    fn item_at(&mut self, id: ID) -> Result<Option<ItemPtr>> {
        Ok(match self.get_item_clean_start(id)? {
            Block::Item(ptr) => Some(ptr),
            Block::GC(_) => None,
        })
    }
}

/// First item of the version chain stored under `key`.
fn leftmost_entry(store: &Store, branch: &Branch, key: &str) -> Option<ItemPtr> {
    let mut o = branch.map.get(key).copied();
    while let Some(p) = o {
        match store.item(p).left {
            Some(l) => o = Some(l),
            None => break,
        }
    }
    o
}

/// Scans the window between the item's intended neighbours and returns the
/// left neighbour that orders it consistently on every replica.
fn resolve_conflicts(store: &Store, item: &Item, parent: BranchPtr) -> Option<ItemPtr> {
    let mut left = item.left;
    let mut o = match left {
        Some(l) => store.item(l).right,
        None => match &item.parent_sub {
            Some(key) => leftmost_entry(store, store.branch(parent), key),
            None => store.branch(parent).start,
        },
    };
    let mut conflicting = HashSet::new();
    let mut before_origin = HashSet::new();
    while let Some(optr) = o {
        if Some(optr) == item.right {
            break;
        }
        before_origin.insert(optr);
        conflicting.insert(optr);
        let other = store.item(optr);
        if other.origin == item.origin {
            // same origin: the lower replica id goes left
            if other.id.client < item.id.client {
                left = Some(optr);
                conflicting.clear();
            } else if other.right_origin == item.right_origin {
                break;
            }
        } else {
            let origin_item = other.origin.and_then(|origin| store.find_item(&origin));
            match origin_item {
                Some(op) if before_origin.contains(&op) => {
                    if !conflicting.contains(&op) {
                        left = Some(optr);
                        conflicting.clear();
                    }
                }
                _ => break,
            }
        }
        o = other.right;
    }
    left
}
