//! Per-document struct store: the block lists of every replica plus the
//! arenas holding items and containers.

use std::collections::HashMap;
use std::sync::Arc;

use crate::block::{Block, BlockRange, Item, ItemPtr, ITEM_FLAG_COUNTABLE};
use crate::branch::{Branch, BranchPtr, TypePtr, TypeRef};
use crate::content::ItemContent;
use crate::delete_set::DeleteSet;
use crate::content::BLOCK_GC;
use crate::encoding::Encoder;
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;
use crate::update::PendingUpdate;

#[derive(Debug, Default)]
pub struct Store {
    /// Block list of every replica, ordered and contiguous by clock.
    pub(crate) blocks: HashMap<ClientID, Vec<Block>>,
    pub(crate) items: Vec<Item>,
    pub(crate) branches: Vec<Branch>,
    pub(crate) roots: HashMap<Arc<str>, BranchPtr>,
    /// Blocks waiting for missing causal dependencies.
    pub(crate) pending: Option<PendingUpdate>,
    /// Deletions targeting blocks not yet received.
    pub(crate) pending_ds: Option<DeleteSet>,
}

impl Store {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Arena ───────────────────────────────────────────────────────────

    pub(crate) fn item(&self, ptr: ItemPtr) -> &Item {
        &self.items[ptr.index()]
    }

    pub(crate) fn item_mut(&mut self, ptr: ItemPtr) -> &mut Item {
        &mut self.items[ptr.index()]
    }

    pub(crate) fn branch(&self, ptr: BranchPtr) -> &Branch {
        &self.branches[ptr.index()]
    }

    pub(crate) fn branch_mut(&mut self, ptr: BranchPtr) -> &mut Branch {
        &mut self.branches[ptr.index()]
    }

    pub(crate) fn alloc_item(&mut self, item: Item) -> ItemPtr {
        let ptr = ItemPtr(self.items.len() as u32);
        self.items.push(item);
        ptr
    }

    pub(crate) fn alloc_branch(&mut self, branch: Branch) -> BranchPtr {
        let ptr = BranchPtr(self.branches.len() as u32);
        self.branches.push(branch);
        ptr
    }

    fn items_pair_mut(&mut self, a: ItemPtr, b: ItemPtr) -> (&mut Item, &mut Item) {
        let (a, b) = (a.index(), b.index());
        debug_assert_ne!(a, b);
        if a < b {
            let (lo, hi) = self.items.split_at_mut(b);
            (&mut lo[a], &mut hi[0])
        } else {
            let (lo, hi) = self.items.split_at_mut(a);
            (&mut hi[0], &mut lo[b])
        }
    }

    /// Returns the root registered under `name`, creating it if needed. An
    /// existing root of undefined kind is claimed for `type_ref`.
    pub(crate) fn get_or_create_root(&mut self, name: &str, type_ref: TypeRef) -> BranchPtr {
        if let Some(&ptr) = self.roots.get(name) {
            if type_ref != TypeRef::Undefined {
                self.branch_mut(ptr).upgrade(type_ref);
            }
            return ptr;
        }
        let name: Arc<str> = name.into();
        let mut branch = Branch::new(type_ref);
        branch.name = Some(name.clone());
        let ptr = self.alloc_branch(branch);
        self.roots.insert(name, ptr);
        ptr
    }

    pub fn root(&self, name: &str) -> Option<BranchPtr> {
        self.roots.get(name).copied()
    }

    /// How an item owning list content is addressed on the wire.
    pub(crate) fn parent_ref(&self, branch: BranchPtr) -> TypePtr {
        let b = self.branch(branch);
        match (b.item, &b.name) {
            (Some(item), _) => TypePtr::ID(self.item(item).id),
            (None, Some(name)) => TypePtr::Named(name.clone()),
            (None, None) => TypePtr::Unknown,
        }
    }

    // ── Blocks ──────────────────────────────────────────────────────────

    pub(crate) fn block_range(&self, block: &Block) -> (u32, u32) {
        match block {
            Block::Item(ptr) => {
                let item = self.item(*ptr);
                (item.id.clock, item.len)
            }
            Block::GC(r) => (r.id.clock, r.len),
        }
    }

    pub(crate) fn block_deleted(&self, block: &Block) -> bool {
        match block {
            Block::Item(ptr) => self.item(*ptr).is_deleted(),
            Block::GC(_) => true,
        }
    }

    /// Next expected clock of `client`.
    pub fn get_state(&self, client: &ClientID) -> u32 {
        match self.blocks.get(client).and_then(|b| b.last()) {
            Some(last) => {
                let (clock, len) = self.block_range(last);
                clock + len
            }
            None => 0,
        }
    }

    pub fn state_vector(&self) -> StateVector {
        self.blocks
            .keys()
            .map(|client| (*client, self.get_state(client)))
            .collect()
    }

    /// Locates the block covering `clock`. The first probe is interpolated
    /// from the clock range, after which the search bisects.
    pub(crate) fn find_index(&self, blocks: &[Block], clock: u32) -> Option<usize> {
        let last = blocks.last()?;
        let (last_clock, last_len) = self.block_range(last);
        let mut right = blocks.len() as i64 - 1;
        if last_clock == clock {
            return Some(right as usize);
        }
        if clock >= last_clock + last_len {
            return None;
        }
        let mut left = 0i64;
        let span = (last_clock + last_len - 1).max(1) as f64;
        let mut mid = ((clock as f64 / span) * right as f64).floor() as i64;
        while left <= right {
            let (mid_clock, mid_len) = self.block_range(&blocks[mid as usize]);
            if mid_clock <= clock {
                if clock < mid_clock + mid_len {
                    return Some(mid as usize);
                }
                left = mid + 1;
            } else {
                right = mid - 1;
            }
            mid = (left + right) / 2;
        }
        None
    }

    pub(crate) fn find_block(&self, id: &ID) -> Option<Block> {
        let blocks = self.blocks.get(&id.client)?;
        let i = self.find_index(blocks, id.clock)?;
        Some(blocks[i])
    }

    /// The item covering `id`, without splitting.
    pub(crate) fn find_item(&self, id: &ID) -> Option<ItemPtr> {
        match self.find_block(id)? {
            Block::Item(ptr) => Some(ptr),
            Block::GC(_) => None,
        }
    }

    /// The item covering `id`. `None` if the id is unknown or its block
    /// was collected.
    pub fn get_item(&self, id: &ID) -> Option<&Item> {
        self.find_item(id).map(|ptr| self.item(ptr))
    }

    /// Number of blocks stored for `client`.
    pub fn block_count(&self, client: &ClientID) -> usize {
        self.blocks.get(client).map_or(0, Vec::len)
    }

    /// Appends a block to its replica's list. The list must stay
    /// contiguous.
    pub(crate) fn push_block(&mut self, client: ClientID, block: Block) -> Result<()> {
        let (clock, _) = self.block_range(&block);
        if let Some(last) = self.blocks.get(&client).and_then(|b| b.last()) {
            let (last_clock, last_len) = self.block_range(last);
            if last_clock + last_len != clock {
                return Err(Error::UnexpectedCase("block list is not contiguous"));
            }
        }
        self.blocks.entry(client).or_default().push(block);
        Ok(())
    }

    // ── Splitting ───────────────────────────────────────────────────────

    /// Splits an integrated item at `diff`, linking the new right half
    /// after it. The right half is queued for a later merge attempt.
    pub(crate) fn split_item(&mut self, ptr: ItemPtr, diff: u32, merge: &mut Vec<ID>) -> Result<ItemPtr> {
        let left = self.item_mut(ptr);
        let content = left.content.splice(diff)?;
        let (client, clock) = (left.id.client, left.id.clock);
        let mut right = Item::new(
            ID::new(client, clock + diff),
            Some(ptr),
            Some(ID::new(client, clock + diff - 1)),
            left.right,
            left.right_origin,
            left.parent.clone(),
            left.parent_sub.clone(),
            content,
        );
        right.info = left.info;
        right.redone = left.redone.map(|r| ID::new(r.client, r.clock + diff));
        left.len = diff;

        let right_id = right.id;
        let right_ptr = self.alloc_item(right);
        self.item_mut(ptr).right = Some(right_ptr);
        let item = self.item(right_ptr);
        let (next, parent, parent_sub) = (item.right, item.parent_branch(), item.parent_sub.clone());
        match (next, parent, parent_sub) {
            (Some(next), _, _) => self.item_mut(next).left = Some(right_ptr),
            (None, Some(parent), Some(key)) => {
                self.branch_mut(parent).map.insert(key, right_ptr);
            }
            _ => {}
        }

        let blocks = self.blocks.get(&client).map(Vec::as_slice).unwrap_or_default();
        let index = self
            .find_index(blocks, clock)
            .ok_or(Error::BlockNotFound(ID::new(client, clock)))?;
        if let Some(list) = self.blocks.get_mut(&client) {
            list.insert(index + 1, Block::Item(right_ptr));
        }
        merge.push(right_id);
        Ok(right_ptr)
    }

    /// Returns the block starting exactly at `id`, splitting the item that
    /// covers it. GC blocks are returned whole.
    pub(crate) fn get_item_clean_start(&mut self, id: ID, merge: &mut Vec<ID>) -> Result<Block> {
        let block = self.find_block(&id).ok_or(Error::BlockNotFound(id))?;
        match block {
            Block::Item(ptr) => {
                let clock = self.item(ptr).id.clock;
                if clock < id.clock {
                    let right = self.split_item(ptr, id.clock - clock, merge)?;
                    return Ok(Block::Item(right));
                }
                Ok(block)
            }
            Block::GC(_) => Ok(block),
        }
    }

    /// Returns the block ending exactly at `id`, splitting the item that
    /// covers it. GC blocks are returned whole.
    pub(crate) fn get_item_clean_end(&mut self, id: ID, merge: &mut Vec<ID>) -> Result<Block> {
        let block = self.find_block(&id).ok_or(Error::BlockNotFound(id))?;
        if let Block::Item(ptr) = block {
            let item = self.item(ptr);
            if id.clock != item.id.clock + item.len - 1 {
                let diff = id.clock - item.id.clock + 1;
                self.split_item(ptr, diff, merge)?;
            }
        }
        Ok(block)
    }

    /// Swaps an item's block entry for a GC tombstone of the same range.
    pub(crate) fn replace_with_gc(&mut self, ptr: ItemPtr) -> Result<()> {
        let item = self.item(ptr);
        let range = BlockRange::new(item.id, item.len);
        let blocks = self.blocks.get(&range.id.client).map(Vec::as_slice).unwrap_or_default();
        let index = self
            .find_index(blocks, range.id.clock)
            .ok_or(Error::BlockNotFound(range.id))?;
        if let Some(list) = self.blocks.get_mut(&range.id.client) {
            list[index] = Block::GC(range);
        }
        Ok(())
    }

    // ── Garbage collection ──────────────────────────────────────────────

    /// Discards the content of a deleted item. Children of a collected
    /// container become GC tombstones; the container itself is emptied.
    pub(crate) fn gc_item(&mut self, ptr: ItemPtr, parent_gcd: bool) -> Result<()> {
        if !parent_gcd && !self.item(ptr).is_deleted() {
            return Err(Error::UnexpectedCase("collecting a live item"));
        }
        if let ItemContent::Type(t) = &self.item(ptr).content {
            if let Some(b) = t.branch {
                let branch = self.branch(b);
                let mut children = Vec::new();
                let mut cur = branch.start;
                while let Some(c) = cur {
                    children.push(c);
                    cur = self.item(c).right;
                }
                for &entry in branch.map.values() {
                    let mut cur = Some(entry);
                    while let Some(c) = cur {
                        children.push(c);
                        cur = self.item(c).left;
                    }
                }
                for child in children {
                    self.gc_item(child, true)?;
                }
                let branch = self.branch_mut(b);
                branch.start = None;
                branch.map.clear();
                branch.clear_markers();
            }
        }
        if parent_gcd {
            self.replace_with_gc(ptr)
        } else {
            let item = self.item_mut(ptr);
            item.content = ItemContent::Deleted(item.len);
            item.info &= !ITEM_FLAG_COUNTABLE;
            Ok(())
        }
    }

    // ── Merging ─────────────────────────────────────────────────────────

    /// Appends `right` to `left` when both are adjacent fragments of one
    /// insertion in the same state.
    fn try_merge_blocks(&mut self, left: Block, right: Block) -> Option<Block> {
        match (left, right) {
            (Block::GC(mut l), Block::GC(r)) => {
                l.len += r.len;
                Some(Block::GC(l))
            }
            (Block::Item(l), Block::Item(r)) => {
                let (li, ri) = (self.item(l), self.item(r));
                let mergeable = ri.origin == Some(li.last_id())
                    && li.right == Some(r)
                    && li.right_origin == ri.right_origin
                    && li.id.client == ri.id.client
                    && li.id.clock + li.len == ri.id.clock
                    && li.is_deleted() == ri.is_deleted()
                    && li.redone.is_none()
                    && ri.redone.is_none();
                if !mergeable {
                    return None;
                }
                let (li, ri) = self.items_pair_mut(l, r);
                if !li.content.try_merge(&ri.content) {
                    return None;
                }
                let left_len = li.len;
                let visible = li.is_visible_countable();
                if ri.is_keep() {
                    li.set_keep(true);
                }
                li.right = ri.right;
                li.len += ri.len;
                let (next, parent, sub) = (li.right, li.parent_branch(), li.parent_sub.clone());
                if let Some(next) = next {
                    self.item_mut(next).left = Some(l);
                }
                if let Some(parent) = parent {
                    let branch = self.branch_mut(parent);
                    if let Some(markers) = &branch.markers {
                        markers.borrow_mut().merged(l, r, left_len, visible);
                    }
                    if let Some(key) = sub {
                        if branch.map.get(&key) == Some(&r) {
                            branch.map.insert(key, l);
                        }
                    }
                }
                Some(Block::Item(l))
            }
            _ => None,
        }
    }

    /// Merges the block at `pos` into its left neighbours as far as
    /// possible. Returns the number of blocks removed.
    pub(crate) fn try_merge_with_lefts(&mut self, client: ClientID, pos: usize) -> usize {
        let Some(list) = self.blocks.get_mut(&client) else {
            return 0;
        };
        if pos == 0 || pos >= list.len() {
            return 0;
        }
        let mut blocks = std::mem::take(list);
        let mut right = blocks[pos];
        let mut i = pos;
        while i > 0 {
            let left = blocks[i - 1];
            if self.block_deleted(&left) != self.block_deleted(&right) {
                break;
            }
            match self.try_merge_blocks(left, right) {
                Some(merged) => {
                    blocks[i - 1] = merged;
                    right = merged;
                    i -= 1;
                }
                None => break,
            }
        }
        let merged = pos - i;
        if merged > 0 {
            blocks.drain(pos + 1 - merged..=pos);
        }
        self.blocks.insert(client, blocks);
        merged
    }

    // ── Encoding ────────────────────────────────────────────────────────

    /// Writes every block the holder of `sv` is missing, replicas in
    /// descending id order.
    pub(crate) fn write_blocks_from<E: Encoder>(&self, e: &mut E, sv: &StateVector) {
        let mut clients: Vec<(ClientID, u32)> = Vec::new();
        for (&client, _) in self.blocks.iter() {
            let clock = sv.get(&client);
            if self.get_state(&client) > clock {
                clients.push((client, clock));
            }
        }
        clients.sort_by(|a, b| b.0.cmp(&a.0));
        e.rest().var_uint(clients.len() as u64);
        for (client, clock) in clients {
            let blocks = &self.blocks[&client];
            let first_clock = blocks.first().map_or(0, |b| self.block_range(b).0);
            let clock = clock.max(first_clock);
            let Some(start) = self.find_index(blocks, clock) else {
                continue;
            };
            e.rest().var_uint((blocks.len() - start) as u64);
            e.write_client(client);
            e.rest().var_uint(clock as u64);
            for (i, block) in blocks[start..].iter().enumerate() {
                let (block_clock, len) = self.block_range(block);
                let offset = if i == 0 { clock - block_clock } else { 0 };
                match block {
                    Block::Item(ptr) => self.item(*ptr).encode(e, offset, Some(self)),
                    Block::GC(_) => {
                        e.write_info(BLOCK_GC);
                        e.write_len(len - offset);
                    }
                }
            }
        }
    }

    // ── Diagnostics ─────────────────────────────────────────────────────

    /// Verifies the structural invariants of the store: contiguous block
    /// lists, consistent sibling links and container lengths.
    pub fn integrity_check(&self) -> Result<()> {
        for (client, blocks) in self.blocks.iter() {
            let mut expected: Option<u32> = None;
            for block in blocks {
                let (clock, len) = self.block_range(block);
                if len == 0 {
                    return Err(Error::UnexpectedCase("empty block"));
                }
                if let Some(expected) = expected {
                    if clock != expected {
                        return Err(Error::UnexpectedCase("gap in block list"));
                    }
                }
                if let Block::Item(ptr) = block {
                    let item = self.item(*ptr);
                    if item.id.client != *client || item.len != item.content.len() {
                        return Err(Error::UnexpectedCase("item does not match its block entry"));
                    }
                }
                expected = Some(clock + len);
            }
        }
        for branch in self.branches.iter() {
            if branch.item.is_some_and(|i| self.item(i).is_deleted()) {
                continue;
            }
            let mut prev = None;
            let mut len = 0;
            let mut cur = branch.start;
            while let Some(ptr) = cur {
                let item = self.item(ptr);
                if item.left != prev {
                    return Err(Error::UnexpectedCase("broken left link"));
                }
                if item.is_visible_countable() {
                    len += item.len;
                }
                prev = Some(ptr);
                cur = item.right;
            }
            if len != branch.block_len {
                return Err(Error::UnexpectedCase("container length out of sync"));
            }
            for &entry in branch.map.values() {
                if self.item(entry).right.is_some() {
                    return Err(Error::UnexpectedCase("map entry is not the latest write"));
                }
            }
        }
        Ok(())
    }
}
