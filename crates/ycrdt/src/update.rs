//! Decoded update messages, causal buffering and the byte-level update
//! utilities that work without a document.

use std::collections::{HashMap, VecDeque};

use tracing::debug;

use crate::block::{
    Block, BlockCarrier, BlockRange, Item, HAS_ORIGIN, HAS_PARENT_SUB, HAS_RIGHT_ORIGIN,
};
use crate::branch::TypePtr;
use crate::content::{ItemContent, BLOCK_GC, BLOCK_SKIP};
use crate::delete_set::DeleteSet;
use crate::encoding::{Decoder, DecoderV1, DecoderV2, DsEncoder, Encoder, EncoderV1, EncoderV2};
use crate::error::{Error, Result};
use crate::id::{ClientID, ID};
use crate::state_vector::StateVector;
use crate::transaction::TransactionMut;

/// A decoded update: blocks grouped by replica, ordered by clock, plus the
/// deletions it carries.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Update {
    pub(crate) blocks: HashMap<ClientID, VecDeque<BlockCarrier>>,
    pub(crate) delete_set: DeleteSet,
}

impl Update {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.blocks.values().all(VecDeque::is_empty) && self.delete_set.is_empty()
    }

    pub fn delete_set(&self) -> &DeleteSet {
        &self.delete_set
    }

    /// Blocks of one replica in clock order.
    pub fn blocks(&self, client: &ClientID) -> impl Iterator<Item = &BlockCarrier> {
        self.blocks.get(client).into_iter().flatten()
    }

    pub fn decode_v1(data: &[u8]) -> Result<Update> {
        let mut d = DecoderV1::new(data);
        Self::decode(&mut d)
    }

    pub fn decode_v2(data: &[u8]) -> Result<Update> {
        let mut d = DecoderV2::new(data)?;
        Self::decode(&mut d)
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut e = EncoderV1::new();
        self.encode(&mut e);
        e.to_vec()
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        let mut e = EncoderV2::new();
        self.encode(&mut e);
        e.to_vec()
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(d: &mut D) -> Result<Update> {
        let mut blocks: HashMap<ClientID, VecDeque<BlockCarrier>> = HashMap::new();
        let clients = d.rest().try_var_uint()?;
        for _ in 0..clients {
            let count = d.rest().try_var_uint()?;
            let client = d.read_client()?;
            let mut clock = d.rest().try_var_u32()?;
            let list = blocks.entry(client).or_default();
            for _ in 0..count {
                let block = decode_block(d, ID::new(client, clock))?;
                clock += block.len();
                list.push_back(block);
            }
        }
        let delete_set = DeleteSet::decode(d)?;
        Ok(Update { blocks, delete_set })
    }

    pub(crate) fn encode<E: Encoder>(&self, e: &mut E) {
        let mut clients: Vec<_> = self
            .blocks
            .iter()
            .filter(|(_, list)| !list.is_empty())
            .collect();
        clients.sort_by(|a, b| b.0.cmp(a.0));
        e.rest().var_uint(clients.len() as u64);
        for (client, list) in clients {
            e.rest().var_uint(list.len() as u64);
            e.write_client(*client);
            let first = list.front().map_or(0, |b| b.id().clock);
            e.rest().var_uint(first as u64);
            for block in list {
                block.encode(e, 0);
            }
        }
        self.delete_set.encode(e);
    }

    /// Combines updates into one covering all of them. Overlapping blocks
    /// are written once and gaps become skip placeholders.
    pub fn merge(updates: Vec<Update>) -> Result<Update> {
        let mut per_client: HashMap<ClientID, Vec<(usize, BlockCarrier)>> = HashMap::new();
        let mut delete_sets = Vec::with_capacity(updates.len());
        for (i, update) in updates.into_iter().enumerate() {
            for (client, list) in update.blocks {
                let entry = per_client.entry(client).or_default();
                entry.extend(list.into_iter().filter(|b| !b.is_skip()).map(|b| (i, b)));
            }
            delete_sets.push(update.delete_set);
        }

        let mut blocks = HashMap::new();
        for (client, mut list) in per_client {
            // lower clock first, then the longer block, then input order
            list.sort_by(|(ia, a), (ib, b)| {
                a.id()
                    .clock
                    .cmp(&b.id().clock)
                    .then(b.len().cmp(&a.len()))
                    .then(ia.cmp(ib))
            });
            let mut out: VecDeque<BlockCarrier> = VecDeque::new();
            for (_, mut block) in list {
                if let Some(cursor) = out.back().map(BlockCarrier::end) {
                    let clock = block.id().clock;
                    if block.end() <= cursor {
                        continue;
                    }
                    if clock > cursor {
                        let gap = BlockRange::new(ID::new(client, cursor), clock - cursor);
                        out.push_back(BlockCarrier::Skip(gap));
                    } else if clock < cursor {
                        block.trim_start(cursor - clock)?;
                    }
                }
                if let Some(last) = out.back_mut() {
                    if last.try_merge(&block) {
                        continue;
                    }
                }
                out.push_back(block);
            }
            if !out.is_empty() {
                blocks.insert(client, out);
            }
        }
        Ok(Update {
            blocks,
            delete_set: DeleteSet::merge_all(&delete_sets),
        })
    }

    /// Drops everything the holder of `sv` already has. The delete set is
    /// kept whole.
    pub fn diff(self, sv: &StateVector) -> Result<Update> {
        let mut blocks = HashMap::new();
        for (client, list) in self.blocks {
            let known = sv.get(&client);
            let mut out = VecDeque::new();
            for mut block in list {
                if out.is_empty() {
                    if block.is_skip() || block.end() <= known {
                        continue;
                    }
                    let clock = block.id().clock;
                    if clock < known {
                        block.trim_start(known - clock)?;
                    }
                }
                out.push_back(block);
            }
            if !out.is_empty() {
                blocks.insert(client, out);
            }
        }
        Ok(Update {
            blocks,
            delete_set: self.delete_set,
        })
    }

    /// Clocks covered contiguously from zero by this update, per replica.
    pub fn state_vector(&self) -> StateVector {
        let mut sv = StateVector::new();
        for (client, list) in self.blocks.iter() {
            let mut clock = 0;
            for block in list {
                if block.is_skip() || block.id().clock != clock {
                    break;
                }
                clock = block.end();
            }
            if clock > 0 {
                sv.set(*client, clock);
            }
        }
        sv
    }
}

fn decode_block<'a, D: Decoder<'a>>(d: &mut D, id: ID) -> Result<BlockCarrier> {
    let info = d.read_info()?;
    match info & 0b1_1111 {
        BLOCK_GC => Ok(BlockCarrier::GC(BlockRange::new(id, d.read_len()?))),
        BLOCK_SKIP => {
            let len = d.rest().try_var_u32()?;
            Ok(BlockCarrier::Skip(BlockRange::new(id, len)))
        }
        ref_number => {
            let origin = if info & HAS_ORIGIN != 0 {
                Some(d.read_left_id()?)
            } else {
                None
            };
            let right_origin = if info & HAS_RIGHT_ORIGIN != 0 {
                Some(d.read_right_id()?)
            } else {
                None
            };
            let (parent, parent_sub) = if origin.is_none() && right_origin.is_none() {
                let parent = if d.read_parent_info()? {
                    TypePtr::Named(d.read_string()?)
                } else {
                    TypePtr::ID(d.read_left_id()?)
                };
                let parent_sub = if info & HAS_PARENT_SUB != 0 {
                    Some(d.read_string()?)
                } else {
                    None
                };
                (parent, parent_sub)
            } else {
                (TypePtr::Unknown, None)
            };
            let content = ItemContent::decode(d, ref_number)?;
            if content.is_empty() {
                return Err(Error::UnexpectedCase("empty item content"));
            }
            let item = Item::new(id, None, origin, None, right_origin, parent, parent_sub, content);
            Ok(BlockCarrier::Item(Box::new(item)))
        }
    }
}

// ── Pending ─────────────────────────────────────────────────────────────

/// Blocks that could not be integrated yet, with the lowest clock still
/// missing per replica.
#[derive(Debug, Clone, PartialEq)]
pub struct PendingUpdate {
    pub update: Update,
    pub missing: StateVector,
}

/// Work list of the integration loop: remaining blocks per replica and the
/// replicas still to visit, highest id last.
struct IntegrationQueue {
    refs: HashMap<ClientID, VecDeque<BlockCarrier>>,
    clients: Vec<ClientID>,
    current: Option<ClientID>,
}

impl IntegrationQueue {
    fn new(mut refs: HashMap<ClientID, VecDeque<BlockCarrier>>) -> Self {
        refs.retain(|_, list| !list.is_empty());
        let mut clients: Vec<ClientID> = refs.keys().copied().collect();
        clients.sort_unstable();
        Self {
            refs,
            clients,
            current: None,
        }
    }

    fn pop(&mut self, client: &ClientID) -> Option<BlockCarrier> {
        self.refs.get_mut(client).and_then(VecDeque::pop_front)
    }

    /// Next block of the current replica, moving to the next replica once
    /// it is exhausted.
    fn next(&mut self) -> Option<BlockCarrier> {
        if let Some(client) = self.current {
            if let Some(block) = self.pop(&client) {
                return Some(block);
            }
        }
        while let Some(&client) = self.clients.last() {
            if let Some(block) = self.pop(&client) {
                self.current = Some(client);
                return Some(block);
            }
            self.clients.pop();
        }
        None
    }

    /// Moves the blocked chain and everything left of its replicas to
    /// `rest`, so no later block of those replicas is applied out of order.
    fn stash(&mut self, stack: &mut Vec<BlockCarrier>, rest: &mut HashMap<ClientID, VecDeque<BlockCarrier>>) {
        while let Some(block) = stack.pop() {
            let client = block.id().client;
            let refs = &mut self.refs;
            let list = rest
                .entry(client)
                .or_insert_with(|| refs.remove(&client).unwrap_or_default());
            list.push_front(block);
            self.clients.retain(|c| *c != client);
        }
    }
}

impl<'doc> TransactionMut<'doc> {
    /// Integrates decoded blocks in causal order. Blocks whose dependencies
    /// are missing are returned as a pending update.
    pub(crate) fn integrate_blocks(
        &mut self,
        blocks: HashMap<ClientID, VecDeque<BlockCarrier>>,
    ) -> Result<Option<PendingUpdate>> {
        let mut queue = IntegrationQueue::new(blocks);
        let mut stack: Vec<BlockCarrier> = Vec::new();
        let mut rest: HashMap<ClientID, VecDeque<BlockCarrier>> = HashMap::new();
        let mut missing = StateVector::new();

        let mut next = queue.next();
        while let Some(mut head) = next.take() {
            if !head.is_skip() {
                let id = head.id();
                let local = self.doc.store.get_state(&id.client);
                if local < id.clock {
                    // an earlier block of the same replica is missing
                    stack.push(head);
                    missing.set_min(id.client, id.clock - 1);
                    queue.stash(&mut stack, &mut rest);
                } else {
                    let offset = local - id.clock;
                    let dependency = match &mut head {
                        BlockCarrier::Item(item) => self.get_missing(item)?,
                        _ => None,
                    };
                    match dependency {
                        Some(dep) => {
                            stack.push(head);
                            match queue.pop(&dep) {
                                Some(block) => {
                                    next = Some(block);
                                    continue;
                                }
                                None => {
                                    missing.set_min(dep, self.doc.store.get_state(&dep));
                                    queue.stash(&mut stack, &mut rest);
                                }
                            }
                        }
                        None if offset < head.len() => match head {
                            BlockCarrier::Item(item) => {
                                self.integrate_item(*item, offset)?;
                            }
                            BlockCarrier::GC(mut range) => {
                                range.id.clock += offset;
                                range.len -= offset;
                                self.integrate_gc(range)?;
                            }
                            BlockCarrier::Skip(_) => {}
                        },
                        None => {}
                    }
                }
            }
            next = stack.pop().or_else(|| queue.next());
        }

        rest.retain(|_, list| !list.is_empty());
        if rest.is_empty() {
            return Ok(None);
        }
        Ok(Some(PendingUpdate {
            update: Update {
                blocks: rest,
                delete_set: DeleteSet::new(),
            },
            missing,
        }))
    }

    /// Applies a delete set. Ranges past the local state are returned.
    pub(crate) fn apply_delete_set(&mut self, ds: &DeleteSet) -> Result<DeleteSet> {
        let mut unapplied = DeleteSet::new();
        for (&client, ranges) in ds.iter() {
            let state = self.doc.store.get_state(&client);
            for range in ranges {
                let end = range.end();
                if range.clock >= state {
                    unapplied.insert(ID::new(client, range.clock), range.len);
                    continue;
                }
                if state < end {
                    unapplied.insert(ID::new(client, state), end - state);
                }
                let mut clock = range.clock;
                while clock < end.min(state) {
                    let id = ID::new(client, clock);
                    let block = self.doc.store.find_block(&id).ok_or(Error::BlockNotFound(id))?;
                    let ptr = match block {
                        Block::GC(r) => {
                            clock = r.id.clock + r.len;
                            continue;
                        }
                        Block::Item(ptr) => ptr,
                    };
                    let item = self.doc.store.item(ptr);
                    let item_clock = item.id.clock;
                    if item.is_deleted() {
                        clock = item_clock + item.len;
                        continue;
                    }
                    let store = &mut self.doc.store;
                    let merge = &mut self.state.merge_blocks;
                    let ptr = if item_clock < clock {
                        store.split_item(ptr, clock - item_clock, merge)?
                    } else {
                        ptr
                    };
                    let item = store.item(ptr);
                    if end < item.id.clock + item.len {
                        let diff = end - item.id.clock;
                        store.split_item(ptr, diff, merge)?;
                    }
                    let item = store.item(ptr);
                    clock = item.id.clock + item.len;
                    self.delete_item(ptr);
                }
            }
        }
        Ok(unapplied)
    }

    /// Applies a remote update: integrates what is causally ready, buffers
    /// the rest and retries buffered blocks once their dependencies arrive.
    pub(crate) fn apply_update(&mut self, update: Update) -> Result<()> {
        self.state.local = false;
        let mut next = Some(update);
        while let Some(Update { blocks, delete_set }) = next.take() {
            let rest = self.integrate_blocks(blocks)?;
            let store = &mut self.doc.store;
            let mut retry = false;
            match store.pending.take() {
                Some(mut pending) => {
                    retry = pending
                        .missing
                        .iter()
                        .any(|(client, clock)| *clock < store.get_state(client));
                    if let Some(rest) = rest {
                        for (&client, &clock) in rest.missing.iter() {
                            pending.missing.set_min(client, clock);
                        }
                        pending.update = Update::merge(vec![pending.update, rest.update])?;
                    }
                    store.pending = Some(pending);
                }
                None => {
                    if let Some(rest) = &rest {
                        debug!(missing = ?rest.missing, "buffering update with missing dependencies");
                    }
                    store.pending = rest;
                }
            }

            let ds_rest = self.apply_delete_set(&delete_set)?;
            let pending_ds = match self.doc.store.pending_ds.take() {
                Some(pending_ds) => {
                    let mut ds_rest2 = self.apply_delete_set(&pending_ds)?;
                    ds_rest2.merge(ds_rest);
                    ds_rest2
                }
                None => ds_rest,
            };
            if !pending_ds.is_empty() {
                debug!("buffering deletions of unknown blocks");
                self.doc.store.pending_ds = Some(pending_ds);
            }

            if retry {
                if let Some(pending) = self.doc.store.pending.take() {
                    debug!("retrying pending update");
                    next = Some(pending.update);
                }
            }
        }
        Ok(())
    }
}

// ── Byte-level utilities ────────────────────────────────────────────────

fn merge_with<F, G>(updates: &[&[u8]], decode: F, encode: G) -> Result<Vec<u8>>
where
    F: Fn(&[u8]) -> Result<Update>,
    G: Fn(&Update) -> Vec<u8>,
{
    if let [single] = updates {
        return Ok(single.to_vec());
    }
    let decoded = updates
        .iter()
        .map(|u| decode(u))
        .collect::<Result<Vec<_>>>()?;
    Ok(encode(&Update::merge(decoded)?))
}

pub fn merge_updates_v1(updates: &[&[u8]]) -> Result<Vec<u8>> {
    merge_with(updates, Update::decode_v1, Update::encode_v1)
}

pub fn merge_updates_v2(updates: &[&[u8]]) -> Result<Vec<u8>> {
    merge_with(updates, Update::decode_v2, Update::encode_v2)
}

/// Strips from `update` everything covered by the encoded state vector.
pub fn diff_update_v1(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode(state_vector)?;
    Ok(Update::decode_v1(update)?.diff(&sv)?.encode_v1())
}

pub fn diff_update_v2(update: &[u8], state_vector: &[u8]) -> Result<Vec<u8>> {
    let sv = StateVector::decode(state_vector)?;
    Ok(Update::decode_v2(update)?.diff(&sv)?.encode_v2())
}

pub fn encode_state_vector_from_update_v1(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v1(update)?.state_vector().encode())
}

pub fn encode_state_vector_from_update_v2(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v2(update)?.state_vector().encode())
}

pub fn convert_update_v1_to_v2(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v1(update)?.encode_v2())
}

pub fn convert_update_v2_to_v1(update: &[u8]) -> Result<Vec<u8>> {
    Ok(Update::decode_v2(update)?.encode_v1())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::any::Any;

    fn string_item(client: ClientID, clock: u32, origin: Option<ID>, text: &str) -> BlockCarrier {
        let parent = if origin.is_none() {
            TypePtr::Named("text".into())
        } else {
            TypePtr::Unknown
        };
        let content = ItemContent::String(text.into());
        BlockCarrier::Item(Box::new(Item::new(
            ID::new(client, clock),
            None,
            origin,
            None,
            None,
            parent,
            None,
            content,
        )))
    }

    fn update_of(client: ClientID, blocks: Vec<BlockCarrier>) -> Update {
        let mut u = Update::new();
        u.blocks.insert(client, blocks.into());
        u
    }

    #[test]
    fn v1_round_trip() {
        let u = update_of(
            7,
            vec![
                string_item(7, 0, None, "abc"),
                BlockCarrier::GC(BlockRange::new(ID::new(7, 3), 2)),
            ],
        );
        let decoded = Update::decode_v1(&u.encode_v1()).expect("decode");
        assert_eq!(decoded.state_vector().get(&7), 5);
        let decoded = Update::decode_v2(&u.encode_v2()).expect("decode v2");
        assert_eq!(decoded.state_vector().get(&7), 5);
    }

    #[test]
    fn merge_fills_gaps_with_skip() {
        let a = update_of(1, vec![string_item(1, 0, None, "ab")]);
        let b = update_of(1, vec![string_item(1, 5, Some(ID::new(1, 4)), "xy")]);
        let merged = Update::merge(vec![a, b]).expect("merge");
        let blocks: Vec<_> = merged.blocks(&1).collect();
        assert_eq!(blocks.len(), 3);
        assert!(blocks[1].is_skip());
        assert_eq!(blocks[1].id(), ID::new(1, 2));
        assert_eq!(blocks[1].len(), 3);
        assert_eq!(merged.state_vector().get(&1), 2);
    }

    #[test]
    fn merge_joins_adjacent_strings() {
        let a = update_of(1, vec![string_item(1, 0, None, "ab")]);
        let b = update_of(1, vec![string_item(1, 2, Some(ID::new(1, 1)), "cd")]);
        let merged = Update::merge(vec![b, a]).expect("merge");
        let blocks: Vec<_> = merged.blocks(&1).collect();
        assert_eq!(blocks.len(), 1);
        match blocks[0] {
            BlockCarrier::Item(item) => {
                assert_eq!(item.content, ItemContent::String("abcd".into()))
            }
            other => panic!("unexpected block {other:?}"),
        }
    }

    #[test]
    fn merge_slices_overlaps() {
        let a = update_of(1, vec![string_item(1, 0, None, "abc")]);
        let b = update_of(1, vec![string_item(1, 1, Some(ID::new(1, 0)), "bcde")]);
        let merged = Update::merge(vec![a.clone(), b]).expect("merge");
        assert_eq!(merged.state_vector().get(&1), 5);
        let again = Update::merge(vec![merged.clone(), a]).expect("merge");
        assert_eq!(again, merged);
    }

    #[test]
    fn diff_trims_known_prefix() {
        let u = update_of(1, vec![string_item(1, 0, None, "hello")]);
        let mut sv = StateVector::new();
        sv.set(1, 3);
        let diff = u.diff(&sv).expect("diff");
        let blocks: Vec<_> = diff.blocks(&1).collect();
        assert_eq!(blocks[0].id(), ID::new(1, 3));
        assert_eq!(blocks[0].len(), 2);
    }

    #[test]
    fn state_vector_stops_at_gap() {
        let u = update_of(
            1,
            vec![
                string_item(1, 0, None, "ab"),
                BlockCarrier::Skip(BlockRange::new(ID::new(1, 2), 3)),
                string_item(1, 5, Some(ID::new(1, 4)), "c"),
            ],
        );
        assert_eq!(u.state_vector().get(&1), 2);
        let late = update_of(2, vec![string_item(2, 4, Some(ID::new(2, 3)), "z")]);
        assert!(!late.state_vector().contains_client(&2));
    }

    #[test]
    fn single_update_merges_to_itself() {
        let u = update_of(3, vec![BlockCarrier::Item(Box::new(Item::new(
            ID::new(3, 0),
            None,
            None,
            None,
            None,
            TypePtr::Named("m".into()),
            Some("k".into()),
            ItemContent::Any(vec![Any::from(1.5)]),
        )))]);
        let bytes = u.encode_v1();
        assert_eq!(merge_updates_v1(&[&bytes]).expect("merge"), bytes);
    }
}
