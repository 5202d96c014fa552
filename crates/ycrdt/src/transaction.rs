//! Transactions: the unit of mutation, observer delivery and cleanup.

use std::collections::{HashSet, VecDeque};
use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;
use tracing::{trace, warn};

use crate::block::{Block, Item};
use crate::branch::BranchPtr;
use crate::delete_set::DeleteSet;
use crate::doc::{Doc, SubDoc};
use crate::encoding::{Encoder, EncoderV1, EncoderV2};
use crate::error::Result;
use crate::event::{AfterTransactionEvent, Event, SubdocsEvent, UpdateEvent};
use crate::id::{ClientID, ID};
use crate::observer::Observers;
use crate::snapshot::Snapshot;
use crate::state_vector::StateVector;
use crate::store::Store;
use crate::update::Update;

// ── Origin ──────────────────────────────────────────────────────────────

/// Opaque tag identifying who started a transaction.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct Origin(Arc<[u8]>);

impl Origin {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match std::str::from_utf8(&self.0) {
            Ok(s) => write!(f, "Origin({s:?})"),
            Err(_) => write!(f, "Origin({:?})", &self.0),
        }
    }
}

impl From<&str> for Origin {
    fn from(value: &str) -> Self {
        Origin(value.as_bytes().into())
    }
}

impl From<String> for Origin {
    fn from(value: String) -> Self {
        Origin(value.into_bytes().into())
    }
}

impl From<&[u8]> for Origin {
    fn from(value: &[u8]) -> Self {
        Origin(value.into())
    }
}

impl From<Vec<u8>> for Origin {
    fn from(value: Vec<u8>) -> Self {
        Origin(value.into())
    }
}

impl From<u64> for Origin {
    fn from(value: u64) -> Self {
        Origin(value.to_be_bytes().as_slice().into())
    }
}

// ── Read access ─────────────────────────────────────────────────────────

/// Mutable access used to register container observers, both on a
/// document at rest and from inside a running transaction.
pub trait WriteTxn: ReadTxn {
    fn store_mut(&mut self) -> &mut Store;
}

/// Read-only view of a document, available outside and inside
/// transactions.
pub trait ReadTxn {
    fn store(&self) -> &Store;

    fn state_vector(&self) -> StateVector {
        self.store().state_vector()
    }

    /// Snapshot of the current state: what is known and what is deleted.
    fn snapshot(&self) -> Snapshot {
        let store = self.store();
        Snapshot::new(DeleteSet::from_store(store), store.state_vector())
    }

    fn encode_state_as_update_v1(&self, sv: &StateVector) -> Result<Vec<u8>> {
        encode_state_as_update::<EncoderV1, _>(self.store(), sv, Update::decode_v1, Update::encode_v1)
    }

    fn encode_state_as_update_v2(&self, sv: &StateVector) -> Result<Vec<u8>> {
        encode_state_as_update::<EncoderV2, _>(self.store(), sv, Update::decode_v2, Update::encode_v2)
    }
}

/// Everything the holder of `sv` is missing, including blocks and
/// deletions still waiting for their dependencies.
fn encode_state_as_update<E: Encoder, D>(
    store: &Store,
    sv: &StateVector,
    decode: D,
    encode: fn(&Update) -> Vec<u8>,
) -> Result<Vec<u8>>
where
    D: Fn(&[u8]) -> Result<Update>,
{
    let mut e = E::default();
    store.write_blocks_from(&mut e, sv);
    DeleteSet::from_store(store).encode(&mut e);
    let bytes = e.to_vec();
    if store.pending.is_none() && store.pending_ds.is_none() {
        return Ok(bytes);
    }
    let mut updates = vec![decode(&bytes)?];
    if let Some(ds) = &store.pending_ds {
        updates.push(Update {
            blocks: Default::default(),
            delete_set: ds.clone(),
        });
    }
    if let Some(pending) = &store.pending {
        updates.push(pending.update.clone().diff(sv)?);
    }
    Ok(encode(&Update::merge(updates)?))
}

// ── Transaction state ───────────────────────────────────────────────────

#[derive(Debug)]
pub(crate) struct TransactionState {
    pub(crate) origin: Option<Origin>,
    /// Cleared when the transaction applies a remote update.
    pub(crate) local: bool,
    pub(crate) before_state: StateVector,
    pub(crate) after_state: StateVector,
    pub(crate) delete_set: DeleteSet,
    /// Containers changed by this transaction and the keys that changed,
    /// `None` standing for list content.
    pub(crate) changed: IndexMap<BranchPtr, HashSet<Option<Arc<str>>>>,
    /// Blocks split during the transaction, retried for merging on commit.
    pub(crate) merge_blocks: Vec<ID>,
    pub(crate) subdocs_added: IndexMap<Arc<str>, SubDoc>,
    pub(crate) subdocs_removed: IndexMap<Arc<str>, SubDoc>,
    pub(crate) subdocs_loaded: IndexMap<Arc<str>, SubDoc>,
}

impl TransactionState {
    pub(crate) fn new(before_state: StateVector, origin: Option<Origin>) -> Self {
        Self {
            origin,
            local: true,
            before_state,
            after_state: StateVector::new(),
            delete_set: DeleteSet::new(),
            changed: IndexMap::new(),
            merge_blocks: Vec::new(),
            subdocs_added: IndexMap::new(),
            subdocs_removed: IndexMap::new(),
            subdocs_loaded: IndexMap::new(),
        }
    }

    fn has_subdoc_changes(&self) -> bool {
        !self.subdocs_added.is_empty() || !self.subdocs_removed.is_empty() || !self.subdocs_loaded.is_empty()
    }
}

/// Read-write transaction over a document. Changes are committed and
/// observers notified when the closure passed to
/// [`Doc::transact_mut`] returns.
pub struct TransactionMut<'doc> {
    pub(crate) doc: &'doc mut Doc,
    pub(crate) state: TransactionState,
}

impl<'doc> ReadTxn for TransactionMut<'doc> {
    fn store(&self) -> &Store {
        &self.doc.store
    }
}

impl<'doc> WriteTxn for TransactionMut<'doc> {
    fn store_mut(&mut self) -> &mut Store {
        &mut self.doc.store
    }
}

impl<'doc> TransactionMut<'doc> {
    pub(crate) fn new(doc: &'doc mut Doc, origin: Option<Origin>) -> Self {
        let before_state = doc.store.state_vector();
        Self {
            doc,
            state: TransactionState::new(before_state, origin),
        }
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.state.origin.as_ref()
    }

    pub fn client_id(&self) -> ClientID {
        self.doc.client_id
    }

    /// Id the next local block will receive.
    pub fn next_id(&self) -> ID {
        let client = self.doc.client_id;
        ID::new(client, self.doc.store.get_state(&client))
    }

    pub fn before_state(&self) -> &StateVector {
        &self.state.before_state
    }

    /// Clocks at commit time. Empty until the transaction is committed.
    pub fn after_state(&self) -> &StateVector {
        &self.state.after_state
    }

    /// Deletions made so far by this transaction.
    pub fn delete_set(&self) -> &DeleteSet {
        &self.state.delete_set
    }

    pub fn is_local(&self) -> bool {
        self.state.local
    }

    /// Decodes the whole update before integrating any of it, so a
    /// malformed buffer leaves the document untouched.
    pub fn apply_update_v1(&mut self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v1(update)?;
        self.apply_update(update)
    }

    pub fn apply_update_v2(&mut self, update: &[u8]) -> Result<()> {
        let update = Update::decode_v2(update)?;
        self.apply_update(update)
    }

    /// Encodes the changes made by this transaction so far. `None` when
    /// nothing changed.
    pub fn encode_update_v1(&self) -> Option<Vec<u8>> {
        self.encode_update::<EncoderV1>(&self.doc.store.state_vector())
    }

    pub fn encode_update_v2(&self) -> Option<Vec<u8>> {
        self.encode_update::<EncoderV2>(&self.doc.store.state_vector())
    }

    fn encode_update<E: Encoder>(&self, after_state: &StateVector) -> Option<Vec<u8>> {
        if self.state.delete_set.is_empty() && *after_state == self.state.before_state {
            return None;
        }
        let mut ds = self.state.delete_set.clone();
        ds.squash();
        let mut e = E::default();
        self.doc.store.write_blocks_from(&mut e, &self.state.before_state);
        ds.encode(&mut e);
        Some(e.to_vec())
    }

    /// Requests the content of a sub-document. Returns `false` if no
    /// sub-document with that guid is attached.
    pub fn load_subdoc(&mut self, guid: &str) -> bool {
        let subdoc = match self.state.subdocs_added.get_mut(guid) {
            Some(subdoc) => subdoc,
            None => match self.doc.subdocs.get_mut(guid) {
                Some(subdoc) => subdoc,
                None => return false,
            },
        };
        if !subdoc.should_load {
            subdoc.should_load = true;
            let subdoc = subdoc.clone();
            self.state.subdocs_loaded.insert(subdoc.guid.clone(), subdoc);
        }
        true
    }

    // ── Commit ──────────────────────────────────────────────────────────

    /// Runs one observer call against its own follow-up transaction. The
    /// follow-up is queued behind this one when the observer changed
    /// anything.
    fn with_follow_up(
        &mut self,
        follow_ups: &mut Vec<TransactionState>,
        f: &mut dyn FnMut(&mut TransactionMut),
    ) {
        let mut txn = TransactionMut::new(&mut *self.doc, None);
        f(&mut txn);
        let state = txn.state;
        let changed = !state.delete_set.is_empty()
            || self.doc.store.state_vector() != state.before_state
            || state.has_subdoc_changes();
        if changed {
            follow_ups.push(state);
        }
    }

    fn is_alive(&self, branch: BranchPtr) -> bool {
        let store = &self.doc.store;
        store
            .branch(branch)
            .item
            .map_or(true, |i| !store.item(i).is_deleted())
    }

    /// The branch followed by its ancestors up to the root.
    fn ancestors(&self, branch: BranchPtr) -> Vec<BranchPtr> {
        let store = &self.doc.store;
        let mut chain = vec![branch];
        let mut cur = branch;
        while let Some(parent) = store
            .branch(cur)
            .item
            .and_then(|i| store.item(i).parent_branch())
        {
            chain.push(parent);
            cur = parent;
        }
        chain
    }

    /// Delivers container events: shallow observers per changed container
    /// first, then deep observers with events ordered by path length.
    fn call_type_observers(&mut self, follow_ups: &mut Vec<TransactionState>) {
        let changed: Vec<_> = self
            .state
            .changed
            .iter()
            .map(|(b, subs)| (*b, subs.clone()))
            .collect();
        let mut deep_events: IndexMap<BranchPtr, Vec<Event>> = IndexMap::new();
        for (target, subs) in changed {
            if !self.is_alive(target) {
                continue;
            }
            let chain = self.ancestors(target);
            let store = &self.doc.store;
            let shallow = !store.branch(target).observers.is_empty();
            let deep = chain.iter().any(|b| !store.branch(*b).deep_observers.is_empty());
            if !shallow && !deep {
                continue;
            }
            let event = self.compute_event(target, &subs);
            if deep {
                for b in chain {
                    deep_events.entry(b).or_default().push(event.clone());
                }
            }
            if shallow {
                let mut observers = self.doc.store.branch_mut(target).observers.take();
                observers.call(&event, |f| self.with_follow_up(follow_ups, f));
                self.doc.store.branch_mut(target).observers.restore(observers);
            }
        }

        for (current, events) in deep_events {
            if self.doc.store.branch(current).deep_observers.is_empty() || !self.is_alive(current) {
                continue;
            }
            let mut events: Vec<Event> = events
                .into_iter()
                .filter(|e| self.is_alive(e.target()))
                .collect();
            for event in events.iter_mut() {
                event.retarget(&self.doc.store, current);
            }
            events.sort_by_key(|e| e.path().len());
            let mut observers: Observers<[Event]> = self.doc.store.branch_mut(current).deep_observers.take();
            observers.call(&events, |f| self.with_follow_up(follow_ups, f));
            self.doc.store.branch_mut(current).deep_observers.restore(observers);
        }
    }

    /// Discards the content of deleted items that are not pinned and pass
    /// the document's filter.
    fn collect_garbage(&mut self) -> Result<()> {
        let ds = &self.state.delete_set;
        let filter = &self.doc.options.gc_filter;
        let store = &mut self.doc.store;
        for (client, ranges) in ds.iter() {
            trace!(client, ranges = ranges.len(), "collecting deleted blocks");
            for range in ranges.iter().rev() {
                let end = range.end();
                let Some(blocks) = store.blocks.get(client) else {
                    continue;
                };
                let Some(mut i) = store.find_index(blocks, range.clock) else {
                    continue;
                };
                loop {
                    let Some(&block) = store.blocks.get(client).and_then(|b| b.get(i)) else {
                        break;
                    };
                    let (clock, _) = store.block_range(&block);
                    if clock >= end {
                        break;
                    }
                    if let Block::Item(ptr) = block {
                        let item: &Item = store.item(ptr);
                        let allowed = filter.as_ref().map_or(true, |f| f(item));
                        if item.is_deleted() && !item.is_keep() && allowed {
                            store.gc_item(ptr, false)?;
                        }
                    }
                    i += 1;
                }
            }
        }
        Ok(())
    }

    /// Merges adjacent blocks touched by the transaction.
    fn merge_blocks(&mut self) {
        let store = &mut self.doc.store;
        for (client, ranges) in self.state.delete_set.iter() {
            for range in ranges.iter().rev() {
                let Some(blocks) = store.blocks.get(client) else {
                    continue;
                };
                let Some(last) = store.find_index(blocks, range.end() - 1) else {
                    continue;
                };
                let mut si = (blocks.len() - 1).min(last + 1);
                while si > 0 {
                    let block = store.blocks[client][si];
                    if store.block_range(&block).0 < range.clock {
                        break;
                    }
                    let merged = store.try_merge_with_lefts(*client, si);
                    si = si.saturating_sub(1 + merged);
                }
            }
        }

        for (client, &clock) in self.state.after_state.iter() {
            let before = self.state.before_state.get(client);
            if before == clock {
                continue;
            }
            let Some(blocks) = store.blocks.get(client) else {
                continue;
            };
            let first = store.find_index(blocks, before).unwrap_or(0).max(1);
            let mut i = blocks.len() as i64 - 1;
            while i >= first as i64 {
                let merged = store.try_merge_with_lefts(*client, i as usize);
                i -= 1 + merged as i64;
            }
        }

        for id in self.state.merge_blocks.iter().rev() {
            let Some(blocks) = store.blocks.get(&id.client) else {
                continue;
            };
            let Some(pos) = store.find_index(blocks, id.clock) else {
                continue;
            };
            if pos + 1 < blocks.len() && store.try_merge_with_lefts(id.client, pos + 1) > 1 {
                continue;
            }
            if pos > 0 {
                store.try_merge_with_lefts(id.client, pos);
            }
        }
    }

    /// Takes the doc-level observers selected by `pick`, runs them against
    /// a follow-up transaction and puts them back.
    fn call_doc_observers<E>(
        &mut self,
        follow_ups: &mut Vec<TransactionState>,
        pick: fn(&mut Doc) -> &mut Observers<E>,
        event: &E,
    ) {
        let mut observers = pick(self.doc).take();
        observers.call(event, |f| self.with_follow_up(follow_ups, f));
        pick(self.doc).restore(observers);
    }

    /// Closing and cleanup of one transaction. Follow-up transactions
    /// created by observers are appended to `queue`.
    fn cleanup(&mut self, queue: &mut VecDeque<TransactionState>) -> Result<()> {
        self.state.delete_set.squash();
        self.state.after_state = self.doc.store.state_vector();
        let mut follow_ups = Vec::new();

        self.call_type_observers(&mut follow_ups);
        if !self.doc.events.after_transaction.is_empty() {
            let event = AfterTransactionEvent {
                before_state: self.state.before_state.clone(),
                after_state: self.state.after_state.clone(),
                delete_set: self.state.delete_set.clone(),
                origin: self.state.origin.clone(),
            };
            self.call_doc_observers(&mut follow_ups, |d| &mut d.events.after_transaction, &event);
        }

        if self.doc.options.gc {
            self.collect_garbage()?;
        }
        self.merge_blocks();

        let client = self.doc.client_id;
        if !self.state.local && self.state.after_state.get(&client) != self.state.before_state.get(&client) {
            let regenerated = self.doc.id_generator.client_id();
            warn!(old = client, new = regenerated, "client id collision, regenerating local client id");
            self.doc.client_id = regenerated;
        }

        let after_state = self.state.after_state.clone();
        if !self.doc.events.update_v1.is_empty() {
            if let Some(update) = self.encode_update::<EncoderV1>(&after_state) {
                let event = UpdateEvent {
                    update,
                    origin: self.state.origin.clone(),
                };
                self.call_doc_observers(&mut follow_ups, |d| &mut d.events.update_v1, &event);
            }
        }
        if !self.doc.events.update_v2.is_empty() {
            if let Some(update) = self.encode_update::<EncoderV2>(&after_state) {
                let event = UpdateEvent {
                    update,
                    origin: self.state.origin.clone(),
                };
                self.call_doc_observers(&mut follow_ups, |d| &mut d.events.update_v2, &event);
            }
        }

        if self.state.has_subdoc_changes() {
            let added: Vec<SubDoc> = self.state.subdocs_added.values().cloned().collect();
            let removed: Vec<SubDoc> = self.state.subdocs_removed.values().cloned().collect();
            let loaded: Vec<SubDoc> = self.state.subdocs_loaded.values().cloned().collect();
            for subdoc in added.iter() {
                self.doc.subdocs.insert(subdoc.guid.clone(), subdoc.clone());
            }
            for subdoc in loaded.iter() {
                if let Some(registered) = self.doc.subdocs.get_mut(&subdoc.guid) {
                    registered.should_load = true;
                }
            }
            for subdoc in removed.iter() {
                self.doc.subdocs.shift_remove(&subdoc.guid);
            }
            if !self.doc.events.subdocs.is_empty() {
                let event = SubdocsEvent { added, removed, loaded };
                self.call_doc_observers(&mut follow_ups, |d| &mut d.events.subdocs, &event);
            }
        }

        queue.extend(follow_ups);
        Ok(())
    }
}

/// Commits a transaction and every follow-up transaction its observers
/// started, strictly in order.
pub(crate) fn commit(doc: &mut Doc, state: TransactionState) -> Result<()> {
    let mut queue = VecDeque::from([state]);
    while let Some(state) = queue.pop_front() {
        let mut txn = TransactionMut {
            doc: &mut *doc,
            state,
        };
        txn.cleanup(&mut queue)?;
    }
    Ok(())
}
