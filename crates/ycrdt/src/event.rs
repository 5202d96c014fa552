//! Change descriptions delivered to observers after a transaction.

use std::collections::{HashMap, HashSet};
use std::fmt;
use std::sync::Arc;

use crate::block::Item;
use crate::branch::BranchPtr;
use crate::delete_set::DeleteSet;
use crate::doc::SubDoc;
use crate::id::ID;
use crate::state_vector::StateVector;
use crate::store::Store;
use crate::transaction::{Origin, TransactionMut};
use crate::types::Out;

/// One step of a list delta.
#[derive(Debug, Clone, PartialEq)]
pub enum Change {
    Added(Vec<Out>),
    Removed(u32),
    Retain(u32),
}

/// How a map entry changed.
#[derive(Debug, Clone, PartialEq)]
pub enum EntryChange {
    Inserted(Out),
    Updated(Out, Out),
    Removed(Out),
}

/// Step from an observed container towards a nested one.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathSegment {
    Key(Arc<str>),
    Index(u32),
}

impl fmt::Display for PathSegment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PathSegment::Key(key) => write!(f, "{key}"),
            PathSegment::Index(i) => write!(f, "{i}"),
        }
    }
}

/// Changes made to one container by a transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    target: BranchPtr,
    current_target: BranchPtr,
    path: Vec<PathSegment>,
    delta: Vec<Change>,
    keys: HashMap<Arc<str>, EntryChange>,
    added: HashSet<ID>,
    deleted: HashSet<ID>,
    origin: Option<Origin>,
    local: bool,
}

impl Event {
    /// Container that changed.
    pub fn target(&self) -> BranchPtr {
        self.target
    }

    /// Container whose observer receives this event.
    pub fn current_target(&self) -> BranchPtr {
        self.current_target
    }

    /// Path from the current target to the changed container.
    pub fn path(&self) -> &[PathSegment] {
        &self.path
    }

    /// List changes, in document order.
    pub fn delta(&self) -> &[Change] {
        &self.delta
    }

    /// Map entries that changed.
    pub fn keys(&self) -> &HashMap<Arc<str>, EntryChange> {
        &self.keys
    }

    /// Ids of list items inserted by the transaction.
    pub fn added(&self) -> &HashSet<ID> {
        &self.added
    }

    /// Ids of pre-existing list items the transaction deleted.
    pub fn deleted(&self) -> &HashSet<ID> {
        &self.deleted
    }

    pub fn origin(&self) -> Option<&Origin> {
        self.origin.as_ref()
    }

    /// Whether the change was made locally rather than applied from an
    /// update.
    pub fn is_local(&self) -> bool {
        self.local
    }

    pub(crate) fn retarget(&mut self, store: &Store, current: BranchPtr) {
        self.current_target = current;
        self.path = path_to(store, current, self.target);
    }
}

/// Encoded changes of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct UpdateEvent {
    pub update: Vec<u8>,
    pub origin: Option<Origin>,
}

/// Summary of a committed transaction.
#[derive(Debug, Clone, PartialEq)]
pub struct AfterTransactionEvent {
    pub before_state: StateVector,
    pub after_state: StateVector,
    pub delete_set: DeleteSet,
    pub origin: Option<Origin>,
}

/// Sub-documents attached, detached or requested for loading by a
/// transaction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SubdocsEvent {
    pub added: Vec<SubDoc>,
    pub removed: Vec<SubDoc>,
    pub loaded: Vec<SubDoc>,
}

/// Path from `parent` down to `child`: map keys, or list indexes counted
/// over visible units.
pub(crate) fn path_to(store: &Store, parent: BranchPtr, child: BranchPtr) -> Vec<PathSegment> {
    let mut path = Vec::new();
    let mut child = child;
    while child != parent {
        let Some(owner) = store.branch(child).item else {
            break;
        };
        let item = store.item(owner);
        let Some(up) = item.parent_branch() else {
            break;
        };
        match &item.parent_sub {
            Some(key) => path.push(PathSegment::Key(key.clone())),
            None => {
                let mut i = 0;
                let mut c = store.branch(up).start;
                while let Some(ptr) = c {
                    if ptr == owner {
                        break;
                    }
                    let sibling = store.item(ptr);
                    if sibling.is_visible_countable() {
                        i += sibling.len;
                    }
                    c = sibling.right;
                }
                path.push(PathSegment::Index(i));
            }
        }
        child = up;
    }
    path.reverse();
    path
}

fn last_value(item: &Item) -> Option<Out> {
    item.content.content_at(item.len.saturating_sub(1))
}

impl<'doc> TransactionMut<'doc> {
    fn adds(&self, item: &Item) -> bool {
        item.id.clock >= self.state.before_state.get(&item.id.client)
    }

    fn deletes(&self, item: &Item) -> bool {
        self.state.delete_set.is_deleted(&item.id)
    }

    /// Builds the event for `target` from the transaction's before state
    /// and delete set.
    pub(crate) fn compute_event(&self, target: BranchPtr, subs: &HashSet<Option<Arc<str>>>) -> Event {
        let store = &self.doc.store;
        let branch = store.branch(target);
        let mut keys = HashMap::new();
        for key in subs.iter().flatten() {
            let Some(&ptr) = branch.map.get(key) else {
                continue;
            };
            let item = store.item(ptr);
            let change = if self.adds(item) {
                let mut prev = item.left.map(|p| store.item(p));
                while let Some(p) = prev {
                    if !self.adds(p) {
                        break;
                    }
                    prev = p.left.map(|l| store.item(l));
                }
                let overwritten = prev.filter(|p| self.deletes(p)).and_then(last_value);
                match (self.deletes(item), overwritten) {
                    (true, Some(old)) => Some(EntryChange::Removed(old)),
                    (true, None) => None,
                    (false, Some(old)) => last_value(item).map(|new| EntryChange::Updated(old, new)),
                    (false, None) => last_value(item).map(EntryChange::Inserted),
                }
            } else if self.deletes(item) {
                last_value(item).map(EntryChange::Removed)
            } else {
                None
            };
            if let Some(change) = change {
                keys.insert(key.clone(), change);
            }
        }

        let mut delta = Vec::new();
        let mut added = HashSet::new();
        let mut deleted = HashSet::new();
        if subs.contains(&None) {
            let mut last: Option<Change> = None;
            let mut cur = branch.start;
            while let Some(ptr) = cur {
                let item = store.item(ptr);
                if !item.is_countable() {
                    // formatting markers occupy no index
                } else if item.is_deleted() {
                    if self.deletes(item) && !self.adds(item) {
                        match &mut last {
                            Some(Change::Removed(n)) => *n += item.len,
                            _ => {
                                delta.extend(last.take());
                                last = Some(Change::Removed(item.len));
                            }
                        }
                        deleted.insert(item.id);
                    }
                } else if self.adds(item) {
                    let values = item.content.get_content();
                    match &mut last {
                        Some(Change::Added(list)) => list.extend(values),
                        _ => {
                            delta.extend(last.take());
                            last = Some(Change::Added(values));
                        }
                    }
                    added.insert(item.id);
                } else {
                    match &mut last {
                        Some(Change::Retain(n)) => *n += item.len,
                        _ => {
                            delta.extend(last.take());
                            last = Some(Change::Retain(item.len));
                        }
                    }
                }
                cur = item.right;
            }
            // trailing retains carry no information
            if let Some(change) = last {
                if !matches!(change, Change::Retain(_)) {
                    delta.push(change);
                }
            }
        }

        Event {
            target,
            current_target: target,
            path: Vec::new(),
            delta,
            keys,
            added,
            deleted,
            origin: self.state.origin.clone(),
            local: self.state.local,
        }
    }
}

