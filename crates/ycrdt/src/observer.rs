//! Callback registries keyed by subscription id.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use crate::transaction::TransactionMut;

pub type SubscriptionId = u64;

type Handler<E> = Box<dyn FnMut(&mut TransactionMut, &E)>;

/// Registered callbacks for one kind of event, invoked in subscription
/// order. Callbacks receive a transaction they may use to make follow-up
/// changes.
pub struct Observers<E: ?Sized> {
    next_id: SubscriptionId,
    handlers: BTreeMap<SubscriptionId, Handler<E>>,
    /// Ids of handlers currently taken out for a call.
    detached: BTreeSet<SubscriptionId>,
    /// Detached ids unsubscribed before the handlers were restored.
    cancelled: BTreeSet<SubscriptionId>,
}

impl<E: ?Sized> Default for Observers<E> {
    fn default() -> Self {
        Self {
            next_id: 1,
            handlers: BTreeMap::new(),
            detached: BTreeSet::new(),
            cancelled: BTreeSet::new(),
        }
    }
}

impl<E: ?Sized> Observers<E> {
    pub fn subscribe<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &E) + 'static,
    {
        let id = self.next_id;
        self.next_id = self.next_id.saturating_add(1);
        self.handlers.insert(id, Box::new(f));
        id
    }

    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        if self.handlers.remove(&id).is_some() {
            return true;
        }
        self.detached.remove(&id) && self.cancelled.insert(id)
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Detaches the handlers so they can run against a mutable transaction
    /// borrowed from the same document.
    pub(crate) fn take(&mut self) -> Observers<E> {
        self.detached = self.handlers.keys().copied().collect();
        Observers {
            next_id: self.next_id,
            handlers: std::mem::take(&mut self.handlers),
            detached: BTreeSet::new(),
            cancelled: BTreeSet::new(),
        }
    }

    /// Puts back handlers detached by [`Observers::take`], keeping anything
    /// subscribed in the meantime and dropping what was unsubscribed.
    pub(crate) fn restore(&mut self, taken: Observers<E>) {
        self.detached.clear();
        let cancelled = std::mem::take(&mut self.cancelled);
        for (id, handler) in taken.handlers {
            if !cancelled.contains(&id) {
                self.handlers.insert(id, handler);
            }
        }
    }

    /// Invokes every handler through `with_txn`, which supplies the
    /// transaction for that one call.
    pub(crate) fn call<F>(&mut self, event: &E, mut with_txn: F)
    where
        F: FnMut(&mut dyn FnMut(&mut TransactionMut)),
    {
        for handler in self.handlers.values_mut() {
            with_txn(&mut |txn: &mut TransactionMut| handler(txn, event));
        }
    }
}

impl<E: ?Sized> fmt::Debug for Observers<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Observers")
            .field("handlers", &self.handlers.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_are_sequential() {
        let mut obs: Observers<u32> = Observers::default();
        let a = obs.subscribe(|_, _| {});
        let b = obs.subscribe(|_, _| {});
        assert_eq!(b, a + 1);
        assert!(obs.unsubscribe(a));
        assert!(!obs.unsubscribe(a));
        assert_eq!(obs.len(), 1);
    }

    #[test]
    fn unsubscribe_while_taken() {
        let mut obs: Observers<u32> = Observers::default();
        let a = obs.subscribe(|_, _| {});
        let taken = obs.take();
        let b = obs.subscribe(|_, _| {});
        assert!(obs.unsubscribe(a));
        assert!(!obs.unsubscribe(a));
        obs.restore(taken);
        assert_eq!(obs.len(), 1);
        assert!(obs.unsubscribe(b));
    }

    #[test]
    fn stale_ids_are_not_recorded() {
        let mut obs: Observers<u32> = Observers::default();
        let a = obs.subscribe(|_, _| {});
        assert!(obs.unsubscribe(a));
        for _ in 0..3 {
            assert!(!obs.unsubscribe(a));
            assert!(!obs.unsubscribe(a + 100));
        }
        assert!(obs.cancelled.is_empty());

        let b = obs.subscribe(|_, _| {});
        let taken = obs.take();
        assert!(!obs.unsubscribe(a));
        assert!(obs.cancelled.is_empty());
        obs.restore(taken);
        assert!(obs.detached.is_empty());
        assert_eq!(obs.len(), 1);
        assert!(obs.unsubscribe(b));
    }
}
