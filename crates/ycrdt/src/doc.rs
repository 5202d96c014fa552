//! The replicated document: configuration, root containers and the entry
//! points for transactions and document-level events.

use std::fmt;
use std::sync::Arc;

use indexmap::IndexMap;

use crate::any::Any;
use crate::block::Item;
use crate::branch::{BranchPtr, TypeRef};
use crate::delete_set::DeleteSet;
use crate::error::Result;
use crate::event::{AfterTransactionEvent, SubdocsEvent, UpdateEvent};
use crate::id::{ClientID, ClientIdGenerator, RandomIds};
use crate::observer::{Observers, SubscriptionId};
use crate::store::Store;
use crate::transaction::{commit, Origin, ReadTxn, TransactionMut, WriteTxn};
use crate::types::{ArrayRef, MapRef, SharedRef, TextRef};
use crate::update::PendingUpdate;

/// Predicate consulted before the content of a deleted item is discarded.
pub type GcFilter = Box<dyn Fn(&Item) -> bool>;

// ── Options ─────────────────────────────────────────────────────────────

pub struct Options {
    /// Replica id. Drawn from `id_generator` when absent.
    pub client_id: Option<ClientID>,
    /// Globally unique document id. Drawn from `id_generator` when absent.
    pub guid: Option<Arc<str>>,
    pub collection_id: Option<Arc<str>>,
    /// Discard the content of deleted items on commit.
    pub gc: bool,
    pub gc_filter: Option<GcFilter>,
    pub meta: Option<Any>,
    /// Load this document automatically when it is embedded as a
    /// sub-document.
    pub auto_load: bool,
    pub should_load: bool,
    pub id_generator: Box<dyn ClientIdGenerator>,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            client_id: None,
            guid: None,
            collection_id: None,
            gc: true,
            gc_filter: None,
            meta: None,
            auto_load: false,
            should_load: true,
            id_generator: Box::new(RandomIds),
        }
    }
}

impl Options {
    pub fn with_client_id(client_id: ClientID) -> Self {
        Self {
            client_id: Some(client_id),
            ..Self::default()
        }
    }
}

impl fmt::Debug for Options {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Options")
            .field("client_id", &self.client_id)
            .field("guid", &self.guid)
            .field("collection_id", &self.collection_id)
            .field("gc", &self.gc)
            .field("gc_filter", &self.gc_filter.is_some())
            .field("meta", &self.meta)
            .field("auto_load", &self.auto_load)
            .field("should_load", &self.should_load)
            .finish()
    }
}

// ── Sub-documents ───────────────────────────────────────────────────────

/// Descriptor of a document embedded in another one. Only the guid and
/// options travel with the parent; the sub-document's own content is
/// synchronized separately.
#[derive(Debug, Clone, PartialEq)]
pub struct SubDoc {
    pub guid: Arc<str>,
    /// Options written on the wire (`gc`, `autoLoad`, `meta`).
    pub opts: Any,
    pub should_load: bool,
}

impl SubDoc {
    /// Descriptor for embedding a document created with `options`.
    pub fn new(guid: impl Into<Arc<str>>, options: &Options) -> Self {
        let mut opts = IndexMap::new();
        if !options.gc {
            opts.insert("gc".to_string(), Any::Bool(false));
        }
        if options.auto_load {
            opts.insert("autoLoad".to_string(), Any::Bool(true));
        }
        if let Some(meta) = &options.meta {
            opts.insert("meta".to_string(), meta.clone());
        }
        Self {
            guid: guid.into(),
            opts: Any::Map(Arc::new(opts)),
            should_load: false,
        }
    }

    pub(crate) fn from_wire(guid: Arc<str>, opts: Any) -> Self {
        let flag = |key: &str| match &opts {
            Any::Map(map) => matches!(map.get(key), Some(Any::Bool(true))),
            _ => false,
        };
        let should_load = flag("shouldLoad") || flag("autoLoad");
        Self {
            guid,
            opts,
            should_load,
        }
    }

    pub fn auto_load(&self) -> bool {
        match &self.opts {
            Any::Map(map) => matches!(map.get("autoLoad"), Some(Any::Bool(true))),
            _ => false,
        }
    }
}

// ── Doc ─────────────────────────────────────────────────────────────────

#[derive(Default)]
pub(crate) struct DocEvents {
    pub(crate) update_v1: Observers<UpdateEvent>,
    pub(crate) update_v2: Observers<UpdateEvent>,
    pub(crate) after_transaction: Observers<AfterTransactionEvent>,
    pub(crate) subdocs: Observers<SubdocsEvent>,
}

pub struct Doc {
    pub(crate) store: Store,
    pub(crate) client_id: ClientID,
    pub(crate) guid: Arc<str>,
    pub(crate) options: Options,
    pub(crate) id_generator: Box<dyn ClientIdGenerator>,
    pub(crate) events: DocEvents,
    /// Attached sub-documents by guid.
    pub(crate) subdocs: IndexMap<Arc<str>, SubDoc>,
}

impl Default for Doc {
    fn default() -> Self {
        Self::new()
    }
}

impl Doc {
    pub fn new() -> Self {
        Self::with_options(Options::default())
    }

    pub fn with_client_id(client_id: ClientID) -> Self {
        Self::with_options(Options::with_client_id(client_id))
    }

    pub fn with_options(mut options: Options) -> Self {
        let mut id_generator = std::mem::replace(&mut options.id_generator, Box::new(RandomIds));
        let client_id = match options.client_id {
            Some(id) => id,
            None => id_generator.client_id(),
        };
        let guid = match &options.guid {
            Some(guid) => guid.clone(),
            None => id_generator.guid().into(),
        };
        Self {
            store: Store::new(),
            client_id,
            guid,
            options,
            id_generator,
            events: DocEvents::default(),
            subdocs: IndexMap::new(),
        }
    }

    pub fn client_id(&self) -> ClientID {
        self.client_id
    }

    pub fn guid(&self) -> &str {
        &self.guid
    }

    pub fn options(&self) -> &Options {
        &self.options
    }

    /// Descriptor to embed this document into another one.
    pub fn as_subdoc(&self) -> SubDoc {
        SubDoc::new(self.guid.clone(), &self.options)
    }

    // ── Roots ───────────────────────────────────────────────────────────

    fn root<T: SharedRef>(&mut self, name: &str, type_ref: TypeRef) -> T {
        T::from(self.store.get_or_create_root(name, type_ref))
    }

    pub fn get_or_insert_array(&mut self, name: &str) -> ArrayRef {
        self.root(name, TypeRef::Array)
    }

    pub fn get_or_insert_map(&mut self, name: &str) -> MapRef {
        self.root(name, TypeRef::Map)
    }

    pub fn get_or_insert_text(&mut self, name: &str) -> TextRef {
        self.root(name, TypeRef::Text)
    }

    /// Names and handles of every root container, sorted by name.
    pub fn roots(&self) -> Vec<(Arc<str>, BranchPtr)> {
        let mut roots: Vec<_> = self
            .store
            .roots
            .iter()
            .map(|(name, ptr)| (name.clone(), *ptr))
            .collect();
        roots.sort_by(|a, b| a.0.cmp(&b.0));
        roots
    }

    /// JSON view of every root container.
    pub fn to_json(&self) -> serde_json::Value {
        let mut map = serde_json::Map::new();
        for (name, ptr) in self.roots() {
            map.insert(name.to_string(), crate::types::branch_to_json(&self.store, ptr));
        }
        serde_json::Value::Object(map)
    }

    // ── Transactions ────────────────────────────────────────────────────

    /// Runs `f` in a transaction and commits it. Observers run after `f`
    /// returns; the changes made before an error are committed too.
    pub fn transact_mut<F, R>(&mut self, f: F) -> Result<R>
    where
        F: FnOnce(&mut TransactionMut) -> Result<R>,
    {
        self.run_transaction(None, f)
    }

    /// Like [`Doc::transact_mut`] with an origin surfaced in events.
    pub fn transact_mut_with<F, R>(&mut self, origin: impl Into<Origin>, f: F) -> Result<R>
    where
        F: FnOnce(&mut TransactionMut) -> Result<R>,
    {
        self.run_transaction(Some(origin.into()), f)
    }

    fn run_transaction<F, R>(&mut self, origin: Option<Origin>, f: F) -> Result<R>
    where
        F: FnOnce(&mut TransactionMut) -> Result<R>,
    {
        let mut txn = TransactionMut::new(self, origin);
        let result = f(&mut txn);
        let state = txn.state;
        commit(self, state)?;
        result
    }

    pub fn apply_update_v1(&mut self, update: &[u8]) -> Result<()> {
        self.transact_mut(|txn| txn.apply_update_v1(update))
    }

    pub fn apply_update_v2(&mut self, update: &[u8]) -> Result<()> {
        self.transact_mut(|txn| txn.apply_update_v2(update))
    }

    // ── Pending state ───────────────────────────────────────────────────

    /// Blocks waiting for missing dependencies, with the clocks they need.
    pub fn pending_update(&self) -> Option<&PendingUpdate> {
        self.store.pending.as_ref()
    }

    /// Deletions of blocks not received yet.
    pub fn pending_delete_set(&self) -> Option<&DeleteSet> {
        self.store.pending_ds.as_ref()
    }

    /// Sub-documents currently attached to this document.
    pub fn subdocs(&self) -> impl Iterator<Item = &SubDoc> {
        self.subdocs.values()
    }

    // ── Events ──────────────────────────────────────────────────────────

    /// Called with the V1 encoding of every committed transaction that
    /// changed something.
    pub fn observe_update_v1<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &UpdateEvent) + 'static,
    {
        self.events.update_v1.subscribe(f)
    }

    pub fn unobserve_update_v1(&mut self, id: SubscriptionId) -> bool {
        self.events.update_v1.unsubscribe(id)
    }

    pub fn observe_update_v2<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &UpdateEvent) + 'static,
    {
        self.events.update_v2.subscribe(f)
    }

    pub fn unobserve_update_v2(&mut self, id: SubscriptionId) -> bool {
        self.events.update_v2.unsubscribe(id)
    }

    pub fn observe_after_transaction<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &AfterTransactionEvent) + 'static,
    {
        self.events.after_transaction.subscribe(f)
    }

    pub fn unobserve_after_transaction(&mut self, id: SubscriptionId) -> bool {
        self.events.after_transaction.unsubscribe(id)
    }

    pub fn observe_subdocs<F>(&mut self, f: F) -> SubscriptionId
    where
        F: FnMut(&mut TransactionMut, &SubdocsEvent) + 'static,
    {
        self.events.subdocs.subscribe(f)
    }

    pub fn unobserve_subdocs(&mut self, id: SubscriptionId) -> bool {
        self.events.subdocs.unsubscribe(id)
    }
}

impl ReadTxn for Doc {
    fn store(&self) -> &Store {
        &self.store
    }
}

impl WriteTxn for Doc {
    fn store_mut(&mut self) -> &mut Store {
        &mut self.store
    }
}

impl fmt::Debug for Doc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Doc")
            .field("client_id", &self.client_id)
            .field("guid", &self.guid)
            .field("store", &self.store)
            .finish()
    }
}
