//! ycrdt: a replicated document engine.
//!
//! Documents hold shared containers (arrays, maps, text) that replicas edit
//! independently. Every insertion is an item with a unique `(client, clock)`
//! id and references to its original neighbours; replicas integrate each
//! other's items with the YATA ordering rules and always converge.
//! Changes travel as binary updates in either the v1 (varint) or the v2
//! (column-oriented) format.
//!
//! ```
//! use ycrdt::{Doc, ReadTxn, StateVector};
//!
//! let mut a = Doc::with_client_id(1);
//! let text = a.get_or_insert_text("t");
//! a.transact_mut(|txn| text.insert(txn, 0, "hello")).unwrap();
//!
//! let mut b = Doc::with_client_id(2);
//! let update = a.encode_state_as_update_v1(&StateVector::default()).unwrap();
//! b.apply_update_v1(&update).unwrap();
//! assert_eq!(b.get_or_insert_text("t").get_string(&b), "hello");
//! ```

pub mod any;
pub mod block;
pub mod branch;
pub mod content;
pub mod delete_set;
pub mod doc;
pub mod encoding;
pub mod error;
pub mod event;
pub mod id;
pub mod observer;
pub mod snapshot;
pub mod state_vector;
pub mod store;
pub mod transaction;
pub mod types;
pub mod update;

pub use any::Any;
pub use block::{BlockRange, Item, ItemPtr};
pub use branch::{BranchPtr, TypeRef};
pub use content::{ContentString, ContentType, ItemContent};
pub use delete_set::{DeleteItem, DeleteSet};
pub use doc::{Doc, GcFilter, Options, SubDoc};
pub use error::{Error, Result};
pub use event::{AfterTransactionEvent, Change, EntryChange, Event, PathSegment, SubdocsEvent, UpdateEvent};
pub use id::{ClientID, ClientIdGenerator, RandomIds, SeededIds, ID};
pub use observer::SubscriptionId;
pub use snapshot::Snapshot;
pub use state_vector::StateVector;
pub use store::Store;
pub use transaction::{Origin, ReadTxn, TransactionMut, WriteTxn};
pub use types::{ArrayRef, In, MapRef, Out, SharedRef, TextRef};
pub use update::{
    convert_update_v1_to_v2, convert_update_v2_to_v1, diff_update_v1, diff_update_v2,
    encode_state_vector_from_update_v1, encode_state_vector_from_update_v2, merge_updates_v1,
    merge_updates_v2, PendingUpdate, Update,
};
