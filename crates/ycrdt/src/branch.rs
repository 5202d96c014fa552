//! Container state shared by every shared type: list head, map entries,
//! visible length, search markers and observer registries.

use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::block::ItemPtr;
use crate::encoding::{Decoder, Encoder};
use crate::error::{Error, Result};
use crate::event::Event;
use crate::id::ID;
use crate::observer::Observers;
use crate::store::Store;

// ── TypeRef ─────────────────────────────────────────────────────────────

pub const TYPE_REF_ARRAY: u8 = 0;
pub const TYPE_REF_MAP: u8 = 1;
pub const TYPE_REF_TEXT: u8 = 2;
pub const TYPE_REF_XML_ELEMENT: u8 = 3;
pub const TYPE_REF_XML_FRAGMENT: u8 = 4;
pub const TYPE_REF_XML_HOOK: u8 = 5;
pub const TYPE_REF_XML_TEXT: u8 = 6;
pub const TYPE_REF_UNDEFINED: u8 = 15;

/// Kind of a shared container.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum TypeRef {
    Array,
    Map,
    Text,
    XmlElement(Arc<str>),
    XmlFragment,
    XmlHook(Arc<str>),
    XmlText,
    /// Root created by a remote update before any local code claimed it.
    Undefined,
}

impl TypeRef {
    pub fn kind(&self) -> u8 {
        match self {
            TypeRef::Array => TYPE_REF_ARRAY,
            TypeRef::Map => TYPE_REF_MAP,
            TypeRef::Text => TYPE_REF_TEXT,
            TypeRef::XmlElement(_) => TYPE_REF_XML_ELEMENT,
            TypeRef::XmlFragment => TYPE_REF_XML_FRAGMENT,
            TypeRef::XmlHook(_) => TYPE_REF_XML_HOOK,
            TypeRef::XmlText => TYPE_REF_XML_TEXT,
            TypeRef::Undefined => TYPE_REF_UNDEFINED,
        }
    }

    pub(crate) fn encode<E: Encoder>(&self, e: &mut E) {
        e.write_type_ref(self.kind());
        match self {
            TypeRef::XmlElement(name) | TypeRef::XmlHook(name) => e.write_key(name),
            _ => {}
        }
    }

    pub(crate) fn decode<'a, D: Decoder<'a>>(d: &mut D) -> Result<TypeRef> {
        Ok(match d.read_type_ref()? {
            TYPE_REF_ARRAY => TypeRef::Array,
            TYPE_REF_MAP => TypeRef::Map,
            TYPE_REF_TEXT => TypeRef::Text,
            TYPE_REF_XML_ELEMENT => TypeRef::XmlElement(d.read_key()?),
            TYPE_REF_XML_FRAGMENT => TypeRef::XmlFragment,
            TYPE_REF_XML_HOOK => TypeRef::XmlHook(d.read_key()?),
            TYPE_REF_XML_TEXT => TypeRef::XmlText,
            TYPE_REF_UNDEFINED => TypeRef::Undefined,
            other => return Err(Error::UnknownTypeRef(other)),
        })
    }

    /// Whether containers of this kind index their list content.
    fn uses_markers(&self) -> bool {
        !matches!(self, TypeRef::Map | TypeRef::XmlHook(_))
    }
}

// ── Pointers ────────────────────────────────────────────────────────────

/// Stable handle to a container inside a document's store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct BranchPtr(pub(crate) u32);

impl BranchPtr {
    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Display for BranchPtr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "branch#{}", self.0)
    }
}

/// Parent reference of an item. Decoded items name their parent by root key
/// or by the id of the item owning the container; integration resolves it
/// to a live branch. `Unknown` marks an orphan or an item whose parent is
/// inherited from its neighbours.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum TypePtr {
    Unknown,
    Branch(BranchPtr),
    Named(Arc<str>),
    ID(ID),
}

// ── Branch ──────────────────────────────────────────────────────────────

pub struct Branch {
    /// Head of the list content.
    pub(crate) start: Option<ItemPtr>,
    /// Latest item written for each key.
    pub(crate) map: HashMap<Arc<str>, ItemPtr>,
    /// Item whose content owns this container, `None` for roots.
    pub(crate) item: Option<ItemPtr>,
    /// Name under which a root is registered.
    pub(crate) name: Option<Arc<str>>,
    /// Number of visible countable units in the list content.
    pub(crate) block_len: u32,
    pub(crate) type_ref: TypeRef,
    /// `None` once formatting content was integrated, or for map-only kinds.
    pub(crate) markers: Option<RefCell<SearchMarkers>>,
    pub(crate) observers: Observers<Event>,
    pub(crate) deep_observers: Observers<[Event]>,
}

impl Branch {
    pub(crate) fn new(type_ref: TypeRef) -> Self {
        let markers = if type_ref.uses_markers() {
            Some(RefCell::new(SearchMarkers::default()))
        } else {
            None
        };
        Self {
            start: None,
            map: HashMap::new(),
            item: None,
            name: None,
            block_len: 0,
            type_ref,
            markers,
            observers: Observers::default(),
            deep_observers: Observers::default(),
        }
    }

    pub fn type_ref(&self) -> &TypeRef {
        &self.type_ref
    }

    /// Number of visible countable units in the list content.
    pub fn len(&self) -> u32 {
        self.block_len
    }

    pub fn is_empty(&self) -> bool {
        self.block_len == 0
    }

    /// Claims a remotely created root for a concrete kind.
    pub(crate) fn upgrade(&mut self, type_ref: TypeRef) {
        if self.type_ref == TypeRef::Undefined {
            if !type_ref.uses_markers() {
                self.markers = None;
            }
            self.type_ref = type_ref;
        }
    }

    pub(crate) fn clear_markers(&self) {
        if let Some(markers) = &self.markers {
            markers.borrow_mut().list.clear();
        }
    }
}

impl fmt::Debug for Branch {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Branch")
            .field("type_ref", &self.type_ref)
            .field("name", &self.name)
            .field("item", &self.item)
            .field("start", &self.start)
            .field("len", &self.block_len)
            .finish()
    }
}

// ── Search markers ──────────────────────────────────────────────────────

pub(crate) const MAX_SEARCH_MARKERS: usize = 80;

#[derive(Debug, Clone, Copy, PartialEq)]
pub(crate) struct SearchMarker {
    pub(crate) ptr: ItemPtr,
    pub(crate) index: u32,
    timestamp: u64,
}

/// Bounded cache of `(item, index)` pairs used to translate a list index
/// into an item without walking from the head. The least recently used
/// marker is recycled once the cache is full.
#[derive(Debug, Default)]
pub(crate) struct SearchMarkers {
    pub(crate) list: Vec<SearchMarker>,
    timestamp: u64,
}

impl SearchMarkers {
    fn tick(&mut self) -> u64 {
        self.timestamp += 1;
        self.timestamp
    }

    fn closest(&self, index: u32) -> Option<usize> {
        let mut best: Option<(usize, u32)> = None;
        for (i, m) in self.list.iter().enumerate() {
            let dist = m.index.abs_diff(index);
            if best.map_or(true, |(_, d)| dist < d) {
                best = Some((i, dist));
            }
        }
        best.map(|(i, _)| i)
    }

    fn overwrite(&mut self, i: usize, ptr: ItemPtr, index: u32) {
        let timestamp = self.tick();
        self.list[i] = SearchMarker {
            ptr,
            index,
            timestamp,
        };
    }

    fn mark(&mut self, ptr: ItemPtr, index: u32) {
        if self.list.len() >= MAX_SEARCH_MARKERS {
            let oldest = self
                .list
                .iter()
                .enumerate()
                .min_by_key(|(_, m)| m.timestamp)
                .map(|(i, _)| i);
            if let Some(i) = oldest {
                self.overwrite(i, ptr, index);
            }
        } else {
            let timestamp = self.tick();
            self.list.push(SearchMarker {
                ptr,
                index,
                timestamp,
            });
        }
    }

    /// Redirects markers after `right` was merged into `left`.
    pub(crate) fn merged(&mut self, left: ItemPtr, right: ItemPtr, left_len: u32, visible: bool) {
        for m in self.list.iter_mut().filter(|m| m.ptr == right) {
            m.ptr = left;
            if visible {
                m.index = m.index.saturating_sub(left_len);
            }
        }
    }
}

/// Finds the item covering `index`, starting from the closest marker, and
/// records the result as a marker. Returns the item together with the index
/// of its first unit. `None` means the caller should walk from the head.
pub(crate) fn find_marker(store: &Store, branch: BranchPtr, index: u32) -> Option<(ItemPtr, u32)> {
    let b = store.branch(branch);
    let start = b.start?;
    if index == 0 {
        return None;
    }
    let mut markers = b.markers.as_ref()?.borrow_mut();
    let closest = markers.closest(index);
    let (mut p, mut pindex) = match closest {
        Some(i) => {
            let t = markers.tick();
            let m = &mut markers.list[i];
            m.timestamp = t;
            (m.ptr, m.index)
        }
        None => (start, 0),
    };
    // walk right
    loop {
        let item = store.item(p);
        match item.right {
            Some(right) if pindex < index => {
                if item.is_visible_countable() {
                    if index < pindex + item.len {
                        break;
                    }
                    pindex += item.len;
                }
                p = right;
            }
            _ => break,
        }
    }
    // walk left
    while pindex > index {
        match store.item(p).left {
            Some(left) => {
                p = left;
                let item = store.item(p);
                if item.is_visible_countable() {
                    pindex = pindex.saturating_sub(item.len);
                }
            }
            None => break,
        }
    }
    // never point at an item that could still merge into its left neighbour
    while let Some(left) = store.item(p).left {
        let l = store.item(left);
        let id = store.item(p).id;
        if l.id.client == id.client && l.id.clock + l.len == id.clock {
            p = left;
            if l.is_visible_countable() {
                pindex = pindex.saturating_sub(l.len);
            }
        } else {
            break;
        }
    }
    let threshold = b.block_len as f64 / MAX_SEARCH_MARKERS as f64;
    match closest {
        Some(i) if (markers.list[i].index.abs_diff(pindex) as f64) < threshold => {
            markers.overwrite(i, p, pindex)
        }
        _ => markers.mark(p, pindex),
    }
    Some((p, pindex))
}

/// Shifts marker indexes after `len` units were inserted (positive) or
/// removed (negative) at `index`.
pub(crate) fn update_marker_changes(store: &Store, branch: BranchPtr, index: u32, len: i64) {
    let Some(cell) = store.branch(branch).markers.as_ref() else {
        return;
    };
    let mut markers = cell.borrow_mut();
    let mut i = markers.list.len();
    while i > 0 {
        i -= 1;
        if len > 0 {
            let mut m = markers.list[i];
            let mut p = Some(m.ptr);
            while let Some(ptr) = p {
                let item = store.item(ptr);
                if item.is_deleted() || !item.is_countable() {
                    p = item.left;
                    if let Some(left) = p {
                        let l = store.item(left);
                        if l.is_visible_countable() {
                            m.index = m.index.saturating_sub(l.len);
                        }
                    }
                } else {
                    break;
                }
            }
            let duplicate = p.is_some_and(|ptr| {
                markers
                    .list
                    .iter()
                    .enumerate()
                    .any(|(j, other)| j != i && other.ptr == ptr)
            });
            match p {
                Some(ptr) if !duplicate => {
                    m.ptr = ptr;
                    markers.list[i] = m;
                }
                _ => {
                    markers.list.remove(i);
                    continue;
                }
            }
        }
        let m = &mut markers.list[i];
        if index < m.index || (len > 0 && index == m.index) {
            m.index = (index as i64).max(m.index as i64 + len) as u32;
        }
    }
}
