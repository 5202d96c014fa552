//! Compact, mergeable sets of deleted `(replica, clock range)` pairs.

use std::collections::HashMap;

use crate::encoding::{DecoderV1, DsDecoder, DsDecoderV2, DsEncoder, DsEncoderV2, EncoderV1};
use crate::error::Result;
use crate::id::{ClientID, ID};
use crate::store::Store;

/// A run of `len` deleted clocks starting at `clock`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct DeleteItem {
    pub clock: u32,
    pub len: u32,
}

impl DeleteItem {
    pub const fn new(clock: u32, len: u32) -> Self {
        Self { clock, len }
    }

    pub fn end(&self) -> u32 {
        self.clock + self.len
    }
}

/// Deleted ranges per replica. Ranges are appended unsorted; call
/// [`DeleteSet::squash`] before membership tests or encoding.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeleteSet(HashMap<ClientID, Vec<DeleteItem>>);

impl DeleteSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.0.values().all(Vec::is_empty)
    }

    /// Records `len` deleted clocks starting at `id`.
    pub fn insert(&mut self, id: ID, len: u32) {
        if len > 0 {
            self.0
                .entry(id.client)
                .or_default()
                .push(DeleteItem::new(id.clock, len));
        }
    }

    pub fn ranges(&self, client: &ClientID) -> &[DeleteItem] {
        self.0.get(client).map(Vec::as_slice).unwrap_or(&[])
    }

    pub fn clients(&self) -> impl Iterator<Item = &ClientID> {
        self.0.keys()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &Vec<DeleteItem>)> {
        self.0.iter()
    }

    /// Sorts every replica's ranges by clock and coalesces overlapping or
    /// adjacent ranges in a single left-to-right pass.
    pub fn squash(&mut self) {
        for dels in self.0.values_mut() {
            dels.sort_unstable_by_key(|d| d.clock);
            let mut j = 1;
            for i in 1..dels.len() {
                let right = dels[i];
                let left = &mut dels[j - 1];
                if left.end() >= right.clock {
                    left.len = left.len.max(right.end() - left.clock);
                } else {
                    dels[j] = right;
                    j += 1;
                }
            }
            dels.truncate(j.min(dels.len()));
        }
        self.0.retain(|_, dels| !dels.is_empty());
    }

    /// Unions all sets, then sorts and merges once.
    pub fn merge_all<'a, I>(sets: I) -> DeleteSet
    where
        I: IntoIterator<Item = &'a DeleteSet>,
    {
        let mut merged = DeleteSet::new();
        for ds in sets {
            for (client, dels) in ds.0.iter() {
                merged.0.entry(*client).or_default().extend_from_slice(dels);
            }
        }
        merged.squash();
        merged
    }

    /// Adds all ranges of `other` and squashes.
    pub fn merge(&mut self, other: DeleteSet) {
        for (client, dels) in other.0 {
            self.0.entry(client).or_default().extend(dels);
        }
        self.squash();
    }

    /// Binary search for the range covering `clock`. Requires a squashed set.
    pub(crate) fn find_index(dels: &[DeleteItem], clock: u32) -> Option<usize> {
        let mut left = 0usize;
        let mut right = dels.len();
        while left < right {
            let mid = (left + right) / 2;
            let d = dels[mid];
            if d.clock <= clock {
                if clock < d.end() {
                    return Some(mid);
                }
                left = mid + 1;
            } else {
                right = mid;
            }
        }
        None
    }

    pub fn is_deleted(&self, id: &ID) -> bool {
        self.0
            .get(&id.client)
            .is_some_and(|dels| Self::find_index(dels, id.clock).is_some())
    }

    /// Derives the deleted ranges from a store: one range per contiguous run
    /// of deleted blocks.
    pub(crate) fn from_store(store: &Store) -> DeleteSet {
        let mut ds = DeleteSet::new();
        for (client, blocks) in store.blocks.iter() {
            let mut dels: Vec<DeleteItem> = Vec::new();
            let mut i = 0;
            while i < blocks.len() {
                let block = &blocks[i];
                if store.block_deleted(block) {
                    let (clock, mut len) = store.block_range(block);
                    while i + 1 < blocks.len() && store.block_deleted(&blocks[i + 1]) {
                        i += 1;
                        len += store.block_range(&blocks[i]).1;
                    }
                    dels.push(DeleteItem::new(clock, len));
                }
                i += 1;
            }
            if !dels.is_empty() {
                ds.0.insert(*client, dels);
            }
        }
        ds
    }

    pub(crate) fn encode<E: DsEncoder>(&self, e: &mut E) {
        let mut entries: Vec<_> = self.0.iter().filter(|(_, d)| !d.is_empty()).collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(a.0));
        e.rest().var_uint(entries.len() as u64);
        for (client, dels) in entries {
            e.reset_ds_cur_val();
            e.rest().var_uint(*client);
            e.rest().var_uint(dels.len() as u64);
            for d in dels {
                e.write_ds_clock(d.clock);
                e.write_ds_len(d.len);
            }
        }
    }

    pub(crate) fn decode<'a, D: DsDecoder<'a>>(d: &mut D) -> Result<DeleteSet> {
        let mut ds = DeleteSet::new();
        let num_clients = d.rest().try_var_uint()?;
        for _ in 0..num_clients {
            d.reset_ds_cur_val();
            let client = d.rest().try_var_uint()?;
            let num_deletes = d.rest().try_var_uint()?;
            if num_deletes > 0 {
                let dels = ds.0.entry(client).or_default();
                for _ in 0..num_deletes {
                    let clock = d.read_ds_clock()?;
                    let len = d.read_ds_len()?;
                    dels.push(DeleteItem::new(clock, len));
                }
            }
        }
        Ok(ds)
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        let mut e = EncoderV1::new();
        self.encode(&mut e);
        e.to_vec()
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        let mut e = DsEncoderV2::new();
        self.encode(&mut e);
        e.to_vec()
    }

    pub fn decode_v1(data: &[u8]) -> Result<DeleteSet> {
        Self::decode(&mut DecoderV1::new(data))
    }

    pub fn decode_v2(data: &[u8]) -> Result<DeleteSet> {
        Self::decode(&mut DsDecoderV2::new(data))
    }
}

impl FromIterator<(ClientID, DeleteItem)> for DeleteSet {
    fn from_iter<I: IntoIterator<Item = (ClientID, DeleteItem)>>(iter: I) -> Self {
        let mut ds = DeleteSet::new();
        for (client, d) in iter {
            ds.insert(ID::new(client, d.clock), d.len);
        }
        ds
    }
}
