//! Per-replica "next expected clock" summaries.

use std::collections::HashMap;

use ycrdt_buffers::{Reader, Writer};

use crate::error::Result;
use crate::id::ClientID;

/// Maps each replica to the clock of the next operation we expect from it.
/// Replicas that are absent have an implicit clock of zero.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StateVector(HashMap<ClientID, u32>);

impl StateVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn get(&self, client: &ClientID) -> u32 {
        self.0.get(client).copied().unwrap_or(0)
    }

    pub fn contains_client(&self, client: &ClientID) -> bool {
        self.0.contains_key(client)
    }

    pub fn set(&mut self, client: ClientID, clock: u32) {
        self.0.insert(client, clock);
    }

    /// Lowers the recorded clock to `clock`, inserting it if absent.
    pub fn set_min(&mut self, client: ClientID, clock: u32) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).min(clock))
            .or_insert(clock);
    }

    /// Raises the recorded clock to `clock`, inserting it if absent.
    pub fn set_max(&mut self, client: ClientID, clock: u32) {
        self.0
            .entry(client)
            .and_modify(|c| *c = (*c).max(clock))
            .or_insert(clock);
    }

    pub fn iter(&self) -> impl Iterator<Item = (&ClientID, &u32)> {
        self.0.iter()
    }

    /// Entries ordered by descending client id, the order used on the wire.
    pub fn sorted_desc(&self) -> Vec<(ClientID, u32)> {
        let mut entries: Vec<_> = self.0.iter().map(|(c, k)| (*c, *k)).collect();
        entries.sort_unstable_by(|a, b| b.0.cmp(&a.0));
        entries
    }

    pub(crate) fn write(&self, w: &mut Writer) {
        w.var_uint(self.0.len() as u64);
        for (client, clock) in self.sorted_desc() {
            w.var_uint(client);
            w.var_uint(clock as u64);
        }
    }

    pub(crate) fn read(r: &mut Reader<'_>) -> Result<Self> {
        let len = r.try_var_uint()? as usize;
        let mut sv = HashMap::with_capacity(len.min(1024));
        for _ in 0..len {
            let client = r.try_var_uint()?;
            let clock = r.try_var_u32()?;
            sv.insert(client, clock);
        }
        Ok(StateVector(sv))
    }

    /// Encodes the state vector. Both update formats share this layout.
    pub fn encode(&self) -> Vec<u8> {
        let mut w = Writer::new();
        self.write(&mut w);
        w.flush()
    }

    pub fn decode(data: &[u8]) -> Result<Self> {
        Self::read(&mut Reader::new(data))
    }
}

impl FromIterator<(ClientID, u32)> for StateVector {
    fn from_iter<I: IntoIterator<Item = (ClientID, u32)>>(iter: I) -> Self {
        StateVector(iter.into_iter().collect())
    }
}
