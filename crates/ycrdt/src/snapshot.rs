//! Causal cuts of a document: what was known and what was deleted.

use crate::block::Item;
use crate::delete_set::DeleteSet;
use crate::encoding::{DecoderV1, DsDecoder, DsDecoderV2, DsEncoder, DsEncoderV2, EncoderV1};
use crate::error::Result;
use crate::state_vector::StateVector;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Snapshot {
    pub delete_set: DeleteSet,
    pub state_map: StateVector,
}

impl Snapshot {
    pub fn new(mut delete_set: DeleteSet, state_map: StateVector) -> Self {
        delete_set.squash();
        Self {
            delete_set,
            state_map,
        }
    }

    /// Whether `item` existed and was not deleted at this cut.
    pub fn is_visible(&self, item: &Item) -> bool {
        let id = item.id();
        self.state_map.get(&id.client) > id.clock && !self.delete_set.is_deleted(&id)
    }

    fn encode<E: DsEncoder>(&self, mut e: E) -> Vec<u8> {
        self.delete_set.encode(&mut e);
        self.state_map.write(e.rest());
        e.to_vec()
    }

    fn decode<'a, D: DsDecoder<'a>>(mut d: D) -> Result<Snapshot> {
        let delete_set = DeleteSet::decode(&mut d)?;
        let state_map = StateVector::read(d.rest())?;
        Ok(Snapshot::new(delete_set, state_map))
    }

    pub fn encode_v1(&self) -> Vec<u8> {
        self.encode(EncoderV1::new())
    }

    pub fn encode_v2(&self) -> Vec<u8> {
        self.encode(DsEncoderV2::new())
    }

    pub fn decode_v1(data: &[u8]) -> Result<Snapshot> {
        Self::decode(DecoderV1::new(data))
    }

    pub fn decode_v2(data: &[u8]) -> Result<Snapshot> {
        Self::decode(DsDecoderV2::new(data))
    }
}
