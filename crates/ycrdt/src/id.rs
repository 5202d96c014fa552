//! Identifiers, clocks and replica-id generation.

use std::fmt;

use rand::{Rng, RngCore, SeedableRng};
use rand_xoshiro::Xoshiro256StarStar;

/// Replica identifier. Generated in the `u32` range so it survives the
/// var-uint wire encoding used by other implementations.
pub type ClientID = u64;

/// Globally unique identifier of a single logical operation: the replica
/// that produced it and its position in that replica's history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ID {
    pub client: ClientID,
    pub clock: u32,
}

impl ID {
    pub const fn new(client: ClientID, clock: u32) -> Self {
        Self { client, clock }
    }
}

impl fmt::Display for ID {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "<{}#{}>", self.client, self.clock)
    }
}

// ── Id generation ───────────────────────────────────────────────────────

/// Source of randomness for replica ids and document guids.
pub trait ClientIdGenerator {
    fn next_u32(&mut self) -> u32;

    fn client_id(&mut self) -> ClientID {
        self.next_u32() as ClientID
    }

    /// Random version-4 style guid.
    fn guid(&mut self) -> String {
        let mut bytes = [0u8; 16];
        for chunk in bytes.chunks_mut(4) {
            chunk.copy_from_slice(&self.next_u32().to_be_bytes());
        }
        bytes[6] = (bytes[6] & 0x0f) | 0x40;
        bytes[8] = (bytes[8] & 0x3f) | 0x80;
        let hex: String = bytes.iter().map(|b| format!("{b:02x}")).collect();
        format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        )
    }
}

/// Generator backed by the thread-local OS-seeded RNG.
#[derive(Debug, Default, Clone, Copy)]
pub struct RandomIds;

impl ClientIdGenerator for RandomIds {
    fn next_u32(&mut self) -> u32 {
        rand::thread_rng().gen()
    }
}

/// Deterministic generator for reproducible tests.
#[derive(Debug, Clone)]
pub struct SeededIds {
    rng: Xoshiro256StarStar,
}

impl SeededIds {
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Xoshiro256StarStar::seed_from_u64(seed),
        }
    }
}

impl ClientIdGenerator for SeededIds {
    fn next_u32(&mut self) -> u32 {
        self.rng.next_u32()
    }
}
