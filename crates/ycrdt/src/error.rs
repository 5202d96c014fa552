//! Crate error type.

use thiserror::Error;
use ycrdt_buffers::BufferError;

use crate::id::ID;

/// Errors raised by document operations and the update codecs.
///
/// Missing causal dependencies are not errors: updates that reference
/// unknown history are parked as pending state instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("index {index} out of bounds for length {len}")]
    IndexOutOfBounds { index: u32, len: u32 },
    #[error("unsupported content: {0}")]
    UnsupportedContent(&'static str),
    #[error("unknown content reference {0}")]
    UnknownContentRef(u8),
    #[error("unknown type reference {0}")]
    UnknownTypeRef(u8),
    #[error("unknown value tag {0}")]
    UnknownAnyTag(u8),
    #[error("unsupported update feature flag {0}")]
    UnsupportedFeature(u64),
    #[error("no block found at {0}")]
    BlockNotFound(ID),
    #[error("unexpected case: {0}")]
    UnexpectedCase(&'static str),
    #[error(transparent)]
    Buffer(#[from] BufferError),
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, Error>;
