//! Binary buffer primitives used by the ycrdt update codecs.
//!
//! Provides an auto-growing [`Writer`], a bounds-checked [`Reader`] and the
//! run-length column encoders used by the column-oriented update format.

mod reader;
mod rle;
mod writer;

pub use reader::Reader;
pub use rle::{
    IntDiffOptRleDecoder, IntDiffOptRleEncoder, RleDecoder, RleEncoder, StringDecoder,
    StringEncoder, UintOptRleDecoder, UintOptRleEncoder,
};
pub use writer::Writer;

use thiserror::Error;

/// Errors produced while reading a binary buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BufferError {
    #[error("unexpected end of buffer")]
    EndOfBuffer,
    #[error("invalid UTF-8 sequence")]
    InvalidUtf8,
    #[error("variable-length integer overflow")]
    VarIntOverflow,
}
