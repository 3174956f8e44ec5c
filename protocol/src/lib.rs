//! Wire format of the TEN/DSO game protocol.
//!
//! Every packet is a frame: a 2-byte little-endian length (bit `0x8000` set
//! when the body is compressed) followed by a `tag + body` payload. Bodies are
//! little-endian 32-bit integers, 4-character tags and length-prefixed
//! NUL-terminated ASCII strings.
//!
//! This crate is pure: no sockets, no async. The server drives it.

pub mod codec;
pub mod frame;
pub mod wire;

pub use codec::{compress, decode_string, decompress, encode_string};
pub use frame::{encode_frame, Frame, FrameReader, COMPRESSED_FLAG, HEADER_LEN, MAX_FRAME_LEN};
pub use wire::{split_tag, tags, PayloadBuilder, PayloadReader, Tag};

use thiserror::Error;

/// Malformed payload content.
#[derive(Debug, Error)]
pub enum CodecError {
    #[error("literal run at offset {offset} wants {wanted} bytes, only {available} left")]
    TruncatedRun {
        offset: usize,
        wanted: usize,
        available: usize,
    },
    #[error("string needs a 4-byte length, only {available} bytes present")]
    StringHeader { available: usize },
    #[error("string declares {declared} bytes but {actual} follow")]
    StringLength { declared: usize, actual: usize },
    #[error("string is not NUL-terminated")]
    MissingTerminator,
    #[error("string contains non-ASCII bytes")]
    NonAscii,
    #[error("payload too short: wanted {wanted} bytes, {available} left")]
    ShortPayload { wanted: usize, available: usize },
    #[error("payload has {extra} unexpected trailing bytes")]
    TrailingBytes { extra: usize },
}

/// Length prefix inconsistencies.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("declared frame length {declared} is shorter than its own header")]
    BadLength { declared: usize },
    #[error("frame of {len} bytes does not fit a 15-bit length")]
    TooLarge { len: usize },
}
