//! Wire framing: a 2-byte little-endian length that counts itself, with the
//! top bit flagging a compressed body.

use crate::codec::{compress, decompress};
use crate::{CodecError, FrameError};

/// Size of the length prefix.
pub const HEADER_LEN: usize = 2;
/// Bit of the length prefix marking a compressed body.
pub const COMPRESSED_FLAG: u16 = 0x8000;
/// Largest value the 15-bit length can carry, header included.
pub const MAX_FRAME_LEN: usize = 0x7FFF;

/// One complete frame body as read off the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub compressed: bool,
    pub body: Vec<u8>,
}

impl Frame {
    /// Returns the `tag + body` payload, expanding it if it was compressed.
    pub fn into_payload(self) -> Result<Vec<u8>, CodecError> {
        if self.compressed {
            decompress(&self.body)
        } else {
            Ok(self.body)
        }
    }
}

/// Frames `payload` for sending.
///
/// With `allow_compress` the compressed form is used only when it is strictly
/// shorter than the raw payload.
pub fn encode_frame(payload: &[u8], allow_compress: bool) -> Result<Vec<u8>, FrameError> {
    let packed = if allow_compress {
        Some(compress(payload)).filter(|packed| packed.len() < payload.len())
    } else {
        None
    };

    let (body, flag) = match &packed {
        Some(packed) => (packed.as_slice(), COMPRESSED_FLAG),
        None => (payload, 0),
    };

    let total = HEADER_LEN + body.len();
    if total > MAX_FRAME_LEN {
        return Err(FrameError::TooLarge { len: total });
    }

    let mut out = Vec::with_capacity(total);
    out.extend_from_slice(&(total as u16 | flag).to_le_bytes());
    out.extend_from_slice(body);
    Ok(out)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ReadState {
    /// Collecting the 2-byte length prefix.
    AwaitingHeader,
    /// Collecting `len` body bytes.
    AwaitingBody { len: usize, compressed: bool },
}

/// Incremental frame assembler.
///
/// Bytes are pushed as they arrive, in chunks of any size; complete frames
/// come out in order. A frame split across many reads, or many frames in one
/// read, are both handled.
#[derive(Debug)]
pub struct FrameReader {
    state: ReadState,
    buf: Vec<u8>,
}

impl FrameReader {
    pub fn new() -> Self {
        Self {
            state: ReadState::AwaitingHeader,
            buf: Vec::with_capacity(HEADER_LEN),
        }
    }

    /// Feeds `data`, appending every frame it completes to `out`.
    ///
    /// On a bad header the frames completed before it are already in `out`.
    pub fn push(&mut self, mut data: &[u8], out: &mut Vec<Frame>) -> Result<(), FrameError> {
        loop {
            match self.state {
                ReadState::AwaitingHeader => {
                    if data.is_empty() {
                        break;
                    }
                    let take = (HEADER_LEN - self.buf.len()).min(data.len());
                    self.buf.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.buf.len() == HEADER_LEN {
                        let raw = u16::from_le_bytes([self.buf[0], self.buf[1]]);
                        let declared = (raw & !COMPRESSED_FLAG) as usize;
                        if declared < HEADER_LEN {
                            return Err(FrameError::BadLength { declared });
                        }
                        self.buf.clear();
                        self.state = ReadState::AwaitingBody {
                            len: declared - HEADER_LEN,
                            compressed: raw & COMPRESSED_FLAG != 0,
                        };
                    }
                }
                ReadState::AwaitingBody { len, compressed } => {
                    let take = (len - self.buf.len()).min(data.len());
                    self.buf.extend_from_slice(&data[..take]);
                    data = &data[take..];

                    if self.buf.len() < len {
                        break;
                    }
                    out.push(Frame {
                        compressed,
                        body: std::mem::take(&mut self.buf),
                    });
                    self.state = ReadState::AwaitingHeader;
                }
            }
        }

        Ok(())
    }

    /// True when some bytes of an unfinished frame are buffered.
    pub fn is_mid_frame(&self) -> bool {
        self.state != ReadState::AwaitingHeader || !self.buf.is_empty()
    }

    /// How many more bytes the current frame needs.
    pub fn wanted(&self) -> usize {
        match self.state {
            ReadState::AwaitingHeader => HEADER_LEN - self.buf.len(),
            ReadState::AwaitingBody { len, .. } => len - self.buf.len(),
        }
    }
}

impl Default for FrameReader {
    fn default() -> Self {
        Self::new()
    }
}
