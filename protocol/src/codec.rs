//! Run-length compression and length-prefixed string coding
//!
//! The compressed stream is a sequence of runs, each introduced by one control
//! byte:
//! - `0x00..=0x7F`: a literal run of `control + 1` bytes follows verbatim
//! - `0x81..=0xFF`: `257 - control` zero bytes, nothing follows
//!
//! Only runs of two or more zeros are worth folding, so the compressor never
//! emits `0x80` (a single zero) and never lets a literal run swallow the start
//! of a zero run. The decompressor accepts any well-formed stream, including
//! ones the compressor would not produce.

use crate::CodecError;

/// Longest run either kind of control byte can describe.
pub const MAX_RUN: usize = 128;

/// Compresses `data` into the control-byte run format.
pub fn compress(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + data.len() / MAX_RUN + 1);
    let len = data.len();
    let mut start = 0;

    while start < len {
        if start + 1 < len && data[start] == 0 && data[start + 1] == 0 {
            let mut end = start + 2;
            while end - start < MAX_RUN && end < len && data[end] == 0 {
                end += 1;
            }
            out.push((257 - (end - start)) as u8);
            start = end;
        } else {
            let mut end = start + 1;
            while end - start < MAX_RUN && end < len {
                // leave a following zero pair for the next run
                if end + 1 < len && data[end] == 0 && data[end + 1] == 0 {
                    break;
                }
                end += 1;
            }
            out.push((end - start - 1) as u8);
            out.extend_from_slice(&data[start..end]);
            start = end;
        }
    }

    out
}

/// Expands a control-byte run stream.
///
/// Fails only when a literal run announces more bytes than remain in `data`.
pub fn decompress(data: &[u8]) -> Result<Vec<u8>, CodecError> {
    let mut out = Vec::with_capacity(data.len() * 2);
    let mut pos = 0;

    while pos < data.len() {
        let control = data[pos];
        pos += 1;

        if control < 0x80 {
            let count = control as usize + 1;
            let end = pos + count;
            if end > data.len() {
                return Err(CodecError::TruncatedRun {
                    offset: pos - 1,
                    wanted: count,
                    available: data.len() - pos,
                });
            }
            out.extend_from_slice(&data[pos..end]);
            pos = end;
        } else {
            let count = 257 - control as usize;
            out.resize(out.len() + count, 0);
        }
    }

    Ok(out)
}

/// Encodes `s` as a 4-byte little-endian `len + 1`, the bytes, then a NUL.
pub fn encode_string(s: &str) -> Vec<u8> {
    let mut out = Vec::with_capacity(s.len() + 5);
    out.extend_from_slice(&(s.len() as u32 + 1).to_le_bytes());
    out.extend_from_slice(s.as_bytes());
    out.push(0);
    out
}

/// Decodes a buffer holding exactly one length-prefixed, NUL-terminated string.
pub fn decode_string(data: &[u8]) -> Result<String, CodecError> {
    if data.len() < 4 {
        return Err(CodecError::StringHeader { available: data.len() });
    }

    let declared = u32::from_le_bytes([data[0], data[1], data[2], data[3]]) as usize;
    if declared == 0 || data.len() - 4 != declared {
        return Err(CodecError::StringLength {
            declared,
            actual: data.len() - 4,
        });
    }

    let terminator = 4 + declared - 1;
    if data[terminator] != 0 {
        return Err(CodecError::MissingTerminator);
    }

    let text = &data[4..terminator];
    if !text.is_ascii() {
        return Err(CodecError::NonAscii);
    }

    Ok(text.iter().map(|&b| b as char).collect())
}
