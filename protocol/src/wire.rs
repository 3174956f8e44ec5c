//! Tags and little-endian payload helpers shared by requests and responses.

use crate::codec::{decode_string, encode_string};
use crate::CodecError;
use std::fmt;

/// A 4-character ASCII identifier: command tags and block tags alike.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Tag(pub [u8; 4]);

impl Tag {
    pub const fn new(bytes: &[u8; 4]) -> Self {
        Tag(*bytes)
    }

    pub fn as_bytes(&self) -> &[u8; 4] {
        &self.0
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            let c = if b.is_ascii_graphic() { b as char } else { '.' };
            write!(f, "{c}")?;
        }
        Ok(())
    }
}

/// Request and response tags.
pub mod tags {
    use super::Tag;

    pub const LAHI: Tag = Tag::new(b"LAHI");
    pub const LAUP: Tag = Tag::new(b"LAUP");
    pub const DSIT: Tag = Tag::new(b"DSIT");
    pub const DSLG: Tag = Tag::new(b"DSLG");
    pub const DSSL: Tag = Tag::new(b"DSSL");
    pub const DSNS: Tag = Tag::new(b"DSNS");
    pub const DSPS: Tag = Tag::new(b"DSPS");
    pub const DSDT: Tag = Tag::new(b"DSDT");
    pub const DSRS: Tag = Tag::new(b"DSRS");
    pub const DSRL: Tag = Tag::new(b"DSRL");
    pub const DSNM: Tag = Tag::new(b"DSNM");
    pub const DSRI: Tag = Tag::new(b"DSRI");
    pub const DSRD: Tag = Tag::new(b"DSRD");
    pub const DSWQ: Tag = Tag::new(b"DSWQ");
    pub const DSWT: Tag = Tag::new(b"DSWT");

    pub const LA_HI: Tag = Tag::new(b"laHI");
    pub const LA_OK: Tag = Tag::new(b"laOK");
    pub const LA_NO: Tag = Tag::new(b"laNO");
    pub const DS_IN: Tag = Tag::new(b"dsIN");
    pub const DS_NI: Tag = Tag::new(b"dsNI");
    pub const DS_SL: Tag = Tag::new(b"dsSL");
    pub const DS_PS: Tag = Tag::new(b"dsPS");
    pub const DS_DT: Tag = Tag::new(b"dsDT");
    pub const DS_RS: Tag = Tag::new(b"dsRS");
    pub const DS_RL: Tag = Tag::new(b"dsRL");
    pub const DS_NM: Tag = Tag::new(b"dsNM");
    pub const DS_RI: Tag = Tag::new(b"dsRI");
    pub const DS_RD: Tag = Tag::new(b"dsRD");
    pub const DS_WT: Tag = Tag::new(b"dsWT");
    pub const DS_WE: Tag = Tag::new(b"dsWE");
    pub const DS_CL: Tag = Tag::new(b"dsCL");

    /// Shared memory block tags.
    pub const GLOB: Tag = Tag::new(b"GLOB");
    pub const GLRG: Tag = Tag::new(b"GLRG");
    pub const PCSA: Tag = Tag::new(b"PCSA");
    pub const PCIN: Tag = Tag::new(b"PCIN");
    pub const PCOU: Tag = Tag::new(b"PCOU");
    pub const PCQK: Tag = Tag::new(b"PCQK");
}

/// Splits a payload into its leading tag and the rest.
pub fn split_tag(payload: &[u8]) -> Option<(Tag, &[u8])> {
    if payload.len() < 4 {
        return None;
    }
    let (head, body) = payload.split_at(4);
    Some((Tag([head[0], head[1], head[2], head[3]]), body))
}

/// Cursor over a request body.
#[derive(Debug)]
pub struct PayloadReader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> PayloadReader<'a> {
    pub fn new(data: &'a [u8]) -> Self {
        Self { data, pos: 0 }
    }

    pub fn remaining(&self) -> usize {
        self.data.len() - self.pos
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::ShortPayload {
                wanted: n,
                available: self.remaining(),
            });
        }
        let slice = &self.data[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    pub fn u32(&mut self) -> Result<u32, CodecError> {
        let b = self.take(4)?;
        Ok(u32::from_le_bytes([b[0], b[1], b[2], b[3]]))
    }

    pub fn i32(&mut self) -> Result<i32, CodecError> {
        Ok(self.u32()? as i32)
    }

    pub fn tag(&mut self) -> Result<Tag, CodecError> {
        let b = self.take(4)?;
        Ok(Tag([b[0], b[1], b[2], b[3]]))
    }

    /// Reads one length-prefixed string, leaving any following fields.
    pub fn string(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let declared = self.u32()? as usize;
        self.take(declared)?;
        decode_string(&self.data[start..self.pos])
    }

    /// Takes everything that is left.
    pub fn rest(&mut self) -> &'a [u8] {
        let slice = &self.data[self.pos..];
        self.pos = self.data.len();
        slice
    }

    /// Fails if any bytes were left unread.
    pub fn finish(self) -> Result<(), CodecError> {
        match self.remaining() {
            0 => Ok(()),
            extra => Err(CodecError::TrailingBytes { extra }),
        }
    }
}

/// Builder for a response payload: tag first, then little-endian fields.
#[derive(Debug, Clone)]
pub struct PayloadBuilder {
    buf: Vec<u8>,
}

impl PayloadBuilder {
    pub fn new(tag: Tag) -> Self {
        let mut buf = Vec::with_capacity(64);
        buf.extend_from_slice(tag.as_bytes());
        Self { buf }
    }

    pub fn u32(mut self, value: u32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn i32(mut self, value: i32) -> Self {
        self.buf.extend_from_slice(&value.to_le_bytes());
        self
    }

    pub fn u8(mut self, value: u8) -> Self {
        self.buf.push(value);
        self
    }

    pub fn tag(mut self, tag: Tag) -> Self {
        self.buf.extend_from_slice(tag.as_bytes());
        self
    }

    pub fn string(mut self, s: &str) -> Self {
        self.buf.extend(encode_string(s));
        self
    }

    pub fn bytes(mut self, data: &[u8]) -> Self {
        self.buf.extend_from_slice(data);
        self
    }

    pub fn build(self) -> Vec<u8> {
        self.buf
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_display() {
        assert_eq!(tags::DS_IN.to_string(), "dsIN");
        assert_eq!(Tag([b'A', 0, b'B', 0xFF]).to_string(), "A.B.");
    }

    #[test]
    fn test_split_tag() {
        let (tag, body) = split_tag(b"DSRS\x01\x00\x00\x00").unwrap();
        assert_eq!(tag, tags::DSRS);
        assert_eq!(body, &[1, 0, 0, 0]);
        assert!(split_tag(b"DS").is_none());
    }

    #[test]
    fn test_reader_fields() {
        let data = PayloadBuilder::new(tags::DSRD)
            .u32(7)
            .i32(-3)
            .string("PCSA")
            .u32(99)
            .build();

        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.tag().unwrap(), tags::DSRD);
        assert_eq!(reader.u32().unwrap(), 7);
        assert_eq!(reader.i32().unwrap(), -3);
        assert_eq!(reader.string().unwrap(), "PCSA");
        assert_eq!(reader.u32().unwrap(), 99);
        reader.finish().unwrap();
    }

    #[test]
    fn test_reader_two_strings() {
        let mut data = encode_string("alice");
        data.extend(encode_string("secret"));

        let mut reader = PayloadReader::new(&data);
        assert_eq!(reader.string().unwrap(), "alice");
        assert_eq!(reader.string().unwrap(), "secret");
        assert_eq!(reader.remaining(), 0);
    }

    #[test]
    fn test_reader_short_and_trailing() {
        let mut reader = PayloadReader::new(&[1, 2, 3]);
        assert!(matches!(
            reader.u32(),
            Err(CodecError::ShortPayload { wanted: 4, available: 3 })
        ));

        let reader = PayloadReader::new(&[1, 2, 3]);
        assert!(matches!(
            reader.finish(),
            Err(CodecError::TrailingBytes { extra: 3 })
        ));
    }

    #[test]
    fn test_reader_string_overruns_payload() {
        let mut reader = PayloadReader::new(&[10, 0, 0, 0, b'a', 0]);
        assert!(matches!(reader.string(), Err(CodecError::ShortPayload { .. })));
    }
}
