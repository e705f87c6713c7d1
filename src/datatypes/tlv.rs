use crate::codec::CodecError;
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

/// Optional parameter tags used by the gateway.
pub mod tags {
    pub const RECEIPTED_MESSAGE_ID: u16 = 0x001E;
    pub const SAR_MSG_REF_NUM: u16 = 0x020C;
    pub const SAR_TOTAL_SEGMENTS: u16 = 0x020E;
    pub const SAR_SEGMENT_SEQNUM: u16 = 0x020F;
    pub const MESSAGE_PAYLOAD: u16 = 0x0424;
    pub const MESSAGE_STATE: u16 = 0x0427;
}

#[derive(Clone, Debug, PartialEq)]
pub struct Tlv {
    /// The Tag field is used to uniquely identify the particular optional parameter in question.
    pub tag: u16,

    /// The Value field contains the actual data for the optional parameter in question.
    /// Its length is written on the wire as the Length field.
    pub value: Bytes,
}

impl Tlv {
    pub const HEADER_SIZE: usize = 4;

    pub fn new(tag: u16, value: impl Into<Bytes>) -> Self {
        Tlv {
            tag,
            value: value.into(),
        }
    }

    pub fn from_u8(tag: u16, value: u8) -> Self {
        Tlv::new(tag, vec![value])
    }

    /// Two byte big-endian value.
    pub fn from_u16(tag: u16, value: u16) -> Self {
        Tlv::new(tag, value.to_be_bytes().to_vec())
    }

    /// Null terminated string value.
    pub fn from_cstring(tag: u16, value: &str) -> Self {
        let mut bytes = Vec::with_capacity(value.len() + 1);
        bytes.extend_from_slice(value.as_bytes());
        bytes.push(0);
        Tlv::new(tag, bytes)
    }

    pub fn length(&self) -> usize {
        self.value.len()
    }

    pub fn as_u8(&self) -> Option<u8> {
        match self.value.as_ref() {
            [b] => Some(*b),
            _ => None,
        }
    }

    pub fn as_u16(&self) -> Option<u16> {
        match self.value.as_ref() {
            [hi, lo] => Some(u16::from_be_bytes([*hi, *lo])),
            _ => None,
        }
    }

    /// Value up to (not including) the null terminator.
    pub fn as_cstring(&self) -> Option<&str> {
        let end = self.value.iter().position(|&b| b == 0)?;
        std::str::from_utf8(&self.value[..end]).ok()
    }

    pub fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        let length = u16::try_from(self.value.len()).map_err(|_| {
            CodecError::TlvError(format!(
                "value of tag {:#06x} is {} bytes, limit is {}",
                self.tag,
                self.value.len(),
                u16::MAX
            ))
        })?;

        buf.put_u16(self.tag);
        buf.put_u16(length);
        buf.put_slice(&self.value);
        Ok(())
    }

    pub fn encoded_size(&self) -> usize {
        Self::HEADER_SIZE + self.value.len()
    }

    pub fn decode(buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        if buf.remaining() < Self::HEADER_SIZE {
            return Err(CodecError::TlvError(format!(
                "{} trailing bytes cannot hold a TLV header",
                buf.remaining()
            )));
        }

        let tag = buf.get_u16();
        let length = buf.get_u16() as usize;
        if buf.remaining() < length {
            return Err(CodecError::TlvError(format!(
                "tag {tag:#06x} declares {length} bytes but only {} remain",
                buf.remaining()
            )));
        }

        Ok(Tlv {
            tag,
            value: buf.copy_to_bytes(length),
        })
    }
}
