// ABOUTME: Concatenated deliver_sm construction and reassembly
// ABOUTME: SAR TLVs, 8-bit and 16-bit reference UDH headers, and message_payload carriage

use crate::codec::CodecError;
use crate::datatypes::{
    DataCoding, DeliverSm, DeliverSmBuilder, EsmClass, MAX_SHORT_MESSAGE_LENGTH,
};
use crate::pdu::format::{to_unsigned_byte, to_unsigned_short};
use bytes::{BufMut, Bytes, BytesMut};
use std::collections::BTreeMap;
use thiserror::Error;

// UDH information elements for concatenated short messages
const IEI_CONCAT_8BIT: u8 = 0x00;
const IEI_CONCAT_16BIT: u8 = 0x08;

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Addressing {
    pub source_addr: String,
    pub destination_addr: String,
}

impl Addressing {
    pub fn new(source_addr: impl Into<String>, destination_addr: impl Into<String>) -> Self {
        Addressing {
            source_addr: source_addr.into(),
            destination_addr: destination_addr.into(),
        }
    }

    fn builder(&self, sequence_number: u32) -> DeliverSmBuilder {
        DeliverSm::builder()
            .sequence_number(sequence_number)
            .source_addr(self.source_addr.as_str())
            .destination_addr(self.destination_addr.as_str())
    }
}

/// Position of one segment inside a concatenated message. `seqnum` is 1-based.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Concatenation {
    pub ref_num: u16,
    pub total: u8,
    pub seqnum: u8,
}

impl Concatenation {
    pub fn new(ref_num: u16, total: u8, seqnum: u8) -> Self {
        Concatenation {
            ref_num,
            total,
            seqnum,
        }
    }
}

/// Inline User Data Header layouts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum UdhVariant {
    /// `05 00 03 ref total seq`
    EightBit,
    /// `06 08 05 refHi refLo total seq`
    SixteenBit,
}

impl UdhVariant {
    pub fn header(self, concat: Concatenation) -> Vec<u8> {
        match self {
            UdhVariant::EightBit => vec![
                0x05,
                IEI_CONCAT_8BIT,
                0x03,
                to_unsigned_byte(concat.ref_num.into()),
                concat.total,
                concat.seqnum,
            ],
            UdhVariant::SixteenBit => {
                let [hi, lo] = to_unsigned_short(concat.ref_num.into());
                vec![0x06, IEI_CONCAT_16BIT, 0x05, hi, lo, concat.total, concat.seqnum]
            }
        }
    }
}

/// How a multi-part message marks its parts.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Segmentation {
    Sar,
    Udh(UdhVariant),
    Payload,
}

/// Segment whose concatenation info travels in the SAR TLVs.
pub fn build_segment_with_sar(
    addressing: &Addressing,
    sequence_number: u32,
    concat: Concatenation,
    body: impl Into<Bytes>,
    data_coding: DataCoding,
) -> Result<DeliverSm, CodecError> {
    let deliver_sm = addressing
        .builder(sequence_number)
        .data_coding(data_coding)
        .short_message(body)
        .sar(concat.ref_num, concat.total, concat.seqnum)
        .build()?;
    Ok(deliver_sm)
}

/// Segment with a concatenation UDH prepended to the (UCS-2) body.
pub fn build_segment_with_udh(
    variant: UdhVariant,
    addressing: &Addressing,
    sequence_number: u32,
    concat: Concatenation,
    body: &[u8],
) -> Result<DeliverSm, CodecError> {
    let header = variant.header(concat);
    let mut short_message = BytesMut::with_capacity(header.len() + body.len());
    short_message.put_slice(&header);
    short_message.put_slice(body);

    let deliver_sm = addressing
        .builder(sequence_number)
        .esm_class(EsmClass::default().with_udhi())
        .data_coding(DataCoding::UCS2)
        .short_message(short_message.freeze())
        .build()?;
    Ok(deliver_sm)
}

/// Body carried in message_payload, optionally tagged with SAR TLVs.
pub fn build_segment_with_payload(
    addressing: &Addressing,
    sequence_number: u32,
    concat: Option<Concatenation>,
    body: impl Into<Bytes>,
    data_coding: DataCoding,
) -> Result<DeliverSm, CodecError> {
    let mut builder = addressing
        .builder(sequence_number)
        .data_coding(data_coding)
        .message_payload(body);
    if let Some(concat) = concat {
        builder = builder.sar(concat.ref_num, concat.total, concat.seqnum);
    }
    Ok(builder.build()?)
}

/// Unsegmented message: inline when it fits, message_payload otherwise.
pub fn build_message(
    addressing: &Addressing,
    sequence_number: u32,
    body: impl Into<Bytes>,
    data_coding: DataCoding,
) -> Result<DeliverSm, CodecError> {
    let body = body.into();
    if body.len() > MAX_SHORT_MESSAGE_LENGTH {
        return build_segment_with_payload(addressing, sequence_number, None, body, data_coding);
    }
    let deliver_sm = addressing
        .builder(sequence_number)
        .data_coding(data_coding)
        .short_message(body)
        .build()?;
    Ok(deliver_sm)
}

/// Builds one segment under `strategy`.
pub fn build_segment(
    strategy: Segmentation,
    addressing: &Addressing,
    sequence_number: u32,
    concat: Concatenation,
    body: &[u8],
    data_coding: DataCoding,
) -> Result<DeliverSm, CodecError> {
    match strategy {
        Segmentation::Sar => build_segment_with_sar(
            addressing,
            sequence_number,
            concat,
            Bytes::copy_from_slice(body),
            data_coding,
        ),
        Segmentation::Udh(variant) => {
            build_segment_with_udh(variant, addressing, sequence_number, concat, body)
        }
        Segmentation::Payload => build_segment_with_payload(
            addressing,
            sequence_number,
            Some(concat),
            Bytes::copy_from_slice(body),
            data_coding,
        ),
    }
}

/// Splits `body` into exactly `parts` contiguous pieces whose sizes differ
/// by at most one byte.
pub fn split_into(body: &[u8], parts: u8) -> Vec<Bytes> {
    let parts = usize::from(parts.max(1));
    let base = body.len() / parts;
    let extra = body.len() % parts;

    let mut pieces = Vec::with_capacity(parts);
    let mut offset = 0;
    for i in 0..parts {
        let len = base + usize::from(i < extra);
        pieces.push(Bytes::copy_from_slice(&body[offset..offset + len]));
        offset += len;
    }
    pieces
}

/// Splits `body` into `parts` segments sharing `ref_num`. Every segment is
/// built with sequence number 1; the sender assigns the real one.
pub fn segment_message(
    strategy: Segmentation,
    addressing: &Addressing,
    ref_num: u16,
    body: &[u8],
    parts: u8,
    data_coding: DataCoding,
) -> Result<Vec<DeliverSm>, CodecError> {
    let pieces = split_into(body, parts);
    let total = pieces.len() as u8;
    pieces
        .iter()
        .zip(1u8..)
        .map(|(piece, seqnum)| {
            build_segment(
                strategy,
                addressing,
                1,
                Concatenation::new(ref_num, total, seqnum),
                piece,
                data_coding,
            )
        })
        .collect()
}

#[derive(Clone, Debug, Error, PartialEq)]
pub enum ReassemblyError {
    #[error("no segments")]
    Empty,

    #[error("segment {index} carries no concatenation info")]
    MissingConcatenation { index: usize },

    #[error("segment {index} has a truncated user data header")]
    MalformedUdh { index: usize },

    #[error("segments disagree on {field}")]
    Mismatch { field: &'static str },

    #[error("segment {0} appears more than once")]
    Duplicate(u8),

    #[error("segment {0} is missing")]
    Missing(u8),
}

/// Concatenation info and body of one segment, whatever carried them.
fn unpack(index: usize, deliver_sm: &DeliverSm) -> Result<(Concatenation, Bytes), ReassemblyError> {
    if deliver_sm.esm_class.has_udhi() {
        return unpack_udh(index, &deliver_sm.short_message);
    }

    let sar = (
        deliver_sm.sar_msg_ref_num.as_ref().and_then(|t| t.as_u16()),
        deliver_sm.sar_total_segments.as_ref().and_then(|t| t.as_u8()),
        deliver_sm.sar_segment_seqnum.as_ref().and_then(|t| t.as_u8()),
    );
    match sar {
        (Some(ref_num), Some(total), Some(seqnum)) => Ok((
            Concatenation::new(ref_num, total, seqnum),
            deliver_sm.payload(),
        )),
        _ => Err(ReassemblyError::MissingConcatenation { index }),
    }
}

fn unpack_udh(index: usize, short_message: &Bytes) -> Result<(Concatenation, Bytes), ReassemblyError> {
    let udhl = usize::from(
        *short_message
            .first()
            .ok_or(ReassemblyError::MalformedUdh { index })?,
    );
    if short_message.len() < 1 + udhl {
        return Err(ReassemblyError::MalformedUdh { index });
    }
    let header = &short_message[1..1 + udhl];
    let body = short_message.slice(1 + udhl..);

    // Walk the information elements looking for a concatenation IE
    let mut pos = 0;
    while pos + 2 <= header.len() {
        let (iei, len) = (header[pos], usize::from(header[pos + 1]));
        let data = header
            .get(pos + 2..pos + 2 + len)
            .ok_or(ReassemblyError::MalformedUdh { index })?;
        match (iei, data) {
            (IEI_CONCAT_8BIT, [ref_num, total, seqnum]) => {
                return Ok((
                    Concatenation::new(u16::from(*ref_num), *total, *seqnum),
                    body,
                ));
            }
            (IEI_CONCAT_16BIT, [hi, lo, total, seqnum]) => {
                return Ok((
                    Concatenation::new(u16::from_be_bytes([*hi, *lo]), *total, *seqnum),
                    body,
                ));
            }
            _ => pos += 2 + len,
        }
    }
    Err(ReassemblyError::MissingConcatenation { index })
}

/// Rebuilds the original body from its segments, in any arrival order.
/// A lone PDU without concatenation info is returned as is.
pub fn reassemble(segments: &[DeliverSm]) -> Result<Bytes, ReassemblyError> {
    let first = segments.first().ok_or(ReassemblyError::Empty)?;
    if segments.len() == 1 {
        if let Err(ReassemblyError::MissingConcatenation { .. }) = unpack(0, first) {
            return Ok(first.payload());
        }
    }

    let mut parts = BTreeMap::new();
    let mut expected: Option<(u16, u8)> = None;
    for (index, deliver_sm) in segments.iter().enumerate() {
        let (concat, body) = unpack(index, deliver_sm)?;
        match expected {
            None => expected = Some((concat.ref_num, concat.total)),
            Some((ref_num, _)) if ref_num != concat.ref_num => {
                return Err(ReassemblyError::Mismatch { field: "ref_num" });
            }
            Some((_, total)) if total != concat.total => {
                return Err(ReassemblyError::Mismatch { field: "total" });
            }
            Some(_) => {}
        }
        if parts.insert(concat.seqnum, body).is_some() {
            return Err(ReassemblyError::Duplicate(concat.seqnum));
        }
    }

    let total = expected.map(|(_, total)| total).unwrap_or_default();
    let mut message = BytesMut::new();
    for seqnum in 1..=total {
        let part = parts.get(&seqnum).ok_or(ReassemblyError::Missing(seqnum))?;
        message.put_slice(part);
    }
    if parts.len() != usize::from(total) {
        return Err(ReassemblyError::Mismatch { field: "total" });
    }
    Ok(message.freeze())
}
