use crate::codec::{
    CodecError, Decodable, Encodable, PduHeader, decode_cstring, decode_u8, encode_cstring,
    encode_u8,
};
use crate::datatypes::bind::decode_enum;
use crate::datatypes::short_message::{
    ADDR_MAX, SERVICE_TYPE_MAX, TIME_MAX, check_body, check_field, decode_short_message,
    encode_short_message,
};
use crate::datatypes::tlv::tags;
use crate::datatypes::{
    CommandId, CommandStatus, DataCoding, EsmClass, MessageValidationError, NumericPlanIndicator,
    Tlv, TypeOfNumber,
};
use bytes::{Bytes, BytesMut};
use std::io::Cursor;

const MESSAGE_ID_MAX: usize = 65;

/// This operation is used by an ESME to submit a short message to the SMSC
/// for onward transmission to a specified short message entity (SME).
#[derive(Clone, Debug, PartialEq)]
pub struct SubmitSm {
    pub command_status: CommandStatus,
    pub sequence_number: u32,

    pub service_type: String,
    pub source_addr_ton: TypeOfNumber,
    pub source_addr_npi: NumericPlanIndicator,
    pub source_addr: String,
    pub dest_addr_ton: TypeOfNumber,
    pub dest_addr_npi: NumericPlanIndicator,
    pub destination_addr: String,
    pub esm_class: EsmClass,
    pub protocol_id: u8,
    pub priority_flag: u8,
    pub schedule_delivery_time: String,
    pub validity_period: String,

    /// 5.2.17 registered_delivery: non-zero asks for an SMSC delivery receipt.
    pub registered_delivery: u8,
    pub replace_if_present_flag: u8,
    pub data_coding: DataCoding,
    pub sm_default_msg_id: u8,

    /// Inline body; sm_length is derived from it on the wire.
    pub short_message: Bytes,

    // Optional parameters the gateway understands
    pub sar_msg_ref_num: Option<Tlv>,
    pub sar_total_segments: Option<Tlv>,
    pub sar_segment_seqnum: Option<Tlv>,
    pub message_payload: Option<Tlv>,
}

impl SubmitSm {
    pub fn builder() -> SubmitSmBuilder {
        SubmitSmBuilder::new()
    }

    pub fn validate(&self) -> Result<(), MessageValidationError> {
        check_field("service_type", &self.service_type, SERVICE_TYPE_MAX)?;
        check_field("source_addr", &self.source_addr, ADDR_MAX)?;
        check_field("destination_addr", &self.destination_addr, ADDR_MAX)?;
        check_body(&self.short_message, self.message_payload.is_some())
    }

    /// The message body, wherever the ESME put it.
    pub fn payload(&self) -> Bytes {
        match &self.message_payload {
            Some(tlv) if self.short_message.is_empty() => tlv.value.clone(),
            _ => self.short_message.clone(),
        }
    }

    pub fn wants_delivery_receipt(&self) -> bool {
        self.registered_delivery > 0
    }

    pub fn response(&self, message_id: impl Into<String>) -> SubmitSmResponse {
        SubmitSmResponse {
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
            message_id: message_id.into(),
        }
    }
}

impl Decodable for SubmitSm {
    fn command_id() -> CommandId {
        CommandId::SubmitSm
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        Self::validate_header(&header)?;

        let service_type = decode_cstring(buf, SERVICE_TYPE_MAX, "service_type")?;
        let source_addr_ton = decode_enum(buf, "source_addr_ton")?;
        let source_addr_npi = decode_enum(buf, "source_addr_npi")?;
        let source_addr = decode_cstring(buf, ADDR_MAX, "source_addr")?;
        let dest_addr_ton = decode_enum(buf, "dest_addr_ton")?;
        let dest_addr_npi = decode_enum(buf, "dest_addr_npi")?;
        let destination_addr = decode_cstring(buf, ADDR_MAX, "destination_addr")?;
        let esm_class = EsmClass::from(decode_u8(buf)?);
        let protocol_id = decode_u8(buf)?;
        let priority_flag = decode_u8(buf)?;
        let schedule_delivery_time = decode_cstring(buf, TIME_MAX, "schedule_delivery_time")?;
        let validity_period = decode_cstring(buf, TIME_MAX, "validity_period")?;
        let registered_delivery = decode_u8(buf)?;
        let replace_if_present_flag = decode_u8(buf)?;
        let data_coding = DataCoding::from(decode_u8(buf)?);
        let sm_default_msg_id = decode_u8(buf)?;
        let short_message = decode_short_message(buf)?;

        let (sar_msg_ref_num, sar_total_segments, sar_segment_seqnum, message_payload) =
            crate::macros::decode_optional_tlvs!(buf, "submit_sm", {
                tags::SAR_MSG_REF_NUM => sar_msg_ref_num,
                tags::SAR_TOTAL_SEGMENTS => sar_total_segments,
                tags::SAR_SEGMENT_SEQNUM => sar_segment_seqnum,
                tags::MESSAGE_PAYLOAD => message_payload,
            });

        Ok(SubmitSm {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            service_type,
            source_addr_ton,
            source_addr_npi,
            source_addr,
            dest_addr_ton,
            dest_addr_npi,
            destination_addr,
            esm_class,
            protocol_id,
            priority_flag,
            schedule_delivery_time,
            validity_period,
            registered_delivery,
            replace_if_present_flag,
            data_coding,
            sm_default_msg_id,
            short_message,
            sar_msg_ref_num,
            sar_total_segments,
            sar_segment_seqnum,
            message_payload,
        })
    }
}

impl Encodable for SubmitSm {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.validate()?;

        PduHeader::new(CommandId::SubmitSm, self.command_status, self.sequence_number)
            .encode(buf);

        encode_cstring(buf, &self.service_type, SERVICE_TYPE_MAX, "service_type")?;
        encode_u8(buf, self.source_addr_ton as u8);
        encode_u8(buf, self.source_addr_npi as u8);
        encode_cstring(buf, &self.source_addr, ADDR_MAX, "source_addr")?;
        encode_u8(buf, self.dest_addr_ton as u8);
        encode_u8(buf, self.dest_addr_npi as u8);
        encode_cstring(buf, &self.destination_addr, ADDR_MAX, "destination_addr")?;
        encode_u8(buf, self.esm_class.to_byte());
        encode_u8(buf, self.protocol_id);
        encode_u8(buf, self.priority_flag);
        encode_cstring(
            buf,
            &self.schedule_delivery_time,
            TIME_MAX,
            "schedule_delivery_time",
        )?;
        encode_cstring(buf, &self.validity_period, TIME_MAX, "validity_period")?;
        encode_u8(buf, self.registered_delivery);
        encode_u8(buf, self.replace_if_present_flag);
        encode_u8(buf, self.data_coding.to_byte());
        encode_u8(buf, self.sm_default_msg_id);
        encode_short_message(buf, &self.short_message);

        crate::macros::encode_optional_tlvs!(
            self,
            buf,
            sar_msg_ref_num,
            sar_total_segments,
            sar_segment_seqnum,
            message_payload,
        );
        Ok(())
    }
}

/// Builder for creating SubmitSm PDUs with sensible defaults
pub struct SubmitSmBuilder {
    sequence_number: u32,
    source_addr: String,
    destination_addr: String,
    esm_class: EsmClass,
    registered_delivery: u8,
    data_coding: DataCoding,
    short_message: Bytes,
    message_payload: Option<Tlv>,
}

impl Default for SubmitSmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl SubmitSmBuilder {
    pub fn new() -> Self {
        Self {
            sequence_number: 1,
            source_addr: String::new(),
            destination_addr: String::new(),
            esm_class: EsmClass::default(),
            registered_delivery: 0,
            data_coding: DataCoding::SMSC_DEFAULT,
            short_message: Bytes::new(),
            message_payload: None,
        }
    }

    crate::macros::builder_setters! {
        sequence_number: u32,
        esm_class: EsmClass,
        registered_delivery: u8,
        data_coding: DataCoding,
    }

    pub fn source_addr(mut self, addr: impl Into<String>) -> Self {
        self.source_addr = addr.into();
        self
    }

    pub fn destination_addr(mut self, addr: impl Into<String>) -> Self {
        self.destination_addr = addr.into();
        self
    }

    pub fn short_message(mut self, message: impl Into<Bytes>) -> Self {
        self.short_message = message.into();
        self
    }

    pub fn message_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.message_payload = Some(Tlv::new(tags::MESSAGE_PAYLOAD, payload));
        self
    }

    pub fn build(self) -> Result<SubmitSm, MessageValidationError> {
        let submit_sm = SubmitSm {
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
            service_type: String::new(),
            source_addr_ton: TypeOfNumber::Unknown,
            source_addr_npi: NumericPlanIndicator::Unknown,
            source_addr: self.source_addr,
            dest_addr_ton: TypeOfNumber::Unknown,
            dest_addr_npi: NumericPlanIndicator::Unknown,
            destination_addr: self.destination_addr,
            esm_class: self.esm_class,
            protocol_id: 0,
            priority_flag: 0,
            schedule_delivery_time: String::new(),
            validity_period: String::new(),
            registered_delivery: self.registered_delivery,
            replace_if_present_flag: 0,
            data_coding: self.data_coding,
            sm_default_msg_id: 0,
            short_message: self.short_message,
            sar_msg_ref_num: None,
            sar_total_segments: None,
            sar_segment_seqnum: None,
            message_payload: self.message_payload,
        };

        submit_sm.validate()?;
        Ok(submit_sm)
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct SubmitSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    /// SMSC assigned identifier; only present on the wire when the submit succeeded.
    pub message_id: String,
}

impl SubmitSmResponse {
    pub fn error(sequence_number: u32, status: CommandStatus) -> Self {
        SubmitSmResponse {
            command_status: status,
            sequence_number,
            message_id: String::new(),
        }
    }
}

impl Decodable for SubmitSmResponse {
    fn command_id() -> CommandId {
        CommandId::SubmitSmResp
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        use bytes::Buf;

        Self::validate_header(&header)?;
        let message_id = if buf.has_remaining() {
            decode_cstring(buf, MESSAGE_ID_MAX, "message_id")?
        } else {
            String::new()
        };

        Ok(SubmitSmResponse {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            message_id,
        })
    }
}

impl Encodable for SubmitSmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader::new(
            CommandId::SubmitSmResp,
            self.command_status,
            self.sequence_number,
        )
        .encode(buf);

        if self.command_status.is_ok() {
            encode_cstring(buf, &self.message_id, MESSAGE_ID_MAX, "message_id")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;

    #[test]
    fn submit_sm_roundtrip_through_frame() {
        let submit = SubmitSm::builder()
            .sequence_number(42)
            .source_addr("1234")
            .destination_addr("5678")
            .registered_delivery(1)
            .short_message(&b"Hello World"[..])
            .build()
            .unwrap();

        let bytes = submit.to_bytes().unwrap();
        match Frame::parse(&bytes).unwrap() {
            Frame::SubmitSm(decoded) => {
                assert_eq!(*decoded, submit);
                assert!(decoded.wants_delivery_receipt());
                assert_eq!(decoded.payload().as_ref(), b"Hello World");
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn submit_sm_payload_falls_back_to_tlv() {
        let long = vec![b'x'; 400];
        let submit = SubmitSm::builder()
            .destination_addr("5678")
            .message_payload(long.clone())
            .build()
            .unwrap();

        let bytes = submit.to_bytes().unwrap();
        match Frame::parse(&bytes).unwrap() {
            Frame::SubmitSm(decoded) => assert_eq!(decoded.payload().as_ref(), &long[..]),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn submit_sm_unknown_tlv_is_skipped() {
        let submit = SubmitSm::builder().short_message(&b"hi"[..]).build().unwrap();
        let mut buf = BytesMut::new();
        submit.encode(&mut buf).unwrap();
        Tlv::from_u8(0x0204, 1).encode(&mut buf).unwrap();
        let length = buf.len() as u32;
        buf[0..4].copy_from_slice(&length.to_be_bytes());

        match Frame::parse(&buf).unwrap() {
            Frame::SubmitSm(decoded) => assert_eq!(decoded.short_message.as_ref(), b"hi"),
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn submit_sm_builder_rejects_long_address() {
        let err = SubmitSm::builder()
            .source_addr("123456789012345678901")
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            MessageValidationError::FieldTooLong { field: "source_addr", .. }
        ));
    }

    #[test]
    fn submit_sm_response_echoes_sequence() {
        let resp = SubmitSmResponse {
            command_status: CommandStatus::Ok,
            sequence_number: 9,
            message_id: "000002a".into(),
        };
        let bytes = resp.to_bytes().unwrap();
        assert_eq!(bytes.len(), 16 + 8);
        assert_eq!(&bytes[12..16], &9u32.to_be_bytes());
        assert_eq!(&bytes[16..], b"000002a\0");
    }

    #[test]
    fn submit_sm_response_error_has_no_body() {
        let bytes = SubmitSmResponse::error(4, CommandStatus::MessageQueueFull)
            .to_bytes()
            .unwrap();
        assert_eq!(bytes.len(), 16);
    }
}
