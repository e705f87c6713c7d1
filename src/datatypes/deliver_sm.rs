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
    CommandId, CommandStatus, DataCoding, EsmClass, MessageState, MessageValidationError,
    NumericPlanIndicator, Tlv, TypeOfNumber,
};
use bytes::{Bytes, BytesMut};
use std::io::Cursor;

/// This operation is used by the SMSC to deliver a short message to an ESME.
/// The deliver_sm PDU is used to deliver both mobile originated messages and
/// delivery receipts from the SMSC to the ESME.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliverSm {
    pub command_status: CommandStatus,
    pub sequence_number: u32,

    // Mandatory parameters
    /// 4.3.1 service_type: The service_type parameter can be used to indicate the SMS
    ///       Application service associated with the message. Set to NULL if not applicable.
    pub service_type: String,

    /// 4.3.2 source_addr_ton: Type of Number for source address.
    pub source_addr_ton: TypeOfNumber,

    /// 4.3.3 source_addr_npi: Numbering Plan Indicator for source address.
    pub source_addr_npi: NumericPlanIndicator,

    /// 4.3.4 source_addr: Address of SME which originated this message.
    pub source_addr: String,

    /// 4.3.5 dest_addr_ton: Type of Number for destination address.
    pub dest_addr_ton: TypeOfNumber,

    /// 4.3.6 dest_addr_npi: Numbering Plan Indicator for destination address.
    pub dest_addr_npi: NumericPlanIndicator,

    /// 4.3.7 destination_addr: Destination address of this short message.
    pub destination_addr: String,

    /// 4.3.8 esm_class: Message type (bit 2 marks a delivery receipt) and the
    ///       UDHI flag (bit 6) for concatenated segments carrying a UDH.
    pub esm_class: EsmClass,

    /// 4.3.9 protocol_id: Protocol Identifier. Network specific field.
    pub protocol_id: u8,

    /// 4.3.10 priority_flag: Designates the priority level of the message.
    pub priority_flag: u8,

    /// 4.3.13 registered_delivery: Indicator to signify if a delivery receipt or
    ///        acknowledgment is required.
    pub registered_delivery: u8,

    /// 4.3.15 data_coding: Defines the encoding scheme of the short message user data.
    pub data_coding: DataCoding,

    /// 4.3.18 short_message: Up to 255 octets of user data. sm_length is
    ///        written from its length.
    pub short_message: Bytes,

    // Optional parameters (TLV format)
    /// SAR Message Reference Number TLV (0x020C): The reference number for a particular
    /// concatenated short message.
    pub sar_msg_ref_num: Option<Tlv>,

    /// SAR Total Segments TLV (0x020E)
    pub sar_total_segments: Option<Tlv>,

    /// SAR Segment Sequence Number TLV (0x020F)
    pub sar_segment_seqnum: Option<Tlv>,

    /// Message Payload TLV (0x0424): Contains the extended short message user data.
    /// This TLV must not be specified when the short_message field contains data.
    pub message_payload: Option<Tlv>,

    /// Receipted Message ID TLV (0x001E): The message identifier of the message being receipted.
    pub receipted_message_id: Option<Tlv>,

    /// Message State TLV (0x0427): The state of the message at the time the receipt was generated.
    pub message_state: Option<Tlv>,
}

impl DeliverSm {
    pub fn validate(&self) -> Result<(), MessageValidationError> {
        check_field("service_type", &self.service_type, SERVICE_TYPE_MAX)?;
        check_field("source_addr", &self.source_addr, ADDR_MAX)?;
        check_field("destination_addr", &self.destination_addr, ADDR_MAX)?;
        check_body(&self.short_message, self.message_payload.is_some())
    }

    /// Creates a builder for constructing DeliverSm PDUs with validation
    pub fn builder() -> DeliverSmBuilder {
        DeliverSmBuilder::new()
    }

    /// The body wherever it travels: inline or in message_payload.
    pub fn payload(&self) -> Bytes {
        match &self.message_payload {
            Some(tlv) if self.short_message.is_empty() => tlv.value.clone(),
            _ => self.short_message.clone(),
        }
    }

    pub fn receipted_message_id(&self) -> Option<&str> {
        self.receipted_message_id.as_ref()?.as_cstring()
    }

    pub fn message_state(&self) -> Option<MessageState> {
        let raw = self.message_state.as_ref()?.as_u8()?;
        MessageState::try_from(raw).ok()
    }

    pub fn response(&self) -> DeliverSmResponse {
        DeliverSmResponse {
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
            message_id: String::new(),
        }
    }
}

impl Decodable for DeliverSm {
    fn command_id() -> CommandId {
        CommandId::DeliverSm
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
        // schedule_delivery_time and validity_period are NULL for deliver_sm
        decode_cstring(buf, TIME_MAX, "schedule_delivery_time")?;
        decode_cstring(buf, TIME_MAX, "validity_period")?;
        let registered_delivery = decode_u8(buf)?;
        let _replace_if_present_flag = decode_u8(buf)?;
        let data_coding = DataCoding::from(decode_u8(buf)?);
        let _sm_default_msg_id = decode_u8(buf)?;
        let short_message = decode_short_message(buf)?;

        let (
            sar_msg_ref_num,
            sar_total_segments,
            sar_segment_seqnum,
            message_payload,
            receipted_message_id,
            message_state,
        ) = crate::macros::decode_optional_tlvs!(buf, "deliver_sm", {
            tags::SAR_MSG_REF_NUM => sar_msg_ref_num,
            tags::SAR_TOTAL_SEGMENTS => sar_total_segments,
            tags::SAR_SEGMENT_SEQNUM => sar_segment_seqnum,
            tags::MESSAGE_PAYLOAD => message_payload,
            tags::RECEIPTED_MESSAGE_ID => receipted_message_id,
            tags::MESSAGE_STATE => message_state,
        });

        Ok(DeliverSm {
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
            registered_delivery,
            data_coding,
            short_message,
            sar_msg_ref_num,
            sar_total_segments,
            sar_segment_seqnum,
            message_payload,
            receipted_message_id,
            message_state,
        })
    }
}

impl Encodable for DeliverSm {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        self.validate()?;

        PduHeader::new(CommandId::DeliverSm, self.command_status, self.sequence_number)
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
        encode_u8(buf, 0); // schedule_delivery_time
        encode_u8(buf, 0); // validity_period
        encode_u8(buf, self.registered_delivery);
        encode_u8(buf, 0); // replace_if_present_flag
        encode_u8(buf, self.data_coding.to_byte());
        encode_u8(buf, 0); // sm_default_msg_id
        encode_short_message(buf, &self.short_message);

        crate::macros::encode_optional_tlvs!(
            self,
            buf,
            sar_msg_ref_num,
            sar_total_segments,
            sar_segment_seqnum,
            message_payload,
            receipted_message_id,
            message_state,
        );
        Ok(())
    }
}

/// Builder for creating DeliverSm PDUs with validation and sensible defaults
pub struct DeliverSmBuilder {
    sequence_number: u32,
    source_addr: String,
    destination_addr: String,
    esm_class: EsmClass,
    data_coding: DataCoding,
    short_message: Bytes,
    sar_msg_ref_num: Option<Tlv>,
    sar_total_segments: Option<Tlv>,
    sar_segment_seqnum: Option<Tlv>,
    message_payload: Option<Tlv>,
    receipted_message_id: Option<Tlv>,
    message_state: Option<Tlv>,
}

impl Default for DeliverSmBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DeliverSmBuilder {
    pub fn new() -> Self {
        Self {
            sequence_number: 1,
            source_addr: String::new(),
            destination_addr: String::new(),
            esm_class: EsmClass::default(),
            data_coding: DataCoding::SMSC_DEFAULT,
            short_message: Bytes::new(),
            sar_msg_ref_num: None,
            sar_total_segments: None,
            sar_segment_seqnum: None,
            message_payload: None,
            receipted_message_id: None,
            message_state: None,
        }
    }

    crate::macros::builder_setters! {
        sequence_number: u32,
        esm_class: EsmClass,
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

    /// SAR reference (2 bytes), total and index (1 byte each).
    pub fn sar(mut self, ref_num: u16, total: u8, seqnum: u8) -> Self {
        self.sar_msg_ref_num = Some(Tlv::from_u16(tags::SAR_MSG_REF_NUM, ref_num));
        self.sar_total_segments = Some(Tlv::from_u8(tags::SAR_TOTAL_SEGMENTS, total));
        self.sar_segment_seqnum = Some(Tlv::from_u8(tags::SAR_SEGMENT_SEQNUM, seqnum));
        self
    }

    pub fn message_payload(mut self, payload: impl Into<Bytes>) -> Self {
        self.message_payload = Some(Tlv::new(tags::MESSAGE_PAYLOAD, payload));
        self
    }

    pub fn receipted_message_id(mut self, message_id: &str) -> Self {
        self.receipted_message_id =
            Some(Tlv::from_cstring(tags::RECEIPTED_MESSAGE_ID, message_id));
        self
    }

    pub fn message_state(mut self, state: MessageState) -> Self {
        self.message_state = Some(Tlv::from_u8(tags::MESSAGE_STATE, state as u8));
        self
    }

    /// Build the DeliverSm, performing validation
    pub fn build(self) -> Result<DeliverSm, MessageValidationError> {
        let deliver_sm = DeliverSm {
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
            registered_delivery: 0,
            data_coding: self.data_coding,
            short_message: self.short_message,
            sar_msg_ref_num: self.sar_msg_ref_num,
            sar_total_segments: self.sar_total_segments,
            sar_segment_seqnum: self.sar_segment_seqnum,
            message_payload: self.message_payload,
            receipted_message_id: self.receipted_message_id,
            message_state: self.message_state,
        };

        deliver_sm.validate()?;
        Ok(deliver_sm)
    }
}

/// The deliver_sm_resp PDU is used to provide a response to the deliver_sm request.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliverSmResponse {
    pub command_status: CommandStatus,
    pub sequence_number: u32,

    /// 4.4.1 message_id: Set to NULL. Not used for deliver_sm_resp.
    pub message_id: String,
}

impl Decodable for DeliverSmResponse {
    fn command_id() -> CommandId {
        CommandId::DeliverSmResp
    }

    fn decode(header: PduHeader, buf: &mut Cursor<&[u8]>) -> Result<Self, CodecError> {
        use bytes::Buf;

        Self::validate_header(&header)?;
        // Some ESMEs omit the NULL message_id entirely
        let message_id = if buf.has_remaining() {
            decode_cstring(buf, 65, "message_id")?
        } else {
            String::new()
        };

        Ok(DeliverSmResponse {
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            message_id,
        })
    }
}

impl Encodable for DeliverSmResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader::new(
            CommandId::DeliverSmResp,
            self.command_status,
            self.sequence_number,
        )
        .encode(buf);
        encode_cstring(buf, &self.message_id, 65, "message_id")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;

    #[test]
    fn deliver_sm_to_bytes_basic() {
        let deliver_sm = DeliverSm::builder()
            .sequence_number(1)
            .source_addr("1234567890")
            .destination_addr("0987654321")
            .short_message(&b"Hello World"[..])
            .build()
            .unwrap();

        let bytes = deliver_sm.to_bytes().unwrap();

        assert_eq!(&bytes[0..4], &(bytes.len() as u32).to_be_bytes());
        assert_eq!(&bytes[4..8], &(CommandId::DeliverSm as u32).to_be_bytes());
        assert_eq!(&bytes[8..12], &(CommandStatus::Ok as u32).to_be_bytes());
        assert_eq!(&bytes[12..16], &1u32.to_be_bytes());

        let message_bytes = b"Hello World";
        assert!(
            bytes
                .windows(message_bytes.len())
                .any(|window| window == message_bytes)
        );
    }

    #[test]
    fn deliver_sm_delivery_receipt_roundtrip() {
        let deliver_sm = DeliverSm::builder()
            .sequence_number(5)
            .source_addr("0987654321")
            .destination_addr("1234567890")
            .esm_class(EsmClass::delivery_receipt())
            .short_message(&b"id:42 stat:DELIVRD"[..])
            .receipted_message_id("000002a")
            .message_state(MessageState::Delivered)
            .build()
            .unwrap();

        let bytes = deliver_sm.to_bytes().unwrap();
        match Frame::parse(&bytes).unwrap() {
            Frame::DeliverSm(decoded) => {
                assert!(decoded.esm_class.is_delivery_receipt());
                assert_eq!(decoded.receipted_message_id(), Some("000002a"));
                assert_eq!(decoded.message_state(), Some(MessageState::Delivered));
                assert_eq!(*decoded, deliver_sm);
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn deliver_sm_sar_tlvs_are_big_endian() {
        let deliver_sm = DeliverSm::builder()
            .sar(0x0102, 3, 2)
            .short_message(&b"part"[..])
            .build()
            .unwrap();
        let bytes = deliver_sm.to_bytes().unwrap();

        let sar_ref = [0x02, 0x0C, 0x00, 0x02, 0x01, 0x02];
        assert!(bytes.windows(sar_ref.len()).any(|w| w == sar_ref));
        let sar_total = [0x02, 0x0E, 0x00, 0x01, 0x03];
        assert!(bytes.windows(sar_total.len()).any(|w| w == sar_total));
    }

    #[test]
    fn deliver_sm_response_to_bytes() {
        let bytes = DeliverSmResponse {
            command_status: CommandStatus::Ok,
            sequence_number: 1,
            message_id: String::new(),
        }
        .to_bytes()
        .unwrap();

        assert_eq!(
            &bytes[4..8],
            &(CommandId::DeliverSmResp as u32).to_be_bytes()
        );
        // 16 bytes header + 1 byte null terminator
        assert_eq!(bytes.len(), 17);
        assert_eq!(bytes[16], 0);
    }

    #[test]
    fn deliver_sm_rejects_body_and_payload_together() {
        let err = DeliverSm::builder()
            .short_message(&b"inline"[..])
            .message_payload(vec![0u8; 300])
            .build()
            .unwrap_err();
        assert_eq!(err, MessageValidationError::MutualExclusivityViolation);
    }
}
