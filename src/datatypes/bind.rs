use crate::codec::{
    CodecError, Encodable, PduHeader, decode_cstring, decode_u8, encode_cstring,
    encode_u8,
};
use crate::datatypes::{CommandId, CommandStatus, NumericPlanIndicator, TypeOfNumber};
use bytes::{Buf, BytesMut};
use std::io::Cursor;

// Field limits including the null terminator (SMPP v3.4 section 4.1)
const SYSTEM_ID_MAX: usize = 16;
const PASSWORD_MAX: usize = 9;
const SYSTEM_TYPE_MAX: usize = 13;
const ADDRESS_RANGE_MAX: usize = 41;

/// interface_version value for SMPP v3.4
pub const SMPP_V34: u8 = 0x34;

/// Direction capability requested by a bind.
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum BindType {
    Receiver,
    Transmitter,
    Transceiver,
}

impl BindType {
    pub fn request_id(self) -> CommandId {
        match self {
            BindType::Receiver => CommandId::BindReceiver,
            BindType::Transmitter => CommandId::BindTransmitter,
            BindType::Transceiver => CommandId::BindTransceiver,
        }
    }

    pub fn response_id(self) -> CommandId {
        match self {
            BindType::Receiver => CommandId::BindReceiverResp,
            BindType::Transmitter => CommandId::BindTransmitterResp,
            BindType::Transceiver => CommandId::BindTransceiverResp,
        }
    }

    /// Whether a session bound this way may receive deliver_sm.
    pub fn can_receive(self) -> bool {
        matches!(self, BindType::Receiver | BindType::Transceiver)
    }

    /// Whether a session bound this way may submit.
    pub fn can_transmit(self) -> bool {
        matches!(self, BindType::Transmitter | BindType::Transceiver)
    }
}

/// bind_receiver, bind_transmitter and bind_transceiver share one body
/// layout; `bind_type` records which command carried it.
#[derive(Clone, Debug, PartialEq)]
pub struct Bind {
    pub bind_type: BindType,
    pub command_status: CommandStatus,
    pub sequence_number: u32,

    /// 5.2.1 system_id: identifies the ESME requesting to bind.
    pub system_id: String,

    /// 5.2.2 password: used by the SMSC to authenticate the ESME.
    pub password: String,

    /// 5.2.3 system_type: categorizes the type of ESME.
    pub system_type: String,

    /// 5.2.4 interface_version: SMPP version supported by the ESME.
    pub interface_version: u8,

    pub addr_ton: TypeOfNumber,
    pub addr_npi: NumericPlanIndicator,

    /// 5.2.7 address_range: SME addresses served by the ESME.
    pub address_range: String,
}

impl Bind {
    pub fn builder(bind_type: BindType) -> BindBuilder {
        BindBuilder::new(bind_type)
    }

    pub fn decode_as(
        bind_type: BindType,
        header: PduHeader,
        buf: &mut Cursor<&[u8]>,
    ) -> Result<Self, CodecError> {
        if header.command_id != bind_type.request_id() {
            return Err(CodecError::UnexpectedCommandId {
                expected: bind_type.request_id(),
                actual: header.command_id,
            });
        }

        let system_id = decode_cstring(buf, SYSTEM_ID_MAX, "system_id")?;
        let password = decode_cstring(buf, PASSWORD_MAX, "password")?;
        let system_type = decode_cstring(buf, SYSTEM_TYPE_MAX, "system_type")?;
        let interface_version = decode_u8(buf)?;
        let addr_ton = decode_enum(buf, "addr_ton")?;
        let addr_npi = decode_enum(buf, "addr_npi")?;
        let address_range = decode_cstring(buf, ADDRESS_RANGE_MAX, "address_range")?;

        Ok(Bind {
            bind_type,
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            system_id,
            password,
            system_type,
            interface_version,
            addr_ton,
            addr_npi,
            address_range,
        })
    }

    /// Response carrying the server's own system_id.
    pub fn response(&self, server_system_id: &str) -> BindResponse {
        BindResponse {
            bind_type: self.bind_type,
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
            system_id: server_system_id.to_string(),
        }
    }

    /// Rejection without a body.
    pub fn reject(&self, status: CommandStatus) -> BindResponse {
        BindResponse {
            bind_type: self.bind_type,
            command_status: status,
            sequence_number: self.sequence_number,
            system_id: String::new(),
        }
    }
}

pub(crate) fn decode_enum<T>(buf: &mut Cursor<&[u8]>, field: &'static str) -> Result<T, CodecError>
where
    T: TryFrom<u8>,
{
    let raw = decode_u8(buf)?;
    T::try_from(raw).map_err(|_| CodecError::FieldValidation {
        field,
        reason: format!("unsupported value {raw:#04x}"),
    })
}

impl Encodable for Bind {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader::new(
            self.bind_type.request_id(),
            self.command_status,
            self.sequence_number,
        )
        .encode(buf);

        encode_cstring(buf, &self.system_id, SYSTEM_ID_MAX, "system_id")?;
        encode_cstring(buf, &self.password, PASSWORD_MAX, "password")?;
        encode_cstring(buf, &self.system_type, SYSTEM_TYPE_MAX, "system_type")?;
        encode_u8(buf, self.interface_version);
        encode_u8(buf, self.addr_ton as u8);
        encode_u8(buf, self.addr_npi as u8);
        encode_cstring(buf, &self.address_range, ADDRESS_RANGE_MAX, "address_range")?;
        Ok(())
    }
}

/// Builder for creating bind PDUs with sensible defaults
pub struct BindBuilder {
    bind_type: BindType,
    sequence_number: u32,
    system_id: String,
    password: String,
    system_type: String,
    interface_version: u8,
    addr_ton: TypeOfNumber,
    addr_npi: NumericPlanIndicator,
    address_range: String,
}

impl BindBuilder {
    pub fn new(bind_type: BindType) -> Self {
        Self {
            bind_type,
            sequence_number: 1,
            system_id: String::new(),
            password: String::new(),
            system_type: String::new(),
            interface_version: SMPP_V34,
            addr_ton: TypeOfNumber::Unknown,
            addr_npi: NumericPlanIndicator::Unknown,
            address_range: String::new(),
        }
    }

    crate::macros::builder_setters! {
        sequence_number: u32,
        interface_version: u8,
        addr_ton: TypeOfNumber,
        addr_npi: NumericPlanIndicator,
    }

    pub fn system_id(mut self, system_id: impl Into<String>) -> Self {
        self.system_id = system_id.into();
        self
    }

    pub fn password(mut self, password: impl Into<String>) -> Self {
        self.password = password.into();
        self
    }

    pub fn system_type(mut self, system_type: impl Into<String>) -> Self {
        self.system_type = system_type.into();
        self
    }

    pub fn address_range(mut self, range: impl Into<String>) -> Self {
        self.address_range = range.into();
        self
    }

    pub fn build(self) -> Bind {
        Bind {
            bind_type: self.bind_type,
            command_status: CommandStatus::Ok,
            sequence_number: self.sequence_number,
            system_id: self.system_id,
            password: self.password,
            system_type: self.system_type,
            interface_version: self.interface_version,
            addr_ton: self.addr_ton,
            addr_npi: self.addr_npi,
            address_range: self.address_range,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct BindResponse {
    pub bind_type: BindType,
    pub command_status: CommandStatus,
    pub sequence_number: u32,
    /// SMSC identifier; omitted from the wire when the bind failed.
    pub system_id: String,
}

impl BindResponse {
    pub fn decode_as(
        bind_type: BindType,
        header: PduHeader,
        buf: &mut Cursor<&[u8]>,
    ) -> Result<Self, CodecError> {
        if header.command_id != bind_type.response_id() {
            return Err(CodecError::UnexpectedCommandId {
                expected: bind_type.response_id(),
                actual: header.command_id,
            });
        }

        let system_id = if buf.has_remaining() {
            decode_cstring(buf, SYSTEM_ID_MAX, "system_id")?
        } else {
            String::new()
        };

        // sc_interface_version may follow; it carries nothing the gateway uses
        if buf.has_remaining() {
            buf.advance(buf.remaining());
        }

        Ok(BindResponse {
            bind_type,
            command_status: header.command_status,
            sequence_number: header.sequence_number,
            system_id,
        })
    }
}

impl Encodable for BindResponse {
    fn encode(&self, buf: &mut BytesMut) -> Result<(), CodecError> {
        PduHeader::new(
            self.bind_type.response_id(),
            self.command_status,
            self.sequence_number,
        )
        .encode(buf);

        if self.command_status.is_ok() {
            encode_cstring(buf, &self.system_id, SYSTEM_ID_MAX, "system_id")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Frame;

    #[test]
    fn bind_transceiver_wire_layout() {
        let bind = Bind::builder(BindType::Transceiver)
            .sequence_number(3)
            .system_id("smppclient1")
            .password("password")
            .build();

        let bytes = bind.to_bytes().unwrap();
        // header + "smppclient1\0" + "password\0" + "\0" + version, ton, npi + "\0"
        assert_eq!(bytes.len(), 16 + 12 + 9 + 1 + 3 + 1);
        assert_eq!(&bytes[4..8], &0x0000_0009u32.to_be_bytes());
        assert_eq!(&bytes[0..4], &(bytes.len() as u32).to_be_bytes());
    }

    #[test]
    fn bind_roundtrip_through_frame() {
        for bind_type in [
            BindType::Receiver,
            BindType::Transmitter,
            BindType::Transceiver,
        ] {
            let bind = Bind::builder(bind_type)
                .sequence_number(11)
                .system_id("esme")
                .password("secret")
                .system_type("VMS")
                .build();

            let parsed = Frame::parse(&bind.to_bytes().unwrap()).unwrap();
            assert_eq!(parsed, Frame::Bind(bind));
        }
    }

    #[test]
    fn failed_bind_response_has_no_body() {
        let bind = Bind::builder(BindType::Transceiver).build();
        let resp = bind.reject(CommandStatus::InvalidPassword);
        let bytes = resp.to_bytes().unwrap();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[8..12], &0x0000_000Eu32.to_be_bytes());

        match Frame::parse(&bytes).unwrap() {
            Frame::BindResp(decoded) => {
                assert_eq!(decoded.command_status, CommandStatus::InvalidPassword);
                assert!(decoded.system_id.is_empty());
            }
            other => panic!("unexpected frame {other:?}"),
        }
    }

    #[test]
    fn oversized_password_is_rejected() {
        let bind = Bind::builder(BindType::Transceiver)
            .password("far-too-long")
            .build();
        assert!(matches!(
            bind.to_bytes(),
            Err(CodecError::FieldValidation { field: "password", .. })
        ));
    }
}
