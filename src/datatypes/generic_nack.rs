use crate::codec::CodecError;
use crate::datatypes::{CommandId, CommandStatus};
use crate::macros::impl_header_only_pdu;

/// GenericNack is used to acknowledge the receipt of a PDU when the receiving
/// entity cannot process the PDU due to errors such as invalid command_id,
/// invalid command_status, or other format errors.
///
/// The generic_nack PDU has no message body and only contains the standard
/// SMPP header.
#[derive(Clone, Debug, PartialEq)]
pub struct GenericNack {
    /// The command_status field indicates the reason for the generic_nack
    pub command_status: CommandStatus,
    /// The sequence_number from the original PDU that caused the error.
    /// If the original sequence_number cannot be determined, this should be 0.
    pub sequence_number: u32,
}

impl_header_only_pdu!(GenericNack, CommandId::GenericNack);

impl GenericNack {
    /// Creates a new GenericNack with the specified command status and sequence number
    pub fn new(command_status: CommandStatus, sequence_number: u32) -> Self {
        Self {
            command_status,
            sequence_number,
        }
    }

    /// Creates a GenericNack for a system error
    pub fn system_error(sequence_number: u32) -> Self {
        Self::new(CommandStatus::SystemError, sequence_number)
    }

    /// Creates a GenericNack for a PDU that failed to decode.
    pub fn for_codec_error(err: &CodecError, sequence_number: u32) -> Self {
        Self::new(err.to_command_status(), sequence_number)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encodable;

    #[test]
    fn generic_nack_is_header_only() {
        let nack = GenericNack::system_error(12);
        let bytes = nack.to_bytes().unwrap();

        assert_eq!(bytes.len(), 16);
        assert_eq!(&bytes[4..8], &0x8000_0000u32.to_be_bytes());
        assert_eq!(&bytes[8..12], &0x0000_0008u32.to_be_bytes());
        assert_eq!(&bytes[12..16], &12u32.to_be_bytes());
    }

    #[test]
    fn nack_for_codec_error_maps_status() {
        let err = CodecError::InvalidPduLength {
            length: 4,
            min: 16,
            max: 65536,
        };
        let nack = GenericNack::for_codec_error(&err, 3);
        assert_eq!(nack.command_status, CommandStatus::InvalidCommandLength);
    }
}
