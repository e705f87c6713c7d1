// ABOUTME: Field limits and validation shared by submit_sm and deliver_sm
// ABOUTME: Enforces the inline short_message ceiling and payload exclusivity

use crate::codec::{CodecError, decode_u8};
use bytes::{Buf, BufMut, Bytes, BytesMut};
use std::io::Cursor;

// SMPP v3.4 limits, null terminator included
pub(crate) const SERVICE_TYPE_MAX: usize = 6;
pub(crate) const ADDR_MAX: usize = 21;
pub(crate) const TIME_MAX: usize = 17;

/// Largest body the inline short_message field can carry. Anything longer
/// travels in a message_payload TLV.
pub const MAX_SHORT_MESSAGE_LENGTH: usize = 255;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum MessageValidationError {
    #[error("short_message is {actual} bytes, limit is 255")]
    ShortMessageTooLong { actual: usize },

    #[error("short_message and message_payload cannot both be set")]
    MutualExclusivityViolation,

    #[error("{field} is {actual} bytes, limit is {max}")]
    FieldTooLong {
        field: &'static str,
        actual: usize,
        max: usize,
    },
}

impl From<MessageValidationError> for CodecError {
    fn from(err: MessageValidationError) -> Self {
        let field = match &err {
            MessageValidationError::ShortMessageTooLong { .. } => "short_message",
            MessageValidationError::MutualExclusivityViolation => "message_payload",
            MessageValidationError::FieldTooLong { field, .. } => *field,
        };
        CodecError::FieldValidation {
            field,
            reason: err.to_string(),
        }
    }
}

pub(crate) fn check_field(
    field: &'static str,
    value: &str,
    max_with_nul: usize,
) -> Result<(), MessageValidationError> {
    if value.len() >= max_with_nul {
        return Err(MessageValidationError::FieldTooLong {
            field,
            actual: value.len(),
            max: max_with_nul - 1,
        });
    }
    Ok(())
}

pub(crate) fn check_body(
    short_message: &Bytes,
    has_payload: bool,
) -> Result<(), MessageValidationError> {
    if short_message.len() > MAX_SHORT_MESSAGE_LENGTH {
        return Err(MessageValidationError::ShortMessageTooLong {
            actual: short_message.len(),
        });
    }
    if !short_message.is_empty() && has_payload {
        return Err(MessageValidationError::MutualExclusivityViolation);
    }
    Ok(())
}

/// sm_length followed by the body.
pub(crate) fn encode_short_message(buf: &mut BytesMut, short_message: &Bytes) {
    // check_body has already bounded the length to one octet
    buf.put_u8(short_message.len() as u8);
    buf.put_slice(short_message);
}

pub(crate) fn decode_short_message(buf: &mut Cursor<&[u8]>) -> Result<Bytes, CodecError> {
    let sm_length = decode_u8(buf)? as usize;
    if buf.remaining() < sm_length {
        return Err(CodecError::FieldValidation {
            field: "sm_length",
            reason: format!(
                "sm_length {sm_length} exceeds the {} bytes left in the PDU",
                buf.remaining()
            ),
        });
    }
    Ok(buf.copy_to_bytes(sm_length))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn body_limits() {
        assert!(check_body(&Bytes::from(vec![b'a'; 255]), false).is_ok());
        assert_eq!(
            check_body(&Bytes::from(vec![b'a'; 256]), false),
            Err(MessageValidationError::ShortMessageTooLong { actual: 256 })
        );
        assert_eq!(
            check_body(&Bytes::from_static(b"x"), true),
            Err(MessageValidationError::MutualExclusivityViolation)
        );
    }

    #[test]
    fn oversized_body_maps_to_invalid_msg_length() {
        let err: CodecError = MessageValidationError::ShortMessageTooLong { actual: 300 }.into();
        assert_eq!(
            err.to_command_status(),
            crate::datatypes::CommandStatus::InvalidMsgLength
        );
    }

    #[test]
    fn sm_length_past_end_is_rejected() {
        let data = [5u8, b'a', b'b'];
        let mut cursor = Cursor::new(&data[..]);
        assert!(matches!(
            decode_short_message(&mut cursor),
            Err(CodecError::FieldValidation { field: "sm_length", .. })
        ));
    }
}
