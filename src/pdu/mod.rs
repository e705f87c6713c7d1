//! Outbound PDU construction for the gateway: submit responses, delivery
//! receipts and concatenated deliveries. Nothing here touches session state.

pub mod format;
pub mod receipt;
pub mod segment;

pub use format::{format_as_dec, format_as_hex, parse_hex, receipt_date};
pub use receipt::{DeliveryReceipt, build_delivery_receipt};
pub use segment::{
    Addressing, Concatenation, ReassemblyError, Segmentation, UdhVariant, build_message,
    build_segment, build_segment_with_payload, build_segment_with_sar, build_segment_with_udh,
    reassemble, segment_message, split_into,
};

use crate::datatypes::SubmitSmResponse;

/// submit_sm_resp echoing `sequence_number` and carrying the hex message id.
pub fn build_submit_response(sequence_number: u32, message_id: u64) -> SubmitSmResponse {
    SubmitSmResponse {
        command_status: crate::datatypes::CommandStatus::Ok,
        sequence_number,
        message_id: format_as_hex(message_id),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::Encodable;

    #[test]
    fn submit_response_carries_hex_id() {
        let resp = build_submit_response(12, 255);
        assert_eq!(resp.message_id, "00000ff");

        let bytes = resp.to_bytes().unwrap();
        assert_eq!(&bytes[12..16], &12u32.to_be_bytes());
        assert_eq!(&bytes[16..], b"00000ff\0");
    }
}
