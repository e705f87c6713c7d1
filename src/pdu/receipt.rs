// ABOUTME: Delivery receipt deliver_sm construction
// ABOUTME: Renders the standard receipt text as UCS-2 and attaches the receipted id and state TLVs

use crate::codec::CodecError;
use crate::datatypes::{
    DataCoding, DeliverSm, EsmClass, MAX_SHORT_MESSAGE_LENGTH, MessageState, SubmitSm,
    encode_ucs2,
};
use crate::pdu::format::{format_as_dec, format_as_hex, receipt_date};
use chrono::{DateTime, Utc};

/// Everything needed to report on one accepted submission.
///
/// Addresses are stored already swapped: the receipt travels from the
/// original recipient back to the original sender.
#[derive(Clone, Debug, PartialEq)]
pub struct DeliveryReceipt {
    pub source_addr: String,
    pub destination_addr: String,
    pub message_id: u64,
    pub submit_date: Option<DateTime<Utc>>,
    pub done_date: Option<DateTime<Utc>>,
    pub state: MessageState,
    pub submitted: u16,
    pub delivered: u16,
    pub error: u16,
    pub text: String,
}

impl DeliveryReceipt {
    pub fn new(
        source_addr: impl Into<String>,
        destination_addr: impl Into<String>,
        message_id: u64,
    ) -> Self {
        DeliveryReceipt {
            source_addr: source_addr.into(),
            destination_addr: destination_addr.into(),
            message_id,
            submit_date: None,
            done_date: None,
            state: MessageState::Delivered,
            submitted: 1,
            delivered: 1,
            error: 0,
            text: "-".to_string(),
        }
    }

    /// Receipt for `submit_sm`, addressed back to its sender.
    pub fn for_submission(submit_sm: &SubmitSm, message_id: u64, submit_date: DateTime<Utc>) -> Self {
        let mut receipt = Self::new(
            submit_sm.destination_addr.clone(),
            submit_sm.source_addr.clone(),
            message_id,
        );
        receipt.submit_date = Some(submit_date);
        receipt
    }

    pub fn with_state(mut self, state: MessageState) -> Self {
        self.state = state;
        self
    }

    pub fn with_done_date(mut self, done_date: DateTime<Utc>) -> Self {
        self.done_date = Some(done_date);
        self
    }

    /// `id:.. sub:.. dlvrd:.. submit date:.. done date:.. stat:.. err:.. text:..`
    pub fn text(&self) -> String {
        format!(
            "id:{} sub:{:03} dlvrd:{:03} submit date:{} done date:{} stat:{} err:{:03} text:{}",
            format_as_dec(self.message_id),
            self.submitted,
            self.delivered,
            receipt_date(self.submit_date),
            receipt_date(self.done_date),
            self.state.receipt_code(),
            self.error,
            self.text,
        )
    }

    /// deliver_sm carrying this receipt. A missing done date is stamped
    /// with the current time.
    pub fn to_deliver_sm(&self, sequence_number: u32) -> Result<DeliverSm, CodecError> {
        let body = match self.done_date {
            Some(_) => encode_ucs2(&self.text()),
            None => encode_ucs2(&self.clone().with_done_date(Utc::now()).text()),
        };

        let builder = DeliverSm::builder()
            .sequence_number(sequence_number)
            .source_addr(self.source_addr.as_str())
            .destination_addr(self.destination_addr.as_str())
            .esm_class(EsmClass::delivery_receipt())
            .data_coding(DataCoding::UCS2)
            .receipted_message_id(&format_as_hex(self.message_id))
            .message_state(self.state);

        let builder = if body.len() > MAX_SHORT_MESSAGE_LENGTH {
            builder.message_payload(body)
        } else {
            builder.short_message(body)
        };

        Ok(builder.build()?)
    }
}

/// One-shot receipt construction.
pub fn build_delivery_receipt(
    source_addr: &str,
    destination_addr: &str,
    sequence_number: u32,
    state: MessageState,
    message_id: u64,
    submit_date: Option<DateTime<Utc>>,
    done_date: DateTime<Utc>,
) -> Result<DeliverSm, CodecError> {
    let mut receipt = DeliveryReceipt::new(source_addr, destination_addr, message_id)
        .with_state(state)
        .with_done_date(done_date);
    receipt.submit_date = submit_date;
    receipt.to_deliver_sm(sequence_number)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Encodable, Frame};
    use crate::datatypes::decode_ucs2;
    use chrono::TimeZone;

    fn date(minute: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 31, 23, minute, 0).unwrap()
    }

    #[test]
    fn receipt_text_layout() {
        let mut receipt = DeliveryReceipt::new("987654321", "123456789", 42).with_done_date(date(59));
        receipt.submit_date = Some(date(58));
        assert_eq!(
            receipt.text(),
            "id:42 sub:001 dlvrd:001 submit date:2401312358 done date:2401312359 \
             stat:DELIVRD err:000 text:-"
        );
    }

    #[test]
    fn missing_submit_date_is_zeroed() {
        let receipt = DeliveryReceipt::new("a", "b", 1).with_done_date(date(0));
        assert!(receipt.text().contains("submit date:0000000000 "));
    }

    #[test]
    fn for_submission_swaps_addresses() {
        let submit = SubmitSm::builder()
            .source_addr("1111")
            .destination_addr("2222")
            .registered_delivery(1)
            .build()
            .unwrap();
        let receipt = DeliveryReceipt::for_submission(&submit, 9, date(1));
        assert_eq!(receipt.source_addr, "2222");
        assert_eq!(receipt.destination_addr, "1111");
        assert_eq!(receipt.submit_date, Some(date(1)));
    }

    #[test]
    fn receipt_pdu_carries_tlvs_and_ucs2_body() {
        let pdu = build_delivery_receipt(
            "2222",
            "1111",
            77,
            MessageState::Delivered,
            0x2a,
            Some(date(10)),
            date(11),
        )
        .unwrap();

        let decoded = match Frame::parse(&pdu.to_bytes().unwrap()).unwrap() {
            Frame::DeliverSm(decoded) => decoded,
            other => panic!("unexpected frame {other:?}"),
        };

        assert_eq!(decoded.sequence_number, 77);
        assert_eq!(decoded.esm_class.to_byte(), 0x04);
        assert_eq!(decoded.data_coding, DataCoding::UCS2);
        assert_eq!(decoded.receipted_message_id(), Some("000002a"));
        assert_eq!(decoded.message_state(), Some(MessageState::Delivered));

        let text = decode_ucs2(&decoded.payload());
        assert!(text.starts_with("id:42 sub:001"));
        assert!(text.contains("stat:DELIVRD"));
    }

    #[test]
    fn long_receipt_text_moves_to_payload() {
        let mut receipt = DeliveryReceipt::new("a", "b", 5).with_done_date(date(0));
        receipt.text = "x".repeat(200);
        let pdu = receipt.to_deliver_sm(1).unwrap();
        assert!(pdu.short_message.is_empty());
        assert!(pdu.message_payload.is_some());
        assert_eq!(decode_ucs2(&pdu.payload()), receipt.text());
    }
}
