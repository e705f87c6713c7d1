// ABOUTME: Records waiting in the delayed delivery queue
// ABOUTME: Receipts are built at dispatch time; segments arrive pre-built and only need a sequence number

use crate::codec::CodecError;
use crate::datatypes::DeliverSm;
use crate::pdu::DeliveryReceipt;
use std::cmp::Ordering;
use tokio::time::Instant;

#[derive(Debug, Clone, PartialEq)]
pub enum ScheduledRecord {
    /// Goes back to any session bound under `system_id`.
    DeliveryReceipt {
        system_id: String,
        receipt: DeliveryReceipt,
    },
    /// Goes to whichever receiving session is next in rotation.
    Segment(Box<DeliverSm>),
}

impl ScheduledRecord {
    pub fn receipt(system_id: impl Into<String>, receipt: DeliveryReceipt) -> Self {
        ScheduledRecord::DeliveryReceipt {
            system_id: system_id.into(),
            receipt,
        }
    }

    pub fn segment(pdu: DeliverSm) -> Self {
        ScheduledRecord::Segment(Box::new(pdu))
    }

    /// Routing key, if the record is tied to one client.
    pub fn system_id(&self) -> Option<&str> {
        match self {
            ScheduledRecord::DeliveryReceipt { system_id, .. } => Some(system_id),
            ScheduledRecord::Segment(_) => None,
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            ScheduledRecord::DeliveryReceipt { .. } => "delivery_receipt",
            ScheduledRecord::Segment(_) => "segment",
        }
    }

    pub fn into_deliver_sm(self, sequence_number: u32) -> Result<DeliverSm, CodecError> {
        match self {
            ScheduledRecord::DeliveryReceipt { receipt, .. } => {
                receipt.to_deliver_sm(sequence_number)
            }
            ScheduledRecord::Segment(pdu) => {
                let mut pdu = *pdu;
                pdu.sequence_number = sequence_number;
                Ok(pdu)
            }
        }
    }
}

/// Heap entry; the earliest deadline is the greatest so `BinaryHeap` pops
/// it first. Entries with equal deadlines compare equal.
#[derive(Debug)]
pub(crate) struct Entry {
    pub(crate) deadline: Instant,
    pub(crate) record: ScheduledRecord,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline
    }
}

impl Eq for Entry {}

impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> Ordering {
        other.deadline.cmp(&self.deadline)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::datatypes::MessageState;
    use std::collections::BinaryHeap;
    use std::time::Duration;

    fn segment(tag: &'static [u8]) -> ScheduledRecord {
        ScheduledRecord::segment(DeliverSm::builder().short_message(tag).build().unwrap())
    }

    #[test]
    fn earliest_deadline_pops_first() {
        let now = Instant::now();
        let mut heap = BinaryHeap::new();
        for (offset, tag) in [(30, b"c"), (10, b"a"), (20, b"b")] {
            heap.push(Entry {
                deadline: now + Duration::from_millis(offset),
                record: segment(tag),
            });
        }

        let order: Vec<_> = std::iter::from_fn(|| heap.pop())
            .map(|entry| match entry.record {
                ScheduledRecord::Segment(pdu) => pdu.short_message,
                other => panic!("unexpected record {other:?}"),
            })
            .collect();
        assert_eq!(order, vec![&b"a"[..], &b"b"[..], &b"c"[..]]);
    }

    #[test]
    fn equal_deadlines_compare_equal() {
        let deadline = Instant::now();
        let a = Entry { deadline, record: segment(b"a") };
        let b = Entry { deadline, record: segment(b"b") };
        assert_eq!(a.cmp(&b), Ordering::Equal);
        assert_eq!(a, b);
    }

    #[test]
    fn segment_takes_dispatch_sequence_number() {
        let pdu = segment(b"x").into_deliver_sm(42).unwrap();
        assert_eq!(pdu.sequence_number, 42);
        assert_eq!(&pdu.short_message[..], b"x");
    }

    #[test]
    fn receipt_is_built_at_dispatch() {
        let record = ScheduledRecord::receipt("esme", DeliveryReceipt::new("5678", "1234", 26));
        assert_eq!(record.system_id(), Some("esme"));

        let pdu = record.into_deliver_sm(9).unwrap();
        assert_eq!(pdu.sequence_number, 9);
        assert_eq!(pdu.receipted_message_id(), Some("000001a"));
        assert_eq!(pdu.message_state(), Some(MessageState::Delivered));
    }
}
