// ABOUTME: Server-originated concatenated deliveries for exercising ESME reassembly
// ABOUTME: Sends SAR, UDH, payload and binary segment sets now, or schedules them at random delays

use crate::codec::{CodecError, Frame};
use crate::datatypes::{DataCoding, DeliverSm, MAX_SHORT_MESSAGE_LENGTH, encode_ucs2};
use crate::pdu::{
    Addressing, Concatenation, Segmentation, build_segment, build_segment_with_payload,
    build_segment_with_sar,
};
use crate::scheduler::DelayPolicy;
use crate::server::{GatewayContext, SendError};
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info};

pub const DEFAULT_SOURCE_ADDR: &str = "123456789";
pub const DEFAULT_DESTINATION_ADDR: &str = "987654321";

#[derive(Debug, Error)]
pub enum DeliveryError {
    #[error("no bound session to deliver to")]
    NoSession,

    #[error(transparent)]
    Encode(#[from] CodecError),

    #[error(transparent)]
    Send(#[from] SendError),
}

/// Builds multi-part deliver_sm sets and pushes them to bound sessions.
pub struct SegmentedSender {
    context: Arc<GatewayContext>,
    addressing: Addressing,
    next_ref: AtomicU32,
}

impl SegmentedSender {
    pub fn new(context: Arc<GatewayContext>) -> Self {
        SegmentedSender {
            context,
            addressing: Addressing::new(DEFAULT_SOURCE_ADDR, DEFAULT_DESTINATION_ADDR),
            next_ref: AtomicU32::new(1),
        }
    }

    pub fn with_addressing(mut self, addressing: Addressing) -> Self {
        self.addressing = addressing;
        self
    }

    fn next_ref_num(&self) -> u16 {
        (self.next_ref.fetch_add(1, Ordering::Relaxed).wrapping_add(1)) as u16
    }

    /// Sends `count` UCS-2 text segments marked the `strategy` way and
    /// returns their reference number.
    pub async fn send_segments(&self, strategy: Segmentation, count: u8) -> Result<u16, DeliveryError> {
        let ref_num = self.next_ref_num();
        for seqnum in 1..=count {
            let body = encode_ucs2(&segment_text(seqnum));
            let pdu = build_segment(
                strategy,
                &self.addressing,
                1,
                Concatenation::new(ref_num, count, seqnum),
                &body,
                DataCoding::UCS2,
            )?;
            self.send(pdu).await?;
        }
        info!(ref_num, count, ?strategy, "segmented message sent");
        Ok(ref_num)
    }

    /// Like [`send_segments`](Self::send_segments) with SAR, but each segment
    /// text is padded with dots to `min_chars`. Segments too large for the
    /// inline field go in message_payload as octet data.
    pub async fn send_long(&self, count: u8, min_chars: usize) -> Result<u16, DeliveryError> {
        let ref_num = self.next_ref_num();
        for seqnum in 1..=count {
            let mut text = segment_text(seqnum);
            if text.len() < min_chars {
                text.extend(std::iter::repeat_n('.', min_chars - text.len()));
            }
            let body = encode_ucs2(&text);
            let concat = Concatenation::new(ref_num, count, seqnum);

            let pdu = if body.len() > MAX_SHORT_MESSAGE_LENGTH {
                build_segment_with_payload(
                    &self.addressing,
                    1,
                    Some(concat),
                    body,
                    DataCoding::OCTET_UNSPECIFIED,
                )?
            } else {
                build_segment_with_sar(&self.addressing, 1, concat, body, DataCoding::UCS2)?
            };
            self.send(pdu).await?;
        }
        info!(ref_num, count, min_chars, "long segmented message sent");
        Ok(ref_num)
    }

    /// SAR segments flagged as binary (data_coding 0x04).
    pub async fn send_binary(&self, count: u8) -> Result<u16, DeliveryError> {
        let ref_num = self.next_ref_num();
        for seqnum in 1..=count {
            let pdu = build_segment_with_sar(
                &self.addressing,
                1,
                Concatenation::new(ref_num, count, seqnum),
                encode_ucs2(&segment_text(seqnum)),
                DataCoding::OCTET_UNSPECIFIED,
            )?;
            self.send(pdu).await?;
        }
        info!(ref_num, count, "binary segmented message sent");
        Ok(ref_num)
    }

    /// Queues `messages` SAR messages of `count` segments each, every
    /// segment at its own delay drawn from `delays`. Returns the reference
    /// numbers used.
    pub fn schedule_randomized(
        &self,
        messages: usize,
        count: u8,
        delays: DelayPolicy,
    ) -> Result<Vec<u16>, DeliveryError> {
        let mut refs = Vec::with_capacity(messages);
        for message in 0..messages {
            let ref_num = self.next_ref_num();
            for seqnum in 1..=count {
                let text = format!("Msg {message}. {}", segment_text(seqnum));
                let pdu = build_segment_with_sar(
                    &self.addressing,
                    1,
                    Concatenation::new(ref_num, count, seqnum),
                    encode_ucs2(&text),
                    DataCoding::UCS2,
                )?;
                let delay = delays.next_delay();
                self.context.scheduler().schedule_segment(pdu, delay);
                debug!(ref_num, seqnum, delay_ms = delay.as_millis() as u64, "segment scheduled");
            }
            refs.push(ref_num);
        }
        Ok(refs)
    }

    async fn send(&self, mut pdu: DeliverSm) -> Result<(), DeliveryError> {
        let registry = self.context.registry();
        let Some(session) = registry.next_session() else {
            info!(destination_addr = %pdu.destination_addr, "no bound session, deliver_sm not sent");
            return Err(DeliveryError::NoSession);
        };
        pdu.sequence_number = registry.next_sequence_number();
        session
            .send(Frame::DeliverSm(Box::new(pdu)), self.send_timeout())
            .await?;
        Ok(())
    }

    fn send_timeout(&self) -> Duration {
        self.context.config().scheduler.send_timeout
    }
}

fn segment_text(seqnum: u8) -> String {
    format!("Segment content {seqnum}. ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GatewayConfig;
    use crate::datatypes::BindType;
    use crate::pdu::{UdhVariant, reassemble};
    use crate::pipeline::LoggingRelay;
    use crate::server::SessionHandle;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn context() -> Arc<GatewayContext> {
        Arc::new(GatewayContext::new(GatewayConfig::default(), LoggingRelay))
    }

    fn bind(context: &GatewayContext) -> mpsc::Receiver<Frame> {
        let (tx, rx) = mpsc::channel(64);
        let registry = context.registry();
        registry.add_session(Arc::new(SessionHandle::new(
            registry.next_session_id(),
            "esme",
            BindType::Transceiver,
            tx,
        )));
        rx
    }

    async fn receive(rx: &mut mpsc::Receiver<Frame>, count: usize) -> Vec<DeliverSm> {
        let mut pdus = Vec::with_capacity(count);
        while pdus.len() < count {
            match timeout(Duration::from_secs(5), rx.recv()).await {
                Ok(Some(Frame::DeliverSm(pdu))) => pdus.push(*pdu),
                other => panic!("expected deliver_sm, got {other:?}"),
            }
        }
        pdus
    }

    fn expected_text(count: u8) -> Vec<u8> {
        (1..=count).flat_map(|i| encode_ucs2(&segment_text(i))).collect()
    }

    #[tokio::test]
    async fn every_strategy_reassembles() {
        let context = context();
        let mut rx = bind(&context);
        let sender = SegmentedSender::new(Arc::clone(&context));

        for strategy in [
            Segmentation::Sar,
            Segmentation::Udh(UdhVariant::EightBit),
            Segmentation::Udh(UdhVariant::SixteenBit),
            Segmentation::Payload,
        ] {
            sender.send_segments(strategy, 3).await.unwrap();
            let pdus = receive(&mut rx, 3).await;
            assert_eq!(reassemble(&pdus).unwrap(), expected_text(3), "{strategy:?}");
            assert!(pdus.windows(2).all(|w| w[0].sequence_number < w[1].sequence_number));
        }
    }

    #[tokio::test]
    async fn reference_numbers_start_after_one() {
        let context = context();
        let _rx = bind(&context);
        let sender = SegmentedSender::new(context);

        assert_eq!(sender.send_binary(1).await.unwrap(), 2);
        assert_eq!(sender.send_binary(1).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn binary_segments_use_octet_coding() {
        let context = context();
        let mut rx = bind(&context);
        SegmentedSender::new(Arc::clone(&context))
            .send_binary(2)
            .await
            .unwrap();

        let pdus = receive(&mut rx, 2).await;
        assert!(pdus.iter().all(|p| p.data_coding == DataCoding::OCTET_UNSPECIFIED));
        assert_eq!(reassemble(&pdus).unwrap(), expected_text(2));
    }

    #[tokio::test]
    async fn long_segments_move_to_message_payload() {
        let context = context();
        let mut rx = bind(&context);
        SegmentedSender::new(Arc::clone(&context))
            .send_long(2, 200)
            .await
            .unwrap();

        let pdus = receive(&mut rx, 2).await;
        for pdu in &pdus {
            assert!(pdu.short_message.is_empty());
            assert_eq!(pdu.payload().len(), 400);
        }
        assert_eq!(reassemble(&pdus).unwrap().len(), 800);
    }

    #[tokio::test]
    async fn no_bound_session_is_reported() {
        let sender = SegmentedSender::new(context());
        assert!(matches!(
            sender.send_segments(Segmentation::Sar, 2).await,
            Err(DeliveryError::NoSession)
        ));
    }

    #[tokio::test]
    async fn randomized_segments_go_through_the_scheduler() {
        let context = context();
        let mut rx = bind(&context);
        context.scheduler().start();
        let sender = SegmentedSender::new(Arc::clone(&context));

        let delays = DelayPolicy::new(Duration::from_millis(10), Duration::from_millis(40));
        let refs = sender.schedule_randomized(2, 3, delays).unwrap();
        assert_eq!(refs.len(), 2);

        let pdus = receive(&mut rx, 6).await;
        for ref_num in refs {
            let mut message: Vec<_> = pdus
                .iter()
                .filter(|p| p.sar_msg_ref_num.as_ref().and_then(|t| t.as_u16()) == Some(ref_num))
                .cloned()
                .collect();
            assert_eq!(message.len(), 3);
            message.reverse();
            assert!(reassemble(&message).is_ok());
        }
        context.scheduler().stop().await;
    }
}
