// ABOUTME: Downstream sink contract for relayed submissions
// ABOUTME: A logging sink for the daemon and a channel-backed sink for embedding and tests

use crate::pipeline::event::SubmittedMessageEvent;
use std::future::Future;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RelayOutcome {
    Delivered,
    Failed(String),
}

/// Destination for completed events. Called once per event; a failure is
/// counted by the pipeline and not retried.
pub trait Relay: Send + Sync + 'static {
    fn relay(&self, event: SubmittedMessageEvent) -> impl Future<Output = RelayOutcome> + Send;
}

/// Writes every event to the log at info level.
#[derive(Debug, Default, Clone, Copy)]
pub struct LoggingRelay;

impl Relay for LoggingRelay {
    async fn relay(&self, event: SubmittedMessageEvent) -> RelayOutcome {
        info!(
            message_id = event.message_id,
            system_id = %event.system_id,
            source_addr = %event.source_addr,
            destination_addr = %event.destination_addr,
            bytes = event.short_message.len(),
            wait_ms = event.wait_duration().map_or(0, |d| d.as_millis() as u64),
            "submission relayed"
        );
        RelayOutcome::Delivered
    }
}

/// Forwards events into an unbounded channel.
#[derive(Debug, Clone)]
pub struct ChannelRelay {
    sender: mpsc::UnboundedSender<SubmittedMessageEvent>,
}

impl ChannelRelay {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<SubmittedMessageEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (ChannelRelay { sender }, receiver)
    }
}

impl Relay for ChannelRelay {
    async fn relay(&self, event: SubmittedMessageEvent) -> RelayOutcome {
        match self.sender.send(event) {
            Ok(()) => RelayOutcome::Delivered,
            Err(_) => RelayOutcome::Failed("relay channel closed".to_string()),
        }
    }
}
