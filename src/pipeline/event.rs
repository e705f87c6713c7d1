use crate::datatypes::{DataCoding, SubmitSm};
use bytes::Bytes;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::time::Instant;

/// One accepted submit_sm on its way downstream.
#[derive(Debug, Clone)]
pub struct SubmittedMessageEvent {
    pub message_id: u64,
    pub system_id: String,
    pub source_addr: String,
    pub destination_addr: String,
    pub data_coding: DataCoding,
    pub short_message: Bytes,
    enqueued_at: Instant,
    dequeued_at: Option<Instant>,
}

impl SubmittedMessageEvent {
    pub fn new(
        message_id: u64,
        system_id: impl Into<String>,
        destination_addr: impl Into<String>,
        short_message: impl Into<Bytes>,
    ) -> Self {
        SubmittedMessageEvent {
            message_id,
            system_id: system_id.into(),
            source_addr: String::new(),
            destination_addr: destination_addr.into(),
            data_coding: DataCoding::default(),
            short_message: short_message.into(),
            enqueued_at: Instant::now(),
            dequeued_at: None,
        }
    }

    pub fn from_submit(submit_sm: &SubmitSm, system_id: &str, message_id: u64) -> Self {
        let mut event = Self::new(
            message_id,
            system_id,
            submit_sm.destination_addr.clone(),
            submit_sm.payload(),
        );
        event.source_addr = submit_sm.source_addr.clone();
        event.data_coding = submit_sm.data_coding;
        event
    }

    pub fn enqueued_at(&self) -> Instant {
        self.enqueued_at
    }

    pub fn dequeued_at(&self) -> Option<Instant> {
        self.dequeued_at
    }

    /// Stamps the queue exit time. Only the first call has an effect.
    pub fn mark_dequeued(&mut self) {
        if self.dequeued_at.is_none() {
            self.dequeued_at = Some(Instant::now());
        }
    }

    /// Time between acceptance and consumption, once consumed.
    pub fn wait_duration(&self) -> Option<Duration> {
        self.dequeued_at
            .map(|end| end.saturating_duration_since(self.enqueued_at))
    }
}

/// A unit of work that yields one event when run by a pipeline worker.
pub struct WorkUnit {
    future: Pin<Box<dyn Future<Output = SubmittedMessageEvent> + Send>>,
}

impl WorkUnit {
    pub fn new<F>(future: F) -> Self
    where
        F: Future<Output = SubmittedMessageEvent> + Send + 'static,
    {
        WorkUnit {
            future: Box::pin(future),
        }
    }

    /// Unit whose event is already built.
    pub fn ready(event: SubmittedMessageEvent) -> Self {
        Self::new(async move { event })
    }

    pub(crate) fn into_future(
        self,
    ) -> Pin<Box<dyn Future<Output = SubmittedMessageEvent> + Send>> {
        self.future
    }
}

impl std::fmt::Debug for WorkUnit {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkUnit").finish_non_exhaustive()
    }
}
