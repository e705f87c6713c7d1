//! Delayed delivery of receipts and pre-built segments.
//!
//! Records wait in a deadline-ordered heap. One background task sleeps
//! until the earliest deadline, resolves a bound session through the
//! [`SessionRegistry`], stamps a fresh sequence number and pushes the
//! deliver_sm into that session's outbound window. A record whose session
//! is gone is dropped and counted, never requeued.

mod delay;
mod record;

pub use delay::{DelayPolicy, random_up_to};
pub use record::ScheduledRecord;

use crate::codec::Frame;
use crate::config::SchedulerConfig;
use crate::pdu::DeliveryReceipt;
use crate::server::SessionRegistry;
use record::Entry;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::{Notify, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, sleep_until};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStats {
    pub scheduled: u64,
    pub dispatched: u64,
    /// No bound session at dispatch time.
    pub dropped: u64,
    pub send_failures: u64,
    pub pending: usize,
}

#[derive(Debug, Default)]
struct Counters {
    scheduled: AtomicU64,
    dispatched: AtomicU64,
    dropped: AtomicU64,
    send_failures: AtomicU64,
}

struct Inner {
    registry: Arc<SessionRegistry>,
    policy: DelayPolicy,
    send_timeout: Duration,
    queue: Mutex<BinaryHeap<Entry>>,
    wakeup: Notify,
    counters: Counters,
}

enum Next {
    Due(ScheduledRecord),
    At(Instant),
    Idle,
}

impl Inner {
    fn push(&self, deadline: Instant, record: ScheduledRecord) {
        self.queue
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(Entry { deadline, record });
        self.counters.scheduled.fetch_add(1, Ordering::Relaxed);
        self.wakeup.notify_one();
    }

    fn next(&self) -> Next {
        let mut queue = self.queue.lock().unwrap_or_else(|e| e.into_inner());
        match queue.peek() {
            None => Next::Idle,
            Some(entry) if entry.deadline > Instant::now() => Next::At(entry.deadline),
            Some(_) => match queue.pop() {
                Some(entry) => Next::Due(entry.record),
                None => Next::Idle,
            },
        }
    }

    fn pending(&self) -> usize {
        self.queue.lock().unwrap_or_else(|e| e.into_inner()).len()
    }

    async fn dispatch(&self, record: ScheduledRecord) {
        let kind = record.kind();
        let session = match record.system_id() {
            Some(system_id) => self.registry.next_session_for(system_id),
            None => self.registry.next_session(),
        };
        let Some(session) = session else {
            self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            warn!(
                kind,
                system_id = record.system_id().unwrap_or("*"),
                "no bound session for scheduled record, dropping"
            );
            return;
        };

        let sequence_number = self.registry.next_sequence_number();
        let pdu = match record.into_deliver_sm(sequence_number) {
            Ok(pdu) => pdu,
            Err(err) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                error!(kind, error = %err, "scheduled record failed to encode");
                return;
            }
        };

        match session
            .send(Frame::DeliverSm(Box::new(pdu)), self.send_timeout)
            .await
        {
            Ok(()) => {
                self.counters.dispatched.fetch_add(1, Ordering::Relaxed);
                debug!(kind, session_id = %session.id(), sequence_number, "scheduled deliver_sm sent");
            }
            Err(err) => {
                self.counters.send_failures.fetch_add(1, Ordering::Relaxed);
                warn!(kind, session_id = %session.id(), sequence_number, error = %err, "scheduled deliver_sm not sent");
            }
        }
    }
}

async fn run(inner: Arc<Inner>, mut stop: watch::Receiver<bool>) {
    debug!("scheduler loop started");
    loop {
        if *stop.borrow() {
            break;
        }
        match inner.next() {
            Next::Due(record) => inner.dispatch(record).await,
            Next::At(deadline) => {
                tokio::select! {
                    _ = sleep_until(deadline) => {}
                    _ = inner.wakeup.notified() => {}
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            }
            Next::Idle => {
                tokio::select! {
                    _ = inner.wakeup.notified() => {}
                    _ = stop.wait_for(|stopped| *stopped) => break,
                }
            }
        }
    }
    debug!("scheduler loop stopped");
}

pub struct Scheduler {
    inner: Arc<Inner>,
    stop: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new(registry: Arc<SessionRegistry>, config: &SchedulerConfig) -> Self {
        let (stop, _) = watch::channel(false);
        Scheduler {
            inner: Arc::new(Inner {
                registry,
                policy: DelayPolicy::from_config(config),
                send_timeout: config.send_timeout,
                queue: Mutex::new(BinaryHeap::new()),
                wakeup: Notify::new(),
                counters: Counters::default(),
            }),
            stop,
            task: Mutex::new(None),
        }
    }

    /// Spawns the dispatch loop. Does nothing if it is already running.
    pub fn start(&self) {
        let mut task = self.task.lock().unwrap_or_else(|e| e.into_inner());
        if task.as_ref().is_some_and(|t| !t.is_finished()) {
            return;
        }
        self.stop.send_replace(false);
        *task = Some(tokio::spawn(run(Arc::clone(&self.inner), self.stop.subscribe())));
        info!(
            min_delay_ms = self.inner.policy.min_delay.as_millis() as u64,
            delta_ms = self.inner.policy.delta.as_millis() as u64,
            "scheduler started"
        );
    }

    /// Stops the loop, letting a send already in progress finish. Records
    /// still queued stay queued until the next `start`.
    pub async fn stop(&self) -> SchedulerStats {
        self.stop.send_replace(true);
        let task = self.task.lock().unwrap_or_else(|e| e.into_inner()).take();
        if let Some(task) = task {
            if let Err(err) = task.await {
                error!(error = %err, "scheduler loop ended abnormally");
            }
        }
        let stats = self.stats();
        info!(
            dispatched = stats.dispatched,
            dropped = stats.dropped,
            send_failures = stats.send_failures,
            pending = stats.pending,
            "scheduler stopped"
        );
        stats
    }

    pub fn is_running(&self) -> bool {
        self.task
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .as_ref()
            .is_some_and(|t| !t.is_finished())
    }

    pub fn policy(&self) -> DelayPolicy {
        self.inner.policy
    }

    /// Queues a receipt for `system_id` using the configured delay policy.
    pub fn schedule_receipt(&self, system_id: impl Into<String>, receipt: DeliveryReceipt) -> Instant {
        let deadline = Instant::now() + self.inner.policy.next_delay();
        self.inner
            .push(deadline, ScheduledRecord::receipt(system_id, receipt));
        deadline
    }

    /// Queues a pre-built segment to go out after `delay`.
    pub fn schedule_segment(&self, pdu: crate::datatypes::DeliverSm, delay: Duration) -> Instant {
        self.schedule(ScheduledRecord::segment(pdu), delay)
    }

    pub fn schedule(&self, record: ScheduledRecord, delay: Duration) -> Instant {
        let deadline = Instant::now() + delay;
        self.inner.push(deadline, record);
        deadline
    }

    pub fn stats(&self) -> SchedulerStats {
        let counters = &self.inner.counters;
        SchedulerStats {
            scheduled: counters.scheduled.load(Ordering::Relaxed),
            dispatched: counters.dispatched.load(Ordering::Relaxed),
            dropped: counters.dropped.load(Ordering::Relaxed),
            send_failures: counters.send_failures.load(Ordering::Relaxed),
            pending: self.inner.pending(),
        }
    }
}
