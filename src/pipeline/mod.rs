//! Bounded event pipeline between submit_sm acceptance and the downstream
//! sink.
//!
//! Work units enter a bounded queue drained by a pool of `core_workers`
//! tasks. When the queue is full, extra workers start up to `max_workers`;
//! past that the unit is rejected and, with retries enabled, handed to an
//! unbounded alternate pool. Finished events reach the [`Relay`] through
//! completion consumers in finish order, not submission order. The
//! completion buffer is bounded too, so a stalled relay stalls the workers
//! and the queue fills up behind them.

mod event;
mod monitor;
mod pool;
mod relay;

pub use event::{SubmittedMessageEvent, WorkUnit};
pub use relay::{ChannelRelay, LoggingRelay, Relay, RelayOutcome};

use crate::config::PipelineConfig;
use pool::Shared;
use std::sync::atomic::Ordering;
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, timeout_at};
use tracing::{debug, error, info, warn};

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PipelineError {
    #[error("work unit rejected: queue full and every worker busy")]
    Rejected,

    #[error("pipeline is shut down")]
    ShutDown,
}

/// Where an accepted unit went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    Queued,
    /// Queue was full; a new worker took the unit directly.
    Overflow,
    /// Rejected by the main pool and resubmitted to the alternate pool.
    Retried,
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PipelineStats {
    pub pool_size: usize,
    pub core_size: usize,
    pub max_size: usize,
    pub active: usize,
    pub completed: u64,
    pub task_count: u64,
    pub queued: usize,
    pub is_shutdown: bool,
    pub relayed: u64,
    pub rejected: u64,
    pub retries: u64,
    pub successful_retries: u64,
    pub failed_retries: u64,
    pub relay_failures: u64,
}

impl PipelineStats {
    pub(crate) fn from_shared(shared: &Shared) -> Self {
        let counters = &shared.counters;
        PipelineStats {
            pool_size: counters.pool_size.load(Ordering::Relaxed),
            core_size: shared.config.core_workers,
            max_size: shared.config.max_workers,
            active: counters.active.load(Ordering::Relaxed),
            completed: counters.completed.load(Ordering::Relaxed),
            task_count: counters.accepted.load(Ordering::Relaxed),
            queued: shared.queued(),
            is_shutdown: counters.shut_down.load(Ordering::Relaxed),
            relayed: counters.relayed.load(Ordering::Relaxed),
            rejected: counters.rejected.load(Ordering::Relaxed),
            retries: counters.retries.load(Ordering::Relaxed),
            successful_retries: counters.successful_retries.load(Ordering::Relaxed),
            failed_retries: counters.failed_retries.load(Ordering::Relaxed),
            relay_failures: counters.relay_failures.load(Ordering::Relaxed),
        }
    }
}

pub struct Pipeline {
    name: String,
    shared: Arc<Shared>,
    alternate: RwLock<Option<mpsc::UnboundedSender<WorkUnit>>>,
    alternate_workers: Mutex<Vec<JoinHandle<()>>>,
    background: Mutex<Vec<JoinHandle<()>>>,
    stop: watch::Sender<bool>,
}

impl Pipeline {
    /// Spawns the workers, consumers and monitor. Must be called from
    /// inside a tokio runtime.
    pub fn start<R: Relay>(name: impl Into<String>, config: PipelineConfig, relay: R) -> Self {
        let name = name.into();
        let config = config.normalized();
        // Finished events wait here for the relay; the bound keeps a slow
        // sink from draining the intake queue into memory.
        let (completions_tx, completions_rx) = mpsc::channel(config.queue_capacity);
        let shared = Arc::new(Shared::new(config.clone(), completions_tx));
        let (stop, _) = watch::channel(false);

        shared
            .counters
            .pool_size
            .store(config.core_workers, Ordering::Release);
        for id in 0..config.core_workers {
            shared.track(tokio::spawn(pool::core_worker(Arc::clone(&shared), id)));
        }

        let (alternate, alternate_workers) = if config.enable_retries {
            let (tx, rx) = mpsc::unbounded_channel();
            let rx = Arc::new(AsyncMutex::new(rx));
            let handles = (0..config.alternate_workers)
                .map(|id| {
                    tokio::spawn(pool::alternate_worker(
                        Arc::clone(&shared),
                        Arc::clone(&rx),
                        id,
                    ))
                })
                .collect();
            (Some(tx), handles)
        } else {
            (None, Vec::new())
        };

        let relay = Arc::new(relay);
        let completions = Arc::new(AsyncMutex::new(completions_rx));
        let mut background: Vec<JoinHandle<()>> = (0..config.consumers)
            .map(|id| {
                tokio::spawn(pool::consumer(
                    Arc::clone(&shared),
                    Arc::clone(&completions),
                    Arc::clone(&relay),
                    stop.subscribe(),
                    id,
                ))
            })
            .collect();
        if !config.monitor_interval.is_zero() {
            let monitor = monitor::run(
                name.clone(),
                Arc::clone(&shared),
                config.monitor_interval,
                stop.subscribe(),
            );
            background.push(tokio::spawn(async move {
                monitor.await;
            }));
        }

        info!(
            pipeline = %name,
            queue_capacity = config.queue_capacity,
            core_workers = config.core_workers,
            max_workers = config.max_workers,
            retries = config.enable_retries,
            consumers = config.consumers,
            "pipeline started"
        );

        Pipeline {
            name,
            shared,
            alternate: RwLock::new(alternate),
            alternate_workers: Mutex::new(alternate_workers),
            background: Mutex::new(background),
            stop,
        }
    }

    /// Hands a unit to the pipeline without waiting.
    pub fn submit(&self, unit: WorkUnit) -> Result<Admission, PipelineError> {
        // Held until the unit is placed: shutdown takes it for writing before
        // collecting workers, so an overflow worker is always collected.
        let intake = self.shared.intake.read().unwrap_or_else(|e| e.into_inner());
        let Some(sender) = intake.as_ref() else {
            return Err(PipelineError::ShutDown);
        };
        match sender.try_send(unit) {
            Ok(()) => {
                self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
                Ok(Admission::Queued)
            }
            Err(mpsc::error::TrySendError::Closed(_)) => Err(PipelineError::ShutDown),
            Err(mpsc::error::TrySendError::Full(unit)) => self.overflow(unit),
        }
    }

    pub fn submit_event(&self, event: SubmittedMessageEvent) -> Result<Admission, PipelineError> {
        self.submit(WorkUnit::ready(event))
    }

    fn overflow(&self, unit: WorkUnit) -> Result<Admission, PipelineError> {
        let max = self.shared.config.max_workers;
        let grown = self
            .shared
            .counters
            .pool_size
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |size| {
                (size < max).then_some(size + 1)
            });

        if grown.is_ok() {
            self.shared.counters.accepted.fetch_add(1, Ordering::Relaxed);
            let handle = tokio::spawn(pool::overflow_worker(Arc::clone(&self.shared), unit));
            self.shared.track(handle);
            return Ok(Admission::Overflow);
        }
        self.reject(unit)
    }

    fn reject(&self, unit: WorkUnit) -> Result<Admission, PipelineError> {
        let counters = &self.shared.counters;
        let rejected = counters.rejected.fetch_add(1, Ordering::Relaxed) + 1;

        if !self.shared.config.enable_retries {
            warn!(pipeline = %self.name, rejected, "work unit rejected, retries disabled");
            return Err(PipelineError::Rejected);
        }

        counters.retries.fetch_add(1, Ordering::Relaxed);
        let alternate = self.alternate.read().unwrap_or_else(|e| e.into_inner());
        match alternate.as_ref().map(|tx| tx.send(unit)) {
            Some(Ok(())) => {
                counters.successful_retries.fetch_add(1, Ordering::Relaxed);
                debug!(pipeline = %self.name, rejected, "rejected unit resubmitted to alternate pool");
                Ok(Admission::Retried)
            }
            _ => {
                counters.failed_retries.fetch_add(1, Ordering::Relaxed);
                error!(pipeline = %self.name, rejected, "retry failed, work unit lost");
                Err(PipelineError::Rejected)
            }
        }
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats::from_shared(&self.shared)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Stops intake, lets both pools finish what they hold for up to
    /// `shutdown_grace`, then aborts whatever is left. Later calls only
    /// return the stats.
    pub async fn shutdown(&self) -> PipelineStats {
        if self.shared.counters.shut_down.swap(true, Ordering::AcqRel) {
            return self.stats();
        }
        let grace = self.shared.config.shutdown_grace;
        let deadline = Instant::now() + grace;

        // Closing the senders lets workers drain the queues and exit
        take_lock(&self.shared.intake);
        take_lock(&self.alternate);

        let mut workers = self.shared.take_workers();
        workers.append(&mut lock_vec(&self.alternate_workers));
        if !join_until(deadline, &mut workers).await {
            error!(
                pipeline = %self.name,
                grace_ms = grace.as_millis() as u64,
                "pipeline workers still busy after grace period, aborting"
            );
            workers.iter().for_each(JoinHandle::abort);
        }

        self.stop.send_replace(true);
        let mut background = lock_vec(&self.background);
        if !join_until(deadline, &mut background).await {
            error!(pipeline = %self.name, "completion consumers did not drain in time, aborting");
            background.iter().for_each(JoinHandle::abort);
        }

        let stats = self.stats();
        monitor::log_stats(&self.name, &stats);
        info!(pipeline = %self.name, "pipeline shut down");
        stats
    }
}

fn take_lock<T>(lock: &RwLock<Option<T>>) -> Option<T> {
    lock.write().unwrap_or_else(|e| e.into_inner()).take()
}

fn lock_vec(handles: &Mutex<Vec<JoinHandle<()>>>) -> Vec<JoinHandle<()>> {
    std::mem::take(&mut *handles.lock().unwrap_or_else(|e| e.into_inner()))
}

async fn join_until(deadline: Instant, handles: &mut [JoinHandle<()>]) -> bool {
    timeout_at(deadline, async {
        for handle in handles.iter_mut() {
            let _ = handle.await;
        }
    })
    .await
    .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicBool;
    use std::time::Duration;
    use tokio::sync::Semaphore;
    use tokio::time::timeout;

    fn event(id: u64) -> SubmittedMessageEvent {
        SubmittedMessageEvent::new(id, "esme", "5678", &b"body"[..])
    }

    fn gated(gate: &Arc<Semaphore>, id: u64) -> WorkUnit {
        let gate = Arc::clone(gate);
        WorkUnit::new(async move {
            // Closing the semaphore releases every waiter
            let _ = gate.acquire().await;
            event(id)
        })
    }

    async fn collect(
        rx: &mut mpsc::UnboundedReceiver<SubmittedMessageEvent>,
        count: usize,
    ) -> Vec<SubmittedMessageEvent> {
        let mut events = Vec::with_capacity(count);
        while events.len() < count {
            let next = timeout(Duration::from_secs(5), rx.recv())
                .await
                .expect("timed out waiting for relayed events")
                .expect("relay channel closed");
            events.push(next);
        }
        events
    }

    fn small_config(retries: bool) -> PipelineConfig {
        PipelineConfig::default()
            .with_queue_capacity(2)
            .with_workers(1, 2)
            .with_keep_alive(Duration::from_millis(50))
            .with_alternate_workers(2)
            .with_retries(retries)
            .with_monitor_interval(Duration::from_millis(10))
    }

    #[tokio::test]
    async fn relays_every_event_with_wait_time() {
        let (relay, mut rx) = ChannelRelay::new();
        let pipeline = Pipeline::start("test", PipelineConfig::default(), relay);

        for id in 0..10 {
            assert!(pipeline.submit_event(event(id)).is_ok());
        }
        let events = collect(&mut rx, 10).await;

        let mut ids: Vec<u64> = events.iter().map(|e| e.message_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, (0..10).collect::<Vec<_>>());
        assert!(events.iter().all(|e| e.wait_duration().is_some()));

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.completed, 10);
        assert_eq!(stats.task_count, 10);
        assert!(stats.is_shutdown);
    }

    #[tokio::test]
    async fn rejected_units_never_run_without_retries() {
        let (relay, mut rx) = ChannelRelay::new();
        let pipeline = Pipeline::start("test", small_config(false), relay);
        let gate = Arc::new(Semaphore::new(0));

        // capacity 2 + max workers 2 + 1
        let results: Vec<_> = (0..5).map(|id| pipeline.submit(gated(&gate, id))).collect();
        let rejected = results
            .iter()
            .filter(|r| **r == Err(PipelineError::Rejected))
            .count();
        assert!(rejected >= 1);
        assert!(results.contains(&Ok(Admission::Overflow)));

        gate.close();
        let events = collect(&mut rx, 5 - rejected).await;
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let admitted: Vec<u64> = results
            .iter()
            .zip(0..)
            .filter(|(r, _)| r.is_ok())
            .map(|(_, id)| id)
            .collect();
        let mut ran: Vec<u64> = events.iter().map(|e| e.message_id).collect();
        ran.sort_unstable();
        assert_eq!(ran, admitted);

        let stats = pipeline.stats();
        assert_eq!(stats.rejected, rejected as u64);
        assert_eq!(stats.retries, 0);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn rejected_units_run_once_on_alternate_pool() {
        let (relay, mut rx) = ChannelRelay::new();
        let pipeline = Pipeline::start("test", small_config(true), relay);
        let gate = Arc::new(Semaphore::new(0));

        let results: Vec<_> = (0..5).map(|id| pipeline.submit(gated(&gate, id))).collect();
        assert!(results.iter().all(Result::is_ok));
        assert!(results.contains(&Ok(Admission::Retried)));

        gate.close();
        let mut ran: Vec<u64> = collect(&mut rx, 5).await.iter().map(|e| e.message_id).collect();
        ran.sort_unstable();
        assert_eq!(ran, vec![0, 1, 2, 3, 4]);

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(rx.try_recv().is_err());

        let stats = pipeline.stats();
        assert!(stats.rejected >= 1);
        assert_eq!(stats.retries, stats.rejected);
        assert_eq!(stats.successful_retries, stats.rejected);
        assert_eq!(stats.failed_retries, 0);
        pipeline.shutdown().await;
    }

    struct FailingRelay;

    impl Relay for FailingRelay {
        async fn relay(&self, _event: SubmittedMessageEvent) -> RelayOutcome {
            RelayOutcome::Failed("broker unavailable".to_string())
        }
    }

    #[tokio::test]
    async fn relay_failures_are_counted() {
        let pipeline = Pipeline::start("test", PipelineConfig::default(), FailingRelay);
        for id in 0..3 {
            pipeline.submit_event(event(id)).unwrap();
        }

        timeout(Duration::from_secs(5), async {
            while pipeline.stats().relay_failures < 3 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        assert_eq!(pipeline.stats().relayed, 0);
        pipeline.shutdown().await;
    }

    fn explode() -> SubmittedMessageEvent {
        panic!("work unit exploded")
    }

    #[tokio::test]
    async fn panicking_unit_does_not_stop_the_worker() {
        let (relay, mut rx) = ChannelRelay::new();
        let config = PipelineConfig::default().with_workers(1, 1);
        let pipeline = Pipeline::start("test", config, relay);

        pipeline.submit(WorkUnit::new(async { explode() })).unwrap();
        pipeline.submit_event(event(7)).unwrap();

        assert_eq!(collect(&mut rx, 1).await[0].message_id, 7);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn shutdown_is_bounded_and_closes_intake() {
        let (relay, _rx) = ChannelRelay::new();
        let config = PipelineConfig::default()
            .with_workers(1, 1)
            .with_shutdown_grace(Duration::from_millis(50));
        let pipeline = Pipeline::start("test", config, relay);

        pipeline
            .submit(WorkUnit::new(async {
                tokio::time::sleep(Duration::from_secs(30)).await;
                event(1)
            }))
            .unwrap();

        let stats = timeout(Duration::from_secs(2), pipeline.shutdown())
            .await
            .expect("shutdown exceeded its grace period");
        assert!(stats.is_shutdown);
        assert_eq!(
            pipeline.submit_event(event(2)),
            Err(PipelineError::ShutDown)
        );
    }

    #[tokio::test]
    async fn zeroed_config_fields_still_start() {
        let (relay, mut rx) = ChannelRelay::new();
        let config = PipelineConfig {
            queue_capacity: 0,
            core_workers: 0,
            consumers: 0,
            ..PipelineConfig::default()
        };
        let pipeline = Pipeline::start("test", config, relay);

        pipeline.submit_event(event(3)).unwrap();
        assert_eq!(collect(&mut rx, 1).await[0].message_id, 3);
        pipeline.shutdown().await;
    }

    #[tokio::test]
    async fn aborted_units_stop_running() {
        let (relay, _rx) = ChannelRelay::new();
        let config = PipelineConfig::default()
            .with_workers(1, 1)
            .with_shutdown_grace(Duration::from_millis(50));
        let pipeline = Pipeline::start("test", config, relay);

        let finished = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&finished);
        pipeline
            .submit(WorkUnit::new(async move {
                tokio::time::sleep(Duration::from_millis(300)).await;
                flag.store(true, Ordering::SeqCst);
                event(1)
            }))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        pipeline.shutdown().await;
        tokio::time::sleep(Duration::from_millis(500)).await;
        assert!(!finished.load(Ordering::SeqCst));
    }

    struct StuckRelay;

    impl Relay for StuckRelay {
        async fn relay(&self, _event: SubmittedMessageEvent) -> RelayOutcome {
            std::future::pending().await
        }
    }

    #[tokio::test]
    async fn stuck_relay_backs_up_into_rejections() {
        let config = small_config(false).with_shutdown_grace(Duration::from_millis(50));
        let pipeline = Pipeline::start("test", config, StuckRelay);

        let mut rejected = 0;
        for id in 0..500 {
            if pipeline.submit_event(event(id)) == Err(PipelineError::Rejected) {
                rejected += 1;
            }
            tokio::task::yield_now().await;
        }

        // queue 2, completion buffer 2, two workers and the consumer hold one each
        let stats = pipeline.stats();
        assert!(stats.task_count <= 7, "admitted {}", stats.task_count);
        assert_eq!(stats.rejected, rejected);
        assert_eq!(stats.task_count + rejected, 500);
        assert_eq!(stats.relayed, 0);

        timeout(Duration::from_secs(2), pipeline.shutdown())
            .await
            .expect("shutdown exceeded its grace period");
    }

    struct PanickyRelay {
        inner: ChannelRelay,
    }

    impl Relay for PanickyRelay {
        async fn relay(&self, event: SubmittedMessageEvent) -> RelayOutcome {
            if event.message_id == 0 {
                panic!("broker client crashed");
            }
            self.inner.relay(event).await
        }
    }

    #[tokio::test]
    async fn relay_panic_is_counted_and_consumer_keeps_going() {
        let (inner, mut rx) = ChannelRelay::new();
        let config = PipelineConfig::default().with_workers(1, 1);
        let pipeline = Pipeline::start("test", config, PanickyRelay { inner });

        for id in 0..6 {
            pipeline.submit_event(event(id)).unwrap();
        }
        let mut ids: Vec<u64> = collect(&mut rx, 5).await.iter().map(|e| e.message_id).collect();
        ids.sort_unstable();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);

        let stats = pipeline.shutdown().await;
        assert_eq!(stats.relayed, 5);
        assert_eq!(stats.relay_failures, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn units_admitted_during_shutdown_are_all_relayed() {
        let (relay, _rx) = ChannelRelay::new();
        let config = PipelineConfig::default()
            .with_queue_capacity(1)
            .with_workers(1, 4)
            .with_keep_alive(Duration::from_millis(1));
        let pipeline = Arc::new(Pipeline::start("test", config, relay));

        let submitters: Vec<_> = (0..4)
            .map(|_| {
                let pipeline = Arc::clone(&pipeline);
                tokio::spawn(async move {
                    let mut admitted = 0u64;
                    loop {
                        match pipeline.submit_event(event(admitted)) {
                            Ok(_) => admitted += 1,
                            Err(PipelineError::ShutDown) => break admitted,
                            Err(PipelineError::Rejected) => {}
                        }
                        tokio::task::yield_now().await;
                    }
                })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        let stats = pipeline.shutdown().await;

        let mut admitted = 0;
        for submitter in submitters {
            admitted += submitter.await.unwrap();
        }
        assert!(admitted > 0);
        assert_eq!(stats.task_count, admitted);
        assert_eq!(stats.relayed, admitted);
    }
}
