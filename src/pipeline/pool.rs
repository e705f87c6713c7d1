// ABOUTME: Worker and consumer loops behind the event pipeline
// ABOUTME: Core, overflow and alternate workers run units; consumers relay finished events

use crate::config::PipelineConfig;
use crate::pipeline::event::{SubmittedMessageEvent, WorkUnit};
use crate::pipeline::relay::{Relay, RelayOutcome};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::future::Future;
use std::sync::{Arc, Mutex, RwLock};
use tokio::sync::{Mutex as AsyncMutex, mpsc, watch};
use tokio::task::{JoinError, JoinHandle};
use tokio::time::timeout;
use tracing::{debug, error, trace, warn};

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub(crate) pool_size: AtomicUsize,
    pub(crate) active: AtomicUsize,
    pub(crate) accepted: AtomicU64,
    pub(crate) completed: AtomicU64,
    pub(crate) relayed: AtomicU64,
    pub(crate) rejected: AtomicU64,
    pub(crate) retries: AtomicU64,
    pub(crate) successful_retries: AtomicU64,
    pub(crate) failed_retries: AtomicU64,
    pub(crate) relay_failures: AtomicU64,
    pub(crate) shut_down: AtomicBool,
}

/// State shared between the pipeline handle and its worker tasks.
pub(crate) struct Shared {
    pub(crate) config: PipelineConfig,
    pub(crate) counters: Counters,
    pub(crate) intake: RwLock<Option<mpsc::Sender<WorkUnit>>>,
    queue: AsyncMutex<mpsc::Receiver<WorkUnit>>,
    completions: mpsc::Sender<SubmittedMessageEvent>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

impl Shared {
    pub(crate) fn new(
        config: PipelineConfig,
        completions: mpsc::Sender<SubmittedMessageEvent>,
    ) -> Self {
        let (intake, queue) = mpsc::channel(config.queue_capacity);
        Shared {
            config,
            counters: Counters::default(),
            intake: RwLock::new(Some(intake)),
            queue: AsyncMutex::new(queue),
            completions,
            workers: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn track(&self, handle: JoinHandle<()>) {
        let mut workers = self.workers.lock().unwrap_or_else(|e| e.into_inner());
        workers.retain(|h| !h.is_finished());
        workers.push(handle);
    }

    /// Units waiting in the intake queue.
    pub(crate) fn queued(&self) -> usize {
        let intake = self.intake.read().unwrap_or_else(|e| e.into_inner());
        intake
            .as_ref()
            .map_or(0, |tx| tx.max_capacity() - tx.capacity())
    }

    pub(crate) fn take_workers(&self) -> Vec<JoinHandle<()>> {
        std::mem::take(&mut *self.workers.lock().unwrap_or_else(|e| e.into_inner()))
    }

    async fn next_unit(&self) -> Option<WorkUnit> {
        self.queue.lock().await.recv().await
    }

    /// Runs one unit in its own task so a panic stays contained, then hands
    /// the event to the consumers. Waits while the completion buffer is
    /// full, which is what fills the intake queue behind a slow relay.
    async fn execute(&self, unit: WorkUnit) {
        self.counters.active.fetch_add(1, Ordering::Relaxed);
        let result = contained(unit.into_future()).await;
        self.counters.active.fetch_sub(1, Ordering::Relaxed);

        match result {
            Ok(event) => {
                self.counters.completed.fetch_add(1, Ordering::Relaxed);
                if self.completions.send(event).await.is_err() {
                    warn!("no completion consumer left, event dropped");
                }
            }
            Err(err) => error!(error = %err, "work unit failed"),
        }
    }
}

/// Task handle that aborts the task when dropped.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Runs `future` on its own task. A panic comes back as a `JoinError`, and
/// dropping the returned future (an aborted worker) aborts the task too.
async fn contained<F>(future: F) -> Result<F::Output, JoinError>
where
    F: Future + Send + 'static,
    F::Output: Send + 'static,
{
    let mut task = AbortOnDrop(tokio::spawn(future));
    (&mut task.0).await
}

/// Lives until the intake queue is closed and drained.
pub(crate) async fn core_worker(shared: Arc<Shared>, id: usize) {
    debug!(worker = id, "pipeline worker started");
    while let Some(unit) = shared.next_unit().await {
        shared.execute(unit).await;
    }
    shared.counters.pool_size.fetch_sub(1, Ordering::AcqRel);
    debug!(worker = id, "pipeline worker stopped");
}

/// Started when the queue is full. Runs `first`, keeps draining the queue
/// and retires after `keep_alive` without work.
pub(crate) async fn overflow_worker(shared: Arc<Shared>, first: WorkUnit) {
    trace!("overflow worker started");
    shared.execute(first).await;
    loop {
        match timeout(shared.config.keep_alive, shared.next_unit()).await {
            Ok(Some(unit)) => shared.execute(unit).await,
            Ok(None) => break,
            Err(_) => {
                trace!("overflow worker idle, retiring");
                break;
            }
        }
    }
    shared.counters.pool_size.fetch_sub(1, Ordering::AcqRel);
}

/// Serves units the main pool rejected.
pub(crate) async fn alternate_worker(
    shared: Arc<Shared>,
    queue: Arc<AsyncMutex<mpsc::UnboundedReceiver<WorkUnit>>>,
    id: usize,
) {
    debug!(worker = id, "alternate worker started");
    loop {
        let next = queue.lock().await.recv().await;
        let Some(unit) = next else { break };
        shared.execute(unit).await;
    }
    debug!(worker = id, "alternate worker stopped");
}

/// Takes completed events in finish order, stamps them and relays them.
/// After `stop` flips it relays whatever is still buffered and exits.
pub(crate) async fn consumer<R: Relay>(
    shared: Arc<Shared>,
    completions: Arc<AsyncMutex<mpsc::Receiver<SubmittedMessageEvent>>>,
    relay: Arc<R>,
    mut stop: watch::Receiver<bool>,
    id: usize,
) {
    debug!(consumer = id, "completion consumer started");
    loop {
        let next = {
            let mut completions = completions.lock().await;
            tokio::select! {
                event = completions.recv() => event,
                _ = stop.wait_for(|stopped| *stopped) => completions.try_recv().ok(),
            }
        };
        let Some(mut event) = next else { break };

        event.mark_dequeued();
        let message_id = event.message_id;
        let relay = Arc::clone(&relay);
        match contained(async move { relay.relay(event).await }).await {
            Ok(RelayOutcome::Delivered) => {
                shared.counters.relayed.fetch_add(1, Ordering::Relaxed);
            }
            Ok(RelayOutcome::Failed(reason)) => {
                shared.counters.relay_failures.fetch_add(1, Ordering::Relaxed);
                warn!(message_id, %reason, "relay failed");
            }
            Err(err) => {
                shared.counters.relay_failures.fetch_add(1, Ordering::Relaxed);
                error!(message_id, error = %err, "relay panicked");
            }
        }
    }
    debug!(consumer = id, "completion consumer stopped");
}
