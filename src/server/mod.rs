//! The SMSC side of SMPP: listeners, sessions and the state they share.
//!
//! A [`Gateway`] binds one [`Listener`] per configured port. Every accepted
//! connection becomes a [`Session`] that authenticates a bind, answers
//! submissions and writes deliveries queued for it by the scheduler. The
//! [`GatewayContext`] ties sessions to the registry, pipeline, scheduler and
//! message id counter.

mod listener;
mod registry;
mod session;

pub use listener::{Listener, ListenerStats};
pub use registry::{SendError, SessionHandle, SessionId, SessionRegistry};
pub use session::{Session, SessionError, SessionState};

use crate::config::GatewayConfig;
use crate::message_id::MessageIdGenerator;
use crate::pipeline::{Pipeline, PipelineStats, Relay};
use crate::scheduler::{Scheduler, SchedulerStats};
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

#[derive(Debug, Error)]
pub enum ServerError {
    #[error("no listen ports configured")]
    NoPorts,

    #[error("failed to listen on {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    #[error("accept failed: {0}")]
    Accept(#[source] io::Error),
}

/// State every session of a gateway shares.
pub struct GatewayContext {
    config: GatewayConfig,
    registry: Arc<SessionRegistry>,
    pipeline: Pipeline,
    scheduler: Scheduler,
    message_ids: MessageIdGenerator,
}

impl GatewayContext {
    /// Builds the context and starts the pipeline tasks. The scheduler is
    /// created stopped.
    pub fn new<R: Relay>(config: GatewayConfig, relay: R) -> Self {
        let registry = Arc::new(SessionRegistry::new());
        let pipeline = Pipeline::start("submissions", config.pipeline.clone(), relay);
        let scheduler = Scheduler::new(Arc::clone(&registry), &config.scheduler);
        let message_ids = MessageIdGenerator::starting_at(config.message_id.initial);
        GatewayContext {
            config,
            registry,
            pipeline,
            scheduler,
            message_ids,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<SessionRegistry> {
        &self.registry
    }

    pub fn pipeline(&self) -> &Pipeline {
        &self.pipeline
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn message_ids(&self) -> &MessageIdGenerator {
        &self.message_ids
    }
}

/// Final numbers reported by [`Gateway::shutdown`].
#[derive(Debug, Clone)]
pub struct GatewayReport {
    pub listeners: Vec<(SocketAddr, ListenerStats)>,
    pub scheduler: SchedulerStats,
    pub pipeline: PipelineStats,
}

struct RunningListener {
    addr: SocketAddr,
    task: JoinHandle<Result<ListenerStats, ServerError>>,
}

/// A running gateway.
///
/// ```no_run
/// use smsc_gateway::config::GatewayConfig;
/// use smsc_gateway::pipeline::LoggingRelay;
/// use smsc_gateway::server::Gateway;
///
/// #[tokio::main]
/// async fn main() -> smsc_gateway::Result<()> {
///     let gateway = Gateway::start(GatewayConfig::default(), LoggingRelay).await?;
///     tokio::signal::ctrl_c().await?;
///     gateway.shutdown().await;
///     Ok(())
/// }
/// ```
pub struct Gateway {
    context: Arc<GatewayContext>,
    shutdown: watch::Sender<bool>,
    listeners: Vec<RunningListener>,
}

impl Gateway {
    /// Starts the pipeline and scheduler, then listens on every configured
    /// port. If any port cannot be bound, everything started so far is
    /// stopped again.
    pub async fn start<R: Relay>(config: GatewayConfig, relay: R) -> Result<Self, ServerError> {
        if config.ports.is_empty() {
            return Err(ServerError::NoPorts);
        }

        let host = config.host.clone();
        let ports = config.ports.clone();
        let context = Arc::new(GatewayContext::new(config, relay));
        context.scheduler().start();

        let (shutdown, _) = watch::channel(false);
        let mut gateway = Gateway {
            context,
            shutdown,
            listeners: Vec::with_capacity(ports.len()),
        };

        for port in ports {
            let bound = Listener::bind(
                &host,
                port,
                Arc::clone(&gateway.context),
                gateway.shutdown.subscribe(),
            )
            .await;

            match bound {
                Ok(listener) => {
                    let addr = listener.local_addr();
                    gateway.listeners.push(RunningListener {
                        addr,
                        task: tokio::spawn(listener.run()),
                    });
                }
                Err(err) => {
                    error!(port, error = %err, "listener failed to start");
                    gateway.shutdown().await;
                    return Err(err);
                }
            }
        }

        info!(
            addrs = ?gateway.local_addrs(),
            system_id = %gateway.context.config().auth.system_id,
            test_mode = gateway.context.config().auth.test_mode,
            "gateway started"
        );
        Ok(gateway)
    }

    /// Addresses actually bound, useful when a port was 0.
    pub fn local_addrs(&self) -> Vec<SocketAddr> {
        self.listeners.iter().map(|l| l.addr).collect()
    }

    pub fn context(&self) -> &Arc<GatewayContext> {
        &self.context
    }

    /// Stops accepting, closes sessions, stops the scheduler and drains the
    /// pipeline within its grace period.
    pub async fn shutdown(self) -> GatewayReport {
        info!("gateway shutting down");
        self.shutdown.send_replace(true);

        let mut listeners = Vec::with_capacity(self.listeners.len());
        for RunningListener { addr, task } in self.listeners {
            match task.await {
                Ok(Ok(stats)) => listeners.push((addr, stats)),
                Ok(Err(err)) => error!(%addr, error = %err, "listener stopped with error"),
                Err(err) => error!(%addr, error = %err, "listener task failed"),
            }
        }

        let scheduler = self.context.scheduler().stop().await;
        let pipeline = self.context.pipeline().shutdown().await;

        info!(
            bound_sessions = self.context.registry().len(),
            message_ids_issued = self.context.message_ids().last_issued(),
            "gateway stopped"
        );
        GatewayReport {
            listeners,
            scheduler,
            pipeline,
        }
    }
}
