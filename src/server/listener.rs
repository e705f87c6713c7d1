// ABOUTME: Per-port TCP accept loop for the gateway
// ABOUTME: Caps concurrent sessions with a semaphore and stops on the shutdown signal

use crate::connection::Connection;
use crate::server::session::{Session, SessionError};
use crate::server::{GatewayContext, ServerError};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{Semaphore, watch};
use tokio::task::JoinSet;
use tracing::{debug, error, info, warn};

// Accept errors are retried with doubling backoff up to this limit
const MAX_ACCEPT_BACKOFF: Duration = Duration::from_secs(64);

/// Connections served by one listener over its lifetime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ListenerStats {
    pub accepted: u64,
    pub refused: u64,
}

pub struct Listener {
    listener: TcpListener,
    local_addr: SocketAddr,
    limit: Arc<Semaphore>,
    max_connections: usize,
    context: Arc<GatewayContext>,
    shutdown: watch::Receiver<bool>,
    stats: ListenerStats,
}

impl Listener {
    pub async fn bind(
        host: &str,
        port: u16,
        context: Arc<GatewayContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Result<Self, ServerError> {
        let addr = format!("{host}:{port}");
        let listener = TcpListener::bind(&addr)
            .await
            .map_err(|source| ServerError::Bind {
                addr: addr.clone(),
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ServerError::Bind { addr, source })?;

        let max_connections = context.config().session.max_connections;
        Ok(Listener {
            listener,
            local_addr,
            limit: Arc::new(Semaphore::new(max_connections)),
            max_connections,
            context,
            shutdown,
            stats: ListenerStats::default(),
        })
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Accepts until shutdown, then waits for the open sessions to close.
    pub async fn run(mut self) -> Result<ListenerStats, ServerError> {
        info!(
            addr = %self.local_addr,
            max_connections = self.max_connections,
            "listener started"
        );

        let mut sessions = JoinSet::new();
        let result = loop {
            let accepted = tokio::select! {
                biased;
                _ = self.shutdown.wait_for(|stop| *stop) => break Ok(()),
                Some(_) = sessions.join_next(), if !sessions.is_empty() => continue,
                accepted = accept(&self.listener, self.local_addr) => accepted,
            };

            let socket = match accepted {
                Ok(socket) => socket,
                Err(err) => break Err(err),
            };

            let Ok(permit) = Arc::clone(&self.limit).try_acquire_owned() else {
                self.stats.refused += 1;
                warn!(
                    addr = %self.local_addr,
                    peer = ?socket.peer_addr().ok(),
                    max_connections = self.max_connections,
                    "connection limit reached, closing"
                );
                drop(socket);
                continue;
            };
            self.stats.accepted += 1;

            let id = self.context.registry().next_session_id();
            let session = Session::new(
                id,
                Connection::new(socket),
                Arc::clone(&self.context),
                self.shutdown.clone(),
            );
            sessions.spawn(async move {
                match session.run().await {
                    Ok(()) => {}
                    Err(err @ SessionError::AuthenticationFailed { .. }) => {
                        debug!(session_id = %id, error = %err, "session ended");
                    }
                    Err(err) => warn!(session_id = %id, error = %err, "session ended with error"),
                }
                drop(permit);
            });
        };

        while sessions.join_next().await.is_some() {}
        info!(
            addr = %self.local_addr,
            accepted = self.stats.accepted,
            refused = self.stats.refused,
            "listener stopped"
        );
        result.map(|()| self.stats)
    }
}

/// Accepts one socket, retrying transient errors with backoff.
async fn accept(listener: &TcpListener, addr: SocketAddr) -> Result<TcpStream, ServerError> {
    let mut backoff = Duration::from_secs(1);
    loop {
        match listener.accept().await {
            Ok((socket, peer)) => {
                debug!(%addr, %peer, "connection accepted");
                return Ok(socket);
            }
            Err(err) => {
                if backoff > MAX_ACCEPT_BACKOFF {
                    return Err(ServerError::Accept(err));
                }
                error!(%addr, error = %err, "accept failed, backing off");
            }
        }
        tokio::time::sleep(backoff).await;
        backoff *= 2;
    }
}
