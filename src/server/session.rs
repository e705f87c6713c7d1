// ABOUTME: Server-side SMPP session: bind authentication, then the bound request loop
// ABOUTME: Responds inline, hands submissions to the pipeline and scheduler, writes queued deliveries

use crate::codec::Frame;
use crate::connection::{Connection, ConnectionError};
use crate::datatypes::{Bind, CommandStatus, GenericNack, SubmitSm, SubmitSmResponse};
use crate::pdu::{DeliveryReceipt, build_submit_response};
use crate::pipeline::SubmittedMessageEvent;
use crate::server::GatewayContext;
use crate::server::registry::{SessionHandle, SessionId};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::time::timeout;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error("no bind received within {0:?}")]
    BindTimeout(Duration),

    #[error("bind for system_id {system_id:?} rejected: {status:?}")]
    AuthenticationFailed {
        system_id: String,
        status: CommandStatus,
    },

    #[error("write did not complete within {0:?}")]
    WriteTimeout(Duration),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Created,
    BindPending,
    Bound,
    Unbound,
}

#[derive(Debug, Default, Clone, Copy)]
struct SessionCounters {
    rx_pdus: u64,
    rx_submit_sm: u64,
    tx_deliver_sm: u64,
    nacks: u64,
}

enum Event {
    Inbound(Option<Frame>),
    ReadFailed(ConnectionError),
    Outbound(Frame),
    Shutdown,
}

enum Flow {
    Continue,
    Stop,
}

/// One accepted connection, from bind to teardown.
pub struct Session {
    id: SessionId,
    connection: Connection,
    context: Arc<GatewayContext>,
    shutdown: watch::Receiver<bool>,
    state: SessionState,
    handle: Option<Arc<SessionHandle>>,
    counters: SessionCounters,
}

impl Session {
    pub fn new(
        id: SessionId,
        connection: Connection,
        context: Arc<GatewayContext>,
        shutdown: watch::Receiver<bool>,
    ) -> Self {
        Session {
            id,
            connection,
            context,
            shutdown,
            state: SessionState::Created,
            handle: None,
            counters: SessionCounters::default(),
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Drives the session to completion. The registry entry is removed and
    /// the socket closed whatever the outcome.
    pub async fn run(mut self) -> Result<(), SessionError> {
        self.state = SessionState::BindPending;
        let result = self.serve().await;
        self.teardown().await;
        result
    }

    async fn serve(&mut self) -> Result<(), SessionError> {
        let bind_timeout = self.context.config().session.bind_timeout;
        let outbound = match timeout(bind_timeout, self.await_bind()).await {
            Err(_) => return Err(SessionError::BindTimeout(bind_timeout)),
            Ok(result) => match result? {
                Some(outbound) => outbound,
                None => return Ok(()),
            },
        };
        self.serve_bound(outbound).await
    }

    /// Reads until a bind arrives. `None` means the peer went away first.
    async fn await_bind(&mut self) -> Result<Option<mpsc::Receiver<Frame>>, SessionError> {
        loop {
            let read = tokio::select! {
                read = self.connection.read_frame() => read,
                _ = self.shutdown.wait_for(|stop| *stop) => return Ok(None),
            };

            let frame = match read {
                Ok(Some(frame)) => frame,
                Ok(None) => {
                    debug!(session_id = %self.id, "peer closed before binding");
                    return Ok(None);
                }
                Err(err) => {
                    self.recover(err).await?;
                    continue;
                }
            };
            self.counters.rx_pdus += 1;

            match frame {
                Frame::Bind(bind) => return self.authenticate(bind).await.map(Some),
                frame if frame.is_response() => {
                    debug!(session_id = %self.id, command_id = ?frame.command_id(), "response before bind ignored");
                }
                frame => {
                    warn!(
                        session_id = %self.id,
                        command_id = ?frame.command_id(),
                        sequence_number = frame.sequence_number(),
                        "request before bind"
                    );
                    self.nack(GenericNack::system_error(frame.sequence_number()))
                        .await?;
                }
            }
        }
    }

    async fn authenticate(&mut self, bind: Bind) -> Result<mpsc::Receiver<Frame>, SessionError> {
        let context = Arc::clone(&self.context);
        let auth = &context.config().auth;
        let status = if auth.test_mode {
            CommandStatus::Ok
        } else if bind.system_id != auth.system_id {
            CommandStatus::InvalidSystemId
        } else if bind.password != auth.password {
            CommandStatus::InvalidPassword
        } else {
            CommandStatus::Ok
        };

        if !status.is_ok() {
            warn!(session_id = %self.id, system_id = %bind.system_id, ?status, "bind rejected");
            self.respond(Frame::BindResp(bind.reject(status))).await?;
            return Err(SessionError::AuthenticationFailed {
                system_id: bind.system_id,
                status,
            });
        }

        self.respond(Frame::BindResp(bind.response(&auth.server_system_id)))
            .await?;

        let (tx, rx) = mpsc::channel(context.config().session.window_size);
        let handle = Arc::new(SessionHandle::new(
            self.id,
            bind.system_id.as_str(),
            bind.bind_type,
            tx,
        ));
        context.registry().add_session(Arc::clone(&handle));
        self.handle = Some(handle);
        self.state = SessionState::Bound;

        info!(
            session_id = %self.id,
            system_id = %bind.system_id,
            bind_type = ?bind.bind_type,
            peer = ?self.connection.peer_addr().ok(),
            "session bound"
        );
        Ok(rx)
    }

    async fn serve_bound(&mut self, mut outbound: mpsc::Receiver<Frame>) -> Result<(), SessionError> {
        loop {
            let event = tokio::select! {
                read = self.connection.read_frame() => match read {
                    Ok(frame) => Event::Inbound(frame),
                    Err(err) => Event::ReadFailed(err),
                },
                Some(frame) = outbound.recv() => Event::Outbound(frame),
                _ = self.shutdown.wait_for(|stop| *stop) => Event::Shutdown,
            };

            match event {
                Event::Inbound(None) => {
                    debug!(session_id = %self.id, "peer closed the connection");
                    return Ok(());
                }
                Event::Inbound(Some(frame)) => {
                    self.counters.rx_pdus += 1;
                    if let Flow::Stop = self.handle_bound(frame).await? {
                        return Ok(());
                    }
                }
                Event::ReadFailed(err) => self.recover(err).await?,
                Event::Outbound(frame) => self.deliver(frame).await?,
                Event::Shutdown => {
                    debug!(session_id = %self.id, "gateway shutting down, closing session");
                    return Ok(());
                }
            }
        }
    }

    async fn handle_bound(&mut self, frame: Frame) -> Result<Flow, SessionError> {
        match frame {
            Frame::SubmitSm(submit_sm) => self.handle_submit(*submit_sm).await?,
            Frame::EnquireLink(enquire_link) => {
                self.respond(Frame::EnquireLinkResp(enquire_link.response()))
                    .await?
            }
            Frame::Unbind(unbind) => {
                self.respond(Frame::UnbindResp(unbind.response())).await?;
                self.state = SessionState::Unbound;
                debug!(session_id = %self.id, "unbind received");
                return Ok(Flow::Stop);
            }
            Frame::Bind(bind) => {
                warn!(session_id = %self.id, system_id = %bind.system_id, "bind on a bound session");
                self.respond(Frame::BindResp(bind.reject(CommandStatus::AlreadyBoundState)))
                    .await?;
            }
            Frame::DeliverSmResp(resp) => {
                debug!(
                    session_id = %self.id,
                    sequence_number = resp.sequence_number,
                    status = ?resp.command_status,
                    "deliver_sm acknowledged"
                );
            }
            Frame::GenericNack(nack) => {
                warn!(
                    session_id = %self.id,
                    sequence_number = nack.sequence_number,
                    status = ?nack.command_status,
                    "peer sent generic_nack"
                );
            }
            frame if frame.is_response() => {
                debug!(session_id = %self.id, command_id = ?frame.command_id(), "unsolicited response ignored");
            }
            frame => {
                // Requests the gateway does not serve, e.g. deliver_sm from an ESME
                self.nack(GenericNack::new(
                    CommandStatus::InvalidCommandId,
                    frame.sequence_number(),
                ))
                .await?;
            }
        }
        Ok(Flow::Continue)
    }

    async fn handle_submit(&mut self, submit_sm: SubmitSm) -> Result<(), SessionError> {
        self.counters.rx_submit_sm += 1;
        let Some(handle) = self.handle.clone() else {
            return self
                .nack(GenericNack::system_error(submit_sm.sequence_number))
                .await;
        };

        if !handle.bind_type().can_transmit() {
            return self
                .respond(Frame::SubmitSmResp(SubmitSmResponse::error(
                    submit_sm.sequence_number,
                    CommandStatus::IncorrectBindStatus,
                )))
                .await;
        }

        let message_id = self.context.message_ids().next_id();
        self.respond(Frame::SubmitSmResp(build_submit_response(
            submit_sm.sequence_number,
            message_id,
        )))
        .await?;

        let system_id = handle.system_id();
        let event = SubmittedMessageEvent::from_submit(&submit_sm, system_id, message_id);
        if let Err(err) = self.context.pipeline().submit_event(event) {
            warn!(session_id = %self.id, message_id, error = %err, "submission not handed downstream");
        }

        if submit_sm.wants_delivery_receipt() {
            let receipt = DeliveryReceipt::for_submission(&submit_sm, message_id, Utc::now());
            self.context.scheduler().schedule_receipt(system_id, receipt);
        }

        debug!(
            session_id = %self.id,
            message_id,
            destination_addr = %submit_sm.destination_addr,
            receipt = submit_sm.wants_delivery_receipt(),
            "submit_sm accepted"
        );
        Ok(())
    }

    /// Answers a PDU that failed to decode; anything else ends the session.
    async fn recover(&mut self, err: ConnectionError) -> Result<(), SessionError> {
        match err {
            ConnectionError::Malformed {
                sequence_number,
                source,
            } => {
                warn!(session_id = %self.id, sequence_number, error = %source, "malformed PDU");
                self.nack(GenericNack::for_codec_error(&source, sequence_number))
                    .await
            }
            err => Err(err.into()),
        }
    }

    async fn nack(&mut self, nack: GenericNack) -> Result<(), SessionError> {
        self.counters.nacks += 1;
        self.respond(Frame::GenericNack(nack)).await
    }

    /// Writes a response within the request timeout.
    async fn respond(&mut self, frame: Frame) -> Result<(), SessionError> {
        let limit = self.context.config().session.request_timeout;
        self.write_within(frame, limit).await
    }

    /// Writes a PDU queued by the scheduler.
    async fn deliver(&mut self, frame: Frame) -> Result<(), SessionError> {
        let limit = self.context.config().session.write_timeout;
        let is_deliver_sm = matches!(frame, Frame::DeliverSm(_));
        self.write_within(frame, limit).await?;
        if is_deliver_sm {
            self.counters.tx_deliver_sm += 1;
        }
        Ok(())
    }

    async fn write_within(&mut self, frame: Frame, limit: Duration) -> Result<(), SessionError> {
        timeout(limit, self.connection.write_frame(&frame))
            .await
            .map_err(|_| SessionError::WriteTimeout(limit))??;
        Ok(())
    }

    async fn teardown(&mut self) {
        self.state = SessionState::Unbound;
        let system_id = match self.handle.take() {
            Some(handle) => {
                handle.mark_unbound();
                self.context.registry().remove_session(handle.id());
                handle.system_id().to_string()
            }
            None => String::new(),
        };

        if let Err(err) = self.connection.shutdown().await {
            debug!(session_id = %self.id, error = %err, "socket shutdown failed");
        }

        info!(
            session_id = %self.id,
            system_id = %system_id,
            rx_pdus = self.counters.rx_pdus,
            rx_submit_sm = self.counters.rx_submit_sm,
            tx_deliver_sm = self.counters.tx_deliver_sm,
            nacks = self.counters.nacks,
            "session closed"
        );
    }
}
