//! IEC 60870-5-104 connection.
//!
//! Each connection is a tokio task that owns the framed stream, both
//! sequence windows and every protocol timer. The [`Iec104Connection`]
//! handle talks to that task through a command channel; protocol events come
//! back on an unbounded [`ConnectionEvent`] channel.
//!
//! ```text
//!  handle ──Command──▶ ┌────────────────────────────┐ ──Apdu──▶ socket
//!                      │ actor: windows, T1/T2/T3,  │
//!  events ◀──Event──── │ STARTDT/STOPDT/TESTFR      │ ◀──Apdu── socket
//!                      └────────────────────────────┘
//! ```

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::apci::{Apci, UFunction, MAX_ASDU_LENGTH};
use super::codec::{Apdu, Iec104Codec};
use super::window::{ReceiveWindow, SendWindow};
use crate::config::{ApciParameters, AppLayerParameters};
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{CloseReason, Iec60870Error, Result};
use crate::types::Asdu;

/// Capacity of the handle-to-actor command queue.
const COMMAND_QUEUE_SIZE: usize = 64;

/// Connection state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// Socket closed; final state
    Disconnected,
    /// Socket open, data transfer stopped
    Connected,
    /// STARTDT act sent, waiting for confirmation
    StartPending,
    /// Data transfer active (STARTDT confirmed)
    Active,
    /// STOPDT act sent, waiting for confirmation
    Stopping,
}

/// Which end of the link this connection is.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Controlling station; initiates STARTDT/STOPDT
    Client,
    /// Controlled station; answers STARTDT/STOPDT
    Server,
}

#[derive(Debug)]
enum Command {
    StartDt(oneshot::Sender<Result<()>>),
    StopDt(oneshot::Sender<Result<()>>),
    Send(Asdu, oneshot::Sender<Result<()>>),
    Close,
}

/// Handle to a running IEC 104 connection.
///
/// Cloning the handle is cheap; all clones drive the same connection. When
/// the last handle is dropped the connection is closed.
#[derive(Debug, Clone)]
pub struct Iec104Connection {
    commands: mpsc::Sender<Command>,
    state: watch::Receiver<ConnectionState>,
    params: AppLayerParameters,
}

impl Iec104Connection {
    /// Start a connection over an already established byte stream.
    ///
    /// Must be called from within a tokio runtime. Returns the handle and
    /// the receiver of all events of this connection.
    pub fn spawn<T>(
        io: T,
        role: Role,
        apci: ApciParameters,
        params: AppLayerParameters,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        apci.validate()?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connected);

        let actor = Actor {
            framed: Framed::new(io, Iec104Codec::new(params)),
            role,
            apci,
            commands: command_rx,
            events: event_tx,
            state_tx,
            state: ConnectionState::Connected,
            send: SendWindow::new(apci.k),
            recv: ReceiveWindow::new(apci.w),
            handshake: None,
            t2_deadline: None,
            t3_deadline: Some(Instant::now() + apci.t3),
            test_deadline: None,
        };
        tokio::spawn(actor.run());

        let handle = Self {
            commands: command_tx,
            state: state_rx,
            params,
        };
        Ok((handle, event_rx))
    }

    /// Current state.
    pub fn state(&self) -> ConnectionState {
        *self.state.borrow()
    }

    /// Whether data transfer is active.
    pub fn is_active(&self) -> bool {
        self.state() == ConnectionState::Active
    }

    /// Whether the connection has been closed.
    pub fn is_closed(&self) -> bool {
        self.state() == ConnectionState::Disconnected
    }

    /// Field widths used by this connection.
    pub fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }

    /// Start data transfer (STARTDT act), waiting at most T1 for STARTDT con.
    ///
    /// Client role only. A missing confirmation closes the connection and
    /// fails with [`Iec60870Error::T1Timeout`].
    pub async fn start_dt(&self) -> Result<()> {
        self.request(Command::StartDt).await
    }

    /// Stop data transfer (STOPDT act), waiting at most T1 for STOPDT con.
    pub async fn stop_dt(&self) -> Result<()> {
        self.request(Command::StopDt).await
    }

    /// Send an ASDU in an I-frame.
    ///
    /// Fails with [`Iec60870Error::TooManyUnconfirmed`] while k frames are
    /// unacknowledged, and with [`Iec60870Error::NotActive`] outside data
    /// transfer. Neither failure affects the connection.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.request(|reply| Command::Send(asdu, reply)).await
    }

    /// Close the connection and wait until it is gone.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
        self.closed().await;
    }

    /// Wait until the connection is closed, by either side.
    pub async fn closed(&self) {
        let mut state = self.state.clone();
        let _ = state
            .wait_for(|state| *state == ConnectionState::Disconnected)
            .await;
    }

    async fn request<F>(&self, command: F) -> Result<()>
    where
        F: FnOnce(oneshot::Sender<Result<()>>) -> Command,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(command(reply_tx))
            .await
            .map_err(|_| Iec60870Error::NotConnected)?;
        reply_rx.await.map_err(|_| Iec60870Error::NotConnected)?
    }
}

#[async_trait]
impl Connection for Iec104Connection {
    async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        Iec104Connection::send_asdu(self, asdu).await
    }

    async fn close(&self) {
        Iec104Connection::close(self).await
    }

    fn is_closed(&self) -> bool {
        Iec104Connection::is_closed(self)
    }

    fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }
}

/// A STARTDT or STOPDT activation waiting for its confirmation.
struct Handshake {
    awaiting: UFunction,
    deadline: Instant,
    reply: oneshot::Sender<Result<()>>,
}

struct Actor<T> {
    framed: Framed<T, Iec104Codec>,
    role: Role,
    apci: ApciParameters,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    state_tx: watch::Sender<ConnectionState>,
    state: ConnectionState,
    send: SendWindow,
    recv: ReceiveWindow,
    handshake: Option<Handshake>,
    /// Pending standalone acknowledgment
    t2_deadline: Option<Instant>,
    /// Idle test frame
    t3_deadline: Option<Instant>,
    /// TESTFR con expected
    test_deadline: Option<Instant>,
}

async fn sleep_until_opt(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

impl<T> Actor<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        info!(role = ?self.role, "IEC 104 connection opened");
        let reason = loop {
            match self.step().await {
                Ok(None) => continue,
                Ok(Some(reason)) => break reason,
                Err(e) => break CloseReason::from_error(&e),
            }
        };
        self.shutdown(reason).await;
    }

    async fn step(&mut self) -> Result<Option<CloseReason>> {
        let t1_deadline = self.send.t1_deadline(self.apci.t1);
        let handshake_deadline = self.handshake.as_ref().map(|h| h.deadline);

        tokio::select! {
            frame = self.framed.next() => match frame {
                Some(Ok(apdu)) => self.on_apdu(apdu).await.map(|_| None),
                Some(Err(e)) => Err(e),
                None => Ok(Some(CloseReason::RemoteClosed)),
            },
            command = self.commands.recv() => match command {
                Some(command) => self.on_command(command).await,
                None => Ok(Some(CloseReason::LocalClose)),
            },
            _ = sleep_until_opt(t1_deadline) => {
                warn!(unacked = self.send.unacked(), "T1 expired without acknowledgment");
                Ok(Some(CloseReason::T1Timeout))
            }
            _ = sleep_until_opt(handshake_deadline) => {
                warn!(state = ?self.state, "T1 expired without STARTDT/STOPDT confirmation");
                Ok(Some(CloseReason::HandshakeTimeout))
            }
            _ = sleep_until_opt(self.test_deadline) => {
                warn!("T1 expired without TESTFR confirmation");
                Ok(Some(CloseReason::TestFrameTimeout))
            }
            _ = sleep_until_opt(self.t2_deadline) => {
                self.send_ack().await.map(|_| None)
            }
            _ = sleep_until_opt(self.t3_deadline) => {
                self.on_idle().await.map(|_| None)
            }
        }
    }

    async fn on_apdu(&mut self, apdu: Apdu) -> Result<()> {
        debug!(role = ?self.role, frame = %apdu, "rx");
        if self.test_deadline.is_none() {
            self.t3_deadline = Some(Instant::now() + self.apci.t3);
        }

        match apdu.apci {
            Apci::IFrame { send_seq, recv_seq } => {
                let asdu = apdu
                    .asdu
                    .ok_or_else(|| Iec60870Error::framing("I-frame without ASDU"))?;
                self.on_i_frame(send_seq, recv_seq, asdu).await
            }
            Apci::SFrame { recv_seq } => {
                self.on_ack(recv_seq);
                Ok(())
            }
            Apci::UFrame { function } => self.on_u_frame(function).await,
        }
    }

    async fn on_i_frame(&mut self, send_seq: u16, recv_seq: u16, asdu: Asdu) -> Result<()> {
        if !matches!(self.state, ConnectionState::Active | ConnectionState::Stopping) {
            return Err(Iec60870Error::protocol(format!(
                "I-frame received in state {:?}",
                self.state
            )));
        }

        self.on_ack(recv_seq);
        if self.recv.accept(send_seq)? {
            self.send_ack().await?;
        } else if self.t2_deadline.is_none() {
            self.t2_deadline = Some(Instant::now() + self.apci.t2);
        }

        self.emit(ConnectionEvent::AsduReceived(asdu));
        Ok(())
    }

    fn on_ack(&mut self, recv_seq: u16) {
        match self.send.acknowledge(recv_seq) {
            Some(0) => {}
            Some(acked) => debug!(acked, unacked = self.send.unacked(), "frames acknowledged"),
            None => warn!(
                recv_seq,
                send_seq = self.send.next_seq(),
                unacked = self.send.unacked(),
                "ignoring acknowledgment outside the send window"
            ),
        }
    }

    async fn on_u_frame(&mut self, function: UFunction) -> Result<()> {
        match (function, self.role) {
            (UFunction::TestFrAct, _) => self.write(Apdu::u_frame(UFunction::TestFrCon)).await,
            (UFunction::TestFrCon, _) => {
                if self.test_deadline.take().is_some() {
                    self.t3_deadline = Some(Instant::now() + self.apci.t3);
                }
                Ok(())
            }
            (UFunction::StartDtAct, Role::Server) => {
                self.write(Apdu::u_frame(UFunction::StartDtCon)).await?;
                if self.state != ConnectionState::Active {
                    self.activate();
                }
                Ok(())
            }
            (UFunction::StopDtAct, Role::Server) => {
                if self.recv.unacked() > 0 {
                    self.send_ack().await?;
                }
                self.write(Apdu::u_frame(UFunction::StopDtCon)).await?;
                if self.state == ConnectionState::Active {
                    self.stop();
                }
                Ok(())
            }
            (UFunction::StartDtCon | UFunction::StopDtCon, Role::Client) => {
                self.on_confirmation(function);
                Ok(())
            }
            (function, role) => {
                warn!(%function, ?role, "ignoring unexpected U-frame");
                Ok(())
            }
        }
    }

    fn on_confirmation(&mut self, function: UFunction) {
        match self.handshake.take() {
            Some(handshake) if handshake.awaiting == function => {
                if function == UFunction::StartDtCon {
                    self.activate();
                } else {
                    self.stop();
                }
                let _ = handshake.reply.send(Ok(()));
            }
            pending => {
                warn!(%function, "unsolicited confirmation");
                self.handshake = pending;
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<Option<CloseReason>> {
        match command {
            Command::StartDt(reply) => self.start_dt(reply).await?,
            Command::StopDt(reply) => self.stop_dt(reply).await?,
            Command::Send(asdu, reply) => self.send_i_frame(asdu, reply).await?,
            Command::Close => return Ok(Some(CloseReason::LocalClose)),
        }
        Ok(None)
    }

    async fn start_dt(&mut self, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        let rejection = match (self.role, self.state) {
            (Role::Server, _) => Iec60870Error::protocol("STARTDT is initiated by the client"),
            (_, ConnectionState::Active) => {
                let _ = reply.send(Ok(()));
                return Ok(());
            }
            (_, ConnectionState::Connected) => {
                return self.begin_handshake(UFunction::StartDtAct, reply).await;
            }
            (_, state) => {
                Iec60870Error::protocol(format!("cannot start data transfer in state {:?}", state))
            }
        };
        let _ = reply.send(Err(rejection));
        Ok(())
    }

    async fn stop_dt(&mut self, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        let rejection = match (self.role, self.state) {
            (Role::Server, _) => Iec60870Error::protocol("STOPDT is initiated by the client"),
            (_, ConnectionState::Connected) => {
                let _ = reply.send(Ok(()));
                return Ok(());
            }
            (_, ConnectionState::Active) => {
                if self.recv.unacked() > 0 {
                    self.send_ack().await?;
                }
                return self.begin_handshake(UFunction::StopDtAct, reply).await;
            }
            (_, state) => {
                Iec60870Error::protocol(format!("cannot stop data transfer in state {:?}", state))
            }
        };
        let _ = reply.send(Err(rejection));
        Ok(())
    }

    async fn begin_handshake(
        &mut self,
        activation: UFunction,
        reply: oneshot::Sender<Result<()>>,
    ) -> Result<()> {
        let (awaiting, state) = match activation {
            UFunction::StartDtAct => (UFunction::StartDtCon, ConnectionState::StartPending),
            _ => (UFunction::StopDtCon, ConnectionState::Stopping),
        };
        self.set_state(state);
        self.handshake = Some(Handshake {
            awaiting,
            deadline: Instant::now() + self.apci.t1,
            reply,
        });
        self.write(Apdu::u_frame(activation)).await
    }

    async fn send_i_frame(&mut self, asdu: Asdu, reply: oneshot::Sender<Result<()>>) -> Result<()> {
        let send_seq = match self.check_sendable(&asdu) {
            Ok(()) => match self.send.reserve(Instant::now()) {
                Ok(seq) => seq,
                Err(e) => {
                    let _ = reply.send(Err(e));
                    return Ok(());
                }
            },
            Err(e) => {
                let _ = reply.send(Err(e));
                return Ok(());
            }
        };

        // The I-frame carries the acknowledgment of everything received
        let recv_seq = self.recv.acknowledge_all();
        self.t2_deadline = None;

        let written = self.write(Apdu::i_frame(send_seq, recv_seq, asdu)).await;
        let _ = reply.send(match &written {
            Ok(()) => Ok(()),
            Err(e) => Err(Iec60870Error::Connection(e.to_string())),
        });
        written
    }

    fn check_sendable(&self, asdu: &Asdu) -> Result<()> {
        if self.state != ConnectionState::Active {
            return Err(Iec60870Error::NotActive);
        }
        let params = self.framed.codec().params();
        asdu.validate(params)?;
        let len = asdu.encoded_len(params);
        if len > MAX_ASDU_LENGTH {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU of {} bytes exceeds {}",
                len, MAX_ASDU_LENGTH
            )));
        }
        Ok(())
    }

    async fn send_ack(&mut self) -> Result<()> {
        self.t2_deadline = None;
        let recv_seq = self.recv.acknowledge_all();
        self.write(Apdu::s_frame(recv_seq)).await
    }

    async fn on_idle(&mut self) -> Result<()> {
        self.t3_deadline = None;
        self.test_deadline = Some(Instant::now() + self.apci.t1);
        debug!("T3 expired, sending test frame");
        self.write(Apdu::u_frame(UFunction::TestFrAct)).await
    }

    fn activate(&mut self) {
        self.send.reset();
        self.recv.reset();
        self.t2_deadline = None;
        self.set_state(ConnectionState::Active);
        info!(role = ?self.role, "data transfer started");
        self.emit(ConnectionEvent::Ready);
    }

    fn stop(&mut self) {
        self.set_state(ConnectionState::Connected);
        info!(role = ?self.role, "data transfer stopped");
        self.emit(ConnectionEvent::DataTransferStopped);
    }

    async fn write(&mut self, apdu: Apdu) -> Result<()> {
        debug!(role = ?self.role, frame = %apdu, "tx");
        self.framed.send(apdu).await
    }

    fn set_state(&mut self, state: ConnectionState) {
        self.state = state;
        self.state_tx.send_replace(state);
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn shutdown(mut self, reason: CloseReason) {
        match reason {
            CloseReason::LocalClose | CloseReason::RemoteClosed => {
                info!(role = ?self.role, %reason, "IEC 104 connection closed")
            }
            _ => error!(role = ?self.role, %reason, "IEC 104 connection lost"),
        }

        if let Some(handshake) = self.handshake.take() {
            let err = match reason {
                CloseReason::HandshakeTimeout => Iec60870Error::T1Timeout,
                _ => Iec60870Error::NotConnected,
            };
            let _ = handshake.reply.send(Err(err));
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::StartDt(reply) | Command::StopDt(reply) | Command::Send(_, reply) => {
                    let _ = reply.send(Err(Iec60870Error::NotConnected));
                }
                Command::Close => {}
            }
        }

        let _ = self.framed.get_mut().shutdown().await;
        self.set_state(ConnectionState::Disconnected);
        self.emit(ConnectionEvent::Lost(reason));
    }
}
