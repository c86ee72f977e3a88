//! IEC 60870-5-101 master (unbalanced primary station).
//!
//! The master owns the serial line: every exchange is a request from the
//! master followed by at most one response from the addressed secondary.
//! A single tokio task runs the link handshake of each secondary, the
//! class 1 / class 2 poll cycle and the user data requests queued through
//! the [`Iec101Master`] handle.

use async_trait::async_trait;
use bytes::Bytes;
use futures::{SinkExt, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{interval_at, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tokio_util::codec::Framed;
use tracing::{debug, error, info, warn};

use super::codec::Ft12Codec;
use super::frame::{ControlField, LinkFrame, PrimaryFunction, SecondaryFunction};
use crate::config::{AppLayerParameters, LinkLayerParameters};
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{CloseReason, Iec60870Error, Result};
use crate::types::Asdu;

const COMMAND_QUEUE_SIZE: usize = 64;

/// Upper bound of class 1 requests forced by ACD within one poll.
const MAX_ACCESS_DEMAND_POLLS: usize = 8;

/// Link state of one secondary station, as seen by the master.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LinkState {
    /// No answer from the secondary
    Disconnected,
    /// Link status answered, link not reset yet
    LinkStatusKnown,
    /// Link reset confirmed; user data and polls are exchanged
    LinkActive,
}

impl std::fmt::Display for LinkState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Disconnected => "disconnected",
            Self::LinkStatusKnown => "link status known",
            Self::LinkActive => "link active",
        };
        f.write_str(name)
    }
}

#[derive(Debug)]
enum Command {
    UserData {
        address: u16,
        asdu: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    NoReply {
        address: u16,
        asdu: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    LinkStates(oneshot::Sender<Vec<(u16, LinkState)>>),
    Close,
}

/// Handle to a running IEC 101 master.
///
/// Cloning is cheap. The link is closed when [`close`](Self::close) is
/// called, when every handle is dropped, or when the line fails.
///
/// Requests are served one at a time by a single task. A poll cycle that
/// re-initializes a silent secondary holds the line for up to twice
/// `init_timeout`, so user data queued for other secondaries in that cycle
/// waits as long.
#[derive(Debug, Clone)]
pub struct Iec101Master {
    commands: mpsc::Sender<Command>,
    closed: watch::Receiver<bool>,
    params: AppLayerParameters,
    link: LinkLayerParameters,
    addresses: Vec<u16>,
    max_asdu_length: usize,
}

impl Iec101Master {
    /// Open the link to the secondaries at `addresses` over `io`.
    ///
    /// Resolves once every secondary has answered the link status request
    /// and confirmed the link reset, or fails with
    /// [`Iec60870Error::LinkTimeout`] when one of them does not within
    /// `init_timeout`.
    ///
    /// # Example
    ///
    /// ```rust,ignore
    /// let port = open_serial_port(&SerialConfig::new("/dev/ttyS0", 9600))?;
    /// let (master, mut events) =
    ///     Iec101Master::open(port, &[1], LinkLayerParameters::default(), AppLayerParameters::iec101()).await?;
    /// master.send_asdu(Asdu::interrogation_command(1, InterrogationQualifier::STATION)?).await?;
    /// ```
    pub async fn open<T>(
        io: T,
        addresses: &[u16],
        link: LinkLayerParameters,
        params: AppLayerParameters,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        link.validate()?;
        let codec = Ft12Codec::new(link.address_length)?;
        if addresses.is_empty() {
            return Err(Iec60870Error::config("at least one secondary address is required"));
        }
        if link.address_length == 0 && addresses.len() > 1 {
            return Err(Iec60870Error::config(
                "a link without address field serves a single secondary",
            ));
        }
        for (i, &address) in addresses.iter().enumerate() {
            link.check_address(address)?;
            if link.address_length > 0 && address == link.broadcast_address() {
                return Err(Iec60870Error::config("the broadcast address cannot be polled"));
            }
            if addresses[..i].contains(&address) {
                return Err(Iec60870Error::config(format!("duplicate link address {}", address)));
            }
        }

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);
        let (init_tx, init_rx) = oneshot::channel();

        let actor = Actor {
            framed: Framed::new(io, codec),
            link,
            params,
            secondaries: addresses.iter().map(|&address| Secondary::new(address)).collect(),
            commands: command_rx,
            events: event_tx,
            closed_tx,
        };
        tokio::spawn(actor.run(init_tx));

        init_rx.await.map_err(|_| Iec60870Error::NotConnected)??;
        let handle = Self {
            commands: command_tx,
            closed: closed_rx,
            params,
            link,
            addresses: addresses.to_vec(),
            max_asdu_length: codec.max_asdu_length(),
        };
        Ok((handle, event_rx))
    }

    /// Link addresses of the secondaries, in poll order.
    pub fn addresses(&self) -> &[u16] {
        &self.addresses
    }

    /// Link layer parameters.
    pub fn link_parameters(&self) -> &LinkLayerParameters {
        &self.link
    }

    /// Field widths used by this link.
    pub fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }

    /// Send an ASDU to the first secondary as confirmed user data.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        let address = self.addresses.first().copied().ok_or(Iec60870Error::NotConnected)?;
        self.send_asdu_to(address, &asdu).await
    }

    /// Send an ASDU to `address` as confirmed user data.
    ///
    /// The frame is repeated with the same FCB up to `retries` times. An
    /// unanswered request fails with [`Iec60870Error::RetriesExhausted`];
    /// the secondary drops to [`LinkState::Disconnected`] and the next poll
    /// cycle runs the link handshake again.
    pub async fn send_asdu_to(&self, address: u16, asdu: &Asdu) -> Result<()> {
        let asdu = self.encode(asdu)?;
        self.request(|reply| Command::UserData {
            address,
            asdu,
            reply,
        })
        .await
    }

    /// Send an ASDU without link confirmation; `address` may be the
    /// broadcast address.
    pub async fn send_no_reply(&self, address: u16, asdu: &Asdu) -> Result<()> {
        self.link.check_address(address)?;
        let asdu = self.encode(asdu)?;
        self.request(|reply| Command::NoReply {
            address,
            asdu,
            reply,
        })
        .await
    }

    /// Send an ASDU to every secondary at once.
    pub async fn broadcast(&self, asdu: &Asdu) -> Result<()> {
        self.send_no_reply(self.link.broadcast_address(), asdu).await
    }

    /// Link state of every secondary.
    pub async fn link_states(&self) -> Result<Vec<(u16, LinkState)>> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::LinkStates(reply_tx))
            .await
            .map_err(|_| Iec60870Error::NotConnected)?;
        reply_rx.await.map_err(|_| Iec60870Error::NotConnected)
    }

    /// Whether the link has been closed.
    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Close the link and wait until it is gone.
    pub async fn close(&self) {
        let _ = self.commands.send(Command::Close).await;
        self.closed().await;
    }

    /// Wait until the link is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|closed| *closed).await;
    }

    fn encode(&self, asdu: &Asdu) -> Result<Bytes> {
        let bytes = asdu.to_bytes(&self.params)?;
        if bytes.len() > self.max_asdu_length {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU of {} bytes exceeds {}",
                bytes.len(),
                self.max_asdu_length
            )));
        }
        Ok(bytes)
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
impl Connection for Iec101Master {
    async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        Iec101Master::send_asdu(self, asdu).await
    }

    async fn close(&self) {
        Iec101Master::close(self).await
    }

    fn is_closed(&self) -> bool {
        Iec101Master::is_closed(self)
    }

    fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PollClass {
    Class1,
    Class2,
}

impl PollClass {
    fn function(self) -> PrimaryFunction {
        match self {
            Self::Class1 => PrimaryFunction::RequestClass1,
            Self::Class2 => PrimaryFunction::RequestClass2,
        }
    }

    fn other(self) -> Self {
        match self {
            Self::Class1 => Self::Class2,
            Self::Class2 => Self::Class1,
        }
    }
}

#[derive(Debug)]
struct Secondary {
    address: u16,
    state: LinkState,
    /// FCB of the last frame sent with FCV = 1
    fcb: bool,
    next_poll: PollClass,
}

impl Secondary {
    fn new(address: u16) -> Self {
        Self {
            address,
            state: LinkState::Disconnected,
            fcb: false,
            next_poll: PollClass::Class1,
        }
    }
}

struct Actor<T> {
    framed: Framed<T, Ft12Codec>,
    link: LinkLayerParameters,
    params: AppLayerParameters,
    secondaries: Vec<Secondary>,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed_tx: watch::Sender<bool>,
}

impl<T> Actor<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self, init: oneshot::Sender<Result<()>>) {
        info!(secondaries = self.secondaries.len(), "IEC 101 master opened");
        let reason = match self.initialize_all().await {
            Ok(()) => {
                let _ = init.send(Ok(()));
                self.emit(ConnectionEvent::Ready);
                self.event_loop().await
            }
            Err(e) => {
                let reason = CloseReason::from_error(&e);
                let _ = init.send(Err(e));
                reason
            }
        };
        self.shutdown(reason).await;
    }

    async fn initialize_all(&mut self) -> Result<()> {
        for index in 0..self.secondaries.len() {
            if !self.initialize(index).await? {
                return Err(Iec60870Error::LinkTimeout(format!(
                    "secondary {} did not complete link initialization",
                    self.secondaries[index].address
                )));
            }
        }
        Ok(())
    }

    /// Request link status, then reset the remote link. Returns false when
    /// the secondary stays silent for `init_timeout` in either step.
    async fn initialize(&mut self, index: usize) -> Result<bool> {
        let address = self.secondaries[index].address;
        debug!(address, "initializing link");

        let status = self
            .handshake_step(address, PrimaryFunction::RequestLinkStatus, |frame| {
                matches!(
                    frame.control(),
                    Some(ControlField::Secondary {
                        function: SecondaryFunction::StatusOfLink | SecondaryFunction::RespNackNoData,
                        ..
                    })
                )
            })
            .await?;
        if !status {
            self.set_link_state(index, LinkState::Disconnected);
            return Ok(false);
        }
        self.set_link_state(index, LinkState::LinkStatusKnown);

        self.secondaries[index].fcb = false;
        if !self
            .handshake_step(address, PrimaryFunction::ResetRemoteLink, LinkFrame::is_ack)
            .await?
        {
            self.set_link_state(index, LinkState::Disconnected);
            return Ok(false);
        }
        self.secondaries[index].next_poll = PollClass::Class1;
        self.set_link_state(index, LinkState::LinkActive);
        Ok(true)
    }

    /// Repeat a fixed request every `timeout_for_ack` until a response
    /// passes `accept` or `init_timeout` is over.
    async fn handshake_step<F>(
        &mut self,
        address: u16,
        function: PrimaryFunction,
        accept: F,
    ) -> Result<bool>
    where
        F: Fn(&LinkFrame) -> bool,
    {
        let deadline = Instant::now() + self.link.init_timeout;
        loop {
            let now = Instant::now();
            if now >= deadline {
                warn!(address, ?function, "link initialization timed out");
                return Ok(false);
            }
            let retry_at = deadline.min(now + self.link.timeout_for_ack);

            self.write(LinkFrame::primary(function, false, address)).await?;
            if let Some(response) = self.read_response(address, retry_at).await? {
                if accept(&response) {
                    return Ok(true);
                }
                debug!(address, %response, "unexpected response during initialization");
                sleep_until(retry_at).await;
            }
        }
    }

    async fn event_loop(&mut self) -> CloseReason {
        let period = self.link.poll_interval;
        let mut poll = interval_at(Instant::now() + period, period);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            let result = tokio::select! {
                command = self.commands.recv() => match command {
                    Some(Command::Close) | None => return CloseReason::LocalClose,
                    Some(command) => self.on_command(command).await,
                },
                _ = poll.tick() => self.poll_cycle().await,
                frame = self.framed.next() => match frame {
                    Some(Ok(frame)) => {
                        warn!(%frame, "ignoring unsolicited frame");
                        Ok(())
                    }
                    Some(Err(e)) => Err(e),
                    None => return CloseReason::RemoteClosed,
                },
            };
            if let Err(e) = result {
                return CloseReason::from_error(&e);
            }
        }
    }

    async fn on_command(&mut self, command: Command) -> Result<()> {
        match command {
            Command::UserData {
                address,
                asdu,
                reply,
            } => {
                let (outcome, access_demand) = match self.send_confirmed(address, asdu).await {
                    Ok(Ok(acd)) => (Ok(()), acd.then_some(address)),
                    Ok(Err(e)) => (Err(e), None),
                    Err(e) => {
                        let _ = reply.send(Err(Iec60870Error::Connection(e.to_string())));
                        return Err(e);
                    }
                };
                let _ = reply.send(outcome);
                if let Some(index) = access_demand.and_then(|address| self.index_of(address)) {
                    self.drain_access_demand(index).await?;
                }
                Ok(())
            }
            Command::NoReply {
                address,
                asdu,
                reply,
            } => {
                let control = ControlField::primary(PrimaryFunction::UserDataNoReply, false);
                let written = self.write(LinkFrame::user_data(control, address, asdu)).await;
                let _ = reply.send(match &written {
                    Ok(()) => Ok(()),
                    Err(e) => Err(Iec60870Error::Connection(e.to_string())),
                });
                written
            }
            Command::LinkStates(reply) => {
                let states = self.secondaries.iter().map(|s| (s.address, s.state)).collect();
                let _ = reply.send(states);
                Ok(())
            }
            Command::Close => Ok(()),
        }
    }

    /// Outer error closes the link; inner error only fails the request.
    /// On success returns the ACD bit of the acknowledgment.
    async fn send_confirmed(&mut self, address: u16, asdu: Bytes) -> Result<Result<bool>> {
        let Some(index) = self.index_of(address) else {
            return Ok(Err(Iec60870Error::domain(format!(
                "no secondary at link address {}",
                address
            ))));
        };
        if self.secondaries[index].state != LinkState::LinkActive {
            return Ok(Err(Iec60870Error::NotActive));
        }

        match self
            .exchange(index, PrimaryFunction::UserDataConfirmed, Some(asdu))
            .await?
        {
            Some(response) if response.is_ack() => {
                Ok(Ok(response.control().map_or(false, |c| c.acd())))
            }
            Some(response) => Ok(Err(Iec60870Error::protocol(format!(
                "unexpected response to user data: {}",
                response
            )))),
            None => {
                // The secondary may hold the FCB of an older frame now, so the
                // link is reset before the next exchange.
                warn!(address, "user data not acknowledged");
                self.lose_secondary(index);
                Ok(Err(Iec60870Error::RetriesExhausted { address }))
            }
        }
    }

    async fn poll_cycle(&mut self) -> Result<()> {
        for index in 0..self.secondaries.len() {
            if self.secondaries[index].state == LinkState::LinkActive {
                self.poll(index).await?;
            } else if !self.initialize(index).await? {
                debug!(address = self.secondaries[index].address, "secondary still silent");
            }
        }
        Ok(())
    }

    async fn poll(&mut self, index: usize) -> Result<()> {
        let class = self.secondaries[index].next_poll;
        self.secondaries[index].next_poll = class.other();

        match self.request_class(index, class).await? {
            Some(true) => self.drain_access_demand(index).await,
            Some(false) => Ok(()),
            None => {
                self.lose_secondary(index);
                Ok(())
            }
        }
    }

    async fn drain_access_demand(&mut self, index: usize) -> Result<()> {
        for _ in 0..MAX_ACCESS_DEMAND_POLLS {
            match self.request_class(index, PollClass::Class1).await? {
                Some(true) => continue,
                Some(false) => return Ok(()),
                None => {
                    self.lose_secondary(index);
                    return Ok(());
                }
            }
        }
        debug!(
            address = self.secondaries[index].address,
            "access demand still set, continuing next cycle"
        );
        Ok(())
    }

    /// Returns the ACD bit of the response, or None when unanswered.
    async fn request_class(&mut self, index: usize, class: PollClass) -> Result<Option<bool>> {
        let Some(response) = self.exchange(index, class.function(), None).await? else {
            return Ok(None);
        };
        match response {
            LinkFrame::Variable { control, asdu, .. } => {
                match Asdu::decode(&self.params, &asdu) {
                    Ok(asdu) => self.emit(ConnectionEvent::AsduReceived(asdu)),
                    Err(e) => warn!(error = %e, "discarding undecodable user data"),
                }
                Ok(Some(control.acd()))
            }
            LinkFrame::Fixed { control, .. } => Ok(Some(control.acd())),
            LinkFrame::SingleAck | LinkFrame::SingleNack => Ok(Some(false)),
        }
    }

    /// Send one FCV frame with a fresh FCB and repeat it unchanged until
    /// a response other than NACK arrives or the retries are used up.
    async fn exchange(
        &mut self,
        index: usize,
        function: PrimaryFunction,
        asdu: Option<Bytes>,
    ) -> Result<Option<LinkFrame>> {
        let secondary = &mut self.secondaries[index];
        secondary.fcb = !secondary.fcb;
        let address = secondary.address;
        let control = ControlField::primary(function, secondary.fcb);
        let frame = match asdu {
            Some(asdu) => LinkFrame::user_data(control, address, asdu),
            None => LinkFrame::Fixed { control, address },
        };

        for attempt in 0..=self.link.retries {
            if attempt > 0 {
                debug!(address, attempt, ?function, "repeating request");
            }
            self.write(frame.clone()).await?;
            let deadline = Instant::now() + self.link.timeout_for_ack;
            match self.read_response(address, deadline).await? {
                Some(response) if response.is_nack() => debug!(address, "request not accepted"),
                Some(response) => return Ok(Some(response)),
                None => {}
            }
        }
        Ok(None)
    }

    /// Wait for a secondary frame from `address` until `deadline`.
    async fn read_response(&mut self, address: u16, deadline: Instant) -> Result<Option<LinkFrame>> {
        loop {
            let frame = match timeout_at(deadline, self.framed.next()).await {
                Err(_) => return Ok(None),
                Ok(None) => return Err(Iec60870Error::NotConnected),
                Ok(Some(frame)) => frame?,
            };
            debug!(%frame, "rx");

            if frame.control().map_or(false, |c| c.is_primary()) {
                warn!(%frame, "ignoring frame from another primary station");
                continue;
            }
            match frame.address() {
                Some(from) if from != address => {
                    warn!(expected = address, from, "ignoring response from another secondary");
                }
                _ => return Ok(Some(frame)),
            }
        }
    }

    fn lose_secondary(&mut self, index: usize) {
        warn!(
            address = self.secondaries[index].address,
            "secondary not responding"
        );
        self.set_link_state(index, LinkState::Disconnected);
    }

    fn index_of(&self, address: u16) -> Option<usize> {
        self.secondaries.iter().position(|s| s.address == address)
    }

    fn set_link_state(&mut self, index: usize, state: LinkState) {
        let secondary = &mut self.secondaries[index];
        if secondary.state == state {
            return;
        }
        secondary.state = state;
        let address = secondary.address;
        info!(address, %state, "link state changed");
        self.emit(ConnectionEvent::LinkStateChanged { address, state });
    }

    async fn write(&mut self, frame: LinkFrame) -> Result<()> {
        debug!(%frame, "tx");
        self.framed.send(frame).await
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn shutdown(mut self, reason: CloseReason) {
        match reason {
            CloseReason::LocalClose | CloseReason::RemoteClosed => {
                info!(%reason, "IEC 101 master closed")
            }
            _ => error!(%reason, "IEC 101 master lost"),
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            match command {
                Command::UserData { reply, .. } | Command::NoReply { reply, .. } => {
                    let _ = reply.send(Err(Iec60870Error::NotConnected));
                }
                Command::LinkStates(_) | Command::Close => {}
            }
        }

        let _ = self.framed.get_mut().shutdown().await;
        self.closed_tx.send_replace(true);
        self.emit(ConnectionEvent::Lost(reason));
    }
}
