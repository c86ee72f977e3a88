//! IEC 60870-5-101 slave (unbalanced secondary station).
//!
//! The slave never talks first. It answers the master's link requests,
//! hands out queued ASDUs on class 1 / class 2 polls and delivers the
//! master's user data as [`ConnectionEvent::AsduReceived`].
//!
//! Spontaneous and command related ASDUs go to class 1, periodic and
//! background data to class 2. Pending class 1 data is announced with
//! the ACD bit on every response.

use std::collections::VecDeque;

use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::{mpsc, oneshot, watch};
use tokio_util::codec::{Decoder, Encoder};
use tracing::{debug, error, info, trace, warn};

use super::codec::Ft12Codec;
use super::frame::{ControlField, LinkFrame, PrimaryFunction, SecondaryFunction};
use crate::config::{AppLayerParameters, LinkLayerParameters};
use crate::connection::{Connection, ConnectionEvent};
use crate::error::{CloseReason, Iec60870Error, Result};
use crate::types::{Asdu, Cot};

const COMMAND_QUEUE_SIZE: usize = 64;
const READ_BUFFER_SIZE: usize = 512;

/// Data class of a queued ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DataClass {
    /// High priority: spontaneous data, command responses
    Class1,
    /// Low priority: cyclic and background data
    Class2,
}

impl DataClass {
    /// Class an ASDU is queued in, chosen by its cause of transmission.
    pub fn of(asdu: &Asdu) -> Self {
        match asdu.cot() {
            Cot::Periodic | Cot::Background => Self::Class2,
            _ => Self::Class1,
        }
    }
}

#[derive(Debug)]
enum Command {
    Enqueue {
        class: DataClass,
        asdu: Bytes,
        reply: oneshot::Sender<Result<()>>,
    },
    Close,
}

/// Handle to a running IEC 101 slave.
#[derive(Debug, Clone)]
pub struct Iec101Slave {
    commands: mpsc::Sender<Command>,
    closed: watch::Receiver<bool>,
    address: u16,
    params: AppLayerParameters,
    max_asdu_length: usize,
}

impl Iec101Slave {
    /// Start serving link address `address` over `io`.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn<T>(
        io: T,
        address: u16,
        link: LinkLayerParameters,
        params: AppLayerParameters,
    ) -> Result<(Self, mpsc::UnboundedReceiver<ConnectionEvent>)>
    where
        T: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        link.validate()?;
        link.check_address(address)?;
        if link.address_length > 0 && address == link.broadcast_address() {
            return Err(Iec60870Error::config("the broadcast address cannot be a slave address"));
        }
        let codec = Ft12Codec::new(link.address_length)?;

        let (command_tx, command_rx) = mpsc::channel(COMMAND_QUEUE_SIZE);
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let actor = Actor {
            io,
            codec,
            read_buf: BytesMut::with_capacity(READ_BUFFER_SIZE),
            address,
            link,
            params,
            class1: VecDeque::new(),
            class2: VecDeque::new(),
            last_fcb: None,
            last_response: None,
            link_reset: false,
            commands: command_rx,
            events: event_tx,
            closed_tx,
        };
        tokio::spawn(actor.run());

        let handle = Self {
            commands: command_tx,
            closed: closed_rx,
            address,
            params,
            max_asdu_length: codec.max_asdu_length(),
        };
        Ok((handle, event_rx))
    }

    /// Own link address.
    pub fn address(&self) -> u16 {
        self.address
    }

    /// Field widths used by this link.
    pub fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }

    /// Queue an ASDU for the master's next poll of its [`DataClass`].
    ///
    /// Fails with [`Iec60870Error::QueueFull`] when `queue_size` ASDUs of
    /// that class are already waiting.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        let class = DataClass::of(&asdu);
        let bytes = asdu.to_bytes(&self.params)?;
        if bytes.len() > self.max_asdu_length {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU of {} bytes exceeds {}",
                bytes.len(),
                self.max_asdu_length
            )));
        }

        let (reply_tx, reply_rx) = oneshot::channel();
        self.commands
            .send(Command::Enqueue {
                class,
                asdu: bytes,
                reply: reply_tx,
            })
            .await
            .map_err(|_| Iec60870Error::NotConnected)?;
        reply_rx.await.map_err(|_| Iec60870Error::NotConnected)?
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
}

#[async_trait]
impl Connection for Iec101Slave {
    async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        Iec101Slave::send_asdu(self, asdu).await
    }

    async fn close(&self) {
        Iec101Slave::close(self).await
    }

    fn is_closed(&self) -> bool {
        Iec101Slave::is_closed(self)
    }

    fn app_parameters(&self) -> &AppLayerParameters {
        &self.params
    }
}

struct Actor<T> {
    io: T,
    codec: Ft12Codec,
    read_buf: BytesMut,
    address: u16,
    link: LinkLayerParameters,
    params: AppLayerParameters,
    class1: VecDeque<Bytes>,
    class2: VecDeque<Bytes>,
    /// FCB of the last accepted FCV frame; None right after a link reset
    last_fcb: Option<bool>,
    /// Answer to the last accepted FCV frame, resent on repetition
    last_response: Option<LinkFrame>,
    link_reset: bool,
    commands: mpsc::Receiver<Command>,
    events: mpsc::UnboundedSender<ConnectionEvent>,
    closed_tx: watch::Sender<bool>,
}

impl<T> Actor<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    async fn run(mut self) {
        info!(address = self.address, "IEC 101 slave started");
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
        tokio::select! {
            read = self.io.read_buf(&mut self.read_buf) => {
                if read? == 0 {
                    return Ok(Some(CloseReason::RemoteClosed));
                }
                self.process_input().await.map(|_| None)
            }
            command = self.commands.recv() => match command {
                Some(Command::Enqueue { class, asdu, reply }) => {
                    let _ = reply.send(self.enqueue(class, asdu));
                    Ok(None)
                }
                Some(Command::Close) | None => Ok(Some(CloseReason::LocalClose)),
            },
        }
    }

    /// Decode every complete frame in the read buffer. Malformed input is
    /// answered with a NACK and skipped.
    async fn process_input(&mut self) -> Result<()> {
        loop {
            match self.codec.decode(&mut self.read_buf) {
                Ok(Some(frame)) => self.on_frame(frame).await?,
                Ok(None) => return Ok(()),
                Err(e) => {
                    warn!(error = %e, "discarding malformed frame");
                    self.write(LinkFrame::SingleNack).await?;
                }
            }
        }
    }

    fn enqueue(&mut self, class: DataClass, asdu: Bytes) -> Result<()> {
        let queue = match class {
            DataClass::Class1 => &mut self.class1,
            DataClass::Class2 => &mut self.class2,
        };
        if queue.len() >= self.link.queue_size {
            return Err(Iec60870Error::QueueFull);
        }
        queue.push_back(asdu);
        trace!(?class, queued = queue.len(), "ASDU queued");
        Ok(())
    }

    async fn on_frame(&mut self, frame: LinkFrame) -> Result<()> {
        debug!(%frame, "rx");
        let (control, address, asdu) = match frame {
            LinkFrame::Fixed { control, address } => (control, address, None),
            LinkFrame::Variable {
                control,
                address,
                asdu,
            } => (control, address, Some(asdu)),
            LinkFrame::SingleAck | LinkFrame::SingleNack => {
                warn!(%frame, "ignoring single character from the master");
                return Ok(());
            }
        };
        let ControlField::Primary { function, fcb, fcv } = control else {
            warn!(%control, "ignoring frame from another secondary");
            return Ok(());
        };

        if self.link.address_length > 0 && address == self.link.broadcast_address() {
            match (function, asdu) {
                (PrimaryFunction::UserDataNoReply, Some(asdu)) => {
                    self.deliver(&asdu);
                }
                (function, _) => warn!(?function, "ignoring broadcast request"),
            }
            return Ok(());
        }
        if address != self.address {
            trace!(address, "frame for another station");
            return Ok(());
        }

        if fcv && self.last_fcb == Some(fcb) {
            if let Some(response) = self.last_response.clone() {
                debug!(?function, "repeated frame, sending previous response");
                return self.write(response).await;
            }
        }

        let response = match function {
            PrimaryFunction::ResetRemoteLink => {
                self.last_fcb = None;
                self.last_response = None;
                if !self.link_reset {
                    self.link_reset = true;
                    info!(address = self.address, "link reset by master");
                    self.emit(ConnectionEvent::Ready);
                }
                Some(self.ack())
            }
            PrimaryFunction::ResetUserProcess => {
                self.class1.clear();
                self.class2.clear();
                Some(self.ack())
            }
            PrimaryFunction::TestFunctionLink => Some(self.ack()),
            PrimaryFunction::UserDataConfirmed => {
                let delivered = match &asdu {
                    Some(asdu) => self.deliver(asdu),
                    None => false,
                };
                if !delivered {
                    // FCB not stored, so the repetition is processed again
                    return self.write(LinkFrame::SingleNack).await;
                }
                Some(self.ack())
            }
            PrimaryFunction::UserDataNoReply => {
                if let Some(asdu) = &asdu {
                    self.deliver(asdu);
                }
                None
            }
            PrimaryFunction::RequestLinkStatus | PrimaryFunction::RequestAccessDemand => {
                Some(self.fixed(SecondaryFunction::StatusOfLink))
            }
            PrimaryFunction::RequestClass1 => Some(self.user_data(DataClass::Class1)),
            PrimaryFunction::RequestClass2 => Some(self.user_data(DataClass::Class2)),
        };

        if fcv {
            self.last_fcb = Some(fcb);
            self.last_response = response.clone();
        }
        match response {
            Some(response) => self.write(response).await,
            None => Ok(()),
        }
    }

    /// Decode and report user data; false when the ASDU is malformed.
    fn deliver(&mut self, asdu: &[u8]) -> bool {
        match Asdu::decode(&self.params, asdu) {
            Ok(asdu) => {
                self.emit(ConnectionEvent::AsduReceived(asdu));
                true
            }
            Err(e) => {
                warn!(error = %e, "rejecting user data");
                false
            }
        }
    }

    fn user_data(&mut self, class: DataClass) -> LinkFrame {
        let next = match class {
            DataClass::Class1 => self.class1.pop_front(),
            DataClass::Class2 => self.class2.pop_front(),
        };
        match next {
            Some(asdu) => {
                let control = ControlField::secondary(SecondaryFunction::RespUserData, self.acd());
                LinkFrame::user_data(control, self.address, asdu)
            }
            None if self.link.use_single_char_ack && !self.acd() => LinkFrame::SingleAck,
            None => self.fixed(SecondaryFunction::RespNackNoData),
        }
    }

    fn ack(&self) -> LinkFrame {
        // E5h cannot carry ACD
        if self.link.use_single_char_ack && !self.acd() {
            LinkFrame::SingleAck
        } else {
            self.fixed(SecondaryFunction::Ack)
        }
    }

    fn fixed(&self, function: SecondaryFunction) -> LinkFrame {
        LinkFrame::secondary(function, self.acd(), self.address)
    }

    fn acd(&self) -> bool {
        !self.class1.is_empty()
    }

    async fn write(&mut self, frame: LinkFrame) -> Result<()> {
        debug!(%frame, "tx");
        let mut out = BytesMut::new();
        self.codec.encode(frame, &mut out)?;
        self.io.write_all(&out).await?;
        self.io.flush().await?;
        Ok(())
    }

    fn emit(&self, event: ConnectionEvent) {
        let _ = self.events.send(event);
    }

    async fn shutdown(mut self, reason: CloseReason) {
        match reason {
            CloseReason::LocalClose | CloseReason::RemoteClosed => {
                info!(address = self.address, %reason, "IEC 101 slave closed")
            }
            _ => error!(address = self.address, %reason, "IEC 101 slave lost"),
        }

        self.commands.close();
        while let Ok(command) = self.commands.try_recv() {
            if let Command::Enqueue { reply, .. } = command {
                let _ = reply.send(Err(Iec60870Error::NotConnected));
            }
        }

        let _ = self.io.shutdown().await;
        self.closed_tx.send_replace(true);
        self.emit(ConnectionEvent::Lost(reason));
    }
}

#[cfg(test)]
mod tests {
    use futures::{SinkExt, StreamExt};
    use tokio::io::DuplexStream;
    use tokio_util::codec::Framed;

    use super::*;
    use crate::types::{InformationObject, InterrogationQualifier, Quality, SinglePointInfo, TypeId};

    type Peer = Framed<DuplexStream, Ft12Codec>;

    fn spawn(link: LinkLayerParameters) -> (Iec101Slave, mpsc::UnboundedReceiver<ConnectionEvent>, Peer) {
        let (local, remote) = tokio::io::duplex(4096);
        let (slave, events) = Iec101Slave::spawn(local, 1, link, AppLayerParameters::iec101()).unwrap();
        (slave, events, Framed::new(remote, Ft12Codec::default()))
    }

    fn single_point(cot: Cot, on: bool) -> Asdu {
        let siq = SinglePointInfo::new(on, Quality::GOOD).unwrap();
        Asdu::new(TypeId::SinglePoint, cot, 1)
            .with_object(InformationObject::new(100, vec![siq.into()]))
            .unwrap()
    }

    async fn request(peer: &mut Peer, frame: LinkFrame) -> LinkFrame {
        peer.send(frame).await.unwrap();
        peer.next().await.unwrap().unwrap()
    }

    async fn poll(peer: &mut Peer, function: PrimaryFunction, fcb: bool) -> LinkFrame {
        request(peer, LinkFrame::primary(function, fcb, 1)).await
    }

    fn decode_response(response: &LinkFrame) -> (Asdu, bool) {
        match response {
            LinkFrame::Variable { control, asdu, .. } => {
                (Asdu::decode(&AppLayerParameters::iec101(), asdu).unwrap(), control.acd())
            }
            other => panic!("expected user data, got {}", other),
        }
    }

    #[tokio::test]
    async fn test_link_status_and_reset() {
        let (_slave, mut events, mut peer) = spawn(LinkLayerParameters::default());

        let status = poll(&mut peer, PrimaryFunction::RequestLinkStatus, false).await;
        assert_eq!(status, LinkFrame::secondary(SecondaryFunction::StatusOfLink, false, 1));

        let reset = poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        assert_eq!(reset, LinkFrame::SingleAck);
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);
    }

    #[tokio::test]
    async fn test_fixed_ack_without_single_char() {
        let link = LinkLayerParameters::default().use_single_char_ack(false);
        let (_slave, _events, mut peer) = spawn(link);

        let reset = poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        assert_eq!(reset, LinkFrame::secondary(SecondaryFunction::Ack, false, 1));
        let empty = poll(&mut peer, PrimaryFunction::RequestClass2, true).await;
        assert_eq!(empty, LinkFrame::secondary(SecondaryFunction::RespNackNoData, false, 1));
    }

    #[tokio::test]
    async fn test_class1_poll_and_acd() {
        let (slave, _events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;

        let first = single_point(Cot::Spontaneous, true);
        let second = single_point(Cot::Spontaneous, false);
        slave.send_asdu(first.clone()).await.unwrap();
        slave.send_asdu(second.clone()).await.unwrap();

        // Pending class 1 data is announced on every answer
        let status = poll(&mut peer, PrimaryFunction::RequestLinkStatus, false).await;
        assert!(status.control().unwrap().acd());

        let response = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        assert_eq!(decode_response(&response), (first, true));
        let response = poll(&mut peer, PrimaryFunction::RequestClass1, false).await;
        assert_eq!(decode_response(&response), (second, false));
        let response = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        assert_eq!(response, LinkFrame::SingleAck);
    }

    #[tokio::test]
    async fn test_periodic_data_is_class2() {
        let (slave, _events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;

        let cyclic = single_point(Cot::Periodic, true);
        slave.send_asdu(cyclic.clone()).await.unwrap();

        let response = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        assert_eq!(response, LinkFrame::SingleAck);
        let response = poll(&mut peer, PrimaryFunction::RequestClass2, false).await;
        assert_eq!(decode_response(&response), (cyclic, false));
    }

    #[tokio::test]
    async fn test_repeated_fcb_resends_response() {
        let (slave, _events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        slave.send_asdu(single_point(Cot::Spontaneous, true)).await.unwrap();

        let first = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        // Master missed the answer and repeats with the same FCB
        let repeated = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        assert_eq!(repeated, first);

        let next = poll(&mut peer, PrimaryFunction::RequestClass1, false).await;
        assert_eq!(next, LinkFrame::SingleAck);
    }

    #[tokio::test]
    async fn test_duplicate_user_data_delivered_once() {
        let (_slave, mut events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);

        let command = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
        let bytes = command.to_bytes(&AppLayerParameters::iec101()).unwrap();
        let control = ControlField::primary(PrimaryFunction::UserDataConfirmed, true);
        let frame = LinkFrame::user_data(control, 1, bytes);

        assert_eq!(request(&mut peer, frame.clone()).await, LinkFrame::SingleAck);
        assert_eq!(request(&mut peer, frame).await, LinkFrame::SingleAck);

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::AsduReceived(command));
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_malformed_user_data_is_nacked() {
        let (_slave, mut events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::Ready);

        let control = ControlField::primary(PrimaryFunction::UserDataConfirmed, true);
        let frame = LinkFrame::user_data(control, 1, Bytes::from_static(&[0xFF, 0x01, 0x06, 0x01]));
        let response = request(&mut peer, frame).await;
        assert!(response.is_nack());
        assert!(events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_garbage_answered_with_nack() {
        let (_slave, _events, mut peer) = spawn(LinkLayerParameters::default());

        peer.get_mut().write_all(&[0x10, 0x49, 0x01, 0x00, 0x16]).await.unwrap();
        assert_eq!(peer.next().await.unwrap().unwrap(), LinkFrame::SingleNack);

        // Still serving afterwards
        let status = poll(&mut peer, PrimaryFunction::RequestLinkStatus, false).await;
        assert_eq!(status.address(), Some(1));
    }

    #[tokio::test]
    async fn test_other_addresses_ignored() {
        let (_slave, _events, mut peer) = spawn(LinkLayerParameters::default());

        peer.send(LinkFrame::primary(PrimaryFunction::RequestLinkStatus, false, 2))
            .await
            .unwrap();
        let status = poll(&mut peer, PrimaryFunction::RequestLinkStatus, false).await;
        assert_eq!(status.address(), Some(1));
    }

    #[tokio::test]
    async fn test_broadcast_user_data() {
        let (_slave, mut events, mut peer) = spawn(LinkLayerParameters::default());

        let command = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
        let bytes = command.to_bytes(&AppLayerParameters::iec101()).unwrap();
        let control = ControlField::primary(PrimaryFunction::UserDataNoReply, false);
        peer.send(LinkFrame::user_data(control, 0xFF, bytes)).await.unwrap();

        assert_eq!(events.recv().await.unwrap(), ConnectionEvent::AsduReceived(command));
    }

    #[tokio::test]
    async fn test_queue_full() {
        let (slave, _events, _peer) = spawn(LinkLayerParameters::default().queue_size(2));

        slave.send_asdu(single_point(Cot::Spontaneous, true)).await.unwrap();
        slave.send_asdu(single_point(Cot::Spontaneous, false)).await.unwrap();
        assert!(matches!(
            slave.send_asdu(single_point(Cot::Spontaneous, true)).await,
            Err(Iec60870Error::QueueFull)
        ));
        // The other class has its own queue
        slave.send_asdu(single_point(Cot::Periodic, true)).await.unwrap();
    }

    #[tokio::test]
    async fn test_reset_user_process_clears_queues() {
        let (slave, _events, mut peer) = spawn(LinkLayerParameters::default());
        poll(&mut peer, PrimaryFunction::ResetRemoteLink, false).await;
        slave.send_asdu(single_point(Cot::Spontaneous, true)).await.unwrap();

        let reset = poll(&mut peer, PrimaryFunction::ResetUserProcess, false).await;
        assert_eq!(reset, LinkFrame::SingleAck);
        let response = poll(&mut peer, PrimaryFunction::RequestClass1, true).await;
        assert_eq!(response, LinkFrame::SingleAck);
    }

    #[tokio::test]
    async fn test_remote_close() {
        let (slave, mut events, peer) = spawn(LinkLayerParameters::default());
        drop(peer);

        assert_eq!(
            events.recv().await.unwrap(),
            ConnectionEvent::Lost(CloseReason::RemoteClosed)
        );
        slave.closed().await;
        assert!(slave.is_closed());
    }

    #[test]
    fn test_data_class() {
        assert_eq!(DataClass::of(&single_point(Cot::Spontaneous, true)), DataClass::Class1);
        assert_eq!(DataClass::of(&single_point(Cot::Background, true)), DataClass::Class2);
        assert_eq!(DataClass::of(&single_point(Cot::Periodic, true)), DataClass::Class2);
    }
}
