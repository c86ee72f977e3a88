//! Binding-independent connection interface.
//!
//! Every connection, whether IEC 104 over TCP or IEC 101 over a serial
//! line, reports what happens to it as a stream of [`ConnectionEvent`]s on a
//! tokio channel. Applications either consume that channel directly or hand
//! it to [`dispatch_events`] together with a [`ConnectionListener`].

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::config::AppLayerParameters;
use crate::cs101::LinkState;
use crate::error::{CloseReason, Result};
use crate::types::Asdu;

/// Events emitted by a connection.
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionEvent {
    /// Data transfer started (STARTDT confirmed) or the serial link was reset
    Ready,
    /// An ASDU was received from the peer
    AsduReceived(Asdu),
    /// Data transfer stopped (STOPDT confirmed); the connection stays open
    DataTransferStopped,
    /// A secondary station changed link state (IEC 101 master only)
    LinkStateChanged {
        /// Link address of the secondary station
        address: u16,
        /// New state
        state: LinkState,
    },
    /// The connection was closed; emitted exactly once and always last
    Lost(CloseReason),
}

/// Sending side of a connection.
#[async_trait]
pub trait Connection: Send + Sync {
    /// Send an ASDU to the peer.
    ///
    /// For IEC 104 this is an I-frame subject to the k window; for IEC 101
    /// it is queued or sent as confirmed user data depending on the role.
    async fn send_asdu(&self, asdu: Asdu) -> Result<()>;

    /// Close the connection. Closing an already closed connection is a no-op.
    async fn close(&self);

    /// Whether the connection has been closed.
    fn is_closed(&self) -> bool;

    /// Field widths used to encode and decode ASDUs.
    fn app_parameters(&self) -> &AppLayerParameters;
}

/// Callback interface driven by [`dispatch_events`].
pub trait ConnectionListener: Send {
    /// Data transfer became active.
    fn on_ready(&mut self) {}

    /// An ASDU arrived.
    fn on_asdu_received(&mut self, asdu: Asdu);

    /// Data transfer stopped while the connection stays open.
    fn on_data_transfer_stopped(&mut self) {}

    /// A serial secondary changed link state.
    fn on_link_state_changed(&mut self, _address: u16, _state: LinkState) {}

    /// The connection is gone.
    fn on_lost(&mut self, _reason: CloseReason) {}
}

/// Drive `listener` from an event channel until the connection is lost.
///
/// Returns the close reason, or `None` if the channel ended without a
/// [`ConnectionEvent::Lost`].
pub async fn dispatch_events<L>(
    events: &mut mpsc::UnboundedReceiver<ConnectionEvent>,
    listener: &mut L,
) -> Option<CloseReason>
where
    L: ConnectionListener + ?Sized,
{
    while let Some(event) = events.recv().await {
        match event {
            ConnectionEvent::Ready => listener.on_ready(),
            ConnectionEvent::AsduReceived(asdu) => listener.on_asdu_received(asdu),
            ConnectionEvent::DataTransferStopped => listener.on_data_transfer_stopped(),
            ConnectionEvent::LinkStateChanged { address, state } => {
                listener.on_link_state_changed(address, state)
            }
            ConnectionEvent::Lost(reason) => {
                listener.on_lost(reason.clone());
                return Some(reason);
            }
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{Asdu, InterrogationQualifier};

    #[derive(Default)]
    struct Recorder {
        ready: usize,
        asdus: Vec<Asdu>,
        lost: Vec<CloseReason>,
    }

    impl ConnectionListener for Recorder {
        fn on_ready(&mut self) {
            self.ready += 1;
        }

        fn on_asdu_received(&mut self, asdu: Asdu) {
            self.asdus.push(asdu);
        }

        fn on_lost(&mut self, reason: CloseReason) {
            self.lost.push(reason);
        }
    }

    #[tokio::test]
    async fn test_dispatch_until_lost() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let asdu = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();

        tx.send(ConnectionEvent::Ready).unwrap();
        tx.send(ConnectionEvent::AsduReceived(asdu.clone())).unwrap();
        tx.send(ConnectionEvent::Lost(CloseReason::RemoteClosed)).unwrap();
        tx.send(ConnectionEvent::Ready).unwrap();

        let mut recorder = Recorder::default();
        let reason = dispatch_events(&mut rx, &mut recorder).await;

        assert_eq!(reason, Some(CloseReason::RemoteClosed));
        assert_eq!(recorder.ready, 1);
        assert_eq!(recorder.asdus, vec![asdu]);
        assert_eq!(recorder.lost, vec![CloseReason::RemoteClosed]);
    }

    #[tokio::test]
    async fn test_dispatch_channel_closed() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.send(ConnectionEvent::Ready).unwrap();
        drop(tx);

        let mut recorder = Recorder::default();
        assert_eq!(dispatch_events(&mut rx, &mut recorder).await, None);
        assert_eq!(recorder.ready, 1);
    }
}
