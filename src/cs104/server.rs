//! IEC 60870-5-104 server.
//!
//! Accepts TCP connections and runs each one as a [`Iec104Connection`] in the
//! server role. The server keeps a bounded map of live connections for
//! broadcast and shutdown; everything else a connection does is reported
//! through [`ServerEvent`]s.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use super::client::DEFAULT_PORT;
use super::connection::{Iec104Connection, Role};
use crate::config::{ApciParameters, AppLayerParameters};
use crate::connection::ConnectionEvent;
use crate::error::{Iec60870Error, Result};
use crate::types::Asdu;

/// Default limit of simultaneous connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 10;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Listen address (host:port)
    pub bind_address: String,
    /// Connections beyond this limit are closed right after accept
    pub max_connections: usize,
    /// Window sizes and timers applied to every connection
    pub apci: ApciParameters,
    /// ASDU field widths
    pub params: AppLayerParameters,
}

impl ServerConfig {
    /// Create a configuration listening on `bind_address`.
    pub fn new(bind_address: impl Into<String>) -> Self {
        Self {
            bind_address: bind_address.into(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            apci: ApciParameters::default(),
            params: AppLayerParameters::iec104(),
        }
    }

    /// Set the connection limit.
    pub fn max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Replace the APCI parameters.
    pub fn apci_parameters(mut self, apci: ApciParameters) -> Self {
        self.apci = apci;
        self
    }

    /// Replace the application layer parameters.
    pub fn app_parameters(mut self, params: AppLayerParameters) -> Self {
        self.params = params;
        self
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::new(format!("0.0.0.0:{}", DEFAULT_PORT))
    }
}

/// Events emitted by the server.
#[derive(Debug, Clone, PartialEq)]
pub enum ServerEvent {
    /// A client connected
    Accepted {
        /// Connection id, unique for the lifetime of the server
        id: u64,
        /// Remote address
        peer: SocketAddr,
    },
    /// A client was turned away because the connection limit was reached
    Rejected {
        /// Remote address
        peer: SocketAddr,
    },
    /// Event of one connection; [`ConnectionEvent::Lost`] is its last
    Connection {
        /// Connection id
        id: u64,
        /// The event
        event: ConnectionEvent,
    },
}

#[derive(Debug)]
struct Entry {
    peer: SocketAddr,
    handle: Iec104Connection,
}

type Registry = Arc<Mutex<HashMap<u64, Entry>>>;

/// IEC 60870-5-104 server.
///
/// # Example
///
/// ```rust,ignore
/// let mut server = Iec104Server::bind(ServerConfig::new("0.0.0.0:2404")).await?;
/// let mut events = server.subscribe().unwrap();
/// let server = Arc::new(server);
/// tokio::spawn({
///     let server = server.clone();
///     async move { server.run().await }
/// });
///
/// while let Some(event) = events.recv().await {
///     println!("Event: {:?}", event);
/// }
/// ```
#[derive(Debug)]
pub struct Iec104Server {
    config: ServerConfig,
    listener: TcpListener,
    connections: Registry,
    next_id: AtomicU64,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
    event_rx: Option<mpsc::UnboundedReceiver<ServerEvent>>,
    shutdown_tx: watch::Sender<bool>,
}

impl Iec104Server {
    /// Bind the listening socket.
    pub async fn bind(config: ServerConfig) -> Result<Self> {
        config.apci.validate()?;
        if config.max_connections == 0 {
            return Err(Iec60870Error::config("max_connections must be at least 1"));
        }

        let listener = TcpListener::bind(&config.bind_address).await?;
        info!(address = %config.bind_address, "IEC 104 server listening");

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let (shutdown_tx, _) = watch::channel(false);
        Ok(Self {
            config,
            listener,
            connections: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
            event_tx,
            event_rx: Some(event_rx),
            shutdown_tx,
        })
    }

    /// Address the server is listening on.
    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }

    /// Subscribe to events.
    ///
    /// This can only be called once. Returns None if already subscribed.
    pub fn subscribe(&mut self) -> Option<mpsc::UnboundedReceiver<ServerEvent>> {
        self.event_rx.take()
    }

    /// Accept connections until [`shutdown`](Self::shutdown) is called.
    pub async fn run(&self) -> Result<()> {
        let mut shutdown = self.shutdown_tx.subscribe();
        if *shutdown.borrow() {
            return Ok(());
        }

        loop {
            tokio::select! {
                accepted = self.listener.accept() => match accepted {
                    Ok((stream, peer)) => self.on_accept(stream, peer),
                    Err(e) => error!(error = %e, "failed to accept connection"),
                },
                _ = shutdown.changed() => break,
            }
        }

        info!("IEC 104 server stopped accepting connections");
        Ok(())
    }

    fn on_accept(&self, stream: TcpStream, peer: SocketAddr) {
        if self.connection_count() >= self.config.max_connections {
            warn!(%peer, max = self.config.max_connections, "connection limit reached, rejecting");
            drop(stream);
            let _ = self.event_tx.send(ServerEvent::Rejected { peer });
            return;
        }

        if let Err(e) = stream.set_nodelay(true) {
            debug!(%peer, error = %e, "set_nodelay failed");
        }

        let (handle, events) =
            match Iec104Connection::spawn(stream, Role::Server, self.config.apci, self.config.params) {
                Ok(spawned) => spawned,
                Err(e) => {
                    error!(%peer, error = %e, "failed to start connection");
                    return;
                }
            };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        info!(id, %peer, "accepted IEC 104 connection");
        self.connections.lock().insert(id, Entry { peer, handle });
        let _ = self.event_tx.send(ServerEvent::Accepted { id, peer });

        tokio::spawn(forward_events(
            id,
            events,
            self.connections.clone(),
            self.event_tx.clone(),
        ));
    }

    /// Number of open connections.
    pub fn connection_count(&self) -> usize {
        self.connections.lock().len()
    }

    /// Handle of connection `id`.
    pub fn connection(&self, id: u64) -> Option<Iec104Connection> {
        self.connections.lock().get(&id).map(|entry| entry.handle.clone())
    }

    /// Remote address of connection `id`.
    pub fn peer_addr(&self, id: u64) -> Option<SocketAddr> {
        self.connections.lock().get(&id).map(|entry| entry.peer)
    }

    /// Send an ASDU to every connection with active data transfer.
    ///
    /// Returns how many connections accepted it. A connection whose k
    /// window is full is skipped.
    pub async fn broadcast(&self, asdu: &Asdu) -> usize {
        let targets: Vec<(u64, Iec104Connection)> = self
            .connections
            .lock()
            .iter()
            .filter(|(_, entry)| entry.handle.is_active())
            .map(|(id, entry)| (*id, entry.handle.clone()))
            .collect();

        let mut delivered = 0;
        for (id, handle) in targets {
            match handle.send_asdu(asdu.clone()).await {
                Ok(()) => delivered += 1,
                Err(e) => debug!(id, error = %e, "broadcast skipped connection"),
            }
        }
        delivered
    }

    /// Stop accepting and close every connection.
    pub async fn shutdown(&self) {
        self.shutdown_tx.send_replace(true);
        let handles: Vec<Iec104Connection> = self
            .connections
            .lock()
            .drain()
            .map(|(_, entry)| entry.handle)
            .collect();
        for handle in handles {
            handle.close().await;
        }
    }
}

async fn forward_events(
    id: u64,
    mut events: mpsc::UnboundedReceiver<ConnectionEvent>,
    connections: Registry,
    event_tx: mpsc::UnboundedSender<ServerEvent>,
) {
    while let Some(event) = events.recv().await {
        if matches!(event, ConnectionEvent::Lost(_)) {
            connections.lock().remove(&id);
        }
        let _ = event_tx.send(ServerEvent::Connection { id, event });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_server_config() {
        let config = ServerConfig::new("127.0.0.1:0").max_connections(2);
        assert_eq!(config.max_connections, 2);
        assert_eq!(config.params, AppLayerParameters::iec104());
        assert_eq!(ServerConfig::default().bind_address, "0.0.0.0:2404");
    }

    #[tokio::test]
    async fn test_bind_and_shutdown() {
        let mut server = Iec104Server::bind(ServerConfig::new("127.0.0.1:0")).await.unwrap();
        assert!(server.local_addr().unwrap().port() > 0);
        assert!(server.subscribe().is_some());
        assert!(server.subscribe().is_none());

        server.shutdown().await;
        // Returns immediately once shut down
        server.run().await.unwrap();
        assert_eq!(server.connection_count(), 0);
    }

    #[tokio::test]
    async fn test_zero_connection_limit_rejected() {
        let config = ServerConfig::new("127.0.0.1:0").max_connections(0);
        assert!(matches!(
            Iec104Server::bind(config).await,
            Err(Iec60870Error::Config(_))
        ));
    }
}
