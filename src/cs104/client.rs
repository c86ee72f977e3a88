//! IEC 60870-5-104 client implementation.
//!
//! This module provides an asynchronous client for connecting to IEC 104 servers.

use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio::time::timeout;
use tracing::{debug, info};

use super::connection::{ConnectionState, Iec104Connection, Role};
use crate::config::{ApciParameters, AppLayerParameters};
use crate::connection::ConnectionEvent;
use crate::error::{Iec60870Error, Result};
use crate::types::{
    Asdu, CounterQualifier, Cp56Time2a, DoubleCommand, DoubleCommandState, InterrogationQualifier,
    SetpointQualifier, ShortFloat, SingleCommand, TypeId,
};

/// Default IEC 104 port.
pub const DEFAULT_PORT: u16 = 2404;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (host:port)
    pub address: String,
    /// Window sizes and timers; T0 bounds the TCP connect
    pub apci: ApciParameters,
    /// ASDU field widths
    pub params: AppLayerParameters,
}

impl ClientConfig {
    /// Create a new configuration with the given address.
    pub fn new(address: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            apci: ApciParameters::default(),
            params: AppLayerParameters::iec104(),
        }
    }

    /// Set connection timeout (T0).
    pub fn connect_timeout(mut self, timeout: Duration) -> Self {
        self.apci.t0 = timeout;
        self
    }

    /// Set T1 timeout.
    pub fn t1_timeout(mut self, timeout: Duration) -> Self {
        self.apci.t1 = timeout;
        self
    }

    /// Set T2 timeout.
    pub fn t2_timeout(mut self, timeout: Duration) -> Self {
        self.apci.t2 = timeout;
        self
    }

    /// Set T3 timeout.
    pub fn t3_timeout(mut self, timeout: Duration) -> Self {
        self.apci.t3 = timeout;
        self
    }

    /// Set K.
    pub fn k(mut self, k: u16) -> Self {
        self.apci.k = k;
        self
    }

    /// Set W.
    pub fn w(mut self, w: u16) -> Self {
        self.apci.w = w;
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

/// IEC 60870-5-104 client.
///
/// Each call to [`connect`](Self::connect) opens a fresh connection with
/// sequence numbers starting at 0; the previous one, if any, must be closed.
///
/// # Example
///
/// ```rust,ignore
/// let mut client = Iec104Client::new(ClientConfig::new("192.168.1.100:2404"));
/// let mut events = client.connect().await?;
/// client.start_dt().await?;
/// client.general_interrogation(1).await?;
///
/// while let Some(event) = events.recv().await {
///     println!("Event: {:?}", event);
/// }
/// ```
#[derive(Debug)]
pub struct Iec104Client {
    config: ClientConfig,
    connection: Option<Iec104Connection>,
}

impl Iec104Client {
    /// Create a new IEC 104 client.
    pub fn new(config: ClientConfig) -> Self {
        Self {
            config,
            connection: None,
        }
    }

    /// Client configuration.
    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Get the current connection state.
    pub fn state(&self) -> ConnectionState {
        self.connection
            .as_ref()
            .map(Iec104Connection::state)
            .unwrap_or(ConnectionState::Disconnected)
    }

    /// Handle of the current connection.
    pub fn connection(&self) -> Option<&Iec104Connection> {
        self.connection.as_ref()
    }

    /// Connect to the server within T0.
    ///
    /// Returns the event receiver of the new connection.
    pub async fn connect(&mut self) -> Result<mpsc::UnboundedReceiver<ConnectionEvent>> {
        if self.state() != ConnectionState::Disconnected {
            return Err(Iec60870Error::Connection("already connected".into()));
        }
        self.config.apci.validate()?;

        let stream = timeout(self.config.apci.t0, TcpStream::connect(&self.config.address))
            .await
            .map_err(|_| Iec60870Error::ConnectionTimeout)??;

        // Disable Nagle's algorithm for low latency
        if let Err(e) = stream.set_nodelay(true) {
            debug!(error = %e, "set_nodelay failed");
        }

        info!(address = %self.config.address, "connected to IEC 104 server");
        let (connection, events) =
            Iec104Connection::spawn(stream, Role::Client, self.config.apci, self.config.params)?;
        self.connection = Some(connection);
        Ok(events)
    }

    /// Disconnect from the server.
    ///
    /// Data transfer is stopped first when active.
    pub async fn disconnect(&mut self) -> Result<()> {
        if let Some(connection) = self.connection.take() {
            if connection.is_active() {
                if let Err(e) = connection.stop_dt().await {
                    debug!(error = %e, "STOPDT before disconnect failed");
                }
            }
            connection.close().await;
        }
        Ok(())
    }

    /// Start data transfer (STARTDT act).
    pub async fn start_dt(&self) -> Result<()> {
        self.active_connection()?.start_dt().await
    }

    /// Stop data transfer (STOPDT act).
    pub async fn stop_dt(&self) -> Result<()> {
        self.active_connection()?.stop_dt().await
    }

    /// Send an arbitrary ASDU.
    pub async fn send_asdu(&self, asdu: Asdu) -> Result<()> {
        self.active_connection()?.send_asdu(asdu).await
    }

    /// Send general interrogation command.
    pub async fn general_interrogation(&self, common_address: u16) -> Result<()> {
        self.send_asdu(Asdu::interrogation_command(
            common_address,
            InterrogationQualifier::STATION,
        )?)
        .await
    }

    /// Send counter interrogation command.
    pub async fn counter_interrogation(&self, common_address: u16, qcc: CounterQualifier) -> Result<()> {
        self.send_asdu(Asdu::counter_interrogation_command(common_address, qcc)?)
            .await
    }

    /// Send clock synchronization command.
    pub async fn clock_sync(&self, common_address: u16, time: Cp56Time2a) -> Result<()> {
        self.send_asdu(Asdu::clock_sync_command(common_address, time)?)
            .await
    }

    /// Send read command.
    pub async fn read(&self, common_address: u16, ioa: u32) -> Result<()> {
        self.send_asdu(Asdu::read_command(common_address, ioa)?).await
    }

    /// Send single command.
    pub async fn single_command(
        &self,
        common_address: u16,
        ioa: u32,
        value: bool,
        select: bool,
    ) -> Result<()> {
        let sco = SingleCommand::new(value, select, 0)?;
        self.send_asdu(Asdu::command(
            TypeId::SingleCommand,
            common_address,
            ioa,
            vec![sco.into()],
        )?)
        .await
    }

    /// Send double command.
    pub async fn double_command(
        &self,
        common_address: u16,
        ioa: u32,
        state: DoubleCommandState,
        select: bool,
    ) -> Result<()> {
        let dco = DoubleCommand::new(state, select, 0)?;
        self.send_asdu(Asdu::command(
            TypeId::DoubleCommand,
            common_address,
            ioa,
            vec![dco.into()],
        )?)
        .await
    }

    /// Send setpoint command (short floating point).
    pub async fn setpoint_float(
        &self,
        common_address: u16,
        ioa: u32,
        value: f32,
        select: bool,
    ) -> Result<()> {
        let qos = SetpointQualifier::new(0, select)?;
        self.send_asdu(Asdu::command(
            TypeId::SetpointFloat,
            common_address,
            ioa,
            vec![ShortFloat::new(value).into(), qos.into()],
        )?)
        .await
    }

    fn active_connection(&self) -> Result<&Iec104Connection> {
        match &self.connection {
            Some(connection) if !connection.is_closed() => Ok(connection),
            _ => Err(Iec60870Error::NotConnected),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DEFAULT_T2_TIMEOUT;

    #[test]
    fn test_client_config() {
        let config = ClientConfig::new("192.168.1.100:2404")
            .connect_timeout(Duration::from_secs(5))
            .t1_timeout(Duration::from_secs(10))
            .k(3);

        assert_eq!(config.address, "192.168.1.100:2404");
        assert_eq!(config.apci.t0, Duration::from_secs(5));
        assert_eq!(config.apci.t1, Duration::from_secs(10));
        assert_eq!(config.apci.t2, Duration::from_secs(DEFAULT_T2_TIMEOUT));
        assert_eq!(config.apci.k, 3);
        assert_eq!(config.params, AppLayerParameters::iec104());
    }

    #[test]
    fn test_client_initial_state() {
        let config = ClientConfig::new("localhost:2404");
        let client = Iec104Client::new(config);

        assert_eq!(client.state(), ConnectionState::Disconnected);
        assert!(client.connection().is_none());
    }

    #[tokio::test]
    async fn test_commands_require_connection() {
        let client = Iec104Client::new(ClientConfig::new("localhost:2404"));
        assert!(matches!(
            client.general_interrogation(1).await,
            Err(Iec60870Error::NotConnected)
        ));
        assert!(matches!(client.start_dt().await, Err(Iec60870Error::NotConnected)));
    }

    #[tokio::test]
    async fn test_invalid_config_rejected_before_connect() {
        let mut client = Iec104Client::new(ClientConfig::new("127.0.0.1:1").w(0));
        assert!(matches!(client.connect().await, Err(Iec60870Error::Config(_))));
    }
}
