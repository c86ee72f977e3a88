//! Serial port transport for IEC 101 (feature `serial`).

use std::time::Duration;

use tokio_serial::{DataBits, Parity, SerialStream, StopBits};
use tracing::{debug, info};

use crate::error::{Iec60870Error, Result};

/// Serial line settings.
///
/// IEC 60870-5-101 prescribes one start bit, eight data bits, even parity
/// and one stop bit, which is the default here.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SerialConfig {
    /// Device path, e.g. `/dev/ttyS0` or `COM1`
    pub port: String,
    /// Line speed
    pub baud_rate: u32,
    /// Data bits
    pub data_bits: DataBits,
    /// Parity
    pub parity: Parity,
    /// Stop bits
    pub stop_bits: StopBits,
    /// Driver level read/write timeout
    pub timeout: Duration,
}

impl SerialConfig {
    /// Standard 8E1 settings at `baud_rate`.
    pub fn new(port: impl Into<String>, baud_rate: u32) -> Self {
        Self {
            port: port.into(),
            baud_rate,
            data_bits: DataBits::Eight,
            parity: Parity::Even,
            stop_bits: StopBits::One,
            timeout: Duration::from_millis(100),
        }
    }

    /// Set parity.
    pub fn parity(mut self, parity: Parity) -> Self {
        self.parity = parity;
        self
    }

    /// Set stop bits.
    pub fn stop_bits(mut self, stop_bits: StopBits) -> Self {
        self.stop_bits = stop_bits;
        self
    }
}

/// Open the serial port for use with [`Iec101Master::open`] or
/// [`Iec101Slave::spawn`].
///
/// [`Iec101Master::open`]: super::Iec101Master::open
/// [`Iec101Slave::spawn`]: super::Iec101Slave::spawn
pub fn open_serial_port(config: &SerialConfig) -> Result<SerialStream> {
    if config.baud_rate == 0 {
        return Err(Iec60870Error::config("baud rate must be non-zero"));
    }

    debug!(port = %config.port, baud = config.baud_rate, "opening serial port");
    let builder = tokio_serial::new(&config.port, config.baud_rate)
        .data_bits(config.data_bits)
        .parity(config.parity)
        .stop_bits(config.stop_bits)
        .timeout(config.timeout);

    let port = SerialStream::open(&builder).map_err(|e| {
        Iec60870Error::Connection(format!("failed to open serial port {}: {}", config.port, e))
    })?;
    info!(port = %config.port, baud = config.baud_rate, "serial port opened");
    Ok(port)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_line_settings() {
        let config = SerialConfig::new("/dev/ttyS0", 9600);
        assert_eq!(config.data_bits, DataBits::Eight);
        assert_eq!(config.parity, Parity::Even);
        assert_eq!(config.stop_bits, StopBits::One);
    }

    #[test]
    fn test_open_missing_port() {
        let config = SerialConfig::new("/dev/does-not-exist-iec101", 9600);
        assert!(matches!(
            open_serial_port(&config),
            Err(Iec60870Error::Connection(_))
        ));
        assert!(matches!(
            open_serial_port(&SerialConfig::new("/dev/ttyS0", 0)),
            Err(Iec60870Error::Config(_))
        ));
    }
}
