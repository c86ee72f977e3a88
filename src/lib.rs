//! # voltage_iec60870
//!
//! IEC 60870-5-101 and IEC 60870-5-104 protocol implementation for Rust.
//!
//! Both telecontrol companion standards share one application layer: the
//! ASDU with its type identifications, causes of transmission and
//! information elements. They differ in transport. IEC 104 carries ASDUs
//! over TCP inside APCI frames with sliding windows, IEC 101 over FT1.2
//! serial frames driven by a polling master.
//!
//! ## Features
//!
//! - **Event-driven**: every link runs as a tokio task and reports
//!   [`ConnectionEvent`]s over a channel
//! - **IEC 104 client and server** with k/w windows and T0-T3 timers
//! - **IEC 101 master and slave** with FCB handling, retries and class 1/2
//!   polling; serial ports behind the `serial` feature
//! - **Type Safe**: information elements validate their value ranges
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use voltage_iec60870::{ClientConfig, ConnectionEvent, Iec104Client};
//!
//! #[tokio::main]
//! async fn main() -> voltage_iec60870::Result<()> {
//!     let mut client = Iec104Client::new(ClientConfig::new("192.168.1.100:2404"));
//!
//!     // Connect and start data transfer
//!     let mut events = client.connect().await?;
//!     client.start_dt().await?;
//!
//!     // Request general interrogation
//!     client.general_interrogation(1).await?;
//!
//!     while let Some(event) = events.recv().await {
//!         if let ConnectionEvent::AsduReceived(asdu) = event {
//!             println!("{}", asdu);
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Layout
//!
//! - [`types`] - ASDU, type identifications, information elements
//! - [`cs104`] - APCI codec, windows, connection, client and server
//! - [`cs101`] - FT1.2 codec, master and slave
//! - [`config`] - application, APCI and link layer parameters

#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod config;
pub mod connection;
pub mod cs101;
pub mod cs104;
pub mod error;
pub mod types;

// Re-export main types
pub use config::{ApciParameters, AppLayerParameters, LinkLayerParameters};
pub use connection::{dispatch_events, Connection, ConnectionEvent, ConnectionListener};
pub use cs101::{DataClass, Ft12Codec, Iec101Master, Iec101Slave, LinkFrame, LinkState};
pub use cs104::{
    ClientConfig, ConnectionState, Iec104Client, Iec104Codec, Iec104Connection, Iec104Server,
    Role, ServerConfig, ServerEvent,
};
pub use error::{CloseReason, Iec60870Error, Result};
pub use types::*;
