//! IEC 60870-5-104: ASDUs over TCP.
//!
//! - `apci` - 6-byte APCI header and I/S/U control fields
//! - `codec` - tokio-util codec for APDUs
//! - `window` - 15-bit sequence arithmetic and the k/w windows
//! - `connection` - per-connection actor shared by both roles
//! - `client` / `server` - TCP front ends
//!
//! ## Protocol Overview
//!
//! IEC 60870-5-104 uses TCP/IP for communication (default port 2404).
//! The protocol defines three frame types:
//!
//! - **I-frame**: Information transfer (contains ASDU)
//! - **S-frame**: Supervisory (acknowledgment)
//! - **U-frame**: Unnumbered (control: STARTDT, STOPDT, TESTFR)

mod apci;
mod client;
mod codec;
mod connection;
mod server;
mod window;

pub use apci::{Apci, FrameType, UFunction, MAX_APDU_LENGTH, MAX_ASDU_LENGTH, START_BYTE};
pub use client::{ClientConfig, Iec104Client, DEFAULT_PORT};
pub use codec::{Apdu, Iec104Codec};
pub use connection::{ConnectionState, Iec104Connection, Role};
pub use server::{Iec104Server, ServerConfig, ServerEvent, DEFAULT_MAX_CONNECTIONS};
pub use window::{seq_distance, seq_next, ReceiveWindow, SendWindow};
