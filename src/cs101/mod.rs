//! IEC 60870-5-101: ASDUs over FT1.2 serial links.
//!
//! - `frame` - FT1.2 frames and link control fields
//! - `codec` - tokio-util codec for FT1.2
//! - `master` - unbalanced primary station
//! - `slave` - unbalanced secondary station
//! - `serial` - serial port transport (feature `serial`)
//!
//! ## Frame Formats
//!
//! ```text
//! Fixed:     10h | C | A | CS | 16h
//! Variable:  68h | L | L | 68h | C | A | ASDU | CS | 16h
//! Single:    E5h (ACK) or A2h (NACK)
//! ```
//!
//! The link address field is 0, 1 or 2 bytes wide. CS is the modulo-256
//! sum of C, A and ASDU.

mod codec;
mod frame;
mod master;
#[cfg(feature = "serial")]
mod serial;
mod slave;

pub use codec::{Ft12Codec, MAX_FRAME_LENGTH};
pub use frame::{
    checksum, ControlField, LinkFrame, PrimaryFunction, SecondaryFunction, END_BYTE, FIXED_START,
    SINGLE_ACK, SINGLE_NACK, VARIABLE_START,
};
pub use master::{Iec101Master, LinkState};
#[cfg(feature = "serial")]
#[cfg_attr(docsrs, doc(cfg(feature = "serial")))]
pub use serial::{open_serial_port, SerialConfig};
pub use slave::{DataClass, Iec101Slave};
