//! IEC 60870-5 application layer types.
//!
//! This module contains the types shared by both bindings:
//!
//! - `TypeId` - Type identification (M_SP_NA_1, etc.) and row layouts
//! - `Cot` - Cause of transmission
//! - `Asdu` - Application Service Data Unit
//! - `InformationObject` - Address plus element rows
//! - `InformationElement` - Typed information elements (SIQ, NVA, CP56Time2a, ...)

mod asdu;
mod command;
mod cot;
mod element;
mod measured;
mod object;
mod protection;
mod quality;
mod time;
mod type_id;

pub use asdu::*;
pub use command::*;
pub use cot::*;
pub use element::*;
pub use measured::*;
pub use object::*;
pub use protection::*;
pub use quality::*;
pub use time::*;
pub use type_id::*;
