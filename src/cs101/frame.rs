//! FT1.2 link frames (IEC 60870-5-1/-2).
//!
//! ```text
//! Fixed:     10h  C  A  CS  16h
//! Variable:  68h  L  L  68h  C  A  ASDU...  CS  16h
//! Single:    E5h (ACK)  A2h (NACK)
//! ```
//!
//! The address field is 0, 1 or 2 bytes wide (little-endian); the checksum
//! is the 8-bit wrapping sum of control, address and ASDU bytes.

use bytes::Bytes;

use crate::error::{Iec60870Error, Result};

/// Start byte of a fixed length frame.
pub const FIXED_START: u8 = 0x10;

/// Start byte of a variable length frame.
pub const VARIABLE_START: u8 = 0x68;

/// End byte of fixed and variable frames.
pub const END_BYTE: u8 = 0x16;

/// Single character acknowledgment.
pub const SINGLE_ACK: u8 = 0xE5;

/// Single character negative acknowledgment.
pub const SINGLE_NACK: u8 = 0xA2;

const PRM: u8 = 0x40;
const FCB_ACD: u8 = 0x20;
const FCV_DFC: u8 = 0x10;

/// 8-bit wrapping sum.
#[inline]
pub fn checksum(data: &[u8]) -> u8 {
    data.iter().fold(0u8, |sum, byte| sum.wrapping_add(*byte))
}

/// Function codes of frames sent by the primary station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum PrimaryFunction {
    /// Reset of remote link
    ResetRemoteLink = 0,
    /// Reset of user process
    ResetUserProcess = 1,
    /// Test function for link
    TestFunctionLink = 2,
    /// User data, confirmation expected
    UserDataConfirmed = 3,
    /// User data, no reply expected
    UserDataNoReply = 4,
    /// Request for access demand
    RequestAccessDemand = 8,
    /// Request status of link
    RequestLinkStatus = 9,
    /// Request user data class 1
    RequestClass1 = 10,
    /// Request user data class 2
    RequestClass2 = 11,
}

impl PrimaryFunction {
    /// Parse from the low nibble of a control byte.
    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::ResetRemoteLink),
            1 => Ok(Self::ResetUserProcess),
            2 => Ok(Self::TestFunctionLink),
            3 => Ok(Self::UserDataConfirmed),
            4 => Ok(Self::UserDataNoReply),
            8 => Ok(Self::RequestAccessDemand),
            9 => Ok(Self::RequestLinkStatus),
            10 => Ok(Self::RequestClass1),
            11 => Ok(Self::RequestClass2),
            _ => Err(Iec60870Error::framing(format!(
                "unknown primary function {}",
                code
            ))),
        }
    }

    /// Function code.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }

    /// Whether frames with this function use the frame count bit (FCV = 1).
    #[inline]
    pub const fn frame_count_valid(&self) -> bool {
        matches!(
            self,
            Self::TestFunctionLink
                | Self::UserDataConfirmed
                | Self::RequestClass1
                | Self::RequestClass2
        )
    }
}

/// Function codes of frames sent by a secondary station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum SecondaryFunction {
    /// Positive acknowledgment
    Ack = 0,
    /// Message not accepted, link busy
    Nack = 1,
    /// User data
    RespUserData = 8,
    /// Requested data not available
    RespNackNoData = 9,
    /// Status of link or access demand
    StatusOfLink = 11,
    /// Link service not functioning
    LinkNotFunctioning = 14,
    /// Link service not implemented
    LinkNotImplemented = 15,
}

impl SecondaryFunction {
    /// Parse from the low nibble of a control byte.
    pub fn from_u8(code: u8) -> Result<Self> {
        match code {
            0 => Ok(Self::Ack),
            1 => Ok(Self::Nack),
            8 => Ok(Self::RespUserData),
            9 => Ok(Self::RespNackNoData),
            11 => Ok(Self::StatusOfLink),
            14 => Ok(Self::LinkNotFunctioning),
            15 => Ok(Self::LinkNotImplemented),
            _ => Err(Iec60870Error::framing(format!(
                "unknown secondary function {}",
                code
            ))),
        }
    }

    /// Function code.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        *self as u8
    }
}

/// Link control field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControlField {
    /// Frame from the primary station (PRM = 1)
    Primary {
        /// Function code
        function: PrimaryFunction,
        /// Frame count bit
        fcb: bool,
        /// Frame count bit valid
        fcv: bool,
    },
    /// Frame from a secondary station (PRM = 0)
    Secondary {
        /// Function code
        function: SecondaryFunction,
        /// Access demand: class 1 data available
        acd: bool,
        /// Data flow control: further messages may overflow
        dfc: bool,
    },
}

impl ControlField {
    /// Primary control field; FCV follows the function and FCB is only
    /// carried when FCV is set.
    pub fn primary(function: PrimaryFunction, fcb: bool) -> Self {
        let fcv = function.frame_count_valid();
        Self::Primary {
            function,
            fcb: fcb && fcv,
            fcv,
        }
    }

    /// Secondary control field with DFC clear.
    pub fn secondary(function: SecondaryFunction, acd: bool) -> Self {
        Self::Secondary {
            function,
            acd,
            dfc: false,
        }
    }

    /// Parse a control byte.
    pub fn from_u8(byte: u8) -> Result<Self> {
        let code = byte & 0x0F;
        if byte & PRM != 0 {
            Ok(Self::Primary {
                function: PrimaryFunction::from_u8(code)?,
                fcb: byte & FCB_ACD != 0,
                fcv: byte & FCV_DFC != 0,
            })
        } else {
            Ok(Self::Secondary {
                function: SecondaryFunction::from_u8(code)?,
                acd: byte & FCB_ACD != 0,
                dfc: byte & FCV_DFC != 0,
            })
        }
    }

    /// Encode to a control byte.
    pub fn as_u8(&self) -> u8 {
        let flag = |set: bool, mask: u8| if set { mask } else { 0 };
        match *self {
            Self::Primary { function, fcb, fcv } => {
                PRM | flag(fcb, FCB_ACD) | flag(fcv, FCV_DFC) | function.as_u8()
            }
            Self::Secondary { function, acd, dfc } => {
                flag(acd, FCB_ACD) | flag(dfc, FCV_DFC) | function.as_u8()
            }
        }
    }

    /// Whether the frame comes from the primary station.
    #[inline]
    pub fn is_primary(&self) -> bool {
        matches!(self, Self::Primary { .. })
    }

    /// ACD bit of a secondary frame.
    #[inline]
    pub fn acd(&self) -> bool {
        matches!(self, Self::Secondary { acd: true, .. })
    }
}

impl std::fmt::Display for ControlField {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary { function, fcb, fcv } => {
                write!(f, "PRM {:?}", function)?;
                if *fcv {
                    write!(f, " FCB={}", u8::from(*fcb))?;
                }
                Ok(())
            }
            Self::Secondary { function, acd, dfc } => {
                write!(f, "SEC {:?}", function)?;
                if *acd {
                    f.write_str(" ACD")?;
                }
                if *dfc {
                    f.write_str(" DFC")?;
                }
                Ok(())
            }
        }
    }
}

/// One FT1.2 frame.
///
/// Variable frames carry the ASDU as raw bytes; decoding it needs the
/// connection's application layer parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LinkFrame {
    /// Fixed length frame
    Fixed {
        /// Control field
        control: ControlField,
        /// Link address
        address: u16,
    },
    /// Variable length frame
    Variable {
        /// Control field
        control: ControlField,
        /// Link address
        address: u16,
        /// Encoded ASDU
        asdu: Bytes,
    },
    /// Single character E5h
    SingleAck,
    /// Single character A2h
    SingleNack,
}

impl LinkFrame {
    /// Fixed frame from the primary station.
    pub fn primary(function: PrimaryFunction, fcb: bool, address: u16) -> Self {
        Self::Fixed {
            control: ControlField::primary(function, fcb),
            address,
        }
    }

    /// Fixed frame from a secondary station.
    pub fn secondary(function: SecondaryFunction, acd: bool, address: u16) -> Self {
        Self::Fixed {
            control: ControlField::secondary(function, acd),
            address,
        }
    }

    /// Variable frame.
    pub fn user_data(control: ControlField, address: u16, asdu: Bytes) -> Self {
        Self::Variable {
            control,
            address,
            asdu,
        }
    }

    /// Control field, if the frame has one.
    pub fn control(&self) -> Option<ControlField> {
        match self {
            Self::Fixed { control, .. } | Self::Variable { control, .. } => Some(*control),
            _ => None,
        }
    }

    /// Link address, if the frame has one.
    pub fn address(&self) -> Option<u16> {
        match self {
            Self::Fixed { address, .. } | Self::Variable { address, .. } => Some(*address),
            _ => None,
        }
    }

    /// Whether this is a positive acknowledgment (E5h or secondary ACK).
    pub fn is_ack(&self) -> bool {
        match self {
            Self::SingleAck => true,
            Self::Fixed {
                control: ControlField::Secondary { function, .. },
                ..
            } => *function == SecondaryFunction::Ack,
            _ => false,
        }
    }

    /// Whether this is a negative acknowledgment (A2h or secondary NACK).
    pub fn is_nack(&self) -> bool {
        match self {
            Self::SingleNack => true,
            Self::Fixed {
                control: ControlField::Secondary { function, .. },
                ..
            } => *function == SecondaryFunction::Nack,
            _ => false,
        }
    }
}

impl std::fmt::Display for LinkFrame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed { control, address } => write!(f, "FIXED [{}] A={}", control, address),
            Self::Variable {
                control,
                address,
                asdu,
            } => write!(f, "VAR [{}] A={} len={}", control, address, asdu.len()),
            Self::SingleAck => f.write_str("ACK(E5)"),
            Self::SingleNack => f.write_str("NACK(A2)"),
        }
    }
}
