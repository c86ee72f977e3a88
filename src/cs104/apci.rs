//! APCI (Application Protocol Control Information).
//!
//! APCI is the 6-byte header of an APDU, containing frame type and sequence numbers.

use crate::error::{Iec60870Error, Result};

/// Start byte for IEC 104 frames.
pub const START_BYTE: u8 = 0x68;

/// Minimum value of the length octet (control field only).
pub const MIN_APDU_LENGTH: usize = 4;

/// Maximum value of the length octet.
pub const MAX_APDU_LENGTH: usize = 253;

/// Largest ASDU an I-frame can carry.
pub const MAX_ASDU_LENGTH: usize = MAX_APDU_LENGTH - MIN_APDU_LENGTH;

/// APCI frame type.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameType {
    /// I-frame: Information transfer
    IFrame,
    /// S-frame: Supervisory (acknowledgment)
    SFrame,
    /// U-frame: Unnumbered (control)
    UFrame,
}

/// U-frame function codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UFunction {
    /// STARTDT act (Start Data Transfer activation)
    StartDtAct,
    /// STARTDT con (Start Data Transfer confirmation)
    StartDtCon,
    /// STOPDT act (Stop Data Transfer activation)
    StopDtAct,
    /// STOPDT con (Stop Data Transfer confirmation)
    StopDtCon,
    /// TESTFR act (Test Frame activation)
    TestFrAct,
    /// TESTFR con (Test Frame confirmation)
    TestFrCon,
}

impl UFunction {
    /// Get the control field byte for this U-function.
    #[inline]
    pub const fn control_byte(&self) -> u8 {
        match self {
            Self::StartDtAct => 0x07,
            Self::StartDtCon => 0x0B,
            Self::StopDtAct => 0x13,
            Self::StopDtCon => 0x23,
            Self::TestFrAct => 0x43,
            Self::TestFrCon => 0x83,
        }
    }

    /// Parse U-function from control byte.
    pub fn from_control_byte(byte: u8) -> Result<Self> {
        match byte {
            0x07 => Ok(Self::StartDtAct),
            0x0B => Ok(Self::StartDtCon),
            0x13 => Ok(Self::StopDtAct),
            0x23 => Ok(Self::StopDtCon),
            0x43 => Ok(Self::TestFrAct),
            0x83 => Ok(Self::TestFrCon),
            _ => Err(Iec60870Error::framing(format!(
                "unknown U-frame function 0x{:02X}",
                byte
            ))),
        }
    }

    /// The confirmation answering this activation, if any.
    #[inline]
    pub const fn confirmation(&self) -> Option<Self> {
        match self {
            Self::StartDtAct => Some(Self::StartDtCon),
            Self::StopDtAct => Some(Self::StopDtCon),
            Self::TestFrAct => Some(Self::TestFrCon),
            _ => None,
        }
    }
}

impl std::fmt::Display for UFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::StartDtAct => "STARTDT act",
            Self::StartDtCon => "STARTDT con",
            Self::StopDtAct => "STOPDT act",
            Self::StopDtCon => "STOPDT con",
            Self::TestFrAct => "TESTFR act",
            Self::TestFrCon => "TESTFR con",
        })
    }
}

/// APCI (Application Protocol Control Information).
///
/// The 6-byte header of an IEC 104 APDU.
///
/// ```text
/// +--------+--------+--------+--------+--------+--------+
/// | 0x68   | Length | CF1    | CF2    | CF3    | CF4    |
/// +--------+--------+--------+--------+--------+--------+
///   Start    APDU     Control Field (4 bytes)
///   Byte     Length
/// ```
///
/// Sequence numbers are 15-bit values; encoding masks them to 0..=32767.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Apci {
    /// I-frame with send and receive sequence numbers.
    IFrame {
        /// Send sequence number (0-32767)
        send_seq: u16,
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// S-frame with receive sequence number only.
    SFrame {
        /// Receive sequence number (0-32767)
        recv_seq: u16,
    },
    /// U-frame with function code.
    UFrame {
        /// U-frame function
        function: UFunction,
    },
}

#[inline]
fn seq_to_bytes(seq: u16) -> [u8; 2] {
    ((seq & 0x7FFF) << 1).to_le_bytes()
}

#[inline]
fn seq_from_bytes(low: u8, high: u8) -> u16 {
    u16::from_le_bytes([low, high]) >> 1
}

impl Apci {
    /// Create a new I-frame APCI.
    #[inline]
    pub fn i_frame(send_seq: u16, recv_seq: u16) -> Self {
        Self::IFrame { send_seq, recv_seq }
    }

    /// Create a new S-frame APCI.
    #[inline]
    pub fn s_frame(recv_seq: u16) -> Self {
        Self::SFrame { recv_seq }
    }

    /// Create a new U-frame APCI.
    #[inline]
    pub fn u_frame(function: UFunction) -> Self {
        Self::UFrame { function }
    }

    /// Get the frame type.
    #[inline]
    pub fn frame_type(&self) -> FrameType {
        match self {
            Self::IFrame { .. } => FrameType::IFrame,
            Self::SFrame { .. } => FrameType::SFrame,
            Self::UFrame { .. } => FrameType::UFrame,
        }
    }

    /// Parse the 4-byte control field.
    ///
    /// S- and U-frames must use the exact bit patterns of the standard; any
    /// other pattern is a framing error.
    pub fn parse(control: &[u8]) -> Result<Self> {
        if control.len() < 4 {
            return Err(Iec60870Error::framing("control field too short"));
        }
        let cf1 = control[0];

        if cf1 & 0x01 == 0 {
            Ok(Self::IFrame {
                send_seq: seq_from_bytes(control[0], control[1]),
                recv_seq: seq_from_bytes(control[2], control[3]),
            })
        } else if cf1 == 0x01 && control[1] == 0 {
            Ok(Self::SFrame {
                recv_seq: seq_from_bytes(control[2], control[3]),
            })
        } else if cf1 & 0x03 == 0x03 && control[1..4] == [0, 0, 0] {
            Ok(Self::UFrame {
                function: UFunction::from_control_byte(cf1)?,
            })
        } else {
            Err(Iec60870Error::framing(format!(
                "invalid control field {:02X} {:02X} {:02X} {:02X}",
                control[0], control[1], control[2], control[3]
            )))
        }
    }

    /// Encode APCI to 4 bytes of control field.
    #[inline]
    pub fn encode(&self) -> [u8; 4] {
        match self {
            Self::IFrame { send_seq, recv_seq } => {
                let s = seq_to_bytes(*send_seq);
                let r = seq_to_bytes(*recv_seq);
                [s[0], s[1], r[0], r[1]]
            }
            Self::SFrame { recv_seq } => {
                let r = seq_to_bytes(*recv_seq);
                [0x01, 0x00, r[0], r[1]]
            }
            Self::UFrame { function } => [function.control_byte(), 0x00, 0x00, 0x00],
        }
    }

    /// Encode full APDU header (6 bytes: start + length + control).
    ///
    /// `asdu_len` is the length of the ASDU that follows (0 for S-frame and
    /// U-frame) and must not exceed [`MAX_ASDU_LENGTH`].
    #[inline]
    pub fn encode_header(&self, asdu_len: usize) -> [u8; 6] {
        let control = self.encode();
        let apdu_len = (MIN_APDU_LENGTH + asdu_len) as u8;
        [
            START_BYTE, apdu_len, control[0], control[1], control[2], control[3],
        ]
    }

    /// Check if this is an I-frame.
    #[inline]
    pub fn is_i_frame(&self) -> bool {
        matches!(self, Self::IFrame { .. })
    }

    /// Get the receive sequence number (I-frame and S-frame).
    #[inline]
    pub fn recv_seq(&self) -> Option<u16> {
        match self {
            Self::IFrame { recv_seq, .. } | Self::SFrame { recv_seq } => Some(*recv_seq),
            _ => None,
        }
    }
}

impl std::fmt::Display for Apci {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::IFrame { send_seq, recv_seq } => write!(f, "I(S={}, R={})", send_seq, recv_seq),
            Self::SFrame { recv_seq } => write!(f, "S(R={})", recv_seq),
            Self::UFrame { function } => write!(f, "U({})", function),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_u_frame_codes() {
        let cases = [
            (UFunction::StartDtAct, 0x07),
            (UFunction::StartDtCon, 0x0B),
            (UFunction::StopDtAct, 0x13),
            (UFunction::StopDtCon, 0x23),
            (UFunction::TestFrAct, 0x43),
            (UFunction::TestFrCon, 0x83),
        ];
        for (function, byte) in cases {
            assert_eq!(function.control_byte(), byte);
            assert_eq!(UFunction::from_control_byte(byte).unwrap(), function);
            assert_eq!(Apci::u_frame(function).encode(), [byte, 0, 0, 0]);
        }
        assert!(UFunction::from_control_byte(0x03).is_err());
    }

    #[test]
    fn test_confirmation_pairs() {
        assert_eq!(UFunction::StartDtAct.confirmation(), Some(UFunction::StartDtCon));
        assert_eq!(UFunction::TestFrAct.confirmation(), Some(UFunction::TestFrCon));
        assert_eq!(UFunction::StopDtCon.confirmation(), None);
    }

    #[test]
    fn test_i_frame_encoding() {
        let apci = Apci::i_frame(1, 2);
        assert_eq!(apci.encode(), [0x02, 0x00, 0x04, 0x00]);

        // Sequence numbers spanning both octets
        let apci = Apci::i_frame(0x1234, 32767);
        let bytes = apci.encode();
        assert_eq!(Apci::parse(&bytes).unwrap(), apci);
    }

    #[test]
    fn test_sequence_masked_to_15_bits() {
        let bytes = Apci::i_frame(32768, 32769).encode();
        assert_eq!(Apci::parse(&bytes).unwrap(), Apci::i_frame(0, 1));
    }

    #[test]
    fn test_s_frame() {
        let apci = Apci::s_frame(100);
        let bytes = apci.encode();
        assert_eq!(bytes, [0x01, 0x00, 0xC8, 0x00]);
        assert_eq!(Apci::parse(&bytes).unwrap(), apci);
        assert_eq!(apci.recv_seq(), Some(100));
    }

    #[test]
    fn test_invalid_control_fields() {
        // S-frame with garbage in CF1 upper bits
        assert!(Apci::parse(&[0x05, 0x00, 0x00, 0x00]).is_err());
        // U-frame with two functions set
        assert!(Apci::parse(&[0x0F, 0x00, 0x00, 0x00]).is_err());
        // U-frame with trailing control bytes
        assert!(Apci::parse(&[0x07, 0x00, 0x01, 0x00]).is_err());
        assert!(matches!(
            Apci::parse(&[0x07, 0x00]),
            Err(Iec60870Error::Framing(_))
        ));
    }

    #[test]
    fn test_encode_header() {
        let header = Apci::i_frame(0, 0).encode_header(10);
        assert_eq!(header[0], START_BYTE);
        assert_eq!(header[1], 14);
        let header = Apci::u_frame(UFunction::TestFrAct).encode_header(0);
        assert_eq!(header, [0x68, 0x04, 0x43, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_display() {
        assert_eq!(Apci::i_frame(10, 5).to_string(), "I(S=10, R=5)");
        assert_eq!(Apci::s_frame(3).to_string(), "S(R=3)");
        assert_eq!(Apci::u_frame(UFunction::StartDtAct).to_string(), "U(STARTDT act)");
    }
}
