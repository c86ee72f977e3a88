//! Cause of transmission (COT).
//!
//! The cause of transmission defines the reason for sending an ASDU. It
//! occupies the low 6 bits of the first COT octet; bit 6 is the P/N flag and
//! bit 7 the test flag, both carried by [`AsduHeader`](super::AsduHeader).

use crate::error::{Iec60870Error, Result};

/// Cause of Transmission (COT).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum Cot {
    /// Periodic, cyclic (1)
    Periodic = 1,
    /// Background scan (2)
    Background = 2,
    /// Spontaneous (3)
    Spontaneous = 3,
    /// Initialized (4)
    Initialized = 4,
    /// Request or requested (5)
    Request = 5,
    /// Activation (6)
    Activation = 6,
    /// Activation confirmation (7)
    ActivationConfirm = 7,
    /// Deactivation (8)
    Deactivation = 8,
    /// Deactivation confirmation (9)
    DeactivationConfirm = 9,
    /// Activation termination (10)
    ActivationTermination = 10,
    /// Return information caused by a remote command (11)
    ReturnRemoteCommand = 11,
    /// Return information caused by a local command (12)
    ReturnLocalCommand = 12,
    /// File transfer (13)
    FileTransfer = 13,
    /// Interrogated by station interrogation (20)
    InterrogatedByStation = 20,
    /// Interrogated by group 1 interrogation (21)
    InterrogatedByGroup1 = 21,
    /// Interrogated by group 2 interrogation (22)
    InterrogatedByGroup2 = 22,
    /// Interrogated by group 3 interrogation (23)
    InterrogatedByGroup3 = 23,
    /// Interrogated by group 4 interrogation (24)
    InterrogatedByGroup4 = 24,
    /// Interrogated by group 5 interrogation (25)
    InterrogatedByGroup5 = 25,
    /// Interrogated by group 6 interrogation (26)
    InterrogatedByGroup6 = 26,
    /// Interrogated by group 7 interrogation (27)
    InterrogatedByGroup7 = 27,
    /// Interrogated by group 8 interrogation (28)
    InterrogatedByGroup8 = 28,
    /// Interrogated by group 9 interrogation (29)
    InterrogatedByGroup9 = 29,
    /// Interrogated by group 10 interrogation (30)
    InterrogatedByGroup10 = 30,
    /// Interrogated by group 11 interrogation (31)
    InterrogatedByGroup11 = 31,
    /// Interrogated by group 12 interrogation (32)
    InterrogatedByGroup12 = 32,
    /// Interrogated by group 13 interrogation (33)
    InterrogatedByGroup13 = 33,
    /// Interrogated by group 14 interrogation (34)
    InterrogatedByGroup14 = 34,
    /// Interrogated by group 15 interrogation (35)
    InterrogatedByGroup15 = 35,
    /// Interrogated by group 16 interrogation (36)
    InterrogatedByGroup16 = 36,
    /// Requested by general counter request (37)
    RequestedByGeneralCounter = 37,
    /// Requested by group 1 counter request (38)
    RequestedByGroup1Counter = 38,
    /// Requested by group 2 counter request (39)
    RequestedByGroup2Counter = 39,
    /// Requested by group 3 counter request (40)
    RequestedByGroup3Counter = 40,
    /// Requested by group 4 counter request (41)
    RequestedByGroup4Counter = 41,
    /// Unknown type identification (44)
    UnknownTypeId = 44,
    /// Unknown cause of transmission (45)
    UnknownCot = 45,
    /// Unknown common address of ASDU (46)
    UnknownCommonAddress = 46,
    /// Unknown information object address (47)
    UnknownIoa = 47,
}

const INTERROGATION_GROUPS: [Cot; 17] = [
    Cot::InterrogatedByStation,
    Cot::InterrogatedByGroup1,
    Cot::InterrogatedByGroup2,
    Cot::InterrogatedByGroup3,
    Cot::InterrogatedByGroup4,
    Cot::InterrogatedByGroup5,
    Cot::InterrogatedByGroup6,
    Cot::InterrogatedByGroup7,
    Cot::InterrogatedByGroup8,
    Cot::InterrogatedByGroup9,
    Cot::InterrogatedByGroup10,
    Cot::InterrogatedByGroup11,
    Cot::InterrogatedByGroup12,
    Cot::InterrogatedByGroup13,
    Cot::InterrogatedByGroup14,
    Cot::InterrogatedByGroup15,
    Cot::InterrogatedByGroup16,
];

const COUNTER_GROUPS: [Cot; 5] = [
    Cot::RequestedByGeneralCounter,
    Cot::RequestedByGroup1Counter,
    Cot::RequestedByGroup2Counter,
    Cot::RequestedByGroup3Counter,
    Cot::RequestedByGroup4Counter,
];

impl Cot {
    /// Create COT from the raw octet. Only the low 6 bits are inspected.
    pub fn from_u8(value: u8) -> Result<Self> {
        let code = value & 0x3F;
        let cot = match code {
            1 => Self::Periodic,
            2 => Self::Background,
            3 => Self::Spontaneous,
            4 => Self::Initialized,
            5 => Self::Request,
            6 => Self::Activation,
            7 => Self::ActivationConfirm,
            8 => Self::Deactivation,
            9 => Self::DeactivationConfirm,
            10 => Self::ActivationTermination,
            11 => Self::ReturnRemoteCommand,
            12 => Self::ReturnLocalCommand,
            13 => Self::FileTransfer,
            20..=36 => INTERROGATION_GROUPS[(code - 20) as usize],
            37..=41 => COUNTER_GROUPS[(code - 37) as usize],
            44 => Self::UnknownTypeId,
            45 => Self::UnknownCot,
            46 => Self::UnknownCommonAddress,
            47 => Self::UnknownIoa,
            _ => return Err(Iec60870Error::UnknownCot(code)),
        };
        Ok(cot)
    }

    /// Convert to raw 6-bit code.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// COT answering a station (0) or group (1..=16) interrogation.
    pub fn interrogated_by_group(group: u8) -> Result<Self> {
        INTERROGATION_GROUPS
            .get(group as usize)
            .copied()
            .ok_or_else(|| Iec60870Error::domain(format!("interrogation group {} outside 0..=16", group)))
    }

    /// Check if this is a positive confirmation.
    #[inline]
    pub const fn is_positive(&self) -> bool {
        matches!(
            self,
            Self::ActivationConfirm | Self::DeactivationConfirm | Self::ActivationTermination
        )
    }

    /// Check if this is a reply to an unrecognized request (44..=47).
    #[inline]
    pub const fn is_unknown_reply(&self) -> bool {
        matches!(
            self,
            Self::UnknownTypeId | Self::UnknownCot | Self::UnknownCommonAddress | Self::UnknownIoa
        )
    }

    /// Check if this COT indicates an interrogation response.
    #[inline]
    pub const fn is_interrogation_response(&self) -> bool {
        matches!(self.as_u8(), 20..=36)
    }

    /// Check if this COT indicates a counter request response.
    #[inline]
    pub const fn is_counter_response(&self) -> bool {
        matches!(self.as_u8(), 37..=41)
    }

    /// Data of this cause travels as class 2 on an unbalanced serial link.
    #[inline]
    pub const fn is_class2(&self) -> bool {
        matches!(self, Self::Periodic | Self::Background)
    }
}

impl std::fmt::Display for Cot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Periodic => "PERIODIC",
            Self::Background => "BACKGROUND_SCAN",
            Self::Spontaneous => "SPONTANEOUS",
            Self::Initialized => "INITIALIZED",
            Self::Request => "REQUEST",
            Self::Activation => "ACTIVATION",
            Self::ActivationConfirm => "ACTIVATION_CON",
            Self::Deactivation => "DEACTIVATION",
            Self::DeactivationConfirm => "DEACTIVATION_CON",
            Self::ActivationTermination => "ACTIVATION_TERMINATION",
            Self::ReturnRemoteCommand => "RETURN_INFO_REMOTE",
            Self::ReturnLocalCommand => "RETURN_INFO_LOCAL",
            Self::FileTransfer => "FILE_TRANSFER",
            Self::RequestedByGeneralCounter => "REQUESTED_BY_GENERAL_COUNTER",
            Self::UnknownTypeId => "UNKNOWN_TYPE_ID",
            Self::UnknownCot => "UNKNOWN_CAUSE_OF_TRANSMISSION",
            Self::UnknownCommonAddress => "UNKNOWN_COMMON_ADDRESS",
            Self::UnknownIoa => "UNKNOWN_INFORMATION_OBJECT_ADDRESS",
            Self::InterrogatedByStation => "INTERROGATED_BY_STATION",
            cot if cot.is_interrogation_response() => {
                return write!(f, "INTERROGATED_BY_GROUP_{}", cot.as_u8() - 20);
            }
            cot => return write!(f, "REQUESTED_BY_GROUP_{}_COUNTER", cot.as_u8() - 37),
        };
        f.write_str(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cot_from_u8() {
        assert_eq!(Cot::from_u8(1).unwrap(), Cot::Periodic);
        assert_eq!(Cot::from_u8(3).unwrap(), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(20).unwrap(), Cot::InterrogatedByStation);
        assert_eq!(Cot::from_u8(36).unwrap(), Cot::InterrogatedByGroup16);
        assert_eq!(Cot::from_u8(41).unwrap(), Cot::RequestedByGroup4Counter);
    }

    #[test]
    fn test_cot_all_values_roundtrip() {
        for val in (1..=13).chain(20..=41).chain(44..=47) {
            let cot = Cot::from_u8(val).unwrap();
            assert_eq!(cot.as_u8(), val, "Roundtrip failed for value {}", val);
        }
    }

    #[test]
    fn test_cot_invalid_values() {
        for val in [0, 14, 19, 42, 43, 48, 63] {
            assert!(
                matches!(Cot::from_u8(val), Err(Iec60870Error::UnknownCot(v)) if v == val),
                "Expected error for COT value {}",
                val
            );
        }
    }

    #[test]
    fn test_cot_upper_bits_masked() {
        // P/N and T bits are not part of the code
        assert_eq!(Cot::from_u8(0x43).unwrap(), Cot::Spontaneous);
        assert_eq!(Cot::from_u8(0x86).unwrap(), Cot::Activation);
    }

    #[test]
    fn test_cot_classification() {
        assert!(Cot::ActivationConfirm.is_positive());
        assert!(!Cot::Activation.is_positive());
        assert!(Cot::UnknownIoa.is_unknown_reply());
        assert!(!Cot::Spontaneous.is_unknown_reply());
        assert!(Cot::InterrogatedByGroup1.is_interrogation_response());
        assert!(Cot::RequestedByGroup2Counter.is_counter_response());
        assert!(Cot::Periodic.is_class2());
        assert!(Cot::Background.is_class2());
        assert!(!Cot::Spontaneous.is_class2());
    }

    #[test]
    fn test_interrogated_by_group() {
        assert_eq!(Cot::interrogated_by_group(0).unwrap(), Cot::InterrogatedByStation);
        assert_eq!(Cot::interrogated_by_group(5).unwrap(), Cot::InterrogatedByGroup5);
        assert!(Cot::interrogated_by_group(17).is_err());
    }

    #[test]
    fn test_cot_display() {
        assert_eq!(Cot::Spontaneous.to_string(), "SPONTANEOUS");
        assert_eq!(Cot::InterrogatedByStation.to_string(), "INTERROGATED_BY_STATION");
        assert_eq!(Cot::InterrogatedByGroup7.to_string(), "INTERROGATED_BY_GROUP_7");
        assert_eq!(Cot::RequestedByGroup3Counter.to_string(), "REQUESTED_BY_GROUP_3_COUNTER");
        assert_eq!(Cot::UnknownCot.to_string(), "UNKNOWN_CAUSE_OF_TRANSMISSION");
    }
}
