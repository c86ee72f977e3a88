//! Type identification.
//!
//! The type identification defines the structure and meaning of the
//! information objects in an ASDU. Each identifier fixes the row layout, the
//! ordered element kinds that follow every information object address.

use super::element::ElementKind;
use crate::error::{Iec60870Error, Result};

macro_rules! type_ids {
    ($(
        $(#[$doc:meta])*
        $variant:ident = $code:literal, $name:literal, [$($kind:ident),*];
    )*) => {
        /// Type identification of an ASDU.
        ///
        /// All identifiers of IEC 60870-5-101/104 except file transfer (120-127).
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum TypeId {
            $(
                $(#[$doc])*
                $variant = $code,
            )*
        }

        impl TypeId {
            /// Create TypeId from raw byte value.
            #[inline]
            pub fn from_u8(value: u8) -> Result<Self> {
                match value {
                    $($code => Ok(Self::$variant),)*
                    _ => Err(Iec60870Error::UnknownTypeId(value)),
                }
            }

            /// Get the IEC standard name (e.g., "M_SP_NA_1").
            #[inline]
            pub const fn standard_name(&self) -> &'static str {
                match self {
                    $(Self::$variant => $name,)*
                }
            }

            /// Element kinds of one row, in wire order.
            #[inline]
            pub const fn row_layout(&self) -> &'static [ElementKind] {
                match self {
                    $(Self::$variant => &[$(ElementKind::$kind),*],)*
                }
            }
        }
    };
}

type_ids! {
    // Process information in monitoring direction
    /// Single-point information (M_SP_NA_1)
    SinglePoint = 1, "M_SP_NA_1", [Siq];
    /// Single-point information with time tag (M_SP_TA_1)
    SinglePointTime24 = 2, "M_SP_TA_1", [Siq, Cp24];
    /// Double-point information (M_DP_NA_1)
    DoublePoint = 3, "M_DP_NA_1", [Diq];
    /// Double-point information with time tag (M_DP_TA_1)
    DoublePointTime24 = 4, "M_DP_TA_1", [Diq, Cp24];
    /// Step position information (M_ST_NA_1)
    StepPosition = 5, "M_ST_NA_1", [Vti, Qds];
    /// Step position information with time tag (M_ST_TA_1)
    StepPositionTime24 = 6, "M_ST_TA_1", [Vti, Qds, Cp24];
    /// Bitstring of 32 bit (M_BO_NA_1)
    Bitstring32 = 7, "M_BO_NA_1", [Bsi, Qds];
    /// Bitstring of 32 bit with time tag (M_BO_TA_1)
    Bitstring32Time24 = 8, "M_BO_TA_1", [Bsi, Qds, Cp24];
    /// Measured value, normalized (M_ME_NA_1)
    MeasuredNormalized = 9, "M_ME_NA_1", [Nva, Qds];
    /// Measured value, normalized with time tag (M_ME_TA_1)
    MeasuredNormalizedTime24 = 10, "M_ME_TA_1", [Nva, Qds, Cp24];
    /// Measured value, scaled (M_ME_NB_1)
    MeasuredScaled = 11, "M_ME_NB_1", [Sva, Qds];
    /// Measured value, scaled with time tag (M_ME_TB_1)
    MeasuredScaledTime24 = 12, "M_ME_TB_1", [Sva, Qds, Cp24];
    /// Measured value, short floating point (M_ME_NC_1)
    MeasuredFloat = 13, "M_ME_NC_1", [R32, Qds];
    /// Measured value, short floating point with time tag (M_ME_TC_1)
    MeasuredFloatTime24 = 14, "M_ME_TC_1", [R32, Qds, Cp24];
    /// Integrated totals (M_IT_NA_1)
    IntegratedTotals = 15, "M_IT_NA_1", [Bcr];
    /// Integrated totals with time tag (M_IT_TA_1)
    IntegratedTotalsTime24 = 16, "M_IT_TA_1", [Bcr, Cp24];
    /// Event of protection equipment with time tag (M_EP_TA_1)
    ProtectionEventTime24 = 17, "M_EP_TA_1", [Sep, Cp16, Cp24];
    /// Packed start events of protection equipment with time tag (M_EP_TB_1)
    ProtectionStartTime24 = 18, "M_EP_TB_1", [Spe, Qdp, Cp16, Cp24];
    /// Packed output circuit information with time tag (M_EP_TC_1)
    ProtectionOutputTime24 = 19, "M_EP_TC_1", [Oci, Qdp, Cp16, Cp24];
    /// Packed single-point information with status change detection (M_PS_NA_1)
    PackedSinglePoint = 20, "M_PS_NA_1", [Scd, Qds];
    /// Measured value, normalized without quality descriptor (M_ME_ND_1)
    MeasuredNormalizedNoQuality = 21, "M_ME_ND_1", [Nva];
    /// Single-point information with time tag CP56Time2a (M_SP_TB_1)
    SinglePointTime56 = 30, "M_SP_TB_1", [Siq, Cp56];
    /// Double-point information with time tag CP56Time2a (M_DP_TB_1)
    DoublePointTime56 = 31, "M_DP_TB_1", [Diq, Cp56];
    /// Step position information with time tag CP56Time2a (M_ST_TB_1)
    StepPositionTime56 = 32, "M_ST_TB_1", [Vti, Qds, Cp56];
    /// Bitstring of 32 bit with time tag CP56Time2a (M_BO_TB_1)
    Bitstring32Time56 = 33, "M_BO_TB_1", [Bsi, Qds, Cp56];
    /// Measured value, normalized with time tag CP56Time2a (M_ME_TD_1)
    MeasuredNormalizedTime56 = 34, "M_ME_TD_1", [Nva, Qds, Cp56];
    /// Measured value, scaled with time tag CP56Time2a (M_ME_TE_1)
    MeasuredScaledTime56 = 35, "M_ME_TE_1", [Sva, Qds, Cp56];
    /// Measured value, short floating point with time tag CP56Time2a (M_ME_TF_1)
    MeasuredFloatTime56 = 36, "M_ME_TF_1", [R32, Qds, Cp56];
    /// Integrated totals with time tag CP56Time2a (M_IT_TB_1)
    IntegratedTotalsTime56 = 37, "M_IT_TB_1", [Bcr, Cp56];
    /// Event of protection equipment with time tag CP56Time2a (M_EP_TD_1)
    ProtectionEventTime56 = 38, "M_EP_TD_1", [Sep, Cp16, Cp56];
    /// Packed start events of protection equipment with time tag CP56Time2a (M_EP_TE_1)
    ProtectionStartTime56 = 39, "M_EP_TE_1", [Spe, Qdp, Cp16, Cp56];
    /// Packed output circuit information with time tag CP56Time2a (M_EP_TF_1)
    ProtectionOutputTime56 = 40, "M_EP_TF_1", [Oci, Qdp, Cp16, Cp56];

    // Process information in control direction
    /// Single command (C_SC_NA_1)
    SingleCommand = 45, "C_SC_NA_1", [Sco];
    /// Double command (C_DC_NA_1)
    DoubleCommand = 46, "C_DC_NA_1", [Dco];
    /// Regulating step command (C_RC_NA_1)
    RegulatingStep = 47, "C_RC_NA_1", [Rco];
    /// Set-point command, normalized (C_SE_NA_1)
    SetpointNormalized = 48, "C_SE_NA_1", [Nva, Qos];
    /// Set-point command, scaled (C_SE_NB_1)
    SetpointScaled = 49, "C_SE_NB_1", [Sva, Qos];
    /// Set-point command, short floating point (C_SE_NC_1)
    SetpointFloat = 50, "C_SE_NC_1", [R32, Qos];
    /// Bitstring of 32 bit command (C_BO_NA_1)
    Bitstring32Command = 51, "C_BO_NA_1", [Bsi];
    /// Single command with time tag CP56Time2a (C_SC_TA_1)
    SingleCommandTime56 = 58, "C_SC_TA_1", [Sco, Cp56];
    /// Double command with time tag CP56Time2a (C_DC_TA_1)
    DoubleCommandTime56 = 59, "C_DC_TA_1", [Dco, Cp56];
    /// Regulating step command with time tag CP56Time2a (C_RC_TA_1)
    RegulatingStepTime56 = 60, "C_RC_TA_1", [Rco, Cp56];
    /// Set-point command, normalized with time tag CP56Time2a (C_SE_TA_1)
    SetpointNormalizedTime56 = 61, "C_SE_TA_1", [Nva, Qos, Cp56];
    /// Set-point command, scaled with time tag CP56Time2a (C_SE_TB_1)
    SetpointScaledTime56 = 62, "C_SE_TB_1", [Sva, Qos, Cp56];
    /// Set-point command, short floating point with time tag CP56Time2a (C_SE_TC_1)
    SetpointFloatTime56 = 63, "C_SE_TC_1", [R32, Qos, Cp56];
    /// Bitstring of 32 bit command with time tag CP56Time2a (C_BO_TA_1)
    Bitstring32CommandTime56 = 64, "C_BO_TA_1", [Bsi, Cp56];

    // System information in monitoring direction
    /// End of initialization (M_EI_NA_1)
    EndOfInit = 70, "M_EI_NA_1", [Coi];

    // System information in control direction
    /// Interrogation command (C_IC_NA_1)
    InterrogationCommand = 100, "C_IC_NA_1", [Qoi];
    /// Counter interrogation command (C_CI_NA_1)
    CounterInterrogation = 101, "C_CI_NA_1", [Qcc];
    /// Read command (C_RD_NA_1)
    ReadCommand = 102, "C_RD_NA_1", [];
    /// Clock synchronization command (C_CS_NA_1)
    ClockSync = 103, "C_CS_NA_1", [Cp56];
    /// Test command (C_TS_NA_1)
    TestCommand = 104, "C_TS_NA_1", [Fbp];
    /// Reset process command (C_RP_NA_1)
    ResetProcess = 105, "C_RP_NA_1", [Qrp];
    /// Delay acquisition command (C_CD_NA_1)
    DelayAcquisition = 106, "C_CD_NA_1", [Cp16];
    /// Test command with time tag CP56Time2a (C_TS_TA_1)
    TestCommandTime56 = 107, "C_TS_TA_1", [Tsc, Cp56];

    // Parameter in control direction
    /// Parameter of measured value, normalized (P_ME_NA_1)
    ParameterNormalized = 110, "P_ME_NA_1", [Nva, Qpm];
    /// Parameter of measured value, scaled (P_ME_NB_1)
    ParameterScaled = 111, "P_ME_NB_1", [Sva, Qpm];
    /// Parameter of measured value, short floating point (P_ME_NC_1)
    ParameterFloat = 112, "P_ME_NC_1", [R32, Qpm];
    /// Parameter activation (P_AC_NA_1)
    ParameterActivation = 113, "P_AC_NA_1", [Qpa];
}

impl TypeId {
    /// Convert to raw byte value.
    #[inline]
    pub const fn as_u8(self) -> u8 {
        self as u8
    }

    /// Check if this type is in the monitoring direction (from RTU to master).
    #[inline]
    pub const fn is_monitoring(&self) -> bool {
        matches!(self.as_u8(), 1..=40 | 70)
    }

    /// Check if this type is in the control direction (from master to RTU).
    #[inline]
    pub const fn is_control(&self) -> bool {
        matches!(self.as_u8(), 45..=64 | 100..=107)
    }

    /// Check if this type carries measured value parameters.
    #[inline]
    pub const fn is_parameter(&self) -> bool {
        matches!(self.as_u8(), 110..=113)
    }

    /// Check if this type contains a CP24Time2a or CP56Time2a time tag.
    pub fn has_time_tag(&self) -> bool {
        self.row_layout()
            .iter()
            .any(|kind| matches!(kind, ElementKind::Cp24 | ElementKind::Cp56))
    }

    /// Encoded width of one row.
    #[inline]
    pub fn row_width(&self) -> usize {
        ElementKind::row_width(self.row_layout())
    }
}

impl std::fmt::Display for TypeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.standard_name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL_CODES: [u8; 59] = [
        1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15, 16, 17, 18, 19, 20, 21, //
        30, 31, 32, 33, 34, 35, 36, 37, 38, 39, 40, //
        45, 46, 47, 48, 49, 50, 51, 58, 59, 60, 61, 62, 63, 64, //
        70, 100, 101, 102, 103, 104, 105, 106, 107, 110, 111, 112, 113,
    ];

    #[test]
    fn test_type_id_from_u8() {
        assert_eq!(TypeId::from_u8(1).unwrap(), TypeId::SinglePoint);
        assert_eq!(TypeId::from_u8(13).unwrap(), TypeId::MeasuredFloat);
        assert_eq!(TypeId::from_u8(100).unwrap(), TypeId::InterrogationCommand);
        assert!(matches!(TypeId::from_u8(255), Err(Iec60870Error::UnknownTypeId(255))));
    }

    #[test]
    fn test_type_id_all_values_roundtrip() {
        for val in ALL_CODES {
            let type_id = TypeId::from_u8(val).unwrap();
            assert_eq!(type_id.as_u8(), val, "Roundtrip failed for value {}", val);
        }
    }

    #[test]
    fn test_type_id_invalid_values() {
        // File transfer identifiers are not decoded
        for val in [0, 22, 29, 41, 44, 52, 57, 65, 69, 71, 99, 108, 109, 114, 120, 127, 255] {
            assert!(TypeId::from_u8(val).is_err(), "Expected error for TypeId value {}", val);
        }
    }

    #[test]
    fn test_type_id_direction() {
        assert!(TypeId::SinglePoint.is_monitoring());
        assert!(!TypeId::SinglePoint.is_control());
        assert!(TypeId::EndOfInit.is_monitoring());
        assert!(TypeId::SingleCommand.is_control());
        assert!(TypeId::Bitstring32CommandTime56.is_control());
        assert!(TypeId::InterrogationCommand.is_control());
        assert!(TypeId::ParameterActivation.is_parameter());
    }

    #[test]
    fn test_type_id_time_tag() {
        assert!(!TypeId::SinglePoint.has_time_tag());
        assert!(TypeId::SinglePointTime24.has_time_tag());
        assert!(TypeId::MeasuredFloatTime56.has_time_tag());
        assert!(TypeId::ClockSync.has_time_tag());
        assert!(!TypeId::DelayAcquisition.has_time_tag());
    }

    #[test]
    fn test_row_layouts() {
        use ElementKind::*;
        assert_eq!(TypeId::MeasuredFloatTime56.row_layout(), &[R32, Qds, Cp56]);
        assert_eq!(TypeId::SetpointNormalized.row_layout(), &[Nva, Qos]);
        assert_eq!(TypeId::ProtectionStartTime24.row_layout(), &[Spe, Qdp, Cp16, Cp24]);
        assert!(TypeId::ReadCommand.row_layout().is_empty());
        assert_eq!(TypeId::MeasuredFloatTime56.row_width(), 12);
        assert_eq!(TypeId::IntegratedTotals.row_width(), 5);
    }

    #[test]
    fn test_type_id_standard_name() {
        assert_eq!(TypeId::SinglePoint.standard_name(), "M_SP_NA_1");
        assert_eq!(TypeId::MeasuredNormalizedNoQuality.standard_name(), "M_ME_ND_1");
        assert_eq!(TypeId::DelayAcquisition.standard_name(), "C_CD_NA_1");
        assert_eq!(format!("{}", TypeId::ParameterFloat), "P_ME_NC_1");
    }

    #[test]
    fn test_every_type_has_a_layout() {
        for val in ALL_CODES {
            let type_id = TypeId::from_u8(val).unwrap();
            if type_id != TypeId::ReadCommand {
                assert!(!type_id.row_layout().is_empty(), "{} has no layout", type_id);
            }
        }
    }
}
