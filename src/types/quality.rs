//! Quality descriptors and point information elements.
//!
//! SIQ, DIQ, QDS and QDP all share the upper-nibble quality flags
//! (BL, SB, NT, IV). The shared bits are handled by [`Quality`]; each element
//! masks the subset its wire format defines.

use crate::error::{Iec60870Error, Result};

/// Quality flags in their wire positions.
///
/// Bit layout:
/// - Bit 0: overflow (OV), QDS only
/// - Bit 3: elapsed time invalid (EI), QDP and SEP only
/// - Bit 4: blocked (BL)
/// - Bit 5: substituted (SB)
/// - Bit 6: not topical (NT)
/// - Bit 7: invalid (IV)
#[derive(Clone, Copy, PartialEq, Eq, Default, Hash)]
#[repr(transparent)]
pub struct Quality(u8);

impl Quality {
    const OV_MASK: u8 = 0b0000_0001;
    const EI_MASK: u8 = 0b0000_1000;
    const BL_MASK: u8 = 0b0001_0000;
    const SB_MASK: u8 = 0b0010_0000;
    const NT_MASK: u8 = 0b0100_0000;
    const IV_MASK: u8 = 0b1000_0000;

    /// Flags shared by every quality-bearing element.
    pub(crate) const COMMON: u8 = Self::BL_MASK | Self::SB_MASK | Self::NT_MASK | Self::IV_MASK;

    /// Good quality (no flags set).
    pub const GOOD: Self = Self(0);

    /// Create from the raw wire bits.
    #[inline]
    pub const fn from_bits(bits: u8) -> Self {
        Self(bits)
    }

    /// Raw wire bits.
    #[inline]
    pub const fn bits(&self) -> u8 {
        self.0
    }

    /// Check if no flag is set.
    #[inline]
    pub const fn is_good(&self) -> bool {
        self.0 == 0
    }

    #[inline(always)]
    const fn with(mut self, mask: u8, value: bool) -> Self {
        if value {
            self.0 |= mask;
        } else {
            self.0 &= !mask;
        }
        self
    }

    /// Overflow (OV) - value exceeds predefined range
    #[inline]
    pub const fn overflow(&self) -> bool {
        (self.0 & Self::OV_MASK) != 0
    }

    /// Set overflow flag
    #[inline]
    pub const fn set_overflow(self, value: bool) -> Self {
        self.with(Self::OV_MASK, value)
    }

    /// Elapsed time invalid (EI)
    #[inline]
    pub const fn elapsed_time_invalid(&self) -> bool {
        (self.0 & Self::EI_MASK) != 0
    }

    /// Set elapsed time invalid flag
    #[inline]
    pub const fn set_elapsed_time_invalid(self, value: bool) -> Self {
        self.with(Self::EI_MASK, value)
    }

    /// Blocked (BL) - value is blocked for transmission
    #[inline]
    pub const fn blocked(&self) -> bool {
        (self.0 & Self::BL_MASK) != 0
    }

    /// Set blocked flag
    #[inline]
    pub const fn set_blocked(self, value: bool) -> Self {
        self.with(Self::BL_MASK, value)
    }

    /// Substituted (SB) - value was provided by an operator or automatic source
    #[inline]
    pub const fn substituted(&self) -> bool {
        (self.0 & Self::SB_MASK) != 0
    }

    /// Set substituted flag
    #[inline]
    pub const fn set_substituted(self, value: bool) -> Self {
        self.with(Self::SB_MASK, value)
    }

    /// Not topical (NT) - value was not updated successfully
    #[inline]
    pub const fn not_topical(&self) -> bool {
        (self.0 & Self::NT_MASK) != 0
    }

    /// Set not topical flag
    #[inline]
    pub const fn set_not_topical(self, value: bool) -> Self {
        self.with(Self::NT_MASK, value)
    }

    /// Invalid (IV) - value is invalid
    #[inline]
    pub const fn invalid(&self) -> bool {
        (self.0 & Self::IV_MASK) != 0
    }

    /// Set invalid flag
    #[inline]
    pub const fn set_invalid(self, value: bool) -> Self {
        self.with(Self::IV_MASK, value)
    }

    /// Fail if any flag outside `allowed` is set.
    pub(crate) fn check(self, allowed: u8, element: &str) -> Result<u8> {
        if self.0 & !allowed != 0 {
            return Err(Iec60870Error::domain(format!(
                "quality bits 0x{:02X} not valid for {}",
                self.0 & !allowed,
                element
            )));
        }
        Ok(self.0)
    }
}

impl std::fmt::Debug for Quality {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        if self.is_good() {
            return write!(f, "Quality(Good)");
        }
        let mut flags = Vec::new();
        if self.overflow() {
            flags.push("OV");
        }
        if self.elapsed_time_invalid() {
            flags.push("EI");
        }
        if self.blocked() {
            flags.push("BL");
        }
        if self.substituted() {
            flags.push("SB");
        }
        if self.not_topical() {
            flags.push("NT");
        }
        if self.invalid() {
            flags.push("IV");
        }
        write!(f, "Quality({})", flags.join("|"))
    }
}

/// Double-point value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DoublePointValue {
    /// Intermediate state (0)
    Intermediate = 0,
    /// Off (1)
    Off = 1,
    /// On (2)
    On = 2,
    /// Indeterminate (3)
    Indeterminate = 3,
}

impl DoublePointValue {
    /// Create from the two low bits.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        match value & 0x03 {
            0 => Self::Intermediate,
            1 => Self::Off,
            2 => Self::On,
            _ => Self::Indeterminate,
        }
    }
}

/// Single-point information with quality descriptor (SIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SinglePointInfo(u8);

impl SinglePointInfo {
    /// Create from value and quality. Only BL, SB, NT and IV are allowed.
    pub fn new(on: bool, quality: Quality) -> Result<Self> {
        let q = quality.check(Quality::COMMON, "SIQ")?;
        Ok(Self(q | on as u8))
    }

    /// Create from the raw wire byte.
    #[inline]
    pub const fn from_raw(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw wire byte.
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Single-point state (SPI).
    #[inline]
    pub const fn value(&self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Quality flags.
    #[inline]
    pub const fn quality(&self) -> Quality {
        Quality(self.0 & Quality::COMMON)
    }
}

/// Double-point information with quality descriptor (DIQ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DoublePointInfo(u8);

impl DoublePointInfo {
    /// Create from value and quality. Only BL, SB, NT and IV are allowed.
    pub fn new(value: DoublePointValue, quality: Quality) -> Result<Self> {
        let q = quality.check(Quality::COMMON, "DIQ")?;
        Ok(Self(q | value as u8))
    }

    /// Create from the raw wire byte.
    #[inline]
    pub const fn from_raw(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw wire byte.
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Double-point state (DPI).
    #[inline]
    pub const fn value(&self) -> DoublePointValue {
        DoublePointValue::from_u8(self.0)
    }

    /// Quality flags.
    #[inline]
    pub const fn quality(&self) -> Quality {
        Quality(self.0 & Quality::COMMON)
    }
}

/// Quality descriptor for measured values (QDS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct QualityDescriptor(u8);

impl QualityDescriptor {
    const ALLOWED: u8 = Quality::COMMON | Quality::OV_MASK;

    /// Create from quality flags. OV, BL, SB, NT and IV are allowed.
    pub fn new(quality: Quality) -> Result<Self> {
        Ok(Self(quality.check(Self::ALLOWED, "QDS")?))
    }

    /// Create from the raw wire byte.
    #[inline]
    pub const fn from_raw(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw wire byte.
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Quality flags.
    #[inline]
    pub const fn quality(&self) -> Quality {
        Quality(self.0 & Self::ALLOWED)
    }
}

/// Quality descriptor for events of protection equipment (QDP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct ProtectionQuality(u8);

impl ProtectionQuality {
    pub(crate) const ALLOWED: u8 = Quality::COMMON | Quality::EI_MASK;

    /// Create from quality flags. EI, BL, SB, NT and IV are allowed.
    pub fn new(quality: Quality) -> Result<Self> {
        Ok(Self(quality.check(Self::ALLOWED, "QDP")?))
    }

    /// Create from the raw wire byte.
    #[inline]
    pub const fn from_raw(byte: u8) -> Self {
        Self(byte)
    }

    /// Raw wire byte.
    #[inline]
    pub const fn raw(&self) -> u8 {
        self.0
    }

    /// Quality flags.
    #[inline]
    pub const fn quality(&self) -> Quality {
        Quality(self.0 & Self::ALLOWED)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quality_flags() {
        let q = Quality::GOOD.set_invalid(true).set_blocked(true);
        assert!(q.invalid());
        assert!(q.blocked());
        assert!(!q.substituted());
        assert_eq!(q.bits(), 0x90);
        assert!(!q.is_good());
        assert_eq!(format!("{:?}", q), "Quality(BL|IV)");
        assert_eq!(format!("{:?}", Quality::GOOD), "Quality(Good)");
    }

    #[test]
    fn test_siq() {
        let siq = SinglePointInfo::new(true, Quality::GOOD.set_not_topical(true)).unwrap();
        assert_eq!(siq.raw(), 0x41);
        assert!(siq.value());
        assert!(siq.quality().not_topical());

        // OV is not part of SIQ
        assert!(matches!(
            SinglePointInfo::new(false, Quality::GOOD.set_overflow(true)),
            Err(Iec60870Error::Domain(_))
        ));
    }

    #[test]
    fn test_diq() {
        let diq = DoublePointInfo::new(DoublePointValue::On, Quality::GOOD).unwrap();
        assert_eq!(diq.raw(), 0x02);
        assert_eq!(diq.value(), DoublePointValue::On);

        let diq = DoublePointInfo::from_raw(0x83);
        assert_eq!(diq.value(), DoublePointValue::Indeterminate);
        assert!(diq.quality().invalid());
    }

    #[test]
    fn test_qds() {
        let qds = QualityDescriptor::new(Quality::GOOD.set_overflow(true)).unwrap();
        assert_eq!(qds.raw(), 0x01);
        assert!(qds.quality().overflow());
        assert!(QualityDescriptor::new(Quality::GOOD.set_elapsed_time_invalid(true)).is_err());
    }

    #[test]
    fn test_qdp() {
        let qdp = ProtectionQuality::new(Quality::GOOD.set_elapsed_time_invalid(true)).unwrap();
        assert_eq!(qdp.raw(), 0x08);
        assert!(ProtectionQuality::new(Quality::GOOD.set_overflow(true)).is_err());
    }

    #[test]
    fn test_raw_bits_preserved() {
        // Reserved bits survive decode
        assert_eq!(SinglePointInfo::from_raw(0x0E).raw(), 0x0E);
        assert_eq!(QualityDescriptor::from_raw(0x06).raw(), 0x06);
    }
}
