//! Protection equipment elements: SEP, SPE and OCI.

use super::quality::{DoublePointValue, ProtectionQuality, Quality};
use crate::error::{Iec60870Error, Result};

/// Single event of protection equipment (SEP).
///
/// Bits 0-1 event state, bit 3 EI, bits 4-7 BL/SB/NT/IV.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SingleEvent(u8);

impl SingleEvent {
    /// Create from event state and protection quality flags.
    pub fn new(state: DoublePointValue, quality: Quality) -> Result<Self> {
        let q = quality.check(ProtectionQuality::ALLOWED, "SEP")?;
        Ok(Self(q | state as u8))
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

    /// Event state (ES).
    #[inline]
    pub const fn state(&self) -> DoublePointValue {
        DoublePointValue::from_u8(self.0)
    }

    /// Quality flags.
    #[inline]
    pub const fn quality(&self) -> Quality {
        Quality::from_bits(self.0 & ProtectionQuality::ALLOWED)
    }
}

/// Start events of protection equipment (SPE).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StartEvents(u8);

impl StartEvents {
    /// General start of operation (GS)
    pub const GENERAL: u8 = 0x01;
    /// Start of operation phase L1 (SL1)
    pub const PHASE_L1: u8 = 0x02;
    /// Start of operation phase L2 (SL2)
    pub const PHASE_L2: u8 = 0x04;
    /// Start of operation phase L3 (SL3)
    pub const PHASE_L3: u8 = 0x08;
    /// Start of operation IE, earth current (SIE)
    pub const EARTH_CURRENT: u8 = 0x10;
    /// Start of operation in reverse direction (SRD)
    pub const REVERSE: u8 = 0x20;

    const DEFINED: u8 = 0x3F;

    /// Create from a combination of the flag constants.
    pub fn new(flags: u8) -> Result<Self> {
        if flags & !Self::DEFINED != 0 {
            return Err(Iec60870Error::domain(format!(
                "start event flags 0x{:02X} use reserved bits",
                flags
            )));
        }
        Ok(Self(flags))
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

    /// Check a flag.
    #[inline]
    pub const fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}

/// Packed output circuit information of protection equipment (OCI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct OutputCircuitInfo(u8);

impl OutputCircuitInfo {
    /// General command to output circuit (GC)
    pub const GENERAL: u8 = 0x01;
    /// Command to output circuit phase L1 (CL1)
    pub const PHASE_L1: u8 = 0x02;
    /// Command to output circuit phase L2 (CL2)
    pub const PHASE_L2: u8 = 0x04;
    /// Command to output circuit phase L3 (CL3)
    pub const PHASE_L3: u8 = 0x08;

    const DEFINED: u8 = 0x0F;

    /// Create from a combination of the flag constants.
    pub fn new(flags: u8) -> Result<Self> {
        if flags & !Self::DEFINED != 0 {
            return Err(Iec60870Error::domain(format!(
                "output circuit flags 0x{:02X} use reserved bits",
                flags
            )));
        }
        Ok(Self(flags))
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

    /// Check a flag.
    #[inline]
    pub const fn contains(&self, flag: u8) -> bool {
        self.0 & flag == flag
    }
}
