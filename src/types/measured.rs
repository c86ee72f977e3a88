//! Measured value elements: VTI, NVA, SVA, R32, BSI, SCD and BCR.

use crate::error::{Iec60870Error, Result};

/// Value with transient state indication (VTI), used by step positions.
///
/// Bits 0-6 hold a signed 7-bit value, bit 7 is the transient flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StepPosition(u8);

impl StepPosition {
    /// Create a step position. `value` must be within -64..=63.
    pub fn new(value: i8, transient: bool) -> Result<Self> {
        if !(-64..=63).contains(&value) {
            return Err(Iec60870Error::domain(format!(
                "step position {} outside -64..=63",
                value
            )));
        }
        Ok(Self((value as u8 & 0x7F) | if transient { 0x80 } else { 0 }))
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

    /// Signed step value.
    #[inline]
    pub const fn value(&self) -> i8 {
        ((self.0 << 1) as i8) >> 1
    }

    /// Equipment is in transient state.
    #[inline]
    pub const fn is_transient(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// Normalized value (NVA), a 16-bit fixed point fraction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct NormalizedValue(i16);

impl NormalizedValue {
    /// Largest representable value, 1 - 2^-15.
    pub const MAX: f32 = 1.0 - 1.0 / 32768.0;

    /// Create from a fraction in `-1.0..=1.0 - 2^-15`.
    pub fn new(value: f32) -> Result<Self> {
        if !value.is_finite() || !(-1.0..=Self::MAX).contains(&value) {
            return Err(Iec60870Error::domain(format!(
                "normalized value {} outside [-1.0, 1.0)",
                value
            )));
        }
        Ok(Self((value * 32768.0).round() as i16))
    }

    /// Create from the raw 16-bit value.
    #[inline]
    pub const fn from_raw(raw: i16) -> Self {
        Self(raw)
    }

    /// Raw 16-bit value.
    #[inline]
    pub const fn raw(&self) -> i16 {
        self.0
    }

    /// Value as a fraction.
    #[inline]
    pub fn value(&self) -> f32 {
        self.0 as f32 / 32768.0
    }
}

/// Scaled value (SVA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ScaledValue(pub i16);

impl ScaledValue {
    /// Scaled value.
    #[inline]
    pub const fn value(&self) -> i16 {
        self.0
    }
}

/// IEEE 754 short floating point number (R32).
///
/// Stored as raw bits so NaN payloads re-encode unchanged.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ShortFloat(u32);

impl ShortFloat {
    /// Create from a float value.
    #[inline]
    pub fn new(value: f32) -> Self {
        Self(value.to_bits())
    }

    /// Create from the raw bit pattern.
    #[inline]
    pub const fn from_bits(bits: u32) -> Self {
        Self(bits)
    }

    /// Raw bit pattern.
    #[inline]
    pub const fn bits(&self) -> u32 {
        self.0
    }

    /// Float value.
    #[inline]
    pub fn value(&self) -> f32 {
        f32::from_bits(self.0)
    }
}

impl std::fmt::Debug for ShortFloat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "ShortFloat({})", self.value())
    }
}

/// Bitstring of 32 bits (BSI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Bitstring32(pub u32);

impl Bitstring32 {
    /// Test a single bit.
    #[inline]
    pub const fn bit(&self, index: u32) -> bool {
        index < 32 && (self.0 >> index) & 1 != 0
    }
}

/// Status and status change detection (SCD).
///
/// The low word carries 16 status bits (ST), the high word the matching
/// change detection bits (CD).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct StatusChangeDetection(u32);

impl StatusChangeDetection {
    /// Create from status and change detection words.
    #[inline]
    pub const fn new(status: u16, changed: u16) -> Self {
        Self(status as u32 | (changed as u32) << 16)
    }

    /// Create from the raw 32-bit value.
    #[inline]
    pub const fn from_raw(raw: u32) -> Self {
        Self(raw)
    }

    /// Raw 32-bit value.
    #[inline]
    pub const fn raw(&self) -> u32 {
        self.0
    }

    /// Status bits.
    #[inline]
    pub const fn status(&self) -> u16 {
        self.0 as u16
    }

    /// Change detection bits.
    #[inline]
    pub const fn changed(&self) -> u16 {
        (self.0 >> 16) as u16
    }
}

/// Binary counter reading (BCR).
///
/// Counter value followed by a flag byte: bits 0-4 sequence number,
/// bit 5 carry (CY), bit 6 adjusted (CA), bit 7 invalid (IV).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BinaryCounterReading {
    counter: i32,
    flags: u8,
}

impl BinaryCounterReading {
    const CY_MASK: u8 = 0x20;
    const CA_MASK: u8 = 0x40;
    const IV_MASK: u8 = 0x80;

    /// Create a counter reading. `sequence` must be within 0..=31.
    pub fn new(counter: i32, sequence: u8, carry: bool, adjusted: bool, invalid: bool) -> Result<Self> {
        if sequence > 31 {
            return Err(Iec60870Error::domain(format!(
                "counter sequence number {} outside 0..=31",
                sequence
            )));
        }
        let mut flags = sequence;
        if carry {
            flags |= Self::CY_MASK;
        }
        if adjusted {
            flags |= Self::CA_MASK;
        }
        if invalid {
            flags |= Self::IV_MASK;
        }
        Ok(Self { counter, flags })
    }

    /// Create from raw counter and flag byte.
    #[inline]
    pub const fn from_raw(counter: i32, flags: u8) -> Self {
        Self { counter, flags }
    }

    /// Counter value.
    #[inline]
    pub const fn counter(&self) -> i32 {
        self.counter
    }

    /// Raw flag byte.
    #[inline]
    pub const fn flags(&self) -> u8 {
        self.flags
    }

    /// Sequence number (SQ).
    #[inline]
    pub const fn sequence(&self) -> u8 {
        self.flags & 0x1F
    }

    /// Counter overflowed in the integration period (CY).
    #[inline]
    pub const fn carry(&self) -> bool {
        self.flags & Self::CY_MASK != 0
    }

    /// Counter was adjusted (CA).
    #[inline]
    pub const fn adjusted(&self) -> bool {
        self.flags & Self::CA_MASK != 0
    }

    /// Reading is invalid (IV).
    #[inline]
    pub const fn invalid(&self) -> bool {
        self.flags & Self::IV_MASK != 0
    }
}
