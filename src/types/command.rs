//! Command elements and qualifiers.
//!
//! SCO, DCO and RCO share the qualifier of command: bits 2-6 QU (pulse
//! duration selection), bit 7 S/E (select or execute).

use crate::error::{Iec60870Error, Result};

const SELECT_MASK: u8 = 0x80;

/// Build the shared S/E + QU part of a command byte.
fn command_qualifier(select: bool, qualifier: u8) -> Result<u8> {
    if qualifier > 31 {
        return Err(Iec60870Error::domain(format!(
            "command qualifier {} outside 0..=31",
            qualifier
        )));
    }
    Ok((qualifier << 2) | if select { SELECT_MASK } else { 0 })
}

#[inline]
const fn qualifier_of(byte: u8) -> u8 {
    (byte >> 2) & 0x1F
}

#[inline]
const fn is_select(byte: u8) -> bool {
    byte & SELECT_MASK != 0
}

/// Single command (SCO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct SingleCommand(u8);

impl SingleCommand {
    /// Create a single command.
    pub fn new(on: bool, select: bool, qualifier: u8) -> Result<Self> {
        Ok(Self(command_qualifier(select, qualifier)? | on as u8))
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

    /// Commanded state (SCS).
    #[inline]
    pub const fn state(&self) -> bool {
        self.0 & 0x01 != 0
    }

    /// Select (true) or execute (false).
    #[inline]
    pub const fn is_select(&self) -> bool {
        is_select(self.0)
    }

    /// Qualifier of command (QU).
    #[inline]
    pub const fn qualifier(&self) -> u8 {
        qualifier_of(self.0)
    }
}

/// Commanded state of a double command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum DoubleCommandState {
    /// Off (1)
    Off = 1,
    /// On (2)
    On = 2,
}

impl TryFrom<u8> for DoubleCommandState {
    type Error = Iec60870Error;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            1 => Ok(Self::Off),
            2 => Ok(Self::On),
            _ => Err(Iec60870Error::domain(format!(
                "double command state {} not permitted",
                value
            ))),
        }
    }
}

/// Double command (DCO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct DoubleCommand(u8);

impl DoubleCommand {
    /// Create a double command.
    pub fn new(state: DoubleCommandState, select: bool, qualifier: u8) -> Result<Self> {
        Ok(Self(command_qualifier(select, qualifier)? | state as u8))
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

    /// Commanded state (DCS) as transmitted, 0..=3.
    #[inline]
    pub const fn state(&self) -> u8 {
        self.0 & 0x03
    }

    /// Select (true) or execute (false).
    #[inline]
    pub const fn is_select(&self) -> bool {
        is_select(self.0)
    }

    /// Qualifier of command (QU).
    #[inline]
    pub const fn qualifier(&self) -> u8 {
        qualifier_of(self.0)
    }
}

/// Direction of a regulating step command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StepDirection {
    /// Next step lower (1)
    Lower = 1,
    /// Next step higher (2)
    Higher = 2,
}

/// Regulating step command (RCO).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct RegulatingStepCommand(u8);

impl RegulatingStepCommand {
    /// Create a regulating step command.
    pub fn new(direction: StepDirection, select: bool, qualifier: u8) -> Result<Self> {
        Ok(Self(command_qualifier(select, qualifier)? | direction as u8))
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

    /// Step direction, `None` for the reserved states 0 and 3.
    #[inline]
    pub const fn direction(&self) -> Option<StepDirection> {
        match self.0 & 0x03 {
            1 => Some(StepDirection::Lower),
            2 => Some(StepDirection::Higher),
            _ => None,
        }
    }

    /// Select (true) or execute (false).
    #[inline]
    pub const fn is_select(&self) -> bool {
        is_select(self.0)
    }

    /// Qualifier of command (QU).
    #[inline]
    pub const fn qualifier(&self) -> u8 {
        qualifier_of(self.0)
    }
}

/// Qualifier of set-point command (QOS).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct SetpointQualifier(u8);

impl SetpointQualifier {
    /// Create a set-point qualifier. `ql` must be within 0..=127.
    pub fn new(ql: u8, select: bool) -> Result<Self> {
        if ql > 127 {
            return Err(Iec60870Error::domain(format!("set-point QL {} outside 0..=127", ql)));
        }
        Ok(Self(ql | if select { SELECT_MASK } else { 0 }))
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

    /// Qualifier (QL).
    #[inline]
    pub const fn ql(&self) -> u8 {
        self.0 & 0x7F
    }

    /// Select (true) or execute (false).
    #[inline]
    pub const fn is_select(&self) -> bool {
        is_select(self.0)
    }
}

/// Qualifier of interrogation (QOI).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InterrogationQualifier(pub u8);

impl InterrogationQualifier {
    /// Station interrogation (global).
    pub const STATION: Self = Self(20);

    /// Interrogation of group 1..=16.
    pub fn group(group: u8) -> Result<Self> {
        if !(1..=16).contains(&group) {
            return Err(Iec60870Error::domain(format!(
                "interrogation group {} outside 1..=16",
                group
            )));
        }
        Ok(Self(20 + group))
    }
}

/// Qualifier of counter interrogation command (QCC).
///
/// Bits 0-5 request (RQT), bits 6-7 freeze/reset (FRZ).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct CounterQualifier(u8);

impl CounterQualifier {
    /// Create from request (0..=63) and freeze (0..=3).
    pub fn new(request: u8, freeze: u8) -> Result<Self> {
        if request > 63 || freeze > 3 {
            return Err(Iec60870Error::domain(format!(
                "counter qualifier RQT={} FRZ={} out of range",
                request, freeze
            )));
        }
        Ok(Self(request | freeze << 6))
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

    /// Request (RQT).
    #[inline]
    pub const fn request(&self) -> u8 {
        self.0 & 0x3F
    }

    /// Freeze/reset (FRZ).
    #[inline]
    pub const fn freeze(&self) -> u8 {
        self.0 >> 6
    }
}

/// Qualifier of parameter of measured values (QPM).
///
/// Bits 0-5 kind of parameter (KPA), bit 6 local parameter change (LPC),
/// bit 7 parameter in operation (POP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct MeasuredParameterQualifier(u8);

impl MeasuredParameterQualifier {
    /// Create from parameter kind (0..=63) and flags.
    pub fn new(kind: u8, local_change: bool, in_operation: bool) -> Result<Self> {
        if kind > 63 {
            return Err(Iec60870Error::domain(format!("parameter kind {} outside 0..=63", kind)));
        }
        Ok(Self(
            kind | if local_change { 0x40 } else { 0 } | if in_operation { 0x80 } else { 0 },
        ))
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

    /// Kind of parameter (KPA).
    #[inline]
    pub const fn kind(&self) -> u8 {
        self.0 & 0x3F
    }

    /// Local parameter change (LPC).
    #[inline]
    pub const fn local_change(&self) -> bool {
        self.0 & 0x40 != 0
    }

    /// Parameter in operation (POP).
    #[inline]
    pub const fn in_operation(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// Qualifier of parameter activation (QPA).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ParameterActivationQualifier(pub u8);

/// Qualifier of reset process command (QRP).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct ResetProcessQualifier(pub u8);

impl ResetProcessQualifier {
    /// General reset of process.
    pub const GENERAL: Self = Self(1);
    /// Reset of pending information with time tag of the event buffer.
    pub const EVENT_BUFFER: Self = Self(2);
}

/// Cause of initialization (COI).
///
/// Bits 0-6 cause, bit 7 set when initialized after a change of local
/// parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct InitializationCause(u8);

impl InitializationCause {
    /// Local power switch on.
    pub const POWER_ON: u8 = 0;
    /// Local manual reset.
    pub const MANUAL_RESET: u8 = 1;
    /// Remote reset.
    pub const REMOTE_RESET: u8 = 2;

    /// Create from cause (0..=127) and parameter change flag.
    pub fn new(cause: u8, after_parameter_change: bool) -> Result<Self> {
        if cause > 127 {
            return Err(Iec60870Error::domain(format!(
                "initialization cause {} outside 0..=127",
                cause
            )));
        }
        Ok(Self(cause | if after_parameter_change { 0x80 } else { 0 }))
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

    /// Cause of initialization.
    #[inline]
    pub const fn cause(&self) -> u8 {
        self.0 & 0x7F
    }

    /// Initialized after change of local parameters.
    #[inline]
    pub const fn after_parameter_change(&self) -> bool {
        self.0 & 0x80 != 0
    }
}

/// Fixed test bit pattern (FBP) used by test commands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct FixedTestPattern(u16);

impl FixedTestPattern {
    /// The only pattern a valid test command carries.
    pub const PATTERN: u16 = 0x55AA;

    /// Create the standard test pattern.
    #[inline]
    pub const fn new() -> Self {
        Self(Self::PATTERN)
    }

    /// Create from the raw wire value.
    #[inline]
    pub const fn from_raw(raw: u16) -> Self {
        Self(raw)
    }

    /// Raw wire value.
    #[inline]
    pub const fn raw(&self) -> u16 {
        self.0
    }

    /// Check the pattern against 0x55AA.
    #[inline]
    pub const fn is_valid(&self) -> bool {
        self.0 == Self::PATTERN
    }
}

impl Default for FixedTestPattern {
    fn default() -> Self {
        Self::new()
    }
}

/// Test sequence counter (TSC).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[repr(transparent)]
pub struct TestSequenceCounter(pub u16);
