//! Information element codec.
//!
//! [`InformationElement`] is the closed set of element kinds that can appear in
//! an information object row. Every variant knows its fixed width and encodes
//! to exactly the bytes it was decoded from.

use bytes::{Buf, BufMut};

use super::command::{
    CounterQualifier, DoubleCommand, FixedTestPattern, InitializationCause,
    InterrogationQualifier, MeasuredParameterQualifier, ParameterActivationQualifier,
    RegulatingStepCommand, ResetProcessQualifier, SetpointQualifier, SingleCommand,
    TestSequenceCounter,
};
use super::measured::{
    BinaryCounterReading, Bitstring32, NormalizedValue, ScaledValue, ShortFloat,
    StatusChangeDetection, StepPosition,
};
use super::protection::{OutputCircuitInfo, SingleEvent, StartEvents};
use super::quality::{DoublePointInfo, ProtectionQuality, QualityDescriptor, SinglePointInfo};
use super::time::{Cp16Time2a, Cp24Time2a, Cp56Time2a};
use crate::error::{Iec60870Error, Result};

/// Element kind tag, used to drive decoding from a row layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ElementKind {
    /// Single-point information with quality
    Siq,
    /// Double-point information with quality
    Diq,
    /// Quality descriptor
    Qds,
    /// Quality descriptor for protection events
    Qdp,
    /// Value with transient state
    Vti,
    /// Normalized value
    Nva,
    /// Scaled value
    Sva,
    /// Short floating point
    R32,
    /// Bitstring of 32 bits
    Bsi,
    /// Status and status change detection
    Scd,
    /// Binary counter reading
    Bcr,
    /// Single event of protection equipment
    Sep,
    /// Start events of protection equipment
    Spe,
    /// Output circuit information
    Oci,
    /// Single command
    Sco,
    /// Double command
    Dco,
    /// Regulating step command
    Rco,
    /// Qualifier of set-point command
    Qos,
    /// Qualifier of interrogation
    Qoi,
    /// Qualifier of counter interrogation
    Qcc,
    /// Qualifier of parameter of measured values
    Qpm,
    /// Qualifier of parameter activation
    Qpa,
    /// Qualifier of reset process
    Qrp,
    /// Cause of initialization
    Coi,
    /// Fixed test bit pattern
    Fbp,
    /// Test sequence counter
    Tsc,
    /// Seven octet binary time
    Cp56,
    /// Three octet binary time
    Cp24,
    /// Two octet binary time
    Cp16,
}

impl ElementKind {
    /// Encoded width in bytes.
    pub const fn width(&self) -> usize {
        match self {
            Self::Siq
            | Self::Diq
            | Self::Qds
            | Self::Qdp
            | Self::Vti
            | Self::Sep
            | Self::Spe
            | Self::Oci
            | Self::Sco
            | Self::Dco
            | Self::Rco
            | Self::Qos
            | Self::Qoi
            | Self::Qcc
            | Self::Qpm
            | Self::Qpa
            | Self::Qrp
            | Self::Coi => 1,
            Self::Nva | Self::Sva | Self::Fbp | Self::Tsc | Self::Cp16 => 2,
            Self::Cp24 => 3,
            Self::R32 | Self::Bsi | Self::Scd => 4,
            Self::Bcr => 5,
            Self::Cp56 => 7,
        }
    }

    /// Combined width of a row layout.
    pub fn row_width(layout: &[ElementKind]) -> usize {
        layout.iter().map(ElementKind::width).sum()
    }
}

/// One information element.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InformationElement {
    /// SIQ
    SinglePoint(SinglePointInfo),
    /// DIQ
    DoublePoint(DoublePointInfo),
    /// QDS
    Quality(QualityDescriptor),
    /// QDP
    ProtectionQuality(ProtectionQuality),
    /// VTI
    StepPosition(StepPosition),
    /// NVA
    Normalized(NormalizedValue),
    /// SVA
    Scaled(ScaledValue),
    /// R32
    Float(ShortFloat),
    /// BSI
    Bitstring(Bitstring32),
    /// SCD
    StatusChange(StatusChangeDetection),
    /// BCR
    Counter(BinaryCounterReading),
    /// SEP
    SingleEvent(SingleEvent),
    /// SPE
    StartEvents(StartEvents),
    /// OCI
    OutputCircuit(OutputCircuitInfo),
    /// SCO
    SingleCommand(SingleCommand),
    /// DCO
    DoubleCommand(DoubleCommand),
    /// RCO
    StepCommand(RegulatingStepCommand),
    /// QOS
    SetpointQualifier(SetpointQualifier),
    /// QOI
    Interrogation(InterrogationQualifier),
    /// QCC
    CounterInterrogation(CounterQualifier),
    /// QPM
    MeasuredParameter(MeasuredParameterQualifier),
    /// QPA
    ParameterActivation(ParameterActivationQualifier),
    /// QRP
    ResetProcess(ResetProcessQualifier),
    /// COI
    Initialization(InitializationCause),
    /// FBP
    TestPattern(FixedTestPattern),
    /// TSC
    TestSequence(TestSequenceCounter),
    /// CP56Time2a
    Time56(Cp56Time2a),
    /// CP24Time2a
    Time24(Cp24Time2a),
    /// CP16Time2a
    Time16(Cp16Time2a),
}

impl InformationElement {
    /// Kind tag of this element.
    pub const fn kind(&self) -> ElementKind {
        match self {
            Self::SinglePoint(_) => ElementKind::Siq,
            Self::DoublePoint(_) => ElementKind::Diq,
            Self::Quality(_) => ElementKind::Qds,
            Self::ProtectionQuality(_) => ElementKind::Qdp,
            Self::StepPosition(_) => ElementKind::Vti,
            Self::Normalized(_) => ElementKind::Nva,
            Self::Scaled(_) => ElementKind::Sva,
            Self::Float(_) => ElementKind::R32,
            Self::Bitstring(_) => ElementKind::Bsi,
            Self::StatusChange(_) => ElementKind::Scd,
            Self::Counter(_) => ElementKind::Bcr,
            Self::SingleEvent(_) => ElementKind::Sep,
            Self::StartEvents(_) => ElementKind::Spe,
            Self::OutputCircuit(_) => ElementKind::Oci,
            Self::SingleCommand(_) => ElementKind::Sco,
            Self::DoubleCommand(_) => ElementKind::Dco,
            Self::StepCommand(_) => ElementKind::Rco,
            Self::SetpointQualifier(_) => ElementKind::Qos,
            Self::Interrogation(_) => ElementKind::Qoi,
            Self::CounterInterrogation(_) => ElementKind::Qcc,
            Self::MeasuredParameter(_) => ElementKind::Qpm,
            Self::ParameterActivation(_) => ElementKind::Qpa,
            Self::ResetProcess(_) => ElementKind::Qrp,
            Self::Initialization(_) => ElementKind::Coi,
            Self::TestPattern(_) => ElementKind::Fbp,
            Self::TestSequence(_) => ElementKind::Tsc,
            Self::Time56(_) => ElementKind::Cp56,
            Self::Time24(_) => ElementKind::Cp24,
            Self::Time16(_) => ElementKind::Cp16,
        }
    }

    /// Encoded width in bytes.
    #[inline]
    pub const fn width(&self) -> usize {
        self.kind().width()
    }

    /// Write the element and return the number of bytes written.
    pub fn encode(&self, dst: &mut impl BufMut) -> usize {
        match self {
            Self::SinglePoint(e) => dst.put_u8(e.raw()),
            Self::DoublePoint(e) => dst.put_u8(e.raw()),
            Self::Quality(e) => dst.put_u8(e.raw()),
            Self::ProtectionQuality(e) => dst.put_u8(e.raw()),
            Self::StepPosition(e) => dst.put_u8(e.raw()),
            Self::Normalized(e) => dst.put_i16_le(e.raw()),
            Self::Scaled(e) => dst.put_i16_le(e.value()),
            Self::Float(e) => dst.put_u32_le(e.bits()),
            Self::Bitstring(e) => dst.put_u32_le(e.0),
            Self::StatusChange(e) => dst.put_u32_le(e.raw()),
            Self::Counter(e) => {
                dst.put_i32_le(e.counter());
                dst.put_u8(e.flags());
            }
            Self::SingleEvent(e) => dst.put_u8(e.raw()),
            Self::StartEvents(e) => dst.put_u8(e.raw()),
            Self::OutputCircuit(e) => dst.put_u8(e.raw()),
            Self::SingleCommand(e) => dst.put_u8(e.raw()),
            Self::DoubleCommand(e) => dst.put_u8(e.raw()),
            Self::StepCommand(e) => dst.put_u8(e.raw()),
            Self::SetpointQualifier(e) => dst.put_u8(e.raw()),
            Self::Interrogation(e) => dst.put_u8(e.0),
            Self::CounterInterrogation(e) => dst.put_u8(e.raw()),
            Self::MeasuredParameter(e) => dst.put_u8(e.raw()),
            Self::ParameterActivation(e) => dst.put_u8(e.0),
            Self::ResetProcess(e) => dst.put_u8(e.0),
            Self::Initialization(e) => dst.put_u8(e.raw()),
            Self::TestPattern(e) => dst.put_u16_le(e.raw()),
            Self::TestSequence(e) => dst.put_u16_le(e.0),
            Self::Time56(e) => dst.put_slice(&e.to_bytes()),
            Self::Time24(e) => dst.put_slice(&e.to_bytes()),
            Self::Time16(e) => dst.put_u16_le(e.millisecond()),
        }
        self.width()
    }

    /// Read one element of the given kind.
    ///
    /// Fails with [`Iec60870Error::InvalidAsdu`] if fewer than
    /// `kind.width()` bytes remain; nothing is consumed in that case.
    pub fn decode(kind: ElementKind, src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < kind.width() {
            return Err(Iec60870Error::invalid_asdu(format!(
                "truncated {:?} element: need {} bytes, have {}",
                kind,
                kind.width(),
                src.remaining()
            )));
        }
        let element = match kind {
            ElementKind::Siq => Self::SinglePoint(SinglePointInfo::from_raw(src.get_u8())),
            ElementKind::Diq => Self::DoublePoint(DoublePointInfo::from_raw(src.get_u8())),
            ElementKind::Qds => Self::Quality(QualityDescriptor::from_raw(src.get_u8())),
            ElementKind::Qdp => Self::ProtectionQuality(ProtectionQuality::from_raw(src.get_u8())),
            ElementKind::Vti => Self::StepPosition(StepPosition::from_raw(src.get_u8())),
            ElementKind::Nva => Self::Normalized(NormalizedValue::from_raw(src.get_i16_le())),
            ElementKind::Sva => Self::Scaled(ScaledValue(src.get_i16_le())),
            ElementKind::R32 => Self::Float(ShortFloat::from_bits(src.get_u32_le())),
            ElementKind::Bsi => Self::Bitstring(Bitstring32(src.get_u32_le())),
            ElementKind::Scd => Self::StatusChange(StatusChangeDetection::from_raw(src.get_u32_le())),
            ElementKind::Bcr => {
                let counter = src.get_i32_le();
                Self::Counter(BinaryCounterReading::from_raw(counter, src.get_u8()))
            }
            ElementKind::Sep => Self::SingleEvent(SingleEvent::from_raw(src.get_u8())),
            ElementKind::Spe => Self::StartEvents(StartEvents::from_raw(src.get_u8())),
            ElementKind::Oci => Self::OutputCircuit(OutputCircuitInfo::from_raw(src.get_u8())),
            ElementKind::Sco => Self::SingleCommand(SingleCommand::from_raw(src.get_u8())),
            ElementKind::Dco => Self::DoubleCommand(DoubleCommand::from_raw(src.get_u8())),
            ElementKind::Rco => Self::StepCommand(RegulatingStepCommand::from_raw(src.get_u8())),
            ElementKind::Qos => Self::SetpointQualifier(SetpointQualifier::from_raw(src.get_u8())),
            ElementKind::Qoi => Self::Interrogation(InterrogationQualifier(src.get_u8())),
            ElementKind::Qcc => Self::CounterInterrogation(CounterQualifier::from_raw(src.get_u8())),
            ElementKind::Qpm => {
                Self::MeasuredParameter(MeasuredParameterQualifier::from_raw(src.get_u8()))
            }
            ElementKind::Qpa => Self::ParameterActivation(ParameterActivationQualifier(src.get_u8())),
            ElementKind::Qrp => Self::ResetProcess(ResetProcessQualifier(src.get_u8())),
            ElementKind::Coi => Self::Initialization(InitializationCause::from_raw(src.get_u8())),
            ElementKind::Fbp => Self::TestPattern(FixedTestPattern::from_raw(src.get_u16_le())),
            ElementKind::Tsc => Self::TestSequence(TestSequenceCounter(src.get_u16_le())),
            ElementKind::Cp56 => {
                let mut bytes = [0u8; 7];
                src.copy_to_slice(&mut bytes);
                Self::Time56(Cp56Time2a::from_bytes(bytes))
            }
            ElementKind::Cp24 => {
                let mut bytes = [0u8; 3];
                src.copy_to_slice(&mut bytes);
                Self::Time24(Cp24Time2a::from_bytes(bytes))
            }
            ElementKind::Cp16 => Self::Time16(Cp16Time2a::from_raw(src.get_u16_le())),
        };
        Ok(element)
    }
}

macro_rules! impl_from_element {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for InformationElement {
                #[inline]
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

impl_from_element! {
    SinglePointInfo => SinglePoint,
    DoublePointInfo => DoublePoint,
    QualityDescriptor => Quality,
    ProtectionQuality => ProtectionQuality,
    StepPosition => StepPosition,
    NormalizedValue => Normalized,
    ScaledValue => Scaled,
    ShortFloat => Float,
    Bitstring32 => Bitstring,
    StatusChangeDetection => StatusChange,
    BinaryCounterReading => Counter,
    SingleEvent => SingleEvent,
    StartEvents => StartEvents,
    OutputCircuitInfo => OutputCircuit,
    SingleCommand => SingleCommand,
    DoubleCommand => DoubleCommand,
    RegulatingStepCommand => StepCommand,
    SetpointQualifier => SetpointQualifier,
    InterrogationQualifier => Interrogation,
    CounterQualifier => CounterInterrogation,
    MeasuredParameterQualifier => MeasuredParameter,
    ParameterActivationQualifier => ParameterActivation,
    ResetProcessQualifier => ResetProcess,
    InitializationCause => Initialization,
    FixedTestPattern => TestPattern,
    TestSequenceCounter => TestSequence,
    Cp56Time2a => Time56,
    Cp24Time2a => Time24,
    Cp16Time2a => Time16,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::quality::{DoublePointValue, Quality};
    use bytes::BytesMut;

    const ALL_KINDS: [ElementKind; 29] = [
        ElementKind::Siq,
        ElementKind::Diq,
        ElementKind::Qds,
        ElementKind::Qdp,
        ElementKind::Vti,
        ElementKind::Nva,
        ElementKind::Sva,
        ElementKind::R32,
        ElementKind::Bsi,
        ElementKind::Scd,
        ElementKind::Bcr,
        ElementKind::Sep,
        ElementKind::Spe,
        ElementKind::Oci,
        ElementKind::Sco,
        ElementKind::Dco,
        ElementKind::Rco,
        ElementKind::Qos,
        ElementKind::Qoi,
        ElementKind::Qcc,
        ElementKind::Qpm,
        ElementKind::Qpa,
        ElementKind::Qrp,
        ElementKind::Coi,
        ElementKind::Fbp,
        ElementKind::Tsc,
        ElementKind::Cp56,
        ElementKind::Cp24,
        ElementKind::Cp16,
    ];

    #[test]
    fn test_arbitrary_bytes_reencode_identically() {
        // Any byte pattern decodes and re-encodes unchanged, reserved bits included
        let patterns: [[u8; 7]; 4] = [
            [0x00; 7],
            [0xFF; 7],
            [0x55, 0xAA, 0x12, 0x34, 0x56, 0x78, 0x9A],
            [0x01, 0x80, 0x7F, 0xC0, 0xE5, 0x0F, 0x63],
        ];
        for kind in ALL_KINDS {
            for pattern in &patterns {
                let input = &pattern[..kind.width()];
                let mut src = input;
                let element = InformationElement::decode(kind, &mut src).unwrap();
                assert!(src.is_empty());
                assert_eq!(element.kind(), kind);

                let mut out = BytesMut::new();
                assert_eq!(element.encode(&mut out), kind.width());
                assert_eq!(&out[..], input, "{:?} changed on re-encode", kind);
            }
        }
    }

    #[test]
    fn test_typed_values_roundtrip() {
        let elements: Vec<InformationElement> = vec![
            SinglePointInfo::new(true, Quality::GOOD.set_invalid(true)).unwrap().into(),
            DoublePointInfo::new(DoublePointValue::Off, Quality::GOOD).unwrap().into(),
            NormalizedValue::new(-0.25).unwrap().into(),
            ScaledValue(-1234).into(),
            ShortFloat::new(230.5).into(),
            BinaryCounterReading::new(123_456, 3, false, true, false).unwrap().into(),
            Cp56Time2a::new(25, 1, 2, 3, 4, 5_006).unwrap().into(),
            Cp24Time2a::new(12, 34_000).unwrap().into(),
            FixedTestPattern::new().into(),
        ];
        for element in elements {
            let mut buf = BytesMut::new();
            element.encode(&mut buf);
            let decoded = InformationElement::decode(element.kind(), &mut buf.freeze()).unwrap();
            assert_eq!(decoded, element);
        }
    }

    #[test]
    fn test_little_endian_values() {
        let mut buf = BytesMut::new();
        InformationElement::from(ScaledValue(0x1234)).encode(&mut buf);
        assert_eq!(&buf[..], &[0x34, 0x12]);

        buf.clear();
        InformationElement::from(FixedTestPattern::new()).encode(&mut buf);
        assert_eq!(&buf[..], &[0xAA, 0x55]);
    }

    #[test]
    fn test_truncated_element() {
        let mut src: &[u8] = &[0x01, 0x02, 0x03];
        let err = InformationElement::decode(ElementKind::R32, &mut src).unwrap_err();
        assert!(matches!(err, Iec60870Error::InvalidAsdu(_)));
        // Nothing consumed
        assert_eq!(src.len(), 3);
    }

    #[test]
    fn test_row_width() {
        assert_eq!(
            ElementKind::row_width(&[ElementKind::R32, ElementKind::Qds, ElementKind::Cp56]),
            12
        );
        assert_eq!(ElementKind::row_width(&[]), 0);
    }
}
