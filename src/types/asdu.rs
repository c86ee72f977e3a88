//! ASDU (Application Service Data Unit).
//!
//! The ASDU carries the actual data (measurements, commands, etc.) and is
//! shared by both the serial and the TCP binding. Field widths come from
//! [`AppLayerParameters`] and are never stored in the message itself.

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::command::{CounterQualifier, InterrogationQualifier};
use super::element::InformationElement;
use super::object::{InformationObject, Ioa};
use super::time::Cp56Time2a;
use super::{Cot, TypeId};
use crate::config::AppLayerParameters;
use crate::error::{Iec60870Error, Result};

/// Largest number of rows the VSQ can express.
pub const MAX_ROWS: usize = 127;

/// Variable Structure Qualifier (VSQ).
///
/// Defines the structure of information objects in an ASDU.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Vsq {
    /// Number of objects (SQ=0) or rows of the single object (SQ=1)
    pub count: u8,
    /// If true, addresses are sequential (SQ=1)
    pub sequence: bool,
}

impl Vsq {
    /// Create a new VSQ.
    #[inline]
    pub const fn new(count: u8, sequence: bool) -> Self {
        Self { count, sequence }
    }

    /// Parse VSQ from byte.
    #[inline]
    pub const fn from_u8(value: u8) -> Self {
        Self {
            count: value & 0x7F,
            sequence: (value & 0x80) != 0,
        }
    }

    /// Encode VSQ to byte.
    #[inline]
    pub const fn as_u8(&self) -> u8 {
        (self.count & 0x7F) | if self.sequence { 0x80 } else { 0 }
    }
}

/// ASDU header (data unit identifier).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AsduHeader {
    /// Type identification
    pub type_id: TypeId,
    /// Sequence flag (SQ) of the variable structure qualifier
    pub sequence: bool,
    /// Cause of transmission
    pub cot: Cot,
    /// Test flag (if true, this is a test ASDU)
    pub test: bool,
    /// Negative flag (if true, negative confirmation)
    pub negative: bool,
    /// Originator address (0 if not used)
    pub originator: u8,
    /// Common address of ASDU (station address)
    pub common_address: u16,
}

impl AsduHeader {
    /// Create a new ASDU header.
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self {
            type_id,
            sequence: false,
            cot,
            test: false,
            negative: false,
            originator: 0,
            common_address,
        }
    }

    fn cot_byte(&self) -> u8 {
        let mut byte = self.cot.as_u8();
        if self.test {
            byte |= 0x80;
        }
        if self.negative {
            byte |= 0x40;
        }
        byte
    }

    fn encode(&self, count: u8, params: &AppLayerParameters, dst: &mut impl BufMut) {
        dst.put_u8(self.type_id.as_u8());
        dst.put_u8(Vsq::new(count, self.sequence).as_u8());
        dst.put_u8(self.cot_byte());
        if params.size_of_cot() == 2 {
            dst.put_u8(self.originator);
        }
        dst.put_uint_le(self.common_address as u64, params.size_of_ca());
    }

    fn decode(params: &AppLayerParameters, src: &mut impl Buf) -> Result<(Self, Vsq)> {
        if src.remaining() < params.header_size() {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU header too short: {} < {}",
                src.remaining(),
                params.header_size()
            )));
        }
        let type_id = TypeId::from_u8(src.get_u8())?;
        let vsq = Vsq::from_u8(src.get_u8());
        let cot_byte = src.get_u8();
        let cot = Cot::from_u8(cot_byte)?;
        let originator = if params.size_of_cot() == 2 { src.get_u8() } else { 0 };
        let common_address = src.get_uint_le(params.size_of_ca()) as u16;
        let header = Self {
            type_id,
            sequence: vsq.sequence,
            cot,
            test: cot_byte & 0x80 != 0,
            negative: cot_byte & 0x40 != 0,
            originator,
            common_address,
        };
        Ok((header, vsq))
    }
}

/// Complete ASDU.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Asdu {
    /// ASDU header
    pub header: AsduHeader,
    objects: Vec<InformationObject>,
}

impl Asdu {
    /// Create an empty ASDU.
    pub fn new(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        Self::from_header(AsduHeader::new(type_id, cot, common_address))
    }

    /// Create an empty ASDU from a header.
    pub fn from_header(header: AsduHeader) -> Self {
        Self {
            header,
            objects: Vec::new(),
        }
    }

    /// Create an empty ASDU with the sequence flag set.
    pub fn new_sequence(type_id: TypeId, cot: Cot, common_address: u16) -> Self {
        let mut asdu = Self::new(type_id, cot, common_address);
        asdu.header.sequence = true;
        asdu
    }

    /// Set the test flag.
    pub fn with_test(mut self, test: bool) -> Self {
        self.header.test = test;
        self
    }

    /// Set the P/N flag.
    pub fn with_negative(mut self, negative: bool) -> Self {
        self.header.negative = negative;
        self
    }

    /// Set the originator address.
    pub fn with_originator(mut self, originator: u8) -> Self {
        self.header.originator = originator;
        self
    }

    /// Add an information object.
    ///
    /// Every row must match the row layout of the type identification.
    /// Sequence ASDUs take exactly one object; other ASDUs take one row per
    /// object. The total row count is limited to 127.
    pub fn push_object(&mut self, object: InformationObject) -> Result<()> {
        object.check_layout(self.header.type_id.row_layout())?;
        if self.header.sequence {
            if !self.objects.is_empty() {
                return Err(Iec60870Error::domain(
                    "sequence ASDU holds a single information object",
                ));
            }
        } else if object.rows().len() != 1 {
            return Err(Iec60870Error::domain(format!(
                "non-sequence information object must have one row, got {}",
                object.rows().len()
            )));
        }
        if self.row_count() + object.rows().len() > MAX_ROWS {
            return Err(Iec60870Error::domain(format!(
                "ASDU exceeds {} information elements",
                MAX_ROWS
            )));
        }
        self.objects.push(object);
        Ok(())
    }

    /// Builder variant of [`push_object`](Self::push_object).
    pub fn with_object(mut self, object: InformationObject) -> Result<Self> {
        self.push_object(object)?;
        Ok(self)
    }

    /// Type identification.
    #[inline]
    pub fn type_id(&self) -> TypeId {
        self.header.type_id
    }

    /// Cause of transmission.
    #[inline]
    pub fn cot(&self) -> Cot {
        self.header.cot
    }

    /// Common address.
    #[inline]
    pub fn common_address(&self) -> u16 {
        self.header.common_address
    }

    /// Information objects.
    #[inline]
    pub fn objects(&self) -> &[InformationObject] {
        &self.objects
    }

    /// Number of element rows (the VSQ count).
    pub fn row_count(&self) -> usize {
        self.objects.iter().map(|obj| obj.rows().len()).sum()
    }

    /// Iterate over every row with its resolved address.
    pub fn iter_rows(&self) -> impl Iterator<Item = (u32, &[InformationElement])> + '_ {
        self.objects.iter().flat_map(InformationObject::iter_rows)
    }

    /// Check that the addresses fit the configured field widths.
    pub fn validate(&self, params: &AppLayerParameters) -> Result<()> {
        if params.size_of_cot() == 1 && self.header.originator != 0 {
            return Err(Iec60870Error::domain(format!(
                "originator address {} needs a 2-byte COT field",
                self.header.originator
            )));
        }
        if self.header.common_address == 0 {
            return Err(Iec60870Error::domain("common address 0 is not used"));
        }
        if self.header.common_address > params.max_common_address() {
            return Err(Iec60870Error::domain(format!(
                "common address {} exceeds {}-byte field",
                self.header.common_address,
                params.size_of_ca()
            )));
        }
        for object in &self.objects {
            let last = object.row_address(object.rows().len().saturating_sub(1));
            if object.address().value() > params.max_ioa() || last > params.max_ioa() {
                return Err(Iec60870Error::domain(format!(
                    "IOA {} exceeds {}-byte field",
                    last,
                    params.size_of_ioa()
                )));
            }
        }
        Ok(())
    }

    /// Calculate the encoded length of this ASDU.
    pub fn encoded_len(&self, params: &AppLayerParameters) -> usize {
        let row_width = self.header.type_id.row_width();
        let addresses = if self.header.sequence {
            self.objects.len().min(1)
        } else {
            self.objects.len()
        };
        params.header_size() + addresses * params.size_of_ioa() + self.row_count() * row_width
    }

    /// Encode the ASDU and return the number of bytes written.
    ///
    /// Nothing is written if validation fails.
    pub fn encode(&self, params: &AppLayerParameters, dst: &mut impl BufMut) -> Result<usize> {
        self.validate(params)?;
        self.header.encode(self.row_count() as u8, params, dst);
        let mut written = params.header_size();
        for object in &self.objects {
            object.address().encode(params.size_of_ioa(), dst);
            written += params.size_of_ioa();
            for row in object.rows() {
                written += InformationObject::encode_row(row, dst);
            }
        }
        Ok(written)
    }

    /// Encode into a fresh buffer.
    pub fn to_bytes(&self, params: &AppLayerParameters) -> Result<Bytes> {
        let mut buf = BytesMut::with_capacity(self.encoded_len(params));
        self.encode(params, &mut buf)?;
        Ok(buf.freeze())
    }

    /// Decode an ASDU occupying exactly `data`.
    ///
    /// Truncated input and trailing bytes are rejected.
    pub fn decode(params: &AppLayerParameters, data: &[u8]) -> Result<Self> {
        let mut src = data;
        let (header, vsq) = AsduHeader::decode(params, &mut src)?;
        let layout = header.type_id.row_layout();
        let mut asdu = Self::from_header(header);
        let count = vsq.count as usize;

        if vsq.sequence {
            if count > 0 {
                let address = Ioa::decode(params.size_of_ioa(), &mut src)?;
                let rows = (0..count)
                    .map(|_| InformationObject::decode_row(layout, &mut src))
                    .collect::<Result<Vec<_>>>()?;
                asdu.objects.push(InformationObject::sequence(address, rows));
            }
        } else {
            for _ in 0..count {
                let address = Ioa::decode(params.size_of_ioa(), &mut src)?;
                let row = InformationObject::decode_row(layout, &mut src)?;
                asdu.objects.push(InformationObject::new(address, row));
            }
        }

        if src.has_remaining() {
            return Err(Iec60870Error::invalid_asdu(format!(
                "{} trailing bytes after {} rows of {}",
                src.remaining(),
                count,
                asdu.header.type_id
            )));
        }
        Ok(asdu)
    }

    fn single(type_id: TypeId, cot: Cot, common_address: u16, ioa: u32, row: Vec<InformationElement>) -> Result<Self> {
        Self::new(type_id, cot, common_address).with_object(InformationObject::new(ioa, row))
    }

    /// Create a station or group interrogation command (C_IC_NA_1).
    pub fn interrogation_command(common_address: u16, qoi: InterrogationQualifier) -> Result<Self> {
        Self::single(
            TypeId::InterrogationCommand,
            Cot::Activation,
            common_address,
            0,
            vec![qoi.into()],
        )
    }

    /// Create a counter interrogation command (C_CI_NA_1).
    pub fn counter_interrogation_command(common_address: u16, qcc: CounterQualifier) -> Result<Self> {
        Self::single(
            TypeId::CounterInterrogation,
            Cot::Activation,
            common_address,
            0,
            vec![qcc.into()],
        )
    }

    /// Create a clock synchronization command (C_CS_NA_1).
    pub fn clock_sync_command(common_address: u16, time: Cp56Time2a) -> Result<Self> {
        Self::single(
            TypeId::ClockSync,
            Cot::Activation,
            common_address,
            0,
            vec![time.into()],
        )
    }

    /// Create a read command (C_RD_NA_1) for one information object.
    pub fn read_command(common_address: u16, ioa: u32) -> Result<Self> {
        Self::single(TypeId::ReadCommand, Cot::Request, common_address, ioa, Vec::new())
    }

    /// Create a command ASDU with cause Activation from one row.
    pub fn command(type_id: TypeId, common_address: u16, ioa: u32, row: Vec<InformationElement>) -> Result<Self> {
        Self::single(type_id, Cot::Activation, common_address, ioa, row)
    }

    /// Mirror this ASDU as a confirmation with the given cause.
    ///
    /// Type identification, objects and addresses are kept.
    pub fn mirror(&self, cot: Cot, negative: bool) -> Self {
        let mut asdu = self.clone();
        asdu.header.cot = cot;
        asdu.header.negative = negative;
        asdu
    }
}

impl std::fmt::Display for Asdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} CA={} COT={}{} rows={}",
            self.header.type_id,
            self.header.common_address,
            self.header.cot,
            if self.header.negative { " (neg)" } else { "" },
            self.row_count()
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::command::{DoubleCommand, DoubleCommandState, SetpointQualifier};
    use crate::types::measured::{NormalizedValue, ShortFloat};
    use crate::types::quality::{Quality, QualityDescriptor, SinglePointInfo};

    fn qds() -> InformationElement {
        QualityDescriptor::new(Quality::GOOD).unwrap().into()
    }

    #[test]
    fn test_vsq() {
        let vsq = Vsq::from_u8(0x85);
        assert_eq!(vsq.count, 5);
        assert!(vsq.sequence);
        assert_eq!(vsq.as_u8(), 0x85);
    }

    #[test]
    fn test_interrogation_wire_format() {
        let asdu = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
        let bytes = asdu.to_bytes(&AppLayerParameters::iec104()).unwrap();
        assert_eq!(&bytes[..], &[100, 0x01, 0x06, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 20]);
        assert_eq!(Asdu::decode(&AppLayerParameters::iec104(), &bytes).unwrap(), asdu);
    }

    #[test]
    fn test_narrow_profile_wire_format() {
        let params = AppLayerParameters::iec101();
        let asdu = Asdu::interrogation_command(5, InterrogationQualifier::STATION).unwrap();
        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(&bytes[..], &[100, 0x01, 0x06, 0x05, 0x00, 0x00, 20]);
        let decoded = Asdu::decode(&params, &bytes).unwrap();
        assert_eq!(decoded.header.originator, 0);
        assert_eq!(decoded, asdu);
    }

    #[test]
    fn test_originator_needs_wide_cot() {
        let asdu = Asdu::interrogation_command(1, InterrogationQualifier::STATION)
            .unwrap()
            .with_originator(5);
        assert!(matches!(
            asdu.to_bytes(&AppLayerParameters::iec101()),
            Err(Iec60870Error::Domain(_))
        ));

        let params = AppLayerParameters::iec104();
        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(Asdu::decode(&params, &bytes).unwrap().header.originator, 5);
    }

    #[test]
    fn test_cot_flags_and_originator() {
        let params = AppLayerParameters::iec104();
        let asdu = Asdu::interrogation_command(0x1234, InterrogationQualifier::STATION)
            .unwrap()
            .mirror(Cot::ActivationConfirm, true)
            .with_test(true)
            .with_originator(7);
        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(bytes[2], 0x80 | 0x40 | 7);
        assert_eq!(bytes[3], 7);
        assert_eq!(&bytes[4..6], &[0x34, 0x12]);

        let decoded = Asdu::decode(&params, &bytes).unwrap();
        assert!(decoded.header.test);
        assert!(decoded.header.negative);
        assert_eq!(decoded.header.originator, 7);
        assert_eq!(decoded, asdu);
    }

    #[test]
    fn test_sequence_roundtrip() {
        let params = AppLayerParameters::iec104();
        let rows = (0..3)
            .map(|i| vec![ShortFloat::new(i as f32 * 1.5).into(), qds()])
            .collect();
        let mut asdu = Asdu::new_sequence(TypeId::MeasuredFloat, Cot::Periodic, 1);
        asdu.push_object(InformationObject::sequence(1000u32, rows)).unwrap();

        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(bytes[1], 0x83);
        // header + one IOA + 3 rows of 5 bytes
        assert_eq!(bytes.len(), 6 + 3 + 15);
        assert_eq!(bytes.len(), asdu.encoded_len(&params));

        let decoded = Asdu::decode(&params, &bytes).unwrap();
        assert_eq!(decoded, asdu);
        let addresses: Vec<u32> = decoded.iter_rows().map(|(a, _)| a).collect();
        assert_eq!(addresses, vec![1000, 1001, 1002]);
    }

    #[test]
    fn test_multiple_objects_roundtrip() {
        let params = AppLayerParameters::new(2, 2, 2).unwrap();
        let mut asdu = Asdu::new(TypeId::SinglePoint, Cot::Spontaneous, 3);
        for ioa in [10u32, 20, 30] {
            let siq = SinglePointInfo::new(ioa == 20, Quality::GOOD).unwrap();
            asdu.push_object(InformationObject::new(ioa, vec![siq.into()])).unwrap();
        }
        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(bytes[1], 0x03);
        assert_eq!(bytes.len(), 6 + 3 * (2 + 1));
        assert_eq!(Asdu::decode(&params, &bytes).unwrap(), asdu);
    }

    #[test]
    fn test_layout_mismatch_rejected() {
        let mut asdu = Asdu::new(TypeId::SetpointNormalized, Cot::Activation, 1);
        let bad = InformationObject::new(1u32, vec![ShortFloat::new(1.0).into()]);
        assert!(matches!(asdu.push_object(bad), Err(Iec60870Error::Domain(_))));

        let good = InformationObject::new(
            1u32,
            vec![
                NormalizedValue::new(0.5).unwrap().into(),
                SetpointQualifier::new(0, false).unwrap().into(),
            ],
        );
        assert!(asdu.push_object(good).is_ok());
    }

    #[test]
    fn test_sequence_rules() {
        let row = || {
            vec![DoubleCommand::new(DoubleCommandState::On, false, 0)
                .unwrap()
                .into()]
        };
        let mut asdu = Asdu::new(TypeId::DoubleCommand, Cot::Activation, 1);
        let multi = InformationObject::sequence(1u32, vec![row(), row()]);
        assert!(asdu.push_object(multi).is_err());

        let mut seq = Asdu::new_sequence(TypeId::DoubleCommand, Cot::Activation, 1);
        seq.push_object(InformationObject::sequence(1u32, vec![row(), row()])).unwrap();
        assert!(seq.push_object(InformationObject::new(5u32, row())).is_err());
    }

    #[test]
    fn test_row_limit() {
        let mut asdu = Asdu::new_sequence(TypeId::MeasuredNormalizedNoQuality, Cot::Periodic, 1);
        let rows = (0..=MAX_ROWS)
            .map(|_| vec![NormalizedValue::from_raw(0).into()])
            .collect();
        assert!(asdu.push_object(InformationObject::sequence(1u32, rows)).is_err());
    }

    #[test]
    fn test_address_width_checked_at_encode() {
        let params = AppLayerParameters::iec101();
        let asdu = Asdu::read_command(300, 1).unwrap();
        assert!(matches!(
            asdu.to_bytes(&params),
            Err(Iec60870Error::Domain(_))
        ));

        let asdu = Asdu::read_command(1, 0x1_0000).unwrap();
        assert!(asdu.to_bytes(&params).is_err());
        assert!(asdu.to_bytes(&AppLayerParameters::iec104()).is_ok());
    }

    #[test]
    fn test_common_address_zero_rejected() {
        let asdu = Asdu::interrogation_command(0, InterrogationQualifier::STATION).unwrap();
        for params in [AppLayerParameters::iec101(), AppLayerParameters::iec104()] {
            assert!(matches!(asdu.to_bytes(&params), Err(Iec60870Error::Domain(_))));
        }
    }

    #[test]
    fn test_truncated_rejected() {
        let params = AppLayerParameters::iec104();
        let asdu = Asdu::clock_sync_command(1, Cp56Time2a::new(24, 1, 1, 0, 0, 0).unwrap()).unwrap();
        let bytes = asdu.to_bytes(&params).unwrap();
        for len in 0..bytes.len() {
            assert!(
                Asdu::decode(&params, &bytes[..len]).is_err(),
                "length {} should fail",
                len
            );
        }
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let params = AppLayerParameters::iec104();
        let mut bytes = Asdu::read_command(1, 5).unwrap().to_bytes(&params).unwrap().to_vec();
        bytes.push(0);
        assert!(matches!(
            Asdu::decode(&params, &bytes),
            Err(Iec60870Error::InvalidAsdu(_))
        ));
    }

    #[test]
    fn test_unknown_type_and_cot() {
        let params = AppLayerParameters::iec104();
        assert!(matches!(
            Asdu::decode(&params, &[120, 0x01, 0x06, 0, 1, 0]),
            Err(Iec60870Error::UnknownTypeId(120))
        ));
        assert!(matches!(
            Asdu::decode(&params, &[100, 0x00, 0x0E, 0, 1, 0]),
            Err(Iec60870Error::UnknownCot(14))
        ));
    }

    #[test]
    fn test_read_command_empty_row() {
        let params = AppLayerParameters::iec104();
        let asdu = Asdu::read_command(1, 0x010203).unwrap();
        let bytes = asdu.to_bytes(&params).unwrap();
        assert_eq!(&bytes[6..], &[0x03, 0x02, 0x01]);
        assert_eq!(Asdu::decode(&params, &bytes).unwrap(), asdu);
    }
}
