//! Information objects: an address plus one or more element rows.

use bytes::{Buf, BufMut};

use super::element::{ElementKind, InformationElement};
use crate::error::{Iec60870Error, Result};

/// Information Object Address (IOA).
///
/// Encoded little-endian in 1, 2 or 3 bytes depending on the connection's
/// application layer parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Ioa(pub u32);

impl Ioa {
    /// Create IOA from u32 (lower 24 bits).
    #[inline]
    pub const fn new(value: u32) -> Self {
        Self(value & 0x00FF_FFFF)
    }

    /// Get the raw value.
    #[inline]
    pub const fn value(&self) -> u32 {
        self.0
    }

    /// Write the address using `width` bytes.
    pub(crate) fn encode(&self, width: usize, dst: &mut impl BufMut) {
        dst.put_uint_le(self.0 as u64, width);
    }

    /// Read an address of `width` bytes.
    pub(crate) fn decode(width: usize, src: &mut impl Buf) -> Result<Self> {
        if src.remaining() < width {
            return Err(Iec60870Error::invalid_asdu("IOA too short"));
        }
        Ok(Self(src.get_uint_le(width) as u32))
    }
}

impl std::fmt::Display for Ioa {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<u32> for Ioa {
    fn from(value: u32) -> Self {
        Self::new(value)
    }
}

/// One information object.
///
/// Without the sequence flag an object carries exactly one row. With the
/// sequence flag a single object carries all rows of the ASDU and row `i`
/// implicitly addresses `address + i`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InformationObject {
    address: Ioa,
    rows: Vec<Vec<InformationElement>>,
}

impl InformationObject {
    /// Create an object with a single row.
    pub fn new(address: impl Into<Ioa>, row: Vec<InformationElement>) -> Self {
        Self {
            address: address.into(),
            rows: vec![row],
        }
    }

    /// Create an object holding consecutive rows starting at `address`.
    pub fn sequence(address: impl Into<Ioa>, rows: Vec<Vec<InformationElement>>) -> Self {
        Self {
            address: address.into(),
            rows,
        }
    }

    /// Address of the object (of the first row for sequences).
    #[inline]
    pub fn address(&self) -> Ioa {
        self.address
    }

    /// All element rows.
    #[inline]
    pub fn rows(&self) -> &[Vec<InformationElement>] {
        &self.rows
    }

    /// Elements of the first row.
    #[inline]
    pub fn elements(&self) -> &[InformationElement] {
        self.rows.first().map(Vec::as_slice).unwrap_or(&[])
    }

    /// Address of row `index`.
    #[inline]
    pub fn row_address(&self, index: usize) -> u32 {
        self.address.0 + index as u32
    }

    /// Rows paired with their addresses.
    pub fn iter_rows(&self) -> impl Iterator<Item = (u32, &[InformationElement])> + '_ {
        self.rows
            .iter()
            .enumerate()
            .map(move |(i, row)| (self.row_address(i), row.as_slice()))
    }

    /// Check every row against a layout.
    pub(crate) fn check_layout(&self, layout: &[ElementKind]) -> Result<()> {
        for (index, row) in self.rows.iter().enumerate() {
            let matches = row.len() == layout.len()
                && row.iter().zip(layout).all(|(element, kind)| element.kind() == *kind);
            if !matches {
                let shape: Vec<ElementKind> = row.iter().map(InformationElement::kind).collect();
                return Err(Iec60870Error::domain(format!(
                    "row {} at IOA {} has shape {:?}, expected {:?}",
                    index,
                    self.row_address(index),
                    shape,
                    layout
                )));
            }
        }
        Ok(())
    }

    pub(crate) fn encode_row(row: &[InformationElement], dst: &mut impl BufMut) -> usize {
        row.iter().map(|element| element.encode(dst)).sum()
    }

    pub(crate) fn decode_row(layout: &[ElementKind], src: &mut impl Buf) -> Result<Vec<InformationElement>> {
        layout
            .iter()
            .map(|kind| InformationElement::decode(*kind, src))
            .collect()
    }
}
