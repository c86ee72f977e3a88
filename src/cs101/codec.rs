//! FT1.2 codec for tokio.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::frame::{
    checksum, ControlField, LinkFrame, END_BYTE, FIXED_START, SINGLE_ACK, SINGLE_NACK,
    VARIABLE_START,
};
use crate::error::{Iec60870Error, Result};

/// Largest value of the variable frame length octet.
pub const MAX_FRAME_LENGTH: usize = 255;

/// FT1.2 codec.
///
/// On a malformed frame the decoder consumes the offending bytes before
/// returning the framing error, so a tolerant reader can keep decoding.
#[derive(Debug, Clone, Copy)]
pub struct Ft12Codec {
    address_length: usize,
}

impl Ft12Codec {
    /// Create a codec for the given link address width (0, 1 or 2 bytes).
    pub fn new(address_length: u8) -> Result<Self> {
        if address_length > 2 {
            return Err(Iec60870Error::config(format!(
                "link address length must be 0..=2, got {}",
                address_length
            )));
        }
        Ok(Self {
            address_length: address_length as usize,
        })
    }

    /// Link address width in bytes.
    #[inline]
    pub fn address_length(&self) -> usize {
        self.address_length
    }

    /// Largest ASDU a variable frame can carry.
    #[inline]
    pub fn max_asdu_length(&self) -> usize {
        MAX_FRAME_LENGTH - 1 - self.address_length
    }

    fn read_address(&self, bytes: &[u8]) -> u16 {
        bytes[..self.address_length]
            .iter()
            .rev()
            .fold(0u16, |acc, byte| (acc << 8) | *byte as u16)
    }

    fn check_address(&self, address: u16) -> Result<()> {
        let max = match self.address_length {
            0 => 0,
            1 => 0xFF,
            _ => 0xFFFF,
        };
        if address > max {
            return Err(Iec60870Error::domain(format!(
                "link address {} does not fit {} byte(s)",
                address, self.address_length
            )));
        }
        Ok(())
    }

    fn decode_fixed(&self, src: &mut BytesMut) -> Result<Option<LinkFrame>> {
        // 10h C A.. CS 16h
        let total = 4 + self.address_length;
        if src.len() < total {
            return Ok(None);
        }
        let frame = src.split_to(total);
        let body = &frame[1..total - 2];

        if frame[total - 1] != END_BYTE {
            return Err(Iec60870Error::framing(format!(
                "fixed frame end byte 0x{:02X}",
                frame[total - 1]
            )));
        }
        if checksum(body) != frame[total - 2] {
            return Err(Iec60870Error::framing("fixed frame checksum mismatch"));
        }

        Ok(Some(LinkFrame::Fixed {
            control: ControlField::from_u8(body[0])?,
            address: self.read_address(&body[1..]),
        }))
    }

    fn decode_variable(&self, src: &mut BytesMut) -> Result<Option<LinkFrame>> {
        // 68h L L 68h C A.. ASDU.. CS 16h
        if src.len() < 4 {
            return Ok(None);
        }
        let length = src[1] as usize;
        if src[2] as usize != length || src[3] != VARIABLE_START {
            src.advance(4);
            return Err(Iec60870Error::framing("variable frame header mismatch"));
        }
        if length < 1 + self.address_length {
            src.advance(4);
            return Err(Iec60870Error::framing(format!(
                "variable frame length {} too short",
                length
            )));
        }

        let total = 4 + length + 2;
        if src.len() < total {
            src.reserve(total - src.len());
            return Ok(None);
        }
        let frame = src.split_to(total).freeze();
        let body = frame.slice(4..4 + length);

        if frame[total - 1] != END_BYTE {
            return Err(Iec60870Error::framing(format!(
                "variable frame end byte 0x{:02X}",
                frame[total - 1]
            )));
        }
        if checksum(&body) != frame[total - 2] {
            return Err(Iec60870Error::framing("variable frame checksum mismatch"));
        }

        Ok(Some(LinkFrame::Variable {
            control: ControlField::from_u8(body[0])?,
            address: self.read_address(&body[1..]),
            asdu: body.slice(1 + self.address_length..),
        }))
    }
}

impl Default for Ft12Codec {
    fn default() -> Self {
        Self { address_length: 1 }
    }
}

impl Decoder for Ft12Codec {
    type Item = LinkFrame;
    type Error = Iec60870Error;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Self::Item>> {
        let Some(&start) = src.first() else {
            return Ok(None);
        };
        match start {
            SINGLE_ACK => {
                src.advance(1);
                Ok(Some(LinkFrame::SingleAck))
            }
            SINGLE_NACK => {
                src.advance(1);
                Ok(Some(LinkFrame::SingleNack))
            }
            FIXED_START => self.decode_fixed(src),
            VARIABLE_START => self.decode_variable(src),
            other => {
                src.advance(1);
                Err(Iec60870Error::framing(format!(
                    "invalid start byte 0x{:02X}",
                    other
                )))
            }
        }
    }
}

impl Encoder<LinkFrame> for Ft12Codec {
    type Error = Iec60870Error;

    fn encode(&mut self, item: LinkFrame, dst: &mut BytesMut) -> Result<()> {
        match item {
            LinkFrame::SingleAck => dst.put_u8(SINGLE_ACK),
            LinkFrame::SingleNack => dst.put_u8(SINGLE_NACK),
            LinkFrame::Fixed { control, address } => {
                self.check_address(address)?;
                let mut body = [0u8; 3];
                body[0] = control.as_u8();
                body[1..1 + self.address_length]
                    .copy_from_slice(&address.to_le_bytes()[..self.address_length]);
                let body = &body[..1 + self.address_length];

                dst.reserve(4 + self.address_length);
                dst.put_u8(FIXED_START);
                dst.put_slice(body);
                dst.put_u8(checksum(body));
                dst.put_u8(END_BYTE);
            }
            LinkFrame::Variable {
                control,
                address,
                asdu,
            } => {
                self.check_address(address)?;
                let length = 1 + self.address_length + asdu.len();
                if length > MAX_FRAME_LENGTH {
                    return Err(Iec60870Error::invalid_asdu(format!(
                        "ASDU of {} bytes exceeds {}",
                        asdu.len(),
                        self.max_asdu_length()
                    )));
                }

                dst.reserve(length + 6);
                dst.put_slice(&[VARIABLE_START, length as u8, length as u8, VARIABLE_START]);
                let body_start = dst.len();
                dst.put_u8(control.as_u8());
                dst.put_slice(&address.to_le_bytes()[..self.address_length]);
                dst.put_slice(&asdu);
                let sum = checksum(&dst[body_start..]);
                dst.put_u8(sum);
                dst.put_u8(END_BYTE);
            }
        }
        Ok(())
    }
}
