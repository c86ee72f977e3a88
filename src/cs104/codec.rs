//! IEC 60870-5-104 codec for tokio.
//!
//! This module provides a codec implementation for encoding and decoding
//! IEC 104 APDUs using the tokio-util codec framework.

use bytes::{Buf, BufMut, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use super::apci::{Apci, UFunction, MAX_APDU_LENGTH, MAX_ASDU_LENGTH, MIN_APDU_LENGTH, START_BYTE};
use crate::config::AppLayerParameters;
use crate::error::Iec60870Error;
use crate::types::Asdu;

/// An IEC 104 APDU (Application Protocol Data Unit).
///
/// Contains the APCI header and, for I-frames, the ASDU.
#[derive(Debug, Clone, PartialEq)]
pub struct Apdu {
    /// APCI (Application Protocol Control Information)
    pub apci: Apci,
    /// ASDU (Application Service Data Unit) - only present in I-frames
    pub asdu: Option<Asdu>,
}

impl Apdu {
    /// Create a new I-frame APDU with ASDU.
    pub fn i_frame(send_seq: u16, recv_seq: u16, asdu: Asdu) -> Self {
        Self {
            apci: Apci::i_frame(send_seq, recv_seq),
            asdu: Some(asdu),
        }
    }

    /// Create a new S-frame APDU.
    pub fn s_frame(recv_seq: u16) -> Self {
        Self {
            apci: Apci::s_frame(recv_seq),
            asdu: None,
        }
    }

    /// Create a new U-frame APDU.
    pub fn u_frame(function: UFunction) -> Self {
        Self {
            apci: Apci::u_frame(function),
            asdu: None,
        }
    }
}

impl std::fmt::Display for Apdu {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.apci)?;
        if let Some(asdu) = &self.asdu {
            write!(f, " [{}]", asdu)?;
        }
        Ok(())
    }
}

/// IEC 60870-5-104 codec.
///
/// Decoding is strict: a wrong start byte, a length octet outside 4..=253,
/// an I-frame without ASDU or an S/U-frame with payload is a framing error.
/// ASDUs are decoded with the connection's application layer parameters.
///
/// # Example
///
/// ```rust,ignore
/// use tokio_util::codec::Framed;
/// use voltage_iec60870::cs104::{Apdu, Iec104Codec};
///
/// let stream = TcpStream::connect("192.168.1.100:2404").await?;
/// let mut framed = Framed::new(stream, Iec104Codec::new(AppLayerParameters::iec104()));
///
/// framed.send(Apdu::u_frame(UFunction::StartDtAct)).await?;
/// while let Some(apdu) = framed.next().await {
///     println!("Received: {}", apdu?);
/// }
/// ```
#[derive(Debug, Clone, Default)]
pub struct Iec104Codec {
    params: AppLayerParameters,
}

impl Iec104Codec {
    /// Create a new IEC 104 codec.
    pub fn new(params: AppLayerParameters) -> Self {
        Self { params }
    }

    /// Application layer parameters used for ASDUs.
    pub fn params(&self) -> &AppLayerParameters {
        &self.params
    }
}

impl Decoder for Iec104Codec {
    type Item = Apdu;
    type Error = Iec60870Error;

    fn decode(&mut self, src: &mut BytesMut) -> std::result::Result<Option<Self::Item>, Self::Error> {
        if src.is_empty() {
            return Ok(None);
        }
        if src[0] != START_BYTE {
            let byte = src[0];
            src.advance(1);
            return Err(Iec60870Error::framing(format!("invalid start byte 0x{:02X}", byte)));
        }
        if src.len() < 2 {
            return Ok(None);
        }

        let length = src[1] as usize;
        if !(MIN_APDU_LENGTH..=MAX_APDU_LENGTH).contains(&length) {
            src.advance(2);
            return Err(Iec60870Error::framing(format!("invalid APDU length {}", length)));
        }

        let total_length = 2 + length;
        if src.len() < total_length {
            src.reserve(total_length - src.len());
            return Ok(None);
        }

        // [0x68] [length] [control1..4] [ASDU...]
        let frame = src.split_to(total_length);
        let apci = Apci::parse(&frame[2..6])?;
        let payload = &frame[6..];

        let asdu = match (apci.is_i_frame(), payload.is_empty()) {
            (true, false) => Some(Asdu::decode(&self.params, payload)?),
            (true, true) => return Err(Iec60870Error::framing("I-frame without ASDU")),
            (false, true) => None,
            (false, false) => {
                return Err(Iec60870Error::framing(format!(
                    "{} carries {} unexpected bytes",
                    apci,
                    payload.len()
                )))
            }
        };

        Ok(Some(Apdu { apci, asdu }))
    }
}

impl Encoder<Apdu> for Iec104Codec {
    type Error = Iec60870Error;

    fn encode(&mut self, item: Apdu, dst: &mut BytesMut) -> std::result::Result<(), Self::Error> {
        let asdu = match (&item.asdu, item.apci.is_i_frame()) {
            (Some(asdu), true) => Some(asdu),
            (None, false) => None,
            _ => {
                return Err(Iec60870Error::protocol(format!(
                    "{} does not match its payload",
                    item.apci
                )))
            }
        };

        let asdu_len = asdu.map(|a| a.encoded_len(&self.params)).unwrap_or(0);
        if asdu_len > MAX_ASDU_LENGTH {
            return Err(Iec60870Error::invalid_asdu(format!(
                "ASDU of {} bytes exceeds {}",
                asdu_len, MAX_ASDU_LENGTH
            )));
        }

        // Encode the ASDU first so a validation failure leaves dst untouched
        let mut body = BytesMut::with_capacity(asdu_len);
        if let Some(asdu) = asdu {
            asdu.encode(&self.params, &mut body)?;
        }

        dst.reserve(6 + asdu_len);
        dst.put_slice(&item.apci.encode_header(asdu_len));
        dst.put_slice(&body);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::InterrogationQualifier;

    fn codec() -> Iec104Codec {
        Iec104Codec::new(AppLayerParameters::iec104())
    }

    #[test]
    fn test_decode_u_frame() {
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x07, 0x00, 0x00, 0x00][..]);
        let apdu = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci, Apci::u_frame(UFunction::StartDtAct));
        assert!(apdu.asdu.is_none());
        assert!(buf.is_empty());
    }

    #[test]
    fn test_decode_s_frame() {
        // S-frame with recv_seq = 100
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x01, 0x00, 0xC8, 0x00][..]);
        let apdu = codec().decode(&mut buf).unwrap().unwrap();
        assert_eq!(apdu.apci.recv_seq(), Some(100));
    }

    #[test]
    fn test_encode_u_frame() {
        let mut buf = BytesMut::new();
        codec().encode(Apdu::u_frame(UFunction::StartDtAct), &mut buf).unwrap();
        assert_eq!(&buf[..], &[0x68, 0x04, 0x07, 0x00, 0x00, 0x00]);
    }

    #[test]
    fn test_i_frame_roundtrip() {
        let mut codec = codec();
        let mut buf = BytesMut::new();
        let asdu = Asdu::interrogation_command(1, InterrogationQualifier::STATION).unwrap();
        let apdu = Apdu::i_frame(10, 5, asdu);
        codec.encode(apdu.clone(), &mut buf).unwrap();

        assert_eq!(buf[0], START_BYTE);
        // control (4) + header (6) + IOA (3) + QOI (1)
        assert_eq!(buf[1], 14);
        assert_eq!(buf.len(), 16);

        let decoded = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(decoded, apdu);
    }

    #[test]
    fn test_decode_partial_frame() {
        let mut codec = codec();
        let mut buf = BytesMut::from(&[0x68, 0x04][..]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x07, 0x00, 0x00]);
        assert!(codec.decode(&mut buf).unwrap().is_none());

        buf.extend_from_slice(&[0x00]);
        assert!(codec.decode(&mut buf).unwrap().is_some());
    }

    #[test]
    fn test_decode_two_frames() {
        let mut codec = codec();
        let mut buf = BytesMut::from(
            &[0x68, 0x04, 0x43, 0x00, 0x00, 0x00, 0x68, 0x04, 0x83, 0x00, 0x00, 0x00][..],
        );
        let first = codec.decode(&mut buf).unwrap().unwrap();
        let second = codec.decode(&mut buf).unwrap().unwrap();
        assert_eq!(first.apci, Apci::u_frame(UFunction::TestFrAct));
        assert_eq!(second.apci, Apci::u_frame(UFunction::TestFrCon));
    }

    #[test]
    fn test_invalid_start_byte() {
        let mut buf = BytesMut::from(&[0xFF, 0x68, 0x04, 0x07, 0x00, 0x00, 0x00][..]);
        let err = codec().decode(&mut buf).unwrap_err();
        assert!(err.is_framing_error());
    }

    #[test]
    fn test_invalid_length() {
        for length in [0x00, 0x03, 0xFE, 0xFF] {
            let mut buf = BytesMut::from(&[0x68, length, 0x07, 0x00, 0x00, 0x00][..]);
            assert!(
                codec().decode(&mut buf).is_err(),
                "length {} should be rejected",
                length
            );
        }
    }

    #[test]
    fn test_i_frame_without_asdu() {
        let mut buf = BytesMut::from(&[0x68, 0x04, 0x00, 0x00, 0x00, 0x00][..]);
        assert!(matches!(
            codec().decode(&mut buf),
            Err(Iec60870Error::Framing(_))
        ));
    }

    #[test]
    fn test_u_frame_with_payload() {
        let mut buf = BytesMut::from(&[0x68, 0x05, 0x07, 0x00, 0x00, 0x00, 0x01][..]);
        assert!(codec().decode(&mut buf).is_err());
    }

    #[test]
    fn test_encode_rejects_mismatched_payload() {
        let mut buf = BytesMut::new();
        let apdu = Apdu {
            apci: Apci::i_frame(0, 0),
            asdu: None,
        };
        assert!(codec().encode(apdu, &mut buf).is_err());
        assert!(buf.is_empty());
    }
}
