//! RTP packet encoding and decoding (RFC 3550 fixed header).

use bytes::{BufMut, Bytes, BytesMut};

use crate::error::{Result, RtpError};

/// Fixed RTP header fields.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Parse the 12-byte fixed header.
    pub fn parse(data: &[u8]) -> Result<Self> {
        if data.len() < 12 {
            return Err(RtpError::PacketTooShort(data.len()));
        }

        let version = (data[0] >> 6) & 0x3;
        if version != 2 {
            return Err(RtpError::UnsupportedVersion(version));
        }

        Ok(Self {
            version,
            padding: (data[0] >> 5) & 0x1 == 1,
            extension: (data[0] >> 4) & 0x1 == 1,
            csrc_count: data[0] & 0xF,
            marker: (data[1] >> 7) & 0x1 == 1,
            payload_type: data[1] & 0x7F,
            sequence_number: u16::from_be_bytes([data[2], data[3]]),
            timestamp: u32::from_be_bytes([data[4], data[5], data[6], data[7]]),
            ssrc: u32::from_be_bytes([data[8], data[9], data[10], data[11]]),
        })
    }

    /// Serialize the fixed header.
    pub fn pack(&self) -> [u8; 12] {
        let byte0 = (self.version << 6)
            | ((self.padding as u8) << 5)
            | ((self.extension as u8) << 4)
            | (self.csrc_count & 0xF);
        let byte1 = ((self.marker as u8) << 7) | (self.payload_type & 0x7F);

        let mut out = [0u8; 12];
        out[0] = byte0;
        out[1] = byte1;
        out[2..4].copy_from_slice(&self.sequence_number.to_be_bytes());
        out[4..8].copy_from_slice(&self.timestamp.to_be_bytes());
        out[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        out
    }
}

/// A parsed RTP packet. Immutable once parsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPacket {
    pub header: RtpHeader,
    pub payload: Bytes,
}

impl RtpPacket {
    /// Parse a complete packet, skipping CSRC entries and any extension
    /// header, and stripping padding when the padding flag is set.
    pub fn parse(data: &[u8]) -> Result<Self> {
        let header = RtpHeader::parse(data)?;

        let mut header_size = 12 + header.csrc_count as usize * 4;
        if data.len() < header_size {
            return Err(RtpError::PacketTooShort(data.len()));
        }

        if header.extension {
            if data.len() < header_size + 4 {
                return Err(RtpError::PacketTooShort(data.len()));
            }
            let ext_words =
                u16::from_be_bytes([data[header_size + 2], data[header_size + 3]]) as usize;
            header_size += 4 + ext_words * 4;
            if data.len() < header_size {
                return Err(RtpError::PacketTooShort(data.len()));
            }
        }

        let mut payload = &data[header_size..];
        if header.padding && !payload.is_empty() {
            let padding_len = *payload.last().expect("non-empty") as usize;
            if padding_len <= payload.len() {
                payload = &payload[..payload.len() - padding_len];
            }
        }

        Ok(Self {
            header,
            payload: Bytes::copy_from_slice(payload),
        })
    }

    /// Serialize header and payload.
    pub fn pack(&self) -> Bytes {
        let mut out = BytesMut::with_capacity(12 + self.payload.len());
        out.put_slice(&self.header.pack());
        out.put_slice(&self.payload);
        out.freeze()
    }
}

/// Map a codec name to its static RTP payload type. Unknown names default
/// to 0 (PCMU), mirroring the call-start negotiation default.
pub fn payload_type_for_codec(codec: &str) -> u8 {
    match codec.to_ascii_uppercase().as_str() {
        "PCMU" => 0,
        "PCMA" => 8,
        "G722" => 9,
        "G729" => 18,
        _ => 0,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_header() -> RtpHeader {
        RtpHeader {
            version: 2,
            padding: false,
            extension: false,
            csrc_count: 0,
            marker: true,
            payload_type: 0,
            sequence_number: 4242,
            timestamp: 160_000,
            ssrc: 0xDEADBEEF,
        }
    }

    #[test]
    fn header_pack_parse_roundtrip() {
        let header = sample_header();
        let parsed = RtpHeader::parse(&header.pack()).unwrap();
        assert_eq!(parsed, header);
    }

    #[test]
    fn packet_pack_parse_roundtrip() {
        let packet = RtpPacket {
            header: sample_header(),
            payload: Bytes::from_static(&[0xFFu8; 160]),
        };
        let parsed = RtpPacket::parse(&packet.pack()).unwrap();
        assert_eq!(parsed, packet);
    }

    #[test]
    fn short_packet_is_rejected() {
        assert!(RtpPacket::parse(&[0x80, 0x00, 0x00]).is_err());
    }

    #[test]
    fn wrong_version_is_rejected() {
        let mut data = sample_header().pack().to_vec();
        data[0] = 0x40; // version 1
        assert!(RtpHeader::parse(&data).is_err());
    }

    #[test]
    fn padding_is_stripped() {
        let mut header = sample_header();
        header.padding = true;
        let mut data = header.pack().to_vec();
        data.extend_from_slice(&[1, 2, 3, 4]);
        data.extend_from_slice(&[0, 0, 3]); // 3 bytes of padding incl. length

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(&packet.payload[..], &[1, 2, 3, 4]);
    }

    #[test]
    fn csrc_and_extension_are_skipped() {
        let mut header = sample_header();
        header.csrc_count = 1;
        header.extension = true;

        let mut data = header.pack().to_vec();
        data.extend_from_slice(&[0, 0, 0, 7]); // one CSRC entry
        data.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01]); // extension header, 1 word
        data.extend_from_slice(&[9, 9, 9, 9]); // extension body
        data.extend_from_slice(&[5, 6]); // payload

        let packet = RtpPacket::parse(&data).unwrap();
        assert_eq!(&packet.payload[..], &[5, 6]);
    }

    #[test]
    fn codec_payload_types() {
        assert_eq!(payload_type_for_codec("PCMU"), 0);
        assert_eq!(payload_type_for_codec("pcma"), 8);
        assert_eq!(payload_type_for_codec("G722"), 9);
        assert_eq!(payload_type_for_codec("G729"), 18);
        assert_eq!(payload_type_for_codec("OPUS"), 0);
    }
}
