//! Headers of UDP data packets. There are two incompatible versions in the field, distinguished
//!  by the protocol tag in the first two bytes. All numbers are in network byte order (BE).
//!
//! Version 1 (20 bytes):
//! ```ascii
//!  0: protocol tag (u16) = 0x0100
//!  2: frame counter (u16)
//!  4: packet counter (u16) - monotonic across frames, wraps at a configured window
//!  6: payload length (u16)
//!  8: total frame length (u32)
//! 12: CRC-32 of the payload (u32)
//! 16: flags (u32) - bit 0: CRC disabled
//! ```
//!
//! Version 2 (22 bytes):
//! ```ascii
//!  0: protocol tag (u16) = 0x0200
//!  2: frame counter (u16)
//!  4: packet counter (u16) - index of the fragment in its frame, or FFFF for an NDA notification
//!  6: payload length (u16)
//!  8: frame length (u32)
//! 12: CRC-16 (u16), calculated with this field set to zero
//! 14: flags (u8), see [V2Flags]
//! 15: reserved (u8)
//! 16: byte offset of the payload in the frame (u32)
//! 20: total number of fragments of the frame (u16)
//! ```
//!
//! The payload of an NDA ('no data available') notification is a packed array of u16 fragment
//!  indices that the device will never send again because its own buffer was overwritten.

use bitflags::bitflags;
use bytes::{Buf, BufMut};

use crate::checksum::{crc16_excluding_field, CRC32};
use crate::safe_converter::SafeCast;

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct V2Flags: u8 {
        const CRC_HEADER_ONLY = 0b0000_0001;
        const CRC_FULL = 0b0000_0010;
        const RETRANSMISSION_CAPABLE = 0b0000_0100;
        const RETRANSMITTED = 0b0000_1000;
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum HeaderError {
    TooShort { len: usize },
    UnknownProtocolTag(u16),
    PayloadTruncated { declared: usize, actual: usize },
    CrcMismatch,
    /// v2 fragment whose byte range does not fit into the declared frame length
    OutOfFrameBounds,
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PacketHeaderV1 {
    pub frame_counter: u16,
    pub packet_counter: u16,
    pub payload_len: u16,
    pub total_frame_len: u32,
    pub crc32: u32,
    pub flags: u32,
}
impl PacketHeaderV1 {
    pub const PROTOCOL_TAG: u16 = 0x0100;
    pub const SERIALIZED_LEN: usize = 20;
    pub const FLAG_CRC_DISABLED: u32 = 1;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(Self::PROTOCOL_TAG);
        buf.put_u16(self.frame_counter);
        buf.put_u16(self.packet_counter);
        buf.put_u16(self.payload_len);
        buf.put_u32(self.total_frame_len);
        buf.put_u32(self.crc32);
        buf.put_u32(self.flags);
    }

    /// NB: expects the protocol tag to be consumed already
    fn deser_after_tag(buf: &mut impl Buf) -> Result<PacketHeaderV1, bytes::TryGetError> {
        Ok(PacketHeaderV1 {
            frame_counter: buf.try_get_u16()?,
            packet_counter: buf.try_get_u16()?,
            payload_len: buf.try_get_u16()?,
            total_frame_len: buf.try_get_u32()?,
            crc32: buf.try_get_u32()?,
            flags: buf.try_get_u32()?,
        })
    }

    pub fn is_crc_enabled(&self) -> bool {
        self.flags & Self::FLAG_CRC_DISABLED == 0
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct PacketHeaderV2 {
    pub frame_counter: u16,
    pub packet_counter: u16,
    pub payload_len: u16,
    pub frame_len: u32,
    pub crc16: u16,
    pub flags: V2Flags,
    pub byte_offset: u32,
    pub total_packet_count: u16,
}
impl PacketHeaderV2 {
    pub const PROTOCOL_TAG: u16 = 0x0200;
    pub const SERIALIZED_LEN: usize = 22;
    pub const NDA_PACKET_COUNTER: u16 = u16::MAX;
    const CRC_OFFSET: usize = 12;

    pub fn ser(&self, buf: &mut impl BufMut) {
        buf.put_u16(Self::PROTOCOL_TAG);
        buf.put_u16(self.frame_counter);
        buf.put_u16(self.packet_counter);
        buf.put_u16(self.payload_len);
        buf.put_u32(self.frame_len);
        buf.put_u16(self.crc16);
        buf.put_u8(self.flags.bits());
        buf.put_u8(0);
        buf.put_u32(self.byte_offset);
        buf.put_u16(self.total_packet_count);
    }

    fn deser_after_tag(buf: &mut impl Buf) -> Result<PacketHeaderV2, bytes::TryGetError> {
        let frame_counter = buf.try_get_u16()?;
        let packet_counter = buf.try_get_u16()?;
        let payload_len = buf.try_get_u16()?;
        let frame_len = buf.try_get_u32()?;
        let crc16 = buf.try_get_u16()?;
        let flags = V2Flags::from_bits_truncate(buf.try_get_u8()?);
        let _reserved = buf.try_get_u8()?;
        let byte_offset = buf.try_get_u32()?;
        let total_packet_count = buf.try_get_u16()?;

        Ok(PacketHeaderV2 {
            frame_counter,
            packet_counter,
            payload_len,
            frame_len,
            crc16,
            flags,
            byte_offset,
            total_packet_count,
        })
    }

    pub fn is_nda(&self) -> bool {
        self.packet_counter == Self::NDA_PACKET_COUNTER
    }

    pub fn supports_retransmission(&self) -> bool {
        self.flags.contains(V2Flags::RETRANSMISSION_CAPABLE)
    }

    pub fn is_retransmitted(&self) -> bool {
        self.flags.contains(V2Flags::RETRANSMITTED)
    }

    /// Calculates the CRC for a serialized header and its payload, based on the header's CRC flags.
    ///  Returns `None` if the header does not request a CRC.
    pub fn calc_crc(flags: V2Flags, raw_header: &[u8], payload: &[u8]) -> Option<u16> {
        if flags.contains(V2Flags::CRC_FULL) {
            Some(crc16_excluding_field(raw_header, Self::CRC_OFFSET, payload))
        }
        else if flags.contains(V2Flags::CRC_HEADER_ONLY) {
            Some(crc16_excluding_field(raw_header, Self::CRC_OFFSET, &[]))
        }
        else {
            None
        }
    }

    /// Patches the CRC field of a serialized packet (header followed by payload). This is what
    ///  a sender does after serializing the packet.
    pub fn finalize_crc(packet: &mut [u8]) {
        let flags = V2Flags::from_bits_truncate(packet[14]);
        let (header, payload) = packet.split_at_mut(Self::SERIALIZED_LEN);
        let crc = Self::calc_crc(flags, header, payload).unwrap_or(0);
        header[Self::CRC_OFFSET..Self::CRC_OFFSET + 2].copy_from_slice(&crc.to_be_bytes());
    }
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DataPacketHeader {
    V1(PacketHeaderV1),
    V2(PacketHeaderV2),
}

/// A data packet with validated header and payload
#[derive(Debug)]
pub struct ParsedPacket<'a> {
    pub header: DataPacketHeader,
    pub payload: &'a [u8],
}

/// Parses and validates a data packet: header structure, payload length and CRC.
pub fn parse_data_packet(packet: &[u8]) -> Result<ParsedPacket<'_>, HeaderError> {
    let mut buf = packet;
    let tag = buf.try_get_u16()
        .map_err(|_| HeaderError::TooShort { len: packet.len() })?;

    match tag {
        PacketHeaderV1::PROTOCOL_TAG => {
            let header = PacketHeaderV1::deser_after_tag(&mut buf)
                .map_err(|_| HeaderError::TooShort { len: packet.len() })?;
            let payload = payload_slice(buf, header.payload_len)?;

            if header.is_crc_enabled() && CRC32.checksum(payload) != header.crc32 {
                return Err(HeaderError::CrcMismatch);
            }
            Ok(ParsedPacket { header: DataPacketHeader::V1(header), payload })
        }
        PacketHeaderV2::PROTOCOL_TAG => {
            let header = PacketHeaderV2::deser_after_tag(&mut buf)
                .map_err(|_| HeaderError::TooShort { len: packet.len() })?;
            let payload = payload_slice(buf, header.payload_len)?;

            let raw_header = &packet[..PacketHeaderV2::SERIALIZED_LEN];
            if let Some(crc) = PacketHeaderV2::calc_crc(header.flags, raw_header, payload) {
                if crc != header.crc16 {
                    return Err(HeaderError::CrcMismatch);
                }
            }

            if !header.is_nda() {
                let end = header.byte_offset as u64 + payload.len() as u64;
                if end > header.frame_len as u64 || header.packet_counter >= header.total_packet_count {
                    return Err(HeaderError::OutOfFrameBounds);
                }
            }
            Ok(ParsedPacket { header: DataPacketHeader::V2(header), payload })
        }
        other => Err(HeaderError::UnknownProtocolTag(other)),
    }
}

fn payload_slice(buf: &[u8], payload_len: u16) -> Result<&[u8], HeaderError> {
    let declared: usize = payload_len.safe_cast();
    if buf.len() < declared {
        return Err(HeaderError::PayloadTruncated { declared, actual: buf.len() });
    }
    // trailing bytes after the declared payload are padding
    Ok(&buf[..declared])
}

/// Parses the payload of an NDA notification. A trailing odd byte is ignored.
pub fn parse_nda_indices(payload: &[u8]) -> Vec<u16> {
    payload.chunks_exact(2)
        .map(|c| u16::from_be_bytes([c[0], c[1]]))
        .collect()
}
