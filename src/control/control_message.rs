//! Control channel messages. Requests and responses share the same format: a fixed 64-byte header
//!  followed by an optional payload. All numbers are in network byte order (BE).
//!
//! ```ascii
//!  0: preamble (u16) = 0xA55A
//!  2: protocol version (u8) = 1
//!  3: command (u8)
//!  4: sub-command (u8)
//!  5: status (u8) - 0 for OK in responses, 0 in requests
//!  6: flags (u16) - see [ControlFlags]
//!  8: payload length (u32)
//! 12: address (u32) - register address, frame counter etc. depending on the command
//! 16: callback IPv4 address (u32)
//! 20: callback port (u16)
//! 22: reserved (36 bytes)
//! 58: CRC-32 of the payload (u32), 0 unless the PAYLOAD_CRC flag is set
//! 62: CRC-16 of bytes 0 to 61 (u16)
//! ```
//!
//! A response echoes preamble, version, command, sub-command and address of its request.

use std::net::{Ipv4Addr, SocketAddrV4};

use bitflags::bitflags;
use bytes::{Buf, BufMut};
use num_enum::{IntoPrimitive, TryFromPrimitive};

use crate::checksum::{CRC16, CRC32};
use crate::error::TransportError;
use crate::retransmission::RetransmissionRequest;
use crate::safe_converter::{PrecheckedCast, SafeCast};

pub const PREAMBLE: u16 = 0xA55A;
pub const PROTOCOL_VERSION: u8 = 1;
pub const HEADER_LEN: usize = 64;
const PAYLOAD_CRC_OFFSET: usize = 58;
const HEADER_CRC_OFFSET: usize = 62;

#[derive(Debug, Copy, Clone, Eq, PartialEq, TryFromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Command {
    KeepAlive = 0x01,
    ReadRegister = 0x02,
    WriteRegister = 0x03,
    StartStream = 0x10,
    StopStream = 0x11,
    Retransmit = 0x20,
}

bitflags! {
    #[derive(Debug, PartialEq, Eq, Copy, Clone)]
    pub struct ControlFlags: u16 {
        const PAYLOAD_CRC = 0b0000_0001;
    }
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct ControlMessage {
    pub command: Command,
    pub sub_command: u8,
    pub status: u8,
    pub address: u32,
    pub callback: Option<SocketAddrV4>,
    pub payload: Vec<u8>,
}

impl ControlMessage {
    pub fn request(command: Command, address: u32, payload: Vec<u8>) -> ControlMessage {
        ControlMessage {
            command,
            sub_command: 0,
            status: 0,
            address,
            callback: None,
            payload,
        }
    }

    pub fn keep_alive() -> ControlMessage {
        Self::request(Command::KeepAlive, 0, Vec::new())
    }

    pub fn read_register(address: u32) -> ControlMessage {
        Self::request(Command::ReadRegister, address, Vec::new())
    }

    pub fn write_register(address: u32, value: u32) -> ControlMessage {
        Self::request(Command::WriteRegister, address, value.to_be_bytes().to_vec())
    }

    pub fn start_stream(callback: SocketAddrV4) -> ControlMessage {
        ControlMessage {
            callback: Some(callback),
            ..Self::request(Command::StartStream, 0, Vec::new())
        }
    }

    pub fn stop_stream() -> ControlMessage {
        Self::request(Command::StopStream, 0, Vec::new())
    }

    /// The frame counter goes into the address field, the fragment indices into the payload.
    ///  NB: the caller is responsible for splitting longer lists into batches
    pub fn retransmit(frame_counter: u16, indices: &[u16]) -> Result<ControlMessage, TransportError> {
        if indices.len() > RetransmissionRequest::MAX_INDICES_PER_MESSAGE {
            return Err(TransportError::malformed_control(format!("{} fragment indices in a single retransmission request, at most {} are allowed", indices.len(), RetransmissionRequest::MAX_INDICES_PER_MESSAGE)));
        }

        let mut payload = Vec::with_capacity(indices.len() * 2);
        for &index in indices {
            payload.put_u16(index);
        }
        Ok(Self::request(Command::Retransmit, frame_counter.safe_cast(), payload))
    }

    pub fn serialized_len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn ser(&self, buf: &mut impl BufMut) {
        let mut header = [0u8; HEADER_LEN];
        {
            let mut h = &mut header[..];
            h.put_u16(PREAMBLE);
            h.put_u8(PROTOCOL_VERSION);
            h.put_u8(self.command.into());
            h.put_u8(self.sub_command);
            h.put_u8(self.status);

            let flags = if self.payload.is_empty() { ControlFlags::empty() } else { ControlFlags::PAYLOAD_CRC };
            h.put_u16(flags.bits());
            h.put_u32(self.payload.len().prechecked_cast());
            h.put_u32(self.address);
            match self.callback {
                Some(addr) => {
                    h.put_u32((*addr.ip()).into());
                    h.put_u16(addr.port());
                }
                None => {
                    h.put_u32(0);
                    h.put_u16(0);
                }
            }
        }

        if !self.payload.is_empty() {
            let payload_crc = CRC32.checksum(&self.payload);
            header[PAYLOAD_CRC_OFFSET..PAYLOAD_CRC_OFFSET + 4].copy_from_slice(&payload_crc.to_be_bytes());
        }
        let header_crc = CRC16.checksum(&header[..HEADER_CRC_OFFSET]);
        header[HEADER_CRC_OFFSET..].copy_from_slice(&header_crc.to_be_bytes());

        buf.put_slice(&header);
        buf.put_slice(&self.payload);
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(self.serialized_len());
        self.ser(&mut buf);
        buf
    }

    /// Parses and validates a complete message
    pub fn deser(raw: &[u8]) -> Result<ControlMessage, TransportError> {
        if raw.len() < HEADER_LEN {
            return Err(TransportError::malformed_control(format!("message has {} bytes, less than a header", raw.len())));
        }

        let header_crc = CRC16.checksum(&raw[..HEADER_CRC_OFFSET]);
        let expected_crc = u16::from_be_bytes([raw[HEADER_CRC_OFFSET], raw[HEADER_CRC_OFFSET + 1]]);
        if header_crc != expected_crc {
            return Err(TransportError::ControlCrc { details: format!("header CRC is {:#06x}, expected {:#06x}", header_crc, expected_crc) });
        }

        let mut buf = raw;
        let parsed = Self::deser_header(&mut buf)
            .map_err(|e| TransportError::malformed_control(format!("{:#}", e)))?;

        if parsed.payload_len != buf.len() {
            return Err(TransportError::malformed_control(format!("header announces {} payload bytes, found {}", parsed.payload_len, buf.len())));
        }
        if parsed.flags.contains(ControlFlags::PAYLOAD_CRC) {
            let payload_crc = CRC32.checksum(buf);
            if payload_crc != parsed.payload_crc {
                return Err(TransportError::ControlCrc { details: format!("payload CRC is {:#010x}, expected {:#010x}", payload_crc, parsed.payload_crc) });
            }
        }

        Ok(ControlMessage {
            command: parsed.command,
            sub_command: parsed.sub_command,
            status: parsed.status,
            address: parsed.address,
            callback: parsed.callback,
            payload: buf.to_vec(),
        })
    }

    fn deser_header(buf: &mut impl Buf) -> anyhow::Result<ParsedHeader> {
        let preamble = buf.try_get_u16()?;
        if preamble != PREAMBLE {
            anyhow::bail!("invalid preamble {:#06x}", preamble);
        }
        let version = buf.try_get_u8()?;
        if version != PROTOCOL_VERSION {
            anyhow::bail!("unsupported protocol version {}", version);
        }
        let command = Command::try_from(buf.try_get_u8()?)?;
        let sub_command = buf.try_get_u8()?;
        let status = buf.try_get_u8()?;
        let flags = ControlFlags::from_bits_truncate(buf.try_get_u16()?);
        let payload_len = buf.try_get_u32()?.safe_cast();
        let address = buf.try_get_u32()?;
        let callback_ip = Ipv4Addr::from(buf.try_get_u32()?);
        let callback_port = buf.try_get_u16()?;
        buf.advance(PAYLOAD_CRC_OFFSET - 22);
        let payload_crc = buf.try_get_u32()?;
        let _header_crc = buf.try_get_u16()?;

        let callback = if callback_port == 0 && callback_ip.is_unspecified() {
            None
        }
        else {
            Some(SocketAddrV4::new(callback_ip, callback_port))
        };

        Ok(ParsedHeader {
            command,
            sub_command,
            status,
            flags,
            payload_len,
            address,
            callback,
            payload_crc,
        })
    }

    /// Checks that `self` is a successful response to `request`
    pub fn verify_response_to(&self, request: &ControlMessage) -> Result<(), TransportError> {
        if self.command != request.command {
            return Err(TransportError::EchoMismatch { field: "command", expected: u8::from(request.command).into(), actual: u8::from(self.command).into() });
        }
        if self.sub_command != request.sub_command {
            return Err(TransportError::EchoMismatch { field: "sub-command", expected: request.sub_command.into(), actual: self.sub_command.into() });
        }
        if self.address != request.address {
            return Err(TransportError::EchoMismatch { field: "address", expected: request.address, actual: self.address });
        }
        if self.status != 0 {
            return Err(TransportError::DeviceStatus { command: self.command.into(), status: self.status });
        }
        Ok(())
    }

    /// The indices of a retransmission request
    pub fn retransmit_indices(&self) -> Vec<u16> {
        self.payload.chunks_exact(2)
            .map(|c| u16::from_be_bytes([c[0], c[1]]))
            .collect()
    }
}

struct ParsedHeader {
    command: Command,
    sub_command: u8,
    status: u8,
    flags: ControlFlags,
    payload_len: usize,
    address: u32,
    callback: Option<SocketAddrV4>,
    payload_crc: u32,
}
