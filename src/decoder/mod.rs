//! Decoding of assembled frames into typed channels.
//!
//! Every frame starts with a u16 format version, and the two versions have incompatible layouts
//!  (see [layout_v1] and [layout_v2]). Byte ranges that were never received are replaced by an
//!  invalid-value sentinel per channel, see [invalid_fill]. If a missing range overlaps header or
//!  descriptor data, the frame can not be decoded at all.

use std::ops::Range;

use bytes::Buf;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::error::{Result, TransportError};
use crate::reassembly::AssembledFrame;

pub mod channel;
pub mod invalid_fill;
pub mod layout_v1;
pub mod layout_v2;

pub use channel::{Channel, ChannelId, DataFormat, Encoding, Unit};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Temperatures {
    /// degrees Celsius
    pub sensor: f32,
    /// degrees Celsius
    pub illumination: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DecodedFrame {
    pub frame_counter: u16,
    pub format_version: u16,
    /// device timestamp in microseconds
    pub timestamp_us: u64,
    pub temperatures: Option<Temperatures>,
    pub channels: Vec<Channel>,
    /// byte ranges of the assembled frame that were never received
    pub missing: Vec<Range<usize>>,
    /// local reception time of the frame's first fragment
    pub received_at: Instant,
}

impl DecodedFrame {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn channel(&self, id: ChannelId) -> Option<&Channel> {
        self.channels.iter().find(|c| c.id == id)
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DecoderStats {
    pub frames_decoded: u64,
    pub partial_frames: u64,
    pub decode_errors: u64,
    /// v2 fields with an unknown tag
    pub unknown_fields: u64,
}

#[derive(Default)]
pub struct FrameDecoder {
    stats: DecoderStats,
}

impl FrameDecoder {
    pub fn new() -> FrameDecoder {
        Default::default()
    }

    pub fn stats(&self) -> DecoderStats {
        self.stats
    }

    pub fn decode(&mut self, frame: AssembledFrame) -> Result<DecodedFrame> {
        let frame_counter = frame.frame_counter;
        match decode_frame(&frame) {
            Ok((decoded, num_unknown_fields)) => {
                trace!("decoded frame #{} with {} channels", frame_counter, decoded.channels.len());
                self.stats.frames_decoded += 1;
                self.stats.unknown_fields += num_unknown_fields;
                if decoded.is_partial() {
                    self.stats.partial_frames += 1;
                }
                Ok(decoded)
            }
            Err(e) => {
                debug!("frame #{} can not be decoded: {}", frame_counter, e);
                self.stats.decode_errors += 1;
                Err(e)
            }
        }
    }
}

/// Decodes a frame, returning the decoded frame and the number of skipped unknown fields
pub fn decode_frame(frame: &AssembledFrame) -> Result<(DecodedFrame, u64)> {
    let mut reader = FrameReader::new(frame);
    let version = reader.u16()?;
    match version {
        layout_v1::FORMAT_VERSION => layout_v1::decode(reader).map(|f| (f, 0)),
        layout_v2::FORMAT_VERSION => layout_v2::decode(reader),
        other => Err(TransportError::UnsupportedFrameFormat { version: other }),
    }
}

/// Sequential big-endian reads from an assembled frame that fail for bytes that were not
///  received
pub struct FrameReader<'a> {
    frame: &'a AssembledFrame,
    pos: usize,
}

impl<'a> FrameReader<'a> {
    pub fn new(frame: &'a AssembledFrame) -> FrameReader<'a> {
        FrameReader { frame, pos: 0 }
    }

    pub fn frame(&self) -> &'a AssembledFrame {
        self.frame
    }

    pub fn position(&self) -> usize {
        self.pos
    }

    pub fn remaining(&self) -> usize {
        self.frame.payload.len() - self.pos
    }

    pub fn has_remaining(&self) -> bool {
        self.remaining() > 0
    }

    /// Checks that the next `len` bytes exist, without regard to whether they were received
    pub fn check_bounds(&self, len: usize) -> Result<()> {
        if len > self.remaining() {
            return Err(TransportError::malformed_frame(self.frame.frame_counter, format!(
                "{} bytes required at offset {}, but the frame has only {} bytes", len, self.pos, self.frame.payload.len())));
        }
        Ok(())
    }

    /// Checks that the next `len` bytes exist and were received
    pub fn require(&self, len: usize) -> Result<()> {
        self.check_bounds(len)?;

        let range = self.pos..self.pos + len;
        if let Some(missing) = self.frame.missing.iter().find(|m| m.start < range.end && range.start < m.end) {
            return Err(TransportError::IncompleteFrameHeader {
                frame_counter: self.frame.frame_counter,
                offset: missing.start.max(range.start),
            });
        }
        Ok(())
    }

    fn next(&mut self, len: usize) -> Result<&'a [u8]> {
        self.require(len)?;
        let frame: &'a AssembledFrame = self.frame;
        let result = &frame.payload[self.pos..self.pos + len];
        self.pos += len;
        Ok(result)
    }

    pub fn u8(&mut self) -> Result<u8> {
        Ok(self.next(1)?.get_u8())
    }

    pub fn u16(&mut self) -> Result<u16> {
        Ok(self.next(2)?.get_u16())
    }

    pub fn i16(&mut self) -> Result<i16> {
        Ok(self.next(2)?.get_i16())
    }

    pub fn u32(&mut self) -> Result<u32> {
        Ok(self.next(4)?.get_u32())
    }

    pub fn u64(&mut self) -> Result<u64> {
        Ok(self.next(8)?.get_u64())
    }

    /// Skips `len` bytes whether they were received or not, returning their range
    pub fn skip(&mut self, len: usize) -> Result<Range<usize>> {
        self.check_bounds(len)?;
        let range = self.pos..self.pos + len;
        self.pos += len;
        Ok(range)
    }
}
