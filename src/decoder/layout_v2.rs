//! Frame format version 2 is a sequence of tagged fields after the format version, each of
//!  them `tag (u16), length (u32), value`, until the end of the frame. All numbers are BE.
//!
//! ```ascii
//! 0x0001 timestamp:    µs (u64)
//! 0x0002 temperatures: sensor (i16), illumination (i16), both in 1/100 °C
//! 0x0010 channel:      id (u8), data format (u8), width (u16), height (u16),
//!                      integration time in µs (u32), modulation frequency in Hz (u32),
//!                      unit (u8), metadata count (u8),
//!                      count * (key (u16), value (u32)),
//!                      data
//! ```
//!
//! Fields with other tags are skipped.

use tracing::trace;

use crate::decoder::channel::{Channel, ChannelId, DataFormat, Unit};
use crate::decoder::invalid_fill::extract_channel_data;
use crate::decoder::{DecodedFrame, FrameReader, Temperatures};
use crate::error::{Result, TransportError};
use crate::safe_converter::SafeCast;

pub const FORMAT_VERSION: u16 = 2;

pub const TAG_TIMESTAMP: u16 = 0x0001;
pub const TAG_TEMPERATURES: u16 = 0x0002;
pub const TAG_CHANNEL: u16 = 0x0010;

const CHANNEL_DESCRIPTOR_LEN: usize = 16;
const METADATA_ENTRY_LEN: usize = 6;

/// `reader` is positioned after the format version. Returns the decoded frame and the number of
///  skipped fields.
pub fn decode(mut reader: FrameReader) -> Result<(DecodedFrame, u64)> {
    let frame = reader.frame();
    let frame_counter = frame.frame_counter;

    let mut timestamp_us = 0;
    let mut temperatures = None;
    let mut channels = Vec::new();
    let mut num_unknown_fields = 0;

    while reader.has_remaining() {
        let tag = reader.u16()?;
        let len: usize = reader.u32()?.safe_cast();
        reader.check_bounds(len)?;
        let field_end = reader.position() + len;

        match tag {
            TAG_TIMESTAMP => {
                expect_len(frame_counter, tag, len, 8)?;
                timestamp_us = reader.u64()?;
            }
            TAG_TEMPERATURES => {
                expect_len(frame_counter, tag, len, 4)?;
                let sensor = reader.i16()?;
                let illumination = reader.i16()?;
                temperatures = Some(Temperatures {
                    sensor: sensor as f32 / 100.0,
                    illumination: illumination as f32 / 100.0,
                });
            }
            TAG_CHANNEL => {
                channels.push(decode_channel(&mut reader, field_end)?);
            }
            _ => {
                trace!("frame #{}: skipping field with unknown tag {:#06x}", frame_counter, tag);
                num_unknown_fields += 1;
                reader.skip(len)?;
            }
        }
    }

    let decoded = DecodedFrame {
        frame_counter,
        format_version: FORMAT_VERSION,
        timestamp_us,
        temperatures,
        channels,
        missing: frame.missing.clone(),
        received_at: frame.timestamp,
    };
    Ok((decoded, num_unknown_fields))
}

fn expect_len(frame_counter: u16, tag: u16, actual: usize, expected: usize) -> Result<()> {
    if actual != expected {
        return Err(TransportError::malformed_frame(frame_counter, format!("field {:#06x} has length {}, expected {}", tag, actual, expected)));
    }
    Ok(())
}

fn decode_channel(reader: &mut FrameReader, field_end: usize) -> Result<Channel> {
    let frame = reader.frame();
    let field_len = field_end - reader.position();
    if field_len < CHANNEL_DESCRIPTOR_LEN {
        return Err(TransportError::malformed_frame(frame.frame_counter, format!("channel field of {} bytes is too short for a descriptor", field_len)));
    }

    let id = ChannelId::from(reader.u8()?);
    let format = DataFormat::from_tag(reader.u8()?);
    let width = reader.u16()?;
    let height = reader.u16()?;
    let integration_time_us = reader.u32()?;
    let modulation_frequency_hz = reader.u32()?;
    let unit = Unit::from(reader.u8()?);
    let num_metadata = reader.u8()? as usize;

    if reader.position() + num_metadata * METADATA_ENTRY_LEN > field_end {
        return Err(TransportError::malformed_frame(frame.frame_counter, format!("{} metadata entries exceed the channel field", num_metadata)));
    }
    let mut metadata = Vec::with_capacity(num_metadata);
    for _ in 0..num_metadata {
        let key = reader.u16()?;
        let value = reader.u32()?;
        metadata.push((key, value));
    }

    let data_len = field_end - reader.position();
    let expected_len = Channel::data_len(width, height, format);
    if data_len != expected_len {
        return Err(TransportError::malformed_frame(frame.frame_counter, format!(
            "channel {:?} has {} bytes of data, expected {} for {}x{} samples", id, data_len, expected_len, width, height)));
    }

    let range = reader.skip(data_len)?;
    let (data, has_invalid_data) = extract_channel_data(&frame.payload, range, &frame.missing, format);

    Ok(Channel {
        id,
        width,
        height,
        format,
        unit,
        integration_time_us,
        modulation_frequency_hz,
        data,
        metadata,
        has_invalid_data,
    })
}
