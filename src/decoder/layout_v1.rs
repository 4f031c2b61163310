//! Frame format version 1 has a fixed layout (BE):
//!
//! ```ascii
//!  0: format version (u16) = 1
//!  2: timestamp in µs (u64)
//! 10: sensor temperature (u8), °C biased by +50
//! 11: illumination temperature (u8), °C biased by +50
//! 12: channel count (u8)
//! 13: channel descriptors, 12 bytes each:
//!       channel id (u8), data format (u8), width (u16), height (u16),
//!       integration time in µs (u16), modulation frequency in units of 10 kHz (u16),
//!       unit (u8), reserved (u8)
//!     channel data, concatenated in descriptor order
//! ```
//!
//! Trailing bytes after the last channel's data are ignored.

use tracing::debug;

use crate::decoder::channel::{Channel, ChannelId, DataFormat, Unit};
use crate::decoder::invalid_fill::extract_channel_data;
use crate::decoder::{DecodedFrame, FrameReader, Temperatures};
use crate::error::Result;

pub const FORMAT_VERSION: u16 = 1;
pub const DESCRIPTOR_LEN: usize = 12;

const TEMPERATURE_BIAS: f32 = 50.0;
const MODULATION_FREQUENCY_UNIT_HZ: u32 = 10_000;

struct Descriptor {
    id: ChannelId,
    format: DataFormat,
    width: u16,
    height: u16,
    integration_time_us: u16,
    modulation_frequency: u16,
    unit: Unit,
}

/// `reader` is positioned after the format version
pub fn decode(mut reader: FrameReader) -> Result<DecodedFrame> {
    let frame = reader.frame();

    let timestamp_us = reader.u64()?;
    let sensor_temperature = reader.u8()?;
    let illumination_temperature = reader.u8()?;
    let num_channels = reader.u8()? as usize;

    // all descriptors must be present before any channel can be located
    reader.require(num_channels * DESCRIPTOR_LEN)?;
    let mut descriptors = Vec::with_capacity(num_channels);
    for _ in 0..num_channels {
        let id = ChannelId::from(reader.u8()?);
        let format = DataFormat::from_tag(reader.u8()?);
        let width = reader.u16()?;
        let height = reader.u16()?;
        let integration_time_us = reader.u16()?;
        let modulation_frequency = reader.u16()?;
        let unit = Unit::from(reader.u8()?);
        let _reserved = reader.u8()?;
        descriptors.push(Descriptor { id, format, width, height, integration_time_us, modulation_frequency, unit });
    }

    let mut channels = Vec::with_capacity(num_channels);
    for d in descriptors {
        let range = reader.skip(Channel::data_len(d.width, d.height, d.format))?;
        let (data, has_invalid_data) = extract_channel_data(&frame.payload, range, &frame.missing, d.format);
        channels.push(Channel {
            id: d.id,
            width: d.width,
            height: d.height,
            format: d.format,
            unit: d.unit,
            integration_time_us: d.integration_time_us.into(),
            modulation_frequency_hz: u32::from(d.modulation_frequency) * MODULATION_FREQUENCY_UNIT_HZ,
            data,
            metadata: Vec::new(),
            has_invalid_data,
        });
    }

    if reader.has_remaining() {
        debug!("frame #{}: ignoring {} trailing bytes", frame.frame_counter, reader.remaining());
    }

    Ok(DecodedFrame {
        frame_counter: frame.frame_counter,
        format_version: FORMAT_VERSION,
        timestamp_us,
        temperatures: Some(Temperatures {
            sensor: sensor_temperature as f32 - TEMPERATURE_BIAS,
            illumination: illumination_temperature as f32 - TEMPERATURE_BIAS,
        }),
        channels,
        missing: frame.missing.clone(),
        received_at: frame.timestamp,
    })
}
