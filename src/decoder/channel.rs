use num_enum::{FromPrimitive, IntoPrimitive};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum ChannelId {
    Distance = 1,
    Amplitude = 2,
    Color = 3,
    X = 4,
    Y = 5,
    Z = 6,
    Confidence = 7,
    #[num_enum(catch_all)]
    Other(u8),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Unit {
    None = 0,
    Millimeter = 1,
    Meter = 2,
    /// raw sensor digits
    Digits = 3,
    #[num_enum(catch_all)]
    Other(u8),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq, FromPrimitive, IntoPrimitive)]
#[repr(u8)]
pub enum Encoding {
    Integer = 0,
    Float = 1,
    Yuv422 = 2,
    Rgb888 = 3,
    #[num_enum(catch_all)]
    Other(u8),
}

/// A channel's sample format as encoded in a single tag byte: bits 0 to 2 are the byte width of
///  a sample, bit 3 is set for signed data, bits 4 to 7 are the [Encoding].
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub struct DataFormat {
    pub byte_width: u8,
    pub signed: bool,
    pub encoding: Encoding,
}

impl DataFormat {
    pub fn from_tag(tag: u8) -> DataFormat {
        DataFormat {
            byte_width: tag & 0x07,
            signed: tag & 0x08 != 0,
            encoding: Encoding::from(tag >> 4),
        }
    }

    pub fn tag(&self) -> u8 {
        let encoding: u8 = self.encoding.into();
        let signed = if self.signed { 0x08 } else { 0 };
        (encoding << 4) | signed | (self.byte_width & 0x07)
    }

    pub fn u16() -> DataFormat {
        DataFormat { byte_width: 2, signed: false, encoding: Encoding::Integer }
    }

    pub fn i16() -> DataFormat {
        DataFormat { byte_width: 2, signed: true, encoding: Encoding::Integer }
    }

    pub fn f32() -> DataFormat {
        DataFormat { byte_width: 4, signed: true, encoding: Encoding::Float }
    }

    pub fn rgb888() -> DataFormat {
        DataFormat { byte_width: 3, signed: false, encoding: Encoding::Rgb888 }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Channel {
    pub id: ChannelId,
    pub width: u16,
    pub height: u16,
    pub format: DataFormat,
    pub unit: Unit,
    pub integration_time_us: u32,
    pub modulation_frequency_hz: u32,
    /// samples in wire byte order (big-endian)
    pub data: Vec<u8>,
    pub metadata: Vec<(u16, u32)>,
    /// true if parts of the data were never received and hold invalid-value sentinels
    pub has_invalid_data: bool,
}

impl Channel {
    /// Expected length of the data in bytes
    pub fn data_len(width: u16, height: u16, format: DataFormat) -> usize {
        width as usize * height as usize * format.byte_width as usize
    }
}
