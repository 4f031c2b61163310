//! Replacement of never-received channel data by invalid-value sentinels. A sample that is only
//!  partially missing is invalid as a whole.
//!
//! | data                        | sentinel                |
//! |-----------------------------|-------------------------|
//! | unsigned integer            | maximum value (all ones)|
//! | signed integer              | minimum value           |
//! | float                       | NaN                     |
//! | YUV422, RGB888              | mid-gray (0x80 bytes)   |
//! | unknown encoding            | zero                    |

use std::ops::Range;

use crate::decoder::channel::{DataFormat, Encoding};

/// Copies a channel's data out of an assembled frame, filling bytes that overlap `missing`
///  with sentinels. `range` is the channel data's location in the frame. Returns the data and
///  whether any sentinels were written.
pub fn extract_channel_data(payload: &[u8], range: Range<usize>, missing: &[Range<usize>], format: DataFormat) -> (Vec<u8>, bool) {
    let mut data = payload[range.clone()].to_vec();

    let mut has_invalid_data = false;
    for m in missing {
        let start = m.start.max(range.start);
        let end = m.end.min(range.end);
        if start >= end {
            continue;
        }
        fill_invalid(&mut data, (start - range.start)..(end - range.start), format);
        has_invalid_data = true;
    }
    (data, has_invalid_data)
}

/// Overwrites all samples that overlap `byte_range` (relative to `data`) with the format's
///  sentinel
pub fn fill_invalid(data: &mut [u8], byte_range: Range<usize>, format: DataFormat) {
    let sample_len = sample_len(format);
    let start = byte_range.start / sample_len * sample_len;
    let end = byte_range.end.div_ceil(sample_len) * sample_len;
    let end = end.min(data.len());

    let sentinel = sentinel(format);
    for sample in data[start..end].chunks_mut(sample_len) {
        let n = sample.len();
        sample.copy_from_slice(&sentinel[..n]);
    }
}

fn sample_len(format: DataFormat) -> usize {
    match format.encoding {
        // colour sentinels are byte-wise
        Encoding::Yuv422 | Encoding::Rgb888 => 1,
        _ => format.byte_width.max(1) as usize,
    }
}

/// The sentinel for a single sample in wire byte order
fn sentinel(format: DataFormat) -> Vec<u8> {
    let width = sample_len(format);
    match format.encoding {
        Encoding::Float if width == 4 => f32::NAN.to_be_bytes().to_vec(),
        Encoding::Float if width == 8 => f64::NAN.to_be_bytes().to_vec(),
        Encoding::Float => vec![0xff; width],
        Encoding::Yuv422 | Encoding::Rgb888 => vec![0x80],
        Encoding::Integer if format.signed => {
            let mut result = vec![0u8; width];
            result[0] = 0x80;
            result
        }
        Encoding::Integer => vec![0xff; width],
        Encoding::Other(_) => vec![0; width],
    }
}
