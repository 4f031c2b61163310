//! Frame transport for time-of-flight camera devices.
//!
//! A device streams sensor frames over UDP, each frame split into fragments that may arrive out
//!  of order, duplicated, or not at all. A separate control channel (UDP preferred, TCP as a
//!  fallback) is used for configuration, keep-alive and for asking the device to retransmit
//!  missing fragments.
//!
//! Data flows through a fixed pipeline:
//!
//! ```ascii
//! data socket -> socket reader -> ingest queue -> reassembler -> decoder -> delivery queue
//!                                                     ^
//!                                                     | retransmission requests
//!                                                     v
//!                                               control channel
//! ```
//!
//! Packet buffers come from a bounded pool and are moved (never shared) from the pool to the
//!  ingest queue and on to a frame slot, returning to the pool once their data is consumed.
//!  Frames that can not be completed within a bounded time are delivered with their missing
//!  byte ranges flagged, and never-received channel data is replaced by invalid-value sentinels.
//!
//! [data_channel::DataChannel] is the entry point for applications.

pub mod buffers;
pub mod checksum;
pub mod config;
pub mod control;
pub mod data;
pub mod data_channel;
pub mod decoder;
pub mod delivery;
pub mod error;
pub mod reassembly;
pub mod retransmission;
pub mod safe_converter;

#[cfg(test)]
mod test_util;

pub use data_channel::{DataChannel, DataChannelStats};
pub use error::{Result, TransportError};
