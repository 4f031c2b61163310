//! The control channel: a request / response protocol for device configuration, stream start and
//!  stop, keep-alive and retransmission requests.

pub mod connection_state;
pub mod control_channel;
pub mod control_message;
pub mod transport;
