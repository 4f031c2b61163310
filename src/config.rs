use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::time::Duration;
use anyhow::bail;

use crate::buffers::raw_packet::RawPacket;
use crate::delivery::DropPolicy;

/// The port on which devices listen for control messages, both for UDP and TCP
pub const DEFAULT_CONTROL_PORT: u16 = 50660;

pub struct DataChannelConfig {
    /// The local address the UDP data socket is bound to. The device is told where to send data
    ///  as part of opening the channel, so an ephemeral port (the default) works fine.
    pub data_bind_addr: SocketAddr,

    /// Every blocking receive on the data socket uses this timeout so that closing the channel
    ///  is observed promptly
    pub socket_timeout: Duration,

    /// SO_RCVBUF for the data socket. Frames arrive in bursts of hundreds of fragments, and the
    ///  OS default is typically far too small for that. `None` leaves the OS default.
    pub receive_buffer_size: Option<usize>,

    /// Hard ceiling for the number of packet buffers. Buffers are created lazily up to this
    ///  number; when all of them are in use, the socket reader stalls rather than allocating.
    pub pool_ceiling: usize,
    /// The socket reader's sleep interval while waiting for a buffer to become available
    pub pool_stall_backoff: Duration,

    pub ingest_queue_capacity: usize,

    pub reassembly: ReassemblyConfig,
    pub control: ControlChannelConfig,
    pub delivery: DeliveryConfig,
}

impl DataChannelConfig {
    pub fn new(device_ip: IpAddr) -> DataChannelConfig {
        DataChannelConfig {
            data_bind_addr: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            socket_timeout: Duration::from_secs(1),
            receive_buffer_size: Some(4*1024*1024),
            pool_ceiling: 5000,
            pool_stall_backoff: Duration::from_millis(1),
            ingest_queue_capacity: 4096,
            reassembly: ReassemblyConfig::default(),
            control: ControlChannelConfig::new(device_ip),
            delivery: DeliveryConfig::default(),
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if self.socket_timeout.is_zero() {
            bail!("socket timeout must be positive");
        }
        if self.pool_ceiling == 0 {
            bail!("packet buffer pool ceiling must be positive");
        }
        if self.ingest_queue_capacity == 0 {
            bail!("ingest queue capacity must be positive");
        }
        if self.pool_ceiling < self.ingest_queue_capacity {
            // the queue could never fill up, which is harmless, but points to a misconfiguration
            bail!("packet buffer pool ceiling {} is smaller than the ingest queue capacity {}", self.pool_ceiling, self.ingest_queue_capacity);
        }

        self.reassembly.validate()?;
        self.control.validate()?;
        self.delivery.validate()?;
        Ok(())
    }
}

pub struct ReassemblyConfig {
    /// number of frame slots for the v2 protocol. The v1 protocol always uses three slots.
    pub num_slots: usize,

    /// initial number of fragments per v1 slot - doubled on overflow
    pub v1_initial_slot_capacity: usize,

    /// v1 packet counters are monotonic across frames and wrap at this value (at most 0x10000)
    pub packet_counter_window: u32,

    /// A slot that did not receive a fragment for this long is considered stalled, and
    ///  retransmission (or forced completion) kicks in. The reassembler sweeps its slots at half
    ///  this interval.
    pub packet_wait_timeout: Duration,

    /// Number of complete retransmission requests per frame before the frame is force-completed
    pub max_retransmission_attempts: u32,

    /// Minimum delay between two complete retransmission requests for the same frame
    pub retry_interval_min: Duration,

    /// Requests that could not be sent because the control channel was down are kept for
    ///  re-sending, up to this number
    pub max_deferred_requests: usize,

    /// Number of recently completed frame counters that are remembered for duplicate suppression
    pub recently_completed_history: usize,
}

impl Default for ReassemblyConfig {
    fn default() -> Self {
        ReassemblyConfig {
            num_slots: 4,
            v1_initial_slot_capacity: 64,
            packet_counter_window: 0x10000,
            packet_wait_timeout: Duration::from_millis(100),
            max_retransmission_attempts: 3,
            retry_interval_min: Duration::from_millis(20),
            max_deferred_requests: 64,
            recently_completed_history: 16,
        }
    }
}

impl ReassemblyConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.num_slots == 0 {
            bail!("at least one frame slot is required");
        }
        if self.v1_initial_slot_capacity == 0 {
            bail!("initial v1 slot capacity must be positive");
        }
        if self.packet_counter_window < 2 || self.packet_counter_window > 0x10000 {
            bail!("packet counter window must be between 2 and 65536, was {}", self.packet_counter_window);
        }
        if self.packet_wait_timeout < Duration::from_millis(2) {
            bail!("packet wait timeout is too small");
        }
        Ok(())
    }

    /// A frame is force-completed at the latest after this time since its first fragment,
    ///  regardless of further input
    pub fn max_frame_age(&self) -> Duration {
        self.packet_wait_timeout * (self.max_retransmission_attempts + 1)
    }

    pub fn sweep_interval(&self) -> Duration {
        self.packet_wait_timeout / 2
    }
}

pub struct ControlChannelConfig {
    pub device_udp_addr: SocketAddr,
    pub device_tcp_addr: SocketAddr,

    pub udp_enabled: bool,
    pub tcp_enabled: bool,

    pub connect_timeout: Duration,
    pub response_timeout: Duration,

    pub keep_alive_interval: Duration,
    /// number of consecutive keep-alive failures after which the connection is re-established
    pub keep_alive_failures_before_reconnect: u32,

    /// delay between the monitor's connection attempts while no channel is connected
    pub reconnect_delay: Duration,

    /// The maximum control payload size; this bounds the receive buffer for responses
    pub max_payload_len: usize,
}

impl ControlChannelConfig {
    pub fn new(device_ip: IpAddr) -> ControlChannelConfig {
        ControlChannelConfig {
            device_udp_addr: SocketAddr::new(device_ip, DEFAULT_CONTROL_PORT),
            device_tcp_addr: SocketAddr::new(device_ip, DEFAULT_CONTROL_PORT),
            udp_enabled: true,
            tcp_enabled: true,
            connect_timeout: Duration::from_secs(1),
            response_timeout: Duration::from_millis(500),
            keep_alive_interval: Duration::from_secs(2),
            keep_alive_failures_before_reconnect: 2,
            reconnect_delay: Duration::from_millis(500),
            max_payload_len: 16*1024,
        }
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.udp_enabled && !self.tcp_enabled {
            bail!("at least one of UDP and TCP must be enabled for the control channel");
        }
        if self.keep_alive_failures_before_reconnect == 0 {
            bail!("keep-alive failure threshold must be positive");
        }
        if self.max_payload_len + 64 > RawPacket::CAPACITY {
            bail!("control payload length {} exceeds a single UDP datagram", self.max_payload_len);
        }
        Ok(())
    }
}

pub struct DeliveryConfig {
    pub capacity: usize,
    pub drop_policy: DropPolicy,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        DeliveryConfig {
            capacity: 8,
            drop_policy: DropPolicy::DropOldest,
        }
    }
}

impl DeliveryConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.capacity == 0 {
            bail!("delivery queue capacity must be positive");
        }
        Ok(())
    }
}
