//! Reassembly of frames from data packet fragments.
//!
//! Fragments arrive out of order, duplicated or not at all. The reassembler keeps a bounded
//!  number of frames 'in flight' in slots, and a frame leaves its slot in one of three ways:
//!
//! * it is complete, i.e. every fragment was either received or declared unavailable by the
//!   device (NDA)
//! * it is force-completed after retransmission did not help (or is not supported), with its
//!   missing byte ranges flagged
//! * it is evicted to make room for a newer frame, and dropped
//!
//! There are two incompatible packet protocol versions with very different reassembly logic, see
//!  [v1] and [v2]. [FrameReassembler] dispatches each packet based on its header.

use std::collections::VecDeque;
use std::ops::Range;
use std::sync::Arc;

use tokio::time::Instant;
use tracing::{debug, trace};

use crate::buffers::packet_pool::PacketPool;
use crate::buffers::raw_packet::RawPacket;
use crate::config::ReassemblyConfig;
use crate::data::packet_header::{parse_data_packet, DataPacketHeader, HeaderError, PacketHeaderV2};
use crate::retransmission::RetransmissionRequest;
use crate::safe_converter::SafeCast;

pub mod frame_slot;
pub mod v1;
pub mod v2;

/// A frame's bytes in wire order, ready for decoding
#[derive(Debug)]
pub struct AssembledFrame {
    pub frame_counter: u16,
    /// reception time of the frame's first fragment
    pub timestamp: Instant,
    pub payload: Vec<u8>,
    /// byte ranges of the payload that were never received, in ascending order and
    ///  non-overlapping. Their content is unspecified.
    pub missing: Vec<Range<usize>>,
}

impl AssembledFrame {
    pub fn is_partial(&self) -> bool {
        !self.missing.is_empty()
    }

    pub fn overlaps_missing(&self, range: Range<usize>) -> bool {
        self.missing.iter()
            .any(|m| m.start < range.end && range.start < m.end)
    }
}

#[derive(Debug)]
pub enum IngestOutcome {
    Appended,
    Completed(AssembledFrame),
    NdaApplied,
    Rejected(RejectReason),
}

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RejectReason {
    Malformed(HeaderError),
    /// fragment for a frame that was completed recently
    AlreadyCompleted,
    /// retransmitted fragment for a frame that is no longer in flight
    LateRetransmission,
    /// NDA notification for a frame that is no longer in flight
    UnknownFrame,
    /// header fields contradict those of earlier fragments of the same frame
    InconsistentHeader,
    /// v1 packet counter outside of the configured window
    PacketCounterOutOfWindow,
    /// v1 slot capacity exceeded; all in-flight data was discarded
    SlotOverflow,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct ReassemblyStats {
    pub fragments_received: u64,
    pub frames_completed: u64,
    pub frames_forced: u64,
    pub frames_dropped: u64,
    pub redundant_fragments: u64,
    pub crc_errors: u64,
    pub malformed_packets: u64,
    /// v1 only: fragments inferred as missing from gaps in the packet counter sequence
    pub missed_packets: u64,
    pub nda_indices: u64,
    pub late_retransmissions: u64,
    pub rejected_fragments: u64,
    pub slot_overflows: u64,
}

/// Result of a periodic sweep over all slots
#[derive(Debug, Default)]
pub struct SweepResult {
    pub requests: Vec<RetransmissionRequest>,
    /// partial frames, oldest first
    pub forced: Vec<AssembledFrame>,
}

/// Frame counters of the most recently completed frames, for suppressing duplicates that arrive
///  after a frame left its slot
pub struct RecentlyCompleted {
    frame_counters: VecDeque<u16>,
    capacity: usize,
}
impl RecentlyCompleted {
    pub fn new(capacity: usize) -> RecentlyCompleted {
        RecentlyCompleted {
            frame_counters: VecDeque::with_capacity(capacity),
            capacity,
        }
    }

    pub fn insert(&mut self, frame_counter: u16) {
        if self.capacity == 0 {
            return;
        }
        if self.frame_counters.len() == self.capacity {
            self.frame_counters.pop_front();
        }
        self.frame_counters.push_back(frame_counter);
    }

    pub fn contains(&self, frame_counter: u16) -> bool {
        self.frame_counters.contains(&frame_counter)
    }
}

/// Merges `received` byte ranges and returns their complement in `0..len`
pub fn missing_ranges(len: usize, mut received: Vec<Range<usize>>) -> Vec<Range<usize>> {
    received.sort_by_key(|r| r.start);

    let mut result = Vec::new();
    let mut covered_up_to = 0;
    for r in received {
        if r.start > covered_up_to {
            result.push(covered_up_to..r.start.min(len));
        }
        covered_up_to = covered_up_to.max(r.end);
        if covered_up_to >= len {
            break;
        }
    }
    if covered_up_to < len {
        result.push(covered_up_to..len);
    }
    result.retain(|r| !r.is_empty());
    result
}

/// Combines both protocol versions' reassembly behind a single entry point. Packets are routed
///  by their header's protocol tag.
pub struct FrameReassembler {
    pool: Arc<PacketPool>,
    v1: v1::V1Reassembler,
    v2: v2::V2Reassembler,
    stats: ReassemblyStats,
}

impl FrameReassembler {
    pub fn new(config: &ReassemblyConfig, pool: Arc<PacketPool>) -> FrameReassembler {
        FrameReassembler {
            v1: v1::V1Reassembler::new(config, pool.clone()),
            v2: v2::V2Reassembler::new(config),
            pool,
            stats: ReassemblyStats::default(),
        }
    }

    pub fn ingest(&mut self, packet: RawPacket, now: Instant) -> IngestOutcome {
        self.stats.fragments_received += 1;

        let header = match parse_data_packet(packet.as_ref()) {
            Ok(parsed) => parsed.header,
            Err(e) => {
                match e {
                    HeaderError::CrcMismatch => {
                        debug!("received data packet with CRC mismatch - dropping");
                        self.stats.crc_errors += 1;
                    }
                    _ => {
                        debug!("received malformed data packet: {:?} - dropping", e);
                        self.stats.malformed_packets += 1;
                    }
                }
                self.pool.release(packet);
                return IngestOutcome::Rejected(RejectReason::Malformed(e));
            }
        };

        let outcome = match header {
            DataPacketHeader::V1(header) => self.v1.ingest(header, packet, now, &mut self.stats),
            DataPacketHeader::V2(header) => {
                // the payload was validated by the parser
                let payload_len: usize = header.payload_len.safe_cast();
                let payload = &packet.as_ref()[PacketHeaderV2::SERIALIZED_LEN..][..payload_len];
                let outcome = self.v2.ingest(header, payload, now, &mut self.stats);
                self.pool.release(packet);
                outcome
            }
        };

        match &outcome {
            IngestOutcome::Completed(frame) => {
                trace!("frame #{} complete", frame.frame_counter);
                self.stats.frames_completed += 1;
            }
            IngestOutcome::Rejected(_) => {
                self.stats.rejected_fragments += 1;
            }
            _ => {}
        }
        outcome
    }

    /// Targeted gap requests that were detected during `ingest` since the last call
    pub fn take_gap_requests(&mut self) -> Vec<RetransmissionRequest> {
        self.v2.take_gap_requests()
    }

    pub fn sweep(&mut self, now: Instant) -> SweepResult {
        let mut result = self.v2.sweep(now, &mut self.stats);
        result.forced.extend(self.v1.sweep(now, &mut self.stats));
        result.forced.sort_by_key(|f| f.timestamp);
        self.stats.frames_forced += result.forced.len() as u64;
        result
    }

    /// true if a frame with this counter occupies a slot of either protocol version
    pub fn is_in_flight(&self, frame_counter: u16) -> bool {
        self.v1.is_in_flight(frame_counter) || self.v2.is_in_flight(frame_counter)
    }

    /// Number of pool buffers held by in-flight frames. v2 fragments are copied into their
    ///  slot, so only v1 frames hold on to buffers.
    pub fn held_packets(&self) -> usize {
        self.v1.held_packets()
    }

    pub fn stats(&self) -> ReassemblyStats {
        self.stats
    }

    /// Drops all in-flight frames, returning their buffers to the pool
    pub fn clear(&mut self) {
        self.v1.clear();
        self.v2.clear();
    }
}
