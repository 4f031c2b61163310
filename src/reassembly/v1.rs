//! Reassembly for protocol v1. Fragments carry no index of their own, only a packet counter that
//!  runs across frames (wrapping at a configured window), plus the frame's total byte length. A
//!  frame is complete when the sum of its fragments' lengths reaches the total length, and its
//!  fragments are then concatenated in packet counter order.
//!
//! There is no retransmission in v1. The received packets are held by their slot until the frame
//!  leaves it, and returned to the pool then.
//!
//! There are exactly three slots. When a fragment for a fourth frame arrives, the slot whose frame
//!  counter is furthest away (in 16-bit circular distance) from the new frame counter is evicted.
//!  This is an approximation of 'evict the stalest frame' that works well for the typical case of
//!  monotonically increasing frame counters, and it is intentionally not replaced by exact LRU.

use std::sync::Arc;
use std::time::Duration;

use rustc_hash::FxHashMap;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::buffers::packet_pool::PacketPool;
use crate::buffers::raw_packet::RawPacket;
use crate::config::ReassemblyConfig;
use crate::data::packet_header::PacketHeaderV1;
use crate::reassembly::{missing_ranges, AssembledFrame, IngestOutcome, ReassemblyStats, RecentlyCompleted, RejectReason};
use crate::safe_converter::SafeCast;

pub const NUM_V1_SLOTS: usize = 3;

/// 16-bit circular distance between two frame counters
pub fn circular_distance(a: u16, b: u16) -> u16 {
    a.wrapping_sub(b).min(b.wrapping_sub(a))
}

struct V1Slot {
    active: bool,
    frame_counter: u16,
    total_frame_len: usize,
    received_bytes: usize,
    /// packet counter of the frame's first fragment, as far as it is known
    base: u32,
    /// packet counter of the frame's last fragment received so far
    max_packet_counter: u32,
    max_payload_len: usize,
    /// received packets with their payload lengths, by packet counter
    packets: FxHashMap<u16, (RawPacket, usize)>,
    first_fragment_at: Instant,
    last_fragment_at: Instant,
}

impl V1Slot {
    fn new(now: Instant) -> V1Slot {
        V1Slot {
            active: false,
            frame_counter: 0,
            total_frame_len: 0,
            received_bytes: 0,
            base: 0,
            max_packet_counter: 0,
            max_payload_len: 0,
            packets: FxHashMap::default(),
            first_fragment_at: now,
            last_fragment_at: now,
        }
    }

    fn release_packets(&mut self, pool: &PacketPool) -> usize {
        let num_packets = self.packets.len();
        for (_, (packet, _)) in self.packets.drain() {
            pool.release(packet);
        }
        self.active = false;
        num_packets
    }
}

pub struct V1Reassembler {
    pool: Arc<PacketPool>,
    slots: Vec<V1Slot>,
    slot_capacity: usize,
    window: u32,
    packet_wait_timeout: Duration,
    max_frame_age: Duration,
    recently_completed: RecentlyCompleted,

    /// the most recent (frame counter, packet counter) pair, for inferring lost packets
    last_seen: Option<(u16, u32)>,
    /// the most recently finished frame and its highest packet counter, for inferring the next
    ///  frame's first packet counter
    last_finished: Option<(u16, u32)>,
}

impl V1Reassembler {
    pub fn new(config: &ReassemblyConfig, pool: Arc<PacketPool>) -> V1Reassembler {
        let now = Instant::now();
        V1Reassembler {
            pool,
            slots: (0..NUM_V1_SLOTS).map(|_| V1Slot::new(now)).collect(),
            slot_capacity: config.v1_initial_slot_capacity,
            window: config.packet_counter_window,
            packet_wait_timeout: config.packet_wait_timeout,
            max_frame_age: config.max_frame_age(),
            recently_completed: RecentlyCompleted::new(config.recently_completed_history),
            last_seen: None,
            last_finished: None,
        }
    }

    pub fn slot_capacity(&self) -> usize {
        self.slot_capacity
    }

    /// forward distance from packet counter `from` to `to`, modulo the window
    fn forward_distance(&self, from: u32, to: u32) -> u32 {
        (to + self.window - from) % self.window
    }

    pub fn ingest(&mut self, header: PacketHeaderV1, packet: RawPacket, now: Instant, stats: &mut ReassemblyStats) -> IngestOutcome {
        let packet_counter: u32 = header.packet_counter.safe_cast();
        trace!("received packet #{} for frame #{} ({} bytes)", packet_counter, header.frame_counter, header.payload_len);

        if packet_counter >= self.window {
            debug!("packet counter {} is outside the window of {} - dropping", packet_counter, self.window);
            self.pool.release(packet);
            return IngestOutcome::Rejected(RejectReason::PacketCounterOutOfWindow);
        }

        self.account_sequence(header.frame_counter, packet_counter, stats);

        let slot_idx = match self.find_slot(header.frame_counter) {
            Some(idx) => {
                if self.slots[idx].total_frame_len != header.total_frame_len.safe_cast() {
                    debug!("packet for frame #{} has total length {}, slot has {} - dropping", header.frame_counter, header.total_frame_len, self.slots[idx].total_frame_len);
                    self.pool.release(packet);
                    return IngestOutcome::Rejected(RejectReason::InconsistentHeader);
                }
                idx
            }
            None => {
                if self.recently_completed.contains(header.frame_counter) {
                    trace!("packet for recently completed frame #{} - dropping", header.frame_counter);
                    stats.redundant_fragments += 1;
                    self.pool.release(packet);
                    return IngestOutcome::Rejected(RejectReason::AlreadyCompleted);
                }
                self.claim_slot(header.frame_counter, header.total_frame_len.safe_cast(), packet_counter, now, stats)
            }
        };

        // a packet counter 'before' the base means that the frame's first packets were overtaken
        if self.forward_distance(self.slots[slot_idx].base, packet_counter) > self.window / 2 {
            trace!("packet #{} precedes the assumed start of frame #{} - rebasing", packet_counter, header.frame_counter);
            self.slots[slot_idx].base = packet_counter;
        }

        let slot = &self.slots[slot_idx];
        let highest = if self.forward_distance(slot.base, packet_counter) > self.forward_distance(slot.base, slot.max_packet_counter) {
            packet_counter
        }
        else {
            slot.max_packet_counter
        };
        let fragment_index: usize = self.forward_distance(slot.base, highest).safe_cast();
        if fragment_index >= self.slot_capacity {
            self.handle_overflow(stats);
            self.pool.release(packet);
            return IngestOutcome::Rejected(RejectReason::SlotOverflow);
        }

        let payload_len: usize = header.payload_len.safe_cast();
        let slot = &mut self.slots[slot_idx];
        if slot.packets.contains_key(&header.packet_counter) {
            trace!("redundant packet #{} for frame #{}", packet_counter, header.frame_counter);
            stats.redundant_fragments += 1;
            self.pool.release(packet);
            return IngestOutcome::Appended;
        }

        slot.packets.insert(header.packet_counter, (packet, payload_len));
        slot.received_bytes += payload_len;
        slot.max_packet_counter = highest;
        slot.max_payload_len = slot.max_payload_len.max(payload_len);
        slot.last_fragment_at = now;

        if slot.received_bytes >= slot.total_frame_len {
            if slot.received_bytes > slot.total_frame_len {
                debug!("frame #{}: received {} bytes, but the frame has only {} - truncating", slot.frame_counter, slot.received_bytes, slot.total_frame_len);
            }
            IngestOutcome::Completed(self.finish(slot_idx, false))
        }
        else {
            IngestOutcome::Appended
        }
    }

    /// Lost packets are inferred from gaps in the packet counter sequence, including gaps that
    ///  span a frame boundary
    fn account_sequence(&mut self, frame_counter: u16, packet_counter: u32, stats: &mut ReassemblyStats) {
        let advanced = match self.last_seen {
            None => true,
            Some((_, last)) => {
                let distance = self.forward_distance(last, packet_counter);
                if distance == 0 || distance > self.window / 2 {
                    // duplicate or reordered
                    false
                }
                else {
                    if distance > 1 {
                        trace!("packet counter jumped from {} to {}: {} packets missed", last, packet_counter, distance - 1);
                        stats.missed_packets += (distance - 1) as u64;
                    }
                    true
                }
            }
        };
        if advanced {
            self.last_seen = Some((frame_counter, packet_counter));
        }
    }

    fn find_slot(&self, frame_counter: u16) -> Option<usize> {
        self.slots.iter()
            .position(|s| s.active && s.frame_counter == frame_counter)
    }

    fn claim_slot(&mut self, frame_counter: u16, total_frame_len: usize, packet_counter: u32, now: Instant, stats: &mut ReassemblyStats) -> usize {
        let idx = match self.slots.iter().position(|s| !s.active) {
            Some(idx) => idx,
            None => {
                let mut victim = 0;
                for (idx, slot) in self.slots.iter().enumerate() {
                    if circular_distance(slot.frame_counter, frame_counter) > circular_distance(self.slots[victim].frame_counter, frame_counter) {
                        victim = idx;
                    }
                }
                let evicted_frame = self.slots[victim].frame_counter;
                let num_dropped = self.slots[victim].release_packets(&self.pool);
                warn!("all frame slots are busy: evicting frame #{} for frame #{}, {} packets dropped", evicted_frame, frame_counter, num_dropped);
                stats.frames_dropped += 1;
                victim
            }
        };

        let base = match self.last_finished {
            Some((prev_frame, prev_max)) if prev_frame == frame_counter.wrapping_sub(1) => (prev_max + 1) % self.window,
            _ => packet_counter,
        };

        let slot = &mut self.slots[idx];
        slot.active = true;
        slot.frame_counter = frame_counter;
        slot.total_frame_len = total_frame_len;
        slot.received_bytes = 0;
        slot.base = base;
        slot.max_packet_counter = base;
        slot.max_payload_len = 0;
        slot.first_fragment_at = now;
        slot.last_fragment_at = now;
        slot.packets.reserve(self.slot_capacity);
        idx
    }

    fn handle_overflow(&mut self, stats: &mut ReassemblyStats) {
        let new_capacity = self.slot_capacity * 2;
        warn!("frame has more than {} packets: increasing slot capacity to {} and dropping all in-flight data", self.slot_capacity, new_capacity);
        self.slot_capacity = new_capacity;
        stats.slot_overflows += 1;
        for slot in &mut self.slots {
            if slot.active {
                slot.release_packets(&self.pool);
                stats.frames_dropped += 1;
            }
        }
    }

    /// Assembles the slot's frame and returns its packets to the pool. Complete frames are the
    ///  concatenation of their payloads. For partial frames, each payload's offset is estimated
    ///  from its packet counter and the largest payload seen in the frame.
    fn finish(&mut self, slot_idx: usize, partial: bool) -> AssembledFrame {
        let window = self.window;
        let slot = &mut self.slots[slot_idx];
        let base = slot.base;

        let mut packets = slot.packets.drain()
            .map(|(pc, p)| (((pc as u32) + window - base) % window, p))
            .collect::<Vec<_>>();
        packets.sort_by_key(|(index, _)| *index);

        let mut payload = Vec::with_capacity(slot.total_frame_len);
        let mut extents = Vec::new();
        for (index, (packet, payload_len)) in packets {
            let fragment = &packet.as_ref()[PacketHeaderV1::SERIALIZED_LEN..][..payload_len];
            if partial {
                let offset = (index as usize * slot.max_payload_len).min(slot.total_frame_len);
                let end = (offset + payload_len).min(slot.total_frame_len);
                if payload.len() < end {
                    payload.resize(end, 0);
                }
                payload[offset..end].copy_from_slice(&fragment[..end - offset]);
                extents.push(offset..end);
            }
            else {
                payload.extend_from_slice(fragment);
            }
            self.pool.release(packet);
        }
        payload.resize(slot.total_frame_len, 0);

        let missing = if partial {
            missing_ranges(slot.total_frame_len, extents)
        }
        else {
            Vec::new()
        };

        slot.active = false;
        self.last_finished = Some((slot.frame_counter, slot.max_packet_counter));
        self.recently_completed.insert(slot.frame_counter);

        AssembledFrame {
            frame_counter: slot.frame_counter,
            timestamp: slot.first_fragment_at,
            payload,
            missing,
        }
    }

    /// Force-completes stalled frames (oldest first), since there is no retransmission in v1
    pub fn sweep(&mut self, now: Instant, _stats: &mut ReassemblyStats) -> Vec<AssembledFrame> {
        let mut stalled = self.slots.iter()
            .enumerate()
            .filter(|(_, s)| s.active)
            .filter(|(_, s)| now.duration_since(s.last_fragment_at) >= self.packet_wait_timeout
                || now.duration_since(s.first_fragment_at) >= self.max_frame_age)
            .map(|(idx, s)| (idx, s.first_fragment_at))
            .collect::<Vec<_>>();
        stalled.sort_by_key(|(_, first)| *first);

        stalled.into_iter()
            .map(|(idx, _)| {
                let slot = &self.slots[idx];
                warn!("force-completing frame #{} with {} of {} bytes received", slot.frame_counter, slot.received_bytes, slot.total_frame_len);
                self.finish(idx, true)
            })
            .collect()
    }

    pub fn is_in_flight(&self, frame_counter: u16) -> bool {
        self.find_slot(frame_counter).is_some()
    }

    /// number of pool buffers currently held by in-flight frames
    pub fn held_packets(&self) -> usize {
        self.slots.iter()
            .map(|s| s.packets.len())
            .sum()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.release_packets(&self.pool);
        }
    }
}
