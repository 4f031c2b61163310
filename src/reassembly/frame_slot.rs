use std::ops::Range;

use bit_set::BitSet;
use tokio::time::Instant;

use crate::reassembly::{missing_ranges, AssembledFrame};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum StoreOutcome {
    New,
    /// the fragment was received before; its data was overwritten
    Redundant,
    /// the fragment was declared unavailable before, and arrived anyway
    AfterNda,
}

/// Reassembly buffer and bookkeeping for one in-flight frame with explicitly addressed fragments
///  (protocol v2). Slots are allocated once and reused for one frame after another.
///
/// A frame is complete iff every fragment index is either received or declared unavailable;
///  received fragments carry their byte offset, so the frame buffer is filled in place.
pub struct FrameSlot {
    active: bool,

    frame_counter: u16,
    frame_len: usize,
    total_fragments: u16,
    data: Vec<u8>,

    received: BitSet,
    not_available: BitSet,
    /// byte ranges of all received fragments
    extents: Vec<Range<usize>>,

    first_fragment_at: Instant,
    last_fragment_at: Instant,
    next_retry_at: Option<Instant>,
    attempts: u32,
    retransmission_supported: bool,
    highest_index: Option<u16>,
}

impl FrameSlot {
    pub fn new(now: Instant) -> FrameSlot {
        FrameSlot {
            active: false,
            frame_counter: 0,
            frame_len: 0,
            total_fragments: 0,
            data: Vec::new(),
            received: BitSet::new(),
            not_available: BitSet::new(),
            extents: Vec::new(),
            first_fragment_at: now,
            last_fragment_at: now,
            next_retry_at: None,
            attempts: 0,
            retransmission_supported: false,
            highest_index: None,
        }
    }

    pub fn reset(&mut self, frame_counter: u16, frame_len: usize, total_fragments: u16, now: Instant) {
        self.active = true;
        self.frame_counter = frame_counter;
        self.frame_len = frame_len;
        self.total_fragments = total_fragments;
        self.data.clear();
        self.data.resize(frame_len, 0);
        self.received.clear();
        self.not_available.clear();
        self.extents.clear();
        self.first_fragment_at = now;
        self.last_fragment_at = now;
        self.next_retry_at = None;
        self.attempts = 0;
        self.retransmission_supported = false;
        self.highest_index = None;
    }

    pub fn deactivate(&mut self) {
        self.active = false;
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn frame_counter(&self) -> u16 {
        self.frame_counter
    }

    pub fn frame_len(&self) -> usize {
        self.frame_len
    }

    pub fn total_fragments(&self) -> u16 {
        self.total_fragments
    }

    pub fn first_fragment_at(&self) -> Instant {
        self.first_fragment_at
    }

    pub fn last_fragment_at(&self) -> Instant {
        self.last_fragment_at
    }

    pub fn next_retry_at(&self) -> Option<Instant> {
        self.next_retry_at
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn highest_index(&self) -> Option<u16> {
        self.highest_index
    }

    pub fn supports_retransmission(&self) -> bool {
        self.retransmission_supported
    }

    pub fn mark_retransmission_supported(&mut self) {
        self.retransmission_supported = true;
    }

    pub fn num_received(&self) -> usize {
        self.received.len()
    }

    /// number of fragments that are either received or declared unavailable
    pub fn num_satisfied(&self) -> usize {
        self.received.len() + self.not_available.len()
    }

    pub fn is_complete(&self) -> bool {
        self.num_satisfied() == self.total_fragments as usize
    }

    pub fn is_missing(&self, index: u16) -> bool {
        let index = index as usize;
        !self.received.contains(index) && !self.not_available.contains(index)
    }

    /// NB: the caller must ensure that the fragment fits into the frame
    pub fn store(&mut self, index: u16, byte_offset: usize, payload: &[u8], now: Instant) -> StoreOutcome {
        let range = byte_offset..byte_offset + payload.len();
        self.data[range.clone()].copy_from_slice(payload);
        self.last_fragment_at = now;
        self.highest_index = self.highest_index.max(Some(index));

        let index = index as usize;
        if !self.received.insert(index) {
            return StoreOutcome::Redundant;
        }
        self.extents.push(range);
        if self.not_available.remove(index) {
            StoreOutcome::AfterNda
        }
        else {
            StoreOutcome::New
        }
    }

    /// Returns `true` if the fragment was missing before
    pub fn mark_not_available(&mut self, index: u16, now: Instant) -> bool {
        if index >= self.total_fragments || !self.is_missing(index) {
            return false;
        }
        self.last_fragment_at = now;
        self.not_available.insert(index as usize)
    }

    /// all fragment indices that were neither received nor declared unavailable, ascending
    pub fn missing_indices(&self) -> Vec<u16> {
        self.missing_indices_in(0..self.total_fragments)
    }

    pub fn missing_indices_in(&self, range: Range<u16>) -> Vec<u16> {
        range
            .filter(|&i| i < self.total_fragments && self.is_missing(i))
            .collect()
    }

    pub fn record_retry(&mut self, next_retry_at: Instant) {
        self.attempts += 1;
        self.next_retry_at = Some(next_retry_at);
    }

    /// Hands out the frame's data and deactivates the slot. NDA fragments and fragments that were
    ///  never received are reported as missing byte ranges.
    pub fn take_frame(&mut self) -> AssembledFrame {
        self.active = false;
        let payload = std::mem::take(&mut self.data);
        let missing = missing_ranges(payload.len(), std::mem::take(&mut self.extents));

        AssembledFrame {
            frame_counter: self.frame_counter,
            timestamp: self.first_fragment_at,
            payload,
            missing,
        }
    }

    /// number of missing fragments, for logging
    pub fn num_missing(&self) -> usize {
        (self.total_fragments as usize).saturating_sub(self.num_satisfied())
    }
}
