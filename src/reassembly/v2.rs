//! Reassembly for protocol v2: every fragment carries its index, its byte offset in the frame and
//!  the frame's total number of fragments, so completeness is exact and fragments are copied into
//!  the frame buffer as they arrive.
//!
//! The device keeps recently sent frames in a buffer and resends fragments on request. When a
//!  fragment is not available any more, it answers with an NDA notification instead, and the
//!  fragment counts as 'satisfied without data'.

use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::config::ReassemblyConfig;
use crate::data::packet_header::{parse_nda_indices, PacketHeaderV2};
use crate::reassembly::frame_slot::{FrameSlot, StoreOutcome};
use crate::reassembly::{AssembledFrame, IngestOutcome, ReassemblyStats, RecentlyCompleted, RejectReason, SweepResult};
use crate::retransmission::{RequestKind, RetransmissionRequest};
use crate::safe_converter::SafeCast;

pub struct V2Reassembler {
    slots: Vec<FrameSlot>,
    recently_completed: RecentlyCompleted,
    gap_requests: Vec<RetransmissionRequest>,

    packet_wait_timeout: Duration,
    max_attempts: u32,
    retry_interval_min: Duration,
    max_frame_age: Duration,
}

impl V2Reassembler {
    /// Upper bound for a frame's length, protecting against absurd allocations from corrupt headers
    pub const MAX_FRAME_LEN: usize = 256 * 1024 * 1024;

    pub fn new(config: &ReassemblyConfig) -> V2Reassembler {
        let now = Instant::now();
        V2Reassembler {
            slots: (0..config.num_slots).map(|_| FrameSlot::new(now)).collect(),
            recently_completed: RecentlyCompleted::new(config.recently_completed_history),
            gap_requests: Vec::new(),
            packet_wait_timeout: config.packet_wait_timeout,
            max_attempts: config.max_retransmission_attempts,
            retry_interval_min: config.retry_interval_min,
            max_frame_age: config.max_frame_age(),
        }
    }

    /// NB: `payload` is expected to be validated against the header, see
    ///  [crate::data::packet_header::parse_data_packet]
    pub fn ingest(&mut self, header: PacketHeaderV2, payload: &[u8], now: Instant, stats: &mut ReassemblyStats) -> IngestOutcome {
        if header.is_nda() {
            return self.apply_nda(&header, payload, now, stats);
        }

        trace!("received fragment #{} of {} for frame #{} ({} bytes at offset {})", header.packet_counter, header.total_packet_count, header.frame_counter, payload.len(), header.byte_offset);

        let slot_idx = match self.find_slot(header.frame_counter) {
            Some(idx) => {
                let slot = &self.slots[idx];
                if slot.frame_len() != header.frame_len.safe_cast() || slot.total_fragments() != header.total_packet_count {
                    debug!("fragment for frame #{} has frame length {} / {} fragments, slot has {} / {} - dropping", header.frame_counter, header.frame_len, header.total_packet_count, slot.frame_len(), slot.total_fragments());
                    return IngestOutcome::Rejected(RejectReason::InconsistentHeader);
                }
                idx
            }
            None => {
                if self.recently_completed.contains(header.frame_counter) {
                    trace!("fragment for recently completed frame #{} - dropping", header.frame_counter);
                    stats.redundant_fragments += 1;
                    return IngestOutcome::Rejected(RejectReason::AlreadyCompleted);
                }
                if header.is_retransmitted() {
                    debug!("retransmitted fragment for frame #{} which is not in flight any more - dropping", header.frame_counter);
                    stats.late_retransmissions += 1;
                    return IngestOutcome::Rejected(RejectReason::LateRetransmission);
                }
                let frame_len: usize = header.frame_len.safe_cast();
                if frame_len > Self::MAX_FRAME_LEN {
                    debug!("frame #{} has an implausible length of {} bytes - dropping", header.frame_counter, frame_len);
                    return IngestOutcome::Rejected(RejectReason::InconsistentHeader);
                }
                self.claim_slot(header.frame_counter, frame_len, header.total_packet_count, now, stats)
            }
        };

        let slot = &mut self.slots[slot_idx];
        let is_first_fragment = slot.highest_index().is_none();
        let expected_next = slot.highest_index()
            .map(|h| h.saturating_add(1))
            .unwrap_or(0);

        if header.supports_retransmission() {
            slot.mark_retransmission_supported();
        }

        match slot.store(header.packet_counter, header.byte_offset.safe_cast(), payload, now) {
            StoreOutcome::New => {}
            StoreOutcome::Redundant => {
                trace!("redundant fragment #{} for frame #{}", header.packet_counter, header.frame_counter);
                stats.redundant_fragments += 1;
            }
            StoreOutcome::AfterNda => {
                debug!("fragment #{} for frame #{} arrived after it was declared unavailable", header.packet_counter, header.frame_counter);
            }
        }

        if header.supports_retransmission() && !header.is_retransmitted() {
            self.detect_gaps(slot_idx, header.packet_counter, expected_next, is_first_fragment, now);
        }

        if self.slots[slot_idx].is_complete() {
            IngestOutcome::Completed(self.finish(slot_idx))
        }
        else {
            IngestOutcome::Appended
        }
    }

    fn apply_nda(&mut self, header: &PacketHeaderV2, payload: &[u8], now: Instant, stats: &mut ReassemblyStats) -> IngestOutcome {
        let Some(slot_idx) = self.find_slot(header.frame_counter) else {
            debug!("NDA notification for frame #{} which is not in flight - ignoring", header.frame_counter);
            return IngestOutcome::Rejected(RejectReason::UnknownFrame);
        };

        let indices = parse_nda_indices(payload);
        debug!("device declared {} fragments of frame #{} as unavailable", indices.len(), header.frame_counter);

        let slot = &mut self.slots[slot_idx];
        for index in indices {
            if slot.mark_not_available(index, now) {
                stats.nda_indices += 1;
            }
        }

        if slot.is_complete() {
            IngestOutcome::Completed(self.finish(slot_idx))
        }
        else {
            IngestOutcome::NdaApplied
        }
    }

    /// Emits targeted requests for fragments that were skipped right before the one that just
    ///  arrived. The first fragment of a frame additionally covers the tail of the previous frame.
    fn detect_gaps(&mut self, slot_idx: usize, index: u16, expected_next: u16, is_first_fragment: bool, now: Instant) {
        let slot = &self.slots[slot_idx];
        let frame_counter = slot.frame_counter();

        if index > expected_next {
            let missing = slot.missing_indices_in(expected_next..index);
            self.push_gap_request(frame_counter, missing, now);
        }

        if is_first_fragment {
            let prev_frame_counter = frame_counter.wrapping_sub(1);
            if let Some(prev_idx) = self.find_slot(prev_frame_counter) {
                let prev = &self.slots[prev_idx];
                let tail_start = prev.highest_index()
                    .map(|h| h.saturating_add(1))
                    .unwrap_or(0);
                let missing = prev.missing_indices_in(tail_start..prev.total_fragments());
                self.push_gap_request(prev_frame_counter, missing, now);
            }
        }
    }

    fn push_gap_request(&mut self, frame_counter: u16, indices: Vec<u16>, now: Instant) {
        if indices.is_empty() {
            return;
        }
        trace!("gap detected in frame #{}: fragments {:?}", frame_counter, indices);
        self.gap_requests.push(RetransmissionRequest {
            frame_counter,
            indices,
            kind: RequestKind::Gap,
            attempt: 0,
            next_eligible: now,
        });
    }

    pub fn take_gap_requests(&mut self) -> Vec<RetransmissionRequest> {
        std::mem::take(&mut self.gap_requests)
    }

    fn find_slot(&self, frame_counter: u16) -> Option<usize> {
        self.slots.iter()
            .position(|s| s.is_active() && s.frame_counter() == frame_counter)
    }

    fn claim_slot(&mut self, frame_counter: u16, frame_len: usize, total_fragments: u16, now: Instant, stats: &mut ReassemblyStats) -> usize {
        let idx = match self.slots.iter().position(|s| !s.is_active()) {
            Some(idx) => idx,
            None => {
                let (idx, oldest) = self.slots.iter()
                    .enumerate()
                    .min_by_key(|(_, s)| s.first_fragment_at())
                    .expect("there is at least one slot");
                warn!("all frame slots are busy: dropping incomplete frame #{} ({} of {} fragments missing) in favor of frame #{}", oldest.frame_counter(), oldest.num_missing(), oldest.total_fragments(), frame_counter);
                stats.frames_dropped += 1;
                self.gap_requests.retain(|r| r.frame_counter != oldest.frame_counter());
                idx
            }
        };

        trace!("frame #{}: {} bytes in {} fragments", frame_counter, frame_len, total_fragments);
        self.slots[idx].reset(frame_counter, frame_len, total_fragments, now);
        idx
    }

    fn finish(&mut self, slot_idx: usize) -> AssembledFrame {
        let frame = self.slots[slot_idx].take_frame();
        self.recently_completed.insert(frame.frame_counter);
        self.gap_requests.retain(|r| r.frame_counter != frame.frame_counter);
        frame
    }

    /// Periodic check of all in-flight frames: stalled frames get a complete retransmission
    ///  request as long as their budget lasts, and are force-completed after that. Frames older
    ///  than the maximum frame age are force-completed regardless.
    pub fn sweep(&mut self, now: Instant, _stats: &mut ReassemblyStats) -> SweepResult {
        let mut result = SweepResult::default();
        let mut to_force = Vec::new();

        for (idx, slot) in self.slots.iter_mut().enumerate() {
            if !slot.is_active() {
                continue;
            }
            if now.duration_since(slot.first_fragment_at()) >= self.max_frame_age {
                to_force.push(idx);
                continue;
            }
            if now.duration_since(slot.last_fragment_at()) < self.packet_wait_timeout {
                continue;
            }

            if slot.supports_retransmission() && slot.attempts() < self.max_attempts {
                if slot.next_retry_at().map_or(true, |t| now >= t) {
                    let next_eligible = now + self.retry_interval_min;
                    slot.record_retry(next_eligible);
                    debug!("frame #{} stalled: requesting {} missing fragments (attempt {})", slot.frame_counter(), slot.num_missing(), slot.attempts());
                    result.requests.push(RetransmissionRequest {
                        frame_counter: slot.frame_counter(),
                        indices: slot.missing_indices(),
                        kind: RequestKind::Complete,
                        attempt: slot.attempts(),
                        next_eligible,
                    });
                }
            }
            else {
                to_force.push(idx);
            }
        }

        to_force.sort_by_key(|&idx| self.slots[idx].first_fragment_at());
        for idx in to_force {
            let slot = &self.slots[idx];
            warn!("force-completing frame #{} with {} of {} fragments missing", slot.frame_counter(), slot.num_missing(), slot.total_fragments());
            result.forced.push(self.finish(idx));
        }
        result
    }

    pub fn is_in_flight(&self, frame_counter: u16) -> bool {
        self.find_slot(frame_counter).is_some()
    }

    pub fn num_in_flight(&self) -> usize {
        self.slots.iter()
            .filter(|s| s.is_active())
            .count()
    }

    pub fn clear(&mut self) {
        for slot in &mut self.slots {
            slot.deactivate();
        }
        self.gap_requests.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::packet_header::V2Flags;
    use proptest::prelude::*;
    use rand::seq::SliceRandom;
    use rand::SeedableRng;
    use rstest::rstest;

    const RETRANS: V2Flags = V2Flags::RETRANSMISSION_CAPABLE;

    fn config() -> ReassemblyConfig {
        ReassemblyConfig {
            num_slots: 2,
            packet_wait_timeout: Duration::from_millis(100),
            max_retransmission_attempts: 3,
            retry_interval_min: Duration::from_millis(20),
            ..ReassemblyConfig::default()
        }
    }

    fn header(frame_counter: u16, index: u16, total: u16, fragment_len: u32, flags: V2Flags) -> PacketHeaderV2 {
        PacketHeaderV2 {
            frame_counter,
            packet_counter: index,
            payload_len: fragment_len as u16,
            frame_len: fragment_len * total as u32,
            crc16: 0,
            flags,
            byte_offset: index as u32 * fragment_len,
            total_packet_count: total,
        }
    }

    fn payload(index: u16, fragment_len: u32) -> Vec<u8> {
        vec![index as u8 + 1; fragment_len as usize]
    }

    fn nda(frame_counter: u16, total: u16, fragment_len: u32, indices: &[u16]) -> (PacketHeaderV2, Vec<u8>) {
        let mut h = header(frame_counter, PacketHeaderV2::NDA_PACKET_COUNTER, total, fragment_len, V2Flags::empty());
        let payload = indices.iter().flat_map(|i| i.to_be_bytes()).collect::<Vec<_>>();
        h.payload_len = payload.len() as u16;
        h.byte_offset = 0;
        (h, payload)
    }

    struct Harness {
        reassembler: V2Reassembler,
        stats: ReassemblyStats,
        start: Instant,
    }
    impl Harness {
        fn new(config: ReassemblyConfig) -> Harness {
            Harness {
                reassembler: V2Reassembler::new(&config),
                stats: ReassemblyStats::default(),
                start: Instant::now(),
            }
        }

        fn at(&self, millis: u64) -> Instant {
            self.start + Duration::from_millis(millis)
        }

        fn fragment(&mut self, millis: u64, frame_counter: u16, index: u16, total: u16, flags: V2Flags) -> IngestOutcome {
            let now = self.at(millis);
            self.reassembler.ingest(header(frame_counter, index, total, 250, flags), &payload(index, 250), now, &mut self.stats)
        }

        fn sweep(&mut self, millis: u64) -> SweepResult {
            let now = self.at(millis);
            self.reassembler.sweep(now, &mut self.stats)
        }
    }

    #[test]
    fn test_out_of_order_then_stall_requests_only_missing() {
        let mut h = Harness::new(config());
        for index in [3, 0, 1] {
            assert!(matches!(h.fragment(0, 1, index, 4, RETRANS), IngestOutcome::Appended));
        }

        // before the timeout, nothing happens
        let result = h.sweep(50);
        assert!(result.requests.is_empty());
        assert!(result.forced.is_empty());

        let result = h.sweep(100);
        assert_eq!(result.requests.len(), 1);
        assert_eq!(result.requests[0].frame_counter, 1);
        assert_eq!(result.requests[0].indices, vec![2]);
        assert_eq!(result.requests[0].kind, RequestKind::Complete);
        assert_eq!(result.requests[0].attempt, 1);
    }

    #[test]
    fn test_late_fragment_completes_frame() {
        let mut h = Harness::new(config());
        for index in [3, 0, 1] {
            h.fragment(0, 1, index, 4, RETRANS);
        }
        match h.fragment(80, 1, 2, 4, RETRANS) {
            IngestOutcome::Completed(frame) => {
                assert_eq!(frame.frame_counter, 1);
                assert_eq!(frame.payload.len(), 1000);
                for index in 0..4 {
                    assert_eq!(&frame.payload[index * 250..(index + 1) * 250], payload(index as u16, 250).as_slice());
                }
                assert!(!frame.is_partial());
                assert_eq!(frame.timestamp, h.at(0));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert!(!h.reassembler.is_in_flight(1));
    }

    #[test]
    fn test_nda_completes_frame_with_missing_range() {
        let mut h = Harness::new(config());
        for index in [3, 0, 1] {
            h.fragment(0, 1, index, 4, RETRANS);
        }
        let (nda_header, nda_payload) = nda(1, 4, 250, &[2]);
        match h.reassembler.ingest(nda_header, &nda_payload, h.at(120), &mut h.stats) {
            IngestOutcome::Completed(frame) => {
                assert_eq!(frame.missing, vec![500..750]);
                assert!(frame.overlaps_missing(700..800));
                assert!(!frame.overlaps_missing(750..1000));
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(h.stats.nda_indices, 1);
    }

    #[test]
    fn test_partial_nda() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, RETRANS);
        let (nda_header, nda_payload) = nda(1, 4, 250, &[1, 2]);
        assert!(matches!(h.reassembler.ingest(nda_header, &nda_payload, h.at(10), &mut h.stats), IngestOutcome::NdaApplied));

        let (nda_header, nda_payload) = nda(9, 4, 250, &[1]);
        assert!(matches!(h.reassembler.ingest(nda_header, &nda_payload, h.at(10), &mut h.stats), IngestOutcome::Rejected(RejectReason::UnknownFrame)));
    }

    #[test]
    fn test_gap_request_within_frame() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 8, RETRANS);
        h.fragment(0, 1, 1, 8, RETRANS);
        assert!(h.reassembler.take_gap_requests().is_empty());

        h.fragment(0, 1, 4, 8, RETRANS);
        let requests = h.reassembler.take_gap_requests();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].indices, vec![2, 3]);
        assert_eq!(requests[0].kind, RequestKind::Gap);

        // retransmitted fragments and fragments from senders without retransmission support
        //  do not trigger gap requests
        h.fragment(0, 1, 6, 8, RETRANS | V2Flags::RETRANSMITTED);
        h.fragment(0, 1, 7, 8, V2Flags::empty());
        assert!(h.reassembler.take_gap_requests().is_empty());
    }

    #[test]
    fn test_gap_request_across_frame_boundary() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, RETRANS);
        h.fragment(0, 1, 1, 4, RETRANS);

        // frame 2 starts at fragment 1: fragment 0 of frame 2 and the tail of frame 1 are missing
        h.fragment(0, 2, 1, 4, RETRANS);
        let mut requests = h.reassembler.take_gap_requests();
        requests.sort_by_key(|r| r.frame_counter);
        assert_eq!(requests.len(), 2);
        assert_eq!((requests[0].frame_counter, requests[0].indices.clone()), (1, vec![2, 3]));
        assert_eq!((requests[1].frame_counter, requests[1].indices.clone()), (2, vec![0]));
    }

    #[test]
    fn test_retries_are_bounded_then_forced() {
        let mut h = Harness::new(ReassemblyConfig {
            max_retransmission_attempts: 2,
            ..config()
        });
        h.fragment(0, 1, 0, 4, RETRANS);

        assert_eq!(h.sweep(100).requests.len(), 1);
        // throttled by the retry interval
        assert!(h.sweep(110).requests.is_empty());
        assert_eq!(h.sweep(150).requests[0].attempt, 2);

        let result = h.sweep(200);
        assert!(result.requests.is_empty());
        assert_eq!(result.forced.len(), 1);
        assert_eq!(result.forced[0].missing, vec![250..1000]);
        assert!(!h.reassembler.is_in_flight(1));
    }

    #[test]
    fn test_without_retransmission_stalled_frames_are_forced() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, V2Flags::empty());
        assert!(h.sweep(99).forced.is_empty());

        let result = h.sweep(100);
        assert!(result.requests.is_empty());
        assert_eq!(result.forced.len(), 1);
    }

    #[test]
    fn test_forced_frames_oldest_first() {
        let mut h = Harness::new(config());
        h.fragment(10, 2, 0, 4, V2Flags::empty());
        h.fragment(0, 1, 0, 4, V2Flags::empty());

        let result = h.sweep(200);
        let counters = result.forced.iter().map(|f| f.frame_counter).collect::<Vec<_>>();
        assert_eq!(counters, vec![1, 2]);
    }

    #[test]
    fn test_eviction_of_oldest() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, RETRANS);
        h.fragment(5, 2, 0, 4, RETRANS);
        h.fragment(10, 3, 0, 4, RETRANS);

        assert!(!h.reassembler.is_in_flight(1));
        assert!(h.reassembler.is_in_flight(2));
        assert!(h.reassembler.is_in_flight(3));
        assert_eq!(h.stats.frames_dropped, 1);
    }

    #[test]
    fn test_late_retransmission_is_discarded() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, RETRANS);
        h.fragment(5, 2, 0, 4, RETRANS);

        let outcome = h.fragment(10, 3, 0, 4, RETRANS | V2Flags::RETRANSMITTED);
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::LateRetransmission)));
        assert!(h.reassembler.is_in_flight(1));
        assert!(h.reassembler.is_in_flight(2));
        assert_eq!(h.stats.frames_dropped, 0);
        assert_eq!(h.stats.late_retransmissions, 1);
    }

    #[test]
    fn test_fragment_of_completed_frame_is_rejected() {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 1, V2Flags::empty());
        assert!(matches!(h.fragment(1, 1, 0, 1, V2Flags::empty()), IngestOutcome::Rejected(RejectReason::AlreadyCompleted)));
        assert_eq!(h.reassembler.num_in_flight(), 0);
        assert_eq!(h.stats.redundant_fragments, 1);
    }

    #[rstest]
    #[case::different_total(8, 250)]
    #[case::different_len(4, 200)]
    fn test_inconsistent_header(#[case] total: u16, #[case] fragment_len: u32) {
        let mut h = Harness::new(config());
        h.fragment(0, 1, 0, 4, V2Flags::empty());

        let outcome = h.reassembler.ingest(header(1, 1, total, fragment_len, V2Flags::empty()), &payload(1, fragment_len), h.at(1), &mut h.stats);
        assert!(matches!(outcome, IngestOutcome::Rejected(RejectReason::InconsistentHeader)));
    }

    #[test]
    fn test_bounded_staleness_with_steady_trickle() {
        // a fragment that keeps trickling in resets the stall timer, but not the frame's age
        let mut h = Harness::new(config());
        let total = 100;
        let max_age_millis = config().max_frame_age().as_millis() as u64;

        let mut forced_at = None;
        for step in 0..total {
            let t = step as u64 * 50;
            h.fragment(t, 1, step, total, RETRANS);
            if !h.sweep(t).forced.is_empty() {
                forced_at = Some(t);
                break;
            }
        }
        assert_eq!(forced_at, Some(max_age_millis));
    }

    fn shuffled_fragments(total: u16, duplicates: &[u16], seed: u64) -> Vec<u16> {
        let mut order = (0..total).chain(duplicates.iter().map(|d| d % total)).collect::<Vec<_>>();
        order.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed));
        order
    }

    proptest! {
        #[test]
        fn prop_complete_in_any_order(total in 1u16..40, seed in any::<u64>()) {
            let mut h = Harness::new(config());
            let order = shuffled_fragments(total, &[], seed);

            let mut completed = None;
            for (n, &index) in order.iter().enumerate() {
                match h.fragment(0, 7, index, total, V2Flags::empty()) {
                    IngestOutcome::Completed(frame) => {
                        prop_assert_eq!(n + 1, order.len());
                        completed = Some(frame);
                    }
                    IngestOutcome::Appended => prop_assert!(n + 1 < order.len()),
                    other => prop_assert!(false, "unexpected outcome {:?}", other),
                }
            }

            let frame = completed.expect("frame should be complete");
            let expected = (0..total).flat_map(|i| payload(i, 250)).collect::<Vec<_>>();
            prop_assert_eq!(frame.payload, expected);
            prop_assert!(frame.missing.is_empty());
        }

        #[test]
        fn prop_duplicates_are_idempotent(total in 2u16..30, duplicates in proptest::collection::vec(any::<u16>(), 0..20), seed in any::<u64>()) {
            // fragment 0 goes last so that every duplicate hits the open slot
            let mut order = shuffled_fragments(total - 1, &[], seed)
                .into_iter()
                .map(|i| i + 1)
                .chain(duplicates.iter().map(|d| 1 + d % (total - 1)))
                .collect::<Vec<_>>();
            order.shuffle(&mut rand::rngs::StdRng::seed_from_u64(seed ^ 0x5555));
            order.push(0);

            let mut h = Harness::new(config());
            let mut frames = Vec::new();
            for &index in &order {
                if let IngestOutcome::Completed(frame) = h.fragment(0, 7, index, total, V2Flags::empty()) {
                    frames.push(frame);
                }
            }

            prop_assert_eq!(frames.len(), 1);
            prop_assert_eq!(h.stats.redundant_fragments as usize, order.len() - total as usize);
            let expected_payload = (0..total).flat_map(|i| payload(i, 250)).collect::<Vec<_>>();
            prop_assert_eq!(&frames[0].payload, &expected_payload);
            prop_assert!(frames[0].missing.is_empty());
        }
    }
}
