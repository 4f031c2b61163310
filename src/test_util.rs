//! Builders for wire data in tests

use bytes::BufMut;

use crate::buffers::packet_pool::PacketPool;
use crate::buffers::raw_packet::RawPacket;
use crate::checksum::CRC32;
use crate::data::packet_header::{PacketHeaderV1, PacketHeaderV2, V2Flags};

pub fn v1_fragment(pool: &PacketPool, frame_counter: u16, packet_counter: u16, total_frame_len: u32, payload: &[u8]) -> RawPacket {
    let mut packet = pool.acquire()
        .expect("test pool should have buffers available");
    PacketHeaderV1 {
        frame_counter,
        packet_counter,
        payload_len: payload.len() as u16,
        total_frame_len,
        crc32: CRC32.checksum(payload),
        flags: 0,
    }.ser(&mut packet);
    packet.put_slice(payload);
    packet
}

#[allow(clippy::too_many_arguments)]
pub fn v2_fragment(pool: &PacketPool, frame_counter: u16, packet_counter: u16, total_packet_count: u16, frame_len: u32, byte_offset: u32, payload: &[u8], flags: V2Flags) -> RawPacket {
    let mut buf = Vec::new();
    PacketHeaderV2 {
        frame_counter,
        packet_counter,
        payload_len: payload.len() as u16,
        frame_len,
        crc16: 0,
        flags: flags | V2Flags::CRC_FULL,
        byte_offset,
        total_packet_count,
    }.ser(&mut buf);
    buf.put_slice(payload);
    PacketHeaderV2::finalize_crc(&mut buf);

    let mut packet = pool.acquire()
        .expect("test pool should have buffers available");
    packet.put_slice(&buf);
    packet
}

pub fn v2_nda(pool: &PacketPool, frame_counter: u16, total_packet_count: u16, frame_len: u32, indices: &[u16]) -> RawPacket {
    let payload = indices.iter()
        .flat_map(|i| i.to_be_bytes())
        .collect::<Vec<_>>();
    v2_fragment(pool, frame_counter, PacketHeaderV2::NDA_PACKET_COUNTER, total_packet_count, frame_len, 0, &payload, V2Flags::empty())
}

/// Splits a frame into equally sized v2 fragments (the last one possibly shorter)
pub fn v2_fragments(pool: &PacketPool, frame_counter: u16, frame: &[u8], fragment_len: usize, flags: V2Flags) -> Vec<RawPacket> {
    let total = frame.len().div_ceil(fragment_len) as u16;
    frame.chunks(fragment_len)
        .enumerate()
        .map(|(index, chunk)| v2_fragment(pool, frame_counter, index as u16, total, frame.len() as u32, (index * fragment_len) as u32, chunk, flags))
        .collect()
}
