//! Fixed-capacity packet buffers for reuse. Each buffer is large enough for any UDP payload, so
//!  that the socket reader never has to guess a packet's size before receiving it.
//!
//! A `RawPacket` is deliberately neither `Clone` nor `Copy`: it is owned by exactly one of the
//!  buffer pool, the ingest queue or a frame slot at any given time, and ownership is transferred
//!  by moving the value.

use std::fmt::{Debug, Formatter};
use bytes::buf::UninitSlice;

pub struct RawPacket {
    buf: Box<[u8]>,
    len: usize,
}
impl RawPacket {
    /// maximum UDP payload size
    pub const CAPACITY: usize = 65535;

    pub(crate) fn new() -> RawPacket {
        RawPacket {
            // buffers are reused aggressively, so there is no real benefit in lazy initialization
            buf: vec![0; Self::CAPACITY].into_boxed_slice(),
            len: 0,
        }
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn capacity(&self) -> usize {
        self.buf.len()
    }

    /// the entire underlying buffer, for receiving into it
    pub fn receive_buffer(&mut self) -> &mut [u8] {
        &mut self.buf[..]
    }

    /// mark the first `len` bytes as valid after receiving data
    pub fn set_len(&mut self, len: usize) {
        assert!(len <= self.capacity());
        self.len = len;
    }

    pub fn clear(&mut self) {
        self.len = 0;
    }

    /// This is a convenience function for test code
    #[cfg(test)]
    pub fn from_slice(data: &[u8]) -> RawPacket {
        let mut result = RawPacket::new();
        bytes::BufMut::put_slice(&mut result, data);
        result
    }
}

impl Debug for RawPacket {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "RawPacket{{len:{}}}", self.len)
    }
}

impl AsRef<[u8]> for RawPacket {
    fn as_ref(&self) -> &[u8] {
        &self.buf[..self.len]
    }
}
impl AsMut<[u8]> for RawPacket {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.buf[..self.len]
    }
}

unsafe impl bytes::BufMut for RawPacket {
    fn remaining_mut(&self) -> usize {
        self.buf.len() - self.len
    }

    unsafe fn advance_mut(&mut self, cnt: usize) {
        assert!(self.len + cnt <= self.capacity());
        self.len += cnt;
    }

    fn chunk_mut(&mut self) -> &mut UninitSlice {
        UninitSlice::new(&mut self.buf[self.len..])
    }
}

#[cfg(test)]
mod tests {
    use bytes::BufMut;
    use super::*;

    #[test]
    fn test_put_and_clear() {
        let mut packet = RawPacket::new();
        assert!(packet.is_empty());
        assert_eq!(packet.capacity(), RawPacket::CAPACITY);

        packet.put_u16(0x0102);
        packet.put_slice(&[3, 4]);
        assert_eq!(packet.as_ref(), &[1, 2, 3, 4]);

        packet.clear();
        assert!(packet.is_empty());
        assert_eq!(packet.remaining_mut(), RawPacket::CAPACITY);
    }

    #[test]
    fn test_receive_then_set_len() {
        let mut packet = RawPacket::new();
        packet.receive_buffer()[..3].copy_from_slice(&[7, 8, 9]);
        packet.set_len(3);
        assert_eq!(packet.as_ref(), &[7, 8, 9]);
    }

    #[test]
    #[should_panic]
    fn test_set_len_beyond_capacity() {
        RawPacket::new().set_len(RawPacket::CAPACITY + 1);
    }
}
