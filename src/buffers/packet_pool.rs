use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use tracing::{debug, trace, warn};

use crate::buffers::raw_packet::RawPacket;

/// A pool of packet buffers that grows lazily up to a hard ceiling. Once the ceiling is reached,
///  `acquire` returns `None` instead of allocating, and it is up to the caller to back off.
pub struct PacketPool {
    ceiling: usize,
    buffers: Mutex<Vec<RawPacket>>,
    /// number of buffers ever created by this pool - they are never freed before the pool itself
    ///  is dropped
    allocated: AtomicUsize,
}

impl PacketPool {
    pub fn new(ceiling: usize) -> Self {
        PacketPool {
            ceiling,
            buffers: Mutex::new(Vec::new()),
            allocated: AtomicUsize::new(0),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    pub fn acquire(&self) -> Option<RawPacket> {
        {
            let mut buffers = self.lock_buffers();
            if let Some(buffer) = buffers.pop() {
                trace!("returning buffer from pool");
                return Some(buffer);
            }
        }

        // NB: the check and the increment must be atomic with regard to concurrent callers, or
        //      the ceiling could be exceeded
        let reserved = self.allocated.fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| {
            if n < self.ceiling { Some(n + 1) } else { None }
        });

        match reserved {
            Ok(n) => {
                debug!("no buffer in pool: creating buffer #{}", n + 1);
                Some(RawPacket::new())
            }
            Err(_) => {
                trace!("pool is exhausted: all {} buffers are in use", self.ceiling);
                None
            }
        }
    }

    pub fn release(&self, mut buffer: RawPacket) {
        buffer.clear();

        let mut buffers = self.lock_buffers();
        if buffers.len() >= self.allocated.load(Ordering::Acquire) {
            // this is a bug in the caller: the buffer was not created by this pool
            warn!("more buffers returned than were created by the pool - discarding");
            return;
        }
        trace!("returning buffer to pool");
        buffers.push(buffer);
    }

    /// number of buffers that were created by this pool so far
    pub fn allocated(&self) -> usize {
        self.allocated.load(Ordering::Acquire)
    }

    /// number of buffers currently sitting in the pool
    pub fn available(&self) -> usize {
        self.lock_buffers().len()
    }

    /// number of buffers currently owned by someone other than the pool
    pub fn in_use(&self) -> usize {
        let buffers = self.lock_buffers();
        self.allocated() - buffers.len()
    }

    fn lock_buffers(&self) -> std::sync::MutexGuard<'_, Vec<RawPacket>> {
        // the pool's state is a plain Vec that is consistent after every operation, so a
        //  poisoned lock carries no risk
        self.buffers.lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
