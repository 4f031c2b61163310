//! Hand-off of decoded frames to the application, either through a bounded queue that the
//!  application polls, or through a callback that is invoked on the worker task. A data channel
//!  uses exactly one of the two.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, trace};

use crate::decoder::DecodedFrame;
use crate::error::{Result, TransportError};

/// What happens to a frame that arrives while the queue is full
#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum DropPolicy {
    /// the new frame is discarded
    RejectNew,
    /// the oldest queued frame is discarded to make room
    DropOldest,
    /// the new frame replaces the most recently queued one, leaving older frames untouched
    DropCurrent,
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DeliveryStats {
    pub delivered: u64,
    /// frames that were queued but replaced or pushed out before being polled
    pub dropped: u64,
    /// frames that were never queued
    pub rejected: u64,
}

pub type FrameCallback = Box<dyn FnMut(Result<DecodedFrame>) + Send>;

pub enum FrameSink {
    Queue(Arc<DeliveryQueue>),
    Callback(FrameCallback),
}

impl FrameSink {
    pub fn deliver(&mut self, frame: Result<DecodedFrame>) {
        match self {
            FrameSink::Queue(queue) => queue.push(frame),
            FrameSink::Callback(callback) => callback(frame),
        }
    }
}

struct QueueState {
    frames: VecDeque<Result<DecodedFrame>>,
    stats: DeliveryStats,
}

pub struct DeliveryQueue {
    capacity: usize,
    policy: DropPolicy,
    state: Mutex<QueueState>,
    available: Notify,
    closed: AtomicBool,
}

impl DeliveryQueue {
    pub fn new(capacity: usize, policy: DropPolicy) -> DeliveryQueue {
        DeliveryQueue {
            capacity,
            policy,
            state: Mutex::new(QueueState {
                frames: VecDeque::with_capacity(capacity),
                stats: Default::default(),
            }),
            available: Notify::new(),
            closed: AtomicBool::new(false),
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().unwrap().frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> DeliveryStats {
        self.state.lock().unwrap().stats
    }

    pub fn push(&self, frame: Result<DecodedFrame>) {
        {
            let mut state = self.state.lock().unwrap();
            if state.frames.len() >= self.capacity {
                match self.policy {
                    DropPolicy::RejectNew => {
                        debug!("delivery queue is full - rejecting new frame");
                        state.stats.rejected += 1;
                        return;
                    }
                    DropPolicy::DropOldest => {
                        debug!("delivery queue is full - dropping the oldest frame");
                        state.frames.pop_front();
                        state.stats.dropped += 1;
                    }
                    DropPolicy::DropCurrent => {
                        debug!("delivery queue is full - replacing the newest frame");
                        state.frames.pop_back();
                        state.stats.dropped += 1;
                    }
                }
            }
            state.frames.push_back(frame);
        }
        self.available.notify_one();
    }

    pub fn try_pop(&self) -> Option<Result<DecodedFrame>> {
        let mut state = self.state.lock().unwrap();
        let result = state.frames.pop_front();
        if result.is_some() {
            state.stats.delivered += 1;
        }
        result
    }

    /// Waits for the next frame, or for a decoding error that is reported in its place.
    ///  Queued frames are still returned after the queue was closed.
    pub async fn pop(&self, timeout: Duration) -> Result<DecodedFrame> {
        let deadline = Instant::now() + timeout;
        loop {
            if let Some(frame) = self.try_pop() {
                trace!("delivering frame");
                return frame;
            }
            if self.closed.load(Ordering::Acquire) {
                return Err(TransportError::Closed);
            }
            if tokio::time::timeout_at(deadline, self.available.notified()).await.is_err() {
                return Err(TransportError::Timeout { duration: timeout });
            }
        }
    }

    pub fn close(&self) {
        self.closed.store(true, Ordering::Release);
        self.available.notify_waiters();
        self.available.notify_one();
    }
}
