//! Sending of retransmission requests. *Which* fragments to request and when is decided by the
//!  reassembler, which owns the per-frame retry bookkeeping; the coordinator here turns requests
//!  into wire messages and deals with the control channel being unavailable.

use std::collections::VecDeque;
use std::sync::Arc;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::time::Instant;
use tracing::{debug, trace, warn};

use crate::error::{ErrorClass, TransportError};

#[derive(Debug, Clone, Copy, Eq, PartialEq)]
pub enum RequestKind {
    /// a contiguous range of fragments that was just found missing, sent immediately
    Gap,
    /// all missing fragments of a stalled frame
    Complete,
}

#[derive(Debug, Clone, Eq, PartialEq)]
pub struct RetransmissionRequest {
    pub frame_counter: u16,
    /// missing fragment indices in ascending order
    pub indices: Vec<u16>,
    pub kind: RequestKind,
    /// number of complete requests for this frame so far, including this one (0 for gap requests)
    pub attempt: u32,
    /// earliest time for the next complete request for this frame
    pub next_eligible: Instant,
}

impl RetransmissionRequest {
    pub const MAX_INDICES_PER_MESSAGE: usize = 128;

    /// The request split into chunks that fit into a single control message each
    pub fn wire_batches(&self) -> impl Iterator<Item = &[u16]> {
        self.indices.chunks(Self::MAX_INDICES_PER_MESSAGE)
    }
}

/// The control channel as seen by the coordinator, introduced to facilitate mocking
#[cfg_attr(test, automock)]
#[async_trait]
pub trait RetransmissionSender: Send + Sync + 'static {
    fn is_connected(&self) -> bool;

    async fn send_retransmission(&self, frame_counter: u16, indices: &[u16]) -> crate::error::Result<()>;
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct RetransmissionStats {
    pub requests_sent: u64,
    pub messages_sent: u64,
    pub send_failures: u64,
    pub requests_deferred: u64,
    /// deferred requests that were discarded, either because the deferral queue overflowed or
    ///  because their frame was no longer in flight when the control channel came back
    pub deferred_discarded: u64,
}

pub struct RetransmissionCoordinator {
    sender: Arc<dyn RetransmissionSender>,
    deferred: VecDeque<RetransmissionRequest>,
    max_deferred: usize,
    stats: RetransmissionStats,
}

impl RetransmissionCoordinator {
    pub fn new(sender: Arc<dyn RetransmissionSender>, max_deferred: usize) -> RetransmissionCoordinator {
        RetransmissionCoordinator {
            sender,
            deferred: VecDeque::new(),
            max_deferred,
            stats: RetransmissionStats::default(),
        }
    }

    pub fn stats(&self) -> RetransmissionStats {
        self.stats
    }

    pub fn num_deferred(&self) -> usize {
        self.deferred.len()
    }

    pub async fn dispatch(&mut self, requests: Vec<RetransmissionRequest>) {
        for request in requests {
            if self.sender.is_connected() {
                self.send(request).await;
            }
            else {
                self.defer(request);
            }
        }
    }

    /// Re-sends deferred requests once the control channel is back, skipping frames that are
    ///  not in flight any more
    pub async fn flush_deferred(&mut self, is_in_flight: impl Fn(u16) -> bool) {
        if self.deferred.is_empty() || !self.sender.is_connected() {
            return;
        }

        debug!("control channel is available: flushing {} deferred retransmission requests", self.deferred.len());
        let deferred = std::mem::take(&mut self.deferred);
        for request in deferred {
            if is_in_flight(request.frame_counter) {
                self.send(request).await;
            }
            else {
                trace!("frame #{} is not in flight any more - discarding deferred retransmission request", request.frame_counter);
                self.stats.deferred_discarded += 1;
            }
        }
    }

    async fn send(&mut self, request: RetransmissionRequest) {
        trace!("requesting retransmission of {} fragments of frame #{} ({:?})", request.indices.len(), request.frame_counter, request.kind);

        for batch in request.wire_batches() {
            match self.sender.send_retransmission(request.frame_counter, batch).await {
                Ok(()) => {
                    self.stats.messages_sent += 1;
                }
                Err(e) => {
                    // the attempt was already counted when the request was created
                    warn!("sending retransmission request for frame #{} failed: {}", request.frame_counter, e);
                    self.stats.send_failures += 1;
                    if Self::is_connection_problem(&e) {
                        self.defer(request.clone());
                    }
                    return;
                }
            }
        }
        self.stats.requests_sent += 1;
    }

    fn is_connection_problem(e: &TransportError) -> bool {
        matches!(e.class(), ErrorClass::ConnectionLevel)
    }

    fn defer(&mut self, request: RetransmissionRequest) {
        trace!("control channel is not connected - deferring retransmission request for frame #{}", request.frame_counter);
        self.stats.requests_deferred += 1;
        self.deferred.push_back(request);
        while self.deferred.len() > self.max_deferred {
            debug!("too many deferred retransmission requests - discarding the oldest");
            self.deferred.pop_front();
            self.stats.deferred_discarded += 1;
        }
    }
}
