use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::SendTimeoutError;
use tokio::time::timeout;
use tracing::{debug, error, info, trace, warn};

use crate::buffers::packet_pool::PacketPool;
use crate::buffers::raw_packet::RawPacket;

/// Abstraction for receiving datagrams from the data socket, introduced to facilitate mocking
///  the I/O part away for testing
#[cfg_attr(test, automock)]
#[async_trait]
pub trait DataSocket: Send + Sync + 'static {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize>;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;
}

#[async_trait]
impl DataSocket for UdpSocket {
    async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
        let (num_read, from) = self.recv_from(buf).await?;
        trace!("received {} bytes from {:?}", num_read, from);
        Ok(num_read)
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        UdpSocket::local_addr(self)
    }
}

/// Creates the UDP data socket, sizing the OS receive buffer before handing the socket to tokio.
///  Must be called from inside a tokio runtime.
pub fn bind_data_socket(addr: SocketAddr, receive_buffer_size: Option<usize>) -> anyhow::Result<UdpSocket> {
    let socket = Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP))?;
    if let Some(size) = receive_buffer_size {
        socket.set_recv_buffer_size(size)?;
        let effective = socket.recv_buffer_size()?;
        if effective < size {
            warn!("requested a receive buffer of {} bytes for the data socket, but the OS granted only {} - expect packet loss under load", size, effective);
        }
    }
    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;

    let socket = UdpSocket::from_std(socket.into())?;
    info!("bound data socket to {:?}", socket.local_addr()?);
    Ok(socket)
}

/// Flags shared between the socket reader and its owner. They are checked at least once per
///  socket timeout.
#[derive(Default)]
pub struct ReaderControl {
    paused: AtomicBool,
    closing: AtomicBool,
}
impl ReaderControl {
    pub fn pause(&self) {
        self.paused.store(true, Ordering::Release);
    }

    pub fn resume(&self) {
        self.paused.store(false, Ordering::Release);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Acquire)
    }

    pub fn close(&self) {
        self.closing.store(true, Ordering::Release);
    }

    pub fn is_closing(&self) -> bool {
        self.closing.load(Ordering::Acquire)
    }
}

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct SocketReaderStats {
    pub packets_received: u64,
    pub bytes_received: u64,
    pub receive_errors: u64,
    /// number of times the reader had to wait for a packet buffer
    pub pool_stalls: u64,
}

#[derive(Default)]
pub struct SocketReaderCounters {
    packets_received: AtomicU64,
    bytes_received: AtomicU64,
    receive_errors: AtomicU64,
    pool_stalls: AtomicU64,
}
impl SocketReaderCounters {
    pub fn snapshot(&self) -> SocketReaderStats {
        SocketReaderStats {
            packets_received: self.packets_received.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            receive_errors: self.receive_errors.load(Ordering::Relaxed),
            pool_stalls: self.pool_stalls.load(Ordering::Relaxed),
        }
    }
}

/// The receive loop of the data channel: it takes a buffer from the pool, fills it from the
///  socket and hands it to the ingest queue. It never parses packets, so that it keeps up with
///  bursts as well as possible.
pub struct SocketReader {
    socket: Arc<dyn DataSocket>,
    pool: Arc<PacketPool>,
    ingest_queue: mpsc::Sender<RawPacket>,
    control: Arc<ReaderControl>,
    counters: Arc<SocketReaderCounters>,
    socket_timeout: Duration,
    stall_backoff: Duration,
}

impl SocketReader {
    pub fn new(
        socket: Arc<dyn DataSocket>,
        pool: Arc<PacketPool>,
        ingest_queue: mpsc::Sender<RawPacket>,
        control: Arc<ReaderControl>,
        counters: Arc<SocketReaderCounters>,
        socket_timeout: Duration,
        stall_backoff: Duration,
    ) -> SocketReader {
        SocketReader {
            socket,
            pool,
            ingest_queue,
            control,
            counters,
            socket_timeout,
            stall_backoff,
        }
    }

    /// Runs until the `closing` flag is set. Dropping the returned future's task also drops the
    ///  sending end of the ingest queue, which is how the worker learns that no more packets
    ///  will arrive.
    pub async fn run(self) {
        info!("starting data socket receive loop");

        let mut held: Option<RawPacket> = None;
        while !self.control.is_closing() {
            if self.control.is_paused() {
                tokio::time::sleep(self.stall_backoff.max(Duration::from_millis(10))).await;
                continue;
            }

            let mut buf = match held.take().or_else(|| self.pool.acquire()) {
                Some(buf) => buf,
                None => {
                    trace!("no packet buffer available - backing off");
                    self.counters.pool_stalls.fetch_add(1, Ordering::Relaxed);
                    tokio::time::sleep(self.stall_backoff).await;
                    continue;
                }
            };

            let num_read = match timeout(self.socket_timeout, self.socket.recv(buf.receive_buffer())).await {
                Ok(Ok(n)) => n,
                Ok(Err(e)) => {
                    error!("data socket error: {}", e);
                    self.counters.receive_errors.fetch_add(1, Ordering::Relaxed);
                    held = Some(buf);
                    tokio::time::sleep(self.stall_backoff).await;
                    continue;
                }
                Err(_) => {
                    trace!("data socket timeout");
                    held = Some(buf);
                    continue;
                }
            };
            buf.set_len(num_read);
            self.counters.packets_received.fetch_add(1, Ordering::Relaxed);
            self.counters.bytes_received.fetch_add(num_read as u64, Ordering::Relaxed);

            if let Err(buf) = self.enqueue(buf).await {
                // the packet is dropped, the buffer is not
                self.pool.release(buf);
            }
        }

        if let Some(buf) = held {
            self.pool.release(buf);
        }
        info!("data socket receive loop terminated");
    }

    /// Blocks while the ingest queue is full, waking up periodically to check for shutdown
    async fn enqueue(&self, mut buf: RawPacket) -> Result<(), RawPacket> {
        loop {
            match self.ingest_queue.send_timeout(buf, self.socket_timeout).await {
                Ok(()) => return Ok(()),
                Err(SendTimeoutError::Timeout(b)) => {
                    if self.control.is_closing() {
                        return Err(b);
                    }
                    debug!("ingest queue is full - waiting");
                    buf = b;
                }
                Err(SendTimeoutError::Closed(b)) => {
                    debug!("ingest queue is closed - dropping packet");
                    self.control.close();
                    return Err(b);
                }
            }
        }
    }
}
