//! The application-facing handle of a frame stream. Opening a data channel binds the data
//!  socket, connects the control channel, asks the device to start streaming and spawns three
//!  long-running tasks:
//!
//! * the socket reader, which moves raw packets into the ingest queue
//! * the worker, which is the only consumer of the ingest queue: it reassembles frames, requests
//!   retransmissions, decodes frames and is the only producer for frame delivery
//! * the control channel monitor, which sends keep-alives and reconnects

use std::net::{IpAddr, SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::select;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::buffers::packet_pool::PacketPool;
use crate::buffers::raw_packet::RawPacket;
use crate::config::DataChannelConfig;
use crate::control::connection_state::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::control::control_channel::ControlChannel;
use crate::control::transport::{ControlConnector, EthernetConnector};
use crate::data::socket_reader::{bind_data_socket, DataSocket, ReaderControl, SocketReader, SocketReaderCounters, SocketReaderStats};
use crate::decoder::{DecodedFrame, DecoderStats, FrameDecoder};
use crate::delivery::{DeliveryQueue, DeliveryStats, FrameCallback, FrameSink};
use crate::error::{ErrorClass, Result, TransportError};
use crate::reassembly::{AssembledFrame, FrameReassembler, IngestOutcome, ReassemblyStats};
use crate::retransmission::{RetransmissionCoordinator, RetransmissionSender, RetransmissionStats};

#[derive(Debug, Clone, Copy, Default, Eq, PartialEq)]
pub struct DataChannelStats {
    pub socket_reader: SocketReaderStats,
    pub reassembly: ReassemblyStats,
    pub retransmission: RetransmissionStats,
    pub decoder: DecoderStats,
    pub delivery: DeliveryStats,
    pub buffers_in_use: usize,
    pub buffers_allocated: usize,
}

/// Snapshots published by the worker after every step
#[derive(Default)]
struct WorkerStats {
    reassembly: ReassemblyStats,
    retransmission: RetransmissionStats,
    decoder: DecoderStats,
}

pub struct DataChannel {
    local_addr: SocketAddr,
    pool: Arc<PacketPool>,
    control: Arc<ControlChannel>,
    reader_control: Arc<ReaderControl>,
    reader_counters: Arc<SocketReaderCounters>,
    worker_closing: Arc<AtomicBool>,
    worker_stats: Arc<Mutex<WorkerStats>>,
    delivery: Option<Arc<DeliveryQueue>>,
    data_state: Mutex<ConnectionStateMachine>,
    reader_handle: Option<JoinHandle<()>>,
    worker_handle: Option<JoinHandle<()>>,
    monitor_handle: Option<JoinHandle<()>>,
}

impl DataChannel {
    /// Opens a data channel that delivers frames through [DataChannel::poll_frame]
    pub async fn open(config: DataChannelConfig) -> Result<DataChannel> {
        let (socket, connector) = Self::ethernet(&config)?;
        Self::open_with(config, socket, connector, None).await
    }

    /// Opens a data channel that delivers frames by calling `callback` on the worker task
    pub async fn open_with_callback(config: DataChannelConfig, callback: FrameCallback) -> Result<DataChannel> {
        let (socket, connector) = Self::ethernet(&config)?;
        Self::open_with(config, socket, connector, Some(callback)).await
    }

    fn ethernet(config: &DataChannelConfig) -> Result<(Arc<dyn DataSocket>, Box<dyn ControlConnector>)> {
        config.validate()?;
        let socket: Arc<dyn DataSocket> = Arc::new(bind_data_socket(config.data_bind_addr, config.receive_buffer_size)?);
        let connector: Box<dyn ControlConnector> = Box::new(EthernetConnector::new(&config.control));
        Ok((socket, connector))
    }

    pub(crate) async fn open_with(
        config: DataChannelConfig,
        socket: Arc<dyn DataSocket>,
        connector: Box<dyn ControlConnector>,
        callback: Option<FrameCallback>,
    ) -> Result<DataChannel> {
        config.validate()?;

        let mut data_state = ConnectionStateMachine::new("udp data");
        data_state.on_event(ConnectionEvent::Enable);
        data_state.on_event(ConnectionEvent::AttemptStarted);

        let local_addr = socket.local_addr()
            .map_err(|e| TransportError::io("reading the data socket's local address", e))?;

        let control = Arc::new(ControlChannel::new(config.control, connector));
        control.connect().await?;

        let callback_addr = match Self::callback_addr(local_addr, control.local_addr().await) {
            Ok(addr) => addr,
            Err(e) => {
                control.close().await;
                return Err(e);
            }
        };
        if let Err(e) = control.start_stream(callback_addr).await {
            control.close().await;
            return Err(e);
        }
        data_state.on_event(ConnectionEvent::Established);

        let pool = Arc::new(PacketPool::new(config.pool_ceiling));
        let (ingest_sender, ingest_receiver) = mpsc::channel(config.ingest_queue_capacity);

        let reader_control = Arc::new(ReaderControl::default());
        let reader_counters = Arc::new(SocketReaderCounters::default());
        let reader = SocketReader::new(
            socket,
            pool.clone(),
            ingest_sender,
            reader_control.clone(),
            reader_counters.clone(),
            config.socket_timeout,
            config.pool_stall_backoff,
        );

        let (sink, delivery) = match callback {
            Some(callback) => (FrameSink::Callback(callback), None),
            None => {
                let queue = Arc::new(DeliveryQueue::new(config.delivery.capacity, config.delivery.drop_policy));
                (FrameSink::Queue(queue.clone()), Some(queue))
            }
        };

        let worker_closing = Arc::new(AtomicBool::new(false));
        let worker_stats = Arc::new(Mutex::new(WorkerStats::default()));
        let sender: Arc<dyn RetransmissionSender> = control.clone();
        let worker = Worker {
            ingest: ingest_receiver,
            pool: pool.clone(),
            reassembler: FrameReassembler::new(&config.reassembly, pool.clone()),
            coordinator: RetransmissionCoordinator::new(sender, config.reassembly.max_deferred_requests),
            decoder: FrameDecoder::new(),
            sink,
            sweep_interval: config.reassembly.sweep_interval(),
            closing: worker_closing.clone(),
            stats: worker_stats.clone(),
        };

        let reader_handle = tokio::spawn(reader.run());
        let worker_handle = tokio::spawn(worker.run());
        let monitor_handle = tokio::spawn(control.clone().run_monitor());

        info!("data channel open on {:?}, using up to {} packet buffers", local_addr, pool.ceiling());
        Ok(DataChannel {
            local_addr,
            pool,
            control,
            reader_control,
            reader_counters,
            worker_closing,
            worker_stats,
            delivery,
            data_state: Mutex::new(data_state),
            reader_handle: Some(reader_handle),
            worker_handle: Some(worker_handle),
            monitor_handle: Some(monitor_handle),
        })
    }

    /// The address announced to the device. If the data socket is bound to a wildcard address,
    ///  the control socket's local IP is used since that is the one facing the device.
    fn callback_addr(data_addr: SocketAddr, control_addr: Option<SocketAddr>) -> Result<SocketAddrV4> {
        let ip = match (data_addr.ip(), control_addr.map(|a| a.ip())) {
            (IpAddr::V4(ip), _) if !ip.is_unspecified() => ip,
            (_, Some(IpAddr::V4(ip))) => ip,
            _ => return Err(TransportError::Config { reason: format!("no IPv4 address to announce for data socket {:?}", data_addr) }),
        };
        Ok(SocketAddrV4::new(ip, data_addr.port()))
    }

    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    pub fn control(&self) -> &ControlChannel {
        &self.control
    }

    pub fn data_state(&self) -> ConnectionState {
        self.data_state.lock().unwrap().state()
    }

    /// Waits for the next decoded frame
    pub async fn poll_frame(&self, timeout: Duration) -> Result<DecodedFrame> {
        match &self.delivery {
            Some(queue) => queue.pop(timeout).await,
            None => Err(TransportError::CallbackMode),
        }
    }

    /// Stops reading from the data socket. Packets that arrive while paused are lost in the OS.
    pub fn pause(&self) {
        info!("pausing data channel");
        self.reader_control.pause();
    }

    pub fn resume(&self) {
        info!("resuming data channel");
        self.reader_control.resume();
    }

    pub fn statistics(&self) -> DataChannelStats {
        let worker_stats = self.worker_stats.lock().unwrap();
        DataChannelStats {
            socket_reader: self.reader_counters.snapshot(),
            reassembly: worker_stats.reassembly,
            retransmission: worker_stats.retransmission,
            decoder: worker_stats.decoder,
            delivery: self.delivery.as_ref()
                .map(|q| q.stats())
                .unwrap_or_default(),
            buffers_in_use: self.pool.in_use(),
            buffers_allocated: self.pool.allocated(),
        }
    }

    /// Stops streaming and shuts down all tasks in order: socket reader, ingest queue, worker,
    ///  control channel monitor. Frames that were queued for delivery can still be polled.
    pub async fn close(&mut self) {
        if self.reader_handle.is_none() {
            return;
        }
        info!("closing data channel on {:?}", self.local_addr);

        if self.control.is_connected() {
            if let Err(e) = self.control.stop_stream().await {
                warn!("stopping the stream failed: {}", e);
            }
        }

        self.reader_control.close();
        if let Some(handle) = self.reader_handle.take() {
            if let Err(e) = handle.await {
                error!("socket reader task failed: {}", e);
            }
        }

        // the worker frees the remaining queued packets instead of processing them
        self.worker_closing.store(true, Ordering::Release);
        if let Some(handle) = self.worker_handle.take() {
            if let Err(e) = handle.await {
                error!("worker task failed: {}", e);
            }
        }

        self.control.close().await;
        if let Some(handle) = self.monitor_handle.take() {
            if let Err(e) = handle.await {
                error!("control channel monitor task failed: {}", e);
            }
        }

        if let Some(queue) = &self.delivery {
            queue.close();
        }
        self.data_state.lock().unwrap().on_event(ConnectionEvent::Close);
        debug!("data channel closed, {} packet buffers still in use", self.pool.in_use());
    }
}

impl Drop for DataChannel {
    fn drop(&mut self) {
        if self.reader_handle.is_some() {
            warn!("data channel dropped without being closed - aborting its tasks");
            self.reader_control.close();
            self.worker_closing.store(true, Ordering::Release);
            for handle in [self.reader_handle.take(), self.worker_handle.take(), self.monitor_handle.take()].into_iter().flatten() {
                handle.abort();
            }
        }
    }
}

struct Worker {
    ingest: mpsc::Receiver<RawPacket>,
    pool: Arc<PacketPool>,
    reassembler: FrameReassembler,
    coordinator: RetransmissionCoordinator,
    decoder: FrameDecoder,
    sink: FrameSink,
    sweep_interval: Duration,
    closing: Arc<AtomicBool>,
    stats: Arc<Mutex<WorkerStats>>,
}

impl Worker {
    /// Runs until the ingest queue is closed, i.e. the socket reader terminated
    async fn run(mut self) {
        info!("starting reassembly worker");

        let mut sweep = tokio::time::interval(self.sweep_interval);
        sweep.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            select! {
                packet = self.ingest.recv() => {
                    match packet {
                        Some(packet) => self.on_packet(packet).await,
                        None => break,
                    }
                }
                _ = sweep.tick() => {
                    if !self.closing.load(Ordering::Acquire) {
                        self.on_sweep().await;
                    }
                }
            }
            self.publish_stats();
        }

        self.reassembler.clear();
        self.publish_stats();
        info!("reassembly worker terminated");
    }

    async fn on_packet(&mut self, packet: RawPacket) {
        if self.closing.load(Ordering::Acquire) {
            self.pool.release(packet);
            return;
        }

        if let IngestOutcome::Completed(frame) = self.reassembler.ingest(packet, Instant::now()) {
            self.decode_and_deliver(frame);
        }

        let gap_requests = self.reassembler.take_gap_requests();
        if !gap_requests.is_empty() {
            self.coordinator.dispatch(gap_requests).await;
        }
    }

    async fn on_sweep(&mut self) {
        let result = self.reassembler.sweep(Instant::now());
        for frame in result.forced {
            self.decode_and_deliver(frame);
        }

        if !result.requests.is_empty() {
            self.coordinator.dispatch(result.requests).await;
        }
        let reassembler = &self.reassembler;
        self.coordinator.flush_deferred(|frame_counter| reassembler.is_in_flight(frame_counter)).await;
    }

    fn decode_and_deliver(&mut self, frame: AssembledFrame) {
        match self.decoder.decode(frame) {
            Ok(decoded) => self.sink.deliver(Ok(decoded)),
            Err(e) if e.class() == ErrorClass::ProtocolFatal => self.sink.deliver(Err(e)),
            Err(e) => debug!("dropping frame: {}", e),
        }
    }

    fn publish_stats(&self) {
        let mut stats = self.stats.lock().unwrap();
        stats.reassembly = self.reassembler.stats();
        stats.retransmission = self.coordinator.stats();
        stats.decoder = self.decoder.stats();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::net::Ipv4Addr;
    use async_trait::async_trait;

    use crate::control::control_message::{Command, ControlMessage};
    use crate::control::transport::{ControlTransport, MockControlConnector, MockControlTransport, TransportKind};
    use crate::data::packet_header::V2Flags;
    use crate::decoder::layout_v1::tests::amplitude_and_distance;
    use crate::decoder::ChannelId;
    use crate::test_util::{v2_fragments, v2_nda};

    /// A data socket fed from a channel
    struct ChannelSocket {
        packets: tokio::sync::Mutex<mpsc::UnboundedReceiver<Vec<u8>>>,
    }

    #[async_trait]
    impl DataSocket for ChannelSocket {
        async fn recv(&self, buf: &mut [u8]) -> std::io::Result<usize> {
            match self.packets.lock().await.recv().await {
                Some(packet) => {
                    buf[..packet.len()].copy_from_slice(&packet);
                    Ok(packet.len())
                }
                None => std::future::pending().await,
            }
        }

        fn local_addr(&self) -> std::io::Result<SocketAddr> {
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 41000))
        }
    }

    /// A control transport that acknowledges every request, recording it
    fn echo_transport(sent: Arc<Mutex<Vec<ControlMessage>>>) -> MockControlTransport {
        let pending = Arc::new(Mutex::new(VecDeque::new()));

        let mut transport = MockControlTransport::new();
        transport.expect_kind().return_const(TransportKind::Udp);
        transport.expect_local_addr()
            .returning(|| Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000)));

        let p = pending.clone();
        transport.expect_send_message()
            .returning(move |raw| {
                let request = ControlMessage::deser(raw).unwrap();
                let response = ControlMessage {
                    callback: None,
                    payload: vec![],
                    ..request.clone()
                };
                p.lock().unwrap().push_back(response.to_bytes());
                sent.lock().unwrap().push(request);
                Ok(())
            });
        transport.expect_receive_message()
            .returning(move || pending.lock().unwrap().pop_front()
                .ok_or_else(|| std::io::ErrorKind::WouldBlock.into()));
        transport
    }

    fn config() -> DataChannelConfig {
        let mut config = DataChannelConfig::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)));
        config.pool_ceiling = 100;
        config.ingest_queue_capacity = 16;
        config.socket_timeout = Duration::from_millis(100);
        config
    }

    struct Harness {
        channel: DataChannel,
        packets: mpsc::UnboundedSender<Vec<u8>>,
        sent: Arc<Mutex<Vec<ControlMessage>>>,
        fragment_pool: PacketPool,
    }

    impl Harness {
        async fn open(callback: Option<FrameCallback>) -> Harness {
            let (tx, rx) = mpsc::unbounded_channel();
            let socket = Arc::new(ChannelSocket { packets: tokio::sync::Mutex::new(rx) });

            let sent = Arc::new(Mutex::new(Vec::new()));
            let transport = echo_transport(sent.clone());
            let mut connector = MockControlConnector::new();
            connector.expect_connect()
                .return_once(move |_| Ok(Box::new(transport) as Box<dyn ControlTransport>));

            let channel = DataChannel::open_with(config(), socket, Box::new(connector), callback).await.unwrap();
            Harness {
                channel,
                packets: tx,
                sent,
                fragment_pool: PacketPool::new(100),
            }
        }

        /// v2 fragments of a 1000 byte frame, 250 bytes each
        fn fragments(&self, frame_counter: u16, flags: V2Flags) -> Vec<Vec<u8>> {
            v2_fragments(&self.fragment_pool, frame_counter, &amplitude_and_distance(), 250, flags)
                .into_iter()
                .map(|p| {
                    let bytes = p.as_ref().to_vec();
                    self.fragment_pool.release(p);
                    bytes
                })
                .collect()
        }

        /// NDA notification for fragments of a frame from [Harness::fragments]
        fn nda(&self, frame_counter: u16, indices: &[u16]) -> Vec<u8> {
            let packet = v2_nda(&self.fragment_pool, frame_counter, 4, 1000, indices);
            let bytes = packet.as_ref().to_vec();
            self.fragment_pool.release(packet);
            bytes
        }

        fn send(&self, packet: &[u8]) {
            self.packets.send(packet.to_vec()).unwrap();
        }

        fn sent_commands(&self) -> Vec<Command> {
            self.sent.lock().unwrap().iter().map(|m| m.command).collect()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_open_starts_stream() {
        let mut h = Harness::open(None).await;
        assert_eq!(h.channel.data_state(), ConnectionState::Connected);
        assert_eq!(h.sent_commands(), vec![Command::KeepAlive, Command::StartStream]);

        // the wildcard data address is replaced by the control socket's local IP
        let start = h.sent.lock().unwrap()[1].clone();
        assert_eq!(start.callback, Some(SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 41000)));

        h.channel.close().await;
        assert_eq!(h.sent_commands().last(), Some(&Command::StopStream));
        assert_eq!(h.channel.data_state(), ConnectionState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn test_frame_delivery() {
        let mut h = Harness::open(None).await;
        for fragment in h.fragments(1, V2Flags::empty()).iter().rev() {
            h.send(fragment);
        }

        let frame = h.channel.poll_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.frame_counter, 1);
        assert!(!frame.is_partial());
        assert_eq!(frame.channel(ChannelId::Amplitude).unwrap().data.len(), 400);

        let stats = h.channel.statistics();
        assert_eq!(stats.socket_reader.packets_received, 4);
        assert_eq!(stats.reassembly.frames_completed, 1);
        assert_eq!(stats.decoder.frames_decoded, 1);
        assert_eq!(stats.delivery.delivered, 1);

        h.channel.close().await;
        assert_eq!(h.channel.statistics().buffers_in_use, 0);
        assert!(matches!(h.channel.poll_frame(Duration::from_millis(10)).await, Err(TransportError::Closed)));
    }

    #[tokio::test(start_paused = true)]
    async fn test_missing_fragment_is_requested() {
        let mut h = Harness::open(None).await;
        let fragments = h.fragments(3, V2Flags::RETRANSMISSION_CAPABLE);
        for index in [3, 0, 1] {
            h.send(&fragments[index]);
        }

        // nothing is delivered before the missing fragment arrives
        assert!(matches!(h.channel.poll_frame(Duration::from_millis(180)).await, Err(TransportError::Timeout { .. })));

        // the stalled frame's request covers exactly the fragment that is still missing
        let requests = h.sent.lock().unwrap().iter()
            .filter(|m| m.command == Command::Retransmit && m.address == 3)
            .map(|m| m.retransmit_indices())
            .collect::<Vec<_>>();
        assert_eq!(requests.last(), Some(&vec![2]));

        let retransmitted = h.fragments(3, V2Flags::RETRANSMISSION_CAPABLE | V2Flags::RETRANSMITTED);
        h.send(&retransmitted[2]);
        let frame = h.channel.poll_frame(Duration::from_secs(1)).await.unwrap();
        assert_eq!(frame.frame_counter, 3);
        assert!(!frame.is_partial());
        assert!(h.channel.statistics().retransmission.messages_sent >= 1);

        h.channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_frame_is_forced_with_sentinels() {
        let mut h = Harness::open(None).await;
        let fragments = h.fragments(4, V2Flags::empty());
        for index in [0, 1, 2] {
            h.send(&fragments[index]);
        }

        let frame = h.channel.poll_frame(Duration::from_secs(2)).await.unwrap();
        assert_eq!(frame.frame_counter, 4);
        assert_eq!(frame.missing, vec![750..1000]);
        assert!(frame.channel(ChannelId::Distance).unwrap().has_invalid_data);
        assert!(!frame.channel(ChannelId::Amplitude).unwrap().has_invalid_data);
        assert_eq!(h.channel.statistics().reassembly.frames_forced, 1);

        h.channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_unavailable_fragments_complete_frame_with_sentinels() {
        let mut h = Harness::open(None).await;
        let fragments = h.fragments(6, V2Flags::RETRANSMISSION_CAPABLE);
        h.send(&fragments[0]);
        h.send(&fragments[2]);
        h.send(&h.nda(6, &[1, 3]));

        // delivered right away, well before a stalled frame would be retried or forced
        let frame = h.channel.poll_frame(Duration::from_millis(50)).await.unwrap();
        assert_eq!(frame.frame_counter, 6);
        assert_eq!(frame.missing, vec![250..500, 750..1000]);

        let stats = h.channel.statistics();
        assert_eq!(stats.reassembly.nda_indices, 2);
        assert_eq!(stats.reassembly.frames_completed, 1);
        assert_eq!(stats.reassembly.frames_forced, 0);
        assert_eq!(stats.decoder.partial_frames, 1);

        // amplitude data starts at byte 37: 250 is inside sample 106
        let amplitude = frame.channel(ChannelId::Amplitude).unwrap();
        assert!(amplitude.has_invalid_data);
        assert_eq!(&amplitude.data[210..212], &105u16.to_be_bytes());
        assert!(amplitude.data[212..].iter().all(|&b| b == 0xff));

        // distance data starts at byte 437: both its head and its tail were not available
        let distance = frame.channel(ChannelId::Distance).unwrap();
        assert!(distance.has_invalid_data);
        assert!(distance.data[..64].chunks(2).all(|s| s == [0x80, 0x00]));
        assert_eq!(&distance.data[64..66], &(-32i16).to_be_bytes());
        assert_eq!(&distance.data[310..312], &(-155i16).to_be_bytes());
        assert!(distance.data[312..].chunks(2).all(|s| s == [0x80, 0x00]));

        h.channel.close().await;
        assert_eq!(h.channel.statistics().buffers_in_use, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_callback_mode() {
        let received = Arc::new(Mutex::new(Vec::new()));
        let r = received.clone();
        let callback: FrameCallback = Box::new(move |frame: Result<DecodedFrame>| r.lock().unwrap().push(frame.unwrap().frame_counter));

        let mut h = Harness::open(Some(callback)).await;
        assert!(matches!(h.channel.poll_frame(Duration::from_millis(10)).await, Err(TransportError::CallbackMode)));

        for fragment in h.fragments(9, V2Flags::empty()) {
            h.send(&fragment);
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(*received.lock().unwrap(), vec![9]);

        h.channel.close().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_and_close_release_buffers() {
        let mut h = Harness::open(None).await;
        h.channel.pause();
        let fragments = h.fragments(5, V2Flags::empty());
        h.send(&fragments[0]);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.channel.statistics().socket_reader.packets_received, 0);

        h.channel.resume();
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(h.channel.statistics().socket_reader.packets_received, 1);

        h.channel.close().await;
        assert_eq!(h.channel.statistics().buffers_in_use, 0);
    }

    #[test]
    fn test_callback_addr() {
        let wildcard = SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 5000);
        let control = Some(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000));
        assert_eq!(DataChannel::callback_addr(wildcard, control).unwrap(), SocketAddrV4::new(Ipv4Addr::new(10, 0, 0, 1), 5000));

        let bound = SocketAddr::new(IpAddr::V4(Ipv4Addr::new(192, 168, 1, 1)), 5000);
        assert_eq!(DataChannel::callback_addr(bound, control).unwrap(), SocketAddrV4::new(Ipv4Addr::new(192, 168, 1, 1), 5000));

        assert!(DataChannel::callback_addr(wildcard, None).is_err());
    }
}
