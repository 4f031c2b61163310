use std::net::{SocketAddr, SocketAddrV4};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::select;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{debug, info, trace, warn};

use crate::config::ControlChannelConfig;
use crate::control::connection_state::{ConnectionEvent, ConnectionState, ConnectionStateMachine};
use crate::control::control_message::{Command, ControlMessage};
use crate::control::transport::{ControlConnector, ControlTransport, TransportKind};
use crate::error::{Result, TransportError};
use crate::retransmission::RetransmissionSender;

type ActiveTransport = Option<Box<dyn ControlTransport>>;

struct ControlStates {
    udp: ConnectionStateMachine,
    tcp: ConnectionStateMachine,
}
impl ControlStates {
    fn get_mut(&mut self, kind: TransportKind) -> &mut ConnectionStateMachine {
        match kind {
            TransportKind::Udp => &mut self.udp,
            TransportKind::Tcp => &mut self.tcp,
        }
    }

    fn get(&self, kind: TransportKind) -> &ConnectionStateMachine {
        match kind {
            TransportKind::Udp => &self.udp,
            TransportKind::Tcp => &self.tcp,
        }
    }
}

fn other(kind: TransportKind) -> TransportKind {
    match kind {
        TransportKind::Udp => TransportKind::Tcp,
        TransportKind::Tcp => TransportKind::Udp,
    }
}

/// The request / response channel to a device. UDP is preferred, TCP is the fallback, and at
///  most one of them is connected at any time.
///
/// All exchanges are serialized by a single mutex that is held for the whole duration of an
///  exchange, i.e. from sending the request until the response arrives or the response times
///  out. Retransmission requests are sent under the same mutex, but without waiting for a
///  response.
pub struct ControlChannel {
    config: ControlChannelConfig,
    connector: Box<dyn ControlConnector>,
    transport: tokio::sync::Mutex<ActiveTransport>,
    states: Mutex<ControlStates>,
    connected: AtomicBool,
    keep_alive_failures: AtomicU32,
    closing: AtomicBool,
    shutdown: Notify,
}

impl ControlChannel {
    pub fn new(config: ControlChannelConfig, connector: Box<dyn ControlConnector>) -> ControlChannel {
        let mut states = ControlStates {
            udp: ConnectionStateMachine::new("udp control"),
            tcp: ConnectionStateMachine::new("tcp control"),
        };
        if config.udp_enabled {
            states.udp.on_event(ConnectionEvent::Enable);
        }
        if config.tcp_enabled {
            states.tcp.on_event(ConnectionEvent::Enable);
        }

        ControlChannel {
            config,
            connector,
            transport: Default::default(),
            states: Mutex::new(states),
            connected: AtomicBool::new(false),
            keep_alive_failures: AtomicU32::new(0),
            closing: AtomicBool::new(false),
            shutdown: Notify::new(),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    pub fn state(&self, kind: TransportKind) -> ConnectionState {
        self.states.lock().unwrap()
            .get(kind)
            .state()
    }

    fn on_event(&self, kind: TransportKind, event: ConnectionEvent) -> ConnectionState {
        self.states.lock().unwrap()
            .get_mut(kind)
            .on_event(event)
    }

    fn is_enabled(&self, kind: TransportKind) -> bool {
        match kind {
            TransportKind::Udp => self.config.udp_enabled,
            TransportKind::Tcp => self.config.tcp_enabled,
        }
    }

    /// The local address of the connected control socket, which is the local address facing
    ///  the device
    pub async fn local_addr(&self) -> Option<SocketAddr> {
        self.transport.lock().await
            .as_ref()
            .and_then(|t| t.local_addr().ok())
    }

    /// Tries UDP first, then TCP. Returns immediately if the channel is already connected.
    pub async fn connect(&self) -> Result<()> {
        if self.is_connected() {
            return Ok(());
        }
        if self.closing.load(Ordering::Acquire) {
            return Err(TransportError::Closed);
        }

        for kind in [TransportKind::Udp, TransportKind::Tcp] {
            if self.state(kind) != ConnectionState::Wanted {
                continue;
            }
            if self.try_connect(kind).await {
                return Ok(());
            }
        }
        Err(TransportError::NotConnected { channel: "control channel" })
    }

    async fn try_connect(&self, kind: TransportKind) -> bool {
        self.on_event(kind, ConnectionEvent::AttemptStarted);

        let mut guard = self.transport.lock().await;

        let result = match self.connector.connect(kind).await {
            Ok(mut transport) => {
                // the device is considered reachable only once it answered a keep-alive
                match Self::exchange_on(transport.as_mut(), &ControlMessage::keep_alive(), self.config.response_timeout).await {
                    Ok(_) => Ok(transport),
                    Err(e) => Err(e),
                }
            }
            Err(e) => Err(TransportError::io(format!("connecting {}", kind), e)),
        };

        match result {
            Ok(transport) => {
                *guard = Some(transport);
                self.keep_alive_failures.store(0, Ordering::Release);
                {
                    let mut states = self.states.lock().unwrap();
                    states.get_mut(kind).on_event(ConnectionEvent::Established);
                    states.get_mut(other(kind)).on_event(ConnectionEvent::Deactivate);
                }
                self.connected.store(true, Ordering::Release);
                info!("control channel connected via {}", kind);
                true
            }
            Err(e) => {
                warn!("connecting {} failed: {}", kind, e);
                self.on_event(kind, ConnectionEvent::AttemptFailed);
                false
            }
        }
    }

    /// Drops the connection. Must be called while holding the transport lock. The lost transport
    ///  goes back to `Wanted`, and the other one is re-enabled.
    fn connection_lost(&self, active: &mut ActiveTransport) {
        let Some(transport) = active.take() else {
            return;
        };
        let kind = transport.kind();
        drop(transport);

        self.connected.store(false, Ordering::Release);
        self.keep_alive_failures.store(0, Ordering::Release);

        warn!("{} connection lost", kind);
        let mut states = self.states.lock().unwrap();
        states.get_mut(kind).on_event(ConnectionEvent::Lost);
        states.get_mut(kind).on_event(ConnectionEvent::SocketClosed);
        if self.is_enabled(other(kind)) {
            states.get_mut(other(kind)).on_event(ConnectionEvent::Enable);
        }
    }

    async fn exchange_on(transport: &mut dyn ControlTransport, request: &ControlMessage, timeout: Duration) -> Result<ControlMessage> {
        Self::send_on(transport, request).await?;
        Self::receive_on(transport, request, timeout).await
    }

    async fn send_on(transport: &mut dyn ControlTransport, request: &ControlMessage) -> Result<()> {
        trace!("sending {:?} request", request.command);
        transport.send_message(&request.to_bytes()).await
            .map_err(|e| TransportError::io(format!("sending {:?} request", request.command), e))
    }

    async fn receive_on(transport: &mut dyn ControlTransport, request: &ControlMessage, timeout: Duration) -> Result<ControlMessage> {
        let deadline = Instant::now() + timeout;
        loop {
            let raw = match tokio::time::timeout_at(deadline, transport.receive_message()).await {
                Ok(Ok(raw)) => raw,
                Ok(Err(e)) => return Err(TransportError::io(format!("receiving response to {:?}", request.command), e)),
                Err(_) => return Err(TransportError::Timeout { duration: timeout }),
            };

            let response = ControlMessage::deser(&raw)?;
            if response.command == Command::Retransmit && request.command != Command::Retransmit {
                // retransmission requests are not waited for, so their acknowledgements may
                //  show up here
                trace!("skipping acknowledgement of a retransmission request");
                continue;
            }
            response.verify_response_to(request)?;
            return Ok(response);
        }
    }

    /// Sends a request and waits for its response, holding the control mutex for the whole
    ///  exchange. I/O errors drop the connection, all other errors leave it untouched.
    pub async fn exchange(&self, request: &ControlMessage) -> Result<ControlMessage> {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return Err(TransportError::NotConnected { channel: "control channel" });
        };

        let result = Self::exchange_on(transport.as_mut(), request, self.config.response_timeout).await;
        if let Err(TransportError::Io { .. }) = &result {
            self.connection_lost(&mut guard);
        }
        result
    }

    /// Sends a serialized request without waiting for a response
    pub async fn send_request(&self, request: &[u8]) -> Result<()> {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return Err(TransportError::NotConnected { channel: "control channel" });
        };

        if let Err(e) = transport.send_message(request).await {
            self.connection_lost(&mut guard);
            return Err(TransportError::io("sending control request", e));
        }
        Ok(())
    }

    /// Waits for the response to a request that was sent with [ControlChannel::send_request]
    pub async fn receive_response(&self, request: &ControlMessage, timeout: Duration) -> Result<ControlMessage> {
        let mut guard = self.transport.lock().await;
        let Some(transport) = guard.as_mut() else {
            return Err(TransportError::NotConnected { channel: "control channel" });
        };

        let result = Self::receive_on(transport.as_mut(), request, timeout).await;
        if let Err(TransportError::Io { .. }) = &result {
            self.connection_lost(&mut guard);
        }
        result
    }

    /// A keep-alive exchange. The connection is dropped after the configured number of
    ///  consecutive failures.
    pub async fn keep_alive(&self) -> Result<()> {
        match self.exchange(&ControlMessage::keep_alive()).await {
            Ok(_) => {
                self.keep_alive_failures.store(0, Ordering::Release);
                Ok(())
            }
            Err(e) => {
                let failures = self.keep_alive_failures.fetch_add(1, Ordering::AcqRel) + 1;
                debug!("keep-alive failed ({} consecutive): {}", failures, e);
                if failures >= self.config.keep_alive_failures_before_reconnect {
                    self.connection_lost(&mut *self.transport.lock().await);
                }
                Err(e)
            }
        }
    }

    pub async fn read_register(&self, address: u32) -> Result<u32> {
        let response = self.exchange(&ControlMessage::read_register(address)).await?;
        match <[u8; 4]>::try_from(response.payload.as_slice()) {
            Ok(value) => Ok(u32::from_be_bytes(value)),
            Err(_) => Err(TransportError::malformed_control(format!("register value has {} bytes, expected 4", response.payload.len()))),
        }
    }

    pub async fn write_register(&self, address: u32, value: u32) -> Result<()> {
        self.exchange(&ControlMessage::write_register(address, value)).await?;
        Ok(())
    }

    /// Tells the device to start streaming frames to `data_addr`
    pub async fn start_stream(&self, data_addr: SocketAddrV4) -> Result<()> {
        info!("requesting frame stream to {}", data_addr);
        self.exchange(&ControlMessage::start_stream(data_addr)).await?;
        Ok(())
    }

    pub async fn stop_stream(&self) -> Result<()> {
        info!("stopping frame stream");
        self.exchange(&ControlMessage::stop_stream()).await?;
        Ok(())
    }

    /// Keeps the channel alive while connected, and tries to reconnect while not. Runs until
    ///  [ControlChannel::close] is called.
    pub async fn run_monitor(self: Arc<Self>) {
        debug!("starting control channel monitor");
        loop {
            let delay = if self.is_connected() {
                self.config.keep_alive_interval
            }
            else {
                self.config.reconnect_delay
            };

            select! {
                _ = self.shutdown.notified() => break,
                _ = tokio::time::sleep(delay) => {}
            }
            if self.closing.load(Ordering::Acquire) {
                break;
            }

            if self.is_connected() {
                let _ = self.keep_alive().await;
            }
            else if let Err(e) = self.connect().await {
                debug!("control channel still not connected: {}", e);
            }
        }
        debug!("control channel monitor stopped");
    }

    pub async fn close(&self) {
        if self.closing.swap(true, Ordering::AcqRel) {
            return;
        }
        self.shutdown.notify_one();

        let mut guard = self.transport.lock().await;
        *guard = None;
        self.connected.store(false, Ordering::Release);

        let mut states = self.states.lock().unwrap();
        states.udp.on_event(ConnectionEvent::Close);
        states.tcp.on_event(ConnectionEvent::Close);
        info!("control channel closed");
    }
}

#[async_trait]
impl RetransmissionSender for ControlChannel {
    fn is_connected(&self) -> bool {
        ControlChannel::is_connected(self)
    }

    async fn send_retransmission(&self, frame_counter: u16, indices: &[u16]) -> Result<()> {
        let message = ControlMessage::retransmit(frame_counter, indices)?;
        self.send_request(&message.to_bytes()).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::transport::{MockControlConnector, MockControlTransport};
    use std::collections::VecDeque;
    use std::net::{IpAddr, Ipv4Addr};
    use std::sync::atomic::AtomicUsize;

    type Responder = Box<dyn FnMut(&ControlMessage) -> Option<ControlMessage> + Send>;

    /// A device that answers requests through a configurable responder
    struct FakeDevice {
        kind: TransportKind,
        responder: Responder,
        pending: VecDeque<Vec<u8>>,
        broken: Arc<AtomicBool>,
    }

    #[async_trait]
    impl ControlTransport for FakeDevice {
        fn kind(&self) -> TransportKind {
            self.kind
        }

        fn local_addr(&self) -> std::io::Result<SocketAddr> {
            Ok(SocketAddr::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 1)), 40000))
        }

        async fn send_message(&mut self, message: &[u8]) -> std::io::Result<()> {
            if self.broken.load(Ordering::Acquire) {
                return Err(std::io::ErrorKind::BrokenPipe.into());
            }
            let request = ControlMessage::deser(message).unwrap();
            if let Some(response) = (self.responder)(&request) {
                self.pending.push_back(response.to_bytes());
            }
            Ok(())
        }

        async fn receive_message(&mut self) -> std::io::Result<Vec<u8>> {
            match self.pending.pop_front() {
                Some(raw) => Ok(raw),
                None => std::future::pending().await,
            }
        }
    }

    fn echo(request: &ControlMessage) -> Option<ControlMessage> {
        let mut response = request.clone();
        response.callback = None;
        if request.command == Command::ReadRegister {
            response.payload = 0x1234_5678u32.to_be_bytes().to_vec();
        }
        else {
            response.payload.clear();
        }
        Some(response)
    }

    fn device(kind: TransportKind, responder: Responder) -> Box<dyn ControlTransport> {
        Box::new(FakeDevice {
            kind,
            responder,
            pending: VecDeque::new(),
            broken: Default::default(),
        })
    }

    fn config() -> ControlChannelConfig {
        ControlChannelConfig::new(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 2)))
    }

    fn echoing_connector() -> MockControlConnector {
        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .returning(|kind| Ok(device(kind, Box::new(echo))));
        connector
    }

    async fn connected_channel(transport: Box<dyn ControlTransport>) -> ControlChannel {
        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .return_once(move |_| Ok(transport));
        let channel = ControlChannel::new(config(), Box::new(connector));
        channel.connect().await.unwrap();
        channel
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_prefers_udp() {
        let channel = ControlChannel::new(config(), Box::new(echoing_connector()));
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Wanted);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Wanted);

        channel.connect().await.unwrap();
        assert!(channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Connected);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Deactivated);
        assert!(channel.local_addr().await.is_some());
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_falls_back_to_tcp() {
        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .withf(|kind| *kind == TransportKind::Udp)
            .returning(|_| Err(std::io::ErrorKind::ConnectionRefused.into()));
        connector.expect_connect()
            .withf(|kind| *kind == TransportKind::Tcp)
            .returning(|kind| Ok(device(kind, Box::new(echo))));

        let channel = ControlChannel::new(config(), Box::new(connector));
        channel.connect().await.unwrap();
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Deactivated);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_connect_requires_keep_alive_response() {
        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .times(2)
            .returning(|kind| Ok(device(kind, Box::new(|_: &ControlMessage| None))));

        let channel = ControlChannel::new(config(), Box::new(connector));
        assert!(matches!(channel.connect().await, Err(TransportError::NotConnected { .. })));
        assert!(!channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Wanted);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Wanted);
    }

    #[tokio::test(start_paused = true)]
    async fn test_disabled_transport_is_not_tried() {
        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .withf(|kind| *kind == TransportKind::Tcp)
            .once()
            .returning(|kind| Ok(device(kind, Box::new(echo))));

        let mut config = config();
        config.udp_enabled = false;
        let channel = ControlChannel::new(config, Box::new(connector));
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Deactivated);
        channel.connect().await.unwrap();
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Connected);
    }

    #[tokio::test(start_paused = true)]
    async fn test_registers() {
        let channel = connected_channel(device(TransportKind::Udp, Box::new(echo))).await;
        assert_eq!(channel.read_register(0x10).await.unwrap(), 0x1234_5678);
        channel.write_register(0x10, 5).await.unwrap();
    }

    #[tokio::test(start_paused = true)]
    async fn test_echo_mismatch_leaves_connection_untouched() {
        let responder: Responder = Box::new(|request: &ControlMessage| {
            let mut response = echo(request)?;
            if request.command == Command::ReadRegister {
                response.command = Command::WriteRegister;
            }
            Some(response)
        });
        let channel = connected_channel(device(TransportKind::Udp, responder)).await;

        let result = channel.read_register(0x10).await;
        assert!(matches!(result, Err(TransportError::EchoMismatch { field: "command", expected: 0x02, actual: 0x03 })));
        assert!(channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Connected);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Deactivated);
    }

    #[tokio::test(start_paused = true)]
    async fn test_device_status_is_surfaced() {
        let responder: Responder = Box::new(|request: &ControlMessage| {
            let mut response = echo(request)?;
            if request.command == Command::WriteRegister {
                response.status = 3;
            }
            Some(response)
        });
        let channel = connected_channel(device(TransportKind::Udp, responder)).await;

        assert!(matches!(channel.write_register(1, 2).await, Err(TransportError::DeviceStatus { status: 3, .. })));
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_response_timeout() {
        let responder: Responder = Box::new(|request: &ControlMessage| {
            if request.command == Command::KeepAlive { echo(request) } else { None }
        });
        let channel = connected_channel(device(TransportKind::Udp, responder)).await;

        let before = Instant::now();
        assert!(matches!(channel.stop_stream().await, Err(TransportError::Timeout { .. })));
        assert!(before.elapsed() >= channel.config.response_timeout);
        assert!(channel.is_connected());
    }

    #[tokio::test(start_paused = true)]
    async fn test_keep_alive_failures_drop_connection() {
        let num_keep_alives = Arc::new(AtomicUsize::new(0));
        let counter = num_keep_alives.clone();
        let responder: Responder = Box::new(move |request: &ControlMessage| {
            // answer only the keep-alive that establishes the connection
            if counter.fetch_add(1, Ordering::SeqCst) == 0 { echo(request) } else { None }
        });
        let channel = connected_channel(device(TransportKind::Udp, responder)).await;

        assert!(channel.keep_alive().await.is_err());
        assert!(channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Connected);

        assert!(channel.keep_alive().await.is_err());
        assert!(!channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Wanted);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Wanted);
        assert_eq!(num_keep_alives.load(Ordering::SeqCst), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_io_error_drops_connection() {
        let broken = Arc::new(AtomicBool::new(false));
        let transport = Box::new(FakeDevice {
            kind: TransportKind::Udp,
            responder: Box::new(echo),
            pending: VecDeque::new(),
            broken: broken.clone(),
        });
        let channel = connected_channel(transport).await;

        broken.store(true, Ordering::Release);
        assert!(matches!(channel.write_register(1, 2).await, Err(TransportError::Io { .. })));
        assert!(!channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Wanted);
        assert!(matches!(channel.write_register(1, 2).await, Err(TransportError::NotConnected { .. })));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_does_not_wait_for_response() {
        let sent = Arc::new(Mutex::new(Vec::<Vec<u8>>::new()));

        let mut transport = MockControlTransport::new();
        transport.expect_kind().return_const(TransportKind::Udp);
        let sent_clone = sent.clone();
        transport.expect_send_message()
            .times(2)
            .returning(move |msg| {
                sent_clone.lock().unwrap().push(msg.to_vec());
                Ok(())
            });
        transport.expect_receive_message()
            .once()
            .returning(|| Ok(ControlMessage::keep_alive().to_bytes()));

        let channel = connected_channel(Box::new(transport)).await;
        channel.send_retransmission(7, &[2, 3, 9]).await.unwrap();

        let sent = sent.lock().unwrap();
        let request = ControlMessage::deser(&sent[1]).unwrap();
        assert_eq!(request.command, Command::Retransmit);
        assert_eq!(request.address, 7);
        assert_eq!(request.retransmit_indices(), vec![2, 3, 9]);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retransmission_acknowledgement_is_skipped() {
        let channel = connected_channel(device(TransportKind::Udp, Box::new(echo))).await;
        channel.send_retransmission(7, &[1]).await.unwrap();
        assert_eq!(channel.read_register(4).await.unwrap(), 0x1234_5678);
    }

    #[tokio::test(start_paused = true)]
    async fn test_not_connected() {
        let channel = ControlChannel::new(config(), Box::new(MockControlConnector::new()));
        assert!(matches!(channel.send_retransmission(1, &[1]).await, Err(TransportError::NotConnected { .. })));
        assert!(!RetransmissionSender::is_connected(&channel));
    }

    #[tokio::test(start_paused = true)]
    async fn test_monitor_reconnects_and_stops_on_close() {
        let num_attempts = Arc::new(AtomicUsize::new(0));
        let attempts = num_attempts.clone();

        let mut connector = MockControlConnector::new();
        connector.expect_connect()
            .returning(move |kind| {
                // the first round of attempts fails for both transports
                if attempts.fetch_add(1, Ordering::SeqCst) < 2 {
                    Err(std::io::ErrorKind::ConnectionRefused.into())
                }
                else {
                    Ok(device(kind, Box::new(echo)))
                }
            });

        let channel = Arc::new(ControlChannel::new(config(), Box::new(connector)));
        assert!(channel.connect().await.is_err());

        let monitor = tokio::spawn(channel.clone().run_monitor());
        tokio::time::sleep(channel.config.reconnect_delay + Duration::from_millis(10)).await;
        assert!(channel.is_connected());
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Connected);

        // keep-alives keep the connection up
        tokio::time::sleep(channel.config.keep_alive_interval * 3).await;
        assert!(channel.is_connected());

        channel.close().await;
        monitor.await.unwrap();
        assert_eq!(channel.state(TransportKind::Udp), ConnectionState::Closed);
        assert_eq!(channel.state(TransportKind::Tcp), ConnectionState::Closed);
        assert!(matches!(channel.connect().await, Err(TransportError::Closed)));
        assert_eq!(num_attempts.load(Ordering::SeqCst), 3);
    }
}
