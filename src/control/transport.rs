use std::fmt::{Display, Formatter};
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::time::Duration;

use async_trait::async_trait;
#[cfg(test)] use mockall::automock;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace};

use crate::config::ControlChannelConfig;
use crate::control::control_message::HEADER_LEN;
use crate::safe_converter::{PrecheckedCast, SafeCast};

#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum TransportKind {
    Udp,
    Tcp,
}
impl Display for TransportKind {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            TransportKind::Udp => write!(f, "udp control"),
            TransportKind::Tcp => write!(f, "tcp control"),
        }
    }
}

/// A connected control transport. Implementations are not responsible for framing beyond
///  message boundaries: they send and receive complete serialized control messages.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlTransport: Send {
    fn kind(&self) -> TransportKind;

    fn local_addr(&self) -> std::io::Result<SocketAddr>;

    async fn send_message(&mut self, message: &[u8]) -> std::io::Result<()>;

    /// Waits for the next complete message. Callers wrap this in a timeout.
    async fn receive_message(&mut self) -> std::io::Result<Vec<u8>>;
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait ControlConnector: Send + Sync {
    async fn connect(&self, kind: TransportKind) -> std::io::Result<Box<dyn ControlTransport>>;
}

pub struct UdpControlTransport {
    socket: UdpSocket,
    receive_buf: Vec<u8>,
}

impl UdpControlTransport {
    pub async fn connect(device_addr: SocketAddr, max_payload_len: usize) -> std::io::Result<UdpControlTransport> {
        let local = match device_addr.ip() {
            IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
        };
        let socket = UdpSocket::bind(local).await?;
        socket.connect(device_addr).await?;
        debug!("udp control socket {:?} connected to {:?}", socket.local_addr(), device_addr);

        Ok(UdpControlTransport {
            socket,
            receive_buf: vec![0u8; HEADER_LEN + max_payload_len],
        })
    }
}

#[async_trait]
impl ControlTransport for UdpControlTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Udp
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    async fn send_message(&mut self, message: &[u8]) -> std::io::Result<()> {
        trace!("sending {} bytes over udp control", message.len());
        self.socket.send(message).await?;
        Ok(())
    }

    async fn receive_message(&mut self) -> std::io::Result<Vec<u8>> {
        let len = self.socket.recv(&mut self.receive_buf).await?;
        Ok(self.receive_buf[..len].to_vec())
    }
}

/// Over TCP, every message is prefixed with its total length as a u32 (BE), the prefix itself
///  not included
pub struct TcpControlTransport {
    stream: TcpStream,
    max_message_len: usize,
}

impl TcpControlTransport {
    pub async fn connect(device_addr: SocketAddr, max_payload_len: usize) -> std::io::Result<TcpControlTransport> {
        let stream = TcpStream::connect(device_addr).await?;
        stream.set_nodelay(true)?;
        debug!("tcp control connection {:?} -> {:?} established", stream.local_addr(), device_addr);

        Ok(TcpControlTransport {
            stream,
            max_message_len: HEADER_LEN + max_payload_len,
        })
    }
}

#[async_trait]
impl ControlTransport for TcpControlTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Tcp
    }

    fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.stream.local_addr()
    }

    async fn send_message(&mut self, message: &[u8]) -> std::io::Result<()> {
        trace!("sending {} bytes over tcp control", message.len());
        let len: u32 = message.len().prechecked_cast();
        let mut buf = Vec::with_capacity(4 + message.len());
        buf.extend_from_slice(&len.to_be_bytes());
        buf.extend_from_slice(message);
        self.stream.write_all(&buf).await
    }

    async fn receive_message(&mut self) -> std::io::Result<Vec<u8>> {
        let len: usize = self.stream.read_u32().await?.safe_cast();
        if len > self.max_message_len {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("length prefix {} exceeds the maximum control message length {}", len, self.max_message_len),
            ));
        }

        let mut buf = vec![0u8; len];
        self.stream.read_exact(&mut buf).await?;
        Ok(buf)
    }
}

/// Connects to a device over Ethernet, i.e. with real UDP and TCP sockets
pub struct EthernetConnector {
    device_udp_addr: SocketAddr,
    device_tcp_addr: SocketAddr,
    connect_timeout: Duration,
    max_payload_len: usize,
}

impl EthernetConnector {
    pub fn new(config: &ControlChannelConfig) -> EthernetConnector {
        EthernetConnector {
            device_udp_addr: config.device_udp_addr,
            device_tcp_addr: config.device_tcp_addr,
            connect_timeout: config.connect_timeout,
            max_payload_len: config.max_payload_len,
        }
    }
}

#[async_trait]
impl ControlConnector for EthernetConnector {
    async fn connect(&self, kind: TransportKind) -> std::io::Result<Box<dyn ControlTransport>> {
        let connect = async {
            let transport: Box<dyn ControlTransport> = match kind {
                TransportKind::Udp => Box::new(UdpControlTransport::connect(self.device_udp_addr, self.max_payload_len).await?),
                TransportKind::Tcp => Box::new(TcpControlTransport::connect(self.device_tcp_addr, self.max_payload_len).await?),
            };
            Ok::<_, std::io::Error>(transport)
        };

        match tokio::time::timeout(self.connect_timeout, connect).await {
            Ok(result) => result,
            Err(_) => Err(std::io::Error::new(std::io::ErrorKind::TimedOut, format!("connecting {} timed out", kind))),
        }
    }
}
