//! Socket plumbing behind channels.
//!
//! Endpoints are bound during set-up and handed to a pump task on start:
//!
//! ```text
//!   output                                   input
//! ┌────────────┐  UDP: one Message/datagram ┌────────────┐
//! │ OutputPump │ ─────────────────────────▶ │ InputPump  │──▶ Delivery
//! └────────────┘  TCP: length-prefixed      └────────────┘
//!       ▲          frames on one stream
//!  ChannelSender
//! ```
//!
//! Input pumps drop traffic from any sender other than the filter address
//! when one is set.

use std::net::{Ipv4Addr, SocketAddr, SocketAddrV4};
use std::time::Duration;

use tokio::io::{BufReader, BufWriter};
use tokio::net::{TcpListener, TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use nimo_core::{Connection, Message, TransportType, Value};
use nimo_protocol::framing::write_value_timeout;
use nimo_protocol::{read_value, FrameError};

use crate::error::ChannelError;

/// Largest UDP payload we accept.
pub const MAX_DATAGRAM: usize = 65_507;

/// Upper bound for the output side's TCP connect.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// One value received on an input channel.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub from: SocketAddr,
    pub value: Value,
}

/// A bound endpoint waiting for `start`.
#[derive(Debug)]
pub(crate) enum Endpoint {
    UdpInput(UdpSocket),
    TcpInput(TcpListener),
    UdpOutput(UdpSocket),
    TcpOutput(TcpStream),
}

fn local_connection(
    addr: std::io::Result<SocketAddr>,
    mode: TransportType,
) -> Result<Connection, ChannelError> {
    let addr = addr.map_err(|e| ChannelError::Bind {
        mode,
        error: e.to_string(),
    })?;
    Connection::from_socket_addr(addr, mode).ok_or_else(|| ChannelError::Bind {
        mode,
        error: format!("{addr} is not IPv4"),
    })
}

/// Binds an input endpoint on an ephemeral port of `ip`.
pub(crate) async fn bind_input(
    mode: TransportType,
    ip: Ipv4Addr,
) -> Result<(Endpoint, Connection), ChannelError> {
    let bind_addr = SocketAddrV4::new(ip, 0);
    let bind_err = |e: std::io::Error| ChannelError::Bind {
        mode,
        error: e.to_string(),
    };
    match mode {
        TransportType::Udp => {
            let socket = UdpSocket::bind(bind_addr).await.map_err(bind_err)?;
            let local = local_connection(socket.local_addr(), mode)?;
            Ok((Endpoint::UdpInput(socket), local))
        }
        TransportType::Tcp => {
            let listener = TcpListener::bind(bind_addr).await.map_err(bind_err)?;
            let local = local_connection(listener.local_addr(), mode)?;
            Ok((Endpoint::TcpInput(listener), local))
        }
    }
}

/// Opens an output endpoint from `ip` toward `peer`.
pub(crate) async fn connect_output(
    peer: Connection,
    ip: Ipv4Addr,
) -> Result<(Endpoint, Connection), ChannelError> {
    let mode = peer.transport;
    let target = SocketAddr::V4(peer.socket_addr());
    let connect_err = |error: String| ChannelError::Connect {
        peer: peer.to_string(),
        error,
    };
    match mode {
        TransportType::Udp => {
            let socket = UdpSocket::bind(SocketAddrV4::new(ip, 0))
                .await
                .map_err(|e| ChannelError::Bind {
                    mode,
                    error: e.to_string(),
                })?;
            socket
                .connect(target)
                .await
                .map_err(|e| connect_err(e.to_string()))?;
            let local = local_connection(socket.local_addr(), mode)?;
            Ok((Endpoint::UdpOutput(socket), local))
        }
        TransportType::Tcp => {
            let stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(target))
                .await
                .map_err(|_| connect_err("timed out".to_string()))?
                .map_err(|e| connect_err(e.to_string()))?;
            if let Err(e) = stream.set_nodelay(true) {
                debug!(peer = %peer, error = %e, "Could not disable Nagle on output link");
            }
            let local = local_connection(stream.local_addr(), mode)?;
            Ok((Endpoint::TcpOutput(stream), local))
        }
    }
}

fn accepts(filter: Option<Connection>, from: SocketAddr) -> bool {
    match (filter, from) {
        (None, _) => true,
        (Some(filter), SocketAddr::V4(from)) => filter.socket_addr() == from,
        (Some(_), SocketAddr::V6(_)) => false,
    }
}

// ============================================================================
// Input pumps
// ============================================================================

pub(crate) async fn run_udp_input(
    path: String,
    socket: UdpSocket,
    filter: Option<Connection>,
    deliveries: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) {
    let mut buf = vec![0u8; MAX_DATAGRAM];
    loop {
        let (len, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = socket.recv_from(&mut buf) => match result {
                Ok(received) => received,
                Err(e) => {
                    warn!(channel = %path, error = %e, "UDP receive failed");
                    continue;
                }
            },
        };

        if !accepts(filter, from) {
            debug!(channel = %path, from = %from, "Dropping datagram from unexpected sender");
            continue;
        }
        let Some(value) = buf.get(..len).and_then(Message::decode) else {
            warn!(channel = %path, from = %from, len, "Dropping undecodable datagram");
            continue;
        };
        if deliveries.send(Delivery { from, value }).await.is_err() {
            debug!(channel = %path, "Input receiver dropped, stopping");
            break;
        }
    }
}

pub(crate) async fn run_tcp_input(
    path: String,
    listener: TcpListener,
    filter: Option<Connection>,
    deliveries: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) {
    loop {
        let (stream, from) = tokio::select! {
            _ = cancel.cancelled() => break,
            result = listener.accept() => match result {
                Ok(accepted) => accepted,
                Err(e) => {
                    warn!(channel = %path, error = %e, "TCP accept failed");
                    continue;
                }
            },
        };

        if !accepts(filter, from) {
            debug!(channel = %path, from = %from, "Refusing link from unexpected sender");
            continue;
        }
        debug!(channel = %path, from = %from, "Input link accepted");
        tokio::spawn(read_link(
            path.clone(),
            stream,
            from,
            deliveries.clone(),
            cancel.clone(),
        ));
    }
}

async fn read_link(
    path: String,
    stream: TcpStream,
    from: SocketAddr,
    deliveries: mpsc::Sender<Delivery>,
    cancel: CancellationToken,
) {
    let mut reader = BufReader::new(stream);
    loop {
        let result = tokio::select! {
            _ = cancel.cancelled() => break,
            result = read_value(&mut reader) => result,
        };
        match result {
            Ok(value) => {
                if deliveries.send(Delivery { from, value }).await.is_err() {
                    break;
                }
            }
            Err(FrameError::Closed) => {
                debug!(channel = %path, from = %from, "Input link closed by peer");
                break;
            }
            Err(e) => {
                warn!(channel = %path, from = %from, error = %e, "Input link failed");
                break;
            }
        }
    }
}

// ============================================================================
// Output pumps
// ============================================================================

pub(crate) async fn run_udp_output(
    path: String,
    socket: UdpSocket,
    mut outgoing: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) {
    loop {
        let value = tokio::select! {
            _ = cancel.cancelled() => break,
            value = outgoing.recv() => match value {
                Some(value) => value,
                None => break,
            },
        };
        let bytes = match Message::encode(&value) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(channel = %path, error = %e, "Dropping unencodable value");
                continue;
            }
        };
        if bytes.len() > MAX_DATAGRAM {
            warn!(channel = %path, len = bytes.len(), "Dropping value too large for a datagram");
            continue;
        }
        if let Err(e) = socket.send(&bytes).await {
            // A closed UDP peer surfaces as ECONNREFUSED on the next send.
            debug!(channel = %path, error = %e, "UDP send failed");
        }
    }
}

pub(crate) async fn run_tcp_output(
    path: String,
    stream: TcpStream,
    mut outgoing: mpsc::Receiver<Value>,
    cancel: CancellationToken,
) {
    let mut writer = BufWriter::new(stream);
    loop {
        let value = tokio::select! {
            _ = cancel.cancelled() => break,
            value = outgoing.recv() => match value {
                Some(value) => value,
                None => break,
            },
        };
        if let Err(e) = write_value_timeout(&mut writer, &value).await {
            warn!(channel = %path, error = %e, "Output link failed");
            break;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_filter_matching() {
        let filter = Connection::new(Ipv4Addr::LOCALHOST, 4000, TransportType::Udp);
        assert!(accepts(None, "10.1.1.1:9".parse().unwrap()));
        assert!(accepts(Some(filter), "127.0.0.1:4000".parse().unwrap()));
        assert!(!accepts(Some(filter), "127.0.0.1:4001".parse().unwrap()));
        assert!(!accepts(Some(filter), "[::1]:4000".parse().unwrap()));
    }

    #[tokio::test]
    async fn test_bind_input_reports_ephemeral_port() {
        let (endpoint, local) = bind_input(TransportType::Udp, Ipv4Addr::LOCALHOST)
            .await
            .unwrap();
        assert!(matches!(endpoint, Endpoint::UdpInput(_)));
        assert_eq!(local.address, Ipv4Addr::LOCALHOST);
        assert_ne!(local.port, 0);
        assert_eq!(local.transport, TransportType::Udp);
    }

    #[tokio::test]
    async fn test_connect_output_refused() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        drop(listener);

        let peer = Connection::new(Ipv4Addr::LOCALHOST, port, TransportType::Tcp);
        let err = connect_output(peer, Ipv4Addr::LOCALHOST).await.unwrap_err();
        assert!(matches!(err, ChannelError::Connect { .. }));
    }
}
