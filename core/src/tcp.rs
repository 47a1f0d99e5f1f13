//! Plain TCP transport for development hosts and loopback testing.
//!
//! Opens one connection per `send`, mirroring the modem's one-socket-per-request
//! behaviour. There is no TLS here, so a secure send is refused.

use std::io::{ErrorKind, Read, Write};
use std::net::{Ipv4Addr, Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::time::Duration;

use tracing::debug;

use crate::error::TransportError;
use crate::transport::Transport;

const READ_CHUNK: usize = 4096;

#[derive(Debug)]
pub struct TcpTransport {
    connect_timeout: Duration,
    stream: Option<TcpStream>,
}

impl TcpTransport {
    pub fn new(connect_timeout: Duration) -> Self {
        Self {
            connect_timeout,
            stream: None,
        }
    }

    fn drop_stream(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }
}

impl Default for TcpTransport {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl Transport for TcpTransport {
    fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, TransportError> {
        let resolution = |reason: String| TransportError::Resolution {
            host: hostname.to_string(),
            reason,
        };
        let addrs = (hostname, 0).to_socket_addrs().map_err(|e| resolution(e.to_string()))?;
        addrs
            .into_iter()
            .find_map(|addr| match addr {
                SocketAddr::V4(v4) => Some(*v4.ip()),
                SocketAddr::V6(_) => None,
            })
            .ok_or_else(|| resolution("no IPv4 address".to_string()))
    }

    fn send(&mut self, addr: Ipv4Addr, port: u16, secure: bool, data: &[u8]) -> Result<(), TransportError> {
        if secure {
            return Err(TransportError::Transmit(
                "tcp transport has no secure channel".to_string(),
            ));
        }
        self.drop_stream();

        let target = SocketAddr::from((addr, port));
        let mut stream = TcpStream::connect_timeout(&target, self.connect_timeout)
            .map_err(|e| TransportError::Transmit(format!("connect to {target}: {e}")))?;
        stream
            .write_all(data)
            .map_err(|e| TransportError::Transmit(e.to_string()))?;
        debug!(%target, bytes = data.len(), "request written");
        self.stream = Some(stream);
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        let Some(stream) = self.stream.as_mut() else {
            return Err(TransportError::Transmit("receive before send".to_string()));
        };
        stream.set_read_timeout(Some(timeout))?;

        let mut chunk = vec![0u8; READ_CHUNK];
        match stream.read(&mut chunk) {
            Ok(n) => {
                chunk.truncate(n);
                Ok(chunk)
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                Err(TransportError::Timeout(timeout))
            }
            Err(e) => Err(TransportError::Link(e)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.drop_stream();
        Ok(())
    }
}
