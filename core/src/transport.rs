//! The raw modem link consumed by `RetryingClient`.
//!
//! # Design
//! A `Transport` has no notion of sockets or TLS. It resolves names through a
//! side channel, pushes opaque bytes at an IPv4 address and hands back whatever
//! arrives next. A timeout (`TransportError::Timeout`) and an empty read
//! (`Ok` with no bytes) are different signals: the first means the modem saw
//! nothing in the window, the second means it reported data of zero length.
//!
//! Transports are held for the lifetime of the process and released through
//! `close`, not through drop.

use std::net::Ipv4Addr;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::TransportError;

/// Exclusive handle on one physical link.
pub trait Transport {
    /// Look up `hostname` and return its IPv4 address.
    fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, TransportError>;

    /// Send `data` to `addr:port`, over the modem's secure channel when `secure` is set.
    fn send(&mut self, addr: Ipv4Addr, port: u16, secure: bool, data: &[u8]) -> Result<(), TransportError>;

    /// Block up to `timeout` for the next chunk of incoming data.
    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError>;

    /// Release the link.
    fn close(&mut self) -> Result<(), TransportError> {
        Ok(())
    }
}

impl<T: Transport + ?Sized> Transport for Box<T> {
    fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, TransportError> {
        (**self).resolve(hostname)
    }

    fn send(&mut self, addr: Ipv4Addr, port: u16, secure: bool, data: &[u8]) -> Result<(), TransportError> {
        (**self).send(addr, port, secure, data)
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        (**self).receive(timeout)
    }

    fn close(&mut self) -> Result<(), TransportError> {
        (**self).close()
    }
}

/// Produces a ready-to-use transport, typically by locating the modem.
pub trait TransportFactory {
    type Transport: Transport;

    fn open(&self) -> Result<Self::Transport, TransportError>;
}

/// Port names probed during discovery: `COM0..COM{max-1}`, then `/dev/ttyUSB0..`.
pub fn candidate_ports(max: usize) -> Vec<String> {
    (0..max)
        .map(|n| format!("COM{n}"))
        .chain((0..max).map(|n| format!("/dev/ttyUSB{n}")))
        .collect()
}

/// Try `open` on each candidate in order and return the first device that opens.
pub fn scan_ports<T, F>(candidates: &[String], mut open: F) -> Result<T, TransportError>
where
    F: FnMut(&str) -> std::io::Result<T>,
{
    for port in candidates {
        match open(port) {
            Ok(device) => {
                info!(port = %port, "modem found");
                return Ok(device);
            }
            Err(err) => debug!(port = %port, error = %err, "no modem on port"),
        }
    }
    Err(TransportError::DeviceNotFound {
        tried: candidates.to_vec(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;

    #[test]
    fn candidates_cover_windows_then_linux_names() {
        let ports = candidate_ports(2);
        assert_eq!(ports, vec!["COM0", "COM1", "/dev/ttyUSB0", "/dev/ttyUSB1"]);
    }

    #[test]
    fn scan_returns_first_port_that_opens() {
        let ports = candidate_ports(3);
        let mut probed = Vec::new();
        let found = scan_ports(&ports, |port| {
            probed.push(port.to_string());
            if port == "/dev/ttyUSB1" {
                Ok(port.to_string())
            } else {
                Err(io::Error::new(io::ErrorKind::NotFound, "absent"))
            }
        })
        .unwrap();
        assert_eq!(found, "/dev/ttyUSB1");
        assert_eq!(probed.len(), 5);
    }

    #[test]
    fn scan_without_device_lists_every_candidate() {
        let ports = candidate_ports(2);
        let err = scan_ports::<(), _>(&ports, |_| Err(io::Error::new(io::ErrorKind::NotFound, "absent")))
            .unwrap_err();
        match err {
            TransportError::DeviceNotFound { tried } => assert_eq!(tried, ports),
            other => panic!("unexpected error: {other}"),
        }
    }
}
