//! `Transport` over an XBee-style cellular modem in API mode.
//!
//! # Design
//! The modem is driven entirely through API frames on a byte stream, normally
//! a serial port opened by the caller with a short read timeout. DNS goes
//! through the `LA` AT command, outgoing data through IPv4 transmit requests
//! acknowledged by a transmit status, and incoming data arrives as IPv4 receive
//! frames. Receive frames that show up while a command is waiting for its
//! acknowledgement are queued for the next `receive` instead of being dropped.

use std::collections::VecDeque;
use std::io::{ErrorKind, Read, Write};
use std::net::Ipv4Addr;
use std::thread;
use std::time::{Duration, Instant};

use tracing::{debug, warn};

use crate::error::TransportError;
use crate::frame::{Frame, FrameDecoder, IpProtocol};
use crate::transport::{candidate_ports, scan_ports, Transport, TransportFactory};

const LOOKUP_COMMAND: [u8; 2] = *b"LA";
const READ_CHUNK: usize = 256;
const IDLE_BACKOFF: Duration = Duration::from_millis(1);
/// Largest payload the modem accepts in one IPv4 transmit request.
pub const MAX_TX_PAYLOAD: usize = 1500;

pub struct XBeeTransport<S> {
    link: S,
    decoder: FrameDecoder,
    pending: VecDeque<Vec<u8>>,
    last_frame_id: u8,
    command_timeout: Duration,
    closed: bool,
}

impl<S: Read + Write> XBeeTransport<S> {
    /// Wrap an open link. `command_timeout` bounds DNS lookups and transmit acknowledgements.
    pub fn new(link: S, command_timeout: Duration) -> Self {
        Self {
            link,
            decoder: FrameDecoder::new(),
            pending: VecDeque::new(),
            last_frame_id: 0,
            command_timeout,
            closed: false,
        }
    }

    pub fn into_inner(self) -> S {
        self.link
    }

    // Frame id 0 tells the modem not to answer, so ids cycle through 1..=255.
    fn next_frame_id(&mut self) -> u8 {
        self.last_frame_id = self.last_frame_id.checked_add(1).unwrap_or(1);
        self.last_frame_id
    }

    fn ensure_open(&self) -> Result<(), TransportError> {
        if self.closed {
            return Err(TransportError::Transmit("link is closed".to_string()));
        }
        Ok(())
    }

    fn write_frame(&mut self, frame: &Frame) -> Result<(), TransportError> {
        let bytes = frame
            .encode()
            .map_err(|err| TransportError::Transmit(err.to_string()))?;
        self.link.write_all(&bytes)?;
        self.link.flush()?;
        Ok(())
    }

    fn read_frame(&mut self, deadline: Instant, window: Duration) -> Result<Frame, TransportError> {
        let mut chunk = [0u8; READ_CHUNK];
        loop {
            while let Some(decoded) = self.decoder.next_frame() {
                match decoded {
                    Ok(frame) => return Ok(frame),
                    Err(err) => warn!(error = %err, "dropping damaged frame"),
                }
            }
            if Instant::now() >= deadline {
                return Err(TransportError::Timeout(window));
            }
            match self.link.read(&mut chunk) {
                Ok(0) => thread::sleep(IDLE_BACKOFF),
                Ok(n) => self.decoder.push(&chunk[..n]),
                Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut | ErrorKind::Interrupted) => {}
                Err(e) => return Err(TransportError::Link(e)),
            }
        }
    }

    /// Read frames until `accept` picks one, queueing receive payloads seen on the way.
    fn await_frame<T>(
        &mut self,
        window: Duration,
        mut accept: impl FnMut(&Frame) -> Option<T>,
    ) -> Result<T, TransportError> {
        let deadline = Instant::now() + window;
        loop {
            let frame = self.read_frame(deadline, window)?;
            if let Some(found) = accept(&frame) {
                return Ok(found);
            }
            match frame {
                Frame::RxIpv4 { payload, .. } => self.pending.push_back(payload),
                other => debug!(frame = ?other, "ignoring unexpected frame"),
            }
        }
    }
}

impl<S: Read + Write> Transport for XBeeTransport<S> {
    fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, TransportError> {
        self.ensure_open()?;
        let resolution = |reason: String| TransportError::Resolution {
            host: hostname.to_string(),
            reason,
        };

        let frame_id = self.next_frame_id();
        self.write_frame(&Frame::AtCommand {
            frame_id,
            command: LOOKUP_COMMAND,
            parameter: hostname.as_bytes().to_vec(),
        })?;

        let window = self.command_timeout;
        let (status, data) = self
            .await_frame(window, |frame| match frame {
                Frame::AtResponse {
                    frame_id: id,
                    command,
                    status,
                    data,
                } if *id == frame_id && *command == LOOKUP_COMMAND => Some((*status, data.clone())),
                _ => None,
            })
            .map_err(|err| match err {
                TransportError::Timeout(_) => resolution(format!("no answer within {window:?}")),
                other => other,
            })?;

        if status != 0 {
            return Err(resolution(format!("modem returned status {status}")));
        }
        match data.as_slice() {
            [a, b, c, d] => {
                let addr = Ipv4Addr::new(*a, *b, *c, *d);
                debug!(host = hostname, %addr, "resolved");
                Ok(addr)
            }
            other => Err(resolution(format!("expected 4 address bytes, got {}", other.len()))),
        }
    }

    fn send(&mut self, addr: Ipv4Addr, port: u16, secure: bool, data: &[u8]) -> Result<(), TransportError> {
        self.ensure_open()?;
        if data.len() > MAX_TX_PAYLOAD {
            return Err(TransportError::Transmit(format!(
                "payload of {} bytes exceeds the modem limit of {MAX_TX_PAYLOAD}",
                data.len()
            )));
        }
        self.pending.clear();

        let frame_id = self.next_frame_id();
        let protocol = if secure { IpProtocol::TcpSsl } else { IpProtocol::Tcp };
        self.write_frame(&Frame::TxIpv4 {
            frame_id,
            dest: addr,
            dest_port: port,
            src_port: 0,
            protocol,
            options: 0,
            payload: data.to_vec(),
        })?;

        let status = self.await_frame(self.command_timeout, |frame| match frame {
            Frame::TxStatus { frame_id: id, status } if *id == frame_id => Some(*status),
            _ => None,
        })?;
        if status != 0 {
            return Err(TransportError::Transmit(format!("delivery status {status:#04x}")));
        }
        Ok(())
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.ensure_open()?;
        if let Some(payload) = self.pending.pop_front() {
            return Ok(payload);
        }
        self.await_frame(timeout, |frame| match frame {
            Frame::RxIpv4 { payload, .. } => Some(payload.clone()),
            _ => None,
        })
    }

    fn close(&mut self) -> Result<(), TransportError> {
        if !self.closed {
            self.closed = true;
            self.link.flush()?;
        }
        Ok(())
    }
}

/// Finds the modem by probing serial port names with a caller-supplied opener.
pub struct PortScanner<F> {
    candidates: Vec<String>,
    open: F,
    command_timeout: Duration,
}

impl<F> PortScanner<F> {
    /// Probe the default candidates, `max_ports` of each naming scheme.
    pub fn new(open: F, max_ports: usize, command_timeout: Duration) -> Self {
        Self::with_candidates(candidate_ports(max_ports), open, command_timeout)
    }

    pub fn with_candidates(candidates: Vec<String>, open: F, command_timeout: Duration) -> Self {
        Self {
            candidates,
            open,
            command_timeout,
        }
    }
}

impl<F, S> TransportFactory for PortScanner<F>
where
    F: Fn(&str) -> std::io::Result<S>,
    S: Read + Write,
{
    type Transport = XBeeTransport<S>;

    fn open(&self) -> Result<Self::Transport, TransportError> {
        let link = scan_ports(&self.candidates, |port| (self.open)(port))?;
        Ok(XBeeTransport::new(link, self.command_timeout))
    }
}
