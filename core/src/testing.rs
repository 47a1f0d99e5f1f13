//! Scripted transport shared by the unit tests.

use std::cell::Cell;
use std::collections::VecDeque;
use std::net::Ipv4Addr;
use std::rc::Rc;
use std::time::Duration;

use crate::error::TransportError;
use crate::transport::Transport;

/// One read as the modem would deliver it.
#[derive(Debug, Clone)]
pub enum Step {
    Data(String),
    Empty,
    Timeout,
}

/// What happens to one `send` and the reads that follow it.
#[derive(Debug, Clone)]
pub enum Script {
    Deliver(Vec<Step>),
    TransmitFails,
    SendTimesOut,
}

impl Script {
    pub fn reply(body: &str) -> Self {
        Script::Deliver(vec![Step::Data(format!(
            "HTTP/1.1 200 OK\r\nContent-Type: application/json\r\n\r\n{body}"
        ))])
    }
}

#[derive(Debug, Default)]
pub struct FakeTransport {
    scripts: VecDeque<Script>,
    current: VecDeque<Step>,
    pub unresolvable: bool,
    pub resolves: u32,
    pub sends: u32,
    pub receives: u32,
    pub sent: Vec<String>,
    /// Shared so a test can observe the close after the client is consumed.
    pub closed: Rc<Cell<bool>>,
}

impl FakeTransport {
    pub fn new(scripts: impl IntoIterator<Item = Script>) -> Self {
        Self {
            scripts: scripts.into_iter().collect(),
            ..Self::default()
        }
    }
}

impl Transport for FakeTransport {
    fn resolve(&mut self, hostname: &str) -> Result<Ipv4Addr, TransportError> {
        self.resolves += 1;
        if self.unresolvable {
            return Err(TransportError::Resolution {
                host: hostname.to_string(),
                reason: "modem returned status 1".to_string(),
            });
        }
        Ok(Ipv4Addr::new(10, 0, 0, 1))
    }

    fn send(&mut self, _addr: Ipv4Addr, _port: u16, _secure: bool, data: &[u8]) -> Result<(), TransportError> {
        self.sends += 1;
        self.sent.push(String::from_utf8_lossy(data).into_owned());
        self.current.clear();
        match self.scripts.pop_front() {
            Some(Script::Deliver(steps)) => {
                self.current = steps.into();
                Ok(())
            }
            Some(Script::TransmitFails) => Err(TransportError::Transmit("no carrier".to_string())),
            Some(Script::SendTimesOut) => Err(TransportError::Timeout(Duration::from_secs(20))),
            None => Ok(()),
        }
    }

    fn receive(&mut self, timeout: Duration) -> Result<Vec<u8>, TransportError> {
        self.receives += 1;
        match self.current.pop_front() {
            Some(Step::Data(text)) => Ok(text.into_bytes()),
            Some(Step::Empty) => Ok(Vec::new()),
            Some(Step::Timeout) | None => Err(TransportError::Timeout(timeout)),
        }
    }

    fn close(&mut self) -> Result<(), TransportError> {
        self.closed.set(true);
        Ok(())
    }
}

/// Clock the test moves by hand. Clones share the same time.
#[derive(Debug, Clone, Default)]
pub struct ManualClock(Rc<Cell<u64>>);

impl ManualClock {
    pub fn at(secs: u64) -> Self {
        let clock = Self::default();
        clock.set(secs);
        clock
    }

    pub fn set(&self, secs: u64) {
        self.0.set(secs);
    }
}

impl crate::auth::Clock for ManualClock {
    fn now(&self) -> u64 {
        self.0.get()
    }
}
