//! Bounded-retry HTTP exchange over a `Transport`.
//!
//! # Design
//! Each attempt resolves the host, builds and sends the request, then reads
//! until the assembler finds a JSON object. An attempt ends in one of three
//! ways: `Success`, `Retryable` with a failure class, or `Fatal`. Retryable
//! failures are logged and consume an attempt; nothing is cached between
//! attempts, so every retry re-resolves and re-sends with an empty buffer.
//!
//! Running out of attempts is not an error. The caller gets the last buffer
//! back as `Reply::Incomplete` together with the attempt count and decides
//! what to do with it. Only resolution failures and cancellation are raised.

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, error, trace, warn};

use crate::assembler::{Extract, ResponseAssembler};
use crate::config::ClientConfig;
use crate::error::{ApiError, TransportError};
use crate::http::{self, HttpRequest};
use crate::transport::Transport;

/// Why a single attempt failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    MalformedJson,
    NoJson,
    TransmitTimeout,
    TransmitException,
}

impl FailureKind {
    fn classify(err: &TransportError) -> Self {
        match err {
            TransportError::Timeout(_) => FailureKind::TransmitTimeout,
            _ => FailureKind::TransmitException,
        }
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            FailureKind::MalformedJson => "malformed JSON",
            FailureKind::NoJson => "no JSON received",
            FailureKind::TransmitTimeout => "transmit timeout",
            FailureKind::TransmitException => "transmit exception",
        };
        f.write_str(label)
    }
}

/// Body handed back by `RetryingClient::request`.
#[derive(Debug, Clone, PartialEq)]
pub enum Reply {
    Complete(Value),
    /// Raw text of the last attempt, possibly empty.
    Incomplete(String),
}

impl Reply {
    pub fn json(&self) -> Option<&Value> {
        match self {
            Reply::Complete(value) => Some(value),
            Reply::Incomplete(_) => None,
        }
    }

    pub fn is_complete(&self) -> bool {
        matches!(self, Reply::Complete(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct RequestOutcome {
    pub reply: Reply,
    pub attempts: u32,
    /// Status line code seen ahead of the body, when the transport passed it through.
    pub status: Option<u16>,
}

impl RequestOutcome {
    /// Deserialize a complete reply into `T`.
    pub fn parse<T: DeserializeOwned>(&self) -> Result<T, ApiError> {
        let value = self.reply.json().ok_or(ApiError::NoResponse {
            attempts: self.attempts,
        })?;
        Ok(T::deserialize(value)?)
    }
}

/// Shared flag checked between attempts and between reads.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

enum Attempt {
    Success(Value),
    Retryable(FailureKind),
    Fatal(ApiError),
}

pub struct RetryingClient<T> {
    transport: T,
    config: ClientConfig,
    cancel: CancelToken,
}

impl<T: Transport> RetryingClient<T> {
    pub fn new(transport: T, config: ClientConfig) -> Self {
        Self {
            transport,
            config,
            cancel: CancelToken::new(),
        }
    }

    pub fn with_cancel_token(mut self, cancel: CancelToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Send `request` with the configured attempt budget.
    pub fn request(&mut self, request: &HttpRequest) -> Result<RequestOutcome, ApiError> {
        self.request_with_attempts(request, self.config.max_attempts)
    }

    /// Send `request`, making at most `max_attempts` send attempts.
    pub fn request_with_attempts(
        &mut self,
        request: &HttpRequest,
        max_attempts: u32,
    ) -> Result<RequestOutcome, ApiError> {
        let mut last = ResponseAssembler::new();
        let mut attempts = 0;

        while attempts < max_attempts {
            if self.cancel.is_cancelled() {
                return Err(ApiError::Cancelled { attempts });
            }
            attempts += 1;

            let mut assembler = ResponseAssembler::new();
            match self.attempt(request, &mut assembler, attempts) {
                Attempt::Success(value) => {
                    let status = assembler.status();
                    if let Some(code) = status.filter(|code| !(200..300).contains(code)) {
                        warn!(status = code, url = %request.url, "non-success status; returning body as-is");
                    }
                    return Ok(RequestOutcome {
                        reply: Reply::Complete(value),
                        attempts,
                        status,
                    });
                }
                Attempt::Retryable(failure) => {
                    warn!(attempt = attempts, max_attempts, %failure, url = %request.url, "request attempt failed");
                    debug!(attempt = attempts, response = %assembler.text(), "response at failure");
                    // An attempt that failed before any data arrived keeps the earlier text.
                    if !assembler.is_empty() {
                        last = assembler;
                    }
                }
                Attempt::Fatal(err) => return Err(err),
            }
        }

        error!(attempts, url = %request.url, "max attempts reached");
        Ok(RequestOutcome {
            status: last.status(),
            reply: Reply::Incomplete(last.text().into_owned()),
            attempts,
        })
    }

    fn attempt(&mut self, request: &HttpRequest, assembler: &mut ResponseAssembler, attempt: u32) -> Attempt {
        let endpoint = request.endpoint();
        let host = endpoint.hostname();
        let addr = match self.transport.resolve(host) {
            Ok(addr) => addr,
            Err(source) => {
                error!(host, error = %source, "host resolution failed");
                return Attempt::Fatal(ApiError::Unresolvable {
                    host: host.to_string(),
                    source,
                });
            }
        };

        let wire = http::build(request);
        let port = endpoint.port().unwrap_or(self.config.port);
        debug!(attempt, host, %addr, port, bytes = wire.len(), "sending request");
        if let Err(err) = self.transport.send(addr, port, self.config.secure, wire.as_bytes()) {
            debug!(attempt, error = %err, "send failed");
            return Attempt::Retryable(FailureKind::classify(&err));
        }

        for receive in 1..=self.config.max_receives {
            if self.cancel.is_cancelled() {
                return Attempt::Fatal(ApiError::Cancelled { attempts: attempt });
            }
            match self.transport.receive(self.config.receive_timeout()) {
                Ok(fragment) => assembler.push(&fragment),
                Err(err) => {
                    debug!(attempt, receive, error = %err, "receive failed");
                    return Attempt::Retryable(FailureKind::classify(&err));
                }
            }
            match assembler.try_extract() {
                Extract::Complete(value) => return Attempt::Success(value),
                Extract::Malformed(reason) => {
                    debug!(attempt, receive, %reason, "response is not valid JSON");
                    return Attempt::Retryable(FailureKind::MalformedJson);
                }
                Extract::Incomplete => trace!(attempt, receive, buffered = assembler.len(), "waiting for more data"),
            }
        }
        Attempt::Retryable(FailureKind::NoJson)
    }

    /// Close the transport. The client cannot be used afterwards.
    pub fn shutdown(mut self) -> Result<(), ApiError> {
        self.transport.close()?;
        Ok(())
    }
}
