//! HTTP-over-modem client core for devices behind a cellular data link.
//!
//! # Overview
//! The device has no sockets, TLS stack or resolver, only a modem that can
//! resolve names through an AT command and push raw bytes at an address. This
//! crate builds the HTTP request text by hand, reassembles JSON replies from
//! fragmented reads, retries failed exchanges a bounded number of times, and
//! keeps an OAuth2 bearer token fresh for the spreadsheet API.
//!
//! # Design
//! - `http` and `assembler` are pure: request text in, JSON out, no I/O.
//! - `Transport` is the only I/O seam. `XBeeTransport` drives a modem in API
//!   mode over any byte stream; `TcpTransport` stands in on development hosts.
//! - `RetryingClient` absorbs transport and protocol failures and returns a
//!   best-effort `RequestOutcome`; only configuration, authentication and
//!   cancellation failures become `ApiError`s.
//! - `TokenManager` and `Spreadsheet` sit on top of the client and never touch
//!   the transport directly.

pub mod assembler;
pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod frame;
pub mod http;
pub mod sheets;
pub mod tcp;
pub mod transport;
pub mod types;
pub mod xbee;

#[cfg(test)]
pub(crate) mod testing;

pub use assembler::{Extract, ResponseAssembler};
pub use auth::{Clock, Credential, IdentityProvider, ServiceIdentity, SystemClock, TokenManager};
pub use client::{CancelToken, FailureKind, Reply, RequestOutcome, RetryingClient};
pub use config::{AuthConfig, ClientConfig, ServiceAccountFile, Settings, SheetsConfig};
pub use error::{ApiError, TransportError};
pub use http::{Endpoint, HttpMethod, HttpRequest, WireRequest};
pub use sheets::Spreadsheet;
pub use tcp::TcpTransport;
pub use transport::{candidate_ports, scan_ports, Transport, TransportFactory};
pub use types::{AppendResponse, TokenResponse, UpdateSummary, ValueRange};
pub use xbee::{PortScanner, XBeeTransport};
