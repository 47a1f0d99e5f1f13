//! Error types for the cellular HTTP client.
//!
//! # Design
//! Two layers. `TransportError` describes what the modem link reported and is
//! absorbed by `RetryingClient`, which turns it into a retry. `ApiError` is
//! what reaches the caller: configuration, authentication and cancellation
//! failures that no amount of resending can fix.

use std::time::Duration;

/// Failures reported by a `Transport` implementation.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// The side-channel DNS lookup was rejected or returned a malformed address.
    #[error("could not resolve {host}: {reason}")]
    Resolution { host: String, reason: String },

    /// The modem refused or failed to deliver outgoing data.
    #[error("transmit failed: {0}")]
    Transmit(String),

    /// Nothing arrived within the read or command window.
    #[error("no data within {0:?}")]
    Timeout(Duration),

    /// Port discovery went through every candidate without finding a device.
    #[error("no device found on any of {} candidate ports", tried.len())]
    DeviceNotFound { tried: Vec<String> },

    /// The underlying serial or socket link failed.
    #[error("link error: {0}")]
    Link(#[from] std::io::Error),
}

/// Errors returned to callers of `RetryingClient`, `TokenManager` and `Spreadsheet`.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// Missing or invalid configuration or credential document.
    #[error("configuration error: {0}")]
    Config(String),

    /// The target host could not be resolved; never retried.
    #[error("host {host} is unresolvable")]
    Unresolvable {
        host: String,
        #[source]
        source: TransportError,
    },

    /// The token endpoint did not hand out a usable access token.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// The JWT assertion could not be signed with the configured key.
    #[error("could not sign assertion: {0}")]
    Signing(#[from] jsonwebtoken::errors::Error),

    /// A request payload could not be serialized to JSON.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Every attempt was used up without a complete JSON body.
    #[error("no complete response after {attempts} attempt(s)")]
    NoResponse { attempts: u32 },

    /// A transport failure outside the retry loop, such as on shutdown.
    #[error(transparent)]
    Transport(#[from] TransportError),

    /// The caller's cancel token fired.
    #[error("request cancelled after {attempts} attempt(s)")]
    Cancelled { attempts: u32 },
}
