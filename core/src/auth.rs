//! OAuth2 JWT-bearer token acquisition and refresh.
//!
//! # Design
//! `TokenManager` owns the only copy of the access token. It is created by
//! running the full exchange once, and `ensure_valid` repeats that exchange
//! only when the token has outlived its lifetime; otherwise it is a timestamp
//! comparison. A refresh replaces the whole `Credential`.
//!
//! The signing identity comes from an `IdentityProvider` on every exchange and
//! is dropped as soon as the assertion is signed.

use std::fmt;
use std::time::{SystemTime, UNIX_EPOCH};

use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use crate::client::RetryingClient;
use crate::config::AuthConfig;
use crate::error::ApiError;
use crate::http::{HttpMethod, HttpRequest};
use crate::transport::Transport;
use crate::types::TokenResponse;

pub const TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const SHEETS_SCOPE: &str = "https://www.googleapis.com/auth/spreadsheets";
pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";

/// Service account email and PEM-encoded RSA private key.
#[derive(Clone, Deserialize)]
pub struct ServiceIdentity {
    pub client_email: String,
    pub private_key: String,
}

impl fmt::Debug for ServiceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceIdentity")
            .field("client_email", &self.client_email)
            .field("private_key", &"<redacted>")
            .finish()
    }
}

/// Source of the signing identity.
///
/// `identity` is called once per token acquisition and the result is dropped
/// after signing, so the private key is only held while an assertion is
/// built. `ServiceAccountFile` is the provider for real devices.
pub trait IdentityProvider {
    fn identity(&self) -> Result<ServiceIdentity, ApiError>;
}

// Holds the key for the provider's whole lifetime; unit tests only.
#[cfg(test)]
impl IdentityProvider for ServiceIdentity {
    fn identity(&self) -> Result<ServiceIdentity, ApiError> {
        Ok(self.clone())
    }
}

/// Seconds since the Unix epoch.
pub trait Clock {
    fn now(&self) -> u64;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs())
            .unwrap_or(0)
    }
}

/// Claims of the JWT assertion sent to the token endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    pub iss: String,
    pub scope: String,
    pub aud: String,
    pub iat: u64,
    pub exp: u64,
}

/// Sign an RS256 assertion for `identity`, valid from `issued_at`.
pub fn sign_assertion(identity: &ServiceIdentity, config: &AuthConfig, issued_at: u64) -> Result<String, ApiError> {
    let claims = Claims {
        iss: identity.client_email.clone(),
        scope: config.scope.clone(),
        aud: config.audience.clone(),
        iat: issued_at,
        exp: issued_at + config.token_lifetime_secs,
    };
    let key = EncodingKey::from_rsa_pem(identity.private_key.as_bytes())?;
    Ok(encode(&Header::new(Algorithm::RS256), &claims, &key)?)
}

/// A bearer token and when it was issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    pub token: String,
    pub issued_at: u64,
}

impl Credential {
    pub fn is_expired(&self, now: u64, lifetime_secs: u64) -> bool {
        now.saturating_sub(self.issued_at) > lifetime_secs
    }
}

fn exchange<T, P, C>(
    client: &mut RetryingClient<T>,
    provider: &P,
    clock: &C,
    config: &AuthConfig,
) -> Result<Credential, ApiError>
where
    T: Transport,
    P: IdentityProvider,
    C: Clock,
{
    let issued_at = clock.now();
    let assertion = {
        let identity = provider.identity()?;
        sign_assertion(&identity, config, issued_at)?
    };

    let request = HttpRequest::new(HttpMethod::Post, &config.token_url)
        .query_param("grant_type", JWT_BEARER_GRANT)
        .query_param("assertion", assertion);
    let outcome = client.request(&request)?;

    let body = outcome.reply.json().ok_or_else(|| {
        ApiError::Auth(format!(
            "token endpoint sent no JSON in {} attempt(s)",
            outcome.attempts
        ))
    })?;
    if let Some(err) = body.get("error") {
        let description = body.get("error_description").and_then(Value::as_str).unwrap_or("no description");
        warn!(error = %err, description, "assertion refused");
        return Err(ApiError::Auth(format!("token endpoint refused the assertion: {err} ({description})")));
    }
    let token = TokenResponse::deserialize(body)
        .map_err(|e| ApiError::Auth(format!("unusable token response: {e}")))?;

    info!(attempts = outcome.attempts, "access token acquired");
    Ok(Credential {
        token: token.access_token,
        issued_at,
    })
}

pub struct TokenManager<P, C = SystemClock> {
    provider: P,
    clock: C,
    config: AuthConfig,
    credential: Credential,
    acquisitions: u32,
}

impl<P: IdentityProvider, C: Clock> TokenManager<P, C> {
    /// Run the exchange once and hold on to the resulting token.
    pub fn acquire<T: Transport>(
        client: &mut RetryingClient<T>,
        provider: P,
        config: AuthConfig,
        clock: C,
    ) -> Result<Self, ApiError> {
        let credential = exchange(client, &provider, &clock, &config)?;
        Ok(Self {
            provider,
            clock,
            config,
            credential,
            acquisitions: 1,
        })
    }

    /// Current token, re-acquired first if it has expired.
    pub fn ensure_valid<T: Transport>(&mut self, client: &mut RetryingClient<T>) -> Result<&str, ApiError> {
        let now = self.clock.now();
        if self.credential.is_expired(now, self.config.token_lifetime_secs) {
            info!(
                age_secs = now.saturating_sub(self.credential.issued_at),
                "access token expired, re-authenticating"
            );
            self.credential = exchange(client, &self.provider, &self.clock, &self.config)?;
            self.acquisitions += 1;
        }
        Ok(&self.credential.token)
    }

    pub fn credential(&self) -> &Credential {
        &self.credential
    }

    /// Number of completed exchanges, including the initial one.
    pub fn acquisitions(&self) -> u32 {
        self.acquisitions
    }
}
