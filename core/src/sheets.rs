//! Spreadsheet values API over the cellular client.
//!
//! # Design
//! `Spreadsheet` owns the `RetryingClient` and the `TokenManager`, so every
//! call can refresh the token before it goes out. Results come back as
//! `RequestOutcome` untouched: callers that want typed data use
//! `RequestOutcome::parse` with the DTOs in `types`.

use serde::Serialize;
use tracing::{info, warn};

use crate::auth::{Clock, IdentityProvider, SystemClock, TokenManager};
use crate::client::{RequestOutcome, RetryingClient};
use crate::config::{AuthConfig, SheetsConfig};
use crate::error::ApiError;
use crate::http::{form_params, HttpMethod, HttpRequest};
use crate::transport::Transport;

/// Query parameters every append carries.
fn append_options() -> Vec<(String, String)> {
    vec![
        ("valueInputOption".to_string(), "USER_ENTERED".to_string()),
        ("insertDataOption".to_string(), "OVERWRITE".to_string()),
    ]
}

/// Close a client that will not be handed out. The close error is logged
/// because the caller is already receiving the error that caused it.
fn release<T: Transport>(client: RetryingClient<T>, reason: &str) {
    if let Err(err) = client.shutdown() {
        warn!(error = %err, reason, "closing transport after failed connect");
    }
}

pub struct Spreadsheet<T, P, C = SystemClock> {
    client: RetryingClient<T>,
    tokens: TokenManager<P, C>,
    config: SheetsConfig,
}

impl<T: Transport, P: IdentityProvider> Spreadsheet<T, P, SystemClock> {
    pub fn connect(
        client: RetryingClient<T>,
        provider: P,
        auth: AuthConfig,
        config: SheetsConfig,
    ) -> Result<Self, ApiError> {
        Self::connect_with_clock(client, provider, auth, config, SystemClock)
    }
}

impl<T: Transport, P: IdentityProvider, C: Clock> Spreadsheet<T, P, C> {
    /// Authenticate and bind to `config.spreadsheet_id`.
    ///
    /// The transport is closed again if authentication fails.
    pub fn connect_with_clock(
        mut client: RetryingClient<T>,
        provider: P,
        auth: AuthConfig,
        config: SheetsConfig,
        clock: C,
    ) -> Result<Self, ApiError> {
        if config.spreadsheet_id.is_empty() {
            release(client, "missing spreadsheet id");
            return Err(ApiError::Config("spreadsheet_id is not set".to_string()));
        }
        match TokenManager::acquire(&mut client, provider, auth, clock) {
            Ok(tokens) => {
                info!(spreadsheet = %config.spreadsheet_id, "auth token received");
                Ok(Self { client, tokens, config })
            }
            Err(err) => {
                release(client, "failed authentication");
                Err(err)
            }
        }
    }

    fn sheet_url(&self) -> String {
        format!(
            "{}/v4/spreadsheets/{}/",
            self.config.base_url.trim_end_matches('/'),
            self.config.spreadsheet_id
        )
    }

    fn authorized(&mut self, method: HttpMethod, url: String) -> Result<HttpRequest, ApiError> {
        let token = self.tokens.ensure_valid(&mut self.client)?;
        Ok(HttpRequest::new(method, url).header("Authorization", format!("Bearer {token}")))
    }

    /// Read the whole spreadsheet, or only `range` when given.
    pub fn get(&mut self, range: Option<&str>) -> Result<RequestOutcome, ApiError> {
        let mut url = self.sheet_url();
        if let Some(range) = range {
            url.push_str(&format!("values/{range}"));
        }
        let request = self.authorized(HttpMethod::Get, url)?;
        self.client.request(&request)
    }

    /// Append `values` (a list of rows) after the table found in `range`.
    pub fn append<V: Serialize + ?Sized>(&mut self, values: &V, range: &str) -> Result<RequestOutcome, ApiError> {
        let url = format!(
            "{}values/{range}:append?{}",
            self.sheet_url(),
            form_params(&append_options())
        );
        let request = self
            .authorized(HttpMethod::Post, url)?
            .body_field("range", serde_json::to_string(range)?)
            .body_field("majorDimension", "\"ROWS\"")
            .body_field("values", serde_json::to_string(values)?);
        self.client.request(&request)
    }

    pub fn tokens(&self) -> &TokenManager<P, C> {
        &self.tokens
    }

    pub fn client(&self) -> &RetryingClient<T> {
        &self.client
    }

    /// Release the transport.
    pub fn close(self) -> Result<(), ApiError> {
        self.client.shutdown()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::ServiceIdentity;
    use crate::config::ClientConfig;
    use crate::testing::{FakeTransport, ManualClock, Script};
    use crate::types::{AppendResponse, ValueRange};

    const T0: u64 = 1_700_000_000;

    fn identity() -> ServiceIdentity {
        ServiceIdentity {
            client_email: "device@cellhttp-test.iam.gserviceaccount.com".to_string(),
            private_key: include_str!("../tests/fixtures/test_key.pem").to_string(),
        }
    }

    fn token_reply(token: &str) -> Script {
        Script::reply(&format!(r#"{{"access_token":"{token}"}}"#))
    }

    fn sheets_config() -> SheetsConfig {
        SheetsConfig {
            spreadsheet_id: "SHEET".to_string(),
            ..SheetsConfig::default()
        }
    }

    fn connect(
        scripts: Vec<Script>,
        clock: ManualClock,
    ) -> Spreadsheet<FakeTransport, ServiceIdentity, ManualClock> {
        let client = RetryingClient::new(FakeTransport::new(scripts), ClientConfig::default());
        Spreadsheet::connect_with_clock(client, identity(), AuthConfig::default(), sheets_config(), clock).unwrap()
    }

    #[test]
    fn get_whole_sheet_and_range() {
        let mut sheet = connect(
            vec![
                token_reply("tok"),
                Script::reply(r#"{"spreadsheetId":"SHEET"}"#),
                Script::reply(r#"{"range":"Sheet1!A1:B5","majorDimension":"ROWS","values":[["a","b"]]}"#),
            ],
            ManualClock::at(T0),
        );

        sheet.get(None).unwrap();
        let outcome = sheet.get(Some("A1:B5")).unwrap();
        let range: ValueRange = outcome.parse().unwrap();
        assert_eq!(range.values.len(), 1);

        let sent = &sheet.client().transport().sent;
        assert!(sent[1].starts_with("GET /v4/spreadsheets/SHEET/ HTTP/1.1\r\nAuthorization: Bearer tok\r\n"));
        assert!(sent[2].starts_with("GET /v4/spreadsheets/SHEET/values/A1:B5 HTTP/1.1\r\n"));
        assert!(sent[1].contains("Host: sheets.googleapis.com\r\n"));
    }

    #[test]
    fn append_sends_rows_as_json_body() {
        let mut sheet = connect(
            vec![
                token_reply("tok"),
                Script::reply(
                    r#"{"spreadsheetId":"SHEET","updates":{"spreadsheetId":"SHEET","updatedRange":"Sheet1!A5:B5","updatedRows":1,"updatedColumns":2,"updatedCells":2}}"#,
                ),
            ],
            ManualClock::at(T0),
        );

        let outcome = sheet.append(&[["james2", "rocks"]], "A5:B5").unwrap();
        let resp: AppendResponse = outcome.parse().unwrap();
        assert_eq!(resp.updates.updated_cells, 2);

        let sent = &sheet.client().transport().sent[1];
        assert!(sent.starts_with(
            "POST /v4/spreadsheets/SHEET/values/A5:B5:append?valueInputOption=USER_ENTERED&insertDataOption=OVERWRITE HTTP/1.1\r\n"
        ));
        assert!(sent.contains("Content-Type: application/json\r\n"));
        assert!(sent.contains(
            "{\r\n  \"range\": \"A5:B5\",\r\n  \"majorDimension\": \"ROWS\",\r\n  \"values\": [[\"james2\",\"rocks\"]]\r\n}\r\n"
        ));
    }

    #[test]
    fn expired_token_is_refreshed_before_the_call() {
        let clock = ManualClock::at(T0);
        let mut sheet = connect(
            vec![token_reply("old"), token_reply("new"), Script::reply("{}")],
            clock.clone(),
        );
        clock.set(T0 + 3700);
        sheet.get(None).unwrap();

        assert_eq!(sheet.tokens().acquisitions(), 2);
        let sent = &sheet.client().transport().sent;
        assert!(sent[1].starts_with("POST /token"));
        assert!(sent[2].contains("Authorization: Bearer new\r\n"));
    }

    #[test]
    fn missing_spreadsheet_id_is_a_config_error() {
        let transport = FakeTransport::new([]);
        let closed = transport.closed.clone();
        let client = RetryingClient::new(transport, ClientConfig::default());
        let result = Spreadsheet::connect_with_clock(
            client,
            identity(),
            AuthConfig::default(),
            SheetsConfig::default(),
            ManualClock::at(T0),
        );
        assert!(matches!(result, Err(ApiError::Config(_))));
        assert!(closed.get());
    }

    #[test]
    fn failed_authentication_surfaces_and_closes_the_transport() {
        let transport = FakeTransport::new([Script::reply(r#"{"error":"invalid_grant"}"#)]);
        let closed = transport.closed.clone();
        let client = RetryingClient::new(transport, ClientConfig::default());
        let result = Spreadsheet::connect_with_clock(
            client,
            identity(),
            AuthConfig::default(),
            sheets_config(),
            ManualClock::at(T0),
        );
        assert!(matches!(result, Err(ApiError::Auth(_))));
        assert!(closed.get());
    }
}
