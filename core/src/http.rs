//! HTTP request description and wire encoding.
//!
//! # Design
//! `HttpRequest` describes a call as plain data. `build` turns it into the
//! exact text the downstream servers have always received from this device:
//! caller headers first, then `Host`, then `Content-Type` chosen by whether a
//! JSON body is present, then the query parameter block and the JSON body
//! block. Query parameters travel after the headers rather than in the path;
//! callers that need a real query string put `form_params` output into the
//! URL themselves.
//!
//! JSON bodies are framed by hand. Each body field value is a raw JSON
//! fragment inserted verbatim, so callers are responsible for quoting strings
//! (`serde_json::to_string` does that).

/// HTTP method for a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Put,
    Delete,
}

impl HttpMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Put => "PUT",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Remove a leading `https://` or `http://`.
pub fn strip_scheme(url: &str) -> &str {
    url.strip_prefix("https://")
        .or_else(|| url.strip_prefix("http://"))
        .unwrap_or(url)
}

/// Host and path of a URL, split at the first `/` after the scheme.
///
/// `host` never contains a `/` and `path` always starts with one. The host
/// may carry an explicit `:port`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub path: String,
}

impl Endpoint {
    pub fn parse(url: &str) -> Self {
        let rest = strip_scheme(url);
        match rest.find('/') {
            Some(idx) => Self {
                host: rest[..idx].to_string(),
                path: rest[idx..].to_string(),
            },
            None => Self {
                host: rest.to_string(),
                path: "/".to_string(),
            },
        }
    }

    /// The host without any `:port` suffix, as handed to DNS.
    pub fn hostname(&self) -> &str {
        match self.host.rsplit_once(':') {
            Some((name, port)) if port.parse::<u16>().is_ok() => name,
            _ => &self.host,
        }
    }

    /// The explicit port in the URL, if any.
    pub fn port(&self) -> Option<u16> {
        self.host.rsplit_once(':').and_then(|(_, port)| port.parse().ok())
    }
}

/// An HTTP request described as plain data.
///
/// `headers`, `query` and `body` keep insertion order. `body` entries are
/// `(key, raw JSON value)` pairs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HttpRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub query: Vec<(String, String)>,
    pub body: Option<Vec<(String, String)>>,
}

impl HttpRequest {
    pub fn new(method: HttpMethod, url: impl Into<String>) -> Self {
        Self {
            method,
            url: url.into(),
            headers: Vec::new(),
            query: Vec::new(),
            body: None,
        }
    }

    pub fn header(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((key.into(), value.into()));
        self
    }

    pub fn query_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.query.push((key.into(), value.into()));
        self
    }

    /// Add a body field. `raw_json` is inserted into the body unquoted.
    pub fn body_field(mut self, key: impl Into<String>, raw_json: impl Into<String>) -> Self {
        self.body
            .get_or_insert_with(Vec::new)
            .push((key.into(), raw_json.into()));
        self
    }

    pub fn endpoint(&self) -> Endpoint {
        Endpoint::parse(&self.url)
    }
}

/// The literal bytes sent over the transport for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WireRequest {
    text: String,
}

impl WireRequest {
    pub fn as_bytes(&self) -> &[u8] {
        self.text.as_bytes()
    }

    pub fn as_str(&self) -> &str {
        &self.text
    }

    pub fn len(&self) -> usize {
        self.text.len()
    }

    pub fn is_empty(&self) -> bool {
        self.text.is_empty()
    }
}

/// Serialize parameters as `k=v` pairs joined by `&`. Values are not escaped.
pub fn form_params(params: &[(String, String)]) -> String {
    params
        .iter()
        .map(|(key, value)| format!("{key}={value}"))
        .collect::<Vec<_>>()
        .join("&")
}

fn json_block(fields: &[(String, String)]) -> String {
    let entries = fields
        .iter()
        .map(|(key, value)| format!("  \"{key}\": {value}"))
        .collect::<Vec<_>>();
    if entries.is_empty() {
        return "{\r\n}\r\n".to_string();
    }
    format!("{{\r\n{}\r\n}}\r\n", entries.join(",\r\n"))
}

/// Encode `request` into wire format.
pub fn build(request: &HttpRequest) -> WireRequest {
    let endpoint = request.endpoint();
    let mut text = format!("{} {} HTTP/1.1\r\n", request.method.as_str(), endpoint.path);

    for (key, value) in &request.headers {
        text.push_str(&format!("{key}: {value}\r\n"));
    }
    text.push_str(&format!("Host: {}\r\n", endpoint.host));

    let params = if request.query.is_empty() {
        String::new()
    } else {
        format!("{}\r\n\r\n", form_params(&request.query))
    };
    let body = request.body.as_deref().map(json_block).unwrap_or_default();

    let content_type = if request.body.is_some() {
        "json"
    } else {
        "x-www-form-urlencoded"
    };
    text.push_str(&format!("Content-Type: application/{content_type}\r\n"));
    if !request.query.is_empty() || request.body.is_some() {
        text.push_str(&format!("Content-Length: {}\r\n", params.len() + body.len()));
    }
    text.push_str("\r\n");
    text.push_str(&params);
    text.push_str(&body);
    text.push_str("\r\n");

    WireRequest { text }
}
