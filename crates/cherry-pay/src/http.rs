//! HTTP client for the Cherry API
//!
//! Every call sends `Content-Type: application/json`. The bearer header is
//! attached only when the caller asks for auth and a token is present. Bodies
//! come back as JSON when the upstream says so, otherwise as raw text.

use std::time::Duration;

use common::Secret;
use reqwest::Method;
use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap, HeaderName, HeaderValue};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::query::PageQuery;

/// Normalized response body.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum Payload {
    Json(Value),
    Text(String),
}

impl Payload {
    pub fn as_json(&self) -> Option<&Value> {
        match self {
            Payload::Json(value) => Some(value),
            Payload::Text(_) => None,
        }
    }

    /// Payload as a JSON value; text becomes a JSON string.
    pub fn to_value(&self) -> Value {
        match self {
            Payload::Json(value) => value.clone(),
            Payload::Text(text) => Value::String(text.clone()),
        }
    }
}

/// How requests reach the upstream API.
///
/// `Relay` wraps every target as `<endpoint>?path=<target>` so a browser-like
/// caller can go through the CORS relay.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(tag = "mode", rename_all = "snake_case")]
pub enum Routing {
    #[default]
    Direct,
    Relay {
        endpoint: String,
    },
}

impl Routing {
    /// Final URL a request for `target` is sent to.
    pub fn resolve(&self, target: &str) -> Result<String> {
        match self {
            Routing::Direct => Ok(target.to_owned()),
            Routing::Relay { endpoint } => url::Url::parse_with_params(endpoint, &[("path", target)])
                .map(String::from)
                .map_err(|e| Error::Config(format!("invalid relay endpoint {endpoint}: {e}"))),
        }
    }

    /// Routing selected by page parameters: `no_proxy` forces direct calls,
    /// `proxy=<endpoint>` selects a relay, otherwise `fallback` applies.
    pub fn from_query(query: &PageQuery, fallback: Routing) -> Routing {
        if query.contains("no_proxy") {
            return Routing::Direct;
        }
        match query.get("proxy") {
            Some(endpoint) => Routing::Relay {
                endpoint: endpoint.to_owned(),
            },
            None => fallback,
        }
    }
}

/// Per-request options.
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub body: Option<Value>,
    pub use_auth: bool,
    pub headers: Vec<(String, String)>,
}

impl RequestOptions {
    pub fn get() -> Self {
        Self {
            method: Method::GET,
            body: None,
            use_auth: false,
            headers: Vec::new(),
        }
    }

    pub fn post(body: Value) -> Self {
        Self {
            method: Method::POST,
            body: Some(body),
            use_auth: false,
            headers: Vec::new(),
        }
    }

    pub fn with_auth(mut self) -> Self {
        self.use_auth = true;
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
}

/// Thin wrapper over `reqwest::Client` that owns routing and timeout policy.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
    routing: Routing,
    timeout: Option<Duration>,
}

impl HttpClient {
    pub fn new(client: reqwest::Client, routing: Routing) -> Self {
        Self {
            client,
            routing,
            timeout: None,
        }
    }

    /// Apply a per-request timeout. Without one a hung call waits indefinitely.
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn routing(&self) -> &Routing {
        &self.routing
    }

    pub fn set_routing(&mut self, routing: Routing) {
        self.routing = routing;
    }

    /// Issue one request and normalize the response.
    ///
    /// `access_token` is only consulted when `options.use_auth` is set.
    pub async fn request(
        &self,
        url: &str,
        options: RequestOptions,
        access_token: Option<&Secret<String>>,
    ) -> Result<Payload> {
        let target = self.routing.resolve(url)?;
        let headers = build_headers(&options, access_token)?;
        debug!(method = %options.method, url = %target, auth = headers.contains_key(AUTHORIZATION), "sending request");

        let mut request = self
            .client
            .request(options.method.clone(), &target)
            .headers(headers);
        if let Some(body) = &options.body {
            request = request.json(body);
        }
        if let Some(timeout) = self.timeout {
            request = request.timeout(timeout);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::Network(format!("{} {target}: {e}", options.method)))?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| String::from("<no body>"));
            debug!(status = status.as_u16(), url = %target, "upstream returned error status");
            return Err(Error::Request {
                status: status.as_u16(),
                body,
            });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|ct| ct.contains("application/json"));

        if is_json {
            response
                .json::<Value>()
                .await
                .map(Payload::Json)
                .map_err(|e| Error::Decode(format!("{target}: {e}")))
        } else {
            response
                .text()
                .await
                .map(Payload::Text)
                .map_err(|e| Error::Network(format!("reading body from {target}: {e}")))
        }
    }
}

fn build_headers(
    options: &RequestOptions,
    access_token: Option<&Secret<String>>,
) -> Result<HeaderMap> {
    let mut headers = HeaderMap::new();
    headers.insert(CONTENT_TYPE, HeaderValue::from_static("application/json"));

    let bearer = access_token.filter(|t| options.use_auth && !t.as_str().is_empty());
    if let Some(token) = bearer {
        let value = HeaderValue::from_str(&format!("Bearer {}", token.as_str()))
            .map_err(|_| Error::Config("access token is not a valid header value".into()))?;
        headers.insert(AUTHORIZATION, value);
    }

    for (name, value) in &options.headers {
        let name = match HeaderName::from_bytes(name.as_bytes()) {
            Ok(n) => n,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header name");
                continue;
            }
        };
        let value = match HeaderValue::from_str(value) {
            Ok(v) => v,
            Err(e) => {
                warn!(header = %name, error = %e, "skipping invalid header value");
                continue;
            }
        };
        headers.insert(name, value);
    }

    Ok(headers)
}
