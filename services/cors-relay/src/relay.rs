//! CORS relay logic
//!
//! Takes the target from the `path` query parameter, forwards the method and
//! body with fixed JSON headers, and answers with the first candidate's
//! response plus permissive CORS headers. Relative paths are expanded against
//! the upstream host once per configured scheme; candidates are tried in
//! order and a transport failure moves on to the next one.

use crate::config::Scheme;
use crate::error::RelayError;
use crate::metrics;
use axum::body::Body;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::http::{HeaderMap, HeaderName, HeaderValue, Method, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::{debug, error, instrument, warn};

pub const ALLOW_ORIGIN: &str = "*";
pub const ALLOW_HEADERS: &str = "Content-Type, Authorization";
pub const ALLOW_METHODS: &str = "GET, POST, OPTIONS";

/// Inbound body limit
const MAX_BODY_BYTES: usize = 10 * 1024 * 1024;

/// Shared state passed to the relay handler via axum State extractor
#[derive(Clone)]
pub struct RelayState {
    pub client: reqwest::Client,
    pub upstream_host: String,
    pub schemes: Vec<Scheme>,
    pub fallback_on_error_status: bool,
    pub timeout: Option<Duration>,
    pub requests_total: Arc<AtomicU64>,
    pub errors_total: Arc<AtomicU64>,
}

/// CORS headers attached to every relay response
pub fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        HeaderName::from_static("access-control-allow-origin"),
        HeaderValue::from_static(ALLOW_ORIGIN),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-headers"),
        HeaderValue::from_static(ALLOW_HEADERS),
    );
    headers.insert(
        HeaderName::from_static("access-control-allow-methods"),
        HeaderValue::from_static(ALLOW_METHODS),
    );
    headers
}

fn with_cors(mut response: Response) -> Response {
    response.headers_mut().extend(cors_headers());
    response
}

/// Non-empty `path` query parameter, percent-decoded.
pub fn target_param(uri: &Uri) -> Option<String> {
    let query = uri.query()?;
    url::form_urlencoded::parse(query.as_bytes())
        .find(|(key, _)| key == "path")
        .map(|(_, value)| value.into_owned())
        .filter(|value| !value.is_empty())
}

fn has_http_scheme(target: &str) -> bool {
    let lower = target.get(..8).unwrap_or(target).to_ascii_lowercase();
    lower.starts_with("http://") || lower.starts_with("https://")
}

/// Ordered candidate URLs for a `path` value.
///
/// An absolute http(s) URL is the single candidate, unchanged. Anything else
/// is joined to `upstream_host` once per scheme after dropping one leading
/// slash.
pub fn resolve_targets(
    path: &str,
    upstream_host: &str,
    schemes: &[Scheme],
) -> Result<Vec<String>, RelayError> {
    let candidates = if has_http_scheme(path) {
        vec![path.to_string()]
    } else {
        let relative = path.strip_prefix('/').unwrap_or(path);
        schemes
            .iter()
            .map(|scheme| format!("{}://{upstream_host}/{relative}", scheme.as_str()))
            .collect()
    };

    for candidate in &candidates {
        url::Url::parse(candidate).map_err(|e| RelayError::InvalidTarget {
            target: candidate.clone(),
            reason: e.to_string(),
        })?;
    }
    Ok(candidates)
}

/// Error classification label for the upstream error counter
fn error_type(e: &reqwest::Error) -> &'static str {
    if e.is_timeout() {
        "timeout"
    } else if e.is_connect() {
        "connection"
    } else if e.is_body() || e.is_decode() {
        "body"
    } else {
        "other"
    }
}

/// Relay an inbound request. Never fails: every error becomes a response.
#[instrument(skip_all, fields(request_id = %request_id, method = %request.method()))]
pub async fn relay_request(
    state: &RelayState,
    request: axum::http::Request<Body>,
    request_id: String,
) -> Response {
    let started = Instant::now();
    let method = request.method().clone();
    state.requests_total.fetch_add(1, Ordering::Relaxed);

    let response = match forward(state, request).await {
        Ok(response) => response,
        Err(e) => {
            state.errors_total.fetch_add(1, Ordering::Relaxed);
            match &e {
                RelayError::AllTargetsFailed { .. } => error!(error = %e, "relay failed"),
                _ => debug!(error = %e, "rejected relay request"),
            }
            e.into_response(&request_id)
        }
    };

    let response = with_cors(response);
    metrics::record_request(
        response.status().as_u16(),
        method.as_str(),
        started.elapsed().as_secs_f64(),
    );
    response
}

async fn forward(
    state: &RelayState,
    request: axum::http::Request<Body>,
) -> Result<Response, RelayError> {
    if request.method() == Method::OPTIONS {
        return Ok(StatusCode::NO_CONTENT.into_response());
    }

    let path = target_param(request.uri()).ok_or(RelayError::MissingPath)?;
    let targets = resolve_targets(&path, &state.upstream_host, &state.schemes)?;
    let method = request.method().clone();

    let body = if method == Method::GET {
        None
    } else {
        let bytes = axum::body::to_bytes(request.into_body(), MAX_BODY_BYTES)
            .await
            .map_err(|e| RelayError::InvalidBody(e.to_string()))?;
        Some(bytes)
    };

    let mut last_failure = String::from("no candidate targets");
    for (index, target) in targets.iter().enumerate() {
        if index > 0 {
            metrics::record_scheme_fallback();
            debug!(target = %target, "trying next candidate");
        }
        let is_last = index + 1 == targets.len();

        let mut outbound = state
            .client
            .request(method.clone(), target)
            .header(CONTENT_TYPE, "application/json")
            .header(ACCEPT, "application/json");
        if let Some(body) = &body {
            outbound = outbound.body(body.clone());
        }
        if let Some(timeout) = state.timeout {
            outbound = outbound.timeout(timeout);
        }

        let upstream = match outbound.send().await {
            Ok(upstream) => upstream,
            Err(e) => {
                metrics::record_upstream_error(error_type(&e));
                warn!(target = %target, error = %e, "relay candidate failed");
                last_failure = format!("{target}: {e}");
                continue;
            }
        };

        let status = upstream.status();
        if !status.is_success() && state.fallback_on_error_status && !is_last {
            warn!(target = %target, status = status.as_u16(), "relay candidate returned error status");
            last_failure = format!("{target}: HTTP {}", status.as_u16());
            continue;
        }

        let content_type = upstream
            .headers()
            .get(CONTENT_TYPE)
            .cloned()
            .unwrap_or_else(|| HeaderValue::from_static("application/json"));

        match upstream.bytes().await {
            Ok(bytes) => {
                debug!(target = %target, status = status.as_u16(), "relayed");
                return Ok((status, [(CONTENT_TYPE, content_type)], bytes).into_response());
            }
            Err(e) => {
                metrics::record_upstream_error("body");
                warn!(target = %target, error = %e, "failed to read relay candidate body");
                last_failure = format!("{target}: {e}");
            }
        }
    }

    Err(RelayError::AllTargetsFailed {
        detail: last_failure,
    })
}
