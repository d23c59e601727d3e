//! Field extraction from upstream response envelopes
//!
//! The upstream API does not use one envelope across deployments: a token can
//! arrive top-level, under `data`, or under `result`, with snake_case or
//! camelCase keys. Each accepted shape is one entry in an ordered table; the
//! first path resolving to a non-empty string wins.

use serde_json::Value;

use crate::http::Payload;

/// Path of object keys from the response root to a field.
pub type FieldPath = &'static [&'static str];

/// Accepted locations of an access token (registration and exchange).
pub const ACCESS_TOKEN_FIELDS: &[FieldPath] = &[
    &["access_token"],
    &["accessToken"],
    &["token"],
    &["data", "access_token"],
    &["data", "accessToken"],
    &["data", "token"],
    &["result", "access_token"],
    &["result", "accessToken"],
    &["result", "token"],
];

/// Accepted locations of a redirect token.
///
/// The bare `result` entry covers deployments that answer
/// `{"result": "<token>"}`.
pub const REDIRECT_TOKEN_FIELDS: &[FieldPath] = &[
    &["redirect_token"],
    &["token"],
    &["redirectToken"],
    &["data", "redirect_token"],
    &["data", "token"],
    &["data", "redirectToken"],
    &["result", "redirect_token"],
    &["result", "token"],
    &["result", "redirectToken"],
    &["result"],
];

/// Accepted locations of the payment page URL.
pub const PAYMENT_URL_FIELDS: &[FieldPath] = &[
    &["redirect"],
    &["url"],
    &["result", "redirect"],
    &["result", "url"],
];

/// Walk `path` from `value`, returning the value at the end if every key exists.
pub fn lookup<'a>(value: &'a Value, path: FieldPath) -> Option<&'a Value> {
    path.iter().try_fold(value, |current, key| current.get(key))
}

/// First non-empty string found under any of `paths`, in table order.
pub fn first_string<'a>(value: &'a Value, paths: &[FieldPath]) -> Option<&'a str> {
    paths
        .iter()
        .filter_map(|path| lookup(value, path))
        .filter_map(Value::as_str)
        .find(|s| !s.is_empty())
}

/// Access token from a registration or exchange response.
///
/// Text responses never carry an access token.
pub fn access_token(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Json(value) => first_string(value, ACCESS_TOKEN_FIELDS).map(str::to_owned),
        Payload::Text(_) => None,
    }
}

/// Redirect token from a redirect-token response.
///
/// A plain-text body is the token itself.
pub fn redirect_token(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Json(value) => first_string(value, REDIRECT_TOKEN_FIELDS).map(str::to_owned),
        Payload::Text(text) => {
            let text = text.trim();
            (!text.is_empty()).then(|| text.to_owned())
        }
    }
}

/// Payment page URL from an initiate-payment response.
pub fn payment_url(payload: &Payload) -> Option<String> {
    match payload {
        Payload::Json(value) => first_string(value, PAYMENT_URL_FIELDS).map(str::to_owned),
        Payload::Text(_) => None,
    }
}
