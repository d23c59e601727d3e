//! Auto-registration funnel
//!
//! A second registration path against the app host: sign the visitor up
//! with their landing-page UTM parameters, buy a fixed product with the
//! signup token, then send them to the redirect host with their
//! registration code once the payment completes.
//!
//! Every response is an envelope whose `result` must be truthy; anything
//! else is a rejection carrying the server's `error` message.

use common::Secret;
use serde::Deserialize;
use serde_json::{Value, json};
use tracing::{info, instrument, warn};

use crate::constants::{
    AUTOREG_API_HOST, AUTOREG_DEFAULT_METHOD_ID, AUTOREG_DEFAULT_PRODUCT_ID, AUTOREG_PURCHASE_PATH,
    AUTOREG_REDIRECT_HOST, AUTOREG_SIGNUP_PATH,
};
use crate::error::{Error, Result, Step};
use crate::extract;
use crate::http::{HttpClient, Payload, RequestOptions, Routing};
use crate::query::PageQuery;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AutoRegConfig {
    pub api_host: String,
    pub redirect_host: String,
    pub product_id: u64,
    pub method_id: u64,
}

impl Default for AutoRegConfig {
    fn default() -> Self {
        Self {
            api_host: AUTOREG_API_HOST.to_string(),
            redirect_host: AUTOREG_REDIRECT_HOST.to_string(),
            product_id: AUTOREG_DEFAULT_PRODUCT_ID,
            method_id: AUTOREG_DEFAULT_METHOD_ID,
        }
    }
}

/// Accepted signup envelope.
#[derive(Debug, Clone)]
pub struct Signup {
    pub response: Value,
}

impl Signup {
    /// Bearer token for the purchase call
    pub fn token(&self) -> Option<&str> {
        extract::lookup(&self.response, &["result", "token"]).and_then(Value::as_str)
    }

    /// Registration code handed to the redirect host
    pub fn code(&self) -> Option<String> {
        match extract::lookup(&self.response, &["result", "code"])? {
            Value::String(s) if !s.is_empty() => Some(s.clone()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }
}

/// Accepted purchase envelope and the payment page it points to.
#[derive(Debug, Clone)]
pub struct Purchase {
    pub redirect_url: String,
    pub response: Value,
}

/// JavaScript-style truthiness of `result`.
fn is_truthy(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => false,
        Some(Value::Bool(b)) => *b,
        Some(Value::Number(n)) => n.as_f64().is_some_and(|f| f != 0.0),
        Some(Value::String(s)) => !s.is_empty(),
        Some(Value::Array(_)) | Some(Value::Object(_)) => true,
    }
}

/// Accept an envelope or turn it into `SignupRejected`.
fn accept(payload: Payload) -> Result<Value> {
    let value = match payload {
        Payload::Json(value) => value,
        Payload::Text(text) => {
            return Err(Error::SignupRejected(format!("non-JSON response: {}", text.trim())));
        }
    };
    if is_truthy(value.get("result")) {
        return Ok(value);
    }
    let message = value
        .get("error")
        .or_else(|| value.get("message"))
        .and_then(|v| match v {
            Value::String(s) => Some(s.clone()),
            Value::Null => None,
            other => Some(other.to_string()),
        })
        .unwrap_or_else(|| String::from("no result in response"));
    Err(Error::SignupRejected(message))
}

/// Judge the envelope whatever the HTTP status: error statuses still carry
/// a JSON envelope with the server's `error` message.
fn envelope(response: Result<Payload>) -> Result<Value> {
    match response {
        Ok(payload) => accept(payload),
        Err(Error::Request { status, body }) => match serde_json::from_str::<Value>(&body) {
            Ok(value @ Value::Object(_)) => accept(Payload::Json(value)),
            _ => Err(Error::Request { status, body }),
        },
        Err(e) => Err(e),
    }
}

pub struct AutoRegistration {
    config: AutoRegConfig,
    http: HttpClient,
}

impl AutoRegistration {
    pub fn new(config: AutoRegConfig) -> Self {
        Self {
            config,
            http: HttpClient::new(reqwest::Client::new(), Routing::Direct),
        }
    }

    pub fn with_http_client(mut self, http: HttpClient) -> Self {
        self.http = http;
        self
    }

    pub fn config(&self) -> &AutoRegConfig {
        &self.config
    }

    /// Sign up `email`; every page query parameter travels as `utm`.
    #[instrument(skip_all, fields(step = %Step::Registration))]
    pub async fn signup(&self, email: &str, page_query: &PageQuery) -> Result<Signup> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::Config("email is required".into()).in_step(Step::Registration));
        }
        let url = format!("{}{AUTOREG_SIGNUP_PATH}", self.config.api_host);
        let body = json!({ "email": email, "utm": page_query.to_json_object() });

        let response = envelope(self.http.request(&url, RequestOptions::post(body), None).await)
            .map_err(|e| {
                warn!(error = %e, "auto-registration signup failed");
                e.in_step(Step::Registration)
            })?;

        let signup = Signup { response };
        info!(has_token = signup.token().is_some(), "auto-registration signup accepted");
        Ok(signup)
    }

    /// Purchase the configured product with the signup token.
    #[instrument(skip_all, fields(step = %Step::PaymentInitiation, method_id))]
    pub async fn purchase(&self, signup: &Signup, method_id: Option<u64>, return_url: &str) -> Result<Purchase> {
        let method_id = method_id.unwrap_or(self.config.method_id);
        tracing::Span::current().record("method_id", method_id);

        let url = format!(
            "{}{AUTOREG_PURCHASE_PATH}/{}",
            self.config.api_host, self.config.product_id
        );
        let token = signup
            .token()
            .filter(|t| !t.is_empty())
            .map(Secret::<String>::from)
            .ok_or_else(|| {
                Error::MissingField("result.token".into()).in_step(Step::PaymentInitiation)
            })?;
        let options =
            RequestOptions::post(json!({ "method": method_id, "returnUrl": return_url })).with_auth();

        let response = envelope(self.http.request(&url, options, Some(&token)).await)
            .map_err(|e| e.in_step(Step::PaymentInitiation))?;

        let redirect_url = extract::lookup(&response, &["result", "redirect"])
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .map(str::to_owned)
            .ok_or_else(|| {
                Error::MissingField("result.redirect".into()).in_step(Step::PaymentInitiation)
            })?;

        info!(product_id = self.config.product_id, "auto-registration purchase created");
        Ok(Purchase {
            redirect_url,
            response,
        })
    }

    /// Destination after completion: the redirect host carrying the page
    /// query, with `reg_code` set from the signup when it has one.
    pub fn completion_redirect(&self, signup: &Signup, page_query: &PageQuery) -> String {
        let mut query = page_query.clone();
        if let Some(code) = signup.code() {
            query.set("reg_code", code);
        }
        let host = self.config.redirect_host.trim_end_matches('/');
        format!("{host}/?{}", query.to_query_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockApi, MockRoute};

    fn client(api: &MockApi) -> AutoRegistration {
        AutoRegistration::new(AutoRegConfig {
            api_host: api.base.clone(),
            ..AutoRegConfig::default()
        })
    }

    fn signup_ok() -> MockRoute {
        MockRoute::json(200, json!({"result": {"token": "tok_1", "code": "RC42"}}))
    }

    #[test]
    fn truthiness_follows_javascript() {
        assert!(!is_truthy(None));
        assert!(!is_truthy(Some(&json!(null))));
        assert!(!is_truthy(Some(&json!(false))));
        assert!(!is_truthy(Some(&json!(0))));
        assert!(!is_truthy(Some(&json!(""))));
        assert!(is_truthy(Some(&json!({}))));
        assert!(is_truthy(Some(&json!([]))));
        assert!(is_truthy(Some(&json!("x"))));
        assert!(is_truthy(Some(&json!(1))));
    }

    #[test]
    fn defaults_match_funnel_constants() {
        let config = AutoRegConfig::default();
        assert_eq!(config.api_host, "https://app.cherryx.ai");
        assert_eq!(config.redirect_host, "https://cherryx.ai");
        assert_eq!(config.product_id, 38);
        assert_eq!(config.method_id, 185);
    }

    #[tokio::test]
    async fn signup_posts_email_and_utm() {
        let api = MockApi::start(vec![("/users/register/auto", signup_ok())]).await;
        let query = PageQuery::parse("utm_source=fb&esub=x1");

        let signup = client(&api).signup("  a@b.c ", &query).await.unwrap();
        assert_eq!(signup.token(), Some("tok_1"));
        assert_eq!(signup.code().as_deref(), Some("RC42"));

        let calls = api.calls_to("/users/register/auto");
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].method, "POST");
        assert_eq!(
            calls[0].body,
            json!({"email": "a@b.c", "utm": {"utm_source": "fb", "esub": "x1"}})
        );
    }

    #[tokio::test]
    async fn signup_without_result_is_rejected_with_server_message() {
        let api = MockApi::start(vec![(
            "/users/register/auto",
            MockRoute::json(200, json!({"result": null, "error": "email taken"})),
        )])
        .await;

        let err = client(&api).signup("a@b.c", &PageQuery::default()).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::Registration));
        assert!(matches!(err.root(), Error::SignupRejected(m) if m == "email taken"));
    }

    #[tokio::test]
    async fn rejection_with_error_status_still_yields_server_message() {
        let api = MockApi::start(vec![(
            "/users/register/auto",
            MockRoute::json(422, json!({"result": null, "error": "email taken"})),
        )])
        .await;

        let err = client(&api).signup("a@b.c", &PageQuery::default()).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::Registration));
        assert!(matches!(err.root(), Error::SignupRejected(m) if m == "email taken"));
    }

    #[tokio::test]
    async fn error_status_without_json_envelope_stays_a_request_error() {
        let api = MockApi::start(vec![(
            "/users/register/auto",
            MockRoute::text(502, "bad gateway"),
        )])
        .await;

        let err = client(&api).signup("a@b.c", &PageQuery::default()).await.unwrap_err();
        assert!(matches!(err.root(), Error::Request { status: 502, .. }));
    }

    #[tokio::test]
    async fn purchase_without_signup_token_fails_before_sending() {
        let api = MockApi::start(vec![(
            "/subscriptions/purchase/38",
            MockRoute::json(200, json!({"result": {"redirect": "https://pay.test/p/1"}})),
        )])
        .await;
        let signup = Signup {
            response: json!({"result": {"code": "RC1"}}),
        };

        let err = client(&api).purchase(&signup, None, "https://r").await.unwrap_err();
        assert_eq!(err.step(), Some(Step::PaymentInitiation));
        assert!(matches!(err.root(), Error::MissingField(f) if f == "result.token"));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn empty_email_never_reaches_the_network() {
        let api = MockApi::start(vec![("/users/register/auto", signup_ok())]).await;
        let err = client(&api).signup("   ", &PageQuery::default()).await.unwrap_err();
        assert!(matches!(err.root(), Error::Config(_)));
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn purchase_uses_signup_token_and_product_path() {
        let api = MockApi::start(vec![
            ("/users/register/auto", signup_ok()),
            (
                "/subscriptions/purchase/38",
                MockRoute::json(200, json!({"result": {"redirect": "https://pay.test/p/1"}})),
            ),
        ])
        .await;
        let reg = client(&api);
        let signup = reg.signup("a@b.c", &PageQuery::default()).await.unwrap();

        let purchase = reg
            .purchase(&signup, None, "https://land.test/page?x=1")
            .await
            .unwrap();
        assert_eq!(purchase.redirect_url, "https://pay.test/p/1");

        let calls = api.calls_to("/subscriptions/purchase/38");
        assert_eq!(calls[0].authorization.as_deref(), Some("Bearer tok_1"));
        assert_eq!(
            calls[0].body,
            json!({"method": 185, "returnUrl": "https://land.test/page?x=1"})
        );
    }

    #[tokio::test]
    async fn purchase_without_redirect_is_missing_field() {
        let api = MockApi::start(vec![(
            "/subscriptions/purchase/38",
            MockRoute::json(200, json!({"result": {"status": "created"}})),
        )])
        .await;
        let signup = Signup {
            response: json!({"result": {"token": "tok_1"}}),
        };

        let err = client(&api).purchase(&signup, Some(7), "https://r").await.unwrap_err();
        assert_eq!(err.step(), Some(Step::PaymentInitiation));
        assert!(matches!(err.root(), Error::MissingField(_)));
        assert_eq!(api.calls()[0].body["method"], json!(7));
    }

    #[tokio::test]
    async fn purchase_rejection_surfaces_error() {
        let api = MockApi::start(vec![(
            "/subscriptions/purchase/38",
            MockRoute::json(200, json!({"result": false, "error": "card declined"})),
        )])
        .await;
        let signup = Signup {
            response: json!({"result": {"token": "tok_1"}}),
        };

        let err = client(&api).purchase(&signup, None, "https://r").await.unwrap_err();
        assert!(matches!(err.root(), Error::SignupRejected(m) if m == "card declined"));
    }

    #[test]
    fn completion_redirect_sets_reg_code_and_keeps_params() {
        let reg = AutoRegistration::new(AutoRegConfig::default());
        let signup = Signup {
            response: json!({"result": {"token": "t", "code": 991}}),
        };
        let query = PageQuery::parse("utm_source=fb&reg_code=old");
        assert_eq!(
            reg.completion_redirect(&signup, &query),
            "https://cherryx.ai/?utm_source=fb&reg_code=991"
        );
    }

    #[test]
    fn completion_redirect_without_code_keeps_query_untouched() {
        let reg = AutoRegistration::new(AutoRegConfig::default());
        let signup = Signup {
            response: json!({"result": {"token": "t"}}),
        };
        assert_eq!(
            reg.completion_redirect(&signup, &PageQuery::parse("a=1")),
            "https://cherryx.ai/?a=1"
        );
    }
}
