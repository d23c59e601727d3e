//! Payment session: orchestrates the Cherry API call chain
//!
//! A `PaySession` is one checkout. It owns the session tokens, the flow
//! state and a storage collaborator, and exposes each API step as an async
//! method taking `&mut self`. Steps never run concurrently on one session.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::constants::{
    DEFAULT_API_URL, DEFAULT_BASE_URL, DEFAULT_CHECKOUT_PAGE, DEFAULT_STREAM, EXCHANGE_TOKEN_PATH,
    INITIATE_PAYMENT_PATH, REDIRECT_TOKEN_PARAM, REDIRECT_TOKEN_PATH, REGISTER_PATH,
};
use crate::error::{Error, Result, Step};
use crate::extract;
use crate::flow::{FlowEvent, FlowState, transition};
use crate::http::{HttpClient, Payload, RequestOptions, Routing};
use crate::query::PageQuery;
use crate::storage::{KeyValueStore, MemoryStore, StorageKey};
use crate::tokens::{SessionTokens, TokenSnapshot};

/// SDK settings. Every field has a default.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct SdkConfig {
    /// Base URL of the registration endpoint
    pub base_url: String,
    /// Base URL of the token and payment endpoints
    pub api_url: String,
    /// Traffic-source tag sent when registration names none
    pub stream: String,
    pub routing: Routing,
    /// Per-request timeout; `None` waits indefinitely
    pub timeout_secs: Option<u64>,
    /// Page the checkout hand-off navigates to
    pub checkout_page: String,
}

impl Default for SdkConfig {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_BASE_URL.to_string(),
            api_url: DEFAULT_API_URL.to_string(),
            stream: DEFAULT_STREAM.to_string(),
            routing: Routing::Direct,
            timeout_secs: None,
            checkout_page: DEFAULT_CHECKOUT_PAGE.to_string(),
        }
    }
}

impl SdkConfig {
    /// Point both base URLs at one host.
    pub fn with_host(mut self, url: impl Into<String>) -> Self {
        let url = url.into().trim_end_matches('/').to_string();
        self.base_url = url.clone();
        self.api_url = url;
        self
    }

    pub fn with_stream(mut self, stream: impl Into<String>) -> Self {
        self.stream = stream.into();
        self
    }

    pub fn with_routing(mut self, routing: Routing) -> Self {
        self.routing = routing;
        self
    }

    /// Reject settings no request could succeed with.
    pub fn validate(&self) -> Result<()> {
        if self.timeout_secs == Some(0) {
            return Err(Error::Config("timeout_secs must be greater than 0".into()));
        }
        Ok(())
    }

    fn endpoint(base: &str, path: &str) -> String {
        format!("{}{path}", base.trim_end_matches('/'))
    }

    pub fn register_url(&self) -> String {
        Self::endpoint(&self.base_url, REGISTER_PATH)
    }

    pub fn redirect_token_url(&self) -> String {
        Self::endpoint(&self.api_url, REDIRECT_TOKEN_PATH)
    }

    pub fn initiate_payment_url(&self) -> String {
        Self::endpoint(&self.api_url, INITIATE_PAYMENT_PATH)
    }

    pub fn exchange_token_url(&self) -> String {
        Self::endpoint(&self.api_url, EXCHANGE_TOKEN_PATH)
    }
}

/// Result of a successful payment initiation.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInitiation {
    /// Provider page the user must visit to pay
    pub redirect_url: String,
    /// Raw provider response
    pub response: Payload,
}

/// Aggregate outcome of `complete_payment_flow`.
///
/// Serializes as `{success: true, registration, redirectToken, payment,
/// message}` or `{success: false, error, message}`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FlowReport {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub registration: Option<Payload>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub redirect_token: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment: Option<PaymentInitiation>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub message: String,
}

impl FlowReport {
    fn failed(error: &Error) -> Self {
        Self {
            success: false,
            registration: None,
            redirect_token: None,
            payment: None,
            error: Some(error.to_string()),
            message: "Payment flow failed".to_string(),
        }
    }
}

/// Where an exchange took its redirect token from, in priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenSource {
    Argument,
    Session,
    PageUrl,
    Storage,
}

/// One checkout session against the Cherry API.
pub struct PaySession<S: KeyValueStore = MemoryStore> {
    config: SdkConfig,
    http: HttpClient,
    tokens: SessionTokens,
    state: FlowState,
    storage: S,
    page_query: PageQuery,
}

impl PaySession<MemoryStore> {
    /// Session with volatile storage.
    pub fn new(config: SdkConfig) -> Result<Self> {
        Self::with_storage(config, MemoryStore::new())
    }
}

impl<S: KeyValueStore> PaySession<S> {
    pub fn with_storage(config: SdkConfig, storage: S) -> Result<Self> {
        config.validate()?;
        let http = HttpClient::new(reqwest::Client::new(), config.routing.clone())
            .with_timeout(config.timeout_secs.map(Duration::from_secs));
        Ok(Self {
            config,
            http,
            tokens: SessionTokens::default(),
            state: FlowState::Idle,
            storage,
            page_query: PageQuery::default(),
        })
    }

    /// Replace the underlying reqwest client (connection pool, TLS settings).
    pub fn with_http_client(mut self, client: reqwest::Client) -> Self {
        self.http = HttpClient::new(client, self.http.routing().clone())
            .with_timeout(self.config.timeout_secs.map(Duration::from_secs));
        self
    }

    /// Record the URL of the page this session runs on.
    ///
    /// Its query feeds redirect-token resolution, stream selection and the
    /// `proxy`/`no_proxy` routing switches.
    pub fn set_page_url(&mut self, url: &str) {
        self.page_query = PageQuery::from_url(url);
        let routing = Routing::from_query(&self.page_query, self.config.routing.clone());
        debug!(?routing, "page url applied");
        self.http.set_routing(routing);
    }

    pub fn page_query(&self) -> &PageQuery {
        &self.page_query
    }

    pub fn config(&self) -> &SdkConfig {
        &self.config
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn tokens(&self) -> &SessionTokens {
        &self.tokens
    }

    pub(crate) fn tokens_mut(&mut self) -> &mut SessionTokens {
        &mut self.tokens
    }

    pub fn get_tokens(&self) -> TokenSnapshot {
        self.tokens.snapshot()
    }

    pub fn clear_tokens(&mut self) {
        self.tokens.clear();
        self.apply(FlowEvent::Reset);
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    pub fn storage_mut(&mut self) -> &mut S {
        &mut self.storage
    }

    fn apply(&mut self, event: FlowEvent) {
        let from = self.state;
        self.state = transition(from, event);
        if from != self.state {
            info!(from = %from, to = %self.state, ?event, "payment flow state changed");
        }
    }

    /// Register a user. `stream` falls back to the configured tag when
    /// absent or empty.
    ///
    /// Any access token in the response is kept for later authorized calls.
    #[instrument(skip_all, fields(step = %Step::Registration))]
    pub async fn register_user(&mut self, email: &str, stream: Option<&str>) -> Result<Payload> {
        let email = email.trim();
        if email.is_empty() {
            return Err(Error::Config("email is required".into()).in_step(Step::Registration));
        }
        let stream = stream
            .filter(|s| !s.is_empty())
            .unwrap_or(self.config.stream.as_str());

        let response = self
            .http
            .request(
                &self.config.register_url(),
                RequestOptions::post(json!({ "email": email, "stream": stream })),
                None,
            )
            .await
            .map_err(|e| e.in_step(Step::Registration))?;

        if let Some(token) = extract::access_token(&response) {
            self.tokens.set_access_token(token);
            debug!("registration returned an access token");
        }
        self.apply(FlowEvent::Registered);
        Ok(response)
    }

    /// Fetch a redirect token, authorized when an access token is held.
    ///
    /// A 2xx response without a token field yields `Ok(None)`; the session's
    /// redirect token is then cleared.
    #[instrument(skip_all, fields(step = %Step::RedirectTokenFetch))]
    pub async fn get_redirect_token(&mut self) -> Result<Option<String>> {
        let response = self
            .http
            .request(
                &self.config.redirect_token_url(),
                RequestOptions::get().with_auth(),
                self.tokens.access_token(),
            )
            .await
            .map_err(|e| e.in_step(Step::RedirectTokenFetch))?;

        let token = extract::redirect_token(&response);
        self.tokens.set_redirect_token(token.clone());
        match &token {
            Some(_) => self.apply(FlowEvent::RedirectTokenFetched),
            None => warn!("redirect token response carried no token"),
        }
        Ok(token)
    }

    /// Start a payment and return the provider page URL with the raw response.
    #[instrument(skip_all, fields(step = %Step::PaymentInitiation, method_id = %method_id, product_id = %product_id))]
    pub async fn initiate_payment(
        &mut self,
        method_id: &str,
        product_id: &str,
    ) -> Result<PaymentInitiation> {
        let body = json!({ "method_id": method_id, "product_id": product_id });
        let response = self
            .http
            .request(
                &self.config.initiate_payment_url(),
                RequestOptions::post(body).with_auth(),
                self.tokens.access_token(),
            )
            .await
            .map_err(|e| e.in_step(Step::PaymentInitiation))?;

        let redirect_url = extract::payment_url(&response).ok_or_else(|| {
            Error::MissingField("redirect or url".into()).in_step(Step::PaymentInitiation)
        })?;
        self.apply(FlowEvent::PaymentInitiated);
        Ok(PaymentInitiation {
            redirect_url,
            response,
        })
    }

    /// Redirect token to exchange, with where it came from.
    ///
    /// Priority: explicit argument, session token, page URL
    /// `redirect_token`, persisted storage.
    pub fn resolve_redirect_token(&self, explicit: Option<&str>) -> Option<(String, TokenSource)> {
        let non_empty = |s: &&str| !s.is_empty();
        if let Some(token) = explicit.filter(non_empty) {
            return Some((token.to_owned(), TokenSource::Argument));
        }
        if let Some(token) = self.tokens.redirect_token().filter(non_empty) {
            return Some((token.to_owned(), TokenSource::Session));
        }
        if let Some(token) = self.page_query.get(REDIRECT_TOKEN_PARAM) {
            return Some((token.to_owned(), TokenSource::PageUrl));
        }
        self.storage
            .get(StorageKey::RedirectToken)
            .filter(|t| !t.is_empty())
            .map(|token| (token, TokenSource::Storage))
    }

    /// Exchange a redirect token for an access token.
    #[instrument(skip_all, fields(step = %Step::TokenExchange))]
    pub async fn exchange_token(&mut self, redirect_token: Option<&str>) -> Result<Payload> {
        let (token, source) = self.resolve_redirect_token(redirect_token).ok_or_else(|| {
            Error::Config("no redirect token available for exchange".into())
                .in_step(Step::TokenExchange)
        })?;
        debug!(?source, "exchanging redirect token");

        let response = self
            .http
            .request(
                &self.config.exchange_token_url(),
                RequestOptions::post(json!({ "redirect_token": token })),
                None,
            )
            .await
            .map_err(|e| e.in_step(Step::TokenExchange))?;

        if let Some(access) = extract::access_token(&response) {
            self.tokens.set_access_token(access);
        }
        self.apply(FlowEvent::TokenExchanged);
        Ok(response)
    }

    /// Register, fetch a redirect token and initiate payment in one call.
    ///
    /// Never fails: the first error stops the sequence and is reported in
    /// the returned `FlowReport`.
    pub async fn complete_payment_flow(
        &mut self,
        email: &str,
        product_id: &str,
        method_id: &str,
        stream: Option<&str>,
    ) -> FlowReport {
        match self.run_flow(email, product_id, method_id, stream).await {
            Ok(report) => report,
            Err(e) => {
                warn!(error = %e, state = %self.state, "payment flow failed");
                FlowReport::failed(&e)
            }
        }
    }

    async fn run_flow(
        &mut self,
        email: &str,
        product_id: &str,
        method_id: &str,
        stream: Option<&str>,
    ) -> Result<FlowReport> {
        let registration = self.register_user(email, stream).await?;
        let redirect_token = self.get_redirect_token().await?;
        let payment = self.initiate_payment(method_id, product_id).await?;
        Ok(FlowReport {
            success: true,
            registration: Some(registration),
            redirect_token,
            payment: Some(payment),
            error: None,
            message: "Payment flow initiated successfully. User will be redirected after payment completion."
                .to_string(),
        })
    }

    /// Finish the flow on the page the payment provider sent the user back to.
    ///
    /// Only the `redirect_token` in `return_url` is used; there is no
    /// fallback to stored tokens.
    pub async fn handle_payment_redirect(&mut self, return_url: &str) -> Result<Payload> {
        let query = PageQuery::from_url(return_url);
        let token = query.get(REDIRECT_TOKEN_PARAM).ok_or_else(|| {
            Error::Config("no redirect token found in URL".into()).in_step(Step::PaymentRedirect)
        })?;
        let token = token.to_owned();
        self.exchange_token(Some(&token))
            .await
            .map_err(|e| e.in_step(Step::PaymentRedirect))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{MockApi, MockRoute};
    use serde_json::json;

    fn session(api: &MockApi) -> PaySession {
        PaySession::new(SdkConfig::default().with_host(&api.base)).unwrap()
    }

    fn happy_routes() -> Vec<(&'static str, MockRoute)> {
        vec![
            (REGISTER_PATH, MockRoute::json(200, json!({"data": {"access_token": "at_reg"}}))),
            (REDIRECT_TOKEN_PATH, MockRoute::json(200, json!({"redirect_token": "rt_1"}))),
            (
                INITIATE_PAYMENT_PATH,
                MockRoute::json(200, json!({"result": {"redirect": "https://pay.test/s/1"}})),
            ),
            (EXCHANGE_TOKEN_PATH, MockRoute::json(200, json!({"accessToken": "at_exchanged"}))),
        ]
    }

    #[test]
    fn config_defaults_match_api() {
        let config = SdkConfig::default();
        assert_eq!(config.base_url, "https://dev-newcherry.cherryx.ai");
        assert_eq!(config.stream, "xpn_m");
        assert_eq!(
            config.register_url(),
            "https://dev-newcherry.cherryx.ai/api/v1/user"
        );
        assert_eq!(
            config.exchange_token_url(),
            "https://dev-newcherry.cherryx.ai/a-api/exchange-token"
        );
        assert!(config.timeout_secs.is_none());
    }

    #[test]
    fn config_deserializes_with_partial_fields() {
        let config: SdkConfig = serde_json::from_value(json!({
            "api_url": "https://api.test/",
            "routing": {"mode": "relay", "endpoint": "https://relay.test/fn"}
        }))
        .unwrap();
        assert_eq!(config.redirect_token_url(), "https://api.test/a-api/redirect-token");
        assert_eq!(config.base_url, DEFAULT_BASE_URL);
        assert_eq!(
            config.routing,
            Routing::Relay {
                endpoint: "https://relay.test/fn".into()
            }
        );
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let config = SdkConfig {
            timeout_secs: Some(0),
            ..SdkConfig::default()
        };
        assert!(matches!(config.validate(), Err(Error::Config(_))));
        assert!(matches!(PaySession::new(config), Err(Error::Config(_))));

        let config = SdkConfig {
            timeout_secs: Some(5),
            ..SdkConfig::default()
        };
        assert!(config.validate().is_ok());
        assert!(PaySession::new(config).is_ok());
    }

    #[tokio::test]
    async fn register_posts_email_and_default_stream_once() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);

        session.register_user("  user@example.com ", None).await.unwrap();

        let calls = api.calls_to(REGISTER_PATH);
        assert_eq!(calls.len(), 1, "exactly one registration POST");
        assert_eq!(calls[0].method, "POST");
        assert_eq!(calls[0].body, json!({"email": "user@example.com", "stream": "xpn_m"}));
        assert_eq!(api.calls().len(), 1, "no other endpoint is called");
        assert_eq!(session.tokens().access_token().unwrap().as_str(), "at_reg");
        assert_eq!(session.state(), FlowState::Registered);
    }

    #[tokio::test]
    async fn register_uses_explicit_stream() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.register_user("u@x.test", Some("landing_b")).await.unwrap();
        assert_eq!(api.calls_to(REGISTER_PATH)[0].body["stream"], "landing_b");
    }

    #[tokio::test]
    async fn register_without_token_field_leaves_access_token_unset() {
        let api = MockApi::start(vec![(
            REGISTER_PATH,
            MockRoute::json(201, json!({"id": 7, "email": "u@x.test"})),
        )])
        .await;
        let mut session = session(&api);
        session.register_user("u@x.test", None).await.unwrap();
        assert!(session.tokens().access_token().is_none());
        assert_eq!(session.state(), FlowState::Registered);
    }

    #[tokio::test]
    async fn register_rejects_empty_email_without_network() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        let err = session.register_user("   ", None).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::Registration));
        assert!(matches!(err.root(), Error::Config(_)));
        assert!(api.calls().is_empty());
        assert_eq!(session.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn register_http_error_keeps_raw_message() {
        let api = MockApi::start(vec![(REGISTER_PATH, MockRoute::text(422, "invalid email"))]).await;
        let mut session = session(&api);
        let err = session.register_user("u@x.test", None).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::Registration));
        assert!(err.to_string().contains("HTTP 422: invalid email"), "got: {err}");
        assert_eq!(session.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn redirect_token_fetch_sends_bearer_from_registration() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.register_user("u@x.test", None).await.unwrap();

        let token = session.get_redirect_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("rt_1"));
        assert_eq!(session.tokens().redirect_token(), Some("rt_1"));
        assert_eq!(session.state(), FlowState::RedirectTokenObtained);

        let call = &api.calls_to(REDIRECT_TOKEN_PATH)[0];
        assert_eq!(call.method, "GET");
        assert_eq!(call.authorization.as_deref(), Some("Bearer at_reg"));
    }

    #[tokio::test]
    async fn redirect_token_fetch_is_anonymous_without_access_token() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.get_redirect_token().await.unwrap();
        assert!(api.calls_to(REDIRECT_TOKEN_PATH)[0].authorization.is_none());
    }

    #[tokio::test]
    async fn redirect_token_absent_returns_none_without_error() {
        let api = MockApi::start(vec![(
            REDIRECT_TOKEN_PATH,
            MockRoute::json(200, json!({"status": "ok"})),
        )])
        .await;
        let mut session = session(&api);
        assert_eq!(session.get_redirect_token().await.unwrap(), None);
        assert!(session.tokens().redirect_token().is_none());
        assert_eq!(session.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn redirect_token_plain_text_body() {
        let api = MockApi::start(vec![(REDIRECT_TOKEN_PATH, MockRoute::text(200, "rt_text"))]).await;
        let mut session = session(&api);
        assert_eq!(session.get_redirect_token().await.unwrap().as_deref(), Some("rt_text"));
    }

    #[tokio::test]
    async fn redirect_token_http_error_names_step() {
        let api = MockApi::start(vec![(REDIRECT_TOKEN_PATH, MockRoute::text(401, "unauthorized"))]).await;
        let mut session = session(&api);
        let err = session.get_redirect_token().await.unwrap_err();
        assert_eq!(err.step(), Some(Step::RedirectTokenFetch));
        assert!(matches!(err.root(), Error::Request { status: 401, .. }));
    }

    #[tokio::test]
    async fn initiate_payment_returns_url_and_raw_response() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.register_user("u@x.test", None).await.unwrap();

        let payment = session.initiate_payment("185", "38").await.unwrap();
        assert_eq!(payment.redirect_url, "https://pay.test/s/1");
        assert_eq!(
            payment.response,
            Payload::Json(json!({"result": {"redirect": "https://pay.test/s/1"}}))
        );
        let call = &api.calls_to(INITIATE_PAYMENT_PATH)[0];
        assert_eq!(call.body, json!({"method_id": "185", "product_id": "38"}));
        assert_eq!(call.authorization.as_deref(), Some("Bearer at_reg"));
        assert_eq!(session.state(), FlowState::PaymentInitiated);
    }

    #[tokio::test]
    async fn initiate_payment_without_url_is_missing_field() {
        let api = MockApi::start(vec![(
            INITIATE_PAYMENT_PATH,
            MockRoute::json(200, json!({"result": {"status": "created"}, "data": {"url": "ignored"}})),
        )])
        .await;
        let mut session = session(&api);
        let err = session.initiate_payment("1", "1").await.unwrap_err();
        assert_eq!(err.step(), Some(Step::PaymentInitiation));
        assert!(matches!(err.root(), Error::MissingField(_)), "got {err:?}");
        assert_eq!(session.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn initiate_payment_non_2xx_names_step() {
        let api = MockApi::start(vec![(INITIATE_PAYMENT_PATH, MockRoute::text(500, "boom"))]).await;
        let mut session = session(&api);
        let err = session.initiate_payment("1", "1").await.unwrap_err();
        assert_eq!(err.step(), Some(Step::PaymentInitiation));
        assert!(matches!(err.root(), Error::Request { status: 500, .. }));
    }

    #[tokio::test]
    async fn exchange_fails_with_config_error_when_no_token_anywhere() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.set_page_url("https://shop.test/return?status=ok");

        let err = session.exchange_token(None).await.unwrap_err();
        assert_eq!(err.step(), Some(Step::TokenExchange));
        assert!(matches!(err.root(), Error::Config(_)), "got {err:?}");
        assert!(api.calls().is_empty());
    }

    #[tokio::test]
    async fn exchange_resolution_priority() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session
            .storage_mut()
            .set(StorageKey::RedirectToken, "rt_storage".into())
            .await
            .unwrap();
        assert_eq!(
            session.resolve_redirect_token(None),
            Some(("rt_storage".into(), TokenSource::Storage))
        );

        session.set_page_url("https://shop.test/back?redirect_token=rt_url");
        assert_eq!(
            session.resolve_redirect_token(None),
            Some(("rt_url".into(), TokenSource::PageUrl))
        );

        session.get_redirect_token().await.unwrap();
        assert_eq!(
            session.resolve_redirect_token(None),
            Some(("rt_1".into(), TokenSource::Session))
        );

        assert_eq!(
            session.resolve_redirect_token(Some("rt_arg")),
            Some(("rt_arg".into(), TokenSource::Argument))
        );
        assert_eq!(
            session.resolve_redirect_token(Some("")),
            Some(("rt_1".into(), TokenSource::Session)),
            "empty argument falls through"
        );
    }

    #[tokio::test]
    async fn exchange_stores_access_token_and_keeps_redirect_token() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.get_redirect_token().await.unwrap();

        session.exchange_token(None).await.unwrap();

        let call = &api.calls_to(EXCHANGE_TOKEN_PATH)[0];
        assert_eq!(call.body, json!({"redirect_token": "rt_1"}));
        assert!(call.authorization.is_none());
        assert_eq!(session.tokens().access_token().unwrap().as_str(), "at_exchanged");
        assert_eq!(session.tokens().redirect_token(), Some("rt_1"));
        assert_eq!(session.state(), FlowState::Exchanged);
    }

    #[tokio::test]
    async fn complete_flow_success_report() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);

        let report = session
            .complete_payment_flow("u@x.test", "2", "1", Some("my_landing"))
            .await;
        assert!(report.success, "report: {report:?}");
        assert_eq!(report.redirect_token.as_deref(), Some("rt_1"));
        assert_eq!(report.payment.as_ref().unwrap().redirect_url, "https://pay.test/s/1");
        assert_eq!(session.state(), FlowState::PaymentInitiated);

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], true);
        assert_eq!(json["redirectToken"], "rt_1");
        assert_eq!(json["payment"]["redirectUrl"], "https://pay.test/s/1");
        assert!(json.get("error").is_none());
    }

    #[tokio::test]
    async fn complete_flow_stops_after_registration_failure() {
        let mut routes = happy_routes();
        routes[0] = (REGISTER_PATH, MockRoute::text(500, "db down"));
        let api = MockApi::start(routes).await;
        let mut session = session(&api);

        let report = session.complete_payment_flow("u@x.test", "1", "1", None).await;
        assert!(!report.success);
        assert_eq!(report.message, "Payment flow failed");
        assert!(report.error.as_deref().unwrap().contains("db down"));
        assert!(api.calls_to(REDIRECT_TOKEN_PATH).is_empty());
        assert!(api.calls_to(INITIATE_PAYMENT_PATH).is_empty());

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["success"], false);
        assert!(json.get("payment").is_none());
        assert!(json["error"].is_string());
    }

    #[tokio::test]
    async fn handle_redirect_exchanges_url_token() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session
            .handle_payment_redirect("https://shop.test/done?redirect_token=rt_back")
            .await
            .unwrap();
        assert_eq!(
            api.calls_to(EXCHANGE_TOKEN_PATH)[0].body,
            json!({"redirect_token": "rt_back"})
        );
        assert_eq!(session.state(), FlowState::Exchanged);
    }

    #[tokio::test]
    async fn handle_redirect_ignores_stored_token() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.get_redirect_token().await.unwrap();

        let err = session
            .handle_payment_redirect("https://shop.test/done?status=ok")
            .await
            .unwrap_err();
        assert_eq!(err.step(), Some(Step::PaymentRedirect));
        assert!(matches!(err.root(), Error::Config(_)));
        assert!(api.calls_to(EXCHANGE_TOKEN_PATH).is_empty());
    }

    #[tokio::test]
    async fn clear_tokens_resets_state() {
        let api = MockApi::start(happy_routes()).await;
        let mut session = session(&api);
        session.register_user("u@x.test", None).await.unwrap();
        session.get_redirect_token().await.unwrap();

        session.clear_tokens();
        let snapshot = session.get_tokens();
        assert!(snapshot.redirect_token.is_none());
        assert!(snapshot.access_token.is_none());
        assert_eq!(session.state(), FlowState::Idle);
    }

    #[tokio::test]
    async fn page_proxy_param_routes_through_relay() {
        let api = MockApi::start(vec![(
            "/relay",
            MockRoute::json(200, json!({"redirect_token": "rt_relayed"})),
        )])
        .await;
        let mut session = PaySession::new(SdkConfig::default()).unwrap();
        session.set_page_url(&format!("https://shop.test/?proxy={}/relay", api.base));

        let token = session.get_redirect_token().await.unwrap();
        assert_eq!(token.as_deref(), Some("rt_relayed"));
        assert_eq!(api.calls_to("/relay").len(), 1);
    }
}
