//! Checkout hand-off across page loads
//!
//! The landing page registers the user and fetches a redirect token, then
//! hands off to the checkout page through its query string and the
//! persisted storage. The checkout page starts the payment from whatever it
//! finds there. Storage write failures are logged and never fail the flow.

use serde_json::{Value, json};
use tracing::{info, warn};

use crate::constants::{DEFAULT_CHECKOUT_ID, REDIRECT_TOKEN_PARAM};
use crate::error::{Error, Result, Step};
use crate::extract;
use crate::http::Payload;
use crate::query::PageQuery;
use crate::session::PaySession;
use crate::storage::{KeyValueStore, StorageKey};

/// Landing page form submission.
#[derive(Debug, Clone, Default)]
pub struct CheckoutRequest {
    pub email: String,
    pub product_id: Option<String>,
    pub method_id: Option<String>,
}

async fn persist<S: KeyValueStore>(store: &mut S, key: StorageKey, value: String) {
    if let Err(e) = store.set(key, value).await {
        warn!(key = key.as_str(), error = %e, "failed to persist checkout value");
    }
}

fn or_default(value: Option<&str>) -> String {
    value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .unwrap_or(DEFAULT_CHECKOUT_ID)
        .to_string()
}

impl<S: KeyValueStore> PaySession<S> {
    /// Stream for this page: the `stream` parameter, else the configured tag.
    pub fn page_stream(&self) -> String {
        self.page_query()
            .get("stream")
            .map(str::to_owned)
            .unwrap_or_else(|| self.config().stream.clone())
    }

    /// Register, fetch a redirect token and build the checkout page URL.
    ///
    /// The returned URL carries `product_id`, `method_id`, `email`, `stream`
    /// and `redirect_token`, plus every other current page parameter.
    pub async fn prepare_checkout(&mut self, request: CheckoutRequest) -> Result<String> {
        let email = request.email.trim().to_string();
        let product_id = or_default(request.product_id.as_deref());
        let method_id = or_default(request.method_id.as_deref());
        let stream = self.page_stream();

        let store = self.storage_mut();
        persist(store, StorageKey::Email, email.clone()).await;
        persist(store, StorageKey::ProductId, product_id.clone()).await;
        persist(store, StorageKey::MethodId, method_id.clone()).await;
        persist(store, StorageKey::Stream, stream.clone()).await;

        self.register_user(&email, Some(&stream)).await?;
        if let Some(token) = self.tokens().access_token().map(|t| t.as_str().to_owned()) {
            persist(self.storage_mut(), StorageKey::AccessToken, token).await;
        }

        let redirect_token = self.get_redirect_token().await?.ok_or_else(|| {
            Error::MissingField(REDIRECT_TOKEN_PARAM.into()).in_step(Step::RedirectTokenFetch)
        })?;
        persist(self.storage_mut(), StorageKey::RedirectToken, redirect_token.clone()).await;

        let mut next = PageQuery::default();
        next.set("product_id", product_id);
        next.set("method_id", method_id);
        next.set("email", email);
        next.set("stream", stream);
        next.set(REDIRECT_TOKEN_PARAM, redirect_token);
        for (key, value) in self.page_query().iter() {
            if !next.contains(key) {
                next.set(key, value);
            }
        }

        let url = format!("{}?{}", self.config().checkout_page, next.to_query_string());
        info!(page = %self.config().checkout_page, "checkout prepared");
        Ok(url)
    }

    /// Start the payment on the checkout page and return the provider URL.
    ///
    /// Product and method come from the page query, then storage, then `"1"`.
    pub async fn start_checkout(&mut self) -> Result<String> {
        let product_id = self
            .page_query()
            .get("product_id")
            .map(str::to_owned)
            .or_else(|| self.storage().get(StorageKey::ProductId))
            .unwrap_or_else(|| DEFAULT_CHECKOUT_ID.to_string());
        let method_id = self
            .page_query()
            .get("method_id")
            .map(str::to_owned)
            .or_else(|| self.storage().get(StorageKey::MethodId))
            .unwrap_or_else(|| DEFAULT_CHECKOUT_ID.to_string());

        let payment = self.initiate_payment(&method_id, &product_id).await?;

        let record = json!({
            "payload": { "method_id": method_id, "product_id": product_id },
            "response": payment.response,
        });
        persist(self.storage_mut(), StorageKey::LastInitiate, record.to_string()).await;
        Ok(payment.redirect_url)
    }

    /// Exchange a redirect token and persist the whole exchange response.
    ///
    /// Token resolution is the same as `exchange_token`.
    pub async fn exchange_redirect_token(&mut self, token: Option<&str>) -> Result<Payload> {
        let response = self.exchange_token(token).await?;
        persist(
            self.storage_mut(),
            StorageKey::AccessToken,
            response.to_value().to_string(),
        )
        .await;
        Ok(response)
    }

    /// Restore the access token persisted by an earlier page.
    ///
    /// The stored value is either the bare token or a JSON exchange response;
    /// both forms are accepted. Returns whether a token was restored.
    pub fn restore_access_token(&mut self) -> bool {
        let Some(raw) = self.storage().get(StorageKey::AccessToken) else {
            return false;
        };
        let token = match serde_json::from_str::<Value>(&raw) {
            Ok(value @ Value::Object(_)) => extract::access_token(&Payload::Json(value)),
            Ok(Value::String(token)) => Some(token),
            _ => Some(raw.trim().to_string()),
        };
        match token.filter(|t| !t.is_empty()) {
            Some(token) => {
                self.tokens_mut().set_access_token(token);
                true
            }
            None => false,
        }
    }
}
