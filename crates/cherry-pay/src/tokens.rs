//! In-memory session tokens
//!
//! `access_token` is set only from a successful register or exchange call
//! that yielded a token field. `redirect_token` is set only from a successful
//! redirect-token fetch; exchange reads it but does not clear it.

use common::Secret;

/// Tokens owned by one checkout session.
#[derive(Debug, Default, Clone)]
pub struct SessionTokens {
    redirect_token: Option<String>,
    access_token: Option<Secret<String>>,
}

/// Point-in-time copy of both tokens.
#[derive(Debug, Clone, PartialEq)]
pub struct TokenSnapshot {
    pub redirect_token: Option<String>,
    pub access_token: Option<Secret<String>>,
}

impl SessionTokens {
    pub fn redirect_token(&self) -> Option<&str> {
        self.redirect_token.as_deref()
    }

    pub fn access_token(&self) -> Option<&Secret<String>> {
        self.access_token.as_ref()
    }

    /// Replace the redirect token; `None` records a fetch that found no token.
    pub fn set_redirect_token(&mut self, token: Option<String>) {
        self.redirect_token = token.filter(|t| !t.is_empty());
    }

    /// Empty tokens are ignored so a blank field never clears a good token.
    pub fn set_access_token(&mut self, token: impl Into<String>) {
        let token = token.into();
        if !token.is_empty() {
            self.access_token = Some(Secret::new(token));
        }
    }

    pub fn snapshot(&self) -> TokenSnapshot {
        TokenSnapshot {
            redirect_token: self.redirect_token.clone(),
            access_token: self.access_token.clone(),
        }
    }

    pub fn clear(&mut self) {
        self.redirect_token = None;
        self.access_token = None;
    }
}
