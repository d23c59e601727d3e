//! Error types for the payment flow

use std::fmt;

/// Flow step that produced an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Registration,
    RedirectTokenFetch,
    PaymentInitiation,
    TokenExchange,
    PaymentRedirect,
}

impl fmt::Display for Step {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Step::Registration => "registration",
            Step::RedirectTokenFetch => "redirect token fetch",
            Step::PaymentInitiation => "payment initiation",
            Step::TokenExchange => "token exchange",
            Step::PaymentRedirect => "payment redirect",
        };
        f.write_str(name)
    }
}

/// Errors from SDK operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// Upstream answered outside 2xx
    #[error("HTTP {status}: {body}")]
    Request { status: u16, body: String },

    /// Expected token or URL absent from the response
    #[error("missing field in response: {0}")]
    MissingField(String),

    #[error("network error: {0}")]
    Network(String),

    #[error("invalid JSON response: {0}")]
    Decode(String),

    /// Missing required input (empty email, no resolvable redirect token)
    #[error("configuration error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(String),

    /// Auto-registration envelope without a `result`
    #[error("request rejected: {0}")]
    SignupRejected(String),

    #[error("{step} failed: {source}")]
    Step {
        step: Step,
        #[source]
        source: Box<Error>,
    },
}

impl Error {
    /// Wrap this error with the step it happened in.
    pub fn in_step(self, step: Step) -> Self {
        Error::Step {
            step,
            source: Box::new(self),
        }
    }

    /// Underlying error with every `Step` wrapper removed.
    pub fn root(&self) -> &Error {
        match self {
            Error::Step { source, .. } => source.root(),
            other => other,
        }
    }

    /// Outermost step name, if the error was raised by a flow operation.
    pub fn step(&self) -> Option<Step> {
        match self {
            Error::Step { step, .. } => Some(*step),
            _ => None,
        }
    }
}

/// Result alias for SDK operations.
pub type Result<T> = std::result::Result<T, Error>;
