//! Cherry Pay client SDK
//!
//! Client for the Cherry payment API. The checkout flow is a strict sequence
//! of calls, each one feeding the next:
//! 1. `PaySession::register_user()` creates the account (may yield an access token)
//! 2. `PaySession::get_redirect_token()` obtains the short-lived redirect token
//! 3. `PaySession::initiate_payment()` returns the provider's payment page URL
//! 4. After the user returns, `PaySession::exchange_token()` trades the
//!    redirect token for an access token
//!
//! A `PaySession` owns its tokens for the lifetime of one checkout. Steps
//! take `&mut self`, so they cannot interleave. Progress is tracked by the
//! pure state machine in [`flow`].
//!
//! [`checkout`] layers the persisted-storage hand-off (checkout page URL,
//! resume from storage) on top of the session, and [`autoreg`] speaks the
//! alternate auto-registration endpoints.

pub mod autoreg;
pub mod catalog;
pub mod checkout;
pub mod completion;
pub mod constants;
pub mod error;
pub mod extract;
pub mod flow;
pub mod http;
pub mod query;
pub mod session;
pub mod storage;
pub mod tokens;

#[cfg(test)]
mod testing;

pub use autoreg::{AutoRegConfig, AutoRegistration};
pub use catalog::Product;
pub use checkout::CheckoutRequest;
pub use completion::{CompletionProbe, CompletionSignal, PollConfig, PollOutcome, Probe, wait_for_completion};
pub use error::{Error, Result, Step};
pub use flow::{FlowEvent, FlowState};
pub use http::{HttpClient, Payload, RequestOptions, Routing};
pub use query::PageQuery;
pub use session::{FlowReport, PaySession, PaymentInitiation, SdkConfig};
pub use storage::{FileStore, KeyValueStore, MemoryStore, StorageKey};
pub use tokens::{SessionTokens, TokenSnapshot};
