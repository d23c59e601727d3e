//! Payment completion detection
//!
//! The provider may report back either by sending the user to a return URL
//! carrying a status parameter, or by landing its embedded frame on our own
//! origin. The latter is observed through a capability probe that is blocked
//! while the frame is still cross-origin, polled on a fixed tick until a
//! deadline.

use std::time::Duration;

use serde_json::{Value, json};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::query::PageQuery;

/// Status values (uppercased) that mean the payment went through
pub const SUCCESS_STATUSES: [&str; 5] = ["SUCCESS", "APPROVED", "PAID", "COMPLETED", "OK"];

/// Give up on completion detection after this long
pub const POLL_TIMEOUT: Duration = Duration::from_secs(120);

pub const POLL_TICK: Duration = Duration::from_millis(500);

/// Evidence of a completed payment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletionSignal {
    pub transaction_id: Option<String>,
}

impl CompletionSignal {
    /// Message an embedded return page posts to its parent.
    pub fn to_message(&self) -> Value {
        json!({
            "type": "payment-complete",
            "id": self.transaction_id.clone().unwrap_or_default(),
        })
    }
}

/// Classify a return page query.
///
/// Successful when `status`, `result` or `state` (first present) is one of
/// [`SUCCESS_STATUSES`] ignoring case, or `success` is `true`.
pub fn completion_signal(query: &PageQuery) -> Option<CompletionSignal> {
    let status = query
        .get("status")
        .or_else(|| query.get("result"))
        .or_else(|| query.get("state"))
        .map(str::to_uppercase)
        .unwrap_or_default();
    let success_flag = query
        .get("success")
        .is_some_and(|v| v.eq_ignore_ascii_case("true"));

    if !(SUCCESS_STATUSES.contains(&status.as_str()) || success_flag) {
        return None;
    }
    Some(CompletionSignal {
        transaction_id: query
            .get("id")
            .or_else(|| query.get("transaction_id"))
            .map(str::to_owned),
    })
}

/// One probe observation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Probe {
    Success(CompletionSignal),
    /// Location not readable yet (still on the provider's origin)
    Blocked,
    /// Readable but not a success
    Pending,
}

pub trait CompletionProbe {
    fn probe(&mut self) -> Probe;
}

/// Probe backed by a location reader; `None` from the reader means blocked.
pub struct LocationProbe<F> {
    read_location: F,
}

impl<F: FnMut() -> Option<String>> LocationProbe<F> {
    pub fn new(read_location: F) -> Self {
        Self { read_location }
    }
}

impl<F: FnMut() -> Option<String>> CompletionProbe for LocationProbe<F> {
    fn probe(&mut self) -> Probe {
        match (self.read_location)() {
            None => Probe::Blocked,
            Some(location) => match completion_signal(&PageQuery::from_url(&location)) {
                Some(signal) => Probe::Success(signal),
                None => Probe::Pending,
            },
        }
    }
}

/// Polling deadline and tick. Both are non-zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    timeout: Duration,
    tick: Duration,
}

impl PollConfig {
    pub fn new(timeout: Duration, tick: Duration) -> Result<Self> {
        if tick.is_zero() {
            return Err(Error::Config("poll tick must be greater than 0".into()));
        }
        if timeout.is_zero() {
            return Err(Error::Config("poll timeout must be greater than 0".into()));
        }
        Ok(Self { timeout, tick })
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    pub fn tick(&self) -> Duration {
        self.tick
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            timeout: POLL_TIMEOUT,
            tick: POLL_TICK,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PollOutcome {
    Completed(CompletionSignal),
    TimedOut,
}

/// Poll `probe` once per tick until it reports success or `timeout` elapses.
///
/// The first probe happens one tick after the call.
pub async fn wait_for_completion<P: CompletionProbe>(probe: &mut P, config: PollConfig) -> PollOutcome {
    let started = Instant::now();
    let mut ticker = tokio::time::interval(config.tick);
    // interval's first tick completes immediately
    ticker.tick().await;

    loop {
        ticker.tick().await;
        match probe.probe() {
            Probe::Success(signal) => {
                info!(transaction_id = ?signal.transaction_id, "payment completion detected");
                return PollOutcome::Completed(signal);
            }
            Probe::Blocked => debug!("completion probe blocked"),
            Probe::Pending => debug!("completion probe pending"),
        }
        if started.elapsed() > config.timeout {
            warn!(timeout_secs = config.timeout.as_secs(), "payment completion not detected before timeout");
            return PollOutcome::TimedOut;
        }
    }
}
