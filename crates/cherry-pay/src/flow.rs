//! Payment flow state machine
//!
//! Pure transition function: the session reports each step that succeeded
//! and gets back the new state. A failed step emits no event, so the state
//! is left unchanged.
//!
//! ```text
//! Idle -> Registered -> RedirectTokenObtained -> PaymentInitiated -> Exchanged
//! ```

use std::fmt;

/// Progress of one payment session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum FlowState {
    #[default]
    Idle,
    Registered,
    RedirectTokenObtained,
    PaymentInitiated,
    Exchanged,
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FlowState::Idle => "idle",
            FlowState::Registered => "registered",
            FlowState::RedirectTokenObtained => "redirect_token_obtained",
            FlowState::PaymentInitiated => "payment_initiated",
            FlowState::Exchanged => "exchanged",
        };
        f.write_str(name)
    }
}

/// Step completions that drive transitions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowEvent {
    /// Registration endpoint answered 2xx
    Registered,
    /// Redirect-token endpoint answered with a token
    RedirectTokenFetched,
    /// Initiate endpoint answered with a payment URL
    PaymentInitiated,
    /// Exchange endpoint answered 2xx
    TokenExchanged,
    /// Tokens cleared
    Reset,
}

/// Handle a state transition. Pure function: no I/O.
pub fn transition(state: FlowState, event: FlowEvent) -> FlowState {
    match (state, event) {
        (_, FlowEvent::Reset) => FlowState::Idle,

        // Registering again starts the checkout over
        (_, FlowEvent::Registered) => FlowState::Registered,

        // The redirect token endpoint accepts anonymous calls, so a fetch is
        // valid before registration too. Once payment is underway a re-fetch
        // does not move the flow backwards.
        (
            FlowState::Idle | FlowState::Registered | FlowState::RedirectTokenObtained,
            FlowEvent::RedirectTokenFetched,
        ) => FlowState::RedirectTokenObtained,
        (state @ (FlowState::PaymentInitiated | FlowState::Exchanged), FlowEvent::RedirectTokenFetched) => {
            state
        }

        (FlowState::Exchanged, FlowEvent::PaymentInitiated) => FlowState::Exchanged,
        (_, FlowEvent::PaymentInitiated) => FlowState::PaymentInitiated,

        // Returning from the payment page may land in a fresh session
        (_, FlowEvent::TokenExchanged) => FlowState::Exchanged,
    }
}
