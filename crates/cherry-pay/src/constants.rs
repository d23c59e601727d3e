//! Cherry API endpoints and defaults
//!
//! The deployment hosts and paths below are fixed by the upstream API. They
//! can be overridden per session through `SdkConfig`.

/// Default base URL for the registration endpoint
pub const DEFAULT_BASE_URL: &str = "https://dev-newcherry.cherryx.ai";

/// Default base URL for the token and payment endpoints
pub const DEFAULT_API_URL: &str = "https://dev-newcherry.cherryx.ai";

/// Traffic-source tag used when registration does not name one
pub const DEFAULT_STREAM: &str = "xpn_m";

/// Product and method used by the checkout hand-off when nothing is selected
pub const DEFAULT_CHECKOUT_ID: &str = "1";

/// Page the checkout hand-off navigates to
pub const DEFAULT_CHECKOUT_PAGE: &str = "checkout.html";

pub const REGISTER_PATH: &str = "/api/v1/user";
pub const REDIRECT_TOKEN_PATH: &str = "/a-api/redirect-token";
pub const INITIATE_PAYMENT_PATH: &str = "/api/v1/payments/initiate";
pub const EXCHANGE_TOKEN_PATH: &str = "/a-api/exchange-token";

/// Auto-registration flow host
pub const AUTOREG_API_HOST: &str = "https://app.cherryx.ai";

/// Where the auto-registration flow sends the user after payment
pub const AUTOREG_REDIRECT_HOST: &str = "https://cherryx.ai";

pub const AUTOREG_DEFAULT_PRODUCT_ID: u64 = 38;
pub const AUTOREG_DEFAULT_METHOD_ID: u64 = 185;

pub const AUTOREG_SIGNUP_PATH: &str = "/users/register/auto";
pub const AUTOREG_PURCHASE_PATH: &str = "/subscriptions/purchase";

/// Query parameter carrying the redirect token back from the payment page
pub const REDIRECT_TOKEN_PARAM: &str = "redirect_token";
