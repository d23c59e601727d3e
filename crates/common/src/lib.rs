//! Types shared by the Cherry Pay SDK and the CORS relay

mod error;
mod secret;

pub use error::{Error, Result};
pub use secret::Secret;
