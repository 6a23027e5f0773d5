//! CSRF double-submit protection for state-changing calls.
//!
//! The guard signs a random raw value with a server secret and stores the
//! `raw.signature` pair in a cookie. Scripts only ever see the raw half, which
//! they echo back in the `x-csrf-token` header. A request is accepted when the
//! cookie signature is valid and the header equals the cookie's raw half.
//!
//! [`cookies`] holds the builders for every cookie the portal sets.

pub mod cookies;
mod error;
mod guard;

pub use error::{CsrfError, CsrfResult};
pub use guard::{
    is_safe_method, CsrfGuard, CsrfToken, IssuedCsrf, CSRF_COOKIE_NAME, CSRF_HEADER_NAME,
    CSRF_TOKEN_TTL_SECS,
};
