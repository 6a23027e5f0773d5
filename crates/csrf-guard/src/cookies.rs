//! Cookie contracts for the auth flow.

use crate::{CsrfToken, CSRF_COOKIE_NAME, CSRF_TOKEN_TTL_SECS};
use cookie::{Cookie, SameSite};
use time::Duration;

pub const ACCESS_COOKIE_NAME: &str = "access_token";
pub const REFRESH_COOKIE_NAME: &str = "refresh_token";
/// Non-sensitive flag readable by scripts for fast "am I logged in" checks.
pub const AUTH_MARKER_COOKIE_NAME: &str = "is_authenticated";

pub const ACCESS_TOKEN_TTL_SECS: i64 = 15 * 60;
pub const REFRESH_TOKEN_TTL_SECS: i64 = 7 * 24 * 60 * 60;

/// Short-lived access credential.
pub fn access_cookie(value: &str) -> Cookie<'static> {
    restricted_cookie(ACCESS_COOKIE_NAME, value, ACCESS_TOKEN_TTL_SECS)
}

/// Refresh credential. Rotated on every successful refresh.
pub fn refresh_cookie(value: &str) -> Cookie<'static> {
    restricted_cookie(REFRESH_COOKIE_NAME, value, REFRESH_TOKEN_TTL_SECS)
}

/// Signed CSRF pair. Script-readable so the raw half can be echoed in a header.
pub fn csrf_cookie(token: &CsrfToken) -> Cookie<'static> {
    Cookie::build((CSRF_COOKIE_NAME, token.cookie_value()))
        .http_only(false)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(CSRF_TOKEN_TTL_SECS))
        .build()
}

pub fn marker_cookie() -> Cookie<'static> {
    Cookie::build((AUTH_MARKER_COOKIE_NAME, "1"))
        .http_only(false)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(REFRESH_TOKEN_TTL_SECS))
        .build()
}

/// Removal cookie for `name`.
pub fn clear_cookie(name: &str) -> Cookie<'static> {
    Cookie::build((name.to_string(), ""))
        .path("/")
        .max_age(Duration::ZERO)
        .build()
}

/// All removal cookies sent on logout.
pub fn clear_auth_cookies() -> Vec<Cookie<'static>> {
    [
        ACCESS_COOKIE_NAME,
        REFRESH_COOKIE_NAME,
        AUTH_MARKER_COOKIE_NAME,
        CSRF_COOKIE_NAME,
    ]
    .into_iter()
    .map(clear_cookie)
    .collect()
}

/// Look up `name` in a `Cookie` request header (`a=1; b=2`).
pub fn find_cookie(header: &str, name: &str) -> Option<String> {
    Cookie::split_parse(header.to_string())
        .filter_map(Result::ok)
        .find(|cookie| cookie.name() == name)
        .map(|cookie| cookie.value().to_string())
}

fn restricted_cookie(name: &'static str, value: &str, ttl_secs: i64) -> Cookie<'static> {
    Cookie::build((name, value.to_string()))
        .http_only(true)
        .secure(true)
        .same_site(SameSite::Strict)
        .path("/")
        .max_age(Duration::seconds(ttl_secs))
        .build()
}
