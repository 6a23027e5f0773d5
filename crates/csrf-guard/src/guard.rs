//! Token issuance and verification.

use crate::cookies::csrf_cookie;
use crate::{CsrfError, CsrfResult};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, TimeZone, Utc};
use cookie::Cookie;
use hmac::{Hmac, Mac};
use rand::rngs::OsRng;
use rand::RngCore;
use sha2::Sha256;
use subtle::ConstantTimeEq;
use tracing::debug;

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE_NAME: &str = "csrf_token";
pub const CSRF_HEADER_NAME: &str = "x-csrf-token";

/// One day.
pub const CSRF_TOKEN_TTL_SECS: i64 = 24 * 60 * 60;

const NONCE_LEN: usize = 32;
/// Tolerated clock skew for tokens issued "in the future".
const MAX_SKEW_SECS: i64 = 60;

/// A signed CSRF token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsrfToken {
    /// The half given to scripts and echoed in the header.
    pub raw_value: String,
    pub signature: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

impl CsrfToken {
    /// Value stored in the cookie: `raw.signature`.
    pub fn cookie_value(&self) -> String {
        format!("{}.{}", self.raw_value, self.signature)
    }
}

/// Result of [`CsrfGuard::issue`].
#[derive(Debug, Clone)]
pub struct IssuedCsrf {
    pub token: CsrfToken,
    /// Whether the caller's existing cookie was valid and kept.
    pub reused: bool,
    /// Cookie to set on the response. `None` when the existing cookie is reused.
    pub set_cookie: Option<Cookie<'static>>,
}

/// Issues and verifies signed double-submit tokens.
pub struct CsrfGuard {
    secret: Vec<u8>,
    ttl_secs: i64,
}

impl std::fmt::Debug for CsrfGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfGuard")
            .field("secret", &"<redacted>")
            .field("ttl_secs", &self.ttl_secs)
            .finish()
    }
}

impl CsrfGuard {
    pub fn new(secret: impl Into<Vec<u8>>) -> CsrfResult<Self> {
        let secret = secret.into();
        if secret.is_empty() {
            return Err(CsrfError::InvalidSecret);
        }
        Ok(Self {
            secret,
            ttl_secs: CSRF_TOKEN_TTL_SECS,
        })
    }

    pub fn with_ttl_secs(mut self, ttl_secs: i64) -> Self {
        self.ttl_secs = ttl_secs;
        self
    }

    /// Reuse the existing cookie when it is valid, otherwise mint a new token.
    pub fn issue(&self, existing_cookie: Option<&str>) -> CsrfResult<IssuedCsrf> {
        self.issue_at(existing_cookie, Utc::now())
    }

    pub fn issue_at(
        &self,
        existing_cookie: Option<&str>,
        now: DateTime<Utc>,
    ) -> CsrfResult<IssuedCsrf> {
        if let Some(existing) = existing_cookie {
            match self.parse_at(existing, now) {
                Ok(token) => {
                    return Ok(IssuedCsrf {
                        token,
                        reused: true,
                        set_cookie: None,
                    })
                }
                Err(err) => debug!(reason = %err, "Reissuing CSRF token"),
            }
        }

        let token = self.mint(now)?;
        let cookie = csrf_cookie(&token);
        Ok(IssuedCsrf {
            token,
            reused: false,
            set_cookie: Some(cookie),
        })
    }

    /// True when the cookie is authentic and `incoming` equals its raw half.
    pub fn verify(&self, cookie: Option<&str>, incoming: Option<&str>) -> bool {
        self.check(cookie, incoming).is_ok()
    }

    /// Like [`verify`](Self::verify) but reports why a pair was rejected.
    pub fn check(&self, cookie: Option<&str>, incoming: Option<&str>) -> CsrfResult<()> {
        self.check_at(cookie, incoming, Utc::now())
    }

    pub fn check_at(
        &self,
        cookie: Option<&str>,
        incoming: Option<&str>,
        now: DateTime<Utc>,
    ) -> CsrfResult<()> {
        let cookie = cookie
            .filter(|value| !value.is_empty())
            .ok_or(CsrfError::MissingCookie)?;
        let incoming = incoming
            .map(str::trim)
            .filter(|value| !value.is_empty())
            .ok_or(CsrfError::MissingHeader)?;

        let token = self.parse_at(cookie, now)?;
        let expected = token.raw_value.as_bytes();
        let provided = incoming.as_bytes();
        if expected.len() != provided.len() || !bool::from(expected.ct_eq(provided)) {
            return Err(CsrfError::Mismatch);
        }
        Ok(())
    }

    /// Gate a request: safe methods pass, everything else must carry a valid pair.
    pub fn enforce(
        &self,
        method: &str,
        cookie: Option<&str>,
        header: Option<&str>,
    ) -> CsrfResult<()> {
        if is_safe_method(method) {
            return Ok(());
        }
        self.check(cookie, header)
    }

    /// Parse and authenticate a `raw.signature` cookie value.
    pub fn parse_at(&self, cookie_value: &str, now: DateTime<Utc>) -> CsrfResult<CsrfToken> {
        let (raw, signature) = cookie_value
            .trim()
            .rsplit_once('.')
            .ok_or(CsrfError::Malformed)?;
        if raw.is_empty() || signature.is_empty() {
            return Err(CsrfError::Malformed);
        }

        let provided = URL_SAFE_NO_PAD
            .decode(signature)
            .map_err(|_| CsrfError::Malformed)?;
        let mut mac = self.mac()?;
        mac.update(raw.as_bytes());
        mac.verify_slice(&provided)
            .map_err(|_| CsrfError::Tampered)?;

        let issued_at = parse_raw(raw)?;
        let expires_at = issued_at + chrono::Duration::seconds(self.ttl_secs);
        if issued_at > now + chrono::Duration::seconds(MAX_SKEW_SECS) {
            return Err(CsrfError::Malformed);
        }
        if now >= expires_at {
            return Err(CsrfError::Expired);
        }

        Ok(CsrfToken {
            raw_value: raw.to_string(),
            signature: signature.to_string(),
            issued_at,
            expires_at,
        })
    }

    fn mint(&self, now: DateTime<Utc>) -> CsrfResult<CsrfToken> {
        let mut nonce = [0u8; NONCE_LEN];
        OsRng
            .try_fill_bytes(&mut nonce)
            .map_err(|err| CsrfError::Entropy(err.to_string()))?;

        let issued_at = Utc
            .timestamp_opt(now.timestamp(), 0)
            .single()
            .ok_or(CsrfError::Malformed)?;
        let raw_value = format!("{}:{}", issued_at.timestamp(), URL_SAFE_NO_PAD.encode(nonce));
        let signature = self.sign(&raw_value)?;

        Ok(CsrfToken {
            raw_value,
            signature,
            issued_at,
            expires_at: issued_at + chrono::Duration::seconds(self.ttl_secs),
        })
    }

    fn sign(&self, raw: &str) -> CsrfResult<String> {
        let mut mac = self.mac()?;
        mac.update(raw.as_bytes());
        Ok(URL_SAFE_NO_PAD.encode(mac.finalize().into_bytes()))
    }

    fn mac(&self) -> CsrfResult<HmacSha256> {
        HmacSha256::new_from_slice(&self.secret).map_err(|_| CsrfError::InvalidSecret)
    }
}

/// GET, HEAD and OPTIONS never change state.
pub fn is_safe_method(method: &str) -> bool {
    ["GET", "HEAD", "OPTIONS"]
        .iter()
        .any(|safe| method.eq_ignore_ascii_case(safe))
}

fn parse_raw(raw: &str) -> CsrfResult<DateTime<Utc>> {
    let (issued, nonce) = raw.split_once(':').ok_or(CsrfError::Malformed)?;
    let issued: i64 = issued.parse().map_err(|_| CsrfError::Malformed)?;
    let nonce = URL_SAFE_NO_PAD
        .decode(nonce)
        .map_err(|_| CsrfError::Malformed)?;
    if nonce.len() != NONCE_LEN {
        return Err(CsrfError::Malformed);
    }
    Utc.timestamp_opt(issued, 0)
        .single()
        .ok_or(CsrfError::Malformed)
}
