//! Identifying and CSRF headers for outbound calls.

use crate::identity_provider::endpoints;
use crate::transport::{ApiRequest, Transport};
use crate::{AuthError, AuthResult};
use csrf_guard::{CSRF_COOKIE_NAME, CSRF_HEADER_NAME};
use std::sync::Arc;
use tracing::{debug, warn};

pub const DEVICE_ID_HEADER: &str = "x-device-id";

/// Stamps every call with the device id and every mutating call with the
/// raw half of the CSRF cookie.
pub struct ClientHeaders {
    transport: Arc<dyn Transport>,
    device_id: String,
}

impl ClientHeaders {
    pub fn new(transport: Arc<dyn Transport>, device_id: impl Into<String>) -> Self {
        Self {
            transport,
            device_id: device_id.into(),
        }
    }

    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// Add headers to `request`.
    ///
    /// A mutating call without a CSRF cookie first primes one with a single
    /// `GET /session`. If the cookie is still missing the call is refused here
    /// and never sent.
    pub async fn prepare(&self, request: ApiRequest) -> AuthResult<ApiRequest> {
        let request = request.with_header(DEVICE_ID_HEADER, self.device_id.as_str());
        if !request.is_mutating() {
            return Ok(request);
        }

        let raw = match self.csrf_raw_value() {
            Some(raw) => raw,
            None => {
                self.prime_csrf_cookie().await;
                self.csrf_raw_value().ok_or_else(|| {
                    warn!(path = %request.path, "Refusing mutating call without CSRF cookie");
                    AuthError::CsrfMismatch("CSRF cookie unavailable".to_string())
                })?
            }
        };

        Ok(request.with_header(CSRF_HEADER_NAME, raw))
    }

    /// Raw half of the `raw.signature` CSRF cookie.
    pub fn csrf_raw_value(&self) -> Option<String> {
        let cookie = self.transport.cookie(CSRF_COOKIE_NAME)?;
        cookie
            .rsplit_once('.')
            .map(|(raw, _)| raw.to_string())
            .filter(|raw| !raw.is_empty())
    }

    async fn prime_csrf_cookie(&self) {
        debug!("Priming CSRF cookie");
        let request = ApiRequest::get(endpoints::SESSION)
            .with_header(DEVICE_ID_HEADER, self.device_id.as_str());
        if let Err(err) = self.transport.send(request).await {
            debug!(error = %err, "CSRF priming request failed");
        }
    }
}
