//! 401-triggered refresh-and-retry around outbound data calls.

use crate::coordinator::{RefreshCoordinator, RefreshOutcome, RefreshTrigger};
use crate::headers::ClientHeaders;
use crate::identity_provider::endpoints;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::{AuthError, AuthResult};
use serde::de::DeserializeOwned;
use std::sync::Arc;
use tracing::{debug, warn};

/// Wraps every outbound data call.
///
/// A 401 triggers one shared refresh and, if it succeeds, exactly one retry.
/// Whatever the retry returns goes back to the caller as-is.
pub struct RequestInterceptor {
    transport: Arc<dyn Transport>,
    headers: Arc<ClientHeaders>,
    coordinator: Arc<RefreshCoordinator>,
}

impl RequestInterceptor {
    pub fn new(
        transport: Arc<dyn Transport>,
        headers: Arc<ClientHeaders>,
        coordinator: Arc<RefreshCoordinator>,
    ) -> Self {
        Self {
            transport,
            headers,
            coordinator,
        }
    }

    pub async fn send(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let response = self.dispatch(request.clone()).await?;
        if !response.is_unauthorized() || is_refresh_endpoint(&request.path) {
            return Ok(response);
        }

        debug!(path = %request.path, "Protected call unauthorized, refreshing");
        match self
            .coordinator
            .refresh_for(RefreshTrigger::AccessRejected)
            .await
        {
            RefreshOutcome::Ok { .. } => {
                let retried = self.dispatch(request).await?;
                if retried.is_unauthorized() {
                    warn!("Call still unauthorized after refresh, not retrying again");
                }
                Ok(retried)
            }
            RefreshOutcome::Failed { reason } => {
                debug!(path = %request.path, reason = %reason, "Refresh failed, surfacing 401");
                Ok(response)
            }
        }
    }

    /// Send and decode a JSON body. A final 401 becomes [`AuthError::AuthExpired`].
    pub async fn send_json<T: DeserializeOwned>(&self, request: ApiRequest) -> AuthResult<T> {
        let path = request.path.clone();
        let response = self.send(request).await?;
        if response.is_unauthorized() {
            return Err(AuthError::AuthExpired { path });
        }
        if !response.is_success() {
            return Err(AuthError::UnexpectedStatus {
                status: response.status.as_u16(),
                path,
            });
        }
        Ok(serde_json::from_slice(&response.body)?)
    }

    async fn dispatch(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let request = self.headers.prepare(request).await?;
        let path = request.path.clone();
        let response = self.transport.send(request).await?;
        if response.is_csrf_rejection() {
            warn!(path = %path, "Call rejected for CSRF mismatch");
            return Err(AuthError::CsrfMismatch(format!("rejected by {}", path)));
        }
        Ok(response)
    }
}

/// Recursion guard: the refresh endpoint's own 401 never triggers a refresh.
fn is_refresh_endpoint(path: &str) -> bool {
    let path = path.split(['?', '#']).next().unwrap_or(path);
    path.trim_end_matches('/') == endpoints::REFRESH
}
