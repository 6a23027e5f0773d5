//! Client for the identity provider endpoints.

use crate::headers::ClientHeaders;
use crate::transport::{ApiRequest, ApiResponse, Transport};
use crate::{AuthError, AuthResult};
use csrf_guard::cookies::AUTH_MARKER_COOKIE_NAME;
use device_identity::ClientInfo;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Endpoint paths, relative to the identity provider base URL.
pub mod endpoints {
    pub const REFRESH: &str = "/refresh";
    pub const LOGOUT: &str = "/logout";
    pub const LOGOUT_ALL: &str = "/logout/all";
    pub const LOGOUT_OTHERS: &str = "/logout/others";
    pub const LOGOUT_SESSION_PREFIX: &str = "/logout/session/";
    pub const SESSION: &str = "/session";
    pub const SEND_OTP: &str = "/send-otp";
    pub const VERIFY_OTP: &str = "/verify-otp";
}

/// What a successful refresh call handed back.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RefreshGrant {
    /// New credentials were set. `expires_in` is the access lifetime when reported.
    Credential { expires_in: Option<Duration> },
    /// The provider wants a one-time code before issuing credentials.
    Challenge {
        challenge_id: String,
        masked_phone: Option<String>,
    },
    /// The call succeeded but no credential was issued.
    NoCredential,
}

/// Which sessions a logout ends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogoutScope {
    Current,
    All,
    Others,
    Session(String),
}

impl LogoutScope {
    pub fn path(&self) -> String {
        match self {
            LogoutScope::Current => endpoints::LOGOUT.to_string(),
            LogoutScope::All => endpoints::LOGOUT_ALL.to_string(),
            LogoutScope::Others => endpoints::LOGOUT_OTHERS.to_string(),
            LogoutScope::Session(id) => format!(
                "{}{}",
                endpoints::LOGOUT_SESSION_PREFIX,
                url::form_urlencoded::byte_serialize(id.as_bytes()).collect::<String>()
            ),
        }
    }

    /// Whether this logout ends the session held by this client.
    pub fn ends_local_session(&self) -> bool {
        matches!(self, LogoutScope::Current | LogoutScope::All)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionProbe {
    pub authenticated: bool,
}

/// Result of sending a one-time code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OtpDispatch {
    pub masked_phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct GrantBody {
    authenticated: Option<bool>,
    expires_in: Option<u64>,
    challenge_id: Option<String>,
    masked_phone: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct SessionBody {
    authenticated: bool,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", default)]
struct OtpBody {
    masked_phone: Option<String>,
}

/// Identity provider endpoints, with headers applied to every call.
///
/// Calls made here bypass the request interceptor: a 401 from the refresh
/// endpoint must never trigger another refresh.
pub struct IdentityProviderClient {
    transport: Arc<dyn Transport>,
    headers: Arc<ClientHeaders>,
}

impl IdentityProviderClient {
    pub fn new(transport: Arc<dyn Transport>, headers: Arc<ClientHeaders>) -> Self {
        Self { transport, headers }
    }

    /// `POST /refresh`. Credentials travel in cookies.
    pub async fn refresh(&self) -> AuthResult<RefreshGrant> {
        let response = self.call(ApiRequest::post(endpoints::REFRESH)).await?;
        if !response.is_success() {
            warn!(status = %response.status, "Refresh rejected by identity provider");
            return Err(AuthError::RefreshExhausted {
                status: response.status.as_u16(),
            });
        }
        self.parse_grant(&response)
    }

    pub async fn logout(&self, scope: &LogoutScope) -> AuthResult<()> {
        let path = scope.path();
        let response = self.call(ApiRequest::post(path.as_str())).await?;
        expect_success(&response, &path)?;
        debug!(scope = ?scope, "Logout acknowledged");
        Ok(())
    }

    /// `GET /session`.
    pub async fn session(&self) -> AuthResult<SessionProbe> {
        let response = self.call(ApiRequest::get(endpoints::SESSION)).await?;
        expect_success(&response, endpoints::SESSION)?;
        let body: Option<SessionBody> = response.json_body()?;
        Ok(SessionProbe {
            authenticated: body.unwrap_or_default().authenticated,
        })
    }

    pub async fn send_otp(&self, challenge_id: &str, client: &ClientInfo) -> AuthResult<OtpDispatch> {
        let request = ApiRequest::post(endpoints::SEND_OTP).with_json(json!({
            "challengeId": challenge_id,
            "ipAddress": client.ip_address,
            "userAgent": client.user_agent,
        }));
        let response = self.call(request).await?;
        expect_success(&response, endpoints::SEND_OTP)?;
        let body: Option<OtpBody> = response.json_body()?;
        Ok(OtpDispatch {
            masked_phone: body.unwrap_or_default().masked_phone,
        })
    }

    pub async fn verify_otp(&self, challenge_id: &str, code: &str) -> AuthResult<RefreshGrant> {
        let request = ApiRequest::post(endpoints::VERIFY_OTP).with_json(json!({
            "challengeId": challenge_id,
            "code": code,
        }));
        let response = self.call(request).await?;
        expect_success(&response, endpoints::VERIFY_OTP)?;
        self.parse_grant(&response)
    }

    async fn call(&self, request: ApiRequest) -> AuthResult<ApiResponse> {
        let request = self.headers.prepare(request).await?;
        let path = request.path.clone();
        let response = self.transport.send(request).await?;
        if response.is_csrf_rejection() {
            warn!(path = %path, "Identity provider rejected CSRF token");
            return Err(AuthError::CsrfMismatch(format!("rejected by {}", path)));
        }
        Ok(response)
    }

    fn parse_grant(&self, response: &ApiResponse) -> AuthResult<RefreshGrant> {
        let body: GrantBody = response.json_body::<Option<GrantBody>>()?.unwrap_or_default();

        if let Some(challenge_id) = body.challenge_id.filter(|id| !id.is_empty()) {
            return Ok(RefreshGrant::Challenge {
                challenge_id,
                masked_phone: body.masked_phone,
            });
        }

        let authenticated = match body.authenticated {
            Some(flag) => flag,
            None => self
                .transport
                .cookie(AUTH_MARKER_COOKIE_NAME)
                .is_some_and(|value| value == "1"),
        };

        if authenticated {
            Ok(RefreshGrant::Credential {
                expires_in: body.expires_in.map(Duration::from_secs),
            })
        } else {
            Ok(RefreshGrant::NoCredential)
        }
    }
}

fn expect_success(response: &ApiResponse, path: &str) -> AuthResult<()> {
    if response.is_success() {
        return Ok(());
    }
    Err(AuthError::UnexpectedStatus {
        status: response.status.as_u16(),
        path: path.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logout_scope_paths() {
        assert_eq!(LogoutScope::Current.path(), "/logout");
        assert_eq!(LogoutScope::All.path(), "/logout/all");
        assert_eq!(LogoutScope::Others.path(), "/logout/others");
        assert_eq!(
            LogoutScope::Session("s 1/2".into()).path(),
            "/logout/session/s+1%2F2"
        );
    }

    #[test]
    fn test_only_current_and_all_end_local_session() {
        assert!(LogoutScope::Current.ends_local_session());
        assert!(LogoutScope::All.ends_local_session());
        assert!(!LogoutScope::Others.ends_local_session());
        assert!(!LogoutScope::Session("abc".into()).ends_local_session());
    }
}
