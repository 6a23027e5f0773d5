//! Client-side authentication session coordinator for the portal.
//!
//! This crate provides:
//! - An explicit FSM for session status with a single-writer store
//! - Single-flight credential refresh shared by every caller
//! - A 401-triggered retry wrapper around outbound calls (one retry, never more)
//! - Device id and CSRF headers on every outbound call
//! - Proactive refresh before expiry, with a background worker path
//! - A route gate that turns session status into views and login redirects

mod background;
mod coordinator;
mod error;
mod headers;
mod identity_provider;
mod interceptor;
mod route_gate;
mod runtime;
mod scheduler;
mod session_fsm;
mod store;
mod transport;

#[cfg(test)]
mod tests;

pub use background::{BackgroundHandle, BackgroundMessage, BackgroundRefreshWorker};
pub use coordinator::{RefreshCoordinator, RefreshFailure, RefreshOutcome, RefreshTrigger};
pub use error::{AuthError, AuthResult, TransportError};
pub use headers::{ClientHeaders, DEVICE_ID_HEADER};
pub use identity_provider::{
    endpoints, IdentityProviderClient, LogoutScope, OtpDispatch, RefreshGrant, SessionProbe,
};
pub use interceptor::RequestInterceptor;
pub use route_gate::{GateView, Location, Navigator, ProtectedRouteGate};
pub use runtime::{AuthRuntime, EngineSettings};
pub use scheduler::{ProactiveRefreshScheduler, Visibility};
pub use session_fsm::session_machine;
pub use session_fsm::{Session, SessionInput, SessionMachine, SessionMachineState, SessionStatus};
pub use store::{SessionStateStore, StatusChange};
pub use transport::{ApiRequest, ApiResponse, ReqwestTransport, Transport};
