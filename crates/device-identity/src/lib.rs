//! Device identity for the client portal.
//!
//! This crate provides:
//! - A permanent opaque device identifier, created once per storage lifetime
//! - A 24-hour cache of the client's IP address and user agent
//!
//! Both degrade to ephemeral, in-process values when durable storage is
//! unavailable instead of failing the authentication flow.

mod client_info;
mod error;
mod manager;

pub use client_info::{
    ClientInfo, ClientInfoCache, ClientInfoSource, HttpClientInfoSource, CLIENT_INFO_TTL,
    DEFAULT_USER_AGENT, UNKNOWN_IP,
};
pub use error::{IdentityError, IdentityResult};
pub use manager::{normalize_device_id, DeviceIdentity, DeviceIdentityManager};
