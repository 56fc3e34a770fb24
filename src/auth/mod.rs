//! Authentication integration
//!
//! Token validation is delegated to an external authentication service;
//! the gateway keeps no credentials and caches no verdicts.

pub mod client;
pub mod middleware;

pub use client::{AuthClient, AuthUser, ValidateTokenResponse};
pub use middleware::{require_admin, require_auth, require_permission};
