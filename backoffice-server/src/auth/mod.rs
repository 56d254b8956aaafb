//! Authentication at the HTTP boundary
//!
//! Tokens are issued elsewhere; this module only verifies them and exposes
//! the caller as [`CurrentUser`].
//!
//! - [`require_auth`] - token verification for every API route
//! - [`require_permission`] - per-router permission guard

mod extractor;
mod jwt;
mod middleware;

pub use jwt::{Claims, CurrentUser, JwtConfig, JwtError, JwtService};
pub use middleware::{require_auth, require_permission};
