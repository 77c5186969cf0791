//! Request extractors.
//!
//! - [`auth::AuthUser`]: the authenticated user from a JWT Bearer token.
//! - [`auth::MaybeAuthUser`]: the same, or nobody when no header was sent.

pub mod auth;
