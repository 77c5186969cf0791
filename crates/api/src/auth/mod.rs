//! Authentication primitives.
//!
//! - [`jwt`]: access-token validation (and generation, for tooling and tests).

pub mod jwt;
