//! Domain model and business rules for gift-registry reservations.
//!
//! This crate has zero internal dependencies. Persistence, email delivery
//! and HTTP live in `giftreg-db`, `giftreg-events` and `giftreg-api`, which
//! plug into the traits defined here.

pub mod crypto;
pub mod directory;
pub mod engine;
pub mod error;
#[cfg(any(test, feature = "test-support"))]
pub mod memory;
pub mod notify;
pub mod reservation;
pub mod store;
pub mod types;
