//! Request handlers, grouped by who calls them.
//!
//! - [`reservation`]: reservers (users and guests).
//! - [`owner_actions`]: wish-list owners whose actions cascade into reservations.

pub mod owner_actions;
pub mod reservation;
