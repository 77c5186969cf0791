//! Outbound notification channels for the reservation engine.
//!
//! - [`delivery::email`]: SMTP delivery over `lettre`.
//! - [`templates`]: plain-text bodies for the two reservation emails.
//! - [`notifier`]: [`ReservationNotifier`](giftreg_core::notify::ReservationNotifier)
//!   implementations, one sending email and one that only logs.

pub mod delivery;
pub mod notifier;
pub mod templates;

pub use delivery::email::{EmailConfig, EmailDelivery, EmailError};
pub use notifier::{EmailNotifier, LogNotifier};
