//! Outbound notification contract for reservation cascades.
//!
//! The engine only *requests* emails; SMTP, templating and retries belong to
//! the implementation. Calls are made strictly after the triggering mutation
//! has committed and a failure is logged by the engine, never propagated.

use async_trait::async_trait;

/// A notification could not be handed to the delivery channel.
#[derive(Debug, thiserror::Error)]
#[error("notification delivery failed: {0}")]
pub struct NotifyError(pub String);

#[async_trait]
pub trait ReservationNotifier: Send + Sync + 'static {
    /// Tell a reserver that the item they reserved is gone.
    async fn send_reservation_removed(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
    ) -> Result<(), NotifyError>;

    /// Tell a reserver that the owner marked their reserved gift as purchased.
    async fn send_purchase_confirmation(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
        guest_name: Option<&str>,
    ) -> Result<(), NotifyError>;
}
