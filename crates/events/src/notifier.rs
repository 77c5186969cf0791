//! [`ReservationNotifier`] implementations.

use async_trait::async_trait;
use giftreg_core::notify::{NotifyError, ReservationNotifier};

use crate::delivery::email::{EmailConfig, EmailDelivery, EmailError};
use crate::templates::{self, RenderedEmail};

/// Renders reservation emails and sends them over SMTP.
pub struct EmailNotifier {
    delivery: EmailDelivery,
    app_base_url: String,
}

impl EmailNotifier {
    pub fn new(config: &EmailConfig) -> Result<Self, EmailError> {
        Ok(Self {
            delivery: EmailDelivery::new(config)?,
            app_base_url: config.app_base_url.clone(),
        })
    }

    async fn send(&self, to: &str, email: RenderedEmail) -> Result<(), NotifyError> {
        self.delivery
            .send(to, &email)
            .await
            .map_err(|e| NotifyError(e.to_string()))
    }
}

#[async_trait]
impl ReservationNotifier for EmailNotifier {
    async fn send_reservation_removed(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
    ) -> Result<(), NotifyError> {
        let rendered = templates::reservation_removed(item_name, list_title, &self.app_base_url);
        self.send(email, rendered).await
    }

    async fn send_purchase_confirmation(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
        guest_name: Option<&str>,
    ) -> Result<(), NotifyError> {
        let rendered = templates::purchase_confirmation(
            item_name,
            list_title,
            guest_name,
            &self.app_base_url,
        );
        self.send(email, rendered).await
    }
}

/// Used when SMTP is not configured: logs the request and succeeds.
///
/// Recipient addresses are PII and are not logged.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

#[async_trait]
impl ReservationNotifier for LogNotifier {
    async fn send_reservation_removed(
        &self,
        _email: &str,
        item_name: &str,
        list_title: &str,
    ) -> Result<(), NotifyError> {
        tracing::info!(item_name, list_title, "Email disabled; skipping reservation removed notice");
        Ok(())
    }

    async fn send_purchase_confirmation(
        &self,
        _email: &str,
        item_name: &str,
        list_title: &str,
        _guest_name: Option<&str>,
    ) -> Result<(), NotifyError> {
        tracing::info!(item_name, list_title, "Email disabled; skipping purchase confirmation");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn log_notifier_always_succeeds() {
        let notifier = LogNotifier;
        assert!(notifier
            .send_reservation_removed("ann@example.com", "Teapot", "Birthday")
            .await
            .is_ok());
        assert!(notifier
            .send_purchase_confirmation("ann@example.com", "Teapot", "Birthday", Some("Ann"))
            .await
            .is_ok());
    }
}
