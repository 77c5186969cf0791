//! Periodic expiry of stale guest reservations.
//!
//! Guest reservations carry an `expires_at`; this loop moves the ones past
//! it to `expired` so the items become reservable again. Expiry sends no
//! notification. A sweep racing a cancel resolves in the store.

use std::time::Duration;

use giftreg_core::engine::ReservationEngine;
use tokio_util::sync::CancellationToken;

/// Run the expiry sweep every `interval` until `cancel` is triggered.
///
/// The first sweep runs immediately.
pub async fn run(engine: ReservationEngine, interval: Duration, cancel: CancellationToken) {
    tracing::info!(
        interval_secs = interval.as_secs(),
        "Reservation expiry job started"
    );

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                tracing::info!("Reservation expiry job stopping");
                break;
            }
            _ = ticker.tick() => {
                match engine.expire_stale().await {
                    Ok(0) => tracing::debug!("Reservation expiry: nothing to expire"),
                    Ok(expired) => tracing::info!(expired, "Reservation expiry: expired stale guest reservations"),
                    Err(e) => tracing::error!(error = %e, "Reservation expiry: sweep failed"),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use giftreg_core::crypto::PiiCipher;
    use giftreg_core::engine::ReservationSettings;
    use giftreg_core::memory::{MemoryBackend, RecordingNotifier};
    use giftreg_core::reservation::{Actor, GuestContact, ReservationStatus};

    use super::*;

    #[tokio::test]
    async fn sweep_expires_guest_reservations_and_stops_on_cancel() {
        let backend = Arc::new(MemoryBackend::new());
        let owner = backend.add_user("Olive", Some("olive@example.com"));
        let list = backend.add_wish_list(owner, "Birthday");
        let item = backend.add_item(list, "Teapot");
        let engine = ReservationEngine::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            Arc::new(RecordingNotifier::new()),
            PiiCipher::disabled(),
            ReservationSettings {
                guest_ttl: chrono::Duration::seconds(-1),
            },
        );

        let guest = GuestContact::parse(Some("Ann"), Some("ann@example.com")).unwrap();
        engine.reserve(item, Actor::Guest(guest)).await.unwrap();

        let cancel = CancellationToken::new();
        let handle = tokio::spawn(run(engine.clone(), Duration::from_secs(3600), cancel.clone()));

        let mut expired = false;
        for _ in 0..50 {
            let rows = backend.reservations_for_item(item);
            if rows.iter().all(|r| r.status == ReservationStatus::Expired) {
                expired = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(expired, "the first tick should expire the reservation");

        cancel.cancel();
        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .expect("job should stop after cancel")
            .unwrap();
    }
}
