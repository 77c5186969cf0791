//! The Reservation Engine.
//!
//! Business rules on top of a [`ReservationStore`]: guest vs. authenticated
//! reservations, token-based self service, the expiry sweep, and the owner
//! cascades (item deleted, list deleted, item purchased).
//!
//! The engine holds no mutable state of its own. Every race is settled by the
//! store's atomic primitives; the engine only decides what to ask for.
//! Cascades run in two phases: the store mutation commits first and hands back
//! the affected rows, then notifications are sent. A failed notification is
//! logged and counted, never propagated.

use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use validator::Validate;

use crate::crypto::{Pii, PiiCipher};
use crate::directory::{GiftItem, GiftItemDirectory, UserDirectory, WishList};
use crate::error::CoreError;
use crate::notify::ReservationNotifier;
use crate::reservation::{
    generate_token, hash_token, validate_token_format, Actor, NewReservation, Reservation,
    ReservationDetail, Reserved, Reserver, DEFAULT_GUEST_TTL_DAYS, MAX_CANCEL_REASON_LENGTH,
};
use crate::store::{
    Pagination, ReservationStore, ReservationTarget, StatusTransition, StoreError,
};
use crate::types::DbId;

// ---------------------------------------------------------------------------
// Settings / inputs / outputs
// ---------------------------------------------------------------------------

/// Tunables for reservation behaviour.
#[derive(Debug, Clone)]
pub struct ReservationSettings {
    /// How long a guest reservation stays active before the sweep expires it.
    pub guest_ttl: chrono::Duration,
}

impl Default for ReservationSettings {
    fn default() -> Self {
        Self {
            guest_ttl: chrono::Duration::days(DEFAULT_GUEST_TTL_DAYS),
        }
    }
}

/// How a cancel request identifies its reservation, and with what credential.
#[derive(Debug, Clone)]
pub enum ReservationLookup {
    /// Authenticated path: the caller must be the reserver or the item owner.
    Id { id: DbId, user_id: DbId },
    /// Guest path: holding the token is the authorization.
    Token(String),
}

/// Outcome of a delete cascade.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CascadeReport {
    /// Active reservations removed by the mutation.
    pub removed: usize,
    /// Notifications handed to the delivery channel.
    pub notified: usize,
    /// Notifications that could not be resolved or delivered.
    pub failed: usize,
}

/// Outcome of marking an item purchased.
#[derive(Debug, Clone)]
pub struct PurchaseOutcome {
    pub item: GiftItem,
    /// The reservation fulfilled by this purchase, if the item was reserved.
    pub fulfilled: Option<Reservation>,
    pub notified: bool,
}

struct Contact {
    email: String,
    guest_name: Option<String>,
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct ReservationEngine {
    store: Arc<dyn ReservationStore>,
    items: Arc<dyn GiftItemDirectory>,
    users: Arc<dyn UserDirectory>,
    notifier: Arc<dyn ReservationNotifier>,
    cipher: PiiCipher,
    settings: ReservationSettings,
}

impl ReservationEngine {
    pub fn new(
        store: Arc<dyn ReservationStore>,
        items: Arc<dyn GiftItemDirectory>,
        users: Arc<dyn UserDirectory>,
        notifier: Arc<dyn ReservationNotifier>,
        cipher: PiiCipher,
        settings: ReservationSettings,
    ) -> Self {
        Self {
            store,
            items,
            users,
            notifier,
            cipher,
            settings,
        }
    }

    pub fn items(&self) -> &Arc<dyn GiftItemDirectory> {
        &self.items
    }

    // -- Reserve -----------------------------------------------------------

    /// Reserve a gift item for a user or a guest.
    ///
    /// Guests receive a freshly minted token in the result; this is the only
    /// time it is ever exposed. An already-reserved item yields
    /// `CoreError::Conflict`.
    pub async fn reserve(&self, gift_item_id: DbId, actor: Actor) -> Result<Reserved, CoreError> {
        let now = Utc::now();

        let (reserver, expires_at, token) = match actor {
            Actor::User { user_id } => (Reserver::AuthenticatedUser { user_id }, None, None),
            Actor::Guest(contact) => {
                contact.validate().map_err(|e| {
                    CoreError::Validation(format!("Invalid guest contact details: {e}"))
                })?;
                let token = generate_token();
                let reserver = Reserver::Guest {
                    name: self.cipher.seal(&contact.name)?,
                    email: self.cipher.seal(&contact.email)?,
                    token_hash: hash_token(&token),
                };
                (reserver, Some(now + self.settings.guest_ttl), Some(token))
            }
        };

        let new = NewReservation {
            gift_item_id,
            reserver,
            reserved_at: now,
            expires_at,
        };

        let stored = match self.store.reserve_if_available(new).await {
            Ok(stored) => stored,
            Err(err @ StoreError::AlreadyReserved { .. }) => {
                tracing::debug!(gift_item_id, "Reservation rejected: item already reserved");
                return Err(err.into());
            }
            Err(err) => return Err(err.into()),
        };

        tracing::info!(
            reservation_id = stored.id,
            gift_item_id,
            guest = stored.reserver.is_guest(),
            "Gift item reserved"
        );

        Ok(Reserved {
            reservation: self.resolve(stored)?,
            reservation_token: token,
        })
    }

    // -- Cancel ------------------------------------------------------------

    /// Cancel a reservation by id (reserver or item owner) or by guest token.
    ///
    /// Cancelling a reservation that is already terminal returns it unchanged.
    pub async fn cancel(
        &self,
        lookup: ReservationLookup,
        reason: Option<String>,
    ) -> Result<Reservation, CoreError> {
        let reason = normalize_reason(reason)?;

        match lookup {
            ReservationLookup::Id { id, user_id } => self.cancel_by_id(id, user_id, reason).await,
            ReservationLookup::Token(token) => self.cancel_by_token(&token, reason).await,
        }
    }

    async fn cancel_by_id(
        &self,
        id: DbId,
        user_id: DbId,
        reason: Option<String>,
    ) -> Result<Reservation, CoreError> {
        let existing = self
            .store
            .get_by_id(id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Reservation",
                id,
            })?;

        let is_reserver = existing.reserver.user_id() == Some(user_id);
        let item = if is_reserver {
            None
        } else {
            let item = self.items.get_item(existing.gift_item_id).await?;
            match item {
                Some(item) if item.owner_id == user_id => Some(item),
                _ => {
                    return Err(CoreError::Forbidden(
                        "Only the reserver or the list owner can cancel this reservation".into(),
                    ))
                }
            }
        };

        if !existing.is_active() {
            return self.resolve(existing);
        }

        let updated = self
            .store
            .update_status(
                ReservationTarget::Id(id),
                StatusTransition::cancelled(Utc::now(), reason),
            )
            .await?;

        let Some(updated) = updated else {
            return self.reload_after_lost_race(id).await;
        };

        tracing::info!(
            reservation_id = id,
            gift_item_id = updated.gift_item_id,
            user_id,
            by_owner = item.is_some(),
            "Reservation cancelled"
        );

        // Owner removed someone else's reservation: tell the reserver.
        if let Some(item) = item {
            self.notify_removed_once(&updated, &item.name, &item.wish_list_title)
                .await;
        }

        self.resolve(updated)
    }

    async fn cancel_by_token(
        &self,
        token: &str,
        reason: Option<String>,
    ) -> Result<Reservation, CoreError> {
        validate_token_format(token)?;
        let token_hash = hash_token(token);

        let existing = self
            .store
            .get_by_token_hash(&token_hash)
            .await?
            .ok_or(CoreError::NotFoundBy {
                entity: "Reservation",
                lookup: "reservation token",
            })?;

        if !existing.is_active() {
            return self.resolve(existing);
        }

        let updated = self
            .store
            .update_status(
                ReservationTarget::TokenHash(token_hash),
                StatusTransition::cancelled(Utc::now(), reason),
            )
            .await?;

        match updated {
            Some(updated) => {
                tracing::info!(
                    reservation_id = updated.id,
                    gift_item_id = updated.gift_item_id,
                    "Guest reservation cancelled"
                );
                self.resolve(updated)
            }
            None => self.reload_after_lost_race(existing.id).await,
        }
    }

    /// A concurrent cancel, expiry or fulfilment got there first. Report the
    /// state it left behind instead of failing.
    async fn reload_after_lost_race(&self, id: DbId) -> Result<Reservation, CoreError> {
        tracing::debug!(reservation_id = id, "Reservation already left the active state");
        let current = self
            .store
            .get_by_id(id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "Reservation",
                id,
            })?;
        self.resolve(current)
    }

    // -- Reads -------------------------------------------------------------

    /// Look up a guest reservation by its token.
    pub async fn get_by_token(&self, token: &str) -> Result<Reservation, CoreError> {
        validate_token_format(token)?;
        let found = self
            .store
            .get_by_token_hash(&hash_token(token))
            .await?
            .ok_or(CoreError::NotFoundBy {
                entity: "Reservation",
                lookup: "reservation token",
            })?;
        self.resolve(found)
    }

    pub async fn get_active_for_item(
        &self,
        gift_item_id: DbId,
    ) -> Result<Option<Reservation>, CoreError> {
        self.store
            .get_active_for_item(gift_item_id)
            .await?
            .map(|r| self.resolve(r))
            .transpose()
    }

    pub async fn list_for_user(
        &self,
        user_id: DbId,
        page: Pagination,
    ) -> Result<Vec<ReservationDetail>, CoreError> {
        let rows = self.store.list_for_user(user_id, page).await?;
        rows.into_iter().map(|d| self.resolve_detail(d)).collect()
    }

    pub async fn list_for_guest_token(
        &self,
        token: &str,
    ) -> Result<Vec<ReservationDetail>, CoreError> {
        validate_token_format(token)?;
        let rows = self.store.list_for_guest_token(&hash_token(token)).await?;
        rows.into_iter().map(|d| self.resolve_detail(d)).collect()
    }

    /// Number of active reservations across a wish list. Owners must confirm
    /// a list deletion when this is non-zero.
    pub async fn active_reservation_count_for_wish_list(
        &self,
        wish_list_id: DbId,
    ) -> Result<i64, CoreError> {
        Ok(self.store.count_active_for_wish_list(wish_list_id).await?)
    }

    // -- Expiry ------------------------------------------------------------

    /// Expire every guest reservation past its `expires_at`.
    ///
    /// Safe to run concurrently with itself and with reserve/cancel: each row
    /// leaves `active` through one conditional update.
    pub async fn expire_stale(&self) -> Result<usize, CoreError> {
        let expired = self.store.expire_stale(Utc::now()).await?;
        if !expired.is_empty() {
            let ids: Vec<DbId> = expired.iter().map(|r| r.id).collect();
            tracing::info!(count = expired.len(), reservation_ids = ?ids, "Expired stale guest reservations");
        }
        Ok(expired.len())
    }

    // -- Owner cascades ----------------------------------------------------

    /// Delete a gift item with its reservations, then notify the holders of
    /// the reservations that were active.
    pub async fn on_item_deleted(&self, gift_item_id: DbId) -> Result<CascadeReport, CoreError> {
        let item = self
            .items
            .get_item(gift_item_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "GiftItem",
                id: gift_item_id,
            })?;

        let active = self
            .store
            .delete_for_item_returning_active(gift_item_id)
            .await?;

        tracing::info!(
            gift_item_id,
            active_reservations = active.len(),
            "Gift item deleted"
        );

        let mut report = CascadeReport {
            removed: active.len(),
            ..Default::default()
        };
        for reservation in &active {
            self.notify_removed(reservation, &item.name, &item.wish_list_title, &mut report)
                .await;
        }
        Ok(report)
    }

    /// Delete a whole wish list, then notify every active reserver on it.
    ///
    /// Whether the owner has confirmed deleting a list with active
    /// reservations is the caller's policy; see
    /// [`ReservationEngine::active_reservation_count_for_wish_list`].
    pub async fn on_wish_list_deleted(
        &self,
        wish_list: &WishList,
    ) -> Result<CascadeReport, CoreError> {
        let removed = self
            .store
            .delete_for_wish_list_returning_active(wish_list.id)
            .await?;

        tracing::info!(
            wish_list_id = wish_list.id,
            active_reservations = removed.len(),
            "Wish list deleted"
        );

        let mut report = CascadeReport {
            removed: removed.len(),
            ..Default::default()
        };
        for entry in &removed {
            self.notify_removed(
                &entry.reservation,
                &entry.gift_item_name,
                &wish_list.title,
                &mut report,
            )
            .await;
        }
        Ok(report)
    }

    /// Record a purchase, fulfil the item's active reservation and thank its
    /// holder.
    ///
    /// The purchase record and the fulfilment commit together, so a failure
    /// leaves the item neither purchased nor with its reservation touched.
    pub async fn on_item_purchased(
        &self,
        gift_item_id: DbId,
        purchased_by: DbId,
        price_cents: Option<i64>,
    ) -> Result<PurchaseOutcome, CoreError> {
        let item = self
            .items
            .get_item(gift_item_id)
            .await?
            .ok_or(CoreError::NotFound {
                entity: "GiftItem",
                id: gift_item_id,
            })?;

        let fulfilled = self
            .store
            .purchase_and_fulfil(gift_item_id, purchased_by, price_cents, Utc::now())
            .await?;

        let Some(fulfilled) = fulfilled else {
            tracing::info!(gift_item_id, purchased_by, "Unreserved gift item purchased");
            return Ok(PurchaseOutcome {
                item,
                fulfilled: None,
                notified: false,
            });
        };

        tracing::info!(
            gift_item_id,
            purchased_by,
            reservation_id = fulfilled.id,
            "Reserved gift item purchased; reservation fulfilled"
        );

        let notified = self.notify_purchased_once(&fulfilled, &item).await;

        Ok(PurchaseOutcome {
            item,
            fulfilled: Some(self.resolve(fulfilled)?),
            notified,
        })
    }

    // -- Notification phase ------------------------------------------------

    /// Removal notice for a row that no longer exists. Rows flagged as
    /// already notified are skipped.
    async fn notify_removed(
        &self,
        reservation: &Reservation<Pii>,
        item_name: &str,
        list_title: &str,
        report: &mut CascadeReport,
    ) {
        if reservation.notification_sent {
            return;
        }
        match self.send_removed(reservation, item_name, list_title).await {
            Some(true) => report.notified += 1,
            Some(false) => report.failed += 1,
            None => {}
        }
    }

    /// Removal notice for a row that still exists; claims the flag first so
    /// concurrent callers never send twice.
    async fn notify_removed_once(
        &self,
        reservation: &Reservation<Pii>,
        item_name: &str,
        list_title: &str,
    ) {
        match self.store.claim_notification(reservation.id).await {
            Ok(true) => {
                self.send_removed(reservation, item_name, list_title).await;
            }
            Ok(false) => {}
            Err(e) => tracing::error!(
                error = %e,
                reservation_id = reservation.id,
                "Failed to claim removal notification"
            ),
        }
    }

    /// Returns `None` when there is nobody to notify, otherwise whether the
    /// send succeeded.
    async fn send_removed(
        &self,
        reservation: &Reservation<Pii>,
        item_name: &str,
        list_title: &str,
    ) -> Option<bool> {
        let contact = match self.contact_for(reservation).await {
            Ok(Some(contact)) => contact,
            Ok(None) => {
                tracing::debug!(
                    reservation_id = reservation.id,
                    "No contact address for reserver; skipping removal notice"
                );
                return None;
            }
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reservation_id = reservation.id,
                    gift_item_id = reservation.gift_item_id,
                    "Failed to resolve reserver contact"
                );
                return Some(false);
            }
        };

        match self
            .notifier
            .send_reservation_removed(&contact.email, item_name, list_title)
            .await
        {
            Ok(()) => Some(true),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    reservation_id = reservation.id,
                    gift_item_id = reservation.gift_item_id,
                    "Reservation removed notification failed"
                );
                Some(false)
            }
        }
    }

    async fn notify_purchased_once(&self, reservation: &Reservation<Pii>, item: &GiftItem) -> bool {
        match self.store.claim_notification(reservation.id).await {
            Ok(true) => {}
            Ok(false) => return false,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reservation_id = reservation.id,
                    "Failed to claim purchase notification"
                );
                return false;
            }
        }

        let contact = match self.contact_for(reservation).await {
            Ok(Some(contact)) => contact,
            Ok(None) => return false,
            Err(e) => {
                tracing::error!(
                    error = %e,
                    reservation_id = reservation.id,
                    gift_item_id = item.id,
                    "Failed to resolve reserver contact"
                );
                return false;
            }
        };

        match self
            .notifier
            .send_purchase_confirmation(
                &contact.email,
                &item.name,
                &item.wish_list_title,
                contact.guest_name.as_deref(),
            )
            .await
        {
            Ok(()) => true,
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    reservation_id = reservation.id,
                    gift_item_id = item.id,
                    "Purchase confirmation notification failed"
                );
                false
            }
        }
    }

    async fn contact_for(&self, reservation: &Reservation<Pii>) -> Result<Option<Contact>, CoreError> {
        match &reservation.reserver {
            Reserver::Guest { name, email, .. } => Ok(Some(Contact {
                email: self.cipher.open(email)?,
                guest_name: Some(self.cipher.open(name)?),
            })),
            Reserver::AuthenticatedUser { user_id } => {
                let email = self.users.email_for_user(*user_id).await?;
                Ok(email.map(|email| Contact {
                    email,
                    guest_name: None,
                }))
            }
        }
    }

    // -- PII boundary ------------------------------------------------------

    fn resolve(&self, reservation: Reservation<Pii>) -> Result<Reservation, CoreError> {
        Ok(reservation.try_map_pii(|p| self.cipher.open(&p))?)
    }

    fn resolve_detail(
        &self,
        detail: ReservationDetail<Pii>,
    ) -> Result<ReservationDetail, CoreError> {
        Ok(detail.try_map_pii(|p| self.cipher.open(&p))?)
    }
}

fn normalize_reason(reason: Option<String>) -> Result<Option<String>, CoreError> {
    let reason = reason
        .map(|r| r.trim().to_string())
        .filter(|r| !r.is_empty());
    if let Some(r) = &reason {
        if r.chars().count() > MAX_CANCEL_REASON_LENGTH {
            return Err(CoreError::Validation(format!(
                "Cancel reason must be at most {MAX_CANCEL_REASON_LENGTH} characters"
            )));
        }
    }
    Ok(reason)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::DataKey;
    use crate::memory::{MemoryBackend, RecordingNotifier, SentNotice};
    use crate::reservation::{GuestContact, ReservationStatus};
    use assert_matches::assert_matches;

    struct Fixture {
        backend: Arc<MemoryBackend>,
        notifier: Arc<RecordingNotifier>,
        engine: ReservationEngine,
        owner: DbId,
        list: DbId,
        item: DbId,
    }

    fn fixture_with(cipher: PiiCipher, settings: ReservationSettings) -> Fixture {
        let backend = Arc::new(MemoryBackend::new());
        let notifier = Arc::new(RecordingNotifier::new());
        let owner = backend.add_user("Olive", Some("olive@example.com"));
        let list = backend.add_wish_list(owner, "Birthday");
        let item = backend.add_item(list, "Teapot");
        let engine = ReservationEngine::new(
            backend.clone(),
            backend.clone(),
            backend.clone(),
            notifier.clone(),
            cipher,
            settings,
        );
        Fixture {
            backend,
            notifier,
            engine,
            owner,
            list,
            item,
        }
    }

    fn fixture() -> Fixture {
        let cipher = PiiCipher::new(&DataKey::generate()).unwrap();
        fixture_with(cipher, ReservationSettings::default())
    }

    fn guest(name: &str, email: &str) -> Actor {
        Actor::Guest(GuestContact::parse(Some(name), Some(email)).unwrap())
    }

    #[tokio::test]
    async fn guest_reservation_returns_token_and_encrypts_contact() {
        let f = fixture();

        let reserved = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let token = reserved.reservation_token.expect("guest gets a token");
        assert_eq!(reserved.reservation.status, ReservationStatus::Active);
        assert!(reserved.reservation.expires_at.is_some());
        assert_matches!(
            &reserved.reservation.reserver,
            Reserver::Guest { name, email, .. } if name == "Ann" && email == "ann@example.com"
        );

        let stored = f.backend.reservations_for_item(f.item);
        assert_matches!(
            &stored[0].reserver,
            Reserver::Guest { name, email, token_hash }
                if name.is_encrypted() && email.is_encrypted() && *token_hash == hash_token(&token)
        );

        let found = f.engine.get_by_token(&token).await.unwrap();
        assert_eq!(found.id, reserved.reservation.id);
    }

    #[tokio::test]
    async fn user_reservation_has_no_token_or_expiry() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));

        let reserved = f
            .engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();

        assert!(reserved.reservation_token.is_none());
        assert!(reserved.reservation.expires_at.is_none());
        assert_eq!(reserved.reservation.reserver.user_id(), Some(bob));
    }

    #[tokio::test]
    async fn second_reservation_conflicts() {
        let f = fixture();
        f.engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let err = f
            .engine
            .reserve(f.item, guest("Ben", "ben@example.com"))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(msg) if msg == "This gift has already been reserved");
    }

    #[tokio::test]
    async fn reserving_missing_item_is_not_found() {
        let f = fixture();
        let err = f
            .engine
            .reserve(9999, guest("Ann", "ann@example.com"))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "GiftItem", id: 9999 });
    }

    #[tokio::test]
    async fn concurrent_reserves_have_exactly_one_winner() {
        let f = fixture();

        let attempts = (0..20).map(|i| {
            let engine = f.engine.clone();
            let item = f.item;
            async move {
                engine
                    .reserve(item, guest(&format!("Guest {i}"), &format!("g{i}@example.com")))
                    .await
            }
        });
        let results = futures::future::join_all(attempts).await;

        let winners = results.iter().filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
        for result in results.iter().filter(|r| r.is_err()) {
            assert_matches!(result, Err(CoreError::Conflict(_)));
        }
        assert_eq!(f.backend.reservations_for_item(f.item).len(), 1);
    }

    #[tokio::test]
    async fn guest_cancel_is_idempotent_and_frees_the_item() {
        let f = fixture();
        let token = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap()
            .reservation_token
            .unwrap();

        let first = f
            .engine
            .cancel(ReservationLookup::Token(token.clone()), Some("  changed my mind ".into()))
            .await
            .unwrap();
        assert_eq!(first.status, ReservationStatus::Cancelled);
        assert_eq!(first.cancel_reason.as_deref(), Some("changed my mind"));

        let second = f
            .engine
            .cancel(ReservationLookup::Token(token), None)
            .await
            .unwrap();
        assert_eq!(second.status, ReservationStatus::Cancelled);
        assert_eq!(second.cancelled_at, first.cancelled_at);
        assert_eq!(second.cancel_reason, first.cancel_reason);

        f.engine
            .reserve(f.item, guest("Ben", "ben@example.com"))
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn unknown_or_malformed_tokens_are_rejected() {
        let f = fixture();

        let err = f
            .engine
            .cancel(ReservationLookup::Token(generate_token()), None)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFoundBy { entity: "Reservation", .. });

        let err = f.engine.get_by_token("nope").await.unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[tokio::test]
    async fn token_only_reaches_its_own_reservation() {
        let f = fixture();
        let other_item = f.backend.add_item(f.list, "Kettle");

        let ann = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();
        let ben = f
            .engine
            .reserve(other_item, guest("Ben", "ben@example.com"))
            .await
            .unwrap();
        let ann_token = ann.reservation_token.unwrap();

        let listed = f.engine.list_for_guest_token(&ann_token).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].reservation.id, ann.reservation.id);
        assert_eq!(listed[0].gift_item_name, "Teapot");
        assert_eq!(listed[0].owner_name, "Olive");

        f.engine
            .cancel(ReservationLookup::Token(ann_token), None)
            .await
            .unwrap();
        let still_held = f.engine.get_active_for_item(other_item).await.unwrap();
        assert_eq!(still_held.map(|r| r.id), Some(ben.reservation.id));
    }

    #[tokio::test]
    async fn stranger_cannot_cancel_by_id() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        let mallory = f.backend.add_user("Mallory", None);
        let reserved = f
            .engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();

        let err = f
            .engine
            .cancel(
                ReservationLookup::Id {
                    id: reserved.reservation.id,
                    user_id: mallory,
                },
                None,
            )
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Forbidden(_));
    }

    #[tokio::test]
    async fn reserver_cancel_sends_no_notice() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        let reserved = f
            .engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();

        let cancelled = f
            .engine
            .cancel(
                ReservationLookup::Id {
                    id: reserved.reservation.id,
                    user_id: bob,
                },
                None,
            )
            .await
            .unwrap();
        assert_eq!(cancelled.status, ReservationStatus::Cancelled);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn owner_cancel_notifies_reserver_once() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        let reserved = f
            .engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();
        let lookup = ReservationLookup::Id {
            id: reserved.reservation.id,
            user_id: f.owner,
        };

        f.engine.cancel(lookup.clone(), None).await.unwrap();
        f.engine.cancel(lookup, None).await.unwrap();

        assert_eq!(
            f.notifier.sent(),
            vec![SentNotice::ReservationRemoved {
                email: "bob@example.com".into(),
                item_name: "Teapot".into(),
                list_title: "Birthday".into(),
            }]
        );
    }

    #[tokio::test]
    async fn overlong_cancel_reason_is_rejected() {
        let f = fixture();
        let token = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap()
            .reservation_token
            .unwrap();

        let err = f
            .engine
            .cancel(
                ReservationLookup::Token(token),
                Some("x".repeat(MAX_CANCEL_REASON_LENGTH + 1)),
            )
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Validation(_));
    }

    #[tokio::test]
    async fn expiry_sweep_only_touches_lapsed_guest_reservations() {
        let cipher = PiiCipher::new(&DataKey::generate()).unwrap();
        let f = fixture_with(
            cipher,
            ReservationSettings {
                guest_ttl: chrono::Duration::seconds(-1),
            },
        );
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        let other_item = f.backend.add_item(f.list, "Kettle");

        let ann = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();
        f.engine
            .reserve(other_item, Actor::User { user_id: bob })
            .await
            .unwrap();

        assert_eq!(f.engine.expire_stale().await.unwrap(), 1);
        assert_eq!(f.engine.expire_stale().await.unwrap(), 0);

        let expired = f
            .engine
            .get_by_token(&ann.reservation_token.unwrap())
            .await
            .unwrap();
        assert_eq!(expired.status, ReservationStatus::Expired);
        assert!(f.engine.get_active_for_item(other_item).await.unwrap().is_some());

        f.engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn item_deletion_notifies_only_the_active_reserver() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));

        let earlier = f
            .engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();
        f.engine
            .cancel(
                ReservationLookup::Id {
                    id: earlier.reservation.id,
                    user_id: bob,
                },
                None,
            )
            .await
            .unwrap();
        f.engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let report = f.engine.on_item_deleted(f.item).await.unwrap();

        assert_eq!(
            report,
            CascadeReport {
                removed: 1,
                notified: 1,
                failed: 0
            }
        );
        assert_eq!(
            f.notifier.sent(),
            vec![SentNotice::ReservationRemoved {
                email: "ann@example.com".into(),
                item_name: "Teapot".into(),
                list_title: "Birthday".into(),
            }]
        );
        assert!(!f.backend.item_exists(f.item));
        assert!(f.backend.reservations_for_item(f.item).is_empty());
    }

    #[tokio::test]
    async fn deleting_unknown_item_is_not_found() {
        let f = fixture();
        let err = f.engine.on_item_deleted(4242).await.unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "GiftItem", .. });
    }

    #[tokio::test]
    async fn failed_notification_does_not_fail_the_cascade() {
        let f = fixture();
        f.engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();
        f.notifier.set_failing(true);

        let report = f.engine.on_item_deleted(f.item).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(report.notified, 0);
        assert_eq!(report.failed, 1);
        assert!(!f.backend.item_exists(f.item));
    }

    #[tokio::test]
    async fn wish_list_deletion_notifies_every_active_reserver() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        let kettle = f.backend.add_item(f.list, "Kettle");
        f.engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();
        f.engine
            .reserve(kettle, Actor::User { user_id: bob })
            .await
            .unwrap();

        assert_eq!(
            f.engine
                .active_reservation_count_for_wish_list(f.list)
                .await
                .unwrap(),
            2
        );

        let list = f.engine.items().get_wish_list(f.list).await.unwrap().unwrap();
        let report = f.engine.on_wish_list_deleted(&list).await.unwrap();

        assert_eq!(report.removed, 2);
        assert_eq!(report.notified, 2);
        let sent = f.notifier.sent();
        assert!(sent.contains(&SentNotice::ReservationRemoved {
            email: "bob@example.com".into(),
            item_name: "Kettle".into(),
            list_title: "Birthday".into(),
        }));
        assert!(sent.contains(&SentNotice::ReservationRemoved {
            email: "ann@example.com".into(),
            item_name: "Teapot".into(),
            list_title: "Birthday".into(),
        }));
        assert!(!f.backend.item_exists(kettle));
    }

    #[tokio::test]
    async fn wish_list_deletion_names_items_added_after_the_list_was_read() {
        let f = fixture();
        let list = f.engine.items().get_wish_list(f.list).await.unwrap().unwrap();

        let mixer = f.backend.add_item(f.list, "Mixer");
        f.engine
            .reserve(mixer, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let report = f.engine.on_wish_list_deleted(&list).await.unwrap();

        assert_eq!(report.removed, 1);
        assert_eq!(
            f.notifier.sent(),
            vec![SentNotice::ReservationRemoved {
                email: "ann@example.com".into(),
                item_name: "Mixer".into(),
                list_title: "Birthday".into(),
            }]
        );
    }

    #[tokio::test]
    async fn purchase_fulfils_reservation_and_thanks_guest() {
        let f = fixture();
        f.engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let outcome = f
            .engine
            .on_item_purchased(f.item, f.owner, Some(2599))
            .await
            .unwrap();

        let fulfilled = outcome.fulfilled.expect("reservation fulfilled");
        assert_eq!(fulfilled.status, ReservationStatus::Fulfilled);
        assert!(outcome.notified);
        assert_eq!(f.backend.purchase_of(f.item), Some((f.owner, Some(2599))));
        assert_eq!(
            f.notifier.sent(),
            vec![SentNotice::PurchaseConfirmation {
                email: "ann@example.com".into(),
                item_name: "Teapot".into(),
                list_title: "Birthday".into(),
                guest_name: Some("Ann".into()),
            }]
        );

        let err = f
            .engine
            .reserve(f.item, guest("Ben", "ben@example.com"))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(msg) if msg == "This gift has already been purchased");

        let err = f
            .engine
            .on_item_purchased(f.item, f.owner, None)
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::Conflict(_));
        assert_eq!(f.backend.purchase_of(f.item), Some((f.owner, Some(2599))));
        assert_eq!(f.notifier.sent().len(), 1);
    }

    #[tokio::test]
    async fn purchase_of_missing_item_records_nothing() {
        let f = fixture();
        let err = f
            .engine
            .on_item_purchased(9999, f.owner, Some(100))
            .await
            .unwrap_err();
        assert_matches!(err, CoreError::NotFound { entity: "GiftItem", id: 9999 });
        assert_eq!(f.backend.purchase_of(9999), None);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn purchasing_unreserved_item_sends_nothing() {
        let f = fixture();
        let outcome = f
            .engine
            .on_item_purchased(f.item, f.owner, None)
            .await
            .unwrap();
        assert!(outcome.fulfilled.is_none());
        assert!(!outcome.notified);
        assert!(f.notifier.sent().is_empty());
    }

    #[tokio::test]
    async fn disabled_cipher_stores_plaintext() {
        let f = fixture_with(PiiCipher::disabled(), ReservationSettings::default());
        let reserved = f
            .engine
            .reserve(f.item, guest("Ann", "ann@example.com"))
            .await
            .unwrap();

        let stored = f.backend.reservations_for_item(f.item);
        assert_matches!(
            &stored[0].reserver,
            Reserver::Guest { name: Pii::Plain(name), .. } if name == "Ann"
        );
        assert_matches!(
            &reserved.reservation.reserver,
            Reserver::Guest { email, .. } if email == "ann@example.com"
        );
    }

    #[tokio::test]
    async fn user_listing_includes_item_context() {
        let f = fixture();
        let bob = f.backend.add_user("Bob", Some("bob@example.com"));
        f.engine
            .reserve(f.item, Actor::User { user_id: bob })
            .await
            .unwrap();

        let mine = f
            .engine
            .list_for_user(bob, Pagination::default())
            .await
            .unwrap();
        assert_eq!(mine.len(), 1);
        assert_eq!(mine[0].wish_list_title, "Birthday");
        assert_eq!(mine[0].owner_id, f.owner);

        let none = f
            .engine
            .list_for_user(f.owner, Pagination::default())
            .await
            .unwrap();
        assert!(none.is_empty());
    }
}
