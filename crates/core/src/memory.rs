//! Single-process backend implementing the store and directory traits over
//! one mutex-guarded state, plus a notifier that records what it was asked
//! to send.
//!
//! Only compiled for tests, or for other crates' tests through the
//! `test-support` feature.
//! Each operation takes the lock once, which gives the same all-or-nothing
//! behaviour the Postgres transactions provide.

use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use crate::crypto::{Pii, PiiCipher};
use crate::directory::{GiftItem, GiftItemDirectory, UserDirectory, WishList};
use crate::notify::{NotifyError, ReservationNotifier};
use crate::reservation::{
    NewReservation, Reservation, ReservationDetail, ReservationStatus, Reserver,
};
use crate::store::{
    Pagination, RemovedReservation, ReservationStore, ReservationTarget, StatusTransition,
    StoreError,
};
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
struct MemoryUser {
    name: String,
    email: Option<Pii>,
}

#[derive(Debug, Clone)]
struct MemoryItem {
    name: String,
    wish_list_id: DbId,
    purchase: Option<Purchase>,
}

#[derive(Debug, Clone)]
struct Purchase {
    buyer_id: DbId,
    price_cents: Option<i64>,
}

#[derive(Debug, Default)]
struct MemoryState {
    next_id: DbId,
    users: HashMap<DbId, MemoryUser>,
    lists: HashMap<DbId, WishList>,
    items: HashMap<DbId, MemoryItem>,
    reservations: BTreeMap<DbId, Reservation<Pii>>,
}

impl MemoryState {
    fn next_id(&mut self) -> DbId {
        self.next_id += 1;
        self.next_id
    }

    fn gift_item(&self, id: DbId) -> Option<GiftItem> {
        let item = self.items.get(&id)?;
        let list = self.lists.get(&item.wish_list_id)?;
        Some(GiftItem {
            id,
            name: item.name.clone(),
            owner_id: list.owner_id,
            wish_list_id: list.id,
            wish_list_title: list.title.clone(),
        })
    }

    fn detail(&self, reservation: &Reservation<Pii>) -> Option<ReservationDetail<Pii>> {
        let item = self.gift_item(reservation.gift_item_id)?;
        let owner_name = self
            .users
            .get(&item.owner_id)
            .map(|u| u.name.clone())
            .unwrap_or_default();
        Some(ReservationDetail {
            reservation: reservation.clone(),
            gift_item_name: item.name,
            wish_list_id: item.wish_list_id,
            wish_list_title: item.wish_list_title,
            owner_id: item.owner_id,
            owner_name,
        })
    }

    fn apply_transition(
        &mut self,
        target: &ReservationTarget,
        transition: StatusTransition,
    ) -> Option<Reservation<Pii>> {
        let id = self.find_active_id(target)?;
        let row = self.reservations.get_mut(&id)?;
        row.status = transition.status;
        if transition.status == ReservationStatus::Cancelled {
            row.cancelled_at = Some(transition.at);
            row.cancel_reason = transition.reason;
        }
        Some(row.clone())
    }

    fn find_active_id(&self, target: &ReservationTarget) -> Option<DbId> {
        self.reservations
            .values()
            .find(|r| {
                r.is_active()
                    && match target {
                        ReservationTarget::Id(id) => r.id == *id,
                        ReservationTarget::TokenHash(hash) => token_hash_of(r) == Some(hash),
                        ReservationTarget::ActiveForItem(item_id) => r.gift_item_id == *item_id,
                    }
            })
            .map(|r| r.id)
    }
}

fn token_hash_of(reservation: &Reservation<Pii>) -> Option<&String> {
    match &reservation.reserver {
        Reserver::Guest { token_hash, .. } => Some(token_hash),
        Reserver::AuthenticatedUser { .. } => None,
    }
}

// ---------------------------------------------------------------------------
// Backend
// ---------------------------------------------------------------------------

/// In-process implementation of [`ReservationStore`], [`GiftItemDirectory`]
/// and [`UserDirectory`].
#[derive(Debug, Default)]
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
    /// Seals user emails the way the `users` table would hold them.
    cipher: Option<PiiCipher>,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store user emails encrypted with `cipher`.
    pub fn with_cipher(cipher: PiiCipher) -> Self {
        Self {
            state: Mutex::default(),
            cipher: Some(cipher),
        }
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Seed a user. Returns its id.
    pub fn add_user(&self, name: &str, email: Option<&str>) -> DbId {
        let email = email.map(|e| match &self.cipher {
            Some(cipher) => cipher.seal(e).unwrap_or_else(|_| Pii::Plain(e.to_string())),
            None => Pii::Plain(e.to_string()),
        });
        let mut state = self.lock();
        let id = state.next_id();
        state.users.insert(
            id,
            MemoryUser {
                name: name.to_string(),
                email,
            },
        );
        id
    }

    /// Seed a wish list. Returns its id.
    pub fn add_wish_list(&self, owner_id: DbId, title: &str) -> DbId {
        let mut state = self.lock();
        let id = state.next_id();
        state.lists.insert(
            id,
            WishList {
                id,
                title: title.to_string(),
                owner_id,
            },
        );
        id
    }

    /// Seed a gift item on a wish list. Returns its id.
    pub fn add_item(&self, wish_list_id: DbId, name: &str) -> DbId {
        let mut state = self.lock();
        let id = state.next_id();
        state.items.insert(
            id,
            MemoryItem {
                name: name.to_string(),
                wish_list_id,
                purchase: None,
            },
        );
        id
    }

    /// Raw stored rows for an item, including terminal ones.
    pub fn reservations_for_item(&self, gift_item_id: DbId) -> Vec<Reservation<Pii>> {
        self.lock()
            .reservations
            .values()
            .filter(|r| r.gift_item_id == gift_item_id)
            .cloned()
            .collect()
    }

    /// Buyer and price recorded by `purchase_and_fulfil`, if any.
    pub fn purchase_of(&self, gift_item_id: DbId) -> Option<(DbId, Option<i64>)> {
        self.lock()
            .items
            .get(&gift_item_id)
            .and_then(|item| item.purchase.as_ref())
            .map(|p| (p.buyer_id, p.price_cents))
    }

    pub fn item_exists(&self, gift_item_id: DbId) -> bool {
        self.lock().items.contains_key(&gift_item_id)
    }
}

#[async_trait]
impl ReservationStore for MemoryBackend {
    async fn reserve_if_available(
        &self,
        new: NewReservation,
    ) -> Result<Reservation<Pii>, StoreError> {
        let mut state = self.lock();
        let gift_item_id = new.gift_item_id;

        let item = state
            .items
            .get(&gift_item_id)
            .ok_or(StoreError::ItemNotFound { gift_item_id })?;
        if item.purchase.is_some() {
            return Err(StoreError::AlreadyPurchased { gift_item_id });
        }
        if state
            .reservations
            .values()
            .any(|r| r.gift_item_id == gift_item_id && r.is_active())
        {
            return Err(StoreError::AlreadyReserved { gift_item_id });
        }

        let id = state.next_id();
        let reservation = Reservation {
            id,
            gift_item_id,
            reserver: new.reserver,
            status: ReservationStatus::Active,
            reserved_at: new.reserved_at,
            expires_at: new.expires_at,
            cancelled_at: None,
            cancel_reason: None,
            notification_sent: false,
        };
        state.reservations.insert(id, reservation.clone());
        Ok(reservation)
    }

    async fn get_active_for_item(
        &self,
        gift_item_id: DbId,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        Ok(self
            .lock()
            .reservations
            .values()
            .find(|r| r.gift_item_id == gift_item_id && r.is_active())
            .cloned())
    }

    async fn get_by_id(&self, id: DbId) -> Result<Option<Reservation<Pii>>, StoreError> {
        Ok(self.lock().reservations.get(&id).cloned())
    }

    async fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        Ok(self
            .lock()
            .reservations
            .values()
            .find(|r| token_hash_of(r).map(String::as_str) == Some(token_hash))
            .cloned())
    }

    async fn update_status(
        &self,
        target: ReservationTarget,
        transition: StatusTransition,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        Ok(self.lock().apply_transition(&target, transition))
    }

    async fn purchase_and_fulfil(
        &self,
        gift_item_id: DbId,
        purchased_by: DbId,
        price_cents: Option<i64>,
        at: Timestamp,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        let mut state = self.lock();
        let item = state
            .items
            .get_mut(&gift_item_id)
            .ok_or(StoreError::ItemNotFound { gift_item_id })?;
        if item.purchase.is_some() {
            return Err(StoreError::AlreadyPurchased { gift_item_id });
        }
        item.purchase = Some(Purchase {
            buyer_id: purchased_by,
            price_cents,
        });
        Ok(state.apply_transition(
            &ReservationTarget::ActiveForItem(gift_item_id),
            StatusTransition::fulfilled(at),
        ))
    }

    async fn expire_stale(&self, now: Timestamp) -> Result<Vec<Reservation<Pii>>, StoreError> {
        let mut state = self.lock();
        let mut expired = Vec::new();
        for row in state.reservations.values_mut() {
            let stale = row.is_active()
                && row.reserver.is_guest()
                && row.expires_at.is_some_and(|at| at < now);
            if stale {
                row.status = ReservationStatus::Expired;
                expired.push(row.clone());
            }
        }
        Ok(expired)
    }

    async fn claim_notification(&self, id: DbId) -> Result<bool, StoreError> {
        let mut state = self.lock();
        match state.reservations.get_mut(&id) {
            Some(row) if !row.notification_sent => {
                row.notification_sent = true;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        page: Pagination,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError> {
        let state = self.lock();
        let mut rows: Vec<&Reservation<Pii>> = state
            .reservations
            .values()
            .filter(|r| r.reserver.user_id() == Some(user_id))
            .collect();
        rows.sort_by(|a, b| b.reserved_at.cmp(&a.reserved_at).then(b.id.cmp(&a.id)));
        Ok(rows
            .into_iter()
            .skip(page.offset as usize)
            .take(page.limit as usize)
            .filter_map(|r| state.detail(r))
            .collect())
    }

    async fn list_for_guest_token(
        &self,
        token_hash: &str,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError> {
        let state = self.lock();
        Ok(state
            .reservations
            .values()
            .filter(|r| token_hash_of(r).map(String::as_str) == Some(token_hash))
            .filter_map(|r| state.detail(r))
            .collect())
    }

    async fn delete_for_item_returning_active(
        &self,
        gift_item_id: DbId,
    ) -> Result<Vec<Reservation<Pii>>, StoreError> {
        let mut state = self.lock();
        if state.items.remove(&gift_item_id).is_none() {
            return Err(StoreError::ItemNotFound { gift_item_id });
        }
        let mut active = Vec::new();
        state.reservations.retain(|_, r| {
            if r.gift_item_id != gift_item_id {
                return true;
            }
            if r.is_active() {
                active.push(r.clone());
            }
            false
        });
        Ok(active)
    }

    async fn delete_for_wish_list_returning_active(
        &self,
        wish_list_id: DbId,
    ) -> Result<Vec<RemovedReservation>, StoreError> {
        let mut state = self.lock();
        state.lists.remove(&wish_list_id);
        let names: HashMap<DbId, String> = state
            .items
            .iter()
            .filter(|(_, item)| item.wish_list_id == wish_list_id)
            .map(|(id, item)| (*id, item.name.clone()))
            .collect();
        state.items.retain(|id, _| !names.contains_key(id));
        let mut active = Vec::new();
        state.reservations.retain(|_, r| {
            let Some(name) = names.get(&r.gift_item_id) else {
                return true;
            };
            if r.is_active() {
                active.push(RemovedReservation {
                    reservation: r.clone(),
                    gift_item_name: name.clone(),
                });
            }
            false
        });
        Ok(active)
    }

    async fn count_active_for_wish_list(&self, wish_list_id: DbId) -> Result<i64, StoreError> {
        let state = self.lock();
        let count = state
            .reservations
            .values()
            .filter(|r| {
                r.is_active()
                    && state
                        .items
                        .get(&r.gift_item_id)
                        .is_some_and(|item| item.wish_list_id == wish_list_id)
            })
            .count();
        Ok(count as i64)
    }
}

#[async_trait]
impl GiftItemDirectory for MemoryBackend {
    async fn get_item(&self, id: DbId) -> Result<Option<GiftItem>, StoreError> {
        Ok(self.lock().gift_item(id))
    }

    async fn get_wish_list(&self, id: DbId) -> Result<Option<WishList>, StoreError> {
        Ok(self.lock().lists.get(&id).cloned())
    }
}

#[async_trait]
impl UserDirectory for MemoryBackend {
    async fn email_for_user(&self, user_id: DbId) -> Result<Option<String>, StoreError> {
        let email = self
            .lock()
            .users
            .get(&user_id)
            .and_then(|u| u.email.clone());
        match (email, &self.cipher) {
            (None, _) => Ok(None),
            (Some(Pii::Plain(text)), _) => Ok(Some(text)),
            (Some(sealed), Some(cipher)) => cipher
                .open(&sealed)
                .map(Some)
                .map_err(|e| StoreError::Backend(e.to_string())),
            (Some(_), None) => Err(StoreError::Backend(
                "encrypted user email without a cipher".into(),
            )),
        }
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

/// A notification request captured by [`RecordingNotifier`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SentNotice {
    ReservationRemoved {
        email: String,
        item_name: String,
        list_title: String,
    },
    PurchaseConfirmation {
        email: String,
        item_name: String,
        list_title: String,
        guest_name: Option<String>,
    },
}

/// Notifier that records every request. Can be switched to fail.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<SentNotice>>,
    failing: AtomicBool,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent send fail (requests are still recorded).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn sent(&self) -> Vec<SentNotice> {
        self.sent.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    fn record(&self, notice: SentNotice) -> Result<(), NotifyError> {
        self.sent
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(notice);
        if self.failing.load(Ordering::SeqCst) {
            return Err(NotifyError("smtp unavailable".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl ReservationNotifier for RecordingNotifier {
    async fn send_reservation_removed(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
    ) -> Result<(), NotifyError> {
        self.record(SentNotice::ReservationRemoved {
            email: email.to_string(),
            item_name: item_name.to_string(),
            list_title: list_title.to_string(),
        })
    }

    async fn send_purchase_confirmation(
        &self,
        email: &str,
        item_name: &str,
        list_title: &str,
        guest_name: Option<&str>,
    ) -> Result<(), NotifyError> {
        self.record(SentNotice::PurchaseConfirmation {
            email: email.to_string(),
            item_name: item_name.to_string(),
            list_title: list_title.to_string(),
            guest_name: guest_name.map(str::to_string),
        })
    }
}
