//! The reservation store contract.
//!
//! A `ReservationStore` owns durable persistence of reservation rows and the
//! one operation that must be atomic: [`ReservationStore::reserve_if_available`].
//! Every status change is a single conditional update guarded by
//! `status = active`, so racing cancels, expiry sweeps and fulfilments
//! resolve by commit order without any application-level lock.
//!
//! Implementations must be `Send + Sync + 'static` so they can live in axum
//! application state behind an `Arc<dyn ReservationStore>`.

use async_trait::async_trait;

use crate::crypto::Pii;
use crate::error::CoreError;
use crate::reservation::{NewReservation, Reservation, ReservationDetail, ReservationStatus};
use crate::types::{DbId, Timestamp};

/// Default page size for reservation listings.
pub const DEFAULT_PAGE_LIMIT: i64 = 50;

/// Maximum page size for reservation listings.
pub const MAX_PAGE_LIMIT: i64 = 100;

/// Errors surfaced by a store implementation.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The gift item does not exist (or was deleted).
    #[error("gift item {gift_item_id} not found")]
    ItemNotFound { gift_item_id: DbId },

    /// Another active reservation already holds the item.
    #[error("gift item {gift_item_id} is already reserved")]
    AlreadyReserved { gift_item_id: DbId },

    /// The item has a purchase record and can no longer be reserved.
    #[error("gift item {gift_item_id} has already been purchased")]
    AlreadyPurchased { gift_item_id: DbId },

    /// A backend failure (connection loss, constraint violation, bad row).
    #[error("storage backend error: {0}")]
    Backend(String),
}

impl From<StoreError> for CoreError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::ItemNotFound { gift_item_id } => CoreError::NotFound {
                entity: "GiftItem",
                id: gift_item_id,
            },
            StoreError::AlreadyReserved { .. } => {
                CoreError::Conflict("This gift has already been reserved".into())
            }
            StoreError::AlreadyPurchased { .. } => {
                CoreError::Conflict("This gift has already been purchased".into())
            }
            StoreError::Backend(msg) => CoreError::Internal(msg),
        }
    }
}

/// Which reservation a status transition applies to.
#[derive(Debug, Clone)]
pub enum ReservationTarget {
    Id(DbId),
    TokenHash(String),
    /// The (single) active reservation on a gift item.
    ActiveForItem(DbId),
}

/// A move out of `active` into a terminal status.
#[derive(Debug, Clone)]
pub struct StatusTransition {
    pub status: ReservationStatus,
    pub at: Timestamp,
    pub reason: Option<String>,
}

impl StatusTransition {
    pub fn cancelled(at: Timestamp, reason: Option<String>) -> Self {
        Self {
            status: ReservationStatus::Cancelled,
            at,
            reason,
        }
    }

    pub fn fulfilled(at: Timestamp) -> Self {
        Self {
            status: ReservationStatus::Fulfilled,
            at,
            reason: None,
        }
    }
}

/// An active reservation removed by a delete cascade, with the name its item
/// had when the cascade locked it.
#[derive(Debug, Clone)]
pub struct RemovedReservation {
    pub reservation: Reservation<Pii>,
    pub gift_item_name: String,
}

/// Limit/offset pagination with clamped defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pagination {
    pub limit: i64,
    pub offset: i64,
}

impl Pagination {
    pub fn new(limit: Option<i64>, offset: Option<i64>) -> Self {
        Self {
            limit: limit.unwrap_or(DEFAULT_PAGE_LIMIT).clamp(1, MAX_PAGE_LIMIT),
            offset: offset.unwrap_or(0).max(0),
        }
    }
}

impl Default for Pagination {
    fn default() -> Self {
        Self::new(None, None)
    }
}

/// Durable, race-free persistence of reservations.
#[async_trait]
pub trait ReservationStore: Send + Sync + 'static {
    /// Insert `new` as the active reservation of its item, or fail.
    ///
    /// Concurrent calls for the same item serialize on the item row: exactly
    /// one succeeds, the rest get [`StoreError::AlreadyReserved`]. Calls for
    /// different items never block each other. No other path may create an
    /// active reservation.
    async fn reserve_if_available(
        &self,
        new: NewReservation,
    ) -> Result<Reservation<Pii>, StoreError>;

    async fn get_active_for_item(
        &self,
        gift_item_id: DbId,
    ) -> Result<Option<Reservation<Pii>>, StoreError>;

    async fn get_by_id(&self, id: DbId) -> Result<Option<Reservation<Pii>>, StoreError>;

    async fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Reservation<Pii>>, StoreError>;

    /// Atomically move an active reservation to a terminal status.
    ///
    /// Returns the updated row, or `None` when no *active* reservation
    /// matched `target` (missing, or already terminal).
    async fn update_status(
        &self,
        target: ReservationTarget,
        transition: StatusTransition,
    ) -> Result<Option<Reservation<Pii>>, StoreError>;

    /// Record a purchase of the item and fulfil its active reservation in one
    /// atomic step.
    ///
    /// Fails with [`StoreError::ItemNotFound`] or
    /// [`StoreError::AlreadyPurchased`] without changing anything. Returns the
    /// fulfilled reservation, or `None` when the item was not reserved.
    async fn purchase_and_fulfil(
        &self,
        gift_item_id: DbId,
        purchased_by: DbId,
        price_cents: Option<i64>,
        at: Timestamp,
    ) -> Result<Option<Reservation<Pii>>, StoreError>;

    /// Expire every active guest reservation whose `expires_at` is before `now`.
    async fn expire_stale(&self, now: Timestamp) -> Result<Vec<Reservation<Pii>>, StoreError>;

    /// Flip `notification_sent` from false to true. Returns `true` for the
    /// single caller that performed the flip.
    async fn claim_notification(&self, id: DbId) -> Result<bool, StoreError>;

    async fn list_for_user(
        &self,
        user_id: DbId,
        page: Pagination,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError>;

    async fn list_for_guest_token(
        &self,
        token_hash: &str,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError>;

    /// Delete a gift item together with all its reservations in one
    /// transaction, returning the reservations that were active.
    async fn delete_for_item_returning_active(
        &self,
        gift_item_id: DbId,
    ) -> Result<Vec<Reservation<Pii>>, StoreError>;

    /// Delete a wish list, its items and their reservations in one
    /// transaction, returning the reservations that were active together
    /// with their item names.
    async fn delete_for_wish_list_returning_active(
        &self,
        wish_list_id: DbId,
    ) -> Result<Vec<RemovedReservation>, StoreError>;

    async fn count_active_for_wish_list(&self, wish_list_id: DbId) -> Result<i64, StoreError>;
}
