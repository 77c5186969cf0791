//! PostgreSQL implementation of the core store and directory traits.
//!
//! Mutual exclusion for reserve and delete comes from locking the gift item
//! row inside a transaction; the partial unique index
//! `uq_reservations_active_item` backs it up at the schema level.

use std::collections::HashMap;

use async_trait::async_trait;
use giftreg_core::crypto::{
    unwrap_data_key, wrap_data_key, CryptoError, DataKey, DataKeyProvider, Pii, PiiCipher,
};
use giftreg_core::directory::{GiftItem, GiftItemDirectory, UserDirectory, WishList};
use giftreg_core::reservation::{
    NewReservation, Reservation, ReservationDetail, ReservationStatus,
};
use giftreg_core::store::{
    Pagination, RemovedReservation, ReservationStore, ReservationTarget, StatusTransition,
    StoreError,
};
use giftreg_core::types::{DbId, Timestamp};
use sqlx::PgConnection;

use crate::models::reservation::{CreateReservation, ReservationDetailRow, ReservationRow};
use crate::repositories::{DataKeyRepo, GiftItemRepo, ReservationRepo, UserRepo, WishListRepo};
use crate::DbPool;

const ACTIVE_ITEM_CONSTRAINT: &str = "uq_reservations_active_item";

fn backend_error(err: sqlx::Error) -> StoreError {
    StoreError::Backend(err.to_string())
}

fn is_unique_violation(err: &sqlx::Error, constraint: &str) -> bool {
    match err {
        sqlx::Error::Database(db_err) => {
            db_err.code().as_deref() == Some("23505") && db_err.constraint() == Some(constraint)
        }
        _ => false,
    }
}

fn to_domain(rows: Vec<ReservationRow>) -> Result<Vec<Reservation<Pii>>, StoreError> {
    rows.into_iter().map(Reservation::try_from).collect()
}

fn to_detail(rows: Vec<ReservationDetailRow>) -> Result<Vec<ReservationDetail<Pii>>, StoreError> {
    rows.into_iter().map(ReservationDetail::try_from).collect()
}

fn only_active(rows: Vec<ReservationRow>) -> Result<Vec<Reservation<Pii>>, StoreError> {
    Ok(to_domain(rows)?.into_iter().filter(Reservation::is_active).collect())
}

/// Run one conditional status update on an open connection or transaction.
async fn apply_transition(
    conn: &mut PgConnection,
    target: &ReservationTarget,
    transition: &StatusTransition,
) -> Result<Option<Reservation<Pii>>, StoreError> {
    let cancelled_at =
        (transition.status == ReservationStatus::Cancelled).then_some(transition.at);
    ReservationRepo::transition(
        conn,
        target,
        transition.status,
        cancelled_at,
        transition.reason.as_deref(),
    )
    .await
    .map_err(backend_error)?
    .map(Reservation::try_from)
    .transpose()
}

/// Store, item directory and user directory over one pool.
#[derive(Clone)]
pub struct PgBackend {
    pool: DbPool,
    /// Decrypts `users.email_encrypted`.
    cipher: PiiCipher,
}

impl PgBackend {
    pub fn new(pool: DbPool, cipher: PiiCipher) -> Self {
        Self { pool, cipher }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait]
impl ReservationStore for PgBackend {
    async fn reserve_if_available(
        &self,
        new: NewReservation,
    ) -> Result<Reservation<Pii>, StoreError> {
        let gift_item_id = new.gift_item_id;
        let input = CreateReservation::from(new);

        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let purchased = GiftItemRepo::lock(&mut tx, gift_item_id)
            .await
            .map_err(backend_error)?
            .ok_or(StoreError::ItemNotFound { gift_item_id })?;
        if purchased {
            return Err(StoreError::AlreadyPurchased { gift_item_id });
        }
        if ReservationRepo::has_active(&mut tx, gift_item_id)
            .await
            .map_err(backend_error)?
        {
            return Err(StoreError::AlreadyReserved { gift_item_id });
        }

        let row = ReservationRepo::insert(&mut tx, &input)
            .await
            .map_err(|e| {
                if is_unique_violation(&e, ACTIVE_ITEM_CONSTRAINT) {
                    StoreError::AlreadyReserved { gift_item_id }
                } else {
                    backend_error(e)
                }
            })?;

        tx.commit().await.map_err(backend_error)?;
        row.try_into()
    }

    async fn get_active_for_item(
        &self,
        gift_item_id: DbId,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        ReservationRepo::find_active_for_item(&self.pool, gift_item_id)
            .await
            .map_err(backend_error)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn get_by_id(&self, id: DbId) -> Result<Option<Reservation<Pii>>, StoreError> {
        ReservationRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend_error)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn get_by_token_hash(
        &self,
        token_hash: &str,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        ReservationRepo::find_by_token_hash(&self.pool, token_hash)
            .await
            .map_err(backend_error)?
            .map(Reservation::try_from)
            .transpose()
    }

    async fn update_status(
        &self,
        target: ReservationTarget,
        transition: StatusTransition,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        let mut conn = self.pool.acquire().await.map_err(backend_error)?;
        apply_transition(&mut conn, &target, &transition).await
    }

    async fn purchase_and_fulfil(
        &self,
        gift_item_id: DbId,
        purchased_by: DbId,
        price_cents: Option<i64>,
        at: Timestamp,
    ) -> Result<Option<Reservation<Pii>>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let already = GiftItemRepo::lock(&mut tx, gift_item_id)
            .await
            .map_err(backend_error)?
            .ok_or(StoreError::ItemNotFound { gift_item_id })?;
        if already
            || !GiftItemRepo::record_purchase(&mut tx, gift_item_id, purchased_by, price_cents)
                .await
                .map_err(backend_error)?
        {
            return Err(StoreError::AlreadyPurchased { gift_item_id });
        }

        let fulfilled = apply_transition(
            &mut tx,
            &ReservationTarget::ActiveForItem(gift_item_id),
            &StatusTransition::fulfilled(at),
        )
        .await?;

        tx.commit().await.map_err(backend_error)?;
        Ok(fulfilled)
    }

    async fn expire_stale(&self, now: Timestamp) -> Result<Vec<Reservation<Pii>>, StoreError> {
        let rows = ReservationRepo::expire_before(&self.pool, now)
            .await
            .map_err(backend_error)?;
        to_domain(rows)
    }

    async fn claim_notification(&self, id: DbId) -> Result<bool, StoreError> {
        ReservationRepo::claim_notification(&self.pool, id)
            .await
            .map_err(backend_error)
    }

    async fn list_for_user(
        &self,
        user_id: DbId,
        page: Pagination,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError> {
        let rows = ReservationRepo::list_for_user(&self.pool, user_id, page.limit, page.offset)
            .await
            .map_err(backend_error)?;
        to_detail(rows)
    }

    async fn list_for_guest_token(
        &self,
        token_hash: &str,
    ) -> Result<Vec<ReservationDetail<Pii>>, StoreError> {
        let rows = ReservationRepo::list_for_token_hash(&self.pool, token_hash)
            .await
            .map_err(backend_error)?;
        to_detail(rows)
    }

    async fn delete_for_item_returning_active(
        &self,
        gift_item_id: DbId,
    ) -> Result<Vec<Reservation<Pii>>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        GiftItemRepo::lock(&mut tx, gift_item_id)
            .await
            .map_err(backend_error)?
            .ok_or(StoreError::ItemNotFound { gift_item_id })?;

        let removed = ReservationRepo::delete_for_items(&mut tx, &[gift_item_id])
            .await
            .map_err(backend_error)?;
        GiftItemRepo::delete(&mut tx, gift_item_id)
            .await
            .map_err(backend_error)?;

        tx.commit().await.map_err(backend_error)?;
        only_active(removed)
    }

    async fn delete_for_wish_list_returning_active(
        &self,
        wish_list_id: DbId,
    ) -> Result<Vec<RemovedReservation>, StoreError> {
        let mut tx = self.pool.begin().await.map_err(backend_error)?;

        let names: HashMap<DbId, String> = GiftItemRepo::lock_for_wish_list(&mut tx, wish_list_id)
            .await
            .map_err(backend_error)?
            .into_iter()
            .collect();
        let item_ids: Vec<DbId> = names.keys().copied().collect();
        let removed = ReservationRepo::delete_for_items(&mut tx, &item_ids)
            .await
            .map_err(backend_error)?;
        WishListRepo::delete(&mut tx, wish_list_id)
            .await
            .map_err(backend_error)?;

        tx.commit().await.map_err(backend_error)?;

        Ok(only_active(removed)?
            .into_iter()
            .map(|reservation| RemovedReservation {
                gift_item_name: names
                    .get(&reservation.gift_item_id)
                    .cloned()
                    .unwrap_or_default(),
                reservation,
            })
            .collect())
    }

    async fn count_active_for_wish_list(&self, wish_list_id: DbId) -> Result<i64, StoreError> {
        ReservationRepo::count_active_for_wish_list(&self.pool, wish_list_id)
            .await
            .map_err(backend_error)
    }
}

#[async_trait]
impl GiftItemDirectory for PgBackend {
    async fn get_item(&self, id: DbId) -> Result<Option<GiftItem>, StoreError> {
        Ok(GiftItemRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend_error)?
            .map(GiftItem::from))
    }

    async fn get_wish_list(&self, id: DbId) -> Result<Option<WishList>, StoreError> {
        Ok(WishListRepo::find_by_id(&self.pool, id)
            .await
            .map_err(backend_error)?
            .map(WishList::from))
    }
}

#[async_trait]
impl UserDirectory for PgBackend {
    async fn email_for_user(&self, user_id: DbId) -> Result<Option<String>, StoreError> {
        let Some((plain, encrypted)) = UserRepo::find_email_columns(&self.pool, user_id)
            .await
            .map_err(backend_error)?
        else {
            return Ok(None);
        };
        Pii::from_columns(plain, encrypted)
            .map(|email| self.cipher.open(&email))
            .transpose()
            .map_err(|e| StoreError::Backend(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Data key provider
// ---------------------------------------------------------------------------

/// Loads the PII data key from `data_keys`, creating and storing one on
/// first use. The key is kept wrapped under the master key.
pub struct PgDataKeyProvider {
    pool: DbPool,
    master: DataKey,
}

impl PgDataKeyProvider {
    pub fn new(pool: DbPool, master: DataKey) -> Self {
        Self { pool, master }
    }
}

#[async_trait]
impl DataKeyProvider for PgDataKeyProvider {
    async fn get_or_create_data_key(&self) -> Result<DataKey, CryptoError> {
        let key_store = |e: sqlx::Error| CryptoError::KeyStore(e.to_string());

        if let Some(wrapped) = DataKeyRepo::find(&self.pool).await.map_err(key_store)? {
            return unwrap_data_key(&self.master, &wrapped);
        }

        let fresh = DataKey::generate();
        let wrapped = wrap_data_key(&self.master, &fresh)?;
        DataKeyRepo::insert_if_absent(&self.pool, &wrapped)
            .await
            .map_err(key_store)?;

        // Another instance may have won the insert; the stored key is authoritative.
        let stored = DataKeyRepo::find(&self.pool)
            .await
            .map_err(key_store)?
            .ok_or_else(|| CryptoError::KeyStore("data key row missing after insert".into()))?;
        tracing::info!("PII data key initialised");
        unwrap_data_key(&self.master, &stored)
    }
}
