//! Repository for the `reservations` table.
//!
//! Every status change is an `UPDATE ... WHERE status_id = active`, so the
//! row leaves `active` at most once no matter how many callers race.

use giftreg_core::reservation::ReservationStatus;
use giftreg_core::store::ReservationTarget;
use giftreg_core::types::{DbId, Timestamp};
use sqlx::{PgConnection, PgPool};

use crate::models::reservation::{CreateReservation, ReservationDetailRow, ReservationRow};

/// Column list for `reservations` queries.
const COLUMNS: &str = "\
    id, gift_item_id, reserved_by_user_id, \
    guest_name, guest_email, guest_name_encrypted, guest_email_encrypted, \
    reservation_token_hash, status_id, reserved_at, expires_at, \
    cancelled_at, cancel_reason, notification_sent";

/// Column list for joined detail queries (`r` = reservations).
const DETAIL_COLUMNS: &str = "\
    r.id, r.gift_item_id, r.reserved_by_user_id, \
    r.guest_name, r.guest_email, r.guest_name_encrypted, r.guest_email_encrypted, \
    r.reservation_token_hash, r.status_id, r.reserved_at, r.expires_at, \
    r.cancelled_at, r.cancel_reason, r.notification_sent, \
    gi.name AS gift_item_name, wl.id AS wish_list_id, wl.title AS wish_list_title, \
    wl.owner_id, u.name AS owner_name";

const DETAIL_FROM: &str = "\
    FROM reservations r \
    JOIN gift_items gi ON gi.id = r.gift_item_id \
    JOIN wish_lists wl ON wl.id = gi.wish_list_id \
    JOIN users u ON u.id = wl.owner_id";

pub struct ReservationRepo;

impl ReservationRepo {
    /// Whether the item currently has an active reservation. Call with the
    /// item row locked.
    pub async fn has_active(
        conn: &mut PgConnection,
        gift_item_id: DbId,
    ) -> Result<bool, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM reservations WHERE gift_item_id = $1 AND status_id = $2)",
        )
        .bind(gift_item_id)
        .bind(ReservationStatus::Active.id())
        .fetch_one(conn)
        .await
    }

    /// Insert a new active reservation.
    pub async fn insert(
        conn: &mut PgConnection,
        input: &CreateReservation,
    ) -> Result<ReservationRow, sqlx::Error> {
        let query = format!(
            "INSERT INTO reservations \
                (gift_item_id, reserved_by_user_id, guest_name, guest_email, \
                 guest_name_encrypted, guest_email_encrypted, reservation_token_hash, \
                 status_id, reserved_at, expires_at) \
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10) \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(input.gift_item_id)
            .bind(input.reserved_by_user_id)
            .bind(&input.guest_name)
            .bind(&input.guest_email)
            .bind(&input.guest_name_encrypted)
            .bind(&input.guest_email_encrypted)
            .bind(&input.reservation_token_hash)
            .bind(ReservationStatus::Active.id())
            .bind(input.reserved_at)
            .bind(input.expires_at)
            .fetch_one(conn)
            .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<ReservationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM reservations WHERE id = $1");
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_by_token_hash(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Option<ReservationRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM reservations WHERE reservation_token_hash = $1");
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(token_hash)
            .fetch_optional(pool)
            .await
    }

    pub async fn find_active_for_item(
        pool: &PgPool,
        gift_item_id: DbId,
    ) -> Result<Option<ReservationRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM reservations WHERE gift_item_id = $1 AND status_id = $2"
        );
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(gift_item_id)
            .bind(ReservationStatus::Active.id())
            .fetch_optional(pool)
            .await
    }

    /// Move the active reservation matching `target` to `status`.
    ///
    /// `cancelled_at` and `cancel_reason` are only written when provided.
    /// Returns `None` if nothing active matched.
    pub async fn transition(
        conn: &mut PgConnection,
        target: &ReservationTarget,
        status: ReservationStatus,
        cancelled_at: Option<Timestamp>,
        cancel_reason: Option<&str>,
    ) -> Result<Option<ReservationRow>, sqlx::Error> {
        let filter = match target {
            ReservationTarget::Id(_) => "id = $5",
            ReservationTarget::TokenHash(_) => "reservation_token_hash = $5",
            ReservationTarget::ActiveForItem(_) => "gift_item_id = $5",
        };
        let query = format!(
            "UPDATE reservations \
             SET status_id = $1, \
                 cancelled_at = COALESCE($2, cancelled_at), \
                 cancel_reason = COALESCE($3, cancel_reason) \
             WHERE status_id = $4 AND {filter} \
             RETURNING {COLUMNS}"
        );
        let q = sqlx::query_as::<_, ReservationRow>(&query)
            .bind(status.id())
            .bind(cancelled_at)
            .bind(cancel_reason)
            .bind(ReservationStatus::Active.id());
        let q = match target {
            ReservationTarget::Id(id) => q.bind(*id),
            ReservationTarget::TokenHash(hash) => q.bind(hash.as_str()),
            ReservationTarget::ActiveForItem(gift_item_id) => q.bind(*gift_item_id),
        };
        q.fetch_optional(conn).await
    }

    /// Expire active guest reservations whose `expires_at` is before `now`.
    pub async fn expire_before(
        pool: &PgPool,
        now: Timestamp,
    ) -> Result<Vec<ReservationRow>, sqlx::Error> {
        let query = format!(
            "UPDATE reservations SET status_id = $1 \
             WHERE status_id = $2 \
               AND reserved_by_user_id IS NULL \
               AND expires_at IS NOT NULL \
               AND expires_at < $3 \
             RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(ReservationStatus::Expired.id())
            .bind(ReservationStatus::Active.id())
            .bind(now)
            .fetch_all(pool)
            .await
    }

    /// Set `notification_sent` if it was unset. Returns whether this call set it.
    pub async fn claim_notification(pool: &PgPool, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "UPDATE reservations SET notification_sent = TRUE \
             WHERE id = $1 AND notification_sent = FALSE",
        )
        .bind(id)
        .execute(pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// A user's reservations in every status, newest first.
    pub async fn list_for_user(
        pool: &PgPool,
        user_id: DbId,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<ReservationDetailRow>, sqlx::Error> {
        let query = format!(
            "SELECT {DETAIL_COLUMNS} {DETAIL_FROM} \
             WHERE r.reserved_by_user_id = $1 \
             ORDER BY r.reserved_at DESC, r.id DESC \
             LIMIT $2 OFFSET $3"
        );
        sqlx::query_as::<_, ReservationDetailRow>(&query)
            .bind(user_id)
            .bind(limit)
            .bind(offset)
            .fetch_all(pool)
            .await
    }

    pub async fn list_for_token_hash(
        pool: &PgPool,
        token_hash: &str,
    ) -> Result<Vec<ReservationDetailRow>, sqlx::Error> {
        let query = format!(
            "SELECT {DETAIL_COLUMNS} {DETAIL_FROM} \
             WHERE r.reservation_token_hash = $1 \
             ORDER BY r.reserved_at DESC"
        );
        sqlx::query_as::<_, ReservationDetailRow>(&query)
            .bind(token_hash)
            .fetch_all(pool)
            .await
    }

    /// Delete every reservation on the given items, returning the deleted rows.
    pub async fn delete_for_items(
        conn: &mut PgConnection,
        gift_item_ids: &[DbId],
    ) -> Result<Vec<ReservationRow>, sqlx::Error> {
        let query = format!(
            "DELETE FROM reservations WHERE gift_item_id = ANY($1) RETURNING {COLUMNS}"
        );
        sqlx::query_as::<_, ReservationRow>(&query)
            .bind(gift_item_ids)
            .fetch_all(conn)
            .await
    }

    pub async fn count_active_for_wish_list(
        pool: &PgPool,
        wish_list_id: DbId,
    ) -> Result<i64, sqlx::Error> {
        sqlx::query_scalar::<_, i64>(
            "SELECT COUNT(*) FROM reservations r \
             JOIN gift_items gi ON gi.id = r.gift_item_id \
             WHERE gi.wish_list_id = $1 AND r.status_id = $2",
        )
        .bind(wish_list_id)
        .bind(ReservationStatus::Active.id())
        .fetch_one(pool)
        .await
    }
}
