//! Repository for `gift_items` and `gift_purchases`.

use giftreg_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::gift_item::GiftItemRow;

/// Item columns joined with the owning wish list (`gi`, `wl`).
const COLUMNS: &str = "\
    gi.id, gi.name, wl.owner_id, gi.wish_list_id, wl.title AS wish_list_title";

pub struct GiftItemRepo;

impl GiftItemRepo {
    pub async fn create(
        pool: &PgPool,
        wish_list_id: DbId,
        name: &str,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO gift_items (wish_list_id, name) VALUES ($1, $2) RETURNING id",
        )
        .bind(wish_list_id)
        .bind(name)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<GiftItemRow>, sqlx::Error> {
        let query = format!(
            "SELECT {COLUMNS} FROM gift_items gi \
             JOIN wish_lists wl ON wl.id = gi.wish_list_id \
             WHERE gi.id = $1"
        );
        sqlx::query_as::<_, GiftItemRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Lock an item row for the rest of the transaction.
    ///
    /// Returns `None` if the item does not exist, otherwise whether it has
    /// a purchase record.
    pub async fn lock(conn: &mut PgConnection, id: DbId) -> Result<Option<bool>, sqlx::Error> {
        sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS (SELECT 1 FROM gift_purchases gp WHERE gp.gift_item_id = gi.id) \
             FROM gift_items gi WHERE gi.id = $1 \
             FOR UPDATE OF gi",
        )
        .bind(id)
        .fetch_optional(conn)
        .await
    }

    /// Lock every item on a wish list, returning their ids and names.
    pub async fn lock_for_wish_list(
        conn: &mut PgConnection,
        wish_list_id: DbId,
    ) -> Result<Vec<(DbId, String)>, sqlx::Error> {
        sqlx::query_as::<_, (DbId, String)>(
            "SELECT id, name FROM gift_items WHERE wish_list_id = $1 ORDER BY id FOR UPDATE",
        )
        .bind(wish_list_id)
        .fetch_all(conn)
        .await
    }

    pub async fn delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM gift_items WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Insert the purchase record. Returns `false` if one already existed.
    pub async fn record_purchase(
        conn: &mut PgConnection,
        id: DbId,
        purchased_by: DbId,
        price_cents: Option<i64>,
    ) -> Result<bool, sqlx::Error> {
        let result = sqlx::query(
            "INSERT INTO gift_purchases (gift_item_id, purchased_by, price_cents) \
             VALUES ($1, $2, $3) \
             ON CONFLICT (gift_item_id) DO NOTHING",
        )
        .bind(id)
        .bind(purchased_by)
        .bind(price_cents)
        .execute(conn)
        .await?;
        Ok(result.rows_affected() == 1)
    }
}
