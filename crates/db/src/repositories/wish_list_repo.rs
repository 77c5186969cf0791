//! Repository for the `wish_lists` table.

use giftreg_core::types::DbId;
use sqlx::{PgConnection, PgPool};

use crate::models::gift_item::WishListRow;

const COLUMNS: &str = "id, title, owner_id";

pub struct WishListRepo;

impl WishListRepo {
    pub async fn create(pool: &PgPool, owner_id: DbId, title: &str) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO wish_lists (owner_id, title) VALUES ($1, $2) RETURNING id",
        )
        .bind(owner_id)
        .bind(title)
        .fetch_one(pool)
        .await
    }

    pub async fn find_by_id(pool: &PgPool, id: DbId) -> Result<Option<WishListRow>, sqlx::Error> {
        let query = format!("SELECT {COLUMNS} FROM wish_lists WHERE id = $1");
        sqlx::query_as::<_, WishListRow>(&query)
            .bind(id)
            .fetch_optional(pool)
            .await
    }

    /// Delete a wish list; items cascade.
    pub async fn delete(conn: &mut PgConnection, id: DbId) -> Result<bool, sqlx::Error> {
        let result = sqlx::query("DELETE FROM wish_lists WHERE id = $1")
            .bind(id)
            .execute(conn)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
