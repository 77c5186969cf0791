//! Repository for the single-row `data_keys` table.

use sqlx::PgPool;

pub struct DataKeyRepo;

impl DataKeyRepo {
    pub async fn find(pool: &PgPool) -> Result<Option<Vec<u8>>, sqlx::Error> {
        sqlx::query_scalar::<_, Vec<u8>>("SELECT wrapped_key FROM data_keys WHERE id = 1")
            .fetch_optional(pool)
            .await
    }

    /// Store a wrapped key unless another process stored one first.
    pub async fn insert_if_absent(pool: &PgPool, wrapped_key: &[u8]) -> Result<(), sqlx::Error> {
        sqlx::query(
            "INSERT INTO data_keys (id, wrapped_key) VALUES (1, $1) ON CONFLICT (id) DO NOTHING",
        )
        .bind(wrapped_key)
        .execute(pool)
        .await?;
        Ok(())
    }
}
