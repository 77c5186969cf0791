//! Repository for the collaborator-owned `users` table.

use giftreg_core::types::DbId;
use sqlx::PgPool;

pub struct UserRepo;

impl UserRepo {
    /// Insert a user. The email goes to whichever column the caller filled.
    pub async fn create(
        pool: &PgPool,
        name: &str,
        email: Option<&str>,
        email_encrypted: Option<&[u8]>,
    ) -> Result<DbId, sqlx::Error> {
        sqlx::query_scalar::<_, DbId>(
            "INSERT INTO users (name, email, email_encrypted) VALUES ($1, $2, $3) RETURNING id",
        )
        .bind(name)
        .bind(email)
        .bind(email_encrypted)
        .fetch_one(pool)
        .await
    }

    /// The `(email, email_encrypted)` column pair, or `None` for an unknown user.
    pub async fn find_email_columns(
        pool: &PgPool,
        id: DbId,
    ) -> Result<Option<(Option<String>, Option<Vec<u8>>)>, sqlx::Error> {
        sqlx::query_as::<_, (Option<String>, Option<Vec<u8>>)>(
            "SELECT email, email_encrypted FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(pool)
        .await
    }
}
