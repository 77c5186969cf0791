//! Read/write seams onto collaborator domains the engine depends on but
//! does not own: gift items and wish lists, and user contact lookup.

use async_trait::async_trait;
use serde::Serialize;

use crate::store::StoreError;
use crate::types::DbId;

/// The slice of a gift item the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GiftItem {
    pub id: DbId,
    pub name: String,
    pub owner_id: DbId,
    pub wish_list_id: DbId,
    pub wish_list_title: String,
}

/// The slice of a wish list the engine needs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WishList {
    pub id: DbId,
    pub title: String,
    pub owner_id: DbId,
}

/// Gift-item and wish-list lookups.
#[async_trait]
pub trait GiftItemDirectory: Send + Sync + 'static {
    async fn get_item(&self, id: DbId) -> Result<Option<GiftItem>, StoreError>;

    async fn get_wish_list(&self, id: DbId) -> Result<Option<WishList>, StoreError>;
}

/// Resolves contact addresses for authenticated reservers.
#[async_trait]
pub trait UserDirectory: Send + Sync + 'static {
    async fn email_for_user(&self, user_id: DbId) -> Result<Option<String>, StoreError>;
}
