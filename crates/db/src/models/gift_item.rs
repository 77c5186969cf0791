//! Gift item and wish list rows.

use giftreg_core::directory::{GiftItem, WishList};
use giftreg_core::types::DbId;
use sqlx::FromRow;

/// A `gift_items` row joined with its wish list.
#[derive(Debug, Clone, FromRow)]
pub struct GiftItemRow {
    pub id: DbId,
    pub name: String,
    pub owner_id: DbId,
    pub wish_list_id: DbId,
    pub wish_list_title: String,
}

impl From<GiftItemRow> for GiftItem {
    fn from(row: GiftItemRow) -> Self {
        GiftItem {
            id: row.id,
            name: row.name,
            owner_id: row.owner_id,
            wish_list_id: row.wish_list_id,
            wish_list_title: row.wish_list_title,
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct WishListRow {
    pub id: DbId,
    pub title: String,
    pub owner_id: DbId,
}

impl From<WishListRow> for WishList {
    fn from(row: WishListRow) -> Self {
        WishList {
            id: row.id,
            title: row.title,
            owner_id: row.owner_id,
        }
    }
}
