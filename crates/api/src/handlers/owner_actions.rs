//! Owner actions on gift items and wish lists that cascade into reservations.
//!
//! Every handler checks that the caller owns the list before asking the
//! engine to mutate anything.

use axum::extract::{Path, Query, State};
use axum::Json;
use giftreg_core::engine::CascadeReport;
use giftreg_core::error::CoreError;
use giftreg_core::types::DbId;
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::AuthUser;
use crate::response::DataResponse;
use crate::state::AppState;

/// Body of `POST /gift-items/{id}/purchase`.
#[derive(Debug, Default, Deserialize)]
pub struct PurchaseRequest {
    pub price_cents: Option<i64>,
}

#[derive(Debug, Serialize)]
pub struct PurchaseResponse {
    pub gift_item_id: DbId,
    /// The reservation fulfilled by the purchase, if the item was reserved.
    pub fulfilled_reservation_id: Option<DbId>,
    pub reserver_notified: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DeleteWishListQuery {
    #[serde(default)]
    pub confirm: bool,
}

fn require_owner(owner_id: DbId, auth: &AuthUser, what: &str) -> AppResult<()> {
    if owner_id != auth.user_id {
        return Err(AppError::Core(CoreError::Forbidden(format!(
            "Only the owner of this wish list can {what}"
        ))));
    }
    Ok(())
}

async fn find_owned_item(
    state: &AppState,
    gift_item_id: DbId,
    auth: &AuthUser,
    what: &str,
) -> AppResult<()> {
    let item = state
        .engine
        .items()
        .get_item(gift_item_id)
        .await
        .map_err(CoreError::from)?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "GiftItem",
            id: gift_item_id,
        }))?;
    require_owner(item.owner_id, auth, what)
}

/// POST /api/v1/gift-items/{id}/purchase
pub async fn mark_purchased(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(gift_item_id): Path<DbId>,
    Json(body): Json<PurchaseRequest>,
) -> AppResult<Json<DataResponse<PurchaseResponse>>> {
    if body.price_cents.is_some_and(|p| p < 0) {
        return Err(AppError::BadRequest(
            "price_cents must not be negative".into(),
        ));
    }
    find_owned_item(&state, gift_item_id, &auth, "mark its gifts as purchased").await?;

    let outcome = state
        .engine
        .on_item_purchased(gift_item_id, auth.user_id, body.price_cents)
        .await?;

    Ok(Json(DataResponse {
        data: PurchaseResponse {
            gift_item_id: outcome.item.id,
            fulfilled_reservation_id: outcome.fulfilled.map(|r| r.id),
            reserver_notified: outcome.notified,
        },
    }))
}

/// DELETE /api/v1/gift-items/{id}
pub async fn delete_gift_item(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(gift_item_id): Path<DbId>,
) -> AppResult<Json<DataResponse<CascadeReport>>> {
    find_owned_item(&state, gift_item_id, &auth, "delete its gifts").await?;
    let report = state.engine.on_item_deleted(gift_item_id).await?;
    Ok(Json(DataResponse { data: report }))
}

/// DELETE /api/v1/wish-lists/{id}?confirm=true
///
/// Refuses with `CONFIRMATION_REQUIRED` while the list has active
/// reservations, unless `confirm=true` is passed.
pub async fn delete_wish_list(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(wish_list_id): Path<DbId>,
    Query(query): Query<DeleteWishListQuery>,
) -> AppResult<Json<DataResponse<CascadeReport>>> {
    let wish_list = state
        .engine
        .items()
        .get_wish_list(wish_list_id)
        .await
        .map_err(CoreError::from)?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "WishList",
            id: wish_list_id,
        }))?;
    require_owner(wish_list.owner_id, &auth, "delete it")?;

    let active_reservations = state
        .engine
        .active_reservation_count_for_wish_list(wish_list_id)
        .await?;
    if active_reservations > 0 && !query.confirm {
        return Err(AppError::ConfirmationRequired {
            active_reservations,
        });
    }

    let report = state.engine.on_wish_list_deleted(&wish_list).await?;
    Ok(Json(DataResponse { data: report }))
}
