//! Handlers for reserving gift items and managing one's own reservations.
//!
//! Guests authenticate by holding the token returned when they reserved; it
//! is accepted in the `x-reservation-token` header for reads and in the JSON
//! body for cancellation.

use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, State};
use axum::http::{HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::Json;
use giftreg_core::engine::ReservationLookup;
use giftreg_core::error::CoreError;
use giftreg_core::reservation::{Actor, GuestContact, Reservation, ReservationDetail};
use giftreg_core::store::Pagination;
use giftreg_core::types::{DbId, Timestamp};
use serde::{Deserialize, Serialize};

use crate::error::{AppError, AppResult};
use crate::middleware::auth::{AuthUser, MaybeAuthUser};
use crate::response::DataResponse;
use crate::state::AppState;

/// Header carrying a guest reservation token.
pub const RESERVATION_TOKEN_HEADER: &str = "x-reservation-token";

// ---------------------------------------------------------------------------
// Request / response types
// ---------------------------------------------------------------------------

/// Body of `POST /gift-items/{id}/reservations`. Guests fill both fields;
/// authenticated callers may omit the body entirely.
#[derive(Debug, Default, Deserialize)]
pub struct ReserveRequest {
    pub guest_name: Option<String>,
    pub guest_email: Option<String>,
}

/// A newly created reservation. `reservation_token` is only present for
/// guests and is never returned again.
#[derive(Debug, Serialize)]
pub struct ReservedResponse {
    #[serde(flatten)]
    pub reservation: Reservation,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reservation_token: Option<String>,
}

/// Public availability of a gift item. Carries no reserver details.
#[derive(Debug, Serialize)]
pub struct ItemReservationStatus {
    pub gift_item_id: DbId,
    pub reserved: bool,
    pub reserved_at: Option<Timestamp>,
}

#[derive(Debug, Default, Deserialize)]
pub struct CancelQuery {
    pub reason: Option<String>,
}

/// Body of `POST /reservations/cancel`.
#[derive(Debug, Default, Deserialize)]
pub struct CancelByTokenRequest {
    pub reservation_token: Option<String>,
    pub reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
pub struct PageQuery {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

fn token_from_headers(headers: &HeaderMap) -> String {
    headers
        .get(RESERVATION_TOKEN_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(|v| v.trim().to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Reserve
// ---------------------------------------------------------------------------

/// POST /api/v1/gift-items/{id}/reservations
///
/// With a Bearer token the reservation belongs to that user and any guest
/// fields are ignored. Without one, `guest_name` and `guest_email` are required.
pub async fn reserve_item(
    State(state): State<AppState>,
    MaybeAuthUser(user): MaybeAuthUser,
    Path(gift_item_id): Path<DbId>,
    body: Result<Option<Json<ReserveRequest>>, JsonRejection>,
) -> AppResult<impl IntoResponse> {
    let body = match body {
        Ok(Some(Json(body))) => body,
        Ok(None) => ReserveRequest::default(),
        Err(rejection) => return Err(AppError::BadRequest(rejection.body_text())),
    };

    let actor = match user {
        Some(user) => Actor::User {
            user_id: user.user_id,
        },
        None => Actor::Guest(GuestContact::parse(
            body.guest_name.as_deref(),
            body.guest_email.as_deref(),
        )?),
    };

    let reserved = state.engine.reserve(gift_item_id, actor).await?;

    Ok((
        StatusCode::CREATED,
        Json(DataResponse {
            data: ReservedResponse {
                reservation: reserved.reservation,
                reservation_token: reserved.reservation_token,
            },
        }),
    ))
}

/// GET /api/v1/gift-items/{id}/reservation
pub async fn item_reservation_status(
    State(state): State<AppState>,
    Path(gift_item_id): Path<DbId>,
) -> AppResult<Json<DataResponse<ItemReservationStatus>>> {
    state
        .engine
        .items()
        .get_item(gift_item_id)
        .await
        .map_err(CoreError::from)?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "GiftItem",
            id: gift_item_id,
        }))?;

    let active = state.engine.get_active_for_item(gift_item_id).await?;

    Ok(Json(DataResponse {
        data: ItemReservationStatus {
            gift_item_id,
            reserved: active.is_some(),
            reserved_at: active.map(|r| r.reserved_at),
        },
    }))
}

// ---------------------------------------------------------------------------
// Cancel
// ---------------------------------------------------------------------------

/// DELETE /api/v1/reservations/{id}
///
/// The reserving user or the item owner may cancel.
pub async fn cancel_reservation(
    State(state): State<AppState>,
    auth: AuthUser,
    Path(id): Path<DbId>,
    Query(query): Query<CancelQuery>,
) -> AppResult<Json<DataResponse<Reservation>>> {
    let reservation = state
        .engine
        .cancel(
            ReservationLookup::Id {
                id,
                user_id: auth.user_id,
            },
            query.reason,
        )
        .await?;
    Ok(Json(DataResponse { data: reservation }))
}

/// POST /api/v1/reservations/cancel
pub async fn cancel_by_token(
    State(state): State<AppState>,
    Json(body): Json<CancelByTokenRequest>,
) -> AppResult<Json<DataResponse<Reservation>>> {
    let token = body.reservation_token.unwrap_or_default();
    let reservation = state
        .engine
        .cancel(ReservationLookup::Token(token.trim().to_string()), body.reason)
        .await?;
    Ok(Json(DataResponse { data: reservation }))
}

// ---------------------------------------------------------------------------
// Reads
// ---------------------------------------------------------------------------

/// GET /api/v1/reservations/mine
pub async fn list_my_reservations(
    State(state): State<AppState>,
    auth: AuthUser,
    Query(query): Query<PageQuery>,
) -> AppResult<Json<DataResponse<Vec<ReservationDetail>>>> {
    let page = Pagination::new(query.limit, query.offset);
    let reservations = state.engine.list_for_user(auth.user_id, page).await?;
    Ok(Json(DataResponse { data: reservations }))
}

/// GET /api/v1/reservations/guest
pub async fn list_guest_reservations(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<DataResponse<Vec<ReservationDetail>>>> {
    let token = token_from_headers(&headers);
    let reservations = state.engine.list_for_guest_token(&token).await?;
    Ok(Json(DataResponse { data: reservations }))
}

/// GET /api/v1/reservations/by-token
pub async fn get_guest_reservation(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> AppResult<Json<DataResponse<Reservation>>> {
    let token = token_from_headers(&headers);
    let reservation = state.engine.get_by_token(&token).await?;
    Ok(Json(DataResponse { data: reservation }))
}
