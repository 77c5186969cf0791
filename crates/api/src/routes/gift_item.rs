//! Route definitions for the `/gift-items` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::{owner_actions, reservation};
use crate::state::AppState;

/// Routes mounted at `/gift-items`.
///
/// ```text
/// POST   /{id}/reservations   -> reserve_item
/// GET    /{id}/reservation    -> item_reservation_status
/// POST   /{id}/purchase       -> mark_purchased
/// DELETE /{id}                -> delete_gift_item
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/{id}/reservations", post(reservation::reserve_item))
        .route("/{id}/reservation", get(reservation::item_reservation_status))
        .route("/{id}/purchase", post(owner_actions::mark_purchased))
        .route("/{id}", delete(owner_actions::delete_gift_item))
}
