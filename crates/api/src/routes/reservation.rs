//! Route definitions for the `/reservations` resource.

use axum::routing::{delete, get, post};
use axum::Router;

use crate::handlers::reservation;
use crate::state::AppState;

/// Routes mounted at `/reservations`.
///
/// ```text
/// GET    /mine       -> list_my_reservations     (?limit, ?offset)
/// GET    /guest      -> list_guest_reservations  (x-reservation-token)
/// GET    /by-token   -> get_guest_reservation    (x-reservation-token)
/// POST   /cancel     -> cancel_by_token
/// DELETE /{id}       -> cancel_reservation       (?reason)
/// ```
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/mine", get(reservation::list_my_reservations))
        .route("/guest", get(reservation::list_guest_reservations))
        .route("/by-token", get(reservation::get_guest_reservation))
        .route("/cancel", post(reservation::cancel_by_token))
        .route("/{id}", delete(reservation::cancel_reservation))
}
