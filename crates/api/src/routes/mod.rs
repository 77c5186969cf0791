pub mod gift_item;
pub mod health;
pub mod reservation;
pub mod wish_list;

use axum::Router;

use crate::state::AppState;

/// Build the `/api/v1` route tree.
///
/// Route hierarchy:
///
/// ```text
/// /gift-items/{id}/reservations                    reserve (user or guest)
/// /gift-items/{id}/reservation                     public reservation status
/// /gift-items/{id}/purchase                        mark purchased (owner)
/// /gift-items/{id}                                 delete item (owner)
///
/// /wish-lists/{id}                                 delete list (owner, ?confirm=true)
///
/// /reservations/mine                               list own (auth required)
/// /reservations/guest                              list by guest token
/// /reservations/by-token                           get by guest token
/// /reservations/cancel                             cancel by guest token
/// /reservations/{id}                               cancel (reserver or owner)
/// ```
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .nest("/gift-items", gift_item::router())
        .nest("/wish-lists", wish_list::router())
        .nest("/reservations", reservation::router())
}
