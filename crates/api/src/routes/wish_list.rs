//! Route definitions for the `/wish-lists` resource.

use axum::routing::delete;
use axum::Router;

use crate::handlers::owner_actions;
use crate::state::AppState;

/// Routes mounted at `/wish-lists`.
///
/// ```text
/// DELETE /{id}   -> delete_wish_list   (?confirm=true)
/// ```
pub fn router() -> Router<AppState> {
    Router::new().route("/{id}", delete(owner_actions::delete_wish_list))
}
