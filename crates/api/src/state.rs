use std::sync::Arc;

use giftreg_core::engine::ReservationEngine;

use crate::config::ServerConfig;

/// Shared application state available to all Axum handlers via `State<AppState>`.
///
/// Cheaply cloneable: the engine and config are behind `Arc`s.
#[derive(Clone)]
pub struct AppState {
    /// The reservation engine, wired to its store and collaborators.
    pub engine: ReservationEngine,
    /// Database pool for health checks. `None` when running on the in-process backend.
    pub pool: Option<giftreg_db::DbPool>,
    pub config: Arc<ServerConfig>,
}
