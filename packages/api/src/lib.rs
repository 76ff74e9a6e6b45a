use axum::{routing::get, Router};

pub mod error;
pub mod middleware;
pub mod routes;
pub mod state;

/// All HTTP routes, without transport-level layers.
pub fn app(state: state::AppState) -> Router {
    Router::new()
        .route("/health", get(routes::health::health_check))
        .merge(routes::matchmaking::routes())
        .merge(routes::matches::routes())
        .with_state(state)
}
