use axum::Router;

pub mod events;
pub mod system;

/// Router for the `/api` surface.
pub fn router() -> Router {
    Router::new().nest("/events", events::router())
}
