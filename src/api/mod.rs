//! HTTP router for ohmage-auth.
//!
//! - /auth_token       — issue (password, provider, refresh) and invalidate tokens
//! - /oauth/authorize  — grant a third-party client an authorization code
//! - /oauth/token      — exchange an authorization code for a token
//! - /status           — health check

pub mod routes;

use crate::SharedState;
use axum::Router;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

pub fn router(state: SharedState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    routes::router(state)
        .layer(cors)
        .layer(TraceLayer::new_for_http())
}
