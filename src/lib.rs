pub mod api;
pub mod auth;
pub mod config;
pub mod domain;
pub mod error;
pub mod providers;
pub mod store;

pub use auth::TokenService;
pub use config::Config;
pub use error::AuthError;

use std::sync::Arc;

/// Shared application state passed to all API handlers.
pub struct AppState {
    pub config: Config,
    pub tokens: TokenService,
}

pub type SharedState = Arc<AppState>;
