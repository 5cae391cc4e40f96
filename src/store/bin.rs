//! Persistence seams ("bins"), one per entity type.

use async_trait::async_trait;

use crate::domain::{AuthorizationCode, AuthorizationToken, ProviderUserInformation, User};
use crate::error::AuthError;

/// Issued authorization tokens, addressable by access and refresh token.
#[async_trait]
pub trait TokenBin: Send + Sync {
    /// Insert a newly minted token. Fails if the access token already exists.
    async fn add_token(&self, token: &AuthorizationToken) -> Result<(), AuthError>;

    async fn get_token_from_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError>;

    async fn get_token_from_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError>;

    /// Persist `successor` and point `old_access_token` at it, as one unit.
    ///
    /// The pointer is only written while the old token is still valid and has
    /// no successor. Returns `false`, with nothing persisted, when that
    /// condition no longer holds.
    async fn chain_token(
        &self,
        old_access_token: &str,
        successor: &AuthorizationToken,
    ) -> Result<bool, AuthError>;

    /// Clear the validity flag. Returns `false` if the token is unknown.
    async fn invalidate_token(&self, access_token: &str) -> Result<bool, AuthError>;
}

/// User accounts, as far as authentication needs them.
#[async_trait]
pub trait UserBin: Send + Sync {
    async fn get_user_from_email(&self, email: &str) -> Result<Option<User>, AuthError>;

    async fn get_user_from_provider(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError>;

    /// Replace the saved provider information for a user.
    async fn update_provider_information(
        &self,
        user_id: &str,
        info: &ProviderUserInformation,
    ) -> Result<(), AuthError>;
}

/// OAuth authorization codes awaiting exchange.
#[async_trait]
pub trait AuthorizationCodeBin: Send + Sync {
    async fn add_code(&self, code: &AuthorizationCode) -> Result<(), AuthError>;

    /// Mark a code as used and return it. Only the first caller for a given
    /// code gets `Some`; unknown and already used codes yield `None`.
    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, AuthError>;
}
