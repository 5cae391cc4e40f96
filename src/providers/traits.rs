use async_trait::async_trait;

use crate::domain::ProviderUserInformation;
use crate::error::AuthError;

/// An external identity service that can turn one of its own access tokens
/// into the identity of the user who holds it.
#[async_trait]
pub trait Provider: Send + Sync {
    /// Unique provider identifier (e.g., "google").
    fn id(&self) -> &str;

    /// Validate `access_token` with the provider and fetch the user's profile.
    ///
    /// Fails with `ProviderTokenInvalid` when the provider rejects the token
    /// and `ProviderUnreachable` when it cannot be reached in time.
    async fn get_user_information(
        &self,
        access_token: &str,
    ) -> Result<ProviderUserInformation, AuthError>;
}
