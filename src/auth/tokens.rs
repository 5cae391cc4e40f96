//! Token lifecycle: issuance from credentials, refresh chaining, invalidation.
//!
//! Every issued token stays in the token bin forever. Refreshing appends a
//! successor and links the old record to it through `next_token`; the link is
//! written by the store with compare-and-swap semantics, so of any number of
//! concurrent refreshes of one token exactly one mints the successor.

use std::sync::Arc;

use chrono::Duration;
use tracing::{debug, error, info, warn};

use crate::config::{Config, MAX_LIFETIME_SECS};
use crate::domain::{AuthorizationCode, AuthorizationToken};
use crate::error::AuthError;
use crate::providers::ProviderRegistry;
use crate::store::{AuthorizationCodeBin, TokenBin, UserBin};

/// Deliberately identical for every credential failure.
pub const BAD_CREDENTIALS: &str = "Unknown user or incorrect password.";

pub struct TokenService {
    tokens: Arc<dyn TokenBin>,
    users: Arc<dyn UserBin>,
    codes: Arc<dyn AuthorizationCodeBin>,
    registry: ProviderRegistry,
    token_lifetime: Duration,
    code_lifetime: Duration,
}

impl TokenService {
    pub fn new(
        tokens: Arc<dyn TokenBin>,
        users: Arc<dyn UserBin>,
        codes: Arc<dyn AuthorizationCodeBin>,
        registry: ProviderRegistry,
        config: &Config,
    ) -> Result<Self, AuthError> {
        Ok(Self {
            tokens,
            users,
            codes,
            registry,
            token_lifetime: lifetime("token", config.token_lifetime)?,
            code_lifetime: lifetime("authorization code", config.authorization_code_lifetime)?,
        })
    }

    /// Build a service whose bins all live in one store.
    pub fn with_store<S>(
        store: Arc<S>,
        registry: ProviderRegistry,
        config: &Config,
    ) -> Result<Self, AuthError>
    where
        S: TokenBin + UserBin + AuthorizationCodeBin + 'static,
    {
        Self::new(store.clone(), store.clone(), store, registry, config)
    }

    /// Issue a token from an ohmage email address and password.
    pub async fn issue_from_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<AuthorizationToken, AuthError> {
        info!("Creating an authentication token from an email address and password");

        let user = match self.users.get_user_from_email(email).await? {
            Some(user) => user,
            None => {
                info!("No user with email {email}");
                return Err(AuthError::Authentication(BAD_CREDENTIALS.into()));
            }
        };

        if !user.has_password() {
            info!("User {} signs in through a provider and has no password", user.id);
            return Err(AuthError::Authentication(BAD_CREDENTIALS.into()));
        }
        if !user.verify_password(password) {
            info!("Incorrect password for user {}", user.id);
            return Err(AuthError::Authentication(BAD_CREDENTIALS.into()));
        }
        if user.activation_pending() {
            info!("User {} never activated their account", user.id);
            return Err(AuthError::AccountNotActivated(
                "The account has not yet been activated.".into(),
            ));
        }

        self.mint(AuthorizationToken::for_user(&user.id, self.token_lifetime))
            .await
    }

    /// Issue a token for the ohmage account linked to a provider identity.
    pub async fn issue_from_provider(
        &self,
        provider_id: &str,
        access_token: &str,
    ) -> Result<AuthorizationToken, AuthError> {
        info!("Creating an authentication token from a {provider_id} access token");

        let provider = self
            .registry
            .get(provider_id)
            .ok_or_else(|| AuthError::UnknownProvider(provider_id.to_string()))?;

        let fetched = provider.get_user_information(access_token).await?;

        let user = self
            .users
            .get_user_from_provider(&fetched.provider_id, &fetched.user_id)
            .await?
            .ok_or_else(|| {
                info!(
                    "{} user {} is not linked to an ohmage account",
                    fetched.provider_id, fetched.user_id
                );
                AuthError::AccountNotSetup("The user has not yet created an ohmage account.".into())
            })?;

        if user.provider(&fetched.provider_id) != Some(&fetched) {
            debug!("Provider information for user {} changed", user.id);
            if let Err(e) = self
                .users
                .update_provider_information(&user.id, &fetched)
                .await
            {
                warn!(
                    "Failed to save updated {} information for user {}: {e}",
                    fetched.provider_id, user.id
                );
            }
        }

        self.mint(AuthorizationToken::for_user(&user.id, self.token_lifetime))
            .await
    }

    /// Exchange a refresh token for the next token in its chain.
    pub async fn refresh(&self, refresh_token: &str) -> Result<AuthorizationToken, AuthError> {
        info!("Creating an authentication token from a refresh token");

        let old = self
            .tokens
            .get_token_from_refresh_token(refresh_token)
            .await?
            .ok_or(AuthError::UnknownToken)?;

        if old.is_oauth() {
            return Err(AuthError::InvalidArgument(
                "This API may not be used to refresh OAuth-based tokens.".into(),
            ));
        }
        if old.was_invalidated() {
            return Err(AuthError::AlreadyInvalidated);
        }
        if old.was_refreshed() {
            debug!("Token {} was already refreshed", fingerprint(&old.access_token));
            return self.successor_of(&old).await;
        }

        let next = AuthorizationToken::refreshed_from(&old, self.token_lifetime);
        if self.tokens.chain_token(&old.access_token, &next).await? {
            info!(
                "Refreshed token {} into {} for user {}",
                fingerprint(&old.access_token),
                fingerprint(&next.access_token),
                next.user_id
            );
            return Ok(next);
        }

        // Another request refreshed or invalidated the token after we read it.
        warn!(
            "Concurrent update of token {} while refreshing it",
            fingerprint(&old.access_token)
        );
        let current = self
            .tokens
            .get_token_from_access_token(&old.access_token)
            .await?
            .ok_or_else(|| {
                AuthError::IllegalState(format!(
                    "token '{}' disappeared during a refresh",
                    fingerprint(&old.access_token)
                ))
            })?;

        if current.was_invalidated() {
            Err(AuthError::AlreadyInvalidated)
        } else if current.was_refreshed() {
            self.successor_of(&current).await
        } else {
            error!(
                "Token {} could not be chained although it is valid and unrefreshed",
                fingerprint(&old.access_token)
            );
            Err(AuthError::IllegalState(
                "the refresh chain could not be extended".into(),
            ))
        }
    }

    /// Invalidate the given token, as on logout.
    pub async fn invalidate(&self, access_token: Option<&str>) -> Result<(), AuthError> {
        let access_token = access_token
            .ok_or_else(|| AuthError::Authentication("No auth information was given.".into()))?;

        if !self.tokens.invalidate_token(access_token).await? {
            return Err(AuthError::Authentication("The auth token is unknown.".into()));
        }

        info!("Invalidated token {}", fingerprint(access_token));
        Ok(())
    }

    /// Resolve a bearer token that is still usable for API calls.
    pub async fn authenticate(&self, access_token: &str) -> Result<AuthorizationToken, AuthError> {
        let token = self
            .tokens
            .get_token_from_access_token(access_token)
            .await?
            .ok_or_else(|| AuthError::Authentication("The auth token is unknown.".into()))?;

        if token.was_invalidated() {
            return Err(AuthError::AlreadyInvalidated);
        }
        if token.was_refreshed() {
            return Err(AuthError::AlreadyRefreshed);
        }
        if token.is_expired() {
            return Err(AuthError::Authentication("The auth token has expired.".into()));
        }

        Ok(token)
    }

    /// Grant `client_id` a one-time code it can exchange for a token acting
    /// as the bearer's user.
    pub async fn authorize(
        &self,
        access_token: &str,
        client_id: &str,
        scope: Option<String>,
    ) -> Result<AuthorizationCode, AuthError> {
        if client_id.trim().is_empty() {
            return Err(AuthError::InvalidArgument("A client ID is required.".into()));
        }

        let token = self.authenticate(access_token).await?;
        let code = AuthorizationCode::new(client_id, &token.user_id, scope, self.code_lifetime);
        self.codes.add_code(&code).await?;

        info!("User {} authorized client {client_id}", token.user_id);
        Ok(code)
    }

    /// Issue an OAuth token for a previously granted authorization code.
    pub async fn issue_from_authorization_code(
        &self,
        code: &str,
        client_id: &str,
    ) -> Result<AuthorizationToken, AuthError> {
        info!("Creating an authentication token from an authorization code");

        let granted = self.codes.take_code(code).await?.ok_or_else(|| {
            AuthError::Authentication("The authorization code is unknown or was already used.".into())
        })?;

        if granted.client_id != client_id {
            return Err(AuthError::InvalidArgument(
                "The authorization code was issued to a different client.".into(),
            ));
        }
        if granted.is_expired() {
            return Err(AuthError::Authentication(
                "The authorization code has expired.".into(),
            ));
        }

        self.mint(AuthorizationToken::from_authorization_code(
            &granted,
            self.token_lifetime,
        ))
        .await
    }

    async fn mint(&self, token: AuthorizationToken) -> Result<AuthorizationToken, AuthError> {
        self.tokens.add_token(&token).await?;
        info!(
            "Issued token {} for user {}",
            fingerprint(&token.access_token),
            token.user_id
        );
        Ok(token)
    }

    /// The token `old` was refreshed into, if it may still be handed out.
    async fn successor_of(&self, old: &AuthorizationToken) -> Result<AuthorizationToken, AuthError> {
        let next_access = old.next_token.as_deref().ok_or_else(|| {
            AuthError::IllegalState("token has no successor".into())
        })?;

        let next = match self.tokens.get_token_from_access_token(next_access).await? {
            Some(next) => next,
            None => {
                error!(
                    "Token {} has a next token {} which is unknown",
                    fingerprint(&old.access_token),
                    fingerprint(next_access)
                );
                return Err(AuthError::IllegalState(format!(
                    "token '{}' points at an unknown successor",
                    fingerprint(&old.access_token)
                )));
            }
        };

        if next.was_refreshed() {
            return Err(AuthError::AlreadyRefreshed);
        }
        if next.was_invalidated() {
            return Err(AuthError::AlreadyInvalidated);
        }
        Ok(next)
    }
}

/// Enough of a token to correlate log lines without leaking it.
// Lifetimes are added to the current time on every issuance.
fn lifetime(what: &str, value: std::time::Duration) -> Result<Duration, AuthError> {
    let secs = value.as_secs();
    if secs > MAX_LIFETIME_SECS {
        return Err(AuthError::InvalidArgument(format!(
            "The {what} lifetime of {secs} seconds exceeds {MAX_LIFETIME_SECS} seconds."
        )));
    }
    i64::try_from(secs)
        .ok()
        .and_then(Duration::try_seconds)
        .ok_or_else(|| AuthError::InvalidArgument(format!("The {what} lifetime is out of range.")))
}

fn fingerprint(token: &str) -> &str {
    token.get(..8).unwrap_or(token)
}
