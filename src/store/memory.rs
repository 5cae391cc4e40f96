//! In-process store backing the service and router tests.

use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::Mutex;

use super::bin::{AuthorizationCodeBin, TokenBin, UserBin};
use crate::domain::{AuthorizationCode, AuthorizationToken, ProviderUserInformation, User};
use crate::error::AuthError;

#[derive(Default)]
struct Inner {
    tokens: HashMap<String, AuthorizationToken>,
    /// refresh token -> access token
    refresh_index: HashMap<String, String>,
    users: HashMap<String, User>,
    codes: HashMap<String, AuthorizationCode>,
}

impl Inner {
    fn insert_token(&mut self, token: &AuthorizationToken) -> Result<(), AuthError> {
        if self.tokens.contains_key(&token.access_token) {
            return Err(AuthError::IllegalState(
                "an access token was minted twice".into(),
            ));
        }
        if let Some(refresh) = &token.refresh_token {
            self.refresh_index
                .insert(refresh.clone(), token.access_token.clone());
        }
        self.tokens
            .insert(token.access_token.clone(), token.clone());
        Ok(())
    }
}

/// Every bin held behind one lock, so each operation is atomic.
#[derive(Default)]
pub struct MemoryStore {
    inner: Mutex<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add or replace a user account.
    pub async fn insert_user(&self, user: User) {
        let mut inner = self.inner.lock().await;
        inner.users.insert(user.id.clone(), user);
    }

    pub async fn get_user(&self, user_id: &str) -> Option<User> {
        self.inner.lock().await.users.get(user_id).cloned()
    }

    pub async fn token_count(&self) -> usize {
        self.inner.lock().await.tokens.len()
    }
}

#[async_trait]
impl TokenBin for MemoryStore {
    async fn add_token(&self, token: &AuthorizationToken) -> Result<(), AuthError> {
        self.inner.lock().await.insert_token(token)
    }

    async fn get_token_from_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError> {
        Ok(self.inner.lock().await.tokens.get(access_token).cloned())
    }

    async fn get_token_from_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .refresh_index
            .get(refresh_token)
            .and_then(|access| inner.tokens.get(access))
            .cloned())
    }

    async fn chain_token(
        &self,
        old_access_token: &str,
        successor: &AuthorizationToken,
    ) -> Result<bool, AuthError> {
        let mut inner = self.inner.lock().await;

        let chainable = inner
            .tokens
            .get(old_access_token)
            .map(|old| old.valid && old.next_token.is_none())
            .unwrap_or(false);
        if !chainable {
            return Ok(false);
        }

        inner.insert_token(successor)?;
        if let Some(old) = inner.tokens.get_mut(old_access_token) {
            old.next_token = Some(successor.access_token.clone());
        }
        Ok(true)
    }

    async fn invalidate_token(&self, access_token: &str) -> Result<bool, AuthError> {
        let mut inner = self.inner.lock().await;
        match inner.tokens.get_mut(access_token) {
            Some(token) => {
                token.valid = false;
                Ok(true)
            }
            None => Ok(false),
        }
    }
}

#[async_trait]
impl UserBin for MemoryStore {
    async fn get_user_from_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let inner = self.inner.lock().await;
        Ok(inner.users.values().find(|u| u.email == email).cloned())
    }

    async fn get_user_from_provider(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError> {
        let inner = self.inner.lock().await;
        Ok(inner
            .users
            .values()
            .find(|u| {
                u.provider(provider_id)
                    .map(|p| p.user_id == provider_user_id)
                    .unwrap_or(false)
            })
            .cloned())
    }

    async fn update_provider_information(
        &self,
        user_id: &str,
        info: &ProviderUserInformation,
    ) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        let user = inner
            .users
            .get_mut(user_id)
            .ok_or_else(|| AuthError::IllegalState(format!("user {user_id} does not exist")))?;
        *user = user.update_provider(info.clone());
        Ok(())
    }
}

#[async_trait]
impl AuthorizationCodeBin for MemoryStore {
    async fn add_code(&self, code: &AuthorizationCode) -> Result<(), AuthError> {
        let mut inner = self.inner.lock().await;
        inner.codes.insert(code.code.clone(), code.clone());
        Ok(())
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, AuthError> {
        let mut inner = self.inner.lock().await;
        match inner.codes.get_mut(code) {
            Some(stored) if stored.used_at.is_none() => {
                stored.used_at = Some(chrono::Utc::now());
                Ok(Some(stored.clone()))
            }
            _ => Ok(None),
        }
    }
}
