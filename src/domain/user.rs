use std::collections::HashMap;

use argon2::{
    password_hash::{PasswordHasher, SaltString},
    Argon2, PasswordHash, PasswordVerifier,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::AuthError;

/// Identity record returned by an external provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderUserInformation {
    pub provider_id: String,
    /// The user's identifier, scoped to the provider.
    pub user_id: String,
    pub email: Option<String>,
    /// Remaining profile fields, verbatim from the provider.
    #[serde(default)]
    pub fields: serde_json::Map<String, serde_json::Value>,
}

/// Self-registration state of an account.
#[derive(Debug, Clone, PartialEq)]
pub struct Registration {
    pub activation_id: String,
    pub requested_at: Option<DateTime<Utc>>,
    pub activated_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct User {
    pub id: String,
    pub email: String,
    /// Argon2 PHC string. `None` for accounts that only sign in through a provider.
    pub password_hash: Option<String>,
    pub registration: Option<Registration>,
    pub providers: HashMap<String, ProviderUserInformation>,
}

impl User {
    pub fn has_password(&self) -> bool {
        self.password_hash.is_some()
    }

    /// An account that registered itself but never followed the activation link.
    pub fn activation_pending(&self) -> bool {
        self.registration
            .as_ref()
            .map(|r| r.activated_at.is_none())
            .unwrap_or(false)
    }

    pub fn verify_password(&self, password: &str) -> bool {
        let Some(hash) = self.password_hash.as_deref() else {
            return false;
        };
        let parsed = match PasswordHash::new(hash) {
            Ok(parsed) => parsed,
            Err(e) => {
                tracing::warn!("Stored password hash for user {} is unreadable: {e}", self.id);
                return false;
            }
        };
        Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok()
    }

    pub fn provider(&self, provider_id: &str) -> Option<&ProviderUserInformation> {
        self.providers.get(provider_id)
    }

    /// Copy of this user with the provider's entry replaced by `info`.
    pub fn update_provider(&self, info: ProviderUserInformation) -> User {
        let mut user = self.clone();
        user.providers.insert(info.provider_id.clone(), info);
        user
    }
}

/// Hash a password using Argon2id.
pub fn hash_password(password: &str) -> Result<String, AuthError> {
    let salt = SaltString::generate(&mut rand::rngs::OsRng);
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| AuthError::Internal(format!("failed to hash password: {e}")))?;
    Ok(hash.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(password: Option<&str>) -> User {
        User {
            id: "u1".into(),
            email: "u1@x.com".into(),
            password_hash: password.map(|p| hash_password(p).unwrap()),
            registration: None,
            providers: HashMap::new(),
        }
    }

    #[test]
    fn test_verify_password() {
        let user = user(Some("p1"));
        assert!(user.verify_password("p1"));
        assert!(!user.verify_password("p2"));
    }

    #[test]
    fn test_provider_only_account_never_verifies() {
        let user = user(None);
        assert!(!user.has_password());
        assert!(!user.verify_password(""));
    }

    #[test]
    fn test_garbage_hash_does_not_verify() {
        let mut user = user(None);
        user.password_hash = Some("not-a-phc-string".into());
        assert!(!user.verify_password("anything"));
    }

    #[test]
    fn test_activation_pending() {
        let mut user = user(Some("p1"));
        assert!(!user.activation_pending());

        user.registration = Some(Registration {
            activation_id: "act".into(),
            requested_at: Some(Utc::now()),
            activated_at: None,
        });
        assert!(user.activation_pending());

        user.registration.as_mut().unwrap().activated_at = Some(Utc::now());
        assert!(!user.activation_pending());
    }

    #[test]
    fn test_activation_without_request_time() {
        let mut user = user(Some("p1"));
        user.registration = Some(Registration {
            activation_id: "act".into(),
            requested_at: None,
            activated_at: None,
        });
        assert!(user.activation_pending());
    }

    #[test]
    fn test_update_provider_replaces_entry() {
        let user = user(None);
        let info = ProviderUserInformation {
            provider_id: "google".into(),
            user_id: "g-1".into(),
            email: Some("u1@x.com".into()),
            fields: serde_json::Map::new(),
        };
        let updated = user.update_provider(info.clone());
        assert_eq!(updated.provider("google"), Some(&info));
        assert!(user.provider("google").is_none());
    }
}
