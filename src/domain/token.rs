//! Authorization tokens and their refresh chain.
//!
//! A token is an immutable record keyed by its access token. Refreshing a
//! token never edits it in place beyond setting `next_token` once; the old
//! record stays in the store as part of an audit chain that ends at the
//! currently usable token.

use chrono::{DateTime, Duration, Utc};
use rand::Rng;
use serde::{Serialize, Serializer};

use super::AuthorizationCode;

const TOKEN_LENGTH: usize = 64;

/// Generate an opaque random token string.
pub fn generate_token() -> String {
    rand::thread_rng()
        .sample_iter(&rand::distributions::Alphanumeric)
        .take(TOKEN_LENGTH)
        .map(char::from)
        .collect()
}

/// An access token, with its refresh token and chain metadata.
#[derive(Debug, Clone, PartialEq)]
pub struct AuthorizationToken {
    pub access_token: String,
    /// `None` for tokens minted from an OAuth authorization code.
    pub refresh_token: Option<String>,
    pub user_id: String,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub valid: bool,
    /// Access token of the successor, set once when this token is refreshed.
    pub next_token: Option<String>,
    /// The authorization code this token was exchanged for, if any.
    pub authorization_code: Option<String>,
}

impl AuthorizationToken {
    /// Mint a fresh password/provider token for a user.
    pub fn for_user(user_id: &str, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            access_token: generate_token(),
            refresh_token: Some(generate_token()),
            user_id: user_id.to_string(),
            created_at: now,
            expires_at: now + lifetime,
            valid: true,
            next_token: None,
            authorization_code: None,
        }
    }

    /// Mint the successor of `previous`. Only the owner carries over.
    pub fn refreshed_from(previous: &AuthorizationToken, lifetime: Duration) -> Self {
        Self::for_user(&previous.user_id, lifetime)
    }

    /// Mint a token for a third-party client. These have no refresh token.
    pub fn from_authorization_code(code: &AuthorizationCode, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            access_token: generate_token(),
            refresh_token: None,
            user_id: code.user_id.clone(),
            created_at: now,
            expires_at: now + lifetime,
            valid: true,
            next_token: None,
            authorization_code: Some(code.code.clone()),
        }
    }

    pub fn was_refreshed(&self) -> bool {
        self.next_token.is_some()
    }

    pub fn was_invalidated(&self) -> bool {
        !self.valid
    }

    pub fn is_oauth(&self) -> bool {
        self.authorization_code.is_some()
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }

    /// Seconds until expiry, floored at zero.
    pub fn expires_in(&self) -> i64 {
        (self.expires_at - Utc::now()).num_seconds().max(0)
    }
}

impl Serialize for AuthorizationToken {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire<'a> {
            access_token: &'a str,
            #[serde(skip_serializing_if = "Option::is_none")]
            refresh_token: Option<&'a str>,
            user_id: &'a str,
            created_at: DateTime<Utc>,
            expires_at: DateTime<Utc>,
            expires_in: i64,
            valid: bool,
        }

        Wire {
            access_token: &self.access_token,
            refresh_token: self.refresh_token.as_deref(),
            user_id: &self.user_id,
            created_at: self.created_at,
            expires_at: self.expires_at,
            expires_in: self.expires_in(),
            valid: self.valid,
        }
        .serialize(serializer)
    }
}
