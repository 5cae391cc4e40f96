use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::token::generate_token;

/// A single-use grant a user hands to a third-party client, exchanged for an
/// OAuth access token.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuthorizationCode {
    pub code: String,
    pub client_id: String,
    #[serde(skip)]
    pub user_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub scope: Option<String>,
    #[serde(skip)]
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip)]
    pub used_at: Option<DateTime<Utc>>,
}

impl AuthorizationCode {
    pub fn new(client_id: &str, user_id: &str, scope: Option<String>, lifetime: Duration) -> Self {
        let now = Utc::now();
        Self {
            code: generate_token(),
            client_id: client_id.to_string(),
            user_id: user_id.to_string(),
            scope,
            created_at: now,
            expires_at: now + lifetime,
            used_at: None,
        }
    }

    pub fn is_expired(&self) -> bool {
        self.expires_at <= Utc::now()
    }
}
