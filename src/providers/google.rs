use async_trait::async_trait;
use reqwest::StatusCode;
use serde::Deserialize;
use std::time::Duration;

use super::traits::Provider;
use crate::domain::ProviderUserInformation;
use crate::error::AuthError;

/// Google accounts, validated through the OpenID Connect userinfo endpoint.
///
/// Any token Google issued with the `openid` scope works; the endpoint
/// answers 401 for expired or revoked tokens.
pub struct GoogleProvider {
    userinfo_url: String,
    http: reqwest::Client,
}

// Raw userinfo response; everything beyond `sub` and `email` is kept as-is.
#[derive(Debug, Deserialize)]
struct GoogleUserInfo {
    sub: String,
    email: Option<String>,
    #[serde(flatten)]
    rest: serde_json::Map<String, serde_json::Value>,
}

impl GoogleProvider {
    pub fn new(userinfo_url: String, timeout: Duration) -> Result<Self, AuthError> {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| AuthError::Internal(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self { userinfo_url, http })
    }
}

#[async_trait]
impl Provider for GoogleProvider {
    fn id(&self) -> &str {
        "google"
    }

    async fn get_user_information(
        &self,
        access_token: &str,
    ) -> Result<ProviderUserInformation, AuthError> {
        if access_token.is_empty() {
            return Err(AuthError::InvalidArgument("The access token is empty.".into()));
        }

        let resp = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .map_err(|e| AuthError::ProviderUnreachable(format!("Google userinfo request failed: {e}")))?;

        let status = resp.status();
        match status {
            status if status.is_success() => {}
            StatusCode::BAD_REQUEST | StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => {
                let body = resp.text().await.unwrap_or_default();
                return Err(AuthError::ProviderTokenInvalid(format!(
                    "Google rejected the token: {body}"
                )));
            }
            status => {
                return Err(AuthError::ProviderUnreachable(format!(
                    "Google userinfo returned {status}"
                )));
            }
        }

        let info: GoogleUserInfo = resp.json().await.map_err(|e| {
            AuthError::ProviderUnreachable(format!("Failed to parse userinfo response: {e}"))
        })?;

        Ok(ProviderUserInformation {
            provider_id: self.id().to_string(),
            user_id: info.sub,
            email: info.email,
            fields: info.rest,
        })
    }
}
