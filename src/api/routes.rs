//! Route handlers. All of them receive `SharedState` via Axum state
//! extraction and leave the token rules to `TokenService`.

use axum::{
    extract::{Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Form, Json, Router,
};
use serde::Deserialize;
use serde_json::json;

use crate::domain::{AuthorizationCode, AuthorizationToken};
use crate::error::AuthError;
use crate::SharedState;

pub fn router(state: SharedState) -> Router {
    Router::new()
        // ── Health ───────────────────────────────────────────────────────
        .route("/status", get(status))
        // ── Auth tokens ──────────────────────────────────────────────────
        .route(
            "/auth_token",
            get(auth_token_get)
                .post(auth_token_post)
                .delete(auth_token_delete),
        )
        // ── OAuth ────────────────────────────────────────────────────────
        .route("/oauth/authorize", post(oauth_authorize))
        .route("/oauth/token", post(oauth_token))
        .with_state(state)
}

// =============================================================================
// Health
// =============================================================================

async fn status() -> impl IntoResponse {
    Json(json!({
        "status": "ok",
        "service": "ohmage-auth",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

// =============================================================================
// Auth Token Endpoints
// =============================================================================

/// Credentials accepted by `/auth_token`. Exactly which ones are present
/// decides how the token is issued.
#[derive(Debug, Default, Deserialize)]
struct AuthTokenParams {
    email: Option<String>,
    password: Option<String>,
    provider: Option<String>,
    access_token: Option<String>,
    refresh_token: Option<String>,
}

/// GET /auth_token — Issue or refresh a token from query parameters.
async fn auth_token_get(
    State(state): State<SharedState>,
    Query(params): Query<AuthTokenParams>,
) -> Result<Json<AuthorizationToken>, AuthError> {
    issue(&state, params).await.map(Json)
}

/// POST /auth_token — Issue or refresh a token from a form body.
async fn auth_token_post(
    State(state): State<SharedState>,
    Form(params): Form<AuthTokenParams>,
) -> Result<Json<AuthorizationToken>, AuthError> {
    issue(&state, params).await.map(Json)
}

async fn issue(state: &SharedState, params: AuthTokenParams) -> Result<AuthorizationToken, AuthError> {
    match params {
        AuthTokenParams {
            email: Some(email),
            password: Some(password),
            ..
        } => state.tokens.issue_from_password(&email, &password).await,
        AuthTokenParams {
            provider: Some(provider),
            access_token: Some(access_token),
            ..
        } => state.tokens.issue_from_provider(&provider, &access_token).await,
        AuthTokenParams {
            refresh_token: Some(refresh_token),
            ..
        } => state.tokens.refresh(&refresh_token).await,
        _ => Err(AuthError::InvalidArgument(
            "Provide email and password, provider and access_token, or refresh_token.".into(),
        )),
    }
}

#[derive(Debug, Deserialize)]
struct AuthTokenQuery {
    auth_token: Option<String>,
}

/// DELETE /auth_token — Invalidate the caller's token (logout).
async fn auth_token_delete(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Query(q): Query<AuthTokenQuery>,
) -> Result<StatusCode, AuthError> {
    let token = bearer_token(&headers).or(q.auth_token);
    state.tokens.invalidate(token.as_deref()).await?;
    Ok(StatusCode::OK)
}

/// The token from an `Authorization: Bearer` header, if there is one.
fn bearer_token(headers: &HeaderMap) -> Option<String> {
    headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(|t| t.trim().to_string())
        .filter(|t| !t.is_empty())
}

// =============================================================================
// OAuth Endpoints
// =============================================================================

#[derive(Debug, Deserialize)]
struct AuthorizeBody {
    client_id: Option<String>,
    scope: Option<String>,
}

/// POST /oauth/authorize — Grant a client a one-time authorization code.
async fn oauth_authorize(
    State(state): State<SharedState>,
    headers: HeaderMap,
    Form(body): Form<AuthorizeBody>,
) -> Result<(StatusCode, Json<AuthorizationCode>), AuthError> {
    let token = bearer_token(&headers)
        .ok_or_else(|| AuthError::Authentication("No auth information was given.".into()))?;
    let client_id = body
        .client_id
        .ok_or_else(|| AuthError::InvalidArgument("client_id is required.".into()))?;

    let code = state.tokens.authorize(&token, &client_id, body.scope).await?;
    Ok((StatusCode::CREATED, Json(code)))
}

#[derive(Debug, Deserialize)]
struct TokenGrantBody {
    grant_type: Option<String>,
    code: Option<String>,
    client_id: Option<String>,
}

/// POST /oauth/token — Exchange an authorization code for an OAuth token.
async fn oauth_token(
    State(state): State<SharedState>,
    Form(body): Form<TokenGrantBody>,
) -> Result<Json<AuthorizationToken>, AuthError> {
    match body.grant_type.as_deref() {
        Some("authorization_code") => {}
        Some(other) => {
            return Err(AuthError::InvalidArgument(format!(
                "Unsupported grant type: {other}"
            )))
        }
        None => return Err(AuthError::InvalidArgument("grant_type is required.".into())),
    }

    let (code, client_id) = match (body.code, body.client_id) {
        (Some(code), Some(client_id)) => (code, client_id),
        _ => {
            return Err(AuthError::InvalidArgument(
                "code and client_id are required.".into(),
            ))
        }
    };

    state
        .tokens
        .issue_from_authorization_code(&code, &client_id)
        .await
        .map(Json)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::domain::{hash_password, User};
    use crate::providers::ProviderRegistry;
    use crate::store::MemoryStore;
    use crate::{AppState, TokenService};
    use axum::body::Body;
    use axum::http::Request;
    use std::collections::HashMap;
    use std::sync::Arc;
    use tower::ServiceExt;

    async fn setup_app() -> Router {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_user(User {
                id: "u1".into(),
                email: "u1@x.com".into(),
                password_hash: Some(hash_password("p1").unwrap()),
                registration: None,
                providers: HashMap::new(),
            })
            .await;

        let config = Config::default();
        let tokens = TokenService::with_store(store, ProviderRegistry::new(), &config).unwrap();
        router(Arc::new(AppState { config, tokens }))
    }

    async fn send(app: &Router, request: Request<Body>) -> (StatusCode, serde_json::Value) {
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let value = if body.is_empty() {
            serde_json::Value::Null
        } else {
            serde_json::from_slice(&body).unwrap()
        };
        (status, value)
    }

    fn form(method: &str, uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from(body.to_string()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    async fn login(app: &Router) -> serde_json::Value {
        let (status, body) = send(app, form("POST", "/auth_token", "email=u1%40x.com&password=p1")).await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn test_status_returns_ok() {
        let app = setup_app().await;
        let (status, body) = send(&app, get("/status")).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["service"], "ohmage-auth");
    }

    #[tokio::test]
    async fn test_password_login_returns_token() {
        let app = setup_app().await;
        let body = login(&app).await;
        assert_eq!(body["user_id"], "u1");
        assert!(body["access_token"].is_string());
        assert!(body["refresh_token"].is_string());
        assert!(body.get("next_token").is_none());
    }

    #[tokio::test]
    async fn test_wrong_password_is_unauthorized() {
        let app = setup_app().await;
        let (status, body) = send(&app, get("/auth_token?email=u1%40x.com&password=nope")).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "authentication_error");
    }

    #[tokio::test]
    async fn test_refresh_via_query() {
        let app = setup_app().await;
        let first = login(&app).await;
        let refresh = first["refresh_token"].as_str().unwrap();

        let (status, second) = send(&app, get(&format!("/auth_token?refresh_token={refresh}"))).await;
        assert_eq!(status, StatusCode::OK);
        assert_ne!(second["access_token"], first["access_token"]);

        let (status, body) = send(&app, get("/auth_token?refresh_token=unknown")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["error"]["code"], "unknown_token");
    }

    #[tokio::test]
    async fn test_logout_then_refresh_is_rejected() {
        let app = setup_app().await;
        let token = login(&app).await;
        let access = token["access_token"].as_str().unwrap();
        let refresh = token["refresh_token"].as_str().unwrap();

        let request = Request::builder()
            .method("DELETE")
            .uri("/auth_token")
            .header("authorization", format!("Bearer {access}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);

        let (status, body) = send(&app, form("POST", "/auth_token", &format!("refresh_token={refresh}"))).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"]["code"], "token_invalidated");
    }

    #[tokio::test]
    async fn test_logout_accepts_query_token() {
        let app = setup_app().await;
        let token = login(&app).await;
        let access = token["access_token"].as_str().unwrap();

        let request = Request::builder()
            .method("DELETE")
            .uri(format!("/auth_token?auth_token={access}"))
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_logout_without_token_is_unauthorized() {
        let app = setup_app().await;
        let request = Request::builder()
            .method("DELETE")
            .uri("/auth_token")
            .body(Body::empty())
            .unwrap();
        let (status, _) = send(&app, request).await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn test_missing_parameters_are_bad_request() {
        let app = setup_app().await;
        let (status, body) = send(&app, get("/auth_token?email=u1%40x.com")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_argument");
    }

    #[tokio::test]
    async fn test_unknown_provider_is_bad_request() {
        let app = setup_app().await;
        let (status, body) = send(&app, get("/auth_token?provider=myspace&access_token=abc")).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "unknown_provider");
    }

    #[tokio::test]
    async fn test_authorization_code_flow() {
        let app = setup_app().await;
        let token = login(&app).await;
        let access = token["access_token"].as_str().unwrap();

        let request = Request::builder()
            .method("POST")
            .uri("/oauth/authorize")
            .header("authorization", format!("Bearer {access}"))
            .header("content-type", "application/x-www-form-urlencoded")
            .body(Body::from("client_id=survey-app&scope=read"))
            .unwrap();
        let (status, grant) = send(&app, request).await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(grant["client_id"], "survey-app");
        let code = grant["code"].as_str().unwrap();

        let (status, oauth) = send(
            &app,
            form(
                "POST",
                "/oauth/token",
                &format!("grant_type=authorization_code&code={code}&client_id=survey-app"),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(oauth["user_id"], "u1");
        assert!(oauth.get("refresh_token").is_none());
    }

    #[tokio::test]
    async fn test_unsupported_grant_type() {
        let app = setup_app().await;
        let (status, body) = send(
            &app,
            form("POST", "/oauth/token", "grant_type=password&code=x&client_id=y"),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "invalid_argument");
    }
}
