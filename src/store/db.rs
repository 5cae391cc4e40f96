//! PostgreSQL-backed bins for tokens, users and authorization codes.
//!
//! Tables:
//! - `users` / `user_providers`: accounts and their linked provider identities
//! - `auth_tokens`: every token ever issued, chained through `next_token`
//! - `authorization_codes`: single-use OAuth grants

use async_trait::async_trait;
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use std::collections::HashMap;

use super::bin::{AuthorizationCodeBin, TokenBin, UserBin};
use crate::domain::{
    AuthorizationCode, AuthorizationToken, ProviderUserInformation, Registration, User,
};
use crate::error::AuthError;

const TOKEN_COLUMNS: &str = "access_token, refresh_token, user_id, created_at, expires_at, \
                             valid, next_token, authorization_code";

/// Store backed by PostgreSQL. Safe to share between server instances.
pub struct PgStore {
    pub pool: PgPool,
}

impl PgStore {
    pub async fn new(db_url: &str) -> Result<Self, AuthError> {
        let pool = sqlx::postgres::PgPoolOptions::new()
            .max_connections(20)
            .connect(db_url)
            .await
            .map_err(|e| AuthError::Database(format!("Failed to connect to PostgreSQL: {e}")))?;

        Ok(Self { pool })
    }

    /// Run schema migrations.
    pub async fn migrate(&self) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS users (
                id                      TEXT PRIMARY KEY,
                email                   TEXT NOT NULL UNIQUE,
                password_hash           TEXT,
                activation_id           TEXT,
                activation_requested_at TIMESTAMPTZ,
                activated_at            TIMESTAMPTZ,
                created_at              TIMESTAMPTZ DEFAULT NOW()
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS user_providers (
                user_id          TEXT NOT NULL REFERENCES users(id),
                provider_id      TEXT NOT NULL,
                provider_user_id TEXT NOT NULL,
                email            TEXT,
                fields           JSONB NOT NULL DEFAULT '{}',
                updated_at       TIMESTAMPTZ DEFAULT NOW(),
                PRIMARY KEY (provider_id, provider_user_id),
                UNIQUE (user_id, provider_id)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS auth_tokens (
                access_token       TEXT PRIMARY KEY,
                refresh_token      TEXT UNIQUE,
                user_id            TEXT NOT NULL,
                created_at         TIMESTAMPTZ NOT NULL,
                expires_at         TIMESTAMPTZ NOT NULL,
                valid              BOOLEAN NOT NULL DEFAULT true,
                next_token         TEXT REFERENCES auth_tokens(access_token),
                authorization_code TEXT
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS authorization_codes (
                code        TEXT PRIMARY KEY,
                client_id   TEXT NOT NULL,
                user_id     TEXT NOT NULL,
                scope       TEXT,
                created_at  TIMESTAMPTZ NOT NULL,
                expires_at  TIMESTAMPTZ NOT NULL,
                used_at     TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_auth_tokens_user ON auth_tokens(user_id)")
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn load_user(&self, row: Option<PgRow>) -> Result<Option<User>, AuthError> {
        let row = match row {
            Some(r) => r,
            None => return Ok(None),
        };

        let id: String = row.get("id");
        let registration = row
            .try_get::<Option<String>, _>("activation_id")?
            .map(|activation_id| Registration {
                activation_id,
                requested_at: row.try_get("activation_requested_at").ok(),
                activated_at: row.try_get("activated_at").ok(),
            });

        let provider_rows = sqlx::query(
            "SELECT provider_id, provider_user_id, email, fields FROM user_providers WHERE user_id = $1",
        )
        .bind(&id)
        .fetch_all(&self.pool)
        .await?;

        let providers = provider_rows
            .iter()
            .map(|r| {
                let fields: serde_json::Value = r.get(3);
                let info = ProviderUserInformation {
                    provider_id: r.get(0),
                    user_id: r.get(1),
                    email: r.try_get(2).ok(),
                    fields: match fields {
                        serde_json::Value::Object(map) => map,
                        _ => serde_json::Map::new(),
                    },
                };
                (info.provider_id.clone(), info)
            })
            .collect::<HashMap<_, _>>();

        Ok(Some(User {
            id,
            email: row.get("email"),
            password_hash: row.try_get("password_hash").ok(),
            registration,
            providers,
        }))
    }
}

fn token_from_row(row: &PgRow) -> AuthorizationToken {
    AuthorizationToken {
        access_token: row.get(0),
        refresh_token: row.try_get(1).ok(),
        user_id: row.get(2),
        created_at: row.get(3),
        expires_at: row.get(4),
        valid: row.get(5),
        next_token: row.try_get(6).ok(),
        authorization_code: row.try_get(7).ok(),
    }
}

fn code_from_row(row: &PgRow) -> AuthorizationCode {
    AuthorizationCode {
        code: row.get(0),
        client_id: row.get(1),
        user_id: row.get(2),
        scope: row.try_get(3).ok(),
        created_at: row.get(4),
        expires_at: row.get(5),
        used_at: row.try_get(6).ok(),
    }
}

async fn insert_token<'e, E>(executor: E, token: &AuthorizationToken) -> Result<u64, AuthError>
where
    E: sqlx::Executor<'e, Database = sqlx::Postgres>,
{
    let affected = sqlx::query(
        r#"
        INSERT INTO auth_tokens
            (access_token, refresh_token, user_id, created_at, expires_at,
             valid, next_token, authorization_code)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
        ON CONFLICT (access_token) DO NOTHING
        "#,
    )
    .bind(&token.access_token)
    .bind(&token.refresh_token)
    .bind(&token.user_id)
    .bind(token.created_at)
    .bind(token.expires_at)
    .bind(token.valid)
    .bind(&token.next_token)
    .bind(&token.authorization_code)
    .execute(executor)
    .await?
    .rows_affected();

    Ok(affected)
}

#[async_trait]
impl TokenBin for PgStore {
    async fn add_token(&self, token: &AuthorizationToken) -> Result<(), AuthError> {
        if insert_token(&self.pool, token).await? == 0 {
            return Err(AuthError::IllegalState(
                "an access token was minted twice".into(),
            ));
        }
        Ok(())
    }

    async fn get_token_from_access_token(
        &self,
        access_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM auth_tokens WHERE access_token = $1"
        ))
        .bind(access_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn get_token_from_refresh_token(
        &self,
        refresh_token: &str,
    ) -> Result<Option<AuthorizationToken>, AuthError> {
        let row = sqlx::query(&format!(
            "SELECT {TOKEN_COLUMNS} FROM auth_tokens WHERE refresh_token = $1"
        ))
        .bind(refresh_token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(token_from_row))
    }

    async fn chain_token(
        &self,
        old_access_token: &str,
        successor: &AuthorizationToken,
    ) -> Result<bool, AuthError> {
        let mut tx = self.pool.begin().await?;

        if insert_token(&mut *tx, successor).await? == 0 {
            tx.rollback().await?;
            return Err(AuthError::IllegalState(
                "an access token was minted twice".into(),
            ));
        }

        // Concurrent refreshers block on the row lock here; the loser re-reads
        // a non-null next_token and matches nothing.
        let affected = sqlx::query(
            r#"
            UPDATE auth_tokens
            SET next_token = $2
            WHERE access_token = $1 AND next_token IS NULL AND valid
            "#,
        )
        .bind(old_access_token)
        .bind(&successor.access_token)
        .execute(&mut *tx)
        .await?
        .rows_affected();

        if affected == 0 {
            tx.rollback().await?;
            return Ok(false);
        }

        tx.commit().await?;
        Ok(true)
    }

    async fn invalidate_token(&self, access_token: &str) -> Result<bool, AuthError> {
        let affected = sqlx::query("UPDATE auth_tokens SET valid = false WHERE access_token = $1")
            .bind(access_token)
            .execute(&self.pool)
            .await?
            .rows_affected();

        Ok(affected > 0)
    }
}

#[async_trait]
impl UserBin for PgStore {
    async fn get_user_from_email(&self, email: &str) -> Result<Option<User>, AuthError> {
        let row = sqlx::query("SELECT * FROM users WHERE email = $1")
            .bind(email)
            .fetch_optional(&self.pool)
            .await?;

        self.load_user(row).await
    }

    async fn get_user_from_provider(
        &self,
        provider_id: &str,
        provider_user_id: &str,
    ) -> Result<Option<User>, AuthError> {
        let row = sqlx::query(
            r#"
            SELECT u.*
            FROM users u
            JOIN user_providers p ON p.user_id = u.id
            WHERE p.provider_id = $1 AND p.provider_user_id = $2
            "#,
        )
        .bind(provider_id)
        .bind(provider_user_id)
        .fetch_optional(&self.pool)
        .await?;

        self.load_user(row).await
    }

    async fn update_provider_information(
        &self,
        user_id: &str,
        info: &ProviderUserInformation,
    ) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO user_providers (user_id, provider_id, provider_user_id, email, fields)
            VALUES ($1, $2, $3, $4, $5)
            ON CONFLICT (user_id, provider_id)
            DO UPDATE SET
                provider_user_id = EXCLUDED.provider_user_id,
                email = EXCLUDED.email,
                fields = EXCLUDED.fields,
                updated_at = NOW()
            "#,
        )
        .bind(user_id)
        .bind(&info.provider_id)
        .bind(&info.user_id)
        .bind(&info.email)
        .bind(serde_json::Value::Object(info.fields.clone()))
        .execute(&self.pool)
        .await?;

        Ok(())
    }
}

#[async_trait]
impl AuthorizationCodeBin for PgStore {
    async fn add_code(&self, code: &AuthorizationCode) -> Result<(), AuthError> {
        sqlx::query(
            r#"
            INSERT INTO authorization_codes
                (code, client_id, user_id, scope, created_at, expires_at, used_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(&code.code)
        .bind(&code.client_id)
        .bind(&code.user_id)
        .bind(&code.scope)
        .bind(code.created_at)
        .bind(code.expires_at)
        .bind(code.used_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn take_code(&self, code: &str) -> Result<Option<AuthorizationCode>, AuthError> {
        let row = sqlx::query(
            r#"
            UPDATE authorization_codes
            SET used_at = NOW()
            WHERE code = $1 AND used_at IS NULL
            RETURNING code, client_id, user_id, scope, created_at, expires_at, used_at
            "#,
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.as_ref().map(code_from_row))
    }
}

// These run against a scratch database: DATABASE_URL=... cargo test -- --ignored
#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use std::sync::Arc;

    async fn connect() -> Arc<PgStore> {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        let store = PgStore::new(&url).await.unwrap();
        store.migrate().await.unwrap();
        Arc::new(store)
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL in DATABASE_URL"]
    async fn test_chain_token_race_has_one_winner() {
        let store = connect().await;
        let old = AuthorizationToken::for_user("u-race", Duration::hours(1));
        store.add_token(&old).await.unwrap();

        let a = AuthorizationToken::refreshed_from(&old, Duration::hours(1));
        let b = AuthorizationToken::refreshed_from(&old, Duration::hours(1));
        let race_a = {
            let (store, old, a) = (store.clone(), old.access_token.clone(), a.clone());
            tokio::spawn(async move { store.chain_token(&old, &a).await })
        };
        let race_b = {
            let (store, old, b) = (store.clone(), old.access_token.clone(), b.clone());
            tokio::spawn(async move { store.chain_token(&old, &b).await })
        };
        let won_a = race_a.await.unwrap().unwrap();
        let won_b = race_b.await.unwrap().unwrap();
        assert!(won_a ^ won_b);

        let (winner, loser) = if won_a { (&a, &b) } else { (&b, &a) };
        let stored = store
            .get_token_from_access_token(&old.access_token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stored.next_token.as_deref(), Some(winner.access_token.as_str()));
        assert!(store
            .get_token_from_access_token(&winner.access_token)
            .await
            .unwrap()
            .is_some());
        // The loser's insert was rolled back.
        assert!(store
            .get_token_from_access_token(&loser.access_token)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL in DATABASE_URL"]
    async fn test_chain_token_refuses_invalidated() {
        let store = connect().await;
        let old = AuthorizationToken::for_user("u-logout", Duration::hours(1));
        store.add_token(&old).await.unwrap();
        assert!(store.invalidate_token(&old.access_token).await.unwrap());

        let next = AuthorizationToken::refreshed_from(&old, Duration::hours(1));
        assert!(!store.chain_token(&old.access_token, &next).await.unwrap());
        assert!(store
            .get_token_from_access_token(&next.access_token)
            .await
            .unwrap()
            .is_none());
        assert!(!store.invalidate_token("no-such-token").await.unwrap());
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL in DATABASE_URL"]
    async fn test_take_code_only_once() {
        let store = connect().await;
        let code = AuthorizationCode::new("survey-app", "u-code", None, Duration::minutes(10));
        store.add_code(&code).await.unwrap();

        let takes: Vec<_> = (0..4)
            .map(|_| {
                let (store, code) = (store.clone(), code.code.clone());
                tokio::spawn(async move { store.take_code(&code).await })
            })
            .collect();

        let mut taken = Vec::new();
        for take in takes {
            if let Some(code) = take.await.unwrap().unwrap() {
                taken.push(code);
            }
        }
        assert_eq!(taken.len(), 1);
        assert_eq!(taken[0].user_id, "u-code");
        assert!(taken[0].used_at.is_some());
        assert!(store.take_code(&code.code).await.unwrap().is_none());
    }

    #[tokio::test]
    #[ignore = "needs PostgreSQL in DATABASE_URL"]
    async fn test_registration_without_request_time() {
        let store = connect().await;
        let id = crate::domain::generate_token();
        let email = format!("{id}@example.com");
        sqlx::query("INSERT INTO users (id, email, activation_id) VALUES ($1, $2, 'act')")
            .bind(&id)
            .bind(&email)
            .execute(&store.pool)
            .await
            .unwrap();

        let user = store.get_user_from_email(&email).await.unwrap().unwrap();
        let registration = user.registration.unwrap();
        assert_eq!(registration.requested_at, None);
        assert!(registration.activated_at.is_none());
    }
}
