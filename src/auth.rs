//! Access-code login and signed session tokens.
//!
//! Users are identified by an access code. The configured `[[users]]` table
//! is reconciled into the `users` table at startup; login looks the code up
//! there and issues a token of the form `<payload>.<signature>`, where the
//! payload is base64url JSON (`sub`, `exp`) and the signature is hex
//! HMAC-SHA256 over the encoded payload.
//!
//! The token is accepted from an `Authorization: Bearer` header or from the
//! [`TOKEN_COOKIE`] cookie set by the HTML login form.

use anyhow::{bail, Context, Result};
use axum::http::{header, HeaderMap};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};

use crate::config::UserSeed;
use crate::models::{timestamp_to_utc, User};

type HmacSha256 = Hmac<Sha256>;

pub const TOKEN_COOKIE: &str = "mag_token";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Claims {
    /// User access code.
    pub sub: String,
    /// Expiry, unix seconds.
    pub exp: i64,
}

/// Canonical form of an access code.
pub fn normalize_code(code: &str) -> String {
    code.trim().to_uppercase()
}

pub fn issue_token(secret: &str, code: &str, ttl_minutes: i64, now: i64) -> Result<String> {
    let exp = ttl_minutes
        .checked_mul(60)
        .and_then(|ttl| now.checked_add(ttl))
        .context("token lifetime out of range")?;
    let claims = Claims {
        sub: normalize_code(code),
        exp,
    };
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(&claims)?);
    let signature = hex::encode(sign(secret, payload.as_bytes())?);
    Ok(format!("{}.{}", payload, signature))
}

/// Check signature and expiry and return the claims.
pub fn verify_token(secret: &str, token: &str, now: i64) -> Result<Claims> {
    let (payload, signature) = token.split_once('.').context("malformed token")?;
    let signature = hex::decode(signature).context("malformed token signature")?;

    let mut mac = new_mac(secret)?;
    mac.update(payload.as_bytes());
    mac.verify_slice(&signature)
        .map_err(|_| anyhow::anyhow!("invalid token signature"))?;

    let bytes = URL_SAFE_NO_PAD
        .decode(payload)
        .context("malformed token payload")?;
    let claims: Claims = serde_json::from_slice(&bytes).context("malformed token payload")?;
    if claims.exp <= now {
        bail!("token expired");
    }
    Ok(claims)
}

fn new_mac(secret: &str) -> Result<HmacSha256> {
    HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid secret: {}", e))
}

fn sign(secret: &str, data: &[u8]) -> Result<Vec<u8>> {
    let mut mac = new_mac(secret)?;
    mac.update(data);
    Ok(mac.finalize().into_bytes().to_vec())
}

/// Token from `Authorization: Bearer ...`, falling back to the session cookie.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    if let Some(value) = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
    {
        if let Some(token) = value.strip_prefix("Bearer ") {
            let token = token.trim();
            if !token.is_empty() {
                return Some(token.to_string());
            }
        }
    }

    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(name, _)| *name == TOKEN_COOKIE)
        .map(|(_, value)| value.to_string())
        .filter(|value| !value.is_empty())
}

/// `Set-Cookie` value carrying a session token.
pub fn session_cookie(token: &str, ttl_minutes: i64) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        TOKEN_COOKIE,
        token,
        ttl_minutes.saturating_mul(60)
    )
}

/// `Set-Cookie` value that clears the session.
pub fn clear_cookie() -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", TOKEN_COOKIE)
}

// ============ Users ============

/// Upsert the configured users. Users not in the list are left untouched.
pub async fn sync_users(pool: &SqlitePool, seeds: &[UserSeed]) -> Result<usize> {
    let now = chrono::Utc::now().timestamp();
    let mut tx = pool.begin().await?;
    for seed in seeds {
        sqlx::query(
            r#"
            INSERT INTO users (code, name, email, department, profile, active, created_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(code) DO UPDATE SET
                name = excluded.name,
                email = excluded.email,
                department = excluded.department,
                profile = excluded.profile,
                active = excluded.active
            "#,
        )
        .bind(normalize_code(&seed.code))
        .bind(&seed.name)
        .bind(&seed.email)
        .bind(&seed.department)
        .bind(&seed.profile)
        .bind(seed.active as i64)
        .bind(now)
        .execute(&mut *tx)
        .await?;
    }
    tx.commit().await?;
    Ok(seeds.len())
}

/// Active user with the given access code.
pub async fn find_active_user(pool: &SqlitePool, code: &str) -> Result<Option<User>> {
    let row = sqlx::query(
        "SELECT code, name, email, department, profile, active, created_at FROM users WHERE code = ? AND active = 1",
    )
    .bind(normalize_code(code))
    .fetch_optional(pool)
    .await?;
    Ok(row.as_ref().map(user_from_row))
}

/// Outcome of a successful login.
#[derive(Debug, Clone, Serialize)]
pub struct Session {
    pub token: String,
    pub user: User,
}

/// Exchange an access code for a session. `None` when the code is unknown
/// or the user is inactive.
pub async fn login(
    pool: &SqlitePool,
    secret: &str,
    ttl_minutes: i64,
    code: &str,
) -> Result<Option<Session>> {
    if normalize_code(code).is_empty() {
        return Ok(None);
    }
    let Some(user) = find_active_user(pool, code).await? else {
        tracing::info!("login rejected");
        return Ok(None);
    };
    let token = issue_token(secret, &user.code, ttl_minutes, chrono::Utc::now().timestamp())?;
    tracing::info!(user = %user.code, "login accepted");
    Ok(Some(Session { token, user }))
}

/// Resolve a token to its (still active) user.
pub async fn authenticate(pool: &SqlitePool, secret: &str, token: &str) -> Result<Option<User>> {
    let claims = match verify_token(secret, token, chrono::Utc::now().timestamp()) {
        Ok(c) => c,
        Err(e) => {
            tracing::debug!(error = %e, "token rejected");
            return Ok(None);
        }
    };
    find_active_user(pool, &claims.sub).await
}

fn user_from_row(row: &SqliteRow) -> User {
    User {
        code: row.get("code"),
        name: row.get("name"),
        email: row.get("email"),
        department: row.get("department"),
        profile: row.get("profile"),
        active: row.get::<i64, _>("active") != 0,
        created_at: timestamp_to_utc(row.get("created_at")),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrate;
    use axum::http::HeaderValue;
    use sqlx::sqlite::SqlitePoolOptions;

    const SECRET: &str = "test-secret";

    async fn pool() -> SqlitePool {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await
            .unwrap();
        migrate::apply(&pool).await.unwrap();
        pool
    }

    fn seed(code: &str, active: bool) -> UserSeed {
        UserSeed {
            code: code.into(),
            name: format!("User {}", code),
            email: String::new(),
            department: "Archive".into(),
            profile: "editor".into(),
            active,
        }
    }

    #[test]
    fn test_token_round_trip() {
        let token = issue_token(SECRET, " ab12 ", 10, 1_000).unwrap();
        let claims = verify_token(SECRET, &token, 1_001).unwrap();
        assert_eq!(claims.sub, "AB12");
        assert_eq!(claims.exp, 1_600);
    }

    #[test]
    fn test_token_rejects_tampering_and_expiry() {
        let token = issue_token(SECRET, "AB12", 1, 1_000).unwrap();
        assert!(verify_token("other-secret", &token, 1_001).is_err());
        assert!(verify_token(SECRET, &token, 1_060).is_err());

        let (_, sig) = token.split_once('.').unwrap();
        let forged_payload = URL_SAFE_NO_PAD.encode(br#"{"sub":"ROOT","exp":9999999999}"#);
        assert!(verify_token(SECRET, &format!("{}.{}", forged_payload, sig), 1_001).is_err());
        assert!(verify_token(SECRET, "garbage", 1_001).is_err());
    }

    #[test]
    fn test_token_lifetime_overflow_is_an_error() {
        assert!(issue_token(SECRET, "AB12", i64::MAX, 1_000).is_err());
        assert!(issue_token(SECRET, "AB12", i64::MAX / 60, 1_000).is_err());
        assert!(session_cookie("t", i64::MAX).ends_with(&format!("Max-Age={}", i64::MAX)));
    }

    #[test]
    fn test_token_from_headers() {
        let mut headers = HeaderMap::new();
        assert_eq!(token_from_headers(&headers), None);

        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; mag_token=abc.def"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("abc.def"));

        headers.insert(
            header::AUTHORIZATION,
            HeaderValue::from_static("Bearer xyz.123"),
        );
        assert_eq!(token_from_headers(&headers).as_deref(), Some("xyz.123"));
    }

    #[tokio::test]
    async fn test_login_and_sync() {
        let pool = pool().await;
        sync_users(&pool, &[seed("ab12", true), seed("OFF1", false)])
            .await
            .unwrap();

        let session = login(&pool, SECRET, 60, "  Ab12 ").await.unwrap().unwrap();
        assert_eq!(session.user.code, "AB12");
        assert_eq!(session.user.department, "Archive");

        let user = authenticate(&pool, SECRET, &session.token)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(user.code, "AB12");

        assert!(login(&pool, SECRET, 60, "OFF1").await.unwrap().is_none());
        assert!(login(&pool, SECRET, 60, "nope").await.unwrap().is_none());
        assert!(login(&pool, SECRET, 60, "  ").await.unwrap().is_none());

        // Deactivating through a re-sync revokes existing tokens.
        sync_users(&pool, &[seed("AB12", false)]).await.unwrap();
        assert!(authenticate(&pool, SECRET, &session.token)
            .await
            .unwrap()
            .is_none());
    }
}
