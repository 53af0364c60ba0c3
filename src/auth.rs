//! Users, passwords, sessions and route authorization.
//!
//! # Sessions
//!
//! A session token is `base64url(claims_json) "." hex(hmac_sha256(secret,
//! base64url(claims_json)))`. It is carried in an HTTP-only cookie and
//! verified on every request by the route guard in `server`.
//!
//! # Route protection
//!
//! [`required_role`] maps a request to the role it needs using the
//! [`ROUTE_RULES`] table; the first matching rule wins and unmatched
//! routes are public. Maintenance and cron endpoints are not in the table:
//! they check a static bearer secret with [`check_bearer`] instead.

use argon2::password_hash::{PasswordHash, PasswordHasher, PasswordVerifier, SaltString};
use argon2::Argon2;
use axum::http::{header, HeaderMap, Method};
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use hmac::{Hmac, Mac};
use rand::Rng;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::AuthConfig;
use crate::error::{Error, Result};
use crate::models::{ts, Role, User};

type HmacSha256 = Hmac<Sha256>;

pub const MIN_PASSWORD_LEN: usize = 8;

// ============ Passwords ============

pub fn hash_password(password: &str) -> Result<String> {
    let mut salt = [0u8; 16];
    rand::rng().fill(&mut salt);
    let salt = SaltString::encode_b64(&salt)
        .map_err(|e| anyhow::anyhow!("failed to encode salt: {}", e))?;
    let hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("failed to hash password: {}", e))?;
    Ok(hash.to_string())
}

pub fn verify_password(password: &str, hash: &str) -> bool {
    match PasswordHash::new(hash) {
        Ok(parsed) => Argon2::default()
            .verify_password(password.as_bytes(), &parsed)
            .is_ok(),
        Err(_) => false,
    }
}

// ============ Users ============

#[derive(Debug, Clone, Deserialize)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub role: Role,
    pub password: String,
}

fn user_from_row(row: &SqliteRow) -> Result<User> {
    let role: String = row.get("role");
    Ok(User {
        id: row.get("id"),
        email: row.get("email"),
        name: row.get("name"),
        role: role.parse().map_err(|e: String| anyhow::anyhow!(e))?,
        created_at: ts(row.get("created_at")),
    })
}

fn normalize_email(email: &str) -> Result<String> {
    let email = email.trim().to_lowercase();
    match email.split_once('@') {
        Some((local, domain)) if !local.is_empty() && domain.contains('.') => Ok(email),
        _ => Err(Error::bad_request(format!("invalid email address '{}'", email))),
    }
}

pub async fn create_user(pool: &SqlitePool, input: NewUser) -> Result<User> {
    let email = normalize_email(&input.email)?;
    let name = input.name.trim().to_string();
    if name.is_empty() {
        return Err(Error::bad_request("name must not be empty"));
    }
    if input.password.chars().count() < MIN_PASSWORD_LEN {
        return Err(Error::bad_request(format!(
            "password must be at least {} characters",
            MIN_PASSWORD_LEN
        )));
    }
    let password_hash = hash_password(&input.password)?;
    let id = Uuid::new_v4().to_string();

    let result = sqlx::query(
        "INSERT INTO users (id, email, name, password_hash, role, created_at) VALUES (?, ?, ?, ?, ?, ?)",
    )
    .bind(&id)
    .bind(&email)
    .bind(&name)
    .bind(&password_hash)
    .bind(input.role.as_str())
    .bind(Utc::now().timestamp())
    .execute(pool)
    .await;

    if let Err(e) = result {
        let err = Error::from(e);
        return Err(if err.is_unique_violation() {
            Error::Conflict(format!("a user with email {} already exists", email))
        } else {
            err
        });
    }

    info!(user_id = %id, email = %email, role = input.role.as_str(), "user created");
    get_user(pool, &id).await
}

pub async fn get_user(pool: &SqlitePool, id: &str) -> Result<User> {
    let row = sqlx::query("SELECT id, email, name, role, created_at FROM users WHERE id = ?")
        .bind(id)
        .fetch_optional(pool)
        .await?
        .ok_or_else(|| Error::not_found(format!("user {}", id)))?;
    user_from_row(&row)
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>> {
    let rows = sqlx::query("SELECT id, email, name, role, created_at FROM users ORDER BY email")
        .fetch_all(pool)
        .await?;
    rows.iter().map(user_from_row).collect()
}

/// Check credentials. Unknown email and wrong password give the same error.
pub async fn authenticate(pool: &SqlitePool, email: &str, password: &str) -> Result<User> {
    let invalid = || Error::Unauthorized("invalid email or password".to_string());
    let row = sqlx::query(
        "SELECT id, email, name, role, created_at, password_hash FROM users WHERE email = ?",
    )
    .bind(email.trim().to_lowercase())
    .fetch_optional(pool)
    .await?
    .ok_or_else(invalid)?;

    let hash: String = row.get("password_hash");
    if !verify_password(password, &hash) {
        warn!(email = %email.trim(), "failed login");
        return Err(invalid());
    }
    user_from_row(&row)
}

async fn admin_count(pool: &SqlitePool) -> Result<i64> {
    Ok(sqlx::query_scalar("SELECT COUNT(*) FROM users WHERE role = 'ADMIN'")
        .fetch_one(pool)
        .await?)
}

/// Delete a user. The last admin cannot be removed.
pub async fn delete_user(pool: &SqlitePool, id: &str) -> Result<()> {
    let user = get_user(pool, id).await?;
    if user.role == Role::Admin && admin_count(pool).await? <= 1 {
        return Err(Error::Conflict("cannot delete the last admin".to_string()));
    }
    sqlx::query("DELETE FROM users WHERE id = ?")
        .bind(id)
        .execute(pool)
        .await?;
    info!(user_id = %id, "user deleted");
    Ok(())
}

pub async fn set_role(pool: &SqlitePool, id: &str, role: Role) -> Result<User> {
    let user = get_user(pool, id).await?;
    if user.role == Role::Admin && role != Role::Admin && admin_count(pool).await? <= 1 {
        return Err(Error::Conflict("cannot demote the last admin".to_string()));
    }
    sqlx::query("UPDATE users SET role = ? WHERE id = ?")
        .bind(role.as_str())
        .bind(id)
        .execute(pool)
        .await?;
    get_user(pool, id).await
}

// ============ Sessions ============

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionClaims {
    /// User id.
    pub sub: String,
    pub email: String,
    pub name: String,
    pub role: Role,
    /// Expiry, unix seconds.
    pub exp: i64,
}

impl SessionClaims {
    pub fn for_user(user: &User, ttl_hours: i64) -> Self {
        Self {
            sub: user.id.clone(),
            email: user.email.clone(),
            name: user.name.clone(),
            role: user.role,
            exp: (Utc::now() + Duration::hours(ttl_hours)).timestamp(),
        }
    }
}

fn mac_for(secret: &str, payload: &str) -> Result<HmacSha256> {
    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|e| anyhow::anyhow!("invalid session secret: {}", e))?;
    mac.update(payload.as_bytes());
    Ok(mac)
}

pub fn sign_session(claims: &SessionClaims, secret: &str) -> Result<String> {
    let payload = URL_SAFE_NO_PAD.encode(serde_json::to_vec(claims)?);
    let signature = hex::encode(mac_for(secret, &payload)?.finalize().into_bytes());
    Ok(format!("{}.{}", payload, signature))
}

/// Verify signature and expiry of a session token.
pub fn verify_session(token: &str, secret: &str) -> Result<SessionClaims> {
    let invalid = || Error::Unauthorized("invalid session".to_string());
    let (payload, signature) = token.split_once('.').ok_or_else(invalid)?;
    let signature = hex::decode(signature).map_err(|_| invalid())?;
    mac_for(secret, payload)?
        .verify_slice(&signature)
        .map_err(|_| invalid())?;

    let json = URL_SAFE_NO_PAD.decode(payload).map_err(|_| invalid())?;
    let claims: SessionClaims = serde_json::from_slice(&json).map_err(|_| invalid())?;
    if claims.exp <= Utc::now().timestamp() {
        return Err(Error::Unauthorized("session expired".to_string()));
    }
    Ok(claims)
}

/// Value of the cookie `name` in the request's `Cookie` headers.
pub fn cookie_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .flat_map(|v| v.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(k, _)| *k == name)
        .map(|(_, v)| v)
}

/// Session claims from the request cookie, if present and valid.
pub fn session_from_headers(headers: &HeaderMap, cfg: &AuthConfig) -> Option<SessionClaims> {
    let token = cookie_value(headers, &cfg.cookie_name)?;
    verify_session(token, &cfg.session_secret).ok()
}

pub fn session_cookie(cfg: &AuthConfig, token: &str) -> String {
    format!(
        "{}={}; Path=/; HttpOnly; SameSite=Lax; Max-Age={}",
        cfg.cookie_name,
        token,
        cfg.session_ttl_hours * 3600
    )
}

pub fn clear_session_cookie(cfg: &AuthConfig) -> String {
    format!("{}=; Path=/; HttpOnly; SameSite=Lax; Max-Age=0", cfg.cookie_name)
}

// ============ Static bearer secrets ============

fn digest_eq(a: &str, b: &str) -> bool {
    let da = Sha256::digest(a.as_bytes());
    let db = Sha256::digest(b.as_bytes());
    da.iter().zip(db.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Check `Authorization: Bearer <secret>` against `expected`.
///
/// Unset `expected` means the feature is disabled (503). A missing header
/// is 401 and a wrong token 403.
pub fn check_bearer(headers: &HeaderMap, expected: Option<&str>, what: &str) -> Result<()> {
    let expected = expected.ok_or_else(|| Error::Unavailable(format!("{} is not configured", what)))?;
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .map(str::trim)
        .ok_or_else(|| Error::Unauthorized(format!("missing bearer token for {}", what)))?;

    if !digest_eq(token, expected) {
        warn!(what, "rejected bearer token");
        return Err(Error::Forbidden(format!("invalid {}", what)));
    }
    Ok(())
}

// ============ Route rules ============

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Methods {
    Any,
    /// Everything except GET, HEAD and OPTIONS.
    Writes,
}

#[derive(Debug, Clone, Copy)]
pub struct RouteRule {
    pub methods: Methods,
    /// Path prefix by segment; `*` matches any single segment.
    pub pattern: &'static str,
    pub role: Role,
}

const fn rule(methods: Methods, pattern: &'static str, role: Role) -> RouteRule {
    RouteRule {
        methods,
        pattern,
        role,
    }
}

pub const ROUTE_RULES: &[RouteRule] = &[
    rule(Methods::Any, "/api/auth/session", Role::Editor),
    rule(Methods::Any, "/api/admin/users", Role::Admin),
    rule(Methods::Any, "/api/admin/stats", Role::Admin),
    rule(Methods::Writes, "/api/pages/trash", Role::Admin),
    rule(Methods::Any, "/api/pages/trash", Role::Editor),
    rule(Methods::Writes, "/api/pages/*/permanent", Role::Admin),
    rule(Methods::Writes, "/api/pages", Role::Editor),
    rule(Methods::Any, "/api/shifts/sync", Role::Admin),
    rule(Methods::Any, "/api/animated-messages/all", Role::Editor),
    rule(Methods::Writes, "/api/animated-messages", Role::Editor),
    rule(Methods::Writes, "/api/reference", Role::Editor),
];

fn is_write(method: &Method) -> bool {
    !matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

fn pattern_matches(pattern: &str, path: &str) -> bool {
    let mut path_segments = path.trim_end_matches('/').split('/');
    for expected in pattern.split('/') {
        match path_segments.next() {
            Some(actual) if expected == "*" || expected == actual => {}
            _ => return false,
        }
    }
    true
}

/// Role needed for a request, or `None` when the route is public.
pub fn required_role(method: &Method, path: &str) -> Option<Role> {
    ROUTE_RULES
        .iter()
        .find(|r| {
            (r.methods == Methods::Any || is_write(method)) && pattern_matches(r.pattern, path)
        })
        .map(|r| r.role)
}

/// Decide whether a request may proceed.
pub fn authorize(
    method: &Method,
    path: &str,
    session: Option<&SessionClaims>,
) -> Result<()> {
    let Some(required) = required_role(method, path) else {
        return Ok(());
    };
    match session {
        None => Err(Error::Unauthorized("authentication required".to_string())),
        Some(claims) if claims.role.satisfies(required) => Ok(()),
        Some(_) => Err(Error::Forbidden(format!(
            "{} role required",
            required.as_str()
        ))),
    }
}

// ============ CLI ============

/// `scribe user add`.
pub async fn run_user_add(config: &crate::config::Config, input: NewUser) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let user = create_user(&pool, input).await?;
    println!("Created {} {} ({})", user.role.as_str(), user.email, user.id);
    pool.close().await;
    Ok(())
}

/// `scribe user list`.
pub async fn run_user_list(config: &crate::config::Config) -> anyhow::Result<()> {
    let pool = crate::db::connect(config).await?;
    let users = list_users(&pool).await?;
    if users.is_empty() {
        println!("No users. Create one with `scribe user add`.");
    }
    for user in &users {
        println!(
            "{:<32} {:<24} {:<7} {}",
            user.email,
            user.name,
            user.role.as_str(),
            user.created_at.format("%Y-%m-%d")
        );
    }
    pool.close().await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;
    use tempfile::TempDir;

    const SECRET: &str = "0123456789abcdef0123456789abcdef";

    fn claims(role: Role, exp_offset: i64) -> SessionClaims {
        SessionClaims {
            sub: "u1".into(),
            email: "a@example.com".into(),
            name: "A".into(),
            role,
            exp: Utc::now().timestamp() + exp_offset,
        }
    }

    #[test]
    fn test_password_hash_round_trip() {
        let hash = hash_password("correct horse").unwrap();
        assert!(hash.starts_with("$argon2"));
        assert!(verify_password("correct horse", &hash));
        assert!(!verify_password("wrong horse", &hash));
        assert!(!verify_password("correct horse", "not-a-hash"));
    }

    #[test]
    fn test_session_sign_and_verify() {
        let c = claims(Role::Editor, 3600);
        let token = sign_session(&c, SECRET).unwrap();
        assert_eq!(verify_session(&token, SECRET).unwrap(), c);

        let other = "fedcba9876543210fedcba9876543210";
        assert!(matches!(verify_session(&token, other), Err(Error::Unauthorized(_))));

        let (payload, sig) = token.split_once('.').unwrap();
        let forged = URL_SAFE_NO_PAD.encode(
            serde_json::to_vec(&claims(Role::Admin, 3600)).unwrap(),
        );
        assert!(verify_session(&format!("{}.{}", forged, sig), SECRET).is_err());
        assert!(verify_session(payload, SECRET).is_err());
    }

    #[test]
    fn test_expired_session_rejected() {
        let token = sign_session(&claims(Role::Admin, -10), SECRET).unwrap();
        let err = verify_session(&token, SECRET).unwrap_err();
        assert_eq!(err.to_string(), "session expired");
    }

    #[test]
    fn test_cookie_value() {
        let mut headers = HeaderMap::new();
        headers.insert(
            header::COOKIE,
            HeaderValue::from_static("theme=dark; scribe_session=abc.def; x=1"),
        );
        assert_eq!(cookie_value(&headers, "scribe_session"), Some("abc.def"));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn test_check_bearer_statuses() {
        let mut headers = HeaderMap::new();
        assert!(matches!(
            check_bearer(&headers, None, "admin passcode"),
            Err(Error::Unavailable(_))
        ));
        assert!(matches!(
            check_bearer(&headers, Some("s3cret"), "admin passcode"),
            Err(Error::Unauthorized(_))
        ));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer nope"));
        assert!(matches!(
            check_bearer(&headers, Some("s3cret"), "admin passcode"),
            Err(Error::Forbidden(_))
        ));
        headers.insert(header::AUTHORIZATION, HeaderValue::from_static("Bearer s3cret"));
        assert!(check_bearer(&headers, Some("s3cret"), "admin passcode").is_ok());
    }

    #[test]
    fn test_route_rules() {
        assert_eq!(required_role(&Method::GET, "/api/pages"), None);
        assert_eq!(required_role(&Method::GET, "/api/pages/abc/children"), None);
        assert_eq!(required_role(&Method::POST, "/api/pages"), Some(Role::Editor));
        assert_eq!(required_role(&Method::PATCH, "/api/pages/abc"), Some(Role::Editor));
        assert_eq!(required_role(&Method::GET, "/api/pages/trash"), Some(Role::Editor));
        assert_eq!(required_role(&Method::DELETE, "/api/pages/trash"), Some(Role::Admin));
        assert_eq!(
            required_role(&Method::DELETE, "/api/pages/abc/permanent"),
            Some(Role::Admin)
        );
        assert_eq!(required_role(&Method::GET, "/api/admin/users"), Some(Role::Admin));
        assert_eq!(required_role(&Method::POST, "/api/admin/shifts/reset"), None);
        assert_eq!(required_role(&Method::GET, "/api/pages-archive"), None);
    }

    #[test]
    fn test_authorize_roles() {
        let editor = claims(Role::Editor, 60);
        let admin = claims(Role::Admin, 60);
        assert!(authorize(&Method::GET, "/api/pages/tree", None).is_ok());
        assert!(matches!(
            authorize(&Method::POST, "/api/pages", None),
            Err(Error::Unauthorized(_))
        ));
        assert!(authorize(&Method::POST, "/api/pages", Some(&editor)).is_ok());
        assert!(matches!(
            authorize(&Method::DELETE, "/api/pages/trash", Some(&editor)),
            Err(Error::Forbidden(_))
        ));
        assert!(authorize(&Method::DELETE, "/api/pages/trash", Some(&admin)).is_ok());
    }

    #[tokio::test]
    async fn test_users_and_login() {
        let tmp = TempDir::new().unwrap();
        let pool = crate::db::open_migrated(&tmp.path().join("auth.sqlite"))
            .await
            .unwrap();
        let admin = create_user(
            &pool,
            NewUser {
                email: " Admin@Example.com ".into(),
                name: "Admin".into(),
                role: Role::Admin,
                password: "password123".into(),
            },
        )
        .await
        .unwrap();
        assert_eq!(admin.email, "admin@example.com");

        let dup = create_user(
            &pool,
            NewUser {
                email: "admin@example.com".into(),
                name: "Again".into(),
                role: Role::Editor,
                password: "password123".into(),
            },
        )
        .await;
        assert!(matches!(dup, Err(Error::Conflict(_))));

        assert!(authenticate(&pool, "ADMIN@example.com", "password123").await.is_ok());
        assert!(matches!(
            authenticate(&pool, "admin@example.com", "nope").await,
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            authenticate(&pool, "ghost@example.com", "password123").await,
            Err(Error::Unauthorized(_))
        ));

        assert!(matches!(delete_user(&pool, &admin.id).await, Err(Error::Conflict(_))));
        assert!(matches!(
            set_role(&pool, &admin.id, Role::Editor).await,
            Err(Error::Conflict(_))
        ));
    }
}
