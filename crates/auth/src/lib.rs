use argon2::password_hash::{
    rand_core::OsRng, PasswordHash, PasswordHasher, PasswordVerifier, SaltString,
};
use argon2::Argon2;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine as _;
use chat3d_config::AuthConfig;
use chrono::{DateTime, Duration, SecondsFormat, Utc};
use cuid2::CuidConstructor;
use once_cell::sync::Lazy;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool, Transaction};
use thiserror::Error;
use tracing::{debug, info};

const MIN_PASSWORD_LENGTH: usize = 8;
const MAX_SESSION_TTL_SECONDS: u64 = 10 * 365 * 86_400;

static CUID: Lazy<CuidConstructor> = Lazy::new(CuidConstructor::new);

#[derive(Clone)]
pub struct Authenticator {
    pool: SqlitePool,
    session_ttl: Duration,
    config: AuthConfig,
}

#[derive(Debug, Error)]
pub enum AuthError {
    #[error("user already exists")]
    UserExists,
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error("{0}")]
    InvalidInput(String),
    #[error("user not found")]
    UserNotFound,
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("password hashing failed: {0}")]
    PasswordHash(#[from] argon2::password_hash::Error),
    #[error("session not found")]
    SessionNotFound,
    #[error("session expired")]
    SessionExpired,
    #[error("invalid session token")]
    InvalidSession,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UserRole {
    User,
    Admin,
}

impl UserRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            UserRole::User => "user",
            UserRole::Admin => "admin",
        }
    }

    fn from_db(value: &str) -> Self {
        if value == "admin" {
            UserRole::Admin
        } else {
            UserRole::User
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct User {
    #[serde(skip_serializing)]
    pub id: i64,
    pub public_id: String,
    pub email: Option<String>,
    pub display_name: Option<String>,
    pub role: UserRole,
    pub is_active: bool,
    pub created_at: String,
}

impl User {
    pub fn is_admin(&self) -> bool {
        self.role == UserRole::Admin
    }
}

#[derive(Debug, Clone)]
pub struct AuthSession {
    pub token: String,
    pub user_id: i64,
    pub expires_at: DateTime<Utc>,
}

/// Input for a password account.
#[derive(Clone)]
pub struct NewAccount<'a> {
    pub email: &'a str,
    pub password: &'a str,
    pub display_name: Option<&'a str>,
    pub role: UserRole,
}

impl Authenticator {
    pub fn new(pool: SqlitePool, config: AuthConfig) -> Self {
        let ttl_seconds = config.session_ttl_seconds.min(MAX_SESSION_TTL_SECONDS) as i64;
        let session_ttl = Duration::seconds(ttl_seconds);

        Self {
            pool,
            session_ttl,
            config,
        }
    }

    pub fn pool(&self) -> SqlitePool {
        self.pool.clone()
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    pub async fn register_with_password(&self, account: NewAccount<'_>) -> Result<User, AuthError> {
        let mut tx = self.pool.begin().await?;
        let user = self.register_in_transaction(&mut tx, account).await?;
        tx.commit().await?;
        Ok(user)
    }

    /// Create a password account inside a caller-owned transaction so that
    /// registration can be committed together with related bookkeeping.
    pub async fn register_in_transaction(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        account: NewAccount<'_>,
    ) -> Result<User, AuthError> {
        let email = normalize_email(account.email)?;
        validate_password(account.password)?;

        let existing = sqlx::query("SELECT id FROM users WHERE email = ?")
            .bind(&email)
            .fetch_optional(&mut **tx)
            .await?;

        if existing.is_some() {
            return Err(AuthError::UserExists);
        }

        let now = timestamp();
        let password_hash = self.hash_password(account.password)?;
        let display_name = account
            .display_name
            .map(str::trim)
            .filter(|name| !name.is_empty());

        let public_id = new_public_id();
        let user_id = sqlx::query(
            "INSERT INTO users (public_id, email, display_name, role, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(&public_id)
        .bind(&email)
        .bind(display_name)
        .bind(account.role.as_str())
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await?
        .last_insert_rowid();

        sqlx::query(
            "INSERT INTO user_identities (user_id, provider, provider_uid, secret, created_at, updated_at) VALUES (?, 'password', ?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&email)
        .bind(password_hash)
        .bind(&now)
        .bind(&now)
        .execute(&mut **tx)
        .await?;

        info!(user = %public_id, role = account.role.as_str(), "registered password account");

        Ok(User {
            id: user_id,
            public_id,
            email: Some(email),
            display_name: display_name.map(str::to_owned),
            role: account.role,
            is_active: true,
            created_at: now,
        })
    }

    pub async fn login_with_password(
        &self,
        email: &str,
        password: &str,
    ) -> Result<(User, AuthSession), AuthError> {
        let email = email.trim().to_lowercase();
        let identity = sqlx::query(
            "SELECT user_id, secret FROM user_identities WHERE provider = 'password' AND provider_uid = ?",
        )
        .bind(&email)
        .fetch_optional(&self.pool)
        .await?;

        let Some(row) = identity else {
            return Err(AuthError::InvalidCredentials);
        };

        let secret: String = row.try_get("secret")?;
        verify_password(password, &secret)?;

        let user_id: i64 = row.try_get("user_id")?;
        let user = self.fetch_user(user_id).await?;
        let session = self.issue_session(user_id).await?;

        debug!(user = %user.public_id, "password login succeeded");
        Ok((user, session))
    }

    pub async fn authenticate_token(&self, token: &str) -> Result<(User, AuthSession), AuthError> {
        let row = sqlx::query("SELECT user_id, expires_at FROM sessions WHERE token = ?")
            .bind(token)
            .fetch_optional(&self.pool)
            .await?;

        let Some(row) = row else {
            return Err(AuthError::SessionNotFound);
        };

        let user_id: i64 = row.try_get("user_id")?;
        let expires_at: String = row.try_get("expires_at")?;

        let expires_at = DateTime::parse_from_rfc3339(&expires_at)
            .map_err(|_| AuthError::InvalidSession)?
            .with_timezone(&Utc);

        if expires_at <= Utc::now() {
            sqlx::query("DELETE FROM sessions WHERE token = ?")
                .bind(token)
                .execute(&self.pool)
                .await?;
            return Err(AuthError::SessionExpired);
        }

        let user = self.fetch_user(user_id).await?;
        let session = AuthSession {
            token: token.to_owned(),
            user_id,
            expires_at,
        };

        Ok((user, session))
    }

    pub async fn revoke_session(&self, token: &str) -> Result<(), AuthError> {
        sqlx::query("DELETE FROM sessions WHERE token = ?")
            .bind(token)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Replace the password after verifying the current one. Every session
    /// except `keep_token` is revoked.
    pub async fn change_password(
        &self,
        user_id: i64,
        current_password: &str,
        new_password: &str,
        keep_token: &str,
    ) -> Result<(), AuthError> {
        validate_password(new_password)?;

        let secret = sqlx::query_scalar::<_, Option<String>>(
            "SELECT secret FROM user_identities WHERE provider = 'password' AND user_id = ?",
        )
        .bind(user_id)
        .fetch_optional(&self.pool)
        .await?
        .flatten();

        let secret = secret.ok_or(AuthError::InvalidCredentials)?;
        verify_password(current_password, &secret)?;

        let hash = self.hash_password(new_password)?;
        let now = timestamp();

        let mut tx = self.pool.begin().await?;
        sqlx::query(
            "UPDATE user_identities SET secret = ?, updated_at = ? WHERE provider = 'password' AND user_id = ?",
        )
        .bind(hash)
        .bind(&now)
        .bind(user_id)
        .execute(&mut *tx)
        .await?;

        let revoked = sqlx::query("DELETE FROM sessions WHERE user_id = ? AND token != ?")
            .bind(user_id)
            .bind(keep_token)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        info!(user_id, revoked, "password changed");
        Ok(())
    }

    pub async fn user_profile(&self, user_id: i64) -> Result<User, AuthError> {
        self.fetch_user(user_id).await
    }

    pub async fn find_user_by_email(&self, email: &str) -> Result<User, AuthError> {
        let user_id: Option<i64> = sqlx::query_scalar("SELECT id FROM users WHERE email = ?")
            .bind(email.trim().to_lowercase())
            .fetch_optional(&self.pool)
            .await?;

        match user_id {
            Some(id) => self.fetch_user(id).await,
            None => Err(AuthError::UserNotFound),
        }
    }

    pub async fn update_display_name(
        &self,
        user_id: i64,
        display_name: Option<&str>,
    ) -> Result<User, AuthError> {
        let display_name = display_name.map(str::trim).filter(|name| !name.is_empty());
        if display_name.is_some_and(|name| name.chars().count() > 80) {
            return Err(AuthError::InvalidInput(
                "display name must be at most 80 characters".into(),
            ));
        }

        sqlx::query("UPDATE users SET display_name = ?, updated_at = ? WHERE id = ?")
            .bind(display_name)
            .bind(timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?;

        self.fetch_user(user_id).await
    }

    pub async fn set_role(&self, user_id: i64, role: UserRole) -> Result<User, AuthError> {
        let updated = sqlx::query("UPDATE users SET role = ?, updated_at = ? WHERE id = ?")
            .bind(role.as_str())
            .bind(timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(AuthError::UserNotFound);
        }

        self.fetch_user(user_id).await
    }

    /// Deactivating an account also drops its sessions.
    pub async fn set_active(&self, user_id: i64, active: bool) -> Result<User, AuthError> {
        let updated = sqlx::query("UPDATE users SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(active)
            .bind(timestamp())
            .bind(user_id)
            .execute(&self.pool)
            .await?
            .rows_affected();

        if updated == 0 {
            return Err(AuthError::UserNotFound);
        }

        if !active {
            sqlx::query("DELETE FROM sessions WHERE user_id = ?")
                .bind(user_id)
                .execute(&self.pool)
                .await?;
        }

        self.fetch_user(user_id).await
    }

    async fn fetch_user(&self, id: i64) -> Result<User, AuthError> {
        let row = sqlx::query(
            "SELECT id, public_id, email, display_name, role, is_active, created_at FROM users WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(AuthError::UserNotFound)?;

        user_from_row(&row)
    }

    pub async fn issue_session(&self, user_id: i64) -> Result<AuthSession, AuthError> {
        let token = generate_session_token();
        let now = Utc::now();
        let expires_at = now + self.session_ttl;

        sqlx::query(
            "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, ?, ?, ?)",
        )
        .bind(user_id)
        .bind(&token)
        .bind(now.to_rfc3339_opts(SecondsFormat::Micros, true))
        .bind(expires_at.to_rfc3339_opts(SecondsFormat::Micros, true))
        .execute(&self.pool)
        .await?;

        Ok(AuthSession {
            token,
            user_id,
            expires_at,
        })
    }

    fn hash_password(&self, password: &str) -> Result<String, argon2::password_hash::Error> {
        let salt = SaltString::generate(&mut OsRng);
        let hash = Argon2::default().hash_password(password.as_bytes(), &salt)?;
        Ok(hash.to_string())
    }
}

/// Map a `users` row selected with the standard column list.
pub fn user_from_row(row: &SqliteRow) -> Result<User, AuthError> {
    let role: String = row.try_get("role")?;
    Ok(User {
        id: row.try_get("id")?,
        public_id: row.try_get("public_id")?,
        email: row.try_get("email")?,
        display_name: row.try_get("display_name")?,
        role: UserRole::from_db(&role),
        is_active: row.try_get("is_active")?,
        created_at: row.try_get("created_at")?,
    })
}

pub fn new_public_id() -> String {
    CUID.create_id()
}

fn generate_session_token() -> String {
    let mut bytes = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut bytes);
    URL_SAFE_NO_PAD.encode(bytes)
}

fn timestamp() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Trim and lower-case an email address, rejecting obviously malformed ones.
pub fn normalize_email(email: &str) -> Result<String, AuthError> {
    let email = email.trim().to_lowercase();
    let valid = email
        .split_once('@')
        .is_some_and(|(local, domain)| !local.is_empty() && domain.contains('.'));
    if !valid {
        return Err(AuthError::InvalidInput("a valid email address is required".into()));
    }
    Ok(email)
}

fn validate_password(password: &str) -> Result<(), AuthError> {
    if password.chars().count() < MIN_PASSWORD_LENGTH {
        return Err(AuthError::InvalidInput(format!(
            "password must be at least {MIN_PASSWORD_LENGTH} characters"
        )));
    }
    Ok(())
}

fn verify_password(password: &str, secret: &str) -> Result<(), AuthError> {
    let stored_hash = PasswordHash::new(secret)?;
    Argon2::default()
        .verify_password(password.as_bytes(), &stored_hash)
        .map_err(|_| AuthError::InvalidCredentials)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn normalize_email_lowercases_and_trims() {
        assert_eq!(
            normalize_email("  Alice@Example.COM ").unwrap(),
            "alice@example.com"
        );
    }

    #[test]
    fn normalize_email_rejects_garbage() {
        for candidate in ["", "alice", "@example.com", "alice@localhost"] {
            assert!(matches!(
                normalize_email(candidate),
                Err(AuthError::InvalidInput(_))
            ));
        }
    }

    #[test]
    fn session_tokens_are_unique_and_url_safe() {
        let first = generate_session_token();
        let second = generate_session_token();
        assert_ne!(first, second);
        assert_eq!(first.len(), 43);
        assert!(first
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_'));
    }
}
