use chrono::{Duration, Utc};
use sqlx::{Row, SqlitePool};
use chat3d_auth::{AuthError, Authenticator, NewAccount, UserRole};
use chat3d_config::{AuthConfig, DatabaseConfig};
use tempfile::TempDir;

type TestResult<T = ()> = Result<T, Box<dyn std::error::Error>>;

fn default_auth_config() -> AuthConfig {
    AuthConfig {
        session_ttl_seconds: 3_600,
        bootstrap_admin_emails: Vec::new(),
    }
}

fn account<'a>(email: &'a str, password: &'a str) -> NewAccount<'a> {
    NewAccount {
        email,
        password,
        display_name: None,
        role: UserRole::User,
    }
}

struct TestContext {
    pool: SqlitePool,
    authenticator: Authenticator,
    _temp_dir: TempDir,
}

impl TestContext {
    async fn new(config: AuthConfig) -> TestResult<Self> {
        let temp_dir = TempDir::new()?;
        let db_path = temp_dir.path().join("auth.sqlite");
        let pool = chat3d_database::initialize_database(&DatabaseConfig {
            url: format!("sqlite://{}", db_path.display()),
            max_connections: 5,
        })
        .await?;

        let authenticator = Authenticator::new(pool.clone(), config);

        Ok(Self {
            pool,
            authenticator,
            _temp_dir: temp_dir,
        })
    }

    async fn new_default() -> TestResult<Self> {
        Self::new(default_auth_config()).await
    }

    fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }
}

#[tokio::test]
async fn register_with_password_persists_user_and_password_identity() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let user = ctx
        .authenticator()
        .register_with_password(account("Alice@Example.com", "s3cret-pass"))
        .await?;

    assert_eq!(user.email.as_deref(), Some("alice@example.com"));
    assert_eq!(user.role, UserRole::User);
    assert!(user.is_active);

    let identity =
        sqlx::query("SELECT provider, provider_uid, secret FROM user_identities WHERE user_id = ?")
            .bind(user.id)
            .fetch_one(ctx.pool())
            .await?;

    let provider: String = identity.get("provider");
    let provider_uid: String = identity.get("provider_uid");
    let secret: String = identity.get("secret");

    assert_eq!(provider, "password");
    assert_eq!(provider_uid, "alice@example.com");
    assert!(secret.starts_with("$argon2"), "secret must be an argon2 hash");

    Ok(())
}

#[tokio::test]
async fn register_with_password_rejects_duplicate_email() -> TestResult {
    let ctx = TestContext::new_default().await?;
    ctx.authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let err = ctx
        .authenticator()
        .register_with_password(account("ALICE@example.com", "another-pass"))
        .await
        .expect_err("expected duplicate email to fail");

    assert!(matches!(err, AuthError::UserExists));

    let user_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM users")
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(user_count, 1, "no additional users should be created");

    Ok(())
}

#[tokio::test]
async fn register_with_password_validates_input() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let short = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "short"))
        .await
        .expect_err("short password should fail");
    assert!(matches!(short, AuthError::InvalidInput(_)));

    let bad_email = ctx
        .authenticator()
        .register_with_password(account("not-an-email", "long-enough"))
        .await
        .expect_err("bad email should fail");
    assert!(matches!(bad_email, AuthError::InvalidInput(_)));

    Ok(())
}

#[tokio::test]
async fn register_with_admin_role_persists_role() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let user = ctx
        .authenticator()
        .register_with_password(NewAccount {
            email: "root@example.com",
            password: "s3cret-pass",
            display_name: Some("  Root  "),
            role: UserRole::Admin,
        })
        .await?;

    let role: String = sqlx::query_scalar("SELECT role FROM users WHERE id = ?")
        .bind(user.id)
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(role, "admin");
    assert_eq!(user.display_name.as_deref(), Some("Root"));
    assert!(user.is_admin());

    Ok(())
}

#[tokio::test]
async fn login_with_password_returns_session_for_valid_credentials() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let (logged_in, session) = ctx
        .authenticator()
        .login_with_password(" Alice@example.com", "s3cret-pass")
        .await?;

    assert_eq!(logged_in.id, user.id);
    assert_eq!(session.user_id, user.id);
    assert!(session.expires_at > Utc::now());

    let stored: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE token = ?")
        .bind(&session.token)
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(stored, 1);

    Ok(())
}

#[tokio::test]
async fn login_with_password_rejects_incorrect_secret() -> TestResult {
    let ctx = TestContext::new_default().await?;
    ctx.authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let err = ctx
        .authenticator()
        .login_with_password("alice@example.com", "wrong-pass")
        .await
        .expect_err("wrong password should fail");
    assert!(matches!(err, AuthError::InvalidCredentials));

    Ok(())
}

#[tokio::test]
async fn login_with_password_rejects_unknown_email() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let err = ctx
        .authenticator()
        .login_with_password("nobody@example.com", "whatever-pass")
        .await
        .expect_err("unknown email should fail");
    assert!(matches!(err, AuthError::InvalidCredentials));

    Ok(())
}

#[tokio::test]
async fn authenticate_token_returns_user_and_session_for_active_token() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;
    let session = ctx.authenticator().issue_session(user.id).await?;

    let (resolved, resolved_session) = ctx
        .authenticator()
        .authenticate_token(&session.token)
        .await?;

    assert_eq!(resolved.public_id, user.public_id);
    assert_eq!(resolved_session.token, session.token);

    Ok(())
}

#[tokio::test]
async fn authenticate_token_deletes_expired_sessions() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let expired = (Utc::now() - Duration::hours(1)).to_rfc3339();
    sqlx::query(
        "INSERT INTO sessions (user_id, token, created_at, expires_at) VALUES (?, 'stale', ?, ?)",
    )
    .bind(user.id)
    .bind(&expired)
    .bind(&expired)
    .execute(ctx.pool())
    .await?;

    let err = ctx
        .authenticator()
        .authenticate_token("stale")
        .await
        .expect_err("expired session should fail");
    assert!(matches!(err, AuthError::SessionExpired));

    let remaining: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions WHERE token = 'stale'")
        .fetch_one(ctx.pool())
        .await?;
    assert_eq!(remaining, 0, "expired session should be removed");

    Ok(())
}

#[tokio::test]
async fn authenticate_token_rejects_unknown_token() -> TestResult {
    let ctx = TestContext::new_default().await?;

    let err = ctx
        .authenticator()
        .authenticate_token("missing")
        .await
        .expect_err("unknown token should fail");
    assert!(matches!(err, AuthError::SessionNotFound));

    Ok(())
}

#[tokio::test]
async fn change_password_keeps_current_session_and_revokes_others() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;
    let current = ctx.authenticator().issue_session(user.id).await?;
    let other = ctx.authenticator().issue_session(user.id).await?;

    ctx.authenticator()
        .change_password(user.id, "s3cret-pass", "new-s3cret-pass", &current.token)
        .await?;

    assert!(ctx.authenticator().authenticate_token(&current.token).await.is_ok());
    assert!(matches!(
        ctx.authenticator().authenticate_token(&other.token).await,
        Err(AuthError::SessionNotFound)
    ));

    assert!(ctx
        .authenticator()
        .login_with_password("alice@example.com", "new-s3cret-pass")
        .await
        .is_ok());
    assert!(matches!(
        ctx.authenticator()
            .login_with_password("alice@example.com", "s3cret-pass")
            .await,
        Err(AuthError::InvalidCredentials)
    ));

    Ok(())
}

#[tokio::test]
async fn change_password_requires_current_password() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let err = ctx
        .authenticator()
        .change_password(user.id, "wrong-pass", "new-s3cret-pass", "none")
        .await
        .expect_err("wrong current password should fail");
    assert!(matches!(err, AuthError::InvalidCredentials));

    Ok(())
}

#[tokio::test]
async fn deactivating_user_drops_sessions() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;
    let session = ctx.authenticator().issue_session(user.id).await?;

    let updated = ctx.authenticator().set_active(user.id, false).await?;
    assert!(!updated.is_active);

    assert!(matches!(
        ctx.authenticator().authenticate_token(&session.token).await,
        Err(AuthError::SessionNotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn set_role_and_lookup_by_email() -> TestResult {
    let ctx = TestContext::new_default().await?;
    ctx.authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let found = ctx
        .authenticator()
        .find_user_by_email("ALICE@example.com")
        .await?;
    let promoted = ctx
        .authenticator()
        .set_role(found.id, UserRole::Admin)
        .await?;
    assert!(promoted.is_admin());

    assert!(matches!(
        ctx.authenticator().find_user_by_email("bob@example.com").await,
        Err(AuthError::UserNotFound)
    ));
    assert!(matches!(
        ctx.authenticator().set_role(9_999, UserRole::Admin).await,
        Err(AuthError::UserNotFound)
    ));

    Ok(())
}

#[tokio::test]
async fn update_display_name_trims_and_clears() -> TestResult {
    let ctx = TestContext::new_default().await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let named = ctx
        .authenticator()
        .update_display_name(user.id, Some("  Alice  "))
        .await?;
    assert_eq!(named.display_name.as_deref(), Some("Alice"));

    let cleared = ctx
        .authenticator()
        .update_display_name(user.id, Some("   "))
        .await?;
    assert!(cleared.display_name.is_none());

    Ok(())
}

#[tokio::test]
async fn issue_session_applies_configured_ttl() -> TestResult {
    let ctx = TestContext::new(AuthConfig {
        session_ttl_seconds: 120,
        bootstrap_admin_emails: Vec::new(),
    })
    .await?;
    let user = ctx
        .authenticator()
        .register_with_password(account("alice@example.com", "s3cret-pass"))
        .await?;

    let before = Utc::now();
    let session = ctx.authenticator().issue_session(user.id).await?;
    let ttl = session.expires_at - before;

    assert!(ttl <= Duration::seconds(121));
    assert!(ttl >= Duration::seconds(110));

    Ok(())
}
