use chat3d_auth::{user_from_row, Authenticator, User, UserRole};
use sqlx::{Sqlite, SqlitePool};
use tracing::{info, warn};

use super::error::ServiceError;
use crate::routes::models::{AdminSettings, AdminStats};
use crate::util::timestamp;

const SETTINGS_KEY: &str = "app";
const MAX_INVITATION_QUOTA: u32 = 1000;
const MAX_INVITATION_TTL_HOURS: u32 = 24 * 365;
const MAX_ANNOUNCEMENT_CHARS: usize = 2000;

/// Stored settings, or the defaults when none were saved or the stored
/// document cannot be parsed.
pub async fn load_settings<'e, E>(executor: E) -> Result<AdminSettings, ServiceError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let raw: Option<String> = sqlx::query_scalar("SELECT value FROM admin_settings WHERE key = ?")
        .bind(SETTINGS_KEY)
        .fetch_optional(executor)
        .await?;

    let Some(raw) = raw else {
        return Ok(AdminSettings::default());
    };

    match serde_json::from_str(&raw) {
        Ok(settings) => Ok(settings),
        Err(error) => {
            warn!(%error, "stored admin settings are unreadable, using defaults");
            Ok(AdminSettings::default())
        }
    }
}

pub async fn save_settings(pool: &SqlitePool, mut settings: AdminSettings) -> Result<AdminSettings, ServiceError> {
    if settings.invitation_quota > MAX_INVITATION_QUOTA {
        return Err(ServiceError::validation(format!(
            "invitation_quota must be at most {MAX_INVITATION_QUOTA}"
        )));
    }
    if !(1..=MAX_INVITATION_TTL_HOURS).contains(&settings.invitation_ttl_hours) {
        return Err(ServiceError::validation(format!(
            "invitation_ttl_hours must be between 1 and {MAX_INVITATION_TTL_HOURS}"
        )));
    }

    settings.announcement = settings
        .announcement
        .map(|text| text.trim().to_string())
        .filter(|text| !text.is_empty());
    if settings
        .announcement
        .as_ref()
        .is_some_and(|text| text.chars().count() > MAX_ANNOUNCEMENT_CHARS)
    {
        return Err(ServiceError::validation(format!(
            "announcement must be at most {MAX_ANNOUNCEMENT_CHARS} characters"
        )));
    }

    let encoded = serde_json::to_string(&settings)
        .map_err(|error| ServiceError::internal(format!("failed to encode settings: {error}")))?;

    sqlx::query(
        r#"
        INSERT INTO admin_settings (key, value, updated_at) VALUES (?, ?, ?)
        ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at
        "#,
    )
    .bind(SETTINGS_KEY)
    .bind(encoded)
    .bind(timestamp())
    .execute(pool)
    .await?;

    info!(mode = ?settings.registration_mode, quota = settings.invitation_quota, "admin settings updated");
    Ok(settings)
}

pub async fn stats(pool: &SqlitePool) -> Result<AdminStats, ServiceError> {
    let (users, active_users): (i64, i64) =
        sqlx::query_as("SELECT COUNT(*), COALESCE(SUM(is_active), 0) FROM users")
            .fetch_one(pool)
            .await?;
    let contexts: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_contexts")
        .fetch_one(pool)
        .await?;
    let (items, failed_items): (i64, i64) = sqlx::query_as(
        r#"
        SELECT COUNT(*),
               COALESCE(SUM(CASE WHEN json_extract(segments, '$[0].kind') = 'error' THEN 1 ELSE 0 END), 0)
        FROM chat_items
        "#,
    )
    .fetch_one(pool)
    .await?;
    let pending_waitlist: i64 =
        sqlx::query_scalar("SELECT COUNT(*) FROM waitlist_entries WHERE status = 'pending'")
            .fetch_one(pool)
            .await?;

    Ok(AdminStats {
        users,
        active_users,
        contexts,
        items,
        failed_items,
        pending_waitlist,
    })
}

pub async fn list_users(pool: &SqlitePool) -> Result<Vec<User>, ServiceError> {
    let rows = sqlx::query(
        "SELECT id, public_id, email, display_name, role, is_active, created_at FROM users ORDER BY created_at ASC, id ASC",
    )
    .fetch_all(pool)
    .await?;

    rows.iter()
        .map(|row| user_from_row(row).map_err(ServiceError::from))
        .collect()
}

pub async fn find_user(pool: &SqlitePool, public_id: &str) -> Result<User, ServiceError> {
    let row = sqlx::query(
        "SELECT id, public_id, email, display_name, role, is_active, created_at FROM users WHERE public_id = ?",
    )
    .bind(public_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("user not found"))?;

    Ok(user_from_row(&row)?)
}

/// Change another account's role or active flag. Administrators cannot
/// demote or deactivate themselves.
pub async fn update_user(
    authenticator: &Authenticator,
    acting: &User,
    target_public_id: &str,
    role: Option<UserRole>,
    is_active: Option<bool>,
) -> Result<User, ServiceError> {
    let pool = authenticator.pool();
    let mut target = find_user(&pool, target_public_id).await?;

    if target.id == acting.id {
        if role.is_some_and(|role| role != UserRole::Admin) {
            return Err(ServiceError::forbidden("you cannot remove your own admin role"));
        }
        if is_active == Some(false) {
            return Err(ServiceError::forbidden("you cannot deactivate your own account"));
        }
    }

    if let Some(role) = role {
        target = authenticator.set_role(target.id, role).await?;
    }
    if let Some(active) = is_active {
        target = authenticator.set_active(target.id, active).await?;
    }

    info!(
        admin = %acting.public_id,
        user = %target.public_id,
        role = target.role.as_str(),
        active = target.is_active,
        "user updated by admin"
    );
    Ok(target)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::routes::models::RegistrationMode;
    use crate::services::test_utils::{create_admin, create_test_db, create_user, test_authenticator};

    #[tokio::test]
    async fn settings_default_until_saved() {
        let (pool, _dir) = create_test_db().await;
        assert_eq!(load_settings(&pool).await.unwrap(), AdminSettings::default());

        let saved = save_settings(
            &pool,
            AdminSettings {
                registration_mode: RegistrationMode::InviteOnly,
                invitation_quota: 2,
                invitation_ttl_hours: 48,
                announcement: Some("  maintenance tonight ".into()),
            },
        )
        .await
        .unwrap();
        assert_eq!(saved.announcement.as_deref(), Some("maintenance tonight"));
        assert_eq!(load_settings(&pool).await.unwrap(), saved);
    }

    #[tokio::test]
    async fn unreadable_settings_fall_back_to_defaults() {
        let (pool, _dir) = create_test_db().await;
        sqlx::query("INSERT INTO admin_settings (key, value, updated_at) VALUES ('app', 'not json', ?)")
            .bind(timestamp())
            .execute(&pool)
            .await
            .unwrap();

        assert_eq!(load_settings(&pool).await.unwrap(), AdminSettings::default());
    }

    #[tokio::test]
    async fn settings_are_validated() {
        let (pool, _dir) = create_test_db().await;
        let too_many = AdminSettings {
            invitation_quota: 5000,
            ..AdminSettings::default()
        };
        assert!(matches!(
            save_settings(&pool, too_many).await,
            Err(ServiceError::Validation(_))
        ));

        let no_ttl = AdminSettings {
            invitation_ttl_hours: 0,
            ..AdminSettings::default()
        };
        assert!(matches!(
            save_settings(&pool, no_ttl).await,
            Err(ServiceError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn stats_count_failed_items() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;
        let context = crate::services::context::create_context(&pool, user.id, "Bracket", None)
            .await
            .unwrap();
        for segments in [
            r#"[{"kind":"error","text":"boom","status":502}]"#,
            r#"[{"kind":"message","text":"hi"}]"#,
        ] {
            sqlx::query(
                "INSERT INTO chat_items (public_id, context_id, role, segments, created_at, updated_at) VALUES (?, ?, 'assistant', ?, ?, ?)",
            )
            .bind(chat3d_auth::new_public_id())
            .bind(context.row_id)
            .bind(segments)
            .bind(timestamp())
            .bind(timestamp())
            .execute(&pool)
            .await
            .unwrap();
        }

        let stats = stats(&pool).await.unwrap();
        assert_eq!(stats.users, 1);
        assert_eq!(stats.active_users, 1);
        assert_eq!(stats.contexts, 1);
        assert_eq!(stats.items, 2);
        assert_eq!(stats.failed_items, 1);
        assert_eq!(stats.pending_waitlist, 0);
    }

    #[tokio::test]
    async fn admins_cannot_lock_themselves_out() {
        let (pool, _dir) = create_test_db().await;
        let admin = create_admin(&pool, "root@example.com").await;
        let user = create_user(&pool, "alice@example.com").await;
        let authenticator = test_authenticator(&pool);

        let error = update_user(&authenticator, &admin, &admin.public_id, Some(UserRole::User), None)
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::Forbidden(_)));
        let error = update_user(&authenticator, &admin, &admin.public_id, None, Some(false))
            .await
            .unwrap_err();
        assert!(matches!(error, ServiceError::Forbidden(_)));

        let updated = update_user(&authenticator, &admin, &user.public_id, Some(UserRole::Admin), Some(false))
            .await
            .unwrap();
        assert!(updated.is_admin());
        assert!(!updated.is_active);

        let users = list_users(&pool).await.unwrap();
        assert_eq!(users.len(), 2);
    }

    #[tokio::test]
    async fn unknown_users_are_not_found() {
        let (pool, _dir) = create_test_db().await;
        assert!(matches!(find_user(&pool, "missing").await, Err(ServiceError::NotFound(_))));
    }
}
