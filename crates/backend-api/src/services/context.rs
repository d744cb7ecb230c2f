use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tracing::{info, warn};

use super::error::ServiceError;
use super::storage::FileStorage;
use crate::routes::models::{ChatContext, ModelPreferences};
use crate::util::timestamp;

pub const MAX_CONTEXT_NAME_CHARS: usize = 120;
const DERIVED_NAME_CHARS: usize = 60;

const CONTEXT_COLUMNS: &str =
    "id, public_id, user_id, name, preferred_models, created_at, updated_at";

pub async fn list_contexts(pool: &SqlitePool, user_id: i64) -> Result<Vec<ChatContext>, ServiceError> {
    let rows = sqlx::query(&format!(
        "SELECT {CONTEXT_COLUMNS} FROM chat_contexts WHERE user_id = ? ORDER BY updated_at DESC, id DESC"
    ))
    .bind(user_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(context_from_row).collect()
}

pub async fn create_context(
    pool: &SqlitePool,
    user_id: i64,
    name: &str,
    preferred_models: Option<&ModelPreferences>,
) -> Result<ChatContext, ServiceError> {
    let name = validate_name(name)?;
    let preferred_models = preferred_models.filter(|prefs| !prefs.is_empty());
    let encoded = encode_preferences(preferred_models)?;
    let public_id = chat3d_auth::new_public_id();
    let now = timestamp();

    let row_id = sqlx::query(
        r#"
        INSERT INTO chat_contexts (public_id, user_id, name, preferred_models, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(&public_id)
    .bind(user_id)
    .bind(&name)
    .bind(&encoded)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?
    .last_insert_rowid();

    info!(context_id = %public_id, user_id, "created chat context");

    Ok(ChatContext {
        row_id,
        user_id,
        id: public_id,
        name,
        preferred_models: preferred_models.cloned(),
        created_at: now.clone(),
        updated_at: now,
    })
}

/// A context owned by `user_id`. Missing and foreign contexts are
/// indistinguishable to the caller.
pub async fn get_owned_context(
    pool: &SqlitePool,
    user_id: i64,
    context_id: &str,
) -> Result<ChatContext, ServiceError> {
    let row = sqlx::query(&format!(
        "SELECT {CONTEXT_COLUMNS} FROM chat_contexts WHERE public_id = ? AND user_id = ?"
    ))
    .bind(context_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("context not found"))?;

    context_from_row(&row)
}

pub async fn update_context(
    pool: &SqlitePool,
    user_id: i64,
    context_id: &str,
    name: Option<&str>,
    preferred_models: Option<&ModelPreferences>,
) -> Result<ChatContext, ServiceError> {
    let mut context = get_owned_context(pool, user_id, context_id).await?;

    if let Some(name) = name {
        context.name = validate_name(name)?;
    }
    if let Some(preferences) = preferred_models {
        context.preferred_models = Some(preferences.clone()).filter(|prefs| !prefs.is_empty());
    }

    context.updated_at = timestamp();
    sqlx::query("UPDATE chat_contexts SET name = ?, preferred_models = ?, updated_at = ? WHERE id = ?")
        .bind(&context.name)
        .bind(encode_preferences(context.preferred_models.as_ref())?)
        .bind(&context.updated_at)
        .bind(context.row_id)
        .execute(pool)
        .await?;

    Ok(context)
}

/// Delete a context owned by `user_id` together with its items and stored files.
pub async fn delete_context(
    pool: &SqlitePool,
    storage: &FileStorage,
    user_id: i64,
    context_id: &str,
) -> Result<(), ServiceError> {
    let context = get_owned_context(pool, user_id, context_id).await?;
    remove_context(pool, storage, &context).await
}

pub async fn touch_context(pool: &SqlitePool, row_id: i64) -> Result<(), ServiceError> {
    sqlx::query("UPDATE chat_contexts SET updated_at = ? WHERE id = ?")
        .bind(timestamp())
        .bind(row_id)
        .execute(pool)
        .await?;
    Ok(())
}

pub async fn find_context(pool: &SqlitePool, context_id: &str) -> Result<ChatContext, ServiceError> {
    let row = sqlx::query(&format!(
        "SELECT {CONTEXT_COLUMNS} FROM chat_contexts WHERE public_id = ?"
    ))
    .bind(context_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("context not found"))?;

    context_from_row(&row)
}

/// Delete any context regardless of owner. Used for moderation.
pub async fn remove_context(
    pool: &SqlitePool,
    storage: &FileStorage,
    context: &ChatContext,
) -> Result<(), ServiceError> {
    let owner: String = sqlx::query_scalar("SELECT public_id FROM users WHERE id = ?")
        .bind(context.user_id)
        .fetch_one(pool)
        .await?;

    sqlx::query("DELETE FROM chat_contexts WHERE id = ?")
        .bind(context.row_id)
        .execute(pool)
        .await?;

    // rows are gone either way; leftover files are only logged
    if let Err(error) = storage.remove_context(&owner, &context.id).await {
        warn!(context_id = %context.id, %error, "failed to remove context files");
    }

    info!(context_id = %context.id, "deleted chat context");
    Ok(())
}

/// Default name for a context created implicitly by a query.
pub fn derive_context_name(prompt: &str) -> String {
    let trimmed = prompt.trim();
    let mut name: String = trimmed.chars().take(DERIVED_NAME_CHARS).collect();
    if trimmed.chars().count() > DERIVED_NAME_CHARS {
        name = name.trim_end().to_string();
        name.push('…');
    }
    if name.is_empty() {
        "New part".to_string()
    } else {
        name
    }
}

fn validate_name(name: &str) -> Result<String, ServiceError> {
    let name = name.trim();
    if name.is_empty() {
        return Err(ServiceError::validation("context name must not be empty"));
    }
    if name.chars().count() > MAX_CONTEXT_NAME_CHARS {
        return Err(ServiceError::validation(format!(
            "context name must be at most {MAX_CONTEXT_NAME_CHARS} characters"
        )));
    }
    Ok(name.to_string())
}

fn encode_preferences(preferences: Option<&ModelPreferences>) -> Result<Option<String>, ServiceError> {
    preferences
        .map(serde_json::to_string)
        .transpose()
        .map_err(|error| ServiceError::internal(format!("failed to encode model preferences: {error}")))
}

pub(crate) fn context_from_row(row: &SqliteRow) -> Result<ChatContext, ServiceError> {
    let preferred_models: Option<String> = row.try_get("preferred_models")?;
    Ok(ChatContext {
        row_id: row.try_get("id")?,
        user_id: row.try_get("user_id")?,
        id: row.try_get("public_id")?,
        name: row.try_get("name")?,
        preferred_models: preferred_models
            .as_deref()
            .and_then(|raw| serde_json::from_str(raw).ok()),
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_utils::{create_test_db, create_user, test_storage};

    #[tokio::test]
    async fn create_and_list_orders_by_update() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;

        let first = create_context(&pool, user.id, "Bracket", None).await.unwrap();
        let second = create_context(&pool, user.id, "Gear", None).await.unwrap();
        touch_context(&pool, first.row_id).await.unwrap();

        let contexts = list_contexts(&pool, user.id).await.unwrap();
        assert_eq!(contexts.len(), 2);
        assert_eq!(contexts[0].id, first.id);
        assert_eq!(contexts[1].id, second.id);
    }

    #[tokio::test]
    async fn foreign_contexts_look_missing() {
        let (pool, _dir) = create_test_db().await;
        let alice = create_user(&pool, "alice@example.com").await;
        let bob = create_user(&pool, "bob@example.com").await;

        let context = create_context(&pool, alice.id, "Bracket", None).await.unwrap();
        let foreign = get_owned_context(&pool, bob.id, &context.id).await.unwrap_err();
        let missing = get_owned_context(&pool, bob.id, "nope").await.unwrap_err();

        assert!(matches!(foreign, ServiceError::NotFound(_)));
        assert_eq!(foreign.to_string(), missing.to_string());
    }

    #[tokio::test]
    async fn update_renames_and_stores_preferences() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;
        let context = create_context(&pool, user.id, "Bracket", None).await.unwrap();

        let preferences = ModelPreferences {
            conversation: None,
            codegen: Some("anthropic/claude-3.5-sonnet".into()),
        };
        let updated = update_context(&pool, user.id, &context.id, Some(" Shelf bracket "), Some(&preferences))
            .await
            .unwrap();
        assert_eq!(updated.name, "Shelf bracket");

        let reloaded = get_owned_context(&pool, user.id, &context.id).await.unwrap();
        assert_eq!(reloaded.preferred_models, Some(preferences));

        let cleared = update_context(&pool, user.id, &context.id, None, Some(&ModelPreferences::default()))
            .await
            .unwrap();
        assert!(cleared.preferred_models.is_none());
    }

    #[tokio::test]
    async fn empty_names_are_rejected() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;
        let error = create_context(&pool, user.id, "   ", None).await.unwrap_err();
        assert!(matches!(error, ServiceError::Validation(_)));
    }

    #[tokio::test]
    async fn delete_cascades_items_and_files() {
        let (pool, dir) = create_test_db().await;
        let storage = test_storage(&dir);
        let user = create_user(&pool, "alice@example.com").await;
        let context = create_context(&pool, user.id, "Bracket", None).await.unwrap();

        sqlx::query(
            "INSERT INTO chat_items (public_id, context_id, role, segments, created_at, updated_at) VALUES ('i1', ?, 'user', '[]', ?, ?)",
        )
        .bind(context.row_id)
        .bind(timestamp())
        .bind(timestamp())
        .execute(&pool)
        .await
        .unwrap();
        storage
            .save_artifact(&user.public_id, &context.id, "i1", "part.step", b"step")
            .await
            .unwrap();

        delete_context(&pool, &storage, user.id, &context.id).await.unwrap();

        let items: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM chat_items")
            .fetch_one(&pool)
            .await
            .unwrap();
        assert_eq!(items, 0);
        assert!(!storage
            .root()
            .join(&user.public_id)
            .join("contexts")
            .join(&context.id)
            .exists());
    }

    #[test]
    fn derived_names_are_truncated() {
        assert_eq!(derive_context_name("  a small bracket "), "a small bracket");
        let long = "x".repeat(80);
        let name = derive_context_name(&long);
        assert_eq!(name.chars().count(), 61);
        assert!(name.ends_with('…'));
    }
}
