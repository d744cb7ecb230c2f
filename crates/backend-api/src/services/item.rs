use sqlx::sqlite::SqliteRow;
use sqlx::{Row, Sqlite, SqlitePool};

use super::error::ServiceError;
use crate::routes::models::{AttachmentRef, ChatContext, ChatItem, ItemRole, Segment};
use crate::util::timestamp;

const ITEM_COLUMNS: &str = "i.id, i.public_id, c.public_id AS context_public_id, i.role, i.segments, i.rating, i.created_at, i.updated_at";

pub async fn list_items(pool: &SqlitePool, context: &ChatContext) -> Result<Vec<ChatItem>, ServiceError> {
    let rows = sqlx::query(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM chat_items i
        JOIN chat_contexts c ON c.id = i.context_id
        WHERE i.context_id = ?
        ORDER BY i.created_at ASC, i.id ASC
        "#
    ))
    .bind(context.row_id)
    .fetch_all(pool)
    .await?;

    rows.iter().map(item_from_row).collect()
}

pub async fn insert_item<'e, E>(
    executor: E,
    context: &ChatContext,
    role: ItemRole,
    segments: &[Segment],
) -> Result<ChatItem, ServiceError>
where
    E: sqlx::Executor<'e, Database = Sqlite>,
{
    let public_id = chat3d_auth::new_public_id();
    let now = timestamp();

    let row_id = sqlx::query(
        r#"
        INSERT INTO chat_items (public_id, context_id, role, segments, rating, created_at, updated_at)
        VALUES (?, ?, ?, ?, 0, ?, ?)
        "#,
    )
    .bind(&public_id)
    .bind(context.row_id)
    .bind(role.as_str())
    .bind(encode_segments(segments)?)
    .bind(&now)
    .bind(&now)
    .execute(executor)
    .await?
    .last_insert_rowid();

    Ok(ChatItem {
        row_id,
        id: public_id,
        context_id: context.id.clone(),
        role,
        segments: segments.to_vec(),
        rating: 0,
        created_at: now.clone(),
        updated_at: now,
    })
}

/// Write a prompt and its assistant item together; either both rows exist
/// or neither does.
pub async fn insert_turn(
    pool: &SqlitePool,
    context: &ChatContext,
    prompt: &[Segment],
    answer: &[Segment],
) -> Result<(ChatItem, ChatItem), ServiceError> {
    let mut tx = pool.begin().await?;
    let user_item = insert_item(&mut *tx, context, ItemRole::User, prompt).await?;
    let assistant_item = insert_item(&mut *tx, context, ItemRole::Assistant, answer).await?;
    tx.commit().await?;

    Ok((user_item, assistant_item))
}

/// Overwrite the segments of an item in place.
pub async fn replace_segments(
    pool: &SqlitePool,
    item: &mut ChatItem,
    segments: Vec<Segment>,
) -> Result<(), ServiceError> {
    let now = timestamp();
    sqlx::query("UPDATE chat_items SET segments = ?, updated_at = ? WHERE id = ?")
        .bind(encode_segments(&segments)?)
        .bind(&now)
        .bind(item.row_id)
        .execute(pool)
        .await?;

    item.segments = segments;
    item.updated_at = now;
    Ok(())
}

/// An item inside a context owned by `user_id`.
pub async fn find_owned_item(
    pool: &SqlitePool,
    user_id: i64,
    item_id: &str,
) -> Result<ChatItem, ServiceError> {
    let row = sqlx::query(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM chat_items i
        JOIN chat_contexts c ON c.id = i.context_id
        WHERE i.public_id = ? AND c.user_id = ?
        "#
    ))
    .bind(item_id)
    .bind(user_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("item not found"))?;

    item_from_row(&row)
}

pub async fn set_rating(
    pool: &SqlitePool,
    user_id: i64,
    item_id: &str,
    rating: i64,
) -> Result<ChatItem, ServiceError> {
    if !(-1..=1).contains(&rating) {
        return Err(ServiceError::validation("rating must be -1, 0 or 1"));
    }

    let mut item = find_owned_item(pool, user_id, item_id).await?;
    sqlx::query("UPDATE chat_items SET rating = ? WHERE id = ?")
        .bind(rating)
        .bind(item.row_id)
        .execute(pool)
        .await?;

    item.rating = rating;
    Ok(item)
}

/// Code of the most recent completed assistant turn in the context.
pub async fn latest_model_code(pool: &SqlitePool, context: &ChatContext) -> Result<Option<String>, ServiceError> {
    let items = list_items(pool, context).await?;
    let code = items
        .iter()
        .rev()
        .filter(|item| item.role == ItemRole::Assistant)
        .find_map(|item| {
            item.segments.iter().find_map(|segment| match segment {
                Segment::Model { code, .. } if !code.trim().is_empty() => Some(code.clone()),
                _ => None,
            })
        });
    Ok(code)
}

/// Prompt text and attachments a user turn was submitted with.
#[derive(Debug, Clone, PartialEq)]
pub struct PromptSource {
    pub prompt: String,
    pub attachments: Vec<AttachmentRef>,
}

/// Resolve the user turn an assistant item answered: the latest user item
/// created at or before the target, ties broken by row order.
pub async fn regeneration_source(
    pool: &SqlitePool,
    context: &ChatContext,
    target: &ChatItem,
) -> Result<PromptSource, ServiceError> {
    if target.role != ItemRole::Assistant {
        return Err(ServiceError::validation("only assistant items can be regenerated"));
    }

    let row = sqlx::query(&format!(
        r#"
        SELECT {ITEM_COLUMNS}
        FROM chat_items i
        JOIN chat_contexts c ON c.id = i.context_id
        WHERE i.context_id = ?
          AND i.role = 'user'
          AND (i.created_at < ? OR (i.created_at = ? AND i.id < ?))
        ORDER BY i.created_at DESC, i.id DESC
        LIMIT 1
        "#
    ))
    .bind(context.row_id)
    .bind(&target.created_at)
    .bind(&target.created_at)
    .bind(target.row_id)
    .fetch_optional(pool)
    .await?
    .ok_or_else(|| ServiceError::not_found("no prompt precedes this item"))?;

    let source = item_from_row(&row)?;
    let mut prompt = String::new();
    let mut attachments = Vec::new();
    for segment in source.segments {
        match segment {
            Segment::Message { text } if prompt.is_empty() => prompt = text,
            Segment::Attachment { files } => attachments.extend(files),
            _ => {}
        }
    }

    if prompt.trim().is_empty() {
        return Err(ServiceError::validation("the source prompt is empty"));
    }

    Ok(PromptSource { prompt, attachments })
}

fn encode_segments(segments: &[Segment]) -> Result<String, ServiceError> {
    serde_json::to_string(segments)
        .map_err(|error| ServiceError::internal(format!("failed to encode segments: {error}")))
}

fn item_from_row(row: &SqliteRow) -> Result<ChatItem, ServiceError> {
    let role: String = row.try_get("role")?;
    let segments: String = row.try_get("segments")?;
    let segments = serde_json::from_str(&segments)
        .map_err(|error| ServiceError::internal(format!("corrupt segments: {error}")))?;

    Ok(ChatItem {
        row_id: row.try_get("id")?,
        id: row.try_get("public_id")?,
        context_id: row.try_get("context_public_id")?,
        role: if role == "assistant" {
            ItemRole::Assistant
        } else {
            ItemRole::User
        },
        segments,
        rating: row.try_get("rating")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
