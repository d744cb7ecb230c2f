use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use sqlx::sqlite::SqliteRow;
use sqlx::{Row, SqlitePool};
use tokio::sync::{broadcast, RwLock};

use super::error::ServiceError;
use crate::routes::models::Notification;
use crate::util::timestamp;

const CHANNEL_CAPACITY: usize = 100;
pub const MAX_REPLAY: i64 = 500;

/// Fan-out of persisted notifications to live subscribers, one channel per user.
#[derive(Clone, Default)]
pub struct NotificationHub {
    channels: Arc<RwLock<HashMap<i64, broadcast::Sender<Notification>>>>,
}

impl NotificationHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Channels whose streams have all closed are dropped here as well as on
    /// publish, so users that disconnect and go quiet do not keep an entry.
    pub async fn subscribe(&self, user_id: i64) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.write().await;
        channels.retain(|_, sender| sender.receiver_count() > 0);
        channels
            .entry(user_id)
            .or_insert_with(|| broadcast::channel(CHANNEL_CAPACITY).0)
            .subscribe()
    }

    pub async fn publish(&self, user_id: i64, notification: Notification) {
        let mut channels = self.channels.write().await;
        if let Some(sender) = channels.get(&user_id) {
            if sender.send(notification).is_err() {
                // every receiver is gone
                channels.remove(&user_id);
            }
        }
    }

    #[cfg(test)]
    pub async fn channel_count(&self) -> usize {
        self.channels.read().await.len()
    }
}

/// Persist a notification, then broadcast it to live subscribers.
pub async fn record(
    pool: &SqlitePool,
    hub: &NotificationHub,
    user_id: i64,
    kind: &str,
    payload: Value,
) -> Result<Notification, ServiceError> {
    let created_at = timestamp();
    let encoded = serde_json::to_string(&payload)
        .map_err(|error| ServiceError::internal(format!("failed to encode notification: {error}")))?;

    let id: i64 = sqlx::query_scalar(
        "INSERT INTO notifications (user_id, kind, payload, read, created_at) VALUES (?, ?, ?, 0, ?) RETURNING id",
    )
    .bind(user_id)
    .bind(kind)
    .bind(&encoded)
    .bind(&created_at)
    .fetch_one(pool)
    .await?;

    let notification = Notification {
        id,
        kind: kind.to_string(),
        payload,
        read: false,
        created_at,
    };

    hub.publish(user_id, notification.clone()).await;
    Ok(notification)
}

/// Notifications with an id greater than `after`, oldest first.
pub async fn list_after(
    pool: &SqlitePool,
    user_id: i64,
    after: i64,
    limit: i64,
) -> Result<Vec<Notification>, ServiceError> {
    let limit = limit.clamp(1, MAX_REPLAY);
    let rows = sqlx::query(
        r#"
        SELECT id, kind, payload, read, created_at
        FROM notifications
        WHERE user_id = ? AND id > ?
        ORDER BY id ASC
        LIMIT ?
        "#,
    )
    .bind(user_id)
    .bind(after)
    .bind(limit)
    .fetch_all(pool)
    .await?;

    rows.iter().map(notification_from_row).collect()
}

/// Highest notification id stored for the user, or 0 when there is none.
pub async fn latest_id(pool: &SqlitePool, user_id: i64) -> Result<i64, ServiceError> {
    let latest: Option<i64> = sqlx::query_scalar("SELECT MAX(id) FROM notifications WHERE user_id = ?")
        .bind(user_id)
        .fetch_one(pool)
        .await?;

    Ok(latest.unwrap_or(0))
}

pub async fn mark_all_read(pool: &SqlitePool, user_id: i64) -> Result<u64, ServiceError> {
    let result = sqlx::query("UPDATE notifications SET read = 1 WHERE user_id = ? AND read = 0")
        .bind(user_id)
        .execute(pool)
        .await?;

    Ok(result.rows_affected())
}

fn notification_from_row(row: &SqliteRow) -> Result<Notification, ServiceError> {
    let payload: String = row.try_get("payload")?;
    Ok(Notification {
        id: row.try_get("id")?,
        kind: row.try_get("kind")?,
        payload: serde_json::from_str(&payload).unwrap_or(Value::Null),
        read: row.try_get("read")?,
        created_at: row.try_get("created_at")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::test_utils::{create_test_db, create_user};
    use serde_json::json;

    #[tokio::test]
    async fn record_persists_and_broadcasts() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;
        let hub = NotificationHub::new();
        let mut receiver = hub.subscribe(user.id).await;

        let stored = record(&pool, &hub, user.id, "query.state", json!({ "status": "queued" }))
            .await
            .unwrap();

        let received = receiver.recv().await.unwrap();
        assert_eq!(received.id, stored.id);
        assert_eq!(received.payload["status"], "queued");

        let listed = list_after(&pool, user.id, 0, 50).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert!(!listed[0].read);
    }

    #[tokio::test]
    async fn list_after_returns_only_newer_notifications_for_user() {
        let (pool, _dir) = create_test_db().await;
        let alice = create_user(&pool, "alice@example.com").await;
        let bob = create_user(&pool, "bob@example.com").await;
        let hub = NotificationHub::new();

        let first = record(&pool, &hub, alice.id, "a", json!({})).await.unwrap();
        let second = record(&pool, &hub, alice.id, "b", json!({})).await.unwrap();
        record(&pool, &hub, bob.id, "c", json!({})).await.unwrap();

        let listed = list_after(&pool, alice.id, first.id, 50).await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, second.id);
        assert_eq!(listed[0].kind, "b");
    }

    #[tokio::test]
    async fn latest_id_is_scoped_to_the_user() {
        let (pool, _dir) = create_test_db().await;
        let alice = create_user(&pool, "alice@example.com").await;
        let bob = create_user(&pool, "bob@example.com").await;
        let hub = NotificationHub::new();

        assert_eq!(latest_id(&pool, alice.id).await.unwrap(), 0);
        let mine = record(&pool, &hub, alice.id, "a", json!({})).await.unwrap();
        record(&pool, &hub, bob.id, "b", json!({})).await.unwrap();

        assert_eq!(latest_id(&pool, alice.id).await.unwrap(), mine.id);
    }

    #[tokio::test]
    async fn mark_all_read_counts_changed_rows() {
        let (pool, _dir) = create_test_db().await;
        let user = create_user(&pool, "alice@example.com").await;
        let hub = NotificationHub::new();

        record(&pool, &hub, user.id, "a", json!({})).await.unwrap();
        record(&pool, &hub, user.id, "b", json!({})).await.unwrap();

        assert_eq!(mark_all_read(&pool, user.id).await.unwrap(), 2);
        assert_eq!(mark_all_read(&pool, user.id).await.unwrap(), 0);
        let listed = list_after(&pool, user.id, 0, 10).await.unwrap();
        assert!(listed.iter().all(|notification| notification.read));
    }

    #[tokio::test]
    async fn publish_drops_channels_without_receivers() {
        let hub = NotificationHub::new();
        let receiver = hub.subscribe(7).await;
        drop(receiver);

        hub.publish(
            7,
            Notification {
                id: 1,
                kind: "x".into(),
                payload: Value::Null,
                read: false,
                created_at: timestamp(),
            },
        )
        .await;
        assert_eq!(hub.channel_count().await, 0);
    }

    #[tokio::test]
    async fn subscribe_sweeps_channels_of_closed_streams() {
        let hub = NotificationHub::new();
        drop(hub.subscribe(7).await);
        drop(hub.subscribe(8).await);
        assert_eq!(hub.channel_count().await, 1);

        let _live = hub.subscribe(9).await;
        assert_eq!(hub.channel_count().await, 1);

        let _second = hub.subscribe(10).await;
        assert_eq!(hub.channel_count().await, 2);
    }
}
