use std::collections::VecDeque;
use std::convert::Infallible;
use std::time::Duration;

use axum::{
    extract::{Query, State},
    http::HeaderMap,
    response::sse::{Event, KeepAlive, Sse},
    Json,
};
use futures_util::stream::{self, Stream};
use serde::{Deserialize, Serialize};
use sqlx::SqlitePool;
use tokio::sync::broadcast::{error::RecvError, Receiver};
use utoipa::{IntoParams, ToSchema};

use crate::{
    routes::models::Notification,
    services::notification::{self as notification_service, MAX_REPLAY},
    util::{bearer_or_query, require_bearer},
    ApiError, AppState,
};

const KEEP_ALIVE_INTERVAL: Duration = Duration::from_secs(15);
const LAST_EVENT_ID: &str = "last-event-id";

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct StreamQuery {
    /// Replay notifications with a greater id before streaming live ones.
    /// Without it (or `Last-Event-ID`) only new notifications are streamed.
    pub after: Option<i64>,
    /// Session token for clients that cannot send headers.
    pub token: Option<String>,
}

#[derive(Debug, Default, Deserialize, IntoParams)]
pub struct ReplayQuery {
    pub after: Option<i64>,
    pub limit: Option<i64>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct NotificationsResponse {
    pub notifications: Vec<Notification>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct MarkReadResponse {
    pub updated: u64,
}

#[utoipa::path(
    get,
    path = "/api/events/stream",
    tag = "Events",
    security(("bearerAuth" = [])),
    params(
        StreamQuery,
        ("Last-Event-ID" = Option<i64>, Header, description = "Id of the last notification the client saw")
    ),
    responses(
        (status = 200, description = "Server-sent notification stream", body = String, content_type = "text/event-stream"),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn stream_events(
    State(state): State<AppState>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> Result<Sse<impl Stream<Item = Result<Event, Infallible>>>, ApiError> {
    let token = bearer_or_query(&headers, query.token.as_deref())?;
    let (user, _) = state.authenticate(&token).await?;
    let pool = state.db_pool().clone();

    let cursor = headers
        .get(LAST_EVENT_ID)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.trim().parse::<i64>().ok())
        .or(query.after);

    // subscribe before reading the store so nothing falls in between
    let receiver = state.notifications().subscribe(user.id).await;

    // without a cursor the stream starts at the present; history is served
    // by the REST replay endpoint
    let (after, backlog) = match cursor {
        Some(after) => {
            let page = notification_service::list_after(&pool, user.id, after, MAX_REPLAY)
                .await
                .map_err(|e| {
                    tracing::error!("Failed to replay notifications: {}", e);
                    ApiError::from(e)
                })?;
            (after, page)
        }
        None => (notification_service::latest_id(&pool, user.id).await?, Vec::new()),
    };

    tracing::debug!(user = %user.public_id, after, replayed = backlog.len(), "event stream opened");

    let events = EventCursor {
        pool,
        user_id: user.id,
        receiver,
        last_sent: after,
        replaying: backlog.len() as i64 >= MAX_REPLAY,
        backlog: backlog.into(),
    };

    Ok(Sse::new(stream::unfold(events, next_event)).keep_alive(KeepAlive::new().interval(KEEP_ALIVE_INTERVAL)))
}

/// Position of one SSE client: persisted notifications are drained page by
/// page before the live channel is read.
struct EventCursor {
    pool: SqlitePool,
    user_id: i64,
    receiver: Receiver<Notification>,
    last_sent: i64,
    backlog: VecDeque<Notification>,
    /// More persisted rows may follow the current backlog.
    replaying: bool,
}

async fn next_event(mut cursor: EventCursor) -> Option<(Result<Event, Infallible>, EventCursor)> {
    loop {
        if let Some(notification) = cursor.backlog.pop_front() {
            cursor.last_sent = notification.id;
            return Some((Ok(to_event(&notification)), cursor));
        }

        if cursor.replaying {
            let page = match notification_service::list_after(
                &cursor.pool,
                cursor.user_id,
                cursor.last_sent,
                MAX_REPLAY,
            )
            .await
            {
                Ok(page) => page,
                Err(error) => {
                    // the client reconnects with its Last-Event-ID
                    tracing::error!(%error, last_sent = cursor.last_sent, "event replay failed");
                    return None;
                }
            };
            cursor.replaying = page.len() as i64 >= MAX_REPLAY;
            cursor.backlog.extend(page);
            continue;
        }

        match cursor.receiver.recv().await {
            // already sent from the store
            Ok(notification) if notification.id <= cursor.last_sent => continue,
            Ok(notification) => {
                cursor.last_sent = notification.id;
                return Some((Ok(to_event(&notification)), cursor));
            }
            Err(RecvError::Lagged(skipped)) => {
                // the skipped notifications are persisted, read them back
                tracing::warn!(skipped, "event stream lagged");
                cursor.replaying = true;
                let event = Event::default().comment(format!("lagged {skipped}"));
                return Some((Ok(event), cursor));
            }
            Err(RecvError::Closed) => return None,
        }
    }
}

fn to_event(notification: &Notification) -> Event {
    let data = serde_json::to_string(notification).unwrap_or_else(|_| "{}".to_string());
    Event::default()
        .id(notification.id.to_string())
        .event(notification.kind.as_str())
        .data(data)
}

#[utoipa::path(
    get,
    path = "/api/events",
    tag = "Events",
    security(("bearerAuth" = [])),
    params(ReplayQuery),
    responses(
        (status = 200, description = "Persisted notifications in ascending id order", body = NotificationsResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn list_events(
    State(state): State<AppState>,
    Query(query): Query<ReplayQuery>,
    headers: HeaderMap,
) -> Result<Json<NotificationsResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let notifications = notification_service::list_after(
        state.db_pool(),
        user.id,
        query.after.unwrap_or(0),
        query.limit.unwrap_or(100),
    )
    .await?;

    Ok(Json(NotificationsResponse { notifications }))
}

#[utoipa::path(
    post,
    path = "/api/events/read",
    tag = "Events",
    security(("bearerAuth" = [])),
    responses(
        (status = 200, description = "Number of notifications marked read", body = MarkReadResponse),
        (status = 401, description = "Authentication required", body = crate::error::ErrorResponse)
    )
)]
pub async fn mark_read(
    State(state): State<AppState>,
    headers: HeaderMap,
) -> Result<Json<MarkReadResponse>, ApiError> {
    let token = require_bearer(&headers)?;
    let (user, _) = state.authenticate(&token).await?;

    let updated = notification_service::mark_all_read(state.db_pool(), user.id).await?;
    Ok(Json(MarkReadResponse { updated }))
}
