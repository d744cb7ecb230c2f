//! Middleware for request logging, security headers and rate limiting

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use axum::{
    body::Body,
    extract::{ConnectInfo, Request, State},
    http::{header, HeaderName, HeaderValue, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chat3d_config::RateLimitConfig;
use redis::aio::ConnectionManager;
use serde_json::Value;
use tracing::warn;

use crate::ApiError;

const SENSITIVE_PATHS: &[&str] = &[
    "/api/public/login",
    "/api/public/register",
    "/api/public/waitlist",
];
const SENSITIVE_BODY_LIMIT: usize = 64 * 1024;
const PRUNE_THRESHOLD: usize = 10_000;

static X_RATELIMIT_LIMIT: HeaderName = HeaderName::from_static("x-ratelimit-limit");
static X_RATELIMIT_REMAINING: HeaderName = HeaderName::from_static("x-ratelimit-remaining");
static X_RATELIMIT_RESET: HeaderName = HeaderName::from_static("x-ratelimit-reset");

/// Logging middleware for request/response logging
pub async fn logging_middleware(request: Request, next: Next) -> Response {
    let method = request.method().clone();
    let uri = request.uri().clone();

    let start = Instant::now();
    let response = next.run(request).await;
    let duration = start.elapsed();

    tracing::info!(
        method = %method,
        uri = %uri.path(),
        status = %response.status(),
        duration_ms = duration.as_millis() as u64,
        "Request completed"
    );

    response
}

/// Conservative headers for a JSON API that never serves documents.
pub async fn security_headers(request: Request, next: Next) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(header::X_CONTENT_TYPE_OPTIONS, HeaderValue::from_static("nosniff"));
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(header::REFERRER_POLICY, HeaderValue::from_static("no-referrer"));
    headers.insert(
        header::CONTENT_SECURITY_POLICY,
        HeaderValue::from_static("default-src 'none'; frame-ancestors 'none'"),
    );

    response
}

/// Outcome of one rate limit check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateDecision {
    pub allowed: bool,
    pub limit: u64,
    pub remaining: u64,
    pub reset_after: Duration,
}

#[derive(Debug)]
struct Window {
    count: u64,
    reset_at: Instant,
}

#[derive(Clone)]
enum LimiterBackend {
    /// Process-local counters. Not shared between server instances.
    Memory(Arc<Mutex<HashMap<String, Window>>>),
    Redis(ConnectionManager),
}

/// Fixed-window request counter keyed by client, route and identifier.
#[derive(Clone)]
pub struct RateLimiter {
    config: Arc<RateLimitConfig>,
    backend: LimiterBackend,
}

impl RateLimiter {
    pub fn new(config: RateLimitConfig, redis: Option<ConnectionManager>) -> Self {
        let backend = match redis {
            Some(connection) => LimiterBackend::Redis(connection),
            None => LimiterBackend::Memory(Arc::new(Mutex::new(HashMap::new()))),
        };

        Self {
            config: Arc::new(config),
            backend,
        }
    }

    pub fn enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn uses_redis(&self) -> bool {
        matches!(self.backend, LimiterBackend::Redis(_))
    }

    pub async fn check(&self, key: &str, sensitive: bool) -> RateDecision {
        let (limit, window) = if sensitive {
            (
                self.config.sensitive_max_requests,
                self.config.sensitive_window_seconds,
            )
        } else {
            (self.config.max_requests, self.config.window_seconds)
        };
        let window = Duration::from_secs(window.max(1));

        let counted = match &self.backend {
            LimiterBackend::Memory(windows) => Ok(count_in_memory(windows, key, window)),
            LimiterBackend::Redis(connection) => count_in_redis(connection.clone(), key, window).await,
        };

        match counted {
            Ok((count, reset_after)) => RateDecision {
                allowed: count <= limit,
                limit,
                remaining: limit.saturating_sub(count),
                reset_after,
            },
            Err(error) => {
                warn!(%error, "rate limiter backend failed, allowing request");
                RateDecision {
                    allowed: true,
                    limit,
                    remaining: limit,
                    reset_after: window,
                }
            }
        }
    }
}

fn count_in_memory(
    windows: &Mutex<HashMap<String, Window>>,
    key: &str,
    window: Duration,
) -> (u64, Duration) {
    let now = Instant::now();
    let mut windows = match windows.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    };

    if windows.len() > PRUNE_THRESHOLD {
        windows.retain(|_, entry| entry.reset_at > now);
    }

    let entry = windows.entry(key.to_string()).or_insert(Window {
        count: 0,
        reset_at: now + window,
    });
    if entry.reset_at <= now {
        entry.count = 0;
        entry.reset_at = now + window;
    }
    entry.count += 1;

    (entry.count, entry.reset_at.saturating_duration_since(now))
}

async fn count_in_redis(
    mut connection: ConnectionManager,
    key: &str,
    window: Duration,
) -> Result<(u64, Duration), redis::RedisError> {
    let key = format!("chat3d:ratelimit:{key}");
    let count: u64 = redis::cmd("INCR").arg(&key).query_async(&mut connection).await?;

    let mut ttl: i64 = redis::cmd("TTL").arg(&key).query_async(&mut connection).await?;
    if count == 1 || ttl < 0 {
        redis::cmd("EXPIRE")
            .arg(&key)
            .arg(window.as_secs())
            .query_async::<_, ()>(&mut connection)
            .await?;
        ttl = window.as_secs() as i64;
    }

    Ok((count, Duration::from_secs(ttl.max(0) as u64)))
}

/// Rate limiting middleware.
///
/// Login, registration and waitlist requests are counted per email address
/// as well as per client, against the stricter sensitive budget.
pub async fn rate_limit_middleware(
    State(limiter): State<RateLimiter>,
    request: Request,
    next: Next,
) -> Response {
    if !limiter.enabled() {
        return next.run(request).await;
    }

    let ip = client_ip(&request);
    let method = request.method().clone();
    let path = request.uri().path().to_string();
    let sensitive = method == Method::POST && SENSITIVE_PATHS.contains(&path.as_str());

    let (request, identifier) = if sensitive {
        match extract_email(request).await {
            Ok(extracted) => extracted,
            Err(response) => return response,
        }
    } else {
        (request, String::new())
    };

    let key = format!("{ip}:{method}:{path}:{identifier}");
    let decision = limiter.check(&key, sensitive).await;

    if !decision.allowed {
        warn!(ip = %ip, path = %path, sensitive, "rate limit exceeded");
        let mut response = ApiError::too_many_requests().into_response();
        let retry_after = decision.reset_after.as_secs().max(1);
        if let Ok(value) = HeaderValue::from_str(&retry_after.to_string()) {
            response.headers_mut().insert(header::RETRY_AFTER, value);
        }
        apply_rate_headers(&mut response, &decision);
        return response;
    }

    let mut response = next.run(request).await;
    apply_rate_headers(&mut response, &decision);
    response
}

fn apply_rate_headers(response: &mut Response, decision: &RateDecision) {
    let headers = response.headers_mut();
    for (name, value) in [
        (&X_RATELIMIT_LIMIT, decision.limit),
        (&X_RATELIMIT_REMAINING, decision.remaining),
        (&X_RATELIMIT_RESET, decision.reset_after.as_secs()),
    ] {
        if let Ok(value) = HeaderValue::from_str(&value.to_string()) {
            headers.insert(name.clone(), value);
        }
    }
}

fn client_ip(request: &Request) -> String {
    if let Some(ConnectInfo(address)) = request.extensions().get::<ConnectInfo<SocketAddr>>() {
        return address.ip().to_string();
    }

    request
        .headers()
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_owned)
        .unwrap_or_else(|| "unknown".to_string())
}

/// Buffer the body to read its `email` field, then rebuild the request.
async fn extract_email(request: Request) -> Result<(Request, String), Response> {
    let (parts, body) = request.into_parts();
    let bytes = axum::body::to_bytes(body, SENSITIVE_BODY_LIMIT)
        .await
        .map_err(|_| {
            ApiError::payload_too_large().into_response()
        })?;

    let email = serde_json::from_slice::<Value>(&bytes)
        .ok()
        .and_then(|value| {
            value
                .get("email")
                .and_then(Value::as_str)
                .map(|email| email.trim().to_lowercase())
        })
        .unwrap_or_default();

    Ok((Request::from_parts(parts, Body::from(bytes)), email))
}
