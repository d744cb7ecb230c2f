use std::sync::Arc;

use chat3d_auth::{AuthSession, Authenticator, User};
use chat3d_config::AppConfig;
use chat3d_orchestrator::{CadModel, Orchestrator, Renderer};
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;

use crate::middleware::RateLimiter;
use crate::services::notification::NotificationHub;
use crate::services::query::QueryPipeline;
use crate::services::storage::FileStorage;
use crate::ApiError;

#[derive(Clone)]
pub struct AppState {
    db_pool: SqlitePool,
    authenticator: Authenticator,
    orchestrator: Arc<Orchestrator>,
    cad_model: Arc<dyn CadModel>,
    renderer: Arc<dyn Renderer>,
    storage: FileStorage,
    notifications: NotificationHub,
    rate_limiter: RateLimiter,
    config: Arc<AppConfig>,
}

impl AppState {
    pub fn new(
        config: AppConfig,
        db_pool: SqlitePool,
        authenticator: Authenticator,
        orchestrator: Arc<Orchestrator>,
        cad_model: Arc<dyn CadModel>,
        renderer: Arc<dyn Renderer>,
        redis_conn: Option<ConnectionManager>,
    ) -> Self {
        let storage = FileStorage::new(&config.storage);
        let rate_limiter = RateLimiter::new(config.rate_limit.clone(), redis_conn);

        Self {
            db_pool,
            authenticator,
            orchestrator,
            cad_model,
            renderer,
            storage,
            notifications: NotificationHub::new(),
            rate_limiter,
            config: Arc::new(config),
        }
    }

    pub fn db_pool(&self) -> &SqlitePool {
        &self.db_pool
    }

    pub fn authenticator(&self) -> &Authenticator {
        &self.authenticator
    }

    pub fn orchestrator(&self) -> &Orchestrator {
        &self.orchestrator
    }

    pub fn storage(&self) -> &FileStorage {
        &self.storage
    }

    pub fn notifications(&self) -> &NotificationHub {
        &self.notifications
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.rate_limiter
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    /// A query pipeline wired to this state's collaborators.
    pub fn pipeline(&self) -> QueryPipeline {
        QueryPipeline::new(
            self.db_pool.clone(),
            self.notifications.clone(),
            self.storage.clone(),
            self.cad_model.clone(),
            self.renderer.clone(),
            self.orchestrator.default_models(),
            self.orchestrator.pricing().clone(),
        )
    }

    pub async fn authenticate(&self, token: &str) -> Result<(User, AuthSession), ApiError> {
        let (user, session) = self
            .authenticator
            .authenticate_token(token)
            .await
            .map_err(ApiError::from)?;

        if !user.is_active {
            return Err(ApiError::forbidden("account is inactive"));
        }

        Ok((user, session))
    }

    pub async fn require_admin(&self, token: &str) -> Result<User, ApiError> {
        let (user, _) = self.authenticate(token).await?;
        if !user.is_admin() {
            return Err(ApiError::forbidden("administrator access required"));
        }
        Ok(user)
    }
}
