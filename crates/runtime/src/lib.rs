use std::sync::Arc;

use anyhow::{Context, Result};
use chat3d_auth::Authenticator;
use chat3d_config::AppConfig;
use chat3d_database::initialize_database;
use chat3d_orchestrator::{build_cad_model, build_renderer, CadModel, Orchestrator, Renderer};
use redis::aio::ConnectionManager;
use sqlx::SqlitePool;
use tracing::{info, warn};

pub mod telemetry {
    use anyhow::Result;
    use tracing::Level;
    use tracing_subscriber::{fmt::SubscriberBuilder, EnvFilter};

    pub fn init_tracing() -> Result<()> {
        let env_filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

        let subscriber = SubscriberBuilder::default()
            .with_max_level(Level::DEBUG)
            .with_env_filter(env_filter)
            .with_target(false)
            .finish();

        tracing::subscriber::set_global_default(subscriber)
            .map_err(|error| anyhow::anyhow!("failed to set tracing subscriber: {error}"))
    }
}

/// Long-lived collaborators shared by every request handler.
#[derive(Clone)]
pub struct BackendServices {
    pub db_pool: SqlitePool,
    pub authenticator: Authenticator,
    pub orchestrator: Arc<Orchestrator>,
    pub cad_model: Arc<dyn CadModel>,
    pub renderer: Arc<dyn Renderer>,
    pub redis_conn: Option<ConnectionManager>,
}

impl BackendServices {
    pub async fn initialise(config: &AppConfig) -> Result<Self> {
        let db_pool = initialize_database(&config.database)
            .await
            .context("failed to prepare database")?;

        let authenticator = Authenticator::new(db_pool.clone(), config.auth.clone());
        let orchestrator = Arc::new(
            Orchestrator::new(config)
                .bootstrap()
                .context("failed to bootstrap orchestrator")?,
        );
        let cad_model = build_cad_model(orchestrator.clone());
        let renderer =
            build_renderer(&config.renderer).context("failed to initialise renderer client")?;

        let redis_conn = match config.rate_limit.redis_url.as_deref() {
            Some(url) => connect_redis(url).await,
            None => None,
        };

        let models = orchestrator.default_models();
        info!(
            mode = ?orchestrator.mode(),
            conversation = %models.conversation,
            codegen = %models.codegen,
            renderer = ?config.renderer.mode,
            "generation pipeline ready"
        );

        Ok(Self {
            db_pool,
            authenticator,
            orchestrator,
            cad_model,
            renderer,
            redis_conn,
        })
    }
}

async fn connect_redis(url: &str) -> Option<ConnectionManager> {
    let client = match redis::Client::open(url) {
        Ok(client) => client,
        Err(error) => {
            warn!(%error, "invalid redis url, rate limiting stays in memory");
            return None;
        }
    };

    match ConnectionManager::new(client).await {
        Ok(conn) => {
            info!("redis connection established");
            Some(conn)
        }
        Err(error) => {
            warn!(%error, "failed to connect to redis, rate limiting stays in memory");
            None
        }
    }
}

pub async fn shutdown_signal() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        warn!(?error, "failed to listen for shutdown signal");
    }
    info!("shutdown signal received");
}
