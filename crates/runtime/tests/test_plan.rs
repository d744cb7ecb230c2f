use std::{env, fs, fs::File, path::Path, time::Duration};

use anyhow::{Context, Result};
use chat3d_backend_runtime::{self, BackendServices};
use chat3d_config::{AppConfig, GenerationMode, RendererMode};
use chat3d_orchestrator::GenerationRequest;
use serial_test::serial;
use tempfile::TempDir;
use tokio::time::{sleep, timeout};

fn sqlite_url(path: &Path) -> String {
    format!("sqlite://{}", path.to_string_lossy())
}

fn build_config(database_url: String, max_connections: u32) -> AppConfig {
    let mut config = AppConfig::default();
    config.database.url = database_url;
    config.database.max_connections = max_connections;
    config.orchestrator.mode = GenerationMode::Mock;
    config.orchestrator.provider_search_path = Vec::new();
    config.renderer.mode = RendererMode::Mock;
    config
}

async fn initialise(config: &AppConfig) -> Result<BackendServices> {
    BackendServices::initialise(config)
        .await
        .context("failed to initialise backend services")
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_runs_migrations_and_wires_mock_pipeline() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("runtime/init.db");
    let config = build_config(sqlite_url(&db_path), 4);

    let services = initialise(&config).await?;
    let table: String = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'chat_items'",
    )
    .fetch_one(&services.db_pool)
    .await?;
    assert_eq!("chat_items", table);
    assert_eq!(services.orchestrator.mode(), GenerationMode::Mock);

    let request = GenerationRequest {
        prompt: "washer".into(),
        attachments: Vec::new(),
        previous_code: None,
        conversation_model: config.orchestrator.conversation_model.clone(),
        codegen_model: config.orchestrator.codegen_model.clone(),
    };
    let code = services.cad_model.codegen(&request, "notes").await?;
    let files = services.renderer.render(&code.text, "washer.step").await?;
    assert_eq!(files.len(), 1);

    drop(services);
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[serial]
async fn initialise_handles_orchestrator_bootstrap_failures() -> Result<()> {
    env::remove_var("OPENROUTER_API_KEY");
    let mut config = build_config("sqlite://:memory:".into(), 2);
    config.orchestrator.mode = GenerationMode::OpenRouter;
    config.orchestrator.openrouter.api_key = None;

    let Err(error) = BackendServices::initialise(&config).await else {
        panic!("openrouter mode without a key must not initialise");
    };
    assert!(format!("{error:?}").contains("failed to bootstrap orchestrator"));
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_skips_redis_without_url() -> Result<()> {
    let config = build_config("sqlite://:memory:".into(), 1);
    let services = initialise(&config).await?;
    assert!(services.redis_conn.is_none());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_tolerates_invalid_redis_url() -> Result<()> {
    let mut config = build_config("sqlite://:memory:".into(), 1);
    config.rate_limit.redis_url = Some("not a redis url".into());

    let services = initialise(&config).await?;
    assert!(
        services.redis_conn.is_none(),
        "redis errors should fall back to in-memory limiting"
    );
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_creates_store_with_configured_pool() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_dir = temp_dir.path().join("state/sqlite");
    let config = build_config(sqlite_url(&db_dir.join("chat3d.db")), 3);
    assert!(!db_dir.exists());

    let services = initialise(&config).await?;
    assert!(db_dir.join("chat3d.db").exists());
    assert_eq!(services.db_pool.options().get_max_connections(), 3);

    let foreign_keys: i64 = sqlx::query_scalar("PRAGMA foreign_keys")
        .fetch_one(&services.db_pool)
        .await?;
    let journal: String = sqlx::query_scalar("PRAGMA journal_mode")
        .fetch_one(&services.db_pool)
        .await?;
    assert_eq!(foreign_keys, 1);
    assert_eq!(journal.to_lowercase(), "wal");
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
async fn initialise_rejects_non_sqlite_urls() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let untouched = temp_dir.path().join("untouched");
    let config = build_config(
        format!("postgres://{}/chat3d", untouched.to_string_lossy()),
        1,
    );

    let Err(error) = BackendServices::initialise(&config).await else {
        panic!("a postgres url must not initialise");
    };
    let chain = format!("{error:#}");
    assert!(chain.contains("only sqlite urls are supported"), "{chain}");
    assert!(!untouched.exists());
    Ok(())
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(unix), ignore = "read-only permissions differ")]
async fn run_migrations_propagates_failures() -> Result<()> {
    let temp_dir = TempDir::new()?;
    let db_path = temp_dir.path().join("readonly.db");
    File::create(&db_path)?;

    let mut perms = fs::metadata(&db_path)?.permissions();
    perms.set_readonly(true);
    fs::set_permissions(&db_path, perms)?;

    // root ignores file permissions
    if fs::OpenOptions::new().write(true).open(&db_path).is_ok() {
        return Ok(());
    }

    let config = build_config(sqlite_url(&db_path), 1);
    let Err(error) = BackendServices::initialise(&config).await else {
        panic!("a read-only store must not initialise");
    };
    assert!(format!("{error:#}").contains("failed to prepare database"));
    Ok(())
}

#[test]
fn telemetry_init_tracing_sets_global_subscriber() {
    chat3d_backend_runtime::telemetry::init_tracing()
        .expect("first initialisation should succeed");

    let second = chat3d_backend_runtime::telemetry::init_tracing();
    assert!(
        second.is_err(),
        "initialising telemetry twice should fail with global subscriber already set"
    );
}

#[tokio::test(flavor = "multi_thread")]
#[cfg_attr(not(unix), ignore = "requires Unix signal handling")]
async fn shutdown_signal_completes_on_ctrl_c_notification() -> Result<()> {
    let shutdown_task = tokio::spawn(async { chat3d_backend_runtime::shutdown_signal().await });

    sleep(Duration::from_millis(50)).await;
    #[cfg(unix)]
    unsafe {
        libc::raise(libc::SIGINT);
    }

    timeout(Duration::from_secs(2), shutdown_task).await??;
    Ok(())
}
