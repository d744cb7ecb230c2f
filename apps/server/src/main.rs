use std::net::SocketAddr;

use anyhow::Context;
use chat3d_auth::{Authenticator, UserRole};
use chat3d_backend_api::{build_router, services, AppState};
use chat3d_backend_runtime::{telemetry, BackendServices};
use chat3d_config::{load as load_config, AppConfig};
use clap::{Parser, Subcommand};
use sqlx::SqlitePool;
use tokio::net::TcpListener;
use tracing::info;

#[derive(Parser)]
#[command(name = "chat3d-backend")]
#[command(about = "Chat3D backend (serves HTTP by default)")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP server
    Serve,
    /// Apply database migrations and exit
    Migrate,
    /// Give an existing account the admin role
    GrantAdmin {
        /// Email address of the account
        email: String,
    },
    /// Create an invitation code without an inviting user
    IssueInvitation {
        /// Restrict the invitation to this email address
        #[arg(long)]
        email: Option<String>,
        /// Hours until the invitation expires (defaults to the admin setting)
        #[arg(long)]
        hours: Option<u32>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    telemetry::init_tracing().context("failed to initialise tracing")?;
    let config = load_config().context("failed to load configuration")?;

    match cli.command.unwrap_or(Commands::Serve) {
        Commands::Serve => run_server(config).await,
        Commands::Migrate => migrate(&config).await,
        Commands::GrantAdmin { email } => grant_admin(&config, &email).await,
        Commands::IssueInvitation { email, hours } => {
            issue_invitation(&config, email.as_deref(), hours).await
        }
    }
}

async fn run_server(config: AppConfig) -> anyhow::Result<()> {
    info!("starting Chat3D backend");

    let services = BackendServices::initialise(&config)
        .await
        .context("failed to initialise backend services")?;

    let address = format!("{}:{}", config.http.address, config.http.port);

    let state = AppState::new(
        config,
        services.db_pool.clone(),
        services.authenticator.clone(),
        services.orchestrator.clone(),
        services.cad_model.clone(),
        services.renderer.clone(),
        services.redis_conn.clone(),
    );
    let app = build_router(state);

    let listener = TcpListener::bind(&address)
        .await
        .with_context(|| format!("failed to bind http listener on {address}"))?;

    info!(%address, "http server listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(chat3d_backend_runtime::shutdown_signal())
    .await
    .context("http server error")?;

    info!("backend shut down");
    Ok(())
}

async fn open_database(config: &AppConfig) -> anyhow::Result<SqlitePool> {
    chat3d_database::initialize_database(&config.database)
        .await
        .context("failed to open database")
}

async fn migrate(config: &AppConfig) -> anyhow::Result<()> {
    let pool = open_database(config).await?;
    pool.close().await;

    println!("Database at {} is up to date", config.database.url);
    Ok(())
}

async fn grant_admin(config: &AppConfig, email: &str) -> anyhow::Result<()> {
    let pool = open_database(config).await?;
    let authenticator = Authenticator::new(pool.clone(), config.auth.clone());

    let user = authenticator
        .find_user_by_email(email)
        .await
        .with_context(|| format!("no account found for {email}"))?;
    let user = authenticator
        .set_role(user.id, UserRole::Admin)
        .await
        .context("failed to update role")?;

    info!(user = %user.public_id, "admin role granted");
    println!("{} is now an admin", user.email.as_deref().unwrap_or(email));
    Ok(())
}

async fn issue_invitation(
    config: &AppConfig,
    email: Option<&str>,
    hours: Option<u32>,
) -> anyhow::Result<()> {
    let pool = open_database(config).await?;
    let mut conn = pool.acquire().await.context("failed to acquire connection")?;

    let ttl_hours = match hours {
        Some(hours) => hours,
        None => {
            services::admin::load_settings(&mut *conn)
                .await
                .context("failed to load settings")?
                .invitation_ttl_hours
        }
    };

    let invitation = services::invite::create_invitation(&mut *conn, None, email, ttl_hours)
        .await
        .context("failed to create invitation")?;

    println!("Invitation code: {}", invitation.code);
    if let Some(email) = invitation.email.as_deref() {
        println!("Restricted to:   {email}");
    }
    println!("Expires at:      {}", invitation.expires_at);
    Ok(())
}
