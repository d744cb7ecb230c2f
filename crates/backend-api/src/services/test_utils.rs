//! Test utilities for service layer testing

use std::sync::Arc;

use async_trait::async_trait;
use chat3d_auth::{Authenticator, NewAccount, User, UserRole};
use chat3d_config::{AuthConfig, DatabaseConfig, PricingConfig, StorageConfig};
use chat3d_orchestrator::{
    CadModel, GenerationError, GenerationOutput, GenerationRequest, ModelSelection, RenderError,
    RenderedFile, Renderer,
};
use sqlx::SqlitePool;
use tempfile::TempDir;

use super::notification::NotificationHub;
use super::query::QueryPipeline;
use super::storage::FileStorage;

pub const TEST_PASSWORD: &str = "correct horse battery";

/// Creates a migrated database in a temporary directory
pub async fn create_test_db() -> (SqlitePool, TempDir) {
    let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
    let config = DatabaseConfig {
        url: format!("sqlite://{}", temp_dir.path().join("test.db").display()),
        max_connections: 4,
    };

    let pool = chat3d_database::initialize_database(&config)
        .await
        .expect("Failed to create test database");

    (pool, temp_dir)
}

pub fn test_authenticator(pool: &SqlitePool) -> Authenticator {
    Authenticator::new(pool.clone(), AuthConfig::default())
}

pub async fn create_user(pool: &SqlitePool, email: &str) -> User {
    create_user_with_role(pool, email, UserRole::User).await
}

pub async fn create_admin(pool: &SqlitePool, email: &str) -> User {
    create_user_with_role(pool, email, UserRole::Admin).await
}

async fn create_user_with_role(pool: &SqlitePool, email: &str, role: UserRole) -> User {
    test_authenticator(pool)
        .register_with_password(NewAccount {
            email,
            password: TEST_PASSWORD,
            display_name: None,
            role,
        })
        .await
        .expect("Failed to create test user")
}

pub fn test_storage(dir: &TempDir) -> FileStorage {
    FileStorage::new(&StorageConfig {
        root: dir.path().join("files").display().to_string(),
        max_upload_bytes: 1024 * 1024,
    })
}

pub fn build_pipeline(
    pool: &SqlitePool,
    dir: &TempDir,
    cad_model: Arc<dyn CadModel>,
    renderer: Arc<dyn Renderer>,
) -> QueryPipeline {
    QueryPipeline::new(
        pool.clone(),
        NotificationHub::new(),
        test_storage(dir),
        cad_model,
        renderer,
        ModelSelection {
            conversation: "test/conversation".to_string(),
            codegen: "test/codegen".to_string(),
        },
        PricingConfig::default(),
    )
}

/// Generation backend whose every call fails.
pub struct FailingCadModel;

#[async_trait]
impl CadModel for FailingCadModel {
    async fn conversation(&self, request: &GenerationRequest) -> Result<GenerationOutput, GenerationError> {
        Err(GenerationError::EmptyResponse(request.conversation_model.clone()))
    }

    async fn codegen(
        &self,
        request: &GenerationRequest,
        _conversation: &str,
    ) -> Result<GenerationOutput, GenerationError> {
        Err(GenerationError::EmptyResponse(request.codegen_model.clone()))
    }
}

/// Renderer that rejects every script.
pub struct FailingRenderer;

#[async_trait]
impl Renderer for FailingRenderer {
    async fn render(&self, _code: &str, _filename: &str) -> Result<Vec<RenderedFile>, RenderError> {
        Err(RenderError::Status {
            status: 422,
            message: "script raised an exception".to_string(),
        })
    }
}

/// Renderer producing an STL preview next to the STEP file.
pub struct StlRenderer;

#[async_trait]
impl Renderer for StlRenderer {
    async fn render(&self, _code: &str, filename: &str) -> Result<Vec<RenderedFile>, RenderError> {
        let stem = filename.rsplit_once('.').map(|(stem, _)| stem).unwrap_or(filename);
        Ok(vec![
            RenderedFile {
                filename: format!("{stem}.step"),
                content: b"ISO-10303-21;".to_vec(),
            },
            RenderedFile {
                filename: format!("{stem}.stl"),
                content: b"solid part\nendsolid part\n".to_vec(),
            },
        ])
    }
}
