//! Per-user file storage on the local filesystem.
//!
//! Every stored path is relative to the storage root and starts with the
//! owning user's public id: uploads live under `<user>/uploads/`, rendered
//! artifacts under `<user>/contexts/<context>/<item>/`.

use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};

use axum::http::StatusCode;
use chat3d_auth::User;
use chat3d_config::StorageConfig;
use thiserror::Error;
use tracing::{debug, warn};

use super::error::ServiceError;
use crate::routes::models::StoredArtifact;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("invalid file path")]
    InvalidPath,
    #[error("file is outside your storage")]
    Forbidden,
    #[error("file not found")]
    NotFound,
    #[error("file exceeds the {limit} byte upload limit")]
    TooLarge { limit: u64 },
    #[error("storage io error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<StorageError> for ServiceError {
    fn from(error: StorageError) -> Self {
        let status = match &error {
            StorageError::InvalidPath => StatusCode::BAD_REQUEST,
            StorageError::Forbidden => StatusCode::FORBIDDEN,
            StorageError::NotFound => StatusCode::NOT_FOUND,
            StorageError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            StorageError::Io(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };
        if status.is_server_error() {
            warn!(%error, "storage failure");
        }
        ServiceError::Storage {
            status,
            message: error.to_string(),
        }
    }
}

/// A file read back from storage.
#[derive(Debug)]
pub struct StoredFile {
    pub filename: String,
    pub mime_type: String,
    pub content: Vec<u8>,
}

#[derive(Debug, Clone)]
pub struct FileStorage {
    root: PathBuf,
    max_upload_bytes: u64,
}

impl FileStorage {
    pub fn new(config: &StorageConfig) -> Self {
        Self {
            root: PathBuf::from(&config.root),
            max_upload_bytes: config.max_upload_bytes,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_bytes
    }

    /// Store an uploaded file and return its relative path.
    pub async fn save_upload(
        &self,
        owner: &User,
        filename: &str,
        content: &[u8],
    ) -> Result<String, StorageError> {
        if content.len() as u64 > self.max_upload_bytes {
            return Err(StorageError::TooLarge {
                limit: self.max_upload_bytes,
            });
        }

        let relative = format!(
            "{}/uploads/{}-{}",
            owner.public_id,
            cuid2::create_id(),
            sanitize_filename(filename)
        );
        self.write(&relative, content).await?;
        Ok(relative)
    }

    pub async fn save_artifact(
        &self,
        owner_public_id: &str,
        context_id: &str,
        item_id: &str,
        filename: &str,
        content: &[u8],
    ) -> Result<StoredArtifact, StorageError> {
        let filename = sanitize_filename(filename);
        let relative = format!("{owner_public_id}/contexts/{context_id}/{item_id}/{filename}");
        self.write(&relative, content).await?;

        Ok(StoredArtifact {
            mime_type: guess_mime(&filename),
            size: content.len() as u64,
            path: relative,
            filename,
        })
    }

    /// Resolve `relative` for `user`, checking ownership and existence.
    /// Administrators may read any file.
    pub async fn ensure_readable(&self, user: &User, relative: &str) -> Result<PathBuf, StorageError> {
        let path = self.resolve(relative)?;
        let owner = owner_of(relative).ok_or(StorageError::InvalidPath)?;
        if owner != user.public_id && !user.is_admin() {
            return Err(StorageError::Forbidden);
        }

        match tokio::fs::metadata(&path).await {
            Ok(metadata) if metadata.is_file() => Ok(path),
            Ok(_) => Err(StorageError::NotFound),
            Err(error) if error.kind() == ErrorKind::NotFound => Err(StorageError::NotFound),
            Err(error) => Err(error.into()),
        }
    }

    pub async fn read(&self, user: &User, relative: &str) -> Result<StoredFile, StorageError> {
        let path = self.ensure_readable(user, relative).await?;
        let content = tokio::fs::read(&path).await?;
        let filename = path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default();

        Ok(StoredFile {
            mime_type: guess_mime(&filename),
            filename,
            content,
        })
    }

    /// Remove every artifact stored for a context. Missing directories are fine.
    pub async fn remove_context(&self, owner_public_id: &str, context_id: &str) -> Result<(), StorageError> {
        let path = self.resolve(&format!("{owner_public_id}/contexts/{context_id}"))?;
        match tokio::fs::remove_dir_all(&path).await {
            Ok(()) => {
                debug!(path = %path.display(), "removed context artifacts");
                Ok(())
            }
            Err(error) if error.kind() == ErrorKind::NotFound => Ok(()),
            Err(error) => Err(error.into()),
        }
    }

    async fn write(&self, relative: &str, content: &[u8]) -> Result<(), StorageError> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, content).await?;
        debug!(path = relative, bytes = content.len(), "stored file");
        Ok(())
    }

    fn resolve(&self, relative: &str) -> Result<PathBuf, StorageError> {
        let trimmed = relative.trim();
        if trimmed.is_empty() || trimmed.starts_with('/') || trimmed.starts_with('\\') {
            return Err(StorageError::InvalidPath);
        }

        let candidate = Path::new(trimmed);
        let mut resolved = self.root.clone();
        for component in candidate.components() {
            match component {
                Component::Normal(part) => resolved.push(part),
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(StorageError::InvalidPath);
                }
            }
        }

        if resolved == self.root {
            return Err(StorageError::InvalidPath);
        }
        Ok(resolved)
    }
}

fn owner_of(relative: &str) -> Option<&str> {
    relative
        .trim()
        .split(['/', '\\'])
        .find(|segment| !segment.is_empty() && *segment != ".")
}

/// Keep `[A-Za-z0-9._-]`, replacing everything else with `_`.
pub fn sanitize_filename(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or(name).trim();
    let sanitized: String = base
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect();

    let sanitized = sanitized.trim_start_matches('.');
    if sanitized.is_empty() {
        "file".to_string()
    } else {
        sanitized.chars().take(120).collect()
    }
}

pub fn guess_mime(filename: &str) -> String {
    let extension = filename
        .rsplit_once('.')
        .map(|(_, extension)| extension.to_ascii_lowercase())
        .unwrap_or_default();

    match extension.as_str() {
        "stl" => "model/stl".to_string(),
        "3mf" => "model/3mf".to_string(),
        "step" | "stp" => "model/step".to_string(),
        "py" => "text/x-python".to_string(),
        _ => mime_guess::from_path(filename)
            .first_or_octet_stream()
            .essence_str()
            .to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chat3d_auth::UserRole;
    use tempfile::TempDir;

    fn user(public_id: &str, role: UserRole) -> User {
        User {
            id: 1,
            public_id: public_id.to_string(),
            email: Some(format!("{public_id}@example.com")),
            display_name: None,
            role,
            is_active: true,
            created_at: "2024-01-01T00:00:00Z".to_string(),
        }
    }

    fn storage(temp: &TempDir) -> FileStorage {
        FileStorage::new(&StorageConfig {
            root: temp.path().display().to_string(),
            max_upload_bytes: 16,
        })
    }

    #[test]
    fn sanitize_filename_replaces_unsafe_characters() {
        assert_eq!(sanitize_filename("my part (v2).stl"), "my_part__v2_.stl");
        assert_eq!(sanitize_filename("../../etc/passwd"), "passwd");
        assert_eq!(sanitize_filename(".hidden"), "hidden");
        assert_eq!(sanitize_filename("   "), "file");
    }

    #[test]
    fn guess_mime_knows_cad_formats() {
        assert_eq!(guess_mime("a.STL"), "model/stl");
        assert_eq!(guess_mime("a.3mf"), "model/3mf");
        assert_eq!(guess_mime("a.stp"), "model/step");
        assert_eq!(guess_mime("a.png"), "image/png");
        assert_eq!(guess_mime("noext"), "application/octet-stream");
    }

    #[test]
    fn resolve_rejects_escapes() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        assert!(matches!(storage.resolve("/etc/passwd"), Err(StorageError::InvalidPath)));
        assert!(matches!(storage.resolve("u1/../u2/file"), Err(StorageError::InvalidPath)));
        assert!(matches!(storage.resolve(""), Err(StorageError::InvalidPath)));
        assert!(storage.resolve("u1/uploads/a.png").is_ok());
    }

    #[tokio::test]
    async fn upload_roundtrip_respects_ownership() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let owner = user("owner", UserRole::User);
        let stranger = user("stranger", UserRole::User);
        let admin = user("admin", UserRole::Admin);

        let path = storage.save_upload(&owner, "sketch one.png", b"png").await.unwrap();
        assert!(path.starts_with("owner/uploads/"));
        assert!(path.ends_with("-sketch_one.png"));

        let file = storage.read(&owner, &path).await.unwrap();
        assert_eq!(file.content, b"png");
        assert_eq!(file.mime_type, "image/png");

        assert!(matches!(
            storage.read(&stranger, &path).await,
            Err(StorageError::Forbidden)
        ));
        assert!(storage.read(&admin, &path).await.is_ok());
        assert!(matches!(
            storage.ensure_readable(&owner, "owner/uploads/missing.png").await,
            Err(StorageError::NotFound)
        ));
    }

    #[tokio::test]
    async fn upload_limit_is_enforced() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);
        let owner = user("owner", UserRole::User);

        let error = storage
            .save_upload(&owner, "big.bin", &[0u8; 17])
            .await
            .unwrap_err();
        assert!(matches!(error, StorageError::TooLarge { limit: 16 }));
    }

    #[tokio::test]
    async fn artifacts_use_deterministic_paths_and_are_removed_with_context() {
        let temp = TempDir::new().unwrap();
        let storage = storage(&temp);

        let artifact = storage
            .save_artifact("owner", "ctx1", "item1", "part.stl", b"solid")
            .await
            .unwrap();
        assert_eq!(artifact.path, "owner/contexts/ctx1/item1/part.stl");
        assert_eq!(artifact.size, 5);
        assert_eq!(artifact.mime_type, "model/stl");
        assert!(temp.path().join(&artifact.path).exists());

        storage.remove_context("owner", "ctx1").await.unwrap();
        assert!(!temp.path().join("owner/contexts/ctx1").exists());
        storage.remove_context("owner", "ctx1").await.unwrap();
    }
}
