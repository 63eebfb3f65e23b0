use crate::models::{ConfigurationBundle, VersionType};
use crate::repository::{ConfigurationRepository, DbPool};
use chrono::Utc;
use sha2::{Digest, Sha256};
use sqlx::sqlite::SqlitePoolOptions;
use std::path::Path;

/// A single-connection in-memory database; more connections would each see
/// their own empty in-memory store.
pub async fn memory_pool() -> DbPool {
    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("in-memory database");
    crate::repository::connection::run_migrations(&pool)
        .await
        .expect("schema bootstrap");
    pool
}

pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    format!("{:x}", hasher.finalize())
}

/// Write bundle content to disk and register matching metadata.
pub async fn seed_bundle(
    repo: &ConfigurationRepository,
    dir: &Path,
    version: &str,
    version_type: VersionType,
    base_version: Option<&str>,
    is_major_upgrade: bool,
) -> ConfigurationBundle {
    let content = format!("bundle content for {}", version);
    let path = dir.join(format!("{}.cfg", version));
    std::fs::write(&path, &content).expect("write bundle content");

    let now = Utc::now();
    let bundle = ConfigurationBundle {
        version: version.to_string(),
        description: None,
        config_path: path.display().to_string(),
        checksum: sha256_hex(content.as_bytes()),
        created_time: now,
        last_modified: now,
        is_active: true,
        created_by: Some("test".to_string()),
        version_type,
        base_version: base_version.map(|v| v.to_string()),
        is_major_upgrade,
    };
    repo.create(&bundle).await.expect("seed bundle");
    bundle
}
