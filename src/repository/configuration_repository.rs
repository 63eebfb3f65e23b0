use crate::error::{AppError, Result};
use crate::models::ConfigurationBundle;
use crate::repository::DbPool;
use chrono::Utc;
use sha2::{Digest, Sha256};

#[derive(Clone)]
pub struct ConfigurationRepository {
    pool: DbPool,
}

impl ConfigurationRepository {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub async fn get(&self, version: &str) -> Result<ConfigurationBundle> {
        let bundle = sqlx::query_as::<_, ConfigurationBundle>(
            r#"
            SELECT version, description, config_path, checksum, created_time, last_modified,
                   is_active, created_by, version_type, base_version, is_major_upgrade
            FROM upgrade_configuration
            WHERE version = ?
            "#,
        )
        .bind(version)
        .fetch_optional(&self.pool)
        .await?
        .ok_or_else(|| AppError::ConfigurationNotFound(version.to_string()))?;

        Ok(bundle)
    }

    pub async fn list_active(&self) -> Result<Vec<ConfigurationBundle>> {
        let bundles = sqlx::query_as::<_, ConfigurationBundle>(
            r#"
            SELECT version, description, config_path, checksum, created_time, last_modified,
                   is_active, created_by, version_type, base_version, is_major_upgrade
            FROM upgrade_configuration
            WHERE is_active = 1
            ORDER BY version
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(bundles)
    }

    /// SHA-256 of the bundle content at `path`, as lowercase hex.
    pub async fn checksum_of(&self, path: &str) -> Result<String> {
        let path = path.to_string();
        let content = tokio::task::spawn_blocking(move || std::fs::read(&path))
            .await
            .map_err(|e| AppError::Execution(format!("Checksum task failed: {}", e)))??;

        let mut hasher = Sha256::new();
        hasher.update(&content);
        Ok(format!("{:x}", hasher.finalize()))
    }

    /// Recompute the SHA-256 of the bundle content and compare it against the
    /// stored checksum. A mismatch is fatal for any resolution that depends
    /// on this bundle.
    pub async fn verify_integrity(&self, bundle: &ConfigurationBundle) -> Result<bool> {
        let computed = self.checksum_of(&bundle.config_path).await?;
        Ok(computed.eq_ignore_ascii_case(&bundle.checksum))
    }

    /// Used by the administrative import path and by tests; bundle metadata
    /// is otherwise immutable.
    pub async fn create(&self, bundle: &ConfigurationBundle) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO upgrade_configuration (version, description, config_path, checksum,
                created_time, last_modified, is_active, created_by, version_type,
                base_version, is_major_upgrade)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&bundle.version)
        .bind(&bundle.description)
        .bind(&bundle.config_path)
        .bind(&bundle.checksum)
        .bind(bundle.created_time)
        .bind(bundle.last_modified)
        .bind(bundle.is_active)
        .bind(&bundle.created_by)
        .bind(bundle.version_type as i32)
        .bind(&bundle.base_version)
        .bind(bundle.is_major_upgrade)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// The only permitted mutation: flip the active flag. Refreshes
    /// `last_modified`.
    pub async fn set_active(&self, version: &str, is_active: bool) -> Result<()> {
        let updated = sqlx::query(
            "UPDATE upgrade_configuration SET is_active = ?, last_modified = ? WHERE version = ?",
        )
        .bind(is_active)
        .bind(Utc::now())
        .bind(version)
        .execute(&self.pool)
        .await?;

        if updated.rows_affected() == 0 {
            return Err(AppError::ConfigurationNotFound(version.to_string()));
        }

        Ok(())
    }
}
