use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub database_url: String,
    pub host: String,
    pub port: u16,
    pub retry: RetryConfig,
    pub worker_count: usize,
    pub cancel_grace_ms: u64,
    pub notification_queue_capacity: usize,
}

/// Retry policy applied by the step executor. The original schema only
/// records the retry count, so the concrete policy lives here: a bounded
/// number of attempts with exponential backoff between them.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct RetryConfig {
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            backoff_base_ms: 500,
        }
    }
}

impl RetryConfig {
    /// Delay before the given attempt (1-based); the first attempt has none.
    pub fn backoff_delay(&self, attempt: u32) -> std::time::Duration {
        if attempt <= 1 {
            return std::time::Duration::ZERO;
        }
        let exp = attempt.saturating_sub(2).min(16);
        std::time::Duration::from_millis(self.backoff_base_ms.saturating_mul(1u64 << exp))
    }
}

impl Default for Config {
    fn default() -> Self {
        let database_url = crate::paths::data_dir()
            .map(|dir| format!("sqlite:{}", dir.join("upgrade_node.db").display()))
            .unwrap_or_else(|_| "sqlite:upgrade_node.db".to_string());
        Self {
            database_url,
            host: "127.0.0.1".to_string(),
            port: 6801,
            retry: RetryConfig::default(),
            worker_count: 5,
            cancel_grace_ms: 30_000,
            notification_queue_capacity: 50,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(db_url) = std::env::var("DATABASE_URL") {
            config.database_url = db_url;
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(6801);
        }

        config.normalize_database_url()?;
        Ok(config)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(database_url) = file_config.database_url {
            self.database_url = database_url;
        }
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(max_attempts) = file_config.max_retry_attempts {
            self.retry.max_attempts = max_attempts;
        }
        if let Some(backoff_base_ms) = file_config.retry_backoff_ms {
            self.retry.backoff_base_ms = backoff_base_ms;
        }
        if let Some(worker_count) = file_config.worker_count {
            self.worker_count = worker_count.max(1);
        }
        if let Some(cancel_grace_ms) = file_config.cancel_grace_ms {
            self.cancel_grace_ms = cancel_grace_ms;
        }
        if let Some(capacity) = file_config.notification_queue_capacity {
            self.notification_queue_capacity = capacity.max(1);
        }
    }

    fn normalize_database_url(&mut self) -> Result<()> {
        let Some(path_str) = self.database_url.strip_prefix("sqlite:") else {
            return Ok(());
        };

        let path = Path::new(path_str);
        let root = crate::paths::install_root()?;

        if path.is_absolute() {
            if !path.starts_with(&root) {
                anyhow::bail!(
                    "SQLite database path must be under install root: {}",
                    root.display()
                );
            }
            return Ok(());
        }

        if path
            .components()
            .any(|component| matches!(component, std::path::Component::ParentDir))
        {
            anyhow::bail!("SQLite database path cannot contain '..'");
        }

        let absolute = root.join(path);
        self.database_url = format!("sqlite:{}", absolute.display());
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    database_url: Option<String>,
    host: Option<String>,
    port: Option<u16>,
    max_retry_attempts: Option<u32>,
    retry_backoff_ms: Option<u64>,
    worker_count: Option<usize>,
    cancel_grace_ms: Option<u64>,
    notification_queue_capacity: Option<usize>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backoff_grows_exponentially() {
        let retry = RetryConfig {
            max_attempts: 4,
            backoff_base_ms: 100,
        };
        assert_eq!(retry.backoff_delay(1).as_millis(), 0);
        assert_eq!(retry.backoff_delay(2).as_millis(), 100);
        assert_eq!(retry.backoff_delay(3).as_millis(), 200);
        assert_eq!(retry.backoff_delay(4).as_millis(), 400);
    }
}
