use crate::repository::DbPool;
use anyhow::Result;

pub async fn establish_connection(database_url: &str) -> Result<DbPool> {
    // Ensure the database URL has the correct format
    let db_url = if database_url.starts_with("sqlite:") {
        database_url.to_string()
    } else {
        format!("sqlite:{}", database_url)
    };

    // Create connection with create_if_missing option
    let connection_string = format!("{}?mode=rwc", db_url);
    let pool = sqlx::SqlitePool::connect(&connection_string).await?;

    run_migrations(&pool).await?;

    Ok(pool)
}

pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    sqlx::query(
        r#"
        -- Configuration bundle metadata, one row per known version
        CREATE TABLE IF NOT EXISTS upgrade_configuration (
            version TEXT PRIMARY KEY,
            description TEXT,
            config_path TEXT NOT NULL,
            checksum TEXT NOT NULL,
            created_time TEXT NOT NULL,
            last_modified TEXT NOT NULL,
            is_active BOOLEAN NOT NULL DEFAULT 1,
            created_by TEXT,
            version_type INTEGER NOT NULL,
            base_version TEXT,
            is_major_upgrade BOOLEAN NOT NULL DEFAULT 0
        );

        -- Upgrade execution records
        CREATE TABLE IF NOT EXISTS upgrade_execution (
            execution_id TEXT PRIMARY KEY,
            source_version TEXT NOT NULL,
            target_version TEXT NOT NULL,
            site_id TEXT NOT NULL,
            environment TEXT NOT NULL,
            status INTEGER NOT NULL,
            start_time TEXT NOT NULL,
            end_time TEXT,
            current_step_id TEXT,
            breakpoint_data TEXT,
            total_steps INTEGER NOT NULL DEFAULT 0,
            completed_steps INTEGER NOT NULL DEFAULT 0,
            error_message TEXT,
            created_by TEXT,
            duration INTEGER,
            created_time TEXT NOT NULL,
            updated_time TEXT NOT NULL
        );

        -- Per-step execution records, ordered by seq within one execution
        CREATE TABLE IF NOT EXISTS step_execution (
            id TEXT PRIMARY KEY,
            execution_id TEXT NOT NULL,
            step_id TEXT NOT NULL,
            step_name TEXT NOT NULL,
            step_type INTEGER NOT NULL,
            status INTEGER NOT NULL,
            seq INTEGER NOT NULL,
            start_time TEXT,
            end_time TEXT,
            duration INTEGER,
            result TEXT,
            error_message TEXT,
            metadata TEXT,
            retry_count INTEGER NOT NULL DEFAULT 0,
            created_time TEXT NOT NULL,
            updated_time TEXT NOT NULL,
            FOREIGN KEY (execution_id) REFERENCES upgrade_execution(execution_id) ON DELETE CASCADE
        );

        CREATE INDEX IF NOT EXISTS idx_is_active ON upgrade_configuration(is_active);
        CREATE INDEX IF NOT EXISTS idx_execution_status ON upgrade_execution(status);
        CREATE INDEX IF NOT EXISTS idx_execution_site ON upgrade_execution(site_id);
        CREATE INDEX IF NOT EXISTS idx_execution_id ON step_execution(execution_id);
        CREATE INDEX IF NOT EXISTS idx_step_id ON step_execution(step_id);
        CREATE INDEX IF NOT EXISTS idx_status ON step_execution(status);
        CREATE UNIQUE INDEX IF NOT EXISTS idx_execution_seq ON step_execution(execution_id, seq);
        "#,
    )
    .execute(pool)
    .await?;

    Ok(())
}
