pub mod sqlite;

use dispatch_config::DatabaseConfig;
use dispatch_errors::DispatchResult;
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions};
use sqlx::SqlitePool;
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, info};

/// SQLite 连接池与表结构管理
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn connect(config: &DatabaseConfig) -> DispatchResult<Self> {
        debug!("Connecting to SQLite database at: {}", config.url);

        let connect_options = SqliteConnectOptions::from_str(&config.url)?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(config.max_connections)
            .min_connections(config.min_connections)
            .acquire_timeout(Duration::from_secs(config.connection_timeout_seconds))
            .connect_with(connect_options)
            .await?;

        let database = Self { pool };
        database.run_migrations().await?;
        info!("SQLite database ready: {}", config.url);
        Ok(database)
    }

    /// 单连接内存数据库，连接不回收以保留数据
    pub async fn in_memory() -> DispatchResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await?;

        let database = Self { pool };
        database.run_migrations().await?;
        Ok(database)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn health_check(&self) -> DispatchResult<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    pub async fn close(&self) {
        self.pool.close().await;
    }

    /// 运行数据库迁移
    pub async fn run_migrations(&self) -> DispatchResult<()> {
        debug!("Running SQLite database migrations");

        // 派单表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS dispatches (
                id TEXT PRIMARY KEY,
                request_id TEXT NOT NULL,
                provider_id TEXT NOT NULL,
                status TEXT NOT NULL,
                distance_km REAL NOT NULL,
                expires_at DATETIME NOT NULL,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_dispatches_request ON dispatches(request_id)")
            .execute(&self.pool)
            .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dispatches_provider_status ON dispatches(provider_id, status)",
        )
        .execute(&self.pool)
        .await?;
        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_dispatches_status_expires ON dispatches(status, expires_at)",
        )
        .execute(&self.pool)
        .await?;

        // 服务商目录（每个服务类别一行）
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS provider_details (
                provider_id TEXT NOT NULL,
                category TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                service_radius_km REAL NOT NULL DEFAULT 50,
                is_online INTEGER NOT NULL DEFAULT 0,
                updated_at DATETIME NOT NULL,
                PRIMARY KEY (provider_id, category)
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE INDEX IF NOT EXISTS idx_provider_details_category ON provider_details(category, latitude, longitude)",
        )
        .execute(&self.pool)
        .await?;

        // 服务请求表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS service_requests (
                id TEXT PRIMARY KEY,
                customer_id TEXT NOT NULL,
                provider_id TEXT,
                service_id TEXT,
                category TEXT NOT NULL,
                description TEXT NOT NULL,
                latitude REAL NOT NULL,
                longitude REAL NOT NULL,
                status TEXT NOT NULL,
                accepted_at DATETIME,
                started_at DATETIME,
                completed_at DATETIME,
                cancelled_at DATETIME,
                created_at DATETIME NOT NULL,
                updated_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        debug!("SQLite database migrations completed");
        Ok(())
    }
}
