use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use dispatch_config::{AppConfig, ConfigValidator};
use dispatch_dispatcher::{
    DispatchLifecycleManager, ExpirySweeper, MatchingService, RequestLifecycleService,
};
use dispatch_domain::messaging::EventBus;
use dispatch_infrastructure::{
    InMemoryEventBus, KeyedRateLimiter, LogNotifier, SqliteDatabase, SqliteDispatchRepository,
    SqliteProviderDirectory, SqliteRequestRepository,
};
use dispatch_worker::DispatchWorker;
use tokio::sync::{broadcast, Mutex};
use tracing::{info, warn};

/// 主应用程序：组装数据库、事件总线、派单服务和后台任务
pub struct Application {
    config: AppConfig,
    database: SqliteDatabase,
    bus: Arc<InMemoryEventBus>,
    directory: Arc<SqliteProviderDirectory>,
    lifecycle: Arc<DispatchLifecycleManager>,
    matching: Arc<MatchingService>,
    requests: Arc<RequestLifecycleService>,
    worker: Arc<DispatchWorker>,
    sweeper: Mutex<ExpirySweeper>,
}

impl Application {
    /// 创建新的应用实例
    pub async fn new(config: AppConfig) -> Result<Self> {
        config.validate().context("配置校验失败")?;

        let database = SqliteDatabase::connect(&config.database)
            .await
            .with_context(|| format!("连接数据库失败: {}", config.database.url))?;

        Ok(Self::with_database(config, database))
    }

    /// 使用已建立的数据库连接组装应用
    pub fn with_database(config: AppConfig, database: SqliteDatabase) -> Self {
        info!("初始化派单服务");
        dispatch_worker::metrics::register_metrics();

        let pool = database.pool().clone();
        let dispatch_repo = Arc::new(SqliteDispatchRepository::new(pool.clone()));
        let request_repo = Arc::new(SqliteRequestRepository::new(pool.clone()));
        let directory = Arc::new(SqliteProviderDirectory::new(pool));

        let bus = Arc::new(InMemoryEventBus::new(&config.bus));
        let event_bus: Arc<dyn EventBus> = bus.clone();

        let mut lifecycle = DispatchLifecycleManager::new(dispatch_repo, &config.dispatch);
        if config.rate_limit.enabled {
            lifecycle = lifecycle
                .with_rate_limiter(Arc::new(KeyedRateLimiter::new(config.rate_limit.clone())));
        }
        if config.dispatch.emit_outcome_events {
            lifecycle = lifecycle.with_outcome_events(Arc::clone(&event_bus));
        }
        let lifecycle = Arc::new(lifecycle);

        let matching = Arc::new(MatchingService::new(
            directory.clone(),
            Arc::clone(&lifecycle),
        ));
        let requests = Arc::new(RequestLifecycleService::new(
            request_repo,
            Arc::clone(&event_bus),
        ));
        let worker = Arc::new(DispatchWorker::new(
            directory.clone(),
            Arc::clone(&lifecycle),
            Arc::new(LogNotifier::new()),
            event_bus,
            &config.dispatch,
        ));
        let sweeper = Mutex::new(ExpirySweeper::new(
            Arc::clone(&lifecycle),
            Duration::from_secs(config.dispatch.expiry_sweep_interval_seconds),
        ));

        Self {
            config,
            database,
            bus,
            directory,
            lifecycle,
            matching,
            requests,
            worker,
            sweeper,
        }
    }

    /// 注册 Worker、启动事件总线和过期扫描
    pub async fn start(&self, shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.worker
            .register()
            .await
            .context("注册派单Worker失败")?;
        self.bus
            .start(shutdown_rx)
            .await
            .context("启动事件总线失败")?;
        self.sweeper.lock().await.start();

        info!(
            search_radius_km = self.config.dispatch.search_radius_km,
            max_providers = self.config.dispatch.max_providers_per_dispatch,
            offer_window_seconds = self.config.dispatch.offer_window_seconds,
            "Dispatch service started"
        );
        Ok(())
    }

    /// 先停过期扫描，再关闭事件总线，最后关闭数据库
    pub async fn stop(&self) -> Result<()> {
        self.sweeper.lock().await.stop().await;
        if let Err(e) = self.bus.close().await {
            warn!("关闭事件总线失败: {e}");
        }
        self.database.close().await;
        info!("Dispatch service stopped");
        Ok(())
    }

    /// 运行直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        self.start(shutdown_rx.resubscribe()).await?;

        let _ = shutdown_rx.recv().await;
        info!("派单服务收到关闭信号");

        self.stop().await
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn bus(&self) -> Arc<InMemoryEventBus> {
        Arc::clone(&self.bus)
    }

    pub fn directory(&self) -> Arc<SqliteProviderDirectory> {
        Arc::clone(&self.directory)
    }

    pub fn lifecycle(&self) -> Arc<DispatchLifecycleManager> {
        Arc::clone(&self.lifecycle)
    }

    pub fn matching(&self) -> Arc<MatchingService> {
        Arc::clone(&self.matching)
    }

    pub fn requests(&self) -> Arc<RequestLifecycleService> {
        Arc::clone(&self.requests)
    }

    /// 立即执行一次过期扫描
    pub async fn sweep_expired(&self) -> Result<usize> {
        Ok(self.sweeper.lock().await.sweep_once().await?)
    }
}
