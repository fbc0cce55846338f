use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::interval;
use tracing::{debug, error, info, warn};

use dispatch_errors::DispatchResult;

use crate::lifecycle::DispatchLifecycleManager;

/// 过期扫描服务
///
/// 定时把超过报价窗口仍未响应的派单置为 expired。
pub struct ExpirySweeper {
    lifecycle: Arc<DispatchLifecycleManager>,
    sweep_interval: Duration,
    shutdown_tx: Option<oneshot::Sender<()>>,
    sweep_handle: Option<JoinHandle<()>>,
}

impl ExpirySweeper {
    pub fn new(lifecycle: Arc<DispatchLifecycleManager>, sweep_interval: Duration) -> Self {
        Self {
            lifecycle,
            // tokio::time::interval 不接受零间隔
            sweep_interval: sweep_interval.max(Duration::from_millis(1)),
            shutdown_tx: None,
            sweep_handle: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.sweep_handle.is_some()
    }

    /// 启动扫描任务，重复调用无效果
    pub fn start(&mut self) {
        if self.is_running() {
            warn!("Expiry sweeper already running");
            return;
        }

        info!(
            "Starting expiry sweeper with interval {:?}",
            self.sweep_interval
        );

        let (shutdown_tx, mut shutdown_rx) = oneshot::channel();
        self.shutdown_tx = Some(shutdown_tx);

        let lifecycle = Arc::clone(&self.lifecycle);
        let period = self.sweep_interval;

        let handle = tokio::spawn(async move {
            let mut ticker = interval(period);

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match lifecycle.expire_old(Utc::now()).await {
                            Ok(0) => debug!("No dispatches to expire"),
                            Ok(count) => debug!("Sweep expired {} dispatches", count),
                            Err(e) => error!("Expiry sweep failed: {}", e),
                        }
                    }
                    _ = &mut shutdown_rx => {
                        info!("Expiry sweeper shutdown requested");
                        break;
                    }
                }
            }
        });

        self.sweep_handle = Some(handle);
    }

    /// 停止扫描任务并等待其退出
    pub async fn stop(&mut self) {
        if let Some(shutdown_tx) = self.shutdown_tx.take() {
            let _ = shutdown_tx.send(());
        }

        if let Some(handle) = self.sweep_handle.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for expiry sweeper to stop: {}", e);
            }
        }

        info!("Expiry sweeper stopped");
    }

    /// 立即执行一次扫描
    pub async fn sweep_once(&self) -> DispatchResult<usize> {
        self.lifecycle.expire_old(Utc::now()).await
    }
}

impl Drop for ExpirySweeper {
    fn drop(&mut self) {
        if let Some(handle) = self.sweep_handle.take() {
            handle.abort();
        }
    }
}
