use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::broadcast;
use tracing::{debug, info, warn};

/// 优雅关闭管理器
///
/// 关闭信号通过 broadcast 发给所有订阅者；触发后再订阅会立即收到信号。
#[derive(Clone)]
pub struct ShutdownManager {
    shutdown_tx: broadcast::Sender<()>,
    triggered: Arc<AtomicBool>,
}

impl ShutdownManager {
    pub fn new() -> Self {
        let (shutdown_tx, _) = broadcast::channel(16);
        Self {
            shutdown_tx,
            triggered: Arc::new(AtomicBool::new(false)),
        }
    }

    /// 订阅关闭信号
    pub fn subscribe(&self) -> broadcast::Receiver<()> {
        if self.is_shutdown() {
            let (tx, rx) = broadcast::channel(1);
            let _ = tx.send(());
            return rx;
        }
        self.shutdown_tx.subscribe()
    }

    /// 触发关闭，重复调用无效果
    pub fn shutdown(&self) {
        if self.triggered.swap(true, Ordering::SeqCst) {
            debug!("关闭管理器已经触发过关闭");
            return;
        }

        let receivers = self.shutdown_tx.receiver_count();
        debug!("发送关闭信号给 {} 个订阅者", receivers);
        // 没有订阅者时发送失败，可以忽略
        let _ = self.shutdown_tx.send(());
        info!("关闭信号已发送");
    }

    pub fn is_shutdown(&self) -> bool {
        self.triggered.load(Ordering::SeqCst)
    }

    /// 在超时内等待关闭完成，超时返回 false
    pub async fn wait_with_timeout<F>(&self, shutdown: F, timeout: Duration) -> bool
    where
        F: Future<Output = ()>,
    {
        match tokio::time::timeout(timeout, shutdown).await {
            Ok(()) => true,
            Err(_) => {
                warn!("等待关闭超过 {:?}", timeout);
                false
            }
        }
    }
}

impl Default for ShutdownManager {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::sleep;

    #[tokio::test]
    async fn test_all_subscribers_receive_signal() {
        let manager = ShutdownManager::new();
        let mut first = manager.subscribe();
        let mut second = manager.subscribe();

        manager.shutdown();

        assert!(first.recv().await.is_ok());
        assert!(second.recv().await.is_ok());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_subscribe_after_shutdown_fires_immediately() {
        let manager = ShutdownManager::new();
        manager.shutdown();

        let mut late = manager.subscribe();
        assert!(late.recv().await.is_ok());
    }

    #[tokio::test]
    async fn test_shutdown_is_idempotent_across_clones() {
        let manager = ShutdownManager::new();
        let cloned = manager.clone();
        let mut rx = manager.subscribe();

        cloned.shutdown();
        manager.shutdown();

        assert!(rx.recv().await.is_ok());
        assert!(rx.try_recv().is_err());
        assert!(manager.is_shutdown());
    }

    #[tokio::test]
    async fn test_wait_with_timeout() {
        let manager = ShutdownManager::new();

        assert!(manager.wait_with_timeout(async {}, Duration::from_millis(50)).await);
        assert!(
            !manager
                .wait_with_timeout(sleep(Duration::from_millis(200)), Duration::from_millis(20))
                .await
        );
    }
}
