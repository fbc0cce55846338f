use async_trait::async_trait;
use dispatch_domain::entities::Notification;
use dispatch_domain::repositories::NotificationSender;
use dispatch_errors::DispatchResult;
use tracing::info;

/// 只写日志的通知发送器，用于开发和嵌入式部署
#[derive(Debug, Default, Clone)]
pub struct LogNotifier;

impl LogNotifier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl NotificationSender for LogNotifier {
    async fn send_batch(&self, notifications: &[Notification]) -> DispatchResult<()> {
        for notification in notifications {
            let dispatch_id = notification
                .data
                .get("dispatch_id")
                .map(String::as_str)
                .unwrap_or("");
            info!(
                provider_id = %notification.provider_id,
                title = %notification.title,
                dispatch_id,
                "Sending notification"
            );
        }
        Ok(())
    }
}
