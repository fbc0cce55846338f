use async_trait::async_trait;
use dispatch_config::BusConfig;
use dispatch_domain::messaging::{BusMessage, EventBus, EventHandler};
use dispatch_errors::{DispatchError, DispatchResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// 内存事件总线实现
///
/// 单个有界队列 + 单个分发任务：全局按到达顺序投递，同一条消息的处理器顺序执行。
/// 投递语义为至多一次，处理器失败只记录日志，不重试。
pub struct InMemoryEventBus {
    /// 处理器注册表：主题 -> 处理器列表
    handlers: Arc<RwLock<HandlerTable>>,
    /// 发送端，关闭后置为 None
    sender: RwLock<Option<mpsc::Sender<BusMessage>>>,
    /// 接收端，启动时移交给分发任务
    receiver: Mutex<Option<mpsc::Receiver<BusMessage>>>,
    /// 分发任务句柄
    dispatch_handle: Mutex<Option<JoinHandle<()>>>,
    started: AtomicBool,
    buffer_size: usize,
}

#[derive(Default)]
struct HandlerTable {
    by_topic: HashMap<String, Vec<Arc<dyn EventHandler>>>,
}

impl HandlerTable {
    fn register(&mut self, topic: &str, handler: Arc<dyn EventHandler>) {
        self.by_topic
            .entry(topic.to_string())
            .or_default()
            .push(handler);
    }

    /// 复制一份处理器列表，分发时不持有锁
    fn snapshot(&self, topic: &str) -> Vec<Arc<dyn EventHandler>> {
        self.by_topic.get(topic).cloned().unwrap_or_default()
    }

    fn handler_count(&self) -> usize {
        self.by_topic.values().map(Vec::len).sum()
    }
}

/// 总线统计信息
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BusStats {
    pub topics: usize,
    pub handlers: usize,
    pub queued_messages: usize,
    pub closed: bool,
}

impl InMemoryEventBus {
    pub fn new(config: &BusConfig) -> Self {
        Self::with_capacity(config.buffer_size)
    }

    pub fn with_capacity(buffer_size: usize) -> Self {
        let buffer_size = buffer_size.max(1);
        info!("Creating in-memory event bus with buffer size {}", buffer_size);
        let (sender, receiver) = mpsc::channel(buffer_size);
        Self {
            handlers: Arc::new(RwLock::new(HandlerTable::default())),
            sender: RwLock::new(Some(sender)),
            receiver: Mutex::new(Some(receiver)),
            dispatch_handle: Mutex::new(None),
            started: AtomicBool::new(false),
            buffer_size,
        }
    }

    pub async fn stats(&self) -> BusStats {
        let table = self.handlers.read().await;
        let sender = self.sender.read().await;
        BusStats {
            topics: table.by_topic.len(),
            handlers: table.handler_count(),
            queued_messages: sender
                .as_ref()
                .map(|s| self.buffer_size - s.capacity())
                .unwrap_or(0),
            closed: sender.is_none(),
        }
    }

    async fn run_dispatch_loop(
        handlers: Arc<RwLock<HandlerTable>>,
        mut receiver: mpsc::Receiver<BusMessage>,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) {
        let mut shutdown_open = true;

        loop {
            tokio::select! {
                biased;
                signal = shutdown_rx.recv(), if shutdown_open => {
                    match signal {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            info!("Event bus shutdown requested");
                            break;
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            shutdown_open = false;
                        }
                    }
                }
                message = receiver.recv() => {
                    match message {
                        Some(message) => Self::dispatch(&handlers, message).await,
                        None => {
                            debug!("Event bus channel drained");
                            break;
                        }
                    }
                }
            }
        }

        info!("Event bus dispatch loop stopped");
    }

    async fn dispatch(handlers: &RwLock<HandlerTable>, message: BusMessage) {
        let topic_handlers = handlers.read().await.snapshot(&message.topic);

        if topic_handlers.is_empty() {
            debug!(topic = %message.topic, "No handler registered for topic, message dropped");
            return;
        }

        for handler in topic_handlers {
            if let Err(e) = handler.handle(&message).await {
                error!(
                    topic = %message.topic,
                    handler = handler.name(),
                    error = %e,
                    "Error processing message"
                );
            }
        }
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DispatchResult<()> {
        let sender = self
            .sender
            .read()
            .await
            .clone()
            .ok_or(DispatchError::BusClosed)?;

        sender
            .send(BusMessage::new(topic, payload))
            .await
            .map_err(|_| DispatchError::BusClosed)?;

        debug!(topic = %topic, "Message published");
        Ok(())
    }

    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> DispatchResult<()> {
        if self.sender.read().await.is_none() {
            return Err(DispatchError::BusClosed);
        }
        if self.started.load(Ordering::SeqCst) {
            return Err(DispatchError::validation_error(format!(
                "主题 {topic} 的处理器 {} 必须在事件总线启动前注册",
                handler.name()
            )));
        }

        info!(topic = %topic, handler = handler.name(), "Handler subscribed");
        self.handlers.write().await.register(topic, handler);
        Ok(())
    }

    async fn start(&self, shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()> {
        if self.started.swap(true, Ordering::SeqCst) {
            return Err(DispatchError::validation_error("事件总线已经启动"));
        }

        let receiver = self
            .receiver
            .lock()
            .await
            .take()
            .ok_or(DispatchError::BusClosed)?;

        let handlers = Arc::clone(&self.handlers);
        let handle = tokio::spawn(Self::run_dispatch_loop(handlers, receiver, shutdown_rx));
        *self.dispatch_handle.lock().await = Some(handle);

        info!("Event bus started");
        Ok(())
    }

    async fn close(&self) -> DispatchResult<()> {
        // 丢弃发送端后，分发任务处理完剩余消息即退出
        if self.sender.write().await.take().is_none() {
            debug!("Event bus already closed");
        }

        if let Some(handle) = self.dispatch_handle.lock().await.take() {
            if let Err(e) = handle.await {
                warn!("Error waiting for event bus dispatch loop to stop: {}", e);
            }
        } else if let Some(receiver) = self.receiver.lock().await.take() {
            if !receiver.is_empty() {
                warn!("Event bus closed before start, {} queued messages dropped", receiver.len());
            }
        }

        info!("Event bus closed");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dispatch_testing_utils::RecordingHandler;
    use std::time::Duration;

    async fn started_bus(
        capacity: usize,
        subscriptions: Vec<(&str, Arc<RecordingHandler>)>,
    ) -> (InMemoryEventBus, broadcast::Sender<()>) {
        let bus = InMemoryEventBus::with_capacity(capacity);
        for (topic, handler) in subscriptions {
            bus.subscribe(topic, handler).await.unwrap();
        }
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.start(shutdown_rx).await.unwrap();
        (bus, shutdown_tx)
    }

    #[tokio::test]
    async fn test_fan_out_to_all_handlers_in_order() {
        let first = Arc::new(RecordingHandler::new("first"));
        let second = Arc::new(RecordingHandler::new("second"));
        let (bus, _shutdown_tx) = started_bus(
            16,
            vec![("request.created", first.clone()), ("request.created", second.clone())],
        )
        .await;

        for i in 0..5 {
            bus.publish("request.created", format!("m{i}").into_bytes()).await.unwrap();
        }
        bus.close().await.unwrap();

        let expected: Vec<String> = (0..5).map(|i| format!("m{i}")).collect();
        assert_eq!(first.payloads_as_strings().await, expected);
        assert_eq!(second.payloads_as_strings().await, expected);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let created = Arc::new(RecordingHandler::new("created"));
        let sent = Arc::new(RecordingHandler::new("sent"));
        let (bus, _shutdown_tx) = started_bus(
            16,
            vec![("request.created", created.clone()), ("dispatch.sent", sent.clone())],
        )
        .await;

        bus.publish("dispatch.sent", b"a".to_vec()).await.unwrap();
        bus.publish("nobody.listens", b"b".to_vec()).await.unwrap();
        bus.close().await.unwrap();

        assert!(created.payloads_as_strings().await.is_empty());
        assert_eq!(sent.payloads_as_strings().await, vec!["a".to_string()]);
    }

    #[tokio::test]
    async fn test_handler_failure_does_not_stop_others() {
        let failing = Arc::new(RecordingHandler::failing("failing"));
        let healthy = Arc::new(RecordingHandler::new("healthy"));
        let (bus, _shutdown_tx) = started_bus(
            16,
            vec![("request.created", failing.clone()), ("request.created", healthy.clone())],
        )
        .await;

        bus.publish("request.created", b"1".to_vec()).await.unwrap();
        bus.publish("request.created", b"2".to_vec()).await.unwrap();
        bus.close().await.unwrap();

        assert_eq!(failing.payloads_as_strings().await.len(), 2);
        assert_eq!(healthy.payloads_as_strings().await, vec!["1".to_string(), "2".to_string()]);
    }

    #[tokio::test]
    async fn test_publish_after_close_fails() {
        let (bus, _shutdown_tx) = started_bus(4, vec![]).await;
        bus.close().await.unwrap();

        let err = bus.publish("request.created", vec![]).await.unwrap_err();
        assert!(matches!(err, DispatchError::BusClosed));
        assert!(bus.stats().await.closed);

        // 重复关闭是安全的
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_subscribe_after_start_is_rejected() {
        let (bus, _shutdown_tx) = started_bus(4, vec![]).await;
        let late = Arc::new(RecordingHandler::new("late"));

        let err = bus.subscribe("request.created", late).await.unwrap_err();
        assert!(matches!(err, DispatchError::Validation(_)));

        let (_tx, rx) = broadcast::channel(1);
        assert!(bus.start(rx).await.is_err());
        bus.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_close_drains_queued_messages() {
        let slow = Arc::new(RecordingHandler::new("slow").with_delay(Duration::from_millis(5)));
        let (bus, _shutdown_tx) = started_bus(64, vec![("request.created", slow.clone())]).await;

        for i in 0..20 {
            bus.publish("request.created", format!("{i}").into_bytes()).await.unwrap();
        }
        bus.close().await.unwrap();

        assert_eq!(slow.payloads_as_strings().await.len(), 20);
    }

    #[tokio::test]
    async fn test_publish_blocks_when_buffer_full() {
        let bus = Arc::new(InMemoryEventBus::with_capacity(1));
        let handler = Arc::new(RecordingHandler::new("h"));
        bus.subscribe("t", handler.clone()).await.unwrap();

        bus.publish("t", b"first".to_vec()).await.unwrap();
        assert_eq!(bus.stats().await.queued_messages, 1);

        let publisher = {
            let bus = Arc::clone(&bus);
            tokio::spawn(async move { bus.publish("t", b"second".to_vec()).await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!publisher.is_finished());

        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);
        bus.start(shutdown_rx).await.unwrap();
        publisher.await.unwrap().unwrap();
        bus.close().await.unwrap();

        assert_eq!(
            handler.payloads_as_strings().await,
            vec!["first".to_string(), "second".to_string()]
        );
    }

    #[tokio::test]
    async fn test_shutdown_signal_stops_loop() {
        let handler = Arc::new(RecordingHandler::new("h"));
        let (bus, shutdown_tx) = started_bus(8, vec![("t", handler.clone())]).await;

        bus.publish("t", b"before".to_vec()).await.unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(()).unwrap();
        bus.close().await.unwrap();

        assert_eq!(handler.payloads_as_strings().await, vec!["before".to_string()]);
    }

    #[tokio::test]
    async fn test_stats() {
        let bus = InMemoryEventBus::with_capacity(8);
        bus.subscribe("a", Arc::new(RecordingHandler::new("1"))).await.unwrap();
        bus.subscribe("a", Arc::new(RecordingHandler::new("2"))).await.unwrap();
        bus.subscribe("b", Arc::new(RecordingHandler::new("3"))).await.unwrap();

        let stats = bus.stats().await;
        assert_eq!(stats.topics, 2);
        assert_eq!(stats.handlers, 3);
        assert_eq!(stats.queued_messages, 0);
        assert!(!stats.closed);
    }
}
