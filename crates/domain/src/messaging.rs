//! 事件总线抽象
//!
//! 主题发布/订阅契约。进程内实现位于 infrastructure crate，
//! 换成持久化的消息中间件时只需实现同一组 trait。

use std::marker::PhantomData;
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::broadcast;

use crate::events::{EventEnvelope, EventPayload};
use dispatch_errors::DispatchResult;

/// 总线上传递的原始消息
#[derive(Debug, Clone)]
pub struct BusMessage {
    pub topic: String,
    pub payload: Vec<u8>,
    pub published_at: DateTime<Utc>,
}

impl BusMessage {
    pub fn new(topic: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            topic: topic.into(),
            payload,
            published_at: Utc::now(),
        }
    }
}

/// 消息处理器
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &str;
    async fn handle(&self, message: &BusMessage) -> DispatchResult<()>;
}

/// 事件总线
#[async_trait]
pub trait EventBus: Send + Sync {
    /// 发布消息；缓冲区满时等待，关闭后返回 BusClosed
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> DispatchResult<()>;

    /// 注册处理器，必须在 start 之前调用
    async fn subscribe(&self, topic: &str, handler: Arc<dyn EventHandler>) -> DispatchResult<()>;

    /// 启动分发循环后立即返回
    async fn start(&self, shutdown_rx: broadcast::Receiver<()>) -> DispatchResult<()>;

    /// 拒绝新的发布，处理完已排队的消息后返回
    async fn close(&self) -> DispatchResult<()>;
}

/// 包装为信封并发布
pub async fn publish_event<T: Serialize + Sync + ?Sized>(
    bus: &dyn EventBus,
    topic: &str,
    correlation_id: &str,
    payload: &T,
) -> DispatchResult<EventEnvelope> {
    let envelope = EventEnvelope::wrap(topic, correlation_id, payload)?;
    bus.publish(topic, envelope.to_bytes()?).await?;
    Ok(envelope)
}

/// 已解码事件的消费者
#[async_trait]
pub trait EventConsumer<E: EventPayload>: Send + Sync {
    async fn consume(&self, envelope: &EventEnvelope, event: E) -> DispatchResult<()>;
}

/// 在注册点完成信封与事件解码的处理器适配器
pub struct TypedHandler<E, C> {
    name: String,
    consumer: Arc<C>,
    _payload: PhantomData<fn() -> E>,
}

impl<E, C> TypedHandler<E, C> {
    pub fn new(name: impl Into<String>, consumer: Arc<C>) -> Self {
        Self {
            name: name.into(),
            consumer,
            _payload: PhantomData,
        }
    }
}

#[async_trait]
impl<E, C> EventHandler for TypedHandler<E, C>
where
    E: EventPayload,
    C: EventConsumer<E> + 'static,
{
    fn name(&self) -> &str {
        &self.name
    }

    async fn handle(&self, message: &BusMessage) -> DispatchResult<()> {
        let envelope = EventEnvelope::from_bytes(&message.payload)?;
        let event = envelope.decode_payload::<E>()?;
        self.consumer.consume(&envelope, event).await
    }
}

/// 以事件类型绑定的主题注册消费者
pub async fn subscribe_typed<E, C>(
    bus: &dyn EventBus,
    name: &str,
    consumer: Arc<C>,
) -> DispatchResult<()>
where
    E: EventPayload,
    C: EventConsumer<E> + 'static,
{
    let handler: Arc<dyn EventHandler> = Arc::new(TypedHandler::<E, C>::new(name, consumer));
    bus.subscribe(E::TOPIC, handler).await
}
