use thiserror::Error;

#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("序列化错误: {0}")]
    Serialization(String),
    #[error("反序列化错误: {0}")]
    Deserialization(String),
    #[error("事件总线已关闭")]
    BusClosed,
    #[error("派单未找到: {id}")]
    DispatchNotFound { id: String },
    #[error("服务请求未找到: {id}")]
    RequestNotFound { id: String },
    #[error("无效的状态转换: {entity} {id} 当前状态 {from} 不允许 {action}")]
    InvalidTransition {
        entity: &'static str,
        id: String,
        from: String,
        action: String,
    },
    #[error("持久化错误: {0}")]
    Persistence(String),
    #[error("通知投递失败: {0}")]
    Delivery(String),
    #[error("数据验证失败: {0}")]
    Validation(String),
    #[error("权限不足: {0}")]
    Permission(String),
    #[error("请求过于频繁: {key}，请在 {retry_after_ms} 毫秒后重试")]
    RateLimited { key: String, retry_after_ms: u64 },
    #[error("内部错误: {0}")]
    Internal(String),
}

pub type DispatchResult<T> = Result<T, DispatchError>;

impl DispatchError {
    pub fn serialization<S: Into<String>>(msg: S) -> Self {
        Self::Serialization(msg.into())
    }
    pub fn deserialization<S: Into<String>>(msg: S) -> Self {
        Self::Deserialization(msg.into())
    }
    pub fn dispatch_not_found<S: Into<String>>(id: S) -> Self {
        Self::DispatchNotFound { id: id.into() }
    }
    pub fn request_not_found<S: Into<String>>(id: S) -> Self {
        Self::RequestNotFound { id: id.into() }
    }
    pub fn invalid_transition<I, F, A>(entity: &'static str, id: I, from: F, action: A) -> Self
    where
        I: Into<String>,
        F: ToString,
        A: Into<String>,
    {
        Self::InvalidTransition {
            entity,
            id: id.into(),
            from: from.to_string(),
            action: action.into(),
        }
    }
    pub fn persistence<S: Into<String>>(msg: S) -> Self {
        Self::Persistence(msg.into())
    }
    pub fn delivery<S: Into<String>>(msg: S) -> Self {
        Self::Delivery(msg.into())
    }
    pub fn validation_error<S: Into<String>>(msg: S) -> Self {
        Self::Validation(msg.into())
    }
    pub fn permission<S: Into<String>>(msg: S) -> Self {
        Self::Permission(msg.into())
    }
    pub fn internal<S: Into<String>>(msg: S) -> Self {
        Self::Internal(msg.into())
    }
}

impl From<sqlx::Error> for DispatchError {
    fn from(err: sqlx::Error) -> Self {
        DispatchError::Persistence(err.to_string())
    }
}
