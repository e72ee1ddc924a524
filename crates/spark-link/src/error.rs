use std::{any::Any, borrow::Cow, error::Error as StdError, sync::Arc};

use thiserror::Error;

use crate::{observable::CompletedWithoutValue, wire::WireError};

/// 稳定错误码，遵循 `<域>.<语义>` 命名，供日志与告警精确聚合。
pub mod codes {
    pub const TRANSPORT_FAILED: &str = "spark.link.transport_failed";
    pub const SERVER_ERROR: &str = "spark.link.server_error";
    pub const BATCHING_DISABLED: &str = "spark.link.batching_disabled";
    pub const MALFORMED_RESPONSE: &str = "spark.link.malformed_response";
    pub const UNSUPPORTED_OPERATION: &str = "spark.link.unsupported_operation";
    pub const NO_FURTHER_LINK: &str = "spark.link.no_further_link";
    pub const INTERNAL: &str = "spark.link.internal";
}

/// 错误分类，驱动重试等自动化容错策略。
///
/// # 教案式说明
/// - **意图（Why）**：重试 Link 只应依据结构化分类做决定，而不是解析错误文案；
/// - **契约（What）**：
///   - `Retryable`：传输失败与服务端应用错误，允许在预算内重放；
///   - `NonRetryable`：重放只会重复同一错误（批处理未启用、链路配置缺失、内部故障）；
///   - `ProtocolViolation`：对端响应违反线缆格式，重放同样无意义。
/// - **风险提示（Trade-offs）**：取消不是错误，因此这里不存在 `Cancelled` 分支。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorCategory {
    Retryable,
    NonRetryable,
    ProtocolViolation,
}

/// 底层原因，使用 `Arc` 以便同一失败扇出给多个观察者。
pub type ErrorCause = Arc<dyn StdError + Send + Sync + 'static>;

/// `LinkError` 是链路上唯一的错误形态，经 `on_error` 自下而上传递。
///
/// # 教案式说明
/// - **意图（Why）**：终端、批处理、重试与日志 Link 需要对同一失败作出不同处置，
///   统一的错误域让每个 Link 只处理自己负责的分类，其余原样透传；
/// - **结构（How）**：每个变体对应一类故障来源，[`code`](Self::code) 返回稳定错误码，
///   [`category`](Self::category) 返回处置分类；
/// - **契约（What）**：
///   - 实现 `Clone`：批处理 Link 需要把一次线缆失败复制给组内每个成员；
///   - `Send + Sync + 'static`，可跨线程传递；
///   - 取消永远不会以 `LinkError` 的形式出现。
#[derive(Clone, Debug, Error)]
#[non_exhaustive]
pub enum LinkError {
    /// 在收到任何服务端响应之前发生的网络或连接级失败。
    #[error("transport failure: {message}")]
    Transport {
        message: Cow<'static, str>,
        #[source]
        cause: Option<ErrorCause>,
    },

    /// 结构完整的响应中携带了应用级错误（例如解析器抛出异常）。
    #[error("server error {}: {}", .error.code, .error.message)]
    Server { error: WireError },

    /// 服务端明确拒绝批量调用。
    #[error("batching is not enabled on the server: {message}")]
    BatchingDisabled { message: String },

    /// 响应无法按线缆格式解读（非 JSON、长度不符、id 不匹配等）。
    #[error("malformed response: {detail}")]
    MalformedResponse { detail: Cow<'static, str> },

    /// 当前 Link 无法承载的操作类型，例如通过 HTTP 发起订阅。
    #[error("unsupported operation: {detail}")]
    Unsupported { detail: Cow<'static, str> },

    /// 链路末端没有终端 Link。
    #[error("no further link to handle operation `{path}`")]
    NoFurtherLink { path: String },

    /// Link 自身逻辑中的意外故障（包括被捕获的 panic）。
    #[error("internal link failure: {detail}")]
    Internal { detail: Cow<'static, str> },
}

impl LinkError {
    /// 构造不带底层原因的传输失败。
    pub fn transport(message: impl Into<Cow<'static, str>>) -> Self {
        LinkError::Transport {
            message: message.into(),
            cause: None,
        }
    }

    /// 构造携带底层原因的传输失败。
    pub fn transport_with(
        message: impl Into<Cow<'static, str>>,
        cause: impl StdError + Send + Sync + 'static,
    ) -> Self {
        LinkError::Transport {
            message: message.into(),
            cause: Some(Arc::new(cause)),
        }
    }

    pub fn server(error: WireError) -> Self {
        LinkError::Server { error }
    }

    pub fn malformed(detail: impl Into<Cow<'static, str>>) -> Self {
        LinkError::MalformedResponse {
            detail: detail.into(),
        }
    }

    pub fn unsupported(detail: impl Into<Cow<'static, str>>) -> Self {
        LinkError::Unsupported {
            detail: detail.into(),
        }
    }

    pub fn internal(detail: impl Into<Cow<'static, str>>) -> Self {
        LinkError::Internal {
            detail: detail.into(),
        }
    }

    /// 将被 `catch_unwind` 捕获的 panic 载荷转换为内部错误。
    ///
    /// 载荷为 `&str` 或 `String` 时保留原文，其余类型以占位文案代替。
    pub fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        let detail = if let Some(text) = payload.downcast_ref::<&'static str>() {
            Cow::Borrowed(*text)
        } else if let Some(text) = payload.downcast_ref::<String>() {
            Cow::Owned(text.clone())
        } else {
            Cow::Borrowed("link panicked with a non-string payload")
        };
        LinkError::Internal { detail }
    }

    /// 稳定错误码。
    pub fn code(&self) -> &'static str {
        match self {
            LinkError::Transport { .. } => codes::TRANSPORT_FAILED,
            LinkError::Server { .. } => codes::SERVER_ERROR,
            LinkError::BatchingDisabled { .. } => codes::BATCHING_DISABLED,
            LinkError::MalformedResponse { .. } => codes::MALFORMED_RESPONSE,
            LinkError::Unsupported { .. } => codes::UNSUPPORTED_OPERATION,
            LinkError::NoFurtherLink { .. } => codes::NO_FURTHER_LINK,
            LinkError::Internal { .. } => codes::INTERNAL,
        }
    }

    /// 处置分类。
    ///
    /// # 契约说明（What）
    /// - 传输失败与服务端错误视为同一类可重试故障；
    /// - 批处理未启用不可重试：重放只会重复同一配置错误；
    /// - 其余分支均不可重试，格式错误单独标记为 `ProtocolViolation`。
    pub fn category(&self) -> ErrorCategory {
        match self {
            LinkError::Transport { .. } | LinkError::Server { .. } => ErrorCategory::Retryable,
            LinkError::MalformedResponse { .. } => ErrorCategory::ProtocolViolation,
            LinkError::BatchingDisabled { .. }
            | LinkError::Unsupported { .. }
            | LinkError::NoFurtherLink { .. }
            | LinkError::Internal { .. } => ErrorCategory::NonRetryable,
        }
    }

    pub fn is_retryable(&self) -> bool {
        self.category() == ErrorCategory::Retryable
    }
}

impl From<CompletedWithoutValue> for LinkError {
    fn from(_: CompletedWithoutValue) -> Self {
        LinkError::internal("stream completed without a value")
    }
}

/// 链路统一的结果别名，默认错误类型为 [`LinkError`]。
pub type Result<T, E = LinkError> = core::result::Result<T, E>;
