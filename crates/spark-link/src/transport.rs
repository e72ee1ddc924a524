//! 注入的传输协作者：线缆调用、序列化变换与在途调用的中止。

use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use futures_util::future::{AbortHandle, abortable, ready};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    contract::Cancellation,
    error::{LinkError, Result},
    operation::OperationType,
    runtime::{BoxFuture, LinkRuntime},
};

/// 线缆请求使用的 HTTP 方法。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    /// 查询走 `GET`，变更（以及其他一切）走 `POST`。
    pub fn for_operation(kind: OperationType) -> Self {
        match kind {
            OperationType::Query => HttpMethod::Get,
            OperationType::Mutation | OperationType::Subscription => HttpMethod::Post,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// 交给传输层的一次线缆请求。`body` 已是 JSON 文本。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireRequest {
    pub url: String,
    pub method: HttpMethod,
    pub batch: bool,
    pub body: String,
}

/// 传输层返回的原始响应。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct WireResponse {
    pub status: u16,
    pub body: String,
}

impl WireResponse {
    pub fn new(status: u16, body: impl Into<String>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// `200 OK` 响应。
    pub fn ok(body: impl Into<String>) -> Self {
        Self::new(200, body)
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// 线缆调用契约。
///
/// # 设计背景（Why）
/// - 套接字、请求头与 TLS 都不属于链路，链路只需要“给定请求，得到未来的响应或传输失败”；
///
/// # 契约说明（What）
/// - `send` 必须立即返回 Future，不得在调用栈内阻塞；
/// - `cancellation` 被触发后，实现应尽力中止底层 I/O；忽略它也是合法的，链路另有兜底，
///   保证退订后观察者不会再收到通知；
/// - 连接级失败以 [`LinkError::Transport`] 返回；拿到了响应（无论状态码）则返回 `Ok`。
pub trait WireTransport: Send + Sync + 'static {
    fn send(
        &self,
        request: WireRequest,
        cancellation: Cancellation,
    ) -> BoxFuture<'static, Result<WireResponse>>;
}

impl<F> WireTransport for F
where
    F: Fn(WireRequest, Cancellation) -> BoxFuture<'static, Result<WireResponse>>
        + Send
        + Sync
        + 'static,
{
    fn send(
        &self,
        request: WireRequest,
        cancellation: Cancellation,
    ) -> BoxFuture<'static, Result<WireResponse>> {
        self(request, cancellation)
    }
}

/// 输入输出的序列化变换对，例如把日期等富类型编码为 JSON 可表达的形态。
pub trait Transformer: Send + Sync + 'static {
    fn serialize(&self, input: &Value) -> Result<Value>;
    fn deserialize(&self, output: Value) -> Result<Value>;
}

/// 原样透传的默认变换。
#[derive(Clone, Copy, Debug, Default)]
pub struct IdentityTransformer;

impl Transformer for IdentityTransformer {
    fn serialize(&self, input: &Value) -> Result<Value> {
        Ok(input.clone())
    }

    fn deserialize(&self, output: Value) -> Result<Value> {
        Ok(output)
    }
}

/// 在途线缆调用的中止句柄。
pub(crate) struct InFlight {
    cancellation: Cancellation,
    abort: AbortHandle,
    settled: Arc<AtomicBool>,
}

impl InFlight {
    /// 尽力中止调用；调用已结算或已中止时为空操作，返回值表示本次是否真正触发了中止。
    pub(crate) fn abort(&self) -> bool {
        if self.settled.load(Ordering::Acquire) {
            return false;
        }
        let first = self.cancellation.cancel();
        self.abort.abort();
        if first {
            tracing::debug!(target: "spark_link::transport", "in-flight wire call aborted");
        }
        first
    }
}

/// 发起一次线缆调用并托管到运行时，结算时回调 `on_settle`。
///
/// # 逻辑解析（How）
/// - 传输层的 Future 被 `Abortable` 包裹：中止之后 `on_settle` 绝不会再被调用，
///   即便传输实现忽略了取消位；
/// - 传输层在 `send` 内同步 panic 时，转为一次 [`LinkError::Internal`] 结算，
///   回合末任务里的 panic 因此不会逃出链路。
pub(crate) fn dispatch(
    runtime: &dyn LinkRuntime,
    transport: &dyn WireTransport,
    request: WireRequest,
    on_settle: impl FnOnce(Result<WireResponse>) + Send + 'static,
) -> InFlight {
    let cancellation = Cancellation::new();
    let settled = Arc::new(AtomicBool::new(false));
    tracing::debug!(
        target: "spark_link::transport",
        url = %request.url,
        method = request.method.as_str(),
        batch = request.batch,
        "dispatching wire call"
    );
    let call = match catch_unwind(AssertUnwindSafe(|| {
        transport.send(request, cancellation.clone())
    })) {
        Ok(call) => call,
        Err(payload) => {
            let failure: BoxFuture<'static, Result<WireResponse>> =
                Box::pin(ready(Err(LinkError::from_panic(payload))));
            failure
        }
    };
    let (call, abort) = abortable(call);
    let flag = Arc::clone(&settled);
    runtime.spawn(Box::pin(async move {
        if let Ok(outcome) = call.await {
            flag.store(true, Ordering::Release);
            on_settle(outcome);
        }
    }));
    InFlight {
        cancellation,
        abort,
        settled,
    }
}
