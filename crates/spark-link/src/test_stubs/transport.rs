use std::{
    collections::VecDeque,
    sync::Arc,
    task::{Poll, Waker},
};

use futures_util::future::{pending, poll_fn, ready};
use parking_lot::Mutex;
use serde_json::{Value, json};

use crate::{
    contract::Cancellation,
    error::{LinkError, Result},
    operation::OperationId,
    runtime::BoxFuture,
    transport::{WireRequest, WireResponse, WireTransport},
    wire::{METHOD_NOT_SUPPORTED, RequestBody, ResponseBody, WireError},
};

type Responder = dyn Fn(&WireRequest) -> Result<WireResponse> + Send + Sync;

enum Scripted {
    Respond(WireResponse),
    Fail(LinkError),
    Hang,
    Gate(ResponseGate),
}

#[derive(Default)]
struct Script {
    queue: VecDeque<Scripted>,
    fallback: Option<Arc<Responder>>,
    requests: Vec<WireRequest>,
    cancellations: Vec<Cancellation>,
}

/// 按脚本回放响应的传输层。
///
/// # 契约说明（What）
/// - 每次 `send` 记录请求与取消令牌，然后弹出队首脚本；
/// - 队列为空时交给 [`respond_with`](Self::respond_with) 注册的处理器，未注册则返回传输失败；
/// - 克隆共享同一脚本与记录。
#[derive(Clone, Default)]
pub struct ScriptedTransport {
    script: Arc<Mutex<Script>>,
}

impl ScriptedTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// 把请求体中的 `input` 原样作为 `data` 回显，批量请求按位置逐项回显。
    pub fn echo() -> Self {
        let transport = Self::new();
        transport.respond_with(echo_response);
        transport
    }

    pub fn push_response(&self, response: WireResponse) -> &Self {
        self.script.lock().queue.push_back(Scripted::Respond(response));
        self
    }

    pub fn push_failure(&self, error: LinkError) -> &Self {
        self.script.lock().queue.push_back(Scripted::Fail(error));
        self
    }

    /// 下一次调用永不结算，用于验证中止。
    pub fn push_hang(&self) -> &Self {
        self.script.lock().queue.push_back(Scripted::Hang);
        self
    }

    /// 下一次调用在测试调用 [`ResponseGate::open`] 之后才结算。
    pub fn push_gate(&self) -> ResponseGate {
        let gate = ResponseGate::default();
        self.script
            .lock()
            .queue
            .push_back(Scripted::Gate(gate.clone()));
        gate
    }

    pub fn respond_with(
        &self,
        responder: impl Fn(&WireRequest) -> Result<WireResponse> + Send + Sync + 'static,
    ) {
        self.script.lock().fallback = Some(Arc::new(responder));
    }

    pub fn requests(&self) -> Vec<WireRequest> {
        self.script.lock().requests.clone()
    }

    pub fn request_count(&self) -> usize {
        self.script.lock().requests.len()
    }

    /// 每次调用收到的取消令牌，顺序与 [`requests`](Self::requests) 一致。
    pub fn cancellations(&self) -> Vec<Cancellation> {
        self.script.lock().cancellations.clone()
    }

    pub fn shared(&self) -> Arc<dyn WireTransport> {
        Arc::new(self.clone())
    }
}

impl WireTransport for ScriptedTransport {
    fn send(
        &self,
        request: WireRequest,
        cancellation: Cancellation,
    ) -> BoxFuture<'static, Result<WireResponse>> {
        let (scripted, fallback) = {
            let mut script = self.script.lock();
            script.requests.push(request.clone());
            script.cancellations.push(cancellation);
            (script.queue.pop_front(), script.fallback.clone())
        };
        match scripted {
            Some(Scripted::Respond(response)) => Box::pin(ready(Ok(response))),
            Some(Scripted::Fail(error)) => Box::pin(ready(Err(error))),
            Some(Scripted::Hang) => Box::pin(pending()),
            Some(Scripted::Gate(gate)) => Box::pin(gate.wait()),
            None => match fallback {
                Some(responder) => Box::pin(ready(responder(&request))),
                None => Box::pin(ready(Err(LinkError::transport(
                    "no scripted response left",
                )))),
            },
        }
    }
}

#[derive(Default)]
struct GateState {
    outcome: Option<Result<WireResponse>>,
    waker: Option<Waker>,
}

/// 由测试手动放行的响应。
#[derive(Clone, Default)]
pub struct ResponseGate {
    state: Arc<Mutex<GateState>>,
}

impl ResponseGate {
    pub fn open(&self, outcome: Result<WireResponse>) {
        let waker = {
            let mut state = self.state.lock();
            state.outcome = Some(outcome);
            state.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }

    fn wait(self) -> impl std::future::Future<Output = Result<WireResponse>> + Send + 'static {
        poll_fn(move |cx| {
            let mut state = self.state.lock();
            match state.outcome.take() {
                Some(outcome) => Poll::Ready(outcome),
                None => {
                    state.waker = Some(cx.waker().clone());
                    Poll::Pending
                }
            }
        })
    }
}

/// 单条成功响应。
pub fn data_response(id: OperationId, data: Value) -> WireResponse {
    WireResponse::ok(json!(ResponseBody::data(id, data)).to_string())
}

/// 按顺序排列的批量成功响应。
pub fn batch_response(items: impl IntoIterator<Item = (OperationId, Value)>) -> WireResponse {
    let bodies: Vec<ResponseBody> = items
        .into_iter()
        .map(|(id, data)| ResponseBody::data(id, data))
        .collect();
    WireResponse::ok(json!(bodies).to_string())
}

/// 单条应用级错误响应。
pub fn error_response(id: OperationId, code: i64, message: &str) -> WireResponse {
    WireResponse::new(
        500,
        json!(ResponseBody::failure(id, WireError::new(code, message))).to_string(),
    )
}

/// 服务端拒绝批量调用时的错误体。
pub fn batching_disabled_response() -> WireResponse {
    WireResponse::new(
        400,
        json!({
            "error": WireError::new(METHOD_NOT_SUPPORTED, "Batching is not enabled on the server")
        })
        .to_string(),
    )
}

fn echo_response(request: &WireRequest) -> Result<WireResponse> {
    let malformed = |err: serde_json::Error| LinkError::malformed(err.to_string());
    if request.batch {
        let bodies: Vec<RequestBody> = serde_json::from_str(&request.body).map_err(malformed)?;
        Ok(batch_response(
            bodies.into_iter().map(|body| (body.id, body.input)),
        ))
    } else {
        let body: RequestBody = serde_json::from_str(&request.body).map_err(malformed)?;
        Ok(data_response(body.id, body.input))
    }
}
