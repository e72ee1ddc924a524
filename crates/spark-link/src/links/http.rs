use std::{
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{
    chain::{Link, LinkDescriptor, Next, OperationStream},
    config::ConfigError,
    error::LinkError,
    observable::{Observable, Teardown},
    operation::{Operation, OperationType},
    runtime::LinkRuntime,
    transport::{
        HttpMethod, IdentityTransformer, Transformer, WireRequest, WireTransport, dispatch,
    },
    wire::{decode_single, encode_single, resolve_item},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpLinkConfig {
    pub url: String,
}

impl HttpLinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl { link: "http" });
        }
        Ok(())
    }
}

#[derive(Clone)]
struct HttpContext {
    config: HttpLinkConfig,
    runtime: Arc<dyn LinkRuntime>,
    transport: Arc<dyn WireTransport>,
    transformer: Arc<dyn Transformer>,
}

/// 单操作终端 Link：每次订阅恰好发出一次线缆调用。
///
/// # 教案式说明
/// - **结构（How）**：订阅时序列化操作并经 [`LinkRuntime::spawn`] 托管调用；结算后发出一个
///   结果信封并完成，或发出一个错误；
/// - **契约（What）**：
///   - 查询使用 `GET`，变更使用 `POST`，订阅直接以 [`LinkError::Unsupported`] 失败；
///   - 结算前退订会通过 [`Cancellation`](crate::Cancellation) 尽力中止在途调用；
///     传输层即便忽略中止，观察者也不会再收到通知。
pub struct HttpLink {
    ctx: Arc<HttpContext>,
}

impl HttpLink {
    pub fn new(
        config: HttpLinkConfig,
        runtime: Arc<dyn LinkRuntime>,
        transport: Arc<dyn WireTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(HttpContext {
                config,
                runtime,
                transport,
                transformer: Arc::new(IdentityTransformer),
            }),
        })
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        Arc::make_mut(&mut self.ctx).transformer = transformer;
        self
    }
}

impl Link for HttpLink {
    fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor::new(
            "http",
            "terminal",
            format!("one wire call per operation to {}", self.ctx.config.url),
        )
    }

    fn call(&self, operation: Operation, _next: Next) -> OperationStream {
        let ctx = Arc::clone(&self.ctx);
        Observable::new(move |subscriber| {
            if operation.kind() == OperationType::Subscription {
                subscriber.error(LinkError::unsupported(
                    "subscriptions require a streaming transport",
                ));
                return Teardown::noop();
            }
            let body = match encode_single(&operation, ctx.transformer.as_ref()) {
                Ok(body) => body,
                Err(error) => {
                    subscriber.error(error);
                    return Teardown::noop();
                }
            };
            let request = WireRequest {
                url: ctx.config.url.clone(),
                method: HttpMethod::for_operation(operation.kind()),
                batch: false,
                body,
            };
            let id = operation.id();
            let transformer = Arc::clone(&ctx.transformer);
            let downstream = subscriber.clone();
            let in_flight = dispatch(
                ctx.runtime.as_ref(),
                ctx.transport.as_ref(),
                request,
                move |outcome| {
                    // 结算发生在托管任务里，变换器的 panic 不再受链路边界保护。
                    let resolved = catch_unwind(AssertUnwindSafe(|| {
                        outcome
                            .and_then(|response| decode_single(&response))
                            .and_then(|body| resolve_item(body, id, transformer.as_ref()))
                    }))
                    .unwrap_or_else(|payload| Err(LinkError::from_panic(payload)));
                    match resolved {
                        Ok(envelope) => {
                            downstream.next(envelope);
                            downstream.complete();
                        }
                        Err(error) => downstream.error(error),
                    }
                },
            );
            Teardown::new(move || {
                in_flight.abort();
            })
        })
    }
}
