#![deny(unsafe_code)]
#![doc = "spark-link: 客户端操作链路（Link Chain）运行时。"]
#![doc = ""]
#![doc = "== 结构速览 =="]
#![doc = "- [`observable`]：单订阅、可取消的推送流，是所有 Link 的并发底座；"]
#![doc = "- [`chain`]：`Link` 契约与链路装配器，按“外层在前、终端在后”嵌套调用；"]
#![doc = "- [`links`]：重试、批处理、日志、单请求终端与分流等内置 Link；"]
#![doc = "- [`runtime`]：“回合末延迟”与线缆调用托管的调度原语；"]
#![doc = "- [`transport`] 与 [`wire`]：注入的传输协作者与 JSON 线缆格式。"]
#![doc = ""]
#![doc = "== 并发模型 =="]
#![doc = "单逻辑线程、协作式调度：挂起只发生在终端传输调用与批处理的回合末 flush 两处。"]
#![doc = "类型仍满足 `Send + Sync`，以便托管到多线程执行器上。"]

pub mod chain;
pub mod client;
pub mod config;
pub mod contract;
pub mod error;
pub mod links;
pub mod observable;
pub mod operation;
pub mod runtime;
pub mod test_stubs;
pub mod transport;
pub mod wire;

pub use chain::{Chain, ChainBuilder, Link, LinkDescriptor, Next, OperationStream};
pub use client::LinkClient;
pub use config::{ChainConfig, ConfigError, LinkConfig, LinkDependencies};
pub use contract::Cancellation;
pub use error::{ErrorCategory, LinkError, Result};
pub use links::{
    BatchLink, BatchLinkConfig, BatchRegistry, HttpLink, HttpLinkConfig, LoggerLink,
    LoggerLinkConfig, RetryConfig, RetryLink, SplitLink,
};
pub use observable::{Observable, Observer, Subscriber, Subscription, Teardown, callbacks};
pub use operation::{Operation, OperationId, OperationMeta, OperationType, ResultEnvelope};
#[cfg(feature = "runtime-tokio")]
pub use runtime::TokioRuntime;
pub use runtime::{BoxFuture, DeferredTask, LinkRuntime, ManualRuntime};
pub use transport::{
    HttpMethod, IdentityTransformer, Transformer, WireRequest, WireResponse, WireTransport,
};
