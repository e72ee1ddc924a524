//! Link 契约与链路装配器。
//!
//! # 教案式概览
//! - **意图（Why）**：重试、批处理、日志等横切行为彼此无感知，只通过“调用下一个 Link”串联；
//! - **结构（How）**：链路是一个显式的 `Arc<dyn Link>` 列表，[`Next`] 记录“下一个 Link 的下标”，
//!   以命令式方式展开嵌套调用，而非层层嵌套的匿名闭包；
//! - **契约（What）**：
//!   - 订阅组合后的流会同步调用第一个 Link，是否继续向下由各 Link 自行决定；
//!   - 退订沿着“已经向下订阅”的路径逐层拆除，短路的 Link 不承担下游拆除义务；
//!   - 越靠前的 Link 越能观察到其后所有 Link 的错误与取消。
//! - **风险提示（Trade-offs）**：每个 Link 之间多一层订阅转发，换来 panic 隔离与一致的拆除语义。

use std::{
    borrow::Cow,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use crate::{
    error::LinkError,
    observable::{Observable, Teardown},
    operation::{Operation, ResultEnvelope},
};

/// 链路中流动的结果流。
pub type OperationStream = Observable<ResultEnvelope, LinkError>;

/// Link 的可观测元数据，用于诊断与链路自省。
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LinkDescriptor {
    name: Cow<'static, str>,
    category: Cow<'static, str>,
    summary: Cow<'static, str>,
}

impl LinkDescriptor {
    pub fn new(
        name: impl Into<Cow<'static, str>>,
        category: impl Into<Cow<'static, str>>,
        summary: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self {
            name: name.into(),
            category: category.into(),
            summary: summary.into(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// 类别：`terminal`、`resilience`、`observability`、`routing` 等。
    pub fn category(&self) -> &str {
        &self.category
    }

    pub fn summary(&self) -> &str {
        &self.summary
    }
}

/// 链路中的一个环节。
///
/// # 教案式说明
/// - **意图（Why）**：每个 Link 只关心自己负责的那一类行为，其余交给 `next`；
/// - **结构（How）**：`call` 返回“尚未开始”的结果流，真正的工作在该流被订阅时才发生；
/// - **契约（What）**：
///   - `call` 可以调用 `next.run(op)` 零次（短路）、一次（透传）或多次（重试）；
///   - 返回的流必须遵守推送流契约：至多一个终止通知，拆除恰好执行一次；
///   - `call` 或流的生产者中发生的 panic 会被链路捕获，转为 [`LinkError::Internal`]。
pub trait Link: Send + Sync + 'static {
    fn descriptor(&self) -> LinkDescriptor;

    fn call(&self, operation: Operation, next: Next) -> OperationStream;
}

/// “继续调用下一个 Link”的句柄。
#[derive(Clone)]
pub struct Next {
    links: Arc<[Arc<dyn Link>]>,
    index: usize,
}

impl Next {
    /// 调用下一个 Link；链路已到末端时返回立即报错的流。
    pub fn run(&self, operation: Operation) -> OperationStream {
        let Some(link) = self.links.get(self.index).cloned() else {
            return Observable::fail(LinkError::NoFurtherLink {
                path: operation.path().to_owned(),
            });
        };
        let next = Next {
            links: Arc::clone(&self.links),
            index: self.index + 1,
        };
        guarded(link, operation, next)
    }

    /// 当前位置之后尚有多少个 Link。
    pub fn remaining(&self) -> usize {
        self.links.len().saturating_sub(self.index)
    }
}

/// 在 Link 边界捕获 panic，转为 `on_error`。
fn guarded(link: Arc<dyn Link>, operation: Operation, next: Next) -> OperationStream {
    Observable::new(move |subscriber| {
        let called = catch_unwind(AssertUnwindSafe(|| {
            link.call(operation.clone(), next.clone())
        }));
        let stream = match called {
            Ok(stream) => stream,
            Err(payload) => {
                let error = LinkError::from_panic(payload);
                let descriptor = link.descriptor();
                tracing::warn!(
                    target: "spark_link::chain",
                    link = descriptor.name(),
                    %error,
                    "link panicked while handling operation"
                );
                subscriber.error(error);
                return Teardown::noop();
            }
        };
        let downstream = subscriber.clone();
        match catch_unwind(AssertUnwindSafe(|| stream.subscribe(downstream))) {
            Ok(subscription) => Teardown::from(subscription),
            Err(payload) => {
                let error = LinkError::from_panic(payload);
                let descriptor = link.descriptor();
                tracing::warn!(
                    target: "spark_link::chain",
                    link = descriptor.name(),
                    %error,
                    "link stream panicked while subscribing"
                );
                subscriber.error(error);
                Teardown::noop()
            }
        }
    })
}

/// 装配完成的链路：外层在前，终端在后。
#[derive(Clone)]
pub struct Chain {
    links: Arc<[Arc<dyn Link>]>,
}

impl Chain {
    pub fn builder() -> ChainBuilder {
        ChainBuilder::default()
    }

    pub fn new(links: Vec<Arc<dyn Link>>) -> Self {
        Self {
            links: links.into(),
        }
    }

    /// 为一次操作构造组合后的结果流；每次订阅都从第一个 Link 重新开始。
    pub fn execute(&self, operation: Operation) -> OperationStream {
        Next {
            links: Arc::clone(&self.links),
            index: 0,
        }
        .run(operation)
    }

    pub fn descriptors(&self) -> Vec<LinkDescriptor> {
        self.links.iter().map(|link| link.descriptor()).collect()
    }

    pub fn len(&self) -> usize {
        self.links.len()
    }

    pub fn is_empty(&self) -> bool {
        self.links.is_empty()
    }
}

#[derive(Default)]
pub struct ChainBuilder {
    links: Vec<Arc<dyn Link>>,
}

impl ChainBuilder {
    pub fn link(mut self, link: impl Link) -> Self {
        self.links.push(Arc::new(link));
        self
    }

    pub fn link_arc(mut self, link: Arc<dyn Link>) -> Self {
        self.links.push(link);
        self
    }

    pub fn build(self) -> Chain {
        Chain::new(self.links)
    }
}
