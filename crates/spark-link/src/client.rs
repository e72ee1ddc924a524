use std::{
    future::Future,
    sync::atomic::{AtomicU64, Ordering},
};

use serde_json::Value;

use crate::{
    chain::{Chain, OperationStream},
    error::Result,
    operation::{Operation, OperationType},
};

/// 持有一条链路并负责分配操作 `id` 的客户端。
///
/// `id` 从 1 开始单调递增，在同一客户端内唯一；不同客户端之间可能重复，
/// 批处理组只要求组内唯一。
pub struct LinkClient {
    chain: Chain,
    next_id: AtomicU64,
}

impl LinkClient {
    pub fn new(chain: Chain) -> Self {
        Self {
            chain,
            next_id: AtomicU64::new(1),
        }
    }

    pub fn chain(&self) -> &Chain {
        &self.chain
    }

    /// 以新分配的 `id` 构造操作描述。
    pub fn operation(
        &self,
        kind: OperationType,
        path: impl Into<String>,
        input: Value,
    ) -> Operation {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        Operation::new(id, kind, path, input)
    }

    pub fn execute(&self, operation: Operation) -> OperationStream {
        self.chain.execute(operation)
    }

    pub fn query(&self, path: impl Into<String>, input: Value) -> OperationStream {
        self.execute(self.operation(OperationType::Query, path, input))
    }

    pub fn mutation(&self, path: impl Into<String>, input: Value) -> OperationStream {
        self.execute(self.operation(OperationType::Mutation, path, input))
    }

    pub fn subscription(&self, path: impl Into<String>, input: Value) -> OperationStream {
        self.execute(self.operation(OperationType::Subscription, path, input))
    }

    /// 立即订阅，并以第一个结果的数据或错误结算。
    ///
    /// 订阅在调用时就已发生，因此同一回合内连续调用的请求可以被批处理 Link 合并；
    /// 丢弃返回的 Future 会退订。
    pub fn request(
        &self,
        kind: OperationType,
        path: impl Into<String>,
        input: Value,
    ) -> impl Future<Output = Result<Value>> + Send + 'static {
        let pending = self
            .execute(self.operation(kind, path, input))
            .first_value();
        async move { pending.await.map(|envelope| envelope.data) }
    }
}
