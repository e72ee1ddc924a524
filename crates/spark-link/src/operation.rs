use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// 操作标识，由调用方单调分配，用于批量响应的关联校验。
pub type OperationId = u64;

/// 附着在操作上的任意元数据，Link 只读不改。
pub type OperationMeta = serde_json::Map<String, Value>;

/// 远程调用的三种形态。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OperationType {
    Query,
    Mutation,
    Subscription,
}

impl OperationType {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationType::Query => "query",
            OperationType::Mutation => "mutation",
            OperationType::Subscription => "subscription",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次逻辑客户端调用的不可变描述。
///
/// # 教案式说明
/// - **意图（Why）**：操作描述沿链路自上而下传递，重试会重复使用同一描述，批处理需要按 `id`
///   关联响应，因此描述必须在创建后保持不变；
/// - **结构（How）**：字段全部私有，只暴露只读访问器；`with_meta` 以消费 `self` 的方式
///   产出新实例，而非原地修改；
/// - **契约（What）**：`id` 在一次链路调用内唯一，`path` 为目标过程路径，`input` 与 `meta`
///   对链路而言是不透明值。
#[derive(Clone, Debug, PartialEq)]
pub struct Operation {
    id: OperationId,
    kind: OperationType,
    path: String,
    input: Value,
    meta: OperationMeta,
}

impl Operation {
    pub fn new(
        id: OperationId,
        kind: OperationType,
        path: impl Into<String>,
        input: Value,
    ) -> Self {
        Self {
            id,
            kind,
            path: path.into(),
            input,
            meta: OperationMeta::new(),
        }
    }

    pub fn query(id: OperationId, path: impl Into<String>, input: Value) -> Self {
        Self::new(id, OperationType::Query, path, input)
    }

    pub fn mutation(id: OperationId, path: impl Into<String>, input: Value) -> Self {
        Self::new(id, OperationType::Mutation, path, input)
    }

    pub fn subscription(id: OperationId, path: impl Into<String>, input: Value) -> Self {
        Self::new(id, OperationType::Subscription, path, input)
    }

    /// 附加一条元数据，返回新的操作描述。
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.meta.insert(key.into(), value);
        self
    }

    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn kind(&self) -> OperationType {
        self.kind
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn input(&self) -> &Value {
        &self.input
    }

    pub fn meta(&self) -> &OperationMeta {
        &self.meta
    }
}

/// 终端层产出的成功结果信封，经透传 Link 原样上行。
///
/// 应用级错误不会以信封形式出现，而是转为 [`LinkError::Server`](crate::LinkError::Server)
/// 经 `on_error` 传递，保证消费者只会收到一种终止通知。
#[derive(Clone, Debug, PartialEq)]
pub struct ResultEnvelope {
    pub id: OperationId,
    pub data: Value,
}

impl ResultEnvelope {
    pub fn new(id: OperationId, data: Value) -> Self {
        Self { id, data }
    }
}
