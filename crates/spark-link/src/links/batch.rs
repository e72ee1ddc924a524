//! 批处理终端 Link：把同一回合内发往同一端点的操作合并为一次线缆调用。
//!
//! # 教案式概览
//! - **意图（Why）**：同一渲染回合里常有大量互不相关的查询，逐个发送会放大连接与排队开销；
//! - **结构（How）**：
//!   - [`BatchRegistry`] 按 `(url, method)` 记录仍在接受登记的批处理组，作用域为一个客户端；
//!   - 组内第一次登记通过 [`LinkRuntime::defer`] 安排回合末 flush，窗口就是
//!     “控制权交还调度器之前登记的全部操作”；
//!   - flush 时把组从注册表摘除并快照成员，发出一次数组形态的线缆调用，响应按位置解复用；
//! - **契约（What）**：
//!   - 组生命周期 `Open → Dispatched → Settled`，任一时刻可能转入 `Cancelled`；
//!   - flush 之后的登记总会开启新组；组内 `id` 不重复，重复的 `id` 会封存当前组；
//!   - 线缆失败（传输失败、批处理未启用、长度不符）扇出给全部仍在登记的成员，绝不出现部分成功；
//!   - 单个成员退订只影响自己；flush 之前最后一个成员退订会取消整组，之后则仅在全部成员都退订时
//!     中止在途调用。
//! - **风险提示（Trade-offs）**：
//!   - 锁顺序固定为“注册表 → 组”，观察者回调与拆除回调都在锁外执行；
//!   - 成员持有订阅者，订阅者的拆除回调又持有组，环在组结算、成员终止或退订时断开。

use std::{
    collections::HashMap,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    chain::{Link, LinkDescriptor, Next, OperationStream},
    config::ConfigError,
    error::{LinkError, Result},
    observable::{Observable, Subscriber, Teardown},
    operation::{Operation, OperationType, ResultEnvelope},
    runtime::LinkRuntime,
    transport::{
        HttpMethod, IdentityTransformer, InFlight, Transformer, WireRequest, WireResponse,
        WireTransport, dispatch,
    },
    wire::{decode_batch, encode_batch, resolve_item},
};

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BatchLinkConfig {
    pub url: String,
    /// 单组成员上限；达到上限的组被封存，后续登记开启新组。
    #[serde(default)]
    pub max_batch_size: Option<usize>,
}

impl BatchLinkConfig {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            max_batch_size: None,
        }
    }

    pub fn with_max_batch_size(mut self, max: usize) -> Self {
        self.max_batch_size = Some(max);
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.url.trim().is_empty() {
            return Err(ConfigError::EmptyUrl { link: "http_batch" });
        }
        if self.max_batch_size == Some(0) {
            return Err(ConfigError::InvalidBatchSize);
        }
        Ok(())
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
struct BatchKey {
    url: String,
    method: HttpMethod,
}

/// 仍在接受登记的批处理组，作用域为一个客户端实例。
///
/// 克隆共享同一张表；多个 [`BatchLink`] 共享注册表时，发往同一端点的操作会进入同一组。
#[derive(Clone, Default)]
pub struct BatchRegistry {
    groups: Arc<Mutex<HashMap<BatchKey, Arc<BatchGroup>>>>,
}

impl BatchRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// 当前仍在接受登记的组数量。
    pub fn open_groups(&self) -> usize {
        self.groups.lock().len()
    }
}

fn unregister(groups: &mut HashMap<BatchKey, Arc<BatchGroup>>, group: &Arc<BatchGroup>) {
    if groups
        .get(&group.key)
        .is_some_and(|current| Arc::ptr_eq(current, group))
    {
        groups.remove(&group.key);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Phase {
    Open,
    Dispatched,
    Settled,
    Cancelled,
}

struct Member {
    token: u64,
    operation: Operation,
    subscriber: Subscriber<ResultEnvelope, LinkError>,
    active: bool,
}

struct GroupState {
    phase: Phase,
    members: Vec<Member>,
    next_token: u64,
    in_flight: Option<InFlight>,
}

struct BatchGroup {
    key: BatchKey,
    state: Mutex<GroupState>,
}

impl BatchGroup {
    fn new(key: BatchKey) -> Self {
        Self {
            key,
            state: Mutex::new(GroupState {
                phase: Phase::Open,
                members: Vec::new(),
                next_token: 0,
                in_flight: None,
            }),
        }
    }
}

impl GroupState {
    fn admit(
        &mut self,
        operation: Operation,
        subscriber: Subscriber<ResultEnvelope, LinkError>,
    ) -> u64 {
        let token = self.next_token;
        self.next_token += 1;
        self.members.push(Member {
            token,
            operation,
            subscriber,
            active: true,
        });
        token
    }

    fn contains(&self, id: u64) -> bool {
        self.members
            .iter()
            .any(|member| member.operation.id() == id)
    }
}

#[derive(Clone)]
struct BatchContext {
    config: BatchLinkConfig,
    runtime: Arc<dyn LinkRuntime>,
    transport: Arc<dyn WireTransport>,
    transformer: Arc<dyn Transformer>,
    registry: BatchRegistry,
}

/// 合并同回合操作的终端 Link。
pub struct BatchLink {
    ctx: Arc<BatchContext>,
}

impl BatchLink {
    /// 使用独立注册表与原样透传的变换创建 Link。
    pub fn new(
        config: BatchLinkConfig,
        runtime: Arc<dyn LinkRuntime>,
        transport: Arc<dyn WireTransport>,
    ) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self {
            ctx: Arc::new(BatchContext {
                config,
                runtime,
                transport,
                transformer: Arc::new(IdentityTransformer),
                registry: BatchRegistry::new(),
            }),
        })
    }

    /// 与其他 Link 共享批处理组注册表。
    pub fn with_registry(mut self, registry: BatchRegistry) -> Self {
        Arc::make_mut(&mut self.ctx).registry = registry;
        self
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        Arc::make_mut(&mut self.ctx).transformer = transformer;
        self
    }

    pub fn registry(&self) -> &BatchRegistry {
        &self.ctx.registry
    }
}

impl Link for BatchLink {
    fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor::new(
            "http_batch",
            "terminal",
            format!(
                "coalesces same-turn operations into one call to {}",
                self.ctx.config.url
            ),
        )
    }

    fn call(&self, operation: Operation, _next: Next) -> OperationStream {
        let ctx = Arc::clone(&self.ctx);
        Observable::new(move |subscriber| {
            if operation.kind() == OperationType::Subscription {
                subscriber.error(LinkError::unsupported(
                    "subscriptions cannot be sent through a batching link",
                ));
                return Teardown::noop();
            }
            ctx.register(operation.clone(), subscriber)
        })
    }
}

impl BatchContext {
    fn register(
        self: &Arc<Self>,
        operation: Operation,
        subscriber: Subscriber<ResultEnvelope, LinkError>,
    ) -> Teardown {
        let key = BatchKey {
            url: self.config.url.clone(),
            method: HttpMethod::for_operation(operation.kind()),
        };
        let id = operation.id();
        let (group, token, opened) = {
            let mut groups = self.registry.groups.lock();
            let joined = groups.get(&key).cloned().and_then(|group| {
                let mut state = group.state.lock();
                if state.phase != Phase::Open || state.contains(id) {
                    return None;
                }
                let token = state.admit(operation.clone(), subscriber.clone());
                let full = self
                    .config
                    .max_batch_size
                    .is_some_and(|max| state.members.len() >= max);
                drop(state);
                Some((group, token, full))
            });
            match joined {
                Some((group, token, full)) => {
                    if full {
                        unregister(&mut groups, &group);
                    }
                    (group, token, false)
                }
                None => {
                    // 没有开放组，或组内已有相同 id：旧组被新组顶替（它仍会按期 flush）。
                    let group = Arc::new(BatchGroup::new(key.clone()));
                    let token = group.state.lock().admit(operation, subscriber);
                    if self.config.max_batch_size == Some(1) {
                        groups.remove(&key);
                    } else {
                        groups.insert(key, Arc::clone(&group));
                    }
                    (group, token, true)
                }
            }
        };

        tracing::debug!(
            target: "spark_link::batch",
            id,
            url = %group.key.url,
            opened,
            "operation registered in batch group"
        );
        if opened {
            let ctx = Arc::clone(self);
            let pending = Arc::clone(&group);
            self.runtime.defer(Box::new(move || ctx.flush(&pending)));
        }

        let ctx = Arc::clone(self);
        Teardown::new(move || ctx.withdraw(&group, token))
    }

    fn flush(self: &Arc<Self>, group: &Arc<BatchGroup>) {
        unregister(&mut self.registry.groups.lock(), group);
        let operations: Vec<Operation> = {
            let mut state = group.state.lock();
            if state.phase != Phase::Open {
                return;
            }
            if state.members.is_empty() {
                state.phase = Phase::Cancelled;
                return;
            }
            state.phase = Phase::Dispatched;
            state
                .members
                .iter()
                .map(|member| member.operation.clone())
                .collect()
        };

        // 变换器由外部注入；此处已进入 Dispatched，panic 必须转为整组失败。
        let encoded = catch_unwind(AssertUnwindSafe(|| {
            encode_batch(&operations, self.transformer.as_ref())
        }))
        .unwrap_or_else(|payload| Err(LinkError::from_panic(payload)));
        let body = match encoded {
            Ok(body) => body,
            Err(error) => {
                self.settle(group, Err(error));
                return;
            }
        };
        tracing::debug!(
            target: "spark_link::batch",
            url = %group.key.url,
            size = operations.len(),
            "flushing batch group"
        );
        let request = WireRequest {
            url: group.key.url.clone(),
            method: group.key.method,
            batch: true,
            body,
        };
        let ctx = Arc::clone(self);
        let settling = Arc::clone(group);
        let in_flight = dispatch(
            self.runtime.as_ref(),
            self.transport.as_ref(),
            request,
            move |outcome| ctx.settle(&settling, outcome),
        );

        let mut state = group.state.lock();
        match state.phase {
            Phase::Dispatched if state.members.iter().any(|member| member.active) => {
                state.in_flight = Some(in_flight);
            }
            Phase::Dispatched => {
                state.phase = Phase::Cancelled;
                drop(state);
                in_flight.abort();
            }
            _ => {}
        }
    }

    fn withdraw(&self, group: &Arc<BatchGroup>, token: u64) {
        let mut groups = self.registry.groups.lock();
        let mut state = group.state.lock();
        match state.phase {
            Phase::Open => {
                let Some(position) = state.members.iter().position(|m| m.token == token) else {
                    return;
                };
                let removed = state.members.remove(position);
                let emptied = state.members.is_empty();
                if emptied {
                    state.phase = Phase::Cancelled;
                }
                drop(state);
                if emptied {
                    unregister(&mut groups, group);
                }
                drop(groups);
                if emptied {
                    tracing::debug!(
                        target: "spark_link::batch",
                        url = %group.key.url,
                        "last member left before flush, batch group cancelled"
                    );
                }
                drop(removed);
            }
            Phase::Dispatched => {
                drop(groups);
                if let Some(member) = state.members.iter_mut().find(|m| m.token == token) {
                    member.active = false;
                }
                if state.members.iter().any(|member| member.active) {
                    return;
                }
                state.phase = Phase::Cancelled;
                let in_flight = state.in_flight.take();
                let members = std::mem::take(&mut state.members);
                drop(state);
                if let Some(in_flight) = in_flight {
                    in_flight.abort();
                }
                tracing::debug!(
                    target: "spark_link::batch",
                    url = %group.key.url,
                    "every member cancelled, aborting batch call"
                );
                drop(members);
            }
            Phase::Settled | Phase::Cancelled => {}
        }
    }

    fn settle(&self, group: &BatchGroup, outcome: Result<WireResponse>) {
        let members = {
            let mut state = group.state.lock();
            if state.phase != Phase::Dispatched {
                return;
            }
            state.phase = Phase::Settled;
            state.in_flight = None;
            std::mem::take(&mut state.members)
        };

        match outcome.and_then(|response| decode_batch(&response)) {
            Ok(items) if items.len() == members.len() => {
                tracing::debug!(
                    target: "spark_link::batch",
                    url = %group.key.url,
                    size = members.len(),
                    "batch settled"
                );
                for (member, item) in members.into_iter().zip(items) {
                    if !member.active {
                        continue;
                    }
                    let resolved = catch_unwind(AssertUnwindSafe(|| {
                        resolve_item(item, member.operation.id(), self.transformer.as_ref())
                    }))
                    .unwrap_or_else(|payload| Err(LinkError::from_panic(payload)));
                    deliver(&member, resolved);
                }
            }
            Ok(items) => {
                tracing::warn!(
                    target: "spark_link::batch",
                    url = %group.key.url,
                    expected = members.len(),
                    actual = items.len(),
                    "batched response length does not match request"
                );
                let error = LinkError::malformed(format!(
                    "expected {} results, received {}",
                    members.len(),
                    items.len()
                ));
                fan_out(members, &error);
            }
            Err(error) => {
                tracing::debug!(
                    target: "spark_link::batch",
                    url = %group.key.url,
                    code = error.code(),
                    "batch call failed, failing every member"
                );
                fan_out(members, &error);
            }
        }
    }
}

fn fan_out(members: Vec<Member>, error: &LinkError) {
    for member in members.iter().filter(|member| member.active) {
        deliver(member, Err(error.clone()));
    }
}

/// 把结果交给单个成员；成员观察者的 panic 只影响它自己，组内其余成员照常结算。
fn deliver(member: &Member, outcome: Result<ResultEnvelope>) {
    let delivered = catch_unwind(AssertUnwindSafe(|| match outcome {
        Ok(envelope) => {
            member.subscriber.next(envelope);
            member.subscriber.complete();
        }
        Err(error) => member.subscriber.error(error),
    }));
    if let Err(payload) = delivered {
        let error = LinkError::from_panic(payload);
        tracing::warn!(
            target: "spark_link::batch",
            id = member.operation.id(),
            %error,
            "observer panicked while receiving its batch result"
        );
    }
}
