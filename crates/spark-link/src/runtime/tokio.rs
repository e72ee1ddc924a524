use tokio::runtime::Handle;

use super::{BoxFuture, DeferredTask, LinkRuntime};

/// 基于 Tokio 的调度适配。
///
/// # 逻辑解析（How）
/// - `defer` 与 `spawn` 都映射为 [`Handle::spawn`]：新任务只会在当前任务让出之后运行，
///   这正是“零延迟任务排入事件循环”的语义；
/// - `JoinHandle` 直接丢弃，任务以分离模式运行。
///
/// # 风险提示（Trade-offs）
/// - 多线程运行时下，回合末任务可能被其他工作线程提前拾取，批处理窗口随之变窄；
///   批处理组自身的锁保证正确性，只是合并率可能下降。需要严格窗口时使用 `current_thread` 运行时。
#[derive(Clone, Debug)]
pub struct TokioRuntime {
    handle: Handle,
}

impl TokioRuntime {
    /// 绑定当前线程所在的 Tokio 运行时；不在运行时上下文中时返回 `None`。
    pub fn try_current() -> Option<Self> {
        Handle::try_current().ok().map(Self::with_handle)
    }

    pub fn with_handle(handle: Handle) -> Self {
        Self { handle }
    }
}

impl LinkRuntime for TokioRuntime {
    fn defer(&self, task: DeferredTask) {
        self.handle.spawn(async move { task() });
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.handle.spawn(future);
    }
}
