//! 调度原语：回合末延迟（defer）与线缆调用托管（spawn）。
//!
//! # 教案式概览
//! - **意图（Why）**：批处理窗口被定义为“控制权交还调度器之前登记的全部操作”，而不是固定时长；
//!   链路因此需要一个显式的“延迟到当前回合结束”原语，而不是依赖隐式的微任务队列；
//! - **结构（How）**：[`LinkRuntime`] 只暴露两个对象安全的方法，宿主可以把它映射到 Tokio、
//!   自研事件循环，或测试中手动驱动的 [`ManualRuntime`]；
//! - **契约（What）**：
//!   - `defer` 提交的任务必须在当前同步执行段结束之后才运行，绝不能在 `defer` 内联执行；
//!   - `spawn` 提交的 Future 必须被驱动到完成，除非它被中止；
//! - **风险提示（Trade-offs）**：运行时不提供取消句柄，在途调用的中止由
//!   [`Cancellation`](crate::Cancellation) 与 `Abortable` 负责。

mod manual;
#[cfg(feature = "runtime-tokio")]
mod tokio;

use std::{future::Future, pin::Pin, sync::Arc};

pub use manual::ManualRuntime;
#[cfg(feature = "runtime-tokio")]
pub use self::tokio::TokioRuntime;

/// 对象安全的 `Send` Future。
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// 回合末执行的一次性任务。
pub type DeferredTask = Box<dyn FnOnce() + Send + 'static>;

/// 链路所需的最小调度契约。
pub trait LinkRuntime: Send + Sync + 'static {
    /// 在当前同步执行段结束后运行 `task`。
    fn defer(&self, task: DeferredTask);

    /// 托管一个线缆调用 Future，直到其完成或被中止。
    fn spawn(&self, future: BoxFuture<'static, ()>);
}

impl<R> LinkRuntime for Arc<R>
where
    R: LinkRuntime + ?Sized,
{
    fn defer(&self, task: DeferredTask) {
        (**self).defer(task);
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        (**self).spawn(future);
    }
}
