//! 推送流（Push Stream）：链路中所有 Link 共享的并发底座。
//!
//! # 教案式概览
//! - **意图（Why）**：一次远程调用的结果以“值 / 错误 / 完成”三种通知自下而上推送，取消则自上而下
//!   同步传播；推送流把这套生命周期收敛成 `subscribe` / `unsubscribe` 两个动作；
//! - **结构（How）**：[`Observable`] 只是一份“配方”，每次 [`Observable::subscribe`] 都重新执行配方；
//!   配方经 [`Subscriber`] 发出通知，并返回 [`Teardown`]；调用方持有 [`Subscription`]；
//! - **契约（What）**：
//!   - 状态机 `Created → Subscribed → {Emitting → Completed} | Errored | Cancelled`，
//!     三种终止态互斥，拆除回调在首次进入终止态时恰好执行一次；
//!   - 配方可以在 `subscribe` 返回前同步发出通知；此时拆除回调在配方返回后立即执行；
//!   - `unsubscribe` 幂等、从不报错，且之后观察者不会再收到任何回调。
//! - **风险提示（Trade-offs）**：活跃订阅与其拆除回调之间可能存在引用环，环在进入终止态或退订时断开；
//!   永不终止且从未退订的流会一直存活。

mod operators;
mod subscriber;

use std::sync::Arc;

pub use operators::{CompletedWithoutValue, FirstValue, TapEvent};
use subscriber::Shared;
pub use subscriber::Subscriber;

/// 观察者契约：接收推送流的三类通知。
pub trait Observer<T, E>: Send + 'static {
    fn on_next(&mut self, value: T);
    fn on_error(&mut self, error: E);
    fn on_complete(&mut self);
}

/// 以闭包组装的观察者，三个回调均可省略。
pub struct Callbacks<T, E> {
    next: Option<Box<dyn FnMut(T) + Send>>,
    error: Option<Box<dyn FnMut(E) + Send>>,
    complete: Option<Box<dyn FnMut() + Send>>,
}

/// 创建一个空的 [`Callbacks`] 观察者。
pub fn callbacks<T, E>() -> Callbacks<T, E> {
    Callbacks {
        next: None,
        error: None,
        complete: None,
    }
}

impl<T, E> Callbacks<T, E> {
    pub fn next(mut self, f: impl FnMut(T) + Send + 'static) -> Self {
        self.next = Some(Box::new(f));
        self
    }

    pub fn error(mut self, f: impl FnMut(E) + Send + 'static) -> Self {
        self.error = Some(Box::new(f));
        self
    }

    pub fn complete(mut self, f: impl FnMut() + Send + 'static) -> Self {
        self.complete = Some(Box::new(f));
        self
    }
}

impl<T, E> Observer<T, E> for Callbacks<T, E>
where
    T: 'static,
    E: 'static,
{
    fn on_next(&mut self, value: T) {
        if let Some(next) = self.next.as_mut() {
            next(value);
        }
    }

    fn on_error(&mut self, error: E) {
        if let Some(handler) = self.error.as_mut() {
            handler(error);
        }
    }

    fn on_complete(&mut self) {
        if let Some(complete) = self.complete.as_mut() {
            complete();
        }
    }
}

/// 订阅结束时执行的清理动作。
#[derive(Default)]
pub struct Teardown {
    action: Option<Box<dyn FnOnce() + Send>>,
}

impl Teardown {
    pub fn new(action: impl FnOnce() + Send + 'static) -> Self {
        Self {
            action: Some(Box::new(action)),
        }
    }

    /// 没有需要释放的资源。
    pub fn noop() -> Self {
        Self::default()
    }

    pub(crate) fn run(self) {
        if let Some(action) = self.action {
            action();
        }
    }
}

/// 向下游订阅后，把下游的退订作为本层的拆除动作。
impl From<Subscription> for Teardown {
    fn from(subscription: Subscription) -> Self {
        Teardown::new(move || subscription.unsubscribe())
    }
}

trait SubscriptionControl: Send + Sync {
    fn unsubscribe(&self);
    fn is_closed(&self) -> bool;
}

impl<T, E> SubscriptionControl for Shared<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn unsubscribe(&self) {
        Shared::unsubscribe(self);
    }

    fn is_closed(&self) -> bool {
        Shared::is_closed(self)
    }
}

/// 订阅句柄，暴露唯一且幂等的 `unsubscribe`。
///
/// 丢弃句柄不会退订：结果仍会推送给观察者，直到流自然终止。
#[derive(Clone)]
pub struct Subscription {
    control: Arc<dyn SubscriptionControl>,
}

impl Subscription {
    /// 退订并执行拆除回调；重复调用等价于一次调用。
    pub fn unsubscribe(&self) {
        self.control.unsubscribe();
    }

    /// 订阅是否已进入终止态（完成、出错或退订）。
    pub fn is_closed(&self) -> bool {
        self.control.is_closed()
    }
}

type Producer<T, E> = dyn Fn(Subscriber<T, E>) -> Teardown + Send + Sync;

/// 可取消的推送流配方。
///
/// # 教案式说明
/// - **意图（Why）**：Link 需要返回“尚未开始”的结果描述，由外层决定何时订阅、何时取消；
/// - **结构（How）**：内部持有 `Arc` 化的生产者闭包，克隆开销为一次引用计数；
/// - **契约（What）**：
///   - 每次 `subscribe` 独立执行生产者，不重放、不共享副作用；
///   - 生产者返回的 [`Teardown`] 在订阅进入任一终止态时恰好执行一次；
///   - 生产者可以同步发出通知，调用方可能在 `subscribe` 返回前就收到回调。
pub struct Observable<T, E> {
    producer: Arc<Producer<T, E>>,
}

impl<T, E> Clone for Observable<T, E> {
    fn clone(&self) -> Self {
        Self {
            producer: Arc::clone(&self.producer),
        }
    }
}

impl<T, E> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub fn new(producer: impl Fn(Subscriber<T, E>) -> Teardown + Send + Sync + 'static) -> Self {
        Self {
            producer: Arc::new(producer),
        }
    }

    /// 同步发出一个值并完成。
    pub fn of(value: T) -> Self
    where
        T: Clone + Sync,
    {
        Self::new(move |subscriber| {
            subscriber.next(value.clone());
            subscriber.complete();
            Teardown::noop()
        })
    }

    /// 同步发出一个错误。
    pub fn fail(error: E) -> Self
    where
        E: Clone + Sync,
    {
        Self::new(move |subscriber| {
            subscriber.error(error.clone());
            Teardown::noop()
        })
    }

    /// 不发值，直接完成。
    pub fn empty() -> Self {
        Self::new(|subscriber| {
            subscriber.complete();
            Teardown::noop()
        })
    }

    /// 永不发出任何通知。
    pub fn never() -> Self {
        Self::new(|_| Teardown::noop())
    }

    /// 执行配方并返回订阅句柄。
    pub fn subscribe(&self, observer: impl Observer<T, E>) -> Subscription {
        let shared = Arc::new(Shared::new(Box::new(observer)));
        let teardown = (self.producer)(Subscriber::from_shared(Arc::clone(&shared)));
        shared.attach_teardown(teardown);
        Subscription { control: shared }
    }
}
