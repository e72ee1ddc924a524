use std::{
    collections::VecDeque,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
    task::{Context, Poll},
};

use futures_util::task::{ArcWake, waker_ref};
use parking_lot::Mutex;

use super::{BoxFuture, DeferredTask, LinkRuntime};

/// 手动驱动的协作式调度器。
///
/// # 设计背景（Why）
/// - 没有事件循环的宿主（以及需要确定性时序的测试）需要一个“显式 flush 触发器”：
///   调用方自行决定回合何时结束；
///
/// # 逻辑解析（How）
/// - `defer` 只入队，`spawn` 只登记；两者都不会内联执行；
/// - [`run_until_idle`](Self::run_until_idle) 先排空回合末任务，再轮询所有被唤醒的 Future，
///   循环直到某一轮既没有任务运行也没有 Future 被唤醒；
/// - 每个托管 Future 配一个 `woken` 标志位，唤醒器只负责置位，真正的轮询留给下一轮。
///
/// # 契约说明（What）
/// - 克隆共享同一任务队列；
/// - 任务或 Future 中的 panic 被就地吞下并记录，该任务视为结束，与 Tokio 隔离任务 panic 的行为一致；
/// - 永远 `Pending` 且不再唤醒的 Future 会保留在队列中，可通过
///   [`pending_tasks`](Self::pending_tasks) 观察到。
#[derive(Clone, Default)]
pub struct ManualRuntime {
    inner: Arc<Queues>,
}

#[derive(Default)]
struct Queues {
    deferred: Mutex<VecDeque<DeferredTask>>,
    spawned: Mutex<Vec<Arc<SpawnedTask>>>,
}

struct SpawnedTask {
    future: Mutex<Option<BoxFuture<'static, ()>>>,
    woken: AtomicBool,
}

impl ArcWake for SpawnedTask {
    fn wake_by_ref(arc_self: &Arc<Self>) {
        arc_self.woken.store(true, Ordering::Release);
    }
}

impl ManualRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// 结束当前回合并驱动一切可推进的工作，返回本次执行的任务与轮询次数之和。
    pub fn run_until_idle(&self) -> usize {
        let mut steps = 0;
        loop {
            let mut progressed = false;

            loop {
                let next = self.inner.deferred.lock().pop_front();
                let Some(task) = next else {
                    break;
                };
                if catch_unwind(AssertUnwindSafe(task)).is_err() {
                    tracing::warn!(target: "spark_link::runtime", "deferred task panicked");
                }
                steps += 1;
                progressed = true;
            }

            let ready: Vec<Arc<SpawnedTask>> = self
                .inner
                .spawned
                .lock()
                .iter()
                .filter(|task| task.woken.swap(false, Ordering::AcqRel))
                .cloned()
                .collect();
            for task in ready {
                let waker = waker_ref(&task);
                let mut cx = Context::from_waker(&waker);
                let mut slot = task.future.lock();
                if let Some(future) = slot.as_mut() {
                    steps += 1;
                    progressed = true;
                    match catch_unwind(AssertUnwindSafe(|| future.as_mut().poll(&mut cx))) {
                        Ok(Poll::Pending) => {}
                        Ok(Poll::Ready(())) => *slot = None,
                        Err(_) => {
                            tracing::warn!(
                                target: "spark_link::runtime",
                                "spawned future panicked"
                            );
                            *slot = None;
                        }
                    }
                }
            }
            self.inner
                .spawned
                .lock()
                .retain(|task| task.future.lock().is_some());

            if !progressed {
                return steps;
            }
        }
    }

    /// 尚未执行的回合末任务与尚未完成的托管 Future 数量。
    pub fn pending_tasks(&self) -> usize {
        self.inner.deferred.lock().len() + self.inner.spawned.lock().len()
    }
}

impl LinkRuntime for ManualRuntime {
    fn defer(&self, task: DeferredTask) {
        self.inner.deferred.lock().push_back(task);
    }

    fn spawn(&self, future: BoxFuture<'static, ()>) {
        self.inner.spawned.lock().push(Arc::new(SpawnedTask {
            future: Mutex::new(Some(future)),
            woken: AtomicBool::new(true),
        }));
    }
}
