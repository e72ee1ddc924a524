use std::{collections::VecDeque, sync::Arc};

use parking_lot::Mutex;

use super::{Observer, Teardown};

/// 待投递的通知。
enum Notification<T, E> {
    Next(T),
    Error(E),
    Complete,
}

impl<T, E> Notification<T, E> {
    fn is_terminal(&self) -> bool {
        !matches!(self, Notification::Next(_))
    }
}

/// 单次订阅的共享状态。
///
/// - `stopped`：已接受终止通知或已退订，此后的通知一律丢弃；
/// - `released`：拆除回调已被取走（终止投递或退订），迟到的拆除回调需立即执行；
/// - `delivering`：某个调用栈正在排空队列，重入的通知只入队不投递。
struct State<T, E> {
    observer: Option<Box<dyn Observer<T, E>>>,
    queue: VecDeque<Notification<T, E>>,
    teardown: Option<Teardown>,
    stopped: bool,
    released: bool,
    unsubscribed: bool,
    delivering: bool,
}

pub(crate) struct Shared<T, E> {
    state: Mutex<State<T, E>>,
}

impl<T, E> Shared<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn new(observer: Box<dyn Observer<T, E>>) -> Self {
        Self {
            state: Mutex::new(State {
                observer: Some(observer),
                queue: VecDeque::new(),
                teardown: None,
                stopped: false,
                released: false,
                unsubscribed: false,
                delivering: false,
            }),
        }
    }

    /// 挂接生产者返回的拆除回调。
    ///
    /// 若生产者在 `subscribe` 返回前已同步终止，或订阅已被退订，拆除回调立即执行，
    /// 保证“恰好一次”。
    pub(crate) fn attach_teardown(&self, teardown: Teardown) {
        let mut state = self.state.lock();
        if !state.released {
            state.teardown = Some(teardown);
            return;
        }
        drop(state);
        teardown.run();
    }

    pub(crate) fn unsubscribe(&self) {
        let (observer, teardown) = {
            let mut state = self.state.lock();
            if state.unsubscribed {
                return;
            }
            state.unsubscribed = true;
            state.stopped = true;
            state.released = true;
            state.queue.clear();
            (state.observer.take(), state.teardown.take())
        };
        drop(observer);
        if let Some(teardown) = teardown {
            teardown.run();
        }
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.state.lock().stopped
    }

    fn push(&self, notification: Notification<T, E>) {
        let mut state = self.state.lock();
        if state.stopped {
            return;
        }
        if notification.is_terminal() {
            state.stopped = true;
        }
        state.queue.push_back(notification);
        if state.delivering {
            return;
        }
        state.delivering = true;

        loop {
            let Some(notification) = state.queue.pop_front() else {
                state.delivering = false;
                return;
            };
            let Some(mut observer) = state.observer.take() else {
                state.queue.clear();
                state.delivering = false;
                return;
            };
            let terminal = notification.is_terminal();
            // 进入终止态时先拆除，再通知观察者。
            let teardown = if terminal {
                state.released = true;
                state.teardown.take()
            } else {
                None
            };
            drop(state);

            if let Some(teardown) = teardown {
                teardown.run();
            }
            match notification {
                Notification::Next(value) => observer.on_next(value),
                Notification::Error(error) => observer.on_error(error),
                Notification::Complete => observer.on_complete(),
            }

            state = self.state.lock();
            if terminal || state.unsubscribed {
                state.queue.clear();
                state.delivering = false;
                drop(state);
                drop(observer);
                return;
            }
            state.observer = Some(observer);
        }
    }
}

/// 生产者侧句柄：推送流的配方通过它向观察者发出通知。
///
/// # 教案式说明
/// - **意图（Why）**：把“是否已终止”“是否已退订”的判定集中在一处，生产者只管发通知；
/// - **结构（How）**：克隆共享同一订阅状态；通知先入队，再由第一个到达的调用栈顺序排空，
///   重入的通知因此保持先后顺序；
/// - **契约（What）**：
///   - 终止通知（`error`/`complete`）之后的一切通知被静默丢弃；
///   - 进入终止态时，拆除回调先于观察者的终止回调执行；
///   - 退订后所有方法均为空操作。
pub struct Subscriber<T, E> {
    shared: Arc<Shared<T, E>>,
}

impl<T, E> Clone for Subscriber<T, E> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T, E> Subscriber<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    pub(crate) fn from_shared(shared: Arc<Shared<T, E>>) -> Self {
        Self { shared }
    }

    pub fn next(&self, value: T) {
        self.shared.push(Notification::Next(value));
    }

    pub fn error(&self, error: E) {
        self.shared.push(Notification::Error(error));
    }

    pub fn complete(&self) {
        self.shared.push(Notification::Complete);
    }

    /// 是否已进入终止态或被退订；生产者可据此跳过无意义的工作。
    pub fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }
}

impl<T, E> Observer<T, E> for Subscriber<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    fn on_next(&mut self, value: T) {
        self.next(value);
    }

    fn on_error(&mut self, error: E) {
        self.error(error);
    }

    fn on_complete(&mut self) {
        self.complete();
    }
}
