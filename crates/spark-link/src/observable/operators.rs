use std::{
    future::Future,
    pin::Pin,
    sync::Arc,
    task::{Context, Poll, Waker},
};

use parking_lot::Mutex;

use super::{Observable, Observer, Subscriber, Subscription, Teardown};

/// [`Observable::tap`] 观察到的通知视图。
#[derive(Debug)]
pub enum TapEvent<'a, T, E> {
    Next(&'a T),
    Error(&'a E),
    Complete,
}

/// 流在发出任何值之前就完成了。
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CompletedWithoutValue;

impl<T, E> Observable<T, E>
where
    T: Send + 'static,
    E: Send + 'static,
{
    /// 逐值变换，错误与完成原样透传。
    pub fn map<U, F>(self, f: F) -> Observable<U, E>
    where
        U: Send + 'static,
        F: Fn(T) -> U + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Observable::new(move |downstream| {
            let observer = MapObserver {
                f: Arc::clone(&f),
                downstream,
            };
            Teardown::from(self.subscribe(observer))
        })
    }

    /// 旁路观察每一条通知，不改变、不延迟通知本身。
    pub fn tap<F>(self, f: F) -> Observable<T, E>
    where
        F: Fn(TapEvent<'_, T, E>) + Send + Sync + 'static,
    {
        let f = Arc::new(f);
        Observable::new(move |downstream| {
            let observer = TapObserver {
                f: Arc::clone(&f),
                downstream,
            };
            Teardown::from(self.subscribe(observer))
        })
    }

    /// 立即订阅，并把第一个值或错误转换为 Future。
    ///
    /// # 契约说明（What）
    /// - 收到第一个值后 Future 就绪，底层订阅随即退订；
    /// - 在发出任何值之前完成，以 [`CompletedWithoutValue`] 转换出的错误就绪；
    /// - 提前丢弃 Future 等价于退订。
    pub fn first_value(&self) -> FirstValue<T, E>
    where
        E: From<CompletedWithoutValue>,
    {
        let slot = Arc::new(Mutex::new(FirstSlot {
            outcome: None,
            settled: false,
            waker: None,
        }));
        let subscription = self.subscribe(FirstObserver {
            slot: Arc::clone(&slot),
        });
        FirstValue { slot, subscription }
    }
}

struct MapObserver<F, U, E> {
    f: Arc<F>,
    downstream: Subscriber<U, E>,
}

impl<T, U, E, F> Observer<T, E> for MapObserver<F, U, E>
where
    T: Send + 'static,
    U: Send + 'static,
    E: Send + 'static,
    F: Fn(T) -> U + Send + Sync + 'static,
{
    fn on_next(&mut self, value: T) {
        self.downstream.next((self.f)(value));
    }

    fn on_error(&mut self, error: E) {
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        self.downstream.complete();
    }
}

struct TapObserver<F, T, E> {
    f: Arc<F>,
    downstream: Subscriber<T, E>,
}

impl<T, E, F> Observer<T, E> for TapObserver<F, T, E>
where
    T: Send + 'static,
    E: Send + 'static,
    F: Fn(TapEvent<'_, T, E>) + Send + Sync + 'static,
{
    fn on_next(&mut self, value: T) {
        (self.f)(TapEvent::Next(&value));
        self.downstream.next(value);
    }

    fn on_error(&mut self, error: E) {
        (self.f)(TapEvent::Error(&error));
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        (self.f)(TapEvent::Complete);
        self.downstream.complete();
    }
}

struct FirstSlot<T, E> {
    outcome: Option<Result<T, E>>,
    settled: bool,
    waker: Option<Waker>,
}

struct FirstObserver<T, E> {
    slot: Arc<Mutex<FirstSlot<T, E>>>,
}

impl<T, E> FirstObserver<T, E> {
    fn settle(&self, outcome: Result<T, E>) {
        let waker = {
            let mut slot = self.slot.lock();
            if slot.settled {
                return;
            }
            slot.settled = true;
            slot.outcome = Some(outcome);
            slot.waker.take()
        };
        if let Some(waker) = waker {
            waker.wake();
        }
    }
}

impl<T, E> Observer<T, E> for FirstObserver<T, E>
where
    T: Send + 'static,
    E: Send + From<CompletedWithoutValue> + 'static,
{
    fn on_next(&mut self, value: T) {
        self.settle(Ok(value));
    }

    fn on_error(&mut self, error: E) {
        self.settle(Err(error));
    }

    fn on_complete(&mut self) {
        self.settle(Err(E::from(CompletedWithoutValue)));
    }
}

/// [`Observable::first_value`] 返回的 Future。
pub struct FirstValue<T, E> {
    slot: Arc<Mutex<FirstSlot<T, E>>>,
    subscription: Subscription,
}

impl<T, E> Future for FirstValue<T, E> {
    type Output = Result<T, E>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = {
            let mut slot = self.slot.lock();
            match slot.outcome.take() {
                Some(outcome) => outcome,
                None => {
                    slot.waker = Some(cx.waker().clone());
                    return Poll::Pending;
                }
            }
        };
        self.subscription.unsubscribe();
        Poll::Ready(outcome)
    }
}

impl<T, E> Drop for FirstValue<T, E> {
    fn drop(&mut self) {
        self.subscription.unsubscribe();
    }
}
