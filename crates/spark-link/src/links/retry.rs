use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::{
    chain::{Link, LinkDescriptor, Next, OperationStream},
    config::ConfigError,
    error::LinkError,
    observable::{Observable, Observer, Subscriber, Subscription, Teardown},
    operation::{Operation, ResultEnvelope},
};

/// 重试预算。`attempts` 计入首次尝试，必须至少为 1。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    pub attempts: u32,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { attempts: 3 }
    }
}

impl RetryConfig {
    pub fn new(attempts: u32) -> Self {
        Self { attempts }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.attempts == 0 {
            return Err(ConfigError::InvalidAttempts {
                attempts: self.attempts,
            });
        }
        Ok(())
    }
}

/// 在可重试失败时重新调用下游的 Link。
///
/// # 教案式说明
/// - **意图（Why）**：传输抖动与服务端瞬时故障可以通过重放消化，而调用方只应看到最终结果；
/// - **结构（How）**：每次订阅创建一个 `RetrySession`，顺序驱动若干次“调用 `next` 并订阅”；
///   同步失败通过循环而非递归重试，避免预算较大时栈深失控；
/// - **契约（What）**：
///   - 只重试 [`ErrorCategory::Retryable`](crate::ErrorCategory::Retryable) 的失败，且尚未向上游发出过值；
///   - 下一次尝试开始前，上一次尝试的订阅已经拆除，尝试之间从不重叠；
///   - 预算耗尽时原样上抛最后一次失败；
///   - 上游退订后不再安排新的尝试，并拆除在途尝试。
pub struct RetryLink {
    config: RetryConfig,
}

impl RetryLink {
    pub fn new(config: RetryConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn attempts(&self) -> u32 {
        self.config.attempts
    }
}

impl Link for RetryLink {
    fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor::new(
            "retry",
            "resilience",
            format!(
                "retries retryable failures, up to {} attempts",
                self.config.attempts
            ),
        )
    }

    fn call(&self, operation: Operation, next: Next) -> OperationStream {
        let max_attempts = self.config.attempts;
        Observable::new(move |subscriber| {
            let session = Arc::new(RetrySession {
                operation: operation.clone(),
                next: next.clone(),
                max_attempts,
                downstream: subscriber,
                state: Mutex::new(SessionState::default()),
            });
            session.start();
            let session = Arc::downgrade(&session);
            Teardown::new(move || {
                if let Some(session) = session.upgrade() {
                    session.cancel();
                }
            })
        })
    }
}

#[derive(Default)]
struct SessionState {
    attempts: u32,
    current: Option<Subscription>,
    /// 正在 `subscribe` 调用栈内；同步失败只登记 `retry_pending`，由外层循环重试。
    subscribing: bool,
    retry_pending: bool,
    delivered: bool,
    stopped: bool,
}

struct RetrySession {
    operation: Operation,
    next: Next,
    max_attempts: u32,
    downstream: Subscriber<ResultEnvelope, LinkError>,
    state: Mutex<SessionState>,
}

impl RetrySession {
    fn start(self: &Arc<Self>) {
        loop {
            let attempt = {
                let mut state = self.state.lock();
                if state.stopped {
                    return;
                }
                state.attempts += 1;
                state.subscribing = true;
                state.retry_pending = false;
                state.attempts
            };
            tracing::debug!(
                target: "spark_link::retry",
                id = self.operation.id(),
                path = self.operation.path(),
                attempt,
                max_attempts = self.max_attempts,
                "starting attempt"
            );

            let subscription = self
                .next
                .run(self.operation.clone())
                .subscribe(AttemptObserver {
                    session: Arc::clone(self),
                });

            let mut state = self.state.lock();
            state.subscribing = false;
            if state.stopped {
                drop(state);
                subscription.unsubscribe();
                return;
            }
            if state.retry_pending {
                continue;
            }
            state.current = Some(subscription);
            return;
        }
    }

    fn cancel(&self) {
        let current = {
            let mut state = self.state.lock();
            state.stopped = true;
            state.current.take()
        };
        if let Some(current) = current {
            current.unsubscribe();
        }
    }

    fn on_value(&self, envelope: ResultEnvelope) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.delivered = true;
        }
        self.downstream.next(envelope);
    }

    fn on_complete(&self) {
        {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.stopped = true;
            state.current = None;
        }
        self.downstream.complete();
    }

    fn on_failure(self: &Arc<Self>, error: LinkError) {
        let decision = {
            let mut state = self.state.lock();
            if state.stopped {
                return;
            }
            state.current = None;
            let retryable =
                error.is_retryable() && !state.delivered && state.attempts < self.max_attempts;
            if !retryable {
                state.stopped = true;
                Decision::Propagate
            } else if state.subscribing {
                state.retry_pending = true;
                Decision::Deferred
            } else {
                Decision::RetryNow
            }
        };
        match decision {
            Decision::RetryNow => self.start(),
            Decision::Deferred => {}
            Decision::Propagate => {
                tracing::debug!(
                    target: "spark_link::retry",
                    id = self.operation.id(),
                    code = error.code(),
                    "giving up, propagating failure"
                );
                self.downstream.error(error);
            }
        }
    }
}

enum Decision {
    RetryNow,
    /// 失败发生在 `subscribe` 调用栈内，交给 `start` 的循环处理。
    Deferred,
    Propagate,
}

struct AttemptObserver {
    session: Arc<RetrySession>,
}

impl Observer<ResultEnvelope, LinkError> for AttemptObserver {
    fn on_next(&mut self, value: ResultEnvelope) {
        self.session.on_value(value);
    }

    fn on_error(&mut self, error: LinkError) {
        self.session.on_failure(error);
    }

    fn on_complete(&mut self) {
        self.session.on_complete();
    }
}
