use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

/// 取消原语，交给传输协作者用于中止在途请求。
///
/// # 设计背景（Why）
/// - 终端 Link 在上游退订时必须尽力中止在途线缆调用，但“如何中止”属于传输层的职责；
/// - 因此链路只负责翻转一个共享标志位，由传输实现自行轮询或挂接到底层 I/O 的中止机制。
///
/// # 逻辑解析（How）
/// - 内部使用 [`AtomicBool`] 表达取消状态，并通过 [`Arc`] 在链路与传输之间共享；
/// - `cancel` 在首次成功设置取消位时返回 `true`，后续重复调用返回 `false`。
///
/// # 契约说明（What）
/// - **前置条件**：默认处于“未取消”状态；
/// - **后置条件**：一旦取消成功，所有克隆都立即观察到 `is_cancelled() == true`。
///
/// # 设计取舍与风险（Trade-offs）
/// - 未提供回调注册接口；链路侧另以 `Abortable` 包裹线缆 Future，保证即便传输忽略取消位，
///   观察者也不会在退订后收到任何通知。
#[derive(Clone, Debug, Default)]
pub struct Cancellation {
    flag: Arc<AtomicBool>,
}

impl Cancellation {
    /// 创建处于“未取消”状态的令牌。
    pub fn new() -> Self {
        Self::default()
    }

    /// 查询当前是否已被标记取消。
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Acquire)
    }

    /// 标记取消，返回值表示本次调用是否为首次触发。
    pub fn cancel(&self) -> bool {
        self.flag
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }
}
