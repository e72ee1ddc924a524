//! 链路测试桩：脚本化的传输层与记录型观察者。
//!
//! # 设计定位（Why）
//! - 链路的每个行为都需要“可控的下游”与“可断言的上游”，过去在各测试文件内重复手写闭包，
//!   接口调整时容易漏改；
//! - 统一出口后，单元测试、集成测试与基准测试共用同一套桩对象。
//!
//! # 使用方式（How）
//! - [`transport::ScriptedTransport`]：按顺序回放预置响应、记录每一次请求与取消令牌，
//!   也可以返回永不结算的调用或由测试手动放行的 [`transport::ResponseGate`]；
//! - [`observer::recording`]：返回一对“观察者 + 记录视图”，记录所有通知。
//!
//! # 风险与权衡（Trade-offs）
//! - 模块随 crate 公开，仅用于测试与示例；生产代码不应依赖。

pub mod observer;
pub mod transport;
