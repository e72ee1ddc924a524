//! 内置 Link。
//!
//! - [`RetryLink`]：可重试失败的有界重放；
//! - [`LoggerLink`]：旁路日志；
//! - [`SplitLink`]：按谓词分流到两条子链；
//! - [`HttpLink`]：单操作终端；
//! - [`BatchLink`]：同回合合并的终端。

mod batch;
mod http;
mod logger;
mod retry;
mod split;

pub use batch::{BatchLink, BatchLinkConfig, BatchRegistry};
pub use http::{HttpLink, HttpLinkConfig};
pub use logger::{
    ColorMode, Console, Direction, LogEntry, LogTarget, LoggerLink, LoggerLinkConfig, StdConsole,
    TracingConsole,
};
pub use retry::{RetryConfig, RetryLink};
pub use split::SplitLink;
