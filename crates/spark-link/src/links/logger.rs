//! 日志 Link：旁路记录上行的操作与下行的结果，不改变、不延迟、不吞掉任何通知。

use std::{
    fmt::Write as _,
    panic::{AssertUnwindSafe, catch_unwind},
    sync::Arc,
    time::Instant,
};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::{
    chain::{Link, LinkDescriptor, Next, OperationStream},
    error::LinkError,
    observable::{Observable, Observer, Subscriber, Teardown},
    operation::{Operation, OperationId, OperationMeta, OperationType, ResultEnvelope},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// 操作向下游发出。
    Up,
    /// 结果自下游返回。
    Down,
}

/// 一条结构化日志记录。
#[derive(Clone, Debug)]
pub struct LogEntry {
    pub direction: Direction,
    pub id: OperationId,
    pub kind: OperationType,
    pub path: String,
    pub input: Value,
    pub meta: OperationMeta,
    /// 仅 `Down` 记录携带：自订阅起经过的毫秒数。
    pub elapsed_ms: Option<f64>,
    /// 仅 `Down` 记录携带；流不发值直接完成时为 `None`。
    pub result: Option<Result<Value, LinkError>>,
}

impl LogEntry {
    fn up(operation: &Operation) -> Self {
        Self {
            direction: Direction::Up,
            id: operation.id(),
            kind: operation.kind(),
            path: operation.path().to_owned(),
            input: operation.input().clone(),
            meta: operation.meta().clone(),
            elapsed_ms: None,
            result: None,
        }
    }

    fn down(
        operation: &Operation,
        started: Instant,
        result: Option<Result<Value, LinkError>>,
    ) -> Self {
        Self {
            direction: Direction::Down,
            elapsed_ms: Some(started.elapsed().as_secs_f64() * 1000.0),
            result,
            ..Self::up(operation)
        }
    }

    pub fn is_error(&self) -> bool {
        matches!(self.result, Some(Err(_)))
    }
}

/// 类控制台输出目标。
pub trait Console: Send + Sync + 'static {
    fn log(&self, line: &str);
    fn error(&self, line: &str);
}

/// 把日志行转发到 `tracing`，目标为 `spark_link::logger`。
#[derive(Clone, Copy, Debug, Default)]
pub struct TracingConsole;

impl Console for TracingConsole {
    fn log(&self, line: &str) {
        tracing::info!(target: "spark_link::logger", "{line}");
    }

    fn error(&self, line: &str) {
        tracing::error!(target: "spark_link::logger", "{line}");
    }
}

/// 直接写入标准输出与标准错误。
#[derive(Clone, Copy, Debug, Default)]
pub struct StdConsole;

impl Console for StdConsole {
    fn log(&self, line: &str) {
        println!("{line}");
    }

    fn error(&self, line: &str) {
        eprintln!("{line}");
    }
}

/// 日志目标，同一时刻只有一种生效。
#[derive(Clone)]
pub enum LogTarget {
    /// 生成可读的着色文本，失败记录走 `error` 通道。
    Console(Arc<dyn Console>),
    /// 直接接收结构化记录。
    Callback(Arc<dyn Fn(&LogEntry) + Send + Sync>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ColorMode {
    #[default]
    Ansi,
    None,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggerLinkConfig {
    pub color: ColorMode,
    /// 文本行是否附带操作输入；结构化记录始终携带。
    pub log_input: bool,
}

impl Default for LoggerLinkConfig {
    fn default() -> Self {
        Self {
            color: ColorMode::Ansi,
            log_input: true,
        }
    }
}

type EnabledFn = dyn Fn(&LogEntry) -> bool + Send + Sync;

#[derive(Clone)]
struct LoggerShared {
    config: LoggerLinkConfig,
    target: LogTarget,
    enabled: Option<Arc<EnabledFn>>,
}

/// 观察型 Link。
///
/// # 契约说明（What）
/// - 订阅时记录一条 `Up`；每个值、错误，以及“未发值即完成”各记录一条 `Down`；
/// - 错误记录在控制台目标下走 `error` 通道；
/// - 记录过程中的 panic 被吞掉，绝不影响链路。
pub struct LoggerLink {
    shared: Arc<LoggerShared>,
}

impl LoggerLink {
    /// 使用 [`TracingConsole`] 作为输出目标。
    pub fn new(config: LoggerLinkConfig) -> Self {
        Self::with_console(config, Arc::new(TracingConsole))
    }

    pub fn with_console(config: LoggerLinkConfig, console: Arc<dyn Console>) -> Self {
        Self::with_target(config, LogTarget::Console(console))
    }

    pub fn with_callback(callback: impl Fn(&LogEntry) + Send + Sync + 'static) -> Self {
        Self::with_target(
            LoggerLinkConfig::default(),
            LogTarget::Callback(Arc::new(callback)),
        )
    }

    pub fn with_target(config: LoggerLinkConfig, target: LogTarget) -> Self {
        Self {
            shared: Arc::new(LoggerShared {
                config,
                target,
                enabled: None,
            }),
        }
    }

    /// 只记录满足谓词的条目。
    pub fn enabled(
        mut self,
        predicate: impl Fn(&LogEntry) -> bool + Send + Sync + 'static,
    ) -> Self {
        Arc::make_mut(&mut self.shared).enabled = Some(Arc::new(predicate));
        self
    }
}

impl Link for LoggerLink {
    fn descriptor(&self) -> LinkDescriptor {
        LinkDescriptor::new(
            "logger",
            "observability",
            "records operations and their results",
        )
    }

    fn call(&self, operation: Operation, next: Next) -> OperationStream {
        let shared = Arc::clone(&self.shared);
        Observable::new(move |subscriber| {
            let started = Instant::now();
            shared.emit(LogEntry::up(&operation));
            let observer = LoggingObserver {
                shared: Arc::clone(&shared),
                operation: operation.clone(),
                started,
                seen_value: false,
                downstream: subscriber,
            };
            Teardown::from(next.run(operation.clone()).subscribe(observer))
        })
    }
}

impl LoggerShared {
    fn emit(&self, entry: LogEntry) {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            if let Some(enabled) = &self.enabled
                && !enabled(&entry)
            {
                return;
            }
            match &self.target {
                LogTarget::Callback(callback) => callback(&entry),
                LogTarget::Console(console) => {
                    let line = render(&entry, &self.config);
                    if entry.is_error() {
                        console.error(&line);
                    } else {
                        console.log(&line);
                    }
                }
            }
        }));
        if outcome.is_err() {
            tracing::warn!(target: "spark_link::logger", "log target panicked, entry dropped");
        }
    }
}

struct LoggingObserver {
    shared: Arc<LoggerShared>,
    operation: Operation,
    started: Instant,
    seen_value: bool,
    downstream: Subscriber<ResultEnvelope, LinkError>,
}

impl Observer<ResultEnvelope, LinkError> for LoggingObserver {
    fn on_next(&mut self, value: ResultEnvelope) {
        self.seen_value = true;
        self.shared.emit(LogEntry::down(
            &self.operation,
            self.started,
            Some(Ok(value.data.clone())),
        ));
        self.downstream.next(value);
    }

    fn on_error(&mut self, error: LinkError) {
        self.shared.emit(LogEntry::down(
            &self.operation,
            self.started,
            Some(Err(error.clone())),
        ));
        self.downstream.error(error);
    }

    fn on_complete(&mut self) {
        if !self.seen_value {
            self.shared
                .emit(LogEntry::down(&self.operation, self.started, None));
        }
        self.downstream.complete();
    }
}

fn palette(kind: OperationType) -> &'static str {
    match kind {
        OperationType::Query => "1;94",
        OperationType::Mutation => "1;95",
        OperationType::Subscription => "1;96",
    }
}

/// 渲染一行可读文本：`>> query #1 user.byId input=…` 或 `<< query #1 user.byId 3.2ms result=…`。
fn render(entry: &LogEntry, config: &LoggerLinkConfig) -> String {
    let arrow = match entry.direction {
        Direction::Up => ">>",
        Direction::Down => "<<",
    };
    let head = format!("{arrow} {} #{} {}", entry.kind, entry.id, entry.path);
    let mut line = match config.color {
        ColorMode::None => head,
        ColorMode::Ansi => {
            let code = if entry.is_error() {
                "1;31"
            } else {
                palette(entry.kind)
            };
            format!("\x1b[{code}m{head}\x1b[0m")
        }
    };
    if let Some(elapsed) = entry.elapsed_ms {
        let _ = write!(line, " {elapsed:.1}ms");
    }
    match &entry.result {
        Some(Ok(data)) => {
            let _ = write!(line, " result={data}");
        }
        Some(Err(error)) => {
            let _ = write!(line, " error=[{}] {error}", error.code());
        }
        None if entry.direction == Direction::Up && config.log_input => {
            let _ = write!(line, " input={}", entry.input);
        }
        None => {}
    }
    if !entry.meta.is_empty() && entry.direction == Direction::Up {
        let _ = write!(line, " meta={}", Value::Object(entry.meta.clone()));
    }
    line
}
