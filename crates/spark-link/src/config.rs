//! 声明式链路配置。
//!
//! # 教案式概览
//! - **意图（Why）**：链路组成常随部署环境变化（是否批处理、重试几次），以数据描述链路可以
//!   免去重新编译；
//! - **结构（How）**：[`ChainConfig`] 是 [`LinkConfig`] 的有序列表，每个变体携带对应 Link 的
//!   强类型配置；[`LinkDependencies`] 注入运行时、传输与变换等协作者；
//! - **契约（What）**：
//!   - 链路非空，且恰好有一个终端 Link（`http` 或 `http_batch`），位于末尾；
//!   - 重试次数至少为 1，URL 非空，批大小上限（若给出）至少为 1；
//! - **风险提示（Trade-offs）**：分流 Link 依赖运行时谓词，无法以数据表达，只能在代码中装配。
//!
//! ```toml
//! [[links]]
//! kind = "logger"
//! color = "none"
//!
//! [[links]]
//! kind = "retry"
//! attempts = 3
//!
//! [[links]]
//! kind = "http_batch"
//! url = "http://localhost:3000/rpc"
//! max_batch_size = 16
//! ```

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    chain::{Chain, Link},
    links::{
        BatchLink, BatchLinkConfig, BatchRegistry, HttpLink, HttpLinkConfig, LoggerLink,
        LoggerLinkConfig, RetryConfig, RetryLink,
    },
    runtime::LinkRuntime,
    transport::{IdentityTransformer, Transformer, WireTransport},
};

/// 链路配置错误。
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum ConfigError {
    #[error("a chain needs at least one link")]
    EmptyChain,

    #[error("the last link must be a terminal link (`http` or `http_batch`)")]
    MissingTerminal,

    #[error("terminal link `{kind}` at position {position} must be the last link")]
    TerminalNotLast { kind: &'static str, position: usize },

    #[error("retry attempts must be at least 1, got {attempts}")]
    InvalidAttempts { attempts: u32 },

    #[error("`{link}` link requires a non-empty url")]
    EmptyUrl { link: &'static str },

    #[error("max_batch_size must be at least 1")]
    InvalidBatchSize,

    #[cfg(feature = "config-toml")]
    #[error("invalid chain description: {0}")]
    Toml(#[from] toml::de::Error),
}

/// 单个 Link 的声明。
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LinkConfig {
    Retry(RetryConfig),
    Logger(LoggerLinkConfig),
    Http(HttpLinkConfig),
    HttpBatch(BatchLinkConfig),
}

impl LinkConfig {
    pub fn kind(&self) -> &'static str {
        match self {
            LinkConfig::Retry(_) => "retry",
            LinkConfig::Logger(_) => "logger",
            LinkConfig::Http(_) => "http",
            LinkConfig::HttpBatch(_) => "http_batch",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, LinkConfig::Http(_) | LinkConfig::HttpBatch(_))
    }

    fn validate(&self) -> Result<(), ConfigError> {
        match self {
            LinkConfig::Retry(config) => config.validate(),
            LinkConfig::Logger(_) => Ok(()),
            LinkConfig::Http(config) => config.validate(),
            LinkConfig::HttpBatch(config) => config.validate(),
        }
    }

    fn build(&self, deps: &LinkDependencies) -> Result<Arc<dyn Link>, ConfigError> {
        let link: Arc<dyn Link> = match self {
            LinkConfig::Retry(config) => Arc::new(RetryLink::new(*config)?),
            LinkConfig::Logger(config) => Arc::new(LoggerLink::new(config.clone())),
            LinkConfig::Http(config) => Arc::new(
                HttpLink::new(
                    config.clone(),
                    Arc::clone(&deps.runtime),
                    Arc::clone(&deps.transport),
                )?
                .with_transformer(Arc::clone(&deps.transformer)),
            ),
            LinkConfig::HttpBatch(config) => Arc::new(
                BatchLink::new(
                    config.clone(),
                    Arc::clone(&deps.runtime),
                    Arc::clone(&deps.transport),
                )?
                .with_transformer(Arc::clone(&deps.transformer))
                .with_registry(deps.batch_registry.clone()),
            ),
        };
        Ok(link)
    }
}

/// 装配链路所需的外部协作者。
#[derive(Clone)]
pub struct LinkDependencies {
    pub runtime: Arc<dyn LinkRuntime>,
    pub transport: Arc<dyn WireTransport>,
    pub transformer: Arc<dyn Transformer>,
    pub batch_registry: BatchRegistry,
}

impl LinkDependencies {
    pub fn new(runtime: Arc<dyn LinkRuntime>, transport: Arc<dyn WireTransport>) -> Self {
        Self {
            runtime,
            transport,
            transformer: Arc::new(IdentityTransformer),
            batch_registry: BatchRegistry::new(),
        }
    }

    pub fn with_transformer(mut self, transformer: Arc<dyn Transformer>) -> Self {
        self.transformer = transformer;
        self
    }

    pub fn with_batch_registry(mut self, registry: BatchRegistry) -> Self {
        self.batch_registry = registry;
        self
    }
}

/// 整条链路的声明，外层在前、终端在后。
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ChainConfig {
    pub links: Vec<LinkConfig>,
}

impl ChainConfig {
    /// 解析并校验 TOML 描述。
    #[cfg(feature = "config-toml")]
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ChainConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        let Some(last) = self.links.last() else {
            return Err(ConfigError::EmptyChain);
        };
        if let Some((position, early)) = self
            .links
            .iter()
            .enumerate()
            .take(self.links.len() - 1)
            .find(|(_, link)| link.is_terminal())
        {
            return Err(ConfigError::TerminalNotLast {
                kind: early.kind(),
                position,
            });
        }
        if !last.is_terminal() {
            return Err(ConfigError::MissingTerminal);
        }
        self.links.iter().try_for_each(LinkConfig::validate)
    }

    /// 校验后按声明顺序实例化全部 Link。
    pub fn build(&self, deps: &LinkDependencies) -> Result<Chain, ConfigError> {
        self.validate()?;
        let links = self
            .links
            .iter()
            .map(|link| link.build(deps))
            .collect::<Result<Vec<_>, _>>()?;
        tracing::debug!(
            target: "spark_link::config",
            links = ?self.links.iter().map(LinkConfig::kind).collect::<Vec<_>>(),
            "chain assembled from configuration"
        );
        Ok(Chain::new(links))
    }
}
