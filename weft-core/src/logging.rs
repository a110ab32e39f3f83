//! 日志初始化
//!
//! 基于 `tracing-subscriber` 的 fmt 订阅者，支持从环境变量或 [`Environment`] 读取配置。

use crate::config::Environment;
use crate::error::{CoreError, CoreResult};
use std::str::FromStr;
use tracing::Level;
use tracing_subscriber::{fmt, EnvFilter};

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl FromStr for LogLevel {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trace" => Ok(LogLevel::Trace),
            "debug" => Ok(LogLevel::Debug),
            "info" => Ok(LogLevel::Info),
            "warn" | "warning" => Ok(LogLevel::Warn),
            "error" => Ok(LogLevel::Error),
            other => Err(CoreError::invalid_property(
                "logging.level",
                format!("unknown log level '{}'", other),
            )),
        }
    }
}

impl From<LogLevel> for Level {
    fn from(level: LogLevel) -> Self {
        match level {
            LogLevel::Trace => Level::TRACE,
            LogLevel::Debug => Level::DEBUG,
            LogLevel::Info => Level::INFO,
            LogLevel::Warn => Level::WARN,
            LogLevel::Error => Level::ERROR,
        }
    }
}

/// 日志输出格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    /// 紧凑格式（默认）
    Compact,
    /// 完整格式
    Full,
    /// JSON 格式，适合采集 advice 事件
    Json,
    /// 多行美化格式（适合开发）
    Pretty,
}

impl FromStr for LogFormat {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "compact" => Ok(LogFormat::Compact),
            "full" => Ok(LogFormat::Full),
            "json" => Ok(LogFormat::Json),
            "pretty" => Ok(LogFormat::Pretty),
            other => Err(CoreError::invalid_property(
                "logging.format",
                format!("unknown log format '{}'", other),
            )),
        }
    }
}

/// 日志配置
#[derive(Debug, Clone)]
pub struct LoggingConfig {
    /// 日志级别（默认：Info）
    pub level: LogLevel,

    /// 日志格式（默认：Compact）
    pub format: LogFormat,

    /// 是否显示时间戳（默认：true）
    pub show_timestamp: bool,

    /// 是否显示目标模块路径（默认：false）
    pub show_target: bool,

    /// 是否显示线程 ID（默认：false）
    pub show_thread_ids: bool,

    /// 自定义过滤器，例如 `"weft_aop=debug,order_demo=info"`
    pub filter: Option<String>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::Info,
            format: LogFormat::Compact,
            show_timestamp: true,
            show_target: false,
            show_thread_ids: false,
            filter: None,
        }
    }
}

impl LoggingConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn level(mut self, level: LogLevel) -> Self {
        self.level = level;
        self
    }

    pub fn format(mut self, format: LogFormat) -> Self {
        self.format = format;
        self
    }

    pub fn show_timestamp(mut self, show: bool) -> Self {
        self.show_timestamp = show;
        self
    }

    pub fn show_target(mut self, show: bool) -> Self {
        self.show_target = show;
        self
    }

    pub fn show_thread_ids(mut self, show: bool) -> Self {
        self.show_thread_ids = show;
        self
    }

    pub fn filter(mut self, filter: impl Into<String>) -> Self {
        self.filter = Some(filter.into());
        self
    }

    /// 从进程环境变量读取：`RUST_LOG`、`LOG_LEVEL`、`LOG_FORMAT`
    ///
    /// 非法取值会被忽略并保留默认值。
    pub fn from_env() -> Self {
        let mut config = Self::default();

        if let Ok(rust_log) = std::env::var("RUST_LOG") {
            config.filter = Some(rust_log);
        }
        if let Some(level) = std::env::var("LOG_LEVEL").ok().and_then(|v| v.parse().ok()) {
            config.level = level;
        }
        if let Some(format) = std::env::var("LOG_FORMAT").ok().and_then(|v| v.parse().ok()) {
            config.format = format;
        }

        config
    }

    /// 从 [`Environment`] 读取 `logging.*` 配置项
    ///
    /// 与 [`from_env`](Self::from_env) 不同，这里的非法取值会直接报错。
    pub fn from_environment(env: &Environment) -> CoreResult<Self> {
        let mut config = Self::default();

        if let Some(level) = env.get_string("logging.level") {
            config.level = level.parse()?;
        }
        if let Some(format) = env.get_string("logging.format") {
            config.format = format.parse()?;
        }
        config.show_timestamp = env.get_bool_or("logging.show-timestamp", config.show_timestamp);
        config.show_target = env.get_bool_or("logging.show-target", config.show_target);
        config.show_thread_ids = env.get_bool_or("logging.show-thread-ids", config.show_thread_ids);
        config.filter = env.get_string("logging.filter");

        Ok(config)
    }

    fn env_filter(&self) -> EnvFilter {
        let fallback = || EnvFilter::new(self.level.to_string());
        match &self.filter {
            Some(filter) => EnvFilter::try_new(filter).unwrap_or_else(|_| fallback()),
            None => EnvFilter::try_from_default_env().unwrap_or_else(|_| fallback()),
        }
    }

    /// 安装全局订阅者
    ///
    /// 进程内只能成功调用一次，重复调用返回 [`CoreError::LoggingInitFailed`]。
    pub fn init(self) -> CoreResult<()> {
        let filter = self.env_filter();
        let builder = fmt()
            .with_env_filter(filter)
            .with_target(self.show_target)
            .with_thread_ids(self.show_thread_ids);

        macro_rules! install {
            ($builder:expr) => {
                if self.show_timestamp {
                    $builder.try_init()
                } else {
                    $builder.without_time().try_init()
                }
            };
        }

        let installed = match self.format {
            LogFormat::Compact => install!(builder.compact()),
            LogFormat::Full => install!(builder),
            LogFormat::Json => install!(builder.json()),
            LogFormat::Pretty => install!(builder.pretty()),
        };

        installed.map_err(|e| CoreError::LoggingInitFailed(e.to_string()))
    }
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        };
        f.write_str(name)
    }
}

impl std::fmt::Display for LogFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            LogFormat::Compact => "compact",
            LogFormat::Full => "full",
            LogFormat::Json => "json",
            LogFormat::Pretty => "pretty",
        };
        f.write_str(name)
    }
}
