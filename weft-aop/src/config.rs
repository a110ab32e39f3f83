//! AOP 配置
//!
//! 从 [`Environment`] 绑定以下键：
//!
//! | 键 | 默认值 | 说明 |
//! |----|--------|------|
//! | `aop.proxy-target-class` | `true` | 默认使用类代理 |
//! | `aop.retry.max-attempts` | `3` | [`RetryAdvice`](crate::RetryAdvice) 的默认次数 |
//! | `aop.events.sink` | `tracing` | `tracing`、`json` 或 `none` |

use crate::error::AopResult;
use crate::event::{EventSink, JsonLinesEventSink, NoopEventSink, TracingEventSink};
use crate::retry::RetryAdvice;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use weft_core::{CoreError, Environment};

pub const PROXY_TARGET_CLASS: &str = "aop.proxy-target-class";
pub const RETRY_MAX_ATTEMPTS: &str = "aop.retry.max-attempts";
pub const EVENTS_SINK: &str = "aop.events.sink";

/// 观察事件输出方式
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EventSinkKind {
    #[default]
    Tracing,
    /// 每个事件一行 JSON，写到标准输出
    Json,
    None,
}

impl EventSinkKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventSinkKind::Tracing => "tracing",
            EventSinkKind::Json => "json",
            EventSinkKind::None => "none",
        }
    }

    pub fn create_sink(&self) -> Arc<dyn EventSink> {
        match self {
            EventSinkKind::Tracing => Arc::new(TracingEventSink),
            EventSinkKind::Json => Arc::new(JsonLinesEventSink::stdout()),
            EventSinkKind::None => Arc::new(NoopEventSink),
        }
    }
}

impl FromStr for EventSinkKind {
    type Err = CoreError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "tracing" | "log" => Ok(EventSinkKind::Tracing),
            "json" => Ok(EventSinkKind::Json),
            "none" | "off" => Ok(EventSinkKind::None),
            other => Err(CoreError::invalid_property(
                EVENTS_SINK,
                format!("unknown sink '{}', expected tracing, json or none", other),
            )),
        }
    }
}

impl fmt::Display for EventSinkKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// AOP 配置
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AopProperties {
    pub proxy_target_class: bool,
    pub retry_max_attempts: u32,
    pub events: EventSinkKind,
}

impl Default for AopProperties {
    fn default() -> Self {
        Self {
            proxy_target_class: true,
            retry_max_attempts: RetryAdvice::DEFAULT_MAX_ATTEMPTS,
            events: EventSinkKind::Tracing,
        }
    }
}

impl AopProperties {
    /// 从环境绑定；值存在但无法解析时返回 [`CoreError::InvalidProperty`]
    pub fn from_environment(env: &Environment) -> AopResult<Self> {
        let defaults = Self::default();

        let proxy_target_class = env.require_bool_or(PROXY_TARGET_CLASS, defaults.proxy_target_class)?;

        let attempts = env.require_i64_or(RETRY_MAX_ATTEMPTS, i64::from(defaults.retry_max_attempts))?;
        let retry_max_attempts = u32::try_from(attempts).map_err(|_| {
            CoreError::invalid_property(
                RETRY_MAX_ATTEMPTS,
                format!("{} is out of range", attempts),
            )
        })?;

        let events = match env.get_string(EVENTS_SINK) {
            Some(value) => value.parse::<EventSinkKind>()?,
            None => defaults.events,
        };

        Ok(Self {
            proxy_target_class,
            retry_max_attempts,
            events,
        })
    }

    /// 按配置的次数创建重试通知
    pub fn retry_advice(&self) -> RetryAdvice {
        RetryAdvice::new(self.retry_max_attempts)
    }
}
