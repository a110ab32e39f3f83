use thiserror::Error;

/// 统一的结果类型
///
/// 与框架其余部分一样使用 `anyhow::Result` 承载业务错误，
/// 通过 `.context()` 补充上下文信息。
///
/// # 示例
///
/// ```rust,ignore
/// use anyhow::Context;
///
/// fn load(path: &str) -> weft_core::Result<String> {
///     std::fs::read_to_string(path).context(format!("Failed to read '{}'", path))
/// }
/// ```
pub use anyhow::Result;

/// 核心层错误
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// 日志系统初始化失败（通常是重复初始化）
    #[error("Failed to initialize logging: {0}")]
    LoggingInitFailed(String),

    /// 配置源加载失败
    #[error("Failed to load configuration: {0}")]
    ConfigLoad(String),

    /// 配置项存在但取值非法
    #[error("Invalid value for property '{key}': {message}")]
    InvalidProperty { key: String, message: String },

    /// 组件仍在构造过程中就被查找
    #[error("Component '{0}' is currently in creation")]
    CurrentlyInCreation(String),
}

impl CoreError {
    pub fn invalid_property(key: impl Into<String>, message: impl Into<String>) -> Self {
        Self::InvalidProperty {
            key: key.into(),
            message: message.into(),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
