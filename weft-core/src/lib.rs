// weft-core: 拦截引擎的公共基础设施
//
// 提供：
// - 统一的错误类型
// - 基于 tracing-subscriber 的日志初始化
// - 分层配置（TOML 文件、环境变量、内存覆盖）
// - 构造中组件的跟踪

pub mod config;
pub mod creation;
pub mod error;
pub mod logging;

pub use config::{
    ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
    TomlPropertySource,
};
pub use creation::{CreationGuard, CreationTracker};
pub use error::{CoreError, CoreResult, Result};
pub use logging::{LogFormat, LogLevel, LoggingConfig};

/// Prelude 模块，包含常用类型
pub mod prelude {
    pub use crate::config::{
        ConfigValue, Environment, EnvironmentPropertySource, MapPropertySource, PropertySource,
        TomlPropertySource,
    };
    pub use crate::error::{CoreError, CoreResult, Result};
    pub use crate::logging::{LogFormat, LogLevel, LoggingConfig};
    pub use anyhow::{anyhow, Context};
}
