//! 分层配置
//!
//! [`Environment`] 按优先级聚合多个 [`PropertySource`]，键统一使用点号分隔的形式，
//! 例如 `aop.proxy-target-class`。

use crate::error::{CoreError, CoreResult};
use parking_lot::RwLock;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

/// 配置值
#[derive(Debug, Clone, PartialEq)]
pub enum ConfigValue {
    String(String),
    Int(i64),
    Float(f64),
    Bool(bool),
    Array(Vec<ConfigValue>),
    Table(HashMap<String, ConfigValue>),
}

impl ConfigValue {
    pub fn as_str(&self) -> Option<&str> {
        match self {
            ConfigValue::String(s) => Some(s.as_str()),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            ConfigValue::Int(i) => Some(*i),
            ConfigValue::String(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            ConfigValue::Bool(b) => Some(*b),
            ConfigValue::String(s) => match s.trim().to_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Some(true),
                "false" | "no" | "off" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        }
    }

    fn from_toml(value: &toml::Value) -> Self {
        match value {
            toml::Value::String(s) => ConfigValue::String(s.clone()),
            toml::Value::Integer(i) => ConfigValue::Int(*i),
            toml::Value::Float(f) => ConfigValue::Float(*f),
            toml::Value::Boolean(b) => ConfigValue::Bool(*b),
            toml::Value::Datetime(dt) => ConfigValue::String(dt.to_string()),
            toml::Value::Array(items) => {
                ConfigValue::Array(items.iter().map(ConfigValue::from_toml).collect())
            }
            toml::Value::Table(table) => ConfigValue::Table(
                table
                    .iter()
                    .map(|(k, v)| (k.clone(), ConfigValue::from_toml(v)))
                    .collect(),
            ),
        }
    }
}

/// 配置源
pub trait PropertySource: Send + Sync {
    fn name(&self) -> &str;

    fn get(&self, key: &str) -> Option<ConfigValue>;

    fn keys(&self) -> Vec<String>;

    /// 数字越大优先级越高
    fn priority(&self) -> i32 {
        0
    }
}

/// 配置环境
///
/// 查找时按优先级从高到低遍历配置源，返回第一个命中的值。
pub struct Environment {
    sources: RwLock<Vec<Box<dyn PropertySource>>>,
}

impl std::fmt::Debug for Environment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let names: Vec<String> = self
            .sources
            .read()
            .iter()
            .map(|s| s.name().to_string())
            .collect();
        f.debug_struct("Environment").field("sources", &names).finish()
    }
}

impl Environment {
    pub fn new() -> Self {
        Self {
            sources: RwLock::new(Vec::new()),
        }
    }

    /// 添加配置源，同优先级时先添加者优先
    pub fn add_property_source(&self, source: Box<dyn PropertySource>) {
        let mut sources = self.sources.write();
        tracing::debug!(
            source = source.name(),
            priority = source.priority(),
            "Adding property source"
        );
        sources.push(source);
        // sort_by 是稳定排序
        sources.sort_by(|a, b| b.priority().cmp(&a.priority()));
    }

    pub fn get(&self, key: &str) -> Option<ConfigValue> {
        let sources = self.sources.read();
        sources.iter().find_map(|source| {
            let value = source.get(key)?;
            tracing::trace!(key, source = source.name(), "Property resolved");
            Some(value)
        })
    }

    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    pub fn get_string(&self, key: &str) -> Option<String> {
        match self.get(key)? {
            ConfigValue::String(s) => Some(s),
            ConfigValue::Int(i) => Some(i.to_string()),
            ConfigValue::Float(f) => Some(f.to_string()),
            ConfigValue::Bool(b) => Some(b.to_string()),
            _ => None,
        }
    }

    pub fn get_string_or(&self, key: &str, default: &str) -> String {
        self.get_string(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_i64(&self, key: &str) -> Option<i64> {
        self.get(key).and_then(|v| v.as_i64())
    }

    pub fn get_bool(&self, key: &str) -> Option<bool> {
        self.get(key).and_then(|v| v.as_bool())
    }

    pub fn get_bool_or(&self, key: &str, default: bool) -> bool {
        self.get_bool(key).unwrap_or(default)
    }

    /// 严格读取布尔值：键存在但无法解析时报错
    pub fn require_bool_or(&self, key: &str, default: bool) -> CoreResult<bool> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.as_bool().ok_or_else(|| {
                CoreError::invalid_property(key, format!("expected a boolean, got {:?}", value))
            }),
        }
    }

    /// 严格读取整数：键存在但无法解析时报错
    pub fn require_i64_or(&self, key: &str, default: i64) -> CoreResult<i64> {
        match self.get(key) {
            None => Ok(default),
            Some(value) => value.as_i64().ok_or_else(|| {
                CoreError::invalid_property(key, format!("expected an integer, got {:?}", value))
            }),
        }
    }

    /// 支持 TOML 数组或逗号分隔字符串两种写法
    pub fn get_string_array(&self, key: &str) -> Option<Vec<String>> {
        match self.get(key)? {
            ConfigValue::Array(items) => Some(
                items
                    .iter()
                    .filter_map(|v| v.as_str().map(String::from))
                    .collect(),
            ),
            ConfigValue::String(s) => Some(
                s.split(',')
                    .map(|part| part.trim().to_string())
                    .filter(|part| !part.is_empty())
                    .collect(),
            ),
            _ => None,
        }
    }
}

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

/// 环境变量配置源
///
/// `APP_AOP_PROXY_TARGET_CLASS` 对应键 `aop.proxy-target-class`，
/// 点号和连字符都映射为下划线。
pub struct EnvironmentPropertySource {
    prefix: String,
    priority: i32,
}

impl EnvironmentPropertySource {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
            priority: 100,
        }
    }

    fn key_to_env(&self, key: &str) -> String {
        let normalized: String = key
            .chars()
            .map(|c| match c {
                '.' | '-' => '_',
                other => other.to_ascii_uppercase(),
            })
            .collect();
        format!("{}{}", self.prefix, normalized)
    }

    fn env_to_key(&self, env_key: &str) -> String {
        env_key
            .strip_prefix(&self.prefix)
            .unwrap_or(env_key)
            .to_lowercase()
            .replace('_', ".")
    }
}

impl PropertySource for EnvironmentPropertySource {
    fn name(&self) -> &str {
        "environment"
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        std::env::var(self.key_to_env(key))
            .ok()
            .map(ConfigValue::String)
    }

    fn keys(&self) -> Vec<String> {
        std::env::vars()
            .filter(|(k, _)| k.starts_with(&self.prefix))
            .map(|(k, _)| self.env_to_key(&k))
            .collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// TOML 配置源
///
/// 嵌套表会被展平：`[aop.retry] max-attempts = 5` 对应键 `aop.retry.max-attempts`。
pub struct TomlPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl TomlPropertySource {
    pub fn from_file(path: impl AsRef<Path>) -> CoreResult<Self> {
        let path = path.as_ref();
        let content = fs::read_to_string(path)
            .map_err(|e| CoreError::ConfigLoad(format!("{}: {}", path.display(), e)))?;
        Self::parse(&content, path.display().to_string())
    }

    pub fn parse(content: &str, name: impl Into<String>) -> CoreResult<Self> {
        let name = name.into();
        let table: toml::Table = content
            .parse()
            .map_err(|e| CoreError::ConfigLoad(format!("{}: {}", name, e)))?;

        let mut properties = HashMap::new();
        for (key, value) in &table {
            Self::flatten(key.clone(), value, &mut properties);
        }

        Ok(Self {
            name,
            properties,
            priority: 0,
        })
    }

    fn flatten(prefix: String, value: &toml::Value, out: &mut HashMap<String, ConfigValue>) {
        match value {
            toml::Value::Table(table) => {
                for (key, nested) in table {
                    Self::flatten(format!("{}.{}", prefix, key), nested, out);
                }
            }
            other => {
                out.insert(prefix, ConfigValue::from_toml(other));
            }
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for TomlPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

/// 内存配置源（测试或运行时覆盖）
pub struct MapPropertySource {
    name: String,
    properties: HashMap<String, ConfigValue>,
    priority: i32,
}

impl MapPropertySource {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            properties: HashMap::new(),
            priority: 50,
        }
    }

    pub fn with_property(mut self, key: impl Into<String>, value: ConfigValue) -> Self {
        self.properties.insert(key.into(), value);
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl PropertySource for MapPropertySource {
    fn name(&self) -> &str {
        &self.name
    }

    fn get(&self, key: &str) -> Option<ConfigValue> {
        self.properties.get(key).cloned()
    }

    fn keys(&self) -> Vec<String> {
        self.properties.keys().cloned().collect()
    }

    fn priority(&self) -> i32 {
        self.priority
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
[aop]
proxy-target-class = false

[aop.retry]
max-attempts = 5

[logging]
level = "debug"
tags = ["order", "member"]
"#;

    #[test]
    fn test_toml_flattening() {
        let source = TomlPropertySource::parse(SAMPLE, "sample").unwrap();
        assert_eq!(source.get("aop.proxy-target-class"), Some(ConfigValue::Bool(false)));
        assert_eq!(source.get("aop.retry.max-attempts"), Some(ConfigValue::Int(5)));
        assert_eq!(
            source.get("logging.level"),
            Some(ConfigValue::String("debug".to_string()))
        );
        assert!(source.get("aop.retry").is_none());
    }

    #[test]
    fn test_invalid_toml_is_config_error() {
        let err = TomlPropertySource::parse("[aop\nbroken", "broken").err().unwrap();
        assert!(matches!(err, CoreError::ConfigLoad(_)));
    }

    #[test]
    fn test_priority_order() {
        let env = Environment::new();
        env.add_property_source(Box::new(TomlPropertySource::parse(SAMPLE, "file").unwrap()));
        env.add_property_source(Box::new(
            MapPropertySource::new("override")
                .with_property("aop.retry.max-attempts", ConfigValue::Int(7)),
        ));

        assert_eq!(env.get_i64("aop.retry.max-attempts"), Some(7));
        assert_eq!(env.get_bool("aop.proxy-target-class"), Some(false));
        assert_eq!(
            env.get_string_array("logging.tags"),
            Some(vec!["order".to_string(), "member".to_string()])
        );
    }

    #[test]
    fn test_strict_getters() {
        let env = Environment::new();
        env.add_property_source(Box::new(
            MapPropertySource::new("test")
                .with_property("aop.proxy-target-class", ConfigValue::String("maybe".into()))
                .with_property("aop.retry.max-attempts", ConfigValue::String(" 4 ".into())),
        ));

        assert!(env.require_bool_or("aop.proxy-target-class", true).is_err());
        assert_eq!(env.require_i64_or("aop.retry.max-attempts", 3).unwrap(), 4);
        assert!(env.require_bool_or("missing.key", true).unwrap());
    }

    #[test]
    fn test_env_key_mapping() {
        let source = EnvironmentPropertySource::new("APP_");
        assert_eq!(
            source.key_to_env("aop.proxy-target-class"),
            "APP_AOP_PROXY_TARGET_CLASS"
        );
        assert_eq!(source.env_to_key("APP_AOP_RETRY"), "aop.retry");
    }
}
