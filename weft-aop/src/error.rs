//! AOP 错误定义
//!
//! 配置期错误（规则、表达式、代理构造、装配）在 setup 阶段立即返回；
//! 运行期目标方法自身的错误不经过这里，原样以 `anyhow::Error` 传播。

use thiserror::Error;
use weft_core::CoreError;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AopError {
    /// 切点表达式引用了未注册的命名切点
    #[error("Pointcut rule '{0}' not found")]
    RuleNotFound(String),

    /// 同名切点被注册了两次
    #[error("Pointcut rule '{0}' is already registered")]
    DuplicateRule(String),

    /// 命名切点之间存在循环引用
    #[error("Pointcut rule '{0}' references itself through a cycle")]
    CircularReference(String),

    /// 表达式无法解析
    #[error("Malformed pointcut expression '{expression}': {reason}")]
    MalformedPattern { expression: String, reason: String },

    /// 目标类型无法以类代理方式冒充（例如 sealed 类型）
    #[error("Type '{type_name}' cannot be proxied with the {strategy} strategy")]
    UnsupportedStrategy {
        type_name: String,
        strategy: &'static str,
    },

    /// 请求接口代理，但目标类型没有实现任何接口
    #[error("Type '{0}' exposes no interface for interface-typed dispatch")]
    NoInterfaceAvailable(String),

    /// 调用链已经结束后仍调用 proceed
    #[error("proceed() called after invocation of '{0}' completed")]
    ProceedCalledAfterCompletion(String),

    /// 代理没有暴露该方法（接口代理看不到实现类独有的方法）
    #[error("Method '{method}' is not exposed by proxy of '{type_name}'")]
    MethodNotExposed { type_name: String, method: String },

    /// 方法名对应多个重载，需要使用带参数的完整键
    #[error("Method name '{method}' is ambiguous on '{type_name}', use one of {candidates:?}")]
    AmbiguousMethod {
        type_name: String,
        method: String,
        candidates: Vec<String>,
    },

    /// 环绕通知替换了返回值，但类型与方法声明不符
    #[error("Advice chain of '{method}' produced a value that is not a {expected}")]
    ReturnTypeMismatch {
        method: String,
        expected: &'static str,
    },

    /// 同一类型描述符被重复注册为不同的结构
    #[error("Type '{0}' is registered twice with different descriptors")]
    ConflictingType(String),

    #[error("Component '{0}' not found")]
    ComponentNotFound(String),

    #[error("Component '{0}' is already registered")]
    DuplicateComponent(String),

    /// 需要具体类型的依赖，但组件只配置了接口代理
    #[error("Component '{name}' is proxied through interfaces only; concrete type '{type_name}' is not available")]
    ConcreteTypeUnavailable { name: String, type_name: String },

    #[error("Component '{name}' does not implement interface '{interface}'")]
    InterfaceNotImplemented { name: String, interface: String },

    /// 组件在自身构造期间被查找（构造器自注入）
    #[error("Component '{0}' is currently in creation")]
    CurrentlyInCreation(String),

    /// 延迟查找时容器或代理已被释放
    #[error("Component '{0}' is no longer available")]
    ComponentDropped(String),

    /// 自引用尚未注入就被使用
    #[error("Self reference of '{0}' used before injection")]
    SelfReferenceUnset(String),

    #[error(transparent)]
    Config(#[from] CoreError),
}

impl AopError {
    pub fn malformed(expression: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::MalformedPattern {
            expression: expression.into(),
            reason: reason.into(),
        }
    }
}

pub type AopResult<T> = std::result::Result<T, AopError>;
