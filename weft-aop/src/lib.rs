//! Weft AOP - 方法调用拦截引擎
//!
//! 在调用方与真实目标之间插入代理，按切点规则把通知织入方法调用：
//! - 切点表达式（`execution`、`within`、`this`、`target`、`@annotation` 及组合）
//! - 五种通知（Before、AfterReturning、AfterThrowing、After、Around）
//! - 接口代理与类代理两种策略
//! - 通知链按方法缓存，无匹配通知的方法直接调用
//! - 开箱即用的重试、日志、事务通知
//!
//! 所有切面在启动时通过 [`AspectRegistryBuilder`] 显式注册，`build()` 时一次性校验。

pub mod advice;
pub mod aspect;
pub mod chain;
pub mod config;
pub mod container;
pub mod error;
pub mod error_info;
pub mod event;
pub mod joinpoint;
pub mod pattern;
pub mod pointcut;
pub mod proxy;
pub mod registry;
pub mod retry;
pub mod signature;
pub mod value;

// 重新导出核心类型
pub use advice::{
    after_fn, after_returning_fn, after_throwing_fn, around_fn, before_fn, Advice, AdviceBinding,
    AdviceKind, AfterAdvice, AfterReturningAdvice, AfterThrowingAdvice, AroundAdvice, BeforeAdvice,
    RuleSource,
};
pub use aspect::{Aspect, LogAdvice, TraceAdvice, TransactionAdvice};
pub use chain::{AdviceChain, ChainLink};
pub use config::{AopProperties, EventSinkKind};
pub use container::{ObjectProvider, ProxyContainer, SelfRef};
pub use error::{AopError, AopResult};
pub use error_info::ErrorInfo;
pub use event::{
    AdviceEvent, EventDetail, EventKind, EventSink, JsonLinesEventSink, NoopEventSink,
    RecordingEventSink, TracingEventSink,
};
pub use joinpoint::{Invocation, InvocationState, JoinPoint, ProceedingJoinPoint};
pub use pattern::{ExecutionPattern, NamePattern, ParamPattern, TypePattern};
pub use pointcut::{MatchContext, PointcutRegistry, PointcutRule};
pub use proxy::{ProxyHandle, ProxyStrategy};
pub use registry::{AspectRegistry, AspectRegistryBuilder};
pub use retry::RetryAdvice;
pub use signature::{
    Interceptable, MethodSignature, TypeDescriptor, TypeKind, TypeRegistry, Visibility,
};
pub use value::Value;

/// 预导入模块
pub mod prelude {
    pub use crate::advice::*;
    pub use crate::aspect::{Aspect, LogAdvice, TraceAdvice, TransactionAdvice};
    pub use crate::config::AopProperties;
    pub use crate::container::{ObjectProvider, ProxyContainer, SelfRef};
    pub use crate::error::{AopError, AopResult};
    pub use crate::event::{EventDetail, EventKind, EventSink, RecordingEventSink};
    pub use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
    pub use crate::pointcut::PointcutRule;
    pub use crate::proxy::{ProxyHandle, ProxyStrategy};
    pub use crate::registry::AspectRegistry;
    pub use crate::retry::RetryAdvice;
    pub use crate::signature::{Interceptable, MethodSignature, TypeDescriptor, Visibility};
    pub use crate::value::Value;
    pub use crate::intercept;
}
