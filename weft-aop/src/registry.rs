//! 切面注册表
//!
//! 在启动阶段一次性收集类型描述、命名切点与通知绑定，
//! `build()` 时立即解析并校验，之后只读，可被任意多个代理共享。

use crate::advice::{AdviceBinding, RuleSource};
use crate::aspect::Aspect;
use crate::chain::{AdviceChain, ChainBuilder, ResolvedBinding};
use crate::config::AopProperties;
use crate::error::AopResult;
use crate::event::{EventSink, TracingEventSink};
use crate::pointcut::{PointcutRegistry, PointcutRule};
use crate::proxy::{ProxyHandle, ProxyStrategy};
use crate::signature::{Interceptable, MethodSignature, TypeDescriptor, TypeRegistry};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// 注册表内部状态，由所有代理共享
pub(crate) struct Weaving {
    pub(crate) types: TypeRegistry,
    pub(crate) rules: PointcutRegistry,
    pub(crate) bindings: Vec<ResolvedBinding>,
    pub(crate) sink: Arc<dyn EventSink>,
    pub(crate) default_strategy: ProxyStrategy,
}

impl Weaving {
    pub(crate) fn chain_builder<'a>(
        &'a self,
        types: &'a TypeRegistry,
        strategy: ProxyStrategy,
    ) -> ChainBuilder<'a> {
        ChainBuilder {
            types,
            rules: &self.rules,
            bindings: &self.bindings,
            strategy,
        }
    }
}

/// 切面注册表
///
/// # 示例
///
/// ```ignore
/// let registry = AspectRegistry::builder()
///     .pointcut_expr("allOrder", "execution(* hello.aop.order..*(..))")
///     .pointcut_expr("allService", "execution(* *..*Service.*(..))")
///     .bind(AdviceBinding::around("tx", "allOrder() && allService()", TransactionAdvice))
///     .build()?;
///
/// let order_service = registry.wrap(Arc::new(OrderService::new()), ProxyStrategy::Class)?;
/// ```
#[derive(Clone)]
pub struct AspectRegistry {
    inner: Arc<Weaving>,
}

impl AspectRegistry {
    pub fn builder() -> AspectRegistryBuilder {
        AspectRegistryBuilder::new()
    }

    /// 按指定策略包装目标
    pub fn wrap<T: Interceptable>(
        &self,
        target: Arc<T>,
        strategy: ProxyStrategy,
    ) -> AopResult<ProxyHandle<T>> {
        ProxyHandle::new(Arc::clone(&self.inner), target, strategy)
    }

    /// 按注册表的默认策略包装目标
    pub fn wrap_default<T: Interceptable>(&self, target: Arc<T>) -> AopResult<ProxyHandle<T>> {
        self.wrap(target, self.inner.default_strategy)
    }

    /// 为单个签名构建通知链（不缓存），用于检查与测试
    pub fn chain_for(
        &self,
        signature: &MethodSignature,
        strategy: ProxyStrategy,
    ) -> AopResult<AdviceChain> {
        self.inner
            .chain_builder(&self.inner.types, strategy)
            .build(signature)
    }

    pub fn default_strategy(&self) -> ProxyStrategy {
        self.inner.default_strategy
    }

    pub fn rules(&self) -> &PointcutRegistry {
        &self.inner.rules
    }

    pub fn types(&self) -> &TypeRegistry {
        &self.inner.types
    }

    pub fn sink(&self) -> Arc<dyn EventSink> {
        Arc::clone(&self.inner.sink)
    }

    /// 按声明顺序返回绑定名称
    pub fn binding_names(&self) -> Vec<&str> {
        self.inner
            .bindings
            .iter()
            .map(|binding| binding.name.as_str())
            .collect()
    }

    /// 获取注册的绑定数量
    pub fn len(&self) -> usize {
        self.inner.bindings.len()
    }

    /// 检查是否没有注册任何绑定
    pub fn is_empty(&self) -> bool {
        self.inner.bindings.is_empty()
    }
}

impl fmt::Debug for AspectRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AspectRegistry")
            .field("types", &self.inner.types.len())
            .field("rules", &self.inner.rules.names())
            .field("bindings", &self.binding_names())
            .field("default_strategy", &self.inner.default_strategy)
            .finish()
    }
}

enum NamedRule {
    Rule(PointcutRule),
    Expression(String),
}

/// 注册表构建器
///
/// 所有错误都推迟到 `build()` 统一返回，方便链式调用
pub struct AspectRegistryBuilder {
    types: Vec<TypeDescriptor>,
    rules: Vec<(String, NamedRule)>,
    bindings: Vec<AdviceBinding>,
    sink: Option<Arc<dyn EventSink>>,
    default_strategy: ProxyStrategy,
}

impl AspectRegistryBuilder {
    pub fn new() -> Self {
        Self {
            types: Vec::new(),
            rules: Vec::new(),
            bindings: Vec::new(),
            sink: None,
            default_strategy: ProxyStrategy::Class,
        }
    }

    /// 注册类型描述
    pub fn register_type(mut self, descriptor: TypeDescriptor) -> Self {
        self.types.push(descriptor);
        self
    }

    /// 注册可拦截类型及其祖先的描述
    pub fn interceptable<T: Interceptable>(mut self) -> Self {
        self.types.extend(T::supertype_descriptors());
        self.types.push(T::type_descriptor());
        self
    }

    /// 注册命名切点
    pub fn pointcut(mut self, name: impl Into<String>, rule: PointcutRule) -> Self {
        self.rules.push((name.into(), NamedRule::Rule(rule)));
        self
    }

    /// 以表达式注册命名切点，`build()` 时解析
    pub fn pointcut_expr(mut self, name: impl Into<String>, expression: &str) -> Self {
        self.rules
            .push((name.into(), NamedRule::Expression(expression.to_string())));
        self
    }

    /// 注册通知绑定，声明顺序即同优先级下的顺序
    pub fn bind(mut self, binding: AdviceBinding) -> Self {
        self.bindings.push(binding);
        self
    }

    /// 注册切面包含的全部绑定
    pub fn aspect(mut self, aspect: &dyn Aspect) -> Self {
        let bindings = aspect.bindings();
        debug!(
            "Registering aspect: {} ({} binding(s))",
            aspect.name(),
            bindings.len()
        );
        self.bindings.extend(bindings);
        self
    }

    /// 观察事件的去向，默认为 [`TracingEventSink`]
    pub fn sink(mut self, sink: Arc<dyn EventSink>) -> Self {
        self.sink = Some(sink);
        self
    }

    pub fn default_strategy(mut self, strategy: ProxyStrategy) -> Self {
        self.default_strategy = strategy;
        self
    }

    /// 应用配置：默认代理策略与事件 sink
    pub fn properties(mut self, properties: &AopProperties) -> Self {
        self.default_strategy = ProxyStrategy::from_properties(properties);
        self.sink = Some(properties.events.create_sink());
        self
    }

    /// 解析并校验全部配置
    ///
    /// 表达式语法错误、重复命名、悬空引用、循环引用和类型冲突都在这里报告，
    /// 不会推迟到第一次调用。
    pub fn build(self) -> AopResult<AspectRegistry> {
        let mut types = TypeRegistry::new();
        for descriptor in self.types {
            types.register(descriptor)?;
        }

        let mut rules = PointcutRegistry::new();
        for (name, rule) in self.rules {
            match rule {
                NamedRule::Rule(rule) => rules.register(name, rule)?,
                NamedRule::Expression(expression) => {
                    rules.register_expression(name, &expression)?
                }
            }
        }
        rules.validate()?;

        let mut bindings = Vec::with_capacity(self.bindings.len());
        for (seq, binding) in self.bindings.into_iter().enumerate() {
            let rule = match binding.rule_source() {
                RuleSource::Rule(rule) => rule.clone(),
                RuleSource::Expression(expression) => PointcutRule::parse(expression)?,
            };
            rules.validate_rule(&rule)?;

            debug!(
                "  ├─ Binding {} [{} order={}] -> {}",
                binding.name(),
                binding.kind(),
                binding.order(),
                rule
            );

            bindings.push(ResolvedBinding {
                name: binding.name().to_string(),
                kind: binding.kind(),
                order: binding.order(),
                seq,
                rule,
                advice: binding.advice().clone().into_around(),
            });
        }

        info!(
            "🔷 [AOP] Aspect registry ready: {} type(s), {} pointcut(s), {} binding(s), default strategy {}",
            types.len(),
            rules.len(),
            bindings.len(),
            self.default_strategy
        );

        Ok(AspectRegistry {
            inner: Arc::new(Weaving {
                types,
                rules,
                bindings,
                sink: self.sink.unwrap_or_else(|| Arc::new(TracingEventSink)),
                default_strategy: self.default_strategy,
            }),
        })
    }
}

impl Default for AspectRegistryBuilder {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::advice::around_fn;
    use crate::error::AopError;
    use crate::retry::RetryAdvice;

    #[test]
    fn test_build_validates_eagerly() {
        let dangling = AspectRegistry::builder()
            .bind(AdviceBinding::around("log", "missing()", RetryAdvice::default()))
            .build();
        assert_eq!(
            dangling.unwrap_err(),
            AopError::RuleNotFound("missing".to_string())
        );

        let malformed = AspectRegistry::builder()
            .pointcut_expr("bad", "execution(* hello")
            .build();
        assert!(matches!(
            malformed.unwrap_err(),
            AopError::MalformedPattern { .. }
        ));

        let cyclic = AspectRegistry::builder()
            .pointcut_expr("a", "b()")
            .pointcut_expr("b", "a()")
            .build();
        assert!(matches!(
            cyclic.unwrap_err(),
            AopError::CircularReference(_)
        ));

        let duplicate = AspectRegistry::builder()
            .pointcut_expr("allOrder", "execution(* app.order..*(..))")
            .pointcut("allOrder", PointcutRule::within_package("app.member", true).unwrap())
            .build();
        assert_eq!(
            duplicate.unwrap_err(),
            AopError::DuplicateRule("allOrder".to_string())
        );
    }

    #[test]
    fn test_conflicting_types() {
        let result = AspectRegistry::builder()
            .register_type(TypeDescriptor::interface("app.Svc").method("a", &[], "void"))
            .register_type(TypeDescriptor::interface("app.Svc"))
            .build();
        assert_eq!(
            result.unwrap_err(),
            AopError::ConflictingType("app.Svc".to_string())
        );
    }

    #[test]
    fn test_chain_for_uses_named_rules() {
        let registry = AspectRegistry::builder()
            .pointcut_expr("allOrder", "execution(* app.order..*(..))")
            .pointcut_expr("allService", "execution(* *..*Service.*(..))")
            .bind(AdviceBinding::around(
                "doLog",
                "allOrder()",
                around_fn(|pjp| pjp.proceed()),
            ))
            .bind(
                AdviceBinding::around(
                    "doTransaction",
                    "allOrder() && allService()",
                    around_fn(|pjp| pjp.proceed()),
                )
                .with_order(-1),
            )
            .build()
            .unwrap();

        assert_eq!(registry.binding_names(), vec!["doLog", "doTransaction"]);

        let service = MethodSignature::new("app.order.OrderService", "orderItem").params(["String"]);
        let repository = MethodSignature::new("app.order.OrderRepository", "save").params(["String"]);

        let chain = registry.chain_for(&service, ProxyStrategy::Class).unwrap();
        assert_eq!(chain.names(), vec!["doTransaction", "doLog"]);

        let chain = registry.chain_for(&repository, ProxyStrategy::Class).unwrap();
        assert_eq!(chain.names(), vec!["doLog"]);
    }
}
