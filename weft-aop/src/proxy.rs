//! 代理句柄与调度
//!
//! 调用方拿到的是 [`ProxyHandle`]，而不是真实目标。每次调用：
//!
//! 1. 按方法键找到暴露的签名；
//! 2. 取出（或首次构建并缓存）该方法的通知链；
//! 3. 新建一个 [`Invocation`]，从位置 0 执行调用链；
//! 4. 把链上的 [`Value`] 还原为方法声明的返回类型。
//!
//! 两种策略：
//!
//! - **接口代理**：只暴露目标所实现接口上声明的方法，类型检查只能看到接口；
//! - **类代理**：冒充具体类型，暴露全部 public 方法，类型检查能看到具体类型和接口。
//!
//! 真实方法内部直接调用自身的其他方法（`self.internal()`）不会经过代理，
//! 因此不会触发任何通知。这是调用拦截的结构性质，不是缺陷。

use crate::chain::AdviceChain;
use crate::config::AopProperties;
use crate::error::{AopError, AopResult};
use crate::joinpoint::{Invocation, JoinPoint};
use crate::registry::Weaving;
use crate::signature::{simple_name, Interceptable, MethodSignature, TypeRegistry, Visibility};
use crate::value::Value;
use once_cell::sync::OnceCell;
use std::any::{type_name, Any};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::info;

/// 代理策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ProxyStrategy {
    /// 基于接口
    Interface,
    /// 冒充具体类型
    Class,
}

impl ProxyStrategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProxyStrategy::Interface => "interface",
            ProxyStrategy::Class => "class",
        }
    }

    /// `aop.proxy-target-class` 为 true 时使用类代理
    pub fn from_properties(properties: &AopProperties) -> Self {
        if properties.proxy_target_class {
            ProxyStrategy::Class
        } else {
            ProxyStrategy::Interface
        }
    }
}

impl fmt::Display for ProxyStrategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

struct MethodEntry {
    signature: MethodSignature,
    chain: OnceCell<Arc<AdviceChain>>,
}

/// 代理句柄
///
/// 持有真实目标和按方法缓存的通知链。通知链在第一次调用时构建，
/// 并发的首次构建只会有一个结果被保留。
pub struct ProxyHandle<T: Interceptable> {
    target: Arc<T>,
    strategy: ProxyStrategy,
    weaving: Arc<Weaving>,
    types: TypeRegistry,
    target_type: String,
    proxy_type_name: String,
    lineage: Vec<String>,
    methods: HashMap<String, MethodEntry>,
    by_name: HashMap<String, Vec<String>>,
}

impl<T: Interceptable> ProxyHandle<T> {
    pub(crate) fn new(
        weaving: Arc<Weaving>,
        target: Arc<T>,
        strategy: ProxyStrategy,
    ) -> AopResult<Self> {
        let descriptor = T::type_descriptor();
        let mut descriptors = T::supertype_descriptors();
        descriptors.push(descriptor.clone());
        let types = weaving.types.extended(descriptors)?;
        let target_type = descriptor.name().to_string();

        let (exposed, lineage, proxy_type_name) = match strategy {
            ProxyStrategy::Class => {
                if descriptor.is_sealed() {
                    return Err(AopError::UnsupportedStrategy {
                        type_name: target_type,
                        strategy: strategy.as_str(),
                    });
                }
                let exposed: Vec<MethodSignature> = descriptor
                    .methods()
                    .iter()
                    .filter(|m| m.get_visibility() == Visibility::Public)
                    .cloned()
                    .collect();
                let proxy_type_name = format!("{}$$WeftProxy", target_type);
                (exposed, types.lineage(&target_type), proxy_type_name)
            }
            ProxyStrategy::Interface => {
                let interfaces: Vec<String> = types
                    .interfaces_of(&target_type)
                    .into_iter()
                    .filter(|name| name != &target_type)
                    .collect();
                if interfaces.is_empty() {
                    return Err(AopError::NoInterfaceAvailable(target_type));
                }

                let mut exposed: Vec<MethodSignature> = Vec::new();
                for interface in &interfaces {
                    let Some(iface) = types.get(interface) else {
                        continue;
                    };
                    for declared in iface.methods() {
                        if exposed.iter().any(|m| m.same_shape(declared)) {
                            continue;
                        }
                        let bound = descriptor
                            .find_method(declared)
                            .cloned()
                            .unwrap_or_else(|| declared.clone().on_type(&target_type));
                        exposed.push(bound);
                    }
                }

                let proxy_type_name = format!(
                    "$Proxy({})",
                    interfaces
                        .iter()
                        .map(|name| simple_name(name))
                        .collect::<Vec<_>>()
                        .join(",")
                );
                (exposed, interfaces, proxy_type_name)
            }
        };

        let mut methods = HashMap::new();
        let mut by_name: HashMap<String, Vec<String>> = HashMap::new();
        for signature in exposed {
            let key = signature.key();
            by_name
                .entry(signature.name().to_string())
                .or_default()
                .push(key.clone());
            methods.insert(
                key,
                MethodEntry {
                    signature,
                    chain: OnceCell::new(),
                },
            );
        }

        info!(
            "🔷 [AOP] Created {} proxy {} for {} ({} method(s) exposed)",
            strategy,
            proxy_type_name,
            target_type,
            methods.len()
        );

        Ok(Self {
            target,
            strategy,
            weaving,
            types,
            target_type,
            proxy_type_name,
            lineage,
            methods,
            by_name,
        })
    }

    /// 经过通知链调用方法
    ///
    /// `method` 可以是方法名（无重载时）或完整键 `hello(String)`。
    /// `body` 是真实方法的调用，可能被执行零次、一次或多次（重试）。
    ///
    /// # 示例
    ///
    /// ```ignore
    /// let greeting: String = handle.invoke("hello", (name,), |target, (name,)| target.hello(name))?;
    /// ```
    pub fn invoke<A, R, F>(&self, method: &str, args: A, body: F) -> anyhow::Result<R>
    where
        A: fmt::Debug,
        R: Any + fmt::Debug + Send,
        F: Fn(&T, &A) -> anyhow::Result<R>,
    {
        let entry = self.resolve(method)?;
        let chain = self.chain_of(entry)?;

        if chain.is_empty() {
            return body(self.target.as_ref(), &args);
        }

        let terminal = || body(self.target.as_ref(), &args).map(Value::new);
        let target: &dyn Any = self.target.as_ref();
        let join_point = JoinPoint::new(
            &entry.signature,
            target,
            &args,
            self.strategy,
            self.weaving.sink.as_ref(),
        );
        let invocation = Invocation::new(join_point, chain.links(), &terminal);

        let value = invocation.run()?;
        value.downcast::<R>().map_err(|_| {
            AopError::ReturnTypeMismatch {
                method: entry.signature.to_string(),
                expected: type_name::<R>(),
            }
            .into()
        })
    }

    /// 取出方法的通知链，首次访问时构建
    pub fn chain(&self, method: &str) -> AopResult<Arc<AdviceChain>> {
        let entry = self.resolve(method)?;
        self.chain_of(entry).map(Arc::clone)
    }

    /// 预先构建全部方法的通知链
    pub fn prepare(&self) -> AopResult<()> {
        for entry in self.methods.values() {
            self.chain_of(entry)?;
        }
        Ok(())
    }

    fn chain_of<'e>(&self, entry: &'e MethodEntry) -> AopResult<&'e Arc<AdviceChain>> {
        entry.chain.get_or_try_init(|| {
            self.weaving
                .chain_builder(&self.types, self.strategy)
                .build(&entry.signature)
                .map(Arc::new)
        })
    }

    fn resolve(&self, method: &str) -> AopResult<&MethodEntry> {
        let method: String = method.chars().filter(|c| !c.is_whitespace()).collect();
        if let Some(entry) = self.methods.get(&method) {
            return Ok(entry);
        }

        match self.by_name.get(&method).map(Vec::as_slice) {
            Some([key]) => self.methods.get(key).ok_or_else(|| self.not_exposed(&method)),
            Some(keys) if keys.len() > 1 => {
                let mut candidates = keys.to_vec();
                candidates.sort();
                Err(AopError::AmbiguousMethod {
                    type_name: self.target_type.clone(),
                    method,
                    candidates,
                })
            }
            _ => Err(self.not_exposed(&method)),
        }
    }

    fn not_exposed(&self, method: &str) -> AopError {
        AopError::MethodNotExposed {
            type_name: self.proxy_type_name.clone(),
            method: method.to_string(),
        }
    }

    /// 真实目标，只有类代理才能取到
    ///
    /// 接口代理对外只是接口，不能借此拿到实现类独有的方法。
    /// 直接调用真实目标会绕过所有通知。
    pub fn target(&self) -> AopResult<&Arc<T>> {
        match self.strategy {
            ProxyStrategy::Class => Ok(&self.target),
            ProxyStrategy::Interface => Err(AopError::ConcreteTypeUnavailable {
                name: self.proxy_type_name.clone(),
                type_name: self.target_type.clone(),
            }),
        }
    }

    pub fn strategy(&self) -> ProxyStrategy {
        self.strategy
    }

    /// 被代理的具体类型名
    pub fn target_type_name(&self) -> &str {
        &self.target_type
    }

    /// 代理自身的类型名，例如 `hello.aop.member.MemberServiceImpl$$WeftProxy`
    /// 或 `$Proxy(MemberService)`
    pub fn proxy_type_name(&self) -> &str {
        &self.proxy_type_name
    }

    /// 代理可以被当作哪些类型使用
    ///
    /// 接口代理只有接口；类代理包含具体类型及其全部祖先。
    pub fn type_lineage(&self) -> &[String] {
        &self.lineage
    }

    pub fn is_instance_of(&self, type_name: &str) -> bool {
        self.lineage.iter().any(|name| name == type_name)
    }

    /// 暴露的方法，按方法键排序
    pub fn exposed_methods(&self) -> Vec<&MethodSignature> {
        let mut methods: Vec<&MethodSignature> =
            self.methods.values().map(|entry| &entry.signature).collect();
        methods.sort_by_key(|signature| signature.key());
        methods
    }

    pub fn exposes(&self, method: &str) -> bool {
        self.resolve(method).is_ok()
    }
}

impl<T: Interceptable> fmt::Debug for ProxyHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyHandle")
            .field("proxy_type", &self.proxy_type_name)
            .field("target_type", &self.target_type)
            .field("strategy", &self.strategy)
            .field("methods", &self.methods.len())
            .finish()
    }
}

/// 把方法调用转发到 [`ProxyHandle::invoke`]
///
/// 闭包参数依次是真实目标和各个实参的引用。
///
/// # 示例
///
/// ```ignore
/// impl MemberService for ProxyHandle<MemberServiceImpl> {
///     fn hello(&self, param: &str) -> anyhow::Result<String> {
///         intercept!(self, "hello(String)", |target, param| target.hello(param))
///     }
/// }
/// ```
#[macro_export]
macro_rules! intercept {
    ($handle:expr, $method:expr, |$target:ident $(, $arg:ident)* $(,)?| $body:expr) => {
        $handle.invoke($method, ($($arg,)*), |$target, ($($arg,)*)| $body)
    };
}
