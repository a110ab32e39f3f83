//! 代理容器
//!
//! 按名称登记组件的代理句柄，并提供三种获取方式：
//!
//! - 按具体类型获取：组件只配置了接口代理时立即失败；
//! - 按接口获取：组件没有实现该接口时立即失败；
//! - [`ObjectProvider`]：保存名称，真正调用时才查找，用来避开构造顺序问题。
//!
//! [`SelfRef`] 用于组件在构造完成后注入自己的代理（setter 注入），
//! 以弱引用保存，目标与代理不会互相泄漏。

use crate::error::{AopError, AopResult};
use crate::proxy::{ProxyHandle, ProxyStrategy};
use crate::registry::AspectRegistry;
use crate::signature::Interceptable;
use once_cell::sync::OnceCell;
use parking_lot::RwLock;
use std::any::Any;
use std::collections::HashMap;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use weft_core::CreationTracker;

struct Registered {
    type_name: String,
    strategy: ProxyStrategy,
    handle: Arc<dyn Any + Send + Sync>,
}

/// 代理容器
pub struct ProxyContainer {
    registry: AspectRegistry,
    components: RwLock<HashMap<String, Registered>>,
    creation: CreationTracker,
}

impl ProxyContainer {
    pub fn new(registry: AspectRegistry) -> Arc<Self> {
        Arc::new(Self {
            registry,
            components: RwLock::new(HashMap::new()),
            creation: CreationTracker::new(),
        })
    }

    pub fn registry(&self) -> &AspectRegistry {
        &self.registry
    }

    /// 包装并登记一个已构造好的目标
    pub fn register<T: Interceptable>(
        &self,
        name: &str,
        target: Arc<T>,
        strategy: ProxyStrategy,
    ) -> AopResult<Arc<ProxyHandle<T>>> {
        if self.contains(name) {
            return Err(AopError::DuplicateComponent(name.to_string()));
        }

        let handle = Arc::new(self.registry.wrap(target, strategy)?);
        let registered = Registered {
            type_name: handle.target_type_name().to_string(),
            strategy,
            handle: Arc::clone(&handle) as Arc<dyn Any + Send + Sync>,
        };

        let mut components = self.components.write();
        if components.contains_key(name) {
            return Err(AopError::DuplicateComponent(name.to_string()));
        }
        components.insert(name.to_string(), registered);

        info!(
            "Registered component '{}' ({}, {} proxy)",
            name,
            handle.target_type_name(),
            strategy
        );
        Ok(handle)
    }

    /// 使用注册表的默认策略登记
    pub fn register_default<T: Interceptable>(
        &self,
        name: &str,
        target: Arc<T>,
    ) -> AopResult<Arc<ProxyHandle<T>>> {
        self.register(name, target, self.registry.default_strategy())
    }

    /// 通过工厂函数构造并登记
    ///
    /// 工厂执行期间组件处于“构造中”状态，此时按名称查找它会得到
    /// [`AopError::CurrentlyInCreation`]。
    pub fn register_with<T, F>(
        self: &Arc<Self>,
        name: &str,
        strategy: ProxyStrategy,
        factory: F,
    ) -> AopResult<Arc<ProxyHandle<T>>>
    where
        T: Interceptable,
        F: FnOnce(&Arc<ProxyContainer>) -> AopResult<T>,
    {
        let target = {
            let _guard = self
                .creation
                .begin(name)
                .map_err(|_| AopError::CurrentlyInCreation(name.to_string()))?;
            debug!("Creating component '{}'", name);
            factory(self)?
        };
        self.register(name, Arc::new(target), strategy)
    }

    /// 按具体类型获取
    ///
    /// 接口代理无法冒充具体类型，返回 [`AopError::ConcreteTypeUnavailable`]。
    pub fn get_concrete<T: Interceptable>(&self, name: &str) -> AopResult<Arc<ProxyHandle<T>>> {
        let (strategy, type_name) = self.describe(name)?;
        if strategy == ProxyStrategy::Interface {
            return Err(AopError::ConcreteTypeUnavailable {
                name: name.to_string(),
                type_name,
            });
        }
        self.lookup(name)
    }

    /// 按接口获取
    pub fn get_interface<T: Interceptable>(
        &self,
        name: &str,
        interface: &str,
    ) -> AopResult<Arc<ProxyHandle<T>>> {
        let handle = self.lookup::<T>(name)?;
        if !handle.is_instance_of(interface) {
            return Err(AopError::InterfaceNotImplemented {
                name: name.to_string(),
                interface: interface.to_string(),
            });
        }
        Ok(handle)
    }

    /// 延迟查找的提供者
    pub fn provider<T: Interceptable>(self: &Arc<Self>, name: &str) -> ObjectProvider<T> {
        ObjectProvider {
            container: Arc::downgrade(self),
            name: name.to_string(),
            _marker: PhantomData,
        }
    }

    pub fn contains(&self, name: &str) -> bool {
        self.components.read().contains_key(name)
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.components.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn strategy_of(&self, name: &str) -> AopResult<ProxyStrategy> {
        self.describe(name).map(|(strategy, _)| strategy)
    }

    fn describe(&self, name: &str) -> AopResult<(ProxyStrategy, String)> {
        self.creation
            .ensure_not_creating(name)
            .map_err(|_| AopError::CurrentlyInCreation(name.to_string()))?;
        let components = self.components.read();
        let registered = components
            .get(name)
            .ok_or_else(|| AopError::ComponentNotFound(name.to_string()))?;
        Ok((registered.strategy, registered.type_name.clone()))
    }

    fn lookup<T: Interceptable>(&self, name: &str) -> AopResult<Arc<ProxyHandle<T>>> {
        self.creation
            .ensure_not_creating(name)
            .map_err(|_| AopError::CurrentlyInCreation(name.to_string()))?;
        let components = self.components.read();
        let registered = components
            .get(name)
            .ok_or_else(|| AopError::ComponentNotFound(name.to_string()))?;

        Arc::clone(&registered.handle)
            .downcast::<ProxyHandle<T>>()
            .map_err(|_| AopError::ConcreteTypeUnavailable {
                name: name.to_string(),
                type_name: std::any::type_name::<T>().to_string(),
            })
    }
}

impl fmt::Debug for ProxyContainer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProxyContainer")
            .field("components", &self.names())
            .field("in_creation", &self.creation.in_creation())
            .finish()
    }
}

/// 延迟查找
///
/// 每次 `get()` 时才向容器查找，因此可以在组件自身登记之前创建。
pub struct ObjectProvider<T: Interceptable> {
    container: Weak<ProxyContainer>,
    name: String,
    _marker: PhantomData<fn() -> T>,
}

impl<T: Interceptable> ObjectProvider<T> {
    pub fn get(&self) -> AopResult<Arc<ProxyHandle<T>>> {
        let container = self
            .container
            .upgrade()
            .ok_or_else(|| AopError::ComponentDropped(self.name.clone()))?;
        container.lookup(&self.name)
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl<T: Interceptable> Clone for ObjectProvider<T> {
    fn clone(&self) -> Self {
        Self {
            container: Weak::clone(&self.container),
            name: self.name.clone(),
            _marker: PhantomData,
        }
    }
}

impl<T: Interceptable> fmt::Debug for ObjectProvider<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectProvider")
            .field("name", &self.name)
            .finish()
    }
}

/// 组件对自身代理的引用
pub struct SelfRef<T: Interceptable> {
    name: String,
    handle: OnceCell<Weak<ProxyHandle<T>>>,
}

impl<T: Interceptable> SelfRef<T> {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            handle: OnceCell::new(),
        }
    }

    /// 注入自身代理，只有第一次生效；返回是否生效
    pub fn set(&self, handle: &Arc<ProxyHandle<T>>) -> bool {
        self.handle.set(Arc::downgrade(handle)).is_ok()
    }

    pub fn is_set(&self) -> bool {
        self.handle.get().is_some()
    }

    pub fn get(&self) -> AopResult<Arc<ProxyHandle<T>>> {
        self.handle
            .get()
            .ok_or_else(|| AopError::SelfReferenceUnset(self.name.clone()))?
            .upgrade()
            .ok_or_else(|| AopError::ComponentDropped(self.name.clone()))
    }
}

impl<T: Interceptable> fmt::Debug for SelfRef<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SelfRef")
            .field("name", &self.name)
            .field("set", &self.is_set())
            .finish()
    }
}
