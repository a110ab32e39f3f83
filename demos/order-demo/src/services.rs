// 演示用的业务组件

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::info;
use weft_aop::prelude::*;

#[derive(Debug, thiserror::Error)]
#[error("illegal item: {0}")]
pub struct IllegalItem(pub String);

// ==================== 订单 ====================

pub struct OrderRepository;

impl OrderRepository {
    pub fn save(&self, item_id: &str) -> anyhow::Result<()> {
        info!("[orderRepository] save {}", item_id);
        if item_id == "ex" {
            return Err(IllegalItem(item_id.to_string()).into());
        }
        Ok(())
    }
}

impl Interceptable for OrderRepository {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.order.OrderRepository").method("save", &["String"], "void")
    }
}

pub struct OrderService {
    repository: Arc<ProxyHandle<OrderRepository>>,
}

impl OrderService {
    pub fn new(repository: Arc<ProxyHandle<OrderRepository>>) -> Self {
        Self { repository }
    }

    pub fn order_item(&self, item_id: &str) -> anyhow::Result<()> {
        info!("[orderService] orderItem {}", item_id);
        self.repository
            .invoke("save", (item_id,), |repository, (id,)| repository.save(id))
    }
}

impl Interceptable for OrderService {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.order.OrderService").method("orderItem", &["String"], "void")
    }
}

// ==================== 成员 ====================

pub trait MemberService {
    fn hello(&self, param: &str) -> anyhow::Result<String>;
}

pub struct MemberServiceImpl;

impl MemberServiceImpl {
    pub fn internal(&self, param: &str) -> anyhow::Result<String> {
        Ok(format!("internal {}", param))
    }
}

impl MemberService for MemberServiceImpl {
    fn hello(&self, param: &str) -> anyhow::Result<String> {
        Ok(format!("ok {}", param))
    }
}

impl Interceptable for MemberServiceImpl {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.member.MemberServiceImpl")
            .implements("hello.aop.member.MemberService")
            .declare(
                MethodSignature::new("", "hello")
                    .params(["String"])
                    .returns("String")
                    .marker("Trace"),
            )
            .method("internal", &["String"], "String")
    }

    fn supertype_descriptors() -> Vec<TypeDescriptor> {
        vec![TypeDescriptor::interface("hello.aop.member.MemberService").method(
            "hello",
            &["String"],
            "String",
        )]
    }
}

/// 代理对外暴露与目标相同的接口
impl MemberService for ProxyHandle<MemberServiceImpl> {
    fn hello(&self, param: &str) -> anyhow::Result<String> {
        intercept!(self, "hello(String)", |target, param| target.hello(param))
    }
}

// ==================== 重试 ====================

/// 每 5 次调用失败 1 次
#[derive(Default)]
pub struct ExamRepository {
    seq: AtomicU32,
}

impl ExamRepository {
    pub fn save(&self, item_id: &str) -> anyhow::Result<String> {
        let seq = self.seq.fetch_add(1, Ordering::SeqCst) + 1;
        if seq % 5 == 0 {
            anyhow::bail!("transient failure at call {}", seq);
        }
        Ok(format!("ok {}", item_id))
    }
}

impl Interceptable for ExamRepository {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.exam.ExamRepository").declare(
            MethodSignature::new("", "save")
                .params(["String"])
                .returns("String")
                .marker("Retry"),
        )
    }
}

// ==================== 内部调用 ====================

pub struct CallServiceV0;

impl CallServiceV0 {
    pub fn external(&self) -> anyhow::Result<()> {
        info!("call external");
        // 直接调用，不经过代理
        self.internal()
    }

    pub fn internal(&self) -> anyhow::Result<()> {
        info!("call internal");
        Ok(())
    }
}

impl Interceptable for CallServiceV0 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.internalcall.CallServiceV0")
            .method("external", &[], "void")
            .method("internal", &[], "void")
    }
}

pub struct CallServiceV1 {
    me: SelfRef<CallServiceV1>,
}

impl CallServiceV1 {
    pub fn new(name: &str) -> Self {
        Self {
            me: SelfRef::new(name),
        }
    }

    pub fn set_self(&self, handle: &Arc<ProxyHandle<CallServiceV1>>) {
        self.me.set(handle);
    }

    pub fn external(&self) -> anyhow::Result<()> {
        info!("call external");
        self.me.get()?.invoke("internal", (), |me, ()| me.internal())
    }

    pub fn internal(&self) -> anyhow::Result<()> {
        info!("call internal");
        Ok(())
    }
}

impl Interceptable for CallServiceV1 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.internalcall.CallServiceV1")
            .method("external", &[], "void")
            .method("internal", &[], "void")
    }
}

pub struct CallServiceV2 {
    provider: ObjectProvider<CallServiceV2>,
}

impl CallServiceV2 {
    pub fn new(provider: ObjectProvider<CallServiceV2>) -> Self {
        Self { provider }
    }

    pub fn external(&self) -> anyhow::Result<()> {
        info!("call external");
        self.provider
            .get()?
            .invoke("internal", (), |me, ()| me.internal())
    }

    pub fn internal(&self) -> anyhow::Result<()> {
        info!("call internal");
        Ok(())
    }
}

impl Interceptable for CallServiceV2 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.internalcall.CallServiceV2")
            .method("external", &[], "void")
            .method("internal", &[], "void")
    }
}

pub struct InternalService;

impl InternalService {
    pub fn internal(&self) -> anyhow::Result<()> {
        info!("call internal");
        Ok(())
    }
}

impl Interceptable for InternalService {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.internalcall.InternalService").method("internal", &[], "void")
    }
}

pub struct CallServiceV3 {
    internal: Arc<ProxyHandle<InternalService>>,
}

impl CallServiceV3 {
    pub fn new(internal: Arc<ProxyHandle<InternalService>>) -> Self {
        Self { internal }
    }

    pub fn external(&self) -> anyhow::Result<()> {
        info!("call external");
        self.internal
            .invoke("internal", (), |service, ()| service.internal())
    }
}

impl Interceptable for CallServiceV3 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("hello.aop.internalcall.CallServiceV3").method("external", &[], "void")
    }
}
