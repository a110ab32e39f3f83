mod services;

use services::*;
use std::path::Path;
use std::sync::Arc;
use tracing::{info, warn};
use weft_aop::prelude::*;
use weft_core::prelude::*;

// ==================== 切面配置 ====================

fn build_registry(properties: &AopProperties) -> AopResult<AspectRegistry> {
    AspectRegistry::builder()
        .interceptable::<MemberServiceImpl>()
        .pointcut_expr("allOrder", "execution(* hello.aop.order..*(..))")
        .pointcut_expr("allService", "execution(* *..*Service.*(..))")
        .pointcut(
            "orderAndService",
            PointcutRule::within_package("hello.aop.order", true)?
                .and(PointcutRule::type_name("*Service")?),
        )
        .bind(AdviceBinding::around("doLog", "allOrder()", LogAdvice).with_order(2))
        .bind(
            AdviceBinding::around("doTransaction", "orderAndService()", TransactionAdvice)
                .with_order(1),
        )
        .bind(AdviceBinding::around(
            "doRetry",
            "@annotation(Retry)",
            properties.retry_advice(),
        ))
        .bind(AdviceBinding::before("doTrace", "@annotation(Trace)", TraceAdvice))
        .bind(AdviceBinding::around(
            "doLogInternalCall",
            "execution(* hello.aop.internalcall..*(..))",
            LogAdvice,
        ))
        .properties(properties)
        .build()
}

fn load_environment() -> anyhow::Result<Environment> {
    let env = Environment::new();

    let config_path = Path::new(env!("CARGO_MANIFEST_DIR")).join("application.toml");
    if config_path.exists() {
        env.add_property_source(Box::new(TomlPropertySource::from_file(&config_path)?));
    }
    env.add_property_source(Box::new(EnvironmentPropertySource::new("APP")));

    Ok(env)
}

fn banner(title: &str) {
    println!("\n╔════════════════════════════════════════════════════╗");
    println!("║  {:<50}║", title);
    println!("╚════════════════════════════════════════════════════╝\n");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let env = load_environment()?;
    LoggingConfig::from_environment(&env)?.init()?;

    let properties = AopProperties::from_environment(&env)?;
    let registry = build_registry(&properties)?;
    let container = ProxyContainer::new(registry);
    let strategy = container.registry().default_strategy();

    banner("Weft AOP - Order Demo");
    println!("📦 Proxy strategy: {}", strategy);
    println!("   Retry attempts: {}", properties.retry_max_attempts);
    println!("   Event sink: {}", properties.events);

    // ==================== 订单 ====================

    banner("Order: log + transaction");

    let repository = container.register("orderRepository", Arc::new(OrderRepository), strategy)?;
    let order_service = container.register(
        "orderService",
        Arc::new(OrderService::new(repository)),
        strategy,
    )?;

    order_service.invoke("orderItem", ("itemA",), |service, (item,)| {
        service.order_item(item)
    })?;

    match order_service.invoke("orderItem", ("ex",), |service, (item,)| service.order_item(item)) {
        Ok(()) => warn!("expected orderItem(ex) to fail"),
        Err(e) => match e.downcast_ref::<IllegalItem>() {
            Some(original) => println!("✅ Caller received the original error: {}", original),
            None => return Err(e),
        },
    }

    // ==================== 成员 ====================

    banner("Member: interface vs class proxy");

    let member = container.register(
        "memberService",
        Arc::new(MemberServiceImpl),
        ProxyStrategy::Interface,
    )?;
    println!("🔧 {} -> {:?}", member.proxy_type_name(), member.type_lineage());
    println!("   Response: {}", member.hello("helloA")?);

    match container.get_concrete::<MemberServiceImpl>("memberService") {
        Ok(_) => warn!("interface proxy should not be usable as MemberServiceImpl"),
        Err(e) => println!("✅ Concrete lookup rejected: {}", e),
    }

    let class_member = container.registry().wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Class)?;
    println!("🔧 {} -> {:?}", class_member.proxy_type_name(), class_member.type_lineage());
    let internal: String =
        class_member.invoke("internal", ("helloB",), |target, (param,)| target.internal(param))?;
    println!("   Response: {}", internal);

    // ==================== 重试 ====================

    banner("Exam: retry");

    let exam = container.register("examRepository", Arc::new(ExamRepository::default()), strategy)?;
    for i in 0..5 {
        let item = format!("data{}", i);
        let result: String = exam.invoke("save", (item.as_str(),), |repository, (item,)| {
            repository.save(item)
        })?;
        info!("{}", result);
    }

    // ==================== 内部调用 ====================

    banner("Internal call");

    let v0 = container.register("callServiceV0", Arc::new(CallServiceV0), strategy)?;
    println!("🔧 V0: direct self call, internal() is not advised");
    v0.invoke("external", (), |service, ()| service.external())?;

    println!("\n🔧 V1: eager self lookup during construction");
    let eager = container.register_with("callServiceV1", strategy, |c| {
        c.get_concrete::<CallServiceV1>("callServiceV1")?;
        Ok(CallServiceV1::new("callServiceV1"))
    });
    if let Err(e) = eager {
        println!("   ✅ {}", e);
    }

    println!("\n🔧 V1: setter self injection");
    let v1 = container.register(
        "callServiceV1",
        Arc::new(CallServiceV1::new("callServiceV1")),
        strategy,
    )?;
    v1.target()?.set_self(&v1);
    v1.invoke("external", (), |service, ()| service.external())?;

    println!("\n🔧 V2: lazy provider");
    let v2 = container.register_with("callServiceV2", strategy, |c| {
        Ok(CallServiceV2::new(c.provider("callServiceV2")))
    })?;
    v2.invoke("external", (), |service, ()| service.external())?;

    println!("\n🔧 V3: split into two components");
    let internal_service = container.register("internalService", Arc::new(InternalService), strategy)?;
    let v3 = container.register(
        "callServiceV3",
        Arc::new(CallServiceV3::new(internal_service)),
        strategy,
    )?;
    v3.invoke("external", (), |service, ()| service.external())?;

    // ==================== 并发 ====================

    banner("Concurrent calls");

    let mut tasks = Vec::new();
    for i in 0..8 {
        let service = Arc::clone(&order_service);
        tasks.push(tokio::task::spawn_blocking(move || {
            let item = format!("item{}", i);
            service.invoke("orderItem", (item.as_str(),), |service, (item,)| {
                service.order_item(item)
            })
        }));
    }
    for task in tasks {
        task.await??;
    }

    banner("Application Finished");
    println!("📋 Components: {:?}", container.names());

    Ok(())
}
