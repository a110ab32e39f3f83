//! 端到端场景：订单服务的事务、成员服务的两种代理、内部调用与重试

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use weft_aop::prelude::*;
use weft_aop::{AdviceChain, EventKind};

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("weft_aop=debug")
        .with_test_writer()
        .try_init();
}

#[derive(Debug, thiserror::Error)]
#[error("illegal item: {0}")]
struct IllegalItem(String);

// ============================================================================
// 订单
// ============================================================================

struct OrderRepository;

impl OrderRepository {
    fn save(&self, item: &str) -> anyhow::Result<String> {
        if item == "ex" {
            return Err(IllegalItem(item.to_string()).into());
        }
        Ok(format!("ok:{}", item))
    }
}

impl Interceptable for OrderRepository {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.order.OrderRepository").method("save", &["String"], "String")
    }
}

struct OrderService {
    repository: OrderRepository,
}

impl OrderService {
    fn order_item(&self, item: &str) -> anyhow::Result<String> {
        self.repository.save(item)
    }
}

impl Interceptable for OrderService {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.order.OrderService").method("orderItem", &["String"], "String")
    }
}

fn order_registry(sink: Arc<RecordingEventSink>) -> AspectRegistry {
    init_tracing();
    AspectRegistry::builder()
        .pointcut(
            "orderAndService",
            PointcutRule::within_package("app.order", true)
                .unwrap()
                .and(PointcutRule::type_name("*Service").unwrap()),
        )
        .bind(AdviceBinding::around(
            "doTransaction",
            "orderAndService()",
            TransactionAdvice,
        ))
        .sink(sink)
        .build()
        .unwrap()
}

#[test]
fn test_transaction_rolls_back_and_reraises() {
    let sink = Arc::new(RecordingEventSink::new());
    let registry = order_registry(sink.clone());
    let service = registry
        .wrap(
            Arc::new(OrderService {
                repository: OrderRepository,
            }),
            ProxyStrategy::Class,
        )
        .unwrap();

    let err = service
        .invoke("orderItem", ("ex",), |t, (item,)| t.order_item(item))
        .unwrap_err();

    let original = err.downcast_ref::<IllegalItem>().expect("original error");
    assert_eq!(original.0, "ex");
    assert_eq!(
        sink.labels(),
        vec![
            "transaction-start doTransaction",
            "invoke",
            "transaction-rollback doTransaction",
            "resource-release doTransaction",
        ]
    );
}

#[test]
fn test_transaction_commits() {
    let sink = Arc::new(RecordingEventSink::new());
    let registry = order_registry(sink.clone());
    let service = registry
        .wrap(
            Arc::new(OrderService {
                repository: OrderRepository,
            }),
            ProxyStrategy::Class,
        )
        .unwrap();

    let result: String = service
        .invoke("orderItem", ("itemA",), |t, (item,)| t.order_item(item))
        .unwrap();
    assert_eq!(result, "ok:itemA");
    assert_eq!(
        sink.labels(),
        vec![
            "transaction-start doTransaction",
            "invoke",
            "transaction-commit doTransaction",
            "resource-release doTransaction",
        ]
    );

    // 仓库类型名不匹配 *Service，直接调用
    let repository = registry
        .wrap(Arc::new(OrderRepository), ProxyStrategy::Class)
        .unwrap();
    assert!(repository.chain("save").unwrap().is_empty());
}

// ============================================================================
// 通知顺序
// ============================================================================

#[test]
fn test_chain_order_on_same_pointcut() {
    let sink = Arc::new(RecordingEventSink::new());
    let rule = "execution(* app.order.OrderRepository.save(..))";
    let registry = AspectRegistry::builder()
        .bind(AdviceBinding::before("A", rule, before_fn(|_| Ok(()))))
        .bind(AdviceBinding::around(
            "B",
            rule,
            around_fn(|pjp| {
                pjp.emit(EventKind::Custom("around-enter"), EventDetail::None);
                let value = pjp.proceed();
                pjp.emit(EventKind::Custom("around-exit"), EventDetail::None);
                value
            }),
        ))
        .bind(AdviceBinding::after_returning(
            "C",
            rule,
            after_returning_fn(|_, _| Ok(())),
        ))
        .sink(sink.clone())
        .build()
        .unwrap();

    let repository = registry
        .wrap(Arc::new(OrderRepository), ProxyStrategy::Class)
        .unwrap();
    let chain: Arc<AdviceChain> = repository.chain("save").unwrap();
    assert_eq!(chain.names(), vec!["C", "A", "B"]);

    let result: String = repository
        .invoke("save", ("itemA",), |t, (item,)| t.save(item))
        .unwrap();
    assert_eq!(result, "ok:itemA");
    assert_eq!(
        sink.labels(),
        vec!["before A", "around-enter B", "invoke", "around-exit B", "after-return C"]
    );
}

#[test]
fn test_lower_order_wraps_outside() {
    let sink = Arc::new(RecordingEventSink::new());
    let rule = "execution(* app.order..*(..))";
    let registry = AspectRegistry::builder()
        .bind(AdviceBinding::around("doLog", rule, LogAdvice).with_order(2))
        .bind(AdviceBinding::around("doTransaction", rule, TransactionAdvice).with_order(1))
        .sink(sink.clone())
        .build()
        .unwrap();

    let repository = registry
        .wrap(Arc::new(OrderRepository), ProxyStrategy::Class)
        .unwrap();
    let _: String = repository
        .invoke("save", ("itemA",), |t, (item,)| t.save(item))
        .unwrap();
    assert_eq!(
        sink.labels(),
        vec![
            "transaction-start doTransaction",
            "log doLog",
            "invoke",
            "transaction-commit doTransaction",
            "resource-release doTransaction",
        ]
    );
}

// ============================================================================
// 异常通知与显式替换
// ============================================================================

#[test]
fn test_after_throwing_reraises_same_error() {
    let sink = Arc::new(RecordingEventSink::new());
    let seen = Arc::new(AtomicU32::new(0));
    let counter = seen.clone();
    let registry = AspectRegistry::builder()
        .bind(AdviceBinding::after_throwing(
            "observe",
            "execution(* save(..))",
            after_throwing_fn(move |_, error| {
                assert!(error.downcast_ref::<IllegalItem>().is_some());
                counter.fetch_add(1, Ordering::SeqCst);
            }),
        ))
        .bind(AdviceBinding::after(
            "finally",
            "execution(* save(..))",
            after_fn(|_| {}),
        ))
        .sink(sink.clone())
        .build()
        .unwrap();

    let repository = registry
        .wrap(Arc::new(OrderRepository), ProxyStrategy::Class)
        .unwrap();
    let err = repository
        .invoke("save", ("ex",), |t, (item,)| t.save(item))
        .unwrap_err();

    assert!(err.downcast_ref::<IllegalItem>().is_some());
    assert_eq!(seen.load(Ordering::SeqCst), 1);
    assert_eq!(
        sink.labels(),
        vec!["invoke", "after-throw observe", "after-always finally"]
    );
}

#[test]
fn test_substitution_is_recorded() {
    let sink = Arc::new(RecordingEventSink::new());
    let registry = AspectRegistry::builder()
        .bind(AdviceBinding::around(
            "fallback",
            "execution(* save(..))",
            around_fn(|pjp| match pjp.proceed() {
                Ok(value) => Ok(value),
                Err(e) => Ok(pjp.substitute(&e, Value::new("fallback".to_string()))),
            }),
        ))
        .sink(sink.clone())
        .build()
        .unwrap();

    let repository = registry
        .wrap(Arc::new(OrderRepository), ProxyStrategy::Class)
        .unwrap();
    let result: String = repository
        .invoke("save", ("ex",), |t, (item,)| t.save(item))
        .unwrap();
    assert_eq!(result, "fallback");
    assert_eq!(sink.count(EventKind::Substituted), 1);
}

// ============================================================================
// 重试
// ============================================================================

struct FlakyRepository {
    calls: AtomicU32,
    failures: u32,
}

impl FlakyRepository {
    fn new(failures: u32) -> Self {
        Self {
            calls: AtomicU32::new(0),
            failures,
        }
    }

    fn save(&self, item: &str) -> anyhow::Result<String> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            anyhow::bail!("attempt {} failed for {}", call, item);
        }
        Ok(format!("saved:{}", item))
    }
}

impl Interceptable for FlakyRepository {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.exam.ExamRepository").declare(
            MethodSignature::new("", "save")
                .params(["String"])
                .returns("String")
                .marker("Retry"),
        )
    }
}

fn retry_registry(sink: Arc<RecordingEventSink>) -> AspectRegistry {
    init_tracing();
    AspectRegistry::builder()
        .bind(AdviceBinding::around(
            "doRetry",
            "@annotation(Retry)",
            RetryAdvice::new(3),
        ))
        .sink(sink)
        .build()
        .unwrap()
}

#[test]
fn test_retry_recovers_on_third_attempt() {
    let sink = Arc::new(RecordingEventSink::new());
    let repository = retry_registry(sink.clone())
        .wrap(Arc::new(FlakyRepository::new(2)), ProxyStrategy::Class)
        .unwrap();

    let result: String = repository
        .invoke("save", ("data",), |t, (item,)| t.save(item))
        .unwrap();
    assert_eq!(result, "saved:data");
    assert_eq!(repository.target().unwrap().calls.load(Ordering::SeqCst), 3);
    assert_eq!(sink.count(EventKind::RetryAttempt), 3);
    assert_eq!(sink.count(EventKind::Invoke), 3);
}

#[test]
fn test_retry_exhausted_returns_last_error() {
    let sink = Arc::new(RecordingEventSink::new());
    let repository = retry_registry(sink.clone())
        .wrap(Arc::new(FlakyRepository::new(10)), ProxyStrategy::Class)
        .unwrap();

    let err = repository
        .invoke("save", ("data",), |t, (item,)| t.save(item))
        .unwrap_err();
    assert_eq!(err.to_string(), "attempt 3 failed for data");
    assert_eq!(repository.target().unwrap().calls.load(Ordering::SeqCst), 3);
}

// ============================================================================
// 成员服务：接口代理与类代理
// ============================================================================

struct MemberServiceImpl;

impl MemberServiceImpl {
    fn hello(&self, param: &str) -> anyhow::Result<String> {
        Ok(format!("ok {}", param))
    }

    fn internal(&self, param: &str) -> anyhow::Result<String> {
        Ok(format!("internal {}", param))
    }
}

impl Interceptable for MemberServiceImpl {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.member.MemberServiceImpl")
            .implements("app.member.MemberService")
            .method("hello", &["String"], "String")
            .method("internal", &["String"], "String")
    }

    fn supertype_descriptors() -> Vec<TypeDescriptor> {
        vec![TypeDescriptor::interface("app.member.MemberService").method(
            "hello",
            &["String"],
            "String",
        )]
    }
}

fn member_registry(rule: &str) -> AspectRegistry {
    init_tracing();
    AspectRegistry::builder()
        .interceptable::<MemberServiceImpl>()
        .bind(AdviceBinding::around("doLog", rule, LogAdvice))
        .sink(Arc::new(RecordingEventSink::new()))
        .build()
        .unwrap()
}

#[test]
fn test_supertype_rule_matches_only_declared_methods() {
    let registry = member_registry("execution(* app.member.MemberService.*(..))");
    let handle = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Class)
        .unwrap();

    assert_eq!(handle.chain("hello").unwrap().names(), vec!["doLog"]);
    assert!(handle.chain("internal").unwrap().is_empty());
}

#[test]
fn test_this_depends_on_strategy() {
    let registry = member_registry("this(app.member.MemberServiceImpl)");

    let class_proxy = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Class)
        .unwrap();
    assert_eq!(class_proxy.chain("hello").unwrap().names(), vec!["doLog"]);

    let interface_proxy = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Interface)
        .unwrap();
    assert!(interface_proxy.chain("hello").unwrap().is_empty());

    // target 看的是真实目标，两种策略都匹配
    let registry = member_registry("target(app.member.MemberServiceImpl)");
    let interface_proxy = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Interface)
        .unwrap();
    assert_eq!(interface_proxy.chain("hello").unwrap().names(), vec!["doLog"]);
}

#[test]
fn test_proxy_introspection() {
    let registry = member_registry("execution(* app.member..*(..))");

    let class_proxy = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Class)
        .unwrap();
    assert_eq!(
        class_proxy.proxy_type_name(),
        "app.member.MemberServiceImpl$$WeftProxy"
    );
    assert!(class_proxy.is_instance_of("app.member.MemberServiceImpl"));
    assert!(class_proxy.is_instance_of("app.member.MemberService"));

    let interface_proxy = registry
        .wrap(Arc::new(MemberServiceImpl), ProxyStrategy::Interface)
        .unwrap();
    assert_eq!(interface_proxy.proxy_type_name(), "$Proxy(MemberService)");
    assert!(!interface_proxy.is_instance_of("app.member.MemberServiceImpl"));
    let keys: Vec<String> = interface_proxy
        .exposed_methods()
        .iter()
        .map(|m| m.key())
        .collect();
    assert_eq!(keys, vec!["hello(String)"]);
}

// ============================================================================
// 内部调用
// ============================================================================

struct CallService;

impl CallService {
    fn external(&self) -> anyhow::Result<String> {
        self.internal()
    }

    fn internal(&self) -> anyhow::Result<String> {
        Ok("internal".to_string())
    }
}

impl Interceptable for CallService {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.internalcall.CallService")
            .method("external", &[], "String")
            .method("internal", &[], "String")
    }
}

/// 通过 setter 注入拿到自己的代理
struct CallServiceV1 {
    me: SelfRef<CallServiceV1>,
}

impl CallServiceV1 {
    fn external(&self) -> anyhow::Result<String> {
        let me = self.me.get()?;
        me.invoke("internal", (), |t, ()| t.internal())
    }

    fn internal(&self) -> anyhow::Result<String> {
        Ok("internal".to_string())
    }
}

impl Interceptable for CallServiceV1 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.internalcall.CallServiceV1")
            .method("external", &[], "String")
            .method("internal", &[], "String")
    }
}

/// 通过延迟查找拿到自己的代理
struct CallServiceV2 {
    provider: ObjectProvider<CallServiceV2>,
}

impl CallServiceV2 {
    fn external(&self) -> anyhow::Result<String> {
        let me = self.provider.get()?;
        me.invoke("internal", (), |t, ()| t.internal())
    }

    fn internal(&self) -> anyhow::Result<String> {
        Ok("internal".to_string())
    }
}

impl Interceptable for CallServiceV2 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.internalcall.CallServiceV2")
            .method("external", &[], "String")
            .method("internal", &[], "String")
    }
}

/// 拆分为两个组件
struct InternalService;

impl InternalService {
    fn internal(&self) -> anyhow::Result<String> {
        Ok("internal".to_string())
    }
}

impl Interceptable for InternalService {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.internalcall.InternalService").method("internal", &[], "String")
    }
}

struct CallServiceV3 {
    internal: Arc<ProxyHandle<InternalService>>,
}

impl CallServiceV3 {
    fn external(&self) -> anyhow::Result<String> {
        self.internal.invoke("internal", (), |t, ()| t.internal())
    }
}

impl Interceptable for CallServiceV3 {
    fn type_descriptor() -> TypeDescriptor {
        TypeDescriptor::class("app.internalcall.CallServiceV3").method("external", &[], "String")
    }
}

fn call_container(sink: Arc<RecordingEventSink>) -> Arc<ProxyContainer> {
    init_tracing();
    let registry = AspectRegistry::builder()
        .bind(AdviceBinding::around(
            "doLog",
            "execution(* app.internalcall..*(..))",
            LogAdvice,
        ))
        .sink(sink)
        .build()
        .unwrap();
    ProxyContainer::new(registry)
}

fn log_signatures(sink: &RecordingEventSink) -> Vec<String> {
    sink.events()
        .into_iter()
        .filter(|event| event.kind == EventKind::Custom("log"))
        .map(|event| event.signature)
        .collect()
}

#[test]
fn test_self_invocation_bypasses_advice() {
    let sink = Arc::new(RecordingEventSink::new());
    let container = call_container(sink.clone());
    let service = container
        .register("callService", Arc::new(CallService), ProxyStrategy::Class)
        .unwrap();

    let result: String = service
        .invoke("external", (), |t, ()| t.external())
        .unwrap();
    assert_eq!(result, "internal");
    assert_eq!(
        log_signatures(&sink),
        vec!["String app.internalcall.CallService.external()"]
    );
}

#[test]
fn test_self_reference_routes_through_proxy() {
    let sink = Arc::new(RecordingEventSink::new());
    let container = call_container(sink.clone());
    let service = container
        .register(
            "callServiceV1",
            Arc::new(CallServiceV1 {
                me: SelfRef::new("callServiceV1"),
            }),
            ProxyStrategy::Class,
        )
        .unwrap();
    service.target().unwrap().me.set(&service);

    service
        .invoke("external", (), |t, ()| t.external())
        .unwrap();
    assert_eq!(
        log_signatures(&sink),
        vec![
            "String app.internalcall.CallServiceV1.external()",
            "String app.internalcall.CallServiceV1.internal()",
        ]
    );
}

#[test]
fn test_eager_self_lookup_fails_during_creation() {
    let container = call_container(Arc::new(RecordingEventSink::new()));
    let err = container
        .register_with("callServiceV1", ProxyStrategy::Class, |c| {
            c.get_concrete::<CallServiceV1>("callServiceV1")?;
            Ok(CallServiceV1 {
                me: SelfRef::new("callServiceV1"),
            })
        })
        .unwrap_err();
    assert_eq!(err, AopError::CurrentlyInCreation("callServiceV1".to_string()));
}

#[test]
fn test_lazy_provider_routes_through_proxy() {
    let sink = Arc::new(RecordingEventSink::new());
    let container = call_container(sink.clone());
    let service = container
        .register_with("callServiceV2", ProxyStrategy::Class, |c| {
            Ok(CallServiceV2 {
                provider: c.provider("callServiceV2"),
            })
        })
        .unwrap();

    service
        .invoke("external", (), |t, ()| t.external())
        .unwrap();
    assert_eq!(log_signatures(&sink).len(), 2);
}

#[test]
fn test_split_components_route_through_proxy() {
    let sink = Arc::new(RecordingEventSink::new());
    let container = call_container(sink.clone());
    let internal = container
        .register("internalService", Arc::new(InternalService), ProxyStrategy::Class)
        .unwrap();
    let service = container
        .register(
            "callServiceV3",
            Arc::new(CallServiceV3 { internal }),
            ProxyStrategy::Class,
        )
        .unwrap();

    service
        .invoke("external", (), |t, ()| t.external())
        .unwrap();
    assert_eq!(
        log_signatures(&sink),
        vec![
            "String app.internalcall.CallServiceV3.external()",
            "String app.internalcall.InternalService.internal()",
        ]
    );
}

// ============================================================================
// 并发
// ============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_calls_share_one_chain() {
    let sink = Arc::new(RecordingEventSink::new());
    let registry = order_registry(sink.clone());
    let service = Arc::new(
        registry
            .wrap(
                Arc::new(OrderService {
                    repository: OrderRepository,
                }),
                ProxyStrategy::Class,
            )
            .unwrap(),
    );

    let mut tasks = Vec::new();
    for i in 0..16 {
        let service = Arc::clone(&service);
        tasks.push(tokio::task::spawn_blocking(move || {
            let item = format!("item{}", i);
            let result: String = service
                .invoke("orderItem", (item.as_str(),), |t, (item,)| t.order_item(item))
                .unwrap();
            assert_eq!(result, format!("ok:{}", item));
            service.chain("orderItem").unwrap()
        }));
    }

    let mut chains = Vec::new();
    for task in tasks {
        chains.push(task.await.unwrap());
    }

    assert!(chains.windows(2).all(|w| Arc::ptr_eq(&w[0], &w[1])));
    assert_eq!(sink.count(EventKind::Invoke), 16);
    assert_eq!(sink.count(EventKind::Custom("transaction-commit")), 16);
}
