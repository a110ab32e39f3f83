//! 通知（Advice）定义
//!
//! 五种回调形状：环绕、前置、返回后、异常后、最终。
//! 除环绕通知外，其余四种在内部都被包装成环绕适配器，
//! 因此调用链上只有一种链节点。

use crate::event::{EventDetail, EventKind};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::pointcut::PointcutRule;
use crate::value::Value;
use std::fmt;
use std::sync::Arc;

/// 通知类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AdviceKind {
    /// 环绕通知（可以控制方法执行）
    Around,
    /// 前置通知
    Before,
    /// 返回后通知（成功返回时执行）
    AfterReturning,
    /// 异常通知（抛出异常时执行）
    AfterThrowing,
    /// 后置通知（无论成功还是失败都执行）
    After,
}

impl AdviceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            AdviceKind::Around => "around",
            AdviceKind::Before => "before",
            AdviceKind::AfterReturning => "after-returning",
            AdviceKind::AfterThrowing => "after-throwing",
            AdviceKind::After => "after",
        }
    }

    /// 是否为 after-* 通知
    pub fn is_after(&self) -> bool {
        matches!(
            self,
            AdviceKind::AfterReturning | AdviceKind::AfterThrowing | AdviceKind::After
        )
    }
}

impl fmt::Display for AdviceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 环绕通知 Trait
///
/// 可以完全控制目标方法的执行：不调用 `proceed` 时真实方法不会执行，
/// 通知自己的返回值即为调用结果。
pub trait AroundAdvice: Send + Sync {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value>;
}

/// 前置通知 Trait
///
/// 返回错误时真实方法不会执行，错误直接传给调用方
pub trait BeforeAdvice: Send + Sync {
    fn before(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()>;
}

/// 返回后通知 Trait
///
/// 返回值只读，无法改变调用方最终拿到的结果
pub trait AfterReturningAdvice: Send + Sync {
    fn after_returning(&self, join_point: &JoinPoint<'_>, result: &Value) -> anyhow::Result<()>;
}

/// 异常通知 Trait
///
/// 只能观察错误，适配器总会把同一个错误继续抛出
pub trait AfterThrowingAdvice: Send + Sync {
    fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &anyhow::Error);
}

/// 后置通知 Trait
///
/// 无论成功还是失败都恰好执行一次
pub trait AfterAdvice: Send + Sync {
    fn after(&self, join_point: &JoinPoint<'_>);
}

struct BeforeAdapter(Arc<dyn BeforeAdvice>);

impl AroundAdvice for BeforeAdapter {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        pjp.emit(EventKind::Before, EventDetail::None);
        self.0.before(pjp.join_point())?;
        pjp.proceed()
    }
}

struct AfterReturningAdapter(Arc<dyn AfterReturningAdvice>);

impl AroundAdvice for AfterReturningAdapter {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        let value = pjp.proceed()?;
        pjp.emit(EventKind::AfterReturning, EventDetail::value(&value));
        self.0.after_returning(pjp.join_point(), &value)?;
        Ok(value)
    }
}

struct AfterThrowingAdapter(Arc<dyn AfterThrowingAdvice>);

impl AroundAdvice for AfterThrowingAdapter {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        pjp.proceed().inspect_err(|error| {
            pjp.emit(EventKind::AfterThrowing, EventDetail::error(error));
            self.0.after_throwing(pjp.join_point(), error);
        })
    }
}

struct AfterAdapter(Arc<dyn AfterAdvice>);

/// 作用域守卫：离开作用域时运行 after 逻辑，包括 panic 展开路径
struct AfterGuard<'p, 'i, 'a> {
    advice: &'p dyn AfterAdvice,
    pjp: &'p ProceedingJoinPoint<'i, 'a>,
}

impl Drop for AfterGuard<'_, '_, '_> {
    fn drop(&mut self) {
        self.pjp.emit(EventKind::After, EventDetail::None);
        self.advice.after(self.pjp.join_point());
    }
}

impl AroundAdvice for AfterAdapter {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        let _guard = AfterGuard {
            advice: self.0.as_ref(),
            pjp,
        };
        pjp.proceed()
    }
}

/// 通知的实现
#[derive(Clone)]
pub enum Advice {
    Around(Arc<dyn AroundAdvice>),
    Before(Arc<dyn BeforeAdvice>),
    AfterReturning(Arc<dyn AfterReturningAdvice>),
    AfterThrowing(Arc<dyn AfterThrowingAdvice>),
    After(Arc<dyn AfterAdvice>),
}

impl Advice {
    pub fn kind(&self) -> AdviceKind {
        match self {
            Advice::Around(_) => AdviceKind::Around,
            Advice::Before(_) => AdviceKind::Before,
            Advice::AfterReturning(_) => AdviceKind::AfterReturning,
            Advice::AfterThrowing(_) => AdviceKind::AfterThrowing,
            Advice::After(_) => AdviceKind::After,
        }
    }

    /// 统一转换为环绕形状
    pub(crate) fn into_around(self) -> Arc<dyn AroundAdvice> {
        match self {
            Advice::Around(advice) => advice,
            Advice::Before(advice) => Arc::new(BeforeAdapter(advice)),
            Advice::AfterReturning(advice) => Arc::new(AfterReturningAdapter(advice)),
            Advice::AfterThrowing(advice) => Arc::new(AfterThrowingAdapter(advice)),
            Advice::After(advice) => Arc::new(AfterAdapter(advice)),
        }
    }
}

impl fmt::Debug for Advice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Advice::{}", self.kind())
    }
}

/// 绑定的切点：直接给出规则，或在构建时解析的表达式
#[derive(Debug, Clone)]
pub enum RuleSource {
    Rule(PointcutRule),
    Expression(String),
}

/// 切点 + 通知 + 优先级
///
/// # 示例
///
/// ```ignore
/// let binding = AdviceBinding::around("tx", "allOrder() && allService()", TransactionAdvice::new())
///     .with_order(1);
/// ```
#[derive(Debug, Clone)]
pub struct AdviceBinding {
    name: String,
    rule: RuleSource,
    advice: Advice,
    order: i32,
}

impl AdviceBinding {
    pub fn new(name: impl Into<String>, rule: impl Into<RuleSource>, advice: Advice) -> Self {
        Self {
            name: name.into(),
            rule: rule.into(),
            advice,
            order: 0,
        }
    }

    pub fn around(
        name: impl Into<String>,
        rule: impl Into<RuleSource>,
        advice: impl AroundAdvice + 'static,
    ) -> Self {
        Self::new(name, rule, Advice::Around(Arc::new(advice)))
    }

    pub fn before(
        name: impl Into<String>,
        rule: impl Into<RuleSource>,
        advice: impl BeforeAdvice + 'static,
    ) -> Self {
        Self::new(name, rule, Advice::Before(Arc::new(advice)))
    }

    pub fn after_returning(
        name: impl Into<String>,
        rule: impl Into<RuleSource>,
        advice: impl AfterReturningAdvice + 'static,
    ) -> Self {
        Self::new(name, rule, Advice::AfterReturning(Arc::new(advice)))
    }

    pub fn after_throwing(
        name: impl Into<String>,
        rule: impl Into<RuleSource>,
        advice: impl AfterThrowingAdvice + 'static,
    ) -> Self {
        Self::new(name, rule, Advice::AfterThrowing(Arc::new(advice)))
    }

    pub fn after(
        name: impl Into<String>,
        rule: impl Into<RuleSource>,
        advice: impl AfterAdvice + 'static,
    ) -> Self {
        Self::new(name, rule, Advice::After(Arc::new(advice)))
    }

    /// 优先级，数值越小越靠外层（越先进入）
    pub fn with_order(mut self, order: i32) -> Self {
        self.order = order;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> AdviceKind {
        self.advice.kind()
    }

    pub fn order(&self) -> i32 {
        self.order
    }

    pub fn rule_source(&self) -> &RuleSource {
        &self.rule
    }

    pub fn advice(&self) -> &Advice {
        &self.advice
    }
}

impl From<PointcutRule> for RuleSource {
    fn from(rule: PointcutRule) -> Self {
        RuleSource::Rule(rule)
    }
}

impl From<&str> for RuleSource {
    fn from(expression: &str) -> Self {
        RuleSource::Expression(expression.to_string())
    }
}

impl From<String> for RuleSource {
    fn from(expression: String) -> Self {
        RuleSource::Expression(expression)
    }
}

/// 用闭包实现环绕通知，见 [`around_fn`]
pub struct AroundFn<F>(F);

/// 由闭包构造环绕通知
///
/// ```ignore
/// let advice = around_fn(|pjp| {
///     info!("enter {}", pjp.signature());
///     pjp.proceed()
/// });
/// ```
pub fn around_fn<F>(f: F) -> AroundFn<F>
where
    F: Fn(&ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> + Send + Sync,
{
    AroundFn(f)
}

impl<F> AroundAdvice for AroundFn<F>
where
    F: Fn(&ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> + Send + Sync,
{
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        (self.0)(pjp)
    }
}

/// 用闭包实现前置通知
pub struct BeforeFn<F>(F);

pub fn before_fn<F>(f: F) -> BeforeFn<F>
where
    F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync,
{
    BeforeFn(f)
}

impl<F> BeforeAdvice for BeforeFn<F>
where
    F: Fn(&JoinPoint<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn before(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()> {
        (self.0)(join_point)
    }
}

/// 用闭包实现返回后通知
pub struct AfterReturningFn<F>(F);

pub fn after_returning_fn<F>(f: F) -> AfterReturningFn<F>
where
    F: Fn(&JoinPoint<'_>, &Value) -> anyhow::Result<()> + Send + Sync,
{
    AfterReturningFn(f)
}

impl<F> AfterReturningAdvice for AfterReturningFn<F>
where
    F: Fn(&JoinPoint<'_>, &Value) -> anyhow::Result<()> + Send + Sync,
{
    fn after_returning(&self, join_point: &JoinPoint<'_>, result: &Value) -> anyhow::Result<()> {
        (self.0)(join_point, result)
    }
}

/// 用闭包实现异常通知
pub struct AfterThrowingFn<F>(F);

pub fn after_throwing_fn<F>(f: F) -> AfterThrowingFn<F>
where
    F: Fn(&JoinPoint<'_>, &anyhow::Error) + Send + Sync,
{
    AfterThrowingFn(f)
}

impl<F> AfterThrowingAdvice for AfterThrowingFn<F>
where
    F: Fn(&JoinPoint<'_>, &anyhow::Error) + Send + Sync,
{
    fn after_throwing(&self, join_point: &JoinPoint<'_>, error: &anyhow::Error) {
        (self.0)(join_point, error)
    }
}

/// 用闭包实现后置通知
pub struct AfterFn<F>(F);

pub fn after_fn<F>(f: F) -> AfterFn<F>
where
    F: Fn(&JoinPoint<'_>) + Send + Sync,
{
    AfterFn(f)
}

impl<F> AfterAdvice for AfterFn<F>
where
    F: Fn(&JoinPoint<'_>) + Send + Sync,
{
    fn after(&self, join_point: &JoinPoint<'_>) {
        (self.0)(join_point)
    }
}
