//! 连接点（JoinPoint）与调用游标
//!
//! 一次经过代理的调用对应一个 [`Invocation`]：它记录参数、目标对象以及
//! 当前走到调用链的哪一环。`Invocation` 每次调用新建、调用结束即丢弃，
//! 内部状态使用 `Cell`，因此既不能跨线程共享也不能跨调用复用。

use crate::chain::ChainLink;
use crate::error::AopError;
use crate::event::{AdviceEvent, EventDetail, EventKind, EventSink};
use crate::proxy::ProxyStrategy;
use crate::signature::MethodSignature;
use crate::value::Value;
use std::any::Any;
use std::cell::Cell;
use std::fmt;
use std::time::{Duration, Instant};
use tracing::warn;

/// 连接点信息
///
/// 包含方法调用时的上下文信息
pub struct JoinPoint<'a> {
    signature: &'a MethodSignature,
    target: &'a dyn Any,
    args: &'a dyn fmt::Debug,
    strategy: ProxyStrategy,
    sink: &'a dyn EventSink,
    timestamp: Instant,
}

impl<'a> JoinPoint<'a> {
    pub fn new(
        signature: &'a MethodSignature,
        target: &'a dyn Any,
        args: &'a dyn fmt::Debug,
        strategy: ProxyStrategy,
        sink: &'a dyn EventSink,
    ) -> Self {
        Self {
            signature,
            target,
            args,
            strategy,
            sink,
            timestamp: Instant::now(),
        }
    }

    pub fn signature(&self) -> &'a MethodSignature {
        self.signature
    }

    /// 尝试以具体类型访问真实目标
    pub fn target<T: Any>(&self) -> Option<&'a T> {
        self.target.downcast_ref::<T>()
    }

    /// 参数的调试表示
    pub fn args_debug(&self) -> String {
        format!("{:?}", self.args)
    }

    pub fn strategy(&self) -> ProxyStrategy {
        self.strategy
    }

    /// 获取调用时间戳
    pub fn timestamp(&self) -> Instant {
        self.timestamp
    }

    pub fn elapsed(&self) -> Duration {
        self.timestamp.elapsed()
    }

    /// 以 `advice` 的名义发出事件
    pub fn emit(&self, kind: EventKind, advice: &str, detail: EventDetail) {
        self.sink.publish(&AdviceEvent {
            kind,
            advice: advice.to_string(),
            signature: self.signature.to_string(),
            detail,
        });
    }
}

impl fmt::Debug for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JoinPoint")
            .field("signature", &self.signature.to_string())
            .field("args", &self.args)
            .field("strategy", &self.strategy)
            .field("timestamp", &self.timestamp)
            .finish()
    }
}

impl fmt::Display for JoinPoint<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.signature)
    }
}

/// 调用状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InvocationState {
    Pending,
    Proceeding,
    Completed,
    Failed,
}

impl InvocationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, InvocationState::Completed | InvocationState::Failed)
    }
}

/// 一次在途调用的游标
pub struct Invocation<'a> {
    join_point: JoinPoint<'a>,
    links: &'a [ChainLink],
    terminal: &'a dyn Fn() -> anyhow::Result<Value>,
    state: Cell<InvocationState>,
    target_calls: Cell<u32>,
}

impl<'a> Invocation<'a> {
    pub fn new(
        join_point: JoinPoint<'a>,
        links: &'a [ChainLink],
        terminal: &'a dyn Fn() -> anyhow::Result<Value>,
    ) -> Self {
        Self {
            join_point,
            links,
            terminal,
            state: Cell::new(InvocationState::Pending),
            target_calls: Cell::new(0),
        }
    }

    pub fn join_point(&self) -> &JoinPoint<'a> {
        &self.join_point
    }

    pub fn state(&self) -> InvocationState {
        self.state.get()
    }

    /// 真实方法被执行的次数
    pub fn target_calls(&self) -> u32 {
        self.target_calls.get()
    }

    /// 从位置 0 开始执行调用链，结束后进入终态
    ///
    /// 已处于终态的调用不能再次执行，状态保持不变。
    pub fn run(&self) -> anyhow::Result<Value> {
        if self.state.get().is_terminal() {
            return Err(self.completed_error());
        }
        let result = self.proceed_from(0);
        self.state.set(if result.is_ok() {
            InvocationState::Completed
        } else {
            InvocationState::Failed
        });
        result
    }

    fn proceed_from(&self, position: usize) -> anyhow::Result<Value> {
        if self.state.get().is_terminal() {
            return Err(self.completed_error());
        }
        self.state.set(InvocationState::Proceeding);

        match self.links.get(position) {
            Some(link) => {
                let pjp = ProceedingJoinPoint {
                    invocation: self,
                    position,
                };
                link.advice.around(&pjp)
            }
            None => {
                self.target_calls.set(self.target_calls.get() + 1);
                self.join_point
                    .emit(EventKind::Invoke, "", EventDetail::None);
                (self.terminal)()
            }
        }
    }
}

impl Invocation<'_> {
    fn completed_error(&self) -> anyhow::Error {
        AopError::ProceedCalledAfterCompletion(self.join_point.signature.to_string()).into()
    }
}

impl fmt::Debug for Invocation<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Invocation")
            .field("join_point", &self.join_point)
            .field("links", &self.links.len())
            .field("state", &self.state.get())
            .field("target_calls", &self.target_calls.get())
            .finish()
    }
}

/// 环绕通知看到的连接点
///
/// 允许切面控制是否、何时以及多少次继续执行调用链的剩余部分
pub struct ProceedingJoinPoint<'i, 'a> {
    invocation: &'i Invocation<'a>,
    position: usize,
}

impl<'i, 'a> ProceedingJoinPoint<'i, 'a> {
    /// 继续执行调用链的下一环
    ///
    /// 可以调用零次、一次或多次；每次都从下一环重新开始。
    pub fn proceed(&self) -> anyhow::Result<Value> {
        self.invocation.proceed_from(self.position + 1)
    }

    pub fn join_point(&self) -> &'i JoinPoint<'a> {
        &self.invocation.join_point
    }

    pub fn signature(&self) -> &'a MethodSignature {
        self.invocation.join_point.signature
    }

    /// 当前通知的名称
    pub fn advice_name(&self) -> &'a str {
        &self.invocation.links[self.position].name
    }

    /// 以当前通知的名义发出事件
    pub fn emit(&self, kind: EventKind, detail: EventDetail) {
        self.invocation
            .join_point
            .emit(kind, self.advice_name(), detail);
    }

    /// 显式地用 `value` 替换失败
    ///
    /// 替换会产生一条 `substituted` 事件，供审计。
    pub fn substitute(&self, error: &anyhow::Error, value: Value) -> Value {
        warn!(
            "Advice '{}' replaced failure of {} with {:?}: {}",
            self.advice_name(),
            self.signature(),
            value,
            error
        );
        self.emit(EventKind::Substituted, EventDetail::error(error));
        value
    }
}

impl fmt::Debug for ProceedingJoinPoint<'_, '_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProceedingJoinPoint")
            .field("join_point", &self.invocation.join_point)
            .field("position", &self.position)
            .finish()
    }
}
