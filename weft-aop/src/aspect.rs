//! 切面（Aspect）定义
//!
//! 切面把一组相关的通知绑定打包在一起，注册时一次性展开。
//! 这里同时提供几个常用的现成通知。

use crate::advice::{AdviceBinding, AroundAdvice, BeforeAdvice};
use crate::error_info::ErrorInfo;
use crate::event::{EventDetail, EventKind};
use crate::joinpoint::{JoinPoint, ProceedingJoinPoint};
use crate::value::Value;
use tracing::{info, warn};

/// 切面 Trait
///
/// 实现此 trait 以把多条通知作为一个整体注册
pub trait Aspect: Send + Sync {
    /// 切面名称
    fn name(&self) -> &str;

    /// 切面包含的通知绑定，按声明顺序
    fn bindings(&self) -> Vec<AdviceBinding>;
}

// ============================================================================
// 预定义的常用通知
// ============================================================================

/// 日志通知 - 记录方法调用
#[derive(Debug, Clone, Copy, Default)]
pub struct LogAdvice;

impl AroundAdvice for LogAdvice {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        let args = pjp.join_point().args_debug();
        info!("[log] {} args={}", pjp.signature(), args);
        pjp.emit(EventKind::Custom("log"), EventDetail::message(format!("args={}", args)));
        pjp.proceed()
    }
}

/// 事务通知
///
/// 只模拟事务的日志：开始、提交或回滚，最后释放资源。
/// 失败时错误原样传给调用方。
#[derive(Debug, Clone, Copy, Default)]
pub struct TransactionAdvice;

/// 离开作用域即释放资源，覆盖所有退出路径
struct ResourceRelease<'p, 'i, 'a> {
    pjp: &'p ProceedingJoinPoint<'i, 'a>,
}

impl Drop for ResourceRelease<'_, '_, '_> {
    fn drop(&mut self) {
        info!("[resource release] {}", self.pjp.signature());
        self.pjp
            .emit(EventKind::Custom("resource-release"), EventDetail::None);
    }
}

impl AroundAdvice for TransactionAdvice {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        let _release = ResourceRelease { pjp };

        info!("[transaction start] {}", pjp.signature());
        pjp.emit(EventKind::Custom("transaction-start"), EventDetail::None);

        let result = pjp.proceed();
        match &result {
            Ok(_) => {
                info!("[transaction commit] {}", pjp.signature());
                pjp.emit(EventKind::Custom("transaction-commit"), EventDetail::None);
            }
            Err(e) => {
                warn!(
                    "[transaction rollback] {}: {}",
                    pjp.signature(),
                    ErrorInfo::from_anyhow(e).full_description()
                );
                pjp.emit(
                    EventKind::Custom("transaction-rollback"),
                    EventDetail::error(e),
                );
            }
        }
        result
    }
}

/// 跟踪通知 - 记录签名和参数
#[derive(Debug, Clone, Copy, Default)]
pub struct TraceAdvice;

impl BeforeAdvice for TraceAdvice {
    fn before(&self, join_point: &JoinPoint<'_>) -> anyhow::Result<()> {
        info!(
            "[trace] {} args={}",
            join_point.signature(),
            join_point.args_debug()
        );
        Ok(())
    }
}
