//! 重试通知
//!
//! 失败时重新执行调用链的剩余部分，最多 `max_attempts` 次。
//! 所有错误一视同仁地重试，不做退避、不区分错误类别；
//! 次数用尽后原样抛出最后一次的错误。

use crate::advice::AroundAdvice;
use crate::event::{EventDetail, EventKind};
use crate::joinpoint::ProceedingJoinPoint;
use crate::value::Value;
use tracing::{info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryAdvice {
    max_attempts: u32,
}

impl RetryAdvice {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    /// 小于 1 的次数按 1 处理
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

impl Default for RetryAdvice {
    fn default() -> Self {
        Self::new(Self::DEFAULT_MAX_ATTEMPTS)
    }
}

impl AroundAdvice for RetryAdvice {
    fn around(&self, pjp: &ProceedingJoinPoint<'_, '_>) -> anyhow::Result<Value> {
        let max = self.max_attempts;
        let mut attempt = 1;

        loop {
            info!("[retry] {} try count={}/{}", pjp.signature(), attempt, max);
            pjp.emit(EventKind::RetryAttempt, EventDetail::Attempt { attempt, max });

            match pjp.proceed() {
                Ok(value) => return Ok(value),
                Err(e) if attempt < max => {
                    warn!(
                        "[retry] {} attempt {}/{} failed: {}",
                        pjp.signature(),
                        attempt,
                        max,
                        e
                    );
                    attempt += 1;
                }
                Err(e) => {
                    warn!(
                        "[retry] {} giving up after {} attempts: {}",
                        pjp.signature(),
                        max,
                        e
                    );
                    return Err(e);
                }
            }
        }
    }
}
