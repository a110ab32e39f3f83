//! 观察事件
//!
//! 每个通知在关键时刻向注入的 [`EventSink`] 发出结构化事件。
//! 引擎只定义事件的形状，事件去向由 sink 决定。

use crate::error_info::ErrorInfo;
use parking_lot::Mutex;
use serde::{Serialize, Serializer};
use std::fmt;
use std::io::Write;
use tracing::{debug, info, warn};

/// 事件类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Before,
    AfterReturning,
    AfterThrowing,
    After,
    RetryAttempt,
    /// 调用链到达真实方法
    Invoke,
    /// 环绕通知显式地用返回值替换了错误
    Substituted,
    /// 通知自定义的事件，例如 `transaction-start`
    Custom(&'static str),
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::Before => "before",
            EventKind::AfterReturning => "after-return",
            EventKind::AfterThrowing => "after-throw",
            EventKind::After => "after-always",
            EventKind::RetryAttempt => "retry-attempt",
            EventKind::Invoke => "invoke",
            EventKind::Substituted => "substituted",
            EventKind::Custom(label) => *label,
        }
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl Serialize for EventKind {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

/// 事件附带的数据
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventDetail {
    None,
    /// 返回值的调试表示
    Value { value: String },
    Error(ErrorInfo),
    Attempt { attempt: u32, max: u32 },
    Message { text: String },
}

impl EventDetail {
    pub fn value(value: &impl fmt::Debug) -> Self {
        EventDetail::Value {
            value: format!("{:?}", value),
        }
    }

    pub fn error(error: &anyhow::Error) -> Self {
        EventDetail::Error(ErrorInfo::from_anyhow(error))
    }

    pub fn message(text: impl Into<String>) -> Self {
        EventDetail::Message { text: text.into() }
    }
}

impl fmt::Display for EventDetail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EventDetail::None => Ok(()),
            EventDetail::Value { value } => write!(f, "value={}", value),
            EventDetail::Error(info) => write!(f, "error={}", info.message),
            EventDetail::Attempt { attempt, max } => write!(f, "attempt={}/{}", attempt, max),
            EventDetail::Message { text } => f.write_str(text),
        }
    }
}

/// 通知事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdviceEvent {
    pub kind: EventKind,
    /// 发出事件的通知名称
    pub advice: String,
    pub signature: String,
    pub detail: EventDetail,
}

impl AdviceEvent {
    /// 简短标签：`before A`、`after-return C`、`invoke`
    pub fn label(&self) -> String {
        if self.advice.is_empty() {
            self.kind.to_string()
        } else {
            format!("{} {}", self.kind, self.advice)
        }
    }
}

impl fmt::Display for AdviceEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}]", self.label(), self.signature)?;
        if self.detail != EventDetail::None {
            write!(f, " {}", self.detail)?;
        }
        Ok(())
    }
}

/// 事件接收端
pub trait EventSink: Send + Sync {
    fn publish(&self, event: &AdviceEvent);
}

/// 默认 sink：每个事件对应一条 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingEventSink;

impl EventSink for TracingEventSink {
    fn publish(&self, event: &AdviceEvent) {
        match event.kind {
            EventKind::Invoke => debug!(
                kind = %event.kind,
                signature = %event.signature,
                "🔷 [AOP] {}",
                event
            ),
            EventKind::AfterThrowing | EventKind::Substituted => warn!(
                kind = %event.kind,
                advice = %event.advice,
                signature = %event.signature,
                "🔷 [AOP] {}",
                event
            ),
            _ => info!(
                kind = %event.kind,
                advice = %event.advice,
                signature = %event.signature,
                "🔷 [AOP] {}",
                event
            ),
        }
    }
}

/// 丢弃所有事件
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopEventSink;

impl EventSink for NoopEventSink {
    fn publish(&self, _event: &AdviceEvent) {}
}

/// 记录所有事件，供测试断言
#[derive(Debug, Default)]
pub struct RecordingEventSink {
    events: Mutex<Vec<AdviceEvent>>,
}

impl RecordingEventSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<AdviceEvent> {
        self.events.lock().clone()
    }

    pub fn labels(&self) -> Vec<String> {
        self.events.lock().iter().map(AdviceEvent::label).collect()
    }

    pub fn count(&self, kind: EventKind) -> usize {
        self.events.lock().iter().filter(|e| e.kind == kind).count()
    }

    pub fn clear(&self) {
        self.events.lock().clear();
    }
}

impl EventSink for RecordingEventSink {
    fn publish(&self, event: &AdviceEvent) {
        self.events.lock().push(event.clone());
    }
}

/// 每个事件写一行 JSON
pub struct JsonLinesEventSink {
    writer: Mutex<Box<dyn Write + Send>>,
}

impl JsonLinesEventSink {
    pub fn new(writer: impl Write + Send + 'static) -> Self {
        Self {
            writer: Mutex::new(Box::new(writer)),
        }
    }

    pub fn stdout() -> Self {
        Self::new(std::io::stdout())
    }
}

impl EventSink for JsonLinesEventSink {
    fn publish(&self, event: &AdviceEvent) {
        let mut writer = self.writer.lock();
        let result = serde_json::to_writer(&mut *writer, event)
            .map_err(std::io::Error::from)
            .and_then(|_| writeln!(writer));
        if let Err(e) = result {
            warn!("Failed to write advice event: {}", e);
        }
    }
}

impl fmt::Debug for JsonLinesEventSink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("JsonLinesEventSink").finish_non_exhaustive()
    }
}
