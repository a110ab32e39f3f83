//! 错误信息结构
//!
//! 把 `anyhow::Error` 展开成可序列化的结构，供观察事件携带

use serde::Serialize;

/// 结构化的错误信息
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ErrorInfo {
    /// 错误消息（最外层）
    pub message: String,

    /// 错误源链（cause chain），不含最外层
    pub source_chain: Vec<String>,
}

impl ErrorInfo {
    pub fn from_anyhow(error: &anyhow::Error) -> Self {
        let mut chain = error.chain();
        let message = chain
            .next()
            .map(ToString::to_string)
            .unwrap_or_default();
        let source_chain = chain.map(ToString::to_string).collect();

        Self {
            message,
            source_chain,
        }
    }

    /// 创建简单的 ErrorInfo（只包含消息）
    pub fn simple(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            source_chain: Vec::new(),
        }
    }

    /// 获取完整的错误描述（包含源链）
    pub fn full_description(&self) -> String {
        if self.source_chain.is_empty() {
            self.message.clone()
        } else {
            format!(
                "{}\nCaused by:\n  {}",
                self.message,
                self.source_chain.join("\n  ")
            )
        }
    }
}
