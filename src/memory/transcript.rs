//! 运行 Transcript：只追加的事件日志
//!
//! 记录一次运行中所有可观察事件（目标、思考、工具调用、结果、错误、最终回复、摘要），
//! 条目顺序是 UI 回放的唯一依据。没有修改或删除接口；重置运行时直接换一份新日志。

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::{Map, Value};

/// 条目类型
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryKind {
    /// 用户目标
    User,
    /// 会话引擎的叙述性输出
    Thought,
    /// 提议的工具调用
    Call,
    /// 工具返回（展示用截断）
    Result,
    /// 致命错误或用户拒绝
    Error,
    /// 运行结束时合成的最终回复
    Response,
    /// 计划摘要
    Summary,
    /// 既无工具调用也无完成信号时自动推进的步骤
    AutoAdvance,
}

/// 单条记录
#[derive(Clone, Debug, Serialize)]
pub struct TranscriptEntry {
    pub id: u64,
    #[serde(rename = "type")]
    pub kind: EntryKind,
    pub text: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub tool_args: Option<Map<String, Value>>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Clone, Debug, Default)]
pub struct TranscriptLog {
    entries: Vec<TranscriptEntry>,
    next_id: u64,
}

impl TranscriptLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn append(&mut self, kind: EntryKind, text: impl Into<String>) -> &TranscriptEntry {
        self.push(kind, text.into(), None, None)
    }

    /// 带工具名与参数的条目（call / result）
    pub fn append_tool(
        &mut self,
        kind: EntryKind,
        text: impl Into<String>,
        tool_name: &str,
        tool_args: Option<Map<String, Value>>,
    ) -> &TranscriptEntry {
        self.push(kind, text.into(), Some(tool_name.to_string()), tool_args)
    }

    fn push(
        &mut self,
        kind: EntryKind,
        text: String,
        tool_name: Option<String>,
        tool_args: Option<Map<String, Value>>,
    ) -> &TranscriptEntry {
        self.next_id += 1;
        tracing::debug!(id = self.next_id, kind = ?kind, "transcript append");
        self.entries.push(TranscriptEntry {
            id: self.next_id,
            kind,
            text,
            tool_name,
            tool_args,
            timestamp: Utc::now(),
        });
        &self.entries[self.entries.len() - 1]
    }

    pub fn all(&self) -> &[TranscriptEntry] {
        &self.entries
    }

    pub fn last(&self) -> Option<&TranscriptEntry> {
        self.entries.last()
    }

    pub fn count(&self, kind: EntryKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// 按字符截断，超出部分以 "..." 结尾（工具结果展示用）
pub fn preview(text: &str, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        format!("{}...", text.chars().take(max_chars).collect::<String>())
    } else {
        text.to_string()
    }
}
