//! TurnDriver：单轮会话驱动与回复分类
//!
//! 为当前步骤构造轮次消息并发送给会话，分类顺序：
//! 1. 保留工具 step_complete → 显式完成
//! 2. 其它工具调用 → 提议进入 ActionGate（多个时只取第一个）
//! 3. 文本命中完成词表（不区分大小写的子串）→ 完成
//! 4. 其它 → 自动推进并记录 auto_advance 条目；连续次数超过上限则判定停滞

use serde_json::Value;

use crate::core::TurnError;
use crate::memory::{EntryKind, TranscriptLog};
use crate::plan::PlanItem;
use crate::react::session::{ConversationSession, TurnReply};
use crate::react::PendingAction;

/// 步骤完成的保留工具名
pub const STEP_COMPLETE_TOOL: &str = "step_complete";

pub const DEFAULT_COMPLETION_PHRASES: &[&str] = &["done", "step complete", "step completed", "task complete"];

/// 步骤是如何被判定完成的
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CompletionSignal {
    Explicit,
    Phrase,
    AutoAdvanced,
}

#[derive(Clone, Debug, PartialEq)]
pub enum TurnOutcome {
    /// 需要人工审批的工具调用
    Proposal(PendingAction),
    StepComplete(CompletionSignal),
}

#[derive(Debug, Clone)]
pub struct TurnDriver {
    completion_phrases: Vec<String>,
    /// 0 表示不限制
    max_auto_advances: usize,
    consecutive_auto_advances: usize,
}

impl Default for TurnDriver {
    fn default() -> Self {
        Self::new(
            DEFAULT_COMPLETION_PHRASES.iter().map(|s| s.to_string()).collect(),
            3,
        )
    }
}

impl TurnDriver {
    pub fn new(completion_phrases: Vec<String>, max_auto_advances: usize) -> Self {
        Self {
            completion_phrases: completion_phrases
                .into_iter()
                .map(|p| p.trim().to_lowercase())
                .filter(|p| !p.is_empty())
                .collect(),
            max_auto_advances,
            consecutive_auto_advances: 0,
        }
    }

    /// 新运行开始时清空连续自动推进计数
    pub fn reset(&mut self) {
        self.consecutive_auto_advances = 0;
    }

    pub fn consecutive_auto_advances(&self) -> usize {
        self.consecutive_auto_advances
    }

    /// 描述当前活动步骤的轮次消息；position 从 1 开始
    pub fn turn_message(step: &PlanItem, position: usize, total: usize) -> String {
        let mut msg = format!("Current step {}/{} [{}]: {}\n", position, total, step.id, step.title);
        if !step.description.trim().is_empty() {
            msg.push_str(&format!("{}\n", step.description.trim()));
        }
        if !step.dependencies.is_empty() {
            let deps: Vec<&str> = step.dependencies.iter().map(String::as_str).collect();
            msg.push_str(&format!("Builds on steps: {}\n", deps.join(", ")));
        }
        if let Some(worker) = &step.assigned_worker {
            msg.push_str(&format!("Assigned worker: {}\n", worker));
        }
        msg.push_str(&format!(
            "Work on this step only. Propose one tool call at a time, or call `{}` when the step is finished.",
            STEP_COMPLETE_TOOL
        ));
        msg
    }

    pub async fn run_turn(
        &mut self,
        step: &PlanItem,
        position: usize,
        total: usize,
        session: &mut dyn ConversationSession,
        transcript: &mut TranscriptLog,
    ) -> Result<TurnOutcome, TurnError> {
        let message = Self::turn_message(step, position, total);
        let reply = session.send(&message).await?;
        self.classify(reply, transcript)
    }

    /// 回灌工具结果，分类方式与 run_turn 相同
    pub async fn feed_result(
        &mut self,
        session: &mut dyn ConversationSession,
        call_id: &str,
        result_text: &str,
        transcript: &mut TranscriptLog,
    ) -> Result<TurnOutcome, TurnError> {
        let reply = session.send_tool_result(call_id, result_text).await?;
        self.classify(reply, transcript)
    }

    pub fn matches_completion_phrase(&self, text: &str) -> bool {
        let lower = text.to_lowercase();
        self.completion_phrases.iter().any(|p| lower.contains(p.as_str()))
    }

    pub fn classify(
        &mut self,
        reply: TurnReply,
        transcript: &mut TranscriptLog,
    ) -> Result<TurnOutcome, TurnError> {
        let text = reply.text.trim();
        if !text.is_empty() {
            transcript.append(EntryKind::Thought, text);
        }

        if reply.tool_calls.len() > 1 {
            tracing::warn!(
                dropped = reply.tool_calls.len() - 1,
                "turn proposed several tool calls; only the first goes to review"
            );
        }
        if let Some(call) = reply.tool_calls.into_iter().next() {
            self.consecutive_auto_advances = 0;
            if call.name == STEP_COMPLETE_TOOL {
                if let Some(summary) = call.args.get("summary").and_then(Value::as_str) {
                    if !summary.trim().is_empty() {
                        transcript.append(EntryKind::Thought, summary.trim());
                    }
                }
                tracing::debug!("explicit step completion");
                return Ok(TurnOutcome::StepComplete(CompletionSignal::Explicit));
            }
            tracing::debug!(tool = %call.name, "tool call proposed");
            return Ok(TurnOutcome::Proposal(call.into()));
        }

        if self.matches_completion_phrase(text) {
            self.consecutive_auto_advances = 0;
            return Ok(TurnOutcome::StepComplete(CompletionSignal::Phrase));
        }

        self.consecutive_auto_advances += 1;
        if self.max_auto_advances > 0 && self.consecutive_auto_advances > self.max_auto_advances {
            return Err(TurnError::Stalled(self.consecutive_auto_advances));
        }
        tracing::warn!(
            consecutive = self.consecutive_auto_advances,
            "turn gave no tool call or completion signal; auto-advancing"
        );
        transcript.append(
            EntryKind::AutoAdvance,
            "Step ambiguous: no tool call or completion signal, auto-advanced",
        );
        Ok(TurnOutcome::StepComplete(CompletionSignal::AutoAdvanced))
    }
}
