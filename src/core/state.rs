//! 状态定义：AgentStatus 与宿主可见的 RunSnapshot 投影
//!
//! 只有 RunController 写 AgentStatus；宿主（CLI / UI）通过 watch 通道拿到轻量的 RunSnapshot 渲染。

use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::memory::TranscriptEntry;
use crate::plan::PlanItem;
use crate::react::PendingAction;

/// 运行阶段（整个进程内仅由 RunController 持有与修改）
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    #[default]
    Idle,
    Planning,
    PlanReview,
    Thinking,
    Executing,
    ActionReview,
    Completed,
    Failed,
}

impl AgentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AgentStatus::Idle => "idle",
            AgentStatus::Planning => "planning",
            AgentStatus::PlanReview => "plan_review",
            AgentStatus::Thinking => "thinking",
            AgentStatus::Executing => "executing",
            AgentStatus::ActionReview => "action_review",
            AgentStatus::Completed => "completed",
            AgentStatus::Failed => "failed",
        }
    }

    /// 可以开始新运行的状态
    pub fn accepts_start(&self) -> bool {
        matches!(
            self,
            AgentStatus::Idle | AgentStatus::Completed | AgentStatus::Failed
        )
    }
}

impl fmt::Display for AgentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 宿主看到的「投影」状态
#[derive(Clone, Debug, Default, Serialize)]
pub struct RunSnapshot {
    pub run_id: Option<Uuid>,
    pub status: AgentStatus,
    pub goal: Option<String>,
    pub plan: Vec<PlanItem>,
    pub pending_action: Option<PendingAction>,
    pub transcript: Vec<TranscriptEntry>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_serializes_snake_case() {
        let json = serde_json::to_string(&AgentStatus::ActionReview).unwrap();
        assert_eq!(json, "\"action_review\"");
        assert_eq!(AgentStatus::PlanReview.to_string(), "plan_review");
    }

    #[test]
    fn test_terminal_states_accept_start() {
        assert!(AgentStatus::Idle.accepts_start());
        assert!(AgentStatus::Failed.accepts_start());
        assert!(!AgentStatus::ActionReview.accepts_start());
    }
}
