//! 错误恢复引擎
//!
//! 根据 RunFailure 类型返回 RecoveryAction：只有计划生成与单轮会话失败会终止运行，
//! 工具失败作为结果回灌会话，用户拒绝回到 idle，取消直接丢弃。

use crate::core::{ExecutionError, RecoveryAction, RunFailure};

#[derive(Debug, Default)]
pub struct RecoveryEngine;

impl RecoveryEngine {
    pub fn new() -> Self {
        Self
    }

    pub fn handle(&self, failure: &RunFailure) -> RecoveryAction {
        if failure.is_cancelled() {
            return RecoveryAction::Discard;
        }
        match failure {
            RunFailure::Planning(e) => RecoveryAction::Halt(format!("Planning failed: {e}")),
            RunFailure::Turn(e) => RecoveryAction::Halt(format!("Turn failed: {e}")),
            RunFailure::Execution(ExecutionError::UnknownTool(name)) => RecoveryAction::FeedBack(
                format!("Error: tool '{name}' does not exist; choose another tool"),
            ),
            RunFailure::Execution(e) => RecoveryAction::FeedBack(format!("Error: {e}")),
            RunFailure::RejectedAction(tool) => {
                RecoveryAction::Abandon(format!("Action rejected by supervisor: {tool}"))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{PlanningError, TurnError};

    #[test]
    fn test_recovery_execution_error_feeds_back() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&ExecutionError::Failed("disk full".into()).into());
        match action {
            RecoveryAction::FeedBack(text) => assert!(text.contains("disk full")),
            other => panic!("Expected FeedBack, got {other:?}"),
        }
    }

    #[test]
    fn test_recovery_turn_error_halts() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&TurnError::Llm("502".into()).into());
        assert!(matches!(action, RecoveryAction::Halt(_)));
    }

    #[test]
    fn test_recovery_planning_error_halts() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&PlanningError::Parse("no json".into()).into());
        assert!(matches!(action, RecoveryAction::Halt(msg) if msg.contains("no json")));
    }

    #[test]
    fn test_recovery_rejection_abandons() {
        let engine = RecoveryEngine::new();
        let action = engine.handle(&RunFailure::RejectedAction("shell".into()));
        assert!(matches!(action, RecoveryAction::Abandon(msg) if msg.contains("shell")));
    }

    #[test]
    fn test_recovery_cancelled_is_discarded() {
        let engine = RecoveryEngine::new();
        assert_eq!(
            engine.handle(&TurnError::Cancelled.into()),
            RecoveryAction::Discard
        );
        assert_eq!(
            engine.handle(&ExecutionError::Cancelled.into()),
            RecoveryAction::Discard
        );
    }
}
