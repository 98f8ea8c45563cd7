//! 动作闸门：单槽位的待审批工具调用
//!
//! 任一时刻至多一个 PendingAction；闸门从不自动批准，每次工具调用都需要监督者明确决定。

use serde::Serialize;
use serde_json::{Map, Value};

use crate::core::GateError;
use crate::react::session::ToolCallRequest;

/// 等待人工审批的工具调用
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PendingAction {
    pub id: String,
    pub tool_name: String,
    pub args: Map<String, Value>,
}

impl From<ToolCallRequest> for PendingAction {
    fn from(call: ToolCallRequest) -> Self {
        Self {
            id: call.id,
            tool_name: call.name,
            args: call.args,
        }
    }
}

#[derive(Debug, Default)]
pub struct ActionGate {
    slot: Option<PendingAction>,
}

impl ActionGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// 放入提议；已有提议时拒绝
    pub fn propose(&mut self, action: PendingAction) -> Result<(), GateError> {
        if let Some(existing) = &self.slot {
            return Err(GateError::Occupied(existing.id.clone()));
        }
        self.slot = Some(action);
        Ok(())
    }

    /// 替换当前提议的参数；闸门为空时返回 false
    pub fn edit_args(&mut self, args: Map<String, Value>) -> bool {
        match self.slot.as_mut() {
            Some(action) => {
                action.args = args;
                true
            }
            None => false,
        }
    }

    /// 批准：取出提议交给执行方，闸门随即清空
    pub fn take(&mut self) -> Option<PendingAction> {
        self.slot.take()
    }

    pub fn reject(&mut self) -> Option<PendingAction> {
        self.slot.take()
    }

    pub fn current(&self) -> Option<&PendingAction> {
        self.slot.as_ref()
    }

    pub fn is_empty(&self) -> bool {
        self.slot.is_none()
    }

    pub fn clear(&mut self) {
        self.slot = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn action(id: &str) -> PendingAction {
        PendingAction {
            id: id.to_string(),
            tool_name: "writeFile".to_string(),
            args: Map::new(),
        }
    }

    #[test]
    fn test_single_flight() {
        let mut gate = ActionGate::new();
        gate.propose(action("a")).unwrap();
        assert_eq!(
            gate.propose(action("b")),
            Err(GateError::Occupied("a".to_string()))
        );
        assert_eq!(gate.current().map(|a| a.id.as_str()), Some("a"));
    }

    #[test]
    fn test_edit_args_on_empty_gate_is_noop() {
        let mut gate = ActionGate::new();
        assert!(!gate.edit_args(Map::new()));
        assert!(gate.is_empty());
    }

    #[test]
    fn test_edit_then_take() {
        let mut gate = ActionGate::new();
        gate.propose(action("a")).unwrap();
        let mut args = Map::new();
        args.insert("path".into(), Value::String("README.md".into()));
        assert!(gate.edit_args(args.clone()));
        let taken = gate.take().unwrap();
        assert_eq!(taken.args, args);
        assert!(gate.is_empty());
    }

    #[test]
    fn test_reject_clears() {
        let mut gate = ActionGate::new();
        gate.propose(action("a")).unwrap();
        assert!(gate.reject().is_some());
        assert!(gate.reject().is_none());
    }
}
