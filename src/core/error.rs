//! 运行错误分类与恢复动作
//!
//! 与 RecoveryEngine 配合：PlanningError / TurnError 终止运行，ExecutionError 作为工具结果回灌会话，
//! RejectedAction 为用户主动放弃（回到 idle 而非 failed）。

use std::time::Duration;

use thiserror::Error;

use crate::core::AgentStatus;

/// 计划结构错误：图校验失败或人工编辑不合法
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PlanError {
    #[error("Plan is empty")]
    Empty,

    #[error("Duplicate plan item id: {0}")]
    DuplicateId(String),

    #[error("Plan item {item} depends on unknown item {dependency}")]
    DanglingDependency { item: String, dependency: String },

    #[error("Plan item {0} depends on itself")]
    SelfDependency(String),

    #[error("Dependency cycle among plan items: {0:?}")]
    Cycle(Vec<String>),

    #[error("Unknown plan item: {0}")]
    UnknownItem(String),

    #[error("Plan item {id} cannot change from {from} to {to}")]
    InvalidTransition { id: String, from: String, to: String },

    #[error("Another plan item is already active: {0}")]
    AlreadyActive(String),

    #[error("Edited plan must keep the acquired item set")]
    ItemSetChanged,

    #[error("Plan can only be edited during review (status: {0})")]
    NotInReview(AgentStatus),
}

/// 计划生成失败（致命）
#[derive(Error, Debug, Clone)]
pub enum PlanningError {
    #[error("Planner LLM error: {0}")]
    Llm(String),

    #[error("Plan parse error: {0}")]
    Parse(String),

    #[error("Invalid plan: {0}")]
    InvalidPlan(#[from] PlanError),

    #[error("Planning timed out after {0:?}")]
    Timeout(Duration),

    #[error("Planning cancelled")]
    Cancelled,
}

/// 单轮会话失败（致命，不自动重试）
#[derive(Error, Debug, Clone)]
pub enum TurnError {
    #[error("Turn LLM error: {0}")]
    Llm(String),

    #[error("Turn output parse error: {0}")]
    Parse(String),

    #[error("Conversation session error: {0}")]
    Session(String),

    #[error("Agent made no progress for {0} consecutive turns")]
    Stalled(usize),

    #[error("Turn timed out after {0:?}")]
    Timeout(Duration),

    #[error("Turn cancelled")]
    Cancelled,
}

/// 工具执行失败（可恢复：错误文本作为结果回灌会话）
#[derive(Error, Debug, Clone)]
pub enum ExecutionError {
    #[error("Unknown tool: {0}")]
    UnknownTool(String),

    #[error("Tool execution failed: {0}")]
    Failed(String),

    #[error("Tool timeout: {0}")]
    Timeout(String),

    #[error("Tool execution cancelled")]
    Cancelled,
}

/// 动作闸门错误：单飞约束
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum GateError {
    #[error("A proposal is already awaiting review: {0}")]
    Occupied(String),
}

/// 运行中出现的任一失败，交给 RecoveryEngine 决定去向
#[derive(Error, Debug, Clone)]
pub enum RunFailure {
    #[error(transparent)]
    Planning(#[from] PlanningError),

    #[error(transparent)]
    Turn(#[from] TurnError),

    #[error(transparent)]
    Execution(#[from] ExecutionError),

    #[error("Action rejected by supervisor: {0}")]
    RejectedAction(String),
}

impl RunFailure {
    /// 是否由 reset 取消引起（结果应直接丢弃）
    pub fn is_cancelled(&self) -> bool {
        matches!(
            self,
            RunFailure::Planning(PlanningError::Cancelled)
                | RunFailure::Turn(TurnError::Cancelled)
                | RunFailure::Execution(ExecutionError::Cancelled)
        )
    }
}

/// 恢复引擎根据失败类型给出的动作
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryAction {
    /// 将文本作为工具结果回灌会话，运行继续
    FeedBack(String),
    /// 记录 error 条目，运行进入 failed
    Halt(String),
    /// 用户放弃：记录拒绝并回到 idle
    Abandon(String),
    /// 被取消：什么都不记录
    Discard,
}
