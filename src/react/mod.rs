//! 认知层：计划生成、会话边界、单轮驱动（TurnDriver）、动作闸门（ActionGate）

pub mod driver;
pub mod gate;
pub mod planner;
pub mod session;

pub use driver::{CompletionSignal, TurnDriver, TurnOutcome, DEFAULT_COMPLETION_PHRASES, STEP_COMPLETE_TOOL};
pub use gate::{ActionGate, PendingAction};
pub use planner::{parse_plan, LlmPlanGenerator, PlanGenerator};
pub use session::{
    parse_turn_output, ConversationSession, LlmConversationSession, LlmSessionFactory,
    SessionFactory, ToolCallRequest, TurnReply,
};
