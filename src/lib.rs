//! Steward - Rust 监督式任务编排核心
//!
//! 模块划分：
//! - **config**: 应用配置加载（TOML + 环境变量）
//! - **core**: 运行状态机（RunController）、错误分类与恢复策略、取消监管、命令通道宿主
//! - **llm**: LLM 客户端抽象与实现（OpenAI 兼容 / DeepSeek / Mock / Scripted）
//! - **memory**: 对话消息与运行 Transcript（只追加日志）
//! - **observability**: tracing 日志初始化
//! - **plan**: 计划模型、依赖图校验、步骤调度
//! - **react**: 计划生成、会话、单轮驱动（TurnDriver）、动作闸门（ActionGate）
//! - **tools**: 工具注册表与执行器（超时 + 审计日志）

pub mod config;
pub mod core;
pub mod llm;
pub mod memory;
pub mod observability;
pub mod plan;
pub mod react;
pub mod tools;

pub use crate::core::{AgentStatus, Collaborators, Command, RunController, RunSettings, RunSnapshot};
pub use memory::{EntryKind, TranscriptEntry, TranscriptLog};
pub use plan::{PlanItem, PlanModel, PlanStatus, StepScheduler};
pub use react::{ActionGate, PendingAction, TurnDriver};
