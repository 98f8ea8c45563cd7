//! 核心编排层：错误与恢复、状态投影、取消监管、运行状态机、命令通道宿主

pub mod controller;
pub mod error;
pub mod orchestrator;
pub mod recovery;
pub mod session_supervisor;
pub mod state;

pub use controller::{Collaborators, RunController, RunSettings};
pub use error::{
    ExecutionError, GateError, PlanError, PlanningError, RecoveryAction, RunFailure, TurnError,
};
pub use orchestrator::{build_controller, create_llm_from_config, dispatch, spawn_run_host, Command};
pub use recovery::RecoveryEngine;
pub use session_supervisor::{guarded, Interrupt, SessionSupervisor};
pub use state::{AgentStatus, RunSnapshot};
