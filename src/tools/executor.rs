//! 工具执行器
//!
//! ActionExecutor 是运行核心消费的执行边界；ToolExecutor 基于 ToolRegistry 实现它：
//! 每次调用施加超时，失败映射为 ExecutionError（UnknownTool / Failed / Timeout），并输出一行 JSON 审计日志。

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::time::timeout;

use crate::core::ExecutionError;
use crate::memory::preview;
use crate::tools::ToolRegistry;

/// 人工批准后执行一次工具调用；失败可恢复（错误文本回灌会话）
#[async_trait]
pub trait ActionExecutor: Send + Sync {
    async fn execute(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<String, ExecutionError>;
}

pub struct ToolExecutor {
    registry: ToolRegistry,
    timeout: Duration,
}

impl ToolExecutor {
    pub fn new(registry: ToolRegistry, timeout_secs: u64) -> Self {
        Self {
            registry,
            timeout: Duration::from_secs(timeout_secs.max(1)),
        }
    }
}

#[async_trait]
impl ActionExecutor for ToolExecutor {
    async fn execute(
        &self,
        tool_name: &str,
        args: &Map<String, Value>,
    ) -> Result<String, ExecutionError> {
        let tool = self
            .registry
            .get(tool_name)
            .ok_or_else(|| ExecutionError::UnknownTool(tool_name.to_string()))?;

        let start = Instant::now();
        let args = Value::Object(args.clone());
        let args_preview = preview(&args.to_string(), 200);
        let result = timeout(self.timeout, tool.execute(args)).await;

        let (ok, outcome) = match &result {
            Ok(Ok(_)) => (true, "ok"),
            Ok(Err(_)) => (false, "error"),
            Err(_) => (false, "timeout"),
        };
        let audit = serde_json::json!({
            "event": "tool_audit",
            "tool": tool_name,
            "ok": ok,
            "outcome": outcome,
            "duration_ms": start.elapsed().as_millis() as u64,
            "args_preview": args_preview,
        });
        tracing::info!(audit = %audit, "tool");

        match result {
            Ok(Ok(content)) => Ok(content),
            Ok(Err(e)) => Err(ExecutionError::Failed(e)),
            Err(_) => Err(ExecutionError::Timeout(tool_name.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{EchoTool, Tool};

    struct SlowTool;

    #[async_trait]
    impl Tool for SlowTool {
        fn name(&self) -> &str {
            "slow"
        }

        fn description(&self) -> &str {
            "sleeps"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok("late".into())
        }
    }

    struct FailTool;

    #[async_trait]
    impl Tool for FailTool {
        fn name(&self) -> &str {
            "fail"
        }

        fn description(&self) -> &str {
            "always fails"
        }

        async fn execute(&self, _args: Value) -> Result<String, String> {
            Err("permission denied".into())
        }
    }

    fn executor() -> ToolExecutor {
        let mut registry = ToolRegistry::new();
        registry.register(EchoTool);
        registry.register(SlowTool);
        registry.register(FailTool);
        ToolExecutor::new(registry, 1)
    }

    #[tokio::test]
    async fn test_execute_echo() {
        let mut args = Map::new();
        args.insert("text".into(), Value::String("hi".into()));
        assert_eq!(executor().execute("echo", &args).await.unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_unknown_tool() {
        let err = executor().execute("rm", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::UnknownTool(name) if name == "rm"));
    }

    #[tokio::test]
    async fn test_failure_is_mapped() {
        let err = executor().execute("fail", &Map::new()).await.unwrap_err();
        assert!(err.to_string().contains("permission denied"));
    }

    #[tokio::test]
    async fn test_timeout_is_mapped() {
        let err = executor().execute("slow", &Map::new()).await.unwrap_err();
        assert!(matches!(err, ExecutionError::Timeout(name) if name == "slow"));
    }
}
