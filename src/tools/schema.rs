//! 输出格式 JSON Schema 生成（schemars）
//!
//! 将「合法 tool call」与「合法计划」的 JSON 结构注入 system prompt，减少 LLM 输出格式错误。

use std::collections::HashMap;

use schemars::{schema_for, JsonSchema};

/// 工具调用格式：与会话解析的 `{"tool": "...", "args": {...}}` 一致（仅用于 Schema 生成）
#[allow(dead_code)]
#[derive(JsonSchema)]
struct ToolCallFormat {
    /// 工具名；步骤完成时使用保留名 step_complete
    pub tool: String,
    /// 工具参数，依工具不同而不同
    pub args: HashMap<String, serde_json::Value>,
}

/// 计划条目格式：计划生成方输出的 JSON 数组元素
#[allow(dead_code)]
#[derive(JsonSchema)]
struct PlanItemFormat {
    /// 唯一 id（字符串或数字）
    pub id: String,
    pub title: String,
    pub description: String,
    /// 必须先完成的条目 id
    pub dependencies: Vec<String>,
    /// 可选：负责执行的 worker 标签
    pub assigned_worker: Option<String>,
}

pub fn tool_call_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(ToolCallFormat)).unwrap_or_default()
}

pub fn plan_schema_json() -> String {
    serde_json::to_string_pretty(&schema_for!(Vec<PlanItemFormat>)).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schemas_mention_fields() {
        assert!(tool_call_schema_json().contains("\"tool\""));
        let plan = plan_schema_json();
        assert!(plan.contains("dependencies"));
        assert!(plan.contains("\"array\""));
    }
}
