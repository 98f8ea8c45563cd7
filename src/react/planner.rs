//! 计划生成：PlanGenerator 边界与基于 LLM 的实现
//!
//! 调用 LLM 得到 JSON 计划（```json ... ``` 代码块、裸数组或 {"steps": [...]} 均可），
//! parse_plan 将其解析为全部为 pending 的 PlanItem 列表；id 可以是字符串或数字。

use std::collections::BTreeSet;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::Value;

use crate::core::PlanningError;
use crate::llm::LlmClient;
use crate::memory::Message;
use crate::plan::{PlanItem, PlanStatus};
use crate::tools::plan_schema_json;

/// 计划请求 system prompt 的标记段落
pub const PLAN_REQUEST_MARKER: &str = "## Plan request";

#[async_trait]
pub trait PlanGenerator: Send + Sync {
    async fn generate(&self, goal: &str, context_summary: &str) -> Result<Vec<PlanItem>, PlanningError>;
}

#[derive(Deserialize)]
struct RawPlanItem {
    #[serde(default)]
    id: Value,
    title: String,
    #[serde(default)]
    description: Option<String>,
    #[serde(default, alias = "deps", alias = "depends_on")]
    dependencies: Vec<Value>,
    #[serde(default, alias = "assignedWorker", alias = "worker")]
    assigned_worker: Option<String>,
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn extract_json(trimmed: &str) -> Option<&str> {
    if serde_json::from_str::<Value>(trimmed).is_ok() {
        return Some(trimmed);
    }
    if let Some(start) = trimmed.find("```json") {
        let rest = &trimmed[start + 7..];
        let body = rest.find("```").map(|end| rest[..end].trim()).unwrap_or(rest.trim());
        if serde_json::from_str::<Value>(body).is_ok() {
            return Some(body);
        }
    }
    let open = trimmed.find(['[', '{'])?;
    let close = if trimmed[open..].starts_with('[') {
        trimmed.rfind(']')?
    } else {
        trimmed.rfind('}')?
    };
    (close > open).then(|| &trimmed[open..=close])
}

/// 解析 LLM 的计划输出
pub fn parse_plan(output: &str) -> Result<Vec<PlanItem>, PlanningError> {
    let json_str = extract_json(output.trim())
        .ok_or_else(|| PlanningError::Parse(format!("no JSON plan found in: {}", output.trim())))?;
    let value: Value = serde_json::from_str(json_str)
        .map_err(|e| PlanningError::Parse(format!("{}: {}", e, json_str)))?;

    let list = match value {
        Value::Array(items) => items,
        Value::Object(mut obj) => match obj.remove("steps").or_else(|| obj.remove("plan")) {
            Some(Value::Array(items)) => items,
            _ => return Err(PlanningError::Parse("expected a JSON array of steps".to_string())),
        },
        _ => return Err(PlanningError::Parse("expected a JSON array of steps".to_string())),
    };

    list.into_iter()
        .enumerate()
        .map(|(idx, raw)| {
            let raw: RawPlanItem = serde_json::from_value(raw)
                .map_err(|e| PlanningError::Parse(format!("step {}: {}", idx + 1, e)))?;
            Ok(PlanItem {
                id: id_string(&raw.id).unwrap_or_else(|| (idx + 1).to_string()),
                title: raw.title.trim().to_string(),
                description: raw.description.unwrap_or_default(),
                status: PlanStatus::Pending,
                dependencies: raw.dependencies.iter().filter_map(id_string).collect::<BTreeSet<_>>(),
                assigned_worker: raw.assigned_worker,
            })
        })
        .collect()
}

/// 基于 LLM 的计划生成方
pub struct LlmPlanGenerator {
    llm: Arc<dyn LlmClient>,
    system_prompt: String,
}

impl LlmPlanGenerator {
    pub fn new(llm: Arc<dyn LlmClient>, system_prompt: impl Into<String>) -> Self {
        Self {
            llm,
            system_prompt: system_prompt.into(),
        }
    }

    fn request_messages(&self, goal: &str, context_summary: &str) -> Vec<Message> {
        let system = format!(
            "{}\n\n{}\nBreak the goal into a small number of ordered, concrete steps.\n\
             Output only a JSON array matching this schema:\n{}\n\
             Use `dependencies` to list the ids of steps that must finish first.",
            self.system_prompt,
            PLAN_REQUEST_MARKER,
            plan_schema_json()
        );
        let mut user = goal.to_string();
        if !context_summary.trim().is_empty() {
            user.push_str(&format!("\n\n## Context\n{}", context_summary.trim()));
        }
        vec![Message::system(system), Message::user(user)]
    }
}

#[async_trait]
impl PlanGenerator for LlmPlanGenerator {
    async fn generate(&self, goal: &str, context_summary: &str) -> Result<Vec<PlanItem>, PlanningError> {
        let output = self
            .llm
            .complete(&self.request_messages(goal, context_summary))
            .await
            .map_err(PlanningError::Llm)?;
        let items = parse_plan(&output)?;
        tracing::info!(steps = items.len(), "plan acquired");
        Ok(items)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{MockLlmClient, ScriptedLlmClient};

    #[test]
    fn test_parse_numeric_ids() {
        let items = parse_plan(
            r#"[{"id": 1, "title": "Create README", "dependencies": []},
                {"id": 2, "title": "Link it", "deps": [1], "assignedWorker": "docs"}]"#,
        )
        .unwrap();
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].id, "1");
        assert!(items[1].dependencies.contains("1"));
        assert_eq!(items[1].assigned_worker.as_deref(), Some("docs"));
        assert!(items.iter().all(|it| it.status == PlanStatus::Pending));
    }

    #[test]
    fn test_parse_fenced_steps_object() {
        let items = parse_plan(
            "Here is the plan:\n```json\n{\"steps\": [{\"title\": \"Only step\"}]}\n```",
        )
        .unwrap();
        assert_eq!(items[0].id, "1");
        assert_eq!(items[0].title, "Only step");
    }

    #[test]
    fn test_parse_description_with_code_block() {
        let items = parse_plan(
            r#"[{"id": 1, "title": "Write README", "description": "Include ```cargo run``` usage"}]"#,
        )
        .unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].description, "Include ```cargo run``` usage");
    }

    #[test]
    fn test_parse_rejects_prose() {
        assert!(matches!(
            parse_plan("I cannot plan this."),
            Err(PlanningError::Parse(_))
        ));
        assert!(matches!(
            parse_plan(r#"[{"id": 1}]"#),
            Err(PlanningError::Parse(msg)) if msg.contains("step 1")
        ));
    }

    #[tokio::test]
    async fn test_generator_includes_context() {
        let llm = Arc::new(ScriptedLlmClient::new([r#"[{"id": "a", "title": "A"}]"#]));
        let planner = LlmPlanGenerator::new(llm.clone(), "You plan work.");
        let items = planner.generate("Ship it", "repo has no README").await.unwrap();
        assert_eq!(items[0].id, "a");
        let request = &llm.requests()[0];
        assert!(request[0].content.contains(PLAN_REQUEST_MARKER));
        assert!(request[1].content.contains("repo has no README"));
    }

    #[tokio::test]
    async fn test_generator_with_mock_llm() {
        let planner = LlmPlanGenerator::new(Arc::new(MockLlmClient), "You plan work.");
        let items = planner.generate("Add README", "").await.unwrap();
        assert_eq!(items.len(), 1);
        assert_eq!(items[0].title, "Add README");
    }

    #[tokio::test]
    async fn test_generator_llm_failure() {
        let planner = LlmPlanGenerator::new(
            Arc::new(ScriptedLlmClient::new(Vec::<String>::new()).then_fail("rate limited")),
            "You plan work.",
        );
        let err = planner.generate("x", "").await.unwrap_err();
        assert!(matches!(err, PlanningError::Llm(msg) if msg == "rate limited"));
    }
}
