//! 会话引擎边界：ConversationSession / SessionFactory 与基于 LLM 的实现
//!
//! 会话句柄在计划批准时创建一次，由 RunController 独占并显式传给 TurnDriver；reset 时丢弃。
//! LlmConversationSession 保留最近若干轮消息，从 LLM 文本中解析 `{"tool": ..., "args": {...}}` 工具调用。

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use serde_json::{Map, Value};

use crate::core::TurnError;
use crate::llm::LlmClient;
use crate::memory::{ConversationMemory, Message};
use crate::plan::PlanItem;
use crate::react::driver::STEP_COMPLETE_TOOL;
use crate::tools::tool_call_schema_json;

/// 工具结果回灌时的消息前缀
pub const OBSERVATION_PREFIX: &str = "Observation from";

/// 会话引擎提议的一次工具调用
#[derive(Clone, Debug, PartialEq)]
pub struct ToolCallRequest {
    pub id: String,
    pub name: String,
    pub args: Map<String, Value>,
}

/// 单轮回复：叙述文本 + 零或多个工具调用
#[derive(Clone, Debug, Default, PartialEq)]
pub struct TurnReply {
    pub text: String,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl TurnReply {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_call(id: impl Into<String>, name: impl Into<String>, args: Map<String, Value>) -> Self {
        Self {
            text: String::new(),
            tool_calls: vec![ToolCallRequest {
                id: id.into(),
                name: name.into(),
                args,
            }],
        }
    }
}

#[async_trait]
pub trait ConversationSession: Send + Sync {
    async fn send(&mut self, turn_text: &str) -> Result<TurnReply, TurnError>;

    async fn send_tool_result(&mut self, call_id: &str, result_text: &str) -> Result<TurnReply, TurnError>;
}

/// 以目标与已批准计划为种子打开会话
#[async_trait]
pub trait SessionFactory: Send + Sync {
    async fn open(&self, goal: &str, plan: &[PlanItem]) -> Result<Box<dyn ConversationSession>, TurnError>;
}

#[derive(Deserialize)]
struct ToolCallJson {
    #[serde(default)]
    id: Option<String>,
    tool: String,
    #[serde(default)]
    args: Value,
}

fn fenced_json() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?s)```(?:json)?\s*(.*?)```").ok())
        .as_ref()
}

/// 把任意 JSON 参数规整为对象：null → 空对象，非对象 → {"value": v}
pub fn args_to_map(args: Value) -> Map<String, Value> {
    match args {
        Value::Object(map) => map,
        Value::Null => Map::new(),
        other => {
            let mut map = Map::new();
            map.insert("value".to_string(), other);
            map
        }
    }
}

/// 从已解析的 JSON 取工具调用；没有 tool 键返回 None
fn tool_call_from(value: Value, source: &str) -> Result<Option<ToolCallRequest>, TurnError> {
    if value.get("tool").is_none() {
        return Ok(None);
    }
    let parsed: ToolCallJson = serde_json::from_value(value)
        .map_err(|e| TurnError::Parse(format!("{}: {}", e, source)))?;
    let name = parsed.tool.trim();
    if name.is_empty() {
        return Ok(None);
    }
    Ok(Some(ToolCallRequest {
        id: parsed
            .id
            .unwrap_or_else(|| format!("call-{}", uuid::Uuid::new_v4())),
        name: name.to_string(),
        args: args_to_map(parsed.args),
    }))
}

fn reply_with(call: ToolCallRequest, before: &str, after: &str) -> TurnReply {
    TurnReply {
        text: format!("{} {}", before.trim(), after.trim()).trim().to_string(),
        tool_calls: vec![call],
    }
}

/// 解析 LLM 输出：含非空 tool 的 JSON 对象为工具调用，其余文本为叙述
///
/// 依次尝试：整段 JSON、能完整解析的 ```json 围栏块、从每个 `{` 起读出的第一个 JSON 值。
/// 参数字符串里的反引号与叙述中的花括号都不影响识别。
pub fn parse_turn_output(output: &str) -> Result<TurnReply, TurnError> {
    let trimmed = output.trim();

    if let Ok(value) = serde_json::from_str::<Value>(trimmed) {
        return Ok(match tool_call_from(value, trimmed)? {
            Some(call) => reply_with(call, "", ""),
            None => TurnReply::text(trimmed),
        });
    }

    if let Some(re) = fenced_json() {
        for caps in re.captures_iter(trimmed) {
            let (Some(whole), Some(body)) = (caps.get(0), caps.get(1)) else {
                continue;
            };
            let Ok(value) = serde_json::from_str::<Value>(body.as_str().trim()) else {
                continue;
            };
            if let Some(call) = tool_call_from(value, body.as_str())? {
                return Ok(reply_with(
                    call,
                    &trimmed[..whole.start()],
                    &trimmed[whole.end()..],
                ));
            }
        }
    }

    for (start, _) in trimmed.match_indices('{') {
        let rest = &trimmed[start..];
        let mut values = serde_json::Deserializer::from_str(rest).into_iter::<Value>();
        let Some(Ok(value)) = values.next() else {
            continue;
        };
        let end = start + values.byte_offset();
        if let Some(call) = tool_call_from(value, &trimmed[start..end])? {
            return Ok(reply_with(call, &trimmed[..start], &trimmed[end..]));
        }
    }

    if trimmed.contains("\"tool\"") && trimmed.contains('{') {
        return Err(TurnError::Parse(format!("malformed tool call: {}", trimmed)));
    }
    Ok(TurnReply::text(trimmed))
}

/// 基于 LLM 的会话：system（目标 + 计划 + 工具）+ 最近 N 轮历史
pub struct LlmConversationSession {
    llm: Arc<dyn LlmClient>,
    system: String,
    history: ConversationMemory,
}

impl LlmConversationSession {
    pub fn new(llm: Arc<dyn LlmClient>, system: impl Into<String>, history_turns: usize) -> Self {
        Self {
            llm,
            system: system.into(),
            history: ConversationMemory::new(history_turns),
        }
    }

    async fn exchange(&mut self, user: String) -> Result<TurnReply, TurnError> {
        self.history.push(Message::user(user));
        let mut messages = Vec::with_capacity(self.history.len() + 1);
        messages.push(Message::system(self.system.clone()));
        messages.extend(self.history.messages().iter().cloned());

        let output = self.llm.complete(&messages).await.map_err(TurnError::Llm)?;
        let (prompt, completion, total) = self.llm.token_usage();
        tracing::debug!(prompt, completion, total, "llm token usage");
        self.history.push(Message::assistant(output.clone()));
        parse_turn_output(&output)
    }
}

#[async_trait]
impl ConversationSession for LlmConversationSession {
    async fn send(&mut self, turn_text: &str) -> Result<TurnReply, TurnError> {
        self.exchange(turn_text.to_string()).await
    }

    async fn send_tool_result(&mut self, call_id: &str, result_text: &str) -> Result<TurnReply, TurnError> {
        self.exchange(format!("{OBSERVATION_PREFIX} {call_id}: {result_text}"))
            .await
    }
}

pub struct LlmSessionFactory {
    llm: Arc<dyn LlmClient>,
    base_prompt: String,
    tools_schema: String,
    history_turns: usize,
}

impl LlmSessionFactory {
    pub fn new(llm: Arc<dyn LlmClient>, base_prompt: impl Into<String>, history_turns: usize) -> Self {
        Self {
            llm,
            base_prompt: base_prompt.into(),
            tools_schema: "[]".to_string(),
            history_turns,
        }
    }

    /// 注入可用工具列表（ToolRegistry::to_schema_json）
    pub fn with_tools_schema(mut self, schema: impl Into<String>) -> Self {
        self.tools_schema = schema.into();
        self
    }

    pub fn system_prompt(&self, goal: &str, plan: &[PlanItem]) -> String {
        let mut s = format!("{}\n\n## Goal\n{}\n\n## Approved plan\n", self.base_prompt, goal);
        for item in plan {
            s.push_str(&format!("- [{}] {} ({})", item.id, item.title, item.status));
            if !item.dependencies.is_empty() {
                let deps: Vec<&str> = item.dependencies.iter().map(String::as_str).collect();
                s.push_str(&format!(" after {}", deps.join(", ")));
            }
            s.push('\n');
        }
        s.push_str(&format!(
            "\n## Available tools\n{}\n\n## Protocol\n\
             To use a tool, output exactly one JSON object matching this schema:\n{}\n\
             Every tool call is reviewed by a human before it runs.\n\
             When the current step is finished, call the tool `{}` with args {{\"summary\": \"...\"}}.\n",
            self.tools_schema,
            tool_call_schema_json(),
            STEP_COMPLETE_TOOL,
        ));
        s
    }
}

#[async_trait]
impl SessionFactory for LlmSessionFactory {
    async fn open(&self, goal: &str, plan: &[PlanItem]) -> Result<Box<dyn ConversationSession>, TurnError> {
        tracing::info!(steps = plan.len(), "opening conversation session");
        Ok(Box::new(LlmConversationSession::new(
            self.llm.clone(),
            self.system_prompt(goal, plan),
            self.history_turns,
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::ScriptedLlmClient;

    #[test]
    fn test_parse_plain_text() {
        let reply = parse_turn_output("Step complete").unwrap();
        assert_eq!(reply.text, "Step complete");
        assert!(reply.tool_calls.is_empty());
    }

    #[test]
    fn test_parse_tool_call_with_narrative() {
        let reply = parse_turn_output(
            "I will write the file.\n```json\n{\"tool\": \"writeFile\", \"args\": {\"path\": \"README.md\"}}\n```",
        )
        .unwrap();
        assert_eq!(reply.text, "I will write the file.");
        assert_eq!(reply.tool_calls.len(), 1);
        let call = &reply.tool_calls[0];
        assert_eq!(call.name, "writeFile");
        assert_eq!(call.args["path"], "README.md");
        assert!(call.id.starts_with("call-"));
    }

    #[test]
    fn test_parse_bare_json_keeps_id() {
        let reply = parse_turn_output(r#"{"id": "c1", "tool": "echo", "args": "hi"}"#).unwrap();
        assert_eq!(reply.tool_calls[0].id, "c1");
        assert_eq!(reply.tool_calls[0].args["value"], "hi");
        assert!(reply.text.is_empty());
    }

    #[test]
    fn test_parse_broken_tool_json_is_error() {
        let err = parse_turn_output(r#"{"tool": "echo", "args": {"text": }}"#).unwrap_err();
        assert!(matches!(err, TurnError::Parse(_)));
    }

    #[test]
    fn test_backticks_inside_args_keep_tool_call() {
        let reply = parse_turn_output(
            r##"{"tool": "writeFile", "args": {"path": "README.md", "content": "# Demo\n\n```bash\ncargo run\n```\n"}}"##,
        )
        .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        let call = &reply.tool_calls[0];
        assert_eq!(call.name, "writeFile");
        assert_eq!(call.args["content"], "# Demo\n\n```bash\ncargo run\n```\n");
        assert!(reply.text.is_empty());
    }

    #[test]
    fn test_fenced_call_with_code_block_in_args() {
        let reply = parse_turn_output(
            "Writing it now.\n```json\n{\"tool\": \"writeFile\", \"args\": {\"path\": \"README.md\", \"content\": \"```sh\\nmake\\n```\"}}\n```",
        )
        .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].args["content"], "```sh\nmake\n```");
        assert!(reply.text.starts_with("Writing it now."));
    }

    #[test]
    fn test_braces_in_prose_before_bare_call() {
        let reply = parse_turn_output(
            r#"I will fill the {name} field: {"tool": "writeFile", "args": {"path": "a.txt"}} then check it."#,
        )
        .unwrap();
        assert_eq!(reply.tool_calls.len(), 1);
        assert_eq!(reply.tool_calls[0].args["path"], "a.txt");
        assert_eq!(reply.text, "I will fill the {name} field: then check it.");
    }

    #[test]
    fn test_braces_in_prose_are_narrative() {
        let reply = parse_turn_output("Updated the {placeholder} section, done").unwrap();
        assert!(reply.tool_calls.is_empty());
        assert!(reply.text.contains("placeholder"));
    }

    #[tokio::test]
    async fn test_session_feeds_observation() {
        let llm = Arc::new(ScriptedLlmClient::new([
            r#"{"tool": "echo", "args": {"text": "hi"}}"#,
            "Step complete",
        ]));
        let factory = LlmSessionFactory::new(llm.clone(), "You are a careful agent.", 10);
        let plan = vec![PlanItem::new("1", "Say hi")];
        let mut session = factory.open("greet", &plan).await.unwrap();

        let first = session.send("Current step 1/1").await.unwrap();
        let call_id = first.tool_calls[0].id.clone();
        let second = session.send_tool_result(&call_id, "hi").await.unwrap();
        assert_eq!(second.text, "Step complete");

        let requests = llm.requests();
        assert_eq!(requests.len(), 2);
        assert!(requests[0][0].content.contains("## Goal\ngreet"));
        assert!(requests[0][0].content.contains("[1] Say hi"));
        let last = requests[1].last().unwrap();
        assert!(last.content.starts_with(OBSERVATION_PREFIX));
        assert!(last.content.contains(&call_id));
    }
}
