//! 离线 LLM 客户端（用于测试与无 API Key 时的演示）
//!
//! - MockLlmClient：识别计划请求与工具观察，走通「单步计划 → echo 调用 → 完成」的最短流程
//! - ScriptedLlmClient：按顺序回放预置回复，测试里精确控制每一轮输出

use std::collections::VecDeque;
use std::sync::Mutex;

use async_trait::async_trait;

use crate::llm::LlmClient;
use crate::memory::{Message, Role};
use crate::react::planner::PLAN_REQUEST_MARKER;
use crate::react::session::OBSERVATION_PREFIX;

#[derive(Debug, Default)]
pub struct MockLlmClient;

#[async_trait]
impl LlmClient for MockLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        let is_plan_request = messages
            .iter()
            .any(|m| m.role == Role::System && m.content.contains(PLAN_REQUEST_MARKER));
        let last_user = messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.as_str())
            .unwrap_or("(no input)");

        if is_plan_request {
            let title: String = last_user.lines().next().unwrap_or("goal").chars().take(60).collect();
            return Ok(serde_json::json!([{
                "id": "1",
                "title": title,
                "description": "Echo the goal back (mock planner)",
                "dependencies": []
            }])
            .to_string());
        }
        if last_user.starts_with(OBSERVATION_PREFIX) {
            return Ok("Step complete".to_string());
        }
        Ok(serde_json::json!({
            "tool": "echo",
            "args": { "text": format!("Echo from Mock: {}", last_user.lines().next().unwrap_or("")) }
        })
        .to_string())
    }
}

/// 按顺序回放的脚本客户端；脚本用完后返回错误
#[derive(Debug, Default)]
pub struct ScriptedLlmClient {
    replies: Mutex<VecDeque<Result<String, String>>>,
    seen: Mutex<Vec<Vec<Message>>>,
}

impl ScriptedLlmClient {
    pub fn new<I, S>(replies: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            replies: Mutex::new(replies.into_iter().map(|r| Ok(r.into())).collect()),
            seen: Mutex::new(Vec::new()),
        }
    }

    /// 追加一条失败回复
    pub fn then_fail(self, error: impl Into<String>) -> Self {
        if let Ok(mut q) = self.replies.lock() {
            q.push_back(Err(error.into()));
        }
        self
    }

    /// 每次 complete 收到的消息列表
    pub fn requests(&self) -> Vec<Vec<Message>> {
        self.seen.lock().map(|s| s.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl LlmClient for ScriptedLlmClient {
    async fn complete(&self, messages: &[Message]) -> Result<String, String> {
        if let Ok(mut seen) = self.seen.lock() {
            seen.push(messages.to_vec());
        }
        let next = self
            .replies
            .lock()
            .map_err(|e| e.to_string())?
            .pop_front();
        next.unwrap_or_else(|| Err("script exhausted".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_scripted_replays_in_order() {
        let llm = ScriptedLlmClient::new(["one", "two"]).then_fail("boom");
        assert_eq!(llm.complete(&[Message::user("a")]).await.unwrap(), "one");
        assert_eq!(llm.complete(&[Message::user("b")]).await.unwrap(), "two");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "boom");
        assert_eq!(llm.complete(&[]).await.unwrap_err(), "script exhausted");
        assert_eq!(llm.requests().len(), 4);
    }

    #[tokio::test]
    async fn test_mock_answers_observation_with_completion() {
        let reply = MockLlmClient
            .complete(&[Message::user(format!("{OBSERVATION_PREFIX} call-1: hi"))])
            .await
            .unwrap();
        assert_eq!(reply, "Step complete");
    }

    #[tokio::test]
    async fn test_mock_proposes_echo_and_reports_no_usage() {
        let reply = MockLlmClient.complete(&[Message::user("hello")]).await.unwrap();
        assert!(reply.contains("\"echo\""));
        assert_eq!(MockLlmClient.token_usage(), (0, 0, 0));
    }
}
