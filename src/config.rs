//! 应用配置：从 config/default.toml 与环境变量加载
//!
//! 加载顺序：先读 TOML 文件，再用环境变量 `STEWARD__*` 覆盖（双下划线表示嵌套，如 `STEWARD__RUN__MAX_AUTO_ADVANCES=5`）。

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::core::RunSettings;
use crate::react::DEFAULT_COMPLETION_PHRASES;

/// 应用配置根（对应 config/default.toml 的顶层）
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub app: AppSection,
    pub llm: LlmSection,
    pub run: RunSection,
    pub tools: ToolsSection,
}

/// [app] 段
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct AppSection {
    pub name: String,
    /// 计划与会话 system prompt 的开头
    pub system_prompt: String,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            name: "steward".to_string(),
            system_prompt: default_system_prompt(),
        }
    }
}

fn default_system_prompt() -> String {
    "You are Steward, a careful engineering agent. Every tool call you propose is reviewed by a human supervisor.".to_string()
}

/// [llm] 段：后端选择与超时
#[derive(Debug, Clone, Deserialize)]
pub struct LlmSection {
    /// 后端：deepseek / openai；优先级由 API Key 与 provider 共同决定
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default = "default_model")]
    pub model: String,
    pub base_url: Option<String>,
    #[serde(default)]
    pub deepseek: LlmDeepSeekSection,
    #[serde(default)]
    pub openai: LlmOpenAiSection,
    #[serde(default)]
    pub timeouts: LlmTimeoutsSection,
}

impl Default for LlmSection {
    fn default() -> Self {
        Self {
            provider: default_provider(),
            model: default_model(),
            base_url: None,
            deepseek: LlmDeepSeekSection::default(),
            openai: LlmOpenAiSection::default(),
            timeouts: LlmTimeoutsSection::default(),
        }
    }
}

fn default_provider() -> String {
    "deepseek".to_string()
}

fn default_model() -> String {
    "deepseek-chat".to_string()
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmDeepSeekSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize, Default)]
pub struct LlmOpenAiSection {
    pub model: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LlmTimeoutsSection {
    /// 单次 LLM 请求超时（秒），[run] 未设置计划 / 单轮超时时使用
    #[serde(default = "default_request_timeout")]
    pub request: u64,
}

impl Default for LlmTimeoutsSection {
    fn default() -> Self {
        Self {
            request: default_request_timeout(),
        }
    }
}

fn default_request_timeout() -> u64 {
    60
}

/// [run] 段：完成判定、自动推进上限、展示截断、协作方超时
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RunSection {
    /// 不区分大小写的子串匹配
    pub completion_phrases: Vec<String>,
    /// 连续自动推进上限，0 表示不限制
    pub max_auto_advances: usize,
    /// transcript 中 result 条目的展示长度（字符）
    pub result_preview_chars: usize,
    /// 计划生成超时（秒），不设则不限
    pub plan_timeout_secs: Option<u64>,
    /// 单轮会话超时（秒），不设则不限
    pub turn_timeout_secs: Option<u64>,
    /// 会话保留的最近轮数
    pub history_turns: usize,
}

impl Default for RunSection {
    fn default() -> Self {
        Self {
            completion_phrases: DEFAULT_COMPLETION_PHRASES.iter().map(|s| s.to_string()).collect(),
            max_auto_advances: 3,
            result_preview_chars: 200,
            plan_timeout_secs: None,
            turn_timeout_secs: None,
            history_turns: 20,
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Deserialize)]
pub struct ToolsSection {
    /// 单次工具调用超时（秒）
    #[serde(default = "default_tool_timeout_secs")]
    pub tool_timeout_secs: u64,
}

impl Default for ToolsSection {
    fn default() -> Self {
        Self {
            tool_timeout_secs: default_tool_timeout_secs(),
        }
    }
}

fn default_tool_timeout_secs() -> u64 {
    30
}

impl From<&RunSection> for RunSettings {
    fn from(run: &RunSection) -> Self {
        Self {
            completion_phrases: run.completion_phrases.clone(),
            max_auto_advances: run.max_auto_advances,
            result_preview_chars: run.result_preview_chars,
            plan_timeout: run.plan_timeout_secs.map(Duration::from_secs),
            turn_timeout: run.turn_timeout_secs.map(Duration::from_secs),
        }
    }
}

/// 从 config 目录加载配置，环境变量 STEWARD__* 可覆盖
///
/// 1. 按顺序查找 config/default.toml、../config/default.toml、default.toml，找到则作为第一源
/// 2. 若传入 config_path 且文件存在，则追加该文件（可覆盖前面的键）
/// 3. 最后叠加环境变量 STEWARD__*（双下划线表示嵌套键）
pub fn load_config(config_path: Option<PathBuf>) -> Result<AppConfig, config::ConfigError> {
    let mut builder = config::Config::builder();

    let default_names = ["config/default", "../config/default", "default"];
    for name in default_names {
        let path = format!("{}.toml", name);
        if std::path::Path::new(&path).exists() {
            builder = builder.add_source(config::File::with_name(name).required(false));
            break;
        }
    }

    if let Some(ref path) = config_path {
        if path.exists() {
            builder = builder.add_source(config::File::from(path.clone()).required(false));
        } else {
            tracing::warn!(path = %path.display(), "config file not found, skipping");
        }
    }

    builder = builder.add_source(
        config::Environment::with_prefix("STEWARD")
            .separator("__")
            .try_parsing(true),
    );

    let c = builder.build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use std::io::Write;

    use super::*;

    #[test]
    fn test_defaults() {
        let cfg = AppConfig::default();
        assert_eq!(cfg.run.max_auto_advances, 3);
        assert_eq!(cfg.tools.tool_timeout_secs, 30);
        assert_eq!(cfg.llm.provider, "deepseek");
        assert!(cfg.run.completion_phrases.iter().any(|p| p == "step complete"));
        let settings = RunSettings::from(&cfg.run);
        assert!(settings.plan_timeout.is_none());
    }

    #[test]
    fn test_load_explicit_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(
            file,
            "[run]\nmax_auto_advances = 0\nturn_timeout_secs = 45\ncompletion_phrases = [\"finished\"]\n\n[tools]\ntool_timeout_secs = 5"
        )
        .unwrap();

        let cfg = load_config(Some(file.path().to_path_buf())).unwrap();
        assert_eq!(cfg.run.max_auto_advances, 0);
        assert_eq!(cfg.run.completion_phrases, vec!["finished".to_string()]);
        assert_eq!(cfg.tools.tool_timeout_secs, 5);
        let settings = RunSettings::from(&cfg.run);
        assert_eq!(settings.turn_timeout, Some(Duration::from_secs(45)));
        assert_eq!(cfg.run.history_turns, 20);
    }
}
