//! 运行宿主：命令通道 + 快照通道
//!
//! 负责：按配置创建 LLM / 工具 / 计划生成方 / 会话工厂并组装 RunController，
//! 在后台任务中逐条消费命令。命令执行期间继续读取通道：Reset / Quit 会取消运行令牌以中断进行中的调用，
//! 其它命令直接忽略（非重入）。

use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::config::AppConfig;
use crate::core::{Collaborators, RunController, RunSettings, RunSnapshot};
use crate::llm::{create_deepseek_client, LlmClient, OpenAiClient};
use crate::plan::{PlanItem, PlanPatch};
use crate::react::{LlmPlanGenerator, LlmSessionFactory};
use crate::tools::{EchoTool, ToolExecutor, ToolRegistry};

/// 从宿主（CLI / UI）发往运行控制器的命令
#[derive(Debug, Clone)]
pub enum Command {
    /// 开始新运行
    Start { goal: String, context: String },
    ToggleSkip(String),
    PatchItem(String, PlanPatch),
    /// 批准计划，可附带整份编辑后的计划
    ApprovePlan(Option<Vec<PlanItem>>),
    ApproveAction,
    RejectAction,
    UpdateActionArgs(Map<String, Value>),
    /// 中断并清空当前运行
    Reset,
    /// 退出宿主任务
    Quit,
}

/// 根据配置与环境变量选择 LLM 后端（DeepSeek / OpenAI 兼容 / Mock）
pub fn create_llm_from_config(cfg: &AppConfig) -> Arc<dyn LlmClient> {
    let provider = cfg.llm.provider.to_lowercase();
    // 有 DeepSeek Key 或（配置为 deepseek 且仅有 OpenAI Key 时也走 DeepSeek 兼容端点）
    let use_deepseek = std::env::var("DEEPSEEK_API_KEY").is_ok()
        || (provider == "deepseek" && std::env::var("OPENAI_API_KEY").is_ok());
    let use_openai = std::env::var("OPENAI_API_KEY").is_ok() && provider != "deepseek";

    if use_deepseek {
        let model = cfg
            .llm
            .deepseek
            .model
            .clone()
            .unwrap_or_else(|| cfg.llm.model.clone());
        tracing::info!("Using DeepSeek LLM ({})", model);
        Arc::new(create_deepseek_client(Some(&model)))
    } else if use_openai {
        let model = cfg
            .llm
            .openai
            .model
            .clone()
            .unwrap_or_else(|| "gpt-4o-mini".to_string());
        let base = cfg.llm.base_url.as_deref();
        tracing::info!("Using OpenAI LLM ({})", model);
        Arc::new(OpenAiClient::new(
            base,
            &model,
            std::env::var("OPENAI_API_KEY").ok().as_deref(),
        ))
    } else {
        tracing::warn!("No API key set or provider unknown, using Mock LLM");
        Arc::new(crate::llm::MockLlmClient)
    }
}

/// 按配置组装 RunController：LLM 计划生成方、LLM 会话工厂、注册了 echo 的工具执行器
pub fn build_controller(cfg: &AppConfig) -> RunController {
    let system_prompt = ["config/prompts/system.txt", "../config/prompts/system.txt"]
        .into_iter()
        .find_map(|p| std::fs::read_to_string(p).ok())
        .unwrap_or_else(|| cfg.app.system_prompt.clone());

    let llm = create_llm_from_config(cfg);

    let mut tools = ToolRegistry::new();
    tools.register(EchoTool);
    tracing::info!(tools = ?tools.tool_names(), "tools registered");
    let tools_schema = tools.to_schema_json();
    let executor = ToolExecutor::new(tools, cfg.tools.tool_timeout_secs);

    let planner = LlmPlanGenerator::new(llm.clone(), system_prompt.clone());
    let sessions = LlmSessionFactory::new(llm, system_prompt, cfg.run.history_turns)
        .with_tools_schema(tools_schema);

    // 未单独配置时，计划与单轮调用沿用 LLM 请求超时
    let mut settings = RunSettings::from(&cfg.run);
    let request_timeout = Duration::from_secs(cfg.llm.timeouts.request);
    settings.plan_timeout.get_or_insert(request_timeout);
    settings.turn_timeout.get_or_insert(request_timeout);

    RunController::new(
        Collaborators {
            planner: Arc::new(planner),
            sessions: Arc::new(sessions),
            executor: Arc::new(executor),
        },
        settings,
    )
}

/// 执行一条命令；返回 false 表示宿主应退出
pub async fn dispatch(controller: &mut RunController, cmd: Command) -> bool {
    match cmd {
        Command::Start { goal, context } => controller.start(goal, &context).await,
        Command::ToggleSkip(id) => {
            if let Err(e) = controller.toggle_skip(&id) {
                tracing::warn!(step = %id, error = %e, "toggle skip rejected");
            }
        }
        Command::PatchItem(id, patch) => {
            if let Err(e) = controller.patch_item(&id, patch) {
                tracing::warn!(step = %id, error = %e, "plan patch rejected");
            }
        }
        Command::ApprovePlan(edited) => {
            if let Err(e) = controller.approve_plan(edited).await {
                tracing::warn!(error = %e, "plan approval rejected");
            }
        }
        Command::ApproveAction => controller.approve_action().await,
        Command::RejectAction => controller.reject_action(),
        Command::UpdateActionArgs(args) => {
            if !controller.update_action_args(args) {
                tracing::debug!("no pending action to edit");
            }
        }
        Command::Reset => controller.reset(),
        Command::Quit => return false,
    }
    true
}

/// 执行一条命令，同时监听 Reset / Quit 以中断进行中的协作方调用
async fn run_command(
    controller: &mut RunController,
    cmd: Command,
    cmd_rx: &mut mpsc::UnboundedReceiver<Command>,
) -> bool {
    let token = controller.cancel_handle();
    let mut interrupt: Option<Command> = None;
    let keep_running = {
        let work = dispatch(controller, cmd);
        tokio::pin!(work);
        loop {
            tokio::select! {
                biased;
                more = &mut work => break more,
                incoming = cmd_rx.recv(), if interrupt.is_none() => match incoming {
                    Some(Command::Reset) => {
                        token.cancel();
                        interrupt = Some(Command::Reset);
                    }
                    Some(Command::Quit) | None => {
                        token.cancel();
                        interrupt = Some(Command::Quit);
                    }
                    Some(other) => tracing::debug!(command = ?other, "command ignored while busy"),
                },
            }
        }
    };
    match interrupt {
        Some(Command::Reset) => {
            controller.reset();
            keep_running
        }
        Some(_) => {
            controller.reset();
            false
        }
        None => keep_running,
    }
}

/// 在后台任务中托管 RunController：返回命令发送端、快照接收端与任务句柄
pub fn spawn_run_host(
    mut controller: RunController,
) -> (
    mpsc::UnboundedSender<Command>,
    watch::Receiver<RunSnapshot>,
    JoinHandle<()>,
) {
    let (cmd_tx, mut cmd_rx) = mpsc::unbounded_channel::<Command>();
    let state_rx = controller.subscribe();

    let handle = tokio::spawn(async move {
        while let Some(cmd) = cmd_rx.recv().await {
            if !run_command(&mut controller, cmd, &mut cmd_rx).await {
                break;
            }
        }
        tracing::info!("run host stopped");
    });

    (cmd_tx, state_rx, handle)
}
