//! Steward - 监督式任务编排
//!
//! 入口：初始化日志、加载配置、启动运行宿主，并在终端中扮演监督者（审阅计划、批准 / 拒绝 / 编辑工具调用）。

use std::path::PathBuf;
use std::time::Duration;

use anyhow::Context;
use clap::Parser;
use serde_json::{Map, Value};
use tokio::io::{AsyncBufReadExt, BufReader};

use steward::config::{load_config, AppConfig};
use steward::core::{build_controller, spawn_run_host};
use steward::{AgentStatus, Command, RunSnapshot};

#[derive(Parser, Debug)]
#[command(name = "steward", version, about = "Supervised task orchestration in the terminal")]
struct Cli {
    /// 要完成的目标
    goal: String,

    /// 附加给计划生成方的上下文摘要
    #[arg(long, default_value = "")]
    context: String,

    /// 额外的配置文件（覆盖 config/default.toml）
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    steward::observability::init();
    let cli = Cli::parse();

    let cfg = load_config(cli.config.clone()).unwrap_or_else(|e| {
        tracing::warn!("Config load failed ({}), using defaults", e);
        AppConfig::default()
    });

    tracing::info!(app = %cfg.app.name, provider = %cfg.llm.provider, "starting");

    let (cmd_tx, mut state_rx, handle) = spawn_run_host(build_controller(&cfg));
    cmd_tx
        .send(Command::Start {
            goal: cli.goal.clone(),
            context: cli.context.clone(),
        })
        .context("Run host is not accepting commands")?;

    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut printed = 0u64;
    let mut started = false;

    loop {
        let snapshot = state_rx.borrow_and_update().clone();
        printed = print_new_entries(&snapshot, printed);
        if snapshot.status != AgentStatus::Idle {
            started = true;
        }

        let command = match snapshot.status {
            AgentStatus::PlanReview => {
                print_plan(&snapshot);
                println!("[a] approve  [s <id>] toggle skip  [q] quit");
                let Some(line) = stdin.next_line().await? else { break };
                match parse_plan_review(line.trim()) {
                    Some(cmd) => cmd,
                    None => continue,
                }
            }
            AgentStatus::ActionReview => {
                if let Some(action) = &snapshot.pending_action {
                    println!(
                        "Proposed: {} {}",
                        action.tool_name,
                        Value::Object(action.args.clone())
                    );
                }
                println!("[y] approve  [n] reject  [e <json args>] edit  [q] quit");
                let Some(line) = stdin.next_line().await? else { break };
                match parse_action_review(line.trim()) {
                    Some(cmd) => cmd,
                    None => continue,
                }
            }
            AgentStatus::Completed | AgentStatus::Failed => break,
            AgentStatus::Idle if started => break,
            _ => {
                if state_rx.changed().await.is_err() {
                    break;
                }
                continue;
            }
        };

        let quit = matches!(command, Command::Quit);
        // 被拒绝的编辑不会推送新快照
        let edit = matches!(command, Command::ToggleSkip(_) | Command::UpdateActionArgs(_));
        cmd_tx.send(command).context("Run host stopped unexpectedly")?;
        if quit {
            break;
        }
        if edit {
            let _ = tokio::time::timeout(Duration::from_millis(500), state_rx.changed()).await;
        } else if state_rx.changed().await.is_err() {
            break;
        }
    }

    println!("Run finished: {}", state_rx.borrow().status);
    let _ = cmd_tx.send(Command::Quit);
    handle.await.context("Run host task failed")?;
    Ok(())
}

fn print_new_entries(snapshot: &RunSnapshot, printed: u64) -> u64 {
    let mut last = printed;
    for entry in snapshot.transcript.iter().filter(|e| e.id > printed) {
        let kind = serde_json::to_value(entry.kind)
            .ok()
            .and_then(|v| v.as_str().map(str::to_string))
            .unwrap_or_default();
        println!("[{}] {}", kind, entry.text);
        last = entry.id;
    }
    last
}

fn print_plan(snapshot: &RunSnapshot) {
    println!("Plan:");
    for item in &snapshot.plan {
        let deps: Vec<&str> = item.dependencies.iter().map(String::as_str).collect();
        println!(
            "  [{}] {} ({}){}",
            item.id,
            item.title,
            item.status,
            if deps.is_empty() {
                String::new()
            } else {
                format!(" after {}", deps.join(", "))
            }
        );
    }
}

fn parse_plan_review(line: &str) -> Option<Command> {
    match line.split_once(' ') {
        Some(("s", id)) => Some(Command::ToggleSkip(id.trim().to_string())),
        _ => match line {
            "a" | "approve" => Some(Command::ApprovePlan(None)),
            "q" | "quit" => Some(Command::Quit),
            _ => None,
        },
    }
}

fn parse_action_review(line: &str) -> Option<Command> {
    match line.split_once(' ') {
        Some(("e", json)) => match serde_json::from_str::<Map<String, Value>>(json.trim()) {
            Ok(args) => Some(Command::UpdateActionArgs(args)),
            Err(e) => {
                eprintln!("Invalid JSON args: {e}");
                None
            }
        },
        _ => match line {
            "y" | "yes" => Some(Command::ApproveAction),
            "n" | "no" => Some(Command::RejectAction),
            "q" | "quit" => Some(Command::Quit),
            _ => None,
        },
    }
}
