//! RunController：运行状态机
//!
//! 唯一有权修改 AgentStatus 的组件。组合 PlanModel / ActionGate / TranscriptLog / TurnDriver，
//! 通过三个协作方边界（PlanGenerator、SessionFactory + ConversationSession、ActionExecutor）推进运行：
//!
//! idle|completed|failed --start--> planning --> plan_review --approve_plan--> thinking
//! thinking --工具调用--> action_review --approve_action--> executing --> thinking
//! thinking --无剩余步骤--> completed；thinking --TurnError--> failed
//! action_review --reject_action--> idle；任意状态 --reset--> idle
//!
//! 每次协作方调用都经过 guarded()：受运行的取消令牌与可选超时约束。

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::core::{
    guarded, AgentStatus, ExecutionError, PlanError, PlanningError, RecoveryAction, RecoveryEngine,
    RunFailure, RunSnapshot, SessionSupervisor, TurnError,
};
use crate::memory::{preview, EntryKind, TranscriptEntry, TranscriptLog};
use crate::plan::{validate_plan, PlanItem, PlanModel, PlanPatch, PlanStatus, StepScheduler};
use crate::react::{
    ActionGate, CompletionSignal, ConversationSession, PendingAction, PlanGenerator, SessionFactory,
    TurnDriver, TurnOutcome, DEFAULT_COMPLETION_PHRASES,
};
use crate::tools::ActionExecutor;

/// 运行依赖的三个外部协作方
#[derive(Clone)]
pub struct Collaborators {
    pub planner: Arc<dyn PlanGenerator>,
    pub sessions: Arc<dyn SessionFactory>,
    pub executor: Arc<dyn ActionExecutor>,
}

/// 运行参数（来自配置的 [run] 段）
#[derive(Debug, Clone)]
pub struct RunSettings {
    pub completion_phrases: Vec<String>,
    /// 0 表示不限制
    pub max_auto_advances: usize,
    pub result_preview_chars: usize,
    pub plan_timeout: Option<Duration>,
    pub turn_timeout: Option<Duration>,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            completion_phrases: DEFAULT_COMPLETION_PHRASES.iter().map(|s| s.to_string()).collect(),
            max_auto_advances: 3,
            result_preview_chars: 200,
            plan_timeout: None,
            turn_timeout: None,
        }
    }
}

pub struct RunController {
    collaborators: Collaborators,
    settings: RunSettings,
    status: AgentStatus,
    run_id: Option<Uuid>,
    goal: Option<String>,
    plan: PlanModel,
    gate: ActionGate,
    transcript: TranscriptLog,
    session: Option<Box<dyn ConversationSession>>,
    driver: TurnDriver,
    supervisor: SessionSupervisor,
    recovery: RecoveryEngine,
    snapshot_tx: watch::Sender<RunSnapshot>,
}

impl RunController {
    pub fn new(collaborators: Collaborators, settings: RunSettings) -> Self {
        let (snapshot_tx, _) = watch::channel(RunSnapshot::default());
        let driver = TurnDriver::new(settings.completion_phrases.clone(), settings.max_auto_advances);
        Self {
            collaborators,
            settings,
            status: AgentStatus::Idle,
            run_id: None,
            goal: None,
            plan: PlanModel::default(),
            gate: ActionGate::new(),
            transcript: TranscriptLog::new(),
            session: None,
            driver,
            supervisor: SessionSupervisor::new(),
            recovery: RecoveryEngine::new(),
            snapshot_tx,
        }
    }

    pub fn status(&self) -> AgentStatus {
        self.status
    }

    pub fn run_id(&self) -> Option<Uuid> {
        self.run_id
    }

    pub fn goal(&self) -> Option<&str> {
        self.goal.as_deref()
    }

    pub fn plan(&self) -> &PlanModel {
        &self.plan
    }

    pub fn pending_action(&self) -> Option<&PendingAction> {
        self.gate.current()
    }

    pub fn transcript(&self) -> &[TranscriptEntry] {
        self.transcript.all()
    }

    pub fn snapshot(&self) -> RunSnapshot {
        RunSnapshot {
            run_id: self.run_id,
            status: self.status,
            goal: self.goal.clone(),
            plan: self.plan.items().to_vec(),
            pending_action: self.gate.current().cloned(),
            transcript: self.transcript.all().to_vec(),
        }
    }

    /// 每次状态变化后推送新快照
    pub fn subscribe(&self) -> watch::Receiver<RunSnapshot> {
        self.snapshot_tx.subscribe()
    }

    /// 当前运行的取消令牌；取消后进行中的协作方调用被中断，随后应调用 reset
    pub fn cancel_handle(&self) -> CancellationToken {
        self.supervisor.cancel_token()
    }

    fn publish(&self) {
        self.snapshot_tx.send_replace(self.snapshot());
    }

    fn set_status(&mut self, status: AgentStatus) {
        if self.status != status {
            tracing::debug!(from = %self.status, to = %status, "status transition");
        }
        self.status = status;
        self.publish();
    }

    /// 开始新运行：idle / completed / failed 以外的状态下为空操作
    pub async fn start(&mut self, goal: impl Into<String>, context_summary: &str) {
        if !self.status.accepts_start() {
            tracing::debug!(status = %self.status, "start ignored");
            return;
        }
        let goal = goal.into();

        if self.supervisor.is_cancelled() {
            self.supervisor.cancel_and_renew();
        }
        let run_id = Uuid::new_v4();
        self.run_id = Some(run_id);
        self.goal = Some(goal.clone());
        self.plan = PlanModel::default();
        self.gate.clear();
        self.transcript = TranscriptLog::new();
        self.session = None;
        self.driver.reset();
        self.transcript.append(EntryKind::User, goal.as_str());
        tracing::info!(%run_id, "run started");
        self.set_status(AgentStatus::Planning);

        let token = self.supervisor.cancel_token();
        let acquired = guarded(
            &token,
            self.settings.plan_timeout,
            self.collaborators.planner.generate(&goal, context_summary),
        )
        .await
        .unwrap_or_else(|i| Err(PlanningError::from(i)))
        .and_then(|items| {
            validate_plan(&items)?;
            Ok(items)
        });

        match acquired {
            Ok(items) => {
                let items = items
                    .into_iter()
                    .map(|item| item.with_status(PlanStatus::Pending))
                    .collect();
                self.plan = PlanModel::new(items);
                self.transcript.append(EntryKind::Summary, plan_summary(&self.plan));
                tracing::info!(%run_id, steps = self.plan.len(), "plan ready for review");
                self.set_status(AgentStatus::PlanReview);
            }
            Err(e) => self.fail(e.into()),
        }
    }

    fn ensure_review(&self) -> Result<(), PlanError> {
        if self.status != AgentStatus::PlanReview {
            return Err(PlanError::NotInReview(self.status));
        }
        Ok(())
    }

    /// 审阅阶段：pending ↔ skipped
    pub fn toggle_skip(&mut self, id: &str) -> Result<PlanStatus, PlanError> {
        self.ensure_review()?;
        let status = self.plan.toggle_skip(id)?;
        self.publish();
        Ok(status)
    }

    /// 审阅阶段：修改标题 / 描述 / 执行者
    pub fn patch_item(&mut self, id: &str, patch: PlanPatch) -> Result<(), PlanError> {
        self.ensure_review()?;
        self.plan.patch(id, patch)?;
        self.publish();
        Ok(())
    }

    /// 批准计划（可带整份编辑后的计划），打开会话并运行到下一个暂停点
    ///
    /// 编辑后的计划必须与原计划 id 集合一致、只含 pending / skipped、依赖图合法；否则返回错误且不做任何修改。
    pub async fn approve_plan(&mut self, edited: Option<Vec<PlanItem>>) -> Result<(), PlanError> {
        self.ensure_review()?;
        if let Some(items) = edited {
            self.check_edited_plan(&items)?;
            self.plan = PlanModel::new(items);
        }
        tracing::info!(
            steps = self.plan.len(),
            skipped = self.plan.count(PlanStatus::Skipped),
            "plan approved"
        );
        self.set_status(AgentStatus::Thinking);

        let goal = self.goal.clone().unwrap_or_default();
        let token = self.supervisor.cancel_token();
        let opened = guarded(
            &token,
            self.settings.turn_timeout,
            self.collaborators.sessions.open(&goal, self.plan.items()),
        )
        .await
        .unwrap_or_else(|i| Err(TurnError::from(i)));

        match opened {
            Ok(session) => {
                self.session = Some(session);
                self.drive(None).await;
            }
            Err(e) => self.fail(e.into()),
        }
        Ok(())
    }

    fn check_edited_plan(&self, items: &[PlanItem]) -> Result<(), PlanError> {
        let acquired: BTreeSet<&str> = self.plan.items().iter().map(|it| it.id.as_str()).collect();
        let edited: BTreeSet<&str> = items.iter().map(|it| it.id.as_str()).collect();
        if acquired != edited || items.len() != self.plan.len() {
            return Err(PlanError::ItemSetChanged);
        }
        if let Some(item) = items
            .iter()
            .find(|it| !matches!(it.status, PlanStatus::Pending | PlanStatus::Skipped))
        {
            return Err(PlanError::InvalidTransition {
                id: item.id.clone(),
                from: PlanStatus::Pending.to_string(),
                to: item.status.to_string(),
            });
        }
        validate_plan(items)
    }

    /// 批准当前提议：执行、记录结果、回灌会话并继续；不在 action_review 时为空操作
    pub async fn approve_action(&mut self) {
        if self.status != AgentStatus::ActionReview {
            tracing::debug!(status = %self.status, "approve_action ignored");
            return;
        }
        let Some(action) = self.gate.take() else {
            tracing::debug!("approve_action with empty gate");
            return;
        };
        tracing::info!(tool = %action.tool_name, call_id = %action.id, "action approved");
        self.set_status(AgentStatus::Executing);

        let token = self.supervisor.cancel_token();
        let executed = guarded(
            &token,
            None,
            self.collaborators.executor.execute(&action.tool_name, &action.args),
        )
        .await
        .unwrap_or_else(|i| Err(ExecutionError::from(i)));

        let result_text = match executed {
            Ok(text) => text,
            Err(e) => {
                tracing::warn!(tool = %action.tool_name, error = %e, "tool execution failed");
                match self.recovery.handle(&RunFailure::Execution(e)) {
                    RecoveryAction::FeedBack(text) => text,
                    other => {
                        self.apply_recovery(other);
                        return;
                    }
                }
            }
        };
        self.transcript.append_tool(
            EntryKind::Result,
            preview(&result_text, self.settings.result_preview_chars),
            &action.tool_name,
            None,
        );
        self.set_status(AgentStatus::Thinking);

        if self.session.is_none() {
            self.fail(TurnError::Session("no open conversation session".to_string()).into());
            return;
        }
        let Some(session) = self.session.as_deref_mut() else {
            return;
        };
        let outcome = guarded(
            &token,
            self.settings.turn_timeout,
            self.driver
                .feed_result(session, &action.id, &result_text, &mut self.transcript),
        )
        .await
        .unwrap_or_else(|i| Err(TurnError::from(i)));
        self.drive(Some(outcome)).await;
    }

    /// 拒绝当前提议：放弃运行并回到 idle；计划条目状态保持原样
    pub fn reject_action(&mut self) {
        if self.status != AgentStatus::ActionReview {
            tracing::debug!(status = %self.status, "reject_action ignored");
            return;
        }
        let tool = self
            .gate
            .reject()
            .map(|action| action.tool_name)
            .unwrap_or_default();
        let action = self.recovery.handle(&RunFailure::RejectedAction(tool));
        self.apply_recovery(action);
    }

    /// 替换当前提议的参数；闸门为空时返回 false
    pub fn update_action_args(&mut self, args: Map<String, Value>) -> bool {
        if self.status != AgentStatus::ActionReview {
            return false;
        }
        let edited = self.gate.edit_args(args);
        if edited {
            self.publish();
        }
        edited
    }

    /// 任意状态回到 idle：取消进行中的调用，清空计划、闸门、transcript、目标并丢弃会话
    pub fn reset(&mut self) {
        self.supervisor.cancel_and_renew();
        if let Some(run_id) = self.run_id.take() {
            tracing::info!(%run_id, "run reset");
        }
        self.goal = None;
        self.plan = PlanModel::default();
        self.gate.clear();
        self.transcript = TranscriptLog::new();
        self.session = None;
        self.driver.reset();
        self.set_status(AgentStatus::Idle);
    }

    /// 循环推进步骤，直到出现待审批的提议、计划完成或致命错误
    async fn drive(&mut self, mut carried: Option<Result<TurnOutcome, TurnError>>) {
        loop {
            let outcome = match carried.take() {
                Some(outcome) => outcome,
                None => {
                    let Some(step) = StepScheduler::select_next(&self.plan).cloned() else {
                        self.finish();
                        return;
                    };
                    if let Err(e) = self.plan.mark_active(&step.id) {
                        self.fail(TurnError::Session(e.to_string()).into());
                        return;
                    }
                    let position = self.plan.position(&step.id).map_or(1, |p| p + 1);
                    let total = self.plan.len();
                    tracing::info!(step = %step.id, position, total, "step started");
                    self.set_status(AgentStatus::Thinking);

                    if self.session.is_none() {
                        self.fail(TurnError::Session("no open conversation session".to_string()).into());
                        return;
                    }
                    let Some(session) = self.session.as_deref_mut() else {
                        return;
                    };
                    let token = self.supervisor.cancel_token();
                    guarded(
                        &token,
                        self.settings.turn_timeout,
                        self.driver
                            .run_turn(&step, position, total, session, &mut self.transcript),
                    )
                    .await
                    .unwrap_or_else(|i| Err(TurnError::from(i)))
                }
            };

            match outcome {
                Ok(TurnOutcome::Proposal(action)) => {
                    self.await_review(action);
                    return;
                }
                Ok(TurnOutcome::StepComplete(signal)) => self.complete_active(signal),
                Err(e) => {
                    self.fail(e.into());
                    return;
                }
            }
        }
    }

    fn await_review(&mut self, action: PendingAction) {
        let text = format!("{} {}", action.tool_name, Value::Object(action.args.clone()));
        self.transcript.append_tool(
            EntryKind::Call,
            text,
            &action.tool_name,
            Some(action.args.clone()),
        );
        tracing::info!(tool = %action.tool_name, call_id = %action.id, "awaiting action review");
        if let Err(e) = self.gate.propose(action) {
            tracing::error!(error = %e, "proposal dropped");
        }
        self.set_status(AgentStatus::ActionReview);
    }

    fn complete_active(&mut self, signal: CompletionSignal) {
        let Some(id) = self.plan.active().map(|it| it.id.clone()) else {
            return;
        };
        match self.plan.mark_completed(&id) {
            Ok(()) => tracing::info!(step = %id, ?signal, "step completed"),
            Err(e) => tracing::error!(step = %id, error = %e, "step completion rejected"),
        }
        self.publish();
    }

    fn finish(&mut self) {
        let goal = self.goal.clone().unwrap_or_default();
        let completed = self.plan.count(PlanStatus::Completed);
        let skipped = self.plan.count(PlanStatus::Skipped);
        self.transcript.append(
            EntryKind::Response,
            format!("Goal complete: {goal}. {completed} step(s) completed, {skipped} skipped."),
        );
        self.session = None;
        if let Some(run_id) = self.run_id {
            tracing::info!(%run_id, completed, skipped, "run completed");
        }
        self.set_status(AgentStatus::Completed);
    }

    fn fail(&mut self, failure: RunFailure) {
        let action = self.recovery.handle(&failure);
        self.apply_recovery(action);
    }

    fn apply_recovery(&mut self, action: RecoveryAction) {
        match action {
            RecoveryAction::Halt(message) => {
                tracing::error!(run_id = ?self.run_id, "{}", message);
                if let Some(id) = self.plan.active().map(|it| it.id.clone()) {
                    if let Err(e) = self.plan.mark_failed(&id) {
                        tracing::error!(step = %id, error = %e, "could not mark step failed");
                    }
                }
                self.gate.clear();
                self.session = None;
                self.transcript.append(EntryKind::Error, message);
                self.set_status(AgentStatus::Failed);
            }
            RecoveryAction::Abandon(message) => {
                tracing::info!(run_id = ?self.run_id, "{}", message);
                self.gate.clear();
                self.session = None;
                self.transcript.append(EntryKind::Error, message);
                self.set_status(AgentStatus::Idle);
            }
            RecoveryAction::Discard => {
                tracing::debug!("cancelled collaborator call discarded");
            }
            RecoveryAction::FeedBack(text) => {
                tracing::warn!(%text, "feedback outside tool execution ignored");
            }
        }
    }
}

fn plan_summary(plan: &PlanModel) -> String {
    let mut s = format!("Plan ({} steps):", plan.len());
    for (idx, item) in plan.items().iter().enumerate() {
        s.push_str(&format!("\n{}. [{}] {}", idx + 1, item.id, item.title));
        if !item.dependencies.is_empty() {
            let deps: Vec<&str> = item.dependencies.iter().map(String::as_str).collect();
            s.push_str(&format!(" (after {})", deps.join(", ")));
        }
    }
    s
}
