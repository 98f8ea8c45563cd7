//! 计划模型：有序的 PlanItem 集合与状态迁移
//!
//! 计划由计划生成方一次性给出；审阅阶段允许 pending ↔ skipped 切换与标题/描述/执行者修改，
//! 执行阶段只走 pending → active → completed / failed。条目在运行中从不删除。

use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::core::PlanError;

pub type PlanItemId = String;

/// 计划条目状态
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PlanStatus {
    #[default]
    Pending,
    Active,
    Completed,
    Skipped,
    Failed,
}

impl PlanStatus {
    /// 作为依赖时是否已满足
    pub fn satisfies_dependents(&self) -> bool {
        matches!(self, PlanStatus::Completed | PlanStatus::Skipped)
    }
}

impl fmt::Display for PlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            PlanStatus::Pending => "pending",
            PlanStatus::Active => "active",
            PlanStatus::Completed => "completed",
            PlanStatus::Skipped => "skipped",
            PlanStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// 计划中的一个工作单元
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlanItem {
    pub id: PlanItemId,
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub status: PlanStatus,
    #[serde(default)]
    pub dependencies: BTreeSet<PlanItemId>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub assigned_worker: Option<String>,
}

impl PlanItem {
    pub fn new(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            description: String::new(),
            status: PlanStatus::Pending,
            dependencies: BTreeSet::new(),
            assigned_worker: None,
        }
    }

    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn depends_on<I, S>(mut self, deps: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.dependencies.extend(deps.into_iter().map(Into::into));
        self
    }

    pub fn with_worker(mut self, worker: impl Into<String>) -> Self {
        self.assigned_worker = Some(worker.into());
        self
    }

    pub fn with_status(mut self, status: PlanStatus) -> Self {
        self.status = status;
        self
    }
}

/// 审阅阶段的人工修改；None 表示不改
#[derive(Clone, Debug, Default, Deserialize)]
pub struct PlanPatch {
    pub title: Option<String>,
    pub description: Option<String>,
    /// Some(None) 清除执行者
    pub assigned_worker: Option<Option<String>>,
}

#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct PlanModel {
    items: Vec<PlanItem>,
}

impl PlanModel {
    pub fn new(items: Vec<PlanItem>) -> Self {
        Self { items }
    }

    pub fn items(&self) -> &[PlanItem] {
        &self.items
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&PlanItem> {
        self.items.iter().find(|it| it.id == id)
    }

    /// 在声明顺序中的位置（从 0 开始）
    pub fn position(&self, id: &str) -> Option<usize> {
        self.items.iter().position(|it| it.id == id)
    }

    fn get_mut(&mut self, id: &str) -> Result<&mut PlanItem, PlanError> {
        self.items
            .iter_mut()
            .find(|it| it.id == id)
            .ok_or_else(|| PlanError::UnknownItem(id.to_string()))
    }

    pub fn active(&self) -> Option<&PlanItem> {
        self.items.iter().find(|it| it.status == PlanStatus::Active)
    }

    pub fn count(&self, status: PlanStatus) -> usize {
        self.items.iter().filter(|it| it.status == status).count()
    }

    /// 审阅阶段：pending ↔ skipped，返回新状态
    pub fn toggle_skip(&mut self, id: &str) -> Result<PlanStatus, PlanError> {
        let item = self.get_mut(id)?;
        item.status = match item.status {
            PlanStatus::Pending => PlanStatus::Skipped,
            PlanStatus::Skipped => PlanStatus::Pending,
            other => {
                return Err(PlanError::InvalidTransition {
                    id: id.to_string(),
                    from: other.to_string(),
                    to: "skipped".to_string(),
                })
            }
        };
        Ok(item.status)
    }

    pub fn patch(&mut self, id: &str, patch: PlanPatch) -> Result<(), PlanError> {
        let item = self.get_mut(id)?;
        if let Some(title) = patch.title {
            item.title = title;
        }
        if let Some(description) = patch.description {
            item.description = description;
        }
        if let Some(worker) = patch.assigned_worker {
            item.assigned_worker = worker;
        }
        Ok(())
    }

    /// pending → active；同一时刻至多一个 active
    pub fn mark_active(&mut self, id: &str) -> Result<(), PlanError> {
        if let Some(current) = self.active() {
            if current.id != id {
                return Err(PlanError::AlreadyActive(current.id.clone()));
            }
        }
        self.transition(id, PlanStatus::Pending, PlanStatus::Active)
    }

    pub fn mark_completed(&mut self, id: &str) -> Result<(), PlanError> {
        self.transition(id, PlanStatus::Active, PlanStatus::Completed)
    }

    pub fn mark_failed(&mut self, id: &str) -> Result<(), PlanError> {
        self.transition(id, PlanStatus::Active, PlanStatus::Failed)
    }

    fn transition(&mut self, id: &str, from: PlanStatus, to: PlanStatus) -> Result<(), PlanError> {
        let item = self.get_mut(id)?;
        if item.status != from {
            return Err(PlanError::InvalidTransition {
                id: id.to_string(),
                from: item.status.to_string(),
                to: to.to_string(),
            });
        }
        item.status = to;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn plan() -> PlanModel {
        PlanModel::new(vec![
            PlanItem::new("1", "Create README"),
            PlanItem::new("2", "Link docs").depends_on(["1"]),
        ])
    }

    #[test]
    fn test_toggle_skip_round_trip() {
        let mut plan = plan();
        assert_eq!(plan.toggle_skip("1"), Ok(PlanStatus::Skipped));
        assert_eq!(plan.toggle_skip("1"), Ok(PlanStatus::Pending));
        assert_eq!(
            plan.toggle_skip("9"),
            Err(PlanError::UnknownItem("9".to_string()))
        );
    }

    #[test]
    fn test_toggle_skip_rejects_active() {
        let mut plan = plan();
        plan.mark_active("1").unwrap();
        assert!(matches!(
            plan.toggle_skip("1"),
            Err(PlanError::InvalidTransition { .. })
        ));
    }

    #[test]
    fn test_single_active_slot() {
        let mut plan = plan();
        plan.mark_active("1").unwrap();
        assert_eq!(
            plan.mark_active("2"),
            Err(PlanError::AlreadyActive("1".to_string()))
        );
        plan.mark_completed("1").unwrap();
        plan.mark_active("2").unwrap();
        assert_eq!(plan.active().map(|it| it.id.as_str()), Some("2"));
        assert_eq!(plan.count(PlanStatus::Completed), 1);
    }

    #[test]
    fn test_patch_edits_fields() {
        let mut plan = plan();
        plan.patch(
            "2",
            PlanPatch {
                title: Some("Link the docs".into()),
                assigned_worker: Some(Some("writer".into())),
                ..Default::default()
            },
        )
        .unwrap();
        let item = plan.get("2").unwrap();
        assert_eq!(item.title, "Link the docs");
        assert_eq!(item.assigned_worker.as_deref(), Some("writer"));
        assert!(item.description.is_empty());
    }

    #[test]
    fn test_completed_requires_active() {
        let mut plan = plan();
        assert!(plan.mark_completed("1").is_err());
        assert_eq!(plan.get("1").unwrap().status, PlanStatus::Pending);
    }
}
