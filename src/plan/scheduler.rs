//! 步骤调度：按声明顺序选出下一个依赖已满足的 pending 条目
//!
//! 依赖满足 = 每个依赖 id 都对应一个 completed 或 skipped 的条目。悬空依赖永远不满足。
//! 返回 None 表示没有可执行步骤，即运行结束。

use crate::plan::{PlanItem, PlanModel, PlanStatus};

#[derive(Debug, Default, Clone, Copy)]
pub struct StepScheduler;

impl StepScheduler {
    pub fn select_next(plan: &PlanModel) -> Option<&PlanItem> {
        plan.items()
            .iter()
            .find(|item| item.status == PlanStatus::Pending && Self::dependencies_met(plan, item))
    }

    pub fn dependencies_met(plan: &PlanModel, item: &PlanItem) -> bool {
        item.dependencies.iter().all(|dep| {
            plan.get(dep)
                .is_some_and(|d| d.status.satisfies_dependents())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(plan: &mut PlanModel) -> Vec<String> {
        let mut picked = Vec::new();
        while let Some(next) = StepScheduler::select_next(plan).map(|it| it.id.clone()) {
            plan.mark_active(&next).unwrap();
            plan.mark_completed(&next).unwrap();
            picked.push(next);
        }
        picked
    }

    #[test]
    fn test_declaration_order_without_dependencies() {
        let mut plan = PlanModel::new(vec![
            PlanItem::new("c", "C"),
            PlanItem::new("a", "A"),
            PlanItem::new("b", "B"),
        ]);
        assert_eq!(ids(&mut plan), vec!["c", "a", "b"]);
    }

    #[test]
    fn test_dependency_selected_first_despite_order() {
        let mut plan = PlanModel::new(vec![
            PlanItem::new("2", "second").depends_on(["1"]),
            PlanItem::new("1", "first"),
        ]);
        assert_eq!(ids(&mut plan), vec!["1", "2"]);
    }

    #[test]
    fn test_skipped_dependency_counts_as_met() {
        let plan = PlanModel::new(vec![
            PlanItem::new("1", "first").with_status(PlanStatus::Skipped),
            PlanItem::new("2", "second").depends_on(["1"]),
        ]);
        assert_eq!(StepScheduler::select_next(&plan).map(|it| it.id.as_str()), Some("2"));
    }

    #[test]
    fn test_failed_dependency_blocks() {
        let plan = PlanModel::new(vec![
            PlanItem::new("1", "first").with_status(PlanStatus::Failed),
            PlanItem::new("2", "second").depends_on(["1"]),
        ]);
        assert!(StepScheduler::select_next(&plan).is_none());
    }

    #[test]
    fn test_dangling_dependency_never_selected() {
        let plan = PlanModel::new(vec![PlanItem::new("1", "first").depends_on(["ghost"])]);
        assert!(StepScheduler::select_next(&plan).is_none());
    }

    #[test]
    fn test_all_skipped_yields_none() {
        let plan = PlanModel::new(vec![PlanItem::new("1", "only").with_status(PlanStatus::Skipped)]);
        assert!(StepScheduler::select_next(&plan).is_none());
    }
}
