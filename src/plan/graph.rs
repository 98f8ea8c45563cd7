//! 计划依赖图
//!
//! 使用邻接表和入度表做 Kahn 拓扑排序；计划获取后立即校验（无重复 id、无悬空依赖、无自依赖、无环），
//! 不合法的计划在进入审阅前就以 PlanningError 失败，而不是让调度器静默卡死。

use std::collections::{HashMap, HashSet, VecDeque};

use crate::core::PlanError;
use crate::plan::{PlanItem, PlanItemId};

pub struct DependencyGraph {
    /// 邻接表：条目 ID -> 依赖它的条目列表
    pub adjacency: HashMap<PlanItemId, Vec<PlanItemId>>,
    /// 入度表：条目 ID -> 依赖数
    pub in_degree: HashMap<PlanItemId, usize>,
    /// 声明顺序，保证拓扑序结果确定
    order: Vec<PlanItemId>,
}

impl DependencyGraph {
    /// 构建依赖图；重复 id、悬空依赖、自依赖在这里直接报错
    pub fn new(items: &[PlanItem]) -> Result<Self, PlanError> {
        let mut adjacency: HashMap<PlanItemId, Vec<PlanItemId>> = HashMap::new();
        let mut in_degree: HashMap<PlanItemId, usize> = HashMap::new();
        let mut order = Vec::with_capacity(items.len());

        for item in items {
            if in_degree.insert(item.id.clone(), 0).is_some() {
                return Err(PlanError::DuplicateId(item.id.clone()));
            }
            adjacency.insert(item.id.clone(), Vec::new());
            order.push(item.id.clone());
        }

        for item in items {
            for dep in &item.dependencies {
                if dep == &item.id {
                    return Err(PlanError::SelfDependency(item.id.clone()));
                }
                let dependents = adjacency.get_mut(dep).ok_or_else(|| {
                    PlanError::DanglingDependency {
                        item: item.id.clone(),
                        dependency: dep.clone(),
                    }
                })?;
                dependents.push(item.id.clone());
                *in_degree.entry(item.id.clone()).or_insert(0) += 1;
            }
        }

        Ok(Self {
            adjacency,
            in_degree,
            order,
        })
    }

    /// 拓扑序（入度为 0 的条目按声明顺序优先）；存在环时返回环上剩余条目
    pub fn topological_order(&self) -> Result<Vec<PlanItemId>, PlanError> {
        let mut remaining = self.in_degree.clone();
        let mut queue: VecDeque<PlanItemId> = self
            .order
            .iter()
            .filter(|id| remaining.get(*id) == Some(&0))
            .cloned()
            .collect();
        let mut sorted = Vec::with_capacity(self.order.len());

        while let Some(id) = queue.pop_front() {
            if let Some(dependents) = self.adjacency.get(&id) {
                for dependent in dependents {
                    if let Some(degree) = remaining.get_mut(dependent) {
                        *degree -= 1;
                        if *degree == 0 {
                            queue.push_back(dependent.clone());
                        }
                    }
                }
            }
            sorted.push(id);
        }

        if sorted.len() < self.order.len() {
            let done: HashSet<&PlanItemId> = sorted.iter().collect();
            let stuck = self
                .order
                .iter()
                .filter(|id| !done.contains(id))
                .cloned()
                .collect();
            return Err(PlanError::Cycle(stuck));
        }
        Ok(sorted)
    }
}

/// 校验整份计划：非空且依赖图合法
pub fn validate_plan(items: &[PlanItem]) -> Result<(), PlanError> {
    if items.is_empty() {
        return Err(PlanError::Empty);
    }
    DependencyGraph::new(items)?.topological_order().map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graph_construction_in_degree() {
        let items = vec![
            PlanItem::new("a", "A"),
            PlanItem::new("b", "B").depends_on(["a"]),
            PlanItem::new("c", "C").depends_on(["a", "b"]),
        ];
        let graph = DependencyGraph::new(&items).unwrap();
        assert_eq!(graph.in_degree.get("a"), Some(&0));
        assert_eq!(graph.in_degree.get("c"), Some(&2));
        assert_eq!(graph.adjacency["a"], vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_topological_order_respects_dependencies() {
        let items = vec![
            PlanItem::new("2", "second").depends_on(["1"]),
            PlanItem::new("1", "first"),
        ];
        let order = DependencyGraph::new(&items)
            .unwrap()
            .topological_order()
            .unwrap();
        assert_eq!(order, vec!["1".to_string(), "2".to_string()]);
    }

    #[test]
    fn test_cycle_detected() {
        let items = vec![
            PlanItem::new("a", "A").depends_on(["c"]),
            PlanItem::new("b", "B").depends_on(["a"]),
            PlanItem::new("c", "C").depends_on(["b"]),
            PlanItem::new("d", "D"),
        ];
        let err = validate_plan(&items).unwrap_err();
        assert_eq!(
            err,
            PlanError::Cycle(vec!["a".into(), "b".into(), "c".into()])
        );
    }

    #[test]
    fn test_dangling_and_duplicates() {
        let dangling = vec![PlanItem::new("a", "A").depends_on(["ghost"])];
        assert!(matches!(
            validate_plan(&dangling),
            Err(PlanError::DanglingDependency { .. })
        ));

        let dup = vec![PlanItem::new("a", "A"), PlanItem::new("a", "again")];
        assert_eq!(validate_plan(&dup), Err(PlanError::DuplicateId("a".into())));

        let selfdep = vec![PlanItem::new("a", "A").depends_on(["a"])];
        assert_eq!(
            validate_plan(&selfdep),
            Err(PlanError::SelfDependency("a".into()))
        );
        assert_eq!(validate_plan(&[]), Err(PlanError::Empty));
    }
}
