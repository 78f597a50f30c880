// ==========================================
// 生产执行核心 - 方案节点图分析
// ==========================================
// 边方向: 前置节点 -> 后继节点
// 职责: 环检测、拓扑序、就绪节点、最长路径、并行分支数
// ==========================================

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;
use petgraph::Direction;
use std::collections::{BTreeMap, HashMap, HashSet};

use crate::domain::plan::ProductionPlan;
use crate::engine::error::{EngineError, EngineResult, NodeConflict};

pub struct PlanGraph<'a> {
    graph: DiGraphMap<&'a str, ()>,
    order: Vec<&'a str>,
    unknown_predecessors: Vec<NodeConflict>,
}

impl<'a> PlanGraph<'a> {
    /// 构建节点图
    ///
    /// 引用不存在的前置节点记为冲突（该边忽略）; 存在环时整体拒绝。
    pub fn build(plan: &'a ProductionPlan) -> EngineResult<Self> {
        let mut graph: DiGraphMap<&'a str, ()> = DiGraphMap::new();
        let mut unknown_predecessors = Vec::new();

        for node in &plan.nodes {
            graph.add_node(node.node_id.as_str());
        }

        for node in &plan.nodes {
            for pred in &node.predecessors {
                if graph.contains_node(pred.as_str()) {
                    graph.add_edge(pred.as_str(), node.node_id.as_str(), ());
                } else {
                    unknown_predecessors.push(NodeConflict::new(
                        node.node_id.clone(),
                        format!("前置节点{}不存在", pred),
                    ));
                }
            }
        }

        let order = toposort(&graph, None).map_err(|cycle| {
            EngineError::ValidationError(format!(
                "方案{}的工序图存在环（涉及节点{}）",
                plan.plan_id,
                cycle.node_id()
            ))
        })?;

        Ok(Self {
            graph,
            order,
            unknown_predecessors,
        })
    }

    /// 拓扑序
    pub fn order(&self) -> &[&'a str] {
        &self.order
    }

    pub fn unknown_predecessors(&self) -> &[NodeConflict] {
        &self.unknown_predecessors
    }

    pub fn predecessors(&self, node_id: &'a str) -> Vec<&'a str> {
        self.graph.neighbors_directed(node_id, Direction::Incoming).collect()
    }

    pub fn successors(&self, node_id: &'a str) -> Vec<&'a str> {
        self.graph.neighbors_directed(node_id, Direction::Outgoing).collect()
    }

    /// 就绪节点: 未完成且全部前置已完成（源节点天然就绪）,按拓扑序
    pub fn ready_nodes(&self, completed: &HashSet<&str>) -> Vec<&'a str> {
        self.order
            .iter()
            .copied()
            .filter(|n| !completed.contains(n))
            .filter(|n| self.predecessors(*n).iter().all(|p| completed.contains(p)))
            .collect()
    }

    /// 最长路径（按节点权重累加）
    pub fn longest_path<F>(&self, weight: F) -> f64
    where
        F: Fn(&str) -> f64,
    {
        let mut finish: HashMap<&str, f64> = HashMap::new();
        let mut longest = 0.0_f64;
        for &node in &self.order {
            let start = self
                .predecessors(node)
                .iter()
                .filter_map(|p| finish.get(p))
                .fold(0.0_f64, |acc, v| acc.max(*v));
            let end = start + weight(node).max(0.0);
            longest = longest.max(end);
            finish.insert(node, end);
        }
        longest
    }

    /// 并行分支数: 同一深度层上的最大节点数
    pub fn parallel_paths(&self) -> usize {
        let mut depth: HashMap<&str, usize> = HashMap::new();
        let mut per_level: BTreeMap<usize, usize> = BTreeMap::new();
        for &node in &self.order {
            let d = self
                .predecessors(node)
                .iter()
                .filter_map(|p| depth.get(p))
                .map(|d| d + 1)
                .max()
                .unwrap_or(0);
            depth.insert(node, d);
            *per_level.entry(d).or_default() += 1;
        }
        per_level.values().copied().max().unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::plan::{OperationNode, PlanSummary};
    use crate::domain::types::{LaunchStatus, PlanStatus, SchedulingMode};
    use chrono::Utc;

    fn plan(edges: &[(&str, &[&str])]) -> ProductionPlan {
        ProductionPlan {
            plan_id: "P1".to_string(),
            work_order_code: "WO-1".to_string(),
            status: PlanStatus::Production,
            launch_status: LaunchStatus::None,
            launched_at: None,
            quantity: 1.0,
            scheduling_mode: SchedulingMode::Fifo,
            nodes: edges
                .iter()
                .map(|(id, preds)| OperationNode {
                    node_id: id.to_string(),
                    operation_id: "OP".to_string(),
                    output_code: None,
                    output_quantity: 1.0,
                    material_inputs: vec![],
                    predecessors: preds.iter().map(|p| p.to_string()).collect(),
                })
                .collect(),
            summary: PlanSummary::default(),
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_linear_chain() {
        let p = plan(&[("A", &[]), ("B", &["A"]), ("C", &["B"])]);
        let g = PlanGraph::build(&p).unwrap();
        assert_eq!(g.order(), &["A", "B", "C"]);
        assert_eq!(g.parallel_paths(), 1);
        assert_eq!(g.ready_nodes(&HashSet::new()), vec!["A"]);
        assert_eq!(g.ready_nodes(&HashSet::from(["A"])), vec!["B"]);
        assert_eq!(g.longest_path(|_| 10.0), 30.0);
    }

    #[test]
    fn test_diamond() {
        let p = plan(&[("A", &[]), ("B", &["A"]), ("C", &["A"]), ("D", &["B", "C"])]);
        let g = PlanGraph::build(&p).unwrap();
        assert_eq!(g.parallel_paths(), 2);
        let weights = HashMap::from([("A", 5.0), ("B", 10.0), ("C", 20.0), ("D", 1.0)]);
        assert_eq!(g.longest_path(|n| weights[n]), 26.0);
        assert_eq!(g.ready_nodes(&HashSet::from(["A", "B"])), vec!["C"]);
    }

    #[test]
    fn test_cycle_rejected() {
        let p = plan(&[("A", &["B"]), ("B", &["A"])]);
        assert!(matches!(PlanGraph::build(&p), Err(EngineError::ValidationError(_))));

        let self_loop = plan(&[("A", &["A"])]);
        assert!(PlanGraph::build(&self_loop).is_err());
    }

    #[test]
    fn test_unknown_predecessor_reported() {
        let p = plan(&[("A", &[]), ("B", &["X"])]);
        let g = PlanGraph::build(&p).unwrap();
        assert_eq!(g.unknown_predecessors().len(), 1);
        assert_eq!(g.unknown_predecessors()[0].node_id, "B");
    }
}
