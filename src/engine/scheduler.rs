// ==========================================
// 生产执行核心 - 任务排程器
// ==========================================
// 职责:
// 1. 判定就绪节点（前置全部完成,源节点天然就绪）
// 2. 为就绪节点选择工人与子工位
// 3. 计算 FIFO 时间线或优化序号
// 4. 落库新任务
// 红线: 只追加到已提交的工人队列尾部,不重算已入队任务
// ==========================================

use chrono::{DateTime, Utc};
use rusqlite::Connection;
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::sync::Arc;
use tracing::debug;

use crate::domain::assignment::{minutes_to_duration, WorkerAssignment};
use crate::domain::master_data::{OperationDefinition, Worker};
use crate::domain::plan::{MaterialInputIssue, ProductionPlan};
use crate::domain::types::{AssignmentStatus, SchedulingMode};
use crate::engine::eligibility::{
    effective_efficiency, effective_time, eligible_workers, ineligibility_reason, select_substation,
};
use crate::engine::error::{EngineResult, NodeConflict, WorkerSample};
use crate::engine::plan_graph::PlanGraph;
use crate::engine::strategy::{validate_ranks, HeuristicCandidate, OptimizationHeuristic};
use crate::repository::{AssignmentRepository, MasterDataRepository, OccupancyRepository};

/// 无可用工人时, 原因说明最多列出的工人数
const MAX_REASONS_PER_NODE: usize = 3;

// ==========================================
// SchedulingRound - 一轮排程结果
// ==========================================
#[derive(Debug, Clone, Default)]
pub struct SchedulingRound {
    /// 本轮新建任务（已落库）
    pub created: Vec<WorkerAssignment>,
    /// 就绪但无可用工人/工位的节点
    pub unassigned: Vec<NodeConflict>,
    /// 校验失败的节点
    pub conflicts: Vec<NodeConflict>,
    /// 等待前置完成的节点
    pub waiting_on_dependencies: Vec<String>,
}

impl SchedulingRound {
    /// 工人争用排队的任务 + 依赖未满足的节点
    pub fn queued_count(&self) -> usize {
        self.created
            .iter()
            .filter(|a| a.status == AssignmentStatus::Queued)
            .count()
            + self.waiting_on_dependencies.len()
    }
}

// ==========================================
// PlanMetrics - 方案排程指标
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PlanMetrics {
    pub total_nodes: usize,
    pub assigned_count: usize,
    pub total_workers: usize,
    /// 最长路径（分钟）
    pub estimated_duration: f64,
    pub parallel_paths: usize,
}

// ==========================================
// AssignmentScheduler - 任务排程器
// ==========================================
pub struct AssignmentScheduler {
    heuristic: Arc<dyn OptimizationHeuristic>,
    default_efficiency: f64,
}

impl AssignmentScheduler {
    pub fn new(heuristic: Arc<dyn OptimizationHeuristic>, default_efficiency: f64) -> Self {
        Self {
            heuristic,
            default_efficiency,
        }
    }

    pub fn heuristic_name(&self) -> &'static str {
        self.heuristic.name()
    }

    /// 为当前就绪且尚未分配的节点排程并落库
    pub fn schedule_ready_nodes(
        &self,
        tx: &Connection,
        plan: &ProductionPlan,
        graph: &PlanGraph<'_>,
        is_urgent: bool,
        now: DateTime<Utc>,
    ) -> EngineResult<SchedulingRound> {
        let existing = AssignmentRepository::list_by_plan_tx(tx, &plan.plan_id)?;

        let mut completed_at: HashMap<&str, DateTime<Utc>> = HashMap::new();
        let mut covered: HashSet<&str> = HashSet::new();
        let mut workers_on_node: HashMap<&str, HashSet<String>> = HashMap::new();
        for a in &existing {
            workers_on_node
                .entry(a.node_id.as_str())
                .or_default()
                .insert(a.worker_id.clone());
            if a.status == AssignmentStatus::Cancelled {
                continue;
            }
            covered.insert(a.node_id.as_str());
            if a.status == AssignmentStatus::Completed {
                let end = a.actual_end.unwrap_or(now);
                completed_at
                    .entry(a.node_id.as_str())
                    .and_modify(|t| *t = (*t).max(end))
                    .or_insert(end);
            }
        }
        let completed: HashSet<&str> = completed_at.keys().copied().collect();

        let operations = MasterDataRepository::operations_tx(tx)?;
        let mut round = SchedulingRound {
            conflicts: validate_nodes(plan, graph, &operations),
            ..Default::default()
        };
        let conflicted: HashSet<&str> = round.conflicts.iter().map(|c| c.node_id.as_str()).collect();

        let ready: Vec<&str> = graph
            .ready_nodes(&completed)
            .into_iter()
            .filter(|n| !covered.contains(n) && !conflicted.contains(n))
            .collect();
        let ready_set: HashSet<&str> = ready.iter().copied().collect();
        round.waiting_on_dependencies = graph
            .order()
            .iter()
            .filter(|n| !covered.contains(*n) && !conflicted.contains(*n) && !ready_set.contains(*n))
            .map(|n| n.to_string())
            .collect();

        if ready.is_empty() {
            return Ok(round);
        }

        let workers = MasterDataRepository::workers_tx(tx)?;
        let substations = MasterDataRepository::substations_tx(tx)?;
        let occupied = OccupancyRepository::occupied_substations_tx(tx)?;
        let mut substation_load: HashMap<String, i64> = HashMap::new();
        for s in &substations {
            substation_load.insert(
                s.substation_id.clone(),
                AssignmentRepository::substation_load_tx(tx, &s.substation_id)?,
            );
        }

        // worker_id -> 队列尾部（None = 无未结束任务）
        let mut tails: HashMap<String, Option<DateTime<Utc>>> = HashMap::new();
        let mut next_seq = AssignmentRepository::next_sequence_number_tx(tx)?;
        let mut ready_at: HashMap<String, DateTime<Utc>> = HashMap::new();
        let empty = HashSet::new();

        for node_id in ready {
            let Some(node) = plan.node(node_id) else {
                continue;
            };
            let Some(operation) = operations.get(&node.operation_id) else {
                continue;
            };

            let dependency_ready = graph
                .predecessors(node_id)
                .iter()
                .filter_map(|p| completed_at.get(p))
                .fold(now, |acc, t| acc.max(*t));

            let on_node = workers_on_node.get(node_id).unwrap_or(&empty);
            let eligible = eligible_workers(&workers, operation, on_node);
            if eligible.is_empty() {
                round
                    .unassigned
                    .push(NodeConflict::new(node_id, no_worker_reason(&workers, operation, on_node)));
                continue;
            }

            let Some(substation) = select_substation(&substations, &operation.operation_id, &occupied, &substation_load)
            else {
                round.unassigned.push(NodeConflict::new(
                    node_id,
                    format!("无可执行工序{}的在用工位", operation.operation_id),
                ));
                continue;
            };

            let mut best: Option<(DateTime<Utc>, &Worker, Option<DateTime<Utc>>)> = None;
            for worker in eligible {
                let tail = match tails.get(&worker.worker_id) {
                    Some(t) => *t,
                    None => {
                        let t = AssignmentRepository::worker_tail_tx(tx, &worker.worker_id)?;
                        tails.insert(worker.worker_id.clone(), t);
                        t
                    }
                };
                let start = dependency_ready.max(tail.unwrap_or(now));
                let better = match &best {
                    None => true,
                    Some((best_start, best_worker, _)) => {
                        start < *best_start
                            || (start == *best_start
                                && (worker.efficiency > best_worker.efficiency
                                    || (worker.efficiency == best_worker.efficiency
                                        && worker.worker_id < best_worker.worker_id)))
                    }
                };
                if better {
                    best = Some((start, worker, tail));
                }
            }
            let Some((expected_start, worker, tail)) = best else {
                continue;
            };

            let efficiency = effective_efficiency(worker, self.default_efficiency);
            let effective = effective_time(operation.nominal_time, efficiency);
            let planned_end = expected_start + minutes_to_duration(effective);
            let status = if tail.is_some() {
                AssignmentStatus::Queued
            } else {
                AssignmentStatus::Ready
            };

            let assignment = WorkerAssignment {
                assignment_id: uuid::Uuid::new_v4().to_string(),
                work_order_code: plan.work_order_code.clone(),
                plan_id: plan.plan_id.clone(),
                node_id: node_id.to_string(),
                worker_id: worker.worker_id.clone(),
                station_id: Some(substation.station_id.clone()),
                substation_id: Some(substation.substation_id.clone()),
                scheduling_mode: plan.scheduling_mode,
                nominal_time: operation.nominal_time.max(0.0),
                effective_time: effective,
                expected_start,
                optimized_start: None,
                optimized_index: None,
                planned_end,
                actual_start: None,
                actual_end: None,
                status,
                paused_at: None,
                current_pause_start: None,
                total_paused_time: 0,
                sequence_number: next_seq,
                is_urgent,
                created_at: now,
                updated_at: now,
            };
            next_seq += 1;

            debug!(
                plan_id = %plan.plan_id,
                node_id = %node_id,
                worker_id = %worker.worker_id,
                substation_id = %substation.substation_id,
                expected_start = %expected_start,
                effective_time = effective,
                status = %status,
                "节点分配"
            );

            tails.insert(worker.worker_id.clone(), Some(planned_end));
            *substation_load.entry(substation.substation_id.clone()).or_insert(0) += 1;
            ready_at.insert(assignment.assignment_id.clone(), dependency_ready);
            round.created.push(assignment);
        }

        if plan.scheduling_mode == SchedulingMode::Optimized {
            self.apply_optimized_order(tx, &mut round.created, &ready_at, now)?;
        }

        for a in &round.created {
            AssignmentRepository::insert_tx(tx, a)?;
        }
        Ok(round)
    }

    /// 优化模式: 按策略给出的秩重排各工人本轮新增任务,
    /// 序号接在该工人已提交的最大序号之后
    fn apply_optimized_order(
        &self,
        tx: &Connection,
        created: &mut [WorkerAssignment],
        ready_at: &HashMap<String, DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let mut by_worker: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (i, a) in created.iter().enumerate() {
            by_worker.entry(a.worker_id.clone()).or_default().push(i);
        }

        for (worker_id, indices) in by_worker {
            let candidates: Vec<HeuristicCandidate> = indices
                .iter()
                .map(|&i| HeuristicCandidate {
                    node_id: created[i].node_id.clone(),
                    effective_time: created[i].effective_time,
                    is_urgent: created[i].is_urgent,
                    ready_at: ready_at.get(&created[i].assignment_id).copied().unwrap_or(now),
                })
                .collect();

            let ranks = self.heuristic.rank(&worker_id, &candidates);
            validate_ranks(self.heuristic.name(), &worker_id, candidates.len(), &ranks)?;

            let mut ordered: Vec<(i64, usize)> = ranks.into_iter().zip(indices).collect();
            ordered.sort_unstable();

            let base_index = AssignmentRepository::max_optimized_index_tx(tx, &worker_id)?;
            let committed_tail = AssignmentRepository::worker_tail_tx(tx, &worker_id)?;
            let mut running = committed_tail;

            for (position, (_, i)) in ordered.into_iter().enumerate() {
                let a = &mut created[i];
                let ready = ready_at.get(&a.assignment_id).copied().unwrap_or(now);
                let start = ready.max(running.unwrap_or(now));
                a.optimized_index = Some(base_index + position as i64 + 1);
                a.expected_start = start;
                a.optimized_start = Some(start);
                a.planned_end = start + a.effective_duration();
                a.status = if committed_tail.is_none() && position == 0 {
                    AssignmentStatus::Ready
                } else {
                    AssignmentStatus::Queued
                };
                running = Some(a.planned_end);
            }
        }
        Ok(())
    }
}

/// 节点校验: 未知前置、未知工序、物料需求损坏
pub fn validate_nodes(
    plan: &ProductionPlan,
    graph: &PlanGraph<'_>,
    operations: &BTreeMap<String, OperationDefinition>,
) -> Vec<NodeConflict> {
    let mut conflicts: Vec<NodeConflict> = graph.unknown_predecessors().to_vec();
    for node in &plan.nodes {
        if !operations.contains_key(&node.operation_id) {
            conflicts.push(NodeConflict::new(
                node.node_id.clone(),
                format!("工序定义{}不存在", node.operation_id),
            ));
        }
        for input in &node.material_inputs {
            if let Some(MaterialInputIssue::Malformed(reason)) = input.issue() {
                conflicts.push(NodeConflict::new(
                    node.node_id.clone(),
                    format!("物料需求格式错误: {}", reason),
                ));
            }
        }
    }
    conflicts
}

/// 汇总方案排程指标（基于方案的全部未取消任务）
pub fn compute_metrics(graph: &PlanGraph<'_>, total_nodes: usize, assignments: &[WorkerAssignment]) -> PlanMetrics {
    let mut node_time: HashMap<&str, f64> = HashMap::new();
    let mut workers: BTreeSet<&str> = BTreeSet::new();
    for a in assignments.iter().filter(|a| a.status != AssignmentStatus::Cancelled) {
        let entry = node_time.entry(a.node_id.as_str()).or_insert(0.0);
        *entry = entry.max(a.effective_time);
        workers.insert(a.worker_id.as_str());
    }

    PlanMetrics {
        total_nodes,
        assigned_count: node_time.len(),
        total_workers: workers.len(),
        estimated_duration: graph.longest_path(|n| node_time.get(n).copied().unwrap_or(0.0)),
        parallel_paths: graph.parallel_paths(),
    }
}

/// NoEligibleWorkers 诊断样本
pub fn worker_sample(workers: &[Worker], size: usize) -> Vec<WorkerSample> {
    workers
        .iter()
        .take(size)
        .map(|w| WorkerSample {
            worker_id: w.worker_id.clone(),
            status: w.status,
            on_leave: w.on_leave,
        })
        .collect()
}

fn no_worker_reason(workers: &[Worker], operation: &OperationDefinition, on_node: &HashSet<String>) -> String {
    if workers.is_empty() {
        return "工人花名册为空".to_string();
    }
    let reasons: Vec<String> = workers
        .iter()
        .filter_map(|w| ineligibility_reason(w, operation, on_node))
        .take(MAX_REASONS_PER_NODE)
        .collect();
    format!(
        "工序{}无可分配工人（{}名工人均不满足）: {}",
        operation.operation_id,
        workers.len(),
        reasons.join("; ")
    )
}
