// ==========================================
// 生产执行核心 - 优化排程策略
// ==========================================
// 优化模式下每个工人队列的顺序由可替换的策略给出;
// 引擎只要求策略对每个工人的候选给出严格为正、互不重复的秩
// ==========================================

use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::engine::error::{EngineError, EngineResult};

/// 排序候选（同一工人本轮新增的任务）
#[derive(Debug, Clone)]
pub struct HeuristicCandidate {
    pub node_id: String,
    pub effective_time: f64,
    pub is_urgent: bool,
    /// 依赖完成的估计时间
    pub ready_at: DateTime<Utc>,
}

pub trait OptimizationHeuristic: Send + Sync {
    fn name(&self) -> &'static str;

    /// 为候选给出秩（与 candidates 一一对应,越小越靠前）
    fn rank(&self, worker_id: &str, candidates: &[HeuristicCandidate]) -> Vec<i64>;
}

/// 按比较函数排序后给出 1..=n 的秩
fn rank_by<F>(candidates: &[HeuristicCandidate], cmp: F) -> Vec<i64>
where
    F: Fn(&HeuristicCandidate, &HeuristicCandidate) -> std::cmp::Ordering,
{
    let mut order: Vec<usize> = (0..candidates.len()).collect();
    order.sort_by(|&a, &b| cmp(&candidates[a], &candidates[b]));
    let mut ranks = vec![0; candidates.len()];
    for (position, idx) in order.into_iter().enumerate() {
        ranks[idx] = position as i64 + 1;
    }
    ranks
}

/// 最短加工时间优先（加急优先,同工时按 node_id）
#[derive(Debug, Clone, Copy, Default)]
pub struct ShortestProcessingTimeHeuristic;

impl OptimizationHeuristic for ShortestProcessingTimeHeuristic {
    fn name(&self) -> &'static str {
        "shortest_processing_time"
    }

    fn rank(&self, _worker_id: &str, candidates: &[HeuristicCandidate]) -> Vec<i64> {
        rank_by(candidates, |a, b| {
            b.is_urgent
                .cmp(&a.is_urgent)
                .then_with(|| a.effective_time.total_cmp(&b.effective_time))
                .then_with(|| a.node_id.cmp(&b.node_id))
        })
    }
}

/// 最早就绪优先
#[derive(Debug, Clone, Copy, Default)]
pub struct EarliestReadyHeuristic;

impl OptimizationHeuristic for EarliestReadyHeuristic {
    fn name(&self) -> &'static str {
        "earliest_ready"
    }

    fn rank(&self, _worker_id: &str, candidates: &[HeuristicCandidate]) -> Vec<i64> {
        rank_by(candidates, |a, b| {
            b.is_urgent
                .cmp(&a.is_urgent)
                .then_with(|| a.ready_at.cmp(&b.ready_at))
                .then_with(|| a.node_id.cmp(&b.node_id))
        })
    }
}

/// 按配置名选择策略,未知名称回退默认策略
pub fn heuristic_from_name(name: &str) -> Arc<dyn OptimizationHeuristic> {
    match name.trim().to_lowercase().as_str() {
        "shortest_processing_time" | "spt" => Arc::new(ShortestProcessingTimeHeuristic),
        "earliest_ready" => Arc::new(EarliestReadyHeuristic),
        other => {
            tracing::warn!(heuristic = %other, "未知的优化排序策略，使用 shortest_processing_time");
            Arc::new(ShortestProcessingTimeHeuristic)
        }
    }
}

/// 校验策略输出: 覆盖全部候选、严格为正、无重复
pub fn validate_ranks(heuristic: &str, worker_id: &str, expected: usize, ranks: &[i64]) -> EngineResult<()> {
    if ranks.len() != expected {
        return Err(EngineError::HeuristicViolation(format!(
            "{}: 工人{}的候选数{}与输出数{}不一致",
            heuristic,
            worker_id,
            expected,
            ranks.len()
        )));
    }
    let mut seen = HashSet::new();
    for &rank in ranks {
        if rank <= 0 {
            return Err(EngineError::HeuristicViolation(format!(
                "{}: 工人{}出现非正序号{}",
                heuristic, worker_id, rank
            )));
        }
        if !seen.insert(rank) {
            return Err(EngineError::HeuristicViolation(format!(
                "{}: 工人{}出现重复序号{}",
                heuristic, worker_id, rank
            )));
        }
    }
    Ok(())
}
