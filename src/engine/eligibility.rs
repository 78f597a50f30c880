// ==========================================
// 生产执行核心 - 工人/工位资格判定
// ==========================================
// 工人可分配条件:
// 1. 技能集合覆盖工序要求
// 2. 状态 active 且未请假
// 3. 同一节点上没有该工人的既有任务
// 每条不通过的规则都输出原因,用于诊断
// ==========================================

use std::collections::{BTreeSet, HashMap, HashSet};

use crate::domain::master_data::{OperationDefinition, Substation, Worker};
use crate::domain::types::WorkerStatus;

/// 工人不可分配的原因
pub fn ineligibility_reason(
    worker: &Worker,
    operation: &OperationDefinition,
    workers_on_node: &HashSet<String>,
) -> Option<String> {
    if worker.status != WorkerStatus::Active {
        return Some(format!("工人{}未在岗", worker.worker_id));
    }
    if worker.on_leave {
        return Some(format!("工人{}请假中", worker.worker_id));
    }
    if !worker.has_skills(&operation.required_skills) {
        return Some(format!(
            "工人{}缺少技能: {}",
            worker.worker_id,
            worker.missing_skills(&operation.required_skills).join(",")
        ));
    }
    if workers_on_node.contains(&worker.worker_id) {
        return Some(format!("工人{}在该节点已有任务", worker.worker_id));
    }
    None
}

/// 筛选可分配工人
pub fn eligible_workers<'w>(
    workers: &'w [Worker],
    operation: &OperationDefinition,
    workers_on_node: &HashSet<String>,
) -> Vec<&'w Worker> {
    workers
        .iter()
        .filter(|w| ineligibility_reason(w, operation, workers_on_node).is_none())
        .collect()
}

/// 生效效率（<= 0 或非数值时回退默认效率）
pub fn effective_efficiency(worker: &Worker, default_efficiency: f64) -> f64 {
    if worker.efficiency.is_finite() && worker.efficiency > 0.0 {
        worker.efficiency
    } else {
        default_efficiency
    }
}

/// 有效工时 = 标准工时 / 效率（分钟）
pub fn effective_time(nominal_time: f64, efficiency: f64) -> f64 {
    if !nominal_time.is_finite() || nominal_time <= 0.0 || efficiency <= 0.0 {
        return 0.0;
    }
    nominal_time / efficiency
}

/// 选择子工位
///
/// 候选: 可执行该工序的在用子工位
/// 排序: 未占用优先 → 非终态任务数少者优先 → substation_id
pub fn select_substation<'s>(
    substations: &'s [Substation],
    operation_id: &str,
    occupied: &BTreeSet<String>,
    load: &HashMap<String, i64>,
) -> Option<&'s Substation> {
    substations
        .iter()
        .filter(|s| s.supports(operation_id))
        .min_by(|a, b| {
            let key = |s: &Substation| {
                (
                    occupied.contains(&s.substation_id),
                    load.get(&s.substation_id).copied().unwrap_or(0),
                )
            };
            key(a)
                .cmp(&key(b))
                .then_with(|| a.substation_id.cmp(&b.substation_id))
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn worker(id: &str, skills: &[&str]) -> Worker {
        Worker {
            worker_id: id.to_string(),
            name: id.to_string(),
            status: WorkerStatus::Active,
            on_leave: false,
            efficiency: 1.0,
            skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn operation(skills: &[&str]) -> OperationDefinition {
        OperationDefinition {
            operation_id: "OP".to_string(),
            name: "op".to_string(),
            nominal_time: 60.0,
            required_skills: skills.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn substation(id: &str, ops: &[&str]) -> Substation {
        Substation {
            substation_id: id.to_string(),
            station_id: "S1".to_string(),
            active: true,
            operations: ops.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_skill_superset_required() {
        let op = operation(&["CUT", "SEW"]);
        let workers = vec![worker("W1", &["CUT"]), worker("W2", &["CUT", "SEW", "PACK"])];
        let eligible = eligible_workers(&workers, &op, &HashSet::new());
        assert_eq!(eligible.len(), 1);
        assert_eq!(eligible[0].worker_id, "W2");

        let reason = ineligibility_reason(&workers[0], &op, &HashSet::new()).unwrap();
        assert!(reason.contains("SEW"));
    }

    #[test]
    fn test_inactive_on_leave_and_existing_assignment_excluded() {
        let op = operation(&[]);
        let mut inactive = worker("W1", &[]);
        inactive.status = WorkerStatus::Inactive;
        let mut on_leave = worker("W2", &[]);
        on_leave.on_leave = true;
        let busy_on_node = worker("W3", &[]);
        let workers = vec![inactive, on_leave, busy_on_node];

        let on_node = HashSet::from(["W3".to_string()]);
        assert!(eligible_workers(&workers, &op, &on_node).is_empty());
    }

    #[test]
    fn test_effective_time_uses_fallback_efficiency() {
        let mut w = worker("W1", &[]);
        w.efficiency = 0.0;
        assert_eq!(effective_efficiency(&w, 1.0), 1.0);
        w.efficiency = 1.25;
        assert_eq!(effective_time(60.0, effective_efficiency(&w, 1.0)), 48.0);
    }

    #[test]
    fn test_substation_prefers_free_then_least_loaded() {
        let subs = vec![substation("SS1", &["OP"]), substation("SS2", &["OP"]), substation("SS3", &["X"])];
        let occupied = BTreeSet::from(["SS1".to_string()]);
        let chosen = select_substation(&subs, "OP", &occupied, &HashMap::new()).unwrap();
        assert_eq!(chosen.substation_id, "SS2");

        let load = HashMap::from([("SS1".to_string(), 0), ("SS2".to_string(), 3)]);
        let chosen = select_substation(&subs, "OP", &BTreeSet::new(), &load).unwrap();
        assert_eq!(chosen.substation_id, "SS1");

        assert!(select_substation(&subs, "NONE", &BTreeSet::new(), &load).is_none());
    }
}
