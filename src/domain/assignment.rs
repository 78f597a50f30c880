// ==========================================
// 生产执行核心 - 工人任务（工作包）领域模型
// ==========================================
// 对齐: worker_assignment 表（持久化契约,字段逐一对应）
// 红线: 任务只由排程器创建,此后只做状态迁移,永不删除/重建
// ==========================================

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::types::{AssignmentStatus, SchedulingMode};

// ==========================================
// WorkerAssignment - 工人任务
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerAssignment {
    // ===== 主键与归属 =====
    pub assignment_id: String,
    pub work_order_code: String,
    pub plan_id: String,
    pub node_id: String,
    pub worker_id: String,
    pub station_id: Option<String>,
    pub substation_id: Option<String>,

    // ===== 排程字段 =====
    pub scheduling_mode: SchedulingMode,
    pub nominal_time: f64,   // 标准工时（分钟）
    pub effective_time: f64, // 有效工时 = 标准工时 / 工人效率（分钟）
    pub expected_start: DateTime<Utc>,
    pub optimized_start: Option<DateTime<Utc>>,
    pub optimized_index: Option<i64>,
    pub planned_end: DateTime<Utc>,

    // ===== 执行字段 =====
    pub actual_start: Option<DateTime<Utc>>,
    pub actual_end: Option<DateTime<Utc>>,
    pub status: AssignmentStatus,

    // ===== 暂停记账 =====
    pub paused_at: Option<DateTime<Utc>>,
    pub current_pause_start: Option<DateTime<Utc>>,
    pub total_paused_time: i64, // 累计暂停毫秒数

    pub sequence_number: i64,
    pub is_urgent: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkerAssignment {
    /// 有效工时对应的时长
    pub fn effective_duration(&self) -> Duration {
        minutes_to_duration(self.effective_time)
    }

    /// 是否已实际开工
    pub fn has_started(&self) -> bool {
        self.actual_start.is_some()
    }

    /// 检查持久化契约中的时间不变量
    ///
    /// 返回第一条被违反的约束说明
    pub fn invariant_violation(&self) -> Option<String> {
        if let Some(start) = self.actual_start {
            if start < self.expected_start {
                return Some(format!(
                    "actual_start({}) < expected_start({})",
                    start, self.expected_start
                ));
            }
            if let Some(end) = self.actual_end {
                if end < start {
                    return Some(format!("actual_end({}) < actual_start({})", end, start));
                }
            }
        } else if self.actual_end.is_some() {
            return Some("actual_end 存在但 actual_start 缺失".to_string());
        }
        if self.total_paused_time < 0 {
            return Some(format!("total_paused_time({}) < 0", self.total_paused_time));
        }
        if let Some(index) = self.optimized_index {
            if index <= 0 {
                return Some(format!("optimized_index({}) <= 0", index));
            }
        }
        None
    }
}

/// 分钟数转换为 chrono 时长（毫秒精度）
pub fn minutes_to_duration(minutes: f64) -> Duration {
    if !minutes.is_finite() || minutes <= 0.0 {
        return Duration::zero();
    }
    Duration::milliseconds((minutes * 60_000.0).round() as i64)
}
