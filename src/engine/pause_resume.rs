// ==========================================
// 生产执行核心 - 暂停/恢复工时记账
// ==========================================
// 纯记账: 不访问存储,只改写传入的任务
// 不变量: total_paused_time 单调不减且 >= 0
// ==========================================

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::domain::assignment::WorkerAssignment;
use crate::domain::types::AssignmentStatus;
use crate::engine::error::{EngineError, EngineResult};

/// 有效工时报告
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EffectiveDuration {
    /// (actual_end - actual_start) - total_paused_time,下限 0（毫秒）
    pub millis: i64,
    /// 原始结果为负（数据完整性异常）
    pub anomaly: bool,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PauseResumeAccountant;

impl PauseResumeAccountant {
    pub fn new() -> Self {
        Self
    }

    /// 暂停: 仅 in_progress 可暂停
    pub fn pause(&self, a: &mut WorkerAssignment, now: DateTime<Utc>) -> EngineResult<()> {
        if a.status != AssignmentStatus::InProgress {
            return Err(EngineError::invalid_transition(
                "WorkerAssignment",
                &a.assignment_id,
                a.status,
                "pause",
            ));
        }
        a.status = AssignmentStatus::Paused;
        a.paused_at = Some(now);
        a.current_pause_start = Some(now);
        a.updated_at = now;
        Ok(())
    }

    /// 恢复: 需 paused 且存在未结束的暂停段
    ///
    /// 返回本次计入的暂停毫秒数
    pub fn resume(&self, a: &mut WorkerAssignment, now: DateTime<Utc>) -> EngineResult<i64> {
        if a.status != AssignmentStatus::Paused || a.current_pause_start.is_none() {
            return Err(EngineError::invalid_transition(
                "WorkerAssignment",
                &a.assignment_id,
                a.status,
                "resume",
            ));
        }
        let added = self.close_open_pause(a, now);
        a.status = if a.has_started() {
            AssignmentStatus::InProgress
        } else {
            AssignmentStatus::Ready
        };
        a.updated_at = now;
        Ok(added)
    }

    /// 结束未闭合的暂停段并累计（取消时也会调用）
    ///
    /// 时钟回拨时本段按 0 计,并记 warn
    pub fn close_open_pause(&self, a: &mut WorkerAssignment, now: DateTime<Utc>) -> i64 {
        let Some(start) = a.current_pause_start.take() else {
            return 0;
        };
        let gap = (now - start).num_milliseconds();
        if gap < 0 {
            tracing::warn!(
                assignment_id = %a.assignment_id,
                pause_start = %start,
                now = %now,
                "检测到时钟回拨，本次暂停时长按 0 计"
            );
        }
        let added = gap.max(0);
        a.total_paused_time = a.total_paused_time.saturating_add(added);
        added
    }

    /// 有效工时（仅报告用）
    ///
    /// 未开工或未完工时返回 None
    pub fn effective_duration(&self, a: &WorkerAssignment) -> Option<EffectiveDuration> {
        let (start, end) = (a.actual_start?, a.actual_end?);
        let raw = (end - start).num_milliseconds() - a.total_paused_time;
        if raw < 0 {
            tracing::warn!(
                assignment_id = %a.assignment_id,
                raw_millis = raw,
                "有效工时为负，数据完整性异常"
            );
        }
        Some(EffectiveDuration {
            millis: raw.max(0),
            anomaly: raw < 0,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::types::SchedulingMode;
    use chrono::Duration;

    fn started(now: DateTime<Utc>) -> WorkerAssignment {
        WorkerAssignment {
            assignment_id: "A1".to_string(),
            work_order_code: "WO-1".to_string(),
            plan_id: "P1".to_string(),
            node_id: "N1".to_string(),
            worker_id: "W1".to_string(),
            station_id: None,
            substation_id: None,
            scheduling_mode: SchedulingMode::Fifo,
            nominal_time: 60.0,
            effective_time: 60.0,
            expected_start: now,
            optimized_start: None,
            optimized_index: None,
            planned_end: now + Duration::minutes(60),
            actual_start: Some(now),
            actual_end: None,
            status: AssignmentStatus::InProgress,
            paused_at: None,
            current_pause_start: None,
            total_paused_time: 0,
            sequence_number: 1,
            is_urgent: false,
            created_at: now,
            updated_at: now,
        }
    }

    #[test]
    fn test_pause_then_resume_accumulates_gap() {
        let t0 = Utc::now();
        let accountant = PauseResumeAccountant::new();
        let mut a = started(t0);

        accountant.pause(&mut a, t0 + Duration::minutes(10)).unwrap();
        assert_eq!(a.status, AssignmentStatus::Paused);
        assert_eq!(a.current_pause_start, Some(t0 + Duration::minutes(10)));

        let added = accountant.resume(&mut a, t0 + Duration::minutes(15)).unwrap();
        assert_eq!(added, 5 * 60_000);
        assert_eq!(a.status, AssignmentStatus::InProgress);
        assert_eq!(a.total_paused_time, 5 * 60_000);
        assert!(a.current_pause_start.is_none());
        assert_eq!(a.paused_at, Some(t0 + Duration::minutes(10)));
    }

    #[test]
    fn test_preconditions() {
        let t0 = Utc::now();
        let accountant = PauseResumeAccountant::new();
        let mut a = started(t0);

        assert!(matches!(
            accountant.resume(&mut a, t0),
            Err(EngineError::InvalidStateTransition { .. })
        ));

        a.status = AssignmentStatus::Queued;
        assert!(accountant.pause(&mut a, t0).is_err());
        assert_eq!(a.status, AssignmentStatus::Queued);
        assert!(a.paused_at.is_none());
    }

    #[test]
    fn test_resume_never_started_goes_ready() {
        let t0 = Utc::now();
        let accountant = PauseResumeAccountant::new();
        let mut a = started(t0);
        a.actual_start = None;
        a.status = AssignmentStatus::Paused;
        a.current_pause_start = Some(t0);

        accountant.resume(&mut a, t0 + Duration::seconds(1)).unwrap();
        assert_eq!(a.status, AssignmentStatus::Ready);
    }

    #[test]
    fn test_clock_regression_counts_zero() {
        let t0 = Utc::now();
        let accountant = PauseResumeAccountant::new();
        let mut a = started(t0);
        accountant.pause(&mut a, t0 + Duration::minutes(10)).unwrap();
        accountant.resume(&mut a, t0 + Duration::minutes(9)).unwrap();
        assert_eq!(a.total_paused_time, 0);
    }

    #[test]
    fn test_effective_duration_clamps_and_flags() {
        let t0 = Utc::now();
        let accountant = PauseResumeAccountant::new();
        let mut a = started(t0);
        assert!(accountant.effective_duration(&a).is_none());

        a.actual_end = Some(t0 + Duration::minutes(30));
        a.total_paused_time = 10 * 60_000;
        let d = accountant.effective_duration(&a).unwrap();
        assert_eq!(d, EffectiveDuration { millis: 20 * 60_000, anomaly: false });

        a.total_paused_time = 40 * 60_000;
        let d = accountant.effective_duration(&a).unwrap();
        assert_eq!(d, EffectiveDuration { millis: 0, anomaly: true });
    }
}
