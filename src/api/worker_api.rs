// ==========================================
// 生产执行核心 - 工人任务 API
// ==========================================
// 职责: 工人队列查询、开工、完工
// 队列读取不加事务,读取最近一次提交的快照
// ==========================================

use serde::Serialize;
use std::sync::Arc;

use crate::api::error::{ApiError, ApiResult};
use crate::api::validator::{normalize_actor, parse_scheduling_mode, require_id};
use crate::domain::assignment::WorkerAssignment;
use crate::engine::pause_resume::EffectiveDuration;
use crate::engine::state_machine::WorkOrderStateMachine;

/// 任务视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AssignmentView {
    pub assignment_id: String,
    pub work_order_code: String,
    pub plan_id: String,
    pub node_id: String,
    pub worker_id: String,
    pub station_id: Option<String>,
    pub substation_id: Option<String>,
    pub scheduling_mode: String,
    pub status: String,
    pub status_label: String,
    pub nominal_time: f64,
    pub effective_time: f64,
    pub expected_start: String,
    pub optimized_start: Option<String>,
    pub optimized_index: Option<i64>,
    pub planned_end: String,
    pub actual_start: Option<String>,
    pub actual_end: Option<String>,
    pub total_paused_time: i64,
    pub is_urgent: bool,
}

impl From<&WorkerAssignment> for AssignmentView {
    fn from(a: &WorkerAssignment) -> Self {
        Self {
            assignment_id: a.assignment_id.clone(),
            work_order_code: a.work_order_code.clone(),
            plan_id: a.plan_id.clone(),
            node_id: a.node_id.clone(),
            worker_id: a.worker_id.clone(),
            station_id: a.station_id.clone(),
            substation_id: a.substation_id.clone(),
            scheduling_mode: a.scheduling_mode.as_db_str().to_string(),
            status: a.status.as_db_str().to_string(),
            status_label: crate::i18n::label(a.status.label_key()),
            nominal_time: a.nominal_time,
            effective_time: a.effective_time,
            expected_start: a.expected_start.to_rfc3339(),
            optimized_start: a.optimized_start.map(|t| t.to_rfc3339()),
            optimized_index: a.optimized_index,
            planned_end: a.planned_end.to_rfc3339(),
            actual_start: a.actual_start.map(|t| t.to_rfc3339()),
            actual_end: a.actual_end.map(|t| t.to_rfc3339()),
            total_paused_time: a.total_paused_time,
            is_urgent: a.is_urgent,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CompleteTaskResponse {
    pub assignment: AssignmentView,
    pub newly_scheduled: Vec<String>,
    pub promoted: Option<String>,
    pub work_order_completed: bool,
}

// ==========================================
// WorkerApi - 工人任务 API
// ==========================================
pub struct WorkerApi {
    state_machine: Arc<WorkOrderStateMachine>,
}

impl WorkerApi {
    pub fn new(state_machine: Arc<WorkOrderStateMachine>) -> Self {
        Self { state_machine }
    }

    /// 工人队列
    ///
    /// # 参数
    /// - mode: "fifo"（加急优先 + expected_start 升序）或 "optimized"（optimized_index 升序）
    pub fn worker_queue(&self, worker_id: &str, mode: &str) -> ApiResult<Vec<AssignmentView>> {
        let worker_id = require_id("workerId", worker_id)?;
        let mode = parse_scheduling_mode(mode)?;
        Ok(self
            .state_machine
            .worker_queue(worker_id, mode)?
            .iter()
            .map(AssignmentView::from)
            .collect())
    }

    pub fn next_task(&self, worker_id: &str, mode: &str) -> ApiResult<Option<AssignmentView>> {
        let worker_id = require_id("workerId", worker_id)?;
        let mode = parse_scheduling_mode(mode)?;
        Ok(self
            .state_machine
            .next_task(worker_id, mode)?
            .as_ref()
            .map(AssignmentView::from))
    }

    pub fn start_task(&self, assignment_id: &str, actor: Option<&str>) -> ApiResult<AssignmentView> {
        let id = require_id("assignmentId", assignment_id)?;
        let outcome = self.state_machine.start_task(id, &normalize_actor(actor))?;
        Ok(AssignmentView::from(&outcome.assignment))
    }

    pub fn complete_task(&self, assignment_id: &str, actor: Option<&str>) -> ApiResult<CompleteTaskResponse> {
        let id = require_id("assignmentId", assignment_id)?;
        let outcome = self.state_machine.complete_task(id, &normalize_actor(actor))?;
        Ok(CompleteTaskResponse {
            assignment: AssignmentView::from(&outcome.assignment),
            newly_scheduled: outcome.newly_scheduled,
            promoted: outcome.promoted,
            work_order_completed: outcome.work_order_completed,
        })
    }

    /// 有效工时（仅已完工任务）
    pub fn effective_duration(&self, assignment_id: &str) -> ApiResult<EffectiveDuration> {
        let id = require_id("assignmentId", assignment_id)?;
        self.state_machine
            .effective_duration(id)?
            .ok_or_else(|| ApiError::ValidationError(format!("任务{}尚未完工", id)))
    }
}
