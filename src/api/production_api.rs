// ==========================================
// 生产执行核心 - 生产执行 API
// ==========================================
// 职责: 工单/方案级操作（下达、暂停、恢复、取消、完工、加急、齐套检查）
// 输入在此校验,业务规则全部下沉到引擎
// ==========================================

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use std::sync::{Arc, Mutex};

use rusqlite::Connection;

use crate::api::error::ApiResult;
use crate::api::validator::{normalize_actor, parse_materials, require_id, validate_progress};
use crate::domain::action_log::ActionLog;
use crate::domain::material::MaterialCheckResult;
use crate::engine::orchestrator::{LaunchOrchestrator, LaunchSummary};
use crate::engine::state_machine::{
    CancellationOutcome, CompleteOutcome, PauseOutcome, ResumeOutcome, UrgencyAck, WorkOrderStateMachine,
    WorkOrderStatusView,
};

// ==========================================
// 请求 DTO
// ==========================================

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchRequest {
    pub plan_id: String,
    pub work_order_code: String,
    #[serde(default)]
    pub actor: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancelRequest {
    pub plan_id: String,
    pub actual_output_quantity: f64,
    pub defect_quantity: f64,
    #[serde(default)]
    pub actor: Option<String>,
}

/// 审计日志视图
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ActionLogView {
    pub action_id: String,
    pub action_type: String,
    pub plan_id: Option<String>,
    pub actor: String,
    pub action_ts: String,
    pub payload: Option<JsonValue>,
}

impl From<ActionLog> for ActionLogView {
    fn from(log: ActionLog) -> Self {
        Self {
            action_id: log.action_id,
            action_type: log.action_type.as_str().to_string(),
            plan_id: log.plan_id,
            actor: log.actor,
            action_ts: log.action_ts.to_rfc3339(),
            payload: log.payload_json,
        }
    }
}

// ==========================================
// ProductionApi - 生产执行 API
// ==========================================
pub struct ProductionApi {
    state_machine: Arc<WorkOrderStateMachine>,
    orchestrator: LaunchOrchestrator,
}

impl ProductionApi {
    /// 以 config_kv 中的配置创建
    pub fn new(conn: Arc<Mutex<Connection>>) -> ApiResult<Self> {
        let state_machine = Arc::new(WorkOrderStateMachine::new(conn.clone())?);
        Ok(Self::with_state_machine(conn, state_machine))
    }

    pub fn with_state_machine(conn: Arc<Mutex<Connection>>, state_machine: Arc<WorkOrderStateMachine>) -> Self {
        Self {
            orchestrator: LaunchOrchestrator::new(conn, state_machine.clone()),
            state_machine,
        }
    }

    pub fn state_machine(&self) -> &Arc<WorkOrderStateMachine> {
        &self.state_machine
    }

    /// 下达方案
    ///
    /// # 返回
    /// - assignedCount / totalNodes / totalWorkers / queuedCount / estimatedDuration / parallelPaths
    /// - warnings: 物料检查不可用、物料短缺、节点冲突、未分配节点
    pub async fn launch(&self, req: LaunchRequest) -> ApiResult<LaunchSummary> {
        let plan_id = require_id("planId", &req.plan_id)?;
        let work_order_code = require_id("workOrderCode", &req.work_order_code)?;
        let actor = normalize_actor(req.actor.as_deref());
        Ok(self.orchestrator.launch(plan_id, work_order_code, &actor).await?)
    }

    pub fn pause(&self, plan_id: &str, actor: Option<&str>) -> ApiResult<PauseOutcome> {
        let plan_id = require_id("planId", plan_id)?;
        Ok(self.state_machine.pause(plan_id, &normalize_actor(actor))?)
    }

    pub fn resume(&self, plan_id: &str, actor: Option<&str>) -> ApiResult<ResumeOutcome> {
        let plan_id = require_id("planId", plan_id)?;
        Ok(self.state_machine.resume(plan_id, &normalize_actor(actor))?)
    }

    /// 按实际产出取消
    pub fn cancel_with_progress(&self, req: CancelRequest) -> ApiResult<CancellationOutcome> {
        let plan_id = require_id("planId", &req.plan_id)?;
        let progress = validate_progress(req.actual_output_quantity, req.defect_quantity)?;
        let actor = normalize_actor(req.actor.as_deref());
        Ok(self.state_machine.cancel_with_progress(plan_id, progress, &actor)?)
    }

    pub fn complete(&self, work_order_code: &str, actor: Option<&str>) -> ApiResult<CompleteOutcome> {
        let code = require_id("workOrderCode", work_order_code)?;
        Ok(self.state_machine.complete(code, &normalize_actor(actor))?)
    }

    pub fn set_urgent_priority(&self, work_order_code: &str, urgent: bool, actor: Option<&str>) -> ApiResult<UrgencyAck> {
        let code = require_id("workOrderCode", work_order_code)?;
        Ok(self
            .state_machine
            .set_urgent_priority(code, urgent, &normalize_actor(actor))?)
    }

    /// 物料齐套检查（只读,库存不可用时降级而非报错）
    pub async fn check_material_availability(&self, materials: &[JsonValue]) -> ApiResult<MaterialCheckResult> {
        let inputs = parse_materials(materials)?;
        Ok(self.orchestrator.check_material_availability(&inputs).await)
    }

    pub fn work_order_status(&self, work_order_code: &str) -> ApiResult<WorkOrderStatusView> {
        let code = require_id("workOrderCode", work_order_code)?;
        Ok(self.state_machine.work_order_status(code)?)
    }

    pub fn action_log(&self, work_order_code: &str) -> ApiResult<Vec<ActionLogView>> {
        let code = require_id("workOrderCode", work_order_code)?;
        Ok(self
            .state_machine
            .action_log(code)?
            .into_iter()
            .map(ActionLogView::from)
            .collect())
    }
}
