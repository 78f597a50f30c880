// ==========================================
// 生产执行核心 - 下达编排器
// ==========================================
// 用途: 串联 物料齐套检查 → 状态机下达（含排程）
// 物料检查只产生警告,从不阻断下达
// ==========================================

use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tracing::{info, warn};

use rusqlite::Connection;

use crate::domain::material::{MaterialCheckResult, MaterialShortage};
use crate::domain::plan::MaterialInput;
use crate::engine::error::{EngineError, EngineResult, NodeConflict};
use crate::engine::material_check::{MaterialAvailabilityChecker, StockLookup};
use crate::engine::state_machine::{LaunchOutcome, WorkOrderStateMachine};
use crate::repository::{PlanRepository, StockRepository};

// ==========================================
// LaunchWarning - 下达警告（非致命）
// ==========================================
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "camelCase")]
pub enum LaunchWarning {
    /// 库存查询失败或超时
    #[serde(rename_all = "camelCase")]
    MaterialCheckUnavailable { reason: String },
    /// 物料短缺
    #[serde(rename_all = "camelCase")]
    MaterialShortage {
        shortages: Vec<MaterialShortage>,
        has_critical_shortages: bool,
    },
    /// 节点校验失败（部分下达）
    #[serde(rename_all = "camelCase")]
    AssignmentConflict { conflicts: Vec<NodeConflict> },
    /// 就绪但无可用工人/工位
    #[serde(rename_all = "camelCase")]
    UnassignedNodes { nodes: Vec<NodeConflict> },
}

impl LaunchWarning {
    pub fn code(&self) -> &'static str {
        match self {
            LaunchWarning::MaterialCheckUnavailable { .. } => "MATERIAL_CHECK_UNAVAILABLE",
            LaunchWarning::MaterialShortage { .. } => "MATERIAL_SHORTAGE",
            LaunchWarning::AssignmentConflict { .. } => "ASSIGNMENT_CONFLICT",
            LaunchWarning::UnassignedNodes { .. } => "UNASSIGNED_NODES",
        }
    }
}

// ==========================================
// LaunchSummary - 下达结果汇总
// ==========================================
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LaunchSummary {
    #[serde(flatten)]
    pub outcome: LaunchOutcome,
    pub material_check: MaterialCheckResult,
    pub warnings: Vec<LaunchWarning>,
}

impl LaunchSummary {
    pub fn has_warning(&self, code: &str) -> bool {
        self.warnings.iter().any(|w| w.code() == code)
    }
}

// ==========================================
// LaunchOrchestrator - 下达编排器
// ==========================================
pub struct LaunchOrchestrator<S: StockLookup = StockRepository> {
    state_machine: Arc<WorkOrderStateMachine>,
    checker: MaterialAvailabilityChecker<S>,
    plans: PlanRepository,
}

impl LaunchOrchestrator<StockRepository> {
    /// 使用本库的库存表作为库存来源
    pub fn new(conn: Arc<Mutex<Connection>>, state_machine: Arc<WorkOrderStateMachine>) -> Self {
        let stock = Arc::new(StockRepository::new(conn.clone()));
        Self::with_stock_lookup(conn, state_machine, stock)
    }
}

impl<S: StockLookup> LaunchOrchestrator<S> {
    pub fn with_stock_lookup(
        conn: Arc<Mutex<Connection>>,
        state_machine: Arc<WorkOrderStateMachine>,
        stock: Arc<S>,
    ) -> Self {
        let config = state_machine.config();
        let checker = MaterialAvailabilityChecker::new(
            stock,
            config.critical_shortage_ratio,
            Duration::from_millis(config.material_check_timeout_ms),
        );
        Self {
            checker,
            plans: PlanRepository::new(conn),
            state_machine,
        }
    }

    pub fn state_machine(&self) -> &Arc<WorkOrderStateMachine> {
        &self.state_machine
    }

    /// 下达方案
    ///
    /// # 流程
    /// 1. 读取方案（不存在 → NotFound）
    /// 2. 物料齐套检查（降级不报错）
    /// 3. 状态机下达（排程 + 预留 + 状态推进,单事务）
    /// 4. 汇总警告
    pub async fn launch(&self, plan_id: &str, work_order_code: &str, actor: &str) -> EngineResult<LaunchSummary> {
        let plan = self
            .plans
            .find_by_id(plan_id)?
            .ok_or_else(|| EngineError::not_found("ProductionPlan", plan_id))?;

        let material_check = self.checker.check_plan(&plan).await;
        if let Some(reason) = &material_check.error {
            warn!(plan_id = %plan_id, reason = %reason, "物料检查不可用，继续下达");
        }

        let outcome = self.state_machine.launch(plan_id, work_order_code, actor)?;
        let warnings = collect_warnings(&material_check, &outcome);

        info!(
            plan_id = %plan_id,
            work_order_code = %work_order_code,
            assigned_count = outcome.assigned_count,
            warnings = warnings.len(),
            "下达编排完成"
        );
        Ok(LaunchSummary {
            outcome,
            material_check,
            warnings,
        })
    }

    /// 任意物料清单的齐套检查
    pub async fn check_material_availability(&self, materials: &[MaterialInput]) -> MaterialCheckResult {
        self.checker.check_materials(materials).await
    }
}

fn collect_warnings(check: &MaterialCheckResult, outcome: &LaunchOutcome) -> Vec<LaunchWarning> {
    let mut warnings = Vec::new();
    if let Some(reason) = &check.error {
        warnings.push(LaunchWarning::MaterialCheckUnavailable { reason: reason.clone() });
    } else if !check.shortages.is_empty() {
        warnings.push(LaunchWarning::MaterialShortage {
            shortages: check.shortages.clone(),
            has_critical_shortages: check.has_critical_shortages,
        });
    }
    if !outcome.conflicts.is_empty() {
        warnings.push(LaunchWarning::AssignmentConflict {
            conflicts: outcome.conflicts.clone(),
        });
    }
    if !outcome.unassigned.is_empty() {
        warnings.push(LaunchWarning::UnassignedNodes {
            nodes: outcome.unassigned.clone(),
        });
    }
    warnings
}
