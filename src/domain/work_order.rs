// ==========================================
// 生产执行核心 - 工单领域模型
// ==========================================
// 工单在报价审批时由外部创建,本核心只维护其生产状态与加急标志
// ==========================================

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::plan::ProductionPlan;
use crate::domain::types::ProductionState;

// ==========================================
// WorkOrder - 工单
// ==========================================
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub work_order_code: String,                           // 工单编号
    pub production_state: Option<ProductionState>,         // 生产状态（持久化，权威来源）
    pub production_state_updated_at: Option<DateTime<Utc>>, // 状态更新时间
    pub is_urgent: bool,                                   // 加急标志
    pub created_at: DateTime<Utc>,                         // 创建时间
}

impl WorkOrder {
    /// 新建待下达工单
    pub fn new(work_order_code: impl Into<String>, created_at: DateTime<Utc>) -> Self {
        Self {
            work_order_code: work_order_code.into(),
            production_state: Some(ProductionState::WaitingApproval),
            production_state_updated_at: Some(created_at),
            is_urgent: false,
            created_at,
        }
    }

    /// 解析当前生产状态
    ///
    /// 持久化的 production_state 为唯一事实来源;
    /// 仅当其缺失时才回退到方案的 launch_status。
    pub fn resolved_state(&self, plan: Option<&ProductionPlan>) -> ProductionState {
        match (self.production_state, plan) {
            (Some(state), _) => state,
            (None, Some(plan)) => plan.launch_status.fallback_production_state(),
            (None, None) => ProductionState::WaitingApproval,
        }
    }
}
